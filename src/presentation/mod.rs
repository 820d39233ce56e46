//! Server-rendered views and templates.

pub mod views;
