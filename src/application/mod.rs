//! Application services: procedures, posting rules and page prefetching.

pub mod error;
pub mod identity;
pub mod posts;
pub mod prefetch;
pub mod procedures;
pub mod profile;
pub mod rate_limit;
pub mod repos;
