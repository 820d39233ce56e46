//! In-process caches.
//!
//! - **Query cache**: procedure results keyed by procedure path and canonical JSON
//!   input. Concurrent identical queries share one fetch; writes invalidate the
//!   procedures that depend on them.
//! - **Page cache**: rendered HTML for statically generated routes, filled on the
//!   first request and evicted by capacity only.

mod lock;
mod pages;
mod query;

pub use pages::{CachedPage, StaticPageCache};
pub use query::{CachedQuery, QueryCache, QueryKey};
