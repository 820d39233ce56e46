use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use time::OffsetDateTime;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::pages";

/// A page rendered once and served as-is afterwards.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub html: Arc<str>,
    pub rendered_at: OffsetDateTime,
}

impl CachedPage {
    pub fn new(html: impl Into<Arc<str>>) -> Self {
        Self {
            html: html.into(),
            rendered_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Bounded store of pre-rendered post pages keyed by request path.
///
/// Posts are immutable once written, so entries are only ever evicted, never
/// invalidated.
pub struct StaticPageCache {
    pages: Mutex<LruCache<String, CachedPage>>,
}

impl StaticPageCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            pages: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedPage> {
        let mut pages = mutex_lock(&self.pages, SOURCE, "get");
        let hit = pages.get(key).cloned();
        let outcome = if hit.is_some() { "hit" } else { "miss" };
        metrics::counter!("chirp_static_page_cache_total", "outcome" => outcome).increment(1);
        hit
    }

    pub fn insert(&self, key: impl Into<String>, page: CachedPage) {
        let mut pages = mutex_lock(&self.pages, SOURCE, "insert");
        pages.put(key.into(), page);
        metrics::gauge!("chirp_static_pages_cached").set(pages.len() as f64);
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> StaticPageCache {
        StaticPageCache::new(NonZeroUsize::new(capacity).expect("non-zero"))
    }

    #[test]
    fn stores_and_returns_rendered_pages() {
        let pages = cache(4);
        assert!(pages.get("/post/a").is_none());
        pages.insert("/post/a", CachedPage::new("<p>a</p>"));
        assert_eq!(pages.get("/post/a").map(|page| page.html.to_string()), Some("<p>a</p>".to_string()));
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used_page() {
        let pages = cache(2);
        pages.insert("/post/a", CachedPage::new("a"));
        pages.insert("/post/b", CachedPage::new("b"));
        assert!(pages.get("/post/a").is_some());
        pages.insert("/post/c", CachedPage::new("c"));

        assert!(pages.get("/post/a").is_some());
        assert!(pages.get("/post/b").is_none());
        assert!(pages.get("/post/c").is_some());
    }
}
