//! Handler registration and ordering.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::handler::HttpHandler;
use crate::routing::normalize_path;

/// One registered handler with its matching and ordering metadata.
pub struct HttpHandlerEntry {
    /// Normalized path pattern.
    pub path: String,
    /// Restricts the handler to requests on this listener port.
    pub port: Option<u16>,
    /// Lower priorities run first.
    pub priority: i32,
    /// Registration sequence, breaks priority ties.
    pub seq: u64,
    pub(crate) handler_type: TypeId,
    pub type_name: &'static str,
    pub handler: Arc<dyn HttpHandler>,
}

/// Holds all HTTP handlers of a server, sorted by ascending priority.
///
/// The entry list is copy-on-write: registration replaces the snapshot
/// under a lock while request routing clones the current `Arc` and walks
/// it without blocking writers.
pub struct HttpHandlerRegistry {
    entries: RwLock<Arc<Vec<Arc<HttpHandlerEntry>>>>,
    next_seq: AtomicU64,
}

impl HttpHandlerRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Registers a handler for a path pattern.
    ///
    /// Registration is idempotent per handler type and pattern: a second
    /// handler of the same concrete type on the same normalized path is a
    /// no-op and returns false.
    pub fn register<H: HttpHandler>(
        &self,
        path: &str,
        port: Option<u16>,
        priority: i32,
        handler: H,
    ) -> bool {
        let normalized = normalize_path(path);
        let handler_type = TypeId::of::<H>();
        let mut entries = self.entries.write().expect("registry lock poisoned");

        if entries
            .iter()
            .any(|entry| entry.path == normalized && entry.handler_type == handler_type)
        {
            debug!(path = %normalized, handler = std::any::type_name::<H>(), "handler already registered");
            return false;
        }

        let entry = Arc::new(HttpHandlerEntry {
            path: normalized.clone(),
            port,
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            handler_type,
            type_name: std::any::type_name::<H>(),
            handler: Arc::new(handler),
        });

        let mut next: Vec<Arc<HttpHandlerEntry>> = entries.iter().cloned().collect();
        next.push(entry);
        next.sort_by_key(|entry| (entry.priority, entry.seq));
        *entries = Arc::new(next);

        info!(path = %normalized, priority, "🧭 Registered http handler");
        true
    }

    /// Removes every handler registered for a pattern.
    pub fn remove_handlers(&self, path: &str) {
        let normalized = normalize_path(path);
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let next: Vec<Arc<HttpHandlerEntry>> = entries
            .iter()
            .filter(|entry| entry.path != normalized)
            .cloned()
            .collect();
        *entries = Arc::new(next);
    }

    pub fn clear(&self) {
        *self.entries.write().expect("registry lock poisoned") = Arc::new(Vec::new());
    }

    pub fn handler_count(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    /// Current sorted entry list.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<HttpHandlerEntry>>> {
        self.entries.read().expect("registry lock poisoned").clone()
    }
}

impl Default for HttpHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HttpContext;
    use crate::error::HttpError;
    use async_trait::async_trait;

    struct TagHandler(&'static str);

    #[async_trait]
    impl HttpHandler for TagHandler {
        async fn handle(&self, _path: &str, _context: &mut HttpContext) -> Result<(), HttpError> {
            Ok(())
        }
    }

    struct OtherHandler;

    #[async_trait]
    impl HttpHandler for OtherHandler {
        async fn handle(&self, _path: &str, _context: &mut HttpContext) -> Result<(), HttpError> {
            Ok(())
        }
    }

    #[test]
    fn entries_are_sorted_by_ascending_priority() {
        let registry = HttpHandlerRegistry::new();
        registry.register("/a", None, 5, TagHandler("five"));
        registry.register("/b", None, 1, TagHandler("one"));
        registry.register("/c", None, 10, TagHandler("ten"));

        let priorities: Vec<i32> = registry.snapshot().iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![1, 5, 10]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let registry = HttpHandlerRegistry::new();
        registry.register("/first", None, 0, TagHandler("first"));
        registry.register("/second", None, 0, OtherHandler);

        let snapshot = registry.snapshot();
        let paths: Vec<&str> = snapshot
            .iter()
            .map(|e| e.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["/first", "/second"]);
    }

    #[test]
    fn duplicate_type_and_path_is_a_no_op() {
        let registry = HttpHandlerRegistry::new();
        assert!(registry.register("/dup", None, 0, TagHandler("a")));
        assert!(!registry.register("/dup/", None, 3, TagHandler("b")));
        assert!(registry.register("/dup", None, 0, OtherHandler));
        assert_eq!(registry.handler_count(), 2);
    }

    #[test]
    fn remove_handlers_drops_all_entries_for_a_path() {
        let registry = HttpHandlerRegistry::new();
        registry.register("/gone", None, 0, TagHandler("a"));
        registry.register("/gone", None, 1, OtherHandler);
        registry.register("/kept", None, 0, TagHandler("a"));

        registry.remove_handlers("/gone/");
        assert_eq!(registry.handler_count(), 1);
        assert_eq!(registry.snapshot()[0].path, "/kept");
    }
}
