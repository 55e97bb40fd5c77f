//! Per-event completion callbacks.

use crate::response::EdgeEventHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Called once with every handle received for an event.
pub type CompletionCallback = Box<dyn FnOnce(Vec<EdgeEventHandle>) + Send + 'static>;

/// Collects handles per event id and fires the caller's callback when the
/// request finishes.
///
/// Callbacks run outside the registry locks.
#[derive(Default)]
pub struct CompletionRegistry {
    callbacks: Mutex<HashMap<String, CompletionCallback>>,
    handles: Mutex<HashMap<String, Vec<EdgeEventHandle>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting handles for `event_id`.
    pub fn register(&self, event_id: &str, callback: CompletionCallback) {
        if event_id.is_empty() {
            return;
        }
        self.callbacks.lock().insert(event_id.to_string(), callback);
    }

    /// Accumulate a handle for `event_id`. Never fires the callback.
    pub fn on_handle_received(&self, event_id: &str, handle: EdgeEventHandle) {
        if event_id.is_empty() {
            return;
        }
        self.handles
            .lock()
            .entry(event_id.to_string())
            .or_default()
            .push(handle);
    }

    /// Fire and remove the callback for `event_id`, clearing accumulated
    /// handles either way.
    ///
    /// Returns false if no callback was registered, so repeat calls are
    /// harmless.
    pub fn unregister(&self, event_id: &str) -> bool {
        let callback = self.callbacks.lock().remove(event_id);
        let handles = self.handles.lock().remove(event_id).unwrap_or_default();

        match callback {
            Some(callback) => {
                debug!(event_id, handles = handles.len(), "Completing event");
                callback(handles);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, event_id: &str) -> bool {
        self.callbacks.lock().contains_key(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(kind: &str) -> EdgeEventHandle {
        EdgeEventHandle {
            event_index: Some(0),
            handle_type: Some(kind.to_string()),
            payload: Vec::new(),
        }
    }

    fn capture() -> (CompletionCallback, Arc<Mutex<Vec<Vec<EdgeEventHandle>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (Box::new(move |handles| sink.lock().push(handles)), calls)
    }

    #[test]
    fn test_callback_receives_handles_once() {
        let registry = CompletionRegistry::new();
        let (callback, calls) = capture();
        registry.register("e1", callback);

        registry.on_handle_received("e1", handle("personalization:decisions"));
        registry.on_handle_received("e1", handle("state:store"));
        registry.on_handle_received("other", handle("uncollected"));

        assert!(registry.unregister("e1"));
        assert!(!registry.unregister("e1"));
        assert!(!registry.unregister("other"));
        assert!(registry.handles.lock().is_empty());

        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][1].handle_type.as_deref(), Some("state:store"));
    }

    #[test]
    fn test_unregister_without_handles_gives_empty_list() {
        let registry = CompletionRegistry::new();
        let (callback, calls) = capture();
        registry.register("e1", callback);

        assert!(registry.unregister("e1"));
        assert_eq!(*calls.lock(), vec![Vec::<EdgeEventHandle>::new()]);
        assert!(!registry.is_registered("e1"));
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let registry = Arc::new(CompletionRegistry::new());
        let inner = registry.clone();
        registry.register(
            "e1",
            Box::new(move |_| {
                assert!(!inner.is_registered("e1"));
            }),
        );
        assert!(registry.unregister("e1"));
    }
}
