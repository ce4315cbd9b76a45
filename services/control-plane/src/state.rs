//! Application state shared across request handlers.

use std::sync::Arc;

use crate::lifecycle::Lifecycle;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    lifecycle: Lifecycle,
}

impl AppState {
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self {
            inner: Arc::new(AppStateInner { lifecycle }),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }
}
