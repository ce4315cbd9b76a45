//! API v1alpha1 routes.

mod resources;

use axum::Router;

use crate::state::AppState;

/// Create API v1alpha1 routes.
///
/// Every route is scoped by kind: /apis/v1alpha1/{kind}/...
pub fn routes() -> Router<AppState> {
    resources::routes()
}
