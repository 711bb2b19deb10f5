pub mod health;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /tasks                        list, submit
/// /tasks/{id}                   get, cancel (DELETE)
/// /tasks/{id}/logs              execution logs
/// /tasks/{id}/stream            server-sent status events
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/tasks", tasks::router())
}
