//! REST route modules, one per resource, merged into a single router.

pub mod callback;
pub mod convert;
pub mod health;
pub mod platforms;
pub mod status;
pub mod validate;

use axum::Router;

use super::server::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(convert::router())
        .merge(status::router())
        .merge(validate::router())
        .merge(platforms::router())
        .merge(callback::router())
        .with_state(state)
}
