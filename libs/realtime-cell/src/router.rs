// libs/realtime-cell/src/router.rs
use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, RealtimeState};

pub fn realtime_routes(state: Arc<RealtimeState>) -> Router {
    let protected_routes = Router::new()
        .route("/ws", get(handlers::subscribe_ws))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
