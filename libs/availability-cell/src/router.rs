// libs/availability-cell/src/router.rs
use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AvailabilityState};

pub fn availability_routes(state: Arc<AvailabilityState>) -> Router {
    let protected_routes = Router::new()
        .route("/slots", get(handlers::get_available_slots))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
