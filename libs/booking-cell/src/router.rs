// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, BookingState};

pub fn booking_routes(state: Arc<BookingState>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_booking))
        .route("/wizard", post(handlers::start_wizard))
        .route("/wizard/{session_id}", get(handlers::get_wizard))
        .route("/wizard/{session_id}", patch(handlers::update_selection))
        .route("/wizard/{session_id}", delete(handlers::reset_wizard))
        .route("/wizard/{session_id}/advance", post(handlers::advance_wizard))
        .route("/wizard/{session_id}/back", post(handlers::back_wizard))
        .route("/wizard/{session_id}/retreat", post(handlers::retreat_wizard))
        .route("/wizard/{session_id}/submit", post(handlers::submit_booking))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
