use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use warden_core::health::healthz;
use warden_core::middleware::{propagate_request_id_layer, request_id_layer};

use crate::handlers::{
    authenticators::{
        attempt_authenticator, create_authenticator, delete_authenticator,
        describe_authenticator, verify_authenticator,
    },
    health::readyz,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Enrollment
        .route("/users/{user_id}/authenticators", post(create_authenticator))
        .route(
            "/users/{user_id}/authenticators/{kind}",
            get(describe_authenticator).delete(delete_authenticator),
        )
        // Codes
        .route(
            "/users/{user_id}/authenticators/{kind}/attempt",
            post(attempt_authenticator),
        )
        .route(
            "/users/{user_id}/authenticators/{kind}/verify",
            post(verify_authenticator),
        )
        .with_state(state)
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
}
