use axum::{middleware, Router};

use crate::{
    auth::{
        self,
        extractors::{protect, restrict_to, ADMIN_ONLY},
    },
    state::AppState,
};

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;

/// Everything under `/users`: open auth routes, routes behind `protect`, and
/// admin routes behind `protect` + `restrict_to(admin)`.
pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .merge(auth::handlers::protected_routes())
        .merge(handlers::me_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), protect));

    let admin = handlers::admin_routes()
        .route_layer(middleware::from_fn_with_state(ADMIN_ONLY, restrict_to))
        .route_layer(middleware::from_fn_with_state(state, protect));

    Router::new()
        .merge(auth::handlers::public_routes())
        .merge(protected)
        .merge(admin)
}
