use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod throttle;
pub mod tokens;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(handlers::register).get(handlers::list_users))
        .route(
            "/users/me",
            get(handlers::me)
                .patch(handlers::update_me)
                .delete(handlers::delete_me),
        )
        .route("/users/activate/:uid/:token", get(handlers::activate))
        .route("/users/password-reset", post(handlers::password_reset))
        .route(
            "/users/password-reset-confirm/:uid/:token",
            post(handlers::password_reset_confirm),
        )
        .route("/users/token", post(handlers::login))
        .route("/users/token/refresh", post(handlers::refresh))
        .route("/users/token/verify", post(handlers::verify_token))
        .route("/users/logout", post(handlers::logout))
        .route("/users/:id", get(handlers::get_user))
}
