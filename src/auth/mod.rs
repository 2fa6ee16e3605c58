use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod email;
pub mod extractors;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
