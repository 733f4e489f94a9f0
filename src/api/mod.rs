pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod ws;

pub use routes::{AppState, create_router};
