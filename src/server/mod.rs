pub mod auth;
pub mod router;
pub mod routes;

pub use router::{AppState, build_router};
