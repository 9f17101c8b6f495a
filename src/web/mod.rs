pub mod api;
pub mod server;

pub use api::{ApiError, AppState};
pub use server::{build_router, run_server};
