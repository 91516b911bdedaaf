pub mod api;
pub mod api_doc;
pub mod server;
pub mod ws;

pub use server::{build_router, run_server, AppState};
