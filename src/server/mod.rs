//! HTTP server assembly.

mod app;
mod state;

pub use app::{create_app, serve};
pub use state::AppState;
