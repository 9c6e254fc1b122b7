//! HTTP front end.
//!
//! Accepts chat requests from the page, opens an answer stream against the
//! selected provider and returns the normalized frames.

mod handlers;
mod server;

pub use handlers::{ChatRequest, REQUEST_ID_HEADER};
pub use server::{create_router, run_server, AppState};
