//! HTTP transport.

mod routes;
mod server;

pub use routes::{HealthResponse, routes};
pub use server::{ServerConfig, serve};
