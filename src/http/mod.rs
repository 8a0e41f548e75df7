//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, global middleware)
//!     → endpoints.rs (/health, /auth/*) | admin | route table lookup
//!     → middleware/ (route-scoped chain)
//!     → proxy.rs (load balancer picks a backend, request rewritten)
//!     → client.rs (pooled hyper client)
//!     → response.rs (transform, add headers)
//!     → Send to client
//! ```

pub mod client;
pub mod endpoints;
pub mod middleware;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_GATEWAY_REQUEST_ID;
pub use server::{AppState, BuildError, HttpServer};
