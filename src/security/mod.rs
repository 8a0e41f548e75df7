//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (CORS, security response headers; global)
//!     → auth.rs (bearer token → AuthContext; per route)
//!     → rate_limit.rs (per client/user/path limits; per route)
//!     → Pass to dispatcher
//! ```
//!
//! # Design Decisions
//! - Authentication fails closed: any token problem is a 401
//! - Rate limiting fails open: a store outage must not take traffic down
//! - No trust in client input

pub mod auth;
pub mod headers;
pub mod rate_limit;

pub use auth::{
    parse_bearer, AuthContext, AuthError, SessionTokenService, StaticUserDirectory, TokenPair,
    TokenValidator, User, UserDirectory,
};
pub use rate_limit::{rate_limit_key, RateLimitAlgorithm, RateLimitError, RateLimiter};
