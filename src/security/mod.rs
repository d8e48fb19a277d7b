//! Request identity and admission control.
//!
//! - [`claims`]: Identity marker attached to authenticated requests
//! - [`middleware`]: Bearer-token verification
//! - [`rate_limit`]: Global token bucket in front of every route

pub mod claims;
pub mod middleware;
pub mod rate_limit;
