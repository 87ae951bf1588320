//! # Middleware Module
//!
//! - `auth`: lets a request through only if its session is logged in
//! - `session_lock`: serializes requests that carry the same session cookie

pub mod auth;
pub mod session_lock;
