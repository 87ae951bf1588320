//! # HTTP Request Handlers
//!
//! ## Submodules
//! - `health`: liveness endpoint
//! - `auth`: ceremony endpoints plus session and logout
//! - `users`: the logged-in user's profile and authenticators
//!
//! Handlers only translate HTTP into coordinator calls: they extract the
//! body and session, take the per-session lock, call the coordinator and
//! shape the JSON response. Errors convert to responses through `AppError`.

pub mod auth;
pub mod health;
pub mod users;
