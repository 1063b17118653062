//! Library crate for pirate-games-finder: the session, catalog, detail and
//! notification controllers over a pluggable backend, exposed for the binary
//! and integration tests.

pub mod config;
/// Entities, backend contracts and the repositories over them.
pub mod dao;
pub mod dto;
/// Errors surfaced by controllers and the auth flows.
pub mod error;
/// Controllers driving the session, catalog, detail page and notifications.
pub mod services;
pub mod state;
