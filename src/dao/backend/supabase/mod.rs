//! Supabase-compatible HTTP backend: GoTrue auth, PostgREST tables, Storage
//! objects and the Realtime websocket channel.

mod auth;
mod client;
mod config;
mod error;
mod realtime;
mod rest;
mod storage;

pub use client::SupabaseClient;
pub use config::SupabaseConfig;
pub use error::{SupabaseError, SupabaseResult};
