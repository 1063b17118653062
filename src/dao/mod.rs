/// Remote backend contracts and their implementations.
pub mod backend;
/// Comment table access.
pub mod comment;
/// Game table access.
pub mod game;
/// Database model definitions.
pub mod models;
/// Notification table access.
pub mod notification;
/// Profile table access.
pub mod profile;
/// Review table access.
pub mod review;
/// Row (de)serialisation helpers shared by the repositories.
mod rows;
/// Storage and auth error types.
pub mod storage;
