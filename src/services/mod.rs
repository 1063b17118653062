/// Image carousel state and its timer-driven task.
pub mod carousel;
/// Admin CRUD over the game list with optimistic edits.
pub mod catalog_service;
/// Comment thread of a game's detail page.
pub mod comment_service;
/// Detail page controller combining carousel, comments and rating.
pub mod detail_service;
/// Object-store path sanitising and uploads.
pub mod media;
/// Per-user notification feed.
pub mod notification_service;
/// Star rating and review panel.
pub mod review_service;
/// Session/profile coordinator.
pub mod session_service;
