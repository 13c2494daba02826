//! WebSocket support for real-time sync.
//!
//! Clients of a group connect via WebSocket, load the group's content, push
//! their changes and receive the changes other members push.

mod manager;

pub use manager::ConnectionManager;
