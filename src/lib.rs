//! # livechat
//!
//! Client for a minimal multi-user chat backed by a hosted Postgres service
//! with a realtime change feed.
//!
//! ARCHITECTURE
//! ============
//! - `identity` derives the display name for one client session.
//! - `adapter` hides the remote table behind four operations (snapshot,
//!   subscribe, insert, clear) so nothing else touches transport details.
//! - `session` owns the chat state and its transition rules.
//! - `view` renders that state as plain text and holds composer rules.
//!
//! The terminal front end in `main.rs` wires these together.

pub mod adapter;
pub mod config;
pub mod identity;
pub mod session;
pub mod types;
pub mod view;
