//! Data-access adapter for the chat table.
//!
//! DESIGN
//! ======
//! Every remote call the session needs goes through [`ChatAdapter`]:
//! snapshot fetch, change-feed subscription, insert, and clear-all. The
//! session receives an adapter instance at construction, so tests swap in
//! a fake and nothing else ever sees HTTP or websocket types.
//!
//! Change notifications are pushed into a [`ChangeSender`] supplied by the
//! caller. Delivery order matches the remote stream; there is no ordering
//! relative to an in-flight snapshot.

pub mod realtime;
pub mod rest;
pub mod supabase;

use tokio::sync::{mpsc, oneshot};

use crate::types::ChatMessage;

pub use supabase::SupabaseAdapter;

// =============================================================================
// ERROR
// =============================================================================

/// A failed remote operation. `Display` is the backend's message verbatim
/// where one exists, because it is shown to the user as-is.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The HTTP request could not be completed.
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The realtime websocket failed.
    #[error("{0}")]
    Socket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The service could not be reached or did not answer in time.
    #[error("{0}")]
    Unavailable(String),
}

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Row-level change delivered by the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(ChatMessage),
    /// Some row was removed. Which one is not tracked.
    Delete,
}

pub type ChangeSender = mpsc::UnboundedSender<ChangeEvent>;

/// Handle for a live change-feed subscription.
///
/// Dropping or disposing signals the feed to stop; it forwards nothing
/// once it has seen the signal. Events already sitting in the consumer's
/// channel are not recalled, so consumers that must ignore late events
/// check their own liveness.
#[derive(Debug)]
pub struct Subscription {
    shutdown: Option<oneshot::Sender<()>>,
}

impl Subscription {
    #[must_use]
    pub fn new(shutdown: oneshot::Sender<()>) -> Self {
        Self { shutdown: Some(shutdown) }
    }

    /// Release the subscription.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

#[async_trait::async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Rows ordered by `created_at` ascending, at most `limit` of them.
    async fn fetch_snapshot(&self, limit: usize) -> Result<Vec<ChatMessage>, RemoteError>;

    /// Start delivering insert/delete notifications into `events`.
    async fn subscribe(&self, events: ChangeSender) -> Result<Subscription, RemoteError>;

    /// Insert one row. `id` and (optionally) `created_at` are server-assigned.
    async fn send_message(&self, user: &str, text: &str) -> Result<(), RemoteError>;

    /// Delete every row in the table.
    async fn clear_all(&self) -> Result<(), RemoteError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
