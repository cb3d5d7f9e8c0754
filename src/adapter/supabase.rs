//! Concrete [`ChatAdapter`] for a hosted Supabase project.

use chrono::{SecondsFormat, Utc};

use super::realtime::RealtimeChannel;
use super::rest::RestClient;
use super::{ChangeSender, ChatAdapter, RemoteError, Subscription};
use crate::config::{ChatConfig, ConfigError};
use crate::types::{ChatMessage, NewMessage};

/// REST table access plus the realtime change feed for one table.
///
/// Construct once per session and hand it to the session as an
/// `Arc<dyn ChatAdapter>`.
#[derive(Debug, Clone)]
pub struct SupabaseAdapter {
    rest: RestClient,
    realtime: RealtimeChannel,
}

impl SupabaseAdapter {
    /// # Errors
    ///
    /// Returns an error if the URL or key cannot be used to build clients.
    pub fn new(config: &ChatConfig) -> Result<Self, ConfigError> {
        Ok(Self { rest: RestClient::new(config)?, realtime: RealtimeChannel::new(config)? })
    }
}

#[async_trait::async_trait]
impl ChatAdapter for SupabaseAdapter {
    async fn fetch_snapshot(&self, limit: usize) -> Result<Vec<ChatMessage>, RemoteError> {
        self.rest.select_ordered(limit).await
    }

    async fn subscribe(&self, events: ChangeSender) -> Result<Subscription, RemoteError> {
        self.realtime.subscribe(events).await
    }

    async fn send_message(&self, user: &str, text: &str) -> Result<(), RemoteError> {
        let row = NewMessage {
            user: user.to_owned(),
            text: text.to_owned(),
            created_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        };
        self.rest.insert(&row).await
    }

    async fn clear_all(&self) -> Result<(), RemoteError> {
        self.rest.delete_all().await
    }
}
