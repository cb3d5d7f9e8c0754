//! Presentation logic for the chat view.
//!
//! SYSTEM CONTEXT
//! ==============
//! Everything here is a pure function of [`SessionState`] plus local UI
//! state (the composer draft and its sending flag). Nothing in this module
//! talks to the adapter; user intent goes back through the session.

use chrono::{DateTime, Local, NaiveDateTime};

use crate::session::Outcome;
use crate::types::{ChatMessage, ChatStatus, MessageId, SessionState};

pub const TITLE: &str = "Live Chat Demo";
pub const STATUS_ONLINE: &str = "Online";
pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_OFFLINE: &str = "Offline";
pub const CONNECTING_NOTICE: &str = "Connecting to Supabase...";
pub const EMPTY_NOTICE: &str = "No messages — send the first one!";
pub const DEFAULT_ERROR_MESSAGE: &str = "Failed to connect to Supabase. Check .env.local and messages table.";
pub const PLACEHOLDER_READY: &str = "Type a message...";
pub const PLACEHOLDER_WAITING: &str = "Waiting for Supabase connection...";
pub const OWN_AUTHOR: &str = "You";
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

// =============================================================================
// HEADER / BANNER
// =============================================================================

#[must_use]
pub fn status_label(status: ChatStatus) -> &'static str {
    match status {
        ChatStatus::Ready => STATUS_ONLINE,
        ChatStatus::Connecting => STATUS_CONNECTING,
        ChatStatus::Error => STATUS_OFFLINE,
    }
}

/// Clear-all is only offered while online.
#[must_use]
pub fn show_clear(status: ChatStatus) -> bool {
    status == ChatStatus::Ready
}

/// Error banner text; `None` unless the session is in error.
#[must_use]
pub fn error_banner(state: &SessionState) -> Option<&str> {
    if state.status != ChatStatus::Error {
        return None;
    }
    Some(
        state
            .error
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_ERROR_MESSAGE),
    )
}

/// Placeholder line shown in place of the message list, if any.
#[must_use]
pub fn list_notice(state: &SessionState) -> Option<&'static str> {
    match state.status {
        ChatStatus::Connecting => Some(CONNECTING_NOTICE),
        ChatStatus::Ready if state.messages.is_empty() => Some(EMPTY_NOTICE),
        _ => None,
    }
}

#[must_use]
pub fn input_placeholder(status: ChatStatus) -> &'static str {
    if status == ChatStatus::Ready { PLACEHOLDER_READY } else { PLACEHOLDER_WAITING }
}

#[must_use]
pub fn header_line(state: &SessionState, identity: &str) -> String {
    let label = status_label(state.status);
    if state.status == ChatStatus::Ready {
        format!("{TITLE} · {label} · You: {identity}")
    } else {
        format!("{TITLE} · {label}")
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[must_use]
pub fn is_own(message: &ChatMessage, identity: &str) -> bool {
    message.user.as_deref() == Some(identity)
}

/// One rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble<'a> {
    pub author: &'a str,
    pub text: &'a str,
    pub time: String,
    pub own: bool,
}

#[must_use]
pub fn bubble<'a>(message: &'a ChatMessage, identity: &str) -> Bubble<'a> {
    let own = is_own(message, identity);
    let author = if own {
        OWN_AUTHOR
    } else {
        message.user.as_deref().filter(|u| !u.is_empty()).unwrap_or(ANONYMOUS_AUTHOR)
    };
    Bubble { author, text: message.text.as_deref().unwrap_or_default(), time: format_time(message.created_at.as_deref()), own }
}

impl Bubble<'_> {
    /// Single terminal line; own messages are right-marked with `>`.
    #[must_use]
    pub fn line(&self) -> String {
        let marker = if self.own { ">" } else { " " };
        let text = self.text.replace('\n', "\n      ");
        if self.time.is_empty() {
            format!("{marker} {}: {text}", self.author)
        } else {
            format!("{marker} [{}] {}: {text}", self.time, self.author)
        }
    }
}

/// `HH:MM` in local time. Empty for absent or unparseable input.
///
/// Timestamps without an offset are taken as already local.
#[must_use]
pub fn format_time(value: Option<&str>) -> String {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return String::new();
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Local).format("%H:%M").to_string();
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, pattern) {
            return ts.format("%H:%M").to_string();
        }
    }
    String::new()
}

// =============================================================================
// COMPOSER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Send,
    NewLine,
    /// Not handled by the composer.
    Passthrough,
}

/// Enter sends; Shift+Enter inserts a line break.
#[must_use]
pub fn key_action(key: &str, shift: bool) -> KeyAction {
    match (key, shift) {
        ("Enter", false) => KeyAction::Send,
        ("Enter", true) => KeyAction::NewLine,
        _ => KeyAction::Passthrough,
    }
}

/// Draft text and the in-flight flag that blocks re-entrant sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub draft: String,
    pub sending: bool,
}

impl Composer {
    #[must_use]
    pub fn can_send(&self, status: ChatStatus) -> bool {
        status == ChatStatus::Ready && !self.sending && !self.draft.trim().is_empty()
    }

    pub fn push_line(&mut self, line: &str) {
        if !self.draft.is_empty() {
            self.draft.push('\n');
        }
        self.draft.push_str(line);
    }

    /// Mark a send in flight and return the trimmed draft, if sending is allowed.
    pub fn begin_send(&mut self, status: ChatStatus) -> Option<String> {
        if !self.can_send(status) {
            return None;
        }
        self.sending = true;
        Some(self.draft.trim().to_owned())
    }

    /// The draft is kept when the send failed.
    pub fn finish_send(&mut self, outcome: Outcome) {
        self.sending = false;
        if outcome == Outcome::Done {
            self.draft.clear();
        }
    }

    #[must_use]
    pub fn button_label(&self) -> &'static str {
        if self.sending { "..." } else { "Send" }
    }
}

// =============================================================================
// TRANSCRIPT
// =============================================================================

/// Incremental terminal renderer: turns successive states into the lines
/// that are new since the previous state.
///
/// States may be skipped between calls, so a clear is detected by the last
/// printed message no longer being at its position, not by the count alone.
#[derive(Debug, Default)]
pub struct Transcript {
    status: Option<ChatStatus>,
    shown: usize,
    /// Id of the last printed message.
    last: Option<MessageId>,
    notice: Option<&'static str>,
}

impl Transcript {
    pub fn render(&mut self, state: &SessionState, identity: &str) -> Vec<String> {
        let mut lines = Vec::new();

        if self.status != Some(state.status) {
            self.status = Some(state.status);
            lines.push(format!("== {} ==", header_line(state, identity)));
            if let Some(banner) = error_banner(state) {
                lines.push(format!("!! {banner}"));
            }
            if show_clear(state.status) {
                lines.push("   (/clear to delete all messages, /quit to leave)".to_owned());
            }
        }

        if self.shown > 0 && state.messages.get(self.shown - 1).map(|m| &m.id) != self.last.as_ref() {
            lines.push("-- messages cleared --".to_owned());
            self.shown = 0;
        }

        let notice = list_notice(state);
        if notice != self.notice {
            if let Some(text) = notice {
                lines.push(format!("   {text}"));
            }
            self.notice = notice;
        }

        for message in &state.messages[self.shown..] {
            lines.push(bubble(message, identity).line());
        }
        self.shown = state.messages.len();
        self.last = state.messages.last().map(|m| m.id.clone());

        lines
    }
}

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;
