//! Chat session state machine.
//!
//! DESIGN
//! ======
//! Transitions live on [`Machine`], a plain struct with no I/O, so every rule
//! is unit-testable on its own. [`ChatSession`] drives it: it runs the
//! snapshot fetch and the change-feed subscription concurrently on tokio
//! tasks, forwards user intents (send, clear) to the adapter, and publishes
//! every new [`SessionState`] on a `watch` channel for the view.
//!
//! LIFECYCLE
//! =========
//! `connecting -> ready`, `connecting -> error`, `ready -> error`. Error is
//! terminal for the session; a new session is the only way back.
//!
//! After [`ChatSession::teardown`] no state mutation happens. The liveness
//! flag is checked under the machine lock, so a late snapshot or change
//! event is dropped even if its task was already past the await point.
//!
//! Inserts that arrive before the snapshot are buffered and merged into it,
//! de-duplicated by id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{ChangeEvent, ChatAdapter, RemoteError, Subscription};
use crate::config::ConfigError;
use crate::types::{ChatMessage, ChatStatus, SessionState};

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Pure transition rules over [`SessionState`].
#[derive(Debug, Clone)]
pub(crate) struct Machine {
    state: SessionState,
    limit: usize,
    /// Set once the snapshot has been applied.
    loaded: bool,
    /// Inserts received before the snapshot.
    buffered: Vec<ChatMessage>,
}

impl Machine {
    pub(crate) fn new(limit: usize) -> Self {
        Self { state: SessionState::connecting(), limit, loaded: false, buffered: Vec::new() }
    }

    pub(crate) fn failed(message: impl Into<String>) -> Self {
        Self { state: SessionState::failed(message), limit: 0, loaded: false, buffered: Vec::new() }
    }

    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }

    pub(crate) fn snapshot_loaded(&mut self, rows: Vec<ChatMessage>) {
        let mut messages = rows;
        messages.truncate(self.limit);
        for msg in std::mem::take(&mut self.buffered) {
            if !messages.iter().any(|m| m.id == msg.id) {
                messages.push(msg);
            }
        }
        self.state.messages = messages;
        self.loaded = true;
        if self.state.status == ChatStatus::Connecting {
            self.state.status = ChatStatus::Ready;
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.state.status = ChatStatus::Error;
        self.state.error = Some(message.into());
    }

    pub(crate) fn apply(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Insert(msg) => self.insert(msg),
            ChangeEvent::Delete => self.clear(),
        }
    }

    fn insert(&mut self, msg: ChatMessage) {
        let target = if self.loaded { &mut self.state.messages } else { &mut self.buffered };
        if !target.iter().any(|m| m.id == msg.id) {
            target.push(msg);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.state.messages.clear();
        self.buffered.clear();
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Result of a user intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ignored locally; no remote call was made.
    Skipped,
    Done,
    /// The remote call failed and the session is now in error.
    Failed,
}

struct Shared {
    machine: Mutex<Machine>,
    alive: AtomicBool,
    publish: watch::Sender<SessionState>,
    subscription: Mutex<Option<Subscription>>,
}

impl Shared {
    fn new(machine: Machine) -> Self {
        let (publish, _) = watch::channel(machine.state().clone());
        Self {
            machine: Mutex::new(machine),
            alive: AtomicBool::new(true),
            publish,
            subscription: Mutex::new(None),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Run `f` against the machine unless the session is torn down.
    fn update(&self, f: impl FnOnce(&mut Machine)) -> bool {
        let mut machine = lock(&self.machine);
        if !self.is_alive() {
            return false;
        }
        f(&mut machine);
        self.publish.send_replace(machine.state().clone());
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One open chat view, from initial load to teardown.
pub struct ChatSession {
    shared: Arc<Shared>,
    adapter: Option<Arc<dyn ChatAdapter>>,
    identity: String,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatSession {
    /// Start a session: fetch the snapshot and subscribe concurrently.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(adapter: Arc<dyn ChatAdapter>, identity: impl Into<String>, limit: usize) -> Self {
        let shared = Arc::new(Shared::new(Machine::new(limit)));
        let snapshot = tokio::spawn(load_snapshot(Arc::clone(&shared), Arc::clone(&adapter), limit));
        let feed = tokio::spawn(follow_changes(Arc::clone(&shared), Arc::clone(&adapter)));

        Self { shared, adapter: Some(adapter), identity: identity.into(), tasks: Mutex::new(vec![snapshot, feed]) }
    }

    /// A session whose backend is not configured. It starts, and stays, in
    /// the error state and never makes a remote call.
    pub fn unavailable(identity: impl Into<String>, error: &ConfigError) -> Self {
        Self {
            shared: Arc::new(Shared::new(Machine::failed(error.to_string()))),
            adapter: None,
            identity: identity.into(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.publish.borrow().clone()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.shared.publish.subscribe()
    }

    /// Send `text` as this session's identity.
    ///
    /// Skipped when the trimmed text is empty, the identity is empty, or the
    /// session is not ready. The message list is not touched on success; the
    /// row shows up when the change feed delivers it.
    pub async fn send(&self, text: &str) -> Outcome {
        let text = text.trim();
        if text.is_empty() || self.identity.is_empty() || !self.shared.is_alive() {
            return Outcome::Skipped;
        }
        if self.shared.publish.borrow().status != ChatStatus::Ready {
            return Outcome::Skipped;
        }
        let Some(adapter) = &self.adapter else {
            return Outcome::Skipped;
        };

        match adapter.send_message(&self.identity, text).await {
            Ok(()) => Outcome::Done,
            Err(error) => {
                warn!(%error, user = %self.identity, "send failed");
                self.fail(&error);
                Outcome::Failed
            }
        }
    }

    /// Delete every message. On success the local list is emptied at once,
    /// independent of any delete notification that follows.
    pub async fn clear(&self) -> Outcome {
        if !self.shared.is_alive() {
            return Outcome::Skipped;
        }
        let Some(adapter) = &self.adapter else {
            return Outcome::Skipped;
        };

        match adapter.clear_all().await {
            Ok(()) => {
                info!("messages cleared");
                self.shared.update(Machine::clear);
                Outcome::Done
            }
            Err(error) => {
                warn!(%error, "clear failed");
                self.fail(&error);
                Outcome::Failed
            }
        }
    }

    /// Release the subscription and stop all background work. Idempotent.
    pub fn teardown(&self) {
        {
            let _machine = lock(&self.shared.machine);
            if !self.shared.alive.swap(false, Ordering::SeqCst) {
                return;
            }
        }

        if let Some(subscription) = lock(&self.shared.subscription).take() {
            subscription.dispose();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        debug!(user = %self.identity, "chat session torn down");
    }

    fn fail(&self, error: &RemoteError) {
        let message = error.to_string();
        self.shared.update(|m| m.fail(message));
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn load_snapshot(shared: Arc<Shared>, adapter: Arc<dyn ChatAdapter>, limit: usize) {
    match adapter.fetch_snapshot(limit).await {
        Ok(rows) => {
            let count = rows.len();
            if shared.update(|m| m.snapshot_loaded(rows)) {
                info!(count, "chat snapshot loaded");
            }
        }
        Err(error) => {
            warn!(%error, "chat snapshot failed");
            let message = error.to_string();
            shared.update(|m| m.fail(message));
        }
    }
}

async fn follow_changes(shared: Arc<Shared>, adapter: Arc<dyn ChatAdapter>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = match adapter.subscribe(tx).await {
        Ok(subscription) => subscription,
        Err(error) => {
            warn!(%error, "chat subscription failed");
            let message = error.to_string();
            shared.update(|m| m.fail(message));
            return;
        }
    };

    {
        let mut slot = lock(&shared.subscription);
        if !shared.is_alive() {
            drop(slot);
            subscription.dispose();
            return;
        }
        *slot = Some(subscription);
    }

    while let Some(event) = rx.recv().await {
        debug!(?event, "chat change received");
        if !shared.update(|m| m.apply(event)) {
            break;
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
