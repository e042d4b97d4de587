//! Typing indicators: debounced local signals and expiring remote sets.

use crate::bus::EventBus;
use crate::event::ClientEvent;
use necho_types::{ChatId, UserId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Repeated local starts within this window do not re-signal the server.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(1);

/// Typing without a refresh for this long counts as stopped.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Where local typing signals go.
pub trait TypingSink: Send + Sync {
    /// The local user started (`true`) or stopped (`false`) typing.
    fn typing(&self, chat_id: &str, active: bool);
}

struct LocalTyping {
    last_signal: Instant,
    token: u64,
    expiry: JoinHandle<()>,
}

struct RemoteTyping {
    token: u64,
    expiry: JoinHandle<()>,
}

#[derive(Default)]
struct TypingState {
    local: HashMap<ChatId, LocalTyping>,
    remote: HashMap<ChatId, BTreeMap<UserId, RemoteTyping>>,
}

struct TypingInner {
    sink: Arc<dyn TypingSink>,
    bus: EventBus<ClientEvent>,
    next_token: AtomicU64,
    state: Mutex<TypingState>,
}

/// Per-chat typing state for the local user and for remote users.
///
/// Every timer belongs to the tracker and is cancelled by
/// [`dispose_chat`](Self::dispose_chat) / [`dispose_all`](Self::dispose_all).
#[derive(Clone)]
pub struct TypingTracker {
    inner: Arc<TypingInner>,
}

impl std::fmt::Debug for TypingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TypingTracker")
            .field("local", &state.local.len())
            .field("remote", &state.remote.len())
            .finish()
    }
}

impl TypingTracker {
    /// Create a tracker sending local signals to `sink` and publishing remote
    /// changes on `bus`.
    pub fn new(sink: Arc<dyn TypingSink>, bus: EventBus<ClientEvent>) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                sink,
                bus,
                next_token: AtomicU64::new(0),
                state: Mutex::new(TypingState::default()),
            }),
        }
    }

    fn token(&self) -> u64 {
        self.inner.next_token.fetch_add(1, Ordering::Relaxed)
    }

    // ==================== Local ====================

    /// The local user typed in a chat.
    pub fn start_typing(&self, chat_id: &str) {
        let now = Instant::now();
        let token = self.token();
        let expiry = spawn_after(TYPING_TIMEOUT, Arc::downgrade(&self.inner), {
            let chat_id = chat_id.to_string();
            move |inner| inner.expire_local(&chat_id, token)
        });

        let signal = {
            let mut state = self.inner.state.lock();
            let signal = state
                .local
                .get(chat_id)
                .map_or(true, |s| now.duration_since(s.last_signal) >= TYPING_DEBOUNCE);
            let last_signal = match state.local.get(chat_id) {
                Some(s) if !signal => s.last_signal,
                _ => now,
            };
            if let Some(old) = state.local.insert(
                chat_id.to_string(),
                LocalTyping {
                    last_signal,
                    token,
                    expiry,
                },
            ) {
                old.expiry.abort();
            }
            signal
        };

        if signal {
            self.inner.sink.typing(chat_id, true);
        }
    }

    /// The local user stopped typing (sent the message, cleared the input).
    pub fn stop_typing(&self, chat_id: &str) {
        let removed = self.inner.state.lock().local.remove(chat_id);
        if let Some(local) = removed {
            local.expiry.abort();
            self.inner.sink.typing(chat_id, false);
        }
    }

    /// Whether the local user is currently flagged as typing.
    pub fn is_typing(&self, chat_id: &str) -> bool {
        self.inner.state.lock().local.contains_key(chat_id)
    }

    // ==================== Remote ====================

    /// A remote user started typing.
    pub fn on_remote_start(&self, chat_id: &str, user_id: &str, username: &str) {
        let token = self.token();
        let expiry = spawn_after(TYPING_TIMEOUT, Arc::downgrade(&self.inner), {
            let chat_id = chat_id.to_string();
            let user_id = user_id.to_string();
            move |inner| inner.expire_remote(&chat_id, &user_id, token)
        });

        let added = {
            let mut state = self.inner.state.lock();
            let users = state.remote.entry(chat_id.to_string()).or_default();
            match users.insert(user_id.to_string(), RemoteTyping { token, expiry }) {
                Some(old) => {
                    old.expiry.abort();
                    false
                }
                None => true,
            }
        };

        if added {
            self.inner.bus.emit(&ClientEvent::TypingStart {
                chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
                username: username.to_string(),
            });
        }
    }

    /// A remote user stopped typing.
    pub fn on_remote_stop(&self, chat_id: &str, user_id: &str) {
        self.inner.remove_remote(chat_id, user_id, None);
    }

    /// Users currently typing in a chat, sorted.
    pub fn typing_users(&self, chat_id: &str) -> Vec<UserId> {
        self.inner
            .state
            .lock()
            .remote
            .get(chat_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ==================== Disposal ====================

    /// Cancel every timer for a chat and clear its typing set.
    pub fn dispose_chat(&self, chat_id: &str) {
        let mut state = self.inner.state.lock();
        if let Some(local) = state.local.remove(chat_id) {
            local.expiry.abort();
        }
        if let Some(users) = state.remote.remove(chat_id) {
            for remote in users.into_values() {
                remote.expiry.abort();
            }
        }
    }

    /// Cancel every timer and clear all typing sets.
    pub fn dispose_all(&self) {
        let mut state = self.inner.state.lock();
        for (_, local) in state.local.drain() {
            local.expiry.abort();
        }
        for (_, users) in state.remote.drain() {
            for remote in users.into_values() {
                remote.expiry.abort();
            }
        }
    }
}

impl TypingInner {
    fn expire_local(&self, chat_id: &str, token: u64) {
        let expired = {
            let mut state = self.state.lock();
            match state.local.get(chat_id) {
                Some(local) if local.token == token => state.local.remove(chat_id).is_some(),
                _ => false,
            }
        };
        if expired {
            self.sink.typing(chat_id, false);
        }
    }

    fn expire_remote(&self, chat_id: &str, user_id: &str, token: u64) {
        self.remove_remote(chat_id, user_id, Some(token));
    }

    /// Remove a remote typist; with a token, only if it still matches.
    fn remove_remote(&self, chat_id: &str, user_id: &str, token: Option<u64>) {
        let removed = {
            let mut state = self.state.lock();
            let Some(users) = state.remote.get_mut(chat_id) else {
                return;
            };
            let matches = users
                .get(user_id)
                .is_some_and(|r| token.map_or(true, |t| r.token == t));
            let removed = if matches { users.remove(user_id) } else { None };
            if users.is_empty() {
                state.remote.remove(chat_id);
            }
            removed
        };

        if let Some(remote) = removed {
            if token.is_none() {
                remote.expiry.abort();
            }
            self.bus.emit(&ClientEvent::TypingStop {
                chat_id: chat_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
    }
}

fn spawn_after<F>(delay: Duration, inner: Weak<TypingInner>, action: F) -> JoinHandle<()>
where
    F: FnOnce(&TypingInner) + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = inner.upgrade() {
            action(&inner);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[derive(Default)]
    struct RecordingSink {
        signals: Mutex<Vec<(String, bool)>>,
    }

    impl TypingSink for RecordingSink {
        fn typing(&self, chat_id: &str, active: bool) {
            self.signals.lock().push((chat_id.to_string(), active));
        }
    }

    fn tracker() -> (TypingTracker, Arc<RecordingSink>, EventBus<ClientEvent>) {
        let sink = Arc::new(RecordingSink::default());
        let bus = EventBus::new();
        (TypingTracker::new(sink.clone(), bus.clone()), sink, bus)
    }

    fn signals(sink: &RecordingSink) -> Vec<(String, bool)> {
        sink.signals.lock().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_debounced() {
        let (typing, sink, _) = tracker();

        typing.start_typing("c1");
        tokio::time::sleep(Duration::from_millis(400)).await;
        typing.start_typing("c1");
        tokio::time::sleep(Duration::from_millis(400)).await;
        typing.start_typing("c1");

        assert_eq!(signals(&sink), vec![("c1".to_string(), true)]);

        // Past the debounce window the start is sent again
        tokio::time::sleep(Duration::from_millis(300)).await;
        typing.start_typing("c1");
        assert_eq!(signals(&sink).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_after_inactivity() {
        let (typing, sink, _) = tracker();

        typing.start_typing("c1");
        tokio::time::sleep(Duration::from_millis(2500)).await;
        typing.start_typing("c1");
        // The refresh pushed the deadline out
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(typing.is_typing("c1"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!typing.is_typing("c1"));
        assert_eq!(
            signals(&sink),
            vec![
                ("c1".to_string(), true),
                ("c1".to_string(), true),
                ("c1".to_string(), false)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop() {
        let (typing, sink, _) = tracker();

        typing.start_typing("c1");
        typing.stop_typing("c1");
        typing.stop_typing("c1");
        tokio::time::sleep(TYPING_TIMEOUT * 2).await;

        assert_eq!(
            signals(&sink),
            vec![("c1".to_string(), true), ("c1".to_string(), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_typing_expires() {
        let (typing, _, bus) = tracker();
        let stops = Arc::new(Mutex::new(Vec::new()));
        let s = stops.clone();
        bus.on(EventKind::TypingStop, move |e| s.lock().push(e.clone()));

        typing.on_remote_start("c1", "bob", "bob");
        typing.on_remote_start("c1", "carol", "carol");
        assert_eq!(typing.typing_users("c1"), vec!["bob", "carol"]);

        typing.on_remote_stop("c1", "carol");
        assert_eq!(typing.typing_users("c1"), vec!["bob"]);

        tokio::time::sleep(TYPING_TIMEOUT + Duration::from_millis(10)).await;
        assert!(typing.typing_users("c1").is_empty());
        assert_eq!(stops.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_refresh_extends() {
        let (typing, _, bus) = tracker();
        let starts = Arc::new(Mutex::new(0));
        let s = starts.clone();
        bus.on(EventKind::TypingStart, move |_| *s.lock() += 1);

        typing.on_remote_start("c1", "bob", "bob");
        tokio::time::sleep(Duration::from_secs(2)).await;
        typing.on_remote_start("c1", "bob", "bob");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(typing.typing_users("c1"), vec!["bob"]);
        assert_eq!(*starts.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_timers() {
        let (typing, sink, bus) = tracker();
        let stops = Arc::new(Mutex::new(0));
        let s = stops.clone();
        bus.on(EventKind::TypingStop, move |_| *s.lock() += 1);

        typing.start_typing("c1");
        typing.start_typing("c2");
        typing.on_remote_start("c1", "bob", "bob");

        typing.dispose_chat("c1");
        assert!(!typing.is_typing("c1"));
        assert!(typing.typing_users("c1").is_empty());
        assert!(typing.is_typing("c2"));

        typing.dispose_all();
        tokio::time::sleep(TYPING_TIMEOUT * 2).await;

        // Only the two start signals; no expiry fired after disposal
        assert_eq!(signals(&sink).len(), 2);
        assert_eq!(*stops.lock(), 0);
    }
}
