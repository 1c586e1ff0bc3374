use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

use pawlink_models::typing::TypingUser;

/// How long a typing indicator survives without a fresh `start`.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(5000);

/// Invoked with `(chat_id, user_id)` when a record is evicted by the expiry
/// timer or by a disconnect sweep — the hook broadcasts the
/// `user_stopped_typing` event. An explicit `stop` does not fire it; the
/// dispatcher answers that path itself.
pub type ExpiryHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct TypingEntry {
    user: TypingUser,
    timer: AbortHandle,
    // Guards against a timer that fired while a fresh `start` was replacing
    // this entry: the expiry only lands if the generation still matches.
    generation: u64,
}

struct TypingInner {
    // chat id -> user id -> entry
    chats: DashMap<String, HashMap<String, TypingEntry>>,
    on_expire: ExpiryHook,
}

/// Transient per-conversation typing state with one cancellable expiry
/// timer per (chat, user) key. Repeated `start` calls reset the window
/// instead of stacking timers.
pub struct TypingIndicators {
    inner: Arc<TypingInner>,
    generations: std::sync::atomic::AtomicU64,
}

impl TypingIndicators {
    pub fn new(on_expire: ExpiryHook) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                chats: DashMap::new(),
                on_expire,
            }),
            generations: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Upsert the record and (re)schedule its expiry.
    pub fn start(&self, chat_id: &str, user_id: &str, first_name: &str, last_name: &str) {
        let generation = self
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let timer_chat = chat_id.to_string();
        let timer_user = user_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            expire(&inner, &timer_chat, &timer_user, generation);
        })
        .abort_handle();

        let entry = TypingEntry {
            user: TypingUser {
                user_id: user_id.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                timestamp: Utc::now(),
            },
            timer,
            generation,
        };

        let mut chat = self.inner.chats.entry(chat_id.to_string()).or_default();
        if let Some(previous) = chat.insert(user_id.to_string(), entry) {
            previous.timer.abort();
        }
    }

    /// Explicit stop: remove the record and cancel its timer. No expiry
    /// callback fires.
    pub fn stop(&self, chat_id: &str, user_id: &str) {
        let Some(mut chat) = self.inner.chats.get_mut(chat_id) else {
            return;
        };
        if let Some(entry) = chat.remove(user_id) {
            entry.timer.abort();
        }
        let emptied = chat.is_empty();
        drop(chat);
        if emptied {
            self.inner
                .chats
                .remove_if(chat_id, |_, users| users.is_empty());
        }
    }

    pub fn active_typers(&self, chat_id: &str) -> Vec<TypingUser> {
        self.inner
            .chats
            .get(chat_id)
            .map(|chat| chat.values().map(|entry| entry.user.clone()).collect())
            .unwrap_or_default()
    }

    /// Disconnect sweep: drop every record this user owns, firing the
    /// expiry hook once per affected conversation.
    pub fn clear_all_for(&self, user_id: &str) {
        let mut affected = Vec::new();
        for mut chat in self.inner.chats.iter_mut() {
            if let Some(entry) = chat.remove(user_id) {
                entry.timer.abort();
                affected.push(chat.key().clone());
            }
        }
        for chat_id in &affected {
            self.inner
                .chats
                .remove_if(chat_id, |_, users| users.is_empty());
            (self.inner.on_expire)(chat_id, user_id);
        }
    }
}

fn expire(inner: &TypingInner, chat_id: &str, user_id: &str, generation: u64) {
    {
        let Some(mut chat) = inner.chats.get_mut(chat_id) else {
            return;
        };
        let current = chat
            .get(user_id)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            // A newer `start` replaced this record; its own timer owns it.
            return;
        }
        chat.remove(user_id);
    }
    inner.chats.remove_if(chat_id, |_, users| users.is_empty());
    (inner.on_expire)(chat_id, user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (TypingIndicators, Arc<Mutex<Vec<(String, String)>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let typing = TypingIndicators::new(Arc::new(move |chat_id, user_id| {
            sink.lock()
                .unwrap()
                .push((chat_id.to_string(), user_id.to_string()));
        }));
        (typing, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_window_and_fires_hook_once() {
        let (typing, fired) = recording();
        typing.start("c1", "u1", "Ada", "L");
        assert_eq!(typing.active_typers("c1").len(), 1);

        tokio::time::sleep(TYPING_EXPIRY + Duration::from_millis(50)).await;

        assert!(typing.active_typers("c1").is_empty());
        assert_eq!(
            fired.lock().unwrap().as_slice(),
            &[("c1".to_string(), "u1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resets_the_window_instead_of_stacking_timers() {
        let (typing, fired) = recording();
        typing.start("c1", "u1", "Ada", "L");

        tokio::time::sleep(Duration::from_millis(3000)).await;
        typing.start("c1", "u1", "Ada", "L");

        // 3s + 3s: past the first timer's deadline, within the second's.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(typing.active_typers("c1").len(), 1);
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(TYPING_EXPIRY).await;
        assert!(typing.active_typers("c1").is_empty());
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_the_timer_silently() {
        let (typing, fired) = recording();
        typing.start("c1", "u1", "Ada", "L");
        typing.stop("c1", "u1");

        tokio::time::sleep(TYPING_EXPIRY * 2).await;

        assert!(typing.active_typers("c1").is_empty());
        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_for_sweeps_every_conversation() {
        let (typing, fired) = recording();
        typing.start("c1", "u1", "Ada", "L");
        typing.start("c2", "u1", "Ada", "L");
        typing.start("c1", "u2", "Brendan", "E");

        typing.clear_all_for("u1");

        assert_eq!(typing.active_typers("c1").len(), 1);
        assert!(typing.active_typers("c2").is_empty());
        let mut hooks = fired.lock().unwrap().clone();
        hooks.sort();
        assert_eq!(
            hooks,
            vec![
                ("c1".to_string(), "u1".to_string()),
                ("c2".to_string(), "u1".to_string())
            ]
        );

        // Aborted timers must not fire a second hook later.
        tokio::time::sleep(TYPING_EXPIRY * 2).await;
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_a_noop_for_unknown_keys() {
        let (typing, fired) = recording();
        typing.stop("c1", "u1");
        assert!(typing.active_typers("c1").is_empty());
        assert!(fired.lock().unwrap().is_empty());
    }
}
