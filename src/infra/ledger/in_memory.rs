// In-memory implementation of ViolationLedger.
//
// This is the reference store: chats and users are opaque strings, state
// lives in DashMaps and disappears on restart. Deployments that want counts
// to survive restarts use the SQLite store behind the same trait.

use crate::core::ledger::{LedgerError, ViolationLedger, ViolationRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A composite key for looking up escalation state.
/// We need both chat_id AND user_id since users appear in multiple chats.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct ChatUserKey {
    chat_id: String,
    user_id: String,
}

impl ChatUserKey {
    fn new(chat_id: &str, user_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

/// In-memory ViolationLedger.
///
/// DashMap's entry API serializes mutations per key: the closure runs while
/// holding that key's shard lock, so concurrent increments for the same
/// (chat, user) can't read the same count while unrelated keys proceed in
/// parallel.
pub struct InMemoryLedger {
    /// Maps (chat_id, user_id) -> escalation record
    records: DashMap<ChatUserKey, ViolationRecord>,
    /// Maps (chat_id, user_id) -> recent message timestamps (flood window)
    windows: DashMap<ChatUserKey, Vec<DateTime<Utc>>>,
}

impl InMemoryLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            windows: DashMap::new(),
        }
    }
}

/// Drop timestamps that have left the flood window. The cutoff is inclusive:
/// a message aged exactly `window_seconds` still counts toward the next one.
fn prune_window(window: &mut Vec<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    window.retain(|t| *t >= cutoff);
}

#[async_trait]
impl ViolationLedger for InMemoryLedger {
    async fn record_violation(&self, chat_id: &str, user_id: &str) -> Result<u32, LedgerError> {
        let mut entry = self
            .records
            .entry(ChatUserKey::new(chat_id, user_id))
            .or_default();
        entry.count = entry.count.saturating_add(1);
        Ok(entry.count)
    }

    async fn get_record(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<ViolationRecord, LedgerError> {
        Ok(self
            .records
            .get(&ChatUserKey::new(chat_id, user_id))
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn set_muted(
        &self,
        chat_id: &str,
        user_id: &str,
        duration_seconds: u64,
    ) -> Result<(), LedgerError> {
        let until = Utc::now() + Duration::seconds(duration_seconds as i64);
        self.records
            .entry(ChatUserKey::new(chat_id, user_id))
            .or_default()
            .muted_until = Some(until);
        Ok(())
    }

    async fn is_muted(&self, chat_id: &str, user_id: &str) -> Result<bool, LedgerError> {
        // Lazy expiry: compare only, the stale timestamp stays in the record.
        Ok(self
            .records
            .get(&ChatUserKey::new(chat_id, user_id))
            .and_then(|entry| entry.muted_until)
            .map(|until| Utc::now() < until)
            .unwrap_or(false))
    }

    async fn set_banned(
        &self,
        chat_id: &str,
        user_id: &str,
        banned: bool,
    ) -> Result<(), LedgerError> {
        self.records
            .entry(ChatUserKey::new(chat_id, user_id))
            .or_default()
            .banned = banned;
        Ok(())
    }

    async fn reset(&self, chat_id: &str, user_id: &str) -> Result<(), LedgerError> {
        let key = ChatUserKey::new(chat_id, user_id);
        self.records.remove(&key);
        self.windows.remove(&key);
        Ok(())
    }

    async fn register_message(
        &self,
        chat_id: &str,
        user_id: &str,
        window_seconds: u64,
    ) -> Result<u32, LedgerError> {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(window_seconds as i64);

        let mut entry = self
            .windows
            .entry(ChatUserKey::new(chat_id, user_id))
            .or_default();
        prune_window(&mut entry, cutoff);
        entry.push(now);
        Ok(entry.len() as u32)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}
