// Violation ledger - escalation state shared by all moderation checks.
//
// Tracks, per (chat, user):
// - How many violations the user has accumulated
// - Whether they are muted and until when
// - Whether they are banned
// - A sliding window of recent message timestamps (flood detection)
//
// NO platform dependencies here - just the storage contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    StorageError(String),
}

// ============================================================================
// MODELS
// ============================================================================

/// Escalation state for one user in one chat.
///
/// A user with no history reads as the default record (zero violations,
/// not muted, not banned). Mute expiry is lazy: the timestamp stays in the
/// record after it passes, it simply stops counting as muted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Accumulated violation count (drives threshold escalation).
    pub count: u32,
    /// When the current mute ends, if any.
    pub muted_until: Option<DateTime<Utc>>,
    /// Whether the user is banned in this chat.
    pub banned: bool,
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Trait for persisting escalation state.
///
/// Implementations must serialize operations per (chat, user) key: two
/// concurrent `record_violation` calls for the same key yield two distinct
/// counts, and unrelated keys never block each other.
#[async_trait]
pub trait ViolationLedger: Send + Sync {
    /// Increment the violation count. Returns the new total.
    async fn record_violation(&self, chat_id: &str, user_id: &str) -> Result<u32, LedgerError>;

    /// Get the current record, or the zero-value default if none exists.
    async fn get_record(&self, chat_id: &str, user_id: &str)
        -> Result<ViolationRecord, LedgerError>;

    /// Mute the user for `duration_seconds` from now.
    async fn set_muted(
        &self,
        chat_id: &str,
        user_id: &str,
        duration_seconds: u64,
    ) -> Result<(), LedgerError>;

    /// Whether a mute is currently active (expiry strictly in the future).
    async fn is_muted(&self, chat_id: &str, user_id: &str) -> Result<bool, LedgerError>;

    /// Set or clear the banned flag.
    async fn set_banned(
        &self,
        chat_id: &str,
        user_id: &str,
        banned: bool,
    ) -> Result<(), LedgerError>;

    /// Remove the record and message window entirely (manual pardon).
    async fn reset(&self, chat_id: &str, user_id: &str) -> Result<(), LedgerError>;

    /// Record a message timestamp and return how many messages the user has
    /// sent within the last `window_seconds`, including this one. Older
    /// timestamps are pruned as a side effect.
    async fn register_message(
        &self,
        chat_id: &str,
        user_id: &str,
        window_seconds: u64,
    ) -> Result<u32, LedgerError>;
}

// Blanket implementation for Arc<L>.
// This lets the engine and manual-command paths in a host application share
// one ledger without the engine caring about the wrapper.
#[async_trait]
impl<L: ViolationLedger + ?Sized> ViolationLedger for Arc<L> {
    async fn record_violation(&self, chat_id: &str, user_id: &str) -> Result<u32, LedgerError> {
        (**self).record_violation(chat_id, user_id).await
    }

    async fn get_record(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<ViolationRecord, LedgerError> {
        (**self).get_record(chat_id, user_id).await
    }

    async fn set_muted(
        &self,
        chat_id: &str,
        user_id: &str,
        duration_seconds: u64,
    ) -> Result<(), LedgerError> {
        (**self).set_muted(chat_id, user_id, duration_seconds).await
    }

    async fn is_muted(&self, chat_id: &str, user_id: &str) -> Result<bool, LedgerError> {
        (**self).is_muted(chat_id, user_id).await
    }

    async fn set_banned(
        &self,
        chat_id: &str,
        user_id: &str,
        banned: bool,
    ) -> Result<(), LedgerError> {
        (**self).set_banned(chat_id, user_id, banned).await
    }

    async fn reset(&self, chat_id: &str, user_id: &str) -> Result<(), LedgerError> {
        (**self).reset(chat_id, user_id).await
    }

    async fn register_message(
        &self,
        chat_id: &str,
        user_id: &str,
        window_seconds: u64,
    ) -> Result<u32, LedgerError> {
        (**self)
            .register_message(chat_id, user_id, window_seconds)
            .await
    }
}
