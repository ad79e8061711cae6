// Moderation engine - core decision logic for incoming chat messages.
//
// This engine handles:
// - Muted-user policy (soft delete, notice, or silent noop)
// - Naive Bayes scoring with immediate or threshold-based sanctions
// - Message length, flood, caps-lock and link checks
// - Banned words and regex patterns with warn -> mute -> kick -> ban escalation
//
// NO platform dependencies here - verdicts describe what a connector should
// do, they never touch a chat API.

use super::moderation_models::{ModAction, Verdict, VerdictReason};
use super::templates;
use crate::core::classifier::{ClassScores, Classifier};
use crate::core::ledger::{LedgerError, ViolationLedger};
use crate::core::policy::{MlMode, Policy};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use url::Url;

/// Sliding window for the flood counter.
const FLOOD_WINDOW_SECONDS: u64 = 60;

/// Violation scope for messages that arrive without a chat id.
const GLOBAL_CHAT: &str = "global";

/// Group-invite markers, matched against the lowercased link token.
const INVITE_PATTERNS: [&str; 2] = ["t.me/joinchat", "telegram.me/joinchat"];

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// CORE ENGINE
// ============================================================================

/// Moderation engine evaluating messages against a per-chat policy.
pub struct ModerationEngine<L: ViolationLedger, C: Classifier> {
    ledger: L,
    classifier: C,
    /// Compiled policy patterns; invalid ones are cached as `None` so a bad
    /// rules entry is reported once instead of on every message.
    regex_cache: DashMap<String, Option<Regex>>,
}

impl<L: ViolationLedger, C: Classifier> ModerationEngine<L, C> {
    /// Create a new engine with the given ledger and classifier.
    pub fn new(ledger: L, classifier: C) -> Self {
        Self {
            ledger,
            classifier,
            regex_cache: DashMap::new(),
        }
    }

    /// Evaluate one message.
    ///
    /// # Arguments
    /// * `message` - The raw message text
    /// * `user_id` - The author, pre-stripped of any platform prefix
    /// * `chat_id` - The chat the message arrived in; may be empty
    /// * `policy` - The policy resolved for that chat
    ///
    /// # Returns
    /// `None` when the message passes, otherwise the `Verdict` the connector
    /// should carry out. Ledger failures are the only error case.
    pub async fn evaluate(
        &self,
        message: &str,
        user_id: &str,
        chat_id: &str,
        policy: &Policy,
    ) -> Result<Option<Verdict>, EngineError> {
        // Without an author there is nothing to sanction.
        if user_id.is_empty() {
            return Ok(None);
        }
        if policy.whitelist_users.iter().any(|user| user == user_id) {
            return Ok(None);
        }

        // An already muted user gets the mute policy applied up front,
        // before ML and the rule checks can stack further sanctions.
        if !chat_id.is_empty() && self.ledger.is_muted(chat_id, user_id).await? {
            return Ok(Some(self.muted_verdict(policy, chat_id, user_id, true)));
        }

        // Chatless messages share one global violation scope.
        let ledger_chat = if chat_id.is_empty() { GLOBAL_CHAT } else { chat_id };

        if policy.ml.enabled {
            match self
                .classifier
                .score(ledger_chat, &policy.ml.training, message)
                .await
            {
                Ok(scores) => {
                    let is_toxic = scores.toxic >= policy.ml.toxicity_threshold;
                    let is_spam = scores.spam >= policy.ml.spam_threshold;
                    if policy.log_actions {
                        tracing::debug!(
                            "ML scores for user {} in chat {}: toxic {:.3} (threshold {}), spam {:.3} (threshold {}), triggered {}",
                            user_id,
                            ledger_chat,
                            scores.toxic,
                            policy.ml.toxicity_threshold,
                            scores.spam,
                            policy.ml.spam_threshold,
                            is_toxic || is_spam
                        );
                    }
                    if is_toxic || is_spam {
                        return self.ml_verdict(scores, user_id, ledger_chat, policy).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Classifier failed, falling back to rule checks: {}", e);
                }
            }
        }

        let lowered = message.to_lowercase();

        if policy.max_message_length > 0 && lowered.chars().count() > policy.max_message_length {
            return Ok(Some(Self::simple_verdict(
                policy,
                ModAction::Delete,
                templates::LENGTH_NOTICE,
            )));
        }

        // Flood control needs a real chat scope; mute state set here must be
        // visible to the up-front muted check on the next message.
        if policy.flood_limit > 0 && !chat_id.is_empty() {
            let count = self
                .ledger
                .register_message(chat_id, user_id, FLOOD_WINDOW_SECONDS)
                .await?;
            if count > policy.flood_limit {
                let seconds = policy.mute_duration_seconds;
                self.ledger.set_muted(chat_id, user_id, seconds).await?;
                let mut verdict = Verdict::new(ModAction::Mute);
                verdict.duration_seconds = Some(seconds);
                verdict.text = Self::action_text(
                    policy,
                    ModAction::Mute,
                    policy.mute_message.as_deref(),
                    templates::FLOOD_NOTICE.to_string(),
                    &[
                        ("user", format!("@{}", user_id)),
                        ("minutes", (seconds / 60).to_string()),
                        ("seconds", seconds.to_string()),
                    ],
                );
                return Ok(Some(verdict));
            }
        }

        if policy.caps_lock_threshold > 0 && !lowered.is_empty() {
            let letters = message.chars().filter(|c| c.is_alphabetic()).count();
            if letters > 0 {
                let uppercase = message
                    .chars()
                    .filter(|c| c.is_alphabetic() && c.is_uppercase())
                    .count();
                let caps_ratio = uppercase * 100 / letters;
                if caps_ratio >= policy.caps_lock_threshold as usize {
                    return Ok(Some(Self::simple_verdict(
                        policy,
                        ModAction::Warn,
                        templates::CAPS_NOTICE,
                    )));
                }
            }
        }

        if !policy.allow_links {
            if let Some(token) = Self::first_url_token(message) {
                if !Self::link_allowed(token, policy) {
                    return Ok(Some(Self::simple_verdict(
                        policy,
                        ModAction::Delete,
                        templates::LINKS_NOTICE,
                    )));
                }
            }
        }

        // Blank entries are dropped so they cannot match every message.
        let banned_words: Vec<String> = policy
            .banned_words
            .iter()
            .chain(policy.learning.toxic_words.iter())
            .chain(policy.learning.spam_words.iter())
            .filter(|word| !word.trim().is_empty())
            .map(|word| word.to_lowercase())
            .collect();

        let violation = banned_words
            .iter()
            .any(|word| lowered.contains(word.as_str()))
            || self.regex_violation(&lowered, policy);

        if !violation {
            // A mute may have landed while this evaluation was in flight;
            // re-check so the muted policy still applies to a clean message.
            let user_is_muted =
                !chat_id.is_empty() && self.ledger.is_muted(chat_id, user_id).await?;
            if user_is_muted
                && (policy.muted_override_actions
                    || policy.soft_mute_enforce_delete
                    || policy.muted_notice_enabled)
            {
                return Ok(Some(self.muted_verdict(policy, chat_id, user_id, false)));
            }
            return Ok(None);
        }

        let count = self.ledger.record_violation(ledger_chat, user_id).await?;
        match policy.thresholds.select(count) {
            Some(action) => Ok(Some(
                self.escalation_verdict(action, user_id, ledger_chat, policy)
                    .await?,
            )),
            // Below the warn tier the strike is recorded without a verdict.
            None => Ok(None),
        }
    }

    /// Builds the verdict for a message whose ML scores crossed a threshold.
    ///
    /// Thresholds mode records a strike and lets the classic tiers decide;
    /// immediate mode applies `ml.action` directly.
    async fn ml_verdict(
        &self,
        scores: ClassScores,
        user_id: &str,
        ledger_chat: &str,
        policy: &Policy,
    ) -> Result<Option<Verdict>, EngineError> {
        match policy.ml.mode {
            MlMode::Thresholds => {
                let count = self.ledger.record_violation(ledger_chat, user_id).await?;
                let Some(action) = policy.thresholds.select(count) else {
                    return Ok(None);
                };
                let mut verdict = self
                    .escalation_verdict(action, user_id, ledger_chat, policy)
                    .await?;
                verdict.reason = Some(VerdictReason::MlThresholds);
                if policy.log_actions {
                    tracing::info!(
                        "ML strike {} for user {} in chat {} escalated to {} (toxic {:.3}, spam {:.3})",
                        count,
                        user_id,
                        ledger_chat,
                        action,
                        scores.toxic,
                        scores.spam
                    );
                }
                Ok(Some(verdict))
            }
            MlMode::Immediate => {
                let action = policy.ml.action;
                if policy.log_actions {
                    tracing::info!(
                        "ML action {} for user {} in chat {} (toxic {:.3}, spam {:.3})",
                        action,
                        user_id,
                        ledger_chat,
                        scores.toxic,
                        scores.spam
                    );
                }
                let mut verdict = match action {
                    ModAction::Warn | ModAction::Mute | ModAction::Kick | ModAction::Ban => {
                        self.escalation_verdict(action, user_id, ledger_chat, policy)
                            .await?
                    }
                    other => {
                        let mut verdict = Verdict::new(other);
                        if policy.action_messages_enabled.allows(other)
                            && !policy.strict_message_config
                        {
                            verdict.text = Some(templates::GENERIC_ML_NOTICE.to_string());
                        }
                        verdict
                    }
                };
                verdict.delete = policy.ml.delete_on_ml && policy.delete_message_on_violation;
                verdict.reason = Some(VerdictReason::Ml);
                Ok(Some(verdict))
            }
        }
    }

    /// Verdict for a message from an already muted user. `allow_logging` is
    /// only true on the up-front check; the post-checks re-check stays quiet.
    fn muted_verdict(
        &self,
        policy: &Policy,
        chat_id: &str,
        user_id: &str,
        allow_logging: bool,
    ) -> Verdict {
        let log = allow_logging && policy.muted_override_actions && policy.log_actions;

        if policy.soft_mute_enforce_delete {
            if log {
                tracing::info!("Soft-mute delete for user {} in chat {}", user_id, chat_id);
            }
            let mut verdict = Verdict::new(ModAction::Delete);
            verdict.delete = true;
            verdict.text = templates::non_blank(policy.soft_mute_notice.as_deref())
                .or_else(|| templates::non_blank(policy.muted_notice.as_deref()))
                .map(str::to_string);
            return verdict;
        }

        if policy.muted_notice_enabled {
            if log {
                tracing::info!("Muted notice for user {} in chat {}", user_id, chat_id);
            }
            return match templates::non_blank(policy.muted_notice.as_deref()) {
                Some(notice) => {
                    let mut verdict = Verdict::new(ModAction::Warn);
                    verdict.text = Some(notice.to_string());
                    verdict
                }
                None => Verdict::new(ModAction::Noop),
            };
        }

        Verdict::new(ModAction::Noop)
    }

    /// Builds the sanction verdict for an escalation tier, applying the
    /// ledger side effects (mute timer, ban flag) as it goes.
    async fn escalation_verdict(
        &self,
        action: ModAction,
        user_id: &str,
        ledger_chat: &str,
        policy: &Policy,
    ) -> Result<Verdict, EngineError> {
        let mention = format!("@{}", user_id);
        let mut verdict = Verdict::new(action);
        verdict.delete = policy.delete_message_on_violation;

        match action {
            ModAction::Warn => {
                verdict.text = Self::action_text(
                    policy,
                    ModAction::Warn,
                    policy.warn_message.as_deref(),
                    templates::default_warn_text(&mention),
                    &[("user", mention)],
                );
            }
            ModAction::Mute => {
                let seconds = policy.mute_duration_seconds;
                self.ledger.set_muted(ledger_chat, user_id, seconds).await?;
                verdict.duration_seconds = Some(seconds);
                verdict.text = Self::action_text(
                    policy,
                    ModAction::Mute,
                    policy.mute_message.as_deref(),
                    templates::default_mute_text(&mention, seconds),
                    &[
                        ("user", mention),
                        ("minutes", (seconds / 60).to_string()),
                        ("seconds", seconds.to_string()),
                    ],
                );
            }
            ModAction::Kick => {
                verdict.text = Self::action_text(
                    policy,
                    ModAction::Kick,
                    policy.kick_message.as_deref(),
                    templates::default_kick_text(&mention),
                    &[("user", mention)],
                );
            }
            ModAction::Ban => {
                self.ledger.set_banned(ledger_chat, user_id, true).await?;
                let seconds = policy.ban_duration_seconds;
                if seconds > 0 {
                    verdict.until_seconds = Some(seconds);
                }
                verdict.text = Self::action_text(
                    policy,
                    ModAction::Ban,
                    policy.ban_message.as_deref(),
                    templates::default_ban_text(&mention, seconds),
                    &[
                        ("user", mention),
                        ("hours", (seconds / 3600).to_string()),
                        ("minutes", (seconds / 60).to_string()),
                        ("seconds", seconds.to_string()),
                    ],
                );
            }
            // Escalation tiers only produce warn, mute, kick or ban.
            ModAction::None | ModAction::Delete | ModAction::Noop => {}
        }
        Ok(verdict)
    }

    /// Picks the notice for a sanction: custom template first, then the
    /// built-in default unless strict mode suppresses it.
    fn action_text(
        policy: &Policy,
        action: ModAction,
        custom: Option<&str>,
        default_text: String,
        values: &[(&str, String)],
    ) -> Option<String> {
        if !policy.action_messages_enabled.allows(action) {
            return None;
        }
        if let Some(template) = custom.filter(|text| !text.is_empty()) {
            return Some(templates::render(template, values));
        }
        if !policy.strict_message_config {
            return Some(default_text);
        }
        None
    }

    /// Verdict carrying only an action and, when permitted, a default notice.
    fn simple_verdict(policy: &Policy, action: ModAction, default_text: &str) -> Verdict {
        let mut verdict = Verdict::new(action);
        if policy.action_messages_enabled.allows(action) && !policy.strict_message_config {
            verdict.text = Some(default_text.to_string());
        }
        verdict
    }

    /// First whitespace-separated token that looks like a link.
    fn first_url_token(message: &str) -> Option<&str> {
        message.split_whitespace().find(|token| {
            token.starts_with("http://")
                || token.starts_with("https://")
                || token.starts_with("www.")
        })
    }

    /// Whether a link token passes the whitelist or the invite-link policy.
    /// Unparseable tokens never pass.
    fn link_allowed(token: &str, policy: &Policy) -> bool {
        let to_parse = if token.starts_with("http") {
            token.to_string()
        } else {
            format!("http://{}", token)
        };
        let Ok(parsed) = Url::parse(&to_parse) else {
            return false;
        };
        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let whitelisted = policy
            .link_whitelist
            .iter()
            .any(|domain| host.ends_with(&domain.to_lowercase()));
        let lowered_token = token.to_lowercase();
        let is_invite = INVITE_PATTERNS
            .iter()
            .any(|pattern| lowered_token.contains(pattern));
        whitelisted || (policy.invite_links_allowed && is_invite)
    }

    /// Whether any configured regex pattern matches the lowercased text.
    fn regex_violation(&self, lowered: &str, policy: &Policy) -> bool {
        policy
            .regex_patterns
            .iter()
            .filter(|pattern| !pattern.trim().is_empty())
            .any(|pattern| {
                let compiled = self.regex_cache.entry(pattern.clone()).or_insert_with(|| {
                    match RegexBuilder::new(pattern).case_insensitive(true).build() {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!("Invalid regex pattern '{}': {}", pattern, e);
                            None
                        }
                    }
                });
                compiled
                    .as_ref()
                    .map_or(false, |re| re.is_match(lowered))
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{ClassifierError, TrainingExamples};
    use crate::core::ledger::ViolationRecord;
    use crate::core::policy::Thresholds;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory ledger for testing. Mutes never expire on their own; tests
    /// clear the flag directly to simulate expiry.
    struct MockLedger {
        counts: DashMap<(String, String), u32>,
        muted: DashMap<(String, String), bool>,
        banned: DashMap<(String, String), bool>,
        messages: DashMap<(String, String), u32>,
    }

    impl MockLedger {
        fn new() -> Self {
            Self {
                counts: DashMap::new(),
                muted: DashMap::new(),
                banned: DashMap::new(),
                messages: DashMap::new(),
            }
        }

        fn key(chat_id: &str, user_id: &str) -> (String, String) {
            (chat_id.to_string(), user_id.to_string())
        }
    }

    #[async_trait]
    impl ViolationLedger for MockLedger {
        async fn record_violation(&self, chat_id: &str, user_id: &str) -> Result<u32, LedgerError> {
            let mut count = self.counts.entry(Self::key(chat_id, user_id)).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn get_record(
            &self,
            chat_id: &str,
            user_id: &str,
        ) -> Result<ViolationRecord, LedgerError> {
            let key = Self::key(chat_id, user_id);
            Ok(ViolationRecord {
                count: self.counts.get(&key).map(|c| *c).unwrap_or(0),
                muted_until: None,
                banned: self.banned.get(&key).map(|b| *b).unwrap_or(false),
            })
        }

        async fn set_muted(
            &self,
            chat_id: &str,
            user_id: &str,
            _duration_seconds: u64,
        ) -> Result<(), LedgerError> {
            self.muted.insert(Self::key(chat_id, user_id), true);
            Ok(())
        }

        async fn is_muted(&self, chat_id: &str, user_id: &str) -> Result<bool, LedgerError> {
            Ok(self
                .muted
                .get(&Self::key(chat_id, user_id))
                .map(|m| *m)
                .unwrap_or(false))
        }

        async fn set_banned(
            &self,
            chat_id: &str,
            user_id: &str,
            banned: bool,
        ) -> Result<(), LedgerError> {
            self.banned.insert(Self::key(chat_id, user_id), banned);
            Ok(())
        }

        async fn reset(&self, chat_id: &str, user_id: &str) -> Result<(), LedgerError> {
            self.counts.remove(&Self::key(chat_id, user_id));
            self.messages.remove(&Self::key(chat_id, user_id));
            Ok(())
        }

        async fn register_message(
            &self,
            chat_id: &str,
            user_id: &str,
            _window_seconds: u64,
        ) -> Result<u32, LedgerError> {
            let mut count = self.messages.entry(Self::key(chat_id, user_id)).or_insert(0);
            *count += 1;
            Ok(*count)
        }
    }

    /// Classifier returning fixed scores.
    struct StubClassifier {
        toxic: f64,
        spam: f64,
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn score(
            &self,
            _chat_id: &str,
            _training: &TrainingExamples,
            _text: &str,
        ) -> Result<ClassScores, ClassifierError> {
            Ok(ClassScores {
                toxic: self.toxic,
                spam: self.spam,
            })
        }
    }

    /// Classifier that always fails.
    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn score(
            &self,
            _chat_id: &str,
            _training: &TrainingExamples,
            _text: &str,
        ) -> Result<ClassScores, ClassifierError> {
            Err(ClassifierError::BackendError("model unavailable".to_string()))
        }
    }

    /// Reports the user as muted from the second `is_muted` call onwards,
    /// simulating a mute landing while an evaluation is in flight.
    struct FlippingMutedLedger {
        inner: MockLedger,
        checks: AtomicU32,
    }

    #[async_trait]
    impl ViolationLedger for FlippingMutedLedger {
        async fn record_violation(&self, chat_id: &str, user_id: &str) -> Result<u32, LedgerError> {
            self.inner.record_violation(chat_id, user_id).await
        }

        async fn get_record(
            &self,
            chat_id: &str,
            user_id: &str,
        ) -> Result<ViolationRecord, LedgerError> {
            self.inner.get_record(chat_id, user_id).await
        }

        async fn set_muted(
            &self,
            chat_id: &str,
            user_id: &str,
            duration_seconds: u64,
        ) -> Result<(), LedgerError> {
            self.inner.set_muted(chat_id, user_id, duration_seconds).await
        }

        async fn is_muted(&self, _chat_id: &str, _user_id: &str) -> Result<bool, LedgerError> {
            Ok(self.checks.fetch_add(1, Ordering::SeqCst) > 0)
        }

        async fn set_banned(
            &self,
            chat_id: &str,
            user_id: &str,
            banned: bool,
        ) -> Result<(), LedgerError> {
            self.inner.set_banned(chat_id, user_id, banned).await
        }

        async fn reset(&self, chat_id: &str, user_id: &str) -> Result<(), LedgerError> {
            self.inner.reset(chat_id, user_id).await
        }

        async fn register_message(
            &self,
            chat_id: &str,
            user_id: &str,
            window_seconds: u64,
        ) -> Result<u32, LedgerError> {
            self.inner
                .register_message(chat_id, user_id, window_seconds)
                .await
        }
    }

    fn engine() -> ModerationEngine<MockLedger, StubClassifier> {
        ModerationEngine::new(
            MockLedger::new(),
            StubClassifier {
                toxic: 0.0,
                spam: 0.0,
            },
        )
    }

    fn ml_engine(toxic: f64, spam: f64) -> ModerationEngine<MockLedger, StubClassifier> {
        ModerationEngine::new(MockLedger::new(), StubClassifier { toxic, spam })
    }

    fn ml_policy() -> Policy {
        let mut policy = Policy::default();
        policy.ml.enabled = true;
        policy
    }

    #[tokio::test]
    async fn test_clean_message_passes() {
        let engine = engine();
        let verdict = engine
            .evaluate("hola amigos", "ana", "chat1", &Policy::default())
            .await
            .unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_banned_word_first_strike_warns() {
        let engine = engine();
        let verdict = engine
            .evaluate("Esto es SPAM claro", "ana", "chat1", &Policy::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(verdict.action, ModAction::Warn);
        assert!(verdict.delete);
        assert_eq!(
            verdict.text.as_deref(),
            Some("Advertencia @ana: tu mensaje viola las reglas.")
        );
        assert!(verdict.reason.is_none());
        assert_eq!(
            *engine
                .ledger
                .counts
                .get(&MockLedger::key("chat1", "ana"))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_escalation_ladder() {
        let engine = engine();
        let policy = Policy::default();

        let first = engine
            .evaluate("spam", "bo", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.action, ModAction::Warn);

        let second = engine
            .evaluate("spam", "bo", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.action, ModAction::Mute);
        assert_eq!(second.duration_seconds, Some(600));
        assert!(engine.ledger.is_muted("c", "bo").await.unwrap());

        // Mute expired
        engine.ledger.muted.remove(&MockLedger::key("c", "bo"));
        let third = engine
            .evaluate("spam", "bo", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.action, ModAction::Kick);

        let fourth = engine
            .evaluate("spam", "bo", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fourth.action, ModAction::Ban);
        // Permanent ban by default
        assert!(fourth.until_seconds.is_none());
        assert!(engine.ledger.get_record("c", "bo").await.unwrap().banned);
    }

    #[tokio::test]
    async fn test_whitelisted_user_is_immune() {
        let engine = engine();
        let policy = Policy {
            whitelist_users: vec!["mod1".to_string()],
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("spam spam spam", "mod1", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_none());
        assert!(engine.ledger.counts.is_empty());
    }

    #[tokio::test]
    async fn test_empty_user_is_ignored() {
        let engine = engine();
        let verdict = engine
            .evaluate("spam", "", "c", &Policy::default())
            .await
            .unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_muted_user_defaults_to_noop() {
        let engine = engine();
        engine.ledger.set_muted("c", "ana", 600).await.unwrap();

        let verdict = engine
            .evaluate("hola", "ana", "c", &Policy::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Noop);
        assert!(verdict.text.is_none());
    }

    #[tokio::test]
    async fn test_muted_soft_delete_prefers_soft_notice() {
        let engine = engine();
        engine.ledger.set_muted("c", "ana", 600).await.unwrap();
        let mut policy = Policy {
            soft_mute_enforce_delete: true,
            soft_mute_notice: Some("Borrado por mute".to_string()),
            muted_notice: Some("Estás muteado".to_string()),
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Delete);
        assert!(verdict.delete);
        assert_eq!(verdict.text.as_deref(), Some("Borrado por mute"));

        // Blank soft notice falls back to the muted notice.
        policy.soft_mute_notice = Some("   ".to_string());
        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.text.as_deref(), Some("Estás muteado"));

        // With both blank the delete carries no text at all.
        policy.muted_notice = None;
        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert!(verdict.text.is_none());
    }

    #[tokio::test]
    async fn test_muted_notice_warns_and_blank_notice_noops() {
        let engine = engine();
        engine.ledger.set_muted("c", "ana", 600).await.unwrap();
        let mut policy = Policy {
            muted_notice_enabled: true,
            muted_notice: Some("Sigues muteado".to_string()),
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
        assert_eq!(verdict.text.as_deref(), Some("Sigues muteado"));
        assert!(!verdict.delete);

        policy.muted_notice = Some("   ".to_string());
        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Noop);
    }

    #[tokio::test]
    async fn test_long_message_deleted() {
        let engine = engine();
        let policy = Policy {
            max_message_length: 5,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("holahola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Delete);
        // The action itself is the delete; the flag stays unset.
        assert!(!verdict.delete);
        assert_eq!(verdict.text.as_deref(), Some("Mensaje demasiado largo."));

        let verdict = engine.evaluate("corto", "ana", "c", &policy).await.unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_flood_mutes_after_limit() {
        let engine = engine();
        let policy = Policy {
            flood_limit: 2,
            ..Policy::default()
        };

        for _ in 0..2 {
            let verdict = engine.evaluate("hola", "ana", "c", &policy).await.unwrap();
            assert!(verdict.is_none());
        }

        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Mute);
        assert_eq!(verdict.duration_seconds, Some(600));
        assert_eq!(verdict.text.as_deref(), Some("Antiflood: mute temporal."));
        assert!(engine.ledger.is_muted("c", "ana").await.unwrap());
    }

    #[tokio::test]
    async fn test_flood_skipped_without_chat() {
        let engine = engine();
        let policy = Policy {
            flood_limit: 1,
            ..Policy::default()
        };

        for _ in 0..3 {
            let verdict = engine.evaluate("hola", "ana", "", &policy).await.unwrap();
            assert!(verdict.is_none());
        }
        assert!(engine.ledger.messages.is_empty());
    }

    #[tokio::test]
    async fn test_caps_lock_warning() {
        let engine = engine();
        let policy = Policy {
            caps_lock_threshold: 50,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("ESTO ES IMPORTANTE", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
        assert_eq!(verdict.text.as_deref(), Some("Evita escribir en MAYÚSCULAS."));

        let verdict = engine
            .evaluate("Esto es tranquilo", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_caps_check_ignores_messages_without_letters() {
        let engine = engine();
        let policy = Policy {
            caps_lock_threshold: 10,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("1234 !!! 5678", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_links_blocked_when_disallowed() {
        let engine = engine();
        let policy = Policy {
            allow_links: false,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("mira http://malo.example.net ya", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Delete);
        assert_eq!(verdict.text.as_deref(), Some("Enlaces no permitidos."));
    }

    #[tokio::test]
    async fn test_link_whitelist_matches_host_suffix() {
        let engine = engine();
        let policy = Policy {
            allow_links: false,
            link_whitelist: vec!["ejemplo.com".to_string()],
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("https://docs.Ejemplo.com/guia", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_none());

        let verdict = engine
            .evaluate("https://otro.net/guia", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_some());
    }

    #[tokio::test]
    async fn test_invite_links_follow_policy() {
        let engine = engine();
        let mut policy = Policy {
            allow_links: false,
            invite_links_allowed: true,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("unete https://t.me/joinchat/AAA", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_none());

        policy.invite_links_allowed = false;
        let verdict = engine
            .evaluate("unete https://t.me/joinchat/AAA", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_some());
    }

    #[tokio::test]
    async fn test_bare_www_token_gets_scheme_prepended() {
        let engine = engine();
        let policy = Policy {
            allow_links: false,
            link_whitelist: vec!["ejemplo.com".to_string()],
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("www.ejemplo.com/run", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_none());

        let verdict = engine
            .evaluate("www.otro.net", "ana", "c", &policy)
            .await
            .unwrap();
        assert!(verdict.is_some());
    }

    #[tokio::test]
    async fn test_malformed_url_is_blocked() {
        let engine = engine();
        let policy = Policy {
            allow_links: false,
            invite_links_allowed: true,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("http://[invalido t.me/joinchat", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Delete);
    }

    #[tokio::test]
    async fn test_regex_pattern_counts_as_violation() {
        let engine = engine();
        let policy = Policy {
            banned_words: vec![],
            regex_patterns: vec![r"c[o0]mpra".to_string()],
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("C0MPRA ahora mismo", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
    }

    #[tokio::test]
    async fn test_invalid_regex_is_skipped() {
        let engine = engine();
        let policy = Policy {
            banned_words: vec![],
            regex_patterns: vec!["([unclosed".to_string(), "hola".to_string()],
            ..Policy::default()
        };

        // The broken pattern never matches; the valid one still does.
        let verdict = engine.evaluate("adios", "ana", "c", &policy).await.unwrap();
        assert!(verdict.is_none());

        let verdict = engine.evaluate("hola", "ana", "c", &policy).await.unwrap();
        assert!(verdict.is_some());
    }

    #[tokio::test]
    async fn test_learning_words_extend_banned_list() {
        let engine = engine();
        let mut policy = Policy {
            banned_words: vec![],
            ..Policy::default()
        };
        policy.learning.toxic_words = vec!["tonto".to_string()];

        let verdict = engine
            .evaluate("eres un TONTO", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
    }

    #[tokio::test]
    async fn test_blank_banned_words_never_match() {
        let engine = engine();
        let policy = Policy {
            banned_words: vec!["   ".to_string(), "".to_string()],
            ..Policy::default()
        };

        let verdict = engine.evaluate("hola", "ana", "c", &policy).await.unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_ml_immediate_warn() {
        let engine = ml_engine(0.95, 0.0);
        let verdict = engine
            .evaluate("texto sospechoso", "ana", "c", &ml_policy())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(verdict.action, ModAction::Warn);
        assert_eq!(verdict.reason, Some(VerdictReason::Ml));
        assert!(verdict.delete);
        assert_eq!(
            verdict.text.as_deref(),
            Some("Advertencia @ana: tu mensaje viola las reglas.")
        );
        // Immediate mode does not consume an escalation strike.
        assert!(engine.ledger.counts.is_empty());
    }

    #[tokio::test]
    async fn test_ml_immediate_ban_sets_banned() {
        let engine = ml_engine(0.0, 0.99);
        let mut policy = ml_policy();
        policy.ml.action = ModAction::Ban;

        let verdict = engine
            .evaluate("compra ya", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Ban);
        assert!(verdict.until_seconds.is_none());
        assert!(engine.ledger.get_record("c", "ana").await.unwrap().banned);
    }

    #[tokio::test]
    async fn test_ml_immediate_non_escalating_action_gets_generic_text() {
        let engine = ml_engine(0.95, 0.0);
        let mut policy = ml_policy();
        policy.ml.action = ModAction::Noop;

        let verdict = engine
            .evaluate("texto", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Noop);
        assert!(verdict.delete);
        assert_eq!(
            verdict.text.as_deref(),
            Some("Por favor, evita contenido no permitido.")
        );
    }

    #[tokio::test]
    async fn test_ml_delete_on_ml_disabled_keeps_message() {
        let engine = ml_engine(0.95, 0.0);
        let mut policy = ml_policy();
        policy.ml.delete_on_ml = false;

        let verdict = engine
            .evaluate("texto", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert!(!verdict.delete);
    }

    #[tokio::test]
    async fn test_ml_thresholds_mode_escalates() {
        let engine = ml_engine(0.95, 0.0);
        let mut policy = ml_policy();
        policy.ml.mode = MlMode::Thresholds;

        let first = engine
            .evaluate("texto", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.action, ModAction::Warn);
        assert_eq!(first.reason, Some(VerdictReason::MlThresholds));
        assert!(first.delete);

        let second = engine
            .evaluate("texto", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.action, ModAction::Mute);
        assert_eq!(second.reason, Some(VerdictReason::MlThresholds));
    }

    #[tokio::test]
    async fn test_ml_thresholds_below_warn_tier_records_quietly() {
        let engine = ml_engine(0.95, 0.0);
        let mut policy = ml_policy();
        policy.ml.mode = MlMode::Thresholds;
        policy.thresholds.warn = 3;
        // The message also contains a banned word; the classic checks must
        // not run again on top of the recorded ML strike.
        policy.banned_words = vec!["spam".to_string()];

        let verdict = engine.evaluate("spam", "ana", "c", &policy).await.unwrap();
        assert!(verdict.is_none());
        assert_eq!(
            *engine
                .ledger
                .counts
                .get(&MockLedger::key("c", "ana"))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_ml_below_thresholds_falls_to_classic_checks() {
        let engine = ml_engine(0.5, 0.5);
        let verdict = engine
            .evaluate("esto es spam", "ana", "c", &ml_policy())
            .await
            .unwrap()
            .unwrap();

        // Classic banned-word verdict, not an ML one.
        assert_eq!(verdict.action, ModAction::Warn);
        assert!(verdict.reason.is_none());
    }

    #[tokio::test]
    async fn test_classifier_failure_falls_back_to_rules() {
        let engine = ModerationEngine::new(MockLedger::new(), FailingClassifier);
        let verdict = engine
            .evaluate("esto es spam", "ana", "c", &ml_policy())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(verdict.action, ModAction::Warn);
        assert!(verdict.reason.is_none());
    }

    #[tokio::test]
    async fn test_muted_check_skips_ml_entirely() {
        let engine = ml_engine(0.99, 0.99);
        engine.ledger.set_muted("c", "ana", 600).await.unwrap();
        let mut policy = ml_policy();
        policy.ml.action = ModAction::Ban;

        let verdict = engine
            .evaluate("lo que sea", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Noop);
        assert!(!engine.ledger.get_record("c", "ana").await.unwrap().banned);
    }

    #[tokio::test]
    async fn test_strict_config_silences_defaults_but_not_custom_text() {
        let engine = engine();
        let mut policy = Policy {
            strict_message_config: true,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("spam", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
        assert!(verdict.text.is_none());

        policy.warn_message = Some("Oye {user}, calma.".to_string());
        let verdict = engine
            .evaluate("spam", "bo", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.text.as_deref(), Some("Oye @bo, calma."));
    }

    #[tokio::test]
    async fn test_disabled_action_messages_suppress_custom_text_too() {
        let engine = engine();
        let mut policy = Policy {
            warn_message: Some("Oye {user}".to_string()),
            ..Policy::default()
        };
        policy.action_messages_enabled.warn = false;

        let verdict = engine
            .evaluate("spam", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
        assert!(verdict.text.is_none());
    }

    #[tokio::test]
    async fn test_custom_mute_template_renders_placeholders() {
        let engine = engine();
        let policy = Policy {
            mute_message: Some("Mute a {user} por {minutes} min ({seconds}s) {n}".to_string()),
            ..Policy::default()
        };

        engine.evaluate("spam", "ana", "c", &policy).await.unwrap();
        let verdict = engine
            .evaluate("spam", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Mute);
        assert_eq!(
            verdict.text.as_deref(),
            Some("Mute a @ana por 10 min (600s) {n}")
        );
    }

    #[tokio::test]
    async fn test_below_warn_threshold_records_without_verdict() {
        let engine = engine();
        let mut policy = Policy::default();
        policy.thresholds.warn = 3;

        for expected in 1..3u32 {
            let verdict = engine.evaluate("spam", "ana", "c", &policy).await.unwrap();
            assert!(verdict.is_none());
            assert_eq!(
                *engine
                    .ledger
                    .counts
                    .get(&MockLedger::key("c", "ana"))
                    .unwrap(),
                expected
            );
        }

        let verdict = engine
            .evaluate("spam", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
    }

    #[tokio::test]
    async fn test_temporary_ban_carries_until_seconds() {
        let engine = engine();
        let mut policy = Policy {
            ban_duration_seconds: 7200,
            ..Policy::default()
        };
        policy.thresholds = Thresholds {
            warn: 1,
            mute: 2,
            kick: 3,
            ban: 1,
        };

        let verdict = engine
            .evaluate("spam", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Ban);
        assert_eq!(verdict.until_seconds, Some(7200));
        assert_eq!(
            verdict.text.as_deref(),
            Some("Usuario @ana será baneado por 2 h.")
        );
    }

    #[tokio::test]
    async fn test_delete_on_violation_disabled() {
        let engine = engine();
        let policy = Policy {
            delete_message_on_violation: false,
            ..Policy::default()
        };

        let verdict = engine
            .evaluate("spam", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Warn);
        assert!(!verdict.delete);
    }

    #[tokio::test]
    async fn test_chatless_messages_use_global_scope() {
        let engine = engine();
        let verdict = engine
            .evaluate("spam", "ana", "", &Policy::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(verdict.action, ModAction::Warn);
        assert_eq!(
            *engine
                .ledger
                .counts
                .get(&MockLedger::key("global", "ana"))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_mute_landing_mid_evaluation_is_caught_by_recheck() {
        // Override mode turns the late-detected mute into a noop verdict.
        let ledger = FlippingMutedLedger {
            inner: MockLedger::new(),
            checks: AtomicU32::new(0),
        };
        let engine = ModerationEngine::new(
            ledger,
            StubClassifier {
                toxic: 0.0,
                spam: 0.0,
            },
        );
        let policy = Policy {
            muted_override_actions: true,
            ..Policy::default()
        };
        let verdict = engine
            .evaluate("hola", "ana", "c", &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.action, ModAction::Noop);

        // Without any muted-policy flags the clean message just passes.
        let ledger = FlippingMutedLedger {
            inner: MockLedger::new(),
            checks: AtomicU32::new(0),
        };
        let engine = ModerationEngine::new(
            ledger,
            StubClassifier {
                toxic: 0.0,
                spam: 0.0,
            },
        );
        let verdict = engine
            .evaluate("hola", "ana", "c", &Policy::default())
            .await
            .unwrap();
        assert!(verdict.is_none());
    }
}
