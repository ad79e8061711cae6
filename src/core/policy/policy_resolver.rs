// Policy resolver - loads the rules document and resolves per-chat policies.
//
// The document is a YAML mapping of chat id (string or bare number) to a
// rules fragment, with the literal key `default` holding the base fragment.
// A chat's policy is the deep merge of `default` and its own fragment,
// folded into the typed Policy with built-in defaults filling the gaps.
//
// Resolution never fails: unreadable or malformed documents fall back to
// the last good snapshot, and an unparseable fragment falls back to the
// built-in defaults. The file is re-checked at most once per debounce
// window and reloaded only when its mtime changes.

use super::policy_models::{ActionMessages, LearningPolicy, MlMode, MlPolicy, Policy, Thresholds};
use crate::core::classifier::TrainingExamples;
use crate::core::moderation::ModAction;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;

// ============================================================================
// WIRE FRAGMENTS
// ============================================================================

// Everything is optional on the wire; absence and explicit null both mean
// "use the default". Unknown keys (welcome, survey, features, ...) are
// ignored so the engine can share its document with other subsystems.

#[derive(Debug, Default, Deserialize)]
struct RulesFragment {
    enabled: Option<bool>,
    // Convenience top-level spellings, overridden by the moderation
    // section when both are present.
    allow_links: Option<bool>,
    max_message_length: Option<usize>,
    link_whitelist: Option<Vec<String>>,
    invite_links_allowed: Option<bool>,
    caps_lock_threshold: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    moderation: ModerationFragment,
}

#[derive(Debug, Default, Deserialize)]
struct ModerationFragment {
    enabled: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    thresholds: ThresholdsFragment,
    mute_duration_seconds: Option<u64>,
    ban_duration_seconds: Option<u64>,
    kick_rejoin_seconds: Option<i64>,
    banned_words: Option<Vec<String>>,
    regex_patterns: Option<Vec<String>>,
    delete_message_on_violation: Option<bool>,
    flood_limit: Option<u32>,
    whitelist_users: Option<Vec<String>>,
    allow_links: Option<bool>,
    link_whitelist: Option<Vec<String>>,
    invite_links_allowed: Option<bool>,
    max_message_length: Option<usize>,
    caps_lock_threshold: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    action_messages_enabled: ActionMessagesFragment,
    strict_message_config: Option<bool>,
    warn_message: Option<String>,
    mute_message: Option<String>,
    kick_message: Option<String>,
    ban_message: Option<String>,
    muted_notice_enabled: Option<bool>,
    muted_notice: Option<String>,
    // Accepted alias; wins over muted_notice when both are set.
    muted_notice_message: Option<String>,
    muted_override_actions: Option<bool>,
    soft_mute_enforce_delete: Option<bool>,
    soft_mute_notice: Option<String>,
    log_actions: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    ml: MlFragment,
    #[serde(default, deserialize_with = "null_as_default")]
    learning: LearningPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct ThresholdsFragment {
    warn: Option<u32>,
    mute: Option<u32>,
    kick: Option<u32>,
    ban: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionMessagesFragment {
    warn: Option<bool>,
    mute: Option<bool>,
    kick: Option<bool>,
    ban: Option<bool>,
    delete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct MlFragment {
    enabled: Option<bool>,
    toxicity_threshold: Option<f64>,
    spam_threshold: Option<f64>,
    ml_mode: Option<String>,
    action: Option<String>,
    delete_on_ml: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    training: TrainingExamples,
}

/// Deserializes an explicitly null section as its default, the same way
/// a missing section would be.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// FRAGMENT FOLDING
// ============================================================================

fn policy_from_value(value: &Value) -> Policy {
    match serde_yaml::from_value::<RulesFragment>(value.clone()) {
        Ok(fragment) => policy_from_fragment(fragment),
        Err(e) => {
            tracing::warn!("Unparseable rules fragment, using default policy: {}", e);
            Policy::default()
        }
    }
}

fn policy_from_fragment(fragment: RulesFragment) -> Policy {
    let defaults = Policy::default();
    let default_thresholds = Thresholds::default();
    let default_messages = ActionMessages::default();
    let default_ml = MlPolicy::default();
    let m = fragment.moderation;

    Policy {
        // The top-level switch wins over moderation.enabled.
        enabled: fragment.enabled.or(m.enabled).unwrap_or(defaults.enabled),
        thresholds: Thresholds {
            warn: m.thresholds.warn.unwrap_or(default_thresholds.warn),
            mute: m.thresholds.mute.unwrap_or(default_thresholds.mute),
            kick: m.thresholds.kick.unwrap_or(default_thresholds.kick),
            ban: m.thresholds.ban.unwrap_or(default_thresholds.ban),
        },
        mute_duration_seconds: m
            .mute_duration_seconds
            .unwrap_or(defaults.mute_duration_seconds),
        ban_duration_seconds: m
            .ban_duration_seconds
            .unwrap_or(defaults.ban_duration_seconds),
        kick_rejoin_seconds: m.kick_rejoin_seconds.unwrap_or(defaults.kick_rejoin_seconds),
        banned_words: m.banned_words.unwrap_or(defaults.banned_words),
        regex_patterns: m.regex_patterns.unwrap_or(defaults.regex_patterns),
        delete_message_on_violation: m
            .delete_message_on_violation
            .unwrap_or(defaults.delete_message_on_violation),
        flood_limit: m.flood_limit.unwrap_or(defaults.flood_limit),
        whitelist_users: m.whitelist_users.unwrap_or(defaults.whitelist_users),
        // These five accept a top-level spelling, with the moderation
        // section winning when both are present.
        allow_links: m
            .allow_links
            .or(fragment.allow_links)
            .unwrap_or(defaults.allow_links),
        link_whitelist: m
            .link_whitelist
            .or(fragment.link_whitelist)
            .unwrap_or(defaults.link_whitelist),
        invite_links_allowed: m
            .invite_links_allowed
            .or(fragment.invite_links_allowed)
            .unwrap_or(defaults.invite_links_allowed),
        max_message_length: m
            .max_message_length
            .or(fragment.max_message_length)
            .unwrap_or(defaults.max_message_length),
        caps_lock_threshold: m
            .caps_lock_threshold
            .or(fragment.caps_lock_threshold)
            .unwrap_or(defaults.caps_lock_threshold),
        action_messages_enabled: ActionMessages {
            warn: m.action_messages_enabled.warn.unwrap_or(default_messages.warn),
            mute: m.action_messages_enabled.mute.unwrap_or(default_messages.mute),
            kick: m.action_messages_enabled.kick.unwrap_or(default_messages.kick),
            ban: m.action_messages_enabled.ban.unwrap_or(default_messages.ban),
            delete: m
                .action_messages_enabled
                .delete
                .unwrap_or(default_messages.delete),
        },
        strict_message_config: m
            .strict_message_config
            .unwrap_or(defaults.strict_message_config),
        warn_message: m.warn_message,
        mute_message: m.mute_message,
        kick_message: m.kick_message,
        ban_message: m.ban_message,
        muted_notice_enabled: m
            .muted_notice_enabled
            .unwrap_or(defaults.muted_notice_enabled),
        muted_notice: m
            .muted_notice_message
            .or(m.muted_notice)
            .or(defaults.muted_notice),
        muted_override_actions: m
            .muted_override_actions
            .unwrap_or(defaults.muted_override_actions),
        soft_mute_enforce_delete: m
            .soft_mute_enforce_delete
            .unwrap_or(defaults.soft_mute_enforce_delete),
        soft_mute_notice: m.soft_mute_notice.or(defaults.soft_mute_notice),
        log_actions: m.log_actions.unwrap_or(defaults.log_actions),
        ml: MlPolicy {
            enabled: m.ml.enabled.unwrap_or(default_ml.enabled),
            toxicity_threshold: m
                .ml
                .toxicity_threshold
                .unwrap_or(default_ml.toxicity_threshold),
            spam_threshold: m.ml.spam_threshold.unwrap_or(default_ml.spam_threshold),
            mode: m
                .ml
                .ml_mode
                .as_deref()
                .map(MlMode::parse)
                .unwrap_or(default_ml.mode),
            action: m
                .ml
                .action
                .as_deref()
                .map(parse_ml_action)
                .unwrap_or(default_ml.action),
            delete_on_ml: m.ml.delete_on_ml.unwrap_or(default_ml.delete_on_ml),
            training: m.ml.training,
        },
        learning: m.learning,
    }
}

fn parse_ml_action(name: &str) -> ModAction {
    ModAction::parse(name).unwrap_or_else(|| {
        tracing::warn!("Unknown ml.action '{}', falling back to warn", name);
        ModAction::Warn
    })
}

// ============================================================================
// RESOLVER
// ============================================================================

#[derive(Default)]
struct ResolverState {
    /// Parsed top-level document, keys normalized to strings
    doc: Option<HashMap<String, Value>>,
    /// Modification time observed by the last reload attempt
    seen_mtime: Option<SystemTime>,
    /// When the file was last stat'ed, for debouncing
    last_check: Option<Instant>,
}

/// Hot-reloading source of per-chat policies.
///
/// Shared behind an `Arc` by everything that needs policy lookups; all
/// methods take `&self`.
pub struct PolicyResolver {
    path: PathBuf,
    debounce: Duration,
    state: RwLock<ResolverState>,
}

impl PolicyResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_debounce(path, Duration::from_secs(1))
    }

    /// A zero debounce makes every resolve stat the file, which tests
    /// rely on to observe rewrites immediately.
    pub fn with_debounce(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            path: path.into(),
            debounce,
            state: RwLock::new(ResolverState::default()),
        }
    }

    /// Resolves the effective policy for a chat.
    pub async fn resolve(&self, chat_id: &str) -> Policy {
        self.maybe_reload().await;

        let state = self.state.read().await;
        let Some(doc) = state.doc.as_ref() else {
            return Policy::default();
        };

        let default_value = doc.get("default").filter(|v| !v.is_null());
        let override_value = doc.get(chat_id).filter(|v| !v.is_null());
        let merged = match (default_value, override_value) {
            (None, None) => return Policy::default(),
            (Some(default), None) => default.clone(),
            (None, Some(chat)) => chat.clone(),
            (Some(default), Some(chat)) => deep_merge(default, chat),
        };
        policy_from_value(&merged)
    }

    /// Forces the next resolve to re-read the document, bypassing both
    /// the debounce window and the mtime comparison.
    pub async fn reload(&self) {
        let mut state = self.state.write().await;
        state.last_check = None;
        state.seen_mtime = None;
    }

    async fn maybe_reload(&self) {
        {
            let state = self.state.read().await;
            if let Some(last) = state.last_check {
                if last.elapsed() < self.debounce {
                    return;
                }
            }
        }

        let mut state = self.state.write().await;
        // Re-check under the write lock; another task may have just
        // finished the same reload.
        if let Some(last) = state.last_check {
            if last.elapsed() < self.debounce {
                return;
            }
        }
        state.last_check = Some(Instant::now());

        let mtime = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();
        if mtime == state.seen_mtime {
            return;
        }

        match load_document(&self.path) {
            Ok(doc) => {
                tracing::info!("Loaded rules document from {}", self.path.display());
                state.doc = Some(doc);
            }
            Err(e) => {
                tracing::warn!("Failed to load rules document, keeping previous: {:#}", e);
            }
        }
        // Remember the mtime even for a failed load so a broken file is
        // not re-parsed on every resolve.
        state.seen_mtime = mtime;
    }
}

// ============================================================================
// DOCUMENT LOADING & MERGING
// ============================================================================

fn load_document(path: &Path) -> Result<HashMap<String, Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules file {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&raw).context("parsing rules YAML")?;
    let mapping = match value {
        Value::Null => return Ok(HashMap::new()),
        Value::Mapping(mapping) => mapping,
        _ => bail!("rules document must be a mapping of chat ids"),
    };

    // Top-level keys normalize to strings so numeric chat ids written
    // without quotes still match their string form.
    let mut doc = HashMap::new();
    for (key, value) in mapping {
        let key = match key {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        doc.insert(key, value);
    }
    Ok(doc)
}

/// Merges a chat's fragment over the default one. Mappings merge key by
/// key; lists and scalars replace wholesale. A non-mapping override keeps
/// the base document, a non-mapping base counts as empty.
fn deep_merge(base: &Value, overlay: &Value) -> Value {
    let Value::Mapping(overlay_map) = overlay else {
        return match base {
            Value::Mapping(_) => base.clone(),
            _ => Value::Mapping(Mapping::new()),
        };
    };
    let base_map = match base {
        Value::Mapping(map) => map.clone(),
        _ => Mapping::new(),
    };
    Value::Mapping(merge_mappings(base_map, overlay_map))
}

fn merge_mappings(mut merged: Mapping, overlay: &Mapping) -> Mapping {
    for (key, overlay_value) in overlay {
        let combined = match (merged.get(key), overlay_value) {
            (Some(Value::Mapping(base_inner)), Value::Mapping(overlay_inner)) => {
                Value::Mapping(merge_mappings(base_inner.clone(), overlay_inner))
            }
            _ => overlay_value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

// ============================================================================
// TESTS
// ============================================================================
