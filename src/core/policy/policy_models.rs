// Policy domain models - the typed per-chat moderation policy.
//
// A Policy is resolved per chat by the PolicyResolver (default fragment
// merged with the chat's override) and handed to consumers by value.
// Consumers never mutate it; defaulting lives here and in the resolver,
// never in the checks that read the fields.

use crate::core::classifier::TrainingExamples;
use crate::core::moderation::ModAction;
use serde::{Deserialize, Serialize};

/// Violation-count cutoffs for the escalation ladder.
/// By convention warn <= mute <= kick <= ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warn: u32,
    pub mute: u32,
    pub kick: u32,
    pub ban: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn: 1,
            mute: 2,
            kick: 3,
            ban: 4,
        }
    }
}

impl Thresholds {
    /// Picks the highest tier whose cutoff the violation count has
    /// reached, or `None` while the count is still below the warn cutoff.
    pub fn select(&self, count: u32) -> Option<ModAction> {
        if count >= self.ban {
            Some(ModAction::Ban)
        } else if count >= self.kick {
            Some(ModAction::Kick)
        } else if count >= self.mute {
            Some(ModAction::Mute)
        } else if count >= self.warn {
            Some(ModAction::Warn)
        } else {
            None
        }
    }
}

/// Per-action switches for user-facing notice texts. Disabling an action
/// here silences its text without disabling the action itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionMessages {
    pub warn: bool,
    pub mute: bool,
    pub kick: bool,
    pub ban: bool,
    /// Also covers direct deletions (length, links)
    pub delete: bool,
}

impl Default for ActionMessages {
    fn default() -> Self {
        Self {
            warn: true,
            mute: true,
            kick: true,
            ban: true,
            delete: true,
        }
    }
}

impl ActionMessages {
    /// Whether a notice may accompany the given action. Actions without
    /// a switch of their own are always allowed.
    pub fn allows(&self, action: ModAction) -> bool {
        match action {
            ModAction::Warn => self.warn,
            ModAction::Mute => self.mute,
            ModAction::Kick => self.kick,
            ModAction::Ban => self.ban,
            ModAction::Delete => self.delete,
            _ => true,
        }
    }
}

/// How a classifier hit turns into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MlMode {
    /// Apply `ml.action` directly, without consuming the escalation ladder
    #[default]
    Immediate,
    /// Record a violation and let the thresholds decide the sanction
    Thresholds,
}

impl MlMode {
    /// Any name other than "thresholds" falls back to immediate, matching
    /// the loader's tolerance for sloppy configs.
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("thresholds") {
            MlMode::Thresholds
        } else {
            MlMode::Immediate
        }
    }
}

/// Classifier section of the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct MlPolicy {
    pub enabled: bool,
    pub toxicity_threshold: f64,
    pub spam_threshold: f64,
    pub mode: MlMode,
    /// Action applied directly in immediate mode
    pub action: ModAction,
    /// In immediate mode, whether a hit also deletes the message
    pub delete_on_ml: bool,
    pub training: TrainingExamples,
}

impl Default for MlPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            toxicity_threshold: 0.9,
            spam_threshold: 0.9,
            mode: MlMode::default(),
            action: ModAction::Warn,
            delete_on_ml: true,
            training: TrainingExamples::default(),
        }
    }
}

/// Manually curated word lists, merged into the banned-word set at
/// evaluation time. Lets admins react without retraining the classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningPolicy {
    #[serde(default)]
    pub toxic_words: Vec<String>,
    #[serde(default)]
    pub spam_words: Vec<String>,
}

/// Resolved moderation policy for one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Master switch; callers skip evaluation entirely when false
    pub enabled: bool,
    pub thresholds: Thresholds,
    pub mute_duration_seconds: u64,
    /// Ban length in seconds, 0 = permanent
    pub ban_duration_seconds: u64,
    /// Rejoin window for kicks; 0 or negative makes the kick permanent.
    /// Consumed by the platform applying the kick, not by the engine.
    pub kick_rejoin_seconds: i64,
    /// Substring matches against the lowercased message
    pub banned_words: Vec<String>,
    /// Deny-patterns, applied case-insensitively
    pub regex_patterns: Vec<String>,
    pub delete_message_on_violation: bool,
    /// Messages per minute before the antiflood mute (0 = off)
    pub flood_limit: u32,
    /// User identifiers exempt from every check
    pub whitelist_users: Vec<String>,
    pub allow_links: bool,
    /// Host suffixes still allowed when links are blocked
    pub link_whitelist: Vec<String>,
    pub invite_links_allowed: bool,
    /// Maximum message length in characters (0 = no limit)
    pub max_message_length: usize,
    /// Percentage of uppercase letters treated as shouting (0 = off)
    pub caps_lock_threshold: u32,
    pub action_messages_enabled: ActionMessages,
    /// Suppress default texts; only explicitly configured ones are sent
    pub strict_message_config: bool,
    pub warn_message: Option<String>,
    pub mute_message: Option<String>,
    pub kick_message: Option<String>,
    pub ban_message: Option<String>,
    pub muted_notice_enabled: bool,
    pub muted_notice: Option<String>,
    /// Always produce a verdict for muted users, even with none of the
    /// soft-mute flags set
    pub muted_override_actions: bool,
    /// Delete messages from muted users when the platform mute does not
    /// hold by itself
    pub soft_mute_enforce_delete: bool,
    pub soft_mute_notice: Option<String>,
    /// Emit audit log events for actions taken
    pub log_actions: bool,
    pub ml: MlPolicy,
    pub learning: LearningPolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            thresholds: Thresholds::default(),
            mute_duration_seconds: 600, // 10 minutes
            ban_duration_seconds: 0,    // permanent
            kick_rejoin_seconds: 60,
            banned_words: vec![
                "spam".to_string(),
                "oferta".to_string(),
                "prohibido".to_string(),
            ],
            regex_patterns: Vec::new(),
            delete_message_on_violation: true,
            flood_limit: 0, // disabled
            whitelist_users: Vec::new(),
            allow_links: true,
            link_whitelist: Vec::new(),
            invite_links_allowed: true,
            max_message_length: 0, // no limit
            caps_lock_threshold: 0, // disabled
            action_messages_enabled: ActionMessages::default(),
            strict_message_config: false,
            warn_message: None,
            mute_message: None,
            kick_message: None,
            ban_message: None,
            muted_notice_enabled: false,
            muted_notice: Some("Estás muteado temporalmente.".to_string()),
            muted_override_actions: false,
            soft_mute_enforce_delete: false,
            soft_mute_notice: Some("Mensaje eliminado: usuario en mute temporal.".to_string()),
            log_actions: true,
            ml: MlPolicy::default(),
            learning: LearningPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ladder_with_defaults() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.select(0), None);
        assert_eq!(thresholds.select(1), Some(ModAction::Warn));
        assert_eq!(thresholds.select(2), Some(ModAction::Mute));
        assert_eq!(thresholds.select(3), Some(ModAction::Kick));
        assert_eq!(thresholds.select(4), Some(ModAction::Ban));
        assert_eq!(thresholds.select(10), Some(ModAction::Ban));
    }

    #[test]
    fn test_counts_below_warn_select_nothing() {
        let thresholds = Thresholds {
            warn: 3,
            mute: 4,
            kick: 5,
            ban: 6,
        };
        assert_eq!(thresholds.select(2), None);
        assert_eq!(thresholds.select(3), Some(ModAction::Warn));
    }

    #[test]
    fn test_action_messages_default_open() {
        let messages = ActionMessages::default();
        assert!(messages.allows(ModAction::Warn));
        assert!(messages.allows(ModAction::Delete));
        assert!(messages.allows(ModAction::Noop));

        let muted_warn = ActionMessages {
            warn: false,
            ..ActionMessages::default()
        };
        assert!(!muted_warn.allows(ModAction::Warn));
        assert!(muted_warn.allows(ModAction::Mute));
    }

    #[test]
    fn test_ml_mode_parse_tolerates_unknown_names() {
        assert_eq!(MlMode::parse("thresholds"), MlMode::Thresholds);
        assert_eq!(MlMode::parse("THRESHOLDS"), MlMode::Thresholds);
        assert_eq!(MlMode::parse("immediate"), MlMode::Immediate);
        assert_eq!(MlMode::parse("professional"), MlMode::Immediate);
        assert_eq!(MlMode::parse(""), MlMode::Immediate);
    }
}
