// Moderation domain models - verdicts the decision engine emits.
//
// These are pure domain types with no platform dependencies.
// Connector layers translate them into real platform actions.

use serde::{Deserialize, Serialize};

/// Action a verdict asks the hosting platform to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModAction {
    /// Nothing to do
    None,
    /// Remove the message, no further escalation
    Delete,
    /// Send the user a warning notice
    Warn,
    /// Temporarily mute the user
    Mute,
    /// Remove the user from the chat (they may rejoin)
    Kick,
    /// Ban the user (temporarily or permanently)
    Ban,
    /// Recognized but deliberately silent (e.g. muted user with notices off)
    Noop,
}

impl ModAction {
    /// Parses a policy-supplied action name. Returns `None` for unknown
    /// names so callers choose their own fallback.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "none" => Some(ModAction::None),
            "delete" => Some(ModAction::Delete),
            "warn" => Some(ModAction::Warn),
            "mute" => Some(ModAction::Mute),
            "kick" => Some(ModAction::Kick),
            "ban" => Some(ModAction::Ban),
            "noop" => Some(ModAction::Noop),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModAction::None => write!(f, "none"),
            ModAction::Delete => write!(f, "delete"),
            ModAction::Warn => write!(f, "warn"),
            ModAction::Mute => write!(f, "mute"),
            ModAction::Kick => write!(f, "kick"),
            ModAction::Ban => write!(f, "ban"),
            ModAction::Noop => write!(f, "noop"),
        }
    }
}

/// Which pipeline stage produced the verdict, for verdicts that carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// Classifier in immediate mode
    Ml,
    /// Classifier routed through the escalation thresholds
    MlThresholds,
}

/// Discriminator for the serialized verdict. Absence of a verdict is
/// expressed as `Option::None` at the API level, never as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Moderation,
}

/// Outcome of evaluating one message against a chat's policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "type")]
    pub kind: VerdictKind,
    /// What the platform should do with the sender
    pub action: ModAction,
    /// Whether the offending message itself should be removed
    #[serde(default)]
    pub delete: bool,
    /// User-facing notice, absent when messages are disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Mute length in seconds, set for mute verdicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Ban length in seconds, set for temporary bans only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<VerdictReason>,
}

impl Verdict {
    /// Creates a bare verdict carrying only the action.
    pub fn new(action: ModAction) -> Self {
        Self {
            kind: VerdictKind::Moderation,
            action,
            delete: false,
            text: None,
            duration_seconds: None,
            until_seconds: None,
            reason: None,
        }
    }
}
