use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub const MIN_SCORE: u8 = 0;
pub const MAX_SCORE: u8 = 100;
pub const DEFAULT_SCORE: u8 = 100;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TrustError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("score out of range: {0} (allowed {MIN_SCORE}..={MAX_SCORE})")]
    ScoreOutOfRange(i64),
}

/// Failure reported by a platform gateway call.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GatewayError {
    #[error("missing authorization: {0}")]
    Forbidden(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Moderation actions that carry a documented trust delta.
///
/// The engine itself is delta-agnostic; these are the deltas the command
/// surface applies for each action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Warn,
    Kick,
    Softban,
    Ban,
    Timeout { minutes: u32 },
}

impl ModerationAction {
    /// Signed trust delta for this action.
    ///
    /// Timeouts deduct 5 trust per started 10 minutes, capped at 50.
    #[must_use]
    pub fn delta(self) -> i64 {
        match self {
            Self::Warn => -10,
            Self::Kick => -30,
            Self::Softban => -50,
            Self::Ban => -100,
            Self::Timeout { minutes } => {
                let deduction = ((i64::from(minutes) / 10) * 5 + 5).min(50);
                -deduction
            }
        }
    }

    /// Audit reason string recorded alongside the delta.
    #[must_use]
    pub fn audit_reason(self, reason: &str) -> String {
        match self {
            Self::Warn => format!("Warned: {reason}"),
            Self::Kick => format!("Kicked: {reason}"),
            Self::Softban => format!("Softban: {reason}"),
            Self::Ban => format!("Manual Ban: {reason}"),
            Self::Timeout { minutes } => format!("Timeout ({minutes}m): {reason}"),
        }
    }
}

/// Coarse classification of a trust score for display surfaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Trusted,
    Warning,
    Critical,
}

impl TrustLevel {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        if score > 70 {
            Self::Trusted
        } else if score > 30 {
            Self::Warning
        } else {
            Self::Critical
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trusted" => Some(Self::Trusted),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Display for TrustLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the auto-ban trigger for a single mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AutoBanStatus {
    NotTriggered,
    Banned,
    BanFailed,
}

impl AutoBanStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotTriggered => "not_triggered",
            Self::Banned => "banned",
            Self::BanFailed => "ban_failed",
        }
    }
}

/// In-memory mapping from user id to trust score.
///
/// Serializes as a flat JSON object (`{"<user_id>": <score>}`), which is
/// also the persisted file format. Users with no record are at
/// [`DEFAULT_SCORE`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct TrustLedger {
    scores: BTreeMap<String, u8>,
}

impl TrustLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored score for a user, or [`DEFAULT_SCORE`] when unseen.
    #[must_use]
    pub fn get(&self, user_id: &str) -> u8 {
        self.scores.get(user_id).copied().unwrap_or(DEFAULT_SCORE)
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.scores.contains_key(user_id)
    }

    /// Records a score, returning the previous stored value if any.
    pub fn set(&mut self, user_id: &str, score: u8) -> Option<u8> {
        self.scores.insert(user_id.to_string(), score)
    }

    pub fn remove(&mut self, user_id: &str) -> Option<u8> {
        self.scores.remove(user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.scores.iter().map(|(id, score)| (id.as_str(), *score))
    }

    /// Checks every stored score against the `0..=100` invariant.
    ///
    /// # Errors
    /// Returns [`TrustError::Validation`] when a record is out of range.
    /// Deserialization already rejects negative values; this catches scores
    /// above [`MAX_SCORE`] in a hand-edited file.
    pub fn validate(&self) -> Result<(), TrustError> {
        for (user_id, score) in &self.scores {
            if *score > MAX_SCORE {
                return Err(TrustError::Validation(format!(
                    "score {score} for user {user_id} exceeds {MAX_SCORE}"
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, u8)> for TrustLedger {
    fn from_iter<I: IntoIterator<Item = (String, u8)>>(iter: I) -> Self {
        Self {
            scores: iter.into_iter().collect(),
        }
    }
}

/// Record of one applied mutation, returned to the caller for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScoreChange {
    pub change_id: Ulid,
    pub user_id: String,
    pub previous: u8,
    pub score: u8,
    pub level: TrustLevel,
    pub auto_ban: AutoBanStatus,
    pub recorded_at: String,
}

/// Platform operations the engine needs for the auto-ban side effect.
///
/// `ban` MUST be idempotent: a score already at 0 triggers the ban again on
/// the next negative delta, and implementations are expected to tolerate an
/// already-banned user rather than fail.
pub trait ModerationGateway {
    /// Sends a direct message to the user. Best-effort; the engine ignores
    /// the outcome.
    ///
    /// # Errors
    /// Returns [`GatewayError`] when delivery fails.
    fn notify(&self, user_id: &str, text: &str) -> Result<(), GatewayError>;

    /// Bans the user from the platform.
    ///
    /// # Errors
    /// Returns [`GatewayError`] when the ban cannot be executed; the engine
    /// reports this to the audit sink without rolling back the score.
    fn ban(&self, user_id: &str, reason: &str) -> Result<(), GatewayError>;
}

/// Destination for human-readable audit lines (ban outcomes).
pub trait AuditSink {
    fn report(&self, message: &str);
}

/// Everything the engine needs from its environment to run a mutation.
pub struct ModerationContext<'a> {
    pub gateway: &'a dyn ModerationGateway,
    pub audit: &'a dyn AuditSink,
    /// Human-readable origin label (for the original system, the server
    /// name) interpolated into user notifications.
    pub origin: &'a str,
}

/// Clamps an arbitrary integer into the valid score range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn clamp_score(value: i64) -> u8 {
    value.clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE)) as u8
}

/// Applies a signed delta to a score with clamping.
#[must_use]
pub fn apply_delta(current: u8, delta: i64) -> u8 {
    clamp_score(i64::from(current) + delta)
}

/// Validates a user id for a mutation.
///
/// # Errors
/// Returns [`TrustError::Validation`] when the id is empty or blank.
pub fn validate_user_id(user_id: &str) -> Result<(), TrustError> {
    if user_id.trim().is_empty() {
        return Err(TrustError::Validation(
            "user_id MUST be provided for every mutation".to_string(),
        ));
    }
    Ok(())
}

/// Validates an administrative score override before any mutation.
///
/// # Errors
/// Returns [`TrustError::ScoreOutOfRange`] when outside `0..=100`.
pub fn validate_score(score: i64) -> Result<u8, TrustError> {
    match u8::try_from(score) {
        Ok(value) if value <= MAX_SCORE => Ok(value),
        _ => Err(TrustError::ScoreOutOfRange(score)),
    }
}

/// Direct-message text sent to a user before the auto-ban lands.
#[must_use]
pub fn auto_ban_notice(origin: &str, reason: &str) -> String {
    format!(
        "You have been automatically banned from {origin} because your trust score reached 0. Last action: {reason}"
    )
}

/// Ban reason recorded with the platform when the trigger fires.
#[must_use]
pub fn auto_ban_reason(reason: &str) -> String {
    format!("Trust score reached 0. Last action: {reason}")
}

/// Ban reason recorded when an administrative override sets the score to 0.
pub const ADMIN_SET_ZERO_REASON: &str = "Trust score set to 0 by admin.";

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`TrustError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, TrustError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| TrustError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn unseen_user_is_fully_trusted() {
        let ledger = TrustLedger::new();
        assert_eq!(ledger.get("123456789012345678"), DEFAULT_SCORE);
        assert!(!ledger.contains("123456789012345678"));
    }

    #[test]
    fn delta_clamps_at_both_bounds() {
        assert_eq!(apply_delta(100, -10), 90);
        assert_eq!(apply_delta(100, -150), 0);
        assert_eq!(apply_delta(5, -30), 0);
        assert_eq!(apply_delta(95, 20), 100);
        assert_eq!(apply_delta(0, 0), 0);
    }

    #[test]
    fn action_deltas_match_documented_contract() {
        assert_eq!(ModerationAction::Warn.delta(), -10);
        assert_eq!(ModerationAction::Kick.delta(), -30);
        assert_eq!(ModerationAction::Softban.delta(), -50);
        assert_eq!(ModerationAction::Ban.delta(), -100);
    }

    #[test]
    fn timeout_deducts_five_per_ten_minutes_capped_at_fifty() {
        assert_eq!(ModerationAction::Timeout { minutes: 5 }.delta(), -5);
        assert_eq!(ModerationAction::Timeout { minutes: 10 }.delta(), -10);
        assert_eq!(ModerationAction::Timeout { minutes: 45 }.delta(), -25);
        assert_eq!(ModerationAction::Timeout { minutes: 90 }.delta(), -50);
        assert_eq!(ModerationAction::Timeout { minutes: 600 }.delta(), -50);
    }

    #[test]
    fn audit_reason_carries_action_prefix() {
        assert_eq!(
            ModerationAction::Warn.audit_reason("spam"),
            "Warned: spam"
        );
        assert_eq!(
            ModerationAction::Timeout { minutes: 30 }.audit_reason("flooding"),
            "Timeout (30m): flooding"
        );
    }

    #[test]
    fn level_thresholds_follow_display_contract() {
        assert_eq!(TrustLevel::from_score(100), TrustLevel::Trusted);
        assert_eq!(TrustLevel::from_score(71), TrustLevel::Trusted);
        assert_eq!(TrustLevel::from_score(70), TrustLevel::Warning);
        assert_eq!(TrustLevel::from_score(31), TrustLevel::Warning);
        assert_eq!(TrustLevel::from_score(30), TrustLevel::Critical);
        assert_eq!(TrustLevel::from_score(0), TrustLevel::Critical);
    }

    #[test]
    fn level_round_trips_through_strings() {
        for level in [TrustLevel::Trusted, TrustLevel::Warning, TrustLevel::Critical] {
            assert_eq!(TrustLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(TrustLevel::parse("banned"), None);
    }

    #[test]
    fn ledger_serializes_as_flat_object() {
        let mut ledger = TrustLedger::new();
        ledger.set("123456789012345678", 70);
        ledger.set("987654321098765432", 0);

        let json = must_ok(serde_json::to_string(&ledger));
        assert_eq!(
            json,
            r#"{"123456789012345678":70,"987654321098765432":0}"#
        );

        let parsed: TrustLedger = must_ok(serde_json::from_str(&json));
        assert_eq!(parsed, ledger);
    }

    #[test]
    fn ledger_rejects_scores_above_max_on_validate() {
        let parsed: TrustLedger = must_ok(serde_json::from_str(r#"{"u1": 150}"#));
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn ledger_deserialization_rejects_negative_scores() {
        let parsed = serde_json::from_str::<TrustLedger>(r#"{"u1": -5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn blank_user_id_is_rejected() {
        assert!(validate_user_id("  ").is_err());
        assert!(validate_user_id("123").is_ok());
    }

    #[test]
    fn score_override_bounds_are_inclusive() {
        assert_eq!(must_ok(validate_score(0)), 0);
        assert_eq!(must_ok(validate_score(100)), 100);
        assert_eq!(validate_score(-1), Err(TrustError::ScoreOutOfRange(-1)));
        assert_eq!(validate_score(101), Err(TrustError::ScoreOutOfRange(101)));
    }

    #[test]
    fn ban_messages_carry_origin_and_reason() {
        let notice = auto_ban_notice("Example Server", "Warned: spam");
        assert!(notice.contains("Example Server"));
        assert!(notice.contains("Warned: spam"));
        assert_eq!(
            auto_ban_reason("Kicked: raiding"),
            "Trust score reached 0. Last action: Kicked: raiding"
        );
        assert_eq!(ADMIN_SET_ZERO_REASON, "Trust score set to 0 by admin.");
    }
}
