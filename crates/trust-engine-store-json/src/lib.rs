//! Write-through JSON persistence and side-effect orchestration for the
//! trust score engine.
//!
//! The store owns the resolved score file path and the in-memory ledger.
//! Every mutation rewrites the whole file before returning; a mutation whose
//! write fails is rolled back in memory so callers never observe a score
//! that did not durably land.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::Serialize;
use trust_engine_core::{
    auto_ban_notice, auto_ban_reason, format_rfc3339, now_utc, validate_score, validate_user_id,
    AutoBanStatus, ModerationContext, ScoreChange, TrustLedger, TrustLevel,
    ADMIN_SET_ZERO_REASON, DEFAULT_SCORE, MIN_SCORE,
};
use ulid::Ulid;

/// Fixed file name the discovery heuristic searches for.
pub const TRUST_FILE_NAME: &str = "trust_scores.json";

pub struct JsonScoreStore {
    path: PathBuf,
    ledger: Mutex<TrustLedger>,
}

impl JsonScoreStore {
    /// Opens the store at a fixed path, loading the persisted mapping when
    /// the file exists and starting empty otherwise.
    ///
    /// # Errors
    /// Fails closed on an unreadable or malformed file, including stored
    /// scores above 100.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = if path.exists() {
            let body = fs::read_to_string(&path)
                .with_context(|| format!("failed to read trust score file {}", path.display()))?;
            let ledger: TrustLedger = serde_json::from_str(&body)
                .with_context(|| format!("malformed trust score file {}", path.display()))?;
            ledger
                .validate()
                .with_context(|| format!("malformed trust score file {}", path.display()))?;
            log::debug!(
                "loaded {} trust records from {}",
                ledger.len(),
                path.display()
            );
            ledger
        } else {
            log::debug!("no trust score file at {}, starting empty", path.display());
            TrustLedger::new()
        };

        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    /// Opens the store at the location resolved by [`discover_score_file`].
    ///
    /// # Errors
    /// Same failure modes as [`JsonScoreStore::open`].
    pub fn open_discovered() -> Result<Self> {
        Self::open(discover_score_file(TRUST_FILE_NAME))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored score for a user, or the default of 100 when unseen.
    #[must_use]
    pub fn get_score(&self, user_id: &str) -> u8 {
        self.lock().get(user_id)
    }

    /// Clone of the full ledger for display surfaces.
    #[must_use]
    pub fn snapshot(&self) -> TrustLedger {
        self.lock().clone()
    }

    /// Applies a signed delta with clamping, persists, and fires the
    /// auto-ban trigger when the resulting score is 0.
    ///
    /// The trigger fires on every mutation that leaves the score at 0, so a
    /// negative delta against an already-zero score invokes the gateway ban
    /// again; gateway implementations must tolerate an already-banned user.
    ///
    /// # Errors
    /// Fails on a blank user id or when the write-through persist fails; a
    /// failed persist leaves the previous score in place. Gateway failures
    /// never propagate: a failed notification is ignored and a failed ban is
    /// reported to the audit sink with the score remaining at 0.
    pub fn apply_delta(
        &self,
        user_id: &str,
        delta: i64,
        reason: &str,
        ctx: &ModerationContext<'_>,
    ) -> Result<ScoreChange> {
        validate_user_id(user_id)?;

        let (previous, score) = {
            let mut ledger = self.lock();
            let previous = ledger.get(user_id);
            let score = trust_engine_core::apply_delta(previous, delta);
            self.write_through(&mut ledger, user_id, score)?;
            (previous, score)
        };

        // Lock released before any platform I/O happens.
        let auto_ban = if score == MIN_SCORE {
            self.trigger_auto_ban(user_id, reason, &auto_ban_reason(reason), ctx)
        } else {
            AutoBanStatus::NotTriggered
        };

        build_change(user_id, previous, score, auto_ban)
    }

    /// Administrative override: sets the score directly without delta
    /// arithmetic, persists, and fires the same auto-ban trigger as
    /// [`JsonScoreStore::apply_delta`] when the new score is 0. The ban is
    /// recorded with the dedicated reason [`ADMIN_SET_ZERO_REASON`].
    ///
    /// # Errors
    /// Rejects scores outside `0..=100` before any mutation; otherwise the
    /// same failure modes as [`JsonScoreStore::apply_delta`].
    pub fn set_score(
        &self,
        user_id: &str,
        score: i64,
        ctx: &ModerationContext<'_>,
    ) -> Result<ScoreChange> {
        validate_user_id(user_id)?;
        let score = validate_score(score)?;

        let previous = {
            let mut ledger = self.lock();
            let previous = ledger.get(user_id);
            self.write_through(&mut ledger, user_id, score)?;
            previous
        };

        let auto_ban = if score == MIN_SCORE {
            self.trigger_auto_ban(user_id, ADMIN_SET_ZERO_REASON, ADMIN_SET_ZERO_REASON, ctx)
        } else {
            AutoBanStatus::NotTriggered
        };

        build_change(user_id, previous, score, auto_ban)
    }

    /// Unconditionally restores a user to the default score of 100.
    ///
    /// 100 is never a ban threshold, so no side effect can fire.
    ///
    /// # Errors
    /// Fails on a blank user id or when the write-through persist fails.
    pub fn reset(&self, user_id: &str) -> Result<ScoreChange> {
        validate_user_id(user_id)?;

        let previous = {
            let mut ledger = self.lock();
            let previous = ledger.get(user_id);
            self.write_through(&mut ledger, user_id, DEFAULT_SCORE)?;
            previous
        };

        build_change(user_id, previous, DEFAULT_SCORE, AutoBanStatus::NotTriggered)
    }

    fn lock(&self) -> MutexGuard<'_, TrustLedger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records the score and rewrites the whole file. On write failure the
    /// in-memory entry reverts to its prior state.
    fn write_through(&self, ledger: &mut TrustLedger, user_id: &str, score: u8) -> Result<()> {
        let prior = ledger.set(user_id, score);
        if let Err(err) = persist(&self.path, ledger) {
            match prior {
                Some(value) => {
                    ledger.set(user_id, value);
                }
                None => {
                    ledger.remove(user_id);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn trigger_auto_ban(
        &self,
        user_id: &str,
        reason: &str,
        ban_reason: &str,
        ctx: &ModerationContext<'_>,
    ) -> AutoBanStatus {
        // Best-effort notification before the ban lands.
        if let Err(err) = ctx
            .gateway
            .notify(user_id, &auto_ban_notice(ctx.origin, reason))
        {
            log::debug!("auto-ban notification for user {user_id} not delivered: {err}");
        }

        match ctx.gateway.ban(user_id, ban_reason) {
            Ok(()) => {
                ctx.audit.report(&format!(
                    "User {user_id} has been automatically banned for reaching 0 trust score."
                ));
                AutoBanStatus::Banned
            }
            Err(err) => {
                log::warn!("auto-ban for user {user_id} failed: {err}");
                ctx.audit
                    .report(&format!("Failed to auto-ban user {user_id}: {err}"));
                AutoBanStatus::BanFailed
            }
        }
    }
}

fn build_change(
    user_id: &str,
    previous: u8,
    score: u8,
    auto_ban: AutoBanStatus,
) -> Result<ScoreChange> {
    Ok(ScoreChange {
        change_id: Ulid::new(),
        user_id: user_id.to_string(),
        previous,
        score,
        level: TrustLevel::from_score(score),
        auto_ban,
        recorded_at: format_rfc3339(now_utc())?,
    })
}

/// Rewrites the whole ledger, pretty-printed with 4-space indentation to
/// match the original operator-editable file format.
fn persist(path: &Path, ledger: &TrustLedger) -> Result<()> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    ledger
        .serialize(&mut serializer)
        .context("failed to serialize trust scores")?;
    body.push(b'\n');
    fs::write(path, body)
        .with_context(|| format!("failed to write trust score file {}", path.display()))
}

/// Resolves the score file location for operators who drop the file in a
/// common directory by hand.
///
/// Search order: working directory, then `~/Desktop`, `~/Documents`,
/// `~/Downloads`, and the home directory itself; then one level of
/// subdirectories inside Desktop and Documents. Falls back to the working
/// directory when the file is nowhere to be found.
#[must_use]
pub fn discover_score_file(file_name: &str) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut bases = vec![cwd.clone()];
    if let Some(home) = home_dir() {
        bases.push(home.join("Desktop"));
        bases.push(home.join("Documents"));
        bases.push(home.join("Downloads"));
        bases.push(home);
    }

    for base in &bases {
        let candidate = base.join(file_name);
        if candidate.exists() {
            return candidate;
        }
    }

    if let Some(home) = home_dir() {
        for base in [home.join("Desktop"), home.join("Documents")] {
            let Ok(entries) = fs::read_dir(&base) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let candidate = path.join(file_name);
                    if candidate.exists() {
                        return candidate;
                    }
                }
            }
        }
    }

    cwd.join(file_name)
}

/// Cross-platform home directory resolution.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
