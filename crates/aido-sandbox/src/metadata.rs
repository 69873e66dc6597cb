//! Persisted sandbox state: metadata, run records, and events

use aido_spec::SandboxConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a sandbox
///
/// `created -> running -> {completed | failed}`. A sandbox may run again after
/// completing or failing. `Destroyed` is never persisted; destroying a sandbox
/// removes its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Created,
    Running,
    Completed,
    Failed,
    Destroyed,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxStatus::Created => "created",
            SandboxStatus::Running => "running",
            SandboxStatus::Completed => "completed",
            SandboxStatus::Failed => "failed",
            SandboxStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Task exited 0 and every output matched the policy
    Succeeded,
    /// Task exited non-zero
    Failed,
    /// Execution timeout elapsed and the container was stopped
    TimedOut,
    /// Task wrote files outside the declared outputs
    PolicyViolation,
}

impl RunOutcome {
    pub fn is_success(self) -> bool {
        self == RunOutcome::Succeeded
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::PolicyViolation => "policy_violation",
        };
        f.write_str(s)
    }
}

/// One execution attempt. Appended to [`SandboxMetadata::runs`] and never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// Task path as given by the caller
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub exit_code: i64,
    pub outcome: RunOutcome,
    /// Paths relative to the sandbox directory, e.g. `outputs/stdout.log`
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Persisted record for one sandbox (`sandbox.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: SandboxStatus,
    pub config: SandboxConfig,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
}

impl SandboxMetadata {
    /// When the TTL runs out, or `None` if the TTL cannot be parsed
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl_ms = self.config.ttl_ms().ok()?;
        let ttl = Duration::try_milliseconds(i64::try_from(ttl_ms).ok()?)?;
        self.created_at.checked_add_signed(ttl)
    }

    /// `now - created_at > ttl`. An unparsable TTL counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now > expires_at,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn last_run(&self) -> Option<&RunRecord> {
        self.runs.last()
    }
}

/// One line of `events.log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl Event {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            detail: Map::new(),
        }
    }

    /// Attach a detail field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// Event names written by the store and the run pipeline
pub mod events {
    pub const SANDBOX_CREATED: &str = "sandbox_created";
    pub const SANDBOX_DESTROYED: &str = "sandbox_destroyed";
    pub const RUN_STARTED: &str = "run_started";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const RUN_ERROR: &str = "run_error";
    pub const IMAGE_PULLED: &str = "image_pulled";
    pub const INPUTS_STAGED: &str = "inputs_staged";
    pub const CONTAINER_STARTED: &str = "container_started";
    pub const EXECUTION_TIMEOUT: &str = "execution_timeout";
    pub const OUTPUT_POLICY_VIOLATION: &str = "output_policy_violation";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(ttl: &str, created_at: DateTime<Utc>) -> SandboxMetadata {
        SandboxMetadata {
            id: "abc123def456".to_string(),
            created_at,
            status: SandboxStatus::Created,
            config: SandboxConfig::new("demo", "python", ttl),
            runs: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_display_matches_serialized_form() {
        for outcome in [
            RunOutcome::Succeeded,
            RunOutcome::Failed,
            RunOutcome::TimedOut,
            RunOutcome::PolicyViolation,
        ] {
            let serialized = serde_json::to_value(outcome).unwrap();
            assert_eq!(serialized, serde_json::Value::String(outcome.to_string()));
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let created = Utc::now();
        let m = metadata("1m", created);

        assert!(!m.is_expired_at(created));
        assert!(!m.is_expired_at(created + Duration::seconds(60)));
        assert!(m.is_expired_at(created + Duration::seconds(61)));
    }

    #[test]
    fn test_unparsable_ttl_is_expired() {
        let created = Utc::now();
        let m = metadata("whenever", created);
        assert!(m.expires_at().is_none());
        assert!(m.is_expired_at(created));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SandboxStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&RunOutcome::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }

    #[test]
    fn test_event_detail_is_omitted_when_empty() {
        let line = serde_json::to_string(&Event::new("sandbox_created")).unwrap();
        assert!(!line.contains("detail"));

        let line = serde_json::to_string(&Event::new("run_started").with("run_id", "run-1")).unwrap();
        assert!(line.contains("\"run_id\":\"run-1\""));
    }
}
