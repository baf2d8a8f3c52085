use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Development phase a task belongs to, inferred from labels/name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Design,
    Implement,
    Test,
    Docs,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Design => "design",
            Self::Implement => "implement",
            Self::Test => "test",
            Self::Docs => "docs",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "design" => Ok(Self::Design),
            "implement" => Ok(Self::Implement),
            "test" => Ok(Self::Test),
            "docs" => Ok(Self::Docs),
            other => Err(PhaseParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Phase`] string.
#[derive(Debug, Clone)]
pub struct PhaseParseError(pub String);

impl fmt::Display for PhaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid phase: {:?}", self.0)
    }
}

impl std::error::Error for PhaseParseError {}

// ---------------------------------------------------------------------------

/// Task priority. The scheduler's scoring formula weighs this as
/// `priority_rank` (Urgent=4 .. Low=1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// The scheduler's `priority_rank` weight (Urgent=4, High=3, Medium=2, Low=1).
    pub fn rank(self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(PriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------

/// Artifact content kind, used to derive the canonical storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Api,
    Design,
    Architecture,
    Specification,
    Reference,
    Other,
}

impl ArtifactType {
    /// The canonical directory this artifact type is stored under, relative
    /// to the project workspace root.
    pub fn canonical_dir(self) -> &'static str {
        match self {
            Self::Api => "docs/api",
            Self::Design => "docs/design",
            Self::Architecture => "docs/architecture",
            Self::Specification => "docs/spec",
            Self::Reference => "docs/reference",
            Self::Other => "docs/other",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Api => "api",
            Self::Design => "design",
            Self::Architecture => "architecture",
            Self::Specification => "specification",
            Self::Reference => "reference",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactType {
    type Err = ArtifactTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "design" => Ok(Self::Design),
            "architecture" => Ok(Self::Architecture),
            "specification" => Ok(Self::Specification),
            "reference" => Ok(Self::Reference),
            "other" => Ok(Self::Other),
            other => Err(ArtifactTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ArtifactType`] string.
#[derive(Debug, Clone)]
pub struct ArtifactTypeParseError(pub String);

impl fmt::Display for ArtifactTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid artifact type: {:?}", self.0)
    }
}

impl std::error::Error for ArtifactTypeParseError {}

// ---------------------------------------------------------------------------

/// Reason a lease was released, recorded for audit/debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Completed,
    Cancelled,
    Expired,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl FromStr for ReleaseReason {
    type Err = ReleaseReasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(ReleaseReasonParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ReleaseReason`] string.
#[derive(Debug, Clone)]
pub struct ReleaseReasonParseError(pub String);

impl fmt::Display for ReleaseReasonParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid release reason: {:?}", self.0)
    }
}

impl std::error::Error for ReleaseReasonParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A project: the ProjectRegistry's unit of ownership, backed by exactly one
/// `KanbanProvider` board.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub provider_config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// A unit of work on a project's task graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub phase: Option<Phase>,
    pub priority: Priority,
    pub required_skills: Vec<String>,
    pub estimated_hours: f64,
    pub parent_id: Option<Uuid>,
    pub subtask_index: Option<i32>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Technical-constraint tokens extracted from the project description
    /// (e.g. `vanilla-js`, `no-orm`), carried verbatim into the context
    /// preamble.
    pub labels: Vec<String>,
}

/// A forward dependency edge: `task_id` depends on `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

/// A registered worker agent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    pub skills: Vec<String>,
    pub capacity: i32,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A time-bounded assignment of a task to an agent. Owned by AssignmentStore;
/// `(project_id, task_id)` is unique among live leases.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lease {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewed_count: i32,
    pub generation: i64,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
}

impl Lease {
    /// A lease is live iff it hasn't been released.
    pub fn is_live(&self) -> bool {
        self.released_at.is_none()
    }

    /// A live lease is expired once `now` passes `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_live() && self.expires_at < now
    }
}

/// An append-only, immutable decision record authored by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Decision {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub what: String,
    pub why: String,
    pub impact: String,
    pub affects_tasks: Vec<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

/// Metadata for a file artifact produced by an agent. Content lives on disk
/// under the artifact type's canonical directory; this row is the index.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Artifact {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub filename: String,
    pub artifact_type: ArtifactType,
    pub relative_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_roundtrip() {
        for s in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Done,
        ] {
            assert_eq!(s.to_string().parse::<TaskStatus>().unwrap(), s);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn phase_roundtrip() {
        for p in [Phase::Design, Phase::Implement, Phase::Test, Phase::Docs] {
            assert_eq!(p.to_string().parse::<Phase>().unwrap(), p);
        }
    }

    #[test]
    fn phase_ordering() {
        assert!(Phase::Design < Phase::Implement);
        assert!(Phase::Implement < Phase::Test);
        assert!(Phase::Test < Phase::Docs);
    }

    #[test]
    fn priority_roundtrip_and_rank() {
        assert_eq!(Priority::Urgent.rank(), 4);
        assert_eq!(Priority::High.rank(), 3);
        assert_eq!(Priority::Medium.rank(), 2);
        assert_eq!(Priority::Low.rank(), 1);
        for p in [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent] {
            assert_eq!(p.to_string().parse::<Priority>().unwrap(), p);
        }
    }

    #[test]
    fn artifact_type_roundtrip_and_dir() {
        assert_eq!(ArtifactType::Api.canonical_dir(), "docs/api");
        for t in [
            ArtifactType::Api,
            ArtifactType::Design,
            ArtifactType::Architecture,
            ArtifactType::Specification,
            ArtifactType::Reference,
            ArtifactType::Other,
        ] {
            assert_eq!(t.to_string().parse::<ArtifactType>().unwrap(), t);
        }
    }

    #[test]
    fn release_reason_roundtrip() {
        for r in [
            ReleaseReason::Completed,
            ReleaseReason::Cancelled,
            ReleaseReason::Expired,
        ] {
            assert_eq!(r.to_string().parse::<ReleaseReason>().unwrap(), r);
        }
    }

    #[test]
    fn release_reason_invalid() {
        assert!("bogus".parse::<ReleaseReason>().is_err());
    }

    #[test]
    fn lease_liveness() {
        let now = Utc::now();
        let mut lease = Lease {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            agent_id: "agent-1".to_owned(),
            granted_at: now,
            expires_at: now + chrono::Duration::seconds(60),
            renewed_count: 0,
            generation: 1,
            released_at: None,
            release_reason: None,
        };
        assert!(lease.is_live());
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + chrono::Duration::seconds(120)));

        lease.released_at = Some(now);
        lease.release_reason = Some(ReleaseReason::Completed);
        assert!(!lease.is_live());
        assert!(!lease.is_expired(now + chrono::Duration::seconds(120)));
    }
}
