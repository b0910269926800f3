//! Domain types shared across the workspace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Personas and scenarios
// ---------------------------------------------------------------------------

/// An agent identity with a live instruction prompt. `system_prompt` is the
/// mutable "live" text; it is rewritten only when an evolution cycle commits
/// a winner or a historical version is activated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    pub personality: Option<String>,
    pub mood: Option<String>,
    pub voice_id: Option<String>,
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
}

/// A fixed opposing setup used to test a persona: counterpart agent, opening
/// context, success goal, turn budget. Immutable once referenced by runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: Uuid,
    pub name: String,
    pub context: String,
    pub goal: Option<String>,
    pub persona_a_id: Uuid,
    pub persona_b_id: Uuid,
    pub max_turns: i32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Simulation runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    A,
    B,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::A => "A",
            Speaker::B => "B",
        }
    }
}

/// One utterance in a simulated conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub persona_name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One executed conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: Uuid,
    pub scenario_id: Uuid,
    pub transcript: Vec<Turn>,
    pub status: RunStatus,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Render a transcript the way the judge and the transcript index see it:
/// one `Name (A): text` line per turn.
pub fn format_transcript(transcript: &[Turn]) -> String {
    transcript
        .iter()
        .map(|t| format!("{} ({}): {}", t.persona_name, t.speaker.as_str(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Evaluations
// ---------------------------------------------------------------------------

/// Canonical metric keys, each scored 1-10 by the judge.
pub const METRIC_KEYS: [&str; 4] = [
    "goal_completion",
    "conversational_quality",
    "compliance",
    "adaptation_quality",
];

/// Legacy metric names still present in old evaluation rows, mapped to their
/// canonical key. Consulted only at the `MetricScores` boundary.
pub const METRIC_ALIASES: [(&str, &str); 2] = [
    ("goal_completion", "task_completion"),
    ("conversational_quality", "naturalness"),
];

/// Midpoint verdict used whenever a metric is absent or judging failed.
pub const NEUTRAL_SCORE: f64 = 5.0;

/// Issue categories the judge reports for targeted mutation guidance.
pub const ISSUE_CATEGORIES: [&str; 8] = [
    "opening",
    "emotional_detection",
    "de_escalation",
    "empathy",
    "objection_handling",
    "closing",
    "compliance_issues",
    "adaptation_moments",
];

/// Named metric scores with alias-tolerant lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricScores(pub BTreeMap<String, f64>);

impl MetricScores {
    /// Look up a canonical metric, falling back to its legacy alias and then
    /// to the neutral midpoint.
    pub fn get(&self, key: &str) -> f64 {
        if let Some(v) = self.0.get(key) {
            return *v;
        }
        for (canonical, alias) in METRIC_ALIASES {
            if canonical == key {
                if let Some(v) = self.0.get(alias) {
                    return *v;
                }
            }
        }
        NEUTRAL_SCORE
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), value);
    }

    /// Average across the canonical metric set.
    pub fn overall(&self) -> f64 {
        let sum: f64 = METRIC_KEYS.iter().map(|k| self.get(k)).sum();
        sum / METRIC_KEYS.len() as f64
    }

    pub fn neutral() -> Self {
        let mut scores = Self::default();
        for key in METRIC_KEYS {
            scores.set(key, NEUTRAL_SCORE);
        }
        scores
    }
}

/// Free-text issue notes keyed by category. Categories the judge returned as
/// null or empty are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueBreakdown(pub BTreeMap<String, String>);

impl IssueBreakdown {
    pub fn note(&self, category: &str) -> Option<&str> {
        self.0.get(category).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Judge output for one transcript, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub scores: MetricScores,
    pub feedback: String,
    pub structured_issues: IssueBreakdown,
}

impl Verdict {
    pub fn overall(&self) -> f64 {
        self.scores.overall()
    }

    /// The documented fallback verdict: every metric at the midpoint.
    pub fn neutral(feedback: impl Into<String>) -> Self {
        Self {
            scores: MetricScores::neutral(),
            feedback: feedback.into(),
            structured_issues: IssueBreakdown::default(),
        }
    }
}

/// Persisted verdict for one completed run. One-to-one with `SimulationRun`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub run_id: Uuid,
    pub scores: MetricScores,
    pub overall_score: f64,
    pub feedback: String,
    pub structured_issues: IssueBreakdown,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Version lineage
// ---------------------------------------------------------------------------

/// An immutable snapshot of a persona's prompt at a point in evolution.
/// `version` is 1-based and gap-free per persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVersion {
    pub id: Uuid,
    pub persona_id: Uuid,
    pub version: i32,
    pub system_prompt: String,
    pub fitness_score: f64,
    pub baseline_score: f64,
    pub parent_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One tested-but-possibly-rejected candidate belonging to an `AgentVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationAttempt {
    pub id: Uuid,
    pub version_id: Uuid,
    pub mutation_index: i32,
    pub mutated_prompt: String,
    pub avg_score: f64,
    pub is_winner: bool,
    pub mutation_metadata: serde_json::Value,
    pub reasoning_prompt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgentVersion {
    pub persona_id: Uuid,
    pub version: i32,
    pub system_prompt: String,
    pub fitness_score: f64,
    pub baseline_score: f64,
    pub parent_version_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewMutationAttempt {
    pub mutation_index: i32,
    pub mutated_prompt: String,
    pub avg_score: f64,
    pub is_winner: bool,
    pub mutation_metadata: serde_json::Value,
    pub reasoning_prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionWithAttempts {
    pub version: AgentVersion,
    pub attempts: Vec<MutationAttempt>,
}

// ---------------------------------------------------------------------------
// Transcript search
// ---------------------------------------------------------------------------

/// Metadata stored alongside an indexed transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMeta {
    pub persona_a: String,
    pub persona_b: String,
    pub scenario: String,
    pub overall_score: f64,
}

/// Predicates supported by the transcript index: a numeric range on the
/// stored overall score and equality on the agent-side persona name.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub persona_a: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub run_id: Uuid,
    pub distance: f64,
    pub document: String,
    pub metadata: TranscriptMeta,
}
