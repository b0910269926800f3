//! Distills recent evaluations into reusable behavioral rules.

use std::sync::Arc;

use llm_client::ChatResponder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use parley_common::{Evaluation, ISSUE_CATEGORIES};

use crate::parse::first_json_object;

const PATTERN_MAX_TOKENS: u32 = 600;
const NOTES_PER_CATEGORY: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub pattern: String,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub example_phrase: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern: String,
    #[serde(default)]
    pub why_fails: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternReport {
    #[serde(default)]
    pub success_patterns: Vec<SuccessPattern>,
    #[serde(default)]
    pub failure_patterns: Vec<FailurePattern>,
    #[serde(default)]
    pub key_insight: String,
}

impl PatternReport {
    /// Best-effort fallback: mutation proceeds without pattern guidance.
    pub fn empty(insight: impl Into<String>) -> Self {
        Self {
            key_insight: insight.into(),
            ..Default::default()
        }
    }
}

pub struct PatternExtractor {
    llm: Arc<dyn ChatResponder>,
}

impl PatternExtractor {
    pub fn new(llm: Arc<dyn ChatResponder>) -> Self {
        Self { llm }
    }

    /// Extraction is guidance, not a requirement: any call or parse failure
    /// returns an empty report and mutation continues without it.
    pub async fn extract(
        &self,
        evaluations: &[Evaluation],
        success_examples: &str,
        failure_examples: &str,
    ) -> PatternReport {
        let prompt = pattern_prompt(evaluations, success_examples, failure_examples);

        let raw = match self.llm.respond(&prompt, &[], Some(PATTERN_MAX_TOKENS)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "pattern extraction call failed");
                return PatternReport::empty("Unable to extract patterns");
            }
        };

        match first_json_object(&raw).and_then(|block| serde_json::from_str(block).ok()) {
            Some(report) => report,
            None => {
                warn!("pattern extraction response was not parseable");
                PatternReport::empty("Unable to extract patterns")
            }
        }
    }
}

/// Collect up to `NOTES_PER_CATEGORY` issue notes per category across the
/// supplied evaluations, in category order. Categories with no notes render
/// as "None noted".
pub fn aggregate_issues(evaluations: &[Evaluation]) -> Vec<(&'static str, String)> {
    ISSUE_CATEGORIES
        .iter()
        .map(|&category| {
            let notes: Vec<&str> = evaluations
                .iter()
                .filter_map(|e| e.structured_issues.note(category))
                .take(NOTES_PER_CATEGORY)
                .collect();
            let joined = if notes.is_empty() {
                "None noted".to_string()
            } else {
                notes.join("; ")
            };
            (category, joined)
        })
        .collect()
}

fn pattern_prompt(
    evaluations: &[Evaluation],
    success_examples: &str,
    failure_examples: &str,
) -> String {
    let issue_lines = aggregate_issues(evaluations)
        .into_iter()
        .map(|(category, notes)| format!("{category}: {notes}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Analyze these agent-customer conversations to extract SPECIFIC PATTERNS.

=== SUCCESSFUL CONVERSATION EXCERPTS (score >= 8) ===
{success_examples}

=== FAILED CONVERSATION EXCERPTS (score < 5) ===
{failure_examples}

=== SPECIFIC ISSUES IDENTIFIED ===
{issue_lines}

=== YOUR TASK ===
Extract the TOP 5 specific behavioral patterns that differentiate success from failure:

For each pattern, identify:
1. What successful agents DO that failed agents DON'T
2. What triggers this behavior (customer signal to watch for)
3. Exact phrasing or approach that works

Return a JSON object:
{{
    "success_patterns": [
        {{
            "pattern": "description of what works",
            "trigger": "customer signal that should activate this",
            "example_phrase": "actual words/approach to use"
        }}
    ],
    "failure_patterns": [
        {{
            "pattern": "what to avoid",
            "why_fails": "why this approach backfires"
        }}
    ],
    "key_insight": "single most important insight for improvement"
}}"#
    )
}
