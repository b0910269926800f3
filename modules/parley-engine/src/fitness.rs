//! LLM-as-judge transcript scoring.

use std::sync::Arc;

use llm_client::ChatResponder;
use serde_json::Value;
use tracing::warn;

use parley_common::{
    format_transcript, IssueBreakdown, MetricScores, Turn, Verdict, ISSUE_CATEGORIES, METRIC_KEYS,
    NEUTRAL_SCORE,
};

use crate::parse::{first_json_object, ParseResult};

const JUDGE_MAX_TOKENS: u32 = 600;

const HINDI_NOTE: &str = "\n\nNOTE: This conversation is conducted in Hindi (Devanagari script). \
Evaluate naturalness based on Hindi language norms and cultural appropriateness for the Indian \
collections context.";

/// Scores one transcript against a scenario goal. Never fails: judge call or
/// parse problems collapse to the neutral midpoint verdict so a running
/// evolution cycle is never aborted by a single bad evaluation.
pub struct FitnessEvaluator {
    llm: Arc<dyn ChatResponder>,
}

impl FitnessEvaluator {
    pub fn new(llm: Arc<dyn ChatResponder>) -> Self {
        Self { llm }
    }

    pub async fn evaluate(&self, transcript: &[Turn], goal: &str) -> Verdict {
        let prompt = judge_prompt(transcript, goal);

        match self.llm.respond(&prompt, &[], Some(JUDGE_MAX_TOKENS)).await {
            Ok(raw) => {
                let result = parse_verdict(&raw);
                if result.is_fallback() {
                    warn!("judge response was not parseable, using neutral verdict");
                }
                result.into_inner()
            }
            Err(e) => {
                warn!(error = %e, "evaluation call failed, using neutral verdict");
                Verdict::neutral(format!("Evaluation failed: {e}"))
            }
        }
    }
}

/// Devanagari code-point scan; the sandbox's only non-default language.
pub fn contains_devanagari(transcript: &[Turn]) -> bool {
    transcript
        .iter()
        .any(|t| t.text.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c)))
}

fn judge_prompt(transcript: &[Turn], goal: &str) -> String {
    let formatted = format_transcript(transcript);
    let language_note = if contains_devanagari(transcript) {
        HINDI_NOTE
    } else {
        ""
    };

    format!(
        r#"Evaluate this conversation between a company agent (Agent A) and a customer (Agent B):

{formatted}

Scenario Goal: {goal}{language_note}

Score 1-10 for each metric. Focus ONLY on Agent A, not the customer:

1. goal_completion: Did the customer agree to the outcome the scenario goal describes?
   - 10: Customer fully agreed to the goal outcome or a reasonable concrete plan
   - 7-9: Customer showed willingness, partial agreement reached
   - 4-6: Some progress but no concrete commitment
   - 1-3: No progress, customer refused or conversation failed

2. conversational_quality: How natural and professional was the conversation?
   - 10: Natural flow, no repetitions, appropriate tone, no hallucinations
   - 7-9: Minor issues but overall professional
   - 4-6: Noticeable repetitions, awkward phrasing, or tone mismatch
   - 1-3: Robotic, repetitive, or clearly AI-generated sounding

3. compliance: Did the agent avoid threats, harassment, and misleading claims?
   - 10: Fully professional, respectful even under pressure, no policy violations
   - 7-9: Minor tone issues but no violations
   - 4-6: Borderline aggressive, misleading statements, or pushy tactics
   - 1-3: Clear threats, false claims, harassment, or abusive language

4. adaptation_quality: Did the agent detect and adapt to the customer's emotional state?
   - 10: Correctly identified customer mood and adjusted strategy (de-escalated when hostile, showed empathy when desperate)
   - 7-9: Showed some adaptation but could have responded better to emotional cues
   - 4-6: Ignored obvious emotional signals, used the same approach regardless of customer behavior
   - 1-3: Completely misread the customer (pushed harder when hostile, was cold when cooperative)

Also identify SPECIFIC ISSUES in categories for targeted improvement.

Return ONLY valid JSON in this exact format:
{{
    "goal_completion": X,
    "conversational_quality": X,
    "compliance": X,
    "adaptation_quality": X,
    "feedback": "brief overall explanation",
    "structured_issues": {{
        "opening": "issue with opening/disclosure or null",
        "emotional_detection": "did agent correctly identify customer mood? describe any misses",
        "de_escalation": "if customer was hostile, how well did agent de-escalate? or null if not applicable",
        "empathy": "did agent show appropriate empathy? specific moments missed",
        "objection_handling": "how well were objections/excuses handled?",
        "closing": "did agent get a specific commitment? what was missed?",
        "compliance_issues": "any specific compliance violations or concerns",
        "adaptation_moments": "specific turns where agent should have adapted differently"
    }}
}}"#
    )
}

/// Parse the judge's raw response into a verdict.
///
/// Required fields: goal_completion, conversational_quality, compliance,
/// feedback. `adaptation_quality` defaults to the midpoint when absent (old
/// judge rubric); `structured_issues` defaults to empty. Anything else yields
/// the neutral fallback.
pub fn parse_verdict(raw: &str) -> ParseResult<Verdict> {
    let Some(block) = first_json_object(raw) else {
        return ParseResult::Fallback(Verdict::neutral("Evaluation parse error"));
    };

    let Ok(value) = serde_json::from_str::<Value>(block) else {
        return ParseResult::Fallback(Verdict::neutral("Evaluation parse error"));
    };

    let required = ["goal_completion", "conversational_quality", "compliance"];
    let has_required = required.iter().all(|k| value.get(*k).is_some())
        && value.get("feedback").and_then(Value::as_str).is_some();
    if !has_required {
        return ParseResult::Fallback(Verdict::neutral("Evaluation parse error"));
    }

    let mut scores = MetricScores::default();
    for key in METRIC_KEYS {
        let score = value
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(NEUTRAL_SCORE);
        scores.set(key, score);
    }

    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut issues = IssueBreakdown::default();
    if let Some(structured) = value.get("structured_issues").and_then(Value::as_object) {
        for category in ISSUE_CATEGORIES {
            if let Some(note) = structured.get(category).and_then(Value::as_str) {
                let note = note.trim();
                if !note.is_empty() && note != "null" {
                    issues.0.insert(category.to_string(), note.to_string());
                }
            }
        }
    }

    ParseResult::Parsed(Verdict {
        scores,
        feedback,
        structured_issues: issues,
    })
}
