//! Candidate prompt synthesis.

use std::sync::Arc;

use anyhow::Result;
use llm_client::{util::truncate_to_char_boundary, ChatResponder};
use serde_json::json;
use tracing::warn;

use parley_common::{
    Evaluation, MetricScores, SearchFilter, SearchHit, TranscriptIndex, METRIC_KEYS,
};

use crate::patterns::{PatternExtractor, PatternReport};

const SYNTHESIS_MAX_TOKENS: u32 = 800;
const SUCCESS_EXAMPLES: i64 = 5;
const FAILURE_EXAMPLES: i64 = 3;
const SUCCESS_SCORE_FLOOR: f64 = 8.0;
const FAILURE_SCORE_CEILING: f64 = 5.0;
const EXAMPLE_EXCERPT_BYTES: usize = 500;

/// One generated candidate plus everything needed to audit how it was made.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub mutated_prompt: String,
    pub metadata: serde_json::Value,
    /// The literal synthesis prompt sent to the generator.
    pub reasoning_prompt: String,
}

pub struct MutationGenerator {
    llm: Arc<dyn ChatResponder>,
    index: Arc<dyn TranscriptIndex>,
    patterns: PatternExtractor,
}

impl MutationGenerator {
    pub fn new(llm: Arc<dyn ChatResponder>, index: Arc<dyn TranscriptIndex>) -> Self {
        let patterns = PatternExtractor::new(llm.clone());
        Self {
            llm,
            index,
            patterns,
        }
    }

    pub async fn generate(
        &self,
        current_prompt: &str,
        persona_name: &str,
        evaluations: &[Evaluation],
        scenario_names: &[String],
    ) -> Result<Mutation> {
        let avg_scores = average_metrics(evaluations);
        let overall_avg = avg_scores.overall();

        // Exemplars are searched across ALL scenarios on purpose: patterns
        // that only hold in one scenario don't generalize.
        let success_examples = self
            .fetch_examples(
                &format!("{persona_name} successful conversation across contexts"),
                SUCCESS_EXAMPLES,
                SearchFilter {
                    min_score: Some(SUCCESS_SCORE_FLOOR),
                    max_score: None,
                    persona_a: Some(persona_name.to_string()),
                },
                "SUCCESS",
                "No high-scoring examples found",
            )
            .await;

        let failure_examples = self
            .fetch_examples(
                &format!("{persona_name} failed conversation"),
                FAILURE_EXAMPLES,
                SearchFilter {
                    min_score: None,
                    max_score: Some(FAILURE_SCORE_CEILING),
                    persona_a: Some(persona_name.to_string()),
                },
                "FAILURE",
                "No low-scoring examples found",
            )
            .await;

        let report = self
            .patterns
            .extract(evaluations, &success_examples, &failure_examples)
            .await;

        let feedback_used: Vec<String> = evaluations
            .iter()
            .filter(|e| !e.feedback.is_empty())
            .map(|e| e.feedback.clone())
            .collect();

        let reasoning_prompt = compose_synthesis_prompt(
            current_prompt,
            persona_name,
            scenario_names,
            evaluations.len(),
            &avg_scores,
            overall_avg,
            &report,
            &feedback_used,
        );

        let mutated_prompt = self
            .llm
            .respond(&reasoning_prompt, &[], Some(SYNTHESIS_MAX_TOKENS))
            .await?
            .trim()
            .to_string();

        let metadata = json!({
            "avg_scores": avg_scores,
            "overall_avg": overall_avg,
            "feedback_used": feedback_used,
            "success_examples": truncate_to_char_boundary(&success_examples, EXAMPLE_EXCERPT_BYTES),
            "failure_examples": truncate_to_char_boundary(&failure_examples, EXAMPLE_EXCERPT_BYTES),
            "patterns_extracted": report,
            "scenarios_tested": scenario_names,
            "num_evaluations": evaluations.len(),
        });

        Ok(Mutation {
            mutated_prompt,
            metadata,
            reasoning_prompt,
        })
    }

    /// Retrieval failure degrades to the "none found" placeholder; the
    /// mutation still proceeds without exemplars.
    async fn fetch_examples(
        &self,
        query: &str,
        k: i64,
        filter: SearchFilter,
        label: &str,
        none_found: &str,
    ) -> String {
        match self.index.search(query, k, &filter).await {
            Ok(hits) if !hits.is_empty() => format_examples(&hits, label),
            Ok(_) => none_found.to_string(),
            Err(e) => {
                warn!(error = %e, query, "example retrieval failed");
                none_found.to_string()
            }
        }
    }
}

/// Per-metric averages across evaluations, alias-tolerant via
/// `MetricScores::get`. Empty input averages to the neutral midpoint.
pub fn average_metrics(evaluations: &[Evaluation]) -> MetricScores {
    let mut averages = MetricScores::default();
    if evaluations.is_empty() {
        return MetricScores::neutral();
    }
    for key in METRIC_KEYS {
        let sum: f64 = evaluations.iter().map(|e| e.scores.get(key)).sum();
        averages.set(key, sum / evaluations.len() as f64);
    }
    averages
}

fn format_examples(hits: &[SearchHit], label: &str) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "{label} EXAMPLE (score {}):\n{}...",
                hit.metadata.overall_score,
                truncate_to_char_boundary(&hit.document, EXAMPLE_EXCERPT_BYTES)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[allow(clippy::too_many_arguments)]
fn compose_synthesis_prompt(
    current_prompt: &str,
    persona_name: &str,
    scenario_names: &[String],
    num_evaluations: usize,
    avg_scores: &MetricScores,
    overall_avg: f64,
    report: &PatternReport,
    feedback: &[String],
) -> String {
    let scenario_list = scenario_names
        .iter()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");

    let success_pattern_text = if report.success_patterns.is_empty() {
        "No clear success patterns found".to_string()
    } else {
        report
            .success_patterns
            .iter()
            .take(5)
            .map(|p| {
                format!(
                    "  - {} (Trigger: {}) Example: \"{}\"",
                    p.pattern, p.trigger, p.example_phrase
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let failure_pattern_text = if report.failure_patterns.is_empty() {
        "No clear failure patterns found".to_string()
    } else {
        report
            .failure_patterns
            .iter()
            .take(3)
            .map(|p| format!("  - AVOID: {} (Why: {})", p.pattern, p.why_fails))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let key_insight = if report.key_insight.is_empty() {
        "No clear insight extracted"
    } else {
        &report.key_insight
    };

    let feedback_text = feedback
        .iter()
        .map(|fb| format!("- {fb}"))
        .collect::<Vec<_>>()
        .join("\n");

    let scenario_count = scenario_names.len();

    format!(
        r#"You are evolving an AI agent's system prompt to improve performance across MULTIPLE scenarios.

CURRENT PROMPT:
{current_prompt}

TESTED ACROSS {scenario_count} SCENARIOS:
{scenario_list}

PERFORMANCE DATA (last {num_evaluations} simulations across these scenarios):
- Average goal completion: {gc:.1}/10
- Average conversational quality: {cq:.1}/10
- Average compliance: {co:.1}/10
- Average adaptation quality: {aq:.1}/10
- Overall average: {overall_avg:.1}/10

=== KEY INSIGHT FROM PATTERN ANALYSIS ===
{key_insight}

=== SUCCESS PATTERNS TO EMBED IN PROMPT ===
{success_pattern_text}

=== FAILURE PATTERNS TO EXPLICITLY AVOID ===
{failure_pattern_text}

FEEDBACK FROM EVALUATIONS:
{feedback_text}

TASK:
Generate an improved system prompt that:
1. Keeps the core personality of {persona_name}
2. **EMBEDS the success patterns as explicit instructions**
3. **INCLUDES warnings about failure patterns to avoid**
4. Addresses the weaknesses shown in feedback
5. **ADDS behavioral detection**: Agent should identify customer emotional state and adapt
6. Maintains appropriate tone and role
7. **CRITICAL: Must work well across ALL {scenario_count} different scenarios/contexts**
8. **Include ADAPTIVE STRATEGIES**: Different approaches for hostile, evasive, desperate, cooperative customers
9. **Be ROBUST and GENERALIZABLE, not optimized for just one situation**

Return ONLY the new system prompt, nothing else. No explanations or meta-commentary."#,
        gc = avg_scores.get("goal_completion"),
        cq = avg_scores.get("conversational_quality"),
        co = avg_scores.get("compliance"),
        aq = avg_scores.get("adaptation_quality"),
    )
}
