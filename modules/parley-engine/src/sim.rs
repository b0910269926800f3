//! Turn-by-turn dialogue simulation between two personas.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use llm_client::{ChatResponder, Message};
use tracing::{debug, info, warn};

use parley_common::{
    format_transcript, EvolutionStore, Persona, RunStatus, Scenario, SimulationRun,
    SimulationRunner, Speaker, TranscriptIndex, TranscriptMeta, Turn,
};

use crate::fitness::FitnessEvaluator;
use crate::tts::TtsClient;

const TURN_MAX_TOKENS: u32 = 150;

/// Prefixed to both sides' prompts so the dialogue reads like speech, not a
/// script.
const CONCISE_INSTRUCTION: &str = "IMPORTANT: Keep responses SHORT and NATURAL (1-3 sentences max).\n\
Speak directly as your character without stage directions, labels, or parenthetical notes.\n\
Act like a real conversation, not a script.";

/// Runs one conversation for a scenario: alternates the two personas'
/// prompts, persists the run, evaluates the transcript, and feeds the
/// transcript index. Implements the `SimulationRunner` seam the orchestrator
/// consumes.
pub struct Simulator {
    store: Arc<dyn EvolutionStore>,
    index: Arc<dyn TranscriptIndex>,
    llm: Arc<dyn ChatResponder>,
    tts: Option<TtsClient>,
    evaluator: FitnessEvaluator,
}

impl Simulator {
    pub fn new(
        store: Arc<dyn EvolutionStore>,
        index: Arc<dyn TranscriptIndex>,
        llm: Arc<dyn ChatResponder>,
        tts: Option<TtsClient>,
    ) -> Self {
        let evaluator = FitnessEvaluator::new(llm.clone());
        Self {
            store,
            index,
            llm,
            tts,
            evaluator,
        }
    }

    async fn converse(
        &self,
        scenario: &Scenario,
        persona_a: &Persona,
        persona_b: &Persona,
        agent_prompt: Option<&str>,
    ) -> Result<Vec<Turn>> {
        // The explicit-override seam: candidate prompts arrive here instead
        // of being written onto the persona record.
        let prompt_a = agent_prompt.unwrap_or(&persona_a.system_prompt);
        let system_a = format!("{CONCISE_INSTRUCTION}\n\n{prompt_a}");
        let system_b = format!("{CONCISE_INSTRUCTION}\n\n{}", persona_b.system_prompt);

        let mut transcript = Vec::with_capacity(scenario.max_turns as usize * 2);
        let mut history_a = vec![Message::user(scenario.context.clone())];
        let mut history_b: Vec<Message> = Vec::new();

        for turn in 0..scenario.max_turns {
            debug!(turn, persona = %persona_a.name, "agent A responding");
            let text_a = self
                .llm
                .respond(&system_a, &history_a, Some(TURN_MAX_TOKENS))
                .await?;
            let audio_a = self.speak(&text_a, persona_a.voice_id.as_deref()).await;

            transcript.push(Turn {
                speaker: Speaker::A,
                persona_name: persona_a.name.clone(),
                text: text_a.clone(),
                audio_path: audio_a,
            });
            history_a.push(Message::assistant(text_a.clone()));
            history_b.push(Message::user(text_a));

            debug!(turn, persona = %persona_b.name, "agent B responding");
            let text_b = self
                .llm
                .respond(&system_b, &history_b, Some(TURN_MAX_TOKENS))
                .await?;
            let audio_b = self.speak(&text_b, persona_b.voice_id.as_deref()).await;

            transcript.push(Turn {
                speaker: Speaker::B,
                persona_name: persona_b.name.clone(),
                text: text_b.clone(),
                audio_path: audio_b,
            });
            history_b.push(Message::assistant(text_b.clone()));
            history_a.push(Message::user(text_b));
        }

        Ok(transcript)
    }

    async fn speak(&self, text: &str, voice_id: Option<&str>) -> Option<String> {
        match &self.tts {
            Some(tts) => tts.synthesize(text, voice_id).await,
            None => None,
        }
    }
}

#[async_trait]
impl SimulationRunner for Simulator {
    async fn run(&self, scenario: &Scenario, agent_prompt: Option<&str>) -> Result<SimulationRun> {
        let persona_a = self
            .store
            .persona(scenario.persona_a_id)
            .await?
            .ok_or_else(|| anyhow!("persona A {} not found", scenario.persona_a_id))?;
        let persona_b = self
            .store
            .persona(scenario.persona_b_id)
            .await?
            .ok_or_else(|| anyhow!("persona B {} not found", scenario.persona_b_id))?;

        let run = self.store.create_run(scenario.id).await?;
        let started = Instant::now();

        info!(
            scenario = %scenario.name,
            persona_a = %persona_a.name,
            persona_b = %persona_b.name,
            max_turns = scenario.max_turns,
            "starting simulation"
        );

        let transcript = match self
            .converse(scenario, &persona_a, &persona_b, agent_prompt)
            .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                if let Err(mark) = self.store.fail_run(run.id).await {
                    warn!(run_id = %run.id, error = %mark, "failed to mark run failed");
                }
                return Err(e);
            }
        };

        let duration = started.elapsed().as_secs_f64();
        self.store
            .complete_run(run.id, &transcript, duration)
            .await?;

        info!(run_id = %run.id, duration, messages = transcript.len(), "simulation complete");

        // Judge the finished conversation; the evaluator never fails.
        let goal = scenario.goal.as_deref().unwrap_or("");
        let verdict = self.evaluator.evaluate(&transcript, goal).await;
        let evaluation = self.store.save_evaluation(run.id, &verdict).await?;

        // Index for later exemplar retrieval. Non-fatal.
        let document = format_transcript(&transcript);
        let meta = TranscriptMeta {
            persona_a: persona_a.name.clone(),
            persona_b: persona_b.name.clone(),
            scenario: scenario.name.clone(),
            overall_score: evaluation.overall_score,
        };
        if let Err(e) = self.index.add(run.id, &document, &meta).await {
            warn!(run_id = %run.id, error = %e, "transcript indexing failed");
        }

        Ok(SimulationRun {
            id: run.id,
            scenario_id: scenario.id,
            transcript,
            status: RunStatus::Completed,
            duration_seconds: Some(duration),
            created_at: run.created_at,
        })
    }
}
