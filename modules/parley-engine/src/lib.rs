pub mod config;
pub mod evolve;
pub mod fitness;
pub mod mutation;
pub mod parse;
pub mod patterns;
pub mod plateau;
pub mod sim;
pub mod tts;

pub use config::EvolutionConfig;
pub use evolve::{assign, EngineDeps, EvolutionOrchestrator, EvolutionReport};
pub use fitness::FitnessEvaluator;
pub use mutation::{Mutation, MutationGenerator};
pub use patterns::{PatternExtractor, PatternReport};
pub use plateau::PlateauStatus;
pub use sim::Simulator;
pub use tts::TtsClient;
