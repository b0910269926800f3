pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{EvolveError, EvolveResult};
pub use traits::{EvolutionStore, SimulationRunner, TranscriptIndex};
pub use types::*;
