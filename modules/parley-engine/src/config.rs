/// Knobs for one evolution cycle.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    /// Baseline simulations per cycle (N)
    pub baseline_runs: usize,
    /// Evolution triggers only below this baseline average
    pub failure_threshold: f64,
    /// Candidate prompts generated per cycle (K)
    pub mutation_count: usize,
    /// Test simulations per candidate (M); equal to `baseline_runs` by default
    /// so candidate and baseline averages are comparable
    pub test_runs: usize,
    /// Versions inspected for plateau detection (W)
    pub plateau_window: usize,
    /// Below this absolute average improvement the lineage counts as stagnated
    pub plateau_min_improvement: f64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            baseline_runs: 5,
            failure_threshold: 8.5,
            mutation_count: 3,
            test_runs: 5,
            plateau_window: 3,
            plateau_min_improvement: 0.2,
        }
    }
}
