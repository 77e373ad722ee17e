//! Ambient temperature simulation
//!
//! Two sampling policies are available. [`RandomWalk`] (the default) moves
//! the previous sample by a bounded random step. [`Memoryless`] draws every
//! sample independently across the range.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Source of ambient temperature samples, one per tick
pub trait EnvironmentSimulator: Send + Sync {
    /// Most recently emitted sample (°C)
    fn current(&self) -> f64;

    /// Produce the next sample (°C)
    fn advance(&mut self) -> f64;
}

/// Which sampling policy a session uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationPolicy {
    #[default]
    RandomWalk,
    Memoryless,
}

/// Simulation bounds and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub policy: SimulationPolicy,
    /// Lower physical bound (°C)
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,
    /// Upper physical bound (°C)
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
    /// Largest change per tick for the random walk
    #[serde(default = "default_max_step")]
    pub max_step: f64,
    /// Range the first sample of a session is drawn from
    #[serde(default = "default_initial_range")]
    pub initial_range: (f64, f64),
}

fn default_min_temp() -> f64 {
    16.0
}

fn default_max_temp() -> f64 {
    40.0
}

fn default_max_step() -> f64 {
    0.5
}

fn default_initial_range() -> (f64, f64) {
    (20.0, 35.0)
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            policy: SimulationPolicy::default(),
            min_temp: default_min_temp(),
            max_temp: default_max_temp(),
            max_step: default_max_step(),
            initial_range: default_initial_range(),
        }
    }
}

impl SimulationConfig {
    /// Return a copy with finite bounds, ordered, and the initial range
    /// inside them. Non-finite values fall back to the defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !self.min_temp.is_finite() {
            self.min_temp = default_min_temp();
        }
        if !self.max_temp.is_finite() {
            self.max_temp = default_max_temp();
        }
        if !self.max_step.is_finite() {
            self.max_step = default_max_step();
        }
        if self.min_temp > self.max_temp {
            std::mem::swap(&mut self.min_temp, &mut self.max_temp);
        }
        self.max_step = self.max_step.abs();
        let (lo, hi) = self.initial_range;
        let lo = if lo.is_finite() { lo } else { self.min_temp };
        let hi = if hi.is_finite() { hi } else { self.max_temp };
        let lo = lo.clamp(self.min_temp, self.max_temp);
        let hi = hi.clamp(self.min_temp, self.max_temp);
        self.initial_range = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self
    }

    /// Build the simulator this config describes, seeded from entropy
    #[must_use]
    pub fn build(&self) -> Box<dyn EnvironmentSimulator> {
        self.build_with_rng(StdRng::from_entropy())
    }

    /// Build the simulator this config describes with a caller-supplied RNG
    #[must_use]
    pub fn build_with_rng(&self, mut rng: StdRng) -> Box<dyn EnvironmentSimulator> {
        let config = self.clone().normalized();
        let (lo, hi) = config.initial_range;
        let initial = uniform(&mut rng, lo, hi);
        tracing::debug!(
            "Starting {:?} simulation at {:.1}°C in [{}, {}]",
            config.policy,
            initial,
            config.min_temp,
            config.max_temp
        );
        match config.policy {
            SimulationPolicy::RandomWalk => Box::new(RandomWalk::new(&config, initial, rng)),
            SimulationPolicy::Memoryless => Box::new(Memoryless::new(&config, initial, rng)),
        }
    }
}

fn uniform(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if lo < hi {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

/// First sample clamped into a normalized config's bounds
fn start_within(config: &SimulationConfig, initial: f64) -> f64 {
    if initial.is_finite() {
        initial.clamp(config.min_temp, config.max_temp)
    } else {
        config.min_temp
    }
}

/// `next = clamp(prev + uniform(-step, step), min, max)`
pub struct RandomWalk {
    current: f64,
    min_temp: f64,
    max_temp: f64,
    max_step: f64,
    rng: StdRng,
}

impl RandomWalk {
    /// Start a walk at `initial`, clamped into the configured bounds
    #[must_use]
    pub fn new(config: &SimulationConfig, initial: f64, rng: StdRng) -> Self {
        let config = config.clone().normalized();
        Self {
            current: start_within(&config, initial),
            min_temp: config.min_temp,
            max_temp: config.max_temp,
            max_step: config.max_step,
            rng,
        }
    }
}

impl EnvironmentSimulator for RandomWalk {
    fn current(&self) -> f64 {
        self.current
    }

    fn advance(&mut self) -> f64 {
        let change = uniform(&mut self.rng, -self.max_step, self.max_step);
        self.current = (self.current + change).clamp(self.min_temp, self.max_temp);
        self.current
    }
}

/// `next = uniform(min, max)`, independent of the previous sample
pub struct Memoryless {
    current: f64,
    min_temp: f64,
    max_temp: f64,
    rng: StdRng,
}

impl Memoryless {
    #[must_use]
    pub fn new(config: &SimulationConfig, initial: f64, rng: StdRng) -> Self {
        let config = config.clone().normalized();
        Self {
            current: start_within(&config, initial),
            min_temp: config.min_temp,
            max_temp: config.max_temp,
            rng,
        }
    }
}

impl EnvironmentSimulator for Memoryless {
    fn current(&self) -> f64 {
        self.current
    }

    fn advance(&mut self) -> f64 {
        self.current = uniform(&mut self.rng, self.min_temp, self.max_temp);
        self.current
    }
}
