// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::constants::{DEFAULT_FAILURE_PENALTY, DEFAULT_HMAX};
use crate::error::{DrainError, DrainResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> DrainResult<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn positive(name: &str, value: f64) -> DrainResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DrainError::ConfigError(format!(
            "{name} must be finite and > 0"
        )));
    }
    Ok(())
}

fn nonzero(name: &str, value: usize) -> DrainResult<()> {
    if value == 0 {
        return Err(DrainError::ConfigError(format!("{name} must be >= 1")));
    }
    Ok(())
}

/// Surrogate architecture and training hyperparameters.
///
/// Layer selection stays as string tags here and is parsed into closed
/// enums when the model is built, so an unknown tag fails at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of network nodes (default: 40).
    pub n_node: usize,
    /// State channels per node, runoff last (default: 4).
    pub n_in: usize,
    /// Predicted channels per node: h, q_us, q_ds (default: 3).
    pub n_out: usize,
    /// Number of actuators feeding control channels (default: 0).
    pub n_act: usize,
    /// Edge feature channels; 0 disables edge input (default: 0).
    pub edge_in: usize,
    /// Input window length (default: 6).
    pub seq_in: usize,
    /// Predicted steps per call; forced to 1 when `roll` (default: 1).
    pub seq_out: usize,
    /// Rolling (one step per call) rollout (default: false).
    pub roll: bool,
    /// Embedding width (default: 64).
    pub embed_size: usize,
    /// Recurrent stage width (default: 64).
    pub hidden_dim: usize,
    /// Number of spatial layers (default: 3).
    pub n_layer: usize,
    /// Activation tag: relu | tanh | sigmoid | linear (default: "relu").
    pub activation: String,
    /// Convolution tag: None | GCN* | GAT* (default: "GCNconv").
    pub conv: String,
    /// Recurrent tag: None | Conv1D | GRU (default: "GRU").
    pub recurrent: String,
    /// Parameter-free skip connection around the spatial stack (default: false).
    pub resnet: bool,
    /// Apply normalisation factors on predict (default: false).
    pub norm: bool,
    /// Per-node capacity; empty means `DEFAULT_HMAX` everywhere.
    pub hmax: Vec<f64>,
    /// Seed for weight initialisation; `None` draws from entropy.
    pub seed: Option<u64>,
    pub train: TrainConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_node: 40,
            n_in: 4,
            n_out: 3,
            n_act: 0,
            edge_in: 0,
            seq_in: 6,
            seq_out: 1,
            roll: false,
            embed_size: 64,
            hidden_dim: 64,
            n_layer: 3,
            activation: "relu".to_string(),
            conv: "GCNconv".to_string(),
            recurrent: "GRU".to_string(),
            resnet: false,
            norm: false,
            hmax: Vec::new(),
            seed: None,
            train: TrainConfig::default(),
        }
    }
}

impl ModelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> DrainResult<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Steps emitted by one model call.
    pub fn effective_seq_out(&self) -> usize {
        if self.roll {
            1
        } else {
            self.seq_out
        }
    }

    /// Capacity per node with the default filled in.
    pub fn hmax_per_node(&self) -> Vec<f64> {
        if self.hmax.is_empty() {
            vec![DEFAULT_HMAX; self.n_node]
        } else {
            self.hmax.clone()
        }
    }

    pub fn validate(&self) -> DrainResult<()> {
        nonzero("model.n_node", self.n_node)?;
        nonzero("model.n_in", self.n_in)?;
        nonzero("model.n_out", self.n_out)?;
        nonzero("model.seq_in", self.seq_in)?;
        nonzero("model.seq_out", self.effective_seq_out())?;
        nonzero("model.embed_size", self.embed_size)?;
        nonzero("model.hidden_dim", self.hidden_dim)?;
        if !self.hmax.is_empty() && self.hmax.len() != self.n_node {
            return Err(DrainError::ConfigError(format!(
                "model.hmax has {} entries, expected n_node={}",
                self.hmax.len(),
                self.n_node
            )));
        }
        if self.hmax.iter().any(|h| !h.is_finite() || *h <= 0.0) {
            return Err(DrainError::ConfigError(
                "model.hmax entries must be finite and > 0".to_string(),
            ));
        }
        self.train.validate()
    }
}

/// Offline fitting hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Loss name: MeanSquaredError | MeanAbsoluteError (default: "MeanSquaredError").
    pub loss_function: String,
    /// Optimizer name: Adam | SGD (default: "Adam").
    pub optimizer: String,
    /// Step size (default: 1e-3).
    pub learning_rate: f64,
    /// Fraction of events used for training (default: 0.8).
    pub ratio: f64,
    /// Minibatch size (default: 256).
    pub batch_size: usize,
    /// Number of epochs (default: 100).
    pub epochs: usize,
    /// Weight of the mass-balance regulariser (default: 0.0).
    pub balance_weight: f64,
    /// Directory holding `model.npz` and `normal.npy` (default: "./model/").
    pub model_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            loss_function: "MeanSquaredError".to_string(),
            optimizer: "Adam".to_string(),
            learning_rate: 1e-3,
            ratio: 0.8,
            batch_size: 256,
            epochs: 100,
            balance_weight: 0.0,
            model_dir: PathBuf::from("./model/"),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> DrainResult<()> {
        positive("train.learning_rate", self.learning_rate)?;
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(DrainError::ConfigError(
                "train.ratio must be in (0, 1]".to_string(),
            ));
        }
        nonzero("train.batch_size", self.batch_size)?;
        if !self.balance_weight.is_finite() || self.balance_weight < 0.0 {
            return Err(DrainError::ConfigError(
                "train.balance_weight must be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Time discretisation of the receding horizon, all in the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Simulator step (default: 1).
    pub interval: u64,
    /// How long one decision is held (default: 5).
    pub setting_duration: u64,
    /// How often the optimizer is re-run (default: 5).
    pub control_interval: u64,
    /// Span covered by decisions (default: 60).
    pub control_horizon: u64,
    /// Span over which the objective is scored (default: 60).
    pub eval_horizon: u64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            interval: 1,
            setting_duration: 5,
            control_interval: 5,
            control_horizon: 60,
            eval_horizon: 60,
        }
    }
}

impl HorizonConfig {
    pub fn validate(&self) -> DrainResult<()> {
        for (name, value) in [
            ("horizon.interval", self.interval),
            ("horizon.setting_duration", self.setting_duration),
            ("horizon.control_interval", self.control_interval),
            ("horizon.control_horizon", self.control_horizon),
            ("horizon.eval_horizon", self.eval_horizon),
        ] {
            if value == 0 {
                return Err(DrainError::ConfigError(format!("{name} must be >= 1")));
            }
        }
        let divisible = [
            ("setting_duration", self.setting_duration, "interval", self.interval),
            ("control_interval", self.control_interval, "interval", self.interval),
            ("eval_horizon", self.eval_horizon, "interval", self.interval),
            (
                "control_horizon",
                self.control_horizon,
                "setting_duration",
                self.setting_duration,
            ),
        ];
        for (num_name, num, den_name, den) in divisible {
            if num % den != 0 {
                return Err(DrainError::ConfigError(format!(
                    "horizon.{num_name}={num} is not a multiple of horizon.{den_name}={den}"
                )));
            }
        }
        Ok(())
    }

    /// Number of compact decisions per actuator.
    pub fn n_step(&self) -> usize {
        (self.control_horizon / self.setting_duration) as usize
    }

    /// Simulator steps per decision.
    pub fn repeat(&self) -> usize {
        (self.setting_duration / self.interval) as usize
    }

    /// Simulator steps scored by the objective.
    pub fn eval_steps(&self) -> usize {
        (self.eval_horizon / self.interval) as usize
    }
}

/// Search space as delivered by the network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpaceConfig {
    /// Bounded real setting per actuator.
    Continuous { lower: Vec<f64>, upper: Vec<f64> },
    /// Joint-index vector → realized joint setting.
    Discrete { table: Vec<ActionEntry> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub index: Vec<i64>,
    pub setting: Vec<f64>,
}

/// Stopping rule, checked once per generation/iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Generation (iteration) count.
    NGen(usize),
    /// Objective evaluation count.
    NEval(usize),
    /// Wall-clock budget in seconds.
    Time(f64),
    /// Best objective improved by less than `tol` over `period` generations.
    Convergence { tol: f64, period: usize },
    /// Mean absolute gradient at or below the threshold (gradient search only).
    Grad(f64),
}

impl Default for Termination {
    fn default() -> Self {
        Termination::NEval(256)
    }
}

impl Termination {
    pub fn validate(&self) -> DrainResult<()> {
        match *self {
            Termination::NGen(n) => nonzero("termination.n_gen", n),
            Termination::NEval(n) => nonzero("termination.n_eval", n),
            Termination::Time(secs) => positive("termination.time", secs),
            Termination::Convergence { tol, period } => {
                nonzero("termination.convergence.period", period)?;
                if !tol.is_finite() || tol < 0.0 {
                    return Err(DrainError::ConfigError(
                        "termination.convergence.tol must be finite and >= 0".to_string(),
                    ));
                }
                Ok(())
            }
            Termination::Grad(threshold) => {
                if !threshold.is_finite() || threshold < 0.0 {
                    return Err(DrainError::ConfigError(
                        "termination.grad must be finite and >= 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Probability and distribution index of a variation operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatorRate {
    pub prob: f64,
    pub eta: f64,
}

impl Default for OperatorRate {
    fn default() -> Self {
        Self {
            prob: 1.0,
            eta: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Population size (default: 32).
    pub pop_size: usize,
    /// Per-coordinate perturbation probability of a warm start (default: 0.4).
    pub sampling: f64,
    pub crossover: OperatorRate,
    pub mutation: OperatorRate,
    pub termination: Termination,
    /// Drop offspring identical to an existing member (default: true).
    pub eliminate_duplicates: bool,
    pub seed: Option<u64>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            pop_size: 32,
            sampling: 0.4,
            crossover: OperatorRate::default(),
            mutation: OperatorRate::default(),
            termination: Termination::default(),
            eliminate_duplicates: true,
            seed: None,
        }
    }
}

impl PopulationConfig {
    pub fn validate(&self) -> DrainResult<()> {
        if self.pop_size < 2 {
            return Err(DrainError::ConfigError(
                "population.pop_size must be >= 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sampling) {
            return Err(DrainError::ConfigError(
                "population.sampling must be in [0, 1]".to_string(),
            ));
        }
        for (name, rate) in [
            ("population.crossover", self.crossover),
            ("population.mutation", self.mutation),
        ] {
            if !(0.0..=1.0).contains(&rate.prob) {
                return Err(DrainError::ConfigError(format!(
                    "{name}.prob must be in [0, 1]"
                )));
            }
            positive(&format!("{name}.eta"), rate.eta)?;
        }
        if matches!(self.termination, Termination::Grad(_)) {
            return Err(DrainError::ConfigError(
                "population.termination does not support a gradient threshold".to_string(),
            ));
        }
        self.termination.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    /// Number of candidates optimised side by side (default: 32).
    pub pop_size: usize,
    /// Adam step size on the control batch (default: 0.1).
    pub learning_rate: f64,
    /// Per-coordinate perturbation probability of a warm start (default: 0.4).
    pub sampling: f64,
    pub termination: Termination,
    pub seed: Option<u64>,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            pop_size: 32,
            learning_rate: 0.1,
            sampling: 0.4,
            termination: Termination::NGen(100),
            seed: None,
        }
    }
}

impl GradientConfig {
    pub fn validate(&self) -> DrainResult<()> {
        nonzero("gradient.pop_size", self.pop_size)?;
        positive("gradient.learning_rate", self.learning_rate)?;
        if !(0.0..=1.0).contains(&self.sampling) {
            return Err(DrainError::ConfigError(
                "gradient.sampling must be in [0, 1]".to_string(),
            ));
        }
        self.termination.validate()
    }
}

/// Receding-horizon controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcConfig {
    #[serde(default)]
    pub horizon: HorizonConfig,
    pub action_space: ActionSpaceConfig,
    #[serde(default)]
    pub population: PopulationConfig,
    #[serde(default)]
    pub gradient: GradientConfig,
    /// Evaluate candidates on the surrogate instead of the simulator.
    #[serde(default)]
    pub surrogate: bool,
    /// Use the gradient search (surrogate only).
    #[serde(default)]
    pub use_gradient: bool,
    /// Warm-start each search from the previous decision.
    #[serde(default)]
    pub use_current: bool,
    /// Encoded per-actuator decision used before any search has run.
    #[serde(default)]
    pub baseline: Option<Vec<f64>>,
    /// Force forecast inflows into simulator candidates.
    #[serde(default)]
    pub no_runoff: bool,
    /// Simulator worker threads (default: 1).
    #[serde(default = "default_processes")]
    pub processes: usize,
    /// Objective for a candidate whose simulation failed (default: 1e12).
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
}

fn default_processes() -> usize {
    1
}
fn default_failure_penalty() -> f64 {
    DEFAULT_FAILURE_PENALTY
}
fn default_result_dir() -> PathBuf {
    PathBuf::from("./result/")
}

impl MpcConfig {
    pub fn new(action_space: ActionSpaceConfig) -> Self {
        Self {
            horizon: HorizonConfig::default(),
            action_space,
            population: PopulationConfig::default(),
            gradient: GradientConfig::default(),
            surrogate: false,
            use_gradient: false,
            use_current: false,
            baseline: None,
            no_runoff: false,
            processes: default_processes(),
            failure_penalty: default_failure_penalty(),
            result_dir: default_result_dir(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> DrainResult<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DrainResult<()> {
        self.horizon.validate()?;
        nonzero("mpc.processes", self.processes)?;
        if !self.failure_penalty.is_finite() {
            return Err(DrainError::ConfigError(
                "mpc.failure_penalty must be finite".to_string(),
            ));
        }
        if self.use_gradient {
            if !self.surrogate {
                return Err(DrainError::ConfigError(
                    "mpc.use_gradient requires mpc.surrogate".to_string(),
                ));
            }
            if !matches!(self.action_space, ActionSpaceConfig::Continuous { .. }) {
                return Err(DrainError::ConfigError(
                    "mpc.use_gradient requires a continuous action space".to_string(),
                ));
            }
            self.gradient.validate()
        } else {
            self.population.validate()
        }
    }
}
