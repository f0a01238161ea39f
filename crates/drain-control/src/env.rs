// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Simulator Interface
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Step/observe contract of the hydraulic simulator and runoff forecasts
//! recorded from it.

use drain_types::error::{DrainError, DrainResult};
use ndarray::{s, Array1, Array2, Axis};

/// Deterministic hydraulic simulator driven one interval at a time.
pub trait Simulator: Send {
    /// Start `event` and return the node state `(n_node, n_in)`.
    fn reset(&mut self, event: &str) -> DrainResult<Array2<f64>>;

    /// Apply one realized setting for one interval; `true` once the event ended.
    fn step(&mut self, setting: &[f64]) -> DrainResult<bool>;

    /// Node state `(n_node, n_in)`, runoff in the last channel.
    fn state(&self) -> Array2<f64>;

    /// Link state `(n_edge, edge_in)`.
    fn state_full(&self) -> Array2<f64>;

    /// Flooding per node over the last interval.
    fn flood(&self) -> Array1<f64>;

    /// Objective accrued over the last interval.
    fn objective(&self) -> f64;

    /// Force the lateral inflow of `node` for the next interval.
    fn set_inflow(&mut self, node: usize, inflow: f64) -> DrainResult<()>;

    /// Frozen copy of the current condition from which candidate
    /// simulators are built.
    fn snapshot(&self) -> DrainResult<Box<dyn SimulatorFactory>>;
}

/// Builds independent simulators that all start from the same condition.
pub trait SimulatorFactory: Send + Sync {
    fn build(&self) -> DrainResult<Box<dyn Simulator>>;
}

impl<F> SimulatorFactory for F
where
    F: Fn() -> DrainResult<Box<dyn Simulator>> + Send + Sync,
{
    fn build(&self) -> DrainResult<Box<dyn Simulator>> {
        self()
    }
}

/// Sliding runoff forecast over a recorded series.
#[derive(Debug, Clone, PartialEq)]
pub struct RunoffForecast {
    series: Array2<f64>,
    horizon: usize,
}

impl RunoffForecast {
    /// `series (T, n_node)`; row `i` is the runoff entering during step `i + 1`.
    pub fn from_series(series: Array2<f64>, horizon: usize) -> DrainResult<Self> {
        if horizon == 0 {
            return Err(DrainError::ConfigError(
                "runoff forecast horizon must be >= 1".to_string(),
            ));
        }
        Ok(Self { series, horizon })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn n_node(&self) -> usize {
        self.series.ncols()
    }

    pub fn len(&self) -> usize {
        self.series.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.series.nrows() == 0
    }

    /// Forecast `(horizon, n_node)` from step `idx`, zero past the event end.
    pub fn window(&self, idx: usize) -> Array2<f64> {
        let mut out = Array2::zeros((self.horizon, self.series.ncols()));
        let start = idx.min(self.series.nrows());
        let end = (idx + self.horizon).min(self.series.nrows());
        out.slice_mut(s![..end - start, ..])
            .assign(&self.series.slice(s![start..end, ..]));
        out
    }
}

/// Run `event` once under a constant `setting` and record the runoff
/// channel after every step, `(T, n_node)`.
pub fn record_runoff(
    sim: &mut dyn Simulator,
    event: &str,
    setting: &[f64],
) -> DrainResult<Array2<f64>> {
    sim.reset(event)?;
    let mut rows = Vec::new();
    loop {
        let done = sim.step(setting)?;
        let state = sim.state();
        let last = state.ncols().checked_sub(1).ok_or_else(|| {
            DrainError::Simulation("simulator state has no channels".to_string())
        })?;
        rows.push(state.index_axis(Axis(1), last).to_owned());
        if done {
            break;
        }
    }
    let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
    ndarray::stack(Axis(0), &views)
        .map_err(|e| DrainError::Simulation(format!("runoff record: {e}")))
}
