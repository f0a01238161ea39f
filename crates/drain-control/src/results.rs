// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Control Results
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::population::Progress;
use crate::problem::ControlProblem;
use drain_types::error::{DrainError, DrainResult};
use ndarray::{Array1, Array2, Array3, Axis};
use ndarray_npy::{write_npy, WritableElement};
use std::path::{Path, PathBuf};

/// Outcome of one optimisation run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// Realized settings `(n_step, n_act)`.
    pub schedule: Array2<f64>,
    /// Decision vector the schedule was decoded from.
    pub encoded: Vec<f64>,
    pub objective: f64,
    /// Best objective after initialisation and after every generation.
    pub history: Vec<f64>,
    pub generations: usize,
    pub evaluations: usize,
}

impl OptimizationResult {
    pub(crate) fn from_best(
        problem: &ControlProblem,
        encoded: Vec<f64>,
        objective: f64,
        progress: Progress,
    ) -> DrainResult<Self> {
        Ok(Self {
            schedule: problem.decode(&encoded)?,
            encoded,
            objective,
            history: progress.history,
            generations: progress.generations,
            evaluations: progress.evaluations,
        })
    }

    /// Realized setting of decision step `j`, holding the last one past the end.
    pub fn setting(&self, j: usize) -> Vec<f64> {
        let last = self.schedule.nrows().saturating_sub(1);
        self.schedule.row(j.min(last)).to_vec()
    }
}

/// Where candidate schedules were scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Surrogate,
    Simulator,
}

impl EvalMode {
    pub fn tag(self) -> &'static str {
        match self {
            EvalMode::Surrogate => "emul",
            EvalMode::Simulator => "simu",
        }
    }
}

/// Per-step log of one controlled event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    /// Node state `(n_node, n_in)` after reset and after every step.
    pub states: Vec<Array2<f64>>,
    /// Flooding per node.
    pub perfs: Vec<Array1<f64>>,
    pub objects: Vec<f64>,
    /// Applied realized setting.
    pub settings: Vec<Vec<f64>>,
    /// Link state `(n_edge, edge_in)`.
    pub edge_states: Vec<Array2<f64>>,
    /// Convergence history of every optimisation run.
    pub vals: Vec<Vec<f64>>,
    /// Wall-clock seconds of every optimisation run.
    pub opt_times: Vec<f64>,
}

impl EventRecord {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Flooding summed over nodes and steps.
    pub fn total_flood(&self) -> f64 {
        self.perfs.iter().map(|p| p.sum()).sum()
    }

    pub fn mean_opt_time(&self) -> f64 {
        if self.opt_times.is_empty() {
            0.0
        } else {
            self.opt_times.iter().sum::<f64>() / self.opt_times.len() as f64
        }
    }

    /// Write `{event}_{mode}_{state,perf,object,settings,edge_states,vals}.npy`
    /// into `dir` and return the written paths.
    pub fn save(
        &self,
        dir: impl AsRef<Path>,
        event: &str,
        mode: EvalMode,
    ) -> DrainResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = |series: &str| dir.join(format!("{event}_{}_{series}.npy", mode.tag()));
        let state = path("state");
        save_npy(&state, &stack_matrices(&self.states)?)?;
        let perf = path("perf");
        let perfs: Vec<Vec<f64>> = self.perfs.iter().map(|a| a.to_vec()).collect();
        save_npy(&perf, &stack_rows(&perfs)?)?;
        let object = path("object");
        save_npy(&object, &Array1::from(self.objects.clone()))?;
        let settings = path("settings");
        save_npy(&settings, &stack_rows(&self.settings)?)?;
        let edge_states = path("edge_states");
        save_npy(&edge_states, &stack_matrices(&self.edge_states)?)?;
        let vals = path("vals");
        save_npy(&vals, &pad_histories(&self.vals))?;
        Ok(vec![state, perf, object, settings, edge_states, vals])
    }
}

fn save_npy<A, D>(path: &Path, array: &ndarray::Array<A, D>) -> DrainResult<()>
where
    A: WritableElement,
    D: ndarray::Dimension,
{
    write_npy(path, array)
        .map_err(|e| DrainError::Npy(format!("Failed to write '{}': {e}", path.display())))
}

fn stack_matrices(items: &[Array2<f64>]) -> DrainResult<Array3<f64>> {
    let first = match items.first() {
        Some(first) => first.shape(),
        None => return Ok(Array3::zeros((0, 0, 0))),
    };
    if let Some(bad) = items.iter().find(|a| a.shape() != first) {
        return Err(DrainError::shape("recorded series", first, bad.shape()));
    }
    let views: Vec<_> = items.iter().map(|a| a.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| DrainError::Npy(format!("recorded series: {e}")))
}

fn stack_rows(rows: &[Vec<f64>]) -> DrainResult<Array2<f64>> {
    let width = rows.first().map_or(0, |r| r.len());
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(DrainError::shape("recorded series", &[width], &[bad.len()]));
    }
    Array2::from_shape_vec((rows.len(), width), rows.concat())
        .map_err(|e| DrainError::Npy(format!("recorded series: {e}")))
}

/// Right-pad every history with its last value to a common length.
pub fn pad_histories(histories: &[Vec<f64>]) -> Array2<f64> {
    let width = histories.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Array2::zeros((histories.len(), width));
    for (mut row, h) in out.outer_iter_mut().zip(histories) {
        if let Some(&last) = h.last() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = h.get(j).copied().unwrap_or(last);
            }
        }
    }
    out
}
