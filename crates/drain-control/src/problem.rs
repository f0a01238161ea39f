// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Control Problem
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Encoding of control schedules as flat decision vectors.
//!
//! A decision vector holds `n_step × n_dim` values in step-major order.
//! Continuous spaces store the setting itself; discrete spaces store a
//! joint index that a lookup table maps to the realized setting.

use drain_types::config::{ActionSpaceConfig, HorizonConfig, MpcConfig};
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use drain_types::state::to_schedule;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Space {
    Continuous,
    Discrete {
        keys: Vec<Vec<i64>>,
        settings: Vec<Vec<f64>>,
        lookup: HashMap<Vec<i64>, usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlProblem {
    space: Space,
    /// Encoded values per step.
    n_dim: usize,
    /// Realized settings per step.
    n_act: usize,
    n_step: usize,
    repeat: usize,
    eval_steps: usize,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl ControlProblem {
    pub fn new(horizon: &HorizonConfig, action_space: &ActionSpaceConfig) -> DrainResult<Self> {
        horizon.validate()?;
        let (space, n_dim, n_act, lower, upper) = match action_space {
            ActionSpaceConfig::Continuous { lower, upper } => {
                if lower.is_empty() {
                    return Err(DrainError::ConfigError(
                        "action_space.lower must name at least one actuator".to_string(),
                    ));
                }
                ensure_shape("action_space.upper", &[lower.len()], &[upper.len()])?;
                if lower
                    .iter()
                    .zip(upper)
                    .any(|(l, u)| !l.is_finite() || !u.is_finite() || l > u)
                {
                    return Err(DrainError::ConfigError(
                        "action_space bounds must be finite with lower <= upper".to_string(),
                    ));
                }
                (
                    Space::Continuous,
                    lower.len(),
                    lower.len(),
                    lower.clone(),
                    upper.clone(),
                )
            }
            ActionSpaceConfig::Discrete { table } => {
                let first = table.first().ok_or_else(|| {
                    DrainError::ConfigError("action_space.table is empty".to_string())
                })?;
                let (n_dim, n_act) = (first.index.len(), first.setting.len());
                if n_dim == 0 || n_act == 0 {
                    return Err(DrainError::ConfigError(
                        "action_space.table entries need an index and a setting".to_string(),
                    ));
                }
                let mut keys = Vec::with_capacity(table.len());
                let mut settings = Vec::with_capacity(table.len());
                let mut lookup = HashMap::with_capacity(table.len());
                for (row, entry) in table.iter().enumerate() {
                    ensure_shape("action_space.table index", &[n_dim], &[entry.index.len()])?;
                    ensure_shape("action_space.table setting", &[n_act], &[entry.setting.len()])?;
                    if lookup.insert(entry.index.clone(), row).is_some() {
                        return Err(DrainError::ConfigError(format!(
                            "action_space.table repeats index {:?}",
                            entry.index
                        )));
                    }
                    keys.push(entry.index.clone());
                    settings.push(entry.setting.clone());
                }
                let lower: Vec<f64> = (0..n_dim)
                    .map(|j| keys.iter().map(|k| k[j]).min().unwrap_or(0) as f64)
                    .collect();
                let upper: Vec<f64> = (0..n_dim)
                    .map(|j| keys.iter().map(|k| k[j]).max().unwrap_or(0) as f64)
                    .collect();
                (
                    Space::Discrete {
                        keys,
                        settings,
                        lookup,
                    },
                    n_dim,
                    n_act,
                    lower,
                    upper,
                )
            }
        };
        let n_step = horizon.n_step();
        Ok(Self {
            space,
            n_dim,
            n_act,
            n_step,
            repeat: horizon.repeat(),
            eval_steps: horizon.eval_steps(),
            lower: lower.repeat(n_step),
            upper: upper.repeat(n_step),
        })
    }

    pub fn from_config(config: &MpcConfig) -> DrainResult<Self> {
        Self::new(&config.horizon, &config.action_space)
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self.space, Space::Discrete { .. })
    }

    pub fn n_dim(&self) -> usize {
        self.n_dim
    }

    pub fn n_act(&self) -> usize {
        self.n_act
    }

    pub fn n_step(&self) -> usize {
        self.n_step
    }

    pub fn repeat(&self) -> usize {
        self.repeat
    }

    pub fn eval_steps(&self) -> usize {
        self.eval_steps
    }

    /// Length of a decision vector.
    pub fn n_var(&self) -> usize {
        self.n_step * self.n_dim
    }

    /// Per-variable lower bound of a decision vector.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Realized setting for one encoded step.
    pub fn realize(&self, encoded: &[f64]) -> DrainResult<Vec<f64>> {
        ensure_shape("encoded step", &[self.n_dim], &[encoded.len()])?;
        match &self.space {
            Space::Continuous => Ok(encoded.to_vec()),
            Space::Discrete {
                keys,
                settings,
                lookup,
            } => {
                let key: Vec<i64> = encoded.iter().map(|v| v.round() as i64).collect();
                let row = match lookup.get(&key) {
                    Some(&row) => row,
                    None => nearest_key(keys, &key),
                };
                Ok(settings[row].clone())
            }
        }
    }

    /// Decision vector → realized schedule `(n_step, n_act)`.
    pub fn decode(&self, encoded: &[f64]) -> DrainResult<Array2<f64>> {
        ensure_shape("decision vector", &[self.n_var()], &[encoded.len()])?;
        let steps = to_schedule(encoded, self.n_dim)?;
        let mut out = Array2::zeros((self.n_step, self.n_act));
        for (mut dst, src) in out.outer_iter_mut().zip(steps.outer_iter()) {
            let realized = self.realize(&src.to_vec())?;
            dst.iter_mut().zip(realized).for_each(|(d, v)| *d = v);
        }
        Ok(out)
    }

    /// Realized schedule at simulator resolution `(eval_steps, n_act)`.
    pub fn expand(&self, schedule: ArrayView2<'_, f64>) -> Array2<f64> {
        pad_to_horizon(
            repeat_decisions(schedule, self.repeat).view(),
            self.eval_steps,
        )
    }

    /// 0/1 matrix `(eval_steps, n_step)` with `E · schedule == expand(schedule)`.
    pub fn expansion_matrix(&self) -> Array2<f64> {
        let mut e = Array2::zeros((self.eval_steps, self.n_step));
        if self.n_step == 0 {
            return e;
        }
        for t in 0..self.eval_steps {
            let step = (t / self.repeat.max(1)).min(self.n_step - 1);
            e[[t, step]] = 1.0;
        }
        e
    }

    /// Decision vectors `(p, n_var)` → realized schedules `(p, eval_steps, n_act)`.
    pub fn expand_batch(&self, encoded: ArrayView2<'_, f64>) -> DrainResult<Array3<f64>> {
        let p = encoded.nrows();
        ensure_shape("decision batch", &[p, self.n_var()], encoded.shape())?;
        let mut out = Array3::zeros((p, self.eval_steps, self.n_act));
        for (mut dst, row) in out.outer_iter_mut().zip(encoded.outer_iter()) {
            let schedule = self.decode(&row.to_vec())?;
            dst.assign(&self.expand(schedule.view()));
        }
        Ok(out)
    }

    /// Tile one per-step encoded decision over the whole horizon, clipped
    /// into bounds.
    pub fn tile(&self, step: &[f64]) -> DrainResult<Vec<f64>> {
        ensure_shape("warm-start decision", &[self.n_dim], &[step.len()])?;
        Ok(step
            .iter()
            .cycle()
            .take(self.n_var())
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(v, (l, u))| v.clamp(*l, *u))
            .collect())
    }

    /// Fresh random value for variable `j`.
    pub fn sample_var<R: Rng + ?Sized>(&self, j: usize, rng: &mut R) -> f64 {
        let (l, u) = (self.lower[j], self.upper[j]);
        if self.is_discrete() {
            rng.gen_range(l as i64..=u as i64) as f64
        } else if u > l {
            rng.gen_range(l..u)
        } else {
            l
        }
    }

    /// Round and clip every variable of a discrete problem.
    pub fn repair(&self, x: &mut [f64]) {
        if !self.is_discrete() {
            return;
        }
        for (v, (l, u)) in x.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            *v = v.round().clamp(*l, *u);
        }
    }

    /// Initial population `(pop_size, n_var)`.
    ///
    /// With a warm start the first member is `warm` itself and every other
    /// member redraws each coordinate of it with probability `prob`.
    /// Otherwise a Latin hypercube (continuous) or uniform integers
    /// (discrete) fill the bounds.
    pub fn initial_population<R: Rng + ?Sized>(
        &self,
        pop_size: usize,
        warm: Option<&[f64]>,
        prob: f64,
        rng: &mut R,
    ) -> DrainResult<Array2<f64>> {
        let n_var = self.n_var();
        match warm {
            Some(x0) => {
                ensure_shape("warm start", &[n_var], &[x0.len()])?;
                let mut pop = Array2::zeros((pop_size, n_var));
                for (i, mut row) in pop.outer_iter_mut().enumerate() {
                    for (j, v) in row.iter_mut().enumerate() {
                        *v = if i > 0 && rng.gen::<f64>() < prob {
                            self.sample_var(j, rng)
                        } else {
                            x0[j]
                        };
                    }
                }
                Ok(pop)
            }
            None if self.is_discrete() => {
                let lower: Vec<i64> = self.lower.iter().map(|v| *v as i64).collect();
                let upper: Vec<i64> = self.upper.iter().map(|v| *v as i64).collect();
                Ok(drain_math::sampling::random_integers(
                    pop_size, &lower, &upper, rng,
                ))
            }
            None => drain_math::sampling::latin_hypercube_in(pop_size, &self.lower, &self.upper, rng),
        }
    }
}

/// First key with the smallest L1 distance to `target`.
fn nearest_key(keys: &[Vec<i64>], target: &[i64]) -> usize {
    let mut best = (0, i64::MAX);
    for (row, key) in keys.iter().enumerate() {
        let dist: i64 = key.iter().zip(target).map(|(a, b)| (a - b).abs()).sum();
        if dist < best.1 {
            best = (row, dist);
        }
    }
    best.0
}

/// Hold each row of `schedule` for `repeat` consecutive steps.
pub fn repeat_decisions(schedule: ArrayView2<'_, f64>, repeat: usize) -> Array2<f64> {
    let (n, m) = schedule.dim();
    Array2::from_shape_fn((n * repeat, m), |(t, j)| schedule[[t / repeat, j]])
}

/// Pad by repeating the last row, or truncate, to exactly `target` rows.
pub fn pad_to_horizon(seq: ArrayView2<'_, f64>, target: usize) -> Array2<f64> {
    let (n, m) = seq.dim();
    if n == target {
        return seq.to_owned();
    }
    if n == 0 {
        return Array2::zeros((target, m));
    }
    let mut out = Array2::zeros((target, m));
    for (t, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
        row.assign(&seq.row(t.min(n - 1)));
    }
    out
}
