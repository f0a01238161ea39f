// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Flood Objective
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Weighted total overflow of a trajectory, `Σ_t Σ_n w_n · q_w[t, n]`.

use drain_math::autodiff::Var;
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use drain_types::state::Trajectory;
use ndarray::{Array1, Array2, ArrayView4, Axis};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloodObjective {
    weights: Option<Vec<f64>>,
}

impl FloodObjective {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-node weights; must be finite and non-negative.
    pub fn with_weights(weights: Vec<f64>) -> DrainResult<Self> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DrainError::ConfigError(
                "objective weights must be finite and >= 0".to_string(),
            ));
        }
        Ok(Self {
            weights: Some(weights),
        })
    }

    fn node_weights(&self, n_node: usize) -> DrainResult<Option<&[f64]>> {
        match &self.weights {
            Some(w) => {
                ensure_shape("objective weights", &[n_node], &[w.len()])?;
                Ok(Some(w.as_slice()))
            }
            None => Ok(None),
        }
    }

    /// `traj (b, h, n_node, c)` with `q_w` in the last channel → `(b,)`.
    pub fn score_var<'t>(&self, traj: Var<'t>) -> DrainResult<Var<'t>> {
        let shape = traj.shape();
        if shape.len() != 4 || shape[3] == 0 {
            return Err(DrainError::shape("trajectory batch", &[0, 0, 0, 1], &shape));
        }
        let (n, c) = (shape[2], shape[3]);
        let mut q_w = traj.slice(3, c - 1, c);
        if let Some(w) = self.node_weights(n)? {
            let w = Array2::from_shape_fn((n, 1), |(i, _)| w[i]).into_dyn();
            q_w = q_w.mul_const(&w);
        }
        Ok(q_w.sum_axis(3).sum_axis(2).sum_axis(1))
    }

    /// Array form of [`Self::score_var`].
    pub fn score(&self, traj: ArrayView4<'_, f64>) -> DrainResult<Array1<f64>> {
        let (_, _, n, c) = traj.dim();
        if c == 0 {
            return Err(DrainError::shape("trajectory batch", &[0, 0, n, 1], traj.shape()));
        }
        let weights = self.node_weights(n)?;
        let q_w = traj.index_axis(Axis(3), c - 1);
        Ok(q_w
            .outer_iter()
            .map(|cand| match weights {
                Some(w) => cand
                    .rows()
                    .into_iter()
                    .map(|row| row.iter().zip(w).map(|(q, w)| q * w).sum::<f64>())
                    .sum(),
                None => cand.sum(),
            })
            .collect())
    }

    pub fn score_trajectory(&self, traj: &Trajectory) -> DrainResult<f64> {
        let overflow = traj.overflow();
        Ok(match self.node_weights(overflow.ncols())? {
            Some(w) => overflow
                .rows()
                .into_iter()
                .map(|row| row.iter().zip(w).map(|(q, w)| q * w).sum::<f64>())
                .sum(),
            None => overflow.sum(),
        })
    }
}
