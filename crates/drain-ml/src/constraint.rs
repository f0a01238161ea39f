// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Constraint Projector
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Capacity and mass-balance gate applied to raw surrogate predictions.
//!
//! Overflow `q_w = max(0, q_us + r - q_ds)` is released only at nodes whose
//! head reached `hmax - FLOOD_MARGIN`; heads are clipped to `[0, hmax]`.
//! The same rule serves as hard projection during rollout and as the
//! balance regulariser during training.

use drain_math::autodiff::Var;
use drain_types::constants::{FLOOD_MARGIN, H_CHANNEL, Q_DS_CHANNEL, Q_US_CHANNEL};
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use ndarray::{Array2, ArrayD, Axis, IxDyn, Zip};

/// Channel-split result of [`ConstraintProjector::project`].
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub q_w: ArrayD<f64>,
    pub h: ArrayD<f64>,
    pub q_us: ArrayD<f64>,
    pub q_ds: ArrayD<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintProjector {
    hmax: Vec<f64>,
}

impl ConstraintProjector {
    pub fn new(hmax: Vec<f64>) -> Self {
        Self { hmax }
    }

    pub fn hmax(&self) -> &[f64] {
        &self.hmax
    }

    pub fn n_node(&self) -> usize {
        self.hmax.len()
    }

    fn check_nodes(&self, context: &str, shape: &[usize], node_axis: usize) -> DrainResult<()> {
        match shape.get(node_axis) {
            Some(&n) if n == self.hmax.len() => Ok(()),
            Some(_) => {
                let mut expected = shape.to_vec();
                expected[node_axis] = self.hmax.len();
                Err(DrainError::shape(context, &expected, shape))
            }
            None => Err(DrainError::shape(context, &[self.hmax.len()], shape)),
        }
    }

    /// Project per-node arrays of identical shape `(..., n_node)`.
    pub fn project(
        &self,
        h: &ArrayD<f64>,
        q_us: &ArrayD<f64>,
        q_ds: &ArrayD<f64>,
        r: &ArrayD<f64>,
    ) -> DrainResult<Projection> {
        let shape = h.shape();
        if shape.is_empty() {
            return Err(DrainError::shape("projected head", &[self.n_node()], shape));
        }
        self.check_nodes("projected head", shape, shape.len() - 1)?;
        ensure_shape("upstream inflow", shape, q_us.shape())?;
        ensure_shape("downstream outflow", shape, q_ds.shape())?;
        ensure_shape("runoff", shape, r.shape())?;

        let node_axis = shape.len() - 1;
        let mut q_w = ArrayD::zeros(h.raw_dim());
        let mut h_clip = h.clone();
        for (ix, &head) in h.indexed_iter() {
            let hmax = self.hmax[ix[node_axis]];
            if head >= hmax - FLOOD_MARGIN {
                q_w[&ix] = (q_us[&ix] + r[&ix] - q_ds[&ix]).max(0.0);
            }
            h_clip[&ix] = head.clamp(0.0, hmax);
        }
        Ok(Projection {
            q_w,
            h: h_clip,
            q_us: q_us.clone(),
            q_ds: q_ds.clone(),
        })
    }

    /// Array form of [`Self::project_var`]: `y (..., n_node, n_out)` and
    /// `r (..., n_node)` → `(..., n_node, n_out + 1)`, `q_w` last.
    pub fn project_prediction(&self, y: &ArrayD<f64>, r: &ArrayD<f64>) -> DrainResult<ArrayD<f64>> {
        let (h, q_us, q_ds) = split_channels(y)?;
        let p = self.project(&h, &q_us, &q_ds, r)?;
        let nd = y.ndim();
        let mut out_shape = y.shape().to_vec();
        out_shape[nd - 1] += 1;
        let mut out = ArrayD::zeros(IxDyn(&out_shape));
        out.slice_axis_mut(Axis(nd - 1), (..y.shape()[nd - 1]).into())
            .assign(y);
        out.index_axis_mut(Axis(nd - 1), H_CHANNEL).assign(&p.h);
        out.index_axis_mut(Axis(nd - 1), y.shape()[nd - 1])
            .assign(&p.q_w);
        Ok(out)
    }

    /// Mean squared mass-balance residual `(q_us + r - q_ds - q_w)²`.
    pub fn balance(&self, y: &ArrayD<f64>, r: &ArrayD<f64>) -> DrainResult<f64> {
        let (h, q_us, q_ds) = split_channels(y)?;
        let p = self.project(&h, &q_us, &q_ds, r)?;
        let mut total = 0.0;
        Zip::from(&q_us)
            .and(r)
            .and(&q_ds)
            .and(&p.q_w)
            .for_each(|&us, &rr, &ds, &qw| total += (us + rr - ds - qw).powi(2));
        Ok(total / q_us.len().max(1) as f64)
    }

    /// Gate mask `h >= hmax - FLOOD_MARGIN`, shaped like `h (..., n_node, 1)`.
    fn gate(&self, h: &ArrayD<f64>) -> ArrayD<f64> {
        let nd = h.ndim();
        let mut gate = ArrayD::zeros(h.raw_dim());
        for (ix, v) in h.indexed_iter() {
            if *v >= self.hmax[ix[nd - 2]] - FLOOD_MARGIN {
                gate[&ix] = 1.0;
            }
        }
        gate
    }

    /// Gated overflow of `y (..., n_node, n_out)` given `r (..., n_node, 1)`,
    /// shaped `(..., n_node, 1)`. The gate is a constant of the tape.
    pub fn overflow_var<'t>(&self, y: Var<'t>, r: Var<'t>) -> Var<'t> {
        let ax = y.ndim() - 1;
        let h = y.slice(ax, H_CHANNEL, H_CHANNEL + 1);
        let q_us = y.slice(ax, Q_US_CHANNEL, Q_US_CHANNEL + 1);
        let q_ds = y.slice(ax, Q_DS_CHANNEL, Q_DS_CHANNEL + 1);
        let gate = self.gate(&h.value());
        q_us.add(r).sub(q_ds).relu().mul_const(&gate)
    }

    /// Differentiable projection: `(..., n_node, n_out)` →
    /// `(..., n_node, n_out + 1)` with the head clipped and `q_w` appended.
    pub fn project_var<'t>(&self, y: Var<'t>, r: Var<'t>) -> Var<'t> {
        let ax = y.ndim() - 1;
        let n_out = y.shape()[ax];
        let q_w = self.overflow_var(y, r);
        let lo = ArrayD::zeros(IxDyn(&[self.n_node(), 1]));
        let hi = Array2::from_shape_fn((self.n_node(), 1), |(i, _)| self.hmax[i]).into_dyn();
        let h = y.slice(ax, H_CHANNEL, H_CHANNEL + 1).clamp(&lo, &hi);
        let mut parts = vec![h];
        if n_out > 1 {
            parts.push(y.slice(ax, 1, n_out));
        }
        parts.push(q_w);
        Var::concat(&parts, ax)
    }

    /// Differentiable [`Self::balance`]; returns a scalar.
    pub fn balance_var<'t>(&self, y: Var<'t>, r: Var<'t>) -> Var<'t> {
        let ax = y.ndim() - 1;
        let q_us = y.slice(ax, Q_US_CHANNEL, Q_US_CHANNEL + 1);
        let q_ds = y.slice(ax, Q_DS_CHANNEL, Q_DS_CHANNEL + 1);
        let q_w = self.overflow_var(y, r);
        q_us.add(r).sub(q_ds).sub(q_w).square().mean()
    }
}

fn split_channels(y: &ArrayD<f64>) -> DrainResult<(ArrayD<f64>, ArrayD<f64>, ArrayD<f64>)> {
    let nd = y.ndim();
    if nd < 2 || y.shape()[nd - 1] <= Q_DS_CHANNEL {
        return Err(DrainError::ConfigError(format!(
            "prediction of shape {:?} lacks h, q_us and q_ds channels",
            y.shape()
        )));
    }
    let channel = |c: usize| y.index_axis(Axis(nd - 1), c).to_owned();
    Ok((
        channel(H_CHANNEL),
        channel(Q_US_CHANNEL),
        channel(Q_DS_CHANNEL),
    ))
}
