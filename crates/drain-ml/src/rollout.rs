// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Rollout Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Autoregressive horizon rollout of a [`SequenceModel`].
//!
//! Window row `i` carries `(state_i, forcing_{i+1})`. Before every call the
//! forcing of the last `seq_out` rows is replaced by the runoff and
//! control settings of the steps being predicted; projected predictions
//! then shift into the window. A rolling model (`seq_out = 1`) is the
//! degenerate case of the block loop.

use crate::constraint::ConstraintProjector;
use crate::layers::Binding;
use crate::model::{ModelShape, SequenceModel};
use drain_math::autodiff::{Tape, Var};
use drain_types::error::{ensure_shape, DrainError, DrainResult};
use drain_types::state::{NetworkState, Trajectory};
use ndarray::{Array3, Array4, ArrayD, ArrayView2, ArrayView3, Axis, Ix3, Ix4, IxDyn};

pub struct RolloutEngine<'m> {
    model: &'m dyn SequenceModel,
    projector: ConstraintProjector,
}

/// Keep the first `t - k` rows of `hist` and append `next`.
fn substitute<'t>(hist: Var<'t>, next: Var<'t>, t: usize, k: usize) -> Var<'t> {
    if k >= t {
        next.slice(1, k - t, k)
    } else {
        Var::concat(&[hist.slice(1, 0, t - k), next], 1)
    }
}

/// Append `new` and drop as many of the oldest rows.
fn advance<'t>(hist: Var<'t>, new: Var<'t>, t: usize) -> Var<'t> {
    let k = new.shape()[1];
    Var::concat(&[hist, new], 1).slice(1, k, t + k)
}

impl<'m> RolloutEngine<'m> {
    pub fn new(model: &'m dyn SequenceModel) -> DrainResult<Self> {
        let s = model.shape();
        if s.n_in != s.n_out + 1 {
            return Err(DrainError::ConfigError(format!(
                "rollout needs n_in = n_out + 1 (state channels plus runoff), got n_in={} n_out={}",
                s.n_in, s.n_out
            )));
        }
        ensure_shape("node capacities", &[s.n_node], &[s.hmax.len()])?;
        Ok(Self {
            model,
            projector: ConstraintProjector::new(s.hmax.clone()),
        })
    }

    pub fn shape(&self) -> &ModelShape {
        self.model.shape()
    }

    pub fn model(&self) -> &'m dyn SequenceModel {
        self.model
    }

    pub fn projector(&self) -> &ConstraintProjector {
        &self.projector
    }

    /// Differentiable rollout over `runoff (b, h, n_node)`.
    ///
    /// `window (b, seq_in, n_node, n_in)`, `settings (b, h, n_act)`,
    /// `edges (b, seq_in, n_edge, edge_in)`. Returns
    /// `(b, h, n_node, n_out + 1)` with `q_w` last. With `project` unset
    /// heads are left unclipped.
    pub fn rollout_var<'t>(
        &self,
        bound: &Binding<'t>,
        window: &ArrayD<f64>,
        runoff: &ArrayD<f64>,
        settings: Option<Var<'t>>,
        edges: Option<&ArrayD<f64>>,
        project: bool,
    ) -> DrainResult<Var<'t>> {
        let s = self.model.shape();
        let tape = bound.tape();
        let (n, t, k) = (s.n_node, s.seq_in, s.seq_out);
        let b = window.shape().first().copied().unwrap_or(0);
        ensure_shape("rollout window", &[b, t, n, s.n_in], window.shape())?;
        let h = match runoff.shape() {
            &[rb, h, rn] if rb == b && rn == n && h > 0 => h,
            other => return Err(DrainError::shape("runoff forecast", &[b, 1, n], other)),
        };
        let n_block = h.div_ceil(k);
        let h_pad = n_block * k;

        let controls_all = match (s.n_act, settings) {
            (0, _) => None,
            (na, Some(c)) => {
                ensure_shape("control settings", &[b, h, na], &c.shape())?;
                let c = if h_pad > h {
                    Var::concat(&[c, c.slice(1, h - 1, h).broadcast_axis(1, h_pad - h)], 1)
                } else {
                    c
                };
                Some(c.reshape(&[b, h_pad, 1, na]).broadcast_axis(2, n))
            }
            (na, None) => {
                return Err(DrainError::shape("control settings", &[b, h, na], &[]));
            }
        };
        let edges = match (s.edge_in, edges) {
            (0, _) => None,
            (ei, Some(e)) => match e.shape() {
                &[eb, et, ne, ef] if eb == b && et == t && ne == s.n_edge && ef == ei => {
                    Some(tape.constant(e.clone()))
                }
                other => {
                    return Err(DrainError::shape("edge window", &[b, t, s.n_edge, ei], other))
                }
            },
            (ei, None) => {
                return Err(DrainError::shape("edge window", &[b, t, s.n_edge, ei], &[]))
            }
        };

        let mut r_pad = ArrayD::zeros(IxDyn(&[b, h_pad, n, 1]));
        for step in 0..h_pad {
            let mut row = r_pad.index_axis_mut(Axis(1), step);
            row.index_axis_mut(Axis(2), 0)
                .assign(&runoff.index_axis(Axis(1), step.min(h - 1)));
        }
        let r_all = tape.constant(r_pad);

        let win = tape.constant(window.clone());
        let mut states = win.slice(3, 0, s.n_out);
        let mut forcing = win.slice(3, s.n_out, s.n_in);
        let mut controls = controls_all.map(|c| c.slice(1, 0, 1).broadcast_axis(1, t));
        let mut blocks = Vec::with_capacity(n_block);

        for blk in 0..n_block {
            let (start, end) = (blk * k, blk * k + k);
            let r_next = r_all.slice(1, start, end);
            let forcing_in = substitute(forcing, r_next, t, k);
            let c_next = controls_all.map(|c| c.slice(1, start, end));
            let controls_in = match (controls, c_next) {
                (Some(hist), Some(next)) => Some(substitute(hist, next, t, k)),
                _ => None,
            };

            let mut parts = vec![states, forcing_in];
            parts.extend(controls_in);
            let x = Var::concat(&parts, 3);
            let y = self.model.step(bound, x, edges);
            ensure_shape("model output", &[b, k, n, s.n_out], &y.shape())?;

            let full = if project {
                self.projector.project_var(y, r_next)
            } else {
                Var::concat(&[y, self.projector.overflow_var(y, r_next)], 3)
            };
            blocks.push(full);

            states = advance(states, full.slice(3, 0, s.n_out), t);
            forcing = advance(forcing_in, r_next, t);
            controls = match (controls_in, c_next) {
                (Some(hist), Some(next)) => Some(advance(hist, next, t)),
                _ => None,
            };
        }

        Ok(Var::concat(&blocks, 1).slice(1, 0, h))
    }

    /// Projected trajectory of one scenario: `runoff (h, n_node)`,
    /// `settings (h, n_act)` realized per step.
    pub fn rollout(
        &self,
        state: &NetworkState,
        runoff: ArrayView2<'_, f64>,
        settings: Option<ArrayView2<'_, f64>>,
    ) -> DrainResult<Trajectory> {
        let s = self.model.shape();
        state.check(s.seq_in, s.n_node, s.n_in)?;
        let window = state.nodes.clone().insert_axis(Axis(0)).into_dyn();
        let runoff = runoff.to_owned().insert_axis(Axis(0)).into_dyn();
        let edges = state
            .edges
            .as_ref()
            .map(|e| e.clone().insert_axis(Axis(0)).into_dyn());

        let tape = Tape::new();
        let bound = self.model.bind(&tape, false);
        let settings = settings.map(|c| tape.constant(c.to_owned().insert_axis(Axis(0)).into_dyn()));
        let out = self.rollout_var(&bound, &window, &runoff, settings, edges.as_ref(), true)?;
        let states = out
            .value()
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix3>()
            .map_err(|e| DrainError::ConfigError(format!("rollout output: {e}")))?;
        Ok(Trajectory::new(states))
    }

    /// One vectorised call for a whole population sharing the same start
    /// state and forecast: `settings (p, h, n_act)` → `(p, h, n_node, n_out + 1)`.
    pub fn rollout_batch(
        &self,
        state: &NetworkState,
        runoff: ArrayView2<'_, f64>,
        settings: ArrayView3<'_, f64>,
    ) -> DrainResult<Array4<f64>> {
        let s = self.model.shape();
        state.check(s.seq_in, s.n_node, s.n_in)?;
        let (p, h, _) = settings.dim();
        let window = broadcast_batch(&state.nodes, p);
        let runoff = broadcast_batch(&runoff.to_owned().insert_axis(Axis(2)), p)
            .index_axis_move(Axis(3), 0);
        let edges = state.edges.as_ref().map(|e| broadcast_batch(e, p));
        ensure_shape("runoff forecast", &[p, h, s.n_node], runoff.shape())?;

        let tape = Tape::new();
        let bound = self.model.bind(&tape, false);
        let settings = (s.n_act > 0).then(|| tape.constant(settings.to_owned().into_dyn()));
        let out = self.rollout_var(&bound, &window, &runoff, settings, edges.as_ref(), true)?;
        out.value()
            .into_dimensionality::<Ix4>()
            .map_err(|e| DrainError::ConfigError(format!("rollout output: {e}")))
    }
}

/// Repeat `a (t, n, f)` along a new leading batch axis of size `p`.
fn broadcast_batch(a: &Array3<f64>, p: usize) -> ArrayD<f64> {
    let (t, n, f) = a.dim();
    let mut out = ArrayD::zeros(IxDyn(&[p, t, n, f]));
    for mut lane in out.outer_iter_mut() {
        lane.assign(a);
    }
    out
}
