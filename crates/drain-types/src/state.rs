// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::constants::H_CHANNEL;
use crate::error::{ensure_shape, DrainError, DrainResult};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};

/// Named axes of the batched (batch, time, node, feature) layout.
pub const BATCH_AXIS: usize = 0;
pub const TIME_AXIS: usize = 1;
pub const NODE_AXIS: usize = 2;
pub const FEATURE_AXIS: usize = 3;

/// Observed node states over a sliding window.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    /// Node window `(seq_in, n_node, n_in)`; last channel is runoff.
    pub nodes: Array3<f64>,
    /// Edge window `(seq_in, n_edge, edge_in)` for edge-feature models.
    pub edges: Option<Array3<f64>>,
}

impl NetworkState {
    pub fn new(nodes: Array3<f64>) -> Self {
        Self { nodes, edges: None }
    }

    pub fn with_edges(mut self, edges: Array3<f64>) -> DrainResult<Self> {
        if edges.dim().0 != self.nodes.dim().0 {
            return Err(DrainError::shape(
                "edge window length",
                &[self.nodes.dim().0],
                &[edges.dim().0],
            ));
        }
        self.edges = Some(edges);
        Ok(self)
    }

    pub fn window_len(&self) -> usize {
        self.nodes.dim().0
    }

    pub fn n_node(&self) -> usize {
        self.nodes.dim().1
    }

    pub fn n_in(&self) -> usize {
        self.nodes.dim().2
    }

    /// Check the edge window against `(seq_in, n_edge, edge_in)`; a model
    /// without edge features (`edge_in == 0`) accepts anything.
    pub fn check_edges(&self, seq_in: usize, n_edge: usize, edge_in: usize) -> DrainResult<()> {
        if edge_in == 0 {
            return Ok(());
        }
        let expected = [seq_in, n_edge, edge_in];
        match &self.edges {
            Some(e) => ensure_shape("edge window", &expected, e.shape()),
            None => Err(DrainError::shape("edge window", &expected, &[])),
        }
    }

    /// Check against the configured `(seq_in, n_node, n_in)`.
    pub fn check(&self, seq_in: usize, n_node: usize, n_in: usize) -> DrainResult<()> {
        ensure_shape("network state window", &[seq_in, n_node, n_in], self.nodes.shape())
    }

    /// Most recent observation `(n_node, n_in)`.
    pub fn latest(&self) -> ArrayView2<'_, f64> {
        let last = self.window_len().saturating_sub(1);
        self.nodes.index_axis(Axis(0), last)
    }
}

/// Predicted node states, `q_w` appended as the last channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// `(horizon, n_node, n_out + 1)`.
    pub states: Array3<f64>,
}

impl Trajectory {
    pub fn new(states: Array3<f64>) -> Self {
        Self { states }
    }

    pub fn len(&self) -> usize {
        self.states.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Head per step and node.
    pub fn heads(&self) -> ArrayView2<'_, f64> {
        self.states.index_axis(Axis(2), H_CHANNEL)
    }

    /// Overflow per step and node.
    pub fn overflow(&self) -> ArrayView2<'_, f64> {
        let last = self.states.dim().2.saturating_sub(1);
        self.states.index_axis(Axis(2), last)
    }

    /// Per-step overflow summed over nodes.
    pub fn total_overflow(&self) -> Vec<f64> {
        self.overflow().sum_axis(Axis(1)).to_vec()
    }

    /// First `n` steps.
    pub fn head_steps(&self, n: usize) -> Trajectory {
        let n = n.min(self.len());
        Trajectory::new(self.states.slice(s![..n, .., ..]).to_owned())
    }
}

/// A control sequence and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Flat step-major decision, length `n_step * n_act`.
    pub encoded: Vec<f64>,
    pub objective: f64,
}

impl Candidate {
    pub fn new(encoded: Vec<f64>, objective: f64) -> Self {
        Self { encoded, objective }
    }

    /// Reshape into `(n_step, n_act)`.
    pub fn schedule(&self, n_act: usize) -> DrainResult<Array2<f64>> {
        to_schedule(&self.encoded, n_act)
    }
}

/// Step-major flat vector → `(n_step, n_act)`.
pub fn to_schedule(encoded: &[f64], n_act: usize) -> DrainResult<Array2<f64>> {
    if n_act == 0 || encoded.len() % n_act != 0 {
        return Err(DrainError::shape(
            "control sequence",
            &[encoded.len() / n_act.max(1), n_act],
            &[encoded.len()],
        ));
    }
    Array2::from_shape_vec((encoded.len() / n_act, n_act), encoded.to_vec())
        .map_err(|e| DrainError::ConfigError(format!("control sequence reshape: {e}")))
}
