// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Layers
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Differentiable building blocks of the graph sequence model.
//!
//! Layers own only names and sizes. Weights live in a [`ParamMap`] and
//! enter a tape through a [`Binding`], either as leaves (training) or as
//! constants (inference).

use drain_math::autodiff::{Tape, Var};
use drain_types::constants::NONE_TAGS;
use drain_types::error::{DrainError, DrainResult};
use ndarray::{Array2, ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use std::collections::BTreeMap;

pub type ParamMap = BTreeMap<String, ArrayD<f64>>;

/// Slope of the attention score activation.
const ATTENTION_LEAK: f64 = 0.2;

/// Parameters bound to one tape.
pub struct Binding<'t> {
    tape: &'t Tape,
    vars: BTreeMap<String, Var<'t>>,
}

impl<'t> Binding<'t> {
    pub fn new(tape: &'t Tape, params: &ParamMap, trainable: bool) -> Self {
        let vars = params
            .iter()
            .map(|(name, value)| {
                let var = if trainable {
                    tape.leaf(value.clone())
                } else {
                    tape.constant(value.clone())
                };
                (name.clone(), var)
            })
            .collect();
        Self { tape, vars }
    }

    /// Binding without parameters, for models that carry none.
    pub fn empty(tape: &'t Tape) -> Self {
        Self {
            tape,
            vars: BTreeMap::new(),
        }
    }

    pub fn tape(&self) -> &'t Tape {
        self.tape
    }

    pub fn param(&self, name: &str) -> Var<'t> {
        match self.vars.get(name) {
            Some(var) => *var,
            None => panic!("parameter {name} is not bound"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Var<'t>)> {
        self.vars.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Linear,
}

impl Activation {
    pub fn parse(tag: &str) -> DrainResult<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "linear" | "" => Ok(Activation::Linear),
            other => Err(DrainError::ConfigError(format!(
                "Unknown activation '{other}'"
            ))),
        }
    }

    pub fn apply<'t>(self, x: Var<'t>) -> Var<'t> {
        match self {
            Activation::Relu => x.relu(),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => x.sigmoid(),
            Activation::Linear => x,
        }
    }
}

/// Spatial operator selected by the `conv` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convolution {
    /// Spatial axis flattened into dense layers.
    None,
    /// Spectral graph convolution on `D^-1/2 (A + I) D^-1/2`.
    Spectral,
    /// Single-head graph attention over the neighbourhood mask.
    Attention,
}

impl Convolution {
    pub fn parse(tag: &str) -> DrainResult<Self> {
        if NONE_TAGS.contains(&tag) {
            Ok(Convolution::None)
        } else if tag.contains("GCN") {
            Ok(Convolution::Spectral)
        } else if tag.contains("GAT") {
            Ok(Convolution::Attention)
        } else {
            Err(DrainError::ConfigError(format!(
                "Unknown convolution layer '{tag}'"
            )))
        }
    }

    pub fn is_graph(self) -> bool {
        self != Convolution::None
    }
}

/// Temporal operator selected by the `recurrent` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrent {
    None,
    Conv1d,
    Gru,
}

impl Recurrent {
    pub fn parse(tag: &str) -> DrainResult<Self> {
        if NONE_TAGS.contains(&tag) {
            return Ok(Recurrent::None);
        }
        match tag {
            "Conv1D" | "conv1d" => Ok(Recurrent::Conv1d),
            "GRU" | "gru" => Ok(Recurrent::Gru),
            other => Err(DrainError::ConfigError(format!(
                "Unknown recurrent layer '{other}'"
            ))),
        }
    }
}

/// Fresh parameter values for `shapes`: zero biases, scaled normal
/// recurrent kernels, Xavier-uniform everything else.
pub fn init_params<R: Rng + ?Sized>(shapes: &[(String, Vec<usize>)], rng: &mut R) -> ParamMap {
    let mut params = ParamMap::new();
    for (name, shape) in shapes {
        let value = if name.ends_with("bias") {
            ArrayD::zeros(IxDyn(shape))
        } else if name.ends_with("recurrent_kernel") {
            let scale = 1.0 / (shape[0].max(1) as f64).sqrt();
            ArrayD::from_shape_simple_fn(IxDyn(shape), || {
                rng.sample::<f64, _>(StandardNormal) * scale
            })
        } else {
            let fan = shape.first().copied().unwrap_or(1) + shape.get(1).copied().unwrap_or(1);
            let limit = (6.0 / fan as f64).sqrt();
            let dist = Uniform::new_inclusive(-limit, limit);
            ArrayD::from_shape_simple_fn(IxDyn(shape), || dist.sample(rng))
        };
        params.insert(name.clone(), value);
    }
    params
}

/// `act(x W + b)` on the last axis.
#[derive(Debug, Clone)]
pub struct Dense {
    pub name: String,
    pub n_in: usize,
    pub n_out: usize,
    pub activation: Activation,
}

impl Dense {
    pub fn new(name: impl Into<String>, n_in: usize, n_out: usize, activation: Activation) -> Self {
        Self {
            name: name.into(),
            n_in,
            n_out,
            activation,
        }
    }

    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        vec![
            (format!("{}.kernel", self.name), vec![self.n_in, self.n_out]),
            (format!("{}.bias", self.name), vec![self.n_out]),
        ]
    }

    pub fn forward<'t>(&self, bound: &Binding<'t>, x: Var<'t>) -> Var<'t> {
        let w = bound.param(&format!("{}.kernel", self.name));
        let b = bound.param(&format!("{}.bias", self.name));
        self.activation.apply(x.matmul(w).add_bias(b))
    }
}

/// `act(F X W + b)` with a fixed `(n_node, n_node)` filter `F`.
#[derive(Debug, Clone)]
pub struct GraphConv {
    pub dense: Dense,
}

impl GraphConv {
    pub fn new(name: impl Into<String>, n_in: usize, n_out: usize, activation: Activation) -> Self {
        Self {
            dense: Dense::new(name, n_in, n_out, activation),
        }
    }

    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.dense.param_shapes()
    }

    /// `x (..., n_node, n_in)`.
    pub fn forward<'t>(&self, bound: &Binding<'t>, x: Var<'t>, filter: &Array2<f64>) -> Var<'t> {
        let w = bound.param(&format!("{}.kernel", self.dense.name));
        let b = bound.param(&format!("{}.bias", self.dense.name));
        self.dense
            .activation
            .apply(x.matmul(w).mix(filter).add_bias(b))
    }
}

/// Single-head attention convolution:
/// `e_ij = leaky(a_s·h_i + a_n·h_j)`, softmax over neighbours `j`.
#[derive(Debug, Clone)]
pub struct GraphAttention {
    pub name: String,
    pub n_in: usize,
    pub n_out: usize,
    pub activation: Activation,
}

impl GraphAttention {
    pub fn new(name: impl Into<String>, n_in: usize, n_out: usize, activation: Activation) -> Self {
        Self {
            name: name.into(),
            n_in,
            n_out,
            activation,
        }
    }

    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        vec![
            (format!("{}.kernel", self.name), vec![self.n_in, self.n_out]),
            (format!("{}.attn_self", self.name), vec![self.n_out, 1]),
            (format!("{}.attn_neigh", self.name), vec![self.n_out, 1]),
            (format!("{}.bias", self.name), vec![self.n_out]),
        ]
    }

    /// `x (l, n_node, n_in)`; `mask (n_node, n_node)`.
    pub fn forward<'t>(&self, bound: &Binding<'t>, x: Var<'t>, mask: &Array2<f64>) -> Var<'t> {
        let shape = x.shape();
        let (l, n) = (shape[0], shape[1]);
        let h = x.matmul(bound.param(&format!("{}.kernel", self.name)));
        let s_self = h
            .matmul(bound.param(&format!("{}.attn_self", self.name)))
            .reshape(&[l, n]);
        let s_neigh = h
            .matmul(bound.param(&format!("{}.attn_neigh", self.name)))
            .reshape(&[l, n]);
        let alpha = s_self
            .outer_sum(s_neigh)
            .leaky_relu(ATTENTION_LEAK)
            .masked_softmax(mask);
        let out = alpha
            .bmm(h)
            .add_bias(bound.param(&format!("{}.bias", self.name)));
        self.activation.apply(out)
    }
}

/// Causal 1-D convolution with `valid` padding over the time axis.
#[derive(Debug, Clone)]
pub struct TemporalConv {
    pub name: String,
    pub kernel: usize,
    pub n_in: usize,
    pub n_out: usize,
    pub activation: Activation,
}

impl TemporalConv {
    pub fn new(
        name: impl Into<String>,
        kernel: usize,
        n_in: usize,
        n_out: usize,
        activation: Activation,
    ) -> Self {
        Self {
            name: name.into(),
            kernel,
            n_in,
            n_out,
            activation,
        }
    }

    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        vec![
            (
                format!("{}.kernel", self.name),
                vec![self.kernel * self.n_in, self.n_out],
            ),
            (format!("{}.bias", self.name), vec![self.n_out]),
        ]
    }

    /// `x (l, t, n_in) -> (l, t - kernel + 1, n_out)`.
    pub fn forward<'t>(&self, bound: &Binding<'t>, x: Var<'t>) -> Var<'t> {
        let t = x.shape()[1];
        let steps = t + 1 - self.kernel;
        let windows: Vec<Var<'t>> = (0..steps)
            .map(|tau| {
                let taps: Vec<Var<'t>> = (0..self.kernel)
                    .map(|j| x.slice(1, tau + j, tau + j + 1))
                    .collect();
                Var::concat(&taps, 2)
            })
            .collect();
        let stacked = Var::concat(&windows, 1);
        let w = bound.param(&format!("{}.kernel", self.name));
        let b = bound.param(&format!("{}.bias", self.name));
        self.activation.apply(stacked.matmul(w).add_bias(b))
    }
}

/// Gated recurrent unit, reset gate applied after the recurrent product:
/// `n = tanh(x W_n + b_n + r ⊙ (h U_n + c_n))`, `h' = z ⊙ h + (1 - z) ⊙ n`.
#[derive(Debug, Clone)]
pub struct Gru {
    pub name: String,
    pub n_in: usize,
    pub hidden: usize,
}

impl Gru {
    pub fn new(name: impl Into<String>, n_in: usize, hidden: usize) -> Self {
        Self {
            name: name.into(),
            n_in,
            hidden,
        }
    }

    pub fn param_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let h3 = 3 * self.hidden;
        vec![
            (format!("{}.kernel", self.name), vec![self.n_in, h3]),
            (format!("{}.recurrent_kernel", self.name), vec![self.hidden, h3]),
            (format!("{}.input_bias", self.name), vec![h3]),
            (format!("{}.recurrent_bias", self.name), vec![h3]),
        ]
    }

    /// `x (l, t, n_in) -> (l, keep, hidden)`, the last `keep` states.
    pub fn forward<'t>(&self, bound: &Binding<'t>, x: Var<'t>, keep: usize) -> Var<'t> {
        let shape = x.shape();
        let (l, t) = (shape[0], shape[1]);
        let hd = self.hidden;
        let xw = x
            .matmul(bound.param(&format!("{}.kernel", self.name)))
            .add_bias(bound.param(&format!("{}.input_bias", self.name)));
        let u = bound.param(&format!("{}.recurrent_kernel", self.name));
        let ub = bound.param(&format!("{}.recurrent_bias", self.name));

        let mut h = bound.tape().constant(ArrayD::zeros(IxDyn(&[l, hd])));
        let mut outputs = Vec::with_capacity(keep);
        for step in 0..t {
            let xt = xw.slice(1, step, step + 1).reshape(&[l, 3 * hd]);
            let hu = h.matmul(u).add_bias(ub);
            let z = xt.slice(1, 0, hd).add(hu.slice(1, 0, hd)).sigmoid();
            let r = xt.slice(1, hd, 2 * hd).add(hu.slice(1, hd, 2 * hd)).sigmoid();
            let n = xt
                .slice(1, 2 * hd, 3 * hd)
                .add(r.mul(hu.slice(1, 2 * hd, 3 * hd)))
                .tanh();
            h = z.mul(h).add(z.affine(-1.0, 1.0).mul(n));
            if step + keep >= t {
                outputs.push(h.reshape(&[l, 1, hd]));
            }
        }
        Var::concat(&outputs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params_for(shapes: &[(String, Vec<usize>)]) -> ParamMap {
        let mut rng = StdRng::seed_from_u64(5);
        init_params(shapes, &mut rng)
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!(Convolution::parse("GCNconv").unwrap(), Convolution::Spectral);
        assert_eq!(Convolution::parse("GATconv").unwrap(), Convolution::Attention);
        assert_eq!(Convolution::parse("None").unwrap(), Convolution::None);
        assert_eq!(Convolution::parse("NoneType").unwrap(), Convolution::None);
        assert!(Convolution::parse("CNN").is_err());
        assert_eq!(Recurrent::parse("False").unwrap(), Recurrent::None);
        assert_eq!(Recurrent::parse("GRU").unwrap(), Recurrent::Gru);
        assert!(Recurrent::parse("LSTM").is_err());
        assert!(Activation::parse("swish").is_err());
    }

    #[test]
    fn test_init_biases_zero_and_kernels_bounded() {
        let dense = Dense::new("d", 4, 8, Activation::Relu);
        let params = params_for(&dense.param_shapes());
        assert!(params["d.bias"].iter().all(|v| *v == 0.0));
        let limit = (6.0f64 / 12.0).sqrt();
        assert!(params["d.kernel"].iter().all(|v| v.abs() <= limit));
        assert!(params["d.kernel"].iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_graph_conv_uses_filter() {
        let layer = GraphConv::new("g", 1, 1, Activation::Linear);
        let mut params = params_for(&layer.param_shapes());
        params.insert("g.kernel".into(), ArrayD::ones(IxDyn(&[1, 1])));
        let tape = Tape::new();
        let bound = Binding::new(&tape, &params, false);
        let x = tape.constant(ndarray::arr2(&[[1.0], [2.0], [3.0]]).into_dyn());
        let filter = ndarray::arr2(&[[0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);
        let y = layer.forward(&bound, x, &filter).value();
        assert_eq!(y.shape(), &[3, 1]);
        assert_eq!(y[[0, 0]], 2.0);
        assert_eq!(y[[2, 0]], 1.0);
    }

    #[test]
    fn test_attention_rows_respect_mask() {
        let layer = GraphAttention::new("a", 2, 3, Activation::Linear);
        let params = params_for(&layer.param_shapes());
        let tape = Tape::new();
        let bound = Binding::new(&tape, &params, false);
        let x = tape.constant(ArrayD::from_shape_fn(IxDyn(&[2, 3, 2]), |ix| {
            (ix[0] + 2 * ix[1] + ix[2]) as f64 * 0.1
        }));
        // Node 2 only sees itself, so its output is its own projection + bias.
        let mask = ndarray::arr2(&[[1.0, 1.0, 0.0], [1.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let y = layer.forward(&bound, x, &mask).value();
        let h = x.matmul(bound.param("a.kernel")).value();
        assert_eq!(y.shape(), &[2, 3, 3]);
        for c in 0..3 {
            assert!((y[[1, 2, c]] - h[[1, 2, c]]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_temporal_conv_output_length() {
        let layer = TemporalConv::new("c", 4, 2, 5, Activation::Relu);
        let params = params_for(&layer.param_shapes());
        let tape = Tape::new();
        let bound = Binding::new(&tape, &params, false);
        let x = tape.constant(ArrayD::ones(IxDyn(&[3, 6, 2])));
        assert_eq!(layer.forward(&bound, x).shape(), vec![3, 3, 5]);
    }

    #[test]
    fn test_gru_zero_weights_half_blend() {
        let layer = Gru::new("r", 1, 2);
        let mut params = params_for(&layer.param_shapes());
        for v in params.values_mut() {
            v.fill(0.0);
        }
        // Candidate state pinned at tanh(1) via the input bias.
        params.get_mut("r.input_bias").unwrap()[[4]] = 1.0;
        let tape = Tape::new();
        let bound = Binding::new(&tape, &params, false);
        let x = tape.constant(ArrayD::zeros(IxDyn(&[1, 3, 1])));
        let y = layer.forward(&bound, x, 2).value();
        assert_eq!(y.shape(), &[1, 2, 2]);
        // z = 0.5 each step: h1 = 0.5 n, h2 = 0.75 n, h3 = 0.875 n
        let n = 1.0f64.tanh();
        assert!((y[[0, 0, 0]] - 0.75 * n).abs() < 1e-12);
        assert!((y[[0, 1, 0]] - 0.875 * n).abs() < 1e-12);
        assert!(y[[0, 1, 1]].abs() < 1e-12);
    }
}
