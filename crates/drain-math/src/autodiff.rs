// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Reverse-Mode Autodiff
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Tape-based reverse-mode differentiation over dense `ndarray` tensors.
//!
//! Every forward operation appends one node holding its value. A node
//! requires a gradient when any of its inputs does, so constants and
//! everything computed purely from constants are skipped in
//! [`Tape::backward`]. Shape errors inside the tape are programming errors
//! and panic, like `ndarray` arithmetic does; user-facing shape checks
//! happen before values enter the tape.

use ndarray::{Array2, Array3, ArrayD, Axis, IxDyn, Slice};
use std::cell::RefCell;

#[derive(Debug, Clone)]
enum Op {
    Leaf,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Affine { x: usize, scale: f64 },
    MulConst { x: usize, c: ArrayD<f64> },
    AddBias { x: usize, b: usize },
    MatMul { x: usize, w: usize },
    Mix { x: usize, m: Array2<f64> },
    BatchMatMul(usize, usize),
    OuterSum(usize, usize),
    MaskedSoftmax(usize),
    Relu(usize),
    LeakyRelu { x: usize, alpha: f64 },
    Tanh(usize),
    Sigmoid(usize),
    Abs(usize),
    Square(usize),
    Clamp { x: usize, lo: ArrayD<f64>, hi: ArrayD<f64> },
    Reshape(usize),
    Permute { x: usize, axes: Vec<usize> },
    Slice { x: usize, axis: usize, start: usize },
    Concat { parts: Vec<usize>, axis: usize },
    BroadcastAxis { x: usize, axis: usize },
    SumAxis { x: usize, axis: usize },
    Sum(usize),
    Mean(usize),
}

impl Op {
    fn parents(&self) -> Vec<usize> {
        match self {
            Op::Leaf => Vec::new(),
            Op::Add(a, b)
            | Op::Sub(a, b)
            | Op::Mul(a, b)
            | Op::BatchMatMul(a, b)
            | Op::OuterSum(a, b) => vec![*a, *b],
            Op::AddBias { x, b } => vec![*x, *b],
            Op::MatMul { x, w } => vec![*x, *w],
            Op::Concat { parts, .. } => parts.clone(),
            Op::Affine { x, .. }
            | Op::MulConst { x, .. }
            | Op::Mix { x, .. }
            | Op::LeakyRelu { x, .. }
            | Op::Clamp { x, .. }
            | Op::Permute { x, .. }
            | Op::Slice { x, .. }
            | Op::BroadcastAxis { x, .. }
            | Op::SumAxis { x, .. } => vec![*x],
            Op::MaskedSoftmax(x)
            | Op::Relu(x)
            | Op::Tanh(x)
            | Op::Sigmoid(x)
            | Op::Abs(x)
            | Op::Square(x)
            | Op::Reshape(x)
            | Op::Sum(x)
            | Op::Mean(x) => vec![*x],
        }
    }
}

#[derive(Debug)]
struct Node {
    value: ArrayD<f64>,
    op: Op,
    requires_grad: bool,
}

/// Append-only record of a forward computation.
#[derive(Debug, Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

/// Handle to one tape node.
#[derive(Debug, Clone, Copy)]
pub struct Var<'t> {
    tape: &'t Tape,
    id: usize,
}

/// Gradients of a scalar root with respect to every node that needs one.
#[derive(Debug)]
pub struct Gradients {
    grads: Vec<Option<ArrayD<f64>>>,
}

impl Gradients {
    pub fn get(&self, var: Var<'_>) -> Option<&ArrayD<f64>> {
        self.grads.get(var.id).and_then(|g| g.as_ref())
    }

    pub fn take(&mut self, var: Var<'_>) -> Option<ArrayD<f64>> {
        self.grads.get_mut(var.id).and_then(|g| g.take())
    }
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Differentiable input.
    pub fn leaf(&self, value: ArrayD<f64>) -> Var<'_> {
        self.push_node(value, Op::Leaf, true)
    }

    /// Input excluded from differentiation.
    pub fn constant(&self, value: ArrayD<f64>) -> Var<'_> {
        self.push_node(value, Op::Leaf, false)
    }

    fn push_node(&self, value: ArrayD<f64>, op: Op, requires_grad: bool) -> Var<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let id = nodes.len();
        nodes.push(Node {
            value,
            op,
            requires_grad,
        });
        Var { tape: self, id }
    }

    fn push(&self, value: ArrayD<f64>, op: Op) -> Var<'_> {
        let requires_grad = {
            let nodes = self.nodes.borrow();
            op.parents().iter().any(|&p| nodes[p].requires_grad)
        };
        self.push_node(value, op, requires_grad)
    }

    /// Reverse sweep from `root`, seeded with ones.
    pub fn backward(&self, root: Var<'_>) -> Gradients {
        let nodes = self.nodes.borrow();
        let mut grads: Vec<Option<ArrayD<f64>>> = vec![None; nodes.len()];
        grads[root.id] = Some(ArrayD::ones(nodes[root.id].value.raw_dim()));

        for i in (0..=root.id).rev() {
            if !nodes[i].requires_grad {
                continue;
            }
            let g = match grads[i].take() {
                Some(g) => g,
                None => continue,
            };
            let value = |id: usize| &nodes[id].value;
            let mut acc = |id: usize, delta: ArrayD<f64>| {
                if nodes[id].requires_grad {
                    match &mut grads[id] {
                        Some(existing) => *existing += &delta,
                        slot => *slot = Some(delta),
                    }
                }
            };

            match &nodes[i].op {
                Op::Leaf => {}
                Op::Add(a, b) => {
                    acc(*a, g.clone());
                    acc(*b, g.clone());
                }
                Op::Sub(a, b) => {
                    acc(*a, g.clone());
                    acc(*b, -&g);
                }
                Op::Mul(a, b) => {
                    acc(*a, &g * value(*b));
                    acc(*b, &g * value(*a));
                }
                Op::Affine { x, scale } => acc(*x, &g * *scale),
                Op::MulConst { x, c } => acc(*x, &g * c),
                Op::AddBias { x, b } => {
                    let n = value(*b).len();
                    let rows = g.len() / n.max(1);
                    let db = to_matrix(&g, rows, n).sum_axis(Axis(0)).into_dyn();
                    acc(*x, g.clone());
                    acc(*b, reshape_array(&db, value(*b).shape()));
                }
                Op::MatMul { x, w } => {
                    let xv = value(*x);
                    let wv = to_matrix(value(*w), value(*w).shape()[0], value(*w).shape()[1]);
                    let (k, n) = wv.dim();
                    let rows = xv.len() / k.max(1);
                    let g2 = to_matrix(&g, rows, n);
                    let x2 = to_matrix(xv, rows, k);
                    acc(*x, reshape_array(&g2.dot(&wv.t()).into_dyn(), xv.shape()));
                    acc(*w, x2.t().dot(&g2).into_dyn());
                }
                Op::Mix { x, m } => {
                    acc(*x, mix_array(&m.t().to_owned(), &g));
                }
                Op::BatchMatMul(a, b) => {
                    let av = as_array3(value(*a));
                    let bv = as_array3(value(*b));
                    let g3 = as_array3(&g);
                    let mut da = Array3::zeros(av.raw_dim());
                    let mut db = Array3::zeros(bv.raw_dim());
                    for l in 0..av.dim().0 {
                        let gl = g3.index_axis(Axis(0), l);
                        da.index_axis_mut(Axis(0), l)
                            .assign(&gl.dot(&bv.index_axis(Axis(0), l).t()));
                        db.index_axis_mut(Axis(0), l)
                            .assign(&av.index_axis(Axis(0), l).t().dot(&gl));
                    }
                    acc(*a, da.into_dyn());
                    acc(*b, db.into_dyn());
                }
                Op::OuterSum(a, b) => {
                    let nd = g.ndim();
                    acc(*a, g.sum_axis(Axis(nd - 1)));
                    acc(*b, g.sum_axis(Axis(nd - 2)));
                }
                Op::MaskedSoftmax(x) => {
                    let y = &nodes[i].value;
                    let nd = y.ndim();
                    let dot = (&g * y).sum_axis(Axis(nd - 1)).insert_axis(Axis(nd - 1));
                    let dx = y * &(&g - &dot);
                    acc(*x, dx);
                }
                Op::Relu(x) => {
                    let mask = value(*x).mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                    acc(*x, &g * &mask);
                }
                Op::LeakyRelu { x, alpha } => {
                    let alpha = *alpha;
                    let slope = value(*x).mapv(|v| if v > 0.0 { 1.0 } else { alpha });
                    acc(*x, &g * &slope);
                }
                Op::Tanh(x) => {
                    let d = nodes[i].value.mapv(|y| 1.0 - y * y);
                    acc(*x, &g * &d);
                }
                Op::Sigmoid(x) => {
                    let d = nodes[i].value.mapv(|y| y * (1.0 - y));
                    acc(*x, &g * &d);
                }
                Op::Abs(x) => {
                    let d = value(*x).mapv(|v| {
                        if v > 0.0 {
                            1.0
                        } else if v < 0.0 {
                            -1.0
                        } else {
                            0.0
                        }
                    });
                    acc(*x, &g * &d);
                }
                Op::Square(x) => acc(*x, &g * &value(*x).mapv(|v| 2.0 * v)),
                Op::Clamp { x, lo, hi } => {
                    let mut d = value(*x).clone();
                    ndarray::Zip::from(&mut d)
                        .and(lo)
                        .and(hi)
                        .for_each(|v, &l, &h| *v = if *v > l && *v < h { 1.0 } else { 0.0 });
                    acc(*x, &g * &d);
                }
                Op::Reshape(x) => acc(*x, reshape_array(&g, value(*x).shape())),
                Op::Permute { x, axes } => {
                    let mut inverse = vec![0; axes.len()];
                    for (i, &a) in axes.iter().enumerate() {
                        inverse[a] = i;
                    }
                    acc(*x, g.view().permuted_axes(IxDyn(&inverse)).to_owned());
                }
                Op::Slice { x, axis, start } => {
                    let mut dx = ArrayD::zeros(value(*x).raw_dim());
                    let end = start + g.shape()[*axis];
                    dx.slice_axis_mut(Axis(*axis), Slice::from(*start..end))
                        .assign(&g);
                    acc(*x, dx);
                }
                Op::Concat { parts, axis } => {
                    let mut offset = 0;
                    for &p in parts {
                        let width = value(p).shape()[*axis];
                        let piece = g
                            .slice_axis(Axis(*axis), Slice::from(offset..offset + width))
                            .to_owned();
                        acc(p, piece);
                        offset += width;
                    }
                }
                Op::BroadcastAxis { x, axis } => {
                    acc(*x, g.sum_axis(Axis(*axis)).insert_axis(Axis(*axis)));
                }
                Op::SumAxis { x, axis } => {
                    let expanded = g.clone().insert_axis(Axis(*axis));
                    let n = value(*x).shape()[*axis];
                    acc(*x, repeat_axis(&expanded, *axis, n));
                }
                Op::Sum(x) => {
                    let s = g.iter().copied().next().unwrap_or(0.0);
                    acc(*x, ArrayD::from_elem(value(*x).raw_dim(), s));
                }
                Op::Mean(x) => {
                    let n = value(*x).len().max(1) as f64;
                    let s = g.iter().copied().next().unwrap_or(0.0) / n;
                    acc(*x, ArrayD::from_elem(value(*x).raw_dim(), s));
                }
            }
            grads[i] = Some(g);
        }

        Gradients { grads }
    }
}

impl<'t> Var<'t> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tape(&self) -> &'t Tape {
        self.tape
    }

    pub fn value(&self) -> ArrayD<f64> {
        self.tape.nodes.borrow()[self.id].value.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.tape.nodes.borrow()[self.id].value.shape().to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.tape.nodes.borrow()[self.id].value.ndim()
    }

    /// First element, for scalar roots.
    pub fn scalar(&self) -> f64 {
        self.tape.nodes.borrow()[self.id]
            .value
            .iter()
            .copied()
            .next()
            .unwrap_or(0.0)
    }

    pub fn requires_grad(&self) -> bool {
        self.tape.nodes.borrow()[self.id].requires_grad
    }

    fn map<F>(self, f: F, op: Op) -> Var<'t>
    where
        F: FnOnce(&ArrayD<f64>) -> ArrayD<f64>,
    {
        let value = {
            let nodes = self.tape.nodes.borrow();
            f(&nodes[self.id].value)
        };
        self.tape.push(value, op)
    }

    fn zip<F>(self, other: Var<'t>, f: F, op: Op) -> Var<'t>
    where
        F: FnOnce(&ArrayD<f64>, &ArrayD<f64>) -> ArrayD<f64>,
    {
        let value = {
            let nodes = self.tape.nodes.borrow();
            f(&nodes[self.id].value, &nodes[other.id].value)
        };
        self.tape.push(value, op)
    }

    fn same_shape(&self, other: &Var<'t>, what: &str) {
        let (a, b) = (self.shape(), other.shape());
        assert_eq!(a, b, "{what}: shape {a:?} vs {b:?}");
    }

    pub fn add(self, other: Var<'t>) -> Var<'t> {
        self.same_shape(&other, "add");
        self.zip(other, |a, b| a + b, Op::Add(self.id, other.id))
    }

    pub fn sub(self, other: Var<'t>) -> Var<'t> {
        self.same_shape(&other, "sub");
        self.zip(other, |a, b| a - b, Op::Sub(self.id, other.id))
    }

    pub fn mul(self, other: Var<'t>) -> Var<'t> {
        self.same_shape(&other, "mul");
        self.zip(other, |a, b| a * b, Op::Mul(self.id, other.id))
    }

    /// `scale * x + shift`.
    pub fn affine(self, scale: f64, shift: f64) -> Var<'t> {
        self.map(
            |x| x.mapv(|v| scale * v + shift),
            Op::Affine {
                x: self.id,
                scale,
            },
        )
    }

    pub fn scale(self, s: f64) -> Var<'t> {
        self.affine(s, 0.0)
    }

    /// Elementwise product with a constant broadcast to this shape.
    pub fn mul_const(self, c: &ArrayD<f64>) -> Var<'t> {
        let c = broadcast_to(c, &self.shape());
        let out = {
            let nodes = self.tape.nodes.borrow();
            &nodes[self.id].value * &c
        };
        self.tape.push(out, Op::MulConst { x: self.id, c })
    }

    /// `x (..., n) + b (n)`.
    pub fn add_bias(self, b: Var<'t>) -> Var<'t> {
        self.zip(
            b,
            |x, b| {
                let bias: Vec<f64> = b.iter().copied().collect();
                assert_eq!(x.shape().last().copied(), Some(bias.len()), "add_bias width");
                let mut out = x.clone();
                for mut lane in out.lanes_mut(Axis(x.ndim() - 1)) {
                    lane.iter_mut().zip(&bias).for_each(|(o, v)| *o += v);
                }
                out
            },
            Op::AddBias {
                x: self.id,
                b: b.id,
            },
        )
    }

    /// `x (..., k) @ w (k, n)`.
    pub fn matmul(self, w: Var<'t>) -> Var<'t> {
        self.zip(
            w,
            |x, w| {
                let (k, n) = (w.shape()[0], w.shape()[1]);
                assert_eq!(x.shape().last().copied(), Some(k), "matmul inner dim");
                let rows = x.len() / k.max(1);
                let out = to_matrix(x, rows, k).dot(&to_matrix(w, k, n));
                let mut shape = x.shape().to_vec();
                if let Some(last) = shape.last_mut() {
                    *last = n;
                }
                reshape_array(&out.into_dyn(), &shape)
            },
            Op::MatMul {
                x: self.id,
                w: w.id,
            },
        )
    }

    /// Left-multiply the second-to-last axis by a constant matrix:
    /// `x (..., n, f) -> (..., m.nrows(), f)`.
    pub fn mix(self, m: &Array2<f64>) -> Var<'t> {
        let m = m.clone();
        let value = {
            let nodes = self.tape.nodes.borrow();
            mix_array(&m, &nodes[self.id].value)
        };
        self.tape.push(value, Op::Mix { x: self.id, m })
    }

    /// `a (b, m, k) @ b (b, k, n)`.
    pub fn bmm(self, other: Var<'t>) -> Var<'t> {
        self.zip(
            other,
            |a, b| {
                let a3 = as_array3(a);
                let b3 = as_array3(b);
                assert_eq!(a3.dim().0, b3.dim().0, "bmm batch");
                let mut out = Array3::zeros((a3.dim().0, a3.dim().1, b3.dim().2));
                for l in 0..a3.dim().0 {
                    out.index_axis_mut(Axis(0), l)
                        .assign(&a3.index_axis(Axis(0), l).dot(&b3.index_axis(Axis(0), l)));
                }
                out.into_dyn()
            },
            Op::BatchMatMul(self.id, other.id),
        )
    }

    /// `out[..., i, j] = a[..., i] + b[..., j]`.
    pub fn outer_sum(self, other: Var<'t>) -> Var<'t> {
        self.zip(
            other,
            |a, b| {
                let nd = a.ndim();
                assert_eq!(nd, b.ndim(), "outer_sum rank");
                let ai = a.clone().insert_axis(Axis(nd));
                let bj = b.clone().insert_axis(Axis(nd - 1));
                let n = a.shape()[nd - 1];
                let m = b.shape()[nd - 1];
                repeat_axis(&ai, nd, m) + repeat_axis(&bj, nd - 1, n)
            },
            Op::OuterSum(self.id, other.id),
        )
    }

    /// Softmax over the last axis restricted to `mask > 0`; masked
    /// entries are exactly zero.
    pub fn masked_softmax(self, mask: &Array2<f64>) -> Var<'t> {
        self.map(
            |x| {
                let nd = x.ndim();
                let mask = broadcast_to(&mask.clone().into_dyn(), x.shape());
                let mut out = ArrayD::zeros(x.raw_dim());
                for ((mut o, xl), ml) in out
                    .lanes_mut(Axis(nd - 1))
                    .into_iter()
                    .zip(x.lanes(Axis(nd - 1)))
                    .zip(mask.lanes(Axis(nd - 1)))
                {
                    let max = xl
                        .iter()
                        .zip(ml.iter())
                        .filter(|(_, m)| **m > 0.0)
                        .map(|(&v, _)| v)
                        .fold(f64::NEG_INFINITY, f64::max);
                    if !max.is_finite() {
                        continue;
                    }
                    let mut total = 0.0;
                    for ((slot, &v), &m) in o.iter_mut().zip(xl.iter()).zip(ml.iter()) {
                        if m > 0.0 {
                            *slot = (v - max).exp();
                            total += *slot;
                        }
                    }
                    o.mapv_inplace(|v| v / total);
                }
                out
            },
            Op::MaskedSoftmax(self.id),
        )
    }

    pub fn relu(self) -> Var<'t> {
        self.map(|x| x.mapv(|v| v.max(0.0)), Op::Relu(self.id))
    }

    pub fn leaky_relu(self, alpha: f64) -> Var<'t> {
        self.map(
            |x| x.mapv(|v| if v > 0.0 { v } else { alpha * v }),
            Op::LeakyRelu { x: self.id, alpha },
        )
    }

    pub fn tanh(self) -> Var<'t> {
        self.map(|x| x.mapv(f64::tanh), Op::Tanh(self.id))
    }

    pub fn sigmoid(self) -> Var<'t> {
        self.map(
            |x| x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Op::Sigmoid(self.id),
        )
    }

    pub fn abs(self) -> Var<'t> {
        self.map(|x| x.mapv(f64::abs), Op::Abs(self.id))
    }

    pub fn square(self) -> Var<'t> {
        self.map(|x| x.mapv(|v| v * v), Op::Square(self.id))
    }

    /// Clamp into `[lo, hi]` (both broadcast to this shape). The gradient
    /// passes only where `lo < x < hi`.
    pub fn clamp(self, lo: &ArrayD<f64>, hi: &ArrayD<f64>) -> Var<'t> {
        let shape = self.shape();
        let lo = broadcast_to(lo, &shape);
        let hi = broadcast_to(hi, &shape);
        let value = {
            let nodes = self.tape.nodes.borrow();
            let mut out = nodes[self.id].value.clone();
            ndarray::Zip::from(&mut out)
                .and(&lo)
                .and(&hi)
                .for_each(|v, &l, &h| *v = v.max(l).min(h));
            out
        };
        self.tape.push(value, Op::Clamp { x: self.id, lo, hi })
    }

    pub fn reshape(self, shape: &[usize]) -> Var<'t> {
        self.map(|x| reshape_array(x, shape), Op::Reshape(self.id))
    }

    pub fn permute(self, axes: &[usize]) -> Var<'t> {
        self.map(
            |x| x.view().permuted_axes(IxDyn(axes)).to_owned(),
            Op::Permute {
                x: self.id,
                axes: axes.to_vec(),
            },
        )
    }

    /// `[start, end)` along `axis`; rank is kept.
    pub fn slice(self, axis: usize, start: usize, end: usize) -> Var<'t> {
        self.map(
            |x| x.slice_axis(Axis(axis), Slice::from(start..end)).to_owned(),
            Op::Slice {
                x: self.id,
                axis,
                start,
            },
        )
    }

    pub fn concat(parts: &[Var<'t>], axis: usize) -> Var<'t> {
        assert!(!parts.is_empty(), "concat of nothing");
        let tape = parts[0].tape;
        let value = {
            let nodes = tape.nodes.borrow();
            let first = &nodes[parts[0].id].value;
            let mut shape = first.shape().to_vec();
            shape[axis] = parts
                .iter()
                .map(|p| nodes[p.id].value.shape()[axis])
                .sum();
            let mut out = ArrayD::zeros(IxDyn(&shape));
            let mut offset = 0;
            for p in parts {
                let v = &nodes[p.id].value;
                let width = v.shape()[axis];
                out.slice_axis_mut(Axis(axis), Slice::from(offset..offset + width))
                    .assign(v);
                offset += width;
            }
            out
        };
        tape.push(
            value,
            Op::Concat {
                parts: parts.iter().map(|p| p.id).collect(),
                axis,
            },
        )
    }

    /// Repeat a unit axis `n` times.
    pub fn broadcast_axis(self, axis: usize, n: usize) -> Var<'t> {
        self.map(
            |x| {
                assert_eq!(x.shape()[axis], 1, "broadcast_axis needs a unit axis");
                repeat_axis(x, axis, n)
            },
            Op::BroadcastAxis { x: self.id, axis },
        )
    }

    /// Sum over `axis`, removing it.
    pub fn sum_axis(self, axis: usize) -> Var<'t> {
        self.map(|x| x.sum_axis(Axis(axis)), Op::SumAxis { x: self.id, axis })
    }

    pub fn sum(self) -> Var<'t> {
        self.map(|x| ArrayD::from_elem(IxDyn(&[]), x.sum()), Op::Sum(self.id))
    }

    pub fn mean(self) -> Var<'t> {
        self.map(
            |x| ArrayD::from_elem(IxDyn(&[]), x.sum() / x.len().max(1) as f64),
            Op::Mean(self.id),
        )
    }
}

/// Copy `a` into a standard-layout array of `shape` in logical order.
pub fn reshape_array(a: &ArrayD<f64>, shape: &[usize]) -> ArrayD<f64> {
    assert_eq!(
        a.len(),
        shape.iter().product::<usize>(),
        "reshape {:?} -> {shape:?}",
        a.shape()
    );
    let mut out = ArrayD::zeros(IxDyn(shape));
    out.iter_mut().zip(a.iter()).for_each(|(o, &v)| *o = v);
    out
}

fn to_matrix(a: &ArrayD<f64>, rows: usize, cols: usize) -> Array2<f64> {
    assert_eq!(a.len(), rows * cols, "matrix view {:?}", a.shape());
    let mut out = Array2::zeros((rows, cols));
    out.iter_mut().zip(a.iter()).for_each(|(o, &v)| *o = v);
    out
}

fn as_array3(a: &ArrayD<f64>) -> Array3<f64> {
    assert_eq!(a.ndim(), 3, "expected rank 3, got {:?}", a.shape());
    let s = a.shape();
    let mut out = Array3::zeros((s[0], s[1], s[2]));
    out.iter_mut().zip(a.iter()).for_each(|(o, &v)| *o = v);
    out
}

fn broadcast_to(c: &ArrayD<f64>, shape: &[usize]) -> ArrayD<f64> {
    match c.broadcast(IxDyn(shape)) {
        Some(view) => view.to_owned(),
        None => panic!("cannot broadcast {:?} to {shape:?}", c.shape()),
    }
}

fn repeat_axis(x: &ArrayD<f64>, axis: usize, n: usize) -> ArrayD<f64> {
    let mut shape = x.shape().to_vec();
    shape[axis] = n;
    let mut out = ArrayD::zeros(IxDyn(&shape));
    let src = x.index_axis(Axis(axis), 0);
    for mut lane in out.axis_iter_mut(Axis(axis)) {
        lane.assign(&src);
    }
    out
}

/// `m (r, n)` applied to the second-to-last axis of `x (..., n, f)`.
pub fn mix_array(m: &Array2<f64>, x: &ArrayD<f64>) -> ArrayD<f64> {
    let shape = x.shape().to_vec();
    let nd = shape.len();
    assert!(nd >= 2, "mix needs rank >= 2, got {shape:?}");
    let (n, f) = (shape[nd - 2], shape[nd - 1]);
    assert_eq!(m.ncols(), n, "mix inner dim");
    let batch = x.len() / (n * f).max(1);
    let mut x3 = Array3::zeros((batch, n, f));
    x3.iter_mut().zip(x.iter()).for_each(|(o, &v)| *o = v);
    let mut out = Array3::zeros((batch, m.nrows(), f));
    for (mut o, xi) in out.outer_iter_mut().zip(x3.outer_iter()) {
        o.assign(&m.dot(&xi));
    }
    let mut out_shape = shape;
    out_shape[nd - 2] = m.nrows();
    reshape_array(&out.into_dyn(), &out_shape)
}
