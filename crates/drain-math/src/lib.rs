//! Mathematical primitives for SCPN Drain MPC.

pub mod autodiff;
pub mod graph;
pub mod sampling;
