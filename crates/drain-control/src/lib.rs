// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Drain Control
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Receding-horizon control of drainage networks.
//!
//! Candidate control schedules are scored either on the trained surrogate
//! (one batched rollout per population) or on independent simulator
//! instances, searched by a genetic algorithm or by gradient descent
//! through the surrogate, and applied one setting duration at a time.

pub mod env;
pub mod evaluate;
pub mod gradient;
pub mod mpc;
pub mod operators;
pub mod population;
pub mod problem;
pub mod results;
