// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Drain ML
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Surrogate modelling for SCPN Drain MPC.
//!
//! Graph sequence model, constraint projection, horizon rollout,
//! flood objective and offline training.

pub mod constraint;
pub mod layers;
pub mod model;
pub mod objective;
pub mod optim;
pub mod rollout;
pub mod trainer;
