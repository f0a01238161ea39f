// ─────────────────────────────────────────────────────────────────────
// SCPN Drain MPC — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

/// Head margin below capacity at which overflow is released [m].
pub const FLOOD_MARGIN: f64 = 0.01;

/// Node capacity used when the network does not provide one [m].
pub const DEFAULT_HMAX: f64 = 1.5;

/// Objective assigned to a candidate whose simulation failed.
pub const DEFAULT_FAILURE_PENALTY: f64 = 1e12;

/// Channel index of the head inside a node state vector.
pub const H_CHANNEL: usize = 0;

/// Channel index of the upstream inflow.
pub const Q_US_CHANNEL: usize = 1;

/// Channel index of the downstream outflow.
pub const Q_DS_CHANNEL: usize = 2;

/// Tags that select "no layer" for convolution/recurrent stages.
pub const NONE_TAGS: [&str; 4] = ["", "None", "False", "NoneType"];

/// File name of the weight archive inside a model directory.
pub const WEIGHTS_FILE: &str = "model.npz";

/// File name of the normalisation factors inside a model directory.
pub const NORMAL_FILE: &str = "normal.npy";
