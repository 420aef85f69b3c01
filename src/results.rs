//! Simulation result entities returned by the simulate endpoint.

use serde::{Deserialize, Serialize};

/// Sentinel stored in pattern grid cells the solver did not populate.
pub const UNPOPULATED_GAIN: f64 = -999.99;

/// Complex feed-point impedance in ohms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Impedance {
    pub real: f64,
    pub imag: f64,
}

/// Rectangular far-field gain grid for one frequency.
///
/// Angles are reconstructed client-side from the recorded origins and steps;
/// `gain_dbi[theta_idx][phi_idx]` holds [`UNPOPULATED_GAIN`] where the solver
/// produced no sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternData {
    pub theta_start: f64,
    pub theta_step: f64,
    pub theta_count: usize,
    pub phi_start: f64,
    pub phi_step: f64,
    pub phi_count: usize,
    pub gain_dbi: Vec<Vec<f64>>,
}

/// Current sample at the center of one wire segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCurrent {
    pub tag: u32,
    pub segment: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub current_real: f64,
    pub current_imag: f64,
    pub current_magnitude: f64,
    pub current_phase_deg: f64,
}

/// Per-frequency simulation results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResult {
    pub frequency_mhz: f64,
    pub impedance: Impedance,
    /// SWR relative to 50 ohms.
    pub swr_50: f64,
    pub gain_max_dbi: f64,
    pub gain_max_theta: f64,
    pub gain_max_phi: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_to_back_db: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beamwidth_e_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beamwidth_h_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currents: Option<Vec<SegmentCurrent>>,
}

fn default_engine() -> String {
    "nec2c".to_string()
}

/// Complete simulate response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation_id: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    pub computed_in_ms: f64,
    pub total_segments: u32,
    #[serde(default)]
    pub cached: bool,
    pub frequency_data: Vec<FrequencyResult>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
