//! Simulation request model and cross-field validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::antenna::{
    CylindricalSymmetry, Excitation, GeometryTransform, GroundConfig, LumpedLoad,
    TransmissionLine, ValidationError, Wire, WireArc,
};

/// Frequency sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    pub start_mhz: f64,
    pub stop_mhz: f64,
    pub steps: u32,
}

impl FrequencyConfig {
    /// Step between sweep points, 0 for a single-point sweep.
    pub fn step_mhz(&self) -> f64 {
        if self.steps <= 1 {
            return 0.0;
        }
        (self.stop_mhz - self.start_mhz) / (self.steps - 1) as f64
    }

    pub fn center_mhz(&self) -> f64 {
        (self.start_mhz + self.stop_mhz) / 2.0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, v) in [("start_mhz", self.start_mhz), ("stop_mhz", self.stop_mhz)] {
            if !v.is_finite() || !(0.1..=2000.0).contains(&v) {
                return Err(ValidationError::new(format!(
                    "{name} must be within [0.1, 2000] MHz, got {v}"
                )));
            }
        }
        if self.stop_mhz < self.start_mhz {
            return Err(ValidationError::new("stop_mhz must be >= start_mhz"));
        }
        if !(1..=201).contains(&self.steps) {
            return Err(ValidationError::new(format!(
                "steps must be within [1, 201], got {}",
                self.steps
            )));
        }
        Ok(())
    }
}

fn default_theta_start() -> f64 {
    -90.0
}
fn default_theta_stop() -> f64 {
    90.0
}
fn default_phi_stop() -> f64 {
    355.0
}
fn default_angle_step() -> f64 {
    5.0
}

/// Radiation pattern sampling grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_theta_start")]
    pub theta_start: f64,
    #[serde(default = "default_theta_stop")]
    pub theta_stop: f64,
    #[serde(default = "default_angle_step")]
    pub theta_step: f64,
    #[serde(default)]
    pub phi_start: f64,
    #[serde(default = "default_phi_stop")]
    pub phi_stop: f64,
    #[serde(default = "default_angle_step")]
    pub phi_step: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            theta_start: default_theta_start(),
            theta_stop: default_theta_stop(),
            theta_step: default_angle_step(),
            phi_start: 0.0,
            phi_stop: default_phi_stop(),
            phi_step: default_angle_step(),
        }
    }
}

impl PatternConfig {
    pub fn n_theta(&self) -> usize {
        ((self.theta_stop - self.theta_start) / self.theta_step) as usize + 1
    }

    pub fn n_phi(&self) -> usize {
        ((self.phi_stop - self.phi_start) / self.phi_step) as usize + 1
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, v, lo, hi) in [
            ("theta_start", self.theta_start, -90.0, 90.0),
            ("theta_stop", self.theta_stop, -90.0, 90.0),
            ("theta_step", self.theta_step, 1.0, 30.0),
            ("phi_start", self.phi_start, 0.0, 360.0),
            ("phi_stop", self.phi_stop, 0.0, 360.0),
            ("phi_step", self.phi_step, 1.0, 30.0),
        ] {
            if !v.is_finite() || v < lo || v > hi {
                return Err(ValidationError::new(format!(
                    "{name} must be within [{lo}, {hi}], got {v}"
                )));
            }
        }
        if self.theta_stop < self.theta_start {
            return Err(ValidationError::new("theta_stop must be >= theta_start"));
        }
        if self.phi_stop < self.phi_start {
            return Err(ValidationError::new("phi_stop must be >= phi_start"));
        }
        Ok(())
    }
}

fn default_nf_plane() -> String {
    "horizontal".to_string()
}
fn default_nf_height() -> f64 {
    1.8
}
fn default_nf_extent() -> f64 {
    20.0
}
fn default_nf_resolution() -> f64 {
    0.5
}

/// Near-field calculation configuration.
///
/// Accepted and carried on the request; no near-field parser is wired up, so
/// responses do not include near-field data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearFieldConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_nf_plane")]
    pub plane: String,
    #[serde(default = "default_nf_height")]
    pub height_m: f64,
    #[serde(default = "default_nf_extent")]
    pub extent_m: f64,
    #[serde(default = "default_nf_resolution")]
    pub resolution_m: f64,
}

fn default_comment() -> String {
    "AntSim simulation".to_string()
}

/// Request body for `POST /api/v1/simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub wires: Vec<Wire>,
    pub excitations: Vec<Excitation>,
    #[serde(default)]
    pub ground: GroundConfig,
    pub frequency: FrequencyConfig,
    #[serde(default)]
    pub pattern: PatternConfig,
    #[serde(default = "default_comment")]
    pub comment: String,
    #[serde(default)]
    pub loads: Vec<LumpedLoad>,
    #[serde(default)]
    pub transmission_lines: Vec<TransmissionLine>,
    #[serde(default)]
    pub compute_currents: bool,
    #[serde(default)]
    pub arcs: Vec<WireArc>,
    #[serde(default)]
    pub transforms: Vec<GeometryTransform>,
    #[serde(default)]
    pub symmetry: Option<CylindricalSymmetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_field: Option<NearFieldConfig>,
}

/// Maximum total segment count across all wires of one request.
pub const MAX_TOTAL_SEGMENTS: u32 = 5000;

impl SimulationRequest {
    pub fn total_segments(&self) -> u32 {
        self.wires.iter().map(|w| w.segments).sum()
    }

    /// Validate the whole request: per-entity field ranges, collection
    /// limits, the segment budget, and tag references.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.wires.is_empty() || self.wires.len() > 500 {
            return Err(ValidationError::new(format!(
                "wire count must be within [1, 500], got {}",
                self.wires.len()
            )));
        }
        if self.excitations.is_empty() || self.excitations.len() > 50 {
            return Err(ValidationError::new(format!(
                "excitation count must be within [1, 50], got {}",
                self.excitations.len()
            )));
        }
        if self.loads.len() > 100 {
            return Err(ValidationError::new("at most 100 loads are supported"));
        }
        if self.transmission_lines.len() > 50 {
            return Err(ValidationError::new("at most 50 transmission lines are supported"));
        }
        if self.arcs.len() > 100 {
            return Err(ValidationError::new("at most 100 arcs are supported"));
        }
        if self.transforms.len() > 50 {
            return Err(ValidationError::new("at most 50 transforms are supported"));
        }
        if self.comment.len() > 200 {
            return Err(ValidationError::new("comment must be at most 200 characters"));
        }

        let mut wire_by_tag: HashMap<u32, &Wire> = HashMap::new();
        for wire in &self.wires {
            wire.validate()?;
            if wire_by_tag.insert(wire.tag, wire).is_some() {
                return Err(ValidationError::new(format!(
                    "duplicate wire tag {}",
                    wire.tag
                )));
            }
        }
        for arc in &self.arcs {
            arc.validate()?;
        }
        for gm in &self.transforms {
            gm.validate()?;
        }
        self.ground.validate()?;
        self.frequency.validate()?;
        self.pattern.validate()?;

        let total = self.total_segments();
        if total > MAX_TOTAL_SEGMENTS {
            return Err(ValidationError::new(format!(
                "total segments ({total}) exceeds maximum of {MAX_TOTAL_SEGMENTS}"
            )));
        }

        for ex in &self.excitations {
            ex.validate()?;
            let wire = wire_by_tag.get(&ex.wire_tag).ok_or_else(|| {
                ValidationError::new(format!(
                    "excitation references wire tag {} which doesn't exist",
                    ex.wire_tag
                ))
            })?;
            if ex.segment < 1 || ex.segment > wire.segments {
                return Err(ValidationError::new(format!(
                    "excitation on wire {} references segment {}, but wire only has {} segments",
                    ex.wire_tag, ex.segment, wire.segments
                )));
            }
        }
        for ld in &self.loads {
            ld.validate()?;
            if ld.wire_tag != 0 && !wire_by_tag.contains_key(&ld.wire_tag) {
                return Err(ValidationError::new(format!(
                    "load references wire tag {} which doesn't exist",
                    ld.wire_tag
                )));
            }
        }
        for tl in &self.transmission_lines {
            tl.validate()?;
            for tag in [tl.wire_tag1, tl.wire_tag2] {
                if !wire_by_tag.contains_key(&tag) {
                    return Err(ValidationError::new(format!(
                        "transmission line references wire tag {tag} which doesn't exist"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn dipole_request() -> SimulationRequest {
        SimulationRequest {
            wires: vec![Wire {
                tag: 1,
                segments: 21,
                x1: -5.0,
                y1: 0.0,
                z1: 10.0,
                x2: 5.0,
                y2: 0.0,
                z2: 10.0,
                radius: 0.001,
            }],
            excitations: vec![Excitation {
                wire_tag: 1,
                segment: 11,
                voltage_real: 1.0,
                voltage_imag: 0.0,
            }],
            ground: GroundConfig {
                ground_type: crate::antenna::GroundType::FreeSpace,
                ..GroundConfig::default()
            },
            frequency: FrequencyConfig {
                start_mhz: 14.0,
                stop_mhz: 14.2,
                steps: 3,
            },
            pattern: PatternConfig::default(),
            comment: default_comment(),
            loads: vec![],
            transmission_lines: vec![],
            compute_currents: false,
            arcs: vec![],
            transforms: vec![],
            symmetry: None,
            near_field: None,
        }
    }

    #[test]
    fn dipole_request_is_valid() {
        dipole_request().validate().unwrap();
    }

    #[test]
    fn frequency_step_derivation() {
        let f = FrequencyConfig {
            start_mhz: 14.0,
            stop_mhz: 14.2,
            steps: 3,
        };
        assert!((f.step_mhz() - 0.1).abs() < 1e-12);
        let single = FrequencyConfig {
            start_mhz: 14.1,
            stop_mhz: 14.1,
            steps: 1,
        };
        assert_eq!(single.step_mhz(), 0.0);
    }

    #[test]
    fn inverted_sweep_rejected() {
        let f = FrequencyConfig {
            start_mhz: 14.2,
            stop_mhz: 14.0,
            steps: 3,
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn default_pattern_grid_shape() {
        let p = PatternConfig::default();
        assert_eq!(p.n_theta(), 37);
        assert_eq!(p.n_phi(), 72);
    }

    #[test]
    fn segment_budget_enforced() {
        let mut req = dipole_request();
        req.wires = (1..=30)
            .map(|tag| Wire {
                tag,
                segments: 200,
                x1: 0.0,
                y1: tag as f64,
                z1: 0.0,
                x2: 10.0,
                y2: tag as f64,
                z2: 0.0,
                radius: 0.001,
            })
            .collect();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn dangling_excitation_tag_rejected() {
        let mut req = dipole_request();
        req.excitations[0].wire_tag = 7;
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[test]
    fn out_of_range_excitation_segment_rejected() {
        let mut req = dipole_request();
        req.excitations[0].segment = 22;
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("only has 21 segments"));
    }

    #[test]
    fn duplicate_wire_tags_rejected() {
        let mut req = dipole_request();
        let mut second = req.wires[0].clone();
        second.z1 = 12.0;
        second.z2 = 12.0;
        req.wires.push(second);
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate wire tag"));
    }

    #[test]
    fn dangling_transmission_line_tag_rejected() {
        let mut req = dipole_request();
        req.transmission_lines.push(TransmissionLine {
            wire_tag1: 1,
            segment1: 1,
            wire_tag2: 9,
            segment2: 1,
            impedance: 50.0,
            length: 0.0,
            shunt_admittance_real1: 0.0,
            shunt_admittance_imag1: 0.0,
            shunt_admittance_real2: 0.0,
            shunt_admittance_imag2: 0.0,
        });
        assert!(req.validate().is_err());
    }
}
