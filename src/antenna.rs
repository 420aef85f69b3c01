//! Antenna geometry entities: wires, excitations, loads, transmission lines,
//! advanced geometry cards, and ground configuration.
//!
//! Constraints that the dynamic schema layer enforced upstream are encoded
//! here as explicit `validate` functions returning [`ValidationError`]; the
//! request module composes them with the cross-field invariants.

use serde::{Deserialize, Serialize};

/// A request failed structural validation before reaching the solver.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

fn check_range(name: &str, v: f64, lo: f64, hi: f64) -> Result<(), ValidationError> {
    if !v.is_finite() {
        return Err(ValidationError::new(format!("{name} must be finite, got {v}")));
    }
    if v < lo || v > hi {
        return Err(ValidationError::new(format!(
            "{name} must be within [{lo}, {hi}], got {v}"
        )));
    }
    Ok(())
}

fn default_voltage_real() -> f64 {
    1.0
}

/// A single straight wire element in the antenna geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    pub tag: u32,
    pub segments: u32,
    pub x1: f64,
    pub y1: f64,
    pub z1: f64,
    pub x2: f64,
    pub y2: f64,
    pub z2: f64,
    pub radius: f64,
}

impl Wire {
    pub fn length(&self) -> f64 {
        let dx = self.x2 - self.x1;
        let dy = self.y2 - self.y1;
        let dz = self.z2 - self.z1;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=9999).contains(&self.tag) {
            return Err(ValidationError::new(format!(
                "wire tag must be within [1, 9999], got {}",
                self.tag
            )));
        }
        if !(1..=200).contains(&self.segments) {
            return Err(ValidationError::new(format!(
                "wire {} segments must be within [1, 200], got {}",
                self.tag, self.segments
            )));
        }
        for (name, v) in [
            ("x1", self.x1),
            ("y1", self.y1),
            ("z1", self.z1),
            ("x2", self.x2),
            ("y2", self.y2),
            ("z2", self.z2),
        ] {
            check_range(name, v, -1000.0, 1000.0)?;
        }
        check_range("radius", self.radius, 0.0001, 0.1)?;
        if self.length() < 1e-6 {
            return Err(ValidationError::new(format!(
                "wire {} endpoints are coincident (zero-length wire)",
                self.tag
            )));
        }
        Ok(())
    }
}

/// Voltage source excitation on a wire segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excitation {
    pub wire_tag: u32,
    pub segment: u32,
    #[serde(default = "default_voltage_real")]
    pub voltage_real: f64,
    #[serde(default)]
    pub voltage_imag: f64,
}

impl Excitation {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=9999).contains(&self.wire_tag) {
            return Err(ValidationError::new(format!(
                "excitation wire_tag must be within [1, 9999], got {}",
                self.wire_tag
            )));
        }
        if !(1..=200).contains(&self.segment) {
            return Err(ValidationError::new(format!(
                "excitation segment must be within [1, 200], got {}",
                self.segment
            )));
        }
        check_range("voltage_real", self.voltage_real, -1e6, 1e6)?;
        check_range("voltage_imag", self.voltage_imag, -1e6, 1e6)?;
        Ok(())
    }
}

/// NEC LD card load kinds, carried on the wire as their card type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LoadType {
    SeriesRlc,
    ParallelRlc,
    FixedImpedance,
    WireConductivity,
}

impl LoadType {
    /// The numeric type field written on the LD card.
    pub fn nec_code(self) -> u8 {
        match self {
            LoadType::SeriesRlc => 0,
            LoadType::ParallelRlc => 1,
            LoadType::FixedImpedance => 4,
            LoadType::WireConductivity => 5,
        }
    }
}

impl TryFrom<u8> for LoadType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(LoadType::SeriesRlc),
            1 => Ok(LoadType::ParallelRlc),
            4 => Ok(LoadType::FixedImpedance),
            5 => Ok(LoadType::WireConductivity),
            other => Err(format!("unsupported load type {other} (expected 0, 1, 4 or 5)")),
        }
    }
}

impl From<LoadType> for u8 {
    fn from(t: LoadType) -> u8 {
        t.nec_code()
    }
}

/// A lumped load (LD card) applied over a segment range of one wire.
///
/// The meaning of the three parameters depends on [`LoadType`]: R/L/C for the
/// RLC kinds, R/X for fixed impedance, conductivity for wire conductivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LumpedLoad {
    pub load_type: LoadType,
    /// Wire tag, or 0 to address all segments.
    pub wire_tag: u32,
    pub segment_start: u32,
    pub segment_end: u32,
    #[serde(default)]
    pub param1: f64,
    #[serde(default)]
    pub param2: f64,
    #[serde(default)]
    pub param3: f64,
}

impl LumpedLoad {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.wire_tag > 9999 {
            return Err(ValidationError::new(format!(
                "load wire_tag must be within [0, 9999], got {}",
                self.wire_tag
            )));
        }
        if self.segment_end < self.segment_start {
            return Err(ValidationError::new(format!(
                "load segment range is inverted ({}..{})",
                self.segment_start, self.segment_end
            )));
        }
        for (name, v) in [
            ("param1", self.param1),
            ("param2", self.param2),
            ("param3", self.param3),
        ] {
            if !v.is_finite() {
                return Err(ValidationError::new(format!("load {name} must be finite")));
            }
        }
        Ok(())
    }
}

/// A transmission line (TL card) connecting two wire segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionLine {
    pub wire_tag1: u32,
    pub segment1: u32,
    pub wire_tag2: u32,
    pub segment2: u32,
    /// Characteristic impedance in ohms.
    pub impedance: f64,
    /// Line length in meters; 0 means the straight-line distance.
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub shunt_admittance_real1: f64,
    #[serde(default)]
    pub shunt_admittance_imag1: f64,
    #[serde(default)]
    pub shunt_admittance_real2: f64,
    #[serde(default)]
    pub shunt_admittance_imag2: f64,
}

impl TransmissionLine {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("transmission line impedance", self.impedance, 1.0, 1000.0)?;
        check_range("transmission line length", self.length, 0.0, 1000.0)?;
        for (name, v) in [
            ("shunt_admittance_real1", self.shunt_admittance_real1),
            ("shunt_admittance_imag1", self.shunt_admittance_imag1),
            ("shunt_admittance_real2", self.shunt_admittance_real2),
            ("shunt_admittance_imag2", self.shunt_admittance_imag2),
        ] {
            if !v.is_finite() {
                return Err(ValidationError::new(format!("{name} must be finite")));
            }
        }
        Ok(())
    }
}

/// A wire arc (GA card).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireArc {
    pub tag: u32,
    pub segments: u32,
    pub arc_radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    pub wire_radius: f64,
}

impl WireArc {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=9999).contains(&self.tag) {
            return Err(ValidationError::new(format!(
                "arc tag must be within [1, 9999], got {}",
                self.tag
            )));
        }
        if !(1..=200).contains(&self.segments) {
            return Err(ValidationError::new(format!(
                "arc {} segments must be within [1, 200], got {}",
                self.tag, self.segments
            )));
        }
        check_range("arc_radius", self.arc_radius, 0.0001, 1000.0)?;
        check_range("start_angle", self.start_angle, -360.0, 360.0)?;
        check_range("end_angle", self.end_angle, -360.0, 360.0)?;
        check_range("wire_radius", self.wire_radius, 0.0001, 0.1)?;
        Ok(())
    }
}

/// A geometry move/rotate/replicate transform (GM card).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryTransform {
    pub tag_increment: u32,
    pub n_new_structures: u32,
    #[serde(default)]
    pub rot_x: f64,
    #[serde(default)]
    pub rot_y: f64,
    #[serde(default)]
    pub rot_z: f64,
    #[serde(default)]
    pub trans_x: f64,
    #[serde(default)]
    pub trans_y: f64,
    #[serde(default)]
    pub trans_z: f64,
    #[serde(default)]
    pub start_tag: u32,
}

impl GeometryTransform {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, v) in [
            ("rot_x", self.rot_x),
            ("rot_y", self.rot_y),
            ("rot_z", self.rot_z),
            ("trans_x", self.trans_x),
            ("trans_y", self.trans_y),
            ("trans_z", self.trans_z),
        ] {
            if !v.is_finite() {
                return Err(ValidationError::new(format!("transform {name} must be finite")));
            }
        }
        Ok(())
    }
}

/// Cylindrical structure replication (GR card).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CylindricalSymmetry {
    pub tag_increment: u32,
    pub n_copies: u32,
}

/// Ground presets with fixed (dielectric constant, conductivity) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundType {
    FreeSpace,
    Perfect,
    SaltWater,
    FreshWater,
    Pastoral,
    Average,
    Rocky,
    City,
    DrySandy,
    Custom,
}

impl GroundType {
    /// Preset (epsilon_r, sigma) pair, if this type carries one.
    fn preset_params(self) -> Option<(f64, f64)> {
        match self {
            GroundType::SaltWater => Some((80.0, 5.0)),
            GroundType::FreshWater => Some((80.0, 0.001)),
            GroundType::Pastoral => Some((14.0, 0.01)),
            GroundType::Average => Some((13.0, 0.005)),
            GroundType::Rocky => Some((12.0, 0.002)),
            GroundType::City => Some((5.0, 0.001)),
            GroundType::DrySandy => Some((3.0, 0.0001)),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroundType::FreeSpace => "free_space",
            GroundType::Perfect => "perfect",
            GroundType::SaltWater => "salt_water",
            GroundType::FreshWater => "fresh_water",
            GroundType::Pastoral => "pastoral",
            GroundType::Average => "average",
            GroundType::Rocky => "rocky",
            GroundType::City => "city",
            GroundType::DrySandy => "dry_sandy",
            GroundType::Custom => "custom",
        }
    }
}

fn default_dielectric() -> f64 {
    13.0
}

fn default_conductivity() -> f64 {
    0.005
}

fn default_ground_type() -> GroundType {
    GroundType::Average
}

/// Ground configuration for the GN card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundConfig {
    #[serde(default = "default_ground_type")]
    pub ground_type: GroundType,
    /// Relative dielectric constant, used when `ground_type` is custom.
    #[serde(default = "default_dielectric")]
    pub dielectric_constant: f64,
    /// Conductivity in S/m, used when `ground_type` is custom.
    #[serde(default = "default_conductivity")]
    pub conductivity: f64,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            ground_type: default_ground_type(),
            dielectric_constant: default_dielectric(),
            conductivity: default_conductivity(),
        }
    }
}

impl GroundConfig {
    /// The (dielectric constant, conductivity) pair for the GN card.
    pub fn nec_params(&self) -> (f64, f64) {
        match self.ground_type {
            GroundType::FreeSpace | GroundType::Perfect => (0.0, 0.0),
            GroundType::Custom => (self.dielectric_constant, self.conductivity),
            other => other
                .preset_params()
                .unwrap_or((self.dielectric_constant, self.conductivity)),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("dielectric_constant", self.dielectric_constant, 1.0, 100.0)?;
        check_range("conductivity", self.conductivity, 0.0, 10.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dipole_wire() -> Wire {
        Wire {
            tag: 1,
            segments: 21,
            x1: -5.0,
            y1: 0.0,
            z1: 10.0,
            x2: 5.0,
            y2: 0.0,
            z2: 10.0,
            radius: 0.001,
        }
    }

    #[test]
    fn valid_wire_passes() {
        dipole_wire().validate().unwrap();
        assert!((dipole_wire().length() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn coincident_endpoints_rejected() {
        let mut w = dipole_wire();
        w.x2 = w.x1;
        w.y2 = w.y1;
        w.z2 = w.z1;
        let err = w.validate().unwrap_err();
        assert!(err.to_string().contains("coincident"));
    }

    #[test]
    fn non_finite_coordinate_rejected() {
        let mut w = dipole_wire();
        w.z1 = f64::NAN;
        assert!(w.validate().is_err());
    }

    #[test]
    fn radius_bounds_enforced() {
        let mut w = dipole_wire();
        w.radius = 0.5;
        assert!(w.validate().is_err());
        w.radius = 0.00001;
        assert!(w.validate().is_err());
    }

    #[test]
    fn load_type_codes_round_trip() {
        for code in [0u8, 1, 4, 5] {
            let lt = LoadType::try_from(code).unwrap();
            assert_eq!(lt.nec_code(), code);
        }
        assert!(LoadType::try_from(2).is_err());
    }

    #[test]
    fn ground_presets() {
        let g = GroundConfig {
            ground_type: GroundType::SaltWater,
            ..GroundConfig::default()
        };
        assert_eq!(g.nec_params(), (80.0, 5.0));

        let custom = GroundConfig {
            ground_type: GroundType::Custom,
            dielectric_constant: 42.0,
            conductivity: 0.25,
        };
        assert_eq!(custom.nec_params(), (42.0, 0.25));
        assert_eq!(GroundConfig::default().nec_params(), (13.0, 0.005));
    }

    #[test]
    fn ground_type_serde_names() {
        let g: GroundType = serde_json::from_str("\"salt_water\"").unwrap();
        assert_eq!(g, GroundType::SaltWater);
        assert_eq!(serde_json::to_string(&GroundType::FreeSpace).unwrap(), "\"free_space\"");
    }
}
