//! NEC2 card-deck builder.
//!
//! Serializes a validated [`SimulationRequest`] into the solver's
//! line-oriented card format. The builder is pure: the same request always
//! produces a byte-identical deck.

use std::fmt::Write as _;

use crate::antenna::GroundType;
use crate::request::SimulationRequest;

/// Render a value the way `%.6g` would: six significant digits, scientific
/// notation outside the decimal-friendly range, trailing zeros trimmed.
pub(crate) fn sig6(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return format!("{v}");
    }
    let exp = v.abs().log10().floor() as i32;
    if exp < -4 || exp >= 6 {
        let s = format!("{:.5e}", v);
        match s.split_once('e') {
            Some((mantissa, e)) => {
                let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
                format!("{mantissa}e{e}")
            }
            None => s,
        }
    } else {
        let prec = (5 - exp).max(0) as usize;
        let s = format!("{v:.prec$}");
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

/// Generate the complete solver input deck for one request.
///
/// Card order: comments, geometry (GW/GA/GM/GR), GE, GN, LD, TL, PT, EX, FR,
/// RP, EN. One logical card per line, fields space-separated, final newline.
pub fn build_card_deck(request: &SimulationRequest) -> String {
    let mut deck = String::new();
    let mut card = |line: String| {
        deck.push_str(&line);
        deck.push('\n');
    };

    card(format!("CM {}", request.comment));
    card("CE".to_string());

    for wire in &request.wires {
        card(format!(
            "GW {} {} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            wire.tag,
            wire.segments,
            wire.x1,
            wire.y1,
            wire.z1,
            wire.x2,
            wire.y2,
            wire.z2,
            wire.radius
        ));
    }

    for arc in &request.arcs {
        card(format!(
            "GA {} {} {:.6} {:.2} {:.2} {:.6}",
            arc.tag, arc.segments, arc.arc_radius, arc.start_angle, arc.end_angle, arc.wire_radius
        ));
    }

    for gm in &request.transforms {
        card(format!(
            "GM {} {} {:.4} {:.4} {:.4} {:.6} {:.6} {:.6} {}",
            gm.tag_increment,
            gm.n_new_structures,
            gm.rot_x,
            gm.rot_y,
            gm.rot_z,
            gm.trans_x,
            gm.trans_y,
            gm.trans_z,
            gm.start_tag
        ));
    }

    if let Some(sym) = &request.symmetry {
        card(format!("GR {} {}", sym.tag_increment, sym.n_copies));
    }

    let ground_type = request.ground.ground_type;
    if ground_type == GroundType::FreeSpace {
        card("GE -1".to_string());
        card("GN -1".to_string());
    } else {
        card("GE 0".to_string());
        if ground_type == GroundType::Perfect {
            card("GN 1 0 0 0 0 0".to_string());
        } else {
            let (eps_r, sigma) = request.ground.nec_params();
            card(format!("GN 2 0 0 0 {eps_r:.4} {sigma:.6}"));
        }
    }

    for ld in &request.loads {
        card(format!(
            "LD {} {} {} {} {} {} {}",
            ld.load_type.nec_code(),
            ld.wire_tag,
            ld.segment_start,
            ld.segment_end,
            sig6(ld.param1),
            sig6(ld.param2),
            sig6(ld.param3)
        ));
    }

    for tl in &request.transmission_lines {
        card(format!(
            "TL {} {} {} {} {:.4} {:.6} {} {} {} {}",
            tl.wire_tag1,
            tl.segment1,
            tl.wire_tag2,
            tl.segment2,
            tl.impedance,
            tl.length,
            sig6(tl.shunt_admittance_real1),
            sig6(tl.shunt_admittance_imag1),
            sig6(tl.shunt_admittance_real2),
            sig6(tl.shunt_admittance_imag2)
        ));
    }

    if request.compute_currents {
        card("PT 0 0 0 0".to_string());
    } else {
        card("PT -1 0 0 0".to_string());
    }

    for ex in &request.excitations {
        card(format!(
            "EX 0 {} {} 0 {:.4} {:.4}",
            ex.wire_tag, ex.segment, ex.voltage_real, ex.voltage_imag
        ));
    }

    let freq = &request.frequency;
    card(format!(
        "FR 0 {} 0 0 {:.6} {:.6}",
        freq.steps,
        freq.start_mhz,
        freq.step_mhz()
    ));

    let pat = &request.pattern;
    let mut rp = String::new();
    let _ = write!(
        rp,
        "RP 0 {} {} 1000 {:.1} {:.1} {:.1} {:.1}",
        pat.n_theta(),
        pat.n_phi(),
        pat.theta_start,
        pat.phi_start,
        pat.theta_step,
        pat.phi_step
    );
    card(rp);

    card("EN".to_string());

    deck
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antenna::{
        Excitation, GroundConfig, GroundType, LoadType, LumpedLoad, Wire,
    };
    use crate::request::{FrequencyConfig, PatternConfig};

    fn dipole() -> SimulationRequest {
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
                ground_type: GroundType::FreeSpace,
                ..GroundConfig::default()
            },
            frequency: FrequencyConfig {
                start_mhz: 14.0,
                stop_mhz: 14.2,
                steps: 3,
            },
            pattern: PatternConfig::default(),
            comment: "test dipole".to_string(),
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
    fn dipole_deck_layout() {
        let deck = build_card_deck(&dipole());
        let expected = "\
CM test dipole
CE
GW 1 21 -5.000000 0.000000 10.000000 5.000000 0.000000 10.000000 0.001000
GE -1
GN -1
PT -1 0 0 0
EX 0 1 11 0 1.0000 0.0000
FR 0 3 0 0 14.000000 0.100000
RP 0 37 72 1000 -90.0 0.0 5.0 5.0
EN
";
        assert_eq!(deck, expected);
    }

    #[test]
    fn deck_is_deterministic() {
        let req = dipole();
        assert_eq!(build_card_deck(&req), build_card_deck(&req));
    }

    #[test]
    fn ends_in_single_newline() {
        let deck = build_card_deck(&dipole());
        assert!(deck.ends_with("EN\n"));
        assert!(!deck.ends_with("\n\n"));
    }

    #[test]
    fn perfect_ground_cards() {
        let mut req = dipole();
        req.ground.ground_type = GroundType::Perfect;
        let deck = build_card_deck(&req);
        assert!(deck.contains("\nGE 0\n"));
        assert!(deck.contains("\nGN 1 0 0 0 0 0\n"));
    }

    #[test]
    fn average_ground_cards() {
        let mut req = dipole();
        req.ground.ground_type = GroundType::Average;
        let deck = build_card_deck(&req);
        assert!(deck.contains("\nGN 2 0 0 0 13.0000 0.005000\n"));
    }

    #[test]
    fn load_card_uses_general_format() {
        let mut req = dipole();
        req.loads.push(LumpedLoad {
            load_type: LoadType::SeriesRlc,
            wire_tag: 1,
            segment_start: 11,
            segment_end: 11,
            param1: 50.0,
            param2: 2.5e-6,
            param3: 1.2e-11,
        });
        let deck = build_card_deck(&req);
        assert!(deck.contains("\nLD 0 1 11 11 50 2.5e-6 1.2e-11\n"), "deck was:\n{deck}");
    }

    #[test]
    fn currents_flag_flips_pt_card() {
        let mut req = dipole();
        req.compute_currents = true;
        assert!(build_card_deck(&req).contains("\nPT 0 0 0 0\n"));
    }

    #[test]
    fn sig6_matches_expected_renderings() {
        assert_eq!(sig6(0.0), "0");
        assert_eq!(sig6(50.0), "50");
        assert_eq!(sig6(0.005), "0.005");
        assert_eq!(sig6(123456.0), "123456");
        assert_eq!(sig6(2.5e-6), "2.5e-6");
        assert_eq!(sig6(-1.0), "-1");
    }
}
