//! Import/export converters for MMANA-GAL `.maa` files and raw NEC2 `.nec`
//! card decks.
//!
//! Both importers are tolerant: `.maa` releases vary, so the counts line is
//! searched for and malformed load/source lines are skipped; `.nec` decks
//! are free-format, so unknown cards are ignored and broken cards logged.

use tracing::warn;

use crate::antenna::{
    Excitation, GroundConfig, GroundType, LoadType, LumpedLoad, TransmissionLine, Wire,
};
use crate::deck::sig6;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MaaParseError(pub String);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NecParseError(pub String);

/// Parsed contents of a `.maa` file.
#[derive(Debug, Clone)]
pub struct MaaData {
    pub title: String,
    pub wires: Vec<Wire>,
    pub excitations: Vec<Excitation>,
    pub loads: Vec<LumpedLoad>,
    pub ground: GroundConfig,
    pub frequency_mhz: f64,
}

/// Parsed contents of a `.nec` card deck.
#[derive(Debug, Clone)]
pub struct NecFileData {
    pub comment: String,
    pub wires: Vec<Wire>,
    pub excitations: Vec<Excitation>,
    pub loads: Vec<LumpedLoad>,
    pub transmission_lines: Vec<TransmissionLine>,
    pub ground: GroundConfig,
    pub frequency_start_mhz: f64,
    pub frequency_stop_mhz: f64,
    pub frequency_steps: u32,
}

fn normalized_lines(content: &str) -> Vec<String> {
    content
        .trim()
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|l| l.to_string())
        .collect()
}

fn parse_float_at(parts: &[&str], idx: usize) -> f64 {
    parts
        .get(idx)
        .and_then(|p| p.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn center_segment(segments: u32) -> u32 {
    (segments + 1) / 2
}

/// Parse a MMANA-GAL `.maa` file into structured antenna data.
pub fn parse_maa(content: &str) -> Result<MaaData, MaaParseError> {
    let lines = normalized_lines(content);
    if lines.len() < 3 {
        return Err(MaaParseError(
            "file too short — expected at least title, counts, and geometry".into(),
        ));
    }

    let title = lines[0].trim().to_string();

    // The counts line (N_wires N_loads N_sources) floats around between
    // format revisions; search for the first line that parses.
    let mut idx = 1;
    let mut n_wires = 0usize;
    let mut n_loads = 0usize;
    let mut n_sources = 0usize;
    while idx < lines.len() {
        let parts: Vec<&str> = lines[idx].split_whitespace().collect();
        if parts.len() >= 3 {
            let cleaned: Vec<&str> = parts[..3]
                .iter()
                .map(|p| p.trim_matches(|c| c == ',' || c == '*'))
                .collect();
            if let (Ok(w), Ok(l), Ok(s)) = (
                cleaned[0].parse::<usize>(),
                cleaned[1].parse::<usize>(),
                cleaned[2].parse::<usize>(),
            ) {
                n_wires = w;
                n_loads = l;
                n_sources = s;
                idx += 1;
                break;
            }
        }
        idx += 1;
    }
    if n_wires == 0 {
        return Err(MaaParseError("could not find wire count line in .maa file".into()));
    }

    let mut data = MaaData {
        title,
        wires: Vec::with_capacity(n_wires),
        excitations: Vec::new(),
        loads: Vec::new(),
        ground: GroundConfig::default(),
        frequency_mhz: 14.0,
    };

    // Wire lines: X1 Y1 Z1 X2 Y2 Z2 Radius N_segments
    for i in 0..n_wires {
        let line = lines
            .get(idx)
            .ok_or_else(|| MaaParseError(format!("unexpected end of file at wire {}", i + 1)))?;
        idx += 1;

        let cleaned = line.replace(',', " ");
        let parts: Vec<&str> = cleaned.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(MaaParseError(format!(
                "wire {}: expected 8 values, got {}: {line}",
                i + 1,
                parts.len()
            )));
        }

        let coords: Vec<f64> = parts[..6]
            .iter()
            .map(|p| p.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| MaaParseError(format!("wire {}: invalid data: {e}", i + 1)))?;
        let radius = parts[6]
            .parse::<f64>()
            .map_err(|e| MaaParseError(format!("wire {}: invalid data: {e}", i + 1)))?
            .clamp(0.0001, 0.1);
        let segments = parts[7]
            .parse::<f64>()
            .map_err(|e| MaaParseError(format!("wire {}: invalid data: {e}", i + 1)))?
            as i64;
        let segments = segments.clamp(1, 200) as u32;

        let wire = Wire {
            tag: (i + 1) as u32,
            segments,
            x1: coords[0],
            y1: coords[1],
            z1: coords[2],
            x2: coords[3],
            y2: coords[4],
            z2: coords[5],
            radius,
        };
        wire.validate()
            .map_err(|e| MaaParseError(format!("wire {}: invalid data: {e}", i + 1)))?;
        data.wires.push(wire);
    }

    // Load lines: Wire_num Seg_num R X L C
    for _ in 0..n_loads {
        let Some(line) = lines.get(idx) else { break };
        idx += 1;

        let cleaned = line.replace(',', " ");
        let parts: Vec<&str> = cleaned.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let (Some(wire_num), Some(seg_num)) = (
            parts[0].parse::<f64>().ok().map(|v| v as u32),
            parts[1].parse::<f64>().ok().map(|v| v as u32),
        ) else {
            continue;
        };

        let r = parse_float_at(&parts, 2);
        let x = parse_float_at(&parts, 3);
        let inductance = parse_float_at(&parts, 4);
        let capacitance = parse_float_at(&parts, 5);

        let load = if inductance != 0.0 || capacitance != 0.0 {
            LumpedLoad {
                load_type: LoadType::SeriesRlc,
                wire_tag: wire_num,
                segment_start: seg_num,
                segment_end: seg_num,
                param1: r,
                param2: inductance,
                param3: capacitance,
            }
        } else {
            LumpedLoad {
                load_type: LoadType::FixedImpedance,
                wire_tag: wire_num,
                segment_start: seg_num,
                segment_end: seg_num,
                param1: r,
                param2: x,
                param3: 0.0,
            }
        };
        data.loads.push(load);
    }

    // Source lines: Wire_num Seg_num Voltage_mag Voltage_phase
    for _ in 0..n_sources {
        let Some(line) = lines.get(idx) else { break };
        idx += 1;

        let cleaned = line.replace(',', " ");
        let parts: Vec<&str> = cleaned.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let (Some(wire_num), Some(seg_num)) = (
            parts[0].parse::<f64>().ok().map(|v| v as u32),
            parts[1].parse::<f64>().ok().map(|v| v as u32),
        ) else {
            continue;
        };
        let v_mag = parts.get(2).and_then(|p| p.parse::<f64>().ok()).unwrap_or(1.0);
        let v_phase_deg = parts.get(3).and_then(|p| p.parse::<f64>().ok()).unwrap_or(0.0);

        let v_phase_rad = v_phase_deg.to_radians();
        data.excitations.push(Excitation {
            wire_tag: wire_num,
            segment: seg_num,
            voltage_real: v_mag * v_phase_rad.cos(),
            voltage_imag: v_mag * v_phase_rad.sin(),
        });
    }

    if data.excitations.is_empty() {
        if let Some(first) = data.wires.first() {
            data.excitations.push(Excitation {
                wire_tag: 1,
                segment: center_segment(first.segments),
                voltage_real: 1.0,
                voltage_imag: 0.0,
            });
        }
    }

    // Trailing lines carry ground and frequency hints.
    while idx < lines.len() {
        let line = lines[idx].trim().to_lowercase();
        idx += 1;

        let digits_only: String = line
            .chars()
            .filter(|c| *c != '.' && *c != '-')
            .collect();
        if line.contains("mhz")
            || (!digits_only.is_empty() && digits_only.chars().all(|c| c.is_ascii_digit()))
        {
            if let Some(freq) = line
                .split_whitespace()
                .next()
                .and_then(|tok| tok.replace(',', "").parse::<f64>().ok())
            {
                if (0.1..=500.0).contains(&freq) {
                    data.frequency_mhz = freq;
                }
            }
        }

        if line.contains("free") && line.contains("space") {
            data.ground = GroundConfig {
                ground_type: GroundType::FreeSpace,
                ..GroundConfig::default()
            };
        } else if line.contains("perfect") {
            data.ground = GroundConfig {
                ground_type: GroundType::Perfect,
                ..GroundConfig::default()
            };
        } else if line.contains("real") || line.contains("average") {
            data.ground = GroundConfig::default();
        }
    }

    Ok(data)
}

/// Export antenna geometry to MMANA-GAL `.maa` format.
pub fn export_maa(
    title: &str,
    wires: &[Wire],
    excitations: &[Excitation],
    loads: &[LumpedLoad],
    frequency_mhz: f64,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(if title.is_empty() {
        "AntSim export".to_string()
    } else {
        title.to_string()
    });
    lines.push(format!("{frequency_mhz:.6}"));
    lines.push(format!("{} {} {}", wires.len(), loads.len(), excitations.len()));

    for wire in wires {
        lines.push(format!(
            "{:.6}, {:.6}, {:.6}, {:.6}, {:.6}, {:.6}, {:.6}, {}",
            wire.x1, wire.y1, wire.z1, wire.x2, wire.y2, wire.z2, wire.radius, wire.segments
        ));
    }

    for load in loads {
        let line = match load.load_type {
            LoadType::SeriesRlc => format!(
                "{}, {}, {}, 0, {}, {}",
                load.wire_tag,
                load.segment_start,
                sig6(load.param1),
                sig6(load.param2),
                sig6(load.param3)
            ),
            LoadType::FixedImpedance => format!(
                "{}, {}, {}, {}, 0, 0",
                load.wire_tag,
                load.segment_start,
                sig6(load.param1),
                sig6(load.param2)
            ),
            _ => format!(
                "{}, {}, {}, {}, {}, 0",
                load.wire_tag,
                load.segment_start,
                sig6(load.param1),
                sig6(load.param2),
                sig6(load.param3)
            ),
        };
        lines.push(line);
    }

    for ex in excitations {
        let v_mag = (ex.voltage_real * ex.voltage_real + ex.voltage_imag * ex.voltage_imag).sqrt();
        let v_phase = ex.voltage_imag.atan2(ex.voltage_real).to_degrees();
        lines.push(format!(
            "{}, {}, {v_mag:.6}, {v_phase:.2}",
            ex.wire_tag, ex.segment
        ));
    }

    // Ground trailer, kept simple: real ground with average parameters.
    lines.push("1".to_string());
    lines.push("13.0, 0.005".to_string());
    lines.push(String::new());

    lines.join("\n") + "\n"
}

/// Parse a NEC2 `.nec` card deck.
///
/// Supports CM, CE, GW, GN, EX, LD, TL, FR, EN; other cards are ignored.
pub fn parse_nec_file(content: &str) -> Result<NecFileData, NecParseError> {
    let mut data = NecFileData {
        comment: String::new(),
        wires: Vec::new(),
        excitations: Vec::new(),
        loads: Vec::new(),
        transmission_lines: Vec::new(),
        ground: GroundConfig {
            ground_type: GroundType::FreeSpace,
            ..GroundConfig::default()
        },
        frequency_start_mhz: 14.0,
        frequency_stop_mhz: 14.5,
        frequency_steps: 11,
    };

    let mut comments: Vec<String> = Vec::new();

    for raw in normalized_lines(content) {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let card = parts[0].to_ascii_uppercase();

        match card.as_str() {
            "CM" => {
                comments.push(line.get(2..).unwrap_or("").trim().to_string());
            }
            "CE" => {
                data.comment = comments.join(" ").trim().to_string();
            }
            "GW" => {
                if parts.len() < 10 {
                    warn!("GW card too short: {line}");
                    continue;
                }
                let (Ok(tag), Ok(segments)) = (parts[1].parse::<u32>(), parts[2].parse::<i64>())
                else {
                    warn!("failed to parse GW: {line}");
                    continue;
                };
                let wire = Wire {
                    tag,
                    segments: segments.clamp(1, 200) as u32,
                    x1: parse_float_at(&parts, 3),
                    y1: parse_float_at(&parts, 4),
                    z1: parse_float_at(&parts, 5),
                    x2: parse_float_at(&parts, 6),
                    y2: parse_float_at(&parts, 7),
                    z2: parse_float_at(&parts, 8),
                    radius: parse_float_at(&parts, 9).clamp(0.0001, 0.1),
                };
                match wire.validate() {
                    Ok(()) => data.wires.push(wire),
                    Err(e) => warn!("failed to parse GW: {line} — {e}"),
                }
            }
            "GN" => {
                let Some(Ok(gn_type)) = parts.get(1).map(|p| p.parse::<i32>()) else {
                    continue;
                };
                match gn_type {
                    -1 => {
                        data.ground = GroundConfig {
                            ground_type: GroundType::FreeSpace,
                            ..GroundConfig::default()
                        }
                    }
                    1 => {
                        data.ground = GroundConfig {
                            ground_type: GroundType::Perfect,
                            ..GroundConfig::default()
                        }
                    }
                    2 => {
                        let eps_r = parts
                            .get(5)
                            .and_then(|p| p.parse::<f64>().ok())
                            .unwrap_or(13.0);
                        let sigma = parts
                            .get(6)
                            .and_then(|p| p.parse::<f64>().ok())
                            .unwrap_or(0.005);
                        data.ground = GroundConfig {
                            ground_type: GroundType::Custom,
                            dielectric_constant: eps_r,
                            conductivity: sigma,
                        };
                    }
                    _ => {}
                }
            }
            "EX" => {
                if parts.len() < 4 {
                    continue;
                }
                let (Some(ex_type), Some(tag), Some(segment)) = (
                    parts.get(1).and_then(|p| p.parse::<i32>().ok()),
                    parts.get(2).and_then(|p| p.parse::<u32>().ok()),
                    parts.get(3).and_then(|p| p.parse::<u32>().ok()),
                ) else {
                    continue;
                };
                // only voltage sources carry over
                if ex_type != 0 {
                    continue;
                }
                let voltage_real = parts
                    .get(5)
                    .and_then(|p| p.parse::<f64>().ok())
                    .unwrap_or(1.0);
                let voltage_imag = parts
                    .get(6)
                    .and_then(|p| p.parse::<f64>().ok())
                    .unwrap_or(0.0);
                data.excitations.push(Excitation {
                    wire_tag: tag,
                    segment,
                    voltage_real,
                    voltage_imag,
                });
            }
            "LD" => {
                if parts.len() < 5 {
                    continue;
                }
                let (Some(ld_type), Some(tag), Some(seg_start), Some(seg_end)) = (
                    parts.get(1).and_then(|p| p.parse::<u8>().ok()),
                    parts.get(2).and_then(|p| p.parse::<u32>().ok()),
                    parts.get(3).and_then(|p| p.parse::<u32>().ok()),
                    parts.get(4).and_then(|p| p.parse::<u32>().ok()),
                ) else {
                    continue;
                };
                let Ok(load_type) = LoadType::try_from(ld_type) else {
                    continue;
                };
                data.loads.push(LumpedLoad {
                    load_type,
                    wire_tag: tag,
                    segment_start: seg_start,
                    segment_end: seg_end,
                    param1: parse_float_at(&parts, 5),
                    param2: parse_float_at(&parts, 6),
                    param3: parse_float_at(&parts, 7),
                });
            }
            "TL" => {
                if parts.len() < 7 {
                    continue;
                }
                let (Some(tag1), Some(seg1), Some(tag2), Some(seg2)) = (
                    parts.get(1).and_then(|p| p.parse::<u32>().ok()),
                    parts.get(2).and_then(|p| p.parse::<u32>().ok()),
                    parts.get(3).and_then(|p| p.parse::<u32>().ok()),
                    parts.get(4).and_then(|p| p.parse::<u32>().ok()),
                ) else {
                    continue;
                };
                data.transmission_lines.push(TransmissionLine {
                    wire_tag1: tag1,
                    segment1: seg1,
                    wire_tag2: tag2,
                    segment2: seg2,
                    impedance: parse_float_at(&parts, 5).clamp(1.0, 1000.0),
                    length: parse_float_at(&parts, 6).clamp(0.0, 1000.0),
                    shunt_admittance_real1: parse_float_at(&parts, 7),
                    shunt_admittance_imag1: parse_float_at(&parts, 8),
                    shunt_admittance_real2: parse_float_at(&parts, 9),
                    shunt_admittance_imag2: parse_float_at(&parts, 10),
                });
            }
            "FR" => {
                if parts.len() < 6 {
                    continue;
                }
                let (Some(n_freq), Some(start)) = (
                    parts.get(2).and_then(|p| p.parse::<i64>().ok()),
                    parts.get(5).and_then(|p| p.parse::<f64>().ok()),
                ) else {
                    continue;
                };
                let step = parts.get(6).and_then(|p| p.parse::<f64>().ok()).unwrap_or(0.0);

                data.frequency_start_mhz = start.clamp(0.1, 2000.0);
                data.frequency_steps = n_freq.clamp(1, 201) as u32;
                data.frequency_stop_mhz = if n_freq > 1 && step > 0.0 {
                    (start + step * (n_freq - 1) as f64)
                        .min(2000.0)
                        .max(data.frequency_start_mhz)
                } else {
                    data.frequency_start_mhz
                };
            }
            "EN" => break,
            _ => {}
        }
    }

    if data.wires.is_empty() {
        return Err(NecParseError("no GW (wire) cards found in .nec file".into()));
    }

    if data.excitations.is_empty() {
        let first = &data.wires[0];
        data.excitations.push(Excitation {
            wire_tag: first.tag,
            segment: center_segment(first.segments),
            voltage_real: 1.0,
            voltage_imag: 0.0,
        });
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAA_FIXTURE: &str = "\
20m dipole
14.100000
1 0 1
-5.0, 0.0, 10.0, 5.0, 0.0, 10.0, 0.001, 21
1, 11, 1.0, 0.0
Free space
14.1 MHz
";

    #[test]
    fn parses_maa_wires_and_sources() {
        let data = parse_maa(MAA_FIXTURE).unwrap();
        assert_eq!(data.title, "20m dipole");
        assert_eq!(data.wires.len(), 1);
        assert_eq!(data.wires[0].tag, 1);
        assert_eq!(data.wires[0].segments, 21);
        assert_eq!(data.wires[0].x2, 5.0);
        assert_eq!(data.excitations.len(), 1);
        assert_eq!(data.excitations[0].segment, 11);
        assert!((data.excitations[0].voltage_real - 1.0).abs() < 1e-9);
        assert_eq!(data.ground.ground_type, GroundType::FreeSpace);
        assert!((data.frequency_mhz - 14.1).abs() < 1e-9);
    }

    #[test]
    fn maa_without_sources_gets_center_excitation() {
        let content = "\
no source
14.000000
1 0 0
0.0, 0.0, 10.0, 5.0, 0.0, 10.0, 0.001, 15
";
        let data = parse_maa(content).unwrap();
        assert_eq!(data.excitations.len(), 1);
        assert_eq!(data.excitations[0].wire_tag, 1);
        assert_eq!(data.excitations[0].segment, 8);
    }

    #[test]
    fn maa_without_counts_line_fails() {
        let err = parse_maa("title\njunk\nmore junk\n").unwrap_err();
        assert!(err.to_string().contains("wire count"));
    }

    #[test]
    fn maa_export_reimports() {
        let data = parse_maa(MAA_FIXTURE).unwrap();
        let exported = export_maa(
            "round trip",
            &data.wires,
            &data.excitations,
            &data.loads,
            data.frequency_mhz,
        );
        let reparsed = parse_maa(&exported).unwrap();
        assert_eq!(reparsed.wires, data.wires);
        assert_eq!(reparsed.excitations.len(), 1);
    }

    const NEC_FIXTURE: &str = "\
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

    #[test]
    fn parses_nec_deck() {
        let data = parse_nec_file(NEC_FIXTURE).unwrap();
        assert_eq!(data.comment, "test dipole");
        assert_eq!(data.wires.len(), 1);
        assert_eq!(data.wires[0].segments, 21);
        assert_eq!(data.excitations.len(), 1);
        assert_eq!(data.excitations[0].segment, 11);
        assert_eq!(data.ground.ground_type, GroundType::FreeSpace);
        assert_eq!(data.frequency_steps, 3);
        assert!((data.frequency_start_mhz - 14.0).abs() < 1e-9);
        assert!((data.frequency_stop_mhz - 14.2).abs() < 1e-9);
    }

    #[test]
    fn nec_without_wires_fails() {
        let err = parse_nec_file("CM nothing\nCE\nEN\n").unwrap_err();
        assert!(err.to_string().contains("no GW"));
    }

    #[test]
    fn nec_custom_ground_parsed() {
        let content = "\
GW 1 11 0.0 0.0 10.0 5.0 0.0 10.0 0.001
GN 2 0 0 0 12.5 0.002
EN
";
        let data = parse_nec_file(content).unwrap();
        assert_eq!(data.ground.ground_type, GroundType::Custom);
        assert!((data.ground.dielectric_constant - 12.5).abs() < 1e-9);
        assert!((data.ground.conductivity - 0.002).abs() < 1e-9);
        // no EX card: default center excitation
        assert_eq!(data.excitations[0].segment, 6);
    }

    #[test]
    fn nec_load_and_tl_cards_parsed() {
        let content = "\
GW 1 11 0.0 0.0 10.0 5.0 0.0 10.0 0.001
GW 2 11 0.0 2.0 10.0 5.0 2.0 10.0 0.001
LD 0 1 5 5 50 2.5e-6 1.2e-11
LD 7 1 5 5 1 2 3
TL 1 6 2 6 450.0 0.0 0 0 0 0
EX 0 1 6 0 1.0 0.0
EN
";
        let data = parse_nec_file(content).unwrap();
        assert_eq!(data.loads.len(), 1);
        assert_eq!(data.loads[0].load_type, LoadType::SeriesRlc);
        assert_eq!(data.transmission_lines.len(), 1);
        assert_eq!(data.transmission_lines[0].impedance, 450.0);
    }
}
