//! Solver output parser.
//!
//! Scans the solver's fixed-column text report into per-frequency results
//! and derives SWR, front/back ratio, beamwidths and efficiency. The scan is
//! a line-oriented state machine; a malformed block is a non-event (the
//! block is dropped and whatever valid blocks exist are returned).
//!
//! Numeric fields are whitespace-separated scientific notation which
//! `f64::from_str` accepts directly, so rows are tokenized rather than
//! pattern-matched.

use crate::request::PatternConfig;
use crate::results::{
    FrequencyResult, Impedance, PatternData, SegmentCurrent, UNPOPULATED_GAIN,
};

/// Compute SWR from a complex impedance relative to `z0`.
///
/// Returns the 999.0 sentinel when the reflection coefficient magnitude
/// reaches 1 (or the denominator vanishes); otherwise rounds to 4 decimals.
pub fn compute_swr(z_real: f64, z_imag: f64, z0: f64) -> f64 {
    let num_real = z_real - z0;
    let num_imag = z_imag;
    let den_real = z_real + z0;
    let den_imag = z_imag;

    let den_mag_sq = den_real * den_real + den_imag * den_imag;
    if den_mag_sq < 1e-30 {
        return 999.0;
    }

    let gamma_real = (num_real * den_real + num_imag * den_imag) / den_mag_sq;
    let gamma_imag = (num_imag * den_real - num_real * den_imag) / den_mag_sq;
    let gamma_mag = (gamma_real * gamma_real + gamma_imag * gamma_imag).sqrt();

    if gamma_mag >= 1.0 {
        return 999.0;
    }

    round_to((1.0 + gamma_mag) / (1.0 - gamma_mag), 4)
}

pub(crate) fn round_to(v: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (v * scale).round() / scale
}

/// Scan states of the per-line parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Idle,
    InputParams,
    Pattern,
    Currents,
}

/// Accumulator for the frequency block currently being scanned.
struct FreqBlock {
    freq_mhz: f64,
    impedance: Option<Impedance>,
    pattern_samples: Vec<(f64, f64, f64)>,
    currents: Vec<SegmentCurrent>,
    radiated_power: Option<f64>,
    input_power: Option<f64>,
}

impl FreqBlock {
    fn new(freq_mhz: f64) -> Self {
        Self {
            freq_mhz,
            impedance: None,
            pattern_samples: Vec::new(),
            currents: Vec::new(),
            radiated_power: None,
            input_power: None,
        }
    }
}

/// Matches `FREQUENCY : <sci> MHZ` headers (case-insensitive unit).
fn parse_frequency_header(line: &str) -> Option<f64> {
    let upper = line.to_ascii_uppercase();
    let idx = upper.find("FREQUENCY")?;
    let rest = upper[idx + "FREQUENCY".len()..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let mut tokens = rest.split_whitespace();
    let value: f64 = tokens.next()?.parse().ok()?;
    match tokens.next() {
        Some(unit) if unit.starts_with("MHZ") => Some(value),
        _ => None,
    }
}

/// Matches `<label> = <n> WATTS` power-budget lines.
fn parse_power(line: &str, label: &str) -> Option<f64> {
    let idx = line.find(label)?;
    let rest = line[idx + label.len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    rest.split_whitespace().next()?.parse().ok()
}

/// Impedance row of the input-parameters table: 11 numeric columns, the
/// feed-point impedance in columns 7 and 8.
fn parse_impedance_row(line: &str) -> Option<Impedance> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 11 {
        return None;
    }
    tokens[0].parse::<u32>().ok()?;
    tokens[1].parse::<u32>().ok()?;
    let mut values = [0f64; 9];
    for (i, tok) in tokens[2..11].iter().enumerate() {
        values[i] = tok.parse().ok()?;
    }
    Some(Impedance {
        real: round_to(values[4], 4),
        imag: round_to(values[5], 4),
    })
}

/// Pattern row: theta, phi, three gain columns, axial ratio, tilt, sense.
fn parse_pattern_row(line: &str) -> Option<(f64, f64, f64)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 8 {
        return None;
    }
    let mut values = [0f64; 7];
    for (i, tok) in tokens[..7].iter().enumerate() {
        values[i] = tok.parse().ok()?;
    }
    // Column 8 is the polarization sense word; reject rows where it is
    // numeric since those belong to other tables.
    if tokens[7].parse::<f64>().is_ok() {
        return None;
    }
    Some((values[0], values[1], values[4]))
}

/// Currents row: seg, tag, x, y, z, length, re, im, magnitude, phase.
fn parse_current_row(line: &str) -> Option<SegmentCurrent> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 10 {
        return None;
    }
    let segment: u32 = tokens[0].parse().ok()?;
    let tag: u32 = tokens[1].parse().ok()?;
    let mut values = [0f64; 8];
    for (i, tok) in tokens[2..10].iter().enumerate() {
        values[i] = tok.parse().ok()?;
    }
    Some(SegmentCurrent {
        tag,
        segment,
        x: values[0],
        y: values[1],
        z: values[2],
        current_real: values[4],
        current_imag: values[5],
        current_magnitude: values[6],
        current_phase_deg: values[7],
    })
}

/// Parse the complete solver report into one [`FrequencyResult`] per
/// frequency block, using the pattern geometry the deck was built with.
pub fn parse_nec_output(
    output: &str,
    pattern: &PatternConfig,
    compute_currents: bool,
) -> Vec<FrequencyResult> {
    let mut results = Vec::new();
    let mut block: Option<FreqBlock> = None;
    let mut section = Section::Idle;
    let mut skip_header_lines = 0u32;

    for line in output.lines() {
        if let Some(freq) = parse_frequency_header(line) {
            if let Some(done) = block.take() {
                if let Some(result) = build_frequency_result(done, pattern) {
                    results.push(result);
                }
            }
            block = Some(FreqBlock::new(freq));
            section = Section::Idle;
            skip_header_lines = 0;
            continue;
        }

        if line.contains("ANTENNA INPUT PARAMETERS") {
            section = Section::InputParams;
            skip_header_lines = 2;
            continue;
        }
        if line.contains("RADIATION PATTERNS") {
            section = Section::Pattern;
            skip_header_lines = 3;
            continue;
        }
        if compute_currents && line.contains("CURRENTS AND LOCATION") {
            section = Section::Currents;
            skip_header_lines = 3;
            continue;
        }

        if let Some(b) = block.as_mut() {
            if let Some(p) = parse_power(line, "RADIATED POWER") {
                b.radiated_power = Some(p);
                continue;
            }
            if let Some(p) = parse_power(line, "INPUT POWER") {
                b.input_power = Some(p);
                continue;
            }
        }

        if skip_header_lines > 0 {
            skip_header_lines -= 1;
            continue;
        }

        let Some(b) = block.as_mut() else {
            continue;
        };

        match section {
            Section::InputParams => {
                if let Some(z) = parse_impedance_row(line) {
                    b.impedance = Some(z);
                    section = Section::Idle;
                }
            }
            Section::Pattern => {
                if let Some(sample) = parse_pattern_row(line) {
                    b.pattern_samples.push(sample);
                } else if line.trim().is_empty() {
                    section = Section::Idle;
                }
            }
            Section::Currents => {
                if let Some(current) = parse_current_row(line) {
                    b.currents.push(current);
                } else if line.trim().is_empty() {
                    section = Section::Idle;
                }
            }
            Section::Idle => {}
        }
    }

    if let Some(done) = block.take() {
        if let Some(result) = build_frequency_result(done, pattern) {
            results.push(result);
        }
    }

    results
}

fn build_frequency_result(block: FreqBlock, pattern: &PatternConfig) -> Option<FrequencyResult> {
    let impedance = block.impedance?;
    let swr = compute_swr(impedance.real, impedance.imag, 50.0);

    let n_theta = pattern.n_theta();
    let n_phi = pattern.n_phi();

    let mut pattern_data = None;
    let mut gain_max_dbi = UNPOPULATED_GAIN;
    let mut gain_max_theta = 0.0;
    let mut gain_max_phi = 0.0;

    if !block.pattern_samples.is_empty() {
        let mut grid = vec![vec![UNPOPULATED_GAIN; n_phi]; n_theta];
        for &(theta, phi, gain_db) in &block.pattern_samples {
            let ti = ((theta - pattern.theta_start) / pattern.theta_step).round() as i64;
            let pi = ((phi - pattern.phi_start) / pattern.phi_step).round() as i64;
            if (0..n_theta as i64).contains(&ti) && (0..n_phi as i64).contains(&pi) {
                grid[ti as usize][pi as usize] = gain_db;
                if gain_db > gain_max_dbi {
                    gain_max_dbi = gain_db;
                    gain_max_theta = theta;
                    gain_max_phi = phi;
                }
            }
        }
        pattern_data = Some(PatternData {
            theta_start: pattern.theta_start,
            theta_step: pattern.theta_step,
            theta_count: n_theta,
            phi_start: pattern.phi_start,
            phi_step: pattern.phi_step,
            phi_count: n_phi,
            gain_dbi: grid,
        });
    }

    let have_max = gain_max_dbi > -999.0;

    let front_to_back = if have_max {
        let back_phi = (gain_max_phi + 180.0).rem_euclid(360.0);
        let mut back_gain = UNPOPULATED_GAIN;
        for &(theta, phi, gain_db) in &block.pattern_samples {
            if (theta - gain_max_theta).abs() < pattern.theta_step * 0.6
                && (phi - back_phi).abs() < pattern.phi_step * 0.6
            {
                back_gain = back_gain.max(gain_db);
            }
        }
        (back_gain > -999.0).then(|| round_to(gain_max_dbi - back_gain, 2))
    } else {
        None
    };

    let (beamwidth_e, beamwidth_h) = if have_max {
        let e_cut: Vec<(f64, f64)> = block
            .pattern_samples
            .iter()
            .filter(|&&(_, phi, _)| (phi - gain_max_phi).abs() < pattern.phi_step * 0.6)
            .map(|&(theta, _, gain)| (theta, gain))
            .collect();
        let h_cut: Vec<(f64, f64)> = block
            .pattern_samples
            .iter()
            .filter(|&&(theta, _, _)| (theta - gain_max_theta).abs() < pattern.theta_step * 0.6)
            .map(|&(_, phi, gain)| (phi, gain))
            .collect();
        (
            half_power_beamwidth(e_cut, gain_max_dbi),
            half_power_beamwidth(h_cut, gain_max_dbi),
        )
    } else {
        (None, None)
    };

    let efficiency = match (block.radiated_power, block.input_power) {
        (Some(radiated), Some(input)) if input > 1e-30 => {
            Some(round_to((100.0 * radiated / input).min(100.0), 2))
        }
        _ => None,
    };

    Some(FrequencyResult {
        frequency_mhz: round_to(block.freq_mhz, 6),
        impedance,
        swr_50: swr,
        gain_max_dbi: if have_max { round_to(gain_max_dbi, 2) } else { UNPOPULATED_GAIN },
        gain_max_theta,
        gain_max_phi,
        front_to_back_db: front_to_back,
        beamwidth_e_deg: beamwidth_e,
        beamwidth_h_deg: beamwidth_h,
        efficiency_percent: efficiency,
        pattern: pattern_data,
        currents: (!block.currents.is_empty()).then_some(block.currents),
    })
}

/// -3 dB beamwidth of one principal-plane cut.
///
/// Sorts the cut by angle, walks outward from the peak on each side to the
/// first crossing of `peak - 3 dB`, and linearly interpolates the crossing
/// angle. Returns None when either side never drops below the threshold.
fn half_power_beamwidth(mut cut: Vec<(f64, f64)>, peak_gain: f64) -> Option<f64> {
    if cut.len() < 3 {
        return None;
    }
    cut.sort_by(|a, b| a.0.total_cmp(&b.0));
    let threshold = peak_gain - 3.0;

    let peak_idx = cut
        .iter()
        .enumerate()
        .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
        .map(|(i, _)| i)?;

    let crossing = |inner: usize, outer: usize| -> f64 {
        let (a0, g0) = cut[outer];
        let (a1, g1) = cut[inner];
        if (g1 - g0).abs() < 1e-12 {
            return a0;
        }
        a0 + (threshold - g0) / (g1 - g0) * (a1 - a0)
    };

    let mut left = None;
    for i in (0..peak_idx).rev() {
        if cut[i].1 < threshold {
            left = Some(crossing(i + 1, i));
            break;
        }
    }
    let mut right = None;
    for i in peak_idx + 1..cut.len() {
        if cut[i].1 < threshold {
            right = Some(crossing(i - 1, i));
            break;
        }
    }

    match (left, right) {
        (Some(l), Some(r)) => Some(round_to(r - l, 2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swr_identities() {
        assert_eq!(compute_swr(50.0, 0.0, 50.0), 1.0);
        assert_eq!(compute_swr(0.0, 0.0, 50.0), 999.0);
        // |gamma| grows with reactance, SWR must not decrease
        let mut last = 0.0;
        for x in [0.0, 5.0, 20.0, 80.0, 300.0] {
            let swr = compute_swr(50.0, x, 50.0);
            assert!(swr >= last, "swr {swr} < {last} at x={x}");
            last = swr;
        }
        assert!(compute_swr(100.0, 0.0, 50.0) > 1.0);
    }

    fn synthetic_output() -> String {
        let mut out = String::new();
        out.push_str("                     FREQUENCY : 1.4100E+01 MHZ\n");
        out.push_str("                     WAVELENGTH : 2.1261E+01 METERS\n");
        out.push('\n');
        out.push_str("                   ----- ANTENNA INPUT PARAMETERS -----\n");
        out.push_str("  TAG   SEG       VOLTAGE (VOLTS)         CURRENT (AMPS)         IMPEDANCE (OHMS)        ADMITTANCE (MHOS)     POWER\n");
        out.push_str("  NO.   NO.     REAL      IMAGINARY     REAL      IMAGINARY     REAL      IMAGINARY     REAL      IMAGINARY   (WATTS)\n");
        out.push_str("     1    11  1.0000E+00  0.0000E+00  1.3000E-02 -2.0000E-03  7.2000E+01  1.1000E+01  1.2000E-02  1.8000E-03  6.5000E-03\n");
        out.push('\n');
        out.push_str("                          ----- POWER BUDGET -----\n");
        out.push_str("                          INPUT POWER   =  6.5000E-03 WATTS\n");
        out.push_str("                          RADIATED POWER=  6.0000E-03 WATTS\n");
        out.push('\n');
        out.push_str("  CURRENTS AND LOCATION\n");
        out.push_str("  SEG  TAG    COORDINATES OF SEG CENTER     SEG         ------------- CURRENT (AMPS) -------------\n");
        out.push_str("  NO.  NO.     X        Y        Z       LENGTH     REAL      IMAGINARY    MAGN        PHASE\n");
        out.push('\n');
        out.push_str("    1    1  -4.7619E+00  0.0000E+00  1.0000E+01  4.7619E-01  1.3000E-02 -2.0000E-03  1.3153E-02   -8.746E+00\n");
        out.push_str("    2    1  -4.2857E+00  0.0000E+00  1.0000E+01  4.7619E-01  2.1000E-02 -3.0000E-03  2.1213E-02   -8.130E+00\n");
        out.push('\n');
        out.push_str("                          ----- RADIATION PATTERNS -----\n");
        out.push_str("   THETA    PHI        VERT     HOR      TOTAL      AXIAL     TILT   SENSE\n");
        out.push_str("  DEGREES  DEGREES      DB       DB        DB       RATIO     DEG.\n");
        out.push('\n');
        // theta cut at phi=0: peak at theta=0, -3dB shoulders inside theta=+-10
        for (theta, gain) in [
            (-10.0, -4.0),
            (-5.0, 0.5),
            (0.0, 2.1),
            (5.0, 0.5),
            (10.0, -4.0),
        ] {
            out.push_str(&format!(
                "   {theta:7.2}     0.00   -999.99  -999.99  {gain:7.2}   0.00000    0.00 LINEAR\n"
            ));
        }
        // phi cut at theta=0, including the back lobe at phi=180
        for (phi, gain) in [(90.0, -1.5), (175.0, -9.0), (180.0, -8.0), (270.0, -1.5)] {
            out.push_str(&format!(
                "      0.00  {phi:7.2}  -999.99  -999.99  {gain:7.2}   0.00000    0.00 LINEAR\n"
            ));
        }
        out.push('\n');
        out
    }

    fn grid_config() -> PatternConfig {
        PatternConfig {
            theta_start: -90.0,
            theta_stop: 90.0,
            theta_step: 5.0,
            phi_start: 0.0,
            phi_stop: 355.0,
            phi_step: 5.0,
        }
    }

    #[test]
    fn parses_one_block_with_derived_metrics() {
        let results = parse_nec_output(&synthetic_output(), &grid_config(), true);
        assert_eq!(results.len(), 1);
        let fr = &results[0];

        assert_eq!(fr.frequency_mhz, 14.1);
        assert_eq!(fr.impedance.real, 72.0);
        assert_eq!(fr.impedance.imag, 11.0);
        assert_eq!(fr.swr_50, compute_swr(72.0, 11.0, 50.0));
        assert_eq!(fr.gain_max_dbi, 2.1);
        assert_eq!(fr.gain_max_theta, 0.0);
        assert_eq!(fr.gain_max_phi, 0.0);
        // back lobe at phi=180 has gain -8.0
        assert_eq!(fr.front_to_back_db, Some(10.1));
        assert_eq!(fr.efficiency_percent, Some(round_to(100.0 * 6.0 / 6.5, 2)));

        let currents = fr.currents.as_ref().unwrap();
        assert_eq!(currents.len(), 2);
        assert_eq!(currents[0].tag, 1);
        assert_eq!(currents[0].segment, 1);
        assert!((currents[1].current_magnitude - 2.1213e-2).abs() < 1e-9);
    }

    #[test]
    fn grid_shape_and_sentinel_fill() {
        let results = parse_nec_output(&synthetic_output(), &grid_config(), false);
        let pattern = results[0].pattern.as_ref().unwrap();
        assert_eq!(pattern.gain_dbi.len(), 37);
        for row in &pattern.gain_dbi {
            assert_eq!(row.len(), 72);
        }
        // (theta=0, phi=0) is populated, far corners are not
        assert_eq!(pattern.gain_dbi[18][0], 2.1);
        assert_eq!(pattern.gain_dbi[0][40], UNPOPULATED_GAIN);
    }

    #[test]
    fn currents_ignored_unless_requested() {
        let results = parse_nec_output(&synthetic_output(), &grid_config(), false);
        assert!(results[0].currents.is_none());
    }

    #[test]
    fn e_plane_beamwidth_interpolates_crossings() {
        let results = parse_nec_output(&synthetic_output(), &grid_config(), false);
        let bw = results[0].beamwidth_e_deg.unwrap();
        // threshold = -0.9; crossing between (5, 0.5) and (10, -4.0) at
        // 5 + 1.4/4.5*5 ~= 6.556, symmetric on the left
        assert!((bw - 13.11).abs() < 0.02, "beamwidth was {bw}");
    }

    #[test]
    fn h_plane_beamwidth_missing_when_no_crossing() {
        // the phi cut never recovers above threshold on both sides of the
        // peak sample at phi=90... in fact the peak of the phi cut is at
        // phi=0 (gain 2.1) and the right side drops below threshold while
        // the left side has no sample below it
        let results = parse_nec_output(&synthetic_output(), &grid_config(), false);
        assert!(results[0].beamwidth_h_deg.is_none());
    }

    #[test]
    fn multiple_blocks_flush_in_order() {
        let one = synthetic_output();
        let two = one.replace("1.4100E+01", "1.4200E+01");
        let combined = format!("{one}{two}");
        let results = parse_nec_output(&combined, &grid_config(), false);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].frequency_mhz, 14.1);
        assert_eq!(results[1].frequency_mhz, 14.2);
    }

    #[test]
    fn block_without_impedance_is_dropped() {
        let text = "FREQUENCY : 1.4000E+01 MHZ\nno data follows\n";
        assert!(parse_nec_output(text, &grid_config(), false).is_empty());
    }

    #[test]
    fn empty_output_yields_no_results() {
        assert!(parse_nec_output("", &grid_config(), false).is_empty());
    }
}
