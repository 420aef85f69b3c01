//! Content-addressed simulation result cache.
//!
//! Results are keyed by a SHA-256 hash of the canonical request JSON and
//! stored zlib-compressed with a one-hour TTL. The cache is best-effort:
//! every store error is logged and treated as a miss.

use std::io::{Read, Write};

use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::kvs::Kvs;
use crate::request::SimulationRequest;
use crate::results::SimulationResult;

pub const CACHE_TTL_SECONDS: u64 = 3600;

/// Canonical JSON of a request: sorted keys, no whitespace.
///
/// Round-tripping through `serde_json::Value` sorts object keys (the map is
/// a BTreeMap), so field order in the incoming document cannot change the
/// fingerprint.
pub fn canonical_json(request: &SimulationRequest) -> String {
    let value = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);
    value.to_string()
}

/// Deterministic cache key: `"sim:" + hex(sha256(canonical_json))`.
pub fn cache_key(request: &SimulationRequest) -> String {
    let digest = Sha256::digest(canonical_json(request).as_bytes());
    format!("sim:{}", hex::encode(digest))
}

fn encode_result(result: &SimulationResult) -> anyhow::Result<String> {
    let serialized = serde_json::to_vec(result)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(&serialized)?;
    let compressed = encoder.finish()?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

fn decode_result(encoded: &str) -> anyhow::Result<SimulationResult> {
    let compressed = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(serde_json::from_slice(&decompressed)?)
}

/// Retrieve a cached result. None on miss or any error.
pub async fn get_cached_result(kvs: &Kvs, key: &str) -> Option<SimulationResult> {
    let data = match kvs.get(key).await {
        Ok(Some(data)) => data,
        Ok(None) => return None,
        Err(e) => {
            warn!("cache read error for {key}: {e}");
            return None;
        }
    };
    match decode_result(&data) {
        Ok(result) => {
            debug!("cache HIT: {key}");
            Some(result)
        }
        Err(e) => {
            warn!("cache decode error for {key}: {e}");
            None
        }
    }
}

/// Store a result with the cache TTL. Errors are logged and swallowed.
pub async fn set_cached_result(kvs: &Kvs, key: &str, result: &SimulationResult) {
    let encoded = match encode_result(result) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("cache encode error for {key}: {e}");
            return;
        }
    };
    match kvs.set_ex(key, &encoded, CACHE_TTL_SECONDS).await {
        Ok(()) => debug!("cache SET: {key} ({} bytes)", encoded.len()),
        Err(e) => warn!("cache write error for {key}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{FrequencyResult, Impedance};

    fn request_json(extra_field_order: bool) -> String {
        // identical content, different key order
        let wire = if extra_field_order {
            r#"{"segments":21,"tag":1,"x1":-5.0,"y1":0.0,"z1":10.0,"x2":5.0,"y2":0.0,"z2":10.0,"radius":0.001}"#
        } else {
            r#"{"tag":1,"segments":21,"x1":-5.0,"y1":0.0,"z1":10.0,"x2":5.0,"y2":0.0,"z2":10.0,"radius":0.001}"#
        };
        format!(
            r#"{{"wires":[{wire}],"excitations":[{{"wire_tag":1,"segment":11}}],"frequency":{{"start_mhz":14.0,"stop_mhz":14.2,"steps":3}}}}"#
        )
    }

    #[test]
    fn key_is_stable_under_field_reordering() {
        let a: SimulationRequest = serde_json::from_str(&request_json(false)).unwrap();
        let b: SimulationRequest = serde_json::from_str(&request_json(true)).unwrap();
        assert_eq!(cache_key(&a), cache_key(&b));
        assert!(cache_key(&a).starts_with("sim:"));
        assert_eq!(cache_key(&a).len(), "sim:".len() + 64);
    }

    #[test]
    fn key_changes_with_content() {
        let a: SimulationRequest = serde_json::from_str(&request_json(false)).unwrap();
        let mut b = a.clone();
        b.frequency.stop_mhz = 14.4;
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn canonical_json_has_sorted_keys_and_no_whitespace() {
        let req: SimulationRequest = serde_json::from_str(&request_json(true)).unwrap();
        let canonical = canonical_json(&req);
        // compact separators, no padding
        assert!(!canonical.contains(": "));
        assert!(!canonical.contains(", "));
        let comment_idx = canonical.find("\"comment\"").unwrap();
        let wires_idx = canonical.find("\"wires\"").unwrap();
        assert!(comment_idx < wires_idx);
    }

    #[test]
    fn encode_decode_preserves_result() {
        let result = SimulationResult {
            simulation_id: "abc123".into(),
            engine: "nec2c".into(),
            computed_in_ms: 41.5,
            total_segments: 21,
            cached: false,
            frequency_data: vec![FrequencyResult {
                frequency_mhz: 14.1,
                impedance: Impedance {
                    real: 72.0,
                    imag: 11.0,
                },
                swr_50: 1.53,
                gain_max_dbi: 2.1,
                gain_max_theta: 0.0,
                gain_max_phi: 0.0,
                front_to_back_db: None,
                beamwidth_e_deg: None,
                beamwidth_h_deg: None,
                efficiency_percent: Some(92.3),
                pattern: None,
                currents: None,
            }],
            warnings: vec![],
        };
        let decoded = decode_result(&encode_result(&result).unwrap()).unwrap();
        assert_eq!(decoded, result);
    }
}
