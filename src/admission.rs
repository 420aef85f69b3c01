//! Request admission: sliding-window rate limiting and a per-address
//! concurrency counter, both backed by the key-value store.
//!
//! Availability is preferred to enforcement: when the store is missing or
//! any step errors, the request is allowed and the error logged.

use chrono::Utc;
use tracing::warn;

use crate::kvs::Kvs;
use crate::settings::Settings;

/// Admission knobs, snapshotted from [`Settings`].
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub enabled: bool,
    pub per_hour: u64,
    pub window_seconds: u64,
    pub max_concurrent: u64,
}

impl AdmissionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.rate_limit_enabled,
            per_hour: settings.rate_limit_per_hour,
            window_seconds: settings.rate_limit_window_seconds,
            max_concurrent: settings.max_concurrent_per_ip,
        }
    }
}

/// A request was turned away by the admission layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRejection {
    RateLimit { limit: u64, retry_after: u64 },
    ConcurrentLimit { limit: u64, retry_after: u64 },
}

impl AdmissionRejection {
    pub fn retry_after(&self) -> u64 {
        match self {
            AdmissionRejection::RateLimit { retry_after, .. } => *retry_after,
            AdmissionRejection::ConcurrentLimit { retry_after, .. } => *retry_after,
        }
    }
}

/// Admission layer shared by the simulate and optimize paths.
#[derive(Clone)]
pub struct Admission {
    kvs: Option<Kvs>,
    config: AdmissionConfig,
}

fn rate_key(addr: &str) -> String {
    format!("rate:{addr}")
}

fn concurrent_key(addr: &str) -> String {
    format!("concurrent:{addr}")
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

impl Admission {
    pub fn new(kvs: Option<Kvs>, config: AdmissionConfig) -> Self {
        Self { kvs, config }
    }

    /// Check both limits for `addr` and, when admitted, record the request
    /// and take a concurrency slot. The caller must pair every successful
    /// check with a [`release`](Self::release).
    pub async fn check(&self, addr: &str) -> Result<(), AdmissionRejection> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(kvs) = &self.kvs else {
            return Ok(());
        };
        match self.check_inner(kvs, addr).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("admission error: {e} — allowing request");
                Ok(())
            }
        }
    }

    async fn check_inner(
        &self,
        kvs: &Kvs,
        addr: &str,
    ) -> anyhow::Result<Result<(), AdmissionRejection>> {
        let rate_key = rate_key(addr);
        let concurrent_key = concurrent_key(addr);
        let now = now_epoch();
        let window = self.config.window_seconds;
        let window_start = now - window as f64;

        let results = kvs
            .pipeline(&[
                vec![
                    "ZREMRANGEBYSCORE".into(),
                    rate_key.clone(),
                    "0".into(),
                    format!("{window_start}"),
                ],
                vec!["ZCARD".into(), rate_key.clone()],
                vec!["GET".into(), concurrent_key.clone()],
            ])
            .await?;

        let request_count = results
            .get(1)
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u64;
        let concurrent_count = match results.get(2) {
            Some(serde_json::Value::String(s)) => s.parse::<i64>().unwrap_or(0).max(0) as u64,
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0).max(0) as u64,
            _ => 0,
        };

        if request_count >= self.config.per_hour {
            let oldest = kvs.zrange_withscores(&rate_key, 0, 0).await?;
            let retry_after = oldest
                .first()
                .map(|(_, score)| (score + window as f64 - now).ceil().max(1.0) as u64)
                .unwrap_or(window);
            warn!("rate limit exceeded for {addr}: {request_count} requests in window");
            return Ok(Err(AdmissionRejection::RateLimit {
                limit: self.config.per_hour,
                retry_after,
            }));
        }

        if concurrent_count >= self.config.max_concurrent {
            warn!("concurrent limit exceeded for {addr}: {concurrent_count} active");
            return Ok(Err(AdmissionRejection::ConcurrentLimit {
                limit: self.config.max_concurrent,
                retry_after: 5,
            }));
        }

        kvs.zadd(&rate_key, now, &format!("{now}")).await?;
        kvs.expire(&rate_key, window + 60).await?;
        kvs.incr(&concurrent_key).await?;
        kvs.expire(&concurrent_key, 120).await?;
        Ok(Ok(()))
    }

    /// Give back the concurrency slot taken by a successful check. Never
    /// lets the counter go negative.
    pub async fn release(&self, addr: &str) {
        if !self.config.enabled {
            return;
        }
        let Some(kvs) = &self.kvs else {
            return;
        };
        let key = concurrent_key(addr);
        match kvs.decr(&key).await {
            Ok(v) if v < 0 => {
                if let Err(e) = kvs.set_ex(&key, "0", 120).await {
                    warn!("failed to floor concurrent counter: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("failed to release concurrent counter: {e}"),
        }
    }
}

/// Client address used for limiting: first `X-Forwarded-For` hop when
/// present, else the peer address.
pub fn client_addr(forwarded_for: Option<&str>, peer: Option<&str>) -> String {
    if let Some(chain) = forwarded_for {
        if let Some(first) = chain.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        assert_eq!(
            client_addr(Some("203.0.113.9, 10.0.0.1"), Some("127.0.0.1")),
            "203.0.113.9"
        );
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        assert_eq!(client_addr(None, Some("127.0.0.1")), "127.0.0.1");
        assert_eq!(client_addr(Some("  "), None), "unknown");
        assert_eq!(client_addr(None, None), "unknown");
    }

    #[test]
    fn disabled_admission_always_allows() {
        let admission = Admission::new(
            None,
            AdmissionConfig {
                enabled: false,
                per_hour: 0,
                window_seconds: 3600,
                max_concurrent: 0,
            },
        );
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            assert!(admission.check("198.51.100.1").await.is_ok());
            admission.release("198.51.100.1").await;
        });
    }
}
