//! Narrow async client for the Redis-compatible REST endpoint.
//!
//! Speaks the Upstash-style protocol: one command per request with the
//! arguments as path segments, plus `/pipeline` for atomic batches. Every
//! operation carries the short connect/read timeouts of the admission layer;
//! callers treat failures as "store unavailable" and degrade.

use anyhow::bail;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::settings::Settings;

#[derive(Deserialize)]
struct KvsResp<T> {
    result: T,
}

/// One entry of a `/pipeline` response.
#[derive(Deserialize)]
struct PipelineEntry {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct Kvs {
    url: String,
    token: String,
    http: reqwest::Client,
}

impl Kvs {
    /// Build the client from settings; None when no store is configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let url = settings.redis_url.clone()?;
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(2))
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .ok()?;
        Some(Self {
            url,
            token: settings.redis_token.clone(),
            http,
        })
    }

    fn auth(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
    }

    async fn exec<T: DeserializeOwned>(
        &self,
        rb: reqwest::RequestBuilder,
        what: &str,
    ) -> anyhow::Result<T> {
        let res = self.auth(rb).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            bail!("kvs {what} {status} {text}");
        }
        let parsed: KvsResp<T> = serde_json::from_str(&text)?;
        Ok(parsed.result)
    }

    pub async fn ping(&self) -> bool {
        matches!(
            self.exec::<String>(self.http.get(format!("{}/ping", self.url)), "PING")
                .await,
            Ok(pong) if pong.eq_ignore_ascii_case("pong")
        )
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let result: Option<serde_json::Value> = self
            .exec(self.http.get(format!("{}/get/{key}", self.url)), "GET")
            .await?;
        Ok(match result {
            None => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    pub async fn set_ex(&self, key: &str, val: &str, seconds: u64) -> anyhow::Result<()> {
        let body = serde_json::to_string(&[val])?;
        let status: String = self
            .exec(
                self.http
                    .post(format!("{}/setex/{key}/{seconds}", self.url))
                    .body(body),
                "SETEX",
            )
            .await?;
        if status != "OK" {
            bail!("kvs SETEX non-OK: {status}");
        }
        Ok(())
    }

    pub async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        self.exec(self.http.post(format!("{}/incr/{key}", self.url)), "INCR")
            .await
    }

    pub async fn decr(&self, key: &str) -> anyhow::Result<i64> {
        self.exec(self.http.post(format!("{}/decr/{key}", self.url)), "DECR")
            .await
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> anyhow::Result<i64> {
        self.exec(
            self.http
                .post(format!("{}/expire/{key}/{seconds}", self.url)),
            "EXPIRE",
        )
        .await
    }

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> anyhow::Result<i64> {
        self.exec(
            self.http
                .post(format!("{}/zadd/{key}/{score}/{member}", self.url)),
            "ZADD",
        )
        .await
    }

    /// `ZRANGE key start stop WITHSCORES` as (member, score) pairs.
    pub async fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        let raw: Vec<serde_json::Value> = self
            .exec(
                self.http.get(format!(
                    "{}/zrange/{key}/{start}/{stop}/WITHSCORES",
                    self.url
                )),
                "ZRANGE",
            )
            .await?;
        let mut pairs = Vec::with_capacity(raw.len() / 2);
        for chunk in raw.chunks_exact(2) {
            let member = match &chunk[0] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let score = match &chunk[1] {
                serde_json::Value::String(s) => s.parse::<f64>()?,
                serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
                other => bail!("kvs ZRANGE unexpected score {other}"),
            };
            pairs.push((member, score));
        }
        Ok(pairs)
    }

    /// Run commands atomically; each inner vector is one command with its
    /// arguments. Any per-command error fails the whole batch.
    pub async fn pipeline(
        &self,
        commands: &[Vec<String>],
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        let body = serde_json::to_string(commands)?;
        let res = self
            .auth(self.http.post(format!("{}/pipeline", self.url)).body(body))
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            bail!("kvs PIPELINE {status} {text}");
        }
        let entries: Vec<PipelineEntry> = serde_json::from_str(&text)?;
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(err) = entry.error {
                bail!("kvs PIPELINE command failed: {err}");
            }
            results.push(entry.result.unwrap_or(serde_json::Value::Null));
        }
        Ok(results)
    }
}
