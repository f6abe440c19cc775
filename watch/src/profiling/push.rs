//! Profiling sink: where converted artifacts go.
//!
//! [`PyroscopePusher`] uploads to a Pyroscope-compatible `/ingest` endpoint.
//! The scheduler only sees the [`ProfileSink`] trait, so tests can record
//! pushes instead.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use url::Url;

use super::convert::ConversionArtifact;
use super::encode::{encode, SAMPLE_TYPES};
use crate::domain::{ConfigError, PushError, TransportError};

const PUSH_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait ProfileSink: Send + Sync {
    /// Upload one artifact under `name`.
    async fn push(&self, name: &str, artifact: &ConversionArtifact) -> Result<(), PushError>;
}

#[derive(Serialize)]
struct SampleTypeConfig {
    units: &'static str,
    aggregation: &'static str,
    #[serde(rename = "display-name")]
    display_name: &'static str,
    sampled: bool,
    cumulative: bool,
}

/// Client for the Pyroscope ingest API.
pub struct PyroscopePusher {
    ingest: Url,
    http: reqwest::Client,
}

impl PyroscopePusher {
    /// # Errors
    /// Returns `ConfigError` when `address` is not a valid base url or the
    /// HTTP client cannot be built.
    pub fn new(address: &str) -> Result<Self, ConfigError> {
        let base = Url::parse(address).map_err(|source| ConfigError::InvalidUrl {
            server: "pyroscope".to_string(),
            source,
        })?;
        let ingest = base.join("ingest").map_err(|source| ConfigError::InvalidUrl {
            server: "pyroscope".to_string(),
            source,
        })?;
        let http =
            reqwest::Client::builder().timeout(PUSH_TIMEOUT).build().map_err(ConfigError::Pusher)?;
        Ok(Self { ingest, http })
    }

    pub fn ingest_url(&self) -> &Url {
        &self.ingest
    }
}

/// `{"cpu": {...}, "samples": {...}}` describing each sample value.
fn sample_type_config() -> String {
    let config: std::collections::BTreeMap<&str, SampleTypeConfig> = SAMPLE_TYPES
        .iter()
        .map(|&(kind, units)| {
            let display_name = if kind == "samples" { "Count" } else { kind };
            (
                kind,
                SampleTypeConfig {
                    units,
                    aggregation: "sum",
                    display_name,
                    sampled: false,
                    cumulative: false,
                },
            )
        })
        .collect();
    serde_json::to_string(&config).unwrap_or_default()
}

/// `(from, until)` in unix seconds covering the artifact.
fn time_range(artifact: &ConversionArtifact) -> (i64, i64) {
    let from = artifact.start_time_nanos / 1_000_000_000;
    let until = (artifact.start_time_nanos + artifact.duration_nanos) / 1_000_000_000;
    // Ingest rejects an empty range
    (from, until.max(from + 1))
}

#[async_trait]
impl ProfileSink for PyroscopePusher {
    async fn push(&self, name: &str, artifact: &ConversionArtifact) -> Result<(), PushError> {
        let profile = encode(artifact).map_err(PushError::Encode)?;
        let (from, until) = time_range(artifact);

        let mut url = self.ingest.clone();
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("from", &from.to_string())
            .append_pair("until", &until.to_string())
            .append_pair("format", "pprof")
            .append_pair("units", "cpu")
            .append_pair("aggregationType", "sum")
            .append_pair("spyName", "");

        let size = profile.len();
        let form = Form::new()
            .part("profile", Part::bytes(profile).file_name("profile.pprof"))
            .part(
                "sample_type_config",
                Part::text(sample_type_config()).file_name("sample_type_config.json"),
            );

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { status, url: self.ingest.to_string() }.into());
        }

        debug!("Pushed profile {name} ({size} bytes, {} samples)", artifact.samples().len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::convert::Converter;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_ingest_url() {
        let pusher = PyroscopePusher::new("http://localhost:4040/").unwrap();
        assert_eq!(pusher.ingest_url().as_str(), "http://localhost:4040/ingest");
        assert!(PyroscopePusher::new("not a url").is_err());
    }

    #[test]
    fn test_time_range_is_never_empty() {
        let artifact = Converter::new(UNIX_EPOCH + Duration::from_secs(50)).convert(&[]);
        assert_eq!(time_range(&artifact), (50, 51));
    }

    #[test]
    fn test_sample_type_config() {
        let config: serde_json::Value = serde_json::from_str(&sample_type_config()).unwrap();
        assert_eq!(config["cpu"]["units"], "nanoseconds");
        assert_eq!(config["samples"]["display-name"], "Count");
        assert_eq!(config["samples"]["sampled"], false);
    }
}
