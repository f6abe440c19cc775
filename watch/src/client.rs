//! Game server HTTP API client.
//!
//! Endpoint reference: <https://github.com/screepers/node-screeps-api/blob/master/docs/Endpoints.md>

use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::auth::AuthMethod;
use crate::domain::{ParseError, ResourceClass, ScrapeError, SegmentId, TransportError};
use crate::market::{parse_market_response, StatsResponse};
use crate::ratelimit::RateLimiter;
use crate::segment;

const MEMORY_SEGMENT_PATH: &str = "/api/user/memory-segment";
const MARKET_STATS_PATH: &str = "/api/game/market/stats";
const AUTH_ME_PATH: &str = "/api/auth/me";

/// A fetched and decoded memory segment.
#[derive(Debug, Clone)]
pub struct SegmentFetch {
    pub decoded: Vec<u8>,
    /// Size of the response body before decoding
    pub raw_size: usize,
}

#[derive(Deserialize)]
struct Me {
    #[serde(rename = "_id")]
    id: String,
}

/// Authenticated client for one server.
#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    http: Client,
    auth: Arc<dyn AuthMethod>,
    limiter: Arc<RateLimiter>,
}

impl ApiClient {
    pub fn new(
        base: Url,
        http: Client,
        auth: Arc<dyn AuthMethod>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { base, http, auth, limiter }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn auth(&self) -> &Arc<dyn AuthMethod> {
        &self.auth
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch and decode one memory segment.
    ///
    /// # Errors
    /// `RateLimited` on a 429 (recorded in the shared limiter), `Transport`
    /// for other failures, `Decode` for a malformed envelope.
    pub async fn memory_segment(
        &self,
        segment: SegmentId,
        shard: &str,
    ) -> Result<SegmentFetch, ScrapeError> {
        let query = [("segment", segment.to_string()), ("shard", shard.to_string())];
        let body = self.get(ResourceClass::MemorySegment, MEMORY_SEGMENT_PATH, &query).await?;
        let decoded = segment::decode(&body)?;
        Ok(SegmentFetch { decoded, raw_size: body.len() })
    }

    /// Market history for one resource.
    ///
    /// # Errors
    /// As [`ApiClient::memory_segment`], plus `Parse` when `ok != 1`.
    pub async fn market_stats(
        &self,
        resource_type: &str,
        shard: Option<&str>,
    ) -> Result<StatsResponse, ScrapeError> {
        let mut query = vec![("resourceType", resource_type.to_string())];
        if let Some(shard) = shard.filter(|shard| !shard.is_empty()) {
            query.push(("shard", shard.to_string()));
        }
        let body = self.get(ResourceClass::Market, MARKET_STATS_PATH, &query).await?;
        Ok(parse_market_response(&body)?)
    }

    /// ID of the authenticated user, needed for websocket channels.
    ///
    /// # Errors
    /// `Transport` or `Parse` failures. Not rate limit tracked.
    pub async fn my_user_id(&self) -> Result<String, ScrapeError> {
        let url = self.base.join(AUTH_ME_PATH).map_err(TransportError::from)?;
        let request = self.http.get(url.clone()).build().map_err(TransportError::from)?;
        let response = self.auth.authenticated_request(&self.http, request).await?;
        if !response.status().is_success() {
            return Err(TransportError::Status { status: response.status(), url: url.to_string() }
                .into());
        }
        let body = response.bytes().await.map_err(TransportError::from)?;
        let me: Me = serde_json::from_slice(&body).map_err(ParseError::from)?;
        Ok(me.id)
    }

    async fn get(
        &self,
        class: ResourceClass,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, ScrapeError> {
        let url = self.base.join(path).map_err(TransportError::from)?;
        let request = self
            .http
            .get(url.clone())
            .query(query)
            .header(CONTENT_TYPE, "application/json")
            .build()
            .map_err(TransportError::from)?;

        debug!("GET {}", request.url());
        let response = self.auth.authenticated_request(&self.http, request).await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let until = self.limiter.record_limited(class, response.headers(), SystemTime::now());
            error!("Rate limit hit on {path}, class={class}");
            return Err(ScrapeError::RateLimited { class, until });
        }
        if !status.is_success() {
            return Err(TransportError::Status { status, url: url.to_string() }.into());
        }

        let body = response.bytes().await.map_err(TransportError::from)?;
        Ok(body.to_vec())
    }
}
