//! Rio municipal (SPPO) vehicle-position client.
//!
//! Line queries go through an edge proxy that takes a comma-joined
//! `linha` list and usually filters server-side. The raw upstream feed is
//! unfiltered, so results are always filtered again here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::RioConfig;
use common::error::body_excerpt;
use common::numeric::{decimal_from_value, text_from_value};
use common::{now_millis, Error, ProviderKind, VehicleClass, VehiclePosition};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RioClient {
    client: reqwest::Client,
    base_url: String,
    snapshot_url: String,
    snapshot_timeout: Duration,
}

// ── Wire types ────────────────────────────────────────────────────────

/// One element of the upstream array. Every field may be a string or a number.
#[derive(Debug, Deserialize)]
pub struct RioVehicle {
    #[serde(default)]
    pub ordem: Option<Value>,
    #[serde(default)]
    pub linha: Option<Value>,
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub velocidade: Option<Value>,
    #[serde(default)]
    pub datahora: Option<Value>,
}

/// A parsed upstream record, before it is attached to a receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RioRecord {
    pub id: String,
    pub line: String,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
}

/// Edge proxy cache headers, when the response came through the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeCacheInfo {
    pub cache_hit: Option<bool>,
    pub total: Option<usize>,
    pub filtered: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RioBatch {
    pub records: Vec<RioRecord>,
    pub edge: EdgeCacheInfo,
}

impl RioRecord {
    /// Returns `None` when either coordinate is missing or unparseable.
    pub fn from_wire(raw: &RioVehicle) -> Option<Self> {
        let lat = raw.latitude.as_ref().and_then(decimal_from_value)?;
        let lng = raw.longitude.as_ref().and_then(decimal_from_value)?;

        Some(Self {
            id: raw
                .ordem
                .as_ref()
                .and_then(text_from_value)
                .unwrap_or_else(|| "Unknown".to_string()),
            line: raw
                .linha
                .as_ref()
                .and_then(text_from_value)
                .map(|l| normalize_line(&l).to_string())
                .unwrap_or_default(),
            lat,
            lng,
            speed_kmh: raw
                .velocidade
                .as_ref()
                .and_then(decimal_from_value)
                .unwrap_or(0.0),
        })
    }

    pub fn to_position(&self, observed_at: DateTime<Utc>) -> VehiclePosition {
        VehiclePosition {
            id: self.id.clone(),
            line_id: self.line.clone(),
            lat: self.lat,
            lng: self.lng,
            speed_kmh: self.speed_kmh,
            vehicle_class: VehicleClass::Municipal,
            direction: None,
            observed_at,
        }
    }
}

// ── Line matching ─────────────────────────────────────────────────────

/// Trim whitespace and a trailing `.0` left by float-typed exports.
pub fn normalize_line(line: &str) -> &str {
    let trimmed = line.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).trim()
}

/// `343` matches `343`, `343.0` and `343A`, but not `3430` or `1343`.
pub fn line_matches(vehicle_line: &str, target: &str) -> bool {
    let vehicle_line = normalize_line(vehicle_line);
    let target = normalize_line(target);
    if target.is_empty() {
        return false;
    }
    if vehicle_line == target {
        return true;
    }
    match vehicle_line.strip_prefix(target) {
        Some(suffix) => {
            let mut chars = suffix.chars();
            matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
        }
        None => false,
    }
}

/// Keep records whose line matches any of `lines`, preserving order.
pub fn filter_records<I, S>(records: &[RioRecord], lines: I) -> Vec<RioRecord>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let targets: Vec<S> = lines.into_iter().collect();
    records
        .iter()
        .filter(|r| targets.iter().any(|t| line_matches(&r.line, t.as_ref())))
        .cloned()
        .collect()
}

// ── Implementation ────────────────────────────────────────────────────

impl RioClient {
    pub fn new(config: &RioConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("linewatch/0.1")
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build Rio HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            snapshot_url: config.snapshot_url.clone(),
            snapshot_timeout: Duration::from_secs(config.snapshot_timeout_secs),
        }
    }

    /// One combined request for all `lines`, filtered to those lines.
    pub async fn fetch_lines(&self, lines: &[String]) -> Result<RioBatch, Error> {
        if lines.is_empty() {
            return Ok(RioBatch::default());
        }

        let url = format!("{}/", self.base_url);
        let joined = lines.join(",");
        let cache_bust = Utc::now().timestamp_millis().to_string();

        debug!(lines = %joined, "Fetching Rio positions");

        let request = self
            .client
            .get(&url)
            .query(&[("linha", joined.as_str()), ("_t", cache_bust.as_str())]);
        let mut batch = self.execute(request, &joined).await?;

        let received = batch.records.len();
        batch.records = filter_records(&batch.records, lines);

        debug!(
            lines = %joined,
            received,
            kept = batch.records.len(),
            edge_hit = ?batch.edge.cache_hit,
            edge_total = ?batch.edge.total,
            edge_filtered = ?batch.edge.filtered,
            "Rio positions parsed"
        );

        Ok(batch)
    }

    /// The unfiltered all-lines feed.
    pub async fn fetch_all(&self) -> Result<RioBatch, Error> {
        let cache_bust = Utc::now().timestamp_millis().to_string();
        let request = self
            .client
            .get(&self.snapshot_url)
            .query(&[("_t", cache_bust.as_str())])
            .timeout(self.snapshot_timeout);

        let batch = self.execute(request, "all").await?;
        info!(records = batch.records.len(), "Rio global feed downloaded");
        Ok(batch)
    }

    async fn execute(&self, request: reqwest::RequestBuilder, label: &str) -> Result<RioBatch, Error> {
        let resp = request.send().await.map_err(|e| Error::Transient {
            provider: ProviderKind::Rio,
            status: None,
            message: format!("HTTP error for {}: {}", label, e),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transient {
                provider: ProviderKind::Rio,
                status: Some(status.as_u16()),
                message: format!("lines {}: {}", label, body_excerpt(&body)),
            });
        }

        let edge = parse_edge_headers(resp.headers());
        let body = resp.text().await.map_err(|e| Error::Transient {
            provider: ProviderKind::Rio,
            status: None,
            message: format!("failed reading body for {}: {}", label, e),
        })?;

        Ok(RioBatch {
            records: parse_records(&body)?,
            edge,
        })
    }
}

/// Decode a response body, dropping records without usable coordinates.
pub fn parse_records(body: &str) -> Result<Vec<RioRecord>, Error> {
    let value: Value = serde_json::from_str(body).map_err(|e| Error::MalformedResponse {
        provider: ProviderKind::Rio,
        message: format!("invalid JSON: {}", e),
    })?;

    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => {
            return Err(Error::MalformedResponse {
                provider: ProviderKind::Rio,
                message: "expected an array of vehicles".into(),
            })
        }
    };

    let total = items.len();
    let records: Vec<RioRecord> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RioVehicle>(item).ok())
        .filter_map(|raw| RioRecord::from_wire(&raw))
        .collect();

    if records.len() < total {
        debug!(dropped = total - records.len(), "Dropped Rio records without coordinates");
    }

    Ok(records)
}

pub fn parse_edge_headers(headers: &HeaderMap) -> EdgeCacheInfo {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    EdgeCacheInfo {
        cache_hit: text("x-cache").map(|v| v.eq_ignore_ascii_case("HIT")),
        total: text("x-total").and_then(|v| v.trim().parse().ok()),
        filtered: text("x-filtered").and_then(|v| v.trim().parse().ok()),
    }
}

/// Convert records to positions sharing one receipt time.
pub fn to_positions(records: &[RioRecord]) -> Vec<VehiclePosition> {
    let observed_at = now_millis();
    records.iter().map(|r| r.to_position(observed_at)).collect()
}
