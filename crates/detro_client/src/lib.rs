//! DETRO intermunicipal vehicle-position client.
//!
//! The upstream answers one line and one direction per request, so a full
//! line fetch is two calls (`sentido=1` for IDA, `sentido=2` for VOLTA).

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::DetroConfig;
use common::error::body_excerpt;
use common::numeric::{optional_decimal, text_from_value};
use common::{now_millis, DetroParams, Direction, Error, ProviderKind, VehicleClass, VehiclePosition};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

const COORDINATES_PATH: &str = "ObterUltimasCoordenadasVeiculos.php";

#[derive(Debug, Clone)]
pub struct DetroClient {
    client: reqwest::Client,
    base_url: String,
}

// ── DETRO response types ──────────────────────────────────────────────

/// One element of the coordinates array.
#[derive(Debug, Deserialize)]
pub struct DetroVehicle {
    #[serde(rename = "idVeiculo", default)]
    pub vehicle_id: Option<Value>, // string on most operators, number on some
    #[serde(default)]
    pub gps: Option<DetroGps>,
}

#[derive(Debug, Deserialize)]
pub struct DetroGps {
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub velocidade: Option<Value>,
    #[serde(rename = "dataHora", default)]
    pub data_hora: Option<Value>,
}

// ── Implementation ────────────────────────────────────────────────────

impl DetroClient {
    pub fn new(config: &DetroConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("linewatch/0.1")
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build DETRO HTTP client");

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the latest positions for one line in one direction.
    ///
    /// Records without parseable coordinates are dropped. A `null` body is an
    /// empty feed.
    pub async fn fetch_direction(
        &self,
        line_id: &str,
        params: &DetroParams,
        direction: Direction,
    ) -> Result<Vec<VehiclePosition>, Error> {
        let url = format!("{}/{}", self.base_url, COORDINATES_PATH);
        let cache_bust = Utc::now().timestamp_millis().to_string();
        let sentido = direction.sentido().to_string();

        debug!(line = line_id, direction = direction.label(), "Fetching DETRO coordinates");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("guidIdentificacao", params.guid.as_str()),
                ("idEmpresa", params.company_id.as_str()),
                ("linha", params.internal_line.as_str()),
                ("sentido", sentido.as_str()),
                ("_t", cache_bust.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transient {
                provider: ProviderKind::Detro,
                status: None,
                message: format!("HTTP error for line {}: {}", line_id, e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transient {
                provider: ProviderKind::Detro,
                status: Some(status.as_u16()),
                message: format!(
                    "line {} {}: {}",
                    line_id,
                    direction.label(),
                    body_excerpt(&body)
                ),
            });
        }

        let body = resp.text().await.map_err(|e| Error::Transient {
            provider: ProviderKind::Detro,
            status: None,
            message: format!("failed reading body for line {}: {}", line_id, e),
        })?;

        let vehicles = parse_vehicles(&body)?;
        let positions = to_positions(line_id, direction, &vehicles, now_millis());

        debug!(
            line = line_id,
            direction = direction.label(),
            received = vehicles.len(),
            kept = positions.len(),
            "DETRO coordinates parsed"
        );

        Ok(positions)
    }
}

/// Decode the response body into raw vehicles, skipping elements that do
/// not have the expected object shape.
pub fn parse_vehicles(body: &str) -> Result<Vec<DetroVehicle>, Error> {
    let value: Value = serde_json::from_str(body).map_err(|e| Error::MalformedResponse {
        provider: ProviderKind::Detro,
        message: format!("invalid JSON: {}", e),
    })?;

    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(Error::MalformedResponse {
                provider: ProviderKind::Detro,
                message: format!("expected an array, got {}", json_kind(&other)),
            })
        }
    };

    let total = items.len();
    let vehicles: Vec<DetroVehicle> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if vehicles.len() < total {
        warn!(
            dropped = total - vehicles.len(),
            "Skipped DETRO records with unexpected shape"
        );
    }

    Ok(vehicles)
}

/// Convert raw vehicles into positions tagged with the requested direction.
pub fn to_positions(
    line_id: &str,
    direction: Direction,
    vehicles: &[DetroVehicle],
    observed_at: DateTime<Utc>,
) -> Vec<VehiclePosition> {
    vehicles
        .iter()
        .filter_map(|v| {
            let gps = v.gps.as_ref()?;
            let lat = optional_decimal(gps.latitude.as_ref())?;
            let lng = optional_decimal(gps.longitude.as_ref())?;
            let speed_kmh = optional_decimal(gps.velocidade.as_ref()).unwrap_or(0.0);
            let id = v
                .vehicle_id
                .as_ref()
                .and_then(text_from_value)
                .unwrap_or_else(|| "Unknown".to_string());

            Some(VehiclePosition {
                id,
                line_id: line_id.to_string(),
                lat,
                lng,
                speed_kmh,
                vehicle_class: VehicleClass::Intermunicipal,
                direction: Some(direction),
                observed_at,
            })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
