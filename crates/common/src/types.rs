//! Domain types shared across the workspace.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Providers ─────────────────────────────────────────────────────────

/// Upstream vehicle-position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Intermunicipal feed, two directional requests per line.
    Detro,
    /// Municipal feed behind the caching edge proxy.
    Rio,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Detro => "detro",
            ProviderKind::Rio => "rio",
        }
    }

    /// Vehicle class every record from this provider is tagged with.
    pub fn vehicle_class(&self) -> VehicleClass {
        match self {
            ProviderKind::Detro => VehicleClass::Intermunicipal,
            ProviderKind::Rio => VehicleClass::Municipal,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleClass {
    Municipal,
    Intermunicipal,
}

/// Direction of travel for intermunicipal lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IDA")]
    Outbound,
    #[serde(rename = "VOLTA")]
    Inbound,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Outbound, Direction::Inbound];

    /// Value of the upstream `sentido` query parameter.
    pub fn sentido(&self) -> u8 {
        match self {
            Direction::Outbound => 1,
            Direction::Inbound => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Outbound => "IDA",
            Direction::Inbound => "VOLTA",
        }
    }
}

/// Network quality tiers used to pick the polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Wifi,
    CellularGood,
    CellularPoor,
    Offline,
}

// ── Line catalog ──────────────────────────────────────────────────────

/// Connection parameters for a DETRO line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetroParams {
    pub name: String,
    /// Identification GUID sent as `guidIdentificacao`.
    pub guid: String,
    /// Operator id sent as `idEmpresa`.
    pub company_id: String,
    /// Upstream internal line id (e.g. "2343"), not the public one.
    pub internal_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RioParams {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderParams {
    Detro(DetroParams),
    Rio(RioParams),
}

/// Catalog entry for one public line id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub line_id: String,
    pub provider: ProviderKind,
    pub params: ProviderParams,
}

/// Set of requested line ids; ordered so equality and serialization are stable.
pub type LineSet = BTreeSet<String>;

pub fn line_set<I, S>(lines: I) -> LineSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|l| l.as_ref().trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

// ── Vehicle positions ─────────────────────────────────────────────────

/// A single vehicle observation, unified across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub id: String,
    pub line_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Local receipt time. Upstream clocks are not trusted.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub observed_at: DateTime<Utc>,
}

impl VehiclePosition {
    /// Copy of this observation placed at other coordinates.
    pub fn with_coordinates(&self, lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            ..self.clone()
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }

    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        Freshness::from_age(self.age(now))
    }
}

/// Display freshness of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Under 30 seconds old.
    Fresh,
    /// Under two minutes old.
    Aging,
    Old,
}

impl Freshness {
    pub fn from_age(age: chrono::Duration) -> Self {
        if age < chrono::Duration::seconds(30) {
            Freshness::Fresh
        } else if age < chrono::Duration::seconds(120) {
            Freshness::Aging
        } else {
            Freshness::Old
        }
    }

    /// Marker opacity the display layer applies.
    pub fn opacity(&self) -> f32 {
        match self {
            Freshness::Fresh => 1.0,
            Freshness::Aging => 0.7,
            Freshness::Old => 0.4,
        }
    }
}

/// Current time truncated to whole milliseconds, the precision persisted to disk.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
