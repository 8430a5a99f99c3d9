//! Static line catalog and route shapes.
//!
//! Both are bundled into the binary and may be overridden by a file path.
//! Load failures degrade to an empty catalog instead of aborting startup.

use std::collections::HashMap;
use std::path::Path;

use common::{DetroParams, Error, LineConfig, ProviderKind, ProviderParams, RioParams};
use serde::Deserialize;
use tracing::{error, info};

const BUNDLED_CATALOG: &str = include_str!("../assets/bus_database.json");
const BUNDLED_ROUTE_SHAPES: &str = include_str!("../assets/route_shapes.json");

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogMetadata {
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub detro_count: usize,
    #[serde(default)]
    pub rio_count: usize,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    metadata: Option<CatalogMetadata>,
    #[serde(default)]
    detro: HashMap<String, DetroEntry>,
    #[serde(default)]
    rio: HashMap<String, RioEntry>,
}

#[derive(Debug, Deserialize)]
struct DetroEntry {
    #[serde(default)]
    nome: String,
    guid: String,
    #[serde(rename = "idEmpresa")]
    id_empresa: String,
    linha: String,
}

#[derive(Debug, Deserialize)]
struct RioEntry {
    #[serde(default)]
    nome: String,
    #[serde(default)]
    tipo: String,
}

/// Read-only mapping from public line id to provider configuration.
#[derive(Debug, Clone, Default)]
pub struct LineCatalog {
    lines: HashMap<String, LineConfig>,
    metadata: Option<CatalogMetadata>,
}

impl LineCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a catalog document. Lines present in both maps resolve to Rio.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let doc: CatalogDocument =
            serde_json::from_str(json).map_err(|e| Error::CatalogLoad(e.to_string()))?;

        let mut lines = HashMap::with_capacity(doc.detro.len() + doc.rio.len());
        for (line_id, entry) in doc.detro {
            let config = LineConfig {
                line_id: line_id.clone(),
                provider: ProviderKind::Detro,
                params: ProviderParams::Detro(DetroParams {
                    name: entry.nome,
                    guid: entry.guid,
                    company_id: entry.id_empresa,
                    internal_line: entry.linha,
                }),
            };
            lines.insert(line_id, config);
        }
        for (line_id, entry) in doc.rio {
            let config = LineConfig {
                line_id: line_id.clone(),
                provider: ProviderKind::Rio,
                params: ProviderParams::Rio(RioParams {
                    name: entry.nome,
                    kind: entry.tipo,
                }),
            };
            lines.insert(line_id, config);
        }

        Ok(Self {
            lines,
            metadata: doc.metadata,
        })
    }

    /// The catalog compiled into the binary.
    pub fn bundled() -> Self {
        Self::from_json(BUNDLED_CATALOG).unwrap_or_else(|e| {
            error!("Bundled line catalog is unusable: {}", e);
            Self::empty()
        })
    }

    /// Load from `path` when given, else the bundled copy.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            let catalog = Self::bundled();
            info!(lines = catalog.len(), "Loaded bundled line catalog");
            return catalog;
        };

        let loaded = std::fs::read_to_string(path)
            .map_err(|e| Error::CatalogLoad(format!("{}: {}", path.display(), e)))
            .and_then(|json| Self::from_json(&json));

        match loaded {
            Ok(catalog) => {
                info!(path = %path.display(), lines = catalog.len(), "Loaded line catalog");
                catalog
            }
            Err(e) => {
                error!("Line catalog failed to load, continuing without lines: {}", e);
                Self::empty()
            }
        }
    }

    pub fn resolve(&self, line_id: &str) -> Result<&LineConfig, Error> {
        self.lines
            .get(line_id)
            .ok_or_else(|| Error::LineNotFound(line_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn metadata(&self) -> Option<&CatalogMetadata> {
        self.metadata.as_ref()
    }
}

// ── Route shapes ──────────────────────────────────────────────────────

/// Ordered `[lat, lng]` polylines per line, for the map layer.
#[derive(Debug, Clone, Default)]
pub struct RouteShapes {
    shapes: HashMap<String, Vec<[f64; 2]>>,
}

impl RouteShapes {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let shapes = serde_json::from_str(json).map_err(|e| Error::CatalogLoad(e.to_string()))?;
        Ok(Self { shapes })
    }

    pub fn load(path: Option<&Path>) -> Self {
        let loaded = match path {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| Error::CatalogLoad(format!("{}: {}", path.display(), e)))
                .and_then(|json| Self::from_json(&json)),
            None => Self::from_json(BUNDLED_ROUTE_SHAPES),
        };

        loaded.unwrap_or_else(|e| {
            error!("Route shapes failed to load: {}", e);
            Self::default()
        })
    }

    /// Exact id first, then upper-cased, then without a trailing `.0`.
    pub fn shape_for(&self, line_id: &str) -> Option<&[[f64; 2]]> {
        self.shapes
            .get(line_id)
            .or_else(|| self.shapes.get(&line_id.to_uppercase()))
            .or_else(|| {
                line_id
                    .strip_suffix(".0")
                    .and_then(|stripped| self.shapes.get(stripped))
            })
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_resolves_both_providers() {
        let catalog = LineCatalog::bundled();
        assert!(!catalog.is_empty());

        let sp455 = catalog.resolve("SP455").unwrap();
        assert_eq!(sp455.provider, ProviderKind::Detro);
        match &sp455.params {
            ProviderParams::Detro(p) => assert_eq!(p.internal_line, "2343"),
            other => panic!("unexpected params: {:?}", other),
        }

        assert_eq!(catalog.resolve("343").unwrap().provider, ProviderKind::Rio);
        assert_eq!(catalog.metadata().map(|m| m.rio_count), Some(6));
    }

    #[test]
    fn test_rio_wins_when_line_in_both_maps() {
        let catalog = LineCatalog::bundled();
        assert_eq!(catalog.resolve("485").unwrap().provider, ProviderKind::Rio);
    }

    #[test]
    fn test_unknown_line_is_not_found() {
        let catalog = LineCatalog::bundled();
        assert!(matches!(catalog.resolve("99999"), Err(Error::LineNotFound(_))));
    }

    #[test]
    fn test_unreadable_override_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus_database.json");
        std::fs::write(&path, "{ not json").unwrap();

        let catalog = LineCatalog::load(Some(&path));
        assert!(catalog.is_empty());
        assert!(matches!(catalog.resolve("343"), Err(Error::LineNotFound(_))));

        let missing = LineCatalog::load(Some(&dir.path().join("absent.json")));
        assert!(missing.is_empty());
    }

    #[test]
    fn test_route_shape_fallbacks() {
        let shapes = RouteShapes::from_json(r#"{"343": [[-22.9, -43.1]], "SV474": [[-22.8, -43.2]]}"#).unwrap();
        assert_eq!(shapes.shape_for("343").map(|s| s.len()), Some(1));
        assert!(shapes.shape_for("sv474").is_some());
        assert!(shapes.shape_for("343.0").is_some());
        assert!(shapes.shape_for("100").is_none());
        assert!(!RouteShapes::load(None).is_empty());
    }
}
