use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use catalog::{OverlayCatalog, OverlayKey};
use layers::{InMemoryMap, MapArtifactRegistry, OverlayDriver, OverlayManager, ToggleEvent};
use runtime::StatusKind;
use serde::Serialize;
use serde_json::json;
use streaming::{FileFetcher, HttpFetcher, LayerType, StyleDocument, StyleFetcher, StyleLayer};
use tracing::{info, warn};

use crate::config::Config;

/// One scripted interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Exclusive(String),
    Toggle(String),
    On(String),
    Off(String),
    Terrain(bool),
    /// Wait for every fetch in flight before the next step.
    Settle,
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "settle" {
            return Ok(Step::Settle);
        }
        let Some((verb, arg)) = s.split_once('=') else {
            bail!("expected VERB=ARG or `settle`, got `{s}`");
        };
        if arg.is_empty() {
            bail!("`{verb}` needs an argument");
        }
        let arg = arg.to_string();
        Ok(match verb {
            "exclusive" => Step::Exclusive(arg),
            "toggle" => Step::Toggle(arg),
            "on" => Step::On(arg),
            "off" => Step::Off(arg),
            "terrain" => match arg.as_str() {
                "on" => Step::Terrain(true),
                "off" => Step::Terrain(false),
                other => bail!("terrain expects `on` or `off`, got `{other}`"),
            },
            other => bail!("unknown step `{other}`"),
        })
    }
}

impl Step {
    fn event(&self) -> Option<ToggleEvent> {
        Some(match self {
            Step::Exclusive(key) => ToggleEvent::Exclusive(OverlayKey::new(key.as_str())),
            Step::Toggle(key) => ToggleEvent::Toggle(OverlayKey::new(key.as_str())),
            Step::On(key) => ToggleEvent::SetIndependent(OverlayKey::new(key.as_str()), true),
            Step::Off(key) => ToggleEvent::SetIndependent(OverlayKey::new(key.as_str()), false),
            Step::Terrain(enabled) => ToggleEvent::Terrain(*enabled),
            Step::Settle => return None,
        })
    }
}

/// Stand-in for the viewer's base style: a background, one fill and the
/// label layer overlays are inserted below.
pub fn default_base_style() -> StyleDocument {
    StyleDocument::new()
        .with_source("base", json!({ "type": "vector" }))
        .with_layer(
            StyleLayer::new("background", LayerType::Background)
                .with_paint("background-color", json!("#f8f4f0")),
        )
        .with_layer(
            StyleLayer::new("water", LayerType::Fill)
                .with_source("base")
                .with_paint("fill-color", json!("#a0c8f0")),
        )
        .with_layer(StyleLayer::new("place-label", LayerType::Symbol).with_source("base"))
}

/// HTTP when a base URL is configured, the public directory otherwise.
pub fn fetcher_for(config: &Config) -> anyhow::Result<Arc<dyn StyleFetcher>> {
    let fetcher: Arc<dyn StyleFetcher> = match &config.base_url {
        Some(base_url) => {
            let client = reqwest::Client::builder()
                .build()
                .context("building HTTP client")?;
            Arc::new(
                HttpFetcher::new(client)
                    .with_base_url(base_url.clone())
                    .with_timeout(config.fetch_timeout),
            )
        }
        None => Arc::new(FileFetcher::new(&config.public_dir)),
    };
    Ok(fetcher)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachedSummary {
    pub overlay: String,
    pub active: bool,
    pub sources: Vec<String>,
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub exclusive: String,
    pub independent: Vec<String>,
    pub layers: Vec<String>,
    pub sources: Vec<String>,
    pub attached: Vec<AttachedSummary>,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: Vec<(String, i64)>,
}

fn status_label(kind: StatusKind) -> &'static str {
    match kind {
        StatusKind::Loading => "loading",
        StatusKind::Attached => "attached",
        StatusKind::Detached => "detached",
        StatusKind::Discarded => "discarded",
        StatusKind::Failed => "failed",
    }
}

pub fn report(driver: &OverlayDriver<InMemoryMap>) -> SimulationReport {
    let map = driver.map();
    let desired = driver.desired();
    SimulationReport {
        exclusive: desired.exclusive_selection().to_string(),
        independent: desired
            .independent_selections()
            .iter()
            .map(ToString::to_string)
            .collect(),
        layers: map.layer_ids().into_iter().map(String::from).collect(),
        sources: map.source_ids().into_iter().map(String::from).collect(),
        attached: driver
            .manager()
            .attached()
            .iter()
            .map(|(key, entry)| AttachedSummary {
                overlay: key.to_string(),
                active: entry.active,
                sources: entry.artifacts.sources.clone(),
                layers: entry.artifacts.layers.clone(),
            })
            .collect(),
        events: driver
            .status()
            .events()
            .iter()
            .map(|e| {
                let label = status_label(e.kind);
                if e.message.is_empty() {
                    format!("#{} {label} {}", e.seq, e.overlay)
                } else {
                    format!("#{} {label} {}: {}", e.seq, e.overlay, e.message)
                }
            })
            .collect(),
        error: driver.status().error_slot().map(String::from),
        metrics: driver
            .manager()
            .metrics()
            .snapshot()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    }
}

/// Run `steps` against an in-memory map seeded with `base`.
///
/// Steps are applied without waiting for fetches unless a `settle` step says
/// so, which lets a script reproduce superseded loads. Everything in flight is
/// drained at the end.
pub async fn simulate(
    catalog: OverlayCatalog,
    config: &Config,
    base: &StyleDocument,
    fetcher: Arc<dyn StyleFetcher>,
    steps: &[Step],
) -> anyhow::Result<SimulationReport> {
    let map = InMemoryMap::from_style(base).context("base style is inconsistent")?;
    let manager = OverlayManager::new(catalog, config.manager_config());
    let mut driver = OverlayDriver::new(manager, map, fetcher).with_locale(config.locale);

    for (index, step) in steps.iter().enumerate() {
        match step.event() {
            Some(event) => {
                if let Err(err) = driver.handle(event) {
                    warn!(step = index, %err, "step rejected");
                }
            }
            None => {
                let settled = driver.settle().await;
                info!(step = index, loads = settled.len(), "settled");
            }
        }
    }
    driver.settle().await;

    let report = report(&driver);
    info!(
        layers = report.layers.len(),
        first_symbol = ?driver.map().first_symbol_layer_id(),
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{Step, default_base_style, fetcher_for, simulate};
    use crate::config::Config;
    use catalog::OverlayCatalog;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;

    #[test]
    fn parses_steps() {
        assert_eq!(
            "exclusive=landcover1".parse::<Step>().unwrap(),
            Step::Exclusive("landcover1".to_string())
        );
        assert_eq!("terrain=off".parse::<Step>().unwrap(), Step::Terrain(false));
        assert_eq!("settle".parse::<Step>().unwrap(), Step::Settle);
        assert!("terrain=maybe".parse::<Step>().is_err());
        assert!("toggle=".parse::<Step>().is_err());
        assert!("jump=urban".parse::<Step>().is_err());
    }

    #[tokio::test]
    async fn simulates_against_public_directory() {
        let dir = tempfile::tempdir().unwrap();
        let style = json!({
            "version": 8,
            "sources": { "landcover": { "type": "geojson", "data": "/landcover.geojson" } },
            "layers": [
                { "id": "landcover-bg", "type": "background" },
                { "id": "landcover-fill", "type": "fill", "source": "landcover" }
            ]
        });
        fs::write(dir.path().join("landcover-style.json"), style.to_string()).unwrap();

        let config = Config {
            public_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let steps: Vec<Step> = [
            "exclusive=landcover2",
            "exclusive=landcover1",
            "terrain=on",
            "toggle=urban",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

        let report = simulate(
            OverlayCatalog::japan(),
            &config,
            &default_base_style(),
            fetcher_for(&config).unwrap(),
            &steps,
        )
        .await
        .unwrap();

        assert_eq!(report.exclusive, "landcover1");
        assert_eq!(report.independent, vec!["terrain".to_string(), "urban".to_string()]);
        assert_eq!(report.layers.first().map(String::as_str), Some("background"));
        assert_eq!(report.layers.last().map(String::as_str), Some("place-label"));
        assert!(report.layers.contains(&"landcover-fill".to_string()));
        assert!(!report.layers.contains(&"landcover-bg".to_string()));
        assert!(report.layers.contains(&"hillshade".to_string()));
        assert!(report.error.is_none());
        assert!(report.events.iter().any(|e| e.contains("discarded landcover2")));
    }

    #[tokio::test]
    async fn missing_document_fills_error_slot() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            public_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let report = simulate(
            OverlayCatalog::japan(),
            &config,
            &default_base_style(),
            fetcher_for(&config).unwrap(),
            &["exclusive=landuse1".parse::<Step>().unwrap()],
        )
        .await
        .unwrap();

        let error = report.error.unwrap();
        assert!(error.starts_with("オーバーレイの読み込みに失敗しました"));
        assert_eq!(report.layers, vec!["background", "water", "place-label"]);
    }
}
