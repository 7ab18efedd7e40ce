use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use catalog::{Locale, OverlayCatalog};
use clap::{Parser, Subcommand};
use jpmap::config::Config;
use jpmap::inspect::{catalog_lines, inspect_document};
use jpmap::simulate::{Step, default_base_style, fetcher_for, simulate};
use streaming::StyleDocument;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Overlay catalog and reconciliation tools for the Japan map viewer")]
struct Args {
    /// Overlay catalog JSON (default: the built-in Japan catalog)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Display language, `ja` or `en` (default: JPMAP_LOCALE, then `ja`)
    #[arg(long, global = true)]
    locale: Option<Locale>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List overlays grouped by exclusive/independent
    Catalog {
        /// Print the catalog as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Show what a style or GeoJSON document would add as an overlay
    Inspect {
        path: PathBuf,

        /// Overlay key used to name FeatureCollection sources and layers
        #[arg(long)]
        key: Option<String>,
    },

    /// Apply toggle steps to an in-memory map and print the resulting state
    Simulate {
        /// Fetch overlay documents over HTTP relative to this URL
        #[arg(long)]
        base_url: Option<String>,

        /// Directory overlay URLs resolve into when no base URL is set
        #[arg(long)]
        public_dir: Option<PathBuf>,

        /// Base style the overlays are attached on top of
        #[arg(long)]
        base_style: Option<PathBuf>,

        /// Keep sources of at most this many switched-off overlays
        #[arg(long)]
        dormant_limit: Option<usize>,

        /// exclusive=KEY, toggle=KEY, on=KEY, off=KEY, terrain=on|off or settle
        #[arg(required = true)]
        steps: Vec<Step>,
    },
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<OverlayCatalog> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            OverlayCatalog::from_json_str(&raw)
                .with_context(|| format!("loading catalog {}", path.display()))
        }
        None => Ok(OverlayCatalog::japan()),
    }
}

fn load_style(path: &Path) -> anyhow::Result<StyleDocument> {
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    StyleDocument::from_value(value).with_context(|| format!("base style {}", path.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(locale) = args.locale {
        config.locale = locale;
    }
    let catalog = load_catalog(args.catalog.as_deref())?;

    match args.command {
        Command::Catalog { json } => {
            if json {
                println!("{}", catalog.to_json_pretty()?);
            } else {
                for line in catalog_lines(&catalog, config.locale) {
                    println!("{line}");
                }
            }
        }
        Command::Inspect { path, key } => {
            let raw = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let key = key.unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "overlay".to_string())
            });
            let summary = inspect_document(&key, &raw)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Simulate {
            base_url,
            public_dir,
            base_style,
            dormant_limit,
            steps,
        } => {
            if base_url.is_some() {
                config.base_url = base_url;
            }
            if let Some(dir) = public_dir {
                config.public_dir = dir;
            }
            if dormant_limit.is_some() {
                config.dormant_source_limit = dormant_limit;
            }
            let base = match base_style {
                Some(path) => load_style(&path)?,
                None => default_base_style(),
            };
            info!(steps = steps.len(), base_url = ?config.base_url, "simulating");

            let fetcher = fetcher_for(&config)?;
            let report = simulate(catalog, &config, &base, fetcher, &steps).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
