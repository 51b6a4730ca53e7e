use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal map of hydrological perceptual models")]
pub struct AppConfig {
    /// Base URL of the perceptual-model API
    #[arg(long, env = "HYDROMAP_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Directory holding figures.json and an optional world.geojson basemap
    #[arg(long, env = "HYDROMAP_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Collector URL for marker-click tracking; tracking is log-only without it
    #[arg(long, env = "HYDROMAP_ANALYTICS_URL")]
    pub analytics_url: Option<String>,

    /// Read the FeatureCollection from this file instead of the API
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Cluster cell size in degrees at zoom 1
    #[arg(long, default_value_t = 8.0)]
    pub cluster_radius: f64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log destination; the terminal itself is taken by the UI
    #[arg(long, default_value = "hydromap.log")]
    pub log_file: PathBuf,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cluster_radius.is_finite() && self.cluster_radius > 0.0) {
            bail!("--cluster-radius must be a positive number of degrees");
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!("--api-url must be an http(s) URL, got {:?}", self.api_url);
        }
        Ok(())
    }
}
