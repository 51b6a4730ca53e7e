use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use geojson::GeoJson;
use serde_json::from_slice;
use tracing::{debug, info};

use crate::error::Result;

const FIGURE_TABLE: &str = "figures.json";
const BASEMAP: &str = "world.geojson";

/// Static citation → figure filename table.
///
/// Lookup tries the citation verbatim first, then a whitespace-collapsed
/// lowercase form, since citations are typed by hand in both places.
#[derive(Clone, Debug, Default)]
pub struct FigureAssets {
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
}

impl FigureAssets {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut assets = Self::default();
        for (citation, file) in pairs {
            let citation = citation.into();
            let file = file.into();
            assets.normalized.insert(normalize(&citation), file.clone());
            assets.exact.insert(citation, file);
        }
        assets
    }

    /// Filename of the figure for `citation`, if one is mapped.
    pub fn resolve(&self, citation: &str) -> Option<&str> {
        self.exact
            .get(citation)
            .or_else(|| self.normalized.get(&normalize(citation)))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

fn normalize(citation: &str) -> String {
    citation
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Local data directory: figure table and optional basemap outlines.
pub struct DataDir {
    base: PathBuf,
}

impl DataDir {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self { base: base.as_ref().to_path_buf() }
    }

    /// Loads `figures.json`; a missing or unreadable table yields an empty one.
    pub fn load_figure_assets(&self) -> FigureAssets {
        let path = self.base.join(FIGURE_TABLE);
        let table = fs::read(&path)
            .ok()
            .and_then(|b| from_slice::<HashMap<String, String>>(&b).ok());
        match table {
            Some(table) => {
                info!(entries = table.len(), path = %path.display(), "loaded figure table");
                FigureAssets::from_pairs(table)
            }
            None => {
                debug!(path = %path.display(), "no figure table, placeholders only");
                FigureAssets::default()
            }
        }
    }

    /// Loads `world.geojson` if present.
    pub fn load_basemap(&self) -> Result<Option<GeoJson>> {
        let path = self.base.join(BASEMAP);
        if !path.exists() {
            return Ok(None);
        }
        let txt = fs::read_to_string(&path)?;
        Ok(Some(GeoJson::from_str(&txt)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_then_normalized() {
        let assets = FigureAssets::from_pairs([("Smith  et al. (2010)", "smith2010.png")]);
        assert_eq!(assets.resolve("Smith  et al. (2010)"), Some("smith2010.png"));
        assert_eq!(assets.resolve("smith et al. (2010)"), Some("smith2010.png"));
        assert_eq!(assets.resolve("Jones (1999)"), None);
    }

    #[test]
    fn missing_table_is_empty() {
        let dir = DataDir::new("/nonexistent/hydromap-data");
        assert!(dir.load_figure_assets().is_empty());
        assert!(dir.load_basemap().unwrap().is_none());
    }
}
