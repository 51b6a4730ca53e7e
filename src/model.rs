use std::{fmt, str::FromStr};

use geo::{Geometry, Point};
use geojson::GeoJson;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{MapError, Result};

/// Placeholder used by the dataset for "no zone recorded".
pub const ZONE_SENTINEL: &str = "N";
/// Placeholder used by the dataset for absent free-text fields.
pub const FIELD_SENTINEL: &str = "N/A";

/// Positional identity of a feature inside the loaded collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub usize);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelType {
    Text,
    Figure,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Text, ModelType::Figure];

    pub fn label(self) -> &'static str {
        match self {
            ModelType::Text => "Text model",
            ModelType::Figure => "Figure model",
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("figure") {
            Ok(ModelType::Figure)
        } else if lower.starts_with("text") {
            Ok(ModelType::Text)
        } else {
            Err(format!("unknown model type {s:?}"))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribution {
    OpenAccess,
    NotOpenAccess,
}

impl Attribution {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase().replace(['-', '_'], " ")) {
            Some(s) if s == "not open access" => Attribution::NotOpenAccess,
            _ => Attribution::OpenAccess,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    /// Map-space point, x = longitude, y = latitude.
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Citation {
    pub text: String,
    pub url: Option<String>,
    pub attribution: Attribution,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextModel {
    pub snippet: Option<String>,
    pub section_name: Option<String>,
    pub section_number: Option<String>,
    pub page_number: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FigureModel {
    pub url: Option<String>,
    pub caption: Option<String>,
    pub number: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelPayload {
    Text(TextModel),
    Figure(FigureModel),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessTag {
    pub process: String,
    pub identifier: String,
}

impl ProcessTag {
    /// Selection key: the identifier, or the process name when the row has none.
    pub fn key(&self) -> &str {
        if self.identifier.trim().is_empty() { &self.process } else { &self.identifier }
    }
}

impl fmt::Display for ProcessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identifier.trim().is_empty() {
            write!(f, "{}", self.process)
        } else {
            write!(f, "{} ({})", self.process, self.identifier)
        }
    }
}

/// One perceptual-model observation. Immutable once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub db_id: Option<i64>,
    pub location: Location,
    pub citation: Citation,
    pub payload: ModelPayload,
    pub processes: Vec<ProcessTag>,
    pub spatial_zone: Option<String>,
    pub temporal_zone: Option<String>,
}

impl Feature {
    pub fn model_type(&self) -> ModelType {
        match self.payload {
            ModelPayload::Text(_) => ModelType::Text,
            ModelPayload::Figure(_) => ModelType::Figure,
        }
    }

    /// Spatial zone, with the "N" placeholder read as absent.
    pub fn spatial_zone(&self) -> Option<&str> {
        present(self.spatial_zone.as_deref(), ZONE_SENTINEL)
    }

    pub fn temporal_zone(&self) -> Option<&str> {
        present(self.temporal_zone.as_deref(), ZONE_SENTINEL)
    }

    /// Case-insensitive substring match over the searchable text of the feature.
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        let hit = |s: &str| s.to_lowercase().contains(needle);
        if hit(&self.location.name) || hit(&self.citation.text) {
            return true;
        }
        let body = match &self.payload {
            ModelPayload::Text(t) => t.snippet.as_deref(),
            ModelPayload::Figure(f) => f.caption.as_deref(),
        };
        if body.is_some_and(hit) {
            return true;
        }
        self.processes.iter().any(|p| hit(&p.process))
    }
}

/// Returns the value unless it is missing, blank or equal to `sentinel`.
pub fn present<'a>(value: Option<&'a str>, sentinel: &str) -> Option<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != sentinel)
}

#[derive(Deserialize)]
struct RawCitation {
    #[serde(default, deserialize_with = "lenient_string")]
    citation: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    attribution: Option<String>,
}

#[derive(Deserialize)]
struct RawNamed {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawProcess {
    #[serde(default, deserialize_with = "lenient_string")]
    process: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    identifier: Option<String>,
}

#[derive(Deserialize)]
struct RawSpatialZone {
    #[serde(default, deserialize_with = "lenient_string")]
    spatial_property: Option<String>,
}

#[derive(Deserialize)]
struct RawTemporalZone {
    #[serde(default, deserialize_with = "lenient_string")]
    temporal_property: Option<String>,
}

#[derive(Deserialize)]
struct RawProperties {
    #[serde(default)]
    id: Option<i64>,
    citation: Option<RawCitation>,
    location: Option<RawNamed>,
    #[serde(default, deserialize_with = "lenient_string")]
    location_name: Option<String>,
    model_type: Option<RawNamed>,
    #[serde(default, deserialize_with = "lenient_string")]
    figure_num: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    figure_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    figure_caption: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    textmodel_snipped: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    textmodel_section_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    textmodel_section_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    textmodel_page_number: Option<String>,
    #[serde(default)]
    process_taxonomies: Vec<RawProcess>,
    spatial_zone_type: Option<RawSpatialZone>,
    temporal_zone_type: Option<RawTemporalZone>,
}

// Page and section numbers arrive as strings or numbers depending on the row.
fn lenient_string<'de, D>(de: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(de)? {
        Some(JsonValue::String(s)) => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        Some(JsonValue::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Parses the text of a GeoJSON FeatureCollection into features.
pub fn parse_collection(text: &str) -> Result<Vec<Feature>> {
    decode_collection(GeoJson::from_str(text)?)
}

/// Decodes a FeatureCollection. Malformed members are logged and skipped;
/// surviving features are numbered by their position in the output.
pub fn decode_collection(raw: GeoJson) -> Result<Vec<Feature>> {
    let GeoJson::FeatureCollection(fc) = raw else {
        return Err(MapError::NotACollection);
    };

    let mut features = Vec::with_capacity(fc.features.len());
    for (index, feature) in fc.features.into_iter().enumerate() {
        match decode_feature(index, feature, FeatureId(features.len())) {
            Ok(f) => features.push(f),
            Err(err) => warn!(%err, "skipping feature"),
        }
    }
    Ok(features)
}

fn decode_feature(index: usize, feature: geojson::Feature, id: FeatureId) -> Result<Feature> {
    let invalid = |reason: &str| MapError::InvalidFeature { index, reason: reason.to_string() };

    let gj = feature.geometry.ok_or_else(|| invalid("missing geometry"))?;
    let geom: Geometry<f64> = gj.value.try_into()?;
    let Geometry::Point(point) = geom else {
        return Err(invalid("geometry is not a point"));
    };

    let props = feature.properties.ok_or_else(|| invalid("missing properties"))?;
    let raw: RawProperties = serde_json::from_value(JsonValue::Object(props))?;

    let model_name = raw
        .model_type
        .and_then(|m| m.name)
        .ok_or_else(|| invalid("missing model type"))?;
    let model_type = ModelType::from_str(&model_name).map_err(|e| invalid(&e))?;

    let processes: Vec<ProcessTag> = raw
        .process_taxonomies
        .into_iter()
        .filter_map(|p| {
            Some(ProcessTag {
                process: p.process?,
                identifier: p.identifier.unwrap_or_default(),
            })
        })
        .collect();
    if processes.is_empty() {
        return Err(invalid("no process taxonomy tags"));
    }

    let citation = raw.citation.ok_or_else(|| invalid("missing citation"))?;
    let citation = Citation {
        text: citation.citation.unwrap_or_default(),
        url: citation.url.filter(|u| !u.trim().is_empty()),
        attribution: Attribution::parse(citation.attribution.as_deref()),
    };

    let payload = match model_type {
        ModelType::Text => ModelPayload::Text(TextModel {
            snippet: raw.textmodel_snipped,
            section_name: raw.textmodel_section_name,
            section_number: raw.textmodel_section_number,
            page_number: raw.textmodel_page_number,
        }),
        ModelType::Figure => ModelPayload::Figure(FigureModel {
            url: raw.figure_url,
            caption: raw.figure_caption,
            number: raw.figure_num,
        }),
    };

    let name = raw
        .location
        .and_then(|l| l.name)
        .or(raw.location_name)
        .unwrap_or_default();

    Ok(Feature {
        id,
        db_id: raw.id,
        location: Location { name, lat: point.y(), lon: point.x() },
        citation,
        payload,
        processes,
        spatial_zone: raw.spatial_zone_type.and_then(|z| z.spatial_property),
        temporal_zone: raw.temporal_zone_type.and_then(|z| z.temporal_property),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [-3.5, 52.25] },
                "properties": {
                    "id": 17,
                    "citation": { "citation": "Smith (2010)", "url": "https://doi.org/x", "attribution": "Open-access" },
                    "location": { "name": "Plynlimon" },
                    "model_type": { "name": "Text model" },
                    "textmodel_snipped": "Saturation-excess overland flow dominates.",
                    "textmodel_section_number": 3,
                    "textmodel_page_number": "12",
                    "process_taxonomies": [ { "process": "Overland flow", "identifier": "OF" } ],
                    "spatial_zone_type": { "spatial_property": "Hillslope" },
                    "temporal_zone_type": { "temporal_property": "N" }
                }
            },
            {
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] },
                "properties": {}
            }
        ]
    }"#;

    #[test]
    fn decodes_point_features_and_skips_malformed_ones() {
        let features = parse_collection(COLLECTION).unwrap();
        assert_eq!(features.len(), 1);

        let f = &features[0];
        assert_eq!(f.id, FeatureId(0));
        assert_eq!(f.db_id, Some(17));
        assert_eq!(f.location.name, "Plynlimon");
        assert_eq!((f.location.lon, f.location.lat), (-3.5, 52.25));
        assert_eq!(f.model_type(), ModelType::Text);
        assert_eq!(f.citation.attribution, Attribution::OpenAccess);
        assert_eq!(f.spatial_zone(), Some("Hillslope"));
        assert_eq!(f.temporal_zone(), None);
        match &f.payload {
            ModelPayload::Text(t) => assert_eq!(t.section_number.as_deref(), Some("3")),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn rejects_non_collections() {
        let single = r#"{ "type": "Point", "coordinates": [0.0, 0.0] }"#;
        assert!(matches!(parse_collection(single), Err(MapError::NotACollection)));
    }

    #[test]
    fn attribution_parsing_tolerates_spelling() {
        assert_eq!(Attribution::parse(Some("Not open-access")), Attribution::NotOpenAccess);
        assert_eq!(Attribution::parse(Some("not_open_access")), Attribution::NotOpenAccess);
        assert_eq!(Attribution::parse(Some("Open-access")), Attribution::OpenAccess);
        assert_eq!(Attribution::parse(None), Attribution::OpenAccess);
    }

    #[test]
    fn sentinels_read_as_absent() {
        assert_eq!(present(Some("N/A"), FIELD_SENTINEL), None);
        assert_eq!(present(Some("  "), FIELD_SENTINEL), None);
        assert_eq!(present(Some("N"), ZONE_SENTINEL), None);
        assert_eq!(present(Some("Riparian"), ZONE_SENTINEL), Some("Riparian"));
    }

    #[test]
    fn process_key_falls_back_to_the_name() {
        let tagged = ProcessTag { process: "Snowmelt".into(), identifier: "SM".into() };
        let bare = ProcessTag { process: "Interflow".into(), identifier: String::new() };
        assert_eq!(tagged.key(), "SM");
        assert_eq!(bare.key(), "Interflow");
        assert_eq!(bare.to_string(), "Interflow");
    }
}
