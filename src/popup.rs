//! Per-feature detail content, shown when a marker is opened.
//!
//! [`render_popup`] is a pure function of the feature and the figure table.
//! The resulting [`PopupContent`] can be turned into HTML or into plain lines
//! for the terminal detail panel.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::{
    assets::FigureAssets,
    model::{Attribution, FIELD_SENTINEL, Feature, FigureModel, ModelPayload, TextModel, present},
};

pub const NOT_OPEN_ACCESS_NOTICE: &str =
    "This model is not open-access. Please consult the original publication.";
pub const NO_FIGURE_PLACEHOLDER: &str = "No figure available";

#[derive(Clone, Debug, PartialEq)]
pub enum PopupBlock {
    Location(String),
    Citation { text: String, url: Option<String> },
    Notice(String),
    Snippet(String),
    SectionPage(String),
    Figure { file: String },
    FigurePlaceholder,
    Caption(String),
    Processes(Vec<String>),
    SpatialZone(String),
    TemporalZone(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PopupContent {
    pub blocks: Vec<PopupBlock>,
}

pub fn render_popup(feature: &Feature, assets: &FigureAssets) -> PopupContent {
    let mut blocks = vec![
        PopupBlock::Location(feature.location.name.clone()),
        PopupBlock::Citation {
            text: feature.citation.text.clone(),
            url: feature.citation.url.clone(),
        },
    ];

    let gated = feature.citation.attribution == Attribution::NotOpenAccess;
    match &feature.payload {
        ModelPayload::Text(text) => text_blocks(text, gated, &mut blocks),
        ModelPayload::Figure(figure) => {
            figure_blocks(figure, &feature.citation.text, gated, assets, &mut blocks)
        }
    }

    blocks.push(PopupBlock::Processes(
        feature.processes.iter().map(ToString::to_string).collect(),
    ));
    if let Some(zone) = feature.spatial_zone() {
        blocks.push(PopupBlock::SpatialZone(zone.to_string()));
    }
    if let Some(zone) = feature.temporal_zone() {
        blocks.push(PopupBlock::TemporalZone(zone.to_string()));
    }

    PopupContent { blocks }
}

fn text_blocks(text: &TextModel, gated: bool, blocks: &mut Vec<PopupBlock>) {
    if gated {
        blocks.push(PopupBlock::Notice(NOT_OPEN_ACCESS_NOTICE.to_string()));
    } else if let Some(snippet) = present(text.snippet.as_deref(), FIELD_SENTINEL) {
        blocks.push(PopupBlock::Snippet(snippet.to_string()));
    }

    let number = present(text.section_number.as_deref(), FIELD_SENTINEL);
    let name = present(text.section_name.as_deref(), FIELD_SENTINEL);
    let page = present(text.page_number.as_deref(), FIELD_SENTINEL);
    if let (true, Some(page)) = (number.is_some() || name.is_some(), page) {
        let section = [number, name].into_iter().flatten().collect::<Vec<_>>().join(" ");
        blocks.push(PopupBlock::SectionPage(format!("Section {section}, page {page}")));
    }
}

fn figure_blocks(
    figure: &FigureModel,
    citation: &str,
    gated: bool,
    assets: &FigureAssets,
    blocks: &mut Vec<PopupBlock>,
) {
    if gated {
        blocks.push(PopupBlock::Notice(NOT_OPEN_ACCESS_NOTICE.to_string()));
    } else {
        match assets.resolve(citation) {
            Some(file) => blocks.push(PopupBlock::Figure { file: file.to_string() }),
            None => blocks.push(PopupBlock::FigurePlaceholder),
        }
    }

    if let Some(caption) = present(figure.caption.as_deref(), FIELD_SENTINEL) {
        let caption = match present(figure.number.as_deref(), FIELD_SENTINEL) {
            Some(num) => format!("Figure {num}: {caption}"),
            None => format!("Figure: {caption}"),
        };
        blocks.push(PopupBlock::Caption(caption));
    }
}

impl PopupContent {
    pub fn has_spatial_zone(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, PopupBlock::SpatialZone(_)))
    }

    pub fn snippet(&self) -> Option<&str> {
        self.blocks.iter().find_map(|b| match b {
            PopupBlock::Snippet(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Plain text lines for the terminal detail panel.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for block in &self.blocks {
            match block {
                PopupBlock::Location(name) => out.push(name.clone()),
                PopupBlock::Citation { text, url } => {
                    out.push(text.clone());
                    if let Some(url) = url {
                        out.push(format!("<{url}>"));
                    }
                }
                PopupBlock::Notice(s) | PopupBlock::Snippet(s) => {
                    out.push(String::new());
                    out.push(s.clone());
                }
                PopupBlock::SectionPage(s) | PopupBlock::Caption(s) => out.push(s.clone()),
                PopupBlock::Figure { file } => out.push(format!("[figure: {file}]")),
                PopupBlock::FigurePlaceholder => out.push(format!("[{NO_FIGURE_PLACEHOLDER}]")),
                PopupBlock::Processes(items) => {
                    out.push(String::new());
                    out.push("Processes:".to_string());
                    out.extend(items.iter().map(|p| format!("  • {p}")));
                }
                PopupBlock::SpatialZone(z) => out.push(format!("Spatial zone: {z}")),
                PopupBlock::TemporalZone(z) => out.push(format!("Temporal zone: {z}")),
            }
        }
        out
    }

    /// HTML fragment with every user-supplied string escaped.
    /// `figure_base` is prefixed to mapped figure filenames.
    pub fn to_html(&self, figure_base: &str) -> String {
        let mut html = String::new();
        for block in &self.blocks {
            match block {
                PopupBlock::Location(name) => {
                    html.push_str(&format!("<h3>{}</h3>", encode_text(name)));
                }
                PopupBlock::Citation { text, url: Some(url) } => html.push_str(&format!(
                    "<p class=\"citation\"><a href=\"{}\" target=\"_blank\">{}</a></p>",
                    encode_double_quoted_attribute(url),
                    encode_text(text)
                )),
                PopupBlock::Citation { text, url: None } => {
                    html.push_str(&format!("<p class=\"citation\">{}</p>", encode_text(text)));
                }
                PopupBlock::Notice(s) => {
                    html.push_str(&format!("<p class=\"notice\"><em>{}</em></p>", encode_text(s)));
                }
                PopupBlock::Snippet(s) => {
                    html.push_str(&format!("<blockquote>{}</blockquote>", encode_text(s)));
                }
                PopupBlock::SectionPage(s) | PopupBlock::Caption(s) => {
                    html.push_str(&format!("<p class=\"annotation\">{}</p>", encode_text(s)));
                }
                PopupBlock::Figure { file } => html.push_str(&format!(
                    "<img src=\"{}{}\" alt=\"figure\" />",
                    encode_double_quoted_attribute(figure_base),
                    encode_double_quoted_attribute(file)
                )),
                PopupBlock::FigurePlaceholder => {
                    html.push_str(&format!("<p class=\"placeholder\">{NO_FIGURE_PLACEHOLDER}</p>"));
                }
                PopupBlock::Processes(items) => {
                    html.push_str("<ul class=\"processes\">");
                    for item in items {
                        html.push_str(&format!("<li>{}</li>", encode_text(item)));
                    }
                    html.push_str("</ul>");
                }
                PopupBlock::SpatialZone(z) => html.push_str(&format!(
                    "<p><strong>Spatial zone:</strong> {}</p>",
                    encode_text(z)
                )),
                PopupBlock::TemporalZone(z) => html.push_str(&format!(
                    "<p><strong>Temporal zone:</strong> {}</p>",
                    encode_text(z)
                )),
            }
        }
        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::feature;
    use crate::model::{ModelType, ProcessTag};
    use pretty_assertions::assert_eq;

    #[test]
    fn text_model_open_access_shows_snippet_and_section() {
        let mut f = feature(0, ModelType::Text, 0.0, 0.0, "runoff");
        f.payload = ModelPayload::Text(TextModel {
            snippet: Some("Water flows downhill.".into()),
            section_name: Some("Methods".into()),
            section_number: Some("2.1".into()),
            page_number: Some("7".into()),
        });

        let popup = render_popup(&f, &FigureAssets::default());
        assert_eq!(popup.snippet(), Some("Water flows downhill."));
        let section = PopupBlock::SectionPage("Section 2.1 Methods, page 7".into());
        assert!(popup.blocks.contains(&section));
    }

    #[test]
    fn section_annotation_needs_a_real_page() {
        let mut f = feature(0, ModelType::Text, 0.0, 0.0, "runoff");
        f.payload = ModelPayload::Text(TextModel {
            snippet: Some("x".into()),
            section_name: Some("Methods".into()),
            section_number: None,
            page_number: Some("N/A".into()),
        });
        let popup = render_popup(&f, &FigureAssets::default());
        assert!(!popup.blocks.iter().any(|b| matches!(b, PopupBlock::SectionPage(_))));
    }

    #[test]
    fn gated_text_model_hides_snippet() {
        let mut f = feature(0, ModelType::Text, 0.0, 0.0, "runoff");
        f.citation.attribution = Attribution::NotOpenAccess;

        let popup = render_popup(&f, &FigureAssets::default());
        assert_eq!(popup.snippet(), None);
        assert!(popup.blocks.contains(&PopupBlock::Notice(NOT_OPEN_ACCESS_NOTICE.into())));
        assert!(!popup.lines().iter().any(|l| l.contains("snippet 0")));
    }

    #[test]
    fn figure_model_resolves_asset_or_placeholder() {
        let mut f = feature(3, ModelType::Figure, 0.0, 0.0, "runoff");
        f.payload = ModelPayload::Figure(FigureModel {
            url: None,
            caption: Some("Conceptual model".into()),
            number: Some("4".into()),
        });

        let mapped = FigureAssets::from_pairs([("Author 3 (2020)", "author3.png")]);
        let popup = render_popup(&f, &mapped);
        assert!(popup.blocks.contains(&PopupBlock::Figure { file: "author3.png".into() }));
        assert!(popup.blocks.contains(&PopupBlock::Caption("Figure 4: Conceptual model".into())));

        let popup = render_popup(&f, &FigureAssets::default());
        assert!(popup.blocks.contains(&PopupBlock::FigurePlaceholder));
    }

    #[test]
    fn gated_figure_model_never_shows_image() {
        let mut f = feature(3, ModelType::Figure, 0.0, 0.0, "runoff");
        f.citation.attribution = Attribution::NotOpenAccess;
        let mapped = FigureAssets::from_pairs([("Author 3 (2020)", "author3.png")]);

        let popup = render_popup(&f, &mapped);
        assert!(!popup.blocks.iter().any(|b| matches!(b, PopupBlock::Figure { .. })));
        assert!(popup.blocks.contains(&PopupBlock::Notice(NOT_OPEN_ACCESS_NOTICE.into())));
    }

    #[test]
    fn zones_follow_sentinel_convention() {
        let mut f = feature(0, ModelType::Text, 0.0, 0.0, "runoff");
        assert!(!render_popup(&f, &FigureAssets::default()).has_spatial_zone());

        f.spatial_zone = Some("Hillslope".into());
        f.temporal_zone = Some("Wet season".into());
        let popup = render_popup(&f, &FigureAssets::default());
        assert!(popup.has_spatial_zone());
        assert!(popup.blocks.contains(&PopupBlock::TemporalZone("Wet season".into())));
    }

    #[test]
    fn processes_render_in_order_with_identifier() {
        let mut f = feature(0, ModelType::Text, 0.0, 0.0, "runoff");
        f.processes.push(ProcessTag { process: "Baseflow".into(), identifier: "BF".into() });
        let popup = render_popup(&f, &FigureAssets::default());
        assert!(popup.blocks.contains(&PopupBlock::Processes(vec![
            "runoff (RUNOFF)".into(),
            "Baseflow (BF)".into(),
        ])));
    }

    #[test]
    fn html_escapes_user_text() {
        let mut f = feature(0, ModelType::Text, 0.0, 0.0, "runoff");
        f.location.name = "<Catchment & co>".into();
        f.citation.url = Some("https://example.org/?a=1&b=\"2\"".into());

        let html = render_popup(&f, &FigureAssets::default()).to_html("/figures/");
        assert!(html.starts_with("<h3>&lt;Catchment &amp; co&gt;</h3>"));
        assert!(html.contains("href=\"https://example.org/?a=1&amp;b=&quot;2&quot;\""));
    }
}
