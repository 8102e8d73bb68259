use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerKind {
    #[default]
    Inline,
    Block,
    Dual,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKind::Inline => "inline",
            MarkerKind::Block => "block",
            MarkerKind::Dual => "dual",
        }
    }

    // Anything that is neither inline nor dual only renders as a block.
    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "inline" => MarkerKind::Inline,
            "dual" => MarkerKind::Dual,
            _ => MarkerKind::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Enclosure,
    Prefix,
    Range,
    Regex,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::Enclosure => "enclosure",
            MatchMode::Prefix => "prefix",
            MatchMode::Range => "range",
            MatchMode::Regex => "regex",
        }
    }

    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "prefix" => MatchMode::Prefix,
            "range" => MatchMode::Range,
            "regex" => MatchMode::Regex,
            _ => MatchMode::Enclosure,
        }
    }
}

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let name = Option::<String>::deserialize(deserializer)?;
                Ok(name.as_deref().map(<$ty>::from_name).unwrap_or_default())
            }
        }
    };
}

string_enum_serde!(MarkerKind);
string_enum_serde!(MatchMode);

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Renderer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// A user-defined annotation rule. Decoding is lenient: every field has a
/// default so a half-filled marker is skipped later instead of failing the
/// whole list.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkerConfig {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    pub is_block: bool,
    pub match_mode: MatchMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(deserialize_with = "lenient_priority")]
    pub priority: f64,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub style: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer: Option<Renderer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    pub dim_if_not_keyword: bool,
    pub show_delimiters: bool,
    pub smart_toggle: bool,
    #[serde(
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub fixed_duration: Option<f64>,
}

impl MarkerConfig {
    pub fn list_from_json(json: &str) -> Result<Vec<MarkerConfig>> {
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(json).map_err(Error::InvalidMarkers)
    }

    pub fn start(&self) -> Option<&str> {
        non_empty(self.start.as_deref())
    }

    pub fn end(&self) -> Option<&str> {
        non_empty(self.end.as_deref())
    }

    pub fn regex_source(&self) -> Option<&str> {
        non_empty(self.regex.as_deref())
    }

    /// Multi-line block markers are matched line by line by the AST builder
    /// and never get an inline parser.
    pub fn generates_inline(&self) -> bool {
        !(self.is_block && self.kind != MarkerKind::Inline)
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn lenient_number(value: serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn lenient_priority<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_number(value).unwrap_or(0.0))
}

fn lenient_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_number(value))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InlineNode {
    Text { content: String },
    Direction { content: String },
    Sfx { content: String },
    Highlight { id: String, content: String },
}

impl InlineNode {
    pub fn text(t: impl Into<String>) -> Self {
        InlineNode::Text { content: t.into() }
    }

    pub fn content(&self) -> &str {
        match self {
            InlineNode::Text { content }
            | InlineNode::Direction { content }
            | InlineNode::Sfx { content }
            | InlineNode::Highlight { content, .. } => content,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TitleEntry {
    pub key: String,
    pub indent: usize,
    pub values: Vec<String>,
}

impl TitleEntry {
    pub fn value(&self) -> String {
        self.values.join("\n")
    }
}

pub fn find_title_entry<'a>(entries: &'a [TitleEntry], key: &str) -> Option<&'a TitleEntry> {
    entries
        .iter()
        .find(|entry| entry.key.trim().eq_ignore_ascii_case(key.trim()))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Scene {
    pub id: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_config_decodes_leniently() {
        let json = r#"[
            {"id": "sound", "label": "SFX", "start": "{{", "end": "}}", "isBlock": true, "type": "block"},
            {"id": "pause", "matchMode": "regex", "regex": "\\?(\\d+)s", "priority": "2", "fixedDuration": "1.5"},
            {"id": "odd", "type": "range", "matchMode": "something-else", "priority": null, "end": ""}
        ]"#;
        let markers = MarkerConfig::list_from_json(json).unwrap();
        assert_eq!(markers.len(), 3);

        assert_eq!(markers[0].kind, MarkerKind::Block);
        assert!(markers[0].is_block);
        assert!(!markers[0].generates_inline());

        assert_eq!(markers[1].match_mode, MatchMode::Regex);
        assert_eq!(markers[1].priority, 2.0);
        assert_eq!(markers[1].fixed_duration, Some(1.5));
        assert!(markers[1].generates_inline());

        assert_eq!(markers[2].kind, MarkerKind::Block);
        assert_eq!(markers[2].match_mode, MatchMode::Enclosure);
        assert_eq!(markers[2].priority, 0.0);
        assert_eq!(markers[2].end(), None);
    }

    #[test]
    fn invalid_marker_json_is_reported() {
        let err = MarkerConfig::list_from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::InvalidMarkers(_)));
        assert!(MarkerConfig::list_from_json("  ").unwrap().is_empty());
    }

    #[test]
    fn inline_nodes_serialize_with_type_tag() {
        let node = InlineNode::Highlight {
            id: "italic".to_string(),
            content: "world".to_string(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "highlight", "id": "italic", "content": "world"})
        );
    }

    #[test]
    fn title_lookup_ignores_case() {
        let entries = vec![TitleEntry {
            key: "Title".to_string(),
            indent: 0,
            values: vec!["Night Shift".to_string(), "Part 2".to_string()],
        }];
        let entry = find_title_entry(&entries, "TITLE").unwrap();
        assert_eq!(entry.value(), "Night Shift\nPart 2");
        assert!(find_title_entry(&entries, "note").is_none());
    }
}
