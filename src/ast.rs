use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{InlineNode, MarkerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    SceneHeading,
    Action,
    Character,
    Dialogue,
    Parenthetical,
    Transition,
    Centered,
    Unknown, // anything else a token source emits; skipped by the builder
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::SceneHeading => "scene_heading",
            TokenKind::Action => "action",
            TokenKind::Character => "character",
            TokenKind::Dialogue => "dialogue",
            TokenKind::Parenthetical => "parenthetical",
            TokenKind::Transition => "transition",
            TokenKind::Centered => "centered",
            TokenKind::Unknown => "unknown",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "scene_heading" => TokenKind::SceneHeading,
            "action" => TokenKind::Action,
            "character" => TokenKind::Character,
            "dialogue" => TokenKind::Dialogue,
            "parenthetical" => TokenKind::Parenthetical,
            "transition" => TokenKind::Transition,
            "centered" => TokenKind::Centered,
            _ => TokenKind::Unknown,
        }
    }
}

impl Serialize for TokenKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TokenKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(TokenKind::from_name(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            line_start: None,
            line_end: None,
        }
    }

    pub fn with_lines(mut self, start: usize, end: usize) -> Self {
        self.line_start = Some(start);
        self.line_end = Some(end);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitespaceKind {
    Long,
    Mid,
    Short,
    Pure,
}

impl WhitespaceKind {
    /// Recognises a gap directive line, optionally wrapped in half- or
    /// full-width parentheses: `長留白`, `（中留白）`, `(留白)`.
    pub fn from_directive(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let inner = trimmed
            .strip_prefix(['(', '（'])
            .map(str::trim_start)
            .unwrap_or(trimmed);
        let inner = inner
            .strip_suffix([')', '）'])
            .map(str::trim_end)
            .unwrap_or(inner);
        match inner {
            "長留白" => Some(WhitespaceKind::Long),
            "中留白" => Some(WhitespaceKind::Mid),
            "短留白" => Some(WhitespaceKind::Short),
            "留白" => Some(WhitespaceKind::Pure),
            _ => None,
        }
    }
}

/// Text-bearing leaf payload. `inline` is the marker-aware split of `text`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    #[serde(default)]
    pub inline: Vec<InlineNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, inline: Vec<InlineNode>) -> Self {
        Self {
            text: text.into(),
            inline,
            line_start: None,
            line_end: None,
        }
    }

    pub fn verbatim(text: impl Into<String>) -> Self {
        let text = text.into();
        let inline = vec![InlineNode::text(text.clone())];
        Self::new(text, inline)
    }

    pub fn at_lines(mut self, start: Option<usize>, end: Option<usize>) -> Self {
        self.line_start = start;
        self.line_end = end;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    #[serde(rename_all = "camelCase")]
    SceneHeading {
        id: String,
        text: String,
        #[serde(default)]
        inline: Vec<InlineNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_start: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_end: Option<usize>,
    },
    Action(TextBlock),
    Character(TextBlock), // leading child of a speech
    Dialogue(TextBlock),
    Parenthetical(TextBlock),
    Transition(TextBlock),
    Centered(TextBlock),
    Speech {
        character: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dual: bool,
    },
    Whitespace {
        kind: WhitespaceKind,
    },
    #[serde(rename_all = "camelCase")]
    Layer {
        layer_type: String,
        #[serde(default)]
        marker_type: MarkerKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_start: Option<usize>,
    },
    DualDialogue,
}

/// One node of the script tree. Containers (`root`, `speech`, `layer`,
/// `dual_dialogue`) own their children; leaves keep `children` empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::new(NodeKind::Root)
    }

    pub fn with_children(kind: NodeKind, children: Vec<Node>) -> Self {
        Self { kind, children }
    }

    pub fn action(block: TextBlock) -> Self {
        Self::new(NodeKind::Action(block))
    }

    pub fn speech(character: impl Into<String>, dual: bool) -> Self {
        Self::new(NodeKind::Speech {
            character: character.into(),
            dual,
        })
    }

    pub fn layer(layer_type: impl Into<String>, marker_type: MarkerKind, label: Option<String>) -> Self {
        Self::new(NodeKind::Layer {
            layer_type: layer_type.into(),
            marker_type,
            label,
            end_label: None,
            line_start: None,
        })
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        if let NodeKind::Layer { line_start, .. } = &mut self.kind {
            *line_start = line;
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Root => "root",
            NodeKind::SceneHeading { .. } => "scene_heading",
            NodeKind::Action(_) => "action",
            NodeKind::Character(_) => "character",
            NodeKind::Dialogue(_) => "dialogue",
            NodeKind::Parenthetical(_) => "parenthetical",
            NodeKind::Transition(_) => "transition",
            NodeKind::Centered(_) => "centered",
            NodeKind::Speech { .. } => "speech",
            NodeKind::Whitespace { .. } => "whitespace",
            NodeKind::Layer { .. } => "layer",
            NodeKind::DualDialogue => "dual_dialogue",
        }
    }

    pub fn block(&self) -> Option<&TextBlock> {
        match &self.kind {
            NodeKind::Action(b)
            | NodeKind::Character(b)
            | NodeKind::Dialogue(b)
            | NodeKind::Parenthetical(b)
            | NodeKind::Transition(b)
            | NodeKind::Centered(b) => Some(b),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::SceneHeading { text, .. } => Some(text),
            _ => self.block().map(|b| b.text.as_str()),
        }
    }

    pub fn inline(&self) -> &[InlineNode] {
        match &self.kind {
            NodeKind::SceneHeading { inline, .. } => inline,
            _ => self.block().map(|b| b.inline.as_slice()).unwrap_or(&[]),
        }
    }

    pub fn line_start(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::SceneHeading { line_start, .. } | NodeKind::Layer { line_start, .. } => {
                *line_start
            }
            _ => self.block().and_then(|b| b.line_start),
        }
    }

    pub fn layer_type(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Layer { layer_type, .. } => Some(layer_type),
            _ => None,
        }
    }

    pub fn is_speech(&self) -> bool {
        matches!(self.kind, NodeKind::Speech { .. })
    }

    pub fn is_dual_layer(&self) -> bool {
        matches!(
            &self.kind,
            NodeKind::Layer { layer_type, marker_type, .. }
                if *marker_type == MarkerKind::Dual || layer_type == "dual"
        )
    }

    /// Whitespace gaps and blank action lines, which neighbour lookups skip.
    pub fn is_filler(&self) -> bool {
        match &self.kind {
            NodeKind::Whitespace { .. } => true,
            NodeKind::Action(b) => b.text.trim().is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_directives() {
        assert_eq!(WhitespaceKind::from_directive("長留白"), Some(WhitespaceKind::Long));
        assert_eq!(WhitespaceKind::from_directive(" （中留白） "), Some(WhitespaceKind::Mid));
        assert_eq!(WhitespaceKind::from_directive("(短留白)"), Some(WhitespaceKind::Short));
        assert_eq!(WhitespaceKind::from_directive("( 留白 )"), Some(WhitespaceKind::Pure));
        assert_eq!(WhitespaceKind::from_directive("留白了"), None);
        assert_eq!(WhitespaceKind::from_directive(""), None);
    }

    #[test]
    fn unknown_token_kinds_decode() {
        let tokens: Vec<Token> = serde_json::from_str(
            r#"[{"type": "page_break"}, {"type": "action", "text": "Rain.", "lineStart": 3, "lineEnd": 3}]"#,
        )
        .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[1], Token::new(TokenKind::Action, "Rain.").with_lines(3, 3));
    }

    #[test]
    fn node_json_shape() {
        let mut layer = Node::layer("dual", MarkerKind::Dual, Some("A".to_string()));
        layer
            .children
            .push(Node::action(TextBlock::verbatim("Hello").at_lines(Some(2), Some(2))));
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "layer",
                "layerType": "dual",
                "markerType": "dual",
                "label": "A",
                "children": [{
                    "type": "action",
                    "text": "Hello",
                    "inline": [{"type": "text", "content": "Hello"}],
                    "lineStart": 2,
                    "lineEnd": 2
                }]
            })
        );
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, layer);
        assert!(back.is_dual_layer());
    }
}
