use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::ast::{Node, NodeKind};
use crate::compiler::build_script_ast;
use crate::parser::{FountainLexer, TokenSource};
use crate::types::{find_title_entry, MarkerConfig, Scene, TitleEntry};

static TITLE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[^:]+:").unwrap());
static TITLE_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*)([^:]+):(.*)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleSplit {
    pub title_lines: Vec<String>,
    pub body_text: String,
    /// 1-based line of the body's first line in the full text.
    pub body_start_line: usize,
}

/// Separates a `Key: value` title page from the script body. The header
/// runs up to the first blank line; without one the whole text is header.
pub fn split_title_and_body(text: &str) -> TitleSplit {
    if text.is_empty() {
        return TitleSplit {
            title_lines: Vec::new(),
            body_text: String::new(),
            body_start_line: 1,
        };
    }

    let lines: Vec<&str> = text.split('\n').collect();
    if !TITLE_START.is_match(lines[0]) {
        return TitleSplit {
            title_lines: Vec::new(),
            body_text: text.to_string(),
            body_start_line: 1,
        };
    }

    match lines.iter().position(|line| line.trim().is_empty()) {
        None => TitleSplit {
            title_lines: lines.iter().map(|l| l.to_string()).collect(),
            body_text: String::new(),
            body_start_line: lines.len() + 1,
        },
        Some(blank) => TitleSplit {
            title_lines: lines[..blank].iter().map(|l| l.to_string()).collect(),
            body_text: lines[blank + 1..].join("\n"),
            body_start_line: blank + 2,
        },
    }
}

pub fn extract_title_entries<S: AsRef<str>>(lines: &[S]) -> Vec<TitleEntry> {
    let mut entries: Vec<TitleEntry> = Vec::new();
    for raw in lines {
        let raw = raw.as_ref();
        if let Some(caps) = TITLE_FIELD.captures(raw) {
            let value = caps[3].trim();
            entries.push(TitleEntry {
                key: caps[2].trim().to_string(),
                indent: caps[1].chars().count(),
                values: if value.is_empty() {
                    Vec::new()
                } else {
                    vec![value.to_string()]
                },
            });
        } else if let Some(current) = entries.last_mut() {
            let continuation = raw.trim();
            if !continuation.is_empty() {
                current.values.push(continuation.to_string());
            }
        }
    }
    entries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenplay {
    pub title_lines: Vec<String>,
    pub title_entries: Vec<TitleEntry>,
    pub ast: Node,
    pub scenes: Vec<Scene>,
}

impl Screenplay {
    fn field(&self, key: &str) -> Option<String> {
        find_title_entry(&self.title_entries, key).map(TitleEntry::value)
    }

    pub fn title(&self) -> Option<String> {
        self.field("title")
    }

    pub fn summary(&self) -> Option<String> {
        self.field("summary")
    }

    pub fn note(&self) -> Option<String> {
        self.field("note")
    }
}

pub fn scenes_of(ast: &Node) -> Vec<Scene> {
    ast.children
        .iter()
        .filter_map(|node| match &node.kind {
            NodeKind::SceneHeading { id, text, .. } => Some(Scene {
                id: id.clone(),
                label: text.clone(),
            }),
            _ => None,
        })
        .collect()
}

pub fn parse_screenplay(text: &str, configs: &[MarkerConfig]) -> Screenplay {
    parse_screenplay_with(text, configs, &FountainLexer)
}

/// Full pipeline with a caller-supplied tokenizer for the body.
pub fn parse_screenplay_with(text: &str, configs: &[MarkerConfig], source: &dyn TokenSource) -> Screenplay {
    let split = split_title_and_body(text);
    let tokens = source.tokenize(&split.body_text, split.body_start_line);
    let ast = build_script_ast(&tokens, configs);
    let scenes = scenes_of(&ast);

    Screenplay {
        title_entries: extract_title_entries(&split.title_lines),
        title_lines: split.title_lines,
        ast,
        scenes,
    }
}
