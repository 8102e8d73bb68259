use std::cmp::Ordering;

use log::{error, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use winnow::{
    combinator::{alt, delimited, preceded, repeat, terminated},
    error::{ContextError, ErrMode, ModalResult},
    stream::Stream,
    token::{any, literal, take_till, take_until},
    Parser,
};

use crate::types::{InlineNode, MarkerConfig, MatchMode};

static SFX_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^sfx[:：]\s*").unwrap());

enum Rule {
    Regex { id: String, pattern: Regex },
    Prefix { id: String, start: String },
    Enclosure { id: String, start: String, end: String },
}

impl Rule {
    fn compile(config: &MarkerConfig, position: usize) -> Option<Rule> {
        if !config.generates_inline() {
            return None;
        }
        let id = if config.id.is_empty() {
            format!("custom-{position}")
        } else {
            config.id.clone()
        };

        if config.match_mode == MatchMode::Regex {
            let Some(source) = config.regex_source() else {
                warn!("marker {id} uses regex mode without a regex; skipped");
                return None;
            };
            // Anchor at the cursor so the rule only claims input where it stands.
            return match Regex::new(&format!("^(?:{source})")) {
                Ok(pattern) => Some(Rule::Regex { id, pattern }),
                Err(err) => {
                    warn!("invalid regex for marker {}: {err}", config.display_label());
                    None
                }
            };
        }

        if config.match_mode == MatchMode::Prefix || (config.end().is_none() && config.start().is_some()) {
            let Some(start) = config.start() else {
                warn!("prefix marker {id} has no start delimiter; skipped");
                return None;
            };
            return Some(Rule::Prefix {
                id,
                start: start.to_string(),
            });
        }

        Some(Rule::Enclosure {
            id,
            start: config.start().unwrap_or("{").to_string(),
            end: config.end().unwrap_or("}").to_string(),
        })
    }

    fn parse_next(&self, input: &mut &str) -> ModalResult<InlineNode> {
        match self {
            Rule::Regex { id, pattern } => {
                regex_content(input, pattern).map(|content| highlight(id, content))
            }
            Rule::Prefix { id, start } => preceded(literal(start.as_str()), take_till(0.., '\n'))
                .map(|rest: &str| highlight(id, rest.trim()))
                .parse_next(input),
            Rule::Enclosure { id, start, end } => preceded(
                literal(start.as_str()),
                terminated(take_until(0.., end.as_str()), literal(end.as_str())),
            )
            .verify(|content: &str| !content.contains('\n'))
            .map(|content: &str| highlight(id, content.trim()))
            .parse_next(input),
        }
    }
}

fn highlight(id: &str, content: impl Into<String>) -> InlineNode {
    InlineNode::Highlight {
        id: id.to_string(),
        content: content.into(),
    }
}

fn backtrack() -> ErrMode<ContextError> {
    ErrMode::Backtrack(ContextError::new())
}

fn regex_content(input: &mut &str, pattern: &Regex) -> ModalResult<String> {
    let Some(caps) = pattern.captures(*input) else {
        return Err(backtrack());
    };
    let Some(whole) = caps.get(0) else {
        return Err(backtrack());
    };
    // An empty match would never advance the cursor.
    if whole.end() == 0 {
        return Err(backtrack());
    }
    let content = caps.get(1).map_or(whole.as_str(), |m| m.as_str()).to_string();
    *input = &input[whole.end()..];
    Ok(content)
}

// `[door opens]` or `[SFX: door slams]`
fn direction(input: &mut &str) -> ModalResult<InlineNode> {
    delimited('[', take_till(1.., ']'), ']')
        .map(|content: &str| match SFX_PREFIX.find(content) {
            Some(prefix) => InlineNode::Sfx {
                content: content[prefix.end()..].trim().to_string(),
            },
            None => InlineNode::Direction {
                content: content.trim().to_string(),
            },
        })
        .parse_next(input)
}

/// First character every match of `source` must begin with, when the
/// pattern opens with a plain literal (`##(\w+)` gives `#`).
fn literal_lead(source: &str) -> Option<char> {
    let mut chars = source.chars();
    let first = chars.next()?;
    if first.is_whitespace() || r"\.+*?()|[]{}^$".contains(first) || source.contains('|') {
        return None;
    }
    // `a?` or `a*` may match without the literal
    match chars.next() {
        Some('?' | '*' | '{') => None,
        _ => Some(first),
    }
}

fn by_priority(a: &MarkerConfig, b: &MarkerConfig) -> Ordering {
    b.priority.total_cmp(&a.priority).then_with(|| {
        let a_regex = a.match_mode == MatchMode::Regex;
        let b_regex = b.match_mode == MatchMode::Regex;
        b_regex.cmp(&a_regex)
    })
}

/// Marker-aware splitter for a single string. Rules are compiled once from
/// the marker list and tried in priority order at every position.
pub struct InlineParser {
    rules: Vec<Rule>,
    text_stops: Vec<char>,
}

impl InlineParser {
    pub fn new(configs: &[MarkerConfig]) -> Self {
        let mut ordered: Vec<(usize, &MarkerConfig)> = configs.iter().enumerate().collect();
        ordered.sort_by(|(_, a), (_, b)| by_priority(a, b));
        let rules = ordered
            .into_iter()
            .filter_map(|(position, config)| Rule::compile(config, position))
            .collect();

        let mut text_stops = vec!['['];
        for config in configs.iter().filter(|c| c.generates_inline()) {
            let first = match config.match_mode {
                MatchMode::Regex => config.regex_source().and_then(literal_lead),
                _ => config.start().and_then(|s| s.chars().next()),
            };
            if let Some(first) = first {
                if !text_stops.contains(&first) {
                    text_stops.push(first);
                }
            }
        }

        Self { rules, text_stops }
    }

    pub fn parse(&self, text: &str) -> Vec<InlineNode> {
        if text.is_empty() {
            return Vec::new();
        }
        let result: Result<Vec<InlineNode>, _> =
            repeat(0.., |input: &mut &str| self.node(input)).parse(text);
        match result {
            Ok(nodes) => merge_text_nodes(nodes),
            Err(err) => {
                error!("inline parse failed, keeping text verbatim: {err:?}");
                vec![InlineNode::text(text)]
            }
        }
    }

    fn node(&self, input: &mut &str) -> ModalResult<InlineNode> {
        for rule in &self.rules {
            let checkpoint = input.checkpoint();
            match rule.parse_next(input) {
                Ok(node) => return Ok(node),
                Err(ErrMode::Backtrack(_)) => input.reset(&checkpoint),
                Err(err) => return Err(err),
            }
        }

        alt((
            direction,
            |input: &mut &str| self.text_run(input),
            // a stop character that opened nothing is still plain text
            any.map(|c: char| InlineNode::text(c.to_string())),
        ))
        .parse_next(input)
    }

    fn text_run(&self, input: &mut &str) -> ModalResult<InlineNode> {
        take_till(1.., |c: char| self.text_stops.contains(&c))
            .map(InlineNode::text)
            .parse_next(input)
    }
}

pub fn parse_inline(text: &str, configs: &[MarkerConfig]) -> Vec<InlineNode> {
    InlineParser::new(configs).parse(text)
}

pub fn merge_text_nodes(nodes: Vec<InlineNode>) -> Vec<InlineNode> {
    let mut merged: Vec<InlineNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let (InlineNode::Text { content: next }, Some(InlineNode::Text { content })) =
            (&node, merged.last_mut())
        {
            content.push_str(next);
            continue;
        }
        merged.push(node);
    }
    merged
}
