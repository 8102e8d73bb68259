pub mod duration;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::ast::{Node, NodeKind};
use crate::error::{Error, Result};
use crate::title::parse_screenplay;
use crate::types::{InlineNode, MarkerConfig};
use duration::{default_units, DurationParser, DurationUnit};

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{P}\p{S}]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordCountMode {
    /// dialogue only
    Pure,
    #[default]
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsOptions {
    #[serde(deserialize_with = "positive_or_default")]
    pub word_count_divisor: f64,
    pub word_count_mode: WordCountMode,
    pub exclude_nested_duration: bool,
    pub exclude_punctuation: bool,
    pub custom_keywords: Vec<DurationUnit>,
}

const DEFAULT_DIVISOR: f64 = 200.0;

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            word_count_divisor: DEFAULT_DIVISOR,
            word_count_mode: WordCountMode::All,
            exclude_nested_duration: false,
            exclude_punctuation: false,
            custom_keywords: Vec::new(),
        }
    }
}

impl StatsOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(Error::InvalidOptions)
    }

    fn duration_units(&self) -> Vec<DurationUnit> {
        if self.custom_keywords.is_empty() {
            default_units()
        } else {
            self.custom_keywords.clone()
        }
    }
}

fn positive_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(DEFAULT_DIVISOR))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub scenes: usize,
    pub nodes: usize,
    pub dialogue_lines: usize,
    pub dialogue_chars: usize,
    pub action_chars: usize,
    pub total_chars: usize,
    pub cues: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sentences {
    pub dialogue: IndexMap<String, Vec<String>>,
    pub action: Vec<String>,
    pub scene_headings: Vec<String>,
    pub sfx: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterStat {
    pub name: String,
    pub count: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct TimeframeDistribution {
    pub int: usize,
    pub ext: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceKind {
    Block,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerOccurrence {
    pub text: String,
    pub line: Option<usize>,
    pub kind: OccurrenceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerTally {
    pub id: String,
    pub label: String,
    pub count: usize,
    pub items: Vec<MarkerOccurrence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Estimates {
    pub pure: f64,
    pub all: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResult {
    pub counts: Counts,
    pub locations: Vec<String>,
    pub sentences: Sentences,
    pub character_stats: Vec<CharacterStat>,
    pub timeframe_distribution: TimeframeDistribution,
    pub markers: IndexMap<String, MarkerTally>,
    pub dialogue_ratio: u32,
    pub action_ratio: u32,
    pub custom_duration_seconds: f64,
    pub duration_minutes: f64,
    pub estimates: Estimates,
}

/// `MARY (V.O.)` and `MARY（畫外音）` both tally as `MARY`.
fn base_name(name: &str) -> String {
    let mut out = name.trim();
    if out.ends_with([')', '）']) {
        if let Some(idx) = out.rfind(['(', '（']) {
            out = &out[..idx];
        }
    }
    let out = out.trim();
    if out.is_empty() {
        "UNKNOWN".to_string()
    } else {
        out.to_string()
    }
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        (part as f64 / total as f64 * 100.0).round() as u32
    }
}

fn recursive_text(node: &Node) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(text) = node.text() {
        parts.push(text.trim().to_string());
    }
    for child in &node.children {
        parts.push(recursive_text(child));
    }
    parts.retain(|p| !p.is_empty());
    parts.join("\n")
}

struct Analyzer<'a> {
    configs: &'a [MarkerConfig],
    options: &'a StatsOptions,
    durations: DurationParser,
    result: StatsResult,
    // per open layer: whether it already accounts for its children's time
    overrides: Vec<bool>,
    speech_depth: usize,
}

impl<'a> Analyzer<'a> {
    fn new(configs: &'a [MarkerConfig], options: &'a StatsOptions) -> Self {
        Self {
            configs,
            options,
            durations: DurationParser::new(options.duration_units()),
            result: StatsResult::default(),
            overrides: Vec::new(),
            speech_depth: 0,
        }
    }

    fn char_count(&self, text: &str) -> usize {
        if self.options.exclude_punctuation {
            PUNCTUATION
                .replace_all(text, "")
                .chars()
                .filter(|c| !c.is_whitespace())
                .count()
        } else {
            text.chars().filter(|c| !c.is_whitespace()).count()
        }
    }

    fn config(&self, id: &str) -> Option<&'a MarkerConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    fn add_duration(&mut self, seconds: f64) {
        if seconds == 0.0 {
            return;
        }
        if self.options.exclude_nested_duration && self.overrides.last() == Some(&true) {
            return;
        }
        self.result.custom_duration_seconds += seconds;
    }

    fn record(&mut self, id: &str, text: String, line: Option<usize>, kind: OccurrenceKind) {
        let label = self
            .config(id)
            .map(|c| c.display_label().to_string())
            .unwrap_or_else(|| id.to_string());
        let tally = self
            .result
            .markers
            .entry(id.to_string())
            .or_insert_with(|| MarkerTally {
                id: id.to_string(),
                label,
                count: 0,
                items: Vec::new(),
            });
        tally.count += 1;
        tally.items.push(MarkerOccurrence { text, line, kind });
    }

    fn count_dialogue(&mut self, text: &str) {
        let len = self.char_count(text);
        self.result.counts.dialogue_lines += 1;
        self.result.counts.dialogue_chars += len;
        self.result.counts.total_chars += len;
    }

    fn visit(&mut self, node: &Node) {
        self.result.counts.nodes += 1;
        let mut opened_layer = false;

        match &node.kind {
            NodeKind::SceneHeading { text, .. } => self.visit_scene_heading(text.trim()),
            NodeKind::Action(block) => {
                let text = block.text.trim();
                if !text.is_empty() {
                    let len = self.char_count(text);
                    self.result.counts.action_chars += len;
                    self.result.counts.total_chars += len;
                    self.result.sentences.action.push(text.to_string());
                }
            }
            NodeKind::Speech { character, .. } => {
                let spoken = node
                    .children
                    .iter()
                    .filter(|c| matches!(c.kind, NodeKind::Dialogue(_)))
                    .filter_map(Node::text)
                    .collect::<Vec<_>>()
                    .join(" ");
                let spoken = spoken.trim();
                if !spoken.is_empty() {
                    self.count_dialogue(spoken);
                    self.result
                        .sentences
                        .dialogue
                        .entry(base_name(character))
                        .or_default()
                        .push(spoken.to_string());
                }
            }
            NodeKind::Dialogue(block) if self.speech_depth == 0 => {
                let text = block.text.trim();
                if !text.is_empty() {
                    self.count_dialogue(text);
                }
            }
            NodeKind::Layer {
                layer_type, label, ..
            } => {
                self.visit_layer(node, layer_type, label.as_deref());
                opened_layer = true;
            }
            _ => {}
        }

        self.visit_inline(node);

        let is_speech = node.is_speech();
        if is_speech {
            self.speech_depth += 1;
        }
        for child in &node.children {
            self.visit(child);
        }
        if is_speech {
            self.speech_depth -= 1;
        }
        if opened_layer {
            self.overrides.pop();
        }
    }

    fn visit_scene_heading(&mut self, text: &str) {
        self.result.counts.scenes += 1;
        self.result.locations.push(text.to_string());
        self.result.sentences.scene_headings.push(text.to_string());

        let upper = text.to_uppercase();
        let timeframe = &mut self.result.timeframe_distribution;
        if upper.starts_with("INT") || upper.starts_with("I/E") {
            timeframe.int += 1;
        } else if upper.starts_with("EXT") {
            timeframe.ext += 1;
        } else {
            timeframe.other += 1;
        }

        let len = self.char_count(text);
        self.result.counts.total_chars += len;
    }

    fn visit_layer(&mut self, node: &Node, layer_type: &str, label: Option<&str>) {
        let content = [label.unwrap_or("").trim().to_string(), recursive_text(node)]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut own = 0.0;
        if !content.is_empty() {
            own += self.durations.parse(&content);
            self.record(layer_type, content, node.line_start(), OccurrenceKind::Block);
        }
        own += self.config(layer_type).and_then(|c| c.fixed_duration).unwrap_or(0.0);

        self.add_duration(own);
        self.overrides.push(own > 0.0);
    }

    fn visit_inline(&mut self, node: &Node) {
        for item in node.inline() {
            match item {
                InlineNode::Highlight { id, content } => {
                    self.record(id, content.clone(), node.line_start(), OccurrenceKind::Inline);
                    let fixed = self.config(id).and_then(|c| c.fixed_duration).unwrap_or(0.0);
                    let seconds = self.durations.parse(content) + fixed;
                    self.add_duration(seconds);
                }
                InlineNode::Sfx { content } => {
                    self.result.sentences.sfx.push(content.clone());
                    let seconds = self.durations.parse(content);
                    self.add_duration(seconds);
                }
                InlineNode::Text { .. } | InlineNode::Direction { .. } => {}
            }
        }
    }

    fn finish(mut self) -> StatsResult {
        let mut result = std::mem::take(&mut self.result);

        let total_lines: usize = result.sentences.dialogue.values().map(Vec::len).sum();
        let mut character_stats: Vec<CharacterStat> = result
            .sentences
            .dialogue
            .iter()
            .map(|(name, lines)| CharacterStat {
                name: name.clone(),
                count: lines.len(),
                percentage: percent(lines.len(), total_lines),
            })
            .collect();
        character_stats.sort_by(|a, b| b.count.cmp(&a.count));
        result.character_stats = character_stats;

        result.counts.cues = result.markers.values().map(|m| m.items.len()).sum();

        let counts = &result.counts;
        let spoken_and_read = counts.dialogue_chars + counts.action_chars;
        result.dialogue_ratio = percent(counts.dialogue_chars, spoken_and_read);
        result.action_ratio = percent(counts.action_chars, spoken_and_read);

        let divisor = self.options.word_count_divisor;
        let custom_minutes = result.custom_duration_seconds / 60.0;
        result.estimates = Estimates {
            pure: counts.dialogue_chars as f64 / divisor + custom_minutes,
            all: spoken_and_read as f64 / divisor + custom_minutes,
        };
        result.duration_minutes = match self.options.word_count_mode {
            WordCountMode::Pure => result.estimates.pure,
            WordCountMode::All => result.estimates.all,
        };

        result
    }
}

/// Walks a built script tree and aggregates counts, tallies and the
/// estimated runtime.
pub fn calculate_script_stats(ast: &Node, configs: &[MarkerConfig], options: &StatsOptions) -> StatsResult {
    let mut analyzer = Analyzer::new(configs, options);
    for node in &ast.children {
        analyzer.visit(node);
    }
    analyzer.finish()
}

pub fn calculate_script_stats_from_text(text: &str, configs: &[MarkerConfig], options: &StatsOptions) -> StatsResult {
    let play = parse_screenplay(text, configs);
    calculate_script_stats(&play.ast, configs, options)
}
