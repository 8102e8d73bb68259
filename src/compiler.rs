use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{Node, NodeKind, TextBlock, Token, TokenKind, WhitespaceKind};
use crate::dual::process_dual_layers;
use crate::inline::InlineParser;
use crate::types::{MarkerConfig, MarkerKind, MatchMode};

static CJK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{4e00}-\x{9fff}\x{3400}-\x{4dbf}]").unwrap());
static TRAILING_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[。，、；：？！.!?,;:]$").unwrap());

/// A block marker compiled into line regexes.
struct BlockMarker {
    id: String,
    kind: MarkerKind,
    start: Option<String>,
    end: Option<String>,
    smart_toggle: bool,
    enclosure: Option<Regex>,
    start_re: Option<Regex>,
    end_re: Option<Regex>,
}

enum LineMatch {
    Enclosure { marker: usize, content: String },
    Delimiter { marker: usize, is_start: bool, is_end: bool },
    Prefix { marker: usize, label: String },
}

// `INT` must not match inside `INTERIOR`; `<b>text` may follow a symbol directly.
fn boundary(delimiter: &str) -> &'static str {
    match delimiter.chars().last() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => r"(?:\s.*)?",
        _ => r"(?:.*)?",
    }
}

fn compile_regex(source: &str, config: &MarkerConfig) -> Option<Regex> {
    match Regex::new(source) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!("invalid block regex for marker {}: {err}", config.display_label());
            None
        }
    }
}

impl BlockMarker {
    fn compile(config: &MarkerConfig) -> Option<Self> {
        let mut marker = BlockMarker {
            id: config.id.clone(),
            kind: config.kind,
            start: config.start().map(str::to_string),
            end: config.end().map(str::to_string),
            smart_toggle: config.smart_toggle,
            enclosure: None,
            start_re: None,
            end_re: None,
        };

        if config.match_mode == MatchMode::Regex {
            if let Some(source) = config.regex_source() {
                marker.enclosure = Some(compile_regex(source, config)?);
                return Some(marker);
            }
        }

        let Some(start) = config.start() else {
            warn!("block marker {} has no start delimiter; skipped", config.display_label());
            return None;
        };
        let escaped_start = regex::escape(start);
        marker.start_re = Some(compile_regex(
            &format!("^{escaped_start}{}$", boundary(start)),
            config,
        )?);

        if let Some(end) = config.end() {
            let escaped_end = regex::escape(end);
            marker.enclosure = Some(compile_regex(
                &format!(r"^{escaped_start}\s*(.+?)\s*{escaped_end}$"),
                config,
            )?);
            marker.end_re = Some(compile_regex(
                &format!("^{escaped_end}{}$", boundary(end)),
                config,
            )?);
        }

        Some(marker)
    }

    fn compile_all(configs: &[MarkerConfig]) -> Vec<BlockMarker> {
        let mut block_configs: Vec<&MarkerConfig> = configs.iter().filter(|c| c.is_block).collect();
        block_configs.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        block_configs.into_iter().filter_map(BlockMarker::compile).collect()
    }

    fn is_prefix_only(&self) -> bool {
        self.end.is_none() && self.enclosure.is_none()
    }

    fn matches_line(&self, text: &str) -> bool {
        [&self.start_re, &self.end_re, &self.enclosure]
            .into_iter()
            .flatten()
            .any(|re| re.is_match(text))
    }

    fn strip_start<'t>(&self, text: &'t str) -> &'t str {
        let len = self.start.as_deref().map_or(0, str::len);
        text.get(len..).unwrap_or("").trim()
    }

    fn strip_end<'t>(&self, text: &'t str) -> &'t str {
        let len = self.end.as_deref().map_or(0, str::len);
        text.get(len..).unwrap_or("").trim()
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

pub fn slugify_scene(text: &str, idx: usize) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .filter(|c| {
            c.is_ascii_lowercase()
                || c.is_ascii_digit()
                || ('\u{4e00}'..='\u{9fa5}').contains(c)
                || c.is_whitespace()
                || *c == '-'
        })
        .collect();

    let mut slug = String::with_capacity(kept.len());
    for c in kept.trim().chars() {
        let c = if c.is_whitespace() { '-' } else { c };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }

    if slug.is_empty() {
        format!("scene-{}", idx + 1)
    } else {
        slug
    }
}

fn is_short_cjk_name(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() <= 6
        && CJK.is_match(text)
        && !TRAILING_PUNCTUATION.is_match(text)
        && !text.contains('\n')
}

/// Retypes tokens the Fountain grammar gets wrong in practice: delimiter
/// lines, `@` cues, bare CJK names, and the dialogue that follows them.
fn normalize_tokens(tokens: &[Token], markers: &[BlockMarker]) -> Vec<Token> {
    let mut forcing_dialogue = false;
    let mut normalized = Vec::with_capacity(tokens.len());

    for token in tokens {
        let mut token = token.clone();
        let text = token.text.trim().to_string();

        let is_marker = !text.is_empty() && markers.iter().any(|m| m.matches_line(&text));
        if is_marker {
            token.kind = TokenKind::Action;
        }
        let exempt = is_marker || WhitespaceKind::from_directive(&text).is_some();
        let is_action = token.kind == TokenKind::Action;

        if !exempt && text.contains("音聲") {
            token.kind = TokenKind::Character;
            forcing_dialogue = true;
        } else if is_action && text.starts_with('@') {
            token.kind = TokenKind::Character;
            token.text = text[1..].trim().to_string();
            forcing_dialogue = true;
        } else if is_action && !exempt && is_short_cjk_name(&text) {
            token.kind = TokenKind::Character;
            forcing_dialogue = true;
        } else if forcing_dialogue && is_action && !text.is_empty() && !exempt {
            token.kind = TokenKind::Dialogue;
        } else if matches!(
            token.kind,
            TokenKind::Character | TokenKind::SceneHeading | TokenKind::Transition
        ) || (is_action && text.is_empty())
        {
            forcing_dialogue = false;
        }

        normalized.push(token);
    }

    normalized
}

#[derive(Default)]
struct ActionBuffer<'t> {
    lines: Vec<&'t str>,
    start: Option<usize>,
    end: Option<usize>,
}

impl<'t> ActionBuffer<'t> {
    fn push(&mut self, line: &'t str, line_no: Option<usize>) {
        if self.lines.is_empty() {
            self.start = line_no;
        }
        self.end = line_no;
        self.lines.push(line);
    }
}

struct TreeBuilder<'a> {
    root: Node,
    // open containers as child-index paths from the root; empty path = root
    stack: Vec<Vec<usize>>,
    slugs: HashMap<String, usize>,
    issued: HashSet<String>,
    scene_idx: usize,
    inline: InlineParser,
    markers: &'a [BlockMarker],
}

impl<'a> TreeBuilder<'a> {
    fn new(configs: &[MarkerConfig], markers: &'a [BlockMarker]) -> Self {
        Self {
            root: Node::root(),
            stack: vec![Vec::new()],
            slugs: HashMap::new(),
            issued: HashSet::new(),
            scene_idx: 0,
            inline: InlineParser::new(configs),
            markers,
        }
    }

    fn build(mut self, tokens: &[Token]) -> Node {
        for token in tokens {
            let continues_speech = matches!(token.kind, TokenKind::Dialogue | TokenKind::Parenthetical);
            if self.current().is_speech() && !continues_speech {
                self.pop();
            }

            match token.kind {
                TokenKind::Action => self.handle_action(token),
                TokenKind::Character => self.handle_character(token),
                TokenKind::Dialogue => self.handle_dialogue(token),
                TokenKind::SceneHeading => self.handle_scene_heading(token),
                TokenKind::Parenthetical => {
                    let block = self.parsed_block(&token.text, token.line_start, token.line_end);
                    self.push_node(Node::new(NodeKind::Parenthetical(block)));
                }
                TokenKind::Centered => {
                    let block = self.parsed_block(&token.text, token.line_start, token.line_end);
                    self.push_node(Node::new(NodeKind::Centered(block)));
                }
                TokenKind::Transition => {
                    let block = TextBlock::verbatim(token.text.as_str()).at_lines(token.line_start, token.line_end);
                    self.push_node(Node::new(NodeKind::Transition(block)));
                }
                TokenKind::Unknown => debug!("skipping unknown token at line {:?}", token.line_start),
            }
        }

        let open_layers = self
            .stack
            .iter()
            .filter(|path| !path.is_empty())
            .filter(|path| self.node_at(path).layer_type().is_some())
            .count();
        if open_layers > 0 {
            debug!("{open_layers} layer(s) left open at end of document");
        }

        let mut root = self.root;
        process_dual_layers(&mut root);
        root
    }

    fn node_at(&self, path: &[usize]) -> &Node {
        let mut node = &self.root;
        for &idx in path {
            node = &node.children[idx];
        }
        node
    }

    fn current_path(&self) -> &[usize] {
        self.stack.last().map(Vec::as_slice).unwrap_or(&[])
    }

    fn current(&self) -> &Node {
        self.node_at(self.current_path())
    }

    fn current_mut(&mut self) -> &mut Node {
        let mut node = &mut self.root;
        if let Some(path) = self.stack.last() {
            for &idx in path {
                node = &mut node.children[idx];
            }
        }
        node
    }

    fn push_node(&mut self, node: Node) {
        self.current_mut().children.push(node);
    }

    fn open(&mut self, node: Node) {
        let mut path = self.current_path().to_vec();
        let container = self.current_mut();
        container.children.push(node);
        path.push(container.children.len() - 1);
        self.stack.push(path);
    }

    // The root frame is never popped.
    fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    fn current_layer_is(&self, id: &str) -> bool {
        self.current().layer_type() == Some(id)
    }

    fn set_end_label(&mut self, end_label: Option<String>) {
        if let NodeKind::Layer { end_label: slot, .. } = &mut self.current_mut().kind {
            if end_label.is_some() {
                *slot = end_label;
            }
        }
    }

    fn parsed_block(&self, text: &str, start: Option<usize>, end: Option<usize>) -> TextBlock {
        TextBlock::new(text, self.inline.parse(text)).at_lines(start, end)
    }

    fn flush_action(&mut self, buffer: &mut ActionBuffer) {
        if buffer.lines.is_empty() {
            return;
        }
        let text = buffer.lines.join("\n");
        let block = self.parsed_block(&text, buffer.start, buffer.end);
        self.push_node(Node::action(block));
        *buffer = ActionBuffer::default();
    }

    fn match_line(&self, text: &str) -> Option<LineMatch> {
        if text.is_empty() {
            return None;
        }
        for (marker, config) in self.markers.iter().enumerate() {
            if let Some(caps) = config.enclosure.as_ref().and_then(|re| re.captures(text)) {
                let content = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map_or("", |m| m.as_str())
                    .trim()
                    .to_string();
                return Some(LineMatch::Enclosure { marker, content });
            }

            let is_start = config.start_re.as_ref().is_some_and(|re| re.is_match(text));
            if is_start && config.is_prefix_only() {
                let label = config.strip_start(text).to_string();
                return Some(LineMatch::Prefix { marker, label });
            }
            let is_end = config.end_re.as_ref().is_some_and(|re| re.is_match(text));
            if is_start || is_end {
                return Some(LineMatch::Delimiter {
                    marker,
                    is_start,
                    is_end,
                });
            }
        }
        None
    }

    fn handle_action(&mut self, token: &Token) {
        let mut buffer = ActionBuffer::default();

        for (offset, raw) in token.text.split('\n').enumerate() {
            let line_no = token.line_start.map(|start| start + offset);
            let text = raw.trim();

            if let Some(kind) = WhitespaceKind::from_directive(text) {
                self.flush_action(&mut buffer);
                self.push_node(Node::new(NodeKind::Whitespace { kind }));
                continue;
            }

            let Some(found) = self.match_line(text) else {
                buffer.push(raw, line_no);
                continue;
            };
            self.flush_action(&mut buffer);
            self.apply_marker_line(found, text, line_no);
        }

        self.flush_action(&mut buffer);
    }

    fn apply_marker_line(&mut self, found: LineMatch, text: &str, line_no: Option<usize>) {
        let markers = self.markers;
        match found {
            LineMatch::Enclosure { marker, content } => {
                let marker = &markers[marker];
                if marker.smart_toggle {
                    if self.current_layer_is(&marker.id) {
                        self.pop();
                    } else {
                        let layer = Node::layer(&marker.id, marker.kind, non_empty(&content)).at_line(line_no);
                        self.open(layer);
                    }
                } else {
                    let block = self.parsed_block(&content, line_no, line_no);
                    let mut layer = Node::layer(&marker.id, marker.kind, None).at_line(line_no);
                    layer.children.push(Node::action(block));
                    self.push_node(layer);
                }
            }
            LineMatch::Prefix { marker, label } => {
                let marker = &markers[marker];
                let layer = Node::layer(&marker.id, marker.kind, non_empty(&label)).at_line(line_no);
                self.push_node(layer);
            }
            LineMatch::Delimiter {
                marker,
                is_start,
                is_end,
            } => {
                let marker = &markers[marker];
                let label = is_start.then(|| marker.strip_start(text)).and_then(non_empty);
                let end_label = is_end.then(|| marker.strip_end(text)).and_then(non_empty);

                if marker.start == marker.end || is_start {
                    if marker.start == marker.end && self.current_layer_is(&marker.id) {
                        self.set_end_label(end_label);
                        self.pop();
                    } else {
                        self.open(Node::layer(&marker.id, marker.kind, label).at_line(line_no));
                    }
                } else if self.current_layer_is(&marker.id) {
                    self.set_end_label(end_label);
                    self.pop();
                } else {
                    debug!(
                        "end delimiter of {} at line {line_no:?} does not close the open container",
                        marker.id
                    );
                }
            }
        }
    }

    fn handle_character(&mut self, token: &Token) {
        let trimmed = token.text.trim();
        let dual = trimmed.ends_with('^');
        let name = trimmed.trim_end_matches('^').trim();

        let leaf = Node::new(NodeKind::Character(self.parsed_block(
            name,
            token.line_start,
            token.line_end,
        )));
        let mut speech = Node::speech(name, dual);
        speech.children.push(leaf);

        if dual {
            if let Err(speech) = self.open_dual_speech(speech) {
                self.open(speech);
            }
        } else {
            self.open(speech);
        }
    }

    /// Pairs a `^` speech with the nearest real sibling speech, or joins an
    /// existing `dual_dialogue`. Hands the speech back when neither exists.
    fn open_dual_speech(&mut self, speech: Node) -> Result<(), Node> {
        let mut path = self.current_path().to_vec();
        let siblings = &mut self.current_mut().children;
        let Some(prev_idx) = siblings.iter().rposition(|n| !n.is_filler()) else {
            return Err(speech);
        };

        let child_idx = if siblings[prev_idx].is_speech() {
            let prev = std::mem::replace(&mut siblings[prev_idx], Node::new(NodeKind::DualDialogue));
            siblings[prev_idx].children = vec![prev, speech];
            siblings.truncate(prev_idx + 1);
            1
        } else if matches!(siblings[prev_idx].kind, NodeKind::DualDialogue) {
            let container = &mut siblings[prev_idx];
            container.children.push(speech);
            container.children.len() - 1
        } else {
            return Err(speech);
        };

        path.extend([prev_idx, child_idx]);
        self.stack.push(path);
        Ok(())
    }

    fn handle_dialogue(&mut self, token: &Token) {
        if let Some(rest) = self.close_layer_in_dialogue(token) {
            if let Some((text, start)) = rest {
                let end = start.map(|s| s + text.matches('\n').count());
                let block = self.parsed_block(&text, start, end);
                self.push_node(Node::new(NodeKind::Dialogue(block)));
            }
            return;
        }
        let block = self.parsed_block(&token.text, token.line_start, token.line_end);
        self.push_node(Node::new(NodeKind::Dialogue(block)));
    }

    /// Scans dialogue that swallowed a layer's end delimiter. Returns `None`
    /// when nothing was closed, otherwise the lines after the delimiter.
    fn close_layer_in_dialogue(&mut self, token: &Token) -> Option<Option<(String, Option<usize>)>> {
        let markers = self.markers;
        let depth = self.stack.len();
        let layer_frames = if self.current().layer_type().is_some() {
            1
        } else if self.current().is_speech() && depth > 2 {
            let below = &self.stack[depth - 2];
            if self.node_at(below).layer_type().is_some() {
                2
            } else {
                return None;
            }
        } else {
            return None;
        };

        let layer_path = self.stack[depth - layer_frames].clone();
        let layer_type = self.node_at(&layer_path).layer_type()?.to_string();
        let marker = markers.iter().find(|m| m.id == layer_type)?;
        let end_re = marker.end_re.as_ref()?;

        let lines: Vec<&str> = token.text.split('\n').collect();
        let end_at = lines.iter().position(|line| end_re.is_match(line.trim()))?;

        if end_at > 0 {
            let text = lines[..end_at].join("\n");
            let end = token.line_start.map(|s| s + end_at - 1);
            let block = self.parsed_block(&text, token.line_start, end);
            self.push_node(Node::new(NodeKind::Dialogue(block)));
        }
        for _ in 0..layer_frames {
            if self.current_layer_is(&layer_type) {
                self.set_end_label(non_empty(marker.strip_end(lines[end_at].trim())));
            }
            self.pop();
        }

        let rest = &lines[end_at + 1..];
        if rest.iter().all(|line| line.trim().is_empty()) {
            return Some(None);
        }
        let start = token.line_start.map(|s| s + end_at + 1);
        Some(Some((rest.join("\n"), start)))
    }

    fn handle_scene_heading(&mut self, token: &Token) {
        let label = token.text.trim();
        let base = slugify_scene(label, self.scene_idx);
        let mut count = self.slugs.get(&base).copied().unwrap_or(0);
        let mut id = if count > 0 { format!("{base}-{}", count + 1) } else { base.clone() };
        // a heading may already spell out an earlier suffix, e.g. `INT. HALL 2`
        while self.issued.contains(&id) {
            count += 1;
            id = format!("{base}-{}", count + 1);
        }
        self.slugs.insert(base, count + 1);
        self.issued.insert(id.clone());
        self.scene_idx += 1;

        let inline = self.inline.parse(label);
        self.push_node(Node::new(NodeKind::SceneHeading {
            id,
            text: label.to_string(),
            inline,
            line_start: token.line_start,
            line_end: token.line_end,
        }));
    }
}

/// Builds the script tree from a token stream. Block markers are matched
/// line by line inside action tokens; every textual leaf is inline-parsed;
/// dual layers are merged before the tree is returned.
pub fn build_script_ast(tokens: &[Token], configs: &[MarkerConfig]) -> Node {
    if tokens.is_empty() {
        return Node::root();
    }
    let markers = BlockMarker::compile_all(configs);
    let tokens = normalize_tokens(tokens, &markers);
    TreeBuilder::new(configs, &markers).build(&tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InlineNode;

    fn action(text: &str) -> Token {
        Token::new(TokenKind::Action, text)
    }

    fn block_marker(id: &str, start: &str, end: &str) -> MarkerConfig {
        MarkerConfig {
            id: id.to_string(),
            kind: MarkerKind::Block,
            is_block: true,
            match_mode: MatchMode::Range,
            start: Some(start.to_string()),
            end: Some(end.to_string()),
            ..Default::default()
        }
    }

    fn types(node: &Node) -> Vec<&'static str> {
        node.children.iter().map(Node::type_name).collect()
    }

    #[test]
    fn empty_tokens_give_empty_root() {
        let root = build_script_ast(&[], &[]);
        assert_eq!(root, Node::root());
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify_scene("INT. HOUSE - DAY", 0), "int-house-day");
        assert_eq!(slugify_scene("內景 客廳 夜", 0), "內景-客廳-夜");
        assert_eq!(slugify_scene("!!!", 2), "scene-3");
    }

    #[test]
    fn duplicate_scene_ids_get_suffix() {
        let tokens = vec![
            Token::new(TokenKind::SceneHeading, "INT. HOUSE - DAY"),
            action("Quiet."),
            Token::new(TokenKind::SceneHeading, "INT. HOUSE - DAY"),
            Token::new(TokenKind::SceneHeading, "INT. HOUSE - DAY"),
        ];
        let root = build_script_ast(&tokens, &[]);
        let ids: Vec<&str> = root
            .children
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::SceneHeading { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["int-house-day", "int-house-day-2", "int-house-day-3"]);
    }

    #[test]
    fn scene_ids_never_collide_with_generated_suffixes() {
        let scene_ids = |headings: &[&str]| -> Vec<String> {
            let tokens: Vec<Token> = headings
                .iter()
                .map(|h| Token::new(TokenKind::SceneHeading, *h))
                .collect();
            build_script_ast(&tokens, &[])
                .children
                .iter()
                .filter_map(|n| match &n.kind {
                    NodeKind::SceneHeading { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect()
        };

        assert_eq!(
            scene_ids(&["INT. HALL", "INT. HALL", "INT. HALL 2"]),
            vec!["int-hall", "int-hall-2", "int-hall-2-2"]
        );
        assert_eq!(
            scene_ids(&["INT. HALL 2", "INT. HALL", "INT. HALL"]),
            vec!["int-hall-2", "int-hall", "int-hall-3"]
        );
    }

    #[test]
    fn regex_block_marker_wraps_the_captured_line() {
        let marker = MarkerConfig {
            id: "note".to_string(),
            kind: MarkerKind::Block,
            is_block: true,
            match_mode: MatchMode::Regex,
            regex: Some(r"NOTE:\s*(.+)".to_string()),
            ..Default::default()
        };
        let root = build_script_ast(&[action("Lights dim.\nNOTE: check the gels\nCurtain.")], &[marker]);
        assert_eq!(types(&root), vec!["action", "layer", "action"]);
        let layer = &root.children[1];
        assert_eq!(layer.layer_type(), Some("note"));
        assert_eq!(layer.children[0].text(), Some("check the gels"));
    }

    #[test]
    fn higher_priority_block_marker_is_tried_first() {
        let plain = block_marker("scene", "<<", ">>");
        let mut alert = block_marker("alert", "<<!", "!>>");
        alert.priority = 5.0;

        let root = build_script_ast(&[action("<<! alarm\nSirens.\n!>>")], &[plain, alert]);
        assert_eq!(types(&root), vec!["layer"]);
        let layer = &root.children[0];
        assert!(matches!(
            &layer.kind,
            NodeKind::Layer { layer_type, label: Some(label), .. } if layer_type == "alert" && label == "alarm"
        ));
        assert_eq!(layer.children[0].text(), Some("Sirens."));
    }

    #[test]
    fn invalid_block_regex_is_skipped() {
        let broken = MarkerConfig {
            id: "broken".to_string(),
            kind: MarkerKind::Block,
            is_block: true,
            match_mode: MatchMode::Regex,
            regex: Some("([unclosed".to_string()),
            ..Default::default()
        };
        let flash = block_marker("flash", "<<", ">>");
        let root = build_script_ast(&[action("([unclosed line\n<<\nInside.\n>>")], &[broken, flash]);
        assert_eq!(types(&root), vec!["action", "layer"]);
        assert_eq!(root.children[0].text(), Some("([unclosed line"));
        assert_eq!(root.children[1].layer_type(), Some("flash"));
    }

    #[test]
    fn speech_groups_dialogue_and_closes_on_action() {
        let tokens = vec![
            Token::new(TokenKind::Character, "MARY (V.O.)"),
            Token::new(TokenKind::Parenthetical, "(quietly)"),
            Token::new(TokenKind::Dialogue, "Hello."),
            action("She leaves."),
        ];
        let root = build_script_ast(&tokens, &[]);
        assert_eq!(types(&root), vec!["speech", "action"]);
        let speech = &root.children[0];
        assert_eq!(types(speech), vec!["character", "parenthetical", "dialogue"]);
        assert!(matches!(&speech.kind, NodeKind::Speech { character, dual: false } if character == "MARY (V.O.)"));
    }

    #[test]
    fn range_marker_opens_and_closes_layer() {
        let tokens = vec![action("<<flash Age 7\nA yard.\nSun.\nflash>> end")];
        let root = build_script_ast(&tokens, &[block_marker("flash", "<<flash", "flash>>")]);
        assert_eq!(types(&root), vec!["layer"]);
        let layer = &root.children[0];
        assert!(matches!(
            &layer.kind,
            NodeKind::Layer { layer_type, label, end_label, .. }
                if layer_type == "flash"
                    && label.as_deref() == Some("Age 7")
                    && end_label.as_deref() == Some("end")
        ));
        assert_eq!(layer.children.len(), 1);
        assert_eq!(layer.children[0].text(), Some("A yard.\nSun."));
    }

    #[test]
    fn alphanumeric_delimiter_needs_boundary() {
        let marker = block_marker("memo", "MEMO", "ENDMEMO");
        let root = build_script_ast(&[action("MEMORIES fade.")], &[marker.clone()]);
        assert_eq!(types(&root), vec!["action"]);

        let root = build_script_ast(&[action("MEMO from HQ\nRead it.\nENDMEMO")], &[marker]);
        assert_eq!(types(&root), vec!["layer"]);
    }

    #[test]
    fn enclosure_line_wraps_single_layer() {
        let root = build_script_ast(
            &[action("Before\n<<flash quick cut flash>>\nAfter")],
            &[block_marker("flash", "<<flash", "flash>>")],
        );
        assert_eq!(types(&root), vec!["action", "layer", "action"]);
        let layer = &root.children[1];
        assert_eq!(layer.children[0].text(), Some("quick cut"));
    }

    #[test]
    fn smart_toggle_opens_then_closes() {
        let mut marker = block_marker("memory", "{{", "}}");
        marker.smart_toggle = true;
        let tokens = vec![action("{{ Childhood }}\nA swing.\n{{ Childhood }}\nNow.")];
        let root = build_script_ast(&tokens, &[marker]);
        assert_eq!(types(&root), vec!["layer", "action"]);
        let layer = &root.children[0];
        assert!(matches!(&layer.kind, NodeKind::Layer { label: Some(l), .. } if l == "Childhood"));
        assert_eq!(layer.children[0].text(), Some("A swing."));
    }

    #[test]
    fn identical_delimiters_toggle() {
        let marker = block_marker("aside", "~~~", "~~~");
        let root = build_script_ast(&[action("~~~ note\nInside.\n~~~ done\nOutside.")], &[marker]);
        assert_eq!(types(&root), vec!["layer", "action"]);
        assert!(matches!(
            &root.children[0].kind,
            NodeKind::Layer { label: Some(l), end_label: Some(e), .. } if l == "note" && e == "done"
        ));
    }

    #[test]
    fn unterminated_layer_stays_open() {
        let marker = block_marker("flash", "<<", ">>");
        let tokens = vec![action("<<\nStill inside."), Token::new(TokenKind::SceneHeading, "EXT. ROAD")];
        let root = build_script_ast(&tokens, &[marker]);
        assert_eq!(types(&root), vec!["layer"]);
        assert_eq!(types(&root.children[0]), vec!["action", "scene_heading"]);
    }

    #[test]
    fn whitespace_directives_split_action() {
        let root = build_script_ast(&[action("Door opens.\n（長留白）\nSilence.")], &[]);
        assert_eq!(types(&root), vec!["action", "whitespace", "action"]);
        assert!(matches!(
            root.children[1].kind,
            NodeKind::Whitespace {
                kind: WhitespaceKind::Long
            }
        ));
    }

    #[test]
    fn prefix_block_is_self_contained() {
        let marker = MarkerConfig {
            id: "env".to_string(),
            kind: MarkerKind::Block,
            is_block: true,
            start: Some("<t>".to_string()),
            ..Default::default()
        };
        let root = build_script_ast(&[action("<t> rain outside\nShe sighs.")], &[marker]);
        assert_eq!(types(&root), vec!["layer", "action"]);
        assert!(matches!(&root.children[0].kind, NodeKind::Layer { label: Some(l), .. } if l == "rain outside"));
    }

    #[test]
    fn block_marker_without_start_is_skipped() {
        let marker = MarkerConfig {
            id: "broken".to_string(),
            is_block: true,
            end: Some(">>".to_string()),
            ..Default::default()
        };
        let root = build_script_ast(&[action("text >>")], &[marker]);
        assert_eq!(types(&root), vec!["action"]);
    }

    #[test]
    fn dual_caret_merges_with_previous_speech() {
        let tokens = vec![
            Token::new(TokenKind::Character, "BRICK"),
            Token::new(TokenKind::Dialogue, "Screw retirement."),
            Token::new(TokenKind::Character, "STEEL ^"),
            Token::new(TokenKind::Dialogue, "Screw retirement."),
            action("They clink."),
        ];
        let root = build_script_ast(&tokens, &[]);
        assert_eq!(types(&root), vec!["dual_dialogue", "action"]);
        let dual = &root.children[0];
        assert_eq!(types(dual), vec!["speech", "speech"]);
        assert!(matches!(&dual.children[1].kind, NodeKind::Speech { character, dual: true } if character == "STEEL"));
        assert_eq!(types(&dual.children[1]), vec!["character", "dialogue"]);
    }

    #[test]
    fn forced_characters_pull_dialogue() {
        let tokens = vec![
            action("@阿明"),
            action("你好。"),
            action("今天天氣很好。"),
            Token::new(TokenKind::SceneHeading, "EXT. PARK"),
            action("Birds sing."),
        ];
        let root = build_script_ast(&tokens, &[]);
        assert_eq!(types(&root), vec!["speech", "scene_heading", "action"]);
        assert_eq!(types(&root.children[0]), vec!["character", "dialogue", "dialogue"]);
    }

    #[test]
    fn short_cjk_action_is_character_but_directive_is_not() {
        let tokens = vec![action("小美"), action("走吧。"), action("留白")];
        let root = build_script_ast(&tokens, &[]);
        assert_eq!(types(&root), vec!["speech", "whitespace"]);
        assert_eq!(types(&root.children[0]), vec!["character", "dialogue"]);

        let root = build_script_ast(&[action("留白")], &[]);
        assert_eq!(types(&root), vec!["whitespace"]);
    }

    #[test]
    fn upper_case_delimiters_are_never_characters() {
        let marker = block_marker("flash", "FLASHBACK", "END FLASHBACK");
        let tokens = vec![
            Token::new(TokenKind::Character, "FLASHBACK"),
            action("A yard."),
            Token::new(TokenKind::Character, "END FLASHBACK"),
        ];
        let root = build_script_ast(&tokens, &[marker]);
        assert_eq!(types(&root), vec!["layer"]);
        assert_eq!(types(&root.children[0]), vec!["action"]);
    }

    #[test]
    fn dialogue_that_swallowed_end_delimiter_closes_layer() {
        let marker = block_marker("phone", "PHONE:", "HANG UP");
        let tokens = vec![
            action("PHONE: mom"),
            Token::new(TokenKind::Character, "MOM"),
            Token::new(TokenKind::Dialogue, "Call me back.\nHANG UP click\nHe stares."),
        ];
        let root = build_script_ast(&tokens, &[marker]);
        assert_eq!(types(&root), vec!["layer", "dialogue"]);
        let layer = &root.children[0];
        assert!(matches!(&layer.kind, NodeKind::Layer { end_label: Some(e), .. } if e == "click"));
        assert_eq!(types(&layer.children[0]), vec!["character", "dialogue"]);
        assert_eq!(root.children[1].text(), Some("He stares."));
    }

    #[test]
    fn transitions_stay_verbatim_and_scenes_are_parsed() {
        let tokens = vec![
            Token::new(TokenKind::SceneHeading, "INT. LAB [night]"),
            Token::new(TokenKind::Transition, "CUT TO: [beat]"),
        ];
        let root = build_script_ast(&tokens, &[]);
        assert_eq!(root.children[0].inline().len(), 2);
        assert_eq!(root.children[1].inline(), &[InlineNode::text("CUT TO: [beat]")]);
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let root = build_script_ast(&[Token::new(TokenKind::Unknown, "==="), action("Go.")], &[]);
        assert_eq!(types(&root), vec!["action"]);
    }

    #[test]
    fn action_lines_keep_document_positions() {
        let marker = block_marker("flash", "<<", ">>");
        let token = action("One.\n<<\nTwo.\nThree.\n>>").with_lines(10, 14);
        let root = build_script_ast(&[token], &[marker]);
        assert_eq!(root.children[0].line_start(), Some(10));
        let layer = &root.children[1];
        assert_eq!(layer.line_start(), Some(11));
        let inner = layer.children[0].block().unwrap();
        assert_eq!((inner.line_start, inner.line_end), (Some(12), Some(13)));
    }
}
