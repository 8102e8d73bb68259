use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{Node, NodeKind, TextBlock};

static CUE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9\x{4e00}-\x{9fa5}\s().-]+$").unwrap());

// Best-effort guess: short upper-case lines (or `@` lines) name a speaker.
fn is_cue_line(line: &str) -> bool {
    line.starts_with('@') || (line.chars().count() < 20 && CUE_LINE.is_match(line))
}

/// Rebuilds speeches from action text the tokenizer left unsplit inside a
/// dual block.
fn resplit(children: Vec<Node>) -> Vec<Node> {
    let mut rebuilt: Vec<Node> = Vec::with_capacity(children.len());
    let mut speech: Option<usize> = None;

    for child in children {
        if let NodeKind::Action(block) = &child.kind {
            for line in block.text.split('\n') {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if is_cue_line(trimmed) {
                    let name = trimmed.strip_prefix('@').unwrap_or(trimmed);
                    let mut cue = Node::speech(name, false);
                    cue.children
                        .push(Node::new(NodeKind::Character(TextBlock::verbatim(name))));
                    rebuilt.push(cue);
                    speech = Some(rebuilt.len() - 1);
                } else if let Some(idx) = speech {
                    rebuilt[idx]
                        .children
                        .push(Node::new(NodeKind::Dialogue(TextBlock::verbatim(trimmed))));
                } else {
                    rebuilt.push(Node::action(TextBlock::verbatim(line)));
                }
            }
            continue;
        }

        if child.is_speech() {
            speech = Some(rebuilt.len());
        }
        rebuilt.push(child);
    }

    rebuilt
}

/// Folds every dual layer into a `dual_dialogue` container, bottom-up.
/// A dual layer joins the nearest real sibling before it when that is a
/// speech or an existing container; otherwise it stands alone, or vanishes
/// when nothing is left in it.
pub fn process_dual_layers(node: &mut Node) {
    let mut i = node.children.len();
    while i > 0 {
        i -= 1;
        process_dual_layers(&mut node.children[i]);
        if !node.children[i].is_dual_layer() {
            continue;
        }

        let contents = std::mem::take(&mut node.children[i].children);
        let valid: Vec<Node> = resplit(contents)
            .into_iter()
            .filter(|c| !c.is_filler())
            .collect();

        let children = &mut node.children;
        let prev_idx = children[..i].iter().rposition(|n| !n.is_filler());

        match prev_idx {
            Some(prev_idx) if children[prev_idx].is_speech() => {
                let prev = std::mem::replace(&mut children[prev_idx], Node::new(NodeKind::DualDialogue));
                children[prev_idx].children = std::iter::once(prev).chain(valid).collect();
                children.drain(prev_idx + 1..=i);
                i = prev_idx;
            }
            Some(prev_idx) if matches!(children[prev_idx].kind, NodeKind::DualDialogue) => {
                children[prev_idx].children.extend(valid);
                children.drain(prev_idx + 1..=i);
                i = prev_idx;
            }
            _ if valid.is_empty() => {
                children.remove(i);
            }
            _ => children[i] = Node::with_children(NodeKind::DualDialogue, valid),
        }
    }

    attach_caret_speeches(&mut node.children);
}

/// A `^` speech written right after a dual block had only the layer to pair
/// with at build time; it joins the container the layer turned into.
fn attach_caret_speeches(children: &mut Vec<Node>) {
    let mut i = 0;
    while i < children.len() {
        if matches!(children[i].kind, NodeKind::Speech { dual: true, .. }) {
            let prev = children[..i].iter().rposition(|n| !n.is_filler());
            if let Some(prev) = prev.filter(|&p| matches!(children[p].kind, NodeKind::DualDialogue)) {
                let speech = children.remove(i);
                children[prev].children.push(speech);
                children.drain(prev + 1..i);
                i = prev + 1;
                continue;
            }
        }
        i += 1;
    }
}
