use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{Token, TokenKind};

static SCENE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:int\.?/ext|i/e|int|ext|est)[.\s]").unwrap());

/// Turns screenplay body text into the flat token list the AST builder
/// consumes. `first_line` is the 1-based line of `body` inside the full
/// document so tokens can point back into the editor buffer.
pub trait TokenSource {
    fn tokenize(&self, body: &str, first_line: usize) -> Vec<Token>;
}

/// Line-based subset of Fountain: scene headings, transitions, centered
/// text, character cues with their dialogue, and action.
#[derive(Debug, Clone, Copy, Default)]
pub struct FountainLexer;

impl TokenSource for FountainLexer {
    fn tokenize(&self, body: &str, first_line: usize) -> Vec<Token> {
        tokenize(body, first_line)
    }
}

pub fn tokenize(body: &str, first_line: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut block: Vec<(usize, &str)> = Vec::new();

    for (idx, line) in body.split('\n').enumerate() {
        let mut raw = line.trim_end_matches('\r');
        if idx == 0 {
            raw = raw.trim_start_matches('\u{feff}');
        }
        if raw.trim().is_empty() {
            lex_block(&block, &mut tokens);
            block.clear();
            continue;
        }
        block.push((first_line + idx, raw));
    }
    lex_block(&block, &mut tokens);

    tokens
}

fn lex_block(block: &[(usize, &str)], tokens: &mut Vec<Token>) {
    let Some(&(first_no, first)) = block.first() else {
        return;
    };

    if block.len() > 1 {
        if let Some(name) = character_cue(first) {
            tokens.push(Token::new(TokenKind::Character, name).with_lines(first_no, first_no));
            lex_dialogue(&block[1..], tokens);
            return;
        }
    }

    let mut action = Run::default();
    for &(line_no, raw) in block {
        let trimmed = raw.trim();
        if is_skipped(trimmed) {
            action.flush(TokenKind::Action, tokens);
            continue;
        }
        if let Some(forced) = raw.trim_start().strip_prefix('!') {
            action.push(line_no, forced.trim_end());
            continue;
        }
        match line_token(trimmed) {
            Some((kind, text)) => {
                action.flush(TokenKind::Action, tokens);
                tokens.push(Token::new(kind, text).with_lines(line_no, line_no));
            }
            None => action.push(line_no, raw.trim_end()),
        }
    }
    action.flush(TokenKind::Action, tokens);
}

fn lex_dialogue(lines: &[(usize, &str)], tokens: &mut Vec<Token>) {
    let mut dialogue = Run::default();
    for &(line_no, raw) in lines {
        let trimmed = raw.trim();
        if trimmed.starts_with('(') && trimmed.ends_with(')') {
            dialogue.flush(TokenKind::Dialogue, tokens);
            tokens.push(Token::new(TokenKind::Parenthetical, trimmed).with_lines(line_no, line_no));
        } else {
            dialogue.push(line_no, trimmed);
        }
    }
    dialogue.flush(TokenKind::Dialogue, tokens);
}

// page breaks, sections and synopses
fn is_skipped(trimmed: &str) -> bool {
    trimmed.starts_with("===") || trimmed.starts_with('#') || trimmed.starts_with('=')
}

fn line_token(trimmed: &str) -> Option<(TokenKind, String)> {
    if let Some(rest) = trimmed.strip_prefix('.') {
        if !rest.starts_with('.') && !rest.trim().is_empty() {
            return Some((TokenKind::SceneHeading, rest.trim().to_string()));
        }
    }
    if SCENE_PREFIX.is_match(trimmed) {
        return Some((TokenKind::SceneHeading, trimmed.to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix('>').filter(|r| !r.starts_with('>')) {
        return Some(match rest.strip_suffix('<') {
            Some(inner) => (TokenKind::Centered, inner.trim().to_string()),
            None => (TokenKind::Transition, rest.trim().to_string()),
        });
    }
    if trimmed.ends_with("TO:") && is_upper(trimmed) {
        return Some((TokenKind::Transition, trimmed.to_string()));
    }
    None
}

fn character_cue(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if let Some(forced) = trimmed.strip_prefix('@') {
        let name = forced.trim();
        return (!name.is_empty()).then(|| name.to_string());
    }
    if line_token(trimmed).is_some() || is_skipped(trimmed) || trimmed.starts_with('!') {
        return None;
    }

    let name = trimmed.trim_end_matches('^').trim_end();
    let name = match name.rfind(['(', '（']) {
        Some(open) if name.ends_with([')', '）']) => name[..open].trim_end(),
        _ => name,
    };
    (!name.is_empty() && is_upper(name)).then(|| trimmed.to_string())
}

fn is_upper(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}

#[derive(Default)]
struct Run<'a> {
    lines: Vec<&'a str>,
    start: usize,
    end: usize,
}

impl<'a> Run<'a> {
    fn push(&mut self, line_no: usize, text: &'a str) {
        if self.lines.is_empty() {
            self.start = line_no;
        }
        self.end = line_no;
        self.lines.push(text);
    }

    fn flush(&mut self, kind: TokenKind, tokens: &mut Vec<Token>) {
        if self.lines.is_empty() {
            return;
        }
        let text = self.lines.join("\n");
        tokens.push(Token::new(kind, text).with_lines(self.start, self.end));
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scene_action_and_dialogue() {
        let body = "INT. KITCHEN - NIGHT\n\nRain hits the window.\nA kettle whistles.\n\nMARY (V.O.)\n(quietly)\nYou're late.\nAgain.\n\nCUT TO:";
        let tokens = tokenize(body, 1);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::SceneHeading,
                TokenKind::Action,
                TokenKind::Character,
                TokenKind::Parenthetical,
                TokenKind::Dialogue,
                TokenKind::Transition,
            ]
        );
        assert_eq!(tokens[1].text, "Rain hits the window.\nA kettle whistles.");
        assert_eq!((tokens[1].line_start, tokens[1].line_end), (Some(3), Some(4)));
        assert_eq!(tokens[2].text, "MARY (V.O.)");
        assert_eq!(tokens[4].text, "You're late.\nAgain.");
        assert_eq!((tokens[4].line_start, tokens[4].line_end), (Some(8), Some(9)));
        assert_eq!(tokens[5].line_start, Some(11));
    }

    #[test]
    fn line_numbers_follow_document_offset() {
        let tokens = tokenize("EXT. ROOF - DAY", 5);
        assert_eq!(tokens[0].kind, TokenKind::SceneHeading);
        assert_eq!(tokens[0].line_start, Some(5));
    }

    #[test]
    fn forced_elements() {
        let body = ".flashback\n\n>THE END<\n\n> SMASH CUT\n\n!LOUD NOISES\nkeep going\n\n@mcCLANE\nYippee.";
        let tokens = tokenize(body, 1);
        assert_eq!(tokens[0], Token::new(TokenKind::SceneHeading, "flashback").with_lines(1, 1));
        assert_eq!(tokens[1].kind, TokenKind::Centered);
        assert_eq!(tokens[1].text, "THE END");
        assert_eq!(tokens[2].kind, TokenKind::Transition);
        assert_eq!(tokens[2].text, "SMASH CUT");
        assert_eq!(tokens[3].kind, TokenKind::Action);
        assert_eq!(tokens[3].text, "LOUD NOISES\nkeep going");
        assert_eq!(tokens[4].kind, TokenKind::Character);
        assert_eq!(tokens[4].text, "mcCLANE");
        assert_eq!(tokens[5].kind, TokenKind::Dialogue);
    }

    #[test]
    fn doubled_angle_brackets_stay_text() {
        let tokens = tokenize("<< rain\nThunder.\n>>", 1);
        assert_eq!(tokens, vec![Token::new(TokenKind::Action, "<< rain\nThunder.\n>>").with_lines(1, 3)]);
    }

    #[test]
    fn lone_upper_case_line_is_action() {
        let tokens = tokenize("BANG\n\nSomething happens.", 1);
        assert_eq!(kinds(&tokens), vec![TokenKind::Action, TokenKind::Action]);
    }

    #[test]
    fn sections_and_page_breaks_are_skipped() {
        let tokens = tokenize("# Act One\n= synopsis\n===\nShe waits.", 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0], Token::new(TokenKind::Action, "She waits.").with_lines(4, 4));
    }

    #[test]
    fn dual_caret_keeps_cue() {
        let tokens = tokenize("BOB ^\nHi.", 1);
        assert_eq!(tokens[0].kind, TokenKind::Character);
        assert_eq!(tokens[0].text, "BOB ^");
    }

    #[test]
    fn empty_body_gives_no_tokens() {
        assert!(FountainLexer.tokenize("", 1).is_empty());
        assert!(FountainLexer.tokenize("\n\n", 1).is_empty());
    }
}
