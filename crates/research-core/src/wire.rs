//! The tool-call / final-answer wire format exchanged between the model and
//! an agent loop: inline tagged blocks naming a tool and carrying a
//! structured JSON argument payload, plus a final-answer block. Multiple
//! tool blocks per turn are allowed; unrecognized or malformed blocks are
//! skipped silently rather than aborting the parse.
//!
//! Concretely, a model turn looks like:
//!
//! ```text
//! <tool_call name="conduct_research">{"topic": "Shor's algorithm impact on RSA"}</tool_call>
//! <tool_call name="think">{"reflection": "need more on post-quantum schemes"}</tool_call>
//! <final_answer>The report is complete.</final_answer>
//! ```

use crate::tool::ToolCall;
use serde_json::Value;
use std::collections::HashMap;

const TOOL_CALL_OPEN_PREFIX: &str = "<tool_call";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const FINAL_ANSWER_OPEN: &str = "<final_answer>";
const FINAL_ANSWER_CLOSE: &str = "</final_answer>";

/// Everything a model turn might contain, once parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTurn {
    pub tool_calls: Vec<ToolCall>,
    pub final_answer: Option<String>,
}

impl ParsedTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Neither a tool call nor a final answer: treated as "continue" up to
    /// the iteration cap, not as an error.
    pub fn is_continue(&self) -> bool {
        self.tool_calls.is_empty() && self.final_answer.is_none()
    }
}

/// Parses a raw model response into its tool calls and optional final
/// answer. Malformed argument payloads are skipped: the surrounding block
/// is dropped entirely rather than partially executed.
pub fn parse_turn(response: &str) -> ParsedTurn {
    let mut turn = ParsedTurn::default();
    let mut rest = response;

    loop {
        match find_next_block(rest) {
            Some(Block::ToolCall { name, payload, tail }) => {
                if let Some(args) = parse_args(payload) {
                    turn.tool_calls.push(ToolCall { tool: name, args });
                }
                rest = tail;
            }
            Some(Block::FinalAnswer { content, tail }) => {
                turn.final_answer = Some(content.trim().to_string());
                rest = tail;
            }
            None => break,
        }
    }

    turn
}

enum Block<'a> {
    ToolCall {
        name: String,
        payload: &'a str,
        tail: &'a str,
    },
    FinalAnswer {
        content: &'a str,
        tail: &'a str,
    },
}

fn find_next_block(text: &str) -> Option<Block<'_>> {
    let tool_pos = text.find(TOOL_CALL_OPEN_PREFIX);
    let final_pos = text.find(FINAL_ANSWER_OPEN);

    match (tool_pos, final_pos) {
        (Some(t), Some(f)) if f < t => parse_final_answer(&text[f..]),
        (Some(t), _) => parse_tool_call(&text[t..]),
        (None, Some(f)) => parse_final_answer(&text[f..]),
        (None, None) => None,
    }
}

fn parse_tool_call(text: &str) -> Option<Block<'_>> {
    let open_end = text.find('>')?;
    let header = &text[..open_end];
    let name = extract_name_attr(header)?;

    let body_start = open_end + 1;
    let close_pos = text[body_start..].find(TOOL_CALL_CLOSE)?;
    let payload = &text[body_start..body_start + close_pos];
    let tail_start = body_start + close_pos + TOOL_CALL_CLOSE.len();

    Some(Block::ToolCall {
        name,
        payload,
        tail: &text[tail_start..],
    })
}

fn parse_final_answer(text: &str) -> Option<Block<'_>> {
    let body_start = FINAL_ANSWER_OPEN.len();
    let close_pos = text[body_start..].find(FINAL_ANSWER_CLOSE)?;
    let content = &text[body_start..body_start + close_pos];
    let tail_start = body_start + close_pos + FINAL_ANSWER_CLOSE.len();
    Some(Block::FinalAnswer {
        content,
        tail: &text[tail_start..],
    })
}

/// Extracts `name="..."` from a `<tool_call name="web_search">`-shaped
/// opening tag header (everything up to, but not including, `>`).
fn extract_name_attr(header: &str) -> Option<String> {
    let marker = "name=\"";
    let start = header.find(marker)? + marker.len();
    let end = header[start..].find('"')? + start;
    Some(header[start..end].to_string())
}

fn parse_args(payload: &str) -> Option<HashMap<String, Value>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Some(HashMap::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map.into_iter().collect()),
        _ => None,
    }
}

/// Extracts well-formed `http(s)://` URLs from free text, used for the
/// permissive URL matching the note-deduplication and supervisor-novelty
/// rules depend on.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if text[i..].starts_with("http://") || text[i..].starts_with("https://") {
            let end = text[i..]
                .find(|c: char| c.is_whitespace() || matches!(c, ')' | ']' | '>' | '"' | '\''))
                .map(|o| i + o)
                .unwrap_or(text.len());
            // Trim trailing punctuation commonly adjacent to URLs in prose.
            let mut end = end;
            while end > i && matches!(text.as_bytes()[end - 1], b'.' | b',' | b';' | b':') {
                end -= 1;
            }
            urls.push(text[i..end].to_string());
            i = end;
        } else {
            i += 1;
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_tool_call() {
        let turn = parse_turn(r#"<tool_call name="web_search">{"query": "rust"}</tool_call>"#);
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].tool, "web_search");
        assert_eq!(
            turn.tool_calls[0].args.get("query").unwrap().as_str(),
            Some("rust")
        );
        assert!(turn.final_answer.is_none());
    }

    #[test]
    fn parses_multiple_tool_calls_in_one_turn() {
        let turn = parse_turn(concat!(
            r#"<tool_call name="think">{"reflection": "hmm"}</tool_call>"#,
            r#"<tool_call name="conduct_research">{"topic": "AWS"}</tool_call>"#,
        ));
        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[0].tool, "think");
        assert_eq!(turn.tool_calls[1].tool, "conduct_research");
    }

    #[test]
    fn parses_final_answer() {
        let turn = parse_turn("<final_answer>All done.</final_answer>");
        assert_eq!(turn.final_answer.as_deref(), Some("All done."));
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn malformed_json_payload_is_skipped_not_partially_executed() {
        let turn = parse_turn(r#"<tool_call name="web_search">{not json}</tool_call>"#);
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn response_with_neither_block_is_continue() {
        let turn = parse_turn("I am thinking about this quietly.");
        assert!(turn.is_continue());
    }

    #[test]
    fn unknown_tool_name_still_parses_as_a_call_dispatch_decides_validity() {
        let turn = parse_turn(r#"<tool_call name="frobnicate">{}</tool_call>"#);
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].tool, "frobnicate");
    }

    #[test]
    fn extract_urls_finds_multiple_and_trims_trailing_punctuation() {
        let text = "See https://example.com/a and https://example.com/b, also (https://example.com/c).";
        let urls = extract_urls(text);
        assert_eq!(
            urls,
            vec![
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c",
            ]
        );
    }

    #[test]
    fn extract_urls_empty_when_none_present() {
        assert!(extract_urls("no links here").is_empty());
    }
}
