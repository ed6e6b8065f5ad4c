//! Incremental assembly of streamed tool-call arguments.
//!
//! The transport feeds complete lines into a [`LineSink`]; the
//! [`StreamAssembler`] keeps only the argument text of tool calls and ignores
//! everything else (heartbeats, `data: [DONE]`, comments). Backends report
//! what a line carries as [`StreamPiece`]s: OpenAI streams partial strings
//! that are joined per tool-call index, Ollama sends every call's arguments
//! as one complete object. Each tool call ends up as its own part, the same
//! shape a non-streamed body yields.
//!
//! When the transport retries a request it calls [`LineSink::reset`] first,
//! so partial output of a failed try never leaks into the next one.

use serde_json::Value;
use tracing::trace;

/// SSE framing of a data frame that carries a JSON object.
pub const SSE_DATA_OBJECT_PREFIX: &str = "data: {";

/// Consumer of streamed lines.
pub trait LineSink {
    /// Drops everything collected so far.
    fn reset(&mut self);
    /// Handles one complete line (without the trailing newline).
    fn push_line(&mut self, line: &str);
    /// Number of lines seen since the last reset.
    fn lines_seen(&self) -> usize;
}

/// Tool-call argument text found in one streamed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPiece {
    /// Partial text of the call at `index`; consecutive fragments of the
    /// same index are concatenated.
    Fragment { index: u64, text: String },
    /// Complete arguments of one call.
    Whole(String),
}

/// Collects the argument parts of every streamed tool call.
pub struct StreamAssembler<F>
where
    F: Fn(&str) -> Vec<StreamPiece>,
{
    extract: F,
    parts: Vec<String>,
    /// Index of the call the last part still accepts fragments for.
    open: Option<u64>,
    lines: usize,
    pieces: usize,
}

impl<F> StreamAssembler<F>
where
    F: Fn(&str) -> Vec<StreamPiece>,
{
    pub fn new(extract: F) -> Self {
        Self {
            extract,
            parts: Vec::new(),
            open: None,
            lines: 0,
            pieces: 0,
        }
    }

    /// Argument text per tool call, in arrival order.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Number of pieces that contributed text.
    pub fn pieces(&self) -> usize {
        self.pieces
    }

    fn push_piece(&mut self, piece: StreamPiece) {
        self.pieces += 1;
        match piece {
            StreamPiece::Fragment { index, text } => match self.parts.last_mut() {
                Some(last) if self.open == Some(index) => last.push_str(&text),
                _ => {
                    self.parts.push(text);
                    self.open = Some(index);
                }
            },
            StreamPiece::Whole(text) => {
                self.parts.push(text);
                self.open = None;
            }
        }
    }
}

impl<F> LineSink for StreamAssembler<F>
where
    F: Fn(&str) -> Vec<StreamPiece>,
{
    fn reset(&mut self) {
        self.parts.clear();
        self.open = None;
        self.lines = 0;
        self.pieces = 0;
    }

    fn push_line(&mut self, line: &str) {
        self.lines += 1;
        let line = line.trim_end_matches('\r');
        for piece in (self.extract)(line) {
            self.push_piece(piece);
        }
    }

    fn lines_seen(&self) -> usize {
        self.lines
    }
}

/// Argument fragments of an OpenAI-style SSE frame.
///
/// Only lines starting with [`SSE_DATA_OBJECT_PREFIX`] are considered; every
/// `choices[0].delta.tool_calls[*].function.arguments` string becomes a
/// fragment of the call named by its `index` (0 when absent).
pub fn sse_tool_arguments(line: &str) -> Vec<StreamPiece> {
    if !line.starts_with(SSE_DATA_OBJECT_PREFIX) {
        return Vec::new();
    }
    let json = &line["data: ".len()..];
    let frame: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, "skipping undecodable SSE frame");
            return Vec::new();
        }
    };
    let Some(calls) = frame
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("tool_calls"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    calls
        .iter()
        .filter_map(|call| {
            let text = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())?;
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
            Some(StreamPiece::Fragment {
                index,
                text: text.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseContent;

    #[test]
    fn assembles_fragments_and_ignores_control_frames() {
        let mut asm = StreamAssembler::new(sse_tool_arguments);
        asm.push_line(r#"data: {"id":"x","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"repl"}}]}}]}"#);
        asm.push_line(r#"data: {"id":"x","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ies\":[]}"}}]}}]}"#);
        asm.push_line("data: [DONE]");
        asm.push_line(": keep-alive");
        asm.push_line("");

        assert_eq!(asm.parts(), [r#"{"replies":[]}"#]);
        assert_eq!(asm.pieces(), 2);
        assert_eq!(asm.lines_seen(), 5);

        let content = ResponseContent::parse(&asm.parts()[0]).unwrap();
        assert_eq!(content.replies.map(|r| r.len()), Some(0));
    }

    #[test]
    fn fragments_of_different_calls_stay_apart() {
        let mut asm = StreamAssembler::new(sse_tool_arguments);
        asm.push_line(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":"}}]}}]}"#);
        asm.push_line(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#);
        asm.push_line(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"b\":2}"}}]}}]}"#);
        assert_eq!(asm.parts(), [r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn whole_pieces_are_never_concatenated() {
        let mut asm = StreamAssembler::new(|line: &str| {
            line.split('|')
                .filter(|p| !p.is_empty())
                .map(|p| StreamPiece::Whole(p.to_string()))
                .collect()
        });
        asm.push_line(r#"{"replies":[{"reply":"a"}]}|{"replies":[{"reply":"b"}]}"#);
        asm.push_line(r#"{"replies":[{"reply":"c"}]}"#);

        assert_eq!(asm.parts().len(), 3);
        let merged = ResponseContent::merge(
            asm.parts()
                .iter()
                .map(|p| ResponseContent::parse(p).unwrap())
                .collect(),
        )
        .unwrap();
        let texts: Vec<_> = merged
            .replies
            .unwrap()
            .into_iter()
            .filter_map(|r| r.reply)
            .collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn frames_without_tool_calls_contribute_nothing() {
        assert!(sse_tool_arguments(r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#).is_empty());
        assert!(sse_tool_arguments(r#"data: {"choices":[]}"#).is_empty());
        assert!(sse_tool_arguments("data: {broken").is_empty());
        assert!(sse_tool_arguments(r#"event: {"x":1}"#).is_empty());
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut asm = StreamAssembler::new(sse_tool_arguments);
        asm.push_line("data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"function\":{\"arguments\":\"ab\"}}]}}]}\r");
        assert_eq!(asm.parts(), ["ab"]);
    }

    #[test]
    fn reset_discards_partial_output() {
        let mut asm = StreamAssembler::new(sse_tool_arguments);
        asm.push_line(r#"data: {"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{\"partial"}}]}}]}"#);
        asm.reset();
        assert!(asm.parts().is_empty());
        assert_eq!(asm.lines_seen(), 0);
    }
}
