//! Wire-independent protocol types of a review round trip.
//!
//! - [`ReviewContext`]: what the caller wants reviewed (one `ask`).
//! - [`ChatRequest`]: backend-neutral request built from a context.
//! - [`ResponseContent`]: the structured payload the model returns through
//!   the `format_replies` tool call.
//!
//! Backends turn a [`ChatRequest`] into their own JSON body and extract the
//! tool-call argument text from their replies; everything in this module is
//! shared between them.

pub mod stream;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

/// Name of the single tool the model is forced to call.
pub const REPLY_TOOL_NAME: &str = "format_replies";

/// Prior comment shown to the model (comment-triggered reviews).
///
/// `id` is the position in the host's ordered comment list; the model echoes
/// it back in [`ReplyItem::id`] to say which thread it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub message: String,
}

/// Everything one `ask` sends to the model.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    /// Correlation id; the model is asked to echo it as `changeId`.
    pub change_id: String,
    /// System instructions.
    pub system: String,
    /// Patch text under review.
    pub patch: String,
    /// Prior comments, in host order.
    pub history: Vec<HistoryEntry>,
    /// Custom directives, numbered from 1 in the payload.
    pub directives: Vec<String>,
    /// Definitions of code referenced by the patch.
    pub code_context: Option<String>,
}

impl ReviewContext {
    /// JSON data payload sent as the user message.
    pub fn data_payload(&self) -> Value {
        let mut payload = json!({
            "changeId": self.change_id,
            "patch": self.patch,
        });
        if !self.history.is_empty() {
            payload["history"] = json!(self.history);
        }
        if !self.directives.is_empty() {
            let numbered: serde_json::Map<String, Value> = self
                .directives
                .iter()
                .enumerate()
                .map(|(i, d)| ((i + 1).to_string(), Value::String(d.clone())))
                .collect();
            payload["directives"] = Value::Object(numbered);
        }
        if let Some(ctx) = self.code_context.as_deref().filter(|c| !c.is_empty()) {
            payload["codeContext"] = Value::String(ctx.to_string());
        }
        payload
    }
}

/// Backend-neutral chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    /// Serialized data payload.
    pub user: String,
    /// Fresh per request so the backend never conflates adjacent reviews.
    pub seed: u64,
    pub stream: bool,
}

impl ChatRequest {
    /// Builds a request with a fresh random seed.
    pub fn from_context(ctx: &ReviewContext, stream: bool) -> Self {
        Self {
            system: ctx.system.clone(),
            user: ctx.data_payload().to_string(),
            seed: fresh_seed(),
            stream,
        }
    }
}

/// Random 63-bit seed (positive as a signed integer on every backend).
pub fn fresh_seed() -> u64 {
    let (hi, _) = uuid::Uuid::new_v4().as_u64_pair();
    hi >> 1
}

/// OpenAI-style `tools` definition for [`REPLY_TOOL_NAME`].
pub fn reply_tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": REPLY_TOOL_NAME,
            "description": "Return the review replies for the patch.",
            "parameters": {
                "type": "object",
                "properties": {
                    "changeId": { "type": "string" },
                    "messageContent": { "type": "string" },
                    "replies": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "integer" },
                                "reply": { "type": "string" },
                                "score": { "type": "integer" },
                                "relevance": { "type": "number" },
                                "repeated": { "type": "boolean" },
                                "conflicting": { "type": "boolean" },
                                "filename": { "type": "string" },
                                "lineNumber": { "type": "integer" },
                                "codeSnippet": { "type": "string" },
                                "range": {
                                    "type": "object",
                                    "properties": {
                                        "startLine": { "type": "integer" },
                                        "endLine": { "type": "integer" },
                                        "startCharacter": { "type": "integer" },
                                        "endCharacter": { "type": "integer" }
                                    }
                                }
                            },
                            "required": ["reply"]
                        }
                    }
                },
                "required": ["changeId"]
            }
        }
    })
}

/// Character/line range proposed by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRange {
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub start_line: Option<i64>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub end_line: Option<i64>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub start_character: Option<i64>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub end_character: Option<i64>,
}

/// One structured comment unit returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyItem {
    /// Index of the existing comment this reply answers.
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub id: Option<i64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub line_number: Option<i64>,
    #[serde(default)]
    pub range: Option<ReplyRange>,
    #[serde(default)]
    pub code_snippet: Option<String>,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub score: Option<i64>,
    #[serde(default)]
    pub relevance: Option<f64>,
    #[serde(default)]
    pub repeated: Option<bool>,
    #[serde(default)]
    pub conflicting: Option<bool>,
}

/// Parsed tool-call payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContent {
    #[serde(default)]
    pub replies: Option<Vec<ReplyItem>>,
    #[serde(default)]
    pub message_content: Option<String>,
    /// Echoed correlation id.
    #[serde(default)]
    pub change_id: Option<String>,
}

impl ResponseContent {
    /// Parses assembled argument text.
    ///
    /// A payload without `replies` and without `messageContent` is rejected:
    /// it carries nothing the reviewer could use.
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err("empty tool-call arguments".into());
        }
        let content: ResponseContent =
            serde_json::from_str(trimmed).map_err(|e| format!("invalid arguments json: {e}"))?;
        if content.replies.is_none() && content.message_content.is_none() {
            return Err("arguments carry neither `replies` nor `messageContent`".into());
        }
        Ok(content)
    }

    /// Merges several tool-call payloads of one response, in order.
    ///
    /// Replies are concatenated; the first message content and the first
    /// correlation id win.
    pub fn merge(parts: Vec<ResponseContent>) -> Option<ResponseContent> {
        let mut iter = parts.into_iter();
        let mut acc = iter.next()?;
        for p in iter {
            if let Some(more) = p.replies {
                acc.replies.get_or_insert_with(Vec::new).extend(more);
            }
            if acc.message_content.is_none() {
                acc.message_content = p.message_content;
            }
            if acc.change_id.is_none() {
                acc.change_id = p.change_id;
            }
        }
        Some(acc)
    }

    /// Correlation check: no echoed id, or the echoed id equals `sent`.
    pub fn correlates_with(&self, sent: &str) -> bool {
        match self.change_id.as_deref() {
            None => true,
            Some(id) => id == sent,
        }
    }
}

/// Accepts integers, floats (truncated), numeric strings and null.
fn de_lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_numbers_directives_and_skips_empty_parts() {
        let ctx = ReviewContext {
            change_id: "I42".into(),
            system: "sys".into(),
            patch: "diff".into(),
            history: vec![],
            directives: vec!["no unwrap".into(), "prefer iterators".into()],
            code_context: Some(String::new()),
        };
        let p = ctx.data_payload();
        assert_eq!(p["changeId"], "I42");
        assert_eq!(p["directives"]["1"], "no unwrap");
        assert_eq!(p["directives"]["2"], "prefer iterators");
        assert!(p.get("history").is_none());
        assert!(p.get("codeContext").is_none());
    }

    #[test]
    fn lenient_fields_accept_strings_and_floats() {
        let c = ResponseContent::parse(
            r#"{"replies":[{"id":"2","reply":"x","lineNumber":12.0,"score":"-1","relevance":0.8}],"changeId":"a"}"#,
        )
        .unwrap();
        let r = &c.replies.unwrap()[0];
        assert_eq!(r.id, Some(2));
        assert_eq!(r.line_number, Some(12));
        assert_eq!(r.score, Some(-1));
        assert_eq!(r.relevance, Some(0.8));
    }

    #[test]
    fn payload_without_replies_or_message_is_malformed() {
        assert!(ResponseContent::parse(r#"{"changeId":"a"}"#).is_err());
        assert!(ResponseContent::parse("not json").is_err());
        assert!(ResponseContent::parse("   ").is_err());
        assert!(ResponseContent::parse(r#"{"messageContent":"hi"}"#).is_ok());
    }

    #[test]
    fn correlation_rules() {
        let none = ResponseContent::parse(r#"{"replies":[]}"#).unwrap();
        assert!(none.correlates_with("abc"));

        let same = ResponseContent::parse(r#"{"replies":[],"changeId":"abc"}"#).unwrap();
        assert!(same.correlates_with("abc"));

        let other = ResponseContent::parse(r#"{"replies":[],"changeId":"xyz"}"#).unwrap();
        assert!(!other.correlates_with("abc"));
    }

    #[test]
    fn merge_concatenates_replies_in_order() {
        let a = ResponseContent::parse(r#"{"replies":[{"reply":"one"}],"changeId":"c"}"#).unwrap();
        let b = ResponseContent::parse(r#"{"replies":[{"reply":"two"}]}"#).unwrap();
        let merged = ResponseContent::merge(vec![a, b]).unwrap();
        let texts: Vec<_> = merged
            .replies
            .unwrap()
            .into_iter()
            .map(|r| r.reply.unwrap())
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(merged.change_id.as_deref(), Some("c"));
        assert!(ResponseContent::merge(vec![]).is_none());
    }

    #[test]
    fn seeds_differ_between_requests() {
        let ctx = ReviewContext::default();
        let a = ChatRequest::from_context(&ctx, false);
        let b = ChatRequest::from_context(&ctx, false);
        assert_ne!(a.seed, b.seed);
        assert!(a.seed <= i64::MAX as u64);
    }
}
