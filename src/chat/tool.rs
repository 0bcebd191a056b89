//! Dataset-aware chat with one declared tool.
//!
//! The model sees the context bundle plus the tool declaration. When it
//! answers with a tool-call JSON object, the batch runs in-process over
//! the unprocessed flagged rows and the reply is a deterministic status:
//! one round-trip, at most one tool invocation, no recursion.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::db::repository::get_flagged;
use crate::llm::{GenerationConfig, LlmClient};
use crate::pipeline::batch::{run_batch, BatchOptions, ImageSource};
use crate::pipeline::AnnotationPipeline;

use super::context::{build_focused_context, build_general_context};
use super::ChatError;

const CHAT_TEMPERATURE: f32 = 0.7;
const MAX_HISTORY_MESSAGES: usize = 10;

pub const ANALYZE_FLAGGED_TOOL: &str = "analyze_flagged";

const CHAT_SYSTEM_PROMPT: &str = "\
You are a medical AI assistant helping radiologists with image annotation
datasets. Answer questions about flagged images, analysis results, dataset
statistics and validation status. Be professional and medically accurate,
reference images by their paths, and recommend human review for critical
cases.

You have ONE tool available:

analyze_flagged: runs the annotation pipeline over the unprocessed
flagged images of the current dataset.
Arguments: \"paths\" (optional array of image paths to restrict to),
\"prompt\" (optional analysis prompt).

To invoke it, reply with ONLY this JSON object and nothing else:
{\"tool\": \"analyze_flagged\", \"paths\": null, \"prompt\": null}

Only invoke the tool when the user explicitly asks to analyze or process
flagged images. Otherwise answer in plain text.";

/// One prior exchange message supplied by the caller-owned session log.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    paths: Option<Vec<String>>,
    #[serde(default)]
    prompt: Option<String>,
}

pub struct ChatTool {
    llm: Arc<dyn LlmClient>,
}

impl ChatTool {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Single entry point. Focused mode iff `request_id` is provided.
    #[allow(clippy::too_many_arguments)]
    pub fn chat(
        &self,
        conn: &mut Connection,
        pipeline: &AnnotationPipeline,
        source: &dyn ImageSource,
        message: &str,
        set_name: i64,
        request_id: Option<i64>,
        history: &[ChatMessage],
        batch_options: &BatchOptions,
    ) -> Result<String, ChatError> {
        let context = match request_id {
            Some(id) => {
                build_focused_context(conn, id)?.ok_or(ChatError::RequestNotFound(id))?
            }
            None => build_general_context(conn, set_name)?,
        };

        let prompt = assemble_prompt(&context, history, message);

        tracing::info!(set_name, focused = request_id.is_some(), "Generating chat response");
        let response = self.llm.generate(
            &prompt,
            CHAT_SYSTEM_PROMPT,
            &GenerationConfig::text(CHAT_TEMPERATURE),
        )?;

        match detect_tool_call(&response) {
            Some(call) if call.tool == ANALYZE_FLAGGED_TOOL => {
                self.run_analyze_flagged(conn, pipeline, source, set_name, call, batch_options)
            }
            Some(call) => Err(ChatError::UnknownTool(call.tool)),
            None => Ok(response),
        }
    }

    fn run_analyze_flagged(
        &self,
        conn: &mut Connection,
        pipeline: &AnnotationPipeline,
        source: &dyn ImageSource,
        set_name: i64,
        call: ToolCall,
        batch_options: &BatchOptions,
    ) -> Result<String, ChatError> {
        let mut rows: Vec<_> = get_flagged(conn, set_name)?
            .into_iter()
            .filter(|r| !r.processed)
            .collect();
        if let Some(ref paths) = call.paths {
            rows.retain(|r| paths.iter().any(|p| p == &r.path_url));
        }

        if rows.is_empty() {
            return Ok(format!(
                "No unprocessed flagged images found in dataset {set_name}."
            ));
        }

        tracing::info!(set_name, count = rows.len(), "Chat tool triggering flagged batch");
        let mut options = batch_options.clone();
        if call.prompt.is_some() {
            options.prompt = call.prompt;
        }

        let result = run_batch(conn, pipeline, source, &rows, &options, None)?;

        let mut reply = format!(
            "Analyzed {} flagged image(s) in dataset {set_name}.",
            result.processed
        );
        if !result.errors.is_empty() {
            reply.push_str(&format!(
                " {} image(s) failed: {}",
                result.errors.len(),
                result.errors.join("; ")
            ));
        }
        Ok(reply)
    }
}

fn assemble_prompt(context: &str, history: &[ChatMessage], message: &str) -> String {
    let mut parts = Vec::new();
    if !context.is_empty() {
        parts.push(format!("CURRENT DATASET CONTEXT:\n{context}"));
    }

    if !history.is_empty() {
        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(MAX_HISTORY_MESSAGES)
            .rev()
            .map(|m| {
                let speaker = match m.role {
                    ChatRole::User => "User",
                    ChatRole::Assistant => "Assistant",
                };
                format!("{speaker}: {}", m.content)
            })
            .collect();
        parts.push(format!("CONVERSATION SO FAR:\n{}", recent.join("\n")));
    }

    parts.push(format!("User: {message}"));
    parts.join("\n\n")
}

/// A reply is a tool call iff the whole (fence-stripped) text parses as a
/// JSON object carrying a "tool" field. Prose mentioning JSON stays prose.
fn detect_tool_call(response: &str) -> Option<ToolCall> {
    let trimmed = response.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.rsplit_once("```"))
        .map(|(body, _)| body.trim())
        .unwrap_or(trimmed);

    if !body.starts_with('{') {
        return None;
    }
    serde_json::from_str(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::{get_request_by_path, save_request, set_flag};
    use crate::llm::MockLlmClient;
    use crate::models::{RequestPayload, ValidationStatus};
    use crate::pipeline::batch::ImageSource;
    use crate::pipeline::summary::SummaryGenerator;
    use crate::pipeline::validation::Validator;
    use crate::pipeline::vision::{png_fixture, MockVisionTool, VisionError, VisionImage};

    const VALID_ANNOTATION_JSON: &str = r#"{
        "findings": [{"label": "Pneumothorax", "location": "Right lung", "severity": "Moderate"}],
        "confidence_score": 0.85
    }"#;

    const VALID_SUMMARY_JSON: &str = r#"{
        "primary_diagnosis": "Right Pneumothorax",
        "summary": "Moderate pneumothorax.",
        "key_findings": ["Right pneumothorax"]
    }"#;

    struct AnyImageSource;
    impl ImageSource for AnyImageSource {
        fn load(&self, _path_url: &str) -> Result<VisionImage, VisionError> {
            Ok(png_fixture())
        }
    }

    fn pipeline() -> AnnotationPipeline {
        AnnotationPipeline::new(
            Arc::new(MockVisionTool::new("pneumothorax present")),
            Validator::new(Arc::new(MockLlmClient::new(VALID_ANNOTATION_JSON)), 2, &[]),
            None,
            SummaryGenerator::new(Arc::new(MockLlmClient::new(VALID_SUMMARY_JSON))),
        )
    }

    fn seed_flagged(conn: &Connection, set: i64, path: &str) {
        save_request(conn, &RequestPayload::placeholder(set, path)).unwrap();
        set_flag(conn, set, path, true).unwrap();
    }

    #[test]
    fn plain_answer_passes_through() {
        let chat = ChatTool::new(Arc::new(MockLlmClient::new(
            "The dataset has two flagged images awaiting review.",
        )));
        let mut conn = open_memory_database().unwrap();
        let pipeline = pipeline();

        let reply = chat
            .chat(
                &mut conn,
                &pipeline,
                &AnyImageSource,
                "How many flagged images are there?",
                7,
                None,
                &[],
                &BatchOptions::default(),
            )
            .unwrap();
        assert!(reply.contains("two flagged images"));
    }

    #[test]
    fn tool_call_runs_batch_and_reports_count() {
        let chat = ChatTool::new(Arc::new(MockLlmClient::new(
            r#"{"tool": "analyze_flagged", "paths": null, "prompt": null}"#,
        )));
        let mut conn = open_memory_database().unwrap();
        seed_flagged(&conn, 7, "/a.jpg");
        seed_flagged(&conn, 7, "/b.jpg");
        let pipeline = pipeline();

        let reply = chat
            .chat(
                &mut conn,
                &pipeline,
                &AnyImageSource,
                "analyze all flagged images",
                7,
                None,
                &[],
                &BatchOptions::default(),
            )
            .unwrap();

        assert!(reply.contains("Analyzed 2 flagged image(s)"), "got: {reply}");
        for path in ["/a.jpg", "/b.jpg"] {
            let row = get_request_by_path(&conn, 7, path).unwrap().unwrap();
            assert!(row.processed);
            assert!(row.flagged);
            assert_eq!(row.validation_status, ValidationStatus::Success);
        }
    }

    #[test]
    fn tool_call_with_no_flagged_rows() {
        let chat = ChatTool::new(Arc::new(MockLlmClient::new(
            r#"{"tool": "analyze_flagged"}"#,
        )));
        let mut conn = open_memory_database().unwrap();
        let pipeline = pipeline();

        let reply = chat
            .chat(
                &mut conn,
                &pipeline,
                &AnyImageSource,
                "analyze flagged",
                7,
                None,
                &[],
                &BatchOptions::default(),
            )
            .unwrap();
        assert!(reply.contains("No unprocessed flagged images"));
    }

    #[test]
    fn tool_call_respects_path_filter() {
        let chat = ChatTool::new(Arc::new(MockLlmClient::new(
            r#"{"tool": "analyze_flagged", "paths": ["/a.jpg"]}"#,
        )));
        let mut conn = open_memory_database().unwrap();
        seed_flagged(&conn, 7, "/a.jpg");
        seed_flagged(&conn, 7, "/b.jpg");
        let pipeline = pipeline();

        let reply = chat
            .chat(
                &mut conn,
                &pipeline,
                &AnyImageSource,
                "analyze /a.jpg",
                7,
                None,
                &[],
                &BatchOptions::default(),
            )
            .unwrap();

        assert!(reply.contains("Analyzed 1 flagged image(s)"));
        assert!(get_request_by_path(&conn, 7, "/a.jpg").unwrap().unwrap().processed);
        assert!(!get_request_by_path(&conn, 7, "/b.jpg").unwrap().unwrap().processed);
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let chat = ChatTool::new(Arc::new(MockLlmClient::new(
            r#"{"tool": "delete_everything"}"#,
        )));
        let mut conn = open_memory_database().unwrap();
        let pipeline = pipeline();

        let err = chat
            .chat(
                &mut conn,
                &pipeline,
                &AnyImageSource,
                "do something",
                7,
                None,
                &[],
                &BatchOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownTool(name) if name == "delete_everything"));
    }

    #[test]
    fn focused_mode_requires_existing_row() {
        let chat = ChatTool::new(Arc::new(MockLlmClient::new("answer")));
        let mut conn = open_memory_database().unwrap();
        let pipeline = pipeline();

        let err = chat
            .chat(
                &mut conn,
                &pipeline,
                &AnyImageSource,
                "what about this one?",
                7,
                Some(404),
                &[],
                &BatchOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ChatError::RequestNotFound(404)));
    }

    #[test]
    fn detect_tool_call_ignores_prose() {
        assert!(detect_tool_call("I would run {\"tool\": ...} here").is_none());
        assert!(detect_tool_call("Plain prose answer.").is_none());
        assert!(detect_tool_call(r#"{"tool": "analyze_flagged"}"#).is_some());

        let fenced = "```json\n{\"tool\": \"analyze_flagged\", \"paths\": [\"/x.jpg\"]}\n```";
        let call = detect_tool_call(fenced).unwrap();
        assert_eq!(call.paths.unwrap(), vec!["/x.jpg"]);
    }

    #[test]
    fn history_included_in_prompt() {
        let history = vec![
            ChatMessage {
                role: ChatRole::User,
                content: "Which images look abnormal?".into(),
            },
            ChatMessage {
                role: ChatRole::Assistant,
                content: "Two show effusions.".into(),
            },
        ];
        let prompt = assemble_prompt("context here", &history, "Flag them please");
        assert!(prompt.contains("CONVERSATION SO FAR:"));
        assert!(prompt.contains("User: Which images look abnormal?"));
        assert!(prompt.contains("Assistant: Two show effusions."));
        assert!(prompt.ends_with("User: Flag them please"));
    }

    #[test]
    fn history_capped_at_ten_messages() {
        let history: Vec<ChatMessage> = (0..15)
            .map(|i| ChatMessage {
                role: ChatRole::User,
                content: format!("message {i}"),
            })
            .collect();
        let prompt = assemble_prompt("", &history, "latest");
        assert!(!prompt.contains("message 4"));
        assert!(prompt.contains("message 5"));
        assert!(prompt.contains("message 14"));
    }
}
