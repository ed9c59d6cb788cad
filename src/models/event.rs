//! Classifier states and the typed events the classifier emits.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// State of the output classifier's line-driven state machine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParserState {
    /// Between logical units.
    #[default]
    Idle,
    /// Inside a planning block.
    Thinking,
    /// Inside a fenced code block.
    CodeGeneration,
    /// Inside a tool-call block.
    ToolExecution,
}

/// A typed event produced by the output classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// A planning block opened with the given summary.
    PlanStart(String),
    /// One line of a planning block.
    PlanStep(String),
    /// A fenced code block opened with an optional language tag.
    CodeBlockStart(String),
    /// One line of code inside a fenced block.
    CodeBlockAppend(String),
    /// The fenced code block closed.
    CodeBlockEnd,
    /// A tool call started.
    ToolCallStart {
        /// Tool name, also used as the operation type for risk lookup.
        name: String,
        /// Remainder of the announcing line.
        args: String,
    },
    /// One line of tool output.
    ToolCallOutput(String),
    /// The tool call finished.
    ToolCallEnd,
    /// The agent announced a write to the given path.
    FileUpdate(String),
    /// Plain text outside any logical unit.
    Chunk(String),
    /// The agent finished its turn and is waiting for input.
    Complete,
    /// The classifier recovered from an internal invariant violation.
    ParseError(String),
}

impl ParseEvent {
    /// Wire name of the event, used as the `type` of a `session/update`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanStart(_) => "plan_start",
            Self::PlanStep(_) => "plan_step",
            Self::CodeBlockStart(_) => "code_block_start",
            Self::CodeBlockAppend(_) => "code_block_append",
            Self::CodeBlockEnd => "code_block_end",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallOutput(_) => "tool_call_output",
            Self::ToolCallEnd => "tool_call_end",
            Self::FileUpdate(_) => "file_update",
            Self::Chunk(_) => "chunk",
            Self::Complete => "complete",
            Self::ParseError(_) => "parse_error",
        }
    }

    /// Event body carried as the `payload` of a `session/update`.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::PlanStart(text) | Self::PlanStep(text) | Self::Chunk(text) => {
                json!({ "text": text })
            }
            Self::CodeBlockStart(lang) => json!({ "language": lang }),
            Self::CodeBlockAppend(line) | Self::ToolCallOutput(line) => json!({ "line": line }),
            Self::ToolCallStart { name, args } => json!({ "name": name, "args": args }),
            Self::FileUpdate(path) => json!({ "path": path }),
            Self::ParseError(reason) => json!({ "reason": reason, "severity": "low" }),
            Self::CodeBlockEnd | Self::ToolCallEnd | Self::Complete => json!({}),
        }
    }

    /// Classifier state a session follows after this event, if the event moves it.
    #[must_use]
    pub fn next_flow(&self) -> Option<ParserState> {
        match self {
            Self::PlanStart(_) => Some(ParserState::Thinking),
            Self::CodeBlockStart(_) => Some(ParserState::CodeGeneration),
            Self::ToolCallStart { .. } => Some(ParserState::ToolExecution),
            Self::CodeBlockEnd | Self::ToolCallEnd | Self::ParseError(_) => {
                Some(ParserState::Idle)
            }
            _ => None,
        }
    }
}
