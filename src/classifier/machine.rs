//! Line-driven transition table of the output classifier.
//!
//! | State            | Line                         | Next             | Emits                          |
//! |------------------|------------------------------|------------------|--------------------------------|
//! | any              | idle marker                  | `Idle`           | block end (if open), `Complete`|
//! | `Idle`           | planning prefix              | `Thinking`       | `PlanStart(rest)`              |
//! | `Idle`           | fence [+ lang]               | `CodeGeneration` | `CodeBlockStart(lang)`         |
//! | `Idle`           | execution prefix + name      | `ToolExecution`  | `ToolCallStart { name, args }` |
//! | `Idle`           | file prefix + path           | `Idle`           | `FileUpdate(path)`             |
//! | `Idle`           | anything else                | `Idle`           | `Chunk(line)`                  |
//! | `Thinking`       | completion marker            | `Idle`           | nothing                        |
//! | `Thinking`       | anything else                | `Thinking`       | `PlanStep(line)`               |
//! | `CodeGeneration` | bare fence                   | `Idle`           | `CodeBlockEnd`                 |
//! | `CodeGeneration` | anything else                | `CodeGeneration` | `CodeBlockAppend(line)`        |
//! | `ToolExecution`  | completion marker            | `Idle`           | `ToolCallEnd`                  |
//! | `ToolExecution`  | anything else                | `ToolExecution`  | `ToolCallOutput(line)`         |

use crate::config::MarkerConfig;
use crate::models::event::{ParseEvent, ParserState};

/// Result of feeding one complete line to the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// State after the line.
    pub next: ParserState,
    /// Events emitted for the line, in order.
    pub events: Vec<ParseEvent>,
}

impl Step {
    fn stay(state: ParserState, event: ParseEvent) -> Self {
        Self {
            next: state,
            events: vec![event],
        }
    }

    fn to(next: ParserState, events: Vec<ParseEvent>) -> Self {
        Self { next, events }
    }
}

/// Feed one complete line (without its terminator) to the table.
#[must_use]
pub fn step(state: ParserState, line: &str, markers: &MarkerConfig) -> Step {
    let trimmed = line.trim();

    if trimmed == markers.idle {
        let mut events = match state {
            ParserState::CodeGeneration => vec![ParseEvent::CodeBlockEnd],
            ParserState::ToolExecution => vec![ParseEvent::ToolCallEnd],
            ParserState::Idle | ParserState::Thinking => Vec::new(),
        };
        events.push(ParseEvent::Complete);
        return Step::to(ParserState::Idle, events);
    }

    match state {
        ParserState::Idle => step_idle(line, markers),
        ParserState::Thinking => {
            if trimmed == markers.completion {
                Step::to(ParserState::Idle, Vec::new())
            } else {
                Step::stay(state, ParseEvent::PlanStep(line.to_owned()))
            }
        }
        ParserState::CodeGeneration => {
            if trimmed == markers.fence {
                Step::to(ParserState::Idle, vec![ParseEvent::CodeBlockEnd])
            } else {
                Step::stay(state, ParseEvent::CodeBlockAppend(line.to_owned()))
            }
        }
        ParserState::ToolExecution => {
            if trimmed == markers.completion {
                Step::to(ParserState::Idle, vec![ParseEvent::ToolCallEnd])
            } else {
                Step::stay(state, ParseEvent::ToolCallOutput(line.to_owned()))
            }
        }
    }
}

fn step_idle(line: &str, markers: &MarkerConfig) -> Step {
    let head = line.trim_start();

    if let Some(rest) = head.strip_prefix(markers.plan_prefix.as_str()) {
        return Step::to(
            ParserState::Thinking,
            vec![ParseEvent::PlanStart(rest.trim().to_owned())],
        );
    }

    if let Some(rest) = head.strip_prefix(markers.fence.as_str()) {
        let lang = rest.split_whitespace().next().unwrap_or_default();
        return Step::to(
            ParserState::CodeGeneration,
            vec![ParseEvent::CodeBlockStart(lang.to_owned())],
        );
    }

    if let Some(rest) = head.strip_prefix(markers.exec_prefix.as_str()) {
        let rest = rest.trim();
        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if !name.is_empty() {
            return Step::to(
                ParserState::ToolExecution,
                vec![ParseEvent::ToolCallStart {
                    name: name.to_owned(),
                    args: args.trim().to_owned(),
                }],
            );
        }
    }

    if let Some(rest) = head.strip_prefix(markers.file_prefix.as_str()) {
        let path = rest.trim();
        if !path.is_empty() {
            return Step::stay(ParserState::Idle, ParseEvent::FileUpdate(path.to_owned()));
        }
    }

    Step::stay(ParserState::Idle, ParseEvent::Chunk(line.to_owned()))
}
