//! Output classifier behaviour: transition table, framing and recovery.

use agent_bridge::classifier::OutputClassifier;
use agent_bridge::config::MarkerConfig;
use agent_bridge::models::event::{ParseEvent, ParserState};

fn classifier() -> OutputClassifier {
    OutputClassifier::new(MarkerConfig::default())
}

fn classify(input: &[u8]) -> (Vec<ParseEvent>, ParserState) {
    let mut c = classifier();
    let events = c.feed(input);
    (events, c.state())
}

const TRANSCRIPT: &str = "\
hello there
Planning: Refactor module
1. split parser
2. add tests
Done
```rust
fn main() {}
```
Executing: git_commit -m \"wip\"
[main 1a2b3c] wip
Done
Writing: src/lib.rs
READY
";

#[test]
fn planning_block_then_completion_returns_to_idle() {
    let mut c = classifier();

    let events = c.feed(b"Planning: Refactor module\n");
    assert_eq!(events, vec![ParseEvent::PlanStart("Refactor module".into())]);
    assert_eq!(c.state(), ParserState::Thinking);

    let events = c.feed(b"Done\n");
    assert!(events.is_empty());
    assert_eq!(c.state(), ParserState::Idle);
}

#[test]
fn python_code_block_emits_start_appends_end() {
    let (events, state) = classify(b"```python\nimport os\nprint(os.getcwd())\n```\n");

    assert_eq!(
        events,
        vec![
            ParseEvent::CodeBlockStart("python".into()),
            ParseEvent::CodeBlockAppend("import os".into()),
            ParseEvent::CodeBlockAppend("print(os.getcwd())".into()),
            ParseEvent::CodeBlockEnd,
        ]
    );
    assert_eq!(state, ParserState::Idle);
}

#[test]
fn bare_fence_opens_block_without_language() {
    let (events, state) = classify(b"```\n");
    assert_eq!(events, vec![ParseEvent::CodeBlockStart(String::new())]);
    assert_eq!(state, ParserState::CodeGeneration);
}

#[test]
fn tool_call_carries_name_and_args() {
    let (events, state) = classify(b"Executing: terminal_exec cargo build --release\ncompiling\nDone\n");

    assert_eq!(
        events,
        vec![
            ParseEvent::ToolCallStart {
                name: "terminal_exec".into(),
                args: "cargo build --release".into(),
            },
            ParseEvent::ToolCallOutput("compiling".into()),
            ParseEvent::ToolCallEnd,
        ]
    );
    assert_eq!(state, ParserState::Idle);
}

#[test]
fn file_update_line_in_idle() {
    let (events, state) = classify(b"Writing: src/main.rs\n");
    assert_eq!(events, vec![ParseEvent::FileUpdate("src/main.rs".into())]);
    assert_eq!(state, ParserState::Idle);
}

#[test]
fn idle_marker_closes_open_code_block() {
    let (events, state) = classify(b"```sh\nls\nREADY\n");
    assert_eq!(
        events,
        vec![
            ParseEvent::CodeBlockStart("sh".into()),
            ParseEvent::CodeBlockAppend("ls".into()),
            ParseEvent::CodeBlockEnd,
            ParseEvent::Complete,
        ]
    );
    assert_eq!(state, ParserState::Idle);
}

#[test]
fn idle_marker_as_code_line_ends_the_block() {
    // The marker has no escape: a fenced line reading exactly `READY` ends
    // the block and the turn, and the rest is classified from `Idle`.
    let (events, state) = classify(b"```text\nbefore\n  READY  \nafter\n```\n");
    assert_eq!(
        events,
        vec![
            ParseEvent::CodeBlockStart("text".into()),
            ParseEvent::CodeBlockAppend("before".into()),
            ParseEvent::CodeBlockEnd,
            ParseEvent::Complete,
            ParseEvent::Chunk("after".into()),
            ParseEvent::CodeBlockStart(String::new()),
        ]
    );
    assert_eq!(state, ParserState::CodeGeneration);
}

#[test]
fn idle_marker_in_planning_completes_silently() {
    let (events, state) = classify(b"Planning: x\nREADY\n");
    assert_eq!(
        events,
        vec![ParseEvent::PlanStart("x".into()), ParseEvent::Complete]
    );
    assert_eq!(state, ParserState::Idle);
}

#[test]
fn crlf_line_endings_are_stripped() {
    let (events, _) = classify(b"Planning: Windows\r\nstep\r\n");
    assert_eq!(
        events,
        vec![
            ParseEvent::PlanStart("Windows".into()),
            ParseEvent::PlanStep("step".into()),
        ]
    );
}

#[test]
fn partial_line_is_held_until_terminated() {
    let mut c = classifier();

    assert!(c.feed(b"Plann").is_empty());
    assert_eq!(c.pending_bytes(), 5);
    assert!(c.feed(b"ing: later").is_empty());

    let events = c.feed(b"\n");
    assert_eq!(events, vec![ParseEvent::PlanStart("later".into())]);
    assert_eq!(c.pending_bytes(), 0);
}

/// Feed `input` split at every byte offset and compare with a single feed.
fn assert_split_invariant(make: impl Fn() -> OutputClassifier, input: &[u8]) -> Vec<ParseEvent> {
    let mut whole = make();
    let expected = whole.feed(input);
    let expected_state = whole.state();

    for split in 0..=input.len() {
        let mut c = make();
        let mut events = c.feed(&input[..split]);
        events.extend(c.feed(&input[split..]));
        assert_eq!(events, expected, "split at byte {split}");
        assert_eq!(c.state(), expected_state, "split at byte {split}");
    }
    expected
}

#[test]
fn every_two_way_split_matches_unsplit() {
    let expected = assert_split_invariant(classifier, TRANSCRIPT.as_bytes());
    assert!(expected.contains(&ParseEvent::Complete));
}

#[test]
fn invalid_utf8_line_does_not_depend_on_split() {
    let expected = assert_split_invariant(classifier, b"\xff bad\nPlanning: keep me\nstep\n");

    assert_eq!(expected.len(), 3, "unexpected events: {expected:?}");
    assert!(matches!(&expected[0], ParseEvent::ParseError(r) if r.contains("utf-8")));
    assert_eq!(expected[1], ParseEvent::PlanStart("keep me".into()));
    assert_eq!(expected[2], ParseEvent::PlanStep("step".into()));
}

#[test]
fn invalid_utf8_inside_block_does_not_depend_on_split() {
    let expected = assert_split_invariant(classifier, b"```py\nx = 1\n\xfe\nafter\nREADY\n");

    assert_eq!(expected.len(), 5, "unexpected events: {expected:?}");
    assert_eq!(expected[0], ParseEvent::CodeBlockStart("py".into()));
    assert_eq!(expected[1], ParseEvent::CodeBlockAppend("x = 1".into()));
    assert!(matches!(expected[2], ParseEvent::ParseError(_)));
    // Back in Idle, so the next line is plain text.
    assert_eq!(expected[3], ParseEvent::Chunk("after".into()));
    assert_eq!(expected[4], ParseEvent::Complete);
}

#[test]
fn overlong_line_does_not_depend_on_split() {
    let make = || OutputClassifier::with_max_line(MarkerConfig::default(), 16);
    let expected = assert_split_invariant(
        make,
        b"Planning: p\nthis line is far too long for the limit\nshort\nREADY\n",
    );

    assert_eq!(expected.len(), 4, "unexpected events: {expected:?}");
    assert_eq!(expected[0], ParseEvent::PlanStart("p".into()));
    assert!(matches!(&expected[1], ParseEvent::ParseError(r) if r.contains("too long")));
    assert_eq!(expected[2], ParseEvent::Chunk("short".into()));
    assert_eq!(expected[3], ParseEvent::Complete);
}

#[test]
fn byte_at_a_time_matches_unsplit() {
    let input = TRANSCRIPT.as_bytes();
    let (expected, _) = classify(input);

    let mut c = classifier();
    let events: Vec<ParseEvent> = input.iter().flat_map(|b| c.feed(&[*b])).collect();
    assert_eq!(events, expected);
}

#[test]
fn split_inside_multibyte_character_is_invariant() {
    let input = "Planning: résumé ✓\n".as_bytes();
    let (expected, _) = classify(input);

    for split in 0..=input.len() {
        let mut c = classifier();
        let mut events = c.feed(&input[..split]);
        events.extend(c.feed(&input[split..]));
        assert_eq!(events, expected, "split at byte {split}");
    }
}

#[test]
fn invalid_utf8_emits_parse_error_and_resets() {
    let mut c = classifier();
    assert_eq!(
        c.feed(b"Planning: x\n"),
        vec![ParseEvent::PlanStart("x".into())]
    );

    let events = c.feed(b"\xff\xfe broken\n");
    assert_eq!(events.len(), 1);
    assert!(
        matches!(&events[0], ParseEvent::ParseError(reason) if reason.contains("utf-8")),
        "unexpected events: {events:?}"
    );
    assert_eq!(c.state(), ParserState::Idle);

    // The classifier keeps working after recovery.
    assert_eq!(c.feed(b"after\n"), vec![ParseEvent::Chunk("after".into())]);
}

#[test]
fn overlong_line_emits_parse_error() {
    let mut c = OutputClassifier::with_max_line(MarkerConfig::default(), 16);

    let events = c.feed(b"this line is far too long for the limit\n");
    assert!(
        matches!(events.as_slice(), [ParseEvent::ParseError(reason)] if reason.contains("too long")),
        "unexpected events: {events:?}"
    );
    assert_eq!(c.pending_bytes(), 0);
    assert_eq!(c.feed(b"short\n"), vec![ParseEvent::Chunk("short".into())]);
}

#[test]
fn finish_flushes_unterminated_fragment() {
    let mut c = classifier();
    assert!(c.feed(b"tail without newline").is_empty());
    assert_eq!(
        c.finish(),
        vec![ParseEvent::Chunk("tail without newline".into())]
    );
    assert!(c.finish().is_empty());
}

#[test]
fn reset_discards_buffer_and_state() {
    let mut c = classifier();
    c.feed(b"```rust\nfn partial(");
    assert_eq!(c.state(), ParserState::CodeGeneration);
    assert!(c.pending_bytes() > 0);

    c.reset();

    assert_eq!(c.state(), ParserState::Idle);
    assert_eq!(c.pending_bytes(), 0);
    assert_eq!(c.feed(b"next\n"), vec![ParseEvent::Chunk("next".into())]);
}

#[test]
fn custom_markers_are_honoured() {
    let markers = MarkerConfig {
        plan_prefix: "PLAN>".into(),
        exec_prefix: "RUN>".into(),
        completion: "END".into(),
        ..MarkerConfig::default()
    };
    let mut c = OutputClassifier::new(markers);

    let events = c.feed(b"PLAN> think\nEND\nRUN> list_files .\nEND\n");
    assert_eq!(
        events,
        vec![
            ParseEvent::PlanStart("think".into()),
            ParseEvent::ToolCallStart {
                name: "list_files".into(),
                args: ".".into(),
            },
            ParseEvent::ToolCallEnd,
        ]
    );
}
