//! Integration tests for the testcase engine

mod common;

use coapcheck_analysis::template::Template;
use coapcheck_analysis::testcase::{run_testcase, Halt, Sender, Step, TestRun, Testcase};
use coapcheck_core::message::{Code, MessageType};
use coapcheck_core::test_utils::*;
use coapcheck_core::verdict::Verdict;
use common::{run, run_at, run_forced, track};

/// CON GET /test answered with 2.05 content
struct GetTest;

impl Testcase for GetTest {
    fn name(&self) -> &'static str {
        "TD_TEST_GET"
    }

    fn objective(&self) -> &'static str {
        "GET with content"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        let request = Template::coap(MessageType::Con, Code::GET).and_opt(t.uri("/test", []));
        t.match_coap(Sender::Client, Some(&request), Verdict::Inconclusive)?;
        t.next(false)?;
        let response = Template::Code(Code::CONTENT).and(Template::non_empty_payload());
        t.match_coap(Sender::Server, Some(&response), Verdict::Fail)?;
        Ok(())
    }
}

/// Two GET exchanges in consecutive conversations
struct GoodChaining;

impl Testcase for GoodChaining {
    fn name(&self) -> &'static str {
        "TD_TEST_GOOD_CHAINING"
    }

    fn objective(&self) -> &'static str {
        "chaining two conversations"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        GetTest.run(t)?;
        t.chain(false)?;
        GetTest.run(t)
    }
}

/// Chains before the first conversation is consumed
struct BadChaining;

impl Testcase for BadChaining {
    fn name(&self) -> &'static str {
        "TD_TEST_BAD_CHAINING"
    }

    fn objective(&self) -> &'static str {
        "chaining too early"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        GetTest.run(t)?;
        t.chain(false)?;
        Ok(())
    }
}

struct Panicking;

impl Testcase for Panicking {
    fn name(&self) -> &'static str {
        "TD_TEST_PANIC"
    }

    fn objective(&self) -> &'static str {
        "body panics"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        t.match_coap(Sender::Client, Some(&Template::Code(Code::GET)), Verdict::Inconclusive)?;
        panic!("boom");
    }
}

struct Failing;

impl Testcase for Failing {
    fn name(&self) -> &'static str {
        "TD_TEST_ERROR"
    }

    fn objective(&self) -> &'static str {
        "body reports an error"
    }

    fn run(&self, _: &mut TestRun<'_>) -> Step {
        Err(Halt::Error("bad template".to_owned()))
    }
}

/// Records a fail, then a pass
struct FailThenPass;

impl Testcase for FailThenPass {
    fn name(&self) -> &'static str {
        "TD_TEST_MONOTONIC"
    }

    fn objective(&self) -> &'static str {
        "verdicts never improve"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        t.set_verdict(Verdict::Fail, "first check")?;
        t.set_verdict(Verdict::Pass, "second check")?;
        t.set_verdict(Verdict::Inconclusive, "third check")?;
        t.next(true)?;
        t.next(true)?;
        Ok(())
    }
}

/// Reads every remaining frame optionally
struct Drain;

impl Testcase for Drain {
    fn name(&self) -> &'static str {
        "TD_TEST_DRAIN"
    }

    fn objective(&self) -> &'static str {
        "optional reads"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        t.match_coap(Sender::Client, None, Verdict::Inconclusive)?;
        while t.next(true)?.is_some() {
            t.match_coap(Sender::Any, None, Verdict::Fail)?;
        }
        t.set_verdict(Verdict::Pass, "drained")?;
        if t.frame().is_some() {
            t.set_verdict(Verdict::Fail, "cursor still set")?;
        }
        Ok(())
    }
}

fn get_exchange() -> CaptureBuilder {
    CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/test"))
        .server(0.1, ack_response(Code::CONTENT, 1, b"A").with_payload("hi"))
}

#[test]
fn test_get_exchange_passes() {
    let result = run(&GetTest, get_exchange().build());

    assert_eq!(result.verdict, Verdict::Pass);
    assert_eq!(result.conversation, 1);
    assert!(result.failed_frames.is_empty());
    assert!(result.error.is_none());
    assert!(result.text.contains("<Frame   1:"), "trace: {}", result.text);
    assert!(result.text.contains("  [ pass ] match: "), "trace: {}", result.text);
}

#[test]
fn test_uri_filter_checks_path() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/other"))
        .server(0.1, ack_response(Code::CONTENT, 1, b"A").with_payload("hi"))
        .build();

    let unfiltered = run_at(&GetTest, frames.clone(), 0, false, false);
    assert_eq!(unfiltered.verdict, Verdict::Pass);

    let filtered = run_at(&GetTest, frames, 0, true, false);
    assert_eq!(filtered.verdict, Verdict::None);
}

#[test]
fn test_unanswered_request_is_suppressed_unless_forced() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/test"))
        .build();

    let result = run(&GetTest, frames.clone());
    assert_eq!(result.verdict, Verdict::None);

    let forced = run_forced(&GetTest, frames);
    assert_eq!(forced.verdict, Verdict::Inconclusive);
    assert!(forced.text.contains("premature end of conversation"));
    assert!(forced.text.contains("<Frame   ?>"));
}

#[test]
fn test_first_frame_mismatch_is_not_reported() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::POST, 1, b"A", "/test"))
        .server(0.1, ack_response(Code::CHANGED, 1, b"A"))
        .build();

    let result = run(&GetTest, frames.clone());
    assert_eq!(result.verdict, Verdict::None);

    let forced = run_forced(&GetTest, frames);
    assert_eq!(forced.verdict, Verdict::Fail);
    assert!(forced.text.contains("mismatch: "), "trace: {}", forced.text);
    assert!(forced.text.contains("code: ValueMismatch"), "trace: {}", forced.text);
    assert_eq!(forced.failed_frames.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn test_response_mismatch_fails() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/test"))
        .server(0.1, ack_response(Code::NOT_FOUND, 1, b"A"))
        .build();

    let result = run(&GetTest, frames);

    assert_eq!(result.verdict, Verdict::Fail);
    assert_eq!(result.failed_frames.iter().copied().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_trailing_frame_is_unexpected() {
    let frames = get_exchange()
        .server(0.2, ack_response(Code::CONTENT, 1, b"A").with_payload("hi"))
        .build();

    let result = run(&GetTest, frames);

    assert_eq!(result.verdict, Verdict::Inconclusive);
    assert!(result.text.contains("unexpected frame"));
}

#[test]
fn test_good_chaining() {
    let frames = get_exchange()
        .client(1.0, con_request(Code::GET, 2, b"B", "/test"))
        .server(1.1, ack_response(Code::CONTENT, 2, b"B").with_payload("hi"))
        .build();
    let (conversations, _) = track(frames);

    let first = run_testcase(&GoodChaining, &conversations, 0, false, false);
    assert_eq!(first.verdict, Verdict::Pass, "trace: {}", first.text);
    assert!(first.text.contains("Chaining to conversation 2"));

    let last = run_testcase(&GoodChaining, &conversations, 1, false, false);
    assert_eq!(last.verdict, Verdict::Inconclusive);
    assert!(last.text.contains("expected another CoAP conversation"));
}

#[test]
fn test_chaining_detects_concurrency() {
    let frames = CaptureBuilder::new()
        .client(0.0, con_request(Code::GET, 1, b"A", "/test"))
        .client(0.5, con_request(Code::GET, 2, b"B", "/test"))
        .server(0.6, ack_response(Code::CONTENT, 2, b"B").with_payload("hi"))
        .server(1.0, ack_response(Code::CONTENT, 1, b"A").with_payload("hi"))
        .build();

    let result = run(&GoodChaining, frames);

    assert_eq!(result.verdict, Verdict::Inconclusive);
    assert!(
        result
            .text
            .contains("concurrency issue: frame 2 was received earlier than frame 4"),
        "trace: {}",
        result.text
    );
}

#[test]
fn test_chaining_with_remaining_frames() {
    let frames = get_exchange()
        .server(0.2, ack_response(Code::CONTENT, 1, b"A").with_payload("hi"))
        .client(1.0, con_request(Code::GET, 2, b"B", "/test"))
        .build();

    let result = run(&BadChaining, frames);

    assert_eq!(result.verdict, Verdict::Inconclusive);
    assert!(result.text.contains("unexpected frame"));
    assert!(!result.text.contains("Chaining to conversation"));
}

#[test]
fn test_panic_becomes_error_verdict() {
    let result = run(&Panicking, get_exchange().build());

    assert_eq!(result.verdict, Verdict::Error);
    assert!(result.error.as_deref().is_some_and(|e| e.contains("boom")));
    assert!(result.text.contains("unhandled exception"));
}

#[test]
fn test_halt_error_becomes_error_verdict() {
    let result = run(&Failing, get_exchange().build());

    assert_eq!(result.verdict, Verdict::Error);
    assert_eq!(result.error.as_deref(), Some("bad template"));
}

#[test]
fn test_verdict_never_improves() {
    let result = run(&FailThenPass, get_exchange().build());

    assert_eq!(result.verdict, Verdict::Fail);
    assert!(result.text.contains("  [ fail ] first check"));
    assert!(result.text.contains("  [ pass ] second check"));
    assert!(result.text.contains("  [inconclusive] third check"));
}

#[test]
fn test_optional_read_past_end_clears_cursor() {
    let result = run(&Drain, get_exchange().build());

    assert_eq!(result.verdict, Verdict::Pass, "trace: {}", result.text);
}
