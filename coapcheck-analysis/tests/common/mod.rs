//! Common test utilities for integration tests
//!
//! Helpers to track a synthetic capture and run a testcase against it.

#![allow(dead_code)]

use coapcheck_analysis::conversation::{group_by_pair, Conversation};
use coapcheck_analysis::testcase::{run_testcase, Testcase, TestcaseResult};
use coapcheck_analysis::tracker::Tracker;
use coapcheck_core::frame::Frame;
use std::collections::BTreeSet;

/// Track `frames` and link conversations of the same pair
pub fn track(frames: Vec<Frame>) -> (Vec<Conversation>, Vec<Frame>) {
    let mut tracker = Tracker::new();
    tracker.append(frames);
    let (mut conversations, ignored) = tracker.into_parts();
    group_by_pair(&mut conversations);
    (conversations, ignored)
}

/// Run `testcase` against the first conversation of the capture
pub fn run(testcase: &dyn Testcase, frames: Vec<Frame>) -> TestcaseResult {
    run_at(testcase, frames, 0, false, false)
}

pub fn run_forced(testcase: &dyn Testcase, frames: Vec<Frame>) -> TestcaseResult {
    run_at(testcase, frames, 0, false, true)
}

pub fn run_at(
    testcase: &dyn Testcase,
    frames: Vec<Frame>,
    start: usize,
    urifilter: bool,
    force: bool,
) -> TestcaseResult {
    let (conversations, _) = track(frames);
    assert!(start < conversations.len(), "capture has no conversation {start}");
    run_testcase(testcase, &conversations, start, urifilter, force)
}

pub fn ids(conversation: &Conversation) -> Vec<u32> {
    conversation.frame_ids().collect()
}

/// Frame ids per conversation, independent of conversation numbering
pub fn partition(conversations: &[Conversation]) -> BTreeSet<Vec<u32>> {
    conversations.iter().map(ids).collect()
}
