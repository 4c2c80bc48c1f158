//! Testcase engine
//!
//! A [`Testcase`] body drives a [`TestRun`] cursor over one conversation
//! (optionally chaining to the following ones of the same pair), matching
//! frames against templates. Every step returns a [`Step`]; `Halt::Stop`
//! ends the run early and is always caught by [`run_testcase`].
use crate::conversation::Conversation;
use crate::link_format::{LinkFormat, LinkValue};
use crate::template::Template;
use bytes::{Bytes, BytesMut};
use coapcheck_core::frame::{Frame, FrameId};
use coapcheck_core::message::{CoapMessage, CoapOption, Code, OptionNumber};
use coapcheck_core::verdict::Verdict;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Control signal ending a run before the body returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Normal early termination; the verdict reflects what was seen so far
    Stop,
    /// Programming error in the testcase body
    Error(String),
}

pub type Step<T = ()> = Result<T, Halt>;

/// Expected originator of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Client,
    Server,
    Any,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sender::Client => "client",
            Sender::Server => "server",
            Sender::Any => "any",
        })
    }
}

/// A named conformance procedure
pub trait Testcase: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line objective shown in reports
    fn objective(&self) -> &'static str;

    /// Whether the procedure targets a reverse proxy rather than a client
    fn reverse_proxy(&self) -> bool {
        false
    }

    fn obsolete(&self) -> bool {
        false
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step;
}

/// Outcome of one testcase against one starting conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestcaseResult {
    pub testcase: &'static str,
    /// Id of the starting conversation
    pub conversation: usize,
    pub verdict: Verdict,
    pub text: String,
    pub failed_frames: BTreeSet<FrameId>,
    pub error: Option<String>,
}

/// Per-run cursor and verdict state
pub struct TestRun<'a> {
    conversations: &'a [Conversation],
    start: usize,
    current: usize,
    /// Index of the next unread frame in the current conversation
    position: usize,
    frame: Option<&'a Frame>,
    last_frame: Option<&'a Frame>,
    verdict: Verdict,
    text: String,
    failed_frames: BTreeSet<FrameId>,
    urifilter: bool,
    force: bool,
    link: Option<LinkFormat>,
    raw_link: Option<Bytes>,
    link_filter: Option<(String, String)>,
}

impl<'a> TestRun<'a> {
    pub fn new(conversations: &'a [Conversation], start: usize, urifilter: bool, force: bool) -> Self {
        Self {
            conversations,
            start,
            current: start,
            position: 0,
            frame: None,
            last_frame: None,
            verdict: Verdict::None,
            text: String::new(),
            failed_frames: BTreeSet::new(),
            urifilter,
            force,
            link: None,
            raw_link: None,
            link_filter: None,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Frame under the cursor, `None` once an optional read ran past the end
    pub fn frame(&self) -> Option<&'a Frame> {
        self.frame
    }

    pub fn message(&self) -> Option<&'a CoapMessage> {
        self.frame.and_then(|f| f.coap_message())
    }

    /// Conversation the run started from
    pub fn conversation(&self) -> &'a Conversation {
        let conversations = self.conversations;
        &conversations[self.start]
    }

    pub fn current_conversation(&self) -> &'a Conversation {
        let conversations = self.conversations;
        &conversations[self.current]
    }

    pub fn failed_frames(&self) -> &BTreeSet<FrameId> {
        &self.failed_frames
    }

    pub fn urifilter(&self) -> bool {
        self.urifilter
    }

    pub fn log(&mut self, text: impl fmt::Display) {
        let text = text.to_string();
        self.text.push_str(&text);
        if !text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    /// Record `verdict` if it is worse than the current one
    ///
    /// An inconclusive verdict on a run that has not yet produced any verdict
    /// stops the run instead, unless the run is forced.
    pub fn set_verdict(&mut self, verdict: Verdict, reason: impl fmt::Display) -> Step {
        if self.verdict == Verdict::None && verdict == Verdict::Inconclusive && !self.force {
            return Err(Halt::Stop);
        }
        if verdict.is_worse_than(self.verdict) {
            self.verdict = verdict;
        }
        self.log(format!("  [{verdict:^6}] {reason}"));
        Ok(())
    }

    /// Advance to the next frame of the current conversation
    ///
    /// Running past the end is inconclusive and stops the run, unless
    /// `optional` is set, in which case the cursor becomes empty.
    pub fn next(&mut self, optional: bool) -> Step<Option<&'a Frame>> {
        match self.current_conversation().frames.get(self.position) {
            Some(frame) => {
                self.position += 1;
                self.log(frame);
                self.frame = Some(frame);
                self.last_frame = Some(frame);
                Ok(Some(frame))
            }
            None if optional => {
                self.frame = None;
                Ok(None)
            }
            None => {
                self.log("<Frame   ?>");
                self.set_verdict(Verdict::Inconclusive, "premature end of conversation")?;
                Err(Halt::Stop)
            }
        }
    }

    /// Like [`next`](Self::next) but skips interleaved empty ACKs
    pub fn next_skip_ack(&mut self, optional: bool) -> Step<Option<&'a Frame>> {
        self.next(optional)?;
        while self.message().is_some_and(|m| m.is_empty_ack()) {
            self.next(optional)?;
        }
        Ok(self.frame)
    }

    fn remaining(&self) -> Option<&'a Frame> {
        self.current_conversation().frames.get(self.position)
    }

    /// Continue with the next conversation of the same pair
    ///
    /// The current conversation must be fully consumed. Returns `false` only
    /// when `optional` is set and there is no next conversation.
    pub fn chain(&mut self, optional: bool) -> Step<bool> {
        if let Some(extra) = self.remaining() {
            self.log(extra);
            self.set_verdict(Verdict::Inconclusive, "unexpected frame")?;
            return Err(Halt::Stop);
        }

        let previous = self.current_conversation();
        let Some(next) = previous.next else {
            if optional {
                return Ok(false);
            }
            self.log("<Frame   ?>");
            self.set_verdict(Verdict::Inconclusive, "expected another CoAP conversation")?;
            return Err(Halt::Stop);
        };

        let last = previous.last_frame();
        self.current = next;
        let following = self.current_conversation();
        self.position = 0;
        self.log(format!(
            "Chaining to conversation {} ({}, {})",
            following.id, following.tag.0, following.tag.1
        ));

        let first = self.next(false)?;
        if let (Some(first), Some(last)) = (first, last) {
            if first.timestamp < last.timestamp {
                self.set_verdict(
                    Verdict::Inconclusive,
                    format!(
                        "concurrency issue: frame {} was received earlier than frame {}",
                        first.id, last.id
                    ),
                )?;
                return Err(Halt::Stop);
            }
        }
        Ok(true)
    }

    /// Check the frame under the cursor
    ///
    /// On failure the frame id is recorded and `severity` applied; a
    /// `Verdict::None` severity checks silently. A successful template match
    /// records a pass.
    pub fn match_coap(
        &mut self,
        sender: Sender,
        template: Option<&Template>,
        severity: Verdict,
    ) -> Step<bool> {
        let expected = match template {
            Some(t) => t.to_string(),
            None => "a message".to_owned(),
        };

        let Some(frame) = self.frame else {
            if severity != Verdict::None {
                self.set_verdict(severity, format!("expected {expected} from the {sender}"))?;
            }
            if let Some(last) = self.last_frame {
                self.failed_frames.insert(last.id);
            }
            return Ok(false);
        };

        let origin = frame.source.ip();
        let wrong_sender = match sender {
            Sender::Client => origin != self.conversation().client(),
            Sender::Server => origin != self.conversation().server(),
            Sender::Any => false,
        };
        if wrong_sender {
            if severity != Verdict::None {
                self.set_verdict(severity, format!("expected {expected} from the {sender}"))?;
            }
            self.failed_frames.insert(frame.id);
            return Ok(false);
        }

        let Some(template) = template else {
            return Ok(true);
        };
        let Some(msg) = frame.coap_message() else {
            return Err(Halt::Error(format!("frame {} is not a CoAP frame", frame.id)));
        };

        match template.matches(msg) {
            Ok(()) => {
                if severity != Verdict::None {
                    self.set_verdict(Verdict::Pass, format!("match: {template}"))?;
                }
                Ok(true)
            }
            Err(mismatches) => {
                if severity != Verdict::None {
                    self.set_verdict(severity, format!("mismatch: {template}"))?;
                    for m in mismatches {
                        self.log(format!("             {}: {}", m.path, m.kind));
                        self.log(format!("                 got:      {}", m.got));
                        self.log(format!("                 expected: {}", m.expected));
                    }
                }
                self.failed_frames.insert(frame.id);
                Ok(false)
            }
        }
    }

    /// Uri-Path/Uri-Query constraints for `uri` when URI filtering is on,
    /// combined with `extra`; `None` when there is nothing to check.
    pub fn uri(&self, uri: &str, extra: impl IntoIterator<Item = Template>) -> Option<Template> {
        let mut parts: Vec<Template> = extra.into_iter().collect();

        if self.urifilter {
            let (path, query) = match uri.split_once('?') {
                Some((path, query)) => (path, query),
                None => (uri, ""),
            };
            let segments: Vec<CoapOption> = path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| CoapOption::UriPath(s.to_owned()))
                .collect();
            if !segments.is_empty() {
                parts.push(Template::OptionSequence(OptionNumber::URI_PATH, segments));
            }
            let queries: Vec<CoapOption> = query
                .split('&')
                .filter(|s| !s.is_empty())
                .map(|s| CoapOption::UriQuery(s.to_owned()))
                .collect();
            if !queries.is_empty() {
                parts.push(Template::OptionSequence(OptionNumber::URI_QUERY, queries));
            }
        }

        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Template::All(parts)),
        }
    }

    /// Max-Age of the current frame, 60 when absent
    pub fn max_age(&self) -> u32 {
        self.message().and_then(|m| m.max_age()).unwrap_or(60)
    }

    /// Parsed payload of the last [`match_link_format`](Self::match_link_format)
    pub fn link(&self) -> Option<&LinkFormat> {
        self.link.as_ref()
    }

    pub fn raw_link(&self) -> Option<&Bytes> {
        self.raw_link.as_ref()
    }

    /// `(name, value)` of the Uri-Query filter seen by `match_link_format`
    pub fn link_filter(&self) -> Option<(&str, &str)> {
        self.link_filter
            .as_ref()
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Match a resource discovery exchange: a client GET on `path` (with an
    /// optional `name=value` query filter) answered by 2.05 link-format
    /// content, possibly split in Block2 blocks. The reassembled payload is
    /// parsed and kept for [`link_values`](Self::link_values).
    pub fn match_link_format(
        &mut self,
        filter: Option<&[&str]>,
        value: Option<&[&str]>,
        path: &str,
    ) -> Step {
        let segments: Vec<CoapOption> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| CoapOption::UriPath(s.to_owned()))
            .collect();
        let path_template = Template::OptionSequence(OptionNumber::URI_PATH, segments);

        let mut options = match filter {
            None => path_template.clone().and(Template::NoOption(OptionNumber::URI_QUERY)),
            Some(_) => path_template.clone().and(Template::Option(OptionNumber::URI_QUERY)),
        };

        if let Some(names) = filter {
            let request = Template::Code(Code::GET).and(options.clone());
            let query = self
                .message()
                .filter(|m| request.is_match(m))
                .and_then(|m| m.uri_query().next())
                .map(str::to_owned);

            if let Some(query) = query {
                let Some((name, val)) = query.split_once('=') else {
                    self.set_verdict(Verdict::Fail, format!("malformed Uri-Query option: {query:?}"))?;
                    return Err(Halt::Stop);
                };

                let mut verdict = Verdict::Pass;
                let mut reason = format!("link-format request with filter on {}", names.join("|"));
                if !names.contains(&name) {
                    verdict = Verdict::Inconclusive;
                }
                if let Some(values) = value {
                    reason.push_str(&format!(" matching {}", values.join("|")));
                    if !values.contains(&val) {
                        verdict = Verdict::Inconclusive;
                    }
                }
                self.set_verdict(verdict, reason)?;
                self.link_filter = Some((name.to_owned(), val.to_owned()));

                options = path_template.and(Template::OptionValue(CoapOption::UriQuery(query.clone())));
            }
        }

        let request = Template::Code(Code::GET).and(options);
        let response = Template::Code(Code::CONTENT)
            .and(Template::OptionValue(CoapOption::ContentFormat(40)));

        let mut szx: Option<u8> = None;
        let mut blocks: BTreeMap<u32, Bytes> = BTreeMap::new();
        let mut last_block = 0;
        let mut payload: Option<Bytes> = None;

        loop {
            if !self.match_coap(Sender::Client, Some(&request), Verdict::Inconclusive)? {
                return Err(Halt::Stop);
            }
            self.next_skip_ack(false)?;

            if !self.match_coap(Sender::Server, Some(&response), Verdict::Inconclusive)? {
                return Err(Halt::Stop);
            }
            let Some(msg) = self.message() else {
                return Err(Halt::Stop);
            };

            let Some(block) = msg.block2() else {
                payload = Some(msg.payload.clone());
                break;
            };

            match szx {
                None => szx = Some(block.szx),
                Some(current) if block.szx > current => {
                    self.set_verdict(Verdict::Inconclusive, "block size seems to be increasing")?;
                    return Err(Halt::Stop);
                }
                Some(current) if block.szx < current => {
                    blocks = reslice_blocks(blocks, current, block.szx);
                    szx = Some(block.szx);
                }
                Some(_) => {}
            }

            blocks.insert(block.num, msg.payload.clone());
            last_block = block.num;
            if !block.more {
                break;
            }
            self.next_skip_ack(false)?;
        }

        self.next_skip_ack(true)?;

        let payload = match payload {
            Some(payload) => payload,
            None => {
                let mut missing = false;
                let mut joined = BytesMut::new();
                for num in 0..=last_block {
                    match blocks.get(&num) {
                        Some(block) => joined.extend_from_slice(block),
                        None => {
                            missing = true;
                            self.set_verdict(Verdict::Inconclusive, format!("block #{num} is missing"))?;
                        }
                    }
                }
                if missing {
                    return Err(Halt::Stop);
                }
                joined.freeze()
            }
        };

        match LinkFormat::parse(&payload) {
            Ok(link) => {
                self.link = Some(link);
                self.raw_link = Some(payload);
                Ok(())
            }
            Err(e) => {
                self.set_verdict(
                    Verdict::Fail,
                    format!("link-format payload is not well-formatted (FormatError: {e})"),
                )?;
                Err(Halt::Stop)
            }
        }
    }

    /// Single-valued parameter of a link-value; an ambiguous parameter fails the run
    pub fn link_param(&mut self, link: &LinkValue, name: &str) -> Step<Option<String>> {
        match link.get(name) {
            Ok(value) => Ok(value.map(str::to_owned)),
            Err(e) => {
                self.set_verdict(Verdict::Fail, e)?;
                Ok(None)
            }
        }
    }

    /// Log the parsed link-values as a table and return them
    ///
    /// Repeated `(uri, anchor, rel)` entries are flagged with a warning.
    pub fn link_values(&mut self) -> Step<Vec<LinkValue>> {
        const PAR_WIDTH: usize = 16;

        let values: Vec<LinkValue> = self
            .link
            .as_ref()
            .map(|l| l.values().to_vec())
            .unwrap_or_default();

        self.log("<Processing link-format payload>");
        let mut entries = HashSet::new();
        for link in &values {
            let mut pars: Vec<String> = link
                .params
                .iter()
                .map(|(n, v)| match v {
                    Some(v) => format!("{n}={v:?}"),
                    None => format!("{n}=None"),
                })
                .collect();

            let mut offset = 0usize;
            for par in pars.iter_mut() {
                let len = par.chars().count();
                if len + offset > PAR_WIDTH {
                    offset = len + offset - PAR_WIDTH;
                } else {
                    let pad = PAR_WIDTH - len - offset;
                    par.push_str(&" ".repeat(pad));
                    offset = 0;
                }
            }

            self.log(format!("           {:<20} {}", format!("{:?}", link.uri), pars.join("  ")));

            let anchor = self.link_param(link, "anchor")?;
            let rel = self.link_param(link, "rel")?;
            if !entries.insert((link.uri.clone(), anchor, rel)) {
                self.log("WARNING: duplicate link ");
            }
        }
        Ok(values)
    }
}

/// Split stored blocks when the server reduces the block size mid-transfer
///
/// Block numbers and sizes are range-checked when frames are loaded, so the
/// renumbered blocks stay below 2^27.
fn reslice_blocks(blocks: BTreeMap<u32, Bytes>, old_szx: u8, new_szx: u8) -> BTreeMap<u32, Bytes> {
    let size = 1usize << (new_szx + 4);
    let mult = 1u32 << (old_szx - new_szx);
    let mut resliced = BTreeMap::new();
    for (num, block) in blocks {
        for i in 0..mult {
            let start = (i as usize * size).min(block.len());
            let end = ((i as usize + 1) * size).min(block.len());
            resliced.insert(num * mult + i, block.slice(start..end));
        }
    }
    resliced
}

/// Run `testcase` starting at `conversations[start]`
///
/// Stops, errors and panics inside the body are contained here; the batch
/// this run belongs to is never aborted.
pub fn run_testcase(
    testcase: &dyn Testcase,
    conversations: &[Conversation],
    start: usize,
    urifilter: bool,
    force: bool,
) -> TestcaseResult {
    let mut run = TestRun::new(conversations, start, urifilter, force);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Step {
        run.next(false)?;
        testcase.run(&mut run)?;

        if let Some(extra) = run.remaining() {
            run.log(extra);
            run.set_verdict(Verdict::Inconclusive, "unexpected frame")?;
        }
        Ok(())
    }));

    let mut error = None;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(Halt::Stop)) => {
            let first = conversations[start].first_frame();
            let on_first_frame = matches!(
                (run.frame, first),
                (Some(current), Some(first)) if std::ptr::eq(current, first)
            );
            if run.verdict == Verdict::Inconclusive && on_first_frame && !force {
                run.verdict = Verdict::None;
            }
        }
        Ok(Err(Halt::Error(message))) => error = Some(message),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error = Some(format!("panic: {message}"));
        }
    }

    if let Some(message) = &error {
        warn!(
            "{} on conversation {}: {}",
            testcase.name(),
            conversations[start].id,
            message
        );
        // an error verdict never stops the run
        let _ = run.set_verdict(Verdict::Error, "unhandled exception");
        run.log(message);
    }

    debug!(
        "{} on conversation {}: {}",
        testcase.name(),
        conversations[start].id,
        run.verdict
    );

    TestcaseResult {
        testcase: testcase.name(),
        conversation: conversations[start].id,
        verdict: run.verdict,
        text: run.text,
        failed_frames: run.failed_frames,
        error,
    }
}
