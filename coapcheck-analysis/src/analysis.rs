//! Batch analysis of a capture
//!
//! [`analyse`] tracks the frames, groups the conversations by address pair,
//! runs every selected testcase against every conversation of each pair and
//! aggregates the verdicts into a [`Report`].
use crate::conversation::{group_by_pair, Conversation};
use crate::testcase::{run_testcase, Testcase, TestcaseResult};
use crate::tracker::Tracker;
use coapcheck_core::config::{Config, Profile, TimingConfig};
use coapcheck_core::frame::{Frame, FrameId};
use coapcheck_core::verdict::Verdict;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("testcase filter {0:?} did not yield any testcase")]
    NoTestcase(String),

    #[error("no testcase available for profile {0:?}")]
    EmptyProfile(Profile),
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub urifilter: bool,
    pub profile: Profile,
    /// Case-insensitive substring of the testcase names to run
    pub testcase_filter: Option<String>,
    pub verbose: bool,
    pub timing: TimingConfig,
}

impl AnalysisOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            urifilter: config.analysis.urifilter,
            profile: config.analysis.profile,
            testcase_filter: config.analysis.testcase_filter.clone(),
            verbose: config.analysis.verbose,
            timing: config.timing,
        }
    }
}

/// Pick the testcases matching the profile and the name filter
pub fn select_testcases<'c>(
    catalogue: &[&'c dyn Testcase],
    profile: Profile,
    filter: Option<&str>,
) -> Result<Vec<&'c dyn Testcase>, AnalysisError> {
    let reverse_proxy = profile == Profile::ReverseProxy;
    let mut selected: Vec<&dyn Testcase> = catalogue
        .iter()
        .copied()
        .filter(|t| !t.obsolete() && t.reverse_proxy() == reverse_proxy)
        .collect();
    if selected.is_empty() {
        return Err(AnalysisError::EmptyProfile(profile));
    }

    if let Some(filter) = filter {
        let needle = filter.to_lowercase();
        selected.retain(|t| t.name().to_lowercase().contains(&needle));
        if selected.is_empty() {
            return Err(AnalysisError::NoTestcase(filter.to_owned()));
        }
    }
    Ok(selected)
}

/// Aggregated outcome of one testcase over the conversations of a pair
#[derive(Debug, Clone)]
pub struct TestcaseSummary {
    pub testcase: &'static str,
    pub verdict: Verdict,
    /// Union of the failed frames of all results
    pub failed_frames: BTreeSet<FrameId>,
    /// Results whose verdict is not `none`, in conversation order
    pub results: Vec<TestcaseResult>,
}

impl TestcaseSummary {
    fn aggregate(testcase: &'static str, results: Vec<TestcaseResult>) -> Self {
        let mut verdict = Verdict::None;
        let mut failed_frames = BTreeSet::new();
        for result in &results {
            if result.verdict.report_rank() > verdict.report_rank() {
                verdict = result.verdict;
            }
            failed_frames.extend(result.failed_frames.iter().copied());
        }
        Self {
            testcase,
            verdict,
            failed_frames,
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub client: IpAddr,
    pub server: IpAddr,
    pub testcases: Vec<TestcaseSummary>,
}

impl PairReport {
    pub fn summary(&self, testcase: &str) -> Option<&TestcaseSummary> {
        self.testcases.iter().find(|s| s.testcase == testcase)
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub conversations: Vec<Conversation>,
    pub ignored_frames: Vec<Frame>,
    pub pairs: Vec<PairReport>,
    pub verbose: bool,
}

impl Report {
    /// Every analysed frame, in id order
    pub fn frames(&self) -> Vec<&Frame> {
        let mut frames: Vec<&Frame> = self
            .conversations
            .iter()
            .flat_map(|c| c.frames.iter())
            .chain(self.ignored_frames.iter())
            .collect();
        frames.sort_by_key(|f| f.id);
        frames
    }

    pub fn malformed_frames(&self) -> impl Iterator<Item = &Frame> {
        self.ignored_frames.iter().filter(|f| f.decode_error.is_some())
    }

    /// Worst reported verdict over all pairs
    pub fn overall_verdict(&self) -> Verdict {
        self.pairs
            .iter()
            .flat_map(|p| p.testcases.iter())
            .map(|s| s.verdict)
            .max_by_key(|v| v.report_rank())
            .unwrap_or_default()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in self.frames() {
            writeln!(f, "{:5} {}", frame.id, frame.summary())?;
        }

        let malformed: Vec<&Frame> = self.malformed_frames().collect();
        writeln!(f, "\n{} malformed frames", malformed.len())?;
        for frame in malformed {
            writeln!(f, "{:5} {}", frame.id, frame.decode_error.as_deref().unwrap_or_default())?;
        }

        writeln!(f, "\n{} ignored frames", self.ignored_frames.len())?;
        for frame in &self.ignored_frames {
            writeln!(f, "{:5} {}", frame.id, frame.summary())?;
        }

        writeln!(f, "\n{} CoAP conversations", self.conversations.len())?;
        for conv in &self.conversations {
            writeln!(
                f,
                "    ---- Conversation {}    ({}, {}) ----",
                conv.id, conv.tag.0, conv.tag.1
            )?;
            for frame in &conv.frames {
                writeln!(f, "    {:5} {}", frame.id, frame.summary())?;
            }
        }

        writeln!(f, "\nTestcase results")?;
        for pair in &self.pairs {
            writeln!(f, "---- Pair  {} -> {} ----", pair.client, pair.server)?;
            for summary in &pair.testcases {
                writeln!(f, " --- Testcase {} ---", summary.testcase)?;
                for result in &summary.results {
                    writeln!(
                        f,
                        "    -- Conversation {} -> {} --",
                        result.conversation, result.verdict
                    )?;
                    if self.verbose {
                        for line in result.text.lines() {
                            writeln!(f, "\t{line}")?;
                        }
                    }
                }
                write!(f, "    => {}", summary.verdict)?;
                if !summary.failed_frames.is_empty() {
                    let ids: Vec<String> = summary.failed_frames.iter().map(|id| id.to_string()).collect();
                    write!(f, " (review frames {})", ids.join(", "))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Analyse a capture against `catalogue`
pub fn analyse(
    frames: Vec<Frame>,
    options: &AnalysisOptions,
    catalogue: &[&dyn Testcase],
) -> Result<Report, AnalysisError> {
    let selected = select_testcases(catalogue, options.profile, options.testcase_filter.as_deref())?;
    let force = selected.len() == 1;
    debug!(
        "selected {} testcases{}",
        selected.len(),
        if force { " (forced)" } else { "" }
    );

    let frame_count = frames.len();
    let mut tracker = Tracker::with_timing(&options.timing);
    tracker.append(frames);
    let (mut conversations, ignored_frames) = tracker.into_parts();
    let groups = group_by_pair(&mut conversations);
    info!(
        "{} frames: {} conversations, {} ignored, {} pairs",
        frame_count,
        conversations.len(),
        ignored_frames.len(),
        groups.len()
    );

    let pairs: Vec<PairReport> = groups
        .iter()
        .map(|pair| {
            let testcases = selected
                .par_iter()
                .map(|testcase| {
                    let results: Vec<TestcaseResult> = pair
                        .conversations
                        .par_iter()
                        .map(|&start| run_testcase(*testcase, &conversations, start, options.urifilter, force))
                        .filter(|r| r.verdict != Verdict::None)
                        .collect();
                    TestcaseSummary::aggregate(testcase.name(), results)
                })
                .collect();
            PairReport {
                client: pair.client,
                server: pair.server,
                testcases,
            }
        })
        .collect();

    for pair in &pairs {
        for summary in pair.testcases.iter().filter(|s| s.verdict != Verdict::None) {
            info!(
                "{} -> {}: {} {}",
                pair.client, pair.server, summary.testcase, summary.verdict
            );
        }
    }

    Ok(Report {
        conversations,
        ignored_frames,
        pairs,
        verbose: options.verbose,
    })
}
