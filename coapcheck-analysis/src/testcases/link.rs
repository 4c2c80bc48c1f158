//! Resource discovery procedures

use super::WELL_KNOWN_CORE;
use crate::testcase::{Step, TestRun, Testcase};
use coapcheck_core::verdict::Verdict;

pub struct TdCoapLink01;

impl Testcase for TdCoapLink01 {
    fn name(&self) -> &'static str {
        "TD_COAP_LINK_01"
    }

    fn objective(&self) -> &'static str {
        "Access to well-known interface for resource discovery"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        t.match_link_format(None, None, WELL_KNOWN_CORE)?;
        let links = t.link_values()?;
        if links.is_empty() {
            t.set_verdict(Verdict::Inconclusive, "no link-value in the discovery payload")?;
        } else {
            t.set_verdict(Verdict::Pass, format!("{} link-values discovered", links.len()))?;
        }
        Ok(())
    }
}

pub struct TdCoapLink02;

impl Testcase for TdCoapLink02 {
    fn name(&self) -> &'static str {
        "TD_COAP_LINK_02"
    }

    fn objective(&self) -> &'static str {
        "Use filtered requests for limiting discovery results"
    }

    fn run(&self, t: &mut TestRun<'_>) -> Step {
        t.match_link_format(Some(&["rt"]), None, WELL_KNOWN_CORE)?;
        let links = t.link_values()?;

        let Some((name, value)) = t.link_filter().map(|(n, v)| (n.to_owned(), v.to_owned())) else {
            return Ok(());
        };
        if links.is_empty() {
            t.set_verdict(Verdict::Inconclusive, format!("no resource matches {name}={value}"))?;
            return Ok(());
        }

        for link in &links {
            let matched = link
                .values(&name)
                .flat_map(str::split_whitespace)
                .any(|v| filter_matches(&value, v));
            if !matched {
                t.set_verdict(
                    Verdict::Fail,
                    format!("link <{}> does not match the filter {name}={value}", link.uri),
                )?;
            }
        }
        Ok(())
    }
}

/// Query filter comparison; a trailing `*` matches any suffix
fn filter_matches(filter: &str, value: &str) -> bool {
    match filter.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => filter == value,
    }
}
