use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Outcome of running one testcase against one conversation
///
/// Ordered by severity: `None < Pass < Inconclusive < Fail < Error`.
/// During a run the verdict only ever moves towards `Error`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    None,
    Pass,
    Inconclusive,
    Fail,
    Error,
}

impl Verdict {
    pub const fn rank(self) -> u8 {
        match self {
            Verdict::None => 0,
            Verdict::Pass => 1,
            Verdict::Inconclusive => 2,
            Verdict::Fail => 3,
            Verdict::Error => 4,
        }
    }

    /// Rank used when merging results over several conversations: a single
    /// pass outweighs any number of inconclusive runs.
    pub const fn report_rank(self) -> u8 {
        match self {
            Verdict::None => 0,
            Verdict::Inconclusive => 1,
            Verdict::Pass => 2,
            Verdict::Fail => 3,
            Verdict::Error => 4,
        }
    }

    pub fn is_worse_than(self, other: Verdict) -> bool {
        self.rank() > other.rank()
    }

    pub fn worst(self, other: Verdict) -> Verdict {
        if other.is_worse_than(self) { other } else { self }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::None => "none",
            Verdict::Pass => "pass",
            Verdict::Inconclusive => "inconclusive",
            Verdict::Fail => "fail",
            Verdict::Error => "error",
        }
    }
}

impl PartialOrd for Verdict {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Verdict {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Verdict::None < Verdict::Pass);
        assert!(Verdict::Pass < Verdict::Inconclusive);
        assert!(Verdict::Inconclusive < Verdict::Fail);
        assert!(Verdict::Fail < Verdict::Error);
        assert!(Verdict::Fail.is_worse_than(Verdict::Pass));
        assert!(!Verdict::Pass.is_worse_than(Verdict::Pass));
    }

    #[test]
    fn test_worst() {
        assert_eq!(Verdict::Pass.worst(Verdict::Fail), Verdict::Fail);
        assert_eq!(Verdict::Error.worst(Verdict::Inconclusive), Verdict::Error);
        assert_eq!(Verdict::None.worst(Verdict::None), Verdict::None);
    }

    #[test]
    fn test_report_rank_prefers_pass() {
        assert!(Verdict::Pass.report_rank() > Verdict::Inconclusive.report_rank());
        assert!(Verdict::Fail.report_rank() > Verdict::Pass.report_rank());
    }

    #[test]
    fn test_padded_display() {
        assert_eq!(format!("[{:^6}]", Verdict::Pass), "[ pass ]");
        assert_eq!(format!("[{:^6}]", Verdict::Inconclusive), "[inconclusive]");
    }

    #[test]
    fn test_display_matches_serde_name() {
        for verdict in [
            Verdict::None,
            Verdict::Pass,
            Verdict::Inconclusive,
            Verdict::Fail,
            Verdict::Error,
        ] {
            let serialized = toml::Value::try_from(verdict).unwrap();
            assert_eq!(serialized.as_str(), Some(verdict.as_str()));
        }
    }
}
