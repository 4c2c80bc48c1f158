pub mod analysis;
pub mod conversation;
pub mod link_format;
pub mod template;
pub mod testcase;
pub mod testcases;
pub mod tracker;

pub use analysis::{analyse, AnalysisError, AnalysisOptions, Report};
pub use conversation::Conversation;
pub use testcase::{run_testcase, Testcase, TestcaseResult};
pub use tracker::Tracker;
