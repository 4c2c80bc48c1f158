//! Built-in conformance procedures

mod basic;
mod block;
mod link;
mod observe;

pub use self::basic::{
    TdCoapCore01, TdCoapCore02, TdCoapCore03, TdCoapCore04, TdCoapCore05, TdCoapCore09,
    TdCoapCore10, TdCoapCore11, TdCoapCore12, TdCoapCore13,
};
pub use self::block::{TdCoapBlock01, TdCoapBlock02};
pub use self::link::{TdCoapLink01, TdCoapLink02};
pub use self::observe::TdCoapObs01;

use crate::testcase::{Halt, Step, TestRun, Testcase};
use coapcheck_core::message::CoapMessage;

/// Path of the resource discovery interface
pub const WELL_KNOWN_CORE: &str = "/.well-known/core";

static CATALOGUE: &[&dyn Testcase] = &[
    &TdCoapBlock01,
    &TdCoapBlock02,
    &TdCoapCore01,
    &TdCoapCore02,
    &TdCoapCore03,
    &TdCoapCore04,
    &TdCoapCore05,
    &TdCoapCore09,
    &TdCoapCore10,
    &TdCoapCore11,
    &TdCoapCore12,
    &TdCoapCore13,
    &TdCoapLink01,
    &TdCoapLink02,
    &TdCoapObs01,
];

/// All built-in testcases, sorted by name
pub fn catalogue() -> &'static [&'static dyn Testcase] {
    CATALOGUE
}

/// Message under the cursor; stops the run when there is none
fn current<'a>(t: &TestRun<'a>) -> Step<&'a CoapMessage> {
    t.message().ok_or(Halt::Stop)
}
