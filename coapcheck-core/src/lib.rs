#![allow(clippy::cargo_common_metadata)]

pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod verdict;

#[cfg(feature = "test-utils")]
pub mod test_utils;
