//! Frame dump loading
//!
//! The dump is a TOML document with one `[[frame]]` table per captured
//! datagram, in capture order:
//!
//! ```toml
//! [[frame]]
//! id = 1
//! timestamp = 0.0
//! source = "192.0.2.1:40000"
//! destination = "192.0.2.2:5683"
//!
//! [frame.message]
//! type = "CON"
//! code = "GET"
//! mid = 1
//! token = "41"
//! options = [{ name = "uri-path", value = "test" }]
//! ```
use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use coapcheck_core::frame::Frame;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct FrameDump {
    #[serde(default, rename = "frame")]
    frames: Vec<Frame>,
}

pub fn load(path: &Utf8Path) -> Result<Vec<Frame>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read frame dump {path}"))?;
    parse(&content).with_context(|| format!("Invalid frame dump {path}"))
}

pub fn parse(content: &str) -> Result<Vec<Frame>> {
    let dump: FrameDump = toml::from_str(content)?;

    let mut ids = HashSet::new();
    let mut previous: Option<&Frame> = None;
    for frame in &dump.frames {
        frame.validate()?;
        if !ids.insert(frame.id) {
            bail!("duplicate frame id {}", frame.id);
        }
        if let Some(prev) = previous {
            if frame.timestamp < prev.timestamp {
                warn!(
                    "frame {} is older than frame {}; frames are analysed in file order",
                    frame.id, prev.id
                );
            }
        }
        previous = Some(frame);
    }

    debug!("loaded {} frames", dump.frames.len());
    Ok(dump.frames)
}
