use crate::error::{CoapCheckError, Result};
use crate::message::CoapMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Capture-order frame number
pub type FrameId = u32;

/// A captured datagram as handed over by the dissector
///
/// A frame is "non-CoAP" when it carries no message or when decoding failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub timestamp: f64,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    #[serde(default)]
    pub message: Option<CoapMessage>,
    #[serde(default)]
    pub decode_error: Option<String>,
}

impl Frame {
    pub fn coap(
        id: FrameId,
        timestamp: f64,
        source: SocketAddr,
        destination: SocketAddr,
        message: CoapMessage,
    ) -> Self {
        Self {
            id,
            timestamp,
            source,
            destination,
            message: Some(message),
            decode_error: None,
        }
    }

    /// A frame that carried something other than CoAP
    pub fn non_coap(id: FrameId, timestamp: f64, source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            id,
            timestamp,
            source,
            destination,
            message: None,
            decode_error: None,
        }
    }

    pub fn malformed(
        id: FrameId,
        timestamp: f64,
        source: SocketAddr,
        destination: SocketAddr,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id,
            timestamp,
            source,
            destination,
            message: None,
            decode_error: Some(error.into()),
        }
    }

    /// The decoded message, unless the frame is non-CoAP
    pub fn coap_message(&self) -> Option<&CoapMessage> {
        if self.decode_error.is_some() {
            return None;
        }
        self.message.as_ref()
    }

    pub fn is_coap(&self) -> bool {
        self.coap_message().is_some()
    }

    /// A message is present iff no decode error was reported
    pub fn validate(&self) -> Result<()> {
        if self.message.is_some() && self.decode_error.is_some() {
            return Err(CoapCheckError::InvalidFrame(format!(
                "frame {} has both a message and a decode error",
                self.id
            )));
        }
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return Err(CoapCheckError::InvalidFrame(format!(
                "frame {} has invalid timestamp {}",
                self.id, self.timestamp
            )));
        }
        if let Some(msg) = &self.message {
            for block in msg.block1().into_iter().chain(msg.block2()) {
                block.validate().map_err(|e| {
                    CoapCheckError::InvalidFrame(format!("frame {}: {}", self.id, e))
                })?;
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        let body = match (&self.message, &self.decode_error) {
            (_, Some(err)) => format!("decode error: {err}"),
            (Some(msg), None) => msg.summary(),
            (None, None) => "non-CoAP".to_owned(),
        };
        format!("[{} -> {}] {}", self.source, self.destination, body)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Frame {:3}: {}>", self.id, self.summary())
    }
}
