//! Shared test utilities for the coapcheck workspace
//!
//! Builders for synthetic captures so tests can describe an exchange
//! message by message instead of writing frames by hand. Only available when
//! the "test-utils" feature is enabled.

use crate::frame::{Frame, FrameId};
use crate::message::{BlockValue, CoapMessage, CoapOption, Code, MessageType};
use std::net::SocketAddr;

/// Address used for the client side of synthetic captures
pub fn client_addr() -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 1], 40000))
}

/// Address used for the server side of synthetic captures
pub fn server_addr() -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 2], 5683))
}

/// Confirmable request with a token and a URI
///
/// # Examples
///
/// ```
/// # use coapcheck_core::test_utils::con_request;
/// # use coapcheck_core::message::Code;
/// let msg = con_request(Code::GET, 1, b"A", "/test");
/// assert_eq!(msg.uri(), "/test");
/// ```
pub fn con_request(code: Code, mid: u16, token: &[u8], uri: &str) -> CoapMessage {
    CoapMessage::new(MessageType::Con, code, mid)
        .with_token(token.to_vec())
        .with_uri(uri)
}

pub fn non_request(code: Code, mid: u16, token: &[u8], uri: &str) -> CoapMessage {
    CoapMessage::new(MessageType::Non, code, mid)
        .with_token(token.to_vec())
        .with_uri(uri)
}

/// Piggybacked response
pub fn ack_response(code: Code, mid: u16, token: &[u8]) -> CoapMessage {
    CoapMessage::new(MessageType::Ack, code, mid).with_token(token.to_vec())
}

pub fn empty_ack(mid: u16) -> CoapMessage {
    CoapMessage::new(MessageType::Ack, Code::EMPTY, mid)
}

pub fn reset(mid: u16) -> CoapMessage {
    CoapMessage::new(MessageType::Rst, Code::EMPTY, mid)
}

pub fn block1(num: u32, more: bool, szx: u8) -> CoapOption {
    CoapOption::Block1(BlockValue::new(num, more, szx))
}

pub fn block2(num: u32, more: bool, szx: u8) -> CoapOption {
    CoapOption::Block2(BlockValue::new(num, more, szx))
}

/// Builds a capture between one client and one server
///
/// Frame ids are assigned in insertion order starting at 1.
#[derive(Debug, Clone)]
pub struct CaptureBuilder {
    client: SocketAddr,
    server: SocketAddr,
    frames: Vec<Frame>,
}

impl Default for CaptureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBuilder {
    pub fn new() -> Self {
        Self::between(client_addr(), server_addr())
    }

    pub fn between(client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            client,
            server,
            frames: Vec::new(),
        }
    }

    fn next_id(&self) -> FrameId {
        self.frames.len() as FrameId + 1
    }

    /// Client to server
    pub fn client(mut self, timestamp: f64, message: CoapMessage) -> Self {
        let frame = Frame::coap(self.next_id(), timestamp, self.client, self.server, message);
        self.frames.push(frame);
        self
    }

    /// Server to client
    pub fn server(mut self, timestamp: f64, message: CoapMessage) -> Self {
        let frame = Frame::coap(self.next_id(), timestamp, self.server, self.client, message);
        self.frames.push(frame);
        self
    }

    pub fn non_coap(mut self, timestamp: f64) -> Self {
        let frame = Frame::non_coap(self.next_id(), timestamp, self.client, self.server);
        self.frames.push(frame);
        self
    }

    pub fn malformed(mut self, timestamp: f64, error: &str) -> Self {
        let frame = Frame::malformed(self.next_id(), timestamp, self.client, self.server, error);
        self.frames.push(frame);
        self
    }

    pub fn build(self) -> Vec<Frame> {
        self.frames
    }
}
