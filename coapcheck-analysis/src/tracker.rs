//! Conversation reconstruction
//!
//! The [`Tracker`] demultiplexes a capture into [`Conversation`]s. Frames are
//! routed to a [`FlowState`] per unordered endpoint pair, which correlates
//! them by token, message id, block-wise transfer and Observe registration.
use crate::conversation::Conversation;
use coapcheck_core::config::TimingConfig;
use coapcheck_core::frame::Frame;
use coapcheck_core::message::{CoapMessage, MessageType, Token};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Key of a block-wise transfer: Block1 uploads are keyed by request token,
/// Block2 downloads by request URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BlockKey {
    Token(Token),
    Uri(String),
}

/// Correlation state for one unordered endpoint pair
///
/// All maps hold indices into the tracker's conversation list.
#[derive(Debug, Default)]
pub struct FlowState {
    /// mid -> (conversation, expiry timestamp)
    by_message_id: HashMap<u16, (usize, f64)>,
    by_request_token: HashMap<Token, usize>,
    by_block: HashMap<BlockKey, usize>,
    observe_by_uri: HashMap<String, usize>,
    observe_by_token: HashMap<Token, usize>,
}

impl FlowState {
    /// Classify one CoAP frame; returns the index of the conversation it
    /// belongs to, creating conversations as needed.
    fn classify(
        &mut self,
        frame: &Frame,
        msg: &CoapMessage,
        conversations: &mut Vec<Conversation>,
        lifetime: f64,
    ) -> Option<usize> {
        let token = &msg.token;

        let mut conv = if msg.is_request() || msg.is_ping() {
            let uri = msg.uri();
            let conv = self.classify_request(frame, msg, &uri, conversations);
            let c = &mut conversations[conv];
            c.uri = Some(uri);
            c.timeout = frame.timestamp + lifetime;
            Some(conv)
        } else if msg.is_response() {
            self.classify_response(msg, conversations)
        } else {
            None
        };

        match msg.mtype {
            MessageType::Con => {
                if let Some(conv) = conv {
                    trace!("by_message_id[{}] = {}", msg.message_id, conv);
                    self.by_message_id
                        .insert(msg.message_id, (conv, frame.timestamp + lifetime));
                }
            }
            MessageType::Ack | MessageType::Rst if conv.is_none() => {
                if let Some(&(found, expiry)) = self.by_message_id.get(&msg.message_id) {
                    if frame.timestamp > expiry {
                        trace!("by_message_id[{}] expired", msg.message_id);
                        self.by_message_id.remove(&msg.message_id);
                    } else {
                        conv = Some(found);
                    }
                }
            }
            _ => {}
        }

        if msg.mtype == MessageType::Rst {
            if let Some(conv) = conv {
                self.deactivate_observe(conv, conversations);
            }
            if let Some(&observed) = self.observe_by_token.get(token) {
                self.deactivate_observe(observed, conversations);
            }
        }

        conv
    }

    fn classify_request(
        &mut self,
        frame: &Frame,
        msg: &CoapMessage,
        uri: &str,
        conversations: &mut Vec<Conversation>,
    ) -> usize {
        let token = &msg.token;

        if let Some(block) = msg.block1() {
            let key = BlockKey::Token(token.clone());
            match self.by_block.get(&key).copied() {
                Some(conv) => {
                    if !block.more {
                        trace!("by_block[{:?}] removed (final block)", key);
                        self.by_block.remove(&key);
                    }
                    return conv;
                }
                None if block.more => {
                    let conv = new_conversation(frame, conversations);
                    trace!("by_block[{:?}] = {}", key, conv);
                    self.by_block.insert(key, conv);
                    return conv;
                }
                None => {}
            }
        } else if msg.block2().is_some() {
            let key = BlockKey::Uri(uri.to_owned());
            if let Some(conv) = self.by_block.remove(&key) {
                trace!("by_block[{:?}] moved to by_request_token", key);
                self.by_request_token.insert(token.clone(), conv);
                return conv;
            }
        }

        let active = self
            .observe_by_uri
            .get(uri)
            .copied()
            .filter(|&c| conversations[c].observe_active);

        let conv = if msg.observe().is_some() {
            let conv = match active {
                Some(conv) => conv,
                None => {
                    let conv = new_conversation(frame, conversations);
                    conversations[conv].observe_active = true;
                    self.observe_by_uri.insert(uri.to_owned(), conv);
                    conv
                }
            };
            self.observe_by_token.insert(token.clone(), conv);
            conv
        } else {
            let conv = match active {
                Some(conv) => {
                    debug!("observation of {} on conversation {} cancelled", uri, conv + 1);
                    self.deactivate_observe(conv, conversations);
                    conv
                }
                None => new_conversation(frame, conversations),
            };
            self.by_request_token.insert(token.clone(), conv);
            conv
        };
        conv
    }

    fn classify_response(
        &mut self,
        msg: &CoapMessage,
        conversations: &[Conversation],
    ) -> Option<usize> {
        let token = &msg.token;
        let conv = self
            .by_request_token
            .remove(token)
            .or_else(|| self.observe_by_token.get(token).copied())?;

        if let Some(block) = msg.block2() {
            if block.more {
                if let Some(uri) = &conversations[conv].uri {
                    trace!("by_block[{:?}] = {}", uri, conv);
                    self.by_block.insert(BlockKey::Uri(uri.clone()), conv);
                }
            }
        }
        Some(conv)
    }

    /// Clear the observe flag and drop the URI registration pointing at it.
    /// The token registration stays so late notifications still attribute.
    fn deactivate_observe(&mut self, conv: usize, conversations: &mut [Conversation]) {
        conversations[conv].observe_active = false;
        self.observe_by_uri.retain(|_, c| *c != conv);
    }
}

fn new_conversation(frame: &Frame, conversations: &mut Vec<Conversation>) -> usize {
    let id = conversations.len() + 1;
    debug!("new conversation {} from frame {}", id, frame.id);
    conversations.push(Conversation::new(id, frame.source, frame.destination));
    id - 1
}

/// Order-independent key of an endpoint pair
fn flow_tag(frame: &Frame) -> (SocketAddr, SocketAddr) {
    if frame.source <= frame.destination {
        (frame.source, frame.destination)
    } else {
        (frame.destination, frame.source)
    }
}

/// Owns the flow states and the reconstructed conversations
#[derive(Debug)]
pub struct Tracker {
    conversations: Vec<Conversation>,
    ignored_frames: Vec<Frame>,
    states: HashMap<(SocketAddr, SocketAddr), FlowState>,
    lifetime: f64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_timing(&TimingConfig::default())
    }

    pub fn with_timing(timing: &TimingConfig) -> Self {
        Self {
            conversations: Vec::new(),
            ignored_frames: Vec::new(),
            states: HashMap::new(),
            lifetime: timing.max_exchange_lifetime(),
        }
    }

    /// Track frames; frames must arrive in capture order across calls
    pub fn append(&mut self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            self.push(frame);
        }
    }

    fn push(&mut self, frame: Frame) {
        let Some(msg) = frame.coap_message() else {
            match &frame.decode_error {
                Some(err) => warn!("frame {}: decode error: {}", frame.id, err),
                None => debug!("frame {}: not a CoAP frame", frame.id),
            }
            self.ignored_frames.push(frame);
            return;
        };

        let state = self.states.entry(flow_tag(&frame)).or_default();
        match state.classify(&frame, msg, &mut self.conversations, self.lifetime) {
            Some(conv) => {
                debug!("frame {} -> conversation {}", frame.id, conv + 1);
                self.conversations[conv].frames.push(frame);
            }
            None => {
                debug!("frame {}: no matching conversation, ignored", frame.id);
                self.ignored_frames.push(frame);
            }
        }
    }

    /// Conversations in creation order
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn ignored_frames(&self) -> &[Frame] {
        &self.ignored_frames
    }

    pub fn into_parts(self) -> (Vec<Conversation>, Vec<Frame>) {
        (self.conversations, self.ignored_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coapcheck_core::message::Code;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn frame(id: u32, ts: f64, src: &str, dst: &str, msg: CoapMessage) -> Frame {
        Frame::coap(id, ts, addr(src), addr(dst), msg)
    }

    #[test]
    fn test_flow_tag_is_symmetric() {
        let msg = CoapMessage::new(MessageType::Con, Code::GET, 1);
        let a = frame(1, 0.0, "10.0.0.1:1000", "10.0.0.2:5683", msg.clone());
        let b = frame(2, 0.0, "10.0.0.2:5683", "10.0.0.1:1000", msg);
        assert_eq!(flow_tag(&a), flow_tag(&b));
    }

    #[test]
    fn test_piggybacked_exchange() {
        let mut tracker = Tracker::new();
        tracker.append([
            frame(
                1,
                0.0,
                "10.0.0.1:1000",
                "10.0.0.2:5683",
                CoapMessage::new(MessageType::Con, Code::GET, 1).with_token(&b"A"[..]),
            ),
            frame(
                2,
                0.1,
                "10.0.0.2:5683",
                "10.0.0.1:1000",
                CoapMessage::new(MessageType::Ack, Code::CONTENT, 1).with_token(&b"A"[..]),
            ),
        ]);

        assert_eq!(tracker.conversations().len(), 1);
        let conv = &tracker.conversations()[0];
        assert_eq!(conv.id, 1);
        assert_eq!(conv.frame_ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(conv.uri.as_deref(), Some("/"));
        assert_eq!(conv.timeout, 58.0);
        assert!(tracker.ignored_frames().is_empty());
    }

    #[test]
    fn test_separate_flows_do_not_mix() {
        let mut tracker = Tracker::new();
        let get = CoapMessage::new(MessageType::Con, Code::GET, 1).with_token(&b"A"[..]);
        let ack = CoapMessage::new(MessageType::Ack, Code::CONTENT, 1).with_token(&b"A"[..]);
        tracker.append([
            frame(1, 0.0, "10.0.0.1:1000", "10.0.0.2:5683", get.clone()),
            frame(2, 0.0, "10.0.0.3:1000", "10.0.0.2:5683", get),
            frame(3, 0.1, "10.0.0.2:5683", "10.0.0.3:1000", ack.clone()),
            frame(4, 0.1, "10.0.0.2:5683", "10.0.0.1:1000", ack),
        ]);

        let convs = tracker.conversations();
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].frame_ids().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(convs[1].frame_ids().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_unmatched_response_is_ignored() {
        let mut tracker = Tracker::new();
        tracker.append([frame(
            1,
            0.0,
            "10.0.0.2:5683",
            "10.0.0.1:1000",
            CoapMessage::new(MessageType::Non, Code::CONTENT, 4).with_token(&b"Z"[..]),
        )]);
        assert!(tracker.conversations().is_empty());
        assert_eq!(tracker.ignored_frames().len(), 1);
    }
}
