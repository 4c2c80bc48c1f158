use coapcheck_core::frame::Frame;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A logically related exchange between one client and one server
///
/// Conversations are created by the tracker from the first request (or ping)
/// that cannot be attributed to an existing state; later frames are appended
/// as they are classified.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Creation order, starting at 1
    pub id: usize,
    /// `(client, server)` endpoints
    pub tag: (SocketAddr, SocketAddr),
    pub frames: Vec<Frame>,
    /// Timestamp of the last request plus MAX_EXCHANGE_LIFETIME
    pub timeout: f64,
    /// Index of the following conversation of the same pair in the tracker's list
    pub next: Option<usize>,
    pub observe_active: bool,
    /// Last request URI attributed to this conversation
    pub uri: Option<String>,
}

impl Conversation {
    pub fn new(id: usize, client: SocketAddr, server: SocketAddr) -> Self {
        Self {
            id,
            tag: (client, server),
            frames: Vec::new(),
            timeout: 0.0,
            next: None,
            observe_active: false,
            uri: None,
        }
    }

    pub fn client(&self) -> IpAddr {
        self.tag.0.ip()
    }

    pub fn server(&self) -> IpAddr {
        self.tag.1.ip()
    }

    pub fn first_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.frames.iter().map(|f| f.id)
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conversation {} ({} -> {})", self.id, self.tag.0, self.tag.1)
    }
}

/// Conversations of one `(client, server)` address pair, in list order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub client: IpAddr,
    pub server: IpAddr,
    /// Indices into the tracker's conversation list
    pub conversations: Vec<usize>,
}

/// Partition conversations by `(client, server)` address pair and link each
/// conversation to the next one of the same pair.
///
/// Pairs are returned in order of first appearance.
pub fn group_by_pair(conversations: &mut [Conversation]) -> Vec<Pair> {
    let mut pairs: Vec<Pair> = Vec::new();

    for index in 0..conversations.len() {
        let key = (conversations[index].client(), conversations[index].server());
        match pairs.iter_mut().find(|p| (p.client, p.server) == key) {
            Some(pair) => {
                if let Some(&previous) = pair.conversations.last() {
                    conversations[previous].next = Some(index);
                }
                pair.conversations.push(index);
            }
            None => pairs.push(Pair {
                client: key.0,
                server: key.1,
                conversations: vec![index],
            }),
        }
    }

    pairs
}
