// tileworld_server/server/src/network/outbox.rs
use bytes::Bytes;

use crate::core::types::Guid;

/// Destination for packets produced by the simulation, addressed by the
/// receiving player's GUID.
pub trait Outbox {
    fn deliver(&mut self, recipient: Guid, packet: Bytes);
}

/// Keeps every delivered packet in memory.
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    pub sent: Vec<(Guid, Bytes)>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_for(&self, recipient: Guid) -> impl Iterator<Item = &Bytes> {
        self.sent.iter().filter(move |(g, _)| *g == recipient).map(|(_, p)| p)
    }

    pub fn recipients(&self) -> Vec<Guid> {
        let mut recipients: Vec<Guid> = self.sent.iter().map(|(g, _)| *g).collect();
        recipients.sort();
        recipients.dedup();
        recipients
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Outbox for RecordingOutbox {
    fn deliver(&mut self, recipient: Guid, packet: Bytes) {
        self.sent.push((recipient, packet));
    }
}
