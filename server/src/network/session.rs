// tileworld_server/server/src/network/session.rs
//
// Hand-off between network threads and the simulation thread. Network code
// pushes parsed commands and pops outbound packets; the simulation does the
// reverse once per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use bytes::Bytes;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::core::error::ServerResult;
use crate::core::types::Guid;
use crate::network::outbox::Outbox;
use crate::network::protocol::ClientCommand;

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    inbound: SegQueue<ClientCommand>,
    outbound: SegQueue<Bytes>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Session {
            id,
            inbound: SegQueue::new(),
            outbound: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid { self.id }

    pub fn push_command(&self, command: ClientCommand) {
        self.inbound.push(command);
    }

    /// Decodes a raw frame and queues it. Malformed frames never reach the simulation.
    pub fn push_frame(&self, frame: &[u8]) -> ServerResult<()> {
        match ClientCommand::decode(frame) {
            Ok(command) => {
                self.inbound.push(command);
                Ok(())
            }
            Err(e) => {
                warn!("Session {}: rejected frame: {}", self.id, e);
                Err(e)
            }
        }
    }

    pub fn pop_command(&self) -> Option<ClientCommand> {
        self.inbound.pop()
    }

    pub fn pending_commands(&self) -> usize {
        self.inbound.len()
    }

    pub fn push_outbound(&self, packet: Bytes) {
        self.outbound.push(packet);
    }

    pub fn pop_outbound(&self) -> Option<Bytes> {
        self.outbound.pop()
    }

    pub fn drain_outbound(&self) -> Vec<Bytes> {
        let mut packets = Vec::with_capacity(self.outbound.len());
        while let Some(p) = self.outbound.pop() {
            packets.push(p);
        }
        packets
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Connected sessions, shared between network threads and the simulation.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(Uuid::new_v4()));
        self.sessions.insert(session.id(), session.clone());
        debug!("Session {} opened", session.id());
        session
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copies the current session set so no shard lock is held while processing.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Routes packets to the session owning each in-world player.
pub struct SessionOutbox<'a> {
    routes: &'a AHashMap<Guid, Arc<Session>>,
}

impl<'a> SessionOutbox<'a> {
    pub fn new(routes: &'a AHashMap<Guid, Arc<Session>>) -> Self {
        SessionOutbox { routes }
    }
}

impl Outbox for SessionOutbox<'_> {
    fn deliver(&mut self, recipient: Guid, packet: Bytes) {
        match self.routes.get(&recipient) {
            Some(session) => {
                session.push_outbound(packet);
                counter!("world_packets_delivered_total").increment(1);
            }
            None => trace!("No session for {}, packet dropped", recipient),
        }
    }
}
