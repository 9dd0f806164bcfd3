// tileworld_server/server/src/network/protocol.rs
//
// Little-endian wire layout. Every message starts with a one-byte opcode.
// Messages listing a variable number of entries carry a u8 entry count that
// is patched in once the batch is closed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::constants::UPDATEPACKET_COUNT_LIMIT;
use crate::core::error::{ServerError, ServerResult};
use crate::core::types::{Guid, HighGuid, MoveDirection, Vec2};
use crate::entities::object::WorldObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    // server -> client
    CreateObject = 0x01,
    DestroyObject = 0x02,
    UpdateObject = 0x03,
    MoveStartDirection = 0x04,
    MoveStopDirection = 0x05,
    MoveHeartbeat = 0x06,
    NewWorld = 0x07,
    ChatMessage = 0x08,
    NameQueryResponse = 0x09,
    // client -> server
    EnterWorld = 0x10,
    ClientMoveStartDirection = 0x11,
    ClientMoveStopDirection = 0x12,
    ClientMoveHeartbeat = 0x13,
    Teleport = 0x14,
    LeaveWorld = 0x15,
    ClientChatMessage = 0x16,
    NameQuery = 0x17,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Opcode::CreateObject,
            0x02 => Opcode::DestroyObject,
            0x03 => Opcode::UpdateObject,
            0x04 => Opcode::MoveStartDirection,
            0x05 => Opcode::MoveStopDirection,
            0x06 => Opcode::MoveHeartbeat,
            0x07 => Opcode::NewWorld,
            0x08 => Opcode::ChatMessage,
            0x09 => Opcode::NameQueryResponse,
            0x10 => Opcode::EnterWorld,
            0x11 => Opcode::ClientMoveStartDirection,
            0x12 => Opcode::ClientMoveStopDirection,
            0x13 => Opcode::ClientMoveHeartbeat,
            0x14 => Opcode::Teleport,
            0x15 => Opcode::LeaveWorld,
            0x16 => Opcode::ClientChatMessage,
            0x17 => Opcode::NameQuery,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatType {
    Say = 0,
    Yell = 1,
}

impl ChatType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChatType::Say),
            1 => Some(ChatType::Yell),
            _ => None,
        }
    }
}

/// Splits a variable-length listing into messages of at most
/// `UPDATEPACKET_COUNT_LIMIT` entries.
pub struct PacketBatcher {
    header: BytesMut,
    count_offset: usize,
    current: Option<BytesMut>,
    count: usize,
    finished: Vec<Bytes>,
}

impl PacketBatcher {
    pub fn new(opcode: Opcode) -> Self {
        Self::with_prefix(opcode, &[])
    }

    /// `prefix` is written between the opcode and the entry count of every batch.
    pub fn with_prefix(opcode: Opcode, prefix: &[u8]) -> Self {
        let mut header = BytesMut::with_capacity(1 + prefix.len());
        header.put_u8(opcode as u8);
        header.extend_from_slice(prefix);
        let count_offset = header.len();
        PacketBatcher {
            header,
            count_offset,
            current: None,
            // starts full so the first entry opens a batch
            count: UPDATEPACKET_COUNT_LIMIT,
            finished: Vec::new(),
        }
    }

    /// Buffer the next entry should be written into.
    pub fn next_entry(&mut self) -> &mut BytesMut {
        if self.count >= UPDATEPACKET_COUNT_LIMIT {
            self.close_batch();
            self.count = 0;
        }
        self.count += 1;
        let header = &self.header;
        self.current.get_or_insert_with(|| {
            let mut buf = BytesMut::with_capacity(256);
            buf.extend_from_slice(header);
            buf.put_u8(0);
            buf
        })
    }

    fn close_batch(&mut self) {
        if let Some(mut buf) = self.current.take() {
            buf[self.count_offset] = self.count as u8;
            self.finished.push(buf.freeze());
        }
    }

    pub fn finish(mut self) -> Vec<Bytes> {
        self.close_batch();
        self.finished
    }
}

pub fn build_create_packets<'a>(objects: impl IntoIterator<Item = &'a WorldObject>) -> Vec<Bytes> {
    let mut batcher = PacketBatcher::new(Opcode::CreateObject);
    for object in objects {
        object.write_create_block(batcher.next_entry());
    }
    batcher.finish()
}

pub fn build_destroy_packets(guids: impl IntoIterator<Item = Guid>) -> Vec<Bytes> {
    let mut batcher = PacketBatcher::new(Opcode::DestroyObject);
    for guid in guids {
        batcher.next_entry().put_u64_le(guid.raw());
    }
    batcher.finish()
}

pub fn build_update_packets(guid: Guid, changes: &[(u16, u32)]) -> Vec<Bytes> {
    let mut batcher = PacketBatcher::with_prefix(Opcode::UpdateObject, &guid.raw().to_le_bytes());
    for (index, value) in changes {
        let buf = batcher.next_entry();
        buf.put_u16_le(*index);
        buf.put_u32_le(*value);
    }
    batcher.finish()
}

pub fn build_move_start(guid: Guid, direction: MoveDirection) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(Opcode::MoveStartDirection as u8);
    buf.put_u64_le(guid.raw());
    buf.put_u8(direction.bits());
    buf.freeze()
}

pub fn build_move_stop(guid: Guid, direction: MoveDirection, position: Vec2) -> Bytes {
    build_positional(Opcode::MoveStopDirection, guid, direction, position)
}

pub fn build_heartbeat(guid: Guid, direction: MoveDirection, position: Vec2) -> Bytes {
    build_positional(Opcode::MoveHeartbeat, guid, direction, position)
}

fn build_positional(opcode: Opcode, guid: Guid, direction: MoveDirection, position: Vec2) -> Bytes {
    let mut buf = BytesMut::with_capacity(18);
    buf.put_u8(opcode as u8);
    buf.put_u64_le(guid.raw());
    buf.put_u8(direction.bits());
    buf.put_f32_le(position.x);
    buf.put_f32_le(position.y);
    buf.freeze()
}

pub fn build_new_world(map_id: u32, position: Vec2) -> Bytes {
    let mut buf = BytesMut::with_capacity(13);
    buf.put_u8(Opcode::NewWorld as u8);
    buf.put_u32_le(map_id);
    buf.put_f32_le(position.x);
    buf.put_f32_le(position.y);
    buf.freeze()
}

pub fn build_chat_message(chat_type: ChatType, guid: Guid, text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(11 + text.len());
    buf.put_u8(Opcode::ChatMessage as u8);
    buf.put_u8(chat_type as u8);
    buf.put_u64_le(guid.raw());
    put_string(&mut buf, text);
    buf.freeze()
}

/// An unknown GUID is answered with an empty name.
pub fn build_name_query_response(guid: Guid, name: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(10 + name.len());
    buf.put_u8(Opcode::NameQueryResponse as u8);
    buf.put_u64_le(guid.raw());
    put_string(&mut buf, name);
    buf.freeze()
}

/// u8 length prefix, truncated on a char boundary.
fn put_string(buf: &mut BytesMut, text: &str) {
    let mut end = text.len().min(u8::MAX as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u8(end as u8);
    buf.extend_from_slice(&text.as_bytes()[..end]);
}

// --- Decoding ---

fn ensure(buf: &impl Buf, needed: usize, what: &str) -> ServerResult<()> {
    if buf.remaining() < needed {
        return Err(ServerError::InvalidInput(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_position(buf: &mut impl Buf, what: &str) -> ServerResult<Vec2> {
    ensure(buf, 8, what)?;
    let position = Vec2::new(buf.get_f32_le(), buf.get_f32_le());
    if !position.x.is_finite() || !position.y.is_finite() || position.x < 0.0 || position.y < 0.0 {
        return Err(ServerError::InvalidInput(format!("{} carries invalid position {:?}", what, position)));
    }
    Ok(position)
}

fn read_string(buf: &mut &[u8], what: &str) -> ServerResult<String> {
    ensure(&*buf, 1, what)?;
    let len = buf.get_u8() as usize;
    ensure(&*buf, len, what)?;
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| ServerError::InvalidInput(format!("{} is not UTF-8", what)))?
        .to_string();
    buf.advance(len);
    Ok(text)
}

/// Parsed client request handed from the network layer to the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    EnterWorld { guid_low: u32, name: String, map_id: u32, position: Vec2 },
    MoveStartDirection { direction: MoveDirection },
    MoveStopDirection { direction: MoveDirection, position: Vec2 },
    MoveHeartbeat { position: Vec2 },
    Teleport { map_id: u32, position: Vec2 },
    LeaveWorld,
    ChatMessage { chat_type: ChatType, text: String },
    NameQuery { guid: Guid },
}

impl ClientCommand {
    pub fn decode(mut buf: &[u8]) -> ServerResult<Self> {
        ensure(&buf, 1, "command")?;
        let raw = buf.get_u8();
        let opcode = Opcode::from_u8(raw)
            .ok_or_else(|| ServerError::InvalidInput(format!("unknown opcode {:#04x}", raw)))?;

        let command = match opcode {
            Opcode::EnterWorld => {
                ensure(&buf, 8, "EnterWorld")?;
                let guid_low = buf.get_u32_le();
                let map_id = buf.get_u32_le();
                let position = read_position(&mut buf, "EnterWorld")?;
                let name = read_string(&mut buf, "EnterWorld name")?;
                ClientCommand::EnterWorld { guid_low, name, map_id, position }
            }
            Opcode::ClientMoveStartDirection => {
                ensure(&buf, 1, "MoveStartDirection")?;
                ClientCommand::MoveStartDirection { direction: MoveDirection::from_bits_truncate(buf.get_u8()) }
            }
            Opcode::ClientMoveStopDirection => {
                ensure(&buf, 1, "MoveStopDirection")?;
                let direction = MoveDirection::from_bits_truncate(buf.get_u8());
                let position = read_position(&mut buf, "MoveStopDirection")?;
                ClientCommand::MoveStopDirection { direction, position }
            }
            Opcode::ClientMoveHeartbeat => {
                ClientCommand::MoveHeartbeat { position: read_position(&mut buf, "MoveHeartbeat")? }
            }
            Opcode::Teleport => {
                ensure(&buf, 4, "Teleport")?;
                let map_id = buf.get_u32_le();
                ClientCommand::Teleport { map_id, position: read_position(&mut buf, "Teleport")? }
            }
            Opcode::LeaveWorld => ClientCommand::LeaveWorld,
            Opcode::ClientChatMessage => {
                ensure(&buf, 1, "ChatMessage")?;
                let raw = buf.get_u8();
                let chat_type = ChatType::from_u8(raw)
                    .ok_or_else(|| ServerError::InvalidInput(format!("chat type {} not allowed", raw)))?;
                ClientCommand::ChatMessage { chat_type, text: read_string(&mut buf, "ChatMessage text")? }
            }
            Opcode::NameQuery => {
                ensure(&buf, 8, "NameQuery")?;
                ClientCommand::NameQuery { guid: Guid(buf.get_u64_le()) }
            }
            other => {
                return Err(ServerError::InvalidInput(format!("{:?} is not a client opcode", other)));
            }
        };
        Ok(command)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        match self {
            ClientCommand::EnterWorld { guid_low, name, map_id, position } => {
                buf.put_u8(Opcode::EnterWorld as u8);
                buf.put_u32_le(*guid_low);
                buf.put_u32_le(*map_id);
                buf.put_f32_le(position.x);
                buf.put_f32_le(position.y);
                put_string(&mut buf, name);
            }
            ClientCommand::MoveStartDirection { direction } => {
                buf.put_u8(Opcode::ClientMoveStartDirection as u8);
                buf.put_u8(direction.bits());
            }
            ClientCommand::MoveStopDirection { direction, position } => {
                buf.put_u8(Opcode::ClientMoveStopDirection as u8);
                buf.put_u8(direction.bits());
                buf.put_f32_le(position.x);
                buf.put_f32_le(position.y);
            }
            ClientCommand::MoveHeartbeat { position } => {
                buf.put_u8(Opcode::ClientMoveHeartbeat as u8);
                buf.put_f32_le(position.x);
                buf.put_f32_le(position.y);
            }
            ClientCommand::Teleport { map_id, position } => {
                buf.put_u8(Opcode::Teleport as u8);
                buf.put_u32_le(*map_id);
                buf.put_f32_le(position.x);
                buf.put_f32_le(position.y);
            }
            ClientCommand::LeaveWorld => buf.put_u8(Opcode::LeaveWorld as u8),
            ClientCommand::ChatMessage { chat_type, text } => {
                buf.put_u8(Opcode::ClientChatMessage as u8);
                buf.put_u8(*chat_type as u8);
                put_string(&mut buf, text);
            }
            ClientCommand::NameQuery { guid } => {
                buf.put_u8(Opcode::NameQuery as u8);
                buf.put_u64_le(guid.raw());
            }
        }
        buf.freeze()
    }
}

/// Decoded create entry, as a client would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateBlock {
    pub guid: Guid,
    pub fields: Vec<u32>,
    pub position: Vec2,
    pub move_direction: Option<MoveDirection>,
}

/// Server message decoded back into structured form. Used by tooling and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Create(Vec<CreateBlock>),
    Destroy(Vec<Guid>),
    Update { guid: Guid, changes: Vec<(u16, u32)> },
    MoveStart { guid: Guid, direction: MoveDirection },
    MoveStop { guid: Guid, direction: MoveDirection, position: Vec2 },
    Heartbeat { guid: Guid, direction: MoveDirection, position: Vec2 },
    NewWorld { map_id: u32, position: Vec2 },
    Chat { chat_type: ChatType, guid: Guid, text: String },
    NameQueryResponse { guid: Guid, name: String },
}

impl ServerPacket {
    pub fn decode(mut buf: &[u8]) -> ServerResult<Self> {
        ensure(&buf, 1, "packet")?;
        let raw = buf.get_u8();
        let opcode = Opcode::from_u8(raw)
            .ok_or_else(|| ServerError::InvalidInput(format!("unknown opcode {:#04x}", raw)))?;

        let packet = match opcode {
            Opcode::CreateObject => {
                ensure(&buf, 1, "create count")?;
                let count = buf.get_u8() as usize;
                let mut blocks = Vec::with_capacity(count);
                for _ in 0..count {
                    ensure(&buf, 12, "create block")?;
                    let guid = Guid(buf.get_u64_le());
                    let field_count = buf.get_u32_le() as usize;
                    ensure(&buf, field_count * 4 + 8, "create block fields")?;
                    let fields = (0..field_count).map(|_| buf.get_u32_le()).collect();
                    let position = Vec2::new(buf.get_f32_le(), buf.get_f32_le());
                    let move_direction = match guid.high() {
                        Some(HighGuid::Player) | Some(HighGuid::Creature) => {
                            ensure(&buf, 1, "create block movement")?;
                            Some(MoveDirection::from_bits_truncate(buf.get_u8()))
                        }
                        _ => None,
                    };
                    blocks.push(CreateBlock { guid, fields, position, move_direction });
                }
                ServerPacket::Create(blocks)
            }
            Opcode::DestroyObject => {
                ensure(&buf, 1, "destroy count")?;
                let count = buf.get_u8() as usize;
                ensure(&buf, count * 8, "destroy list")?;
                ServerPacket::Destroy((0..count).map(|_| Guid(buf.get_u64_le())).collect())
            }
            Opcode::UpdateObject => {
                ensure(&buf, 9, "update header")?;
                let guid = Guid(buf.get_u64_le());
                let count = buf.get_u8() as usize;
                ensure(&buf, count * 6, "update list")?;
                let changes = (0..count).map(|_| (buf.get_u16_le(), buf.get_u32_le())).collect();
                ServerPacket::Update { guid, changes }
            }
            Opcode::MoveStartDirection => {
                ensure(&buf, 9, "move start")?;
                let guid = Guid(buf.get_u64_le());
                ServerPacket::MoveStart { guid, direction: MoveDirection::from_bits_truncate(buf.get_u8()) }
            }
            Opcode::MoveStopDirection | Opcode::MoveHeartbeat => {
                ensure(&buf, 17, "positional move")?;
                let guid = Guid(buf.get_u64_le());
                let direction = MoveDirection::from_bits_truncate(buf.get_u8());
                let position = Vec2::new(buf.get_f32_le(), buf.get_f32_le());
                if opcode == Opcode::MoveStopDirection {
                    ServerPacket::MoveStop { guid, direction, position }
                } else {
                    ServerPacket::Heartbeat { guid, direction, position }
                }
            }
            Opcode::NewWorld => {
                ensure(&buf, 12, "new world")?;
                let map_id = buf.get_u32_le();
                ServerPacket::NewWorld { map_id, position: Vec2::new(buf.get_f32_le(), buf.get_f32_le()) }
            }
            Opcode::ChatMessage => {
                ensure(&buf, 9, "chat message")?;
                let raw = buf.get_u8();
                let chat_type = ChatType::from_u8(raw)
                    .ok_or_else(|| ServerError::InvalidInput(format!("unknown chat type {}", raw)))?;
                let guid = Guid(buf.get_u64_le());
                ServerPacket::Chat { chat_type, guid, text: read_string(&mut buf, "chat text")? }
            }
            Opcode::NameQueryResponse => {
                ensure(&buf, 8, "name query response")?;
                let guid = Guid(buf.get_u64_le());
                ServerPacket::NameQueryResponse { guid, name: read_string(&mut buf, "queried name")? }
            }
            other => {
                return Err(ServerError::InvalidInput(format!("{:?} is not a server opcode", other)));
            }
        };
        Ok(packet)
    }
}
