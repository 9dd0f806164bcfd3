// tileworld_server/server/src/entities/accessor.rs
use ahash::AHashMap;
use tracing::{debug, error};

use crate::core::error::{ServerError, ServerResult};
use crate::core::types::Guid;
use crate::entities::guid_map::GuidAllocator;
use crate::entities::object::WorldObject;

/// Stable reference to an object slot. A handle outliving its object
/// resolves to nothing once the slot generation moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<WorldObject>,
}

/// Owns every live object and resolves GUIDs to handles.
#[derive(Debug, Default)]
pub struct ObjectAccessor {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    by_guid: AHashMap<Guid, ObjectHandle>,
    guids: GuidAllocator,
}

impl ObjectAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guids(guids: GuidAllocator) -> Self {
        ObjectAccessor { guids, ..Self::default() }
    }

    pub fn guids(&self) -> &GuidAllocator {
        &self.guids
    }

    pub fn guids_mut(&mut self) -> &mut GuidAllocator {
        &mut self.guids
    }

    pub fn len(&self) -> usize {
        self.by_guid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_guid.is_empty()
    }

    /// Registers an object under its GUID and returns its handle.
    pub fn insert(&mut self, object: WorldObject) -> ServerResult<ObjectHandle> {
        let guid = object.guid();
        if self.by_guid.contains_key(&guid) {
            error!("Object {} is already registered", guid);
            return Err(ServerError::DuplicateGuid(guid.raw()));
        }

        let handle = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                ObjectHandle { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, object: Some(object) });
                ObjectHandle { index, generation: 0 }
            }
        };
        self.by_guid.insert(guid, handle);
        debug!("Registered object {} in slot {}", guid, handle.index);
        Ok(handle)
    }

    /// Unregisters and returns the object. The caller must have removed it from its map.
    pub fn remove(&mut self, handle: ObjectHandle) -> Option<WorldObject> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        self.by_guid.remove(&object.guid());
        debug!("Unregistered object {}", object.guid());
        Some(object)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&WorldObject> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.object.as_ref())
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut WorldObject> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.object.as_mut())
    }

    pub fn find(&self, guid: Guid) -> Option<ObjectHandle> {
        self.by_guid.get(&guid).copied()
    }

    pub fn find_object(&self, guid: Guid) -> Option<&WorldObject> {
        self.find(guid).and_then(|h| self.get(h))
    }

    pub fn find_object_mut(&mut self, guid: Guid) -> Option<&mut WorldObject> {
        let handle = self.find(guid)?;
        self.get_mut(handle)
    }
}
