// tileworld_server/server/src/entities/guid_map.rs
use tracing::error;

use crate::core::constants::{
    GUIDMAP_GRANULARITY_CREATURE, GUIDMAP_GRANULARITY_GAMEOBJECT, GUIDMAP_GRANULARITY_ITEM,
    GUIDMAP_GRANULARITY_PLAYER,
};
use crate::core::error::{ServerError, ServerResult};
use crate::core::types::{Guid, HighGuid};

/// Dense bitmap of used low ids, grown one fixed-size slice at a time.
/// Index 0 is reserved and never handed out.
#[derive(Debug, Clone)]
pub struct GuidMap {
    slice_words: usize,
    slices: Vec<Box<[u64]>>,
    limit: u64,
}

impl GuidMap {
    pub fn new(granularity_bits: u32) -> Self {
        Self::with_limit(granularity_bits, u32::MAX as u64 + 1)
    }

    /// `limit` is the exclusive upper bound on indices this map may hand out.
    pub fn with_limit(granularity_bits: u32, limit: u64) -> Self {
        let slice_words = (granularity_bits.max(1) as usize + 63) / 64;
        let mut map = GuidMap { slice_words, slices: Vec::new(), limit };
        map.push_slice();
        map.set_bit(0);
        map
    }

    fn slice_bits(&self) -> u64 {
        self.slice_words as u64 * 64
    }

    fn push_slice(&mut self) {
        self.slices.push(vec![0u64; self.slice_words].into_boxed_slice());
    }

    fn locate(&self, index: u64) -> (usize, usize, u32) {
        let slice = (index / self.slice_bits()) as usize;
        let within = index % self.slice_bits();
        (slice, (within / 64) as usize, (within % 64) as u32)
    }

    pub fn capacity(&self) -> u64 {
        self.slices.len() as u64 * self.slice_bits()
    }

    pub fn is_set(&self, index: u64) -> bool {
        let (slice, word, bit) = self.locate(index);
        self.slices
            .get(slice)
            .map_or(false, |s| s[word] & (1u64 << bit) != 0)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Marks `index` used, growing the bitmap as needed. Indices at or past
    /// the limit are refused and leave the bitmap untouched.
    pub fn set_bit(&mut self, index: u64) -> bool {
        if index >= self.limit {
            return false;
        }
        let (slice, word, bit) = self.locate(index);
        while self.slices.len() <= slice {
            self.push_slice();
        }
        self.slices[slice][word] |= 1u64 << bit;
        true
    }

    /// Returns `index` to the free pool. Index 0 stays reserved.
    pub fn clear_bit(&mut self, index: u64) {
        if index == 0 {
            return;
        }
        let (slice, word, bit) = self.locate(index);
        if let Some(s) = self.slices.get_mut(slice) {
            s[word] &= !(1u64 << bit);
        }
    }

    /// Claims the lowest free index, appending a slice when every slice is full.
    pub fn use_empty(&mut self) -> Option<u64> {
        let slice_bits = self.slice_bits();
        for (s, slice) in self.slices.iter_mut().enumerate() {
            for (w, word) in slice.iter_mut().enumerate() {
                if *word == u64::MAX {
                    continue;
                }
                let bit = (!*word).trailing_zeros();
                let index = s as u64 * slice_bits + w as u64 * 64 + bit as u64;
                if index >= self.limit {
                    return None;
                }
                *word |= 1u64 << bit;
                return Some(index);
            }
        }

        let index = self.capacity();
        if index >= self.limit {
            return None;
        }
        self.push_slice();
        let (slice, word, bit) = self.locate(index);
        self.slices[slice][word] |= 1u64 << bit;
        Some(index)
    }
}

/// One bitmap per GUID category.
#[derive(Debug, Clone)]
pub struct GuidAllocator {
    players: GuidMap,
    creatures: GuidMap,
    gameobjects: GuidMap,
    items: GuidMap,
}

impl Default for GuidAllocator {
    fn default() -> Self {
        Self::with_player_limit(u32::MAX)
    }
}

impl GuidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Player low ids above `max_player_low` are neither issued nor reserved.
    pub fn with_player_limit(max_player_low: u32) -> Self {
        GuidAllocator {
            players: GuidMap::with_limit(GUIDMAP_GRANULARITY_PLAYER, max_player_low as u64 + 1),
            creatures: GuidMap::new(GUIDMAP_GRANULARITY_CREATURE),
            gameobjects: GuidMap::new(GUIDMAP_GRANULARITY_GAMEOBJECT),
            items: GuidMap::new(GUIDMAP_GRANULARITY_ITEM),
        }
    }

    pub fn map(&self, high: HighGuid) -> &GuidMap {
        match high {
            HighGuid::Player => &self.players,
            HighGuid::Creature => &self.creatures,
            HighGuid::Gameobject => &self.gameobjects,
            HighGuid::Item => &self.items,
        }
    }

    fn map_mut(&mut self, high: HighGuid) -> &mut GuidMap {
        match high {
            HighGuid::Player => &mut self.players,
            HighGuid::Creature => &mut self.creatures,
            HighGuid::Gameobject => &mut self.gameobjects,
            HighGuid::Item => &mut self.items,
        }
    }

    pub fn allocate(&mut self, high: HighGuid, entry: u32) -> ServerResult<Guid> {
        match self.map_mut(high).use_empty() {
            Some(low) => Ok(Guid::new(high, entry, low as u32)),
            None => {
                error!("GUID space exhausted for {:?}, allocation refused", high);
                Err(ServerError::GuidSpaceExhausted(high))
            }
        }
    }

    /// Marks an externally issued GUID (static spawn, persisted character) as used.
    pub fn reserve(&mut self, guid: Guid) -> ServerResult<()> {
        let high = guid
            .high()
            .ok_or_else(|| ServerError::InvalidInput(format!("GUID {} has no category tag", guid)))?;
        if guid.low() == 0 {
            return Err(ServerError::InvalidInput(format!("GUID {} uses reserved low id 0", guid)));
        }
        if !self.map_mut(high).set_bit(guid.low() as u64) {
            return Err(ServerError::InvalidInput(format!(
                "GUID {} is past the {:?} id limit",
                guid, high
            )));
        }
        Ok(())
    }

    /// Frees a GUID whose object never made it into the world.
    pub fn release(&mut self, guid: Guid) {
        if let Some(high) = guid.high() {
            self.map_mut(high).clear_bit(guid.low() as u64);
        }
    }
}
