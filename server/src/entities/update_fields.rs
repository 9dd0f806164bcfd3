// tileworld_server/server/src/entities/update_fields.rs

// --- Field layout ---
pub const OBJECT_FIELD_GUID: u16 = 0; // two slots, low word first
pub const OBJECT_FIELD_ENTRY: u16 = 2;
pub const OBJECT_FIELDS_END: u16 = 3;

pub const UNIT_FIELD_LEVEL: u16 = OBJECT_FIELDS_END;
pub const UNIT_FIELD_HEALTH: u16 = OBJECT_FIELDS_END + 1;
pub const UNIT_FIELD_MAXHEALTH: u16 = OBJECT_FIELDS_END + 2;
pub const UNIT_FIELD_FACTION: u16 = OBJECT_FIELDS_END + 3;
pub const UNIT_FIELD_MOVEMENT_SPEED: u16 = OBJECT_FIELDS_END + 4; // f32 bits
pub const UNIT_FIELD_IMAGE_ID: u16 = OBJECT_FIELDS_END + 5;
pub const UNIT_FIELDS_END: u16 = OBJECT_FIELDS_END + 6;

pub const PLAYER_FIELD_EXPERIENCE: u16 = UNIT_FIELDS_END;
pub const PLAYER_FIELDS_END: u16 = UNIT_FIELDS_END + 1;

pub const CREATURE_FIELDS_END: u16 = UNIT_FIELDS_END;

pub const GAMEOBJECT_FIELD_IMAGE_ID: u16 = OBJECT_FIELDS_END;
pub const GAMEOBJECT_FIELD_FLAGS: u16 = OBJECT_FIELDS_END + 1;
pub const GAMEOBJECT_FIELDS_END: u16 = OBJECT_FIELDS_END + 2;

/// Replicated state vector with a dirty bit per slot.
#[derive(Debug, Clone)]
pub struct UpdateFields {
    values: Vec<u32>,
    dirty: Vec<u64>,
}

impl UpdateFields {
    pub fn new(count: u16) -> Self {
        let count = count as usize;
        UpdateFields {
            values: vec![0; count],
            dirty: vec![0; (count + 63) / 64],
        }
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
    pub fn values(&self) -> &[u32] { &self.values }

    pub fn get_u32(&self, index: u16) -> u32 {
        self.values.get(index as usize).copied().unwrap_or(0)
    }

    pub fn get_f32(&self, index: u16) -> f32 {
        f32::from_bits(self.get_u32(index))
    }

    pub fn get_u64(&self, index: u16) -> u64 {
        self.get_u32(index) as u64 | (self.get_u32(index + 1) as u64) << 32
    }

    /// Writes a slot; only an actual change marks it dirty.
    pub fn set_u32(&mut self, index: u16, value: u32) {
        let i = index as usize;
        let Some(slot) = self.values.get_mut(i) else {
            return;
        };
        if *slot != value {
            *slot = value;
            self.dirty[i / 64] |= 1u64 << (i % 64);
        }
    }

    pub fn set_f32(&mut self, index: u16, value: f32) {
        self.set_u32(index, value.to_bits());
    }

    pub fn set_u64(&mut self, index: u16, value: u64) {
        self.set_u32(index, value as u32);
        self.set_u32(index + 1, (value >> 32) as u32);
    }

    pub fn has_changes(&self) -> bool {
        self.dirty.iter().any(|w| *w != 0)
    }

    pub fn clear_changes(&mut self) {
        self.dirty.iter_mut().for_each(|w| *w = 0);
    }

    /// Dirty `(index, value)` pairs in ascending index order; clears the dirty bits.
    pub fn take_changes(&mut self) -> Vec<(u16, u32)> {
        let mut changes = Vec::new();
        for (w, word) in self.dirty.iter_mut().enumerate() {
            let mut bits = *word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                let index = w * 64 + bit;
                changes.push((index as u16, self.values[index]));
                bits &= bits - 1;
            }
            *word = 0;
        }
        changes
    }
}
