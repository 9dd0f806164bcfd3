// tileworld_server/server/src/world/storage.rs
//
// Static world data loaded once at startup: map records, templates,
// spawn lists and waypoint paths.

use std::path::Path;

use ahash::AHashMap;
use bitflags::bitflags;
use serde::Deserialize;
use tracing::{info, warn};

use crate::core::constants::DEFAULT_UNIT_SPEED;
use crate::core::error::{ServerError, ServerResult};
use crate::core::types::{FieldType, Vec2};

#[derive(Debug, Clone, Deserialize)]
pub struct FieldOverride {
    pub x: u32,
    pub y: u32,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapRecord {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub size_x: u32,
    pub size_y: u32,
    #[serde(default)]
    pub default_field: FieldType,
    #[serde(default)]
    pub fields: Vec<FieldOverride>,
    #[serde(default)]
    pub entry_point: Vec2,
}

impl MapRecord {
    /// Dense row-major terrain for the whole map.
    pub fn terrain(&self) -> Vec<FieldType> {
        let mut terrain = vec![self.default_field; self.size_x as usize * self.size_y as usize];
        for f in &self.fields {
            if f.x < self.size_x && f.y < self.size_y {
                terrain[f.y as usize * self.size_x as usize + f.x as usize] = f.field_type;
            }
        }
        terrain
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.size_x as f32 && y < self.size_y as f32
    }
}

/// Behavior requested for a creature once it is placed on its map.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefaultMotion {
    #[default]
    Idle,
    Random {
        #[serde(default = "default_random_radius")]
        radius: f32,
        #[serde(default)]
        min_delay_ms: u64,
        #[serde(default)]
        max_delay_ms: u64,
    },
    Waypoint {
        path_id: u32,
    },
}

fn default_random_radius() -> f32 {
    crate::core::constants::DEFAULT_RANDOM_RADIUS
}

fn default_speed() -> f32 {
    DEFAULT_UNIT_SPEED
}

fn default_level() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatureTemplate {
    pub entry: u32,
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub health: u32,
    #[serde(default)]
    pub faction: u32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub image_id: u32,
    #[serde(default)]
    pub default_motion: DefaultMotion,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameobjectTemplate {
    pub entry: u32,
    pub name: String,
    #[serde(default)]
    pub image_id: u32,
    #[serde(default)]
    pub flags: u32,
    /// Half extents of the collision box; `None` means the object never blocks movement.
    #[serde(default)]
    pub collision: Option<Vec2>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnRecord {
    pub guid_low: u32,
    pub entry: u32,
    pub map_id: u32,
    pub x: f32,
    pub y: f32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WaypointFlags: u32 {
        const RELATIVE_SPAWN   = 1 << 0;
        const RELATIVE_CURRENT = 1 << 1;
        const REPEAT           = 1 << 2;
        const REPEAT_REVERSE   = 1 << 3;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaypointRecord {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub wait_ms: u64,
    #[serde(default)]
    pub flags: u32,
}

impl WaypointRecord {
    pub fn flags(&self) -> WaypointFlags {
        WaypointFlags::from_bits_truncate(self.flags)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaypointPath {
    pub id: u32,
    pub points: Vec<WaypointRecord>,
}

/// Raw on-disk layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorldDataFile {
    pub maps: Vec<MapRecord>,
    pub creature_templates: Vec<CreatureTemplate>,
    pub gameobject_templates: Vec<GameobjectTemplate>,
    pub creature_spawns: Vec<SpawnRecord>,
    pub gameobject_spawns: Vec<SpawnRecord>,
    pub waypoint_paths: Vec<WaypointPath>,
}

#[derive(Debug, Default)]
pub struct WorldStorage {
    maps: AHashMap<u32, MapRecord>,
    creature_templates: AHashMap<u32, CreatureTemplate>,
    gameobject_templates: AHashMap<u32, GameobjectTemplate>,
    creature_spawns: AHashMap<u32, Vec<SpawnRecord>>,
    gameobject_spawns: AHashMap<u32, Vec<SpawnRecord>>,
    waypoint_paths: AHashMap<u32, WaypointPath>,
}

impl WorldStorage {
    pub fn load(path: &Path) -> ServerResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let data: WorldDataFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&source)?,
            _ => serde_yaml::from_str(&source)?,
        };
        let storage = Self::from_data(data)?;
        info!(
            "Loaded world data from {}: {} maps, {} creature templates, {} gameobject templates, {} waypoint paths",
            path.display(),
            storage.maps.len(),
            storage.creature_templates.len(),
            storage.gameobject_templates.len(),
            storage.waypoint_paths.len()
        );
        Ok(storage)
    }

    pub fn from_yaml_str(source: &str) -> ServerResult<Self> {
        let data: WorldDataFile = serde_yaml::from_str(source)?;
        Self::from_data(data)
    }

    /// Indexes and validates raw data. Out-of-bounds or dangling records are
    /// skipped with a warning; duplicate identities are an error.
    pub fn from_data(data: WorldDataFile) -> ServerResult<Self> {
        let mut storage = WorldStorage::default();

        for map in data.maps {
            if map.size_x == 0 || map.size_y == 0 {
                return Err(ServerError::InvalidInput(format!("map {} has zero size", map.id)));
            }
            for f in &map.fields {
                if f.x >= map.size_x || f.y >= map.size_y {
                    warn!("Map {}: terrain override ({}, {}) outside {}x{}, ignored", map.id, f.x, f.y, map.size_x, map.size_y);
                }
            }
            if !map.contains(map.entry_point.x, map.entry_point.y) {
                return Err(ServerError::InvalidInput(format!("map {} entry point outside the map", map.id)));
            }
            let id = map.id;
            if storage.maps.insert(id, map).is_some() {
                return Err(ServerError::InvalidInput(format!("duplicate map id {}", id)));
            }
        }

        for t in data.creature_templates {
            storage.creature_templates.insert(t.entry, t);
        }
        for t in data.gameobject_templates {
            storage.gameobject_templates.insert(t.entry, t);
        }
        for p in data.waypoint_paths {
            storage.waypoint_paths.insert(p.id, p);
        }

        let mut seen = ahash::AHashSet::new();
        for spawn in data.creature_spawns {
            if !storage.creature_templates.contains_key(&spawn.entry) {
                warn!("Creature spawn {} references missing template {}, skipped", spawn.guid_low, spawn.entry);
                continue;
            }
            if storage.validate_spawn("Creature", &spawn) {
                if !seen.insert(spawn.guid_low) {
                    return Err(ServerError::InvalidInput(format!("duplicate creature spawn guid {}", spawn.guid_low)));
                }
                storage.creature_spawns.entry(spawn.map_id).or_default().push(spawn);
            }
        }

        seen.clear();
        for spawn in data.gameobject_spawns {
            if !storage.gameobject_templates.contains_key(&spawn.entry) {
                warn!("Gameobject spawn {} references missing template {}, skipped", spawn.guid_low, spawn.entry);
                continue;
            }
            if storage.validate_spawn("Gameobject", &spawn) {
                if !seen.insert(spawn.guid_low) {
                    return Err(ServerError::InvalidInput(format!("duplicate gameobject spawn guid {}", spawn.guid_low)));
                }
                storage.gameobject_spawns.entry(spawn.map_id).or_default().push(spawn);
            }
        }

        Ok(storage)
    }

    fn validate_spawn(&self, kind: &str, spawn: &SpawnRecord) -> bool {
        if spawn.guid_low == 0 {
            warn!("{} spawn with reserved guid 0, skipped", kind);
            return false;
        }
        match self.maps.get(&spawn.map_id) {
            None => {
                warn!("{} spawn {} on unknown map {}, skipped", kind, spawn.guid_low, spawn.map_id);
                false
            }
            Some(map) if !map.contains(spawn.x, spawn.y) => {
                warn!("{} spawn {} at ({}, {}) outside map {}, skipped", kind, spawn.guid_low, spawn.x, spawn.y, spawn.map_id);
                false
            }
            Some(_) => true,
        }
    }

    pub fn insert_map(&mut self, map: MapRecord) {
        self.maps.insert(map.id, map);
    }

    pub fn map(&self, id: u32) -> Option<&MapRecord> { self.maps.get(&id) }
    pub fn creature_template(&self, entry: u32) -> Option<&CreatureTemplate> { self.creature_templates.get(&entry) }
    pub fn gameobject_template(&self, entry: u32) -> Option<&GameobjectTemplate> { self.gameobject_templates.get(&entry) }
    pub fn waypoint_path(&self, id: u32) -> Option<&WaypointPath> { self.waypoint_paths.get(&id) }

    pub fn creature_spawns(&self, map_id: u32) -> &[SpawnRecord] {
        self.creature_spawns.get(&map_id).map_or(&[], |v| v.as_slice())
    }

    pub fn gameobject_spawns(&self, map_id: u32) -> &[SpawnRecord] {
        self.gameobject_spawns.get(&map_id).map_or(&[], |v| v.as_slice())
    }

    pub fn all_creature_spawns(&self) -> impl Iterator<Item = &SpawnRecord> {
        self.creature_spawns.values().flatten()
    }

    pub fn all_gameobject_spawns(&self) -> impl Iterator<Item = &SpawnRecord> {
        self.gameobject_spawns.values().flatten()
    }
}
