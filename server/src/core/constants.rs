// tileworld_server/server/src/core/constants.rs
pub const SERVER_TICK_RATE: u64 = 30;

// Cell grid constants
pub const MAP_CELL_SIZE: u32 = 16; // fields per cell, both axes
pub const MAP_SURROUNDING_CELLS: u32 = 1; // visibility radius in cells

// Replication
pub const UPDATEPACKET_COUNT_LIMIT: usize = 64; // entries per batched message, count is a u8 on the wire

// Pathfinding
pub const PATHFIND_ITERATIONS_LIMIT: u32 = 100;
pub const PATHFIND_FIELD_CENTER_OFFSET: f32 = 0.5;

// Movement
pub const DEFAULT_UNIT_SPEED: f32 = 4.0; // fields per second
pub const MOVEMENT_SPEED_FACTOR: f32 = 0.001; // per millisecond
pub const FOLLOW_DISTANCE_CHECK_DELAY_MS: u64 = 500;
pub const DEFAULT_FOLLOW_DISTANCE: f32 = 1.0;
pub const DEFAULT_FOLLOW_MAX_DISTANCE: f32 = 2.0;
pub const DEFAULT_RANDOM_RADIUS: f32 = 2.0;
pub const DEFAULT_UNIT_HALF_EXTENT: f32 = 0.4; // collision box of players and creatures

// Identity allocation
pub const GUIDMAP_GRANULARITY_PLAYER: u32 = 1024;
pub const GUIDMAP_GRANULARITY_CREATURE: u32 = 1024;
pub const GUIDMAP_GRANULARITY_GAMEOBJECT: u32 = 1024;
pub const GUIDMAP_GRANULARITY_ITEM: u32 = 8092;

// Sessions
pub const MAX_COMMANDS_PER_SESSION_TICK: usize = 32;
pub const MAX_CHARACTER_ID: u32 = 1 << 20; // bounds the player GUID bitmap at 128 KiB

// Performance
pub const SLOW_TICK_LOG_MS: u64 = 25; // warn if a tick exceeds this
