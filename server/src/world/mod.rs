// tileworld_server/server/src/world/mod.rs
pub mod grid;
pub mod map;
pub mod map_manager;
pub mod storage;
pub mod walkability;
