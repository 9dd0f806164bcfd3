// tileworld_server/server/src/systems/mod.rs
pub mod movement;
