// tileworld_server/server/src/lib.rs

pub mod core;
pub mod entities;
pub mod network;
pub mod operational;
pub mod server;
pub mod systems;
pub mod world;

pub use crate::server::instance::WorldServer;
