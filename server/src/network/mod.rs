// tileworld_server/server/src/network/mod.rs
pub mod outbox;
pub mod protocol;
pub mod session;
