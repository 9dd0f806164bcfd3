// tileworld_server/server/src/entities/mod.rs
pub mod accessor;
pub mod guid_map;
pub mod object;
pub mod update_fields;
