// tileworld_server/server/src/server/instance.rs
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use metrics::{counter, gauge, histogram};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::ServerConfig;
use crate::core::constants::SLOW_TICK_LOG_MS;
use crate::core::error::{ServerError, ServerResult};
use crate::core::types::{Guid, HighGuid, MoveDirection, Vec2};
use crate::entities::accessor::{ObjectAccessor, ObjectHandle};
use crate::entities::guid_map::GuidAllocator;
use crate::entities::object::{ObjectKind, WorldObject};
use crate::network::protocol::{
    build_chat_message, build_heartbeat, build_name_query_response, build_new_world, ClientCommand,
};
use crate::network::session::{Session, SessionOutbox, SessionRegistry};
use crate::systems::movement::motion_master::MotionMaster;
use crate::systems::movement::unit;
use crate::world::map::TickContext;
use crate::world::map_manager::MapManager;
use crate::world::storage::WorldStorage;

/// The authoritative simulation. Owned by a single tick thread; the network
/// side only touches `sessions`.
pub struct WorldServer {
    config: ServerConfig,
    storage: WorldStorage,
    objects: ObjectAccessor,
    maps: MapManager,
    sessions: Arc<SessionRegistry>,
    // in-world player -> owning session, for packet delivery
    routes: AHashMap<Guid, Arc<Session>>,
    players: AHashMap<Uuid, Guid>,
    rng: StdRng,
    frame_counter: u64,
}

impl WorldServer {
    pub fn new(config: ServerConfig, storage: WorldStorage) -> ServerResult<Self> {
        let mut objects = ObjectAccessor::with_guids(GuidAllocator::with_player_limit(config.max_character_id));
        for spawn in storage.all_creature_spawns() {
            objects.guids_mut().reserve(Guid::new(HighGuid::Creature, spawn.entry, spawn.guid_low))?;
        }
        for spawn in storage.all_gameobject_spawns() {
            objects.guids_mut().reserve(Guid::new(HighGuid::Gameobject, spawn.entry, spawn.guid_low))?;
        }

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut server = WorldServer {
            config,
            storage,
            objects,
            maps: MapManager::new(),
            sessions: Arc::new(SessionRegistry::new()),
            routes: AHashMap::new(),
            players: AHashMap::new(),
            rng,
            frame_counter: 0,
        };

        let preload = server.config.preload_maps.clone();
        for map_id in preload {
            let mut outbox = SessionOutbox::new(&server.routes);
            if server.maps.get_or_create(map_id, &server.storage, &mut server.objects, &mut outbox).is_none() {
                return Err(ServerError::InitializationFailed(format!("cannot preload map {}", map_id)));
            }
        }
        info!("World server initialized with {} preloaded maps", server.maps.len());
        Ok(server)
    }

    pub fn config(&self) -> &ServerConfig { &self.config }
    pub fn storage(&self) -> &WorldStorage { &self.storage }
    pub fn objects(&self) -> &ObjectAccessor { &self.objects }
    pub fn maps(&self) -> &MapManager { &self.maps }
    pub fn frame(&self) -> u64 { self.frame_counter }

    /// Shared with the network layer, which opens sessions and feeds them.
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    pub fn player_of(&self, session_id: &Uuid) -> Option<Guid> {
        self.players.get(session_id).copied()
    }

    /// Motion control for scripted movement of any unit.
    pub fn motion_master_mut(&mut self, guid: Guid) -> Option<&mut MotionMaster> {
        self.objects
            .find_object_mut(guid)
            .and_then(|o| o.as_unit_mut())
            .map(|u| &mut u.motion)
    }

    /// Runs one simulation step at `now_ms`.
    pub fn process_tick(&mut self, now_ms: u64) {
        let tick_start = Instant::now();

        for session in self.sessions.snapshot() {
            for _ in 0..self.config.max_commands_per_session_tick {
                let Some(command) = session.pop_command() else {
                    break;
                };
                if let Err(e) = self.handle_command(&session, command, now_ms) {
                    warn!("Session {}: command rejected: {}", session.id(), e);
                    counter!("world_commands_rejected_total").increment(1);
                }
            }
            if session.is_closed() {
                self.handle_disconnect(&session);
            }
        }

        {
            let mut outbox = SessionOutbox::new(&self.routes);
            let mut tick = TickContext {
                objects: &mut self.objects,
                storage: &self.storage,
                outbox: &mut outbox,
                rng: &mut self.rng,
                now_ms,
            };
            self.maps.update(&mut tick);
        }

        self.frame_counter += 1;
        let elapsed = tick_start.elapsed();
        histogram!("world_tick_duration_seconds").record(elapsed.as_secs_f64());
        gauge!("world_players_in_world").set(self.routes.len() as f64);
        gauge!("world_objects_total").set(self.objects.len() as f64);
        if elapsed.as_millis() as u64 > SLOW_TICK_LOG_MS {
            warn!("Frame {} took {:?}", self.frame_counter, elapsed);
        }
    }

    fn handle_command(&mut self, session: &Arc<Session>, command: ClientCommand, now_ms: u64) -> ServerResult<()> {
        if let ClientCommand::EnterWorld { guid_low, name, map_id, position } = command {
            return self.enter_world(session, guid_low, name, map_id, position, now_ms);
        }

        let Some(guid) = self.players.get(&session.id()).copied() else {
            return Err(ServerError::InvalidInput(format!("{:?} without a player in world", command)));
        };
        let (handle, map_id) = self.locate(guid)?;

        match command {
            ClientCommand::EnterWorld { .. } => Ok(()),
            ClientCommand::MoveStartDirection { direction } => {
                let WorldServer { objects, maps, routes, .. } = self;
                let map = maps.get_mut(map_id).ok_or_else(|| missing_map(map_id))?;
                let mut outbox = SessionOutbox::new(routes);
                unit::integrate_movement(map, objects, handle, now_ms, &mut outbox);
                unit::start_moving(map, objects, handle, direction, now_ms, &mut outbox);
                Ok(())
            }
            ClientCommand::MoveStopDirection { direction, position } => {
                let WorldServer { objects, maps, routes, .. } = self;
                let map = maps.get_mut(map_id).ok_or_else(|| missing_map(map_id))?;
                let mut outbox = SessionOutbox::new(routes);
                if map.contains_position(position) {
                    map.move_object(objects, handle, position, &mut outbox);
                    mark_integrated(objects, handle, now_ms);
                } else {
                    warn!("{}: stop position {:?} outside map {}, ignored", guid, position, map_id);
                    unit::integrate_movement(map, objects, handle, now_ms, &mut outbox);
                }
                unit::stop_moving(map, objects, handle, direction, &mut outbox);
                Ok(())
            }
            ClientCommand::MoveHeartbeat { position } => {
                let WorldServer { objects, maps, routes, .. } = self;
                let map = maps.get_mut(map_id).ok_or_else(|| missing_map(map_id))?;
                if !map.contains_position(position) {
                    return Err(ServerError::InvalidInput(format!("heartbeat position {:?} outside map {}", position, map_id)));
                }
                let mut outbox = SessionOutbox::new(routes);
                map.move_object(objects, handle, position, &mut outbox);
                mark_integrated(objects, handle, now_ms);

                let direction = objects
                    .get(handle)
                    .and_then(|o| o.as_unit())
                    .map(|u| u.move_direction)
                    .unwrap_or_else(MoveDirection::empty);
                let cell = map.grid().cell_of(position);
                let packet = build_heartbeat(guid, direction, position);
                map.send_to_surroundings(objects, cell, &[packet], Some(guid), &mut outbox);
                Ok(())
            }
            ClientCommand::Teleport { map_id: target_map, position } => {
                self.teleport(session, guid, handle, map_id, target_map, position)
            }
            ClientCommand::LeaveWorld => {
                self.remove_player(&session.id());
                Ok(())
            }
            ClientCommand::ChatMessage { chat_type, text } => {
                let WorldServer { objects, maps, routes, .. } = self;
                let map = maps.get(map_id).ok_or_else(|| missing_map(map_id))?;
                let mut outbox = SessionOutbox::new(routes);
                map.send_around(objects, handle, &[build_chat_message(chat_type, guid, &text)], &mut outbox);
                Ok(())
            }
            ClientCommand::NameQuery { guid: queried } => {
                let name = self.name_of(queried).unwrap_or_default();
                session.push_outbound(build_name_query_response(queried, &name));
                Ok(())
            }
        }
    }

    /// Display name of an object currently in the world.
    pub fn name_of(&self, guid: Guid) -> Option<String> {
        let object = self.objects.find_object(guid).filter(|o| o.is_in_world())?;
        match object.kind() {
            ObjectKind::Player(player) => Some(player.name.clone()),
            ObjectKind::Creature(_) => self.storage.creature_template(guid.entry()).map(|t| t.name.clone()),
            ObjectKind::Gameobject(_) => self.storage.gameobject_template(guid.entry()).map(|t| t.name.clone()),
        }
    }

    fn enter_world(
        &mut self,
        session: &Arc<Session>,
        guid_low: u32,
        name: String,
        map_id: u32,
        position: Vec2,
        now_ms: u64,
    ) -> ServerResult<()> {
        if self.players.contains_key(&session.id()) {
            return Err(ServerError::InvalidInput("session already has a player in world".to_string()));
        }
        let record = self.storage.map(map_id).ok_or_else(|| missing_map(map_id))?;
        if !record.contains(position.x, position.y) {
            return Err(ServerError::InvalidInput(format!("entry position {:?} outside map {}", position, map_id)));
        }

        if guid_low > self.config.max_character_id {
            return Err(ServerError::InvalidInput(format!(
                "character id {} exceeds the limit of {}",
                guid_low, self.config.max_character_id
            )));
        }

        let guid = if guid_low == 0 {
            self.objects.guids_mut().allocate(HighGuid::Player, 0)?
        } else {
            let guid = Guid::new(HighGuid::Player, 0, guid_low);
            if self.objects.find(guid).is_some() {
                return Err(ServerError::DuplicateGuid(guid.raw()));
            }
            self.objects.guids_mut().reserve(guid)?;
            guid
        };

        let mut player = WorldObject::new_player(guid, name, session.id(), position);
        if let Some(unit) = player.as_unit_mut() {
            unit.last_movement_update = now_ms;
        }
        let handle = match self.objects.insert(player) {
            Ok(handle) => handle,
            Err(e) => {
                self.objects.guids_mut().release(guid);
                return Err(e);
            }
        };
        self.routes.insert(guid, session.clone());
        session.push_outbound(build_new_world(map_id, position));

        let WorldServer { objects, maps, storage, routes, .. } = self;
        let mut outbox = SessionOutbox::new(routes);
        let added = match maps.get_or_create(map_id, storage, objects, &mut outbox) {
            Some(map) => map.add_to_map(objects, handle, &mut outbox),
            None => Err(missing_map(map_id)),
        };
        if let Err(e) = added {
            self.routes.remove(&guid);
            self.objects.remove(handle);
            self.objects.guids_mut().release(guid);
            return Err(e);
        }

        self.players.insert(session.id(), guid);
        info!("Player {} entered map {} at ({:.1}, {:.1})", guid, map_id, position.x, position.y);
        Ok(())
    }

    fn teleport(
        &mut self,
        session: &Arc<Session>,
        guid: Guid,
        handle: ObjectHandle,
        from_map: u32,
        to_map: u32,
        position: Vec2,
    ) -> ServerResult<()> {
        let record = self.storage.map(to_map).ok_or_else(|| missing_map(to_map))?;
        if !record.contains(position.x, position.y) {
            return Err(ServerError::InvalidInput(format!("teleport target {:?} outside map {}", position, to_map)));
        }

        let WorldServer { objects, maps, storage, routes, .. } = self;
        let mut outbox = SessionOutbox::new(routes);

        if from_map == to_map {
            let map = maps.get_mut(from_map).ok_or_else(|| missing_map(from_map))?;
            map.move_object(objects, handle, position, &mut outbox);
            let direction = objects
                .get(handle)
                .and_then(|o| o.as_unit())
                .map(|u| u.move_direction)
                .unwrap_or_else(MoveDirection::empty);
            map.send_around(objects, handle, &[build_heartbeat(guid, direction, position)], &mut outbox);
            debug!("{} teleported within map {}", guid, to_map);
            return Ok(());
        }

        let old_position = objects.get(handle).map(|o| o.position()).unwrap_or(position);
        let old_map = maps.get_mut(from_map).ok_or_else(|| missing_map(from_map))?;
        old_map.remove_from_map(objects, handle, &mut outbox)?;
        if let Some(object) = objects.get_mut(handle) {
            object.set_position(position);
        }
        session.push_outbound(build_new_world(to_map, position));

        let added = match maps.get_or_create(to_map, storage, objects, &mut outbox) {
            Some(map) => map.add_to_map(objects, handle, &mut outbox),
            None => Err(missing_map(to_map)),
        };
        if let Err(e) = added {
            warn!("{}: transfer to map {} failed: {}", guid, to_map, e);
            self.return_to_map(session, guid, handle, from_map, old_position);
            return Err(e);
        }
        info!("{} teleported from map {} to map {}", guid, from_map, to_map);
        Ok(())
    }

    /// Puts a player that is on no map back where it came from. A player that
    /// cannot be placed at all is taken out of the world.
    fn return_to_map(&mut self, session: &Arc<Session>, guid: Guid, handle: ObjectHandle, map_id: u32, position: Vec2) {
        if let Some(object) = self.objects.get_mut(handle) {
            object.set_position(position);
        }
        session.push_outbound(build_new_world(map_id, position));
        let WorldServer { objects, maps, routes, .. } = self;
        let mut outbox = SessionOutbox::new(routes);
        let restored = match maps.get_mut(map_id) {
            Some(map) => map.add_to_map(objects, handle, &mut outbox),
            None => Err(missing_map(map_id)),
        };
        if let Err(e) = restored {
            warn!("{}: cannot return to map {} ({}), removing from world", guid, map_id, e);
            self.remove_player(&session.id());
        }
    }

    fn handle_disconnect(&mut self, session: &Arc<Session>) {
        self.remove_player(&session.id());
        self.sessions.remove(&session.id());
        debug!("Session {} closed", session.id());
    }

    fn remove_player(&mut self, session_id: &Uuid) {
        let Some(guid) = self.players.remove(session_id) else {
            return;
        };
        if let Some(handle) = self.objects.find(guid) {
            let map_id = self.objects.get(handle).and_then(|o| o.map_id());
            let WorldServer { objects, maps, routes, .. } = self;
            if let Some(map) = map_id.and_then(|id| maps.get_mut(id)) {
                let mut outbox = SessionOutbox::new(routes);
                if let Err(e) = map.remove_from_map(objects, handle, &mut outbox) {
                    warn!("Removing {} from map failed: {}", guid, e);
                }
            }
            self.objects.remove(handle);
        }
        self.routes.remove(&guid);
        info!("Player {} left the world", guid);
    }

    fn locate(&self, guid: Guid) -> ServerResult<(ObjectHandle, u32)> {
        let handle = self
            .objects
            .find(guid)
            .ok_or_else(|| ServerError::NotFound(format!("object {}", guid)))?;
        let map_id = self
            .objects
            .get(handle)
            .and_then(|o| o.map_id())
            .ok_or_else(|| ServerError::NotFound(format!("map of {}", guid)))?;
        Ok((handle, map_id))
    }
}

fn missing_map(map_id: u32) -> ServerError {
    ServerError::NotFound(format!("map {}", map_id))
}

/// A client-reported position replaces integration up to `now_ms`.
fn mark_integrated(objects: &mut ObjectAccessor, handle: ObjectHandle, now_ms: u64) {
    if let Some(unit) = objects.get_mut(handle).and_then(|o| o.as_unit_mut()) {
        unit.last_movement_update = now_ms;
    }
}
