// Room lifecycle: waiting -> playing -> ended (paused as a sub-state of
// playing), player join/leave/ready/start, host promotion, disconnect
// grace windows, and the registry shared across workers.
//
// Registry locks are held only for lookup/insert/remove; the simulation
// runs in the room's worker task and never under a registry lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::constants::{
    GRACE_WINDOW_SECS, MAP_HEIGHT, MAP_WIDTH, MAX_PLAYERS, PING_TIMEOUT_SECS,
    ROOM_TTL_WAITING_SECS,
};
use crate::engine::entities::{Difficulty, PlayerId, TeamRole};
use crate::engine::game::GameEngine;
use crate::engine::map;
use crate::metrics;
use crate::protocol::{Action, GameStartPlayer, MapInit, ResourceClaim, ServerMessage};
use crate::scheduler;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room not found")]
    NotFound,
    #[error("Room is full")]
    RoomFull,
    #[error("Player not in room")]
    UnknownPlayer,
    #[error("Only the host can do that")]
    NotHost,
    #[error("All players must be ready")]
    NotAllReady,
    #[error("Need two players (or one against the AI)")]
    NotEnoughPlayers,
    #[error("Room is not {0}")]
    WrongStatus(&'static str),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Paused,
    Ended,
}

/// Commands consumed by the room's worker task.
#[derive(Debug)]
pub enum RoomCommand {
    Submit {
        player_id: PlayerId,
        action: Action,
        action_id: Option<String>,
        client_tick: u64,
        arrival_ms: i64,
        claimed: Option<ResourceClaim>,
    },
    Pause,
    Resume,
    /// A connection closed; the player's queued input is dropped.
    Disconnected { player_id: PlayerId },
    Forfeit { player_id: PlayerId },
    Stop,
}

/// One player's seat in a room.
#[derive(Debug)]
pub struct PlayerSeat {
    pub id: PlayerId,
    pub name: String,
    pub role: TeamRole,
    pub color: String,
    pub ready: bool,
    pub connected: bool,
    pub last_ping: Instant,
    pub grace_deadline: Option<Instant>,
    /// Outbound frame channel while a WebSocket is attached.
    pub tx: Option<mpsc::UnboundedSender<String>>,
}

impl PlayerSeat {
    fn new(id: PlayerId, name: String, role: TeamRole, color: &str) -> Self {
        PlayerSeat {
            id,
            name,
            role,
            color: color.to_string(),
            ready: false,
            connected: false,
            last_ping: Instant::now(),
            grace_deadline: None,
            tx: None,
        }
    }
}

#[derive(Debug)]
pub struct RoomState {
    pub status: RoomStatus,
    pub host: PlayerId,
    pub seats: Vec<PlayerSeat>,
    pub seed: u64,
    pub difficulty: Difficulty,
    pub vs_ai: bool,
    pub created_at: DateTime<Utc>,
}

/// Serializable view of a room for the lobby REST API.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub status: RoomStatus,
    pub host: PlayerId,
    pub players: Vec<SeatInfo>,
    pub max_players: usize,
    pub seed: u64,
    pub difficulty: Difficulty,
    pub vs_ai: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatInfo {
    pub id: PlayerId,
    pub name: String,
    pub role: TeamRole,
    pub color: String,
    pub ready: bool,
    pub connected: bool,
}

#[derive(Debug)]
pub struct Room {
    pub id: String,
    state: Mutex<RoomState>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<RoomCommand>>>,
    /// Cached gameStart frame so late (re)joining sockets get the map.
    game_start_json: Mutex<Option<String>>,
}

impl Room {
    fn new(host_id: PlayerId, host_name: String, seed: u64, difficulty: Difficulty, vs_ai: bool) -> Self {
        let host_seat = PlayerSeat::new(host_id.clone(), host_name, TeamRole::Host, "blue");
        Room {
            id: Uuid::new_v4().to_string(),
            state: Mutex::new(RoomState {
                status: RoomStatus::Waiting,
                host: host_id,
                seats: vec![host_seat],
                seed,
                difficulty,
                vs_ai,
                created_at: Utc::now(),
            }),
            cmd_tx: Mutex::new(None),
            game_start_json: Mutex::new(None),
        }
    }

    pub fn status(&self) -> RoomStatus {
        self.state.lock().unwrap().status
    }

    pub fn set_status(&self, status: RoomStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn info(&self) -> RoomInfo {
        let state = self.state.lock().unwrap();
        RoomInfo {
            id: self.id.clone(),
            status: state.status,
            host: state.host.clone(),
            players: state
                .seats
                .iter()
                .map(|s| SeatInfo {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    role: s.role,
                    color: s.color.clone(),
                    ready: s.ready,
                    connected: s.connected,
                })
                .collect(),
            max_players: MAX_PLAYERS,
            seed: state.seed,
            difficulty: state.difficulty,
            vs_ai: state.vs_ai,
            created_at: state.created_at.to_rfc3339(),
        }
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .seats
            .iter()
            .any(|s| s.id == player_id)
    }

    /// Run a closure under the room lock.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut RoomState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn send_to(&self, player_id: &str, msg: &ServerMessage) {
        self.send_json_to(player_id, msg.to_json());
    }

    pub fn send_json_to(&self, player_id: &str, json: String) {
        let state = self.state.lock().unwrap();
        if let Some(seat) = state.seats.iter().find(|s| s.id == player_id) {
            if let Some(tx) = &seat.tx {
                let _ = tx.send(json);
            }
        }
    }

    pub fn broadcast(&self, msg: &ServerMessage) {
        let json = msg.to_json();
        let state = self.state.lock().unwrap();
        for seat in &state.seats {
            if let Some(tx) = &seat.tx {
                let _ = tx.send(json.clone());
            }
        }
    }

    /// Attach a WebSocket's outbound channel to a seat. Returns the cached
    /// gameStart frame when rejoining a live match.
    pub fn attach(
        &self,
        player_id: &str,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<Option<String>, RoomError> {
        {
            let mut state = self.state.lock().unwrap();
            let seat = state
                .seats
                .iter_mut()
                .find(|s| s.id == player_id)
                .ok_or(RoomError::UnknownPlayer)?;
            seat.tx = Some(tx);
            seat.connected = true;
            seat.last_ping = Instant::now();
            seat.grace_deadline = None;
        }
        Ok(self.game_start_json.lock().unwrap().clone())
    }

    /// A socket closed: the seat loses its channel; in a live match the
    /// grace window opens.
    pub fn handle_disconnect(&self, player_id: &str) {
        let mut state = self.state.lock().unwrap();
        let playing = matches!(state.status, RoomStatus::Playing | RoomStatus::Paused);
        if let Some(seat) = state.seats.iter_mut().find(|s| s.id == player_id) {
            seat.tx = None;
            seat.connected = false;
            if playing {
                seat.grace_deadline =
                    Some(Instant::now() + Duration::from_secs(GRACE_WINDOW_SECS));
                tracing::info!(
                    room_id = %self.id,
                    player_id,
                    "Player disconnected, grace window open"
                );
            }
        }
    }

    pub fn mark_ping(&self, player_id: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock().unwrap();
        let seat = state
            .seats
            .iter_mut()
            .find(|s| s.id == player_id)
            .ok_or(RoomError::UnknownPlayer)?;
        seat.last_ping = Instant::now();
        seat.connected = true;
        seat.grace_deadline = None;
        Ok(())
    }

    /// Send a command to the room worker. False when no worker is running.
    pub fn command(&self, cmd: RoomCommand) -> bool {
        let guard = self.cmd_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(cmd).is_ok(),
            None => false,
        }
    }

    pub fn set_game_start_json(&self, json: String) {
        *self.game_start_json.lock().unwrap() = Some(json);
    }

    fn set_cmd_tx(&self, tx: mpsc::UnboundedSender<RoomCommand>) {
        *self.cmd_tx.lock().unwrap() = Some(tx);
    }

    pub fn clear_cmd_tx(&self) {
        *self.cmd_tx.lock().unwrap() = None;
    }
}

/// Process-wide `roomId -> Room` map.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_room(
        &self,
        host_id: Option<PlayerId>,
        host_name: Option<String>,
        seed: Option<u64>,
        difficulty: Difficulty,
        vs_ai: bool,
    ) -> Arc<Room> {
        let host_id = host_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let host_name = host_name.unwrap_or_else(|| "Player 1".to_string());
        let seed = seed.unwrap_or_else(|| Uuid::new_v4().as_u128() as u64);
        let room = Arc::new(Room::new(host_id, host_name, seed, difficulty, vs_ai));
        self.rooms
            .lock()
            .unwrap()
            .insert(room.id.clone(), room.clone());
        metrics::ACTIVE_ROOMS.set(self.rooms.lock().unwrap().len() as i64);
        tracing::info!(room_id = %room.id, "Room created");
        room
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    pub fn remove(&self, room_id: &str) {
        self.rooms.lock().unwrap().remove(room_id);
        metrics::ACTIVE_ROOMS.set(self.rooms.lock().unwrap().len() as i64);
    }

    pub fn list(&self) -> Vec<RoomInfo> {
        let rooms: Vec<Arc<Room>> = self.rooms.lock().unwrap().values().cloned().collect();
        let mut infos: Vec<RoomInfo> = rooms.iter().map(|r| r.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Join a guest, or rejoin an existing seat (idempotent by player id).
    pub fn join(
        &self,
        room_id: &str,
        player_id: PlayerId,
        player_name: Option<String>,
    ) -> Result<Arc<Room>, RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;
        room.with_state(|state| {
            if state.seats.iter().any(|s| s.id == player_id) {
                // Rejoin restores the player.
                if let Some(seat) = state.seats.iter_mut().find(|s| s.id == player_id) {
                    seat.connected = true;
                    seat.grace_deadline = None;
                    seat.last_ping = Instant::now();
                }
                return Ok(());
            }
            if state.status != RoomStatus::Waiting {
                return Err(RoomError::WrongStatus("waiting"));
            }
            if state.seats.len() >= MAX_PLAYERS || state.vs_ai {
                return Err(RoomError::RoomFull);
            }
            let name = player_name.unwrap_or_else(|| "Player 2".to_string());
            state
                .seats
                .push(PlayerSeat::new(player_id.clone(), name, TeamRole::Guest, "red"));
            tracing::info!(room_id, player_id = %player_id, "Player joined");
            Ok(())
        })?;
        Ok(room)
    }

    /// Remove a player. In a waiting room the seat disappears (host
    /// promotion / room deletion); in a live match the grace window opens.
    pub fn leave(&self, room_id: &str, player_id: &str) -> Result<(), RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;

        let delete_room = room.with_state(|state| {
            if !state.seats.iter().any(|s| s.id == player_id) {
                return Err(RoomError::UnknownPlayer);
            }
            match state.status {
                RoomStatus::Waiting | RoomStatus::Ended => {
                    state.seats.retain(|s| s.id != player_id);
                    if state.seats.is_empty() {
                        return Ok(true);
                    }
                    if state.host == player_id {
                        // Promote the next seat to host.
                        let next = &mut state.seats[0];
                        next.role = TeamRole::Host;
                        next.color = "blue".to_string();
                        state.host = next.id.clone();
                        tracing::info!(room_id, new_host = %state.host, "Host promoted");
                    }
                    Ok(false)
                }
                RoomStatus::Playing | RoomStatus::Paused => Ok(false),
            }
        })?;

        if delete_room {
            self.remove(room_id);
            tracing::info!(room_id, "Room deleted (empty)");
            return Ok(());
        }

        if matches!(room.status(), RoomStatus::Playing | RoomStatus::Paused) {
            room.handle_disconnect(player_id);
        }
        Ok(())
    }

    pub fn ready(&self, room_id: &str, player_id: &str) -> Result<bool, RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;
        room.with_state(|state| {
            if state.status != RoomStatus::Waiting {
                return Err(RoomError::WrongStatus("waiting"));
            }
            let seat = state
                .seats
                .iter_mut()
                .find(|s| s.id == player_id)
                .ok_or(RoomError::UnknownPlayer)?;
            seat.ready = !seat.ready;
            Ok(seat.ready)
        })
    }

    pub fn ping(&self, room_id: &str, player_id: &str) -> Result<(), RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;
        room.mark_ping(player_id)
    }

    pub fn pause(&self, room_id: &str, player_id: &str) -> Result<(), RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;
        room.with_state(|state| {
            if state.host != player_id {
                return Err(RoomError::NotHost);
            }
            if state.status != RoomStatus::Playing {
                return Err(RoomError::WrongStatus("playing"));
            }
            Ok(())
        })?;
        room.command(RoomCommand::Pause);
        Ok(())
    }

    pub fn resume(&self, room_id: &str, player_id: &str) -> Result<(), RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;
        room.with_state(|state| {
            if state.host != player_id {
                return Err(RoomError::NotHost);
            }
            if state.status != RoomStatus::Paused {
                return Err(RoomError::WrongStatus("paused"));
            }
            Ok(())
        })?;
        room.command(RoomCommand::Resume);
        Ok(())
    }

    /// Host-only: build the engine, seat the players, start the worker.
    pub fn start(&self, room_id: &str, player_id: &str) -> Result<(), RoomError> {
        let room = self.get(room_id).ok_or(RoomError::NotFound)?;

        let (seed, difficulty, vs_ai, seats) = room.with_state(|state| {
            if state.status != RoomStatus::Waiting {
                return Err(RoomError::WrongStatus("waiting"));
            }
            if state.host != player_id {
                return Err(RoomError::NotHost);
            }
            if !state.seats.iter().all(|s| s.ready) {
                return Err(RoomError::NotAllReady);
            }
            let enough = state.seats.len() >= MAX_PLAYERS
                || (state.seats.len() == 1 && state.vs_ai);
            if !enough {
                return Err(RoomError::NotEnoughPlayers);
            }
            let seats: Vec<(PlayerId, String, TeamRole, String)> = state
                .seats
                .iter()
                .map(|s| (s.id.clone(), s.name.clone(), s.role, s.color.clone()))
                .collect();
            Ok((state.seed, state.difficulty, state.vs_ai, seats))
        })?;

        let (grid, resources) = map::generate(MAP_WIDTH, MAP_HEIGHT, seed)
            .map_err(|e| RoomError::Internal(e.to_string()))?;
        let map_init = MapInit {
            width: grid.width,
            height: grid.height,
            tile_size: crate::engine::constants::TILE_SIZE,
            tiles: grid.encode(),
        };

        let mut engine = GameEngine::new(grid, resources, difficulty);
        let mut start_players = Vec::new();
        for (id, name, role, color) in &seats {
            engine
                .add_player(id.clone(), name.clone(), *role, color.clone())
                .map_err(|e| RoomError::Internal(e.to_string()))?;
            start_players.push(GameStartPlayer {
                id: id.clone(),
                name: name.clone(),
                role: *role,
                color: color.clone(),
            });
        }
        if vs_ai {
            let ai_id = engine
                .add_ai(difficulty)
                .map_err(|e| RoomError::Internal(e.to_string()))?;
            start_players.push(GameStartPlayer {
                id: ai_id,
                name: "Computer".to_string(),
                role: TeamRole::Ai,
                color: "red".to_string(),
            });
        }
        engine.initialize();

        let start_msg = ServerMessage::GameStart {
            room_id: room.id.clone(),
            seed,
            map: map_init,
            players: start_players,
        };
        room.set_game_start_json(start_msg.to_json());
        room.set_status(RoomStatus::Playing);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        room.set_cmd_tx(cmd_tx);
        scheduler::spawn_room_loop(room.clone(), engine, cmd_rx);

        room.broadcast(&start_msg);
        metrics::RUNNING_MATCHES.inc();
        tracing::info!(room_id, seed, vs_ai, "Match started");
        Ok(())
    }

    /// Delete never-started rooms older than the waiting TTL, and ended
    /// rooms past the same age.
    pub fn sweep(&self) {
        let now = Utc::now();
        let stale: Vec<String> = self
            .rooms
            .lock()
            .unwrap()
            .values()
            .filter(|room| {
                let info = room.info();
                let age = now
                    .signed_duration_since(
                        DateTime::parse_from_rfc3339(&info.created_at)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or(now),
                    )
                    .num_seconds();
                match info.status {
                    RoomStatus::Waiting | RoomStatus::Ended => age > ROOM_TTL_WAITING_SECS,
                    _ => false,
                }
            })
            .map(|room| room.id.clone())
            .collect();
        for id in stale {
            tracing::info!(room_id = %id, "Sweeping stale room");
            self.remove(&id);
        }
    }
}

/// Background sweeper task; runs for the process lifetime.
pub fn spawn_sweeper(registry: Arc<RoomRegistry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            registry.sweep();
        }
    });
}

/// Seconds a seat may stay silent before it counts as disconnected.
pub fn ping_timeout() -> Duration {
    Duration::from_secs(PING_TIMEOUT_SECS)
}
