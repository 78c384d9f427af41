// Wire protocol: JSON messages exchanged over the per-player WebSocket.
//
// Every message carries a `type` tag. Client frames that fail to parse are
// treated as malformed and close the connection.

use serde::{Deserialize, Serialize};

use crate::engine::entities::{
    BuildingKind, PlayerId, TeamRole, UnitKind, UpgradeKind, Vec2,
};
use crate::engine::snapshot::Snapshot;

/// A player-issued order. One action references at most one of the sender's
/// entities; multi-unit orders are sent as one action per unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    Move {
        unit_id: String,
        target: Vec2,
        #[serde(default)]
        queued: bool,
    },
    Attack {
        unit_id: String,
        target_id: String,
    },
    AttackMove {
        unit_id: String,
        target: Vec2,
        #[serde(default)]
        queued: bool,
    },
    /// Catapult only: bombard a point.
    AttackGround {
        unit_id: String,
        target: Vec2,
    },
    Patrol {
        unit_id: String,
        target: Vec2,
    },
    HoldPosition {
        unit_id: String,
    },
    Stop {
        unit_id: String,
    },
    Gather {
        unit_id: String,
        node_id: String,
    },
    Repair {
        unit_id: String,
        building_id: String,
    },
    Build {
        unit_id: String,
        building: BuildingKind,
        position: Vec2,
    },
    Produce {
        building_id: String,
        unit: UnitKind,
    },
    CancelProduce {
        building_id: String,
        index: usize,
    },
    SetRally {
        building_id: String,
        position: Vec2,
    },
    Upgrade {
        upgrade: UpgradeKind,
    },
    Surrender,
}

impl Action {
    /// The unit handle this action operates on, if any.
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            Action::Move { unit_id, .. }
            | Action::Attack { unit_id, .. }
            | Action::AttackMove { unit_id, .. }
            | Action::AttackGround { unit_id, .. }
            | Action::Patrol { unit_id, .. }
            | Action::HoldPosition { unit_id }
            | Action::Stop { unit_id }
            | Action::Gather { unit_id, .. }
            | Action::Repair { unit_id, .. }
            | Action::Build { unit_id, .. } => Some(unit_id),
            _ => None,
        }
    }

    /// The building handle this action operates on, if any.
    pub fn building_id(&self) -> Option<&str> {
        match self {
            Action::Produce { building_id, .. }
            | Action::CancelProduce { building_id, .. }
            | Action::SetRally { building_id, .. } => Some(building_id),
            _ => None,
        }
    }
}

/// Optional client-asserted resource totals, checked by the anti-cheat
/// monitor against server truth.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaim {
    pub gold: f64,
    pub wood: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Action {
        room_id: String,
        player_id: PlayerId,
        action: Action,
        #[serde(default)]
        client_tick: u64,
        #[serde(default)]
        action_id: Option<String>,
        /// Client wall clock, unix millis; rejected beyond ±5 s skew.
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        claimed: Option<ResourceClaim>,
    },
    Join {
        room_id: String,
        player_id: PlayerId,
        #[serde(default)]
        player_name: Option<String>,
    },
    Leave {
        room_id: String,
        player_id: PlayerId,
    },
    Ready {
        room_id: String,
        player_id: PlayerId,
    },
    Ping {
        room_id: String,
        player_id: PlayerId,
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

/// Initial map payload sent with `gameStart`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapInit {
    pub width: usize,
    pub height: usize,
    pub tile_size: f32,
    /// Row-major tile kinds as small ints.
    pub tiles: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartPlayer {
    pub id: PlayerId,
    pub name: String,
    pub role: TeamRole,
    pub color: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Snapshot(Snapshot),
    ActionAccepted {
        action_id: Option<String>,
    },
    ActionRejected {
        action_id: Option<String>,
        reason: String,
    },
    GameStart {
        room_id: String,
        seed: u64,
        map: MapInit,
        players: Vec<GameStartPlayer>,
    },
    GameOver {
        winner: Option<PlayerId>,
        reason: String,
    },
    Error {
        message: String,
    },
    Pong {
        timestamp: Option<i64>,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize server message: {e}");
            r#"{"type":"error","message":"serialization failure"}"#.to_string()
        })
    }
}
