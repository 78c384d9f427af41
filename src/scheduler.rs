// Per-room worker: owns the engine and drives the two periodic loops.
//
// The tick driver (60 Hz) drains queued player input in deterministic
// order, validates it, feeds the engine, and steps the simulation. The
// snapshot driver (10 Hz) builds per-player fog-filtered snapshots. Both
// run in one task via select!, so the engine is single-threaded and
// lock-free over game state; everything else only enqueues RoomCommands.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::anticheat::{CheatMonitor, Severity};
use crate::engine::constants::{
    GRACE_WINDOW_SECS, SNAPSHOT_INTERVAL_MILLIS, TICK_INTERVAL_MICROS,
};
use crate::engine::entities::{PlayerId, TeamRole, Vec2};
use crate::engine::game::GameEngine;
use crate::engine::{snapshot, validate};
use crate::metrics;
use crate::protocol::{Action, ResourceClaim, ServerMessage};
use crate::room::{ping_timeout, Room, RoomCommand, RoomStatus};

/// Ticks between anti-cheat invariant sweeps.
const AUDIT_EVERY_TICKS: u64 = 600;

/// A submitted action waiting for the next tick boundary.
pub(crate) struct PendingAction {
    pub player_id: PlayerId,
    pub action: Action,
    pub action_id: Option<String>,
    pub client_tick: u64,
    pub arrival_ms: i64,
    pub claimed: Option<ResourceClaim>,
}

pub fn spawn_room_loop(
    room: Arc<Room>,
    mut engine: GameEngine,
    mut rx: UnboundedReceiver<RoomCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick_timer = interval(Duration::from_micros(TICK_INTERVAL_MICROS));
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut snapshot_timer = interval(Duration::from_millis(SNAPSHOT_INTERVAL_MILLIS));
        snapshot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut maintenance_timer = interval(Duration::from_secs(1));

        let mut pending: Vec<PendingAction> = Vec::new();
        let mut monitor = CheatMonitor::new();

        loop {
            tokio::select! {
                maybe_cmd = rx.recv() => {
                    match maybe_cmd {
                        Some(RoomCommand::Submit {
                            player_id,
                            action,
                            action_id,
                            client_tick,
                            arrival_ms,
                            claimed,
                        }) => {
                            pending.push(PendingAction {
                                player_id,
                                action,
                                action_id,
                                client_tick,
                                arrival_ms,
                                claimed,
                            });
                        }
                        Some(RoomCommand::Pause) => {
                            if room.status() == RoomStatus::Playing {
                                room.set_status(RoomStatus::Paused);
                                tracing::info!(room_id = %room.id, "Room paused");
                            }
                        }
                        Some(RoomCommand::Resume) => {
                            if room.status() == RoomStatus::Paused {
                                room.set_status(RoomStatus::Playing);
                                tracing::info!(room_id = %room.id, "Room resumed");
                            }
                        }
                        Some(RoomCommand::Disconnected { player_id }) => {
                            pending.retain(|p| p.player_id != player_id);
                        }
                        Some(RoomCommand::Forfeit { player_id }) => {
                            tracing::info!(room_id = %room.id, player_id = %player_id, "Forfeit");
                            engine.force_eliminate(&player_id);
                        }
                        Some(RoomCommand::Stop) | None => {
                            finish_room(&room, None);
                            break;
                        }
                    }
                }
                _ = tick_timer.tick() => {
                    if room.status() != RoomStatus::Playing {
                        continue;
                    }
                    drain_pending(&mut pending, &mut engine, &room, &mut monitor);

                    let started = Instant::now();
                    engine.tick();
                    metrics::TICK_DURATION_MS
                        .observe(started.elapsed().as_secs_f64() * 1000.0);
                    metrics::TICKS_TOTAL.inc();

                    if engine.current_tick() % AUDIT_EVERY_TICKS == 0
                        && run_audit(&room, &engine, &monitor)
                    {
                        break;
                    }

                    if engine.is_game_over() {
                        broadcast_snapshots(&room, &engine);
                        let state = engine.state();
                        let outcome = if state.winner.is_some() { "win" } else { "draw" };
                        room.broadcast(&ServerMessage::GameOver {
                            winner: state.winner.clone(),
                            reason: state.end_reason.clone().unwrap_or_default(),
                        });
                        finish_room(&room, Some(outcome));
                        break;
                    }
                }
                _ = snapshot_timer.tick() => {
                    if room.status() != RoomStatus::Playing {
                        continue;
                    }
                    broadcast_snapshots(&room, &engine);
                }
                _ = maintenance_timer.tick() => {
                    if room.status() != RoomStatus::Playing {
                        continue;
                    }
                    run_watchdog(&room, &mut engine, &mut pending);
                }
            }
        }
    })
}

/// Feed due actions to the engine in deterministic order: arrival
/// timestamp, ties broken by player id, per-player FIFO preserved by the
/// stable sort. Actions declared for a future tick stay queued.
pub(crate) fn drain_pending(
    pending: &mut Vec<PendingAction>,
    engine: &mut GameEngine,
    room: &Room,
    monitor: &mut CheatMonitor,
) {
    pending.sort_by(|a, b| {
        a.arrival_ms
            .cmp(&b.arrival_ms)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });

    let current = engine.current_tick();
    let mut later = Vec::new();
    for item in pending.drain(..) {
        if item.client_tick > current {
            later.push(item);
            continue;
        }
        process_action(item, engine, room, monitor);
    }
    *pending = later;
}

fn process_action(
    item: PendingAction,
    engine: &mut GameEngine,
    room: &Room,
    monitor: &mut CheatMonitor,
) {
    // Passive observation first; confirmed events forfeit the offender.
    if let Some(claim) = &item.claimed {
        if let Some(event) = monitor.check_resource_claim(&item.player_id, claim, engine.state()) {
            report_cheat(room, &event.detail, event.severity, &item.player_id);
            if event.severity == Severity::Confirmed {
                engine.force_eliminate(&item.player_id);
            }
        }
    }
    if let Some(pos) = action_position(&item.action) {
        if let Some(event) = monitor.check_position(&item.player_id, pos, engine.state()) {
            report_cheat(room, &event.detail, event.severity, &item.player_id);
            if event.severity == Severity::Confirmed {
                engine.force_eliminate(&item.player_id);
            }
        }
    }

    match validate::validate(engine.state(), &item.player_id, &item.action) {
        Ok(()) => match engine.submit(&item.player_id, &item.action) {
            Ok(()) => {
                metrics::ACTIONS_ACCEPTED_TOTAL.inc();
                room.send_to(
                    &item.player_id,
                    &ServerMessage::ActionAccepted {
                        action_id: item.action_id,
                    },
                );
                if let Some(event) = monitor.note_action(&item.player_id, Instant::now()) {
                    report_cheat(room, &event.detail, event.severity, &item.player_id);
                    if event.severity == Severity::Confirmed {
                        engine.force_eliminate(&item.player_id);
                    }
                }
            }
            Err(e) => {
                metrics::ACTIONS_REJECTED_TOTAL
                    .with_label_values(&["engine"])
                    .inc();
                room.send_to(
                    &item.player_id,
                    &ServerMessage::ActionRejected {
                        action_id: item.action_id,
                        reason: e.to_string(),
                    },
                );
            }
        },
        Err(e) => {
            metrics::ACTIONS_REJECTED_TOTAL
                .with_label_values(&[gate_label(&e)])
                .inc();
            room.send_to(
                &item.player_id,
                &ServerMessage::ActionRejected {
                    action_id: item.action_id,
                    reason: e.to_string(),
                },
            );
        }
    }
}

fn gate_label(err: &validate::ValidationError) -> &'static str {
    use validate::ValidationError::*;
    match err {
        RateLimited => "rate",
        ClockSkew => "clock",
        UnknownPlayer | UnknownUnit | UnknownBuilding | NotYourUnit | NotYourBuilding => {
            "ownership"
        }
        OutOfBounds | ImpassableTarget => "bounds",
        InvalidPlacement(_) => "placement",
        InsufficientResources | SupplyCapReached => "resources",
        UpgradeCapReached | MissingBlacksmith => "upgrade",
        InvalidTarget(_) | WrongVariant(_) => "target",
    }
}

/// The map position an action points at, if any.
fn action_position(action: &Action) -> Option<Vec2> {
    match action {
        Action::Move { target, .. }
        | Action::AttackMove { target, .. }
        | Action::AttackGround { target, .. }
        | Action::Patrol { target, .. } => Some(*target),
        Action::Build { position, .. } | Action::SetRally { position, .. } => Some(*position),
        _ => None,
    }
}

fn report_cheat(room: &Room, detail: &str, severity: Severity, player_id: &PlayerId) {
    metrics::CHEAT_EVENTS_TOTAL
        .with_label_values(&[severity.label()])
        .inc();
    tracing::warn!(
        room_id = %room.id,
        player_id = %player_id,
        severity = severity.label(),
        "Anti-cheat: {detail}"
    );
}

/// Engine-side invariant sweep. Any hit means the server state itself is
/// corrupt, so the room fail-stops. Returns true when the room ended.
fn run_audit(room: &Room, engine: &GameEngine, monitor: &CheatMonitor) -> bool {
    let events = monitor.audit(engine.state());
    if events.is_empty() {
        return false;
    }
    for event in &events {
        tracing::error!(
            room_id = %room.id,
            player_id = %event.player,
            "Engine invariant violation: {}",
            event.detail
        );
    }
    room.broadcast(&ServerMessage::Error {
        message: "internal error, match terminated".to_string(),
    });
    finish_room(room, None);
    true
}

/// Ping timeouts mark seats disconnected (grace window opens, pending
/// input dropped); expired grace windows forfeit.
fn run_watchdog(room: &Room, engine: &mut GameEngine, pending: &mut Vec<PendingAction>) {
    let now = Instant::now();
    let timeout = ping_timeout();
    let mut dropped: Vec<PlayerId> = Vec::new();
    let mut forfeited: Vec<PlayerId> = Vec::new();

    room.with_state(|state| {
        for seat in &mut state.seats {
            if seat.role == TeamRole::Ai {
                continue;
            }
            if seat.connected && now.duration_since(seat.last_ping) > timeout {
                seat.connected = false;
                seat.grace_deadline = Some(now + Duration::from_secs(GRACE_WINDOW_SECS));
                dropped.push(seat.id.clone());
            } else if let Some(deadline) = seat.grace_deadline {
                if now >= deadline {
                    seat.grace_deadline = None;
                    forfeited.push(seat.id.clone());
                }
            }
        }
    });

    for player_id in &dropped {
        tracing::info!(room_id = %room.id, player_id = %player_id, "Ping timeout");
        pending.retain(|p| &p.player_id != player_id);
    }
    for player_id in forfeited {
        tracing::info!(room_id = %room.id, player_id = %player_id, "Grace window expired, forfeit");
        engine.force_eliminate(&player_id);
    }
}

fn broadcast_snapshots(room: &Room, engine: &GameEngine) {
    let started = Instant::now();
    let timestamp = chrono::Utc::now().timestamp_millis();
    let recipients: Vec<PlayerId> = room.with_state(|state| {
        state
            .seats
            .iter()
            .filter(|s| s.tx.is_some() && s.role != TeamRole::Ai)
            .map(|s| s.id.clone())
            .collect()
    });
    for player_id in recipients {
        let snap = snapshot::build_for(engine.state(), &player_id, timestamp);
        room.send_json_to(&player_id, ServerMessage::Snapshot(snap).to_json());
    }
    metrics::SNAPSHOT_BUILD_MS.observe(started.elapsed().as_secs_f64() * 1000.0);
}

fn finish_room(room: &Room, outcome: Option<&'static str>) {
    room.set_status(RoomStatus::Ended);
    room.clear_cmd_tx();
    metrics::RUNNING_MATCHES.dec();
    if let Some(outcome) = outcome {
        metrics::MATCHES_DECIDED_TOTAL
            .with_label_values(&[outcome])
            .inc();
    }
    tracing::info!(room_id = %room.id, "Room ended");
}
