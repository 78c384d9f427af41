// Passive anti-cheat monitor.
//
// Observes behavior alongside validation and reports severities; it never
// mutates game state. `Confirmed` events are termination-eligible — the
// room manager may mark the offender as the loser.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::ResourceClaim;

use super::constants::{
    CHEAT_DAMAGE_CEILING, CHEAT_HP_CEILING, CHEAT_RANGE_CEILING, CHEAT_RATE_CONFIRMED_PER_MIN,
    CHEAT_RATE_SUSPICIOUS_PER_MIN, CHEAT_RESOURCE_DRIFT_CONFIRMED,
    CHEAT_RESOURCE_DRIFT_SUSPICIOUS, CHEAT_SPEED_CEILING, unit_stats,
};
use super::entities::{PlayerId, Vec2};
use super::game::GameState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Suspicious,
    Confirmed,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Suspicious => "suspicious",
            Severity::Confirmed => "confirmed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheatEvent {
    pub player: PlayerId,
    pub severity: Severity,
    pub detail: String,
}

/// Per-room behavioral monitor. Owned by the room worker; the action-time
/// table is the only state it keeps.
#[derive(Default)]
pub struct CheatMonitor {
    action_times: HashMap<PlayerId, Vec<Instant>>,
}

impl CheatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted action and flag sustained rates: >30/min is
    /// suspicious, >60/min confirmed. (The hard validator limit is far
    /// higher; this watches for inhumanly steady automation.)
    pub fn note_action(&mut self, player: &PlayerId, now: Instant) -> Option<CheatEvent> {
        let window = Duration::from_secs(60);
        let entries = self.action_times.entry(player.clone()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);
        entries.push(now);
        let count = entries.len();

        if count > CHEAT_RATE_CONFIRMED_PER_MIN {
            Some(CheatEvent {
                player: player.clone(),
                severity: Severity::Confirmed,
                detail: format!("sustained action rate: {count}/min"),
            })
        } else if count > CHEAT_RATE_SUSPICIOUS_PER_MIN {
            Some(CheatEvent {
                player: player.clone(),
                severity: Severity::Suspicious,
                detail: format!("sustained action rate: {count}/min"),
            })
        } else {
            None
        }
    }

    /// Compare a client-asserted resource total against server truth.
    /// Drift within ±5 is tolerated; beyond ±50 is confirmed.
    pub fn check_resource_claim(
        &self,
        player: &PlayerId,
        claim: &ResourceClaim,
        state: &GameState,
    ) -> Option<CheatEvent> {
        let actual = state.players.get(player)?;
        let drift = (claim.gold - actual.gold)
            .abs()
            .max((claim.wood - actual.wood).abs());

        if drift > CHEAT_RESOURCE_DRIFT_CONFIRMED {
            Some(CheatEvent {
                player: player.clone(),
                severity: Severity::Confirmed,
                detail: format!("resource drift {drift:.1}"),
            })
        } else if drift > CHEAT_RESOURCE_DRIFT_SUSPICIOUS {
            Some(CheatEvent {
                player: player.clone(),
                severity: Severity::Suspicious,
                detail: format!("resource drift {drift:.1}"),
            })
        } else {
            None
        }
    }

    /// A position outside the map in any client claim is confirmed.
    pub fn check_position(
        &self,
        player: &PlayerId,
        pos: Vec2,
        state: &GameState,
    ) -> Option<CheatEvent> {
        if state.grid.contains_pixel(pos) {
            None
        } else {
            Some(CheatEvent {
                player: player.clone(),
                severity: Severity::Confirmed,
                detail: format!("out-of-map position ({:.0}, {:.0})", pos.x, pos.y),
            })
        }
    }

    /// Invariant sweep over live units: stats must stay within their
    /// variant's ceilings (1.5x hp, 2x damage/range, 1.5x speed) and every
    /// entity must be on the map.
    pub fn audit(&self, state: &GameState) -> Vec<CheatEvent> {
        let mut events = Vec::new();
        for unit in state.units.values() {
            let expected = unit_stats(unit.kind);
            let mut flags: Vec<String> = Vec::new();
            if unit.max_hp > expected.max_hp * CHEAT_HP_CEILING {
                flags.push(format!("hp {} > {}", unit.max_hp, expected.max_hp));
            }
            if unit.attack_damage as f32 > expected.damage as f32 * CHEAT_DAMAGE_CEILING {
                flags.push(format!("damage {}", unit.attack_damage));
            }
            if unit.attack_range > expected.range * CHEAT_RANGE_CEILING {
                flags.push(format!("range {}", unit.attack_range));
            }
            if unit.speed > expected.speed * CHEAT_SPEED_CEILING {
                flags.push(format!("speed {}", unit.speed));
            }
            if !flags.is_empty() {
                events.push(CheatEvent {
                    player: unit.owner.clone(),
                    severity: Severity::Confirmed,
                    detail: format!("unit {} stat ceiling: {}", unit.id, flags.join(", ")),
                });
            }
            if !state.grid.contains_pixel(unit.pos) {
                events.push(CheatEvent {
                    player: unit.owner.clone(),
                    severity: Severity::Confirmed,
                    detail: format!("unit {} off the map", unit.id),
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entities::{Difficulty, TeamRole, Unit, UnitKind};
    use crate::engine::game::GameEngine;
    use crate::engine::map::{TileGrid, TileKind};

    fn engine() -> GameEngine {
        let grid = TileGrid::filled(60, 60, TileKind::Grass);
        let mut engine = GameEngine::new(grid, Vec::new(), Difficulty::Normal);
        engine
            .add_player("host".into(), "Alice".into(), TeamRole::Host, "blue".into())
            .unwrap();
        engine
    }

    #[test]
    fn test_action_rate_thresholds() {
        let mut monitor = CheatMonitor::new();
        let now = Instant::now();
        let player = "host".to_string();

        for _ in 0..30 {
            assert!(monitor.note_action(&player, now).is_none());
        }
        let event = monitor.note_action(&player, now).expect("31st flags");
        assert_eq!(event.severity, Severity::Suspicious);

        for _ in 0..29 {
            monitor.note_action(&player, now);
        }
        let event = monitor.note_action(&player, now).expect("61st flags");
        assert_eq!(event.severity, Severity::Confirmed);
    }

    #[test]
    fn test_action_rate_window_slides() {
        let mut monitor = CheatMonitor::new();
        let start = Instant::now();
        let player = "host".to_string();
        for _ in 0..31 {
            monitor.note_action(&player, start);
        }
        // A minute later the window is clear again.
        let later = start + Duration::from_secs(61);
        assert!(monitor.note_action(&player, later).is_none());
    }

    #[test]
    fn test_resource_drift_bands() {
        let engine = engine();
        let monitor = CheatMonitor::new();
        let player = "host".to_string();
        let actual_gold = engine.state().players["host"].gold;
        let actual_wood = engine.state().players["host"].wood;

        let exact = ResourceClaim {
            gold: actual_gold,
            wood: actual_wood,
        };
        assert!(monitor
            .check_resource_claim(&player, &exact, engine.state())
            .is_none());

        let small = ResourceClaim {
            gold: actual_gold + 4.0,
            wood: actual_wood,
        };
        assert!(monitor
            .check_resource_claim(&player, &small, engine.state())
            .is_none());

        let medium = ResourceClaim {
            gold: actual_gold + 20.0,
            wood: actual_wood,
        };
        assert_eq!(
            monitor
                .check_resource_claim(&player, &medium, engine.state())
                .unwrap()
                .severity,
            Severity::Suspicious
        );

        let large = ResourceClaim {
            gold: actual_gold,
            wood: actual_wood - 80.0,
        };
        assert_eq!(
            monitor
                .check_resource_claim(&player, &large, engine.state())
                .unwrap()
                .severity,
            Severity::Confirmed
        );
    }

    #[test]
    fn test_out_of_map_position_is_confirmed() {
        let engine = engine();
        let monitor = CheatMonitor::new();
        let player = "host".to_string();
        assert!(monitor
            .check_position(&player, Vec2::new(100.0, 100.0), engine.state())
            .is_none());
        let event = monitor
            .check_position(&player, Vec2::new(-10.0, 100.0), engine.state())
            .unwrap();
        assert_eq!(event.severity, Severity::Confirmed);
    }

    #[test]
    fn test_audit_flags_inflated_stats() {
        let mut engine = engine();
        let mut unit = Unit::new(
            "u1".into(),
            "host".into(),
            UnitKind::Soldier,
            Vec2::new(100.0, 100.0),
        );
        unit.speed = 10.0; // soldier expected 1.8, ceiling 2.7
        engine.state_mut().units.insert("u1".into(), unit);

        let monitor = CheatMonitor::new();
        let events = monitor.audit(engine.state());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Confirmed);
        assert!(events[0].detail.contains("speed"));
    }

    #[test]
    fn test_audit_clean_state_is_quiet() {
        let mut engine = engine();
        engine.state_mut().units.insert(
            "u1".into(),
            Unit::new("u1".into(), "host".into(), UnitKind::Soldier, Vec2::new(100.0, 100.0)),
        );
        let monitor = CheatMonitor::new();
        assert!(monitor.audit(engine.state()).is_empty());
    }
}
