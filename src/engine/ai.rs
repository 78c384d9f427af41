// Scripted opponent for single-player rooms.
//
// The controller is a deterministic planner: it reads the state and emits
// ordinary actions through the same validate-then-submit path as a human
// player. No randomness — identical states produce identical plans, which
// keeps the whole engine reproducible.

use crate::protocol::Action;

use super::constants::building_stats;
use super::entities::{
    BuildingKind, Command, Difficulty, PlayerId, UnitKind, Vec2,
};
use super::game::GameState;
use super::validate;

/// How often the planner acts, in ticks.
const PLAN_INTERVAL: u64 = 30;
/// Worker quota (live + queued).
const WORKER_QUOTA: usize = 6;

/// Ticks between attack waves: harder opponents push more often.
fn wave_interval_for(difficulty: Difficulty) -> u64 {
    match difficulty {
        Difficulty::Easy => 2400,
        Difficulty::Normal => 1800,
        Difficulty::Hard => 1200,
    }
}

/// Combat units required before a wave launches: harder opponents commit
/// with a smaller army.
fn wave_size_for(difficulty: Difficulty) -> usize {
    match difficulty {
        Difficulty::Easy => 8,
        Difficulty::Normal => 6,
        Difficulty::Hard => 5,
    }
}

pub struct AiController {
    player_id: PlayerId,
    difficulty: Difficulty,
    next_wave_tick: u64,
}

impl AiController {
    pub fn new(player_id: PlayerId, difficulty: Difficulty) -> Self {
        AiController {
            player_id,
            difficulty,
            next_wave_tick: wave_interval_for(difficulty),
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn plan(&mut self, state: &GameState) -> Vec<Action> {
        if state.tick % PLAN_INTERVAL != 0 {
            return Vec::new();
        }
        let Some(base) = state
            .completed_buildings_of(&self.player_id, BuildingKind::Base)
            .next()
        else {
            return Vec::new();
        };
        let base_id = base.id.clone();
        let base_pos = base.pos;

        let mut actions = Vec::new();
        self.assign_idle_workers(state, &mut actions);
        self.train_workers(state, &base_id, &mut actions);
        self.expand(state, base_pos, &mut actions);
        self.train_army(state, &mut actions);
        self.launch_wave(state, &mut actions);
        actions
    }

    /// Idle, empty-handed workers go to the node nearest the base.
    fn assign_idle_workers(&self, state: &GameState, actions: &mut Vec<Action>) {
        let idle_workers = state.units.values().filter(|u| {
            u.owner == self.player_id
                && u.kind == UnitKind::Worker
                && u.command == Command::Idle
                && u.carrying.is_none()
        });
        for worker in idle_workers {
            let node = state
                .resources
                .values()
                .filter(|n| n.amount > 0.0)
                .min_by(|a, b| {
                    a.pos
                        .distance(worker.pos)
                        .partial_cmp(&b.pos.distance(worker.pos))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.id.cmp(&b.id))
                });
            if let Some(node) = node {
                actions.push(Action::Gather {
                    unit_id: worker.id.clone(),
                    node_id: node.id.clone(),
                });
            }
        }
    }

    fn train_workers(&self, state: &GameState, base_id: &str, actions: &mut Vec<Action>) {
        let live = state
            .units
            .values()
            .filter(|u| u.owner == self.player_id && u.kind == UnitKind::Worker)
            .count();
        let queued: usize = state
            .buildings
            .values()
            .filter(|b| b.owner == self.player_id)
            .flat_map(|b| b.queue.iter())
            .filter(|item| item.kind == UnitKind::Worker)
            .count();
        if live + queued >= WORKER_QUOTA {
            return;
        }
        let action = Action::Produce {
            building_id: base_id.to_string(),
            unit: UnitKind::Worker,
        };
        if validate::validate(state, &self.player_id, &action).is_ok() {
            actions.push(action);
        }
    }

    /// Keep a barracks up and farms ahead of the supply cap.
    fn expand(&self, state: &GameState, base_pos: Vec2, actions: &mut Vec<Action>) {
        let builder = state.units.values().find(|u| {
            u.owner == self.player_id
                && u.kind == UnitKind::Worker
                && !matches!(u.command, Command::Building { .. })
        });
        let Some(builder) = builder else { return };

        let has_barracks = state
            .buildings
            .values()
            .any(|b| b.owner == self.player_id && b.kind == BuildingKind::Barracks);
        if !has_barracks {
            if let Some(action) =
                self.plan_build(state, &builder.id, BuildingKind::Barracks, base_pos)
            {
                actions.push(action);
                return;
            }
        }

        let player = &state.players[&self.player_id];
        let farm_sites = state
            .buildings
            .values()
            .filter(|b| {
                b.owner == self.player_id && b.kind == BuildingKind::Farm && !b.is_complete()
            })
            .count();
        if player.max_supply.saturating_sub(player.supply) < 4 && farm_sites == 0 {
            if let Some(action) =
                self.plan_build(state, &builder.id, BuildingKind::Farm, base_pos)
            {
                actions.push(action);
            }
        }
    }

    /// First valid spot on a deterministic ring scan around the base.
    fn plan_build(
        &self,
        state: &GameState,
        builder_id: &str,
        kind: BuildingKind,
        base_pos: Vec2,
    ) -> Option<Action> {
        let size = building_stats(kind).size;
        for ring in 1..=3 {
            let radius = building_stats(BuildingKind::Base).size / 2.0 + size / 2.0 + 20.0 * ring as f32 + 10.0;
            for octant in 0..8 {
                let angle = octant as f32 * std::f32::consts::FRAC_PI_4;
                let position = Vec2::new(
                    base_pos.x + radius * angle.cos(),
                    base_pos.y + radius * angle.sin(),
                );
                let action = Action::Build {
                    unit_id: builder_id.to_string(),
                    building: kind,
                    position,
                };
                if validate::validate(state, &self.player_id, &action).is_ok() {
                    return Some(action);
                }
            }
        }
        None
    }

    fn train_army(&self, state: &GameState, actions: &mut Vec<Action>) {
        let barracks = state
            .completed_buildings_of(&self.player_id, BuildingKind::Barracks)
            .find(|b| b.queue.len() < 2);
        let Some(barracks) = barracks else { return };

        // Alternate soldiers and archers as the army grows.
        let combat = state
            .units
            .values()
            .filter(|u| u.owner == self.player_id && u.is_combatant())
            .count();
        let kind = if combat % 3 == 2 {
            UnitKind::Archer
        } else {
            UnitKind::Soldier
        };
        let action = Action::Produce {
            building_id: barracks.id.clone(),
            unit: kind,
        };
        if validate::validate(state, &self.player_id, &action).is_ok() {
            actions.push(action);
        }
    }

    fn launch_wave(&mut self, state: &GameState, actions: &mut Vec<Action>) {
        if state.tick < self.next_wave_tick {
            return;
        }
        let target = state
            .buildings
            .values()
            .find(|b| b.owner != self.player_id && b.kind == BuildingKind::Base)
            .map(|b| b.pos);
        let Some(target) = target else { return };

        let army: Vec<&super::entities::Unit> = state
            .units
            .values()
            .filter(|u| u.owner == self.player_id && u.is_combatant())
            .collect();
        if army.len() < wave_size_for(self.difficulty) {
            return;
        }
        for unit in army {
            actions.push(Action::AttackMove {
                unit_id: unit.id.clone(),
                target,
                queued: false,
            });
        }
        self.next_wave_tick = state.tick + wave_interval_for(self.difficulty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entities::{Building, ResourceKind, ResourceNode, TeamRole, Unit};
    use crate::engine::game::GameEngine;
    use crate::engine::map::{TileGrid, TileKind};

    fn ai_engine() -> GameEngine {
        let grid = TileGrid::filled(60, 60, TileKind::Grass);
        let mut engine = GameEngine::new(grid, Vec::new(), Difficulty::Normal);
        engine
            .add_player("host".into(), "Alice".into(), TeamRole::Host, "blue".into())
            .unwrap();
        engine
            .add_player("ai".into(), "Computer".into(), TeamRole::Ai, "red".into())
            .unwrap();
        let state = engine.state_mut();
        state.buildings.insert(
            "bh".into(),
            Building::new_complete("bh".into(), "host".into(), BuildingKind::Base, Vec2::new(400.0, 400.0)),
        );
        state.buildings.insert(
            "ba".into(),
            Building::new_complete("ba".into(), "ai".into(), BuildingKind::Base, Vec2::new(2000.0, 2000.0)),
        );
        engine
    }

    #[test]
    fn test_plan_is_deterministic() {
        let engine = ai_engine();
        let mut a = AiController::new("ai".into(), Difficulty::Normal);
        let mut b = AiController::new("ai".into(), Difficulty::Normal);
        let plan_a = a.plan(engine.state());
        let plan_b = b.plan(engine.state());
        assert_eq!(
            serde_json::to_string(&plan_a).unwrap(),
            serde_json::to_string(&plan_b).unwrap()
        );
    }

    #[test]
    fn test_trains_workers_up_to_quota() {
        let engine = ai_engine();
        let mut controller = AiController::new("ai".into(), Difficulty::Normal);
        let plan = controller.plan(engine.state());
        assert!(plan.iter().any(|a| matches!(
            a,
            Action::Produce { unit: UnitKind::Worker, .. }
        )));
    }

    #[test]
    fn test_idle_workers_sent_to_gather() {
        let mut engine = ai_engine();
        {
            let state = engine.state_mut();
            state.resources.insert(
                "n1".into(),
                ResourceNode {
                    id: "n1".into(),
                    kind: ResourceKind::Gold,
                    pos: Vec2::new(1900.0, 1900.0),
                    amount: 1000.0,
                    max_amount: 1000.0,
                },
            );
            state.units.insert(
                "w1".into(),
                Unit::new("w1".into(), "ai".into(), UnitKind::Worker, Vec2::new(2000.0, 1900.0)),
            );
        }
        let mut controller = AiController::new("ai".into(), Difficulty::Normal);
        let plan = controller.plan(engine.state());
        assert!(plan.iter().any(|a| matches!(
            a,
            Action::Gather { unit_id, node_id } if unit_id == "w1" && node_id == "n1"
        )));
    }

    #[test]
    fn test_no_plan_off_interval() {
        let mut engine = ai_engine();
        engine.state_mut().tick = 7;
        let mut controller = AiController::new("ai".into(), Difficulty::Normal);
        assert!(controller.plan(engine.state()).is_empty());
    }

    #[test]
    fn test_wave_waits_for_army() {
        let mut engine = ai_engine();
        engine.state_mut().tick = wave_interval_for(Difficulty::Normal);
        let mut controller = AiController::new("ai".into(), Difficulty::Normal);
        let plan = controller.plan(engine.state());
        assert!(!plan.iter().any(|a| matches!(a, Action::AttackMove { .. })));

        // With six soldiers, the wave launches at the host base.
        let army = wave_size_for(Difficulty::Normal);
        for i in 0..army {
            let id = format!("s{i}");
            engine.state_mut().units.insert(
                id.clone(),
                Unit::new(id, "ai".into(), UnitKind::Soldier, Vec2::new(1900.0, 2000.0)),
            );
        }
        let plan = controller.plan(engine.state());
        let waves = plan
            .iter()
            .filter(|a| matches!(a, Action::AttackMove { .. }))
            .count();
        assert_eq!(waves, army);
    }

    #[test]
    fn test_difficulty_shapes_wave_pacing() {
        assert!(wave_interval_for(Difficulty::Hard) < wave_interval_for(Difficulty::Normal));
        assert!(wave_interval_for(Difficulty::Normal) < wave_interval_for(Difficulty::Easy));
        assert!(wave_size_for(Difficulty::Hard) < wave_size_for(Difficulty::Easy));

        // At tick 1200 with five soldiers, a hard opponent commits while an
        // easy one is still massing.
        let mut engine = ai_engine();
        engine.state_mut().tick = wave_interval_for(Difficulty::Hard);
        for i in 0..wave_size_for(Difficulty::Hard) {
            let id = format!("s{i}");
            engine.state_mut().units.insert(
                id.clone(),
                Unit::new(id, "ai".into(), UnitKind::Soldier, Vec2::new(1900.0, 2000.0)),
            );
        }

        let mut hard = AiController::new("ai".into(), Difficulty::Hard);
        let plan = hard.plan(engine.state());
        assert!(plan.iter().any(|a| matches!(a, Action::AttackMove { .. })));

        let mut easy = AiController::new("ai".into(), Difficulty::Easy);
        let plan = easy.plan(engine.state());
        assert!(!plan.iter().any(|a| matches!(a, Action::AttackMove { .. })));
    }
}
