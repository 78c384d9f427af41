// Action validation gates, run in order before an action may enter the
// engine:
//   1. rate limit (transport edge, see rate_limit.rs)
//   2. shape (serde parse at the transport edge)
//   3. ownership  4. bounds  5. build placement  6. resources
//   7. upgrade caps  8. target legality
// plus a coarse clock-skew guard on client timestamps. A failure yields a
// precise reason and the action is dropped; it never reaches the engine.

use thiserror::Error;

use crate::protocol::Action;

use super::constants::{
    self, building_stats, production_site, unit_stats, upgrade_cap, upgrade_cost,
};
use super::entities::{Building, BuildingKind, PlayerId, Unit, UnitKind, Vec2};
use super::game::GameState;
use super::map::TileGrid;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Unknown player")]
    UnknownPlayer,
    #[error("Clock skew too large")]
    ClockSkew,
    #[error("Unknown unit")]
    UnknownUnit,
    #[error("Unknown building")]
    UnknownBuilding,
    #[error("Not your unit")]
    NotYourUnit,
    #[error("Not your building")]
    NotYourBuilding,
    #[error("Target out of bounds")]
    OutOfBounds,
    #[error("Target tile is impassable")]
    ImpassableTarget,
    #[error("Invalid placement: {0}")]
    InvalidPlacement(String),
    #[error("Insufficient resources")]
    InsufficientResources,
    #[error("Supply cap reached")]
    SupplyCapReached,
    #[error("Upgrade cap reached")]
    UpgradeCapReached,
    #[error("Requires a completed blacksmith")]
    MissingBlacksmith,
    #[error("{0}")]
    InvalidTarget(String),
    #[error("{0}")]
    WrongVariant(String),
}

/// Clock-skew guard: client timestamps more than 5 s from server wall
/// clock are rejected.
pub fn validate_timestamp(timestamp: Option<i64>, now_ms: i64) -> Result<(), ValidationError> {
    match timestamp {
        Some(ts) if (now_ms - ts).abs() > constants::CLOCK_SKEW_LIMIT_MS => {
            Err(ValidationError::ClockSkew)
        }
        _ => Ok(()),
    }
}

/// State-dependent gates (3-8). Runs in the room worker right before the
/// action is fed to the engine, so no lock is ever taken on game state.
pub fn validate(
    state: &GameState,
    sender: &PlayerId,
    action: &Action,
) -> Result<(), ValidationError> {
    match action {
        Action::Move { unit_id, target, .. }
        | Action::AttackMove { unit_id, target, .. }
        | Action::Patrol { unit_id, target } => {
            owned_unit(state, sender, unit_id)?;
            in_bounds(state, *target)?;
            passable(state, *target)
        }
        Action::AttackGround { unit_id, target } => {
            let unit = owned_unit(state, sender, unit_id)?;
            if unit.kind != UnitKind::Catapult {
                return Err(ValidationError::WrongVariant(
                    "Only catapults can attack ground".into(),
                ));
            }
            in_bounds(state, *target)
        }
        Action::HoldPosition { unit_id } | Action::Stop { unit_id } => {
            owned_unit(state, sender, unit_id).map(|_| ())
        }
        Action::Attack { unit_id, target_id } => {
            owned_unit(state, sender, unit_id)?;
            let target_owner = state
                .units
                .get(target_id)
                .map(|u| &u.owner)
                .or_else(|| state.buildings.get(target_id).map(|b| &b.owner))
                .ok_or_else(|| {
                    ValidationError::InvalidTarget("Attack target not found".into())
                })?;
            if !state.is_hostile(sender, target_owner) {
                return Err(ValidationError::InvalidTarget(
                    "Attack target must be hostile".into(),
                ));
            }
            Ok(())
        }
        Action::Gather { unit_id, node_id } => {
            let unit = owned_unit(state, sender, unit_id)?;
            if unit.kind != UnitKind::Worker {
                return Err(ValidationError::WrongVariant(
                    "Only workers can gather".into(),
                ));
            }
            match state.resources.get(node_id) {
                Some(node) if node.amount > 0.0 => Ok(()),
                _ => Err(ValidationError::InvalidTarget(
                    "Gather target must be a live resource node".into(),
                )),
            }
        }
        Action::Repair { unit_id, building_id } => {
            let unit = owned_unit(state, sender, unit_id)?;
            if unit.kind != UnitKind::Worker {
                return Err(ValidationError::WrongVariant(
                    "Only workers can repair".into(),
                ));
            }
            owned_building(state, sender, building_id).map(|_| ())
        }
        Action::Build { unit_id, building, position } => {
            let unit = owned_unit(state, sender, unit_id)?;
            if unit.kind != UnitKind::Worker {
                return Err(ValidationError::WrongVariant(
                    "Only workers can build".into(),
                ));
            }
            in_bounds(state, *position)?;
            check_placement(state, *building, *position)?;
            let stats = building_stats(*building);
            let player = state
                .players
                .get(sender)
                .ok_or(ValidationError::UnknownPlayer)?;
            if !player.can_afford(stats.cost_gold, stats.cost_wood) {
                return Err(ValidationError::InsufficientResources);
            }
            Ok(())
        }
        Action::Produce { building_id, unit } => {
            let building = owned_building(state, sender, building_id)?;
            if !building.is_complete() {
                return Err(ValidationError::InvalidTarget(
                    "Building is still under construction".into(),
                ));
            }
            if building.kind != production_site(*unit) {
                return Err(ValidationError::WrongVariant(format!(
                    "This building cannot train a {unit:?}",
                )));
            }
            let stats = unit_stats(*unit);
            let player = state
                .players
                .get(sender)
                .ok_or(ValidationError::UnknownPlayer)?;
            if !player.can_afford(stats.cost_gold, stats.cost_wood) {
                return Err(ValidationError::InsufficientResources);
            }
            if player.supply + stats.cost_supply > player.max_supply {
                return Err(ValidationError::SupplyCapReached);
            }
            Ok(())
        }
        Action::CancelProduce { building_id, index } => {
            let building = owned_building(state, sender, building_id)?;
            if *index >= building.queue.len() {
                return Err(ValidationError::InvalidTarget(
                    "No such production queue entry".into(),
                ));
            }
            Ok(())
        }
        Action::SetRally { building_id, position } => {
            owned_building(state, sender, building_id)?;
            in_bounds(state, *position)
        }
        Action::Upgrade { upgrade } => {
            let has_smith = state
                .completed_buildings_of(sender, BuildingKind::Blacksmith)
                .next()
                .is_some();
            if !has_smith {
                return Err(ValidationError::MissingBlacksmith);
            }
            let player = state
                .players
                .get(sender)
                .ok_or(ValidationError::UnknownPlayer)?;
            let level = player.upgrades.level(*upgrade);
            if level >= upgrade_cap(*upgrade) {
                return Err(ValidationError::UpgradeCapReached);
            }
            let (gold, wood) = upgrade_cost(*upgrade, level + 1);
            if !player.can_afford(gold, wood) {
                return Err(ValidationError::InsufficientResources);
            }
            Ok(())
        }
        Action::Surrender => Ok(()),
    }
}

fn owned_unit<'a>(
    state: &'a GameState,
    sender: &PlayerId,
    unit_id: &str,
) -> Result<&'a Unit, ValidationError> {
    let unit = state
        .units
        .get(unit_id)
        .ok_or(ValidationError::UnknownUnit)?;
    if &unit.owner != sender {
        return Err(ValidationError::NotYourUnit);
    }
    Ok(unit)
}

fn owned_building<'a>(
    state: &'a GameState,
    sender: &PlayerId,
    building_id: &str,
) -> Result<&'a Building, ValidationError> {
    let building = state
        .buildings
        .get(building_id)
        .ok_or(ValidationError::UnknownBuilding)?;
    if &building.owner != sender {
        return Err(ValidationError::NotYourBuilding);
    }
    Ok(building)
}

fn in_bounds(state: &GameState, pos: Vec2) -> Result<(), ValidationError> {
    if state.grid.contains_pixel(pos) {
        Ok(())
    } else {
        Err(ValidationError::OutOfBounds)
    }
}

fn passable(state: &GameState, pos: Vec2) -> Result<(), ValidationError> {
    if state.grid.is_passable_pixel(pos) {
        Ok(())
    } else {
        Err(ValidationError::ImpassableTarget)
    }
}

/// Gate 5: the new footprint must sit on passable terrain and keep at
/// least 10 px of edge separation from every existing building.
fn check_placement(
    state: &GameState,
    kind: BuildingKind,
    pos: Vec2,
) -> Result<(), ValidationError> {
    let size = building_stats(kind).size;
    let half = size / 2.0;

    let min = Vec2::new(pos.x - half, pos.y - half);
    let max = Vec2::new(pos.x + half, pos.y + half);
    if !state.grid.contains_pixel(min) || !state.grid.contains_pixel(max) {
        return Err(ValidationError::InvalidPlacement(
            "footprint leaves the map".into(),
        ));
    }

    let (min_tx, min_ty) = TileGrid::pixel_to_tile(min);
    let (max_tx, max_ty) = TileGrid::pixel_to_tile(Vec2::new(max.x - 0.01, max.y - 0.01));
    for ty in min_ty..=max_ty {
        for tx in min_tx..=max_tx {
            if !state.grid.is_passable(tx, ty) {
                return Err(ValidationError::InvalidPlacement(
                    "footprint straddles impassable terrain".into(),
                ));
            }
        }
    }

    for other in state.buildings.values() {
        let required = (size + other.size) / 2.0 + constants::BUILD_PLACEMENT_GAP;
        if pos.distance(other.pos) < required {
            return Err(ValidationError::InvalidPlacement(format!(
                "too close to {}",
                other.id
            )));
        }
    }
    Ok(())
}
