// Snapshot builder: serializable read-only views of engine state.
//
// Snapshots are built at broadcast time and never alias live state, so
// clients can never observe torn mid-tick data. The per-player variant is
// fog-correct: own entities always appear; foreign units and projectiles
// require current vision; foreign buildings and resource nodes appear once
// their tile has been discovered.

use std::collections::BTreeMap;

use serde::Serialize;

use super::constants::{TILE_SIZE, VISION_RANGE};
use super::entities::{
    BuildingKind, PlayerId, ProductionItem, ProjectileKind, ResourceKind, TeamRole, UnitKind,
    Upgrades, Vec2,
};
use super::game::GameState;
use super::map::TileGrid;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitView {
    pub id: String,
    pub owner: PlayerId,
    pub kind: UnitKind,
    pub pos: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub state: &'static str,
    pub carrying: Option<(ResourceKind, f32)>,
    pub under_attack: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingView {
    pub id: String,
    pub owner: PlayerId,
    pub kind: BuildingKind,
    pub pos: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub progress: f32,
    pub queue: Vec<ProductionItem>,
    pub rally: Option<Vec2>,
    pub under_attack: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileView {
    pub id: String,
    pub owner: PlayerId,
    pub kind: ProjectileKind,
    pub pos: Vec2,
    pub target_pos: Vec2,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNodeView {
    pub id: String,
    pub kind: ResourceKind,
    pub pos: Vec2,
    pub amount: f32,
    pub max_amount: f32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub role: TeamRole,
    pub color: String,
    pub gold: u64,
    pub wood: u64,
    pub supply: u32,
    pub max_supply: u32,
    pub upgrades: Upgrades,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tick: u64,
    pub timestamp: i64,
    pub units: Vec<UnitView>,
    pub buildings: Vec<BuildingView>,
    pub projectiles: Vec<ProjectileView>,
    pub resources: Vec<ResourceNodeView>,
    pub players: BTreeMap<PlayerId, PlayerView>,
    pub game_over: bool,
    pub winner: Option<PlayerId>,
    pub reason: Option<String>,
}

/// Tiles currently within vision range of any of the viewer's entities.
struct VisibleSet {
    width: usize,
    flags: Vec<bool>,
}

impl VisibleSet {
    fn compute(state: &GameState, viewer: &PlayerId) -> Self {
        let width = state.grid.width;
        let height = state.grid.height;
        let mut flags = vec![false; width * height];
        let reach = (VISION_RANGE / TILE_SIZE).ceil() as i64;

        let sources = state
            .units
            .values()
            .filter(|u| &u.owner == viewer)
            .map(|u| u.pos)
            .chain(
                state
                    .buildings
                    .values()
                    .filter(|b| &b.owner == viewer)
                    .map(|b| b.pos),
            );

        for pos in sources {
            let (cx, cy) = TileGrid::pixel_to_tile(pos);
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    let tx = cx as i64 + dx;
                    let ty = cy as i64 + dy;
                    if tx < 0 || ty < 0 || tx >= width as i64 || ty >= height as i64 {
                        continue;
                    }
                    let center = TileGrid::tile_center(tx as usize, ty as usize);
                    if center.distance(pos) <= VISION_RANGE {
                        flags[ty as usize * width + tx as usize] = true;
                    }
                }
            }
        }
        VisibleSet { width, flags }
    }

    fn contains_pixel(&self, pos: Vec2) -> bool {
        let (tx, ty) = TileGrid::pixel_to_tile(pos);
        self.flags
            .get(ty * self.width + tx)
            .copied()
            .unwrap_or(false)
    }
}

/// Fog-filtered snapshot for one recipient.
pub fn build_for(state: &GameState, viewer: &PlayerId, timestamp: i64) -> Snapshot {
    let visible = VisibleSet::compute(state, viewer);

    let units = state
        .units
        .values()
        .filter(|u| &u.owner == viewer || visible.contains_pixel(u.pos))
        .map(|u| unit_view(state, u))
        .collect();

    let buildings = state
        .buildings
        .values()
        .filter(|b| {
            if &b.owner == viewer {
                return true;
            }
            let (tx, ty) = TileGrid::pixel_to_tile(b.pos);
            state.tile_discovered(viewer, tx, ty)
        })
        .map(|b| building_view(state, b, viewer))
        .collect();

    let projectiles = state
        .projectiles
        .values()
        .filter(|p| &p.owner == viewer || visible.contains_pixel(p.pos))
        .map(projectile_view)
        .collect();

    let resources = state
        .resources
        .values()
        .filter(|n| {
            let (tx, ty) = TileGrid::pixel_to_tile(n.pos);
            state.tile_discovered(viewer, tx, ty)
        })
        .map(resource_view)
        .collect();

    assemble(state, timestamp, units, buildings, projectiles, resources)
}

/// Unfiltered snapshot: observers, tests, and the determinism property.
pub fn build_full(state: &GameState, timestamp: i64) -> Snapshot {
    let units = state.units.values().map(|u| unit_view(state, u)).collect();
    let buildings = state
        .buildings
        .values()
        .map(|b| building_view_full(state, b))
        .collect();
    let projectiles = state.projectiles.values().map(projectile_view).collect();
    let resources = state.resources.values().map(resource_view).collect();
    assemble(state, timestamp, units, buildings, projectiles, resources)
}

fn assemble(
    state: &GameState,
    timestamp: i64,
    units: Vec<UnitView>,
    buildings: Vec<BuildingView>,
    projectiles: Vec<ProjectileView>,
    resources: Vec<ResourceNodeView>,
) -> Snapshot {
    let players = state
        .players
        .values()
        .map(|p| {
            (
                p.id.clone(),
                PlayerView {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    role: p.role,
                    color: p.color.clone(),
                    gold: p.gold.floor() as u64,
                    wood: p.wood.floor() as u64,
                    supply: p.supply,
                    max_supply: p.max_supply,
                    upgrades: p.upgrades,
                },
            )
        })
        .collect();

    Snapshot {
        tick: state.tick,
        timestamp,
        units,
        buildings,
        projectiles,
        resources,
        players,
        game_over: state.game_over,
        winner: state.winner.clone(),
        reason: state.end_reason.clone(),
    }
}

fn unit_view(state: &GameState, unit: &super::entities::Unit) -> UnitView {
    UnitView {
        id: unit.id.clone(),
        owner: unit.owner.clone(),
        kind: unit.kind,
        pos: unit.pos,
        hp: unit.hp,
        max_hp: unit.max_hp,
        state: unit.command.name(),
        carrying: unit.carrying,
        under_attack: unit.under_attack(state.tick),
    }
}

fn building_view(
    state: &GameState,
    building: &super::entities::Building,
    viewer: &PlayerId,
) -> BuildingView {
    let own = &building.owner == viewer;
    BuildingView {
        id: building.id.clone(),
        owner: building.owner.clone(),
        kind: building.kind,
        pos: building.pos,
        hp: building.hp,
        max_hp: building.max_hp,
        progress: building.progress,
        // Production queues and rally points are private to the owner.
        queue: if own {
            building.queue.iter().cloned().collect()
        } else {
            Vec::new()
        },
        rally: if own { building.rally } else { None },
        under_attack: building.under_attack(state.tick),
    }
}

fn building_view_full(state: &GameState, building: &super::entities::Building) -> BuildingView {
    BuildingView {
        id: building.id.clone(),
        owner: building.owner.clone(),
        kind: building.kind,
        pos: building.pos,
        hp: building.hp,
        max_hp: building.max_hp,
        progress: building.progress,
        queue: building.queue.iter().cloned().collect(),
        rally: building.rally,
        under_attack: building.under_attack(state.tick),
    }
}

fn projectile_view(proj: &super::entities::Projectile) -> ProjectileView {
    ProjectileView {
        id: proj.id.clone(),
        owner: proj.owner.clone(),
        kind: proj.kind,
        pos: proj.pos,
        target_pos: proj.target_pos,
    }
}

fn resource_view(node: &super::entities::ResourceNode) -> ResourceNodeView {
    ResourceNodeView {
        id: node.id.clone(),
        kind: node.kind,
        pos: node.pos,
        amount: node.amount,
        max_amount: node.max_amount,
    }
}
