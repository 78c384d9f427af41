// Entity types held in the canonical game state.
//
// Everything here is plain data; behavior lives in the engine's tick passes.
// Entity handles are opaque strings, sequentially numbered so BTreeMap
// iteration order is stable across runs.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::constants::{self, unit_stats};

pub type EntityId = String;
pub type PlayerId = String;

/// 2D position/vector in pixel units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    pub fn distance(self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit-length vector pointing at `other`, or zero if coincident.
    pub fn direction_to(self, other: Vec2) -> Vec2 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len <= f32::EPSILON {
            Vec2::default()
        } else {
            Vec2::new(dx / len, dy / len)
        }
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn scale(self, k: f32) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }

    /// Rotate by `angle` radians.
    pub fn rotated(self, angle: f32) -> Vec2 {
        let (sin, cos) = angle.sin_cos();
        Vec2::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitKind {
    Worker,
    Soldier,
    Archer,
    Healer,
    Catapult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildingKind {
    Base,
    Barracks,
    Farm,
    Tower,
    Blacksmith,
    SiegeWorkshop,
    Wall,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Gold,
    Wood,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectileKind {
    Arrow,
    Boulder,
    Heal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpgradeKind {
    Attack,
    Defense,
    Range,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TeamRole {
    Host,
    Guest,
    Ai,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    /// AI damage and income multiplier.
    pub fn multiplier(self) -> f64 {
        match self {
            Difficulty::Easy => 0.7,
            Difficulty::Normal => 1.0,
            Difficulty::Hard => 1.3,
        }
    }
}

/// Where a unit resumes after an interruption (auto-acquired combat).
#[derive(Clone, Debug, PartialEq)]
pub enum Resume {
    None,
    AttackMove { target: Vec2 },
    Patrol { from: Vec2, to: Vec2 },
    Hold,
}

/// Unit command state machine. Transitions are driven by submitted actions
/// and by reaching target conditions within a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Idle,
    Moving { target: Vec2 },
    Attacking { target_id: EntityId, resume: Resume },
    AttackMove { target: Vec2 },
    Patrol { from: Vec2, to: Vec2 },
    HoldPosition,
    Gathering { node_id: EntityId },
    Returning { node_id: Option<EntityId> },
    Building { building_id: EntityId },
    Healing { target_id: EntityId },
}

impl Command {
    /// Short state name exposed in snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Idle => "idle",
            Command::Moving { .. } => "moving",
            Command::Attacking { .. } => "attacking",
            Command::AttackMove { .. } => "attackMove",
            Command::Patrol { .. } => "patrol",
            Command::HoldPosition => "holdPosition",
            Command::Gathering { .. } => "gathering",
            Command::Returning { .. } => "returning",
            Command::Building { .. } => "building",
            Command::Healing { .. } => "healing",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Unit {
    pub id: EntityId,
    pub owner: PlayerId,
    pub kind: UnitKind,
    pub pos: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub size: f32,
    pub command: Command,
    /// Queued follow-up commands (shift-queued waypoints).
    pub waypoints: VecDeque<Command>,
    pub attack_range: f32,
    pub attack_damage: i32,
    pub cooldown: u32,
    pub cooldown_left: u32,
    pub speed: f32,
    pub armor: i32,
    /// Worker only: resource kind and amount currently carried.
    pub carrying: Option<(ResourceKind, f32)>,
    /// Catapult only: standing order to bombard a point.
    pub attack_ground: Option<Vec2>,
    pub last_hit_tick: Option<u64>,
}

impl Unit {
    pub fn new(id: EntityId, owner: PlayerId, kind: UnitKind, pos: Vec2) -> Self {
        let stats = unit_stats(kind);
        Unit {
            id,
            owner,
            kind,
            pos,
            hp: stats.max_hp,
            max_hp: stats.max_hp,
            size: stats.size,
            command: Command::Idle,
            waypoints: VecDeque::new(),
            attack_range: stats.range,
            attack_damage: stats.damage,
            cooldown: stats.cooldown,
            cooldown_left: 0,
            speed: stats.speed,
            armor: stats.armor,
            carrying: None,
            attack_ground: None,
            last_hit_tick: None,
        }
    }

    pub fn is_combatant(&self) -> bool {
        matches!(
            self.kind,
            UnitKind::Soldier | UnitKind::Archer | UnitKind::Catapult
        )
    }

    pub fn under_attack(&self, tick: u64) -> bool {
        self.last_hit_tick
            .map(|t| tick.saturating_sub(t) < constants::UNDER_ATTACK_LINGER_TICKS)
            .unwrap_or(false)
    }
}

/// One entry in a building's production queue.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionItem {
    pub kind: UnitKind,
    pub elapsed_ticks: u32,
}

#[derive(Clone, Debug)]
pub struct Building {
    pub id: EntityId,
    pub owner: PlayerId,
    pub kind: BuildingKind,
    /// Footprint center.
    pub pos: Vec2,
    pub hp: f32,
    pub max_hp: f32,
    pub size: f32,
    /// Construction progress, 0-100. Below 100 the building is inert.
    pub progress: f32,
    pub queue: VecDeque<ProductionItem>,
    pub rally: Option<Vec2>,
    pub cooldown_left: u32,
    pub last_hit_tick: Option<u64>,
}

impl Building {
    /// A building placed by a build action: 10% hp, zero progress.
    pub fn new_site(id: EntityId, owner: PlayerId, kind: BuildingKind, pos: Vec2) -> Self {
        let stats = constants::building_stats(kind);
        Building {
            id,
            owner,
            kind,
            pos,
            hp: stats.max_hp * constants::BUILD_START_HP_FRACTION,
            max_hp: stats.max_hp,
            size: stats.size,
            progress: 0.0,
            queue: VecDeque::new(),
            rally: None,
            cooldown_left: 0,
            last_hit_tick: None,
        }
    }

    /// A building present at match start: complete and at full hp.
    pub fn new_complete(id: EntityId, owner: PlayerId, kind: BuildingKind, pos: Vec2) -> Self {
        let stats = constants::building_stats(kind);
        Building {
            id,
            owner,
            kind,
            pos,
            hp: stats.max_hp,
            max_hp: stats.max_hp,
            size: stats.size,
            progress: 100.0,
            queue: VecDeque::new(),
            rally: None,
            cooldown_left: 0,
            last_hit_tick: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0
    }

    pub fn under_attack(&self, tick: u64) -> bool {
        self.last_hit_tick
            .map(|t| tick.saturating_sub(t) < constants::UNDER_ATTACK_LINGER_TICKS)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceNode {
    pub id: EntityId,
    pub kind: ResourceKind,
    pub pos: Vec2,
    pub amount: f32,
    pub max_amount: f32,
}

#[derive(Clone, Debug)]
pub struct Projectile {
    pub id: EntityId,
    pub kind: ProjectileKind,
    pub owner: PlayerId,
    pub pos: Vec2,
    /// Tracked entity, if any. Boulders fly at a fixed point instead.
    pub target_id: Option<EntityId>,
    /// Last known target position; flight continues here if the target dies
    /// and the projectile has splash.
    pub target_pos: Vec2,
    pub speed: f32,
    pub damage: i32,
    pub splash_radius: f32,
    pub born_tick: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrades {
    pub attack: u8,
    pub defense: u8,
    pub range: u8,
}

impl Upgrades {
    pub fn level(&self, kind: UpgradeKind) -> u8 {
        match kind {
            UpgradeKind::Attack => self.attack,
            UpgradeKind::Defense => self.defense,
            UpgradeKind::Range => self.range,
        }
    }

    pub fn bump(&mut self, kind: UpgradeKind) {
        match kind {
            UpgradeKind::Attack => self.attack += 1,
            UpgradeKind::Defense => self.defense += 1,
            UpgradeKind::Range => self.range += 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub role: TeamRole,
    pub color: String,
    pub gold: f64,
    pub wood: f64,
    /// Live units plus production reservations.
    pub supply: u32,
    pub max_supply: u32,
    pub upgrades: Upgrades,
}

impl PlayerState {
    pub fn new(id: PlayerId, name: String, role: TeamRole, color: String) -> Self {
        PlayerState {
            id,
            name,
            role,
            color,
            gold: constants::STARTING_GOLD,
            wood: constants::STARTING_WOOD,
            supply: 0,
            max_supply: constants::BASE_SUPPLY,
            upgrades: Upgrades::default(),
        }
    }

    pub fn is_ai(&self) -> bool {
        self.role == TeamRole::Ai
    }

    pub fn credit(&mut self, kind: ResourceKind, amount: f64) {
        match kind {
            ResourceKind::Gold => self.gold += amount,
            ResourceKind::Wood => self.wood += amount,
        }
    }

    pub fn can_afford(&self, gold: f64, wood: f64) -> bool {
        self.gold >= gold && self.wood >= wood
    }

    pub fn debit(&mut self, gold: f64, wood: f64) {
        self.gold -= gold;
        self.wood -= wood;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_distance() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(3.0, 4.0);
        assert_eq!(a.distance(b), 5.0);
    }

    #[test]
    fn test_vec2_direction_to_coincident() {
        let a = Vec2::new(10.0, 10.0);
        assert_eq!(a.direction_to(a), Vec2::default());
    }

    #[test]
    fn test_vec2_rotated_quarter_turn() {
        let v = Vec2::new(1.0, 0.0).rotated(std::f32::consts::FRAC_PI_2);
        assert!(v.x.abs() < 1e-6);
        assert!((v.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_from_stats() {
        let u = Unit::new("u1".into(), "p1".into(), UnitKind::Soldier, Vec2::new(0.0, 0.0));
        assert_eq!(u.hp, 80.0);
        assert_eq!(u.attack_damage, 10);
        assert_eq!(u.command, Command::Idle);
        assert!(u.is_combatant());
        assert!(!Unit::new("u2".into(), "p1".into(), UnitKind::Worker, Vec2::default()).is_combatant());
    }

    #[test]
    fn test_building_site_starts_at_ten_percent() {
        let b = Building::new_site("b1".into(), "p1".into(), BuildingKind::Barracks, Vec2::default());
        assert_eq!(b.hp, 80.0);
        assert!(!b.is_complete());
        let done = Building::new_complete("b2".into(), "p1".into(), BuildingKind::Barracks, Vec2::default());
        assert!(done.is_complete());
        assert_eq!(done.hp, done.max_hp);
    }

    #[test]
    fn test_under_attack_linger() {
        let mut u = Unit::new("u1".into(), "p1".into(), UnitKind::Soldier, Vec2::default());
        assert!(!u.under_attack(100));
        u.last_hit_tick = Some(100);
        assert!(u.under_attack(100));
        assert!(u.under_attack(100 + 179));
        assert!(!u.under_attack(100 + 180));
    }

    #[test]
    fn test_upgrades_bump_and_level() {
        let mut up = Upgrades::default();
        up.bump(UpgradeKind::Attack);
        up.bump(UpgradeKind::Attack);
        up.bump(UpgradeKind::Range);
        assert_eq!(up.level(UpgradeKind::Attack), 2);
        assert_eq!(up.level(UpgradeKind::Defense), 0);
        assert_eq!(up.level(UpgradeKind::Range), 1);
    }

    #[test]
    fn test_difficulty_multiplier() {
        assert_eq!(Difficulty::Easy.multiplier(), 0.7);
        assert_eq!(Difficulty::Normal.multiplier(), 1.0);
        assert_eq!(Difficulty::Hard.multiplier(), 1.3);
    }
}
