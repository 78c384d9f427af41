// Simulation tunables and per-variant stat tables.

use super::entities::{BuildingKind, UnitKind, UpgradeKind};

// Tick loop
pub const TICK_RATE: u32 = 60; // ticks per second
pub const SNAPSHOT_RATE: u32 = 10; // snapshots per second
pub const TICK_INTERVAL_MICROS: u64 = 1_000_000 / TICK_RATE as u64;
pub const SNAPSHOT_INTERVAL_MILLIS: u64 = 1_000 / SNAPSHOT_RATE as u64;

// Map
pub const MAP_WIDTH: usize = 60; // tiles
pub const MAP_HEIGHT: usize = 60;
pub const TILE_SIZE: f32 = 40.0; // pixels per tile
pub const SPAWN_CLEAR_RADIUS: usize = 3; // 7x7 grass square around each spawn

// Vision / fog
pub const VISION_RANGE: f32 = 200.0; // pixels

// Movement
pub const ARRIVE_EPSILON: f32 = 5.0; // "reached target" distance
pub const UNIT_REPULSION_RADIUS: f32 = 50.0;
pub const UNIT_REPULSION_WEIGHT: f32 = 0.5;
pub const BUILDING_REPULSION_RADIUS: f32 = 30.0;
pub const BUILDING_REPULSION_WEIGHT: f32 = 1.5;

// Combat
pub const ATTACK_UPGRADE_BONUS: i32 = 2; // damage per attack upgrade level
pub const TOWER_UPGRADE_BONUS: i32 = 3; // towers scale harder
pub const DEFENSE_UPGRADE_REDUCTION: i32 = 2;
pub const ACQUIRE_RANGE_FACTOR: f32 = 1.5; // auto-acquire scan: 1.5*range + 10*range_up
pub const ACQUIRE_RANGE_PER_UPGRADE: f32 = 10.0;
pub const UNDER_ATTACK_LINGER_TICKS: u64 = 180;

// Towers
pub const TOWER_BASE_RANGE: f32 = 150.0;
pub const TOWER_RANGE_PER_UPGRADE: f32 = 10.0;
pub const TOWER_COOLDOWN: u32 = 60;
pub const TOWER_DAMAGE: i32 = 12;

// Buildings
pub const BUILD_PLACEMENT_GAP: f32 = 10.0; // min edge separation between footprints
pub const BUILD_START_HP_FRACTION: f32 = 0.1;
// Reach margins sit outside the building-repulsion band so workers can
// actually close the distance.
pub const REPAIR_REACH: f32 = 35.0; // beyond combined half-sizes
pub const DEPOT_REACH: f32 = 35.0;

// Supply
pub const BASE_SUPPLY: u32 = 10; // first base's contribution
pub const EXTRA_BASE_SUPPLY: u32 = 10; // each base past the first
pub const FARM_SUPPLY: u32 = 8;

// Workers
pub const WORKER_CARRY_CAPACITY: f32 = 10.0;
pub const WORKER_GATHER_RATE: f32 = 0.2; // per tick, adjacent to a node
pub const WORKER_REPAIR_RATE: f32 = 0.5; // hp per tick
pub const GATHER_REACH: f32 = 25.0;

// Economy
pub const STARTING_GOLD: f64 = 200.0;
pub const STARTING_WOOD: f64 = 100.0;
pub const STARTING_WORKERS: usize = 3;
pub const AI_INCOME_PER_TICK: f64 = 0.5; // scaled by difficulty multiplier

// Upgrade caps
pub const ATTACK_UPGRADE_CAP: u8 = 3;
pub const DEFENSE_UPGRADE_CAP: u8 = 3;
pub const RANGE_UPGRADE_CAP: u8 = 2;

// Rooms / transport
pub const MAX_PLAYERS: usize = 2;
pub const GRACE_WINDOW_SECS: u64 = 60;
pub const PING_TIMEOUT_SECS: u64 = 30;
pub const ROOM_TTL_WAITING_SECS: i64 = 3600;
pub const CLOCK_SKEW_LIMIT_MS: i64 = 5_000;

// Rate limits (validator gate 1)
pub const ACTIONS_PER_SECOND: usize = 10;
pub const ACTIONS_PER_MINUTE: usize = 300;

// Anti-cheat observation thresholds
pub const CHEAT_RATE_SUSPICIOUS_PER_MIN: usize = 30;
pub const CHEAT_RATE_CONFIRMED_PER_MIN: usize = 60;
pub const CHEAT_RESOURCE_DRIFT_SUSPICIOUS: f64 = 5.0;
pub const CHEAT_RESOURCE_DRIFT_CONFIRMED: f64 = 50.0;
pub const CHEAT_HP_CEILING: f32 = 1.5;
pub const CHEAT_DAMAGE_CEILING: f32 = 2.0;
pub const CHEAT_RANGE_CEILING: f32 = 2.0;
pub const CHEAT_SPEED_CEILING: f32 = 1.5;

/// Static combat/economy numbers for one unit variant.
pub struct UnitStats {
    pub max_hp: f32,
    pub size: f32,
    pub speed: f32, // pixels per tick
    pub damage: i32,
    pub range: f32,
    pub cooldown: u32, // ticks between shots
    pub armor: i32,
    pub splash: f32, // 0 = single target
    pub cost_gold: f64,
    pub cost_wood: f64,
    pub cost_supply: u32,
    pub train_secs: u32,
}

pub const WORKER: UnitStats = UnitStats {
    max_hp: 50.0,
    size: 16.0,
    speed: 1.6,
    damage: 3,
    range: 20.0,
    cooldown: 60,
    armor: 0,
    splash: 0.0,
    cost_gold: 50.0,
    cost_wood: 0.0,
    cost_supply: 1,
    train_secs: 8,
};

pub const SOLDIER: UnitStats = UnitStats {
    max_hp: 80.0,
    size: 18.0,
    speed: 1.8,
    damage: 10,
    range: 25.0,
    cooldown: 60,
    armor: 1,
    splash: 0.0,
    cost_gold: 80.0,
    cost_wood: 0.0,
    cost_supply: 2,
    train_secs: 12,
};

pub const ARCHER: UnitStats = UnitStats {
    max_hp: 55.0,
    size: 16.0,
    speed: 1.7,
    damage: 8,
    range: 140.0,
    cooldown: 75,
    armor: 0,
    splash: 0.0,
    cost_gold: 60.0,
    cost_wood: 40.0,
    cost_supply: 2,
    train_secs: 14,
};

// For healers, damage is the heal amount and range the heal range.
pub const HEALER: UnitStats = UnitStats {
    max_hp: 45.0,
    size: 16.0,
    speed: 1.6,
    damage: 6,
    range: 120.0,
    cooldown: 90,
    armor: 0,
    splash: 0.0,
    cost_gold: 70.0,
    cost_wood: 30.0,
    cost_supply: 2,
    train_secs: 16,
};

pub const CATAPULT: UnitStats = UnitStats {
    max_hp: 120.0,
    size: 24.0,
    speed: 1.0,
    damage: 30,
    range: 200.0,
    cooldown: 180,
    armor: 2,
    splash: 60.0,
    cost_gold: 150.0,
    cost_wood: 120.0,
    cost_supply: 4,
    train_secs: 25,
};

pub fn unit_stats(kind: UnitKind) -> &'static UnitStats {
    match kind {
        UnitKind::Worker => &WORKER,
        UnitKind::Soldier => &SOLDIER,
        UnitKind::Archer => &ARCHER,
        UnitKind::Healer => &HEALER,
        UnitKind::Catapult => &CATAPULT,
    }
}

/// Static numbers for one building variant.
pub struct BuildingStats {
    pub size: f32, // square footprint edge, pixels
    pub max_hp: f32,
    pub build_secs: u32,
    pub cost_gold: f64,
    pub cost_wood: f64,
}

pub const BASE: BuildingStats = BuildingStats {
    size: 100.0,
    max_hp: 1500.0,
    build_secs: 60,
    cost_gold: 400.0,
    cost_wood: 200.0,
};

pub const BARRACKS: BuildingStats = BuildingStats {
    size: 80.0,
    max_hp: 800.0,
    build_secs: 30,
    cost_gold: 150.0,
    cost_wood: 100.0,
};

pub const FARM: BuildingStats = BuildingStats {
    size: 60.0,
    max_hp: 300.0,
    build_secs: 20,
    cost_gold: 80.0,
    cost_wood: 60.0,
};

pub const TOWER: BuildingStats = BuildingStats {
    size: 50.0,
    max_hp: 500.0,
    build_secs: 25,
    cost_gold: 100.0,
    cost_wood: 80.0,
};

pub const BLACKSMITH: BuildingStats = BuildingStats {
    size: 70.0,
    max_hp: 600.0,
    build_secs: 35,
    cost_gold: 120.0,
    cost_wood: 100.0,
};

pub const SIEGE_WORKSHOP: BuildingStats = BuildingStats {
    size: 90.0,
    max_hp: 700.0,
    build_secs: 40,
    cost_gold: 200.0,
    cost_wood: 150.0,
};

pub const WALL: BuildingStats = BuildingStats {
    size: 40.0,
    max_hp: 400.0,
    build_secs: 10,
    cost_gold: 20.0,
    cost_wood: 40.0,
};

pub fn building_stats(kind: BuildingKind) -> &'static BuildingStats {
    match kind {
        BuildingKind::Base => &BASE,
        BuildingKind::Barracks => &BARRACKS,
        BuildingKind::Farm => &FARM,
        BuildingKind::Tower => &TOWER,
        BuildingKind::Blacksmith => &BLACKSMITH,
        BuildingKind::SiegeWorkshop => &SIEGE_WORKSHOP,
        BuildingKind::Wall => &WALL,
    }
}

/// Which building trains which unit variant.
pub fn production_site(unit: UnitKind) -> BuildingKind {
    match unit {
        UnitKind::Worker => BuildingKind::Base,
        UnitKind::Soldier | UnitKind::Archer | UnitKind::Healer => BuildingKind::Barracks,
        UnitKind::Catapult => BuildingKind::SiegeWorkshop,
    }
}

/// Projectile flight speed in pixels per tick, by unit variant that fires it.
pub fn projectile_speed(kind: UnitKind) -> f32 {
    match kind {
        UnitKind::Archer => 6.0,
        UnitKind::Healer => 5.0,
        UnitKind::Catapult => 4.0,
        UnitKind::Worker | UnitKind::Soldier => 0.0, // melee
    }
}

pub const TOWER_PROJECTILE_SPEED: f32 = 6.0;

pub fn is_ranged(kind: UnitKind) -> bool {
    projectile_speed(kind) > 0.0
}

/// Level cap for one upgrade track.
pub fn upgrade_cap(kind: UpgradeKind) -> u8 {
    match kind {
        UpgradeKind::Attack => ATTACK_UPGRADE_CAP,
        UpgradeKind::Defense => DEFENSE_UPGRADE_CAP,
        UpgradeKind::Range => RANGE_UPGRADE_CAP,
    }
}

/// Cost of researching `next_level` (1-based) of an upgrade track.
pub fn upgrade_cost(kind: UpgradeKind, next_level: u8) -> (f64, f64) {
    let level = next_level as f64;
    match kind {
        UpgradeKind::Attack => (100.0 * level, 50.0 * level),
        UpgradeKind::Defense => (100.0 * level, 50.0 * level),
        UpgradeKind::Range => (150.0 * level, 75.0 * level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_intervals() {
        assert_eq!(TICK_INTERVAL_MICROS, 16_666);
        assert_eq!(SNAPSHOT_INTERVAL_MILLIS, 100);
    }

    #[test]
    fn test_soldier_numbers_match_combat_model() {
        // A soldier kills an un-upgraded soldier in ceil(80/10) = 8 swings.
        let s = unit_stats(UnitKind::Soldier);
        assert_eq!(s.damage, 10);
        assert_eq!(s.max_hp, 80.0);
        assert_eq!(s.cooldown, 60);
    }

    #[test]
    fn test_production_sites() {
        assert_eq!(production_site(UnitKind::Worker), BuildingKind::Base);
        assert_eq!(production_site(UnitKind::Archer), BuildingKind::Barracks);
        assert_eq!(production_site(UnitKind::Catapult), BuildingKind::SiegeWorkshop);
    }

    #[test]
    fn test_ranged_flags() {
        assert!(!is_ranged(UnitKind::Soldier));
        assert!(!is_ranged(UnitKind::Worker));
        assert!(is_ranged(UnitKind::Archer));
        assert!(is_ranged(UnitKind::Healer));
        assert!(is_ranged(UnitKind::Catapult));
    }

    #[test]
    fn test_upgrade_caps() {
        assert_eq!(upgrade_cap(UpgradeKind::Attack), 3);
        assert_eq!(upgrade_cap(UpgradeKind::Defense), 3);
        assert_eq!(upgrade_cap(UpgradeKind::Range), 2);
    }
}
