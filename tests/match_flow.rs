// End-to-end engine tests: seeded maps, full matches driven purely
// through the public validate-then-submit path, and the determinism
// property over scripted action sequences.

use skirmish_backend::engine::constants::TICK_RATE;
use skirmish_backend::engine::entities::{
    Difficulty, ResourceKind, ResourceNode, TeamRole, UnitKind, Vec2,
};
use skirmish_backend::engine::game::GameEngine;
use skirmish_backend::engine::map::{generate, TileGrid, TileKind};
use skirmish_backend::engine::{snapshot, validate};
use skirmish_backend::protocol::Action;

/// Two-player engine on an open grass map with one gold node near each
/// spawn.
fn start_match() -> GameEngine {
    let grid = TileGrid::filled(60, 60, TileKind::Grass);
    let resources = vec![
        ResourceNode {
            id: "n-host".into(),
            kind: ResourceKind::Gold,
            pos: Vec2::new(540.0, 380.0),
            amount: 2000.0,
            max_amount: 2000.0,
        },
        ResourceNode {
            id: "n-guest".into(),
            kind: ResourceKind::Gold,
            pos: Vec2::new(1900.0, 2060.0),
            amount: 2000.0,
            max_amount: 2000.0,
        },
    ];
    let mut engine = GameEngine::new(grid, resources, Difficulty::Normal);
    engine
        .add_player("host".into(), "Alice".into(), TeamRole::Host, "blue".into())
        .unwrap();
    engine
        .add_player("guest".into(), "Bob".into(), TeamRole::Guest, "red".into())
        .unwrap();
    engine.initialize();
    engine
}

/// Validate then submit, the way the room worker feeds the engine.
fn act(engine: &mut GameEngine, player: &str, action: Action) {
    validate::validate(engine.state(), &player.to_string(), &action)
        .unwrap_or_else(|e| panic!("action rejected: {e}"));
    engine.submit(&player.to_string(), &action).unwrap();
}

fn run(engine: &mut GameEngine, ticks: u64) {
    for _ in 0..ticks {
        engine.tick();
        if engine.is_game_over() {
            return;
        }
    }
}

#[test]
fn test_seeded_map_parity() {
    let (grid_a, res_a) = generate(60, 60, 424242).unwrap();
    let (grid_b, res_b) = generate(60, 60, 424242).unwrap();
    assert_eq!(grid_a.encode(), grid_b.encode());
    let ids_a: Vec<&str> = res_a.iter().map(|n| n.id.as_str()).collect();
    let ids_b: Vec<&str> = res_b.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids_a, ids_b);
}

#[test]
fn test_initial_state_is_symmetric() {
    let engine = start_match();
    let snap = snapshot::build_full(engine.state(), 0);
    assert_eq!(snap.buildings.len(), 2);
    assert_eq!(snap.units.len(), 6);
    for player in snap.players.values() {
        assert_eq!(player.supply, 3);
        assert_eq!(player.max_supply, 10);
        assert_eq!(player.gold, 200);
        assert_eq!(player.wood, 100);
    }
    assert!(!snap.game_over);
}

#[test]
fn test_movement_reaches_target() {
    let mut engine = start_match();
    // Workers move at 1.6 px/tick; ~350 px resolves well inside 400 ticks.
    let worker_id = "u00002".to_string();
    let target = Vec2::new(700.0, 380.0);
    act(
        &mut engine,
        "host",
        Action::Move {
            unit_id: worker_id.clone(),
            target,
            queued: false,
        },
    );
    run(&mut engine, 400);
    let snap = snapshot::build_full(engine.state(), 0);
    let worker = snap.units.iter().find(|u| u.id == worker_id).unwrap();
    assert!(worker.pos.distance(target) <= 5.0);
    assert_eq!(worker.state, "idle");
}

#[test]
fn test_economy_loop_banks_gold() {
    let mut engine = start_match();
    act(
        &mut engine,
        "host",
        Action::Gather {
            unit_id: "u00002".into(),
            node_id: "n-host".into(),
        },
    );
    run(&mut engine, 1500);
    let snap = snapshot::build_full(engine.state(), 0);
    assert!(
        snap.players["host"].gold > 200,
        "gold: {}",
        snap.players["host"].gold
    );
    let node = snap.resources.iter().find(|n| n.id == "n-host").unwrap();
    assert!(node.amount < node.max_amount);
}

#[test]
fn test_production_adds_supply_and_unit() {
    let mut engine = start_match();
    let base_id = "b00001".to_string();
    act(
        &mut engine,
        "host",
        Action::Produce {
            building_id: base_id,
            unit: UnitKind::Worker,
        },
    );
    {
        let snap = snapshot::build_full(engine.state(), 0);
        assert_eq!(snap.players["host"].gold, 150);
        assert_eq!(snap.players["host"].supply, 4);
    }
    run(&mut engine, (8 * TICK_RATE + 5) as u64);
    let snap = snapshot::build_full(engine.state(), 0);
    let workers = snap
        .units
        .iter()
        .filter(|u| u.owner == "host" && u.kind == UnitKind::Worker)
        .count();
    assert_eq!(workers, 4);
    assert_eq!(snap.players["host"].supply, 4);
}

#[test]
fn test_surrender_ends_match() {
    let mut engine = start_match();
    act(&mut engine, "guest", Action::Surrender);
    run(&mut engine, 2);
    let snap = snapshot::build_full(engine.state(), 0);
    assert!(snap.game_over);
    assert_eq!(snap.winner.as_deref(), Some("host"));
    assert!(snap.reason.unwrap().contains("eliminated"));
}

#[test]
fn test_match_to_elimination_by_razing() {
    let mut engine = start_match();
    // Host sends all three workers across the map to raze the guest base.
    let guest_base = "b00005".to_string();
    for worker in ["u00002", "u00003", "u00004"] {
        act(
            &mut engine,
            "host",
            Action::Attack {
                unit_id: worker.into(),
                target_id: guest_base.clone(),
            },
        );
    }

    // Walk ~2400 px, then chew through 1500 hp at 9 damage per 60 ticks.
    run(&mut engine, 25_000);
    assert!(engine.is_game_over(), "match should have been decided");
    let snap = snapshot::build_full(engine.state(), 0);
    assert_eq!(snap.winner.as_deref(), Some("host"));
    assert!(snap.reason.unwrap().contains("eliminated"));
    // The razed base is gone from the final state.
    assert!(!snap.buildings.iter().any(|b| b.id == "b00005"));
}

#[test]
fn test_invalid_actions_never_reach_engine() {
    let mut engine = start_match();
    // Moving the opponent's worker is rejected by the validator.
    let action = Action::Move {
        unit_id: "u00006".into(),
        target: Vec2::new(500.0, 500.0),
        queued: false,
    };
    assert!(validate::validate(engine.state(), &"host".to_string(), &action).is_err());

    // State is untouched: the guest worker is still idle where it spawned.
    engine.tick();
    let snap = snapshot::build_full(engine.state(), 0);
    let guest_worker = snap.units.iter().find(|u| u.id == "u00006").unwrap();
    assert_eq!(guest_worker.state, "idle");
}

#[test]
fn test_determinism_over_scripted_match() {
    let build = || {
        let (grid, resources) = generate(60, 60, 777).unwrap();
        let mut engine = GameEngine::new(grid, resources, Difficulty::Normal);
        engine
            .add_player("host".into(), "Alice".into(), TeamRole::Host, "blue".into())
            .unwrap();
        engine
            .add_player("guest".into(), "Bob".into(), TeamRole::Guest, "red".into())
            .unwrap();
        engine.initialize();
        engine
    };
    let mut a = build();
    let mut b = build();

    let script: Vec<(u64, &str, Action)> = vec![
        (
            5,
            "host",
            Action::Produce {
                building_id: "b00001".into(),
                unit: UnitKind::Worker,
            },
        ),
        (
            20,
            "guest",
            Action::Move {
                unit_id: "u00006".into(),
                target: Vec2::new(1800.0, 1800.0),
                queued: false,
            },
        ),
        (
            600,
            "host",
            Action::Move {
                unit_id: "u00003".into(),
                target: Vec2::new(800.0, 400.0),
                queued: false,
            },
        ),
    ];

    for tick in 0..1200u64 {
        for (at, player, action) in &script {
            if *at == tick {
                // Mirror the submissions into both engines.
                for engine in [&mut a, &mut b] {
                    if validate::validate(engine.state(), &player.to_string(), action).is_ok() {
                        engine.submit(&player.to_string(), action).unwrap();
                    }
                }
            }
        }
        a.tick();
        b.tick();
        if tick % 60 == 0 {
            let snap_a = serde_json::to_string(&snapshot::build_full(a.state(), 0)).unwrap();
            let snap_b = serde_json::to_string(&snapshot::build_full(b.state(), 0)).unwrap();
            assert_eq!(snap_a, snap_b, "diverged at tick {tick}");
        }
    }
}

#[test]
fn test_single_player_vs_ai_runs() {
    let (grid, resources) = generate(60, 60, 31337).unwrap();
    let mut engine = GameEngine::new(grid, resources, Difficulty::Easy);
    engine
        .add_player("host".into(), "Alice".into(), TeamRole::Host, "blue".into())
        .unwrap();
    engine.add_ai(Difficulty::Easy).unwrap();
    engine.initialize();

    run(&mut engine, 3000);
    let snap = snapshot::build_full(engine.state(), 0);
    // The AI has been earning its trickle and acting on its own.
    assert!(snap.players.contains_key("ai"));
    let ai_worker_orders = snap
        .units
        .iter()
        .filter(|u| u.owner == "ai" && u.kind == UnitKind::Worker)
        .count();
    assert!(ai_worker_orders >= 3);
}

#[test]
fn test_fog_filtered_snapshots_differ_per_player() {
    let mut engine = start_match();
    engine.tick();
    let for_host = snapshot::build_for(engine.state(), &"host".to_string(), 0);
    let for_guest = snapshot::build_for(engine.state(), &"guest".to_string(), 0);
    // Neither side has scouted the other: each sees only its own 3 units.
    assert_eq!(for_host.units.len(), 3);
    assert!(for_host.units.iter().all(|u| u.owner == "host"));
    assert_eq!(for_guest.units.len(), 3);
    assert!(for_guest.units.iter().all(|u| u.owner == "guest"));
}
