// Seeded map generation and the tile grid.
//
// Generation is a pure function of (width, height, seed): the RNG is an
// explicit linear-congruential stream, never a shared/global generator, so
// identical seeds reproduce byte-identical maps.

use std::collections::VecDeque;

use serde::Serialize;
use thiserror::Error;

use super::constants::{SPAWN_CLEAR_RADIUS, TILE_SIZE};
use super::entities::{EntityId, ResourceKind, ResourceNode, Vec2};

#[derive(Debug, Error)]
pub enum MapError {
    #[error("map dimensions must be > 0")]
    InvalidDimensions,
}

/// Deterministic 64-bit linear congruential generator (Knuth MMIX constants).
#[derive(Clone, Debug)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        // Avoid the all-zero fixed point of the stream.
        Lcg {
            state: seed ^ 0x9e37_79b9_7f4a_7c15,
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 33) as u32
    }

    /// Uniform value in `[lo, hi)`.
    pub fn next_range(&mut self, lo: u32, hi: u32) -> u32 {
        debug_assert!(hi > lo);
        lo + self.next_u32() % (hi - lo)
    }

    pub fn next_f32(&mut self) -> f32 {
        self.next_u32() as f32 / u32::MAX as f32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TileKind {
    Grass,
    Dirt,
    Sand,
    Forest,
    Gold,
    Water,
    Mountain,
}

impl TileKind {
    pub fn is_passable(self) -> bool {
        !matches!(self, TileKind::Water | TileKind::Mountain)
    }
}

/// The immutable tile grid of one match.
#[derive(Clone, Debug)]
pub struct TileGrid {
    pub width: usize,
    pub height: usize,
    tiles: Vec<TileKind>,
}

impl TileGrid {
    pub fn filled(width: usize, height: usize, kind: TileKind) -> Self {
        TileGrid {
            width,
            height,
            tiles: vec![kind; width * height],
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn in_bounds(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Tile kind at (x, y). Out-of-bounds reads as mountain (impassable).
    pub fn get(&self, x: usize, y: usize) -> TileKind {
        if !self.in_bounds(x, y) {
            return TileKind::Mountain;
        }
        self.tiles[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, kind: TileKind) {
        if self.in_bounds(x, y) {
            let idx = self.index(x, y);
            self.tiles[idx] = kind;
        }
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_passable()
    }

    /// Passability at a pixel position; outside the map counts as blocked.
    pub fn is_passable_pixel(&self, pos: Vec2) -> bool {
        if pos.x < 0.0 || pos.y < 0.0 {
            return false;
        }
        let (tx, ty) = Self::pixel_to_tile(pos);
        self.in_bounds(tx, ty) && self.is_passable(tx, ty)
    }

    pub fn pixel_width(&self) -> f32 {
        self.width as f32 * TILE_SIZE
    }

    pub fn pixel_height(&self) -> f32 {
        self.height as f32 * TILE_SIZE
    }

    pub fn contains_pixel(&self, pos: Vec2) -> bool {
        pos.x >= 0.0 && pos.y >= 0.0 && pos.x <= self.pixel_width() && pos.y <= self.pixel_height()
    }

    pub fn pixel_to_tile(pos: Vec2) -> (usize, usize) {
        (
            (pos.x / TILE_SIZE).max(0.0) as usize,
            (pos.y / TILE_SIZE).max(0.0) as usize,
        )
    }

    pub fn tile_center(tx: usize, ty: usize) -> Vec2 {
        Vec2::new(
            tx as f32 * TILE_SIZE + TILE_SIZE / 2.0,
            ty as f32 * TILE_SIZE + TILE_SIZE / 2.0,
        )
    }

    /// Row-major tile kinds as small ints, for the wire.
    pub fn encode(&self) -> Vec<u8> {
        self.tiles
            .iter()
            .map(|t| match t {
                TileKind::Grass => 0,
                TileKind::Dirt => 1,
                TileKind::Sand => 2,
                TileKind::Forest => 3,
                TileKind::Gold => 4,
                TileKind::Water => 5,
                TileKind::Mountain => 6,
            })
            .collect()
    }
}

/// The two spawn tile centers: host at 15% of both axes, guest at 85%.
pub fn spawn_tiles(width: usize, height: usize) -> [(usize, usize); 2] {
    let near = |extent: usize| (extent as f32 * 0.15) as usize;
    let far = |extent: usize| (extent as f32 * 0.85) as usize;
    [(near(width), near(height)), (far(width), far(height))]
}

/// Generate the terrain and resource layout for one match.
///
/// Identical seeds yield identical grids and resource lists. On placement
/// contradictions (spawn zones not connected by passable terrain) all
/// non-spawn tiles are reset and repainted from the continuing LCG stream,
/// up to `2 * width * height` attempts.
pub fn generate(
    width: usize,
    height: usize,
    seed: u64,
) -> Result<(TileGrid, Vec<ResourceNode>), MapError> {
    if width == 0 || height == 0 {
        return Err(MapError::InvalidDimensions);
    }

    let mut rng = Lcg::new(seed);
    let spawns = spawn_tiles(width, height);
    let max_attempts = 2 * width * height;

    let mut grid = TileGrid::filled(width, height, TileKind::Grass);

    for _attempt in 0..max_attempts {
        paint_terrain(&mut grid, &mut rng);
        clear_spawn_squares(&mut grid, &spawns);

        if spawns_connected(&grid, &spawns) {
            let resources = collect_resources(&grid, &mut rng);
            return Ok((grid, resources));
        }

        // Contradiction: reset everything except the spawn squares and retry.
        reset_non_spawn(&mut grid, &spawns);
    }

    // Out of attempts: fall back to a bare grass map so the stream contract
    // ("fails only on a malformed seed") holds.
    let mut grid = TileGrid::filled(width, height, TileKind::Grass);
    clear_spawn_squares(&mut grid, &spawns);
    let resources = collect_resources(&grid, &mut rng);
    Ok((grid, resources))
}

fn paint_terrain(grid: &mut TileGrid, rng: &mut Lcg) {
    let w = grid.width;
    let h = grid.height;
    let area = (w * h) as u32;

    // Water and mountain blobs grown by random walk.
    grow_blobs(grid, rng, TileKind::Water, area / 500 + 2, 8, 20);
    grow_blobs(grid, rng, TileKind::Mountain, area / 500 + 2, 6, 16);

    // Forest patches (harvestable wood).
    grow_blobs(grid, rng, TileKind::Forest, area / 300 + 3, 5, 12);

    // Gold clusters: few and small.
    grow_blobs(grid, rng, TileKind::Gold, area / 900 + 2, 2, 5);

    // Cosmetic dirt and sand sprinkle on remaining grass.
    for _ in 0..area / 20 {
        let x = rng.next_range(0, w as u32) as usize;
        let y = rng.next_range(0, h as u32) as usize;
        if grid.get(x, y) == TileKind::Grass {
            let kind = if rng.next_u32() % 2 == 0 {
                TileKind::Dirt
            } else {
                TileKind::Sand
            };
            grid.set(x, y, kind);
        }
    }
}

fn grow_blobs(
    grid: &mut TileGrid,
    rng: &mut Lcg,
    kind: TileKind,
    count: u32,
    min_size: u32,
    max_size: u32,
) {
    let w = grid.width as u32;
    let h = grid.height as u32;
    for _ in 0..count {
        let mut x = rng.next_range(0, w) as i64;
        let mut y = rng.next_range(0, h) as i64;
        let size = rng.next_range(min_size, max_size + 1);
        for _ in 0..size {
            if x >= 0 && y >= 0 && (x as usize) < grid.width && (y as usize) < grid.height {
                grid.set(x as usize, y as usize, kind);
            }
            match rng.next_u32() % 4 {
                0 => x += 1,
                1 => x -= 1,
                2 => y += 1,
                _ => y -= 1,
            }
        }
    }
}

fn clear_spawn_squares(grid: &mut TileGrid, spawns: &[(usize, usize); 2]) {
    let r = SPAWN_CLEAR_RADIUS as i64;
    for &(sx, sy) in spawns {
        for dy in -r..=r {
            for dx in -r..=r {
                let x = sx as i64 + dx;
                let y = sy as i64 + dy;
                if x >= 0 && y >= 0 {
                    grid.set(x as usize, y as usize, TileKind::Grass);
                }
            }
        }
    }
}

fn in_spawn_square(x: usize, y: usize, spawns: &[(usize, usize); 2]) -> bool {
    let r = SPAWN_CLEAR_RADIUS as i64;
    spawns.iter().any(|&(sx, sy)| {
        (x as i64 - sx as i64).abs() <= r && (y as i64 - sy as i64).abs() <= r
    })
}

fn reset_non_spawn(grid: &mut TileGrid, spawns: &[(usize, usize); 2]) {
    for y in 0..grid.height {
        for x in 0..grid.width {
            if !in_spawn_square(x, y, spawns) {
                grid.set(x, y, TileKind::Grass);
            }
        }
    }
}

/// BFS over passable tiles from spawn 0; true if spawn 1 is reachable.
fn spawns_connected(grid: &TileGrid, spawns: &[(usize, usize); 2]) -> bool {
    let (sx, sy) = spawns[0];
    let (tx, ty) = spawns[1];
    let mut visited = vec![false; grid.width * grid.height];
    let mut queue = VecDeque::new();
    visited[sy * grid.width + sx] = true;
    queue.push_back((sx, sy));

    while let Some((x, y)) = queue.pop_front() {
        if (x, y) == (tx, ty) {
            return true;
        }
        for (dx, dy) in [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)] {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            if !grid.in_bounds(nx, ny) || !grid.is_passable(nx, ny) {
                continue;
            }
            let idx = ny * grid.width + nx;
            if !visited[idx] {
                visited[idx] = true;
                queue.push_back((nx, ny));
            }
        }
    }
    false
}

/// One resource node per gold/forest tile, centered on the tile.
fn collect_resources(grid: &TileGrid, rng: &mut Lcg) -> Vec<ResourceNode> {
    let mut nodes = Vec::new();
    let mut next = 0u32;
    for y in 0..grid.height {
        for x in 0..grid.width {
            let (kind, amount) = match grid.get(x, y) {
                TileKind::Gold => (ResourceKind::Gold, rng.next_range(1500, 3001) as f32),
                TileKind::Forest => (ResourceKind::Wood, rng.next_range(800, 1501) as f32),
                _ => continue,
            };
            next += 1;
            let id: EntityId = format!("n{next:05}");
            nodes.push(ResourceNode {
                id,
                kind,
                pos: TileGrid::tile_center(x, y),
                amount,
                max_amount: amount,
            });
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcg_reproducible() {
        let mut a = Lcg::new(42);
        let mut b = Lcg::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
        let mut c = Lcg::new(43);
        assert_ne!(a.next_u32(), c.next_u32());
    }

    #[test]
    fn test_lcg_range() {
        let mut rng = Lcg::new(7);
        for _ in 0..1000 {
            let v = rng.next_range(10, 20);
            assert!((10..20).contains(&v));
        }
    }

    #[test]
    fn test_generate_identical_for_same_seed() {
        let (grid_a, res_a) = generate(60, 60, 424242).unwrap();
        let (grid_b, res_b) = generate(60, 60, 424242).unwrap();
        assert_eq!(grid_a.encode(), grid_b.encode());
        let ids_a: Vec<&str> = res_a.iter().map(|n| n.id.as_str()).collect();
        let ids_b: Vec<&str> = res_b.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        for (a, b) in res_a.iter().zip(res_b.iter()) {
            assert_eq!(a.amount, b.amount);
            assert_eq!(a.pos, b.pos);
        }
    }

    #[test]
    fn test_generate_different_seeds_differ() {
        let (grid_a, _) = generate(60, 60, 1).unwrap();
        let (grid_b, _) = generate(60, 60, 2).unwrap();
        assert_ne!(grid_a.encode(), grid_b.encode());
    }

    #[test]
    fn test_generate_rejects_zero_dims() {
        assert!(generate(0, 60, 1).is_err());
        assert!(generate(60, 0, 1).is_err());
    }

    #[test]
    fn test_spawn_squares_are_grass() {
        let (grid, _) = generate(60, 60, 99).unwrap();
        for (sx, sy) in spawn_tiles(60, 60) {
            for dy in 0..=2 * SPAWN_CLEAR_RADIUS {
                for dx in 0..=2 * SPAWN_CLEAR_RADIUS {
                    let x = sx + dx - SPAWN_CLEAR_RADIUS;
                    let y = sy + dy - SPAWN_CLEAR_RADIUS;
                    assert_eq!(grid.get(x, y), TileKind::Grass, "tile ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn test_spawns_are_connected() {
        for seed in [1u64, 2, 3, 424242, u64::MAX] {
            let (grid, _) = generate(60, 60, seed).unwrap();
            let spawns = spawn_tiles(60, 60);
            assert!(spawns_connected(&grid, &spawns), "seed {seed}");
        }
    }

    #[test]
    fn test_resource_amounts_in_range() {
        let (_, resources) = generate(60, 60, 5).unwrap();
        assert!(!resources.is_empty());
        for node in &resources {
            match node.kind {
                ResourceKind::Gold => {
                    assert!((1500.0..=3000.0).contains(&node.amount), "{}", node.amount)
                }
                ResourceKind::Wood => {
                    assert!((800.0..=1500.0).contains(&node.amount), "{}", node.amount)
                }
            }
            assert_eq!(node.amount, node.max_amount);
        }
    }

    #[test]
    fn test_pixel_tile_conversions() {
        assert_eq!(TileGrid::pixel_to_tile(Vec2::new(0.0, 0.0)), (0, 0));
        assert_eq!(TileGrid::pixel_to_tile(Vec2::new(39.9, 39.9)), (0, 0));
        assert_eq!(TileGrid::pixel_to_tile(Vec2::new(40.0, 80.0)), (1, 2));
        assert_eq!(TileGrid::tile_center(0, 0), Vec2::new(20.0, 20.0));
        assert_eq!(TileGrid::tile_center(2, 1), Vec2::new(100.0, 60.0));
    }

    #[test]
    fn test_out_of_bounds_is_impassable() {
        let grid = TileGrid::filled(10, 10, TileKind::Grass);
        assert_eq!(grid.get(10, 0), TileKind::Mountain);
        assert!(!grid.is_passable_pixel(Vec2::new(-1.0, 5.0)));
        assert!(!grid.is_passable_pixel(Vec2::new(500.0, 5.0)));
        assert!(grid.is_passable_pixel(Vec2::new(5.0, 5.0)));
    }

    #[test]
    fn test_encode_roundtrip_kinds() {
        let mut grid = TileGrid::filled(2, 1, TileKind::Grass);
        grid.set(1, 0, TileKind::Water);
        assert_eq!(grid.encode(), vec![0, 5]);
    }
}
