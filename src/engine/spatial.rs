// Grid-based spatial index for proximity queries over units and buildings.
//
// Divides the map into fixed-size cells and tracks which entities are in
// each cell, reducing radius queries from O(n^2) to O(n * k). Rebuilt once
// per tick from the engine's current collections. Purely spatial — no game
// logic lives here.

use super::entities::{EntityId, PlayerId, Vec2};

/// Size of each spatial grid cell in pixels.
pub const CELL_SIZE: f32 = 100.0;

/// Entry in the spatial index.
#[derive(Clone, Debug)]
pub struct SpatialEntry {
    pub id: EntityId,
    pub owner: PlayerId,
    pub pos: Vec2,
    pub is_building: bool,
    pub size: f32,
}

/// A uniform grid of cells, each holding the entries inside it.
pub struct SpatialGrid {
    pub cols: usize,
    pub rows: usize,
    cells: Vec<Vec<SpatialEntry>>,
}

impl SpatialGrid {
    /// Create a grid covering a map of the given pixel dimensions.
    pub fn new(pixel_width: f32, pixel_height: f32) -> Self {
        let cols = ((pixel_width / CELL_SIZE).ceil() as usize).max(1);
        let rows = ((pixel_height / CELL_SIZE).ceil() as usize).max(1);
        SpatialGrid {
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    pub fn insert(&mut self, entry: SpatialEntry) {
        let (col, row) = self.cell_coords(entry.pos);
        self.cells[row * self.cols + col].push(entry);
    }

    /// All entries within `radius` of `center`.
    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<&SpatialEntry> {
        let mut results = Vec::new();
        let min_col = (((center.x - radius) / CELL_SIZE).floor() as i64).max(0);
        let max_col = (((center.x + radius) / CELL_SIZE).floor() as i64).min(self.cols as i64 - 1);
        let min_row = (((center.y - radius) / CELL_SIZE).floor() as i64).max(0);
        let max_row = (((center.y + radius) / CELL_SIZE).floor() as i64).min(self.rows as i64 - 1);

        for row in min_row..=max_row {
            for col in min_col..=max_col {
                let idx = row as usize * self.cols + col as usize;
                for entry in &self.cells[idx] {
                    if entry.pos.distance(center) <= radius {
                        results.push(entry);
                    }
                }
            }
        }
        results
    }

    /// Convert a pixel position to cell coordinates, clamped to the grid.
    fn cell_coords(&self, pos: Vec2) -> (usize, usize) {
        let col = ((pos.x / CELL_SIZE) as i64).clamp(0, self.cols as i64 - 1) as usize;
        let row = ((pos.y / CELL_SIZE) as i64).clamp(0, self.rows as i64 - 1) as usize;
        (col, row)
    }
}
