//! Deterministic map generation.
//!
//! The map is not part of the networked snapshot: every peer regenerates the
//! identical tile layout, slots and trees from the shared 32-bit map seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::GameConfig;

use super::actor::{Actor, ActorKind};
use super::grid::SpatialGrid;
use super::{TILE_MAP_STRIDE, TILE_WORLD};

/// Static world geometry and spawn bookkeeping derived from the map seed
#[derive(Debug, Clone)]
pub struct MapData {
    /// Tile occupancy, `TILE_MAP_STRIDE ^ 2` cells, nonzero = solid
    pub blocks: Vec<u8>,
    /// Static scenery actors; collide and block rays, never serialized
    pub trees: Vec<Actor>,
    /// One-time broad-phase over the trees
    pub trees_grid: SpatialGrid,
    /// Tile coordinates where players may spawn (drawn from, never consumed)
    pub spawn_slots: Vec<(i32, i32)>,
    /// Tile coordinates for initial barrel placement (consumed at world
    /// creation)
    pub item_slots: Vec<(i32, i32)>,
}

impl MapData {
    pub fn generate(map_seed: u32, cfg: &GameConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(map_seed as u64);
        let stride = TILE_MAP_STRIDE;
        let mut blocks = vec![0u8; (stride * stride) as usize];

        // border ring
        for i in 0..stride {
            blocks[i as usize] = 1;
            blocks[((stride - 1) * stride + i) as usize] = 1;
            blocks[(i * stride) as usize] = 1;
            blocks[(i * stride + stride - 1) as usize] = 1;
        }

        // seeded interior scatter, 1x1..2x2 blobs
        let blob_count = (stride * stride / 48) as u32;
        for _ in 0..blob_count {
            let bx = rng.gen_range(2..stride - 3);
            let by = rng.gen_range(2..stride - 3);
            let w = 1 + rng.gen_range(0..2);
            let h = 1 + rng.gen_range(0..2);
            for cy in by..by + h {
                for cx in bx..bx + w {
                    blocks[(cy * stride + cx) as usize] = 1;
                }
            }
        }

        // classify free cells with clear 3x3 neighbourhoods into slots
        let mut tree_slots = Vec::new();
        let mut item_slots = Vec::new();
        let mut spawn_slots = Vec::new();
        for cy in (2..stride - 2).step_by(2) {
            for cx in (2..stride - 2).step_by(2) {
                let mut clear = true;
                for oy in -1..=1 {
                    for ox in -1..=1 {
                        if blocks[((cy + oy) * stride + cx + ox) as usize] != 0 {
                            clear = false;
                        }
                    }
                }
                if !clear {
                    continue;
                }
                match rng.gen_range(0..8) {
                    0 | 1 => tree_slots.push((cx, cy)),
                    2 | 3 => item_slots.push((cx, cy)),
                    _ => spawn_slots.push((cx, cy)),
                }
            }
        }

        // plant trees, consuming tree slots
        let mut trees = Vec::new();
        let mut trees_grid = SpatialGrid::new();
        for i in 0..cfg.trees.init_count {
            if tree_slots.is_empty() {
                break;
            }
            let slot = tree_slots.remove(rng.gen_range(0..tree_slots.len()));
            let mut tree = Actor::new(ActorKind::Tree, &mut rng);
            tree.id = i;
            tree.subtype = rng.gen_range(0..4);
            tree.hp = 0;
            tree.x = slot.0 * TILE_WORLD + TILE_WORLD / 2;
            tree.y = slot.1 * TILE_WORLD + TILE_WORLD / 2;
            trees_grid.insert(tree.x, tree.y, trees.len() as u32);
            trees.push(tree);
        }

        debug!(
            trees = trees.len(),
            item_slots = item_slots.len(),
            spawn_slots = spawn_slots.len(),
            "map generated"
        );

        Self {
            blocks,
            trees,
            trees_grid,
            spawn_slots,
            item_slots,
        }
    }
}
