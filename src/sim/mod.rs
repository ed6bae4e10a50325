//! Deterministic world simulation: entities, physics, broad-phase, combat.

pub mod actor;
pub mod ai;
pub mod grid;
pub mod input;
pub mod map;
pub mod physics;
pub mod tick;
pub mod world;

/// World units per map pixel; positions are 16-bit world-unit integers.
pub const WORLD_SCALE: i32 = 64;

/// Square world side in world units. Positions wrap/clamp into
/// `0..WORLD_BOUNDS`, which is exactly the 16-bit range.
pub const WORLD_BOUNDS: i32 = 0x1_0000;

/// Tile side in map pixels
pub const TILE_SIZE: i32 = 16;
pub const TILE_SIZE_BITS: u32 = 4;

/// Tiles per map row; the tile map is `TILE_MAP_STRIDE ^ 2` cells
pub const TILE_MAP_STRIDE: i32 = WORLD_BOUNDS / (TILE_SIZE * WORLD_SCALE);

/// Tile side in world units
pub const TILE_WORLD: i32 = TILE_SIZE * WORLD_SCALE;

/// Default scatter radius for dropped loot, world units
pub const OBJECT_RADIUS: i32 = 10 * WORLD_SCALE;

/// Projectile collision radius used for bounce repositioning
pub const BULLET_RADIUS: i32 = 2 * WORLD_SCALE;

/// Muzzle height above a player's feet
pub const PLAYER_HANDS_Z: i32 = 18 * WORLD_SCALE;

/// Upper bound of the hit-feedback timer (5-bit field)
pub const ANIM_HIT_MAX: u8 = 31;
