//! Physics primitives: integration, collision and ray casts.
//!
//! Pure functions over actor state with no scheduling knowledge. Positions
//! and velocities are integers; intermediate math runs in f32 and truncates
//! back, which is deterministic because every peer executes the identical
//! sequence of operations.

use crate::config::{ActorStats, GameConfig, WorldConfig};
use crate::util::math::{reach_f32, reach_i32};

use super::actor::Actor;
use super::map::MapData;
use super::world::WorldState;
use super::{TILE_MAP_STRIDE, TILE_WORLD, WORLD_BOUNDS};

pub fn add_pos(a: &mut Actor, x: f32, y: f32, z: f32, scale: f32) {
    a.x += (scale * x) as i32;
    a.y += (scale * y) as i32;
    a.z += (scale * z) as i32;
}

pub fn add_vel(a: &mut Actor, x: f32, y: f32, z: f32, scale: f32) {
    a.u += (scale * x) as i32;
    a.v += (scale * y) as i32;
    a.w += (scale * z) as i32;
}

/// Transfer a fraction of `from`'s velocity onto `to`
pub fn add_vel_from(to: &mut Actor, from: &Actor, scale: f32) {
    add_vel(to, from.u as f32, from.v as f32, from.w as f32, scale);
}

/// Integrate one tick of movement and gravity. Returns true when the actor
/// just bounced off the ground.
pub fn update_body(a: &mut Actor, gravity: i32, loss: i32) -> bool {
    a.x += a.u;
    a.y += a.v;
    a.z += a.w;
    if a.z > 0 {
        a.w -= gravity;
    } else {
        a.z = 0;
        if a.w < 0 {
            a.w = -a.w / loss.max(1);
            return true;
        }
    }
    false
}

/// Decay the hit-feedback timer
pub fn update_anim(a: &mut Actor) {
    a.anim_hit = reach_i32(a.anim_hit as i32, 0, 2) as u8;
}

/// Reflect the horizontal velocity off normal `(nx, ny)` with energy loss
pub fn reflect_velocity(a: &mut Actor, nx: f32, ny: f32, loss: f32) {
    let z = 2.0 * (a.u as f32 * nx + a.v as f32 * ny);
    a.u = ((a.u as f32 - z * nx) / loss) as i32;
    a.v = ((a.v as f32 - z * ny) / loss) as i32;
}

/// Keep the actor inside world bounds, reflecting velocity on contact.
/// Returns a bitmask of the axes that collided (2 = y, 4 = x).
pub fn collide_with_bounds(a: &mut Actor, radius: i32, loss: i32) -> u32 {
    let mut has = 0;
    if a.y > WORLD_BOUNDS - radius {
        a.y = WORLD_BOUNDS - radius;
        has |= 2;
        reflect_velocity(a, 0.0, 1.0, loss as f32);
    } else if a.y < radius {
        a.y = radius;
        has |= 2;
        reflect_velocity(a, 0.0, 1.0, loss as f32);
    }
    if a.x > WORLD_BOUNDS - radius {
        a.x = WORLD_BOUNDS - radius;
        has |= 4;
        reflect_velocity(a, 1.0, 0.0, loss as f32);
    } else if a.x < radius {
        a.x = radius;
        has |= 4;
        reflect_velocity(a, 1.0, 0.0, loss as f32);
    }
    has
}

pub fn limit_velocity_xy(a: &mut Actor, len: i32) {
    let sq = (a.u * a.u + a.v * a.v) as f32;
    let max_sq = (len * len) as f32;
    if sq > max_sq {
        let k = len as f32 / sq.sqrt();
        a.u = (a.u as f32 * k) as i32;
        a.v = (a.v as f32 * k) as i32;
    }
}

pub fn apply_ground_friction(a: &mut Actor, amount: f32) {
    let sq = (a.u * a.u + a.v * a.v) as f32;
    if sq > 0.0 {
        let len = sq.sqrt();
        let k = reach_f32(len, 0.0, amount) / len;
        a.u = (a.u as f32 * k) as i32;
        a.v = (a.v as f32 * k) as i32;
    }
}

/// Throw the actor outward at `angle` with horizontal speed `vel_xy` (the y
/// component halved for the dimetric ground plane) and vertical speed `vel_z`
pub fn add_radial_velocity(a: &mut Actor, angle: f32, vel_xy: f32, vel_z: f32) {
    add_vel(a, vel_xy * angle.cos(), vel_xy * angle.sin() / 2.0, vel_z, 1.0);
}

/// 3D sphere intersection using configured radii and center heights
pub fn test_intersection(a: &Actor, sa: &ActorStats, b: &Actor, sb: &ActorStats) -> bool {
    let d = (sa.radius + sb.radius) as f32;
    let nx = (a.x - b.x) as f32;
    let ny = (a.y - b.y) as f32;
    let nz = ((a.z + sa.height) - (b.z + sb.height)) as f32;
    nx * nx + ny * ny + nz * nz < d * d
}

/// Symmetric positional push-out weighted by inverse mass. The y separation
/// is doubled to match the flattened ground-plane perspective.
pub fn check_body_collision(a: &mut Actor, sa: &ActorStats, b: &mut Actor, sb: &ActorStats) {
    let nx = (a.x - b.x) as f32;
    let ny = ((a.y - b.y) * 2) as f32;
    let nz = ((a.z + sa.height) - (b.z + sb.height)) as f32;
    let sqr = nx * nx + ny * ny + nz * nz;
    let d = (sa.radius + sb.radius) as f32;
    if sqr > 0.0 && sqr < d * d {
        let pen = (d / sqr.sqrt() - 1.0) / 2.0;
        add_pos(a, nx, ny, nz, sa.inv_mass * pen);
        add_pos(b, nx, ny, nz, -sb.inv_mass * pen);
    }
}

/// Push a circle out of solid tiles, reflecting velocity off the contact
/// normal. Returns true on contact.
pub fn check_tile_collisions(a: &mut Actor, blocks: &[u8], radius: i32, bounds_loss: i32) -> bool {
    let x0 = 0.max((a.x - radius) / TILE_WORLD);
    let y0 = 0.max((a.y - radius) / TILE_WORLD);
    let x1 = (TILE_MAP_STRIDE - 1).min((a.x + radius) / TILE_WORLD);
    let y1 = (TILE_MAP_STRIDE - 1).min((a.y + radius) / TILE_WORLD);

    let mut min_dist = f32::MAX;
    let mut nx = 0.0;
    let mut ny = 0.0;
    for cy in y0..=y1 {
        for cx in x0..=x1 {
            if blocks[(cy * TILE_MAP_STRIDE + cx) as usize] == 0 {
                continue;
            }
            let (px, py, dist) = closest_point_on_rect(
                a.x as f32,
                a.y as f32,
                (cx * TILE_WORLD) as f32,
                (cy * TILE_WORLD) as f32,
                ((cx + 1) * TILE_WORLD) as f32,
                ((cy + 1) * TILE_WORLD) as f32,
            );
            if dist < radius as f32 && dist < min_dist {
                min_dist = dist;
                nx = px - a.x as f32;
                ny = py - a.y as f32;
            }
        }
    }

    if min_dist < radius as f32 {
        let len = (nx * nx + ny * ny).sqrt();
        if len > 0.0 {
            nx /= len;
            ny /= len;
            add_pos(a, nx, ny, 0.0, -(radius as f32 - min_dist));
            reflect_velocity(a, nx, ny, bounds_loss as f32);
        }
        return true;
    }
    false
}

fn closest_point_on_rect(cx: f32, cy: f32, l: f32, t: f32, r: f32, b: f32) -> (f32, f32, f32) {
    let px = cx.clamp(l, r);
    let py = cy.clamp(t, b);
    let dx = cx - px;
    let dy = cy - py;
    (px, py, (dx * dx + dy * dy).sqrt())
}

/// Full per-tick physics for one mobile actor: integrate, collide with
/// tiles and bounds, ground friction, feedback-timer decay.
pub fn update_actor_physics(
    a: &mut Actor,
    stats: &ActorStats,
    world: &WorldConfig,
    blocks: &[u8],
    weak_gravity: bool,
) {
    let gravity = if weak_gravity {
        world.gravity_weak
    } else {
        world.gravity
    };
    update_body(a, gravity, stats.ground_loss);
    check_tile_collisions(a, blocks, stats.radius, stats.bounds_loss);
    collide_with_bounds(a, stats.radius, stats.bounds_loss);
    if a.z <= 0 {
        apply_ground_friction(a, stats.ground_friction as f32);
    }
    update_anim(a);
}

/// Ray vs sphere; `None` when the ray misses or starts inside the sphere.
pub fn test_ray_with_sphere(
    ox: f32,
    oy: f32,
    oz: f32,
    dx: f32,
    dy: f32,
    dz: f32,
    cx: f32,
    cy: f32,
    cz: f32,
    radius: f32,
) -> Option<f32> {
    let lx = cx - ox;
    let ly = cy - oy;
    let lz = cz - oz;
    let tca = lx * dx + ly * dy + lz * dz;
    if tca < 0.0 {
        return None;
    }
    let d2 = lx * lx + ly * ly + lz * lz - tca * tca;
    let r2 = radius * radius;
    if d2 > r2 {
        return None;
    }
    let thc = (r2 - d2).sqrt();
    let t = tca - thc;
    (t >= 0.0).then_some(t)
}

/// Slab-method ray vs axis-aligned box; for a ray starting inside, returns
/// the exit distance.
pub fn test_ray_with_aabb(
    origin: [f32; 3],
    dir: [f32; 3],
    min: [f32; 3],
    max: [f32; 3],
) -> Option<f32> {
    let mut tmin = f32::NEG_INFINITY;
    let mut tmax = f32::INFINITY;
    for axis in 0..3 {
        if dir[axis] == 0.0 {
            if origin[axis] < min[axis] || origin[axis] > max[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / dir[axis];
        let mut t1 = (min[axis] - origin[axis]) * inv;
        let mut t2 = (max[axis] - origin[axis]) * inv;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        tmin = tmin.max(t1);
        tmax = tmax.min(t2);
    }
    if tmax < tmin.max(0.0) {
        return None;
    }
    Some(if tmin > 0.0 { tmin } else { tmax })
}

/// DDA walk over the tile grid in tile coordinates; returns the distance (in
/// tiles) to the first solid cell within `max_dist`.
pub fn trace_tiles(blocks: &[u8], px: f32, py: f32, dx: f32, dy: f32, max_dist: f32) -> Option<f32> {
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    let stride = TILE_MAP_STRIDE;
    let mut ix = px.floor() as i32;
    let mut iy = py.floor() as i32;
    let step_x: i32 = if dx >= 0.0 { 1 } else { -1 };
    let step_y: i32 = if dy >= 0.0 { 1 } else { -1 };
    let delta_x = if dx != 0.0 { (1.0 / dx).abs() } else { f32::MAX };
    let delta_y = if dy != 0.0 { (1.0 / dy).abs() } else { f32::MAX };
    let mut side_x = if dx >= 0.0 {
        (ix as f32 + 1.0 - px) * delta_x
    } else {
        (px - ix as f32) * delta_x
    };
    let mut side_y = if dy >= 0.0 {
        (iy as f32 + 1.0 - py) * delta_y
    } else {
        (py - iy as f32) * delta_y
    };

    let mut t = 0.0;
    while t <= max_dist {
        if ix >= 0 && ix < stride && iy >= 0 && iy < stride {
            if blocks[(iy * stride + ix) as usize] != 0 {
                return Some(t);
            }
        }
        if side_x < side_y {
            t = side_x;
            side_x += delta_x;
            ix += step_x;
        } else {
            t = side_y;
            side_y += delta_y;
            iy += step_y;
        }
    }
    None
}

/// What a world ray cast can strike
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RayTarget {
    Bounds,
    Tile,
    Player(usize),
    Barrel(usize),
    Tree(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub t: f32,
    pub target: RayTarget,
}

/// Cast a ray against world bounds, every player (except the owner's),
/// barrels, trees and the tile map. Hits come back sorted nearest-first;
/// the normalized direction is returned for endpoint reconstruction.
pub fn raycast_world(
    world: &WorldState,
    map: &MapData,
    cfg: &GameConfig,
    origin: (f32, f32, f32),
    dir: (f32, f32, f32),
    owner: i32,
) -> ((f32, f32, f32), Vec<RayHit>) {
    let (x, y, z) = origin;
    let len = (dir.0 * dir.0 + dir.1 * dir.1 + dir.2 * dir.2).sqrt();
    let (dx, dy, dz) = if len > 0.0 {
        (dir.0 / len, dir.1 / len, dir.2 / len)
    } else {
        (1.0, 0.0, 0.0)
    };
    let mut hits = Vec::new();

    let bounds = WORLD_BOUNDS as f32;
    let bounds_dist = test_ray_with_aabb(
        [x, y, z],
        [dx, dy, dz],
        [0.0, 0.0, 0.0],
        [bounds, bounds, bounds],
    );
    if let Some(t) = bounds_dist {
        hits.push(RayHit {
            t,
            target: RayTarget::Bounds,
        });
    }

    let mut sphere = |a: &Actor, target: RayTarget, hits: &mut Vec<RayHit>| {
        let stats = cfg.actor_stats(a.kind);
        if let Some(t) = test_ray_with_sphere(
            x,
            y,
            z,
            dx,
            dy,
            dz,
            a.x as f32,
            a.y as f32,
            (a.z + stats.height) as f32,
            stats.radius as f32,
        ) {
            hits.push(RayHit { t, target });
        }
    };
    for (i, p) in world.players.iter().enumerate() {
        if p.client != owner {
            sphere(&p.base, RayTarget::Player(i), &mut hits);
        }
    }
    for (i, b) in world.barrels.iter().enumerate() {
        sphere(b, RayTarget::Barrel(i), &mut hits);
    }
    for (i, t) in map.trees.iter().enumerate() {
        sphere(t, RayTarget::Tree(i), &mut hits);
    }

    let max_distance = bounds_dist.unwrap_or(bounds * 2.5);
    let tile_world = TILE_WORLD as f32;
    if let Some(t) = trace_tiles(
        &map.blocks,
        x / tile_world,
        y / tile_world,
        dx,
        dy,
        max_distance / tile_world,
    ) {
        hits.push(RayHit {
            t: t * tile_world,
            target: RayTarget::Tile,
        });
    }

    hits.sort_by(|a, b| a.t.total_cmp(&b.t));
    ((dx, dy, dz), hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::actor::ActorKind;

    fn actor(x: i32, y: i32) -> Actor {
        Actor {
            x,
            y,
            hp: 1,
            ..Actor::default()
        }
    }

    #[test]
    fn body_integrates_and_bounces() {
        let mut a = actor(100, 100);
        a.u = 5;
        a.w = -10;
        a.z = 0;
        let bounced = update_body(&mut a, 5, 2);
        assert!(bounced);
        assert_eq!(a.x, 105);
        assert_eq!(a.w, 5);
    }

    #[test]
    fn bounds_clamp_and_reflect() {
        let mut a = actor(10, 30000);
        a.u = -40;
        let has = collide_with_bounds(&mut a, 100, 1);
        assert_eq!(has, 4);
        assert_eq!(a.x, 100);
        assert_eq!(a.u, 40);
    }

    #[test]
    fn intersection_uses_radii_and_heights() {
        let cfg = GameConfig::default();
        let pa = cfg.actor_stats(ActorKind::Player);
        let a = actor(1000, 1000);
        let mut b = actor(1000, 1000);
        assert!(test_intersection(&a, pa, &b, pa));
        b.x = 1000 + pa.radius * 2 + 1;
        assert!(!test_intersection(&a, pa, &b, pa));
    }

    #[test]
    fn push_out_separates_overlapping_bodies() {
        let cfg = GameConfig::default();
        let stats = cfg.actor_stats(ActorKind::Player);
        let mut a = actor(1000, 1000);
        let mut b = actor(1100, 1000);
        let before = (b.x - a.x).abs();
        check_body_collision(&mut a, stats, &mut b, stats);
        let after = (b.x - a.x).abs();
        assert!(after > before, "bodies should separate ({before} -> {after})");
    }

    #[test]
    fn static_body_does_not_move() {
        let cfg = GameConfig::default();
        let player = cfg.actor_stats(ActorKind::Player);
        let tree = cfg.actor_stats(ActorKind::Tree);
        let mut a = actor(1000, 1000);
        let mut t = actor(1100, 1000);
        check_body_collision(&mut a, player, &mut t, tree);
        assert_eq!((t.x, t.y), (1100, 1000));
        assert!(a.x < 1000);
    }

    #[test]
    fn ray_hits_sphere_ahead_only() {
        let hit = test_ray_with_sphere(0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 500.0, 0.0, 0.0, 100.0);
        assert!(matches!(hit, Some(t) if (t - 400.0).abs() < 1.0));
        let behind = test_ray_with_sphere(0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 500.0, 0.0, 0.0, 100.0);
        assert!(behind.is_none());
    }

    #[test]
    fn tile_trace_stops_at_solid_cell() {
        let mut blocks = vec![0u8; (TILE_MAP_STRIDE * TILE_MAP_STRIDE) as usize];
        blocks[(5 * TILE_MAP_STRIDE + 10) as usize] = 1;
        let t = trace_tiles(&blocks, 2.5, 5.5, 1.0, 0.0, 64.0).expect("hit");
        assert!((t - 7.5).abs() < 0.01, "distance {t}");
    }

    #[test]
    fn tile_collision_pushes_circle_out() {
        let mut blocks = vec![0u8; (TILE_MAP_STRIDE * TILE_MAP_STRIDE) as usize];
        blocks[(2 * TILE_MAP_STRIDE + 2) as usize] = 1;
        // just left of the solid tile, overlapping it
        let mut a = actor(2 * TILE_WORLD - 100, 2 * TILE_WORLD + TILE_WORLD / 2);
        a.u = 50;
        let hit = check_tile_collisions(&mut a, &blocks, 300, 1);
        assert!(hit);
        assert!(a.x <= 2 * TILE_WORLD - 300);
    }
}
