//! The canonical world snapshot and its normalization rules.

use std::collections::BTreeMap;

use super::actor::{
    Actor, BarrelActor, BulletActor, ClientId, ItemActor, PlayerActor, PlayerStat,
};
use super::ANIM_HIT_MAX;

/// The full deterministic simulation snapshot: everything peers must agree
/// on bit-for-bit lives here, and nothing else.
///
/// Mutated exclusively by one tick step at a time; cloned wholesale when
/// prediction begins; replaced wholesale when a bootstrap snapshot is
/// adopted or prediction is rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorldState {
    /// Next entity id to hand out; never reused within one world
    pub next_id: u32,
    /// Last committed tick number
    pub tick: u32,
    /// Persisted RNG stream state; each tick derives its random draws from
    /// this value and commits a successor
    pub seed: u32,
    pub players: Vec<PlayerActor>,
    pub barrels: Vec<BarrelActor>,
    pub bullets: Vec<BulletActor>,
    pub items: Vec<ItemActor>,
    /// Per-client score lines, ordered by client id so snapshot encoding is
    /// reproducible on every peer
    pub stats: BTreeMap<ClientId, PlayerStat>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn push_player(&mut self, mut player: PlayerActor) -> usize {
        player.base.id = self.alloc_id();
        self.players.push(player);
        self.players.len() - 1
    }

    pub fn push_barrel(&mut self, mut barrel: BarrelActor) -> usize {
        barrel.id = self.alloc_id();
        self.barrels.push(barrel);
        self.barrels.len() - 1
    }

    pub fn push_bullet(&mut self, mut bullet: BulletActor) -> usize {
        bullet.base.id = self.alloc_id();
        self.bullets.push(bullet);
        self.bullets.len() - 1
    }

    pub fn push_item(&mut self, mut item: ItemActor) -> usize {
        item.base.id = self.alloc_id();
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn player_by_client(&self, client: ClientId) -> Option<&PlayerActor> {
        self.players.iter().find(|p| p.client == client)
    }

    pub fn player_index_by_client(&self, client: ClientId) -> Option<usize> {
        self.players.iter().position(|p| p.client == client)
    }

    pub fn stats_mut(&mut self, client: ClientId) -> &mut PlayerStat {
        self.stats.entry(client).or_default()
    }

    /// Count of living NPC-controlled players
    pub fn npc_count(&self) -> usize {
        self.players
            .iter()
            .filter(|p| p.client == 0 && p.base.hp > 0)
            .count()
    }

    /// Post-tick normalization: drop dead actors, sort every collection by
    /// id, clamp every numeric field to its bit range and clear transient
    /// flags. Runs at the end of every tick (not only before serialization)
    /// so peers converge on identical bit patterns. Idempotent.
    pub fn normalize(&mut self) {
        self.players.retain(|a| a.base.hp > 0);
        self.barrels.retain(|a| a.hp > 0);
        self.bullets.retain(|a| a.base.hp > 0);
        self.items.retain(|a| a.base.hp > 0);

        self.players.sort_by_key(|a| a.base.id);
        self.barrels.sort_by_key(|a| a.id);
        self.bullets.sort_by_key(|a| a.base.id);
        self.items.sort_by_key(|a| a.base.id);

        for p in &mut self.players {
            round_actor(&mut p.base);
        }
        for b in &mut self.barrels {
            round_actor(b);
        }
        for b in &mut self.bullets {
            round_actor(&mut b.base);
        }
        for i in &mut self.items {
            round_actor(&mut i.base);
        }
    }
}

/// Wrap/clamp one actor's numeric fields into their serialized bit ranges.
fn round_actor(a: &mut Actor) {
    a.x &= 0xffff;
    a.y &= 0xffff;
    a.z = a.z.clamp(0, 0xffff);
    a.u = a.u.clamp(-1024, 1024);
    a.v = a.v.clamp(-1024, 1024);
    a.w = a.w.clamp(-1024, 1024);
    a.hp = a.hp.min(15);
    a.sp = a.sp.min(15);
    a.anim_hit = a.anim_hit.min(ANIM_HIT_MAX);
    a.local_flags = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::actor::ActorKind;
    use proptest::prelude::*;

    fn barrel(id: u32, hp: u8) -> BarrelActor {
        Actor {
            id,
            kind: ActorKind::Barrel,
            hp,
            ..Actor::default()
        }
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let mut world = WorldState::new();
        let a = world.push_barrel(barrel(0, 1));
        let b = world.push_barrel(barrel(0, 1));
        assert!(world.barrels[a].id < world.barrels[b].id);
        assert_eq!(world.next_id, 2);
    }

    #[test]
    fn normalize_drops_dead_and_sorts() {
        let mut world = WorldState::new();
        world.push_barrel(barrel(0, 1));
        world.push_barrel(barrel(0, 0));
        world.push_barrel(barrel(0, 3));
        world.barrels.swap(0, 2);
        world.normalize();
        let ids: Vec<u32> = world.barrels.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut world = WorldState::new();
        let idx = world.push_barrel(barrel(0, 9));
        world.barrels[idx].x = -5;
        world.barrels[idx].u = 5000;
        world.barrels[idx].z = -77;
        world.normalize();
        let once = world.clone();
        world.normalize();
        assert_eq!(world, once);
    }

    proptest! {
        #[test]
        fn round_actor_idempotent(
            x in i32::MIN / 2..i32::MAX / 2,
            y in i32::MIN / 2..i32::MAX / 2,
            z in i32::MIN / 2..i32::MAX / 2,
            u in -5000i32..5000,
            v in -5000i32..5000,
            w in -5000i32..5000,
            hp in 0u8..=255,
            sp in 0u8..=255,
        ) {
            let mut a = Actor {
                x, y, z, u, v, w, hp, sp,
                anim_hit: 200,
                local_flags: 7,
                ..Actor::default()
            };
            round_actor(&mut a);
            let once = a;
            round_actor(&mut a);
            prop_assert_eq!(a, once);
            prop_assert!(a.x >= 0 && a.x <= 0xffff);
            prop_assert!(a.u >= -1024 && a.u <= 1024);
            prop_assert_eq!(a.local_flags, 0);
        }
    }
}
