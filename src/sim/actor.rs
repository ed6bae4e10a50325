//! Entity records making up the world snapshot.
//!
//! All fields are integers with documented bit ranges: the snapshot must be
//! bit-identical across peers, so nothing here ever holds a float.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::ANIM_HIT_MAX;

/// Network peer / player owner identifier. Zero means "no client":
/// NPC-controlled players carry 0.
pub type ClientId = i32;

/// Simulated entity kinds. Trees are static map decorations: they collide
/// and block rays but are never part of the networked snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActorKind {
    #[default]
    Player = 0,
    Barrel = 1,
    Bullet = 2,
    Item = 3,
    Tree = 4,
}

/// Item subtype values. The low three bits select a consumable, bit 3 marks
/// a dropped weapon; a weapon item whose low bits equal `AMMO` also carries
/// a spare magazine.
pub mod item_type {
    pub const HP: u8 = 0;
    pub const HP2: u8 = 1;
    pub const CREDIT: u8 = 2;
    pub const CREDIT2: u8 = 3;
    pub const SHIELD: u8 = 4;
    pub const AMMO: u8 = 5;
    pub const WEAPON: u8 = 8;
    pub const SUB_TYPE_MASK: u8 = 7;
}

/// Common entity record embedded in every kind-specific actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actor {
    /// Unique, strictly increasing within one world
    pub id: u32,
    pub kind: ActorKind,
    /// Weapon id for bullets, item subtype for items, graphic variant for
    /// trees and barrels
    pub subtype: u8,
    // Position, 16-bit world units (x/y wrap, z clamps)
    pub x: i32,
    pub y: i32,
    pub z: i32,
    // Velocity, clamped to [-1024, 1024] world units per tick
    pub u: i32,
    pub v: i32,
    pub w: i32,
    /// Health, 0..=15; an actor at 0 is removed at the end of the tick
    pub hp: u8,
    /// Shield, 0..=15; absorbs damage before health
    pub sp: u8,
    /// Multi-purpose timer: fire interval for players, time-to-live for
    /// bullets, decay counter for items
    pub lifetime: u8,
    /// Static per-entity animation seed
    pub anim0: u8,
    /// Hit-feedback timer, decays by 2 every tick. Items may not be picked
    /// up while it is above zero.
    pub anim_hit: u8,
    /// Scratch flags valid only inside one simulation step; never persisted,
    /// never serialized
    pub local_flags: u32,
}

impl Actor {
    pub fn new(kind: ActorKind, rng: &mut ChaCha8Rng) -> Self {
        Self {
            kind,
            hp: 1,
            anim0: rng.gen_range(0..0x100) as u8,
            anim_hit: ANIM_HIT_MAX,
            ..Self::default()
        }
    }
}

/// A player (human- or NPC-controlled)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerActor {
    pub base: Actor,
    /// Owning client, 0 for NPCs
    pub client: ClientId,
    /// Packed input bitfield (see [`crate::sim::input`]); also the wire format
    pub input: u32,
    /// Press-edge bits, one per one-shot action already fired this hold
    pub trig: u8,
    /// Spare magazines, 0..=10
    pub mags: u8,
    /// Sustained-fire spread counter
    pub detune: u8,
    /// Ticks left on the current clip reload
    pub clip_reload: u8,
    /// Active weapon slot and its loaded rounds
    pub weapon: u8,
    pub clip_ammo: u8,
    /// Holstered weapon slot
    pub weapon2: u8,
    pub clip_ammo2: u8,
}

impl PlayerActor {
    pub fn new(rng: &mut ChaCha8Rng) -> Self {
        Self {
            base: Actor::new(ActorKind::Player, rng),
            ..Self::default()
        }
    }
}

/// Barrels have no extra state beyond the common record
pub type BarrelActor = Actor;

/// A projectile in flight (or an instantaneous ray being displayed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulletActor {
    pub base: Actor,
    /// Positive: firing client id. Negative: negated entity id of the
    /// NPC that fired, so friendly-fire checks need no second field.
    pub owner: i32,
    /// Visual end point for instantaneous ray weapons
    pub ray_end: Option<(i32, i32)>,
}

impl BulletActor {
    pub fn new(owner: i32, weapon: u8, rng: &mut ChaCha8Rng) -> Self {
        let mut base = Actor::new(ActorKind::Bullet, rng);
        base.subtype = weapon;
        Self {
            base,
            owner,
            ray_end: None,
        }
    }
}

/// A pickup on the ground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemActor {
    pub base: Actor,
    /// Weapon id when this item is a dropped weapon
    pub item_weapon: u8,
    /// Rounds loaded in the dropped weapon
    pub item_weapon_ammo: u8,
}

impl ItemActor {
    pub fn new(subtype: u8, lifetime: u8, rng: &mut ChaCha8Rng) -> Self {
        let mut base = Actor::new(ActorKind::Item, rng);
        base.subtype = subtype;
        base.lifetime = lifetime;
        base.anim_hit = ANIM_HIT_MAX;
        Self {
            base,
            item_weapon: 0,
            item_weapon_ammo: 0,
        }
    }

    /// True when the weapon item still carries its spare magazine
    pub fn contains_ammo(&self) -> bool {
        self.base.subtype & item_type::SUB_TYPE_MASK == item_type::AMMO
    }
}

/// Per-client score line, part of the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerStat {
    pub frags: u32,
    pub scores: u32,
}
