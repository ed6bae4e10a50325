//! Gameplay configuration.
//!
//! Every tuning value the simulation consumes lives here and is injected
//! read-only into the session; the core never hardcodes gameplay numbers,
//! only the algorithms that consume them. Peers must load identical
//! configuration or their simulations diverge, which is why the whole tree
//! is plain serde data that can be shipped next to the game build.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::sim::actor::ActorKind;

/// World-level physics tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Downward acceleration per tick
    pub gravity: i32,
    /// Reduced gravity while a jumping player holds the jump input
    pub gravity_weak: i32,
}

/// Per-actor-kind physical stats
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActorStats {
    /// Collision radius in world units
    pub radius: i32,
    /// Center height above the ground plane, world units
    pub height: i32,
    /// Divisor applied to vertical velocity on ground bounce
    pub ground_loss: i32,
    /// Divisor applied to reflected velocity at world bounds and tiles
    pub bounds_loss: i32,
    /// Flat per-tick ground friction
    pub ground_friction: i32,
    /// Inverse mass for symmetric push-out (0 = immovable)
    pub inv_mass: f32,
}

/// Player spawn loadout and movement tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub hp: u8,
    pub sp: u8,
    pub mags: u8,
    /// Weapon ids a fresh spawn may start with (one is drawn at random)
    pub start_weapon: Vec<u8>,
    pub jump_vel: i32,
    pub run_vel: i32,
    pub walk_vel: i32,
}

/// Barrel population and loot tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrelConfig {
    pub init_count: u32,
    pub hp_min: u8,
    pub hp_max: u8,
    /// Percent chance a destroyed barrel drops a weapon
    pub drop_weapon_chance: u32,
    /// Lowest weapon id barrels may drop
    pub drop_weapon_min: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Lifetime counter; decremented every third tick, despawn at zero
    pub lifetime: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    pub init_count: u32,
}

/// One NPC difficulty level. Index 0 disables NPC spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcLevelConfig {
    /// Spawn period as a power of two: a spawn is attempted whenever
    /// `tick & ((1 << period) - 1) == 0`
    pub period: u32,
    /// NPC population cap
    pub max: u32,
    /// NPCs start with a weapon id below this bound
    pub init_weapon_len: u8,
}

/// Scoring rules applied on lethal hits and credit pickups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Score for killing a human-controlled player
    pub kill_player: u32,
    /// Score for killing an NPC
    pub kill_npc: u32,
}

/// How a weapon's projectiles behave once spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletKind {
    /// Short-lived close-range swing, still a simulated projectile
    Melee,
    /// Standard ballistic shell
    Shell,
    /// Bouncy energy bolt
    Plasma,
    /// Instantaneous ray resolved by raycast, visual-only trajectory
    Ray,
    /// Instantaneous ray that stops at the first hit
    Tracing,
}

impl BulletKind {
    pub fn is_instant(self) -> bool {
        matches!(self, BulletKind::Ray | BulletKind::Tracing)
    }
}

/// Per-bullet-kind tuning, indexed by `BulletKind`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BulletStats {
    /// How many targets an instantaneous ray may punch through
    pub ray_penetrations: u8,
}

/// One entry of the weapon table. Index 0 is the reserved "unarmed" slot and
/// is never fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponConfig {
    pub name: String,
    /// Rounds per clip; 0 means the weapon never reloads
    pub clip_size: u8,
    /// Ticks a clip reload takes
    pub clip_reload: u8,
    /// Ticks between shots while the trigger is held
    pub reload_time: u8,
    /// Fire-timer value eased back toward while the trigger is released
    pub launch_time: u8,
    /// Easing speed for the above
    pub relaunch_speed: u8,
    /// Upper bound of the sustained-fire spread counter
    pub detune_speed: u8,
    /// Base angular jitter per shot, radians
    pub angle_var: f32,
    /// Extra spread scaled by the detune counter, radians
    pub angle_spread: f32,
    /// Recoil applied to the shooter, world units per tick
    pub kick_back: i32,
    /// Muzzle offset from the player center, world units
    pub offset: i32,
    /// Projectile speed, world units per tick
    pub velocity: i32,
    /// Random speed jitter span
    pub velocity_var: i32,
    /// Projectiles per trigger pull
    pub spawn_count: u8,
    pub bullet_kind: BulletKind,
    pub bullet_damage: u8,
    /// Projectile penetration hit-points (bounces while above zero)
    pub bullet_hp: u8,
    /// Projectile lifetime in ticks
    pub bullet_lifetime: u8,
    /// Percent chance of a double-damage critical hit
    pub crit_chance: u32,
    /// Movement speed multiplier while carried
    pub move_weight_k: f32,
}

/// Network timing knobs shared by every peer of a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Ticks a local input is deferred before it applies
    pub input_delay: u32,
    /// Upper bound on speculative prediction ticks per frame
    pub prediction_max: u32,
    /// Master switch for the prediction controller
    pub prediction: bool,
    /// Frames a ready peer may stay unreachable before the session
    /// surfaces a terminal disconnect
    pub peer_timeout_frames: u32,
}

/// Root configuration object injected into every [`crate::GameSession`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub world: WorldConfig,
    /// Indexed by [`ActorKind`]: Player, Barrel, Bullet, Item, Tree
    pub actors: [ActorStats; 5],
    pub player: PlayerConfig,
    pub barrels: BarrelConfig,
    pub items: ItemConfig,
    pub trees: TreeConfig,
    pub npc: Vec<NpcLevelConfig>,
    pub score: ScoreConfig,
    pub weapons: Vec<WeaponConfig>,
    /// Indexed by [`BulletKind`]
    pub bullets: [BulletStats; 5],
    pub net: NetConfig,
}

impl GameConfig {
    /// Load configuration from a JSON file and validate cross-references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: GameConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn actor_stats(&self, kind: ActorKind) -> &ActorStats {
        &self.actors[kind as usize]
    }

    pub fn bullet_stats(&self, kind: BulletKind) -> &BulletStats {
        &self.bullets[kind as usize]
    }

    /// Weapon lookup. An id beyond the table is a configuration or version
    /// mismatch between peers: loudly asserted in development, absorbed as
    /// "no weapon" in release so a tick can never abort.
    pub fn weapon(&self, id: u8) -> Option<&WeaponConfig> {
        let weapon = self.weapons.get(id as usize);
        debug_assert!(
            weapon.is_some(),
            "weapon id {id} outside configured table ({})",
            self.weapons.len()
        );
        weapon
    }

    /// Reject configurations whose cross-references point outside their
    /// tables; a desync is guaranteed if peers disagree here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weapons = self.weapons.len();
        if weapons == 0 {
            return Err(ConfigError::EmptyWeaponTable);
        }
        if self.player.start_weapon.is_empty() {
            return Err(ConfigError::InvalidRange("player.start_weapon"));
        }
        for &id in &self.player.start_weapon {
            if id as usize >= weapons {
                return Err(ConfigError::WeaponIdOutOfRange(id));
            }
        }
        for level in &self.npc {
            if level.init_weapon_len as usize > weapons {
                return Err(ConfigError::WeaponIdOutOfRange(level.init_weapon_len));
            }
        }
        if (self.barrels.drop_weapon_min as usize) >= weapons {
            return Err(ConfigError::WeaponIdOutOfRange(self.barrels.drop_weapon_min));
        }
        if self.barrels.hp_max < self.barrels.hp_min {
            return Err(ConfigError::InvalidRange("barrels.hp"));
        }
        if self.net.tick_rate == 0 {
            return Err(ConfigError::InvalidRange("net.tick_rate"));
        }
        Ok(())
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig {
                gravity: 5,
                gravity_weak: 2,
            },
            actors: [
                // Player
                ActorStats {
                    radius: 640,
                    height: 320,
                    ground_loss: 2,
                    bounds_loss: 2,
                    ground_friction: 0,
                    inv_mass: 1.0,
                },
                // Barrel
                ActorStats {
                    radius: 640,
                    height: 256,
                    ground_loss: 2,
                    bounds_loss: 2,
                    ground_friction: 8,
                    inv_mass: 1.0,
                },
                // Bullet
                ActorStats {
                    radius: 128,
                    height: 0,
                    ground_loss: 1,
                    bounds_loss: 1,
                    ground_friction: 0,
                    inv_mass: 0.0,
                },
                // Item
                ActorStats {
                    radius: 640,
                    height: 0,
                    ground_loss: 2,
                    bounds_loss: 2,
                    ground_friction: 2,
                    inv_mass: 0.0,
                },
                // Tree
                ActorStats {
                    radius: 768,
                    height: 640,
                    ground_loss: 1,
                    bounds_loss: 1,
                    ground_friction: 0,
                    inv_mass: 0.0,
                },
            ],
            player: PlayerConfig {
                hp: 10,
                sp: 0,
                mags: 3,
                start_weapon: vec![1, 2, 3],
                jump_vel: 80,
                run_vel: 120,
                walk_vel: 60,
            },
            barrels: BarrelConfig {
                init_count: 32,
                hp_min: 3,
                hp_max: 7,
                drop_weapon_chance: 30,
                drop_weapon_min: 4,
            },
            items: ItemConfig { lifetime: 200 },
            trees: TreeConfig { init_count: 64 },
            npc: vec![
                NpcLevelConfig {
                    period: 0,
                    max: 0,
                    init_weapon_len: 1,
                },
                NpcLevelConfig {
                    period: 7,
                    max: 4,
                    init_weapon_len: 2,
                },
                NpcLevelConfig {
                    period: 6,
                    max: 8,
                    init_weapon_len: 4,
                },
                NpcLevelConfig {
                    period: 5,
                    max: 13,
                    init_weapon_len: 8,
                },
            ],
            score: ScoreConfig {
                kill_player: 5,
                kill_npc: 1,
            },
            weapons: default_weapons(),
            bullets: [
                // Melee
                BulletStats { ray_penetrations: 0 },
                // Shell
                BulletStats { ray_penetrations: 0 },
                // Plasma
                BulletStats { ray_penetrations: 0 },
                // Ray
                BulletStats { ray_penetrations: 2 },
                // Tracing
                BulletStats { ray_penetrations: 1 },
            ],
            net: NetConfig {
                tick_rate: 60,
                input_delay: 8,
                prediction_max: 8,
                prediction: true,
                // five minutes of frames at the default tick rate
                peer_timeout_frames: 5 * 60 * 60,
            },
        }
    }
}

fn default_weapons() -> Vec<WeaponConfig> {
    let base = WeaponConfig {
        name: String::new(),
        clip_size: 0,
        clip_reload: 0,
        reload_time: 0,
        launch_time: 0,
        relaunch_speed: 0,
        detune_speed: 1,
        angle_var: 0.0,
        angle_spread: 0.0,
        kick_back: 0,
        offset: 0,
        velocity: 0,
        velocity_var: 0,
        spawn_count: 1,
        bullet_kind: BulletKind::Melee,
        bullet_damage: 0,
        bullet_hp: 0,
        bullet_lifetime: 0,
        crit_chance: 0,
        move_weight_k: 1.0,
    };
    vec![
        // 0: reserved "unarmed" slot
        WeaponConfig {
            name: "none".into(),
            ..base.clone()
        },
        WeaponConfig {
            name: "knife".into(),
            reload_time: 14,
            launch_time: 2,
            relaunch_speed: 2,
            offset: 1024,
            velocity: 300,
            bullet_damage: 2,
            bullet_hp: 1,
            bullet_lifetime: 2,
            crit_chance: 10,
            ..base.clone()
        },
        WeaponConfig {
            name: "pistol".into(),
            clip_size: 9,
            clip_reload: 60,
            reload_time: 20,
            launch_time: 4,
            relaunch_speed: 4,
            detune_speed: 8,
            angle_var: 0.04,
            angle_spread: 0.1,
            kick_back: 16,
            offset: 1088,
            velocity: 448,
            spawn_count: 1,
            bullet_kind: BulletKind::Shell,
            bullet_damage: 3,
            bullet_hp: 1,
            bullet_lifetime: 45,
            crit_chance: 5,
            move_weight_k: 0.95,
            ..base.clone()
        },
        WeaponConfig {
            name: "smg".into(),
            clip_size: 30,
            clip_reload: 80,
            reload_time: 5,
            launch_time: 1,
            relaunch_speed: 4,
            detune_speed: 16,
            angle_var: 0.06,
            angle_spread: 0.25,
            kick_back: 8,
            offset: 1152,
            velocity: 512,
            velocity_var: 32,
            bullet_kind: BulletKind::Shell,
            bullet_damage: 2,
            bullet_hp: 1,
            bullet_lifetime: 40,
            crit_chance: 3,
            move_weight_k: 0.9,
            ..base.clone()
        },
        WeaponConfig {
            name: "shotgun".into(),
            clip_size: 2,
            clip_reload: 90,
            reload_time: 35,
            launch_time: 6,
            relaunch_speed: 2,
            detune_speed: 4,
            angle_var: 0.3,
            kick_back: 48,
            offset: 1216,
            velocity: 448,
            velocity_var: 64,
            spawn_count: 5,
            bullet_kind: BulletKind::Shell,
            bullet_damage: 2,
            bullet_hp: 2,
            bullet_lifetime: 18,
            crit_chance: 5,
            move_weight_k: 0.85,
            ..base.clone()
        },
        WeaponConfig {
            name: "plasma".into(),
            clip_size: 20,
            clip_reload: 70,
            reload_time: 8,
            launch_time: 2,
            relaunch_speed: 4,
            detune_speed: 12,
            angle_var: 0.08,
            angle_spread: 0.15,
            kick_back: 8,
            offset: 1152,
            velocity: 420,
            bullet_kind: BulletKind::Plasma,
            bullet_damage: 1,
            bullet_hp: 2,
            bullet_lifetime: 70,
            crit_chance: 10,
            move_weight_k: 0.9,
            ..base.clone()
        },
        WeaponConfig {
            name: "railgun".into(),
            clip_size: 5,
            clip_reload: 120,
            reload_time: 45,
            launch_time: 10,
            relaunch_speed: 1,
            detune_speed: 1,
            kick_back: 64,
            offset: 1216,
            velocity: 640,
            bullet_kind: BulletKind::Ray,
            bullet_damage: 5,
            bullet_hp: 1,
            bullet_lifetime: 6,
            crit_chance: 15,
            move_weight_k: 0.8,
            ..base
        },
    ]
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("weapon table is empty")]
    EmptyWeaponTable,

    #[error("weapon id {0} references outside the configured table")]
    WeaponIdOutOfRange(u8),

    #[error("invalid range for {0}")]
    InvalidRange(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        GameConfig::default().validate().expect("default config");
    }

    #[test]
    fn rejects_dangling_weapon_refs() {
        let mut config = GameConfig::default();
        config.player.start_weapon.push(200);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeaponIdOutOfRange(200))
        ));
    }

    #[test]
    fn json_round_trips() {
        let config = GameConfig::default();
        let text = serde_json::to_string(&config).expect("serialize");
        let back: GameConfig = serde_json::from_str(&text).expect("parse");
        back.validate().expect("still valid");
        assert_eq!(back.weapons.len(), config.weapons.len());
    }
}
