//! Combat system - hammer attacks, damage, hit detection

use std::time::Duration;

use tokio::time::Instant;

use crate::ws::protocol::Animation;

use super::physics::PhysicsSystem;

/// Hammer tuning
#[derive(Debug, Clone, Copy)]
pub struct HammerStats {
    /// Strike distance in front of the attacker, and hit radius around that point
    pub range: f64,
    /// Damage per hit
    pub damage: u32,
    /// Delay between the swing and hit resolution
    pub resolve_delay: Duration,
    /// Attacker cannot move, rotate or swing again for this long
    pub attack_lock: Duration,
    /// A struck player cannot move, rotate or swing for this long
    pub hit_lock: Duration,
}

pub const HAMMER: HammerStats = HammerStats {
    range: 3.0,
    damage: 1,
    resolve_delay: Duration::from_millis(50),
    attack_lock: Duration::from_millis(500),
    hit_lock: Duration::from_millis(1000),
};

pub const MAX_HEALTH: u32 = 3;
pub const RESPAWN_DELAY: Duration = Duration::from_secs(3);
pub const INVINCIBLE_DURATION: Duration = Duration::from_millis(2000);

/// How long a transient animation plays before falling back to idle/walk.
/// `None` for the looping ones.
pub fn animation_duration(animation: Animation) -> Option<Duration> {
    match animation {
        Animation::Idle | Animation::WalkForward => None,
        Animation::HammerAttack => Some(HAMMER.attack_lock),
        Animation::Hit => Some(HAMMER.hit_lock),
        Animation::Death => Some(Duration::from_millis(3000)),
        Animation::Respawn => Some(Duration::from_millis(500)),
    }
}

/// A pending hammer swing
#[derive(Debug, Clone)]
pub struct HammerAttack {
    pub id: String,
    pub attacker_id: String,
    /// Attacker position at swing time
    pub x: f64,
    pub z: f64,
    pub direction_x: f64,
    pub direction_z: f64,
    pub created_at: Instant,
    pub resolve_at: Instant,
    /// Cosmetic
    pub color: String,
}

impl HammerAttack {
    pub fn new(
        id: String,
        attacker_id: String,
        origin: (f64, f64),
        direction: (f64, f64),
        color: String,
        now: Instant,
    ) -> Self {
        Self {
            id,
            attacker_id,
            x: origin.0,
            z: origin.1,
            direction_x: direction.0,
            direction_z: direction.1,
            created_at: now,
            resolve_at: now + HAMMER.resolve_delay,
            color,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.resolve_at
    }

    /// Where the hammer lands
    pub fn strike_point(&self) -> (f64, f64) {
        (
            self.x + self.direction_x * HAMMER.range,
            self.z + self.direction_z * HAMMER.range,
        )
    }

    /// Check whether a target position is inside the strike radius
    pub fn reaches(&self, target_x: f64, target_z: f64) -> bool {
        let (sx, sz) = self.strike_point();
        PhysicsSystem::distance(sx, sz, target_x, target_z) <= HAMMER.range
    }
}

/// Combat system for damage bookkeeping
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: u32, damage: u32) -> (u32, bool) {
        let new_health = current_health.saturating_sub(damage);
        (new_health, new_health == 0)
    }
}

/// Outcome of one attack against one target
#[derive(Debug, Clone, PartialEq)]
pub struct HitResult {
    pub attack_id: String,
    pub attacker_id: String,
    pub target_id: String,
    pub target_killed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attack(origin: (f64, f64), direction: (f64, f64)) -> HammerAttack {
        HammerAttack::new(
            "hammer_a_1".into(),
            "a".into(),
            origin,
            direction,
            "#FFFFFF".into(),
            Instant::now(),
        )
    }

    #[test]
    fn strike_point_is_range_ahead() {
        let a = attack((1.0, 2.0), (0.0, -1.0));
        assert_eq!(a.strike_point(), (1.0, -1.0));
    }

    #[test]
    fn reach_is_range_around_strike_point() {
        let a = attack((0.0, 0.0), (1.0, 0.0));
        assert!(a.reaches(3.0, 0.0));
        assert!(a.reaches(6.0, 0.0));
        assert!(!a.reaches(10.0, 0.0));
        assert!(!a.reaches(-1.0, 0.0));
    }

    #[test]
    fn resolves_after_delay() {
        let a = attack((0.0, 0.0), (1.0, 0.0));
        assert!(!a.is_due(a.created_at));
        assert!(!a.is_due(a.created_at + Duration::from_millis(49)));
        assert!(a.is_due(a.created_at + HAMMER.resolve_delay));
    }

    #[test]
    fn damage_never_underflows() {
        assert_eq!(CombatSystem::apply_damage(3, 1), (2, false));
        assert_eq!(CombatSystem::apply_damage(1, 1), (0, true));
        assert_eq!(CombatSystem::apply_damage(0, 5), (0, true));
    }

    #[test]
    fn transient_animations_expire() {
        assert_eq!(animation_duration(Animation::Idle), None);
        assert_eq!(
            animation_duration(Animation::HammerAttack),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            animation_duration(Animation::Death),
            Some(Duration::from_secs(3))
        );
    }
}
