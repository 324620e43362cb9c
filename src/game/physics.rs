//! Arena movement and boundary constraints

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use crate::ws::protocol::MoveData;

/// Arena half-size (the floor spans -20..20 on both axes)
pub const ARENA_HALF_SIZE: f64 = 20.0;
/// Distance kept between players and the arena edge
pub const ARENA_MARGIN: f64 = 1.0;
/// Distance covered per tick at full input
pub const PLAYER_SPEED: f64 = 0.5;
/// Radius of the spawn ring around the origin
pub const SPAWN_RADIUS: f64 = 10.0;

/// Movement intention, each axis in {-1, 0, 1}
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    pub forward: f64,
    pub strafe: f64,
}

impl MoveIntent {
    pub fn is_moving(&self) -> bool {
        self.forward != 0.0 || self.strafe != 0.0
    }
}

impl From<&MoveData> for MoveIntent {
    /// Forward wins over backward, right over left.
    fn from(keys: &MoveData) -> Self {
        let forward = if keys.forward == 1.0 {
            1.0
        } else if keys.backward == 1.0 {
            -1.0
        } else {
            0.0
        };
        let strafe = if keys.right == 1.0 {
            -1.0
        } else if keys.left == 1.0 {
            1.0
        } else {
            0.0
        };
        Self { forward, strafe }
    }
}

/// Physics system for player kinematics
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Per-tick displacement for an intent, in arena axes.
    /// Forward maps to -z and strafe to -x; the vector is normalized before
    /// scaling so diagonals are not faster.
    pub fn displacement(intent: MoveIntent, speed: f64) -> (f64, f64) {
        let dx = -intent.strafe;
        let dz = -intent.forward;
        let magnitude = (dx * dx + dz * dz).sqrt();
        if magnitude == 0.0 {
            return (0.0, 0.0);
        }
        (dx / magnitude * speed, dz / magnitude * speed)
    }

    /// Clamp a coordinate to the arena's inner boundary
    pub fn clamp_to_arena(v: f64) -> f64 {
        let limit = ARENA_HALF_SIZE - ARENA_MARGIN;
        v.clamp(-limit, limit)
    }

    /// Apply one tick of movement. Returns the new (x, z).
    pub fn integrate(x: f64, z: f64, intent: MoveIntent) -> (f64, f64) {
        let (dx, dz) = Self::displacement(intent, PLAYER_SPEED);
        (Self::clamp_to_arena(x + dx), Self::clamp_to_arena(z + dz))
    }

    /// Pitch is limited to straight up / straight down
    pub fn clamp_pitch(pitch: f64) -> f64 {
        pitch.clamp(-FRAC_PI_2, FRAC_PI_2)
    }

    /// Evenly spaced spawn point on the ring, facing the centre.
    /// Returns (x, z, yaw).
    pub fn spawn_point(index: usize, count: usize) -> (f64, f64, f64) {
        let step = TAU / count.max(1) as f64;
        let angle = index as f64 * step;
        (SPAWN_RADIUS * angle.cos(), SPAWN_RADIUS * angle.sin(), PI - angle)
    }

    /// Horizontal distance between two points
    pub fn distance(x1: f64, z1: f64, x2: f64, z2: f64) -> f64 {
        let dx = x2 - x1;
        let dz = z2 - z1;
        (dx * dx + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn intent(forward: f64, strafe: f64) -> MoveIntent {
        MoveIntent { forward, strafe }
    }

    #[test]
    fn diagonal_is_not_faster() {
        let (sx, sz) = PhysicsSystem::displacement(intent(1.0, 0.0), PLAYER_SPEED);
        let single = (sx * sx + sz * sz).sqrt();
        for (f, s) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
            let (dx, dz) = PhysicsSystem::displacement(intent(f, s), PLAYER_SPEED);
            let diagonal = (dx * dx + dz * dz).sqrt();
            assert!((diagonal - single).abs() < EPS, "intent ({f}, {s})");
        }
        assert!((single - PLAYER_SPEED).abs() < EPS);
    }

    #[test]
    fn forward_moves_towards_negative_z() {
        let (x, z) = PhysicsSystem::integrate(0.0, 0.0, intent(1.0, 0.0));
        assert_eq!(x, 0.0);
        assert!((z + PLAYER_SPEED).abs() < EPS);
    }

    #[test]
    fn idle_intent_does_not_move() {
        assert_eq!(PhysicsSystem::integrate(3.0, -4.0, intent(0.0, 0.0)), (3.0, -4.0));
    }

    #[test]
    fn position_stays_inside_arena() {
        let limit = ARENA_HALF_SIZE - ARENA_MARGIN;
        let intents = [(1.0, 0.0), (-1.0, 1.0), (0.0, -1.0), (1.0, 1.0)];
        for (f, s) in intents {
            let (mut x, mut z) = (0.0, 0.0);
            for _ in 0..200 {
                (x, z) = PhysicsSystem::integrate(x, z, intent(f, s));
                assert!(x.abs() <= limit && z.abs() <= limit);
            }
        }
    }

    #[test]
    fn keys_to_intent() {
        let keys = MoveData {
            forward: 1.0,
            backward: 1.0,
            left: 1.0,
            right: 0.0,
        };
        assert_eq!(MoveIntent::from(&keys), intent(1.0, 1.0));

        let keys = MoveData {
            backward: 1.0,
            right: 1.0,
            ..MoveData::default()
        };
        assert_eq!(MoveIntent::from(&keys), intent(-1.0, -1.0));
        assert!(!MoveIntent::from(&MoveData::default()).is_moving());
    }

    #[test]
    fn spawn_ring_faces_centre() {
        let (x, z, yaw) = PhysicsSystem::spawn_point(0, 4);
        assert!((x - SPAWN_RADIUS).abs() < EPS && z.abs() < EPS);
        assert!((yaw - PI).abs() < EPS);

        let (x, z, _) = PhysicsSystem::spawn_point(2, 4);
        assert!((x + SPAWN_RADIUS).abs() < EPS && z.abs() < 1e-6);
    }

    #[test]
    fn pitch_is_clamped() {
        assert_eq!(PhysicsSystem::clamp_pitch(3.0), FRAC_PI_2);
        assert_eq!(PhysicsSystem::clamp_pitch(-3.0), -FRAC_PI_2);
        assert_eq!(PhysicsSystem::clamp_pitch(0.25), 0.25);
    }
}
