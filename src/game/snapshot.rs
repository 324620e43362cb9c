//! Snapshot building for network transmission

use std::collections::BTreeMap;

use crate::ws::protocol::{PlayerScore, PlayerStateInfo, ServerMsg};

use super::combat::MAX_HEALTH;
use super::PlayerState;

/// Turns authoritative player state into wire snapshots
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// One entry per player, in id order
    pub fn players(players: &BTreeMap<String, PlayerState>) -> Vec<PlayerStateInfo> {
        players.values().map(Self::player).collect()
    }

    pub fn player(p: &PlayerState) -> PlayerStateInfo {
        PlayerStateInfo {
            id: p.id.clone(),
            nickname: p.nickname.clone(),
            color: p.color.clone(),
            x: p.x,
            y: p.y,
            z: p.z,
            yaw: p.yaw,
            pitch: p.pitch,
            score: p.score,
            asset: p.asset.clone(),
            current_animation: p.animation,
            health: p.health,
            max_health: MAX_HEALTH,
            is_alive: p.alive,
            is_invincible: p.invincible,
        }
    }

    /// Per-tick state update
    pub fn build(players: &BTreeMap<String, PlayerState>, time_left: u64) -> ServerMsg {
        ServerMsg::GameStateUpdate {
            players: Self::players(players),
            time_left,
        }
    }

    /// Scores for the end-of-match message, best first.
    /// Ties keep id order.
    pub fn final_scores(players: &BTreeMap<String, PlayerState>) -> Vec<PlayerScore> {
        let mut scores: Vec<PlayerScore> = players
            .values()
            .map(|p| PlayerScore {
                player_id: p.id.clone(),
                nickname: p.nickname.clone(),
                score: p.score,
            })
            .collect();
        scores.sort_by(|a, b| b.score.cmp(&a.score));
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Participant;
    use tokio::time::Instant;

    fn roster() -> BTreeMap<String, PlayerState> {
        let now = Instant::now();
        ["b", "a", "c"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let participant = Participant {
                    id: id.to_string(),
                    nickname: format!("nick-{id}"),
                    color: "#FFFFFF".into(),
                    character: "onion".into(),
                };
                (id.to_string(), PlayerState::spawn(&participant, i, 3, now))
            })
            .collect()
    }

    #[test]
    fn snapshot_lists_every_player_in_id_order() {
        let players = roster();
        match SnapshotBuilder::build(&players, 42) {
            ServerMsg::GameStateUpdate { players, time_left } => {
                assert_eq!(time_left, 42);
                let ids: Vec<_> = players.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ids, ["a", "b", "c"]);
                assert!(players.iter().all(|p| p.health == MAX_HEALTH && p.is_alive));
                assert_eq!(players[0].asset, "onion.glb");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn final_scores_best_first() {
        let mut players = roster();
        players.get_mut("c").unwrap().score = 2;
        players.get_mut("b").unwrap().score = 1;

        let scores = SnapshotBuilder::final_scores(&players);
        let order: Vec<_> = scores.iter().map(|s| (s.player_id.as_str(), s.score)).collect();
        assert_eq!(order, [("c", 2), ("b", 1), ("a", 0)]);
    }
}
