//! Match state and authoritative tick loop

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GameSettings;
use crate::lobby::connection::Roster;
use crate::util::time::{tick_duration, within};
use crate::ws::protocol::{Animation, EndReason, PlayerAction, PlayerStateInfo, ServerMsg};

use super::combat::{
    animation_duration, CombatSystem, HammerAttack, HitResult, HAMMER, INVINCIBLE_DURATION,
    MAX_HEALTH, RESPAWN_DELAY,
};
use super::physics::{MoveIntent, PhysicsSystem};
use super::snapshot::SnapshotBuilder;
use super::Participant;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Ticking, waiting for every client to finish loading
    Loading,
    /// Countdown before start
    Countdown,
    /// Match clock running
    Running,
    /// Match ended
    Ended,
}

/// Lifecycle notifications for the owning Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
    Started,
    Finished { reason: EndReason },
    /// Post-match delay elapsed, the room can go back to waiting
    NewRound,
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: String,
    pub nickname: String,
    pub color: String,
    pub asset: String,

    // Position and orientation
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,

    // Combat
    pub score: u32,
    pub health: u32,
    pub alive: bool,
    pub invincible: bool,
    pub invincible_until: Option<Instant>,
    pub death_time: Option<Instant>,
    pub last_attack: Option<Instant>,
    pub last_hit: Option<Instant>,

    pub animation: Animation,
    pub animation_started: Instant,
    pub intent: MoveIntent,
    pub connected: bool,
}

impl PlayerState {
    /// Place a participant on the spawn ring
    pub fn spawn(participant: &Participant, index: usize, count: usize, now: Instant) -> Self {
        let (x, z, yaw) = PhysicsSystem::spawn_point(index, count);
        Self {
            id: participant.id.clone(),
            nickname: participant.nickname.clone(),
            color: participant.color.clone(),
            asset: participant.asset(),
            x,
            y: 0.0,
            z,
            yaw,
            pitch: 0.0,
            score: 0,
            health: MAX_HEALTH,
            alive: true,
            invincible: false,
            invincible_until: None,
            death_time: None,
            last_attack: None,
            last_hit: None,
            animation: Animation::Idle,
            animation_started: now,
            intent: MoveIntent::default(),
            connected: true,
        }
    }

    /// Inside the attack or hit lock window
    pub fn is_locked(&self, now: Instant) -> bool {
        within(self.last_attack, HAMMER.attack_lock, now)
            || within(self.last_hit, HAMMER.hit_lock, now)
    }

    fn can_be_hit(&self) -> bool {
        self.connected && self.alive && !self.invincible
    }

    fn set_animation(&mut self, animation: Animation, now: Instant) {
        self.animation = animation;
        self.animation_started = now;
    }

    fn locomotion(&self) -> Animation {
        if self.intent.is_moving() {
            Animation::WalkForward
        } else {
            Animation::Idle
        }
    }

    fn respawn(&mut self, now: Instant) {
        self.x = 0.0;
        self.y = 0.0;
        self.z = 0.0;
        self.health = MAX_HEALTH;
        self.alive = true;
        self.death_time = None;
        self.invincible = true;
        self.invincible_until = Some(now + INVINCIBLE_DURATION);
        self.set_animation(Animation::Respawn, now);
    }

    /// Returns true if the hit was lethal
    fn take_hit(&mut self, damage: u32, now: Instant) -> bool {
        let (health, killed) = CombatSystem::apply_damage(self.health, damage);
        self.health = health;
        self.last_hit = Some(now);

        if killed {
            self.alive = false;
            self.death_time = Some(now);
            self.intent = MoveIntent::default();
            self.set_animation(Animation::Death, now);
        } else {
            self.invincible = true;
            self.invincible_until = Some(now + INVINCIBLE_DURATION);
            self.set_animation(Animation::Hit, now);
        }
        killed
    }

    /// Timers and movement for one tick. Disconnected players are frozen.
    fn tick(&mut self, now: Instant) {
        if !self.connected {
            return;
        }

        if !self.alive
            && self
                .death_time
                .is_some_and(|t| now.saturating_duration_since(t) >= RESPAWN_DELAY)
        {
            self.respawn(now);
        }

        if let Some(duration) = animation_duration(self.animation) {
            if now.saturating_duration_since(self.animation_started) >= duration {
                self.set_animation(self.locomotion(), now);
            }
        }

        if self.invincible && self.invincible_until.map_or(true, |t| now >= t) {
            self.invincible = false;
            self.invincible_until = None;
        }

        if self.alive && !self.is_locked(now) {
            (self.x, self.z) = PhysicsSystem::integrate(self.x, self.z, self.intent);

            // looping animations follow the intent
            if animation_duration(self.animation).is_none() {
                let next = self.locomotion();
                if next != self.animation {
                    self.set_animation(next, now);
                }
            }
        }
    }
}

/// State behind the simulation lock
struct MatchState {
    phase: MatchPhase,
    players: BTreeMap<String, PlayerState>,
    attacks: Vec<HammerAttack>,
    started_at: Option<Instant>,
    attack_seq: u64,
}

impl MatchState {
    fn time_left(&self, now: Instant, duration: Duration) -> u64 {
        self.started_at
            .map(|t| duration.saturating_sub(now.saturating_duration_since(t)).as_secs())
            .unwrap_or(0)
    }

    fn is_time_up(&self, now: Instant, duration: Duration) -> bool {
        self.phase == MatchPhase::Running
            && self
                .started_at
                .is_some_and(|t| now.saturating_duration_since(t) >= duration)
    }

    /// Resolve every due attack once and drop it
    fn resolve_attacks(&mut self, now: Instant) -> Vec<HitResult> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.attacks)
            .into_iter()
            .partition(|a| a.is_due(now));
        self.attacks = pending;

        let mut hits = Vec::new();
        for attack in due {
            debug!(
                attack_id = %attack.id,
                color = %attack.color,
                delay_ms = now.duration_since(attack.created_at).as_millis() as u64,
                "Resolving hammer attack"
            );
            let targets: Vec<String> = self
                .players
                .values()
                .filter(|p| {
                    p.id != attack.attacker_id && p.can_be_hit() && attack.reaches(p.x, p.z)
                })
                .map(|p| p.id.clone())
                .collect();

            for target_id in targets {
                let Some(target) = self.players.get_mut(&target_id) else {
                    continue;
                };
                let target_killed = target.take_hit(HAMMER.damage, now);

                if target_killed {
                    if let Some(attacker) = self.players.get_mut(&attack.attacker_id) {
                        attacker.score += 1;
                    }
                }

                hits.push(HitResult {
                    attack_id: attack.id.clone(),
                    attacker_id: attack.attacker_id.clone(),
                    target_id,
                    target_killed,
                });
            }
        }
        hits
    }
}

/// The authoritative game match.
///
/// Shared between its own tick driver and the Session that forwards player
/// actions. Ticks and actions take the write lock, snapshots the read lock.
pub struct Simulation {
    room_id: String,
    settings: GameSettings,
    state: RwLock<MatchState>,
    stopped: AtomicBool,
    countdown_started: AtomicBool,
    stop_signal: Notify,
    /// Current room members, for broadcasts
    roster: watch::Receiver<Roster>,
    events: mpsc::Sender<MatchEvent>,
}

impl Simulation {
    /// Create a match seeded with the given participants
    pub fn new(
        room_id: String,
        participants: &[Participant],
        settings: GameSettings,
        roster: watch::Receiver<Roster>,
        events: mpsc::Sender<MatchEvent>,
    ) -> Arc<Self> {
        let now = Instant::now();
        let count = participants.len();
        let players = participants
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), PlayerState::spawn(p, i, count, now)))
            .collect();

        info!(room_id = %room_id, player_count = count, "Match created");

        Arc::new(Self {
            room_id,
            settings,
            state: RwLock::new(MatchState {
                phase: MatchPhase::Loading,
                players,
                attacks: Vec::new(),
                started_at: None,
                attack_seq: 0,
            }),
            stopped: AtomicBool::new(false),
            countdown_started: AtomicBool::new(false),
            stop_signal: Notify::new(),
            roster,
            events,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.state.read().players.contains_key(player_id)
    }

    /// Participants whose transport is still up
    pub fn connected_count(&self) -> usize {
        self.state
            .read()
            .players
            .values()
            .filter(|p| p.connected)
            .count()
    }

    pub fn asset_of(&self, player_id: &str) -> Option<String> {
        self.state
            .read()
            .players
            .get(player_id)
            .map(|p| p.asset.clone())
    }

    /// Initial roster for `game_init_data`
    pub fn roster_snapshot(&self) -> Vec<PlayerStateInfo> {
        SnapshotBuilder::players(&self.state.read().players)
    }

    /// Freeze or unfreeze a participant
    pub fn set_connected(&self, player_id: &str, connected: bool) {
        let mut state = self.state.write();
        if let Some(player) = state.players.get_mut(player_id) {
            player.connected = connected;
            if !connected {
                player.intent = MoveIntent::default();
            }
            debug!(room_id = %self.room_id, player_id, connected, "Player connection changed");
        }
    }

    /// Apply one player action. Ignored for unknown, disconnected or dead
    /// players and once the match is stopped.
    pub fn handle_action(&self, player_id: &str, action: &PlayerAction, now: Instant) {
        if self.is_stopped() {
            return;
        }

        let mut guard = self.state.write();
        let running = guard.phase == MatchPhase::Running;
        let MatchState {
            players,
            attacks,
            attack_seq,
            ..
        } = &mut *guard;

        let Some(player) = players.get_mut(player_id) else {
            debug!(room_id = %self.room_id, player_id, "Action from unknown player");
            return;
        };
        if !player.connected || !player.alive {
            return;
        }
        let locked = player.is_locked(now);

        match action {
            PlayerAction::Look(look) => {
                if locked {
                    return;
                }
                if let Some(yaw) = look.yaw {
                    player.yaw = yaw;
                }
                if let Some(pitch) = look.pitch {
                    player.pitch = PhysicsSystem::clamp_pitch(pitch);
                }
            }
            PlayerAction::Move(keys) => {
                if !running || locked {
                    return;
                }
                player.intent = MoveIntent::from(keys);
            }
            PlayerAction::Click(click) => {
                if locked {
                    return;
                }
                let Some(direction) = click.direction else {
                    return;
                };

                if running {
                    let magnitude = (direction.x * direction.x + direction.z * direction.z).sqrt();
                    let (dx, dz) = if magnitude > 0.0 {
                        (direction.x / magnitude, direction.z / magnitude)
                    } else {
                        (0.0, 0.0)
                    };
                    *attack_seq += 1;
                    attacks.push(HammerAttack::new(
                        format!("hammer_{}_{}", player.id, attack_seq),
                        player.id.clone(),
                        (player.x, player.z),
                        (dx, dz),
                        player.color.clone(),
                        now,
                    ));
                }

                player.last_attack = Some(now);
                player.intent = MoveIntent::default();
                player.set_animation(Animation::HammerAttack, now);
            }
        }
    }

    /// Run one simulation tick
    pub fn step(&self, now: Instant) -> Vec<HitResult> {
        let mut state = self.state.write();
        for player in state.players.values_mut() {
            player.tick(now);
        }
        state.resolve_attacks(now)
    }

    /// Current state update
    pub fn snapshot(&self, now: Instant) -> ServerMsg {
        let state = self.state.read();
        SnapshotBuilder::build(
            &state.players,
            state.time_left(now, self.settings.match_duration),
        )
    }

    /// Spawn the tick driver
    pub fn start(self: &Arc<Self>) {
        let sim = Arc::clone(self);
        tokio::spawn(async move { sim.run().await });
    }

    /// Run the authoritative tick loop until stopped or out of time
    async fn run(self: Arc<Self>) {
        info!(room_id = %self.room_id, "Tick driver started");

        let mut ticker = interval(tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop_signal.notified() => {}
            }
            if self.is_stopped() {
                break;
            }

            let now = Instant::now();
            for hit in self.step(now) {
                debug!(
                    room_id = %self.room_id,
                    attack_id = %hit.attack_id,
                    attacker_id = %hit.attacker_id,
                    target_id = %hit.target_id,
                    killed = hit.target_killed,
                    "Hammer hit"
                );
            }

            self.broadcast(&self.snapshot(now));
            let time_up = self
                .state
                .read()
                .is_time_up(now, self.settings.match_duration);

            if time_up {
                self.stop(EndReason::TimeUp);
                break;
            }
        }

        debug!(room_id = %self.room_id, "Tick driver stopped");
    }

    /// Start the pre-match countdown. Only the first call has an effect.
    pub fn begin_countdown(self: &Arc<Self>) -> bool {
        if self.is_stopped() || self.countdown_started.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.write().phase = MatchPhase::Countdown;

        let sim = Arc::clone(self);
        tokio::spawn(async move { sim.run_countdown().await });
        true
    }

    async fn run_countdown(self: Arc<Self>) {
        for seconds_left in (1..=self.settings.countdown_secs).rev() {
            if self.is_stopped() {
                return;
            }
            self.broadcast(&ServerMsg::GameCountdown { seconds_left });
            sleep(Duration::from_secs(1)).await;
        }

        {
            let mut state = self.state.write();
            if state.phase != MatchPhase::Countdown {
                return;
            }
            state.phase = MatchPhase::Running;
            state.started_at = Some(Instant::now());
        }

        info!(room_id = %self.room_id, "Match started");
        self.broadcast(&ServerMsg::GameStarted);
        self.notify(MatchEvent::Started);
    }

    /// End the match. Returns false if it was already stopped.
    pub fn stop(&self, reason: EndReason) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        let final_scores = {
            let mut state = self.state.write();
            state.phase = MatchPhase::Ended;
            state.attacks.clear();
            SnapshotBuilder::final_scores(&state.players)
        };
        self.stop_signal.notify_waiters();

        info!(room_id = %self.room_id, reason = %reason, "Match ended");
        self.broadcast(&ServerMsg::GameEnded {
            final_scores,
            reason,
        });
        self.notify(MatchEvent::Finished { reason });

        let events = self.events.clone();
        let delay = self.settings.post_match_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(MatchEvent::NewRound).await;
        });
        true
    }

    fn notify(&self, event: MatchEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(room_id = %self.room_id, error = %e, "Failed to notify session");
        }
    }

    /// Serialize once, fan out to every room member
    fn broadcast(&self, msg: &ServerMsg) {
        let frame = match msg.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Failed to serialize broadcast");
                return;
            }
        };
        for conn in self.roster.borrow().iter() {
            conn.send_frame(frame.clone());
        }
    }
}
