use crate::config::ServerConfig;
use crate::player::{Player, PlayerId, SessionId};
use crate::recorder::RoundRecorder;
use crate::utils::assign_colors;
use bytes::Bytes;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::fast_forward::FastForwardLog;
use shared::field::Field;
use shared::movement::Move;
use shared::params::GameParams;
use shared::protocol::{
    FastForward, PlayerIntro, Rgb, ScoreLine, ServerMessage, ServerMoves, StartEntry, StartRound,
};
use shared::trail::{Arena, Trail};
use std::collections::BTreeMap;

/// Largest roster a round start message can describe.
pub const MAX_ROSTER: usize = u8::MAX as usize;

const SPAWN_MIN: u16 = 2048;
const SPAWN_MAX: u16 = 63488;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nobody to play with.
    Idle,
    /// A new round was set up; frame 0 starts now.
    Started,
    Advanced,
}

/// Something the session layer has to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    RoundStarted { game_id: u32 },
    Broadcast { payload: Bytes, reliable: bool },
}

pub struct Game {
    params: GameParams,
    victory_frames: u32,
    players: BTreeMap<PlayerId, Player>,
    next_player_id: PlayerId,

    phase: Phase,
    game_id: u32,
    frame: u32,
    deadline: Option<u32>,
    roster: Vec<PlayerId>,
    alive: usize,
    arena: Arena,
    start_payload: Option<Bytes>,

    rng: StdRng,
    recorder: Box<dyn RoundRecorder>,
    events: Vec<GameEvent>,
}

impl Game {
    pub fn new(config: &ServerConfig, recorder: Box<dyn RoundRecorder>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            params: config.game_params(),
            victory_frames: config.victory_frames(),
            players: BTreeMap::new(),
            next_player_id: 1,
            phase: Phase::Idle,
            game_id: 0,
            frame: 0,
            deadline: None,
            roster: Vec::new(),
            alive: 0,
            arena: Arena::new(),
            start_payload: None,
            rng,
            recorder,
            events: Vec::new(),
        }
    }

    pub fn params(&self) -> &GameParams {
        &self.params
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn game_id(&self) -> u32 {
        self.game_id
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn deadline(&self) -> Option<u32> {
        self.deadline
    }

    pub fn alive_count(&self) -> usize {
        self.alive
    }

    pub fn roster(&self) -> &[PlayerId] {
        &self.roster
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn field(&self) -> &Field {
        self.arena.trails()
    }

    /// Players of the current round in the order their windows appear in
    /// a MOVE message from `ids`' owner.
    pub fn in_round<'a>(&'a self, ids: &'a [PlayerId]) -> impl Iterator<Item = PlayerId> + 'a {
        ids.iter()
            .copied()
            .filter(move |id| self.players.get(id).map_or(false, |p| p.index().is_some()))
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.players
            .values()
            .any(|p| p.is_connected() && p.name() == name)
    }

    pub fn add_player(&mut self, session: SessionId, intro: &PlayerIntro) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        let player = Player::new(id, session, intro.name.clone(), intro.flags, &self.params);
        info!("Player {} ({}) joined with session {}", id, player.name(), session);
        self.players.insert(id, player);
        id
    }

    /// Kills the player for the rest of the round and forgets it once the
    /// round no longer refers to it.
    pub fn disconnect_player(&mut self, id: PlayerId) {
        let (ts, in_round) = match self.players.get_mut(&id) {
            Some(player) => {
                player.mark_disconnected();
                (player.timestamp(), player.index().is_some())
            }
            None => return,
        };

        if in_round {
            self.kill(id, ts, "disconnected");
        } else {
            self.players.remove(&id);
        }
    }

    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_current(&self, game_id: u32) -> bool {
        self.is_running() && self.game_id == game_id
    }

    /// Hands a client window to the player's queue. A window the player
    /// cannot keep up with kills it.
    pub fn queue_moves(&mut self, id: PlayerId, timestamp: u32, window: &[Move]) {
        let (result, ts, name) = match self.players.get_mut(&id) {
            Some(player) => (
                player.ingest(timestamp, window),
                player.timestamp(),
                player.name().to_string(),
            ),
            None => return,
        };

        match result {
            Ok(0) => {}
            Ok(added) => debug!("Queued {} moves for {} up to frame {}", added, name, timestamp),
            Err(desync) => {
                warn!("Player {} out of sync at frame {}: {}", name, self.frame, desync);
                self.desync_kill(id, ts, &name);
            }
        }
    }

    pub fn tick(&mut self) -> Tick {
        let restart = match self.phase {
            Phase::Idle => true,
            Phase::Running => match self.deadline {
                Some(deadline) => self.frame >= deadline,
                None => self.alive == 0,
            },
        };

        if restart {
            if self.phase == Phase::Running {
                self.finish_round();
            }
            return if self.restart() { Tick::Started } else { Tick::Idle };
        }

        self.frame += 1;
        self.step_players();
        Tick::Advanced
    }

    fn step_players(&mut self) {
        let frame = self.frame;
        let backlog = self.params.backlog_len();
        let mut diff: Vec<(u8, Move)> = Vec::new();
        let mut holes_crossed = false;

        for slot in 0..self.roster.len() {
            let id = self.roster[slot];
            let mut applied = false;
            let mut death = None;

            let (index, ts, name) = {
                let player = match self.players.get_mut(&id) {
                    Some(player) => player,
                    None => continue,
                };
                let index = match player.index() {
                    Some(index) => index,
                    None => continue,
                };

                while player.is_alive() && player.timestamp() < frame {
                    let mv = match player.pop_move() {
                        Some(mv) => mv,
                        None => break,
                    };
                    let ts = player.timestamp();
                    let step = match player.apply(mv, &self.params, &mut self.arena) {
                        Ok(Some(step)) => step,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Dropping move of {}: {}", player.name(), e);
                            continue;
                        }
                    };
                    applied = true;
                    diff.push((index, mv));

                    if player.cross_hole(step.hole_hit) {
                        holes_crossed = true;
                    }
                    if step.collided() {
                        death = Some((ts, "crashed"));
                        break;
                    }
                    if step.idle {
                        death = Some((ts, "never moved during warm-up"));
                        break;
                    }
                }
                (index, player.timestamp(), player.name().to_string())
            };

            if let Some((dead_since, reason)) = death {
                self.kill(id, dead_since, reason);
            } else if !applied && frame.saturating_sub(ts) as usize > backlog {
                if self.players.get(&id).map_or(false, Player::is_alive) {
                    warn!("No moves from {} since frame {}", name, ts);
                    self.desync_kill(id, ts, &name);
                }
            }

            if let Some(player) = self.players.get_mut(&id) {
                if player.take_death_report() {
                    diff.push((index, Move::Dead));
                }
                player.pin_to(frame, backlog);
            }
        }

        if holes_crossed {
            self.broadcast_scores();
        }
        self.recorder.frame(frame, &diff);

        let payload = ServerMessage::Moves(self.move_window()).encode();
        self.events.push(GameEvent::Broadcast {
            payload,
            reliable: false,
        });
    }

    fn desync_kill(&mut self, id: PlayerId, dead_since: u32, name: &str) {
        if self.kill(id, dead_since, "client out of sync") {
            let notice = ServerMessage::notice(format!("Killed {}: client out-of-sync!", name));
            self.broadcast(notice, true);
        }
    }

    /// Returns false if the player was not alive.
    pub fn kill(&mut self, id: PlayerId, dead_since: u32, reason: &str) -> bool {
        let killed = match self.players.get_mut(&id) {
            Some(player) => {
                if player.mark_dead(dead_since) {
                    info!("{} died at frame {}: {}", player.name(), dead_since, reason);
                    true
                } else {
                    debug!("Ignoring kill of {} ({}): not alive", player.name(), reason);
                    false
                }
            }
            None => false,
        };
        if !killed {
            return false;
        }

        self.alive = self.alive.saturating_sub(1);

        if dead_since >= u32::from(self.params.warmup) {
            for other in &self.roster {
                if *other == id {
                    continue;
                }
                if let Some(player) = self.players.get_mut(other) {
                    if player.is_alive() || player.dead_since() == Some(dead_since) {
                        player.score_mut().award();
                    }
                }
            }
        }

        if self.alive <= 1 && self.deadline.is_none() {
            let deadline = self.frame + self.victory_frames;
            debug!("Round {:08x} ends at frame {}", self.game_id, deadline);
            self.deadline = Some(deadline);
        }

        self.broadcast_scores();
        true
    }

    fn finish_round(&mut self) {
        let mut colors = Vec::with_capacity(self.roster.len());
        for id in &self.roster {
            if let Some(player) = self.players.get_mut(id) {
                player.score_mut().end_round();
                colors.push(player.color().unwrap_or_default());
            }
        }
        info!("Round {:08x} over after {} frames", self.game_id, self.frame);
        self.recorder
            .round_finished(self.game_id, self.arena.trails(), &colors);
    }

    fn restart(&mut self) -> bool {
        let before = self.players.len();
        self.players.retain(|_, p| p.is_connected());
        if self.players.len() < before {
            debug!("Purged {} disconnected players", before - self.players.len());
        }

        let mut candidates: Vec<(SessionId, PlayerId)> =
            self.players.values().map(|p| (p.session(), p.id())).collect();
        candidates.sort_unstable();

        for &(_, id) in candidates.iter().skip(MAX_ROSTER) {
            if let Some(player) = self.players.get_mut(&id) {
                player.leave_round();
            }
        }
        self.roster = candidates
            .into_iter()
            .take(MAX_ROSTER)
            .map(|(_, id)| id)
            .collect();

        self.frame = 0;
        self.deadline = None;
        self.arena.reset();

        if self.roster.is_empty() {
            if self.phase == Phase::Running {
                info!("Everybody left, waiting for players");
            }
            self.phase = Phase::Idle;
            self.alive = 0;
            self.start_payload = None;
            return false;
        }

        self.game_id = self.rng.gen();

        let mut colors: Vec<Option<Rgb>> = self
            .roster
            .iter()
            .map(|id| self.players.get(id).and_then(Player::color))
            .collect();
        assign_colors(&mut colors);

        let mut entries = Vec::with_capacity(self.roster.len());
        for (index, (id, color)) in self.roster.iter().zip(colors).enumerate() {
            let player = match self.players.get_mut(id) {
                Some(player) => player,
                None => continue,
            };
            let color = color.unwrap_or_default();
            let entry = StartEntry {
                color,
                x: self.rng.gen_range(SPAWN_MIN..=SPAWN_MAX),
                y: self.rng.gen_range(SPAWN_MIN..=SPAWN_MAX),
                angle: self.rng.gen(),
                name: player.name().to_string(),
            };
            let index = index as u8;
            player.set_color(color);
            player.begin_round(index, Trail::new(index, entry.position(), self.game_id));
            entries.push(entry);
        }

        self.alive = entries.len();
        self.phase = Phase::Running;

        let start = StartRound {
            params: self.params,
            game_id: self.game_id,
            players: entries,
        };
        info!(
            "Round {:08x} starting with {} players",
            self.game_id,
            start.players.len()
        );

        let payload = ServerMessage::Start(start.clone()).encode();
        self.start_payload = Some(payload.clone());
        self.events.push(GameEvent::RoundStarted {
            game_id: self.game_id,
        });
        self.events.push(GameEvent::Broadcast {
            payload,
            reliable: true,
        });
        self.broadcast_scores();
        self.recorder.round_started(&start);
        true
    }

    /// The last `backlog` moves of every roster player, as of now.
    pub fn move_window(&self) -> ServerMoves {
        let backlog = self.params.backlog_len();
        ServerMoves {
            game_id: self.game_id,
            frame: self.frame,
            windows: self
                .roster
                .iter()
                .map(|id| {
                    self.players
                        .get(id)
                        .and_then(|p| p.window(self.frame, backlog))
                })
                .collect(),
        }
    }

    /// Every roster player's move log, cut down to fit a single packet.
    pub fn fast_forward(&self) -> FastForward {
        let empty = FastForwardLog::new();
        let logs: Vec<&FastForwardLog> = self
            .roster
            .iter()
            .map(|id| self.players.get(id).map_or(&empty, Player::log))
            .collect();
        FastForward::bounded(self.frame, logs.into_iter())
    }

    pub fn score_lines(&self) -> Vec<ScoreLine> {
        self.roster
            .iter()
            .map(|id| self.players.get(id).map(|p| p.score().line()).unwrap_or_default())
            .collect()
    }

    /// What a session joining mid-round needs to catch up: the cached
    /// round start, every trail so far and the scores.
    pub fn catch_up(&self) -> Vec<Bytes> {
        let start = match (&self.start_payload, self.phase) {
            (Some(start), Phase::Running) => start.clone(),
            _ => return Vec::new(),
        };

        let ff = self.fast_forward();
        let cut = ff.logs.iter().filter(|log| log.overflowed()).count();
        if cut > 0 {
            warn!("Fast-forward for frame {} cuts {} logs short", ff.frame, cut);
        }

        vec![
            start,
            ServerMessage::FastForward(ff).encode(),
            ServerMessage::Scores(self.score_lines()).encode(),
        ]
    }

    fn broadcast_scores(&mut self) {
        let scores = ServerMessage::Scores(self.score_lines());
        self.broadcast(scores, true);
    }

    fn broadcast(&mut self, message: ServerMessage, reliable: bool) {
        self.events.push(GameEvent::Broadcast {
            payload: message.encode(),
            reliable,
        });
    }
}
