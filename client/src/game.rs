use crate::controller::{FrameView, PlayerController};
use log::{debug, info, warn};
use shared::movement::{advance, Move, Position};
use shared::params::GameParams;
use shared::protocol::{ClientMessage, ClientMoves, FastForward, RoundShape, ScoreLine, ServerMoves, StartRound};
use shared::replica::{ReplayError, Replica};
use std::time::{Duration, Instant};

/// A player controlled by this client.
pub struct LocalPlayer {
    pub name: String,
    controller: Box<dyn PlayerController>,
    /// Roster index in the current round, if the player takes part.
    index: Option<usize>,
    /// Every move generated this round; entry `f` is the move for frame `f`.
    moves: Vec<Move>,
}

impl LocalPlayer {
    pub fn new(name: impl Into<String>, controller: Box<dyn PlayerController>) -> Self {
        Self {
            name: name.into(),
            controller,
            index: None,
            moves: Vec::new(),
        }
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }
}

/// Client view of the game.
///
/// The confirmed state is a [`Replica`] fed only with authoritative data.
/// On top of it the client predicts: own players are advanced through the
/// moves generated but not yet confirmed, everybody else repeats their last
/// confirmed move. Whenever new authoritative moves arrive the prediction
/// is rebuilt from the replica, so mistakes never outlive one server frame.
pub struct ClientGame {
    players: Vec<LocalPlayer>,
    replica: Option<Replica>,
    /// Last confirmed steering move of every roster player.
    last_moves: Vec<Move>,
    /// Number of frames this client has generated moves for.
    local_frame: u32,
    /// Estimated instant the server ran frame 0 of the current round.
    server_epoch: Option<Instant>,
    rounds: u32,
}

impl ClientGame {
    pub fn new(players: Vec<LocalPlayer>) -> Self {
        Self {
            players,
            replica: None,
            last_moves: Vec::new(),
            local_frame: 0,
            server_epoch: None,
            rounds: 0,
        }
    }

    pub fn players(&self) -> &[LocalPlayer] {
        &self.players
    }

    pub fn replica(&self) -> Option<&Replica> {
        self.replica.as_ref()
    }

    pub fn local_frame(&self) -> u32 {
        self.local_frame
    }

    /// Rounds started since the client connected.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Shape needed to decode MOVE messages of the current round.
    pub fn shape(&self) -> RoundShape {
        self.replica.as_ref().map(Replica::shape).unwrap_or_default()
    }

    /// Number of local players in the running round.
    pub fn playing(&self) -> usize {
        self.players.iter().filter(|p| p.index.is_some()).count()
    }

    pub fn start(&mut self, start: &StartRound) {
        let replica = Replica::new(start);
        for player in &mut self.players {
            player.index = replica.players().iter().position(|p| p.name == player.name);
            player.moves.clear();
            if player.index.is_some() {
                player.controller.restart(&start.params);
            }
        }

        info!(
            "Round {:08x}: {} players, {} of them local",
            start.game_id,
            start.players.len(),
            self.playing()
        );
        self.last_moves = vec![Move::Forward; start.players.len()];
        self.replica = Some(replica);
        self.local_frame = 0;
        self.server_epoch = None;
        self.rounds += 1;
    }

    /// Catches up with a round that was already running when we joined.
    pub fn fast_forward(&mut self, ff: &FastForward, now: Instant) {
        let result = match self.replica.as_mut() {
            Some(replica) => replica.fast_forward(ff),
            None => return,
        };
        if let Err(e) = result {
            return self.abandon(e);
        }

        for player in self.players.iter_mut().filter(|p| p.index.is_some()) {
            player.moves.resize(ff.frame as usize, Move::Forward);
        }
        self.local_frame = ff.frame;
        self.server_epoch = self.frame_epoch(ff.frame, now);
        debug!("Fast-forwarded to frame {}", ff.frame);
    }

    pub fn apply_moves(&mut self, moves: &ServerMoves, now: Instant) {
        let result = match self.replica.as_mut() {
            Some(replica) => replica.apply_moves(moves),
            None => return,
        };
        if let Err(e) = result {
            return self.abandon(e);
        }

        for (last, window) in self.last_moves.iter_mut().zip(&moves.windows) {
            if let Some(mv) = window.iter().flatten().rev().find(|mv| mv.is_steering()) {
                *last = *mv;
            }
        }

        // The earliest arrival is the one least delayed by the network
        if let Some(epoch) = self.frame_epoch(moves.frame, now) {
            if self.server_epoch.map_or(true, |known| epoch < known) {
                self.server_epoch = Some(epoch);
            }
        }
    }

    pub fn set_scores(&mut self, scores: Vec<ScoreLine>) {
        if let Some(replica) = self.replica.as_mut() {
            replica.set_scores(scores);
        }
    }

    fn abandon(&mut self, error: ReplayError) {
        warn!("Lost track of the round, waiting for the next one: {}", error);
        self.replica = None;
        self.server_epoch = None;
        for player in &mut self.players {
            player.index = None;
        }
    }

    fn frame_epoch(&self, frame: u32, now: Instant) -> Option<Instant> {
        let fps = self.replica.as_ref()?.params().fps;
        let behind = Duration::from_secs_f64(f64::from(frame) / f64::from(fps.max(1)));
        now.checked_sub(behind)
    }

    /// Frame the server is estimated to be running at `now`.
    pub fn server_frame(&self, now: Instant) -> Option<u32> {
        let epoch = self.server_epoch?;
        let fps = self.replica.as_ref()?.params().fps;
        let elapsed = now.saturating_duration_since(epoch).as_secs_f64();
        Some((elapsed * f64::from(fps)).floor() as u32)
    }

    /// Generates moves until the estimated server frame is covered. Returns
    /// true if any move was generated.
    pub fn advance_clock(&mut self, now: Instant) -> bool {
        match self.server_frame(now) {
            Some(frame) => self.forward_to(frame + 1),
            None => false,
        }
    }

    /// Asks every local player for moves up to (not including) `frame`.
    pub fn forward_to(&mut self, frame: u32) -> bool {
        let replica = match self.replica.as_ref() {
            Some(replica) => replica,
            None => return false,
        };
        if self.local_frame >= frame {
            return false;
        }

        let anybody_alive = self
            .players
            .iter()
            .filter_map(|p| p.index)
            .any(|index| replica.player(index).map_or(false, |p| p.is_alive()));
        if !anybody_alive {
            for player in self.players.iter_mut().filter(|p| p.index.is_some()) {
                player.moves.resize(frame as usize, Move::Forward);
            }
            self.local_frame = frame;
            return false;
        }

        let params = *replica.params();
        while self.local_frame < frame {
            let at = self.local_frame;
            for player in &mut self.players {
                let index = match player.index {
                    Some(index) => index,
                    None => continue,
                };
                let confirmed = match replica.player(index) {
                    Some(confirmed) => confirmed,
                    None => continue,
                };

                let mv = if confirmed.is_alive() {
                    let position = predict(
                        confirmed.position(),
                        confirmed.timestamp(),
                        &player.moves,
                        &params,
                    );
                    let view = FrameView {
                        frame: at,
                        position,
                        field: replica.field(),
                        params: &params,
                    };
                    player.controller.next_move(&view)
                } else {
                    Move::Forward
                };
                player.moves.push(if mv.is_steering() { mv } else { Move::Forward });
            }
            self.local_frame += 1;
        }
        true
    }

    /// Move windows for every local player in the round, or `None` when
    /// there is nothing to send.
    pub fn move_message(&self) -> Option<ClientMessage> {
        let replica = self.replica.as_ref()?;
        let backlog = replica.params().backlog_len();

        let windows: Vec<Vec<Move>> = self
            .players
            .iter()
            .filter(|p| p.index.is_some())
            .map(|p| window(&p.moves, backlog))
            .collect();
        if windows.is_empty() || self.local_frame == 0 {
            return None;
        }

        Some(ClientMessage::Moves(ClientMoves {
            game_id: replica.game_id(),
            timestamp: self.local_frame,
            windows,
        }))
    }

    /// Predicted head of every roster player at the local frame.
    pub fn predicted_positions(&self) -> Vec<Position> {
        let replica = match self.replica.as_ref() {
            Some(replica) => replica,
            None => return Vec::new(),
        };
        let params = replica.params();

        replica
            .players()
            .iter()
            .enumerate()
            .map(|(index, confirmed)| {
                if !confirmed.is_alive() {
                    return *confirmed.position();
                }
                match self.players.iter().find(|p| p.index == Some(index)) {
                    Some(local) => predict(confirmed.position(), confirmed.timestamp(), &local.moves, params),
                    None => {
                        let mut pos = *confirmed.position();
                        let last = self.last_moves.get(index).copied().unwrap_or(Move::Forward);
                        for ts in confirmed.timestamp()..self.local_frame {
                            pos = step_position(&pos, last, ts, params);
                        }
                        pos
                    }
                }
            })
            .collect()
    }

    /// Chat lines the controllers produced, as `(player name, text)`.
    pub fn take_chat(&mut self) -> Vec<(String, String)> {
        let mut lines = Vec::new();
        for player in &mut self.players {
            while let Some(text) = player.controller.take_chat() {
                lines.push((player.name.clone(), text));
            }
        }
        lines
    }
}

/// Window of the last `backlog` moves, padded at the front before frame 0.
fn window(moves: &[Move], backlog: usize) -> Vec<Move> {
    let start = moves.len().saturating_sub(backlog);
    let mut window = vec![Move::Forward; backlog - (moves.len() - start)];
    window.extend_from_slice(&moves[start..]);
    window
}

fn step_position(pos: &Position, mv: Move, ts: u32, params: &GameParams) -> Position {
    let rate = if ts >= u32::from(params.warmup) {
        params.move_step()
    } else {
        0.0
    };
    advance(pos, mv, rate, params.turn_angle()).unwrap_or(*pos)
}

/// Advances a confirmed head through the local moves it has not seen yet.
fn predict(confirmed: &Position, timestamp: u32, moves: &[Move], params: &GameParams) -> Position {
    moves
        .iter()
        .enumerate()
        .skip(timestamp as usize)
        .fold(*confirmed, |pos, (ts, &mv)| step_position(&pos, mv, ts as u32, params))
}
