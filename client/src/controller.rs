//! Player controllers: whatever decides the next steering move of a
//! locally controlled player.
//!
//! Scripted bots look at the latest confirmed trail field and the
//! predicted head of their player. The [`External`] controller is steered
//! from outside the client loop, typically by a human typing commands.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::field::{Field, Fill};
use shared::movement::{advance, Move, Position};
use shared::params::GameParams;
use std::f64::consts::PI;
use tokio::sync::{mpsc, watch};

/// What a controller gets to see when asked for a move.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Frame the requested move is for.
    pub frame: u32,
    /// Predicted head of the controlled player at `frame`.
    pub position: Position,
    pub field: &'a Field,
    pub params: &'a GameParams,
}

pub trait PlayerController: Send {
    /// Called at the start of every round the player takes part in.
    fn restart(&mut self, _params: &GameParams) {}

    /// Returns a steering move for `view.frame`.
    fn next_move(&mut self, view: &FrameView<'_>) -> Move;

    /// Chat text the controller wants to send, one line per call.
    fn take_chat(&mut self) -> Option<String> {
        None
    }
}

pub const SEARCH_DEPTH: usize = 7;

/// Depth-limited probe search.
///
/// Every level tries each preferred move for a growing number of frames
/// (2, 4, 6, ...) against the confirmed field and descends from the end
/// point if the path is clear. The move whose subtree survives deepest
/// wins; ties go to the earlier preference.
#[derive(Debug, Clone)]
pub struct SimpleSearch {
    preferences: [Move; 3],
    max_depth: usize,
    scratch: Field,
}

impl SimpleSearch {
    pub fn new() -> Self {
        Self::with_preferences([Move::Forward, Move::TurnLeft, Move::TurnRight])
    }

    pub fn with_preferences(preferences: [Move; 3]) -> Self {
        Self {
            preferences,
            max_depth: SEARCH_DEPTH,
            scratch: Field::with_size(0),
        }
    }

    pub fn preferences(&self) -> [Move; 3] {
        self.preferences
    }

    pub fn set_preferences(&mut self, preferences: [Move; 3]) {
        self.preferences = preferences;
    }

    /// Returns the reached depth and the first move leading there.
    pub fn search(&mut self, view: &FrameView<'_>) -> (usize, Move) {
        if self.scratch.size() != view.field.size() {
            self.scratch = view.field.clone();
        } else {
            self.scratch.clone_from(view.field);
        }
        self.descend(&view.position, 0, view.params)
    }

    fn descend(&mut self, pos: &Position, depth: usize, params: &GameParams) -> (usize, Move) {
        if depth == self.max_depth {
            return (depth, Move::Forward);
        }

        let thickness = params.line_thickness();
        let mut best = (depth, Move::Forward);
        for mv in self.preferences {
            if best.0 >= self.max_depth {
                break;
            }

            let mut cur = *pos;
            let mut clear = true;
            for _ in 0..2 + 2 * depth {
                let next = match advance(&cur, mv, params.move_step(), params.turn_angle()) {
                    Ok(next) => next,
                    Err(_) => {
                        clear = false;
                        break;
                    }
                };
                if self.scratch.draw_segment(&cur, &next, thickness, Fill::Probe) != 0 {
                    clear = false;
                    break;
                }
                cur = next;
            }

            if clear {
                let (reached, _) = self.descend(&cur, depth + 1, params);
                if reached > best.0 {
                    best = (reached, mv);
                }
            }
        }
        best
    }
}

impl Default for SimpleSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Steering used while nobody moves: always turn at frame 0 so the player
/// is not dropped as idle, then face the middle of the field.
fn warmup_move(view: &FrameView<'_>) -> Option<Move> {
    if view.frame == 0 {
        return Some(Move::TurnLeft);
    }
    if view.frame >= u32::from(view.params.warmup) {
        return None;
    }

    let pos = view.position;
    let target = (0.5 - pos.y).atan2(0.5 - pos.x);
    let mut off = (pos.a - target) % (2.0 * PI);
    if off > PI {
        off -= 2.0 * PI;
    } else if off < -PI {
        off += 2.0 * PI;
    }

    Some(if off < -0.1 {
        Move::TurnLeft
    } else if off > 0.1 {
        Move::TurnRight
    } else {
        Move::Forward
    })
}

impl PlayerController for SimpleSearch {
    fn next_move(&mut self, view: &FrameView<'_>) -> Move {
        warmup_move(view).unwrap_or_else(|| self.search(view).1)
    }
}

/// Search bot that prefers turning over going straight, so it circles.
pub struct Twirly {
    search: SimpleSearch,
    rng: StdRng,
}

impl Twirly {
    pub fn new(rng: StdRng) -> Self {
        Self {
            search: SimpleSearch::with_preferences([Move::TurnLeft, Move::Forward, Move::TurnRight]),
            rng,
        }
    }
}

impl PlayerController for Twirly {
    /// Picks the circling direction anew each round.
    fn restart(&mut self, _params: &GameParams) {
        let mut preferences = [Move::TurnLeft, Move::Forward, Move::TurnRight];
        if self.rng.gen::<bool>() {
            preferences.swap(0, 2);
        }
        self.search.set_preferences(preferences);
    }

    fn next_move(&mut self, view: &FrameView<'_>) -> Move {
        self.search.next_move(view)
    }
}

/// Search bot whose preferences get reshuffled a few times per second.
pub struct Tipsy {
    search: SimpleSearch,
    rng: StdRng,
}

impl Tipsy {
    pub fn new(rng: StdRng) -> Self {
        Self {
            search: SimpleSearch::new(),
            rng,
        }
    }
}

impl PlayerController for Tipsy {
    fn next_move(&mut self, view: &FrameView<'_>) -> Move {
        if self.rng.gen_range(0..u32::from(view.params.fps.max(1))) < 4 {
            let mut preferences = self.search.preferences();
            preferences.shuffle(&mut self.rng);
            self.search.set_preferences(preferences);
        }
        self.search.next_move(view)
    }
}

/// Controller fed from outside the client loop.
///
/// The current steering move is a [`watch`] value, so the controller
/// always sees the latest command and repeats it every frame until it
/// changes. Chat lines queue up in an [`mpsc`] channel.
pub struct External {
    steering: watch::Receiver<Move>,
    current: Move,
    chat: mpsc::UnboundedReceiver<String>,
}

/// Sending half of an [`External`] controller.
#[derive(Debug)]
pub struct ExternalHandle {
    steering: watch::Sender<Move>,
    chat: mpsc::UnboundedSender<String>,
}

impl External {
    pub fn new() -> (Self, ExternalHandle) {
        let (steering_tx, steering_rx) = watch::channel(Move::Forward);
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        (
            Self {
                steering: steering_rx,
                current: Move::Forward,
                chat: chat_rx,
            },
            ExternalHandle {
                steering: steering_tx,
                chat: chat_tx,
            },
        )
    }
}

impl ExternalHandle {
    /// Sets the move repeated from now on. Non-steering moves are ignored.
    pub fn steer(&self, mv: Move) -> bool {
        mv.is_steering() && self.steering.send(mv).is_ok()
    }

    pub fn say(&self, text: impl Into<String>) -> bool {
        self.chat.send(text.into()).is_ok()
    }
}

impl PlayerController for External {
    /// Rounds start straight ahead until the next command arrives.
    fn restart(&mut self, _params: &GameParams) {
        self.steering.borrow_and_update();
        self.current = Move::Forward;
    }

    fn next_move(&mut self, _view: &FrameView<'_>) -> Move {
        if self.steering.has_changed().unwrap_or(false) {
            self.current = *self.steering.borrow_and_update();
        }
        self.current
    }

    fn take_chat(&mut self) -> Option<String> {
        self.chat.try_recv().ok()
    }
}

/// Parses one line of human input: `l`, `r` and `f` steer, `say <text>`
/// chats. Anything else yields `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if let Some(text) = line.strip_prefix("say ") {
        return Some(Command::Say(text.to_string()));
    }
    match line {
        "l" | "left" => Some(Command::Steer(Move::TurnLeft)),
        "r" | "right" => Some(Command::Steer(Move::TurnRight)),
        "f" | "forward" => Some(Command::Steer(Move::Forward)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Steer(Move),
    Say(String),
}

impl Command {
    pub fn send_to(self, handle: &ExternalHandle) -> bool {
        match self {
            Command::Steer(mv) => handle.steer(mv),
            Command::Say(text) => handle.say(text),
        }
    }
}

/// Which scripted controller a client player runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BotKind {
    #[default]
    Simple,
    Twirly,
    Tipsy,
}

impl BotKind {
    pub fn build(self, seed: u64) -> Box<dyn PlayerController> {
        let rng = StdRng::seed_from_u64(seed);
        match self {
            BotKind::Simple => Box::new(SimpleSearch::new()),
            BotKind::Twirly => Box::new(Twirly::new(rng)),
            BotKind::Tipsy => Box::new(Tipsy::new(rng)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GameParams {
        GameParams {
            warmup: 10,
            ..GameParams::default()
        }
    }

    fn view<'a>(frame: u32, position: Position, field: &'a Field, params: &'a GameParams) -> FrameView<'a> {
        FrameView {
            frame,
            position,
            field,
            params,
        }
    }

    #[test]
    fn test_first_frame_always_turns() {
        let field = Field::new();
        let params = params();
        let mut bot = SimpleSearch::new();
        let facing_centre = Position::new(0.2, 0.5, 0.0);
        assert_eq!(bot.next_move(&view(0, facing_centre, &field, &params)), Move::TurnLeft);
    }

    #[test]
    fn test_warmup_faces_the_centre() {
        let field = Field::new();
        let params = params();
        let mut bot = SimpleSearch::new();

        // Left of the centre, looking right: already on target
        let pos = Position::new(0.2, 0.5, 0.0);
        assert_eq!(bot.next_move(&view(1, pos, &field, &params)), Move::Forward);

        // Looking down (+y) with the centre straight to the right
        let pos = Position::new(0.2, 0.5, 0.5 * PI);
        assert_eq!(bot.next_move(&view(1, pos, &field, &params)), Move::TurnRight);

        let pos = Position::new(0.2, 0.5, -0.5 * PI);
        assert_eq!(bot.next_move(&view(1, pos, &field, &params)), Move::TurnLeft);
    }

    #[test]
    fn test_search_goes_straight_on_open_field() {
        let field = Field::new();
        let params = params();
        let mut bot = SimpleSearch::new();
        let pos = Position::new(0.5, 0.5, 0.0);

        let (depth, mv) = bot.search(&view(20, pos, &field, &params));
        assert_eq!(depth, SEARCH_DEPTH);
        assert_eq!(mv, Move::Forward);
    }

    #[test]
    fn test_search_turns_away_from_the_border() {
        let field = Field::new();
        let params = params();
        let mut bot = SimpleSearch::new();

        // Heading right, close to the right border
        let pos = Position::new(0.95, 0.5, 0.0);
        let mv = bot.next_move(&view(20, pos, &field, &params));
        assert_ne!(mv, Move::Forward);
    }

    #[test]
    fn test_search_avoids_a_wall() {
        let mut field = Field::new();
        let params = params();
        // Vertical wall just ahead of a player heading right
        field.draw_segment(
            &Position::new(0.56, 0.0, 0.5 * PI),
            &Position::new(0.56, 1.0, 0.5 * PI),
            10.0,
            Fill::Paint(9),
        );

        let mut bot = SimpleSearch::new();
        let pos = Position::new(0.5, 0.5, 0.0);
        let mv = bot.next_move(&view(20, pos, &field, &params));
        assert!(mv.is_turn());
    }

    #[test]
    fn test_twirly_prefers_turning() {
        let field = Field::new();
        let params = params();
        let mut bot = Twirly::new(StdRng::seed_from_u64(7));
        bot.restart(&params);

        let mv = bot.next_move(&view(20, Position::new(0.5, 0.5, 0.0), &field, &params));
        assert!(mv.is_turn());
    }

    #[test]
    fn test_tipsy_keeps_all_preferences() {
        let field = Field::new();
        let params = params();
        let mut bot = Tipsy::new(StdRng::seed_from_u64(3));

        for frame in 20..80 {
            let mv = bot.next_move(&view(frame, Position::new(0.5, 0.5, 0.0), &field, &params));
            assert!(mv.is_steering());
        }
        let mut prefs = bot.search.preferences().to_vec();
        prefs.sort_by_key(|&mv| u8::from(mv));
        assert_eq!(prefs, vec![Move::Forward, Move::TurnLeft, Move::TurnRight]);
    }

    #[test]
    fn test_external_repeats_latest_command() {
        let field = Field::new();
        let params = params();
        let (mut controller, handle) = External::new();
        let v = view(5, Position::default(), &field, &params);

        assert_eq!(controller.next_move(&v), Move::Forward);
        assert!(handle.steer(Move::TurnRight));
        assert_eq!(controller.next_move(&v), Move::TurnRight);
        assert_eq!(controller.next_move(&v), Move::TurnRight);
        assert!(!handle.steer(Move::Dead));

        controller.restart(&params);
        assert_eq!(controller.next_move(&v), Move::Forward);
    }

    #[test]
    fn test_external_chat_queue() {
        let (mut controller, handle) = External::new();
        assert_eq!(controller.take_chat(), None);
        handle.say("hi");
        handle.say("there");
        assert_eq!(controller.take_chat().as_deref(), Some("hi"));
        assert_eq!(controller.take_chat().as_deref(), Some("there"));
        assert_eq!(controller.take_chat(), None);
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("l"), Some(Command::Steer(Move::TurnLeft)));
        assert_eq!(parse_command(" right\n"), Some(Command::Steer(Move::TurnRight)));
        assert_eq!(parse_command("say hello all"), Some(Command::Say("hello all".to_string())));
        assert_eq!(parse_command("jump"), None);
    }
}
