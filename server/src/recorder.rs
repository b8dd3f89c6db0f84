//! Write-only side channels fed by the round controller.
//!
//! Recording never influences the simulation: every I/O failure is logged
//! and the recorder keeps going (or stays quiet until the next round).

use crate::config::ServerConfig;
use log::{info, warn};
use shared::field::Field;
use shared::movement::Move;
use shared::protocol::{Rgb, StartRound};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hooks called by the round controller. All methods default to no-ops.
pub trait RoundRecorder: Send {
    fn round_started(&mut self, _start: &StartRound) {}

    /// Moves applied during one frame, as `(roster index, move)` pairs.
    fn frame(&mut self, _frame: u32, _moves: &[(u8, Move)]) {}

    fn round_finished(&mut self, _game_id: u32, _field: &Field, _colors: &[Rgb]) {}
}

/// Recorder that drops everything.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl RoundRecorder for NullRecorder {}

/// Fans every hook out to several recorders.
#[derive(Default)]
pub struct Recorders {
    recorders: Vec<Box<dyn RoundRecorder>>,
}

impl Recorders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorders for every output directory the configuration names.
    /// Directories that cannot be created are skipped with a warning.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut recorders = Self::new();
        if let Some(dir) = usable_dir(config.replay_dir.as_deref()) {
            recorders.push(Box::new(ReplayRecorder::new(dir)));
        }
        if let Some(dir) = usable_dir(config.bitmap_dir.as_deref()) {
            recorders.push(Box::new(BitmapRecorder::new(dir)));
        }
        recorders
    }

    pub fn push(&mut self, recorder: Box<dyn RoundRecorder>) {
        self.recorders.push(recorder);
    }

    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}

fn usable_dir(dir: Option<&Path>) -> Option<PathBuf> {
    let dir = dir?;
    match std::fs::create_dir_all(dir) {
        Ok(()) => Some(dir.to_path_buf()),
        Err(e) => {
            warn!("Not recording to {}: {}", dir.display(), e);
            None
        }
    }
}

impl RoundRecorder for Recorders {
    fn round_started(&mut self, start: &StartRound) {
        for recorder in &mut self.recorders {
            recorder.round_started(start);
        }
    }

    fn frame(&mut self, frame: u32, moves: &[(u8, Move)]) {
        for recorder in &mut self.recorders {
            recorder.frame(frame, moves);
        }
    }

    fn round_finished(&mut self, game_id: u32, field: &Field, colors: &[Rgb]) {
        for recorder in &mut self.recorders {
            recorder.round_finished(game_id, field, colors);
        }
    }
}

/// Writes one text replay per round to `game-<id>.txt`.
///
/// The header holds a format version, the game id and the player count,
/// then the round parameters, one name per line and one
/// `x y a r g b` start line per player. Every applied move follows as a
/// `frame player move` line.
pub struct ReplayRecorder {
    dir: PathBuf,
    out: Option<BufWriter<File>>,
}

impl ReplayRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            out: None,
        }
    }

    pub fn path_for(&self, game_id: u32) -> PathBuf {
        self.dir.join(format!("game-{:08x}.txt", game_id))
    }

    fn write_header(out: &mut impl Write, start: &StartRound) -> io::Result<()> {
        let p = &start.params;
        writeln!(out, "1 {} {}", start.game_id, start.players.len())?;
        writeln!(
            out,
            "{} {} {} {} {} {} {} {} {}",
            p.fps,
            p.turn_rate,
            p.move_rate,
            p.line_width,
            p.warmup,
            p.hole_probability,
            p.hole_length_min,
            p.hole_length_max,
            p.hole_cooldown
        )?;
        for entry in &start.players {
            writeln!(out, "{}", entry.name)?;
        }
        for entry in &start.players {
            writeln!(
                out,
                "{} {} {} {} {} {}",
                entry.x, entry.y, entry.angle, entry.color.r, entry.color.g, entry.color.b
            )?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut out) = self.out.take() {
            if let Err(e) = out.flush() {
                warn!("Failed to flush replay: {}", e);
            }
        }
    }
}

impl RoundRecorder for ReplayRecorder {
    fn round_started(&mut self, start: &StartRound) {
        self.close();

        let path = self.path_for(start.game_id);
        let opened = File::create(&path).and_then(|file| {
            let mut out = BufWriter::new(file);
            Self::write_header(&mut out, start)?;
            Ok(out)
        });
        match opened {
            Ok(out) => {
                info!("Recording replay to {}", path.display());
                self.out = Some(out);
            }
            Err(e) => warn!("Couldn't open replay file {}: {}", path.display(), e),
        }
    }

    fn frame(&mut self, frame: u32, moves: &[(u8, Move)]) {
        let out = match self.out.as_mut() {
            Some(out) => out,
            None => return,
        };
        for (index, mv) in moves {
            if let Err(e) = writeln!(out, "{} {} {}", frame, index, u8::from(*mv)) {
                warn!("Replay write failed, stopping: {}", e);
                self.out = None;
                return;
            }
        }
    }

    fn round_finished(&mut self, _game_id: u32, _field: &Field, _colors: &[Rgb]) {
        self.close();
    }
}

/// Dumps the final trail field of each round to `field-<id>.bmp`.
pub struct BitmapRecorder {
    dir: PathBuf,
}

impl BitmapRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, game_id: u32) -> PathBuf {
        self.dir.join(format!("field-{:08x}.bmp", game_id))
    }
}

impl RoundRecorder for BitmapRecorder {
    fn round_finished(&mut self, game_id: u32, field: &Field, colors: &[Rgb]) {
        let path = self.path_for(game_id);
        match write_bitmap(&path, field, colors) {
            Ok(()) => info!("Field dumped to {}", path.display()),
            Err(e) => warn!("Couldn't write bitmap {}: {}", path.display(), e),
        }
    }
}

/// Encodes a field as an uncompressed 8-bit BMP. Cell value `n > 0` is
/// drawn in `colors[n - 1]`, empty cells in black.
pub fn encode_bitmap(field: &Field, colors: &[Rgb]) -> Vec<u8> {
    let size = field.size();
    let stride = (size + 3) & !3;
    let pixels = stride * size;
    let offset = 54 + 256 * 4;

    let mut out = Vec::with_capacity(offset + pixels);
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&((offset + pixels) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(offset as u32).to_le_bytes());

    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(size as i32).to_le_bytes());
    out.extend_from_slice(&(size as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(pixels as u32).to_le_bytes());
    out.extend_from_slice(&[0; 16]);

    out.extend_from_slice(&[0; 4]);
    for n in 1..256usize {
        let color = colors.get(n - 1).copied().unwrap_or_default();
        out.extend_from_slice(&[color.b, color.g, color.r, 0]);
    }

    for row in field.cells().chunks(size) {
        out.extend_from_slice(row);
        out.resize(out.len() + stride - size, 0);
    }
    out
}

fn write_bitmap(path: &Path, field: &Field, colors: &[Rgb]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&encode_bitmap(field, colors))?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::params::GameParams;
    use shared::protocol::StartEntry;
    use std::sync::{Arc, Mutex};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("arena-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn start() -> StartRound {
        StartRound {
            params: GameParams::default(),
            game_id: 0xabcd,
            players: vec![StartEntry {
                color: Rgb::new(1, 2, 3),
                x: 100,
                y: 200,
                angle: 300,
                name: "ann".to_string(),
            }],
        }
    }

    #[test]
    fn test_bitmap_layout() {
        let mut field = Field::with_size(6);
        field.draw_segment(
            &shared::movement::Position::new(0.1, 0.5, 0.0),
            &shared::movement::Position::new(0.9, 0.5, 0.0),
            2.0,
            shared::field::Fill::Paint(1),
        );
        let bmp = encode_bitmap(&field, &[Rgb::new(10, 20, 30)]);

        let stride = 8;
        assert_eq!(bmp.len(), 54 + 1024 + stride * 6);
        assert_eq!(&bmp[..2], b"BM");
        assert_eq!(u16::from_le_bytes([bmp[28], bmp[29]]), 8);
        // Palette entry 1 is stored as BGR
        assert_eq!(&bmp[58..62], &[30, 20, 10, 0]);
        assert!(bmp[54 + 1024..].contains(&1));
    }

    #[test]
    fn test_replay_records_header_and_moves() {
        let dir = temp_dir("replay");
        let mut recorder = ReplayRecorder::new(&dir);
        recorder.round_started(&start());
        recorder.frame(1, &[(0, Move::TurnLeft)]);
        recorder.frame(2, &[(0, Move::Forward), (0, Move::Dead)]);
        recorder.round_finished(0xabcd, &Field::with_size(4), &[]);

        let text = std::fs::read_to_string(recorder.path_for(0xabcd)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "1 43981 1");
        assert_eq!(lines[1], "30 48 6 7 90 60 3 8 10");
        assert_eq!(lines[2], "ann");
        assert_eq!(lines[3], "100 200 300 1 2 3");
        assert_eq!(&lines[4..], &["1 0 2", "2 0 1", "2 0 4"]);
    }

    struct Counting(Arc<Mutex<Vec<&'static str>>>);

    impl RoundRecorder for Counting {
        fn round_started(&mut self, _start: &StartRound) {
            self.0.lock().unwrap().push("start");
        }

        fn round_finished(&mut self, _game_id: u32, _field: &Field, _colors: &[Rgb]) {
            self.0.lock().unwrap().push("finish");
        }
    }

    #[test]
    fn test_recorders_from_config() {
        let none = Recorders::from_config(&ServerConfig::default());
        assert!(none.is_empty());

        let config = ServerConfig {
            replay_dir: Some(temp_dir("cfg-replay")),
            bitmap_dir: Some(temp_dir("cfg-bitmap")),
            ..ServerConfig::default()
        };
        assert_eq!(Recorders::from_config(&config).len(), 2);
    }

    #[test]
    fn test_recorders_fan_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut all = Recorders::new();
        all.push(Box::new(Counting(Arc::clone(&seen))));
        all.push(Box::new(Counting(Arc::clone(&seen))));
        all.push(Box::new(NullRecorder));
        assert_eq!(all.len(), 3);

        all.round_started(&start());
        all.frame(1, &[]);
        all.round_finished(1, &Field::with_size(4), &[]);
        assert_eq!(*seen.lock().unwrap(), vec!["start", "start", "finish", "finish"]);
    }
}
