//! Performance benchmarks for critical game systems

use server::config::ServerConfig;
use server::game::{Game, Tick};
use server::recorder::NullRecorder;
use shared::fast_forward::FastForwardLog;
use shared::field::{Field, Fill};
use shared::movement::{advance, Move, Position};
use shared::params::GameParams;
use shared::protocol::{
    ClientMessage, ClientMoves, FastForward, PlayerIntro, RoundShape, ServerMessage, ServerMoves,
};
use shared::trail::{Arena, Trail};
use std::time::Instant;

/// Benchmarks drawing trail segments into the collision field
#[test]
fn benchmark_segment_drawing() {
    let params = GameParams::default();
    let mut field = Field::new();
    let mut pos = Position::new(0.1, 0.5, 0.0);

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let mv = if i % 3 == 0 { Move::TurnLeft } else { Move::Forward };
        let next = advance(&pos, mv, 1e-4, params.turn_angle()).unwrap();
        let _ = field.draw_segment(&pos, &next, params.line_thickness(), Fill::Paint(1));
        pos = next;
    }

    let duration = start.elapsed();
    println!(
        "Segment drawing: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks probing without painting, as the search bots do
#[test]
fn benchmark_segment_probing() {
    let params = GameParams::default();
    let mut field = Field::new();
    let a = Position::new(0.5, 0.5, 0.0);
    let b = advance(&a, Move::Forward, params.move_step(), params.turn_angle()).unwrap();

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        assert_eq!(field.draw_segment(&a, &b, params.line_thickness(), Fill::Probe), 0);
    }

    let duration = start.elapsed();
    println!(
        "Segment probing: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks stepping trails through a whole round's worth of frames
#[test]
fn benchmark_trail_stepping() {
    let params = GameParams {
        warmup: 0,
        ..GameParams::default()
    };
    let mut arena = Arena::new();
    let mut trails: Vec<Trail> = (0..8)
        .map(|i| Trail::new(i, Position::new(0.1 + 0.1 * f64::from(i), 0.2, 1.5), 42))
        .collect();

    let frames = 100;
    let start = Instant::now();

    for frame in 0..frames {
        for trail in &mut trails {
            let mv = if frame % 10 == 0 { Move::TurnRight } else { Move::Forward };
            let _ = trail.step(mv, &params, &mut arena).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Trail stepping: {} frames x {} players in {:?}",
        frames,
        trails.len(),
        duration
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks the round controller's frame step with a full roster
#[test]
fn benchmark_round_tick() {
    let config = ServerConfig {
        warmup_secs: 0.0,
        seed: Some(3),
        ..ServerConfig::default()
    };
    let mut game = Game::new(&config, Box::new(NullRecorder));
    let ids: Vec<_> = (0..16)
        .map(|i| {
            game.add_player(
                i,
                &PlayerIntro {
                    flags: 0,
                    name: format!("p{}", i),
                },
            )
        })
        .collect();
    assert_eq!(game.tick(), Tick::Started);
    let game_id = game.game_id();
    let backlog = game.params().backlog_len();

    let frames = 50u32;
    let start = Instant::now();

    for frame in 1..=frames {
        let window = vec![Move::Forward; backlog];
        for &id in &ids {
            game.queue_moves(id, frame, &window);
        }
        game.tick();
        let _ = ServerMessage::Moves(game.move_window()).encode();
        game.take_events();
    }

    let duration = start.elapsed();
    println!(
        "Round tick: {} frames x {} players in {:?} ({:.2} μs/frame), game {:08x}",
        frames,
        ids.len(),
        duration,
        duration.as_micros() as f64 / f64::from(frames),
        game_id
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks encoding and decoding of the per-frame messages
#[test]
fn benchmark_codec_throughput() {
    let backlog = 60;
    let players = 16;
    let window: Vec<Move> = (0..backlog)
        .map(|i| if i % 4 == 0 { Move::TurnLeft } else { Move::Forward })
        .collect();

    let client = ClientMessage::Moves(ClientMoves {
        game_id: 0xdead_beef,
        timestamp: 1234,
        windows: vec![window.clone(); 2],
    });
    let server = ServerMessage::Moves(ServerMoves {
        game_id: 0xdead_beef,
        frame: 1234,
        windows: (0..players)
            .map(|i| if i % 5 == 0 { None } else { Some(window.clone()) })
            .collect(),
    });
    let shape = RoundShape { players, backlog };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = client.encode();
        assert!(ClientMessage::decode(&bytes, backlog).is_ok());
        let bytes = server.encode();
        assert!(ServerMessage::decode(&bytes, shape).is_ok());
    }

    let duration = start.elapsed();
    println!(
        "Codec: {} MOVE pairs in {:?} ({:.2} μs/pair)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks encoding a long fast-forward log
#[test]
fn benchmark_fast_forward_encoding() {
    let mut log = FastForwardLog::new();
    for i in 0..5_000 {
        let mv = if (i / 7) % 3 == 0 { Move::TurnLeft } else { Move::Forward };
        log.push(mv).unwrap();
    }
    let ff = ServerMessage::FastForward(FastForward {
        frame: 5_000,
        logs: vec![log; 8],
    });
    let shape = RoundShape { players: 8, backlog: 60 };

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = ff.encode();
        assert!(ServerMessage::decode(&bytes, shape).is_ok());
    }

    let duration = start.elapsed();
    println!("Fast-forward codec: {} iterations in {:?}", iterations, duration);

    assert!(duration.as_millis() < 2000);
}
