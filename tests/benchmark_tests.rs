//! Performance benchmarks for critical engine paths

use server::arbiter::{BuzzCandidate, BuzzWindow};
use shared::{Board, Category, GameCommand, GameEvent, Phase, Player, Question};
use std::time::Instant;

/// Benchmarks buzz-window resolution with a large candidate field
#[test]
fn benchmark_buzz_resolution() {
    let iterations: u32 = 100;
    let candidates: u32 = 500;
    let start = Instant::now();

    for round in 0..iterations {
        let mut window = BuzzWindow::new(1_000_000);
        for i in 0..candidates {
            window.submit(
                BuzzCandidate {
                    pid: i,
                    received_at_ms: 1000 + u64::from((i * 37 + round) % 900),
                    latency_ms: u64::from((i * 13) % 200),
                },
                1000,
            );
        }
        let winner = window.resolve();
        assert!(winner.is_some());
    }

    let duration = start.elapsed();
    println!(
        "Buzz resolution: {} windows x {} candidates in {:?} ({:.2} µs/window)",
        iterations,
        candidates,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks snapshot serialization, the fattest frame on the wire
#[test]
fn benchmark_snapshot_serialization() {
    let board = Board {
        categories: (0..6)
            .map(|c| Category {
                title: format!("Category {}", c),
                questions: (0..5)
                    .map(|q| Question {
                        prompt: format!("Question {} of category {}?", q, c),
                        answer: format!("Answer {}", q),
                        value: (q as u32 + 1) * 100,
                        answered: q % 2 == 0,
                    })
                    .collect(),
            })
            .collect(),
    };

    let players: Vec<Player> = (0..50)
        .map(|i| Player {
            pid: i,
            name: format!("Player {}", i),
            score: (i as i64) * 100 - 500,
            has_buzzed: i % 3 == 0,
            connected: i % 7 != 0,
        })
        .collect();

    let event = GameEvent::GameSnapshot {
        phase: Phase::WaitingForBuzz,
        board,
        players,
        current_question: Some((2, 3)),
        winner: None,
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Snapshot serialization: {} iterations in {:?} ({:.2} µs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks command decoding, the per-frame cost of the reader loop
#[test]
fn benchmark_command_decoding() {
    let frames = [
        r#"{"Buzz":{}}"#,
        r#"{"HostChoice":{"category":3,"question":4}}"#,
        r#"{"HeartbeatAck":{"hbid":1234,"clientRecvMs":1700000000000}}"#,
        r#"{"HostChecked":{"correct":true}}"#,
    ];

    let iterations: usize = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let frame = frames[i % frames.len()];
        let cmd: GameCommand = serde_json::from_str(frame).unwrap();
        match cmd {
            GameCommand::Buzz {}
            | GameCommand::HostChoice { .. }
            | GameCommand::HeartbeatAck { .. }
            | GameCommand::HostChecked { .. } => {}
            other => panic!("unexpected command {:?}", other),
        }
    }

    let duration = start.elapsed();
    println!(
        "Command decoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the adjusted-time computation itself
#[test]
fn benchmark_adjustment_math() {
    let candidates: Vec<BuzzCandidate> = (0..1000)
        .map(|i| BuzzCandidate {
            pid: i,
            received_at_ms: 1_000_000 + (i as u64 * 7) % 5000,
            latency_ms: (i as u64 * 11) % 300,
        })
        .collect();

    let iterations: usize = 10_000;
    let start = Instant::now();

    let mut checksum = 0u64;
    for _ in 0..iterations {
        for c in &candidates {
            checksum = checksum.wrapping_add(c.adjusted_ms());
        }
    }

    let duration = start.elapsed();
    println!(
        "Adjustment math: {} candidate evaluations in {:?} (checksum {})",
        iterations * candidates.len(),
        duration,
        checksum
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}
