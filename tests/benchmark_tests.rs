//! Performance benchmarks for lobby hot paths

use server::access_gate::AccessGate;
use server::color_pool::ColorPool;
use server::config::SessionConfig;
use server::session::{ClientInfo, Session};
use server::timer::TimerQueue;
use shared::{Credentials, LobbyRequest, Packet};
use std::time::{Duration, Instant};

fn client(id: u32) -> ClientInfo {
    ClientInfo::new(
        id,
        format!("player{}", id),
        Credentials {
            account_id: format!("acc-{}", id),
            ..Credentials::default()
        },
    )
}

fn full_lobby(now: Instant) -> Session {
    let config = SessionConfig {
        public: true,
        rng_seed: Some(42),
        ..SessionConfig::default()
    };
    let mut session = Session::enter(config, Some(client(1)), now).unwrap();
    session.handle_request(
        now,
        1,
        1,
        "reset_armies",
        r#"[{"slots":2},{"slots":2},{"slots":2},{"slots":2},{"slots":2}]"#,
    );
    for id in 2..=10 {
        session.connect(now, client(id), false).unwrap();
    }
    session.poll(now);
    session.drain_outbox();
    session
}

/// Benchmarks admission checks against a large whitelist and blacklist
#[test]
fn benchmark_access_gate() {
    let mut gate = AccessGate::new();
    gate.set_password("hunter2");
    for i in 0..1000 {
        gate.add_to_whitelist(&format!("friend-{}", i));
        gate.add_to_blacklist(&format!("foe-{}", i));
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let account = format!("friend-{}", i % 1000);
        assert!(gate.is_admissible(&account, "hunter2", "", false));
    }

    let duration = start.elapsed();
    println!(
        "Access gate: {} checks in {:?} ({:.2} ns/check)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks taking and releasing every color in the catalogue
#[test]
fn benchmark_color_pool_churn() {
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut pool = ColorPool::new();
        let mut taken = Vec::new();
        while let Some(choice) = pool.take_random() {
            taken.push(choice.primary);
        }
        assert_eq!(taken.len(), pool.len());
        for primary in taken {
            pool.release(primary);
        }
        assert_eq!(pool.taken_count(), 0);
    }

    let duration = start.elapsed();
    println!(
        "Color pool churn: {} full cycles in {:?} ({:.2} μs/cycle)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a burst of color changes in a full lobby, including the flush
#[test]
fn benchmark_request_and_flush() {
    let now = Instant::now();
    let mut session = full_lobby(now);

    let iterations = 2_000;
    let start = Instant::now();

    for i in 0..iterations {
        let client_id = (i % 10) as u32 + 1;
        let secondary = (i % 2).to_string();
        session.handle_request(now, client_id, i as u32, "set_secondary_color_index", &secondary);
        session.poll(now);
        session.drain_outbox();
    }

    let duration = start.elapsed();
    println!(
        "Request + flush: {} requests in {:?} ({:.2} μs/request)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Marking the same topics many times costs one broadcast each
#[test]
fn stress_test_coalesced_marks() {
    let now = Instant::now();
    let mut session = full_lobby(now);

    let start = Instant::now();
    for i in 0..500 {
        session.handle_request(now, 1, i, "chat_history", "");
        session.handle_request(now, (i % 9) + 2, i, "toggle_ready", "");
    }
    session.drain_outbox();
    session.poll(now);
    let outbox = session.drain_outbox();
    let duration = start.elapsed();

    let players_broadcasts = outbox
        .iter()
        .filter(|out| {
            matches!(out, server::session::Outbound::Broadcast { message_type, .. }
                if message_type == "players")
        })
        .count();
    println!("Coalesced 1000 requests into {} outbox entries in {:?}", outbox.len(), duration);

    assert!(players_broadcasts <= 1);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks timer scheduling and draining
#[test]
fn benchmark_timer_queue() {
    let now = Instant::now();
    let iterations = 50_000u64;
    let start = Instant::now();

    let mut queue = TimerQueue::new();
    for i in 0..iterations {
        queue.schedule(now, Duration::from_millis(i % 1000), i);
    }
    let mut fired = 0;
    while queue.pop_due(now + Duration::from_secs(1)).is_some() {
        fired += 1;
    }

    let duration = start.elapsed();
    println!(
        "Timer queue: {} timers scheduled and fired in {:?}",
        iterations, duration
    );

    assert_eq!(fired, iterations);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks request framing as it travels over the wire
#[test]
fn benchmark_packet_serialization() {
    use bincode::{deserialize, serialize};

    let request = LobbyRequest::ChatMessage {
        message: "x".repeat(200),
    };
    let (message_type, payload) = request.to_parts().unwrap();
    let packet = Packet::Request {
        request_id: 1,
        message_type,
        payload,
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let serialized = serialize(&packet).unwrap();
        let deserialized: Packet = deserialize(&serialized).unwrap();
        if let Packet::Request {
            message_type,
            payload,
            ..
        } = deserialized
        {
            LobbyRequest::from_parts(&message_type, &payload).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
