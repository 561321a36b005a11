//! Integration tests for a single engine process, driven by `katago-stub`.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{game, stub};
use go_core::Stone;
use katago_analysis::{EngineError, EngineProcess, MoveSource, QueryId};

const GENEROUS: Duration = Duration::from_secs(10);

#[test]
fn test_evaluate_returns_candidates_in_engine_order() {
    let stub = stub("score_leads = 2.5, 1.0\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let game = game(4);

    let query = engine.next_query(game.setup(1).unwrap(), 1, 50);
    assert_eq!(query.id, QueryId(1));
    let result = engine.evaluate(&query, GENEROUS).expect("Evaluation failed");

    assert_eq!(result.position_index, 1);
    assert_eq!(result.query_id, QueryId(1));
    let moves: Vec<&str> = result.candidates.iter().map(|c| c.mv.as_str()).collect();
    assert_eq!(moves, ["D4", "Q16"]);
    assert_eq!(result.candidates[0].score_lead, 1.0);
    assert_eq!(result.candidates[0].visits, 50);
    assert_eq!(result.best().map(|c| c.mv.as_str()), Some("D4"));
    let root = result.root.expect("Stub always sends rootInfo");
    assert_eq!(root.current_player, Some(Stone::White));
}

#[test]
fn test_query_ids_are_never_reused() {
    let stub = stub("");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let game = game(2);

    let mut ids = Vec::new();
    for index in 0..3 {
        let query = engine.next_query(game.setup(index).unwrap(), index, 10);
        let result = engine.evaluate(&query, GENEROUS).expect("Evaluation failed");
        assert_eq!(result.query_id, query.id);
        ids.push(query.id.0);
    }
    assert_eq!(ids, [1, 2, 3]);
}

#[test]
fn test_warnings_and_partial_reports_are_skipped() {
    let stub = stub("warning = true\npartial = true\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let game = game(1);

    let query = engine.next_query(game.setup(0).unwrap(), 0, 10);
    let result = engine.evaluate(&query, GENEROUS).expect("Evaluation failed");
    assert_eq!(result.candidates.len(), 2);
}

#[test]
fn test_timeout_leaves_engine_usable() {
    let stub = stub("silent_first = 1\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let game = game(2);

    let query = engine.next_query(game.setup(0).unwrap(), 0, 10);
    let started = Instant::now();
    let err = engine
        .evaluate(&query, Duration::from_millis(10))
        .expect_err("Silent engine should time out");
    let elapsed = started.elapsed();

    assert!(
        matches!(err, EngineError::Timeout { query: QueryId(1), .. }),
        "Expected Timeout, got {err}"
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "Timeout took {elapsed:?}"
    );
    assert!(engine.is_alive());

    let query = engine.next_query(game.setup(1).unwrap(), 1, 10);
    let result = engine.evaluate(&query, GENEROUS).expect("Engine should recover");
    assert_eq!(result.query_id, QueryId(2));
    assert_eq!(result.position_index, 1);
}

#[test]
fn test_late_reply_is_discarded() {
    let stub = stub("late_first_ms = 300\nscore_leads = 7.0, -3.0\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let game = game(2);

    let first = engine.next_query(game.setup(0).unwrap(), 0, 10);
    assert!(matches!(
        engine.evaluate(&first, Duration::from_millis(50)),
        Err(EngineError::Timeout { .. })
    ));

    // The reply to the first query arrives while the second is in flight.
    let second = engine.next_query(game.setup(1).unwrap(), 1, 10);
    let result = engine.evaluate(&second, GENEROUS).expect("Evaluation failed");
    assert_eq!(result.query_id, QueryId(2));
    assert_eq!(result.position_index, 1);
    assert_eq!(result.candidates[0].score_lead, -3.0);
}

#[test]
fn test_unparseable_reply_is_malformed() {
    let stub = stub("mode = garbage\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let query = engine.next_query(game(0).setup(0).unwrap(), 0, 10);

    let err = engine.evaluate(&query, GENEROUS).expect_err("Garbage must fail");
    assert!(matches!(err, EngineError::MalformedResponse(_)), "Got {err}");
    assert!(engine.is_alive());
}

#[test]
fn test_mismatched_id_is_malformed() {
    let stub = stub("mode = wrong-id\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let query = engine.next_query(game(0).setup(0).unwrap(), 0, 10);

    match engine.evaluate(&query, GENEROUS) {
        Err(EngineError::MalformedResponse(msg)) => assert!(msg.contains("does not match")),
        other => panic!("Expected MalformedResponse, got {other:?}"),
    }
}

#[test]
fn test_rejected_query_is_malformed() {
    let stub = stub("mode = reject\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let query = engine.next_query(game(0).setup(0).unwrap(), 0, 10);

    match engine.evaluate(&query, GENEROUS) {
        Err(EngineError::MalformedResponse(msg)) => assert!(msg.contains("Illegal move")),
        other => panic!("Expected MalformedResponse, got {other:?}"),
    }
}

#[test]
fn test_missing_required_fields_is_malformed() {
    let stub = stub("mode = missing-fields\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let query = engine.next_query(game(0).setup(0).unwrap(), 0, 10);

    match engine.evaluate(&query, GENEROUS) {
        Err(EngineError::MalformedResponse(msg)) => assert!(msg.contains("moveInfos")),
        other => panic!("Expected MalformedResponse, got {other:?}"),
    }
}

#[test]
fn test_crash_is_reported() {
    let stub = stub("crash_on_query = 1\n");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    let game = game(1);

    let query = engine.next_query(game.setup(0).unwrap(), 0, 10);
    let err = engine.evaluate(&query, GENEROUS).expect_err("Engine crashed");
    assert!(matches!(err, EngineError::EngineCrashed(_)), "Got {err}");

    let query = engine.next_query(game.setup(1).unwrap(), 1, 10);
    let err = engine.evaluate(&query, GENEROUS).expect_err("Engine is gone");
    assert!(matches!(err, EngineError::EngineCrashed(_)), "Got {err}");
    assert!(!engine.is_alive());
}

#[test]
fn test_immediate_exit_is_start_failure() {
    let stub = stub("exit_immediately = true\n");
    match EngineProcess::start(&stub.config, "engine-1") {
        Err(EngineError::ProcessStartFailure { reason, .. }) => {
            assert!(reason.contains("exited immediately"), "Reason: {reason}")
        }
        Err(other) => panic!("Expected ProcessStartFailure, got {other}"),
        Ok(_) => panic!("Expected ProcessStartFailure"),
    }
}

#[test]
fn test_missing_model_is_start_failure() {
    let mut stub = stub("");
    stub.config.model_file = stub.path("missing.bin.gz");
    match EngineProcess::start(&stub.config, "engine-1") {
        Err(EngineError::ProcessStartFailure { reason, .. }) => {
            assert!(reason.contains("model"), "Reason: {reason}")
        }
        Err(other) => panic!("Expected ProcessStartFailure, got {other}"),
        Ok(_) => panic!("Expected ProcessStartFailure"),
    }
}

#[test]
fn test_stop_is_idempotent() {
    let stub = stub("");
    let engine = EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub");
    #[cfg(target_os = "linux")]
    let pid = engine.pid();
    assert!(engine.is_alive());

    engine.stop();
    engine.stop();
    assert!(!engine.is_alive());
    #[cfg(target_os = "linux")]
    assert!(!common::process_exists(pid), "Process {pid} still exists");

    let query = engine.next_query(game(0).setup(0).unwrap(), 0, 10);
    assert!(matches!(
        engine.evaluate(&query, GENEROUS),
        Err(EngineError::EngineCrashed(_))
    ));
}

#[test]
fn test_stop_interrupts_in_flight_query() {
    let stub = stub("delay_ms = 5000\n");
    let engine = Arc::new(EngineProcess::start(&stub.config, "engine-1").expect("Failed to start stub"));

    let worker = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let query = engine.next_query(game(0).setup(0).unwrap(), 0, 10);
            engine.evaluate(&query, GENEROUS)
        })
    };
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    engine.stop();
    let result = worker.join().expect("Worker panicked");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "stop took {:?}",
        started.elapsed()
    );
    assert!(matches!(result, Err(EngineError::EngineCrashed(_))));
}

#[test]
#[ignore = "requires KataGo"]
fn test_real_katago() {
    let (Ok(config_file), Ok(model_file)) =
        (std::env::var("KATAGO_CONFIG"), std::env::var("KATAGO_MODEL"))
    else {
        eprintln!("Skipping test: set KATAGO_CONFIG and KATAGO_MODEL");
        return;
    };
    let config = katago_analysis::EngineConfig::new("katago", config_file, model_file);
    let engine = EngineProcess::start(&config, "katago").expect("Failed to start KataGo");

    let query = engine.next_query(game(3).setup(3).unwrap(), 3, 20);
    let result = engine
        .evaluate(&query, Duration::from_secs(60))
        .expect("KataGo evaluation failed");
    assert!(!result.candidates.is_empty());
}
