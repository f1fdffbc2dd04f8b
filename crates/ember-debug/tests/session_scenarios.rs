//! End-to-end session scenarios against a scripted fake VM.

mod support;

use std::time::Duration;

use support::{
    boot_steps, delta, run_script, set_breakpoint_steps, test_system, TraceListener, VmStep, BOOM,
    FIB,
};

use ember_debug::{exit_codes, DebugSession, SessionConfig, SessionError, VmState};
use ember_wire::{Command, Connection, Literal, Opcode, Reply};

fn new_session(connection: Connection) -> DebugSession {
    DebugSession::new(connection, SessionConfig::default())
}

#[tokio::test]
async fn scenario_spawn_run_clean_exit() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = boot_steps();
    steps.extend([
        VmStep::Expect(Opcode::ProcessRun),
        VmStep::Send(Reply::StdoutData {
            bytes: b"hi\n".to_vec(),
        }),
        VmStep::Send(Reply::ProcessTerminated),
    ]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let (listener, log) = TraceListener::new();
    session.add_listener(Box::new(listener));

    let system = test_system();
    session.initialize(&[delta(&system)], None).await.unwrap();
    let exit = session.run().await.unwrap();

    assert_eq!(exit, 0);
    assert_eq!(session.interactive_exit_code(), 0);
    assert_eq!(session.vm_state(), VmState::Terminating);
    assert_eq!(
        log.snapshot(),
        vec![
            "pauseStart 0",
            "processRunnable 0",
            "processStart 0",
            "processRunnable 0",
            "resume 0",
            "writeStdOut 0 hi\n",
            "processExit 0",
        ]
    );
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_breakpoint_hit_then_continue() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = boot_steps();
    steps.extend(set_breakpoint_steps(7));
    steps.extend([
        VmStep::Expect(Opcode::ProcessRun),
        VmStep::Send(Reply::ProcessBreakpoint {
            process_id: 1,
            breakpoint_id: 7,
            function_id: FIB,
            bytecode_index: 4,
        }),
        VmStep::Expect(Opcode::ProcessContinue),
        VmStep::Send(Reply::ProcessTerminated),
    ]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let (listener, log) = TraceListener::new();
    session.add_listener(Box::new(listener));

    let system = test_system();
    session.initialize(&[delta(&system)], None).await.unwrap();

    let set = session.set_breakpoint_at_method("main.fib", 4).await.unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set[0].id, 7);
    assert_eq!(set[0].function.name, "main.fib");

    let exit = session.run().await.unwrap();
    assert_eq!(exit, 0);
    assert_eq!(session.vm_state(), VmState::Paused);
    // Stop handling clears the pause caches until the next request.
    assert!(session.debug_state().back_trace().is_none());

    let stop = session.cont().await.unwrap();
    assert_eq!(stop, Reply::ProcessTerminated);
    assert_eq!(session.vm_state(), VmState::Terminating);

    let events = log.snapshot();
    assert!(events.contains(&"breakpointAdded bp7".to_string()));
    assert!(events.contains(&"pauseBreakpoint 1 fn17:4 bp7".to_string()));
    assert!(events.contains(&"resume 0".to_string()));
    assert!(events.contains(&"processExit 0".to_string()));
    // The breakpoint pause precedes the continue's resume and the exit.
    let pause_at = events.iter().position(|e| e.starts_with("pauseBreakpoint")).unwrap();
    let exit_at = events.iter().position(|e| e == "processExit 0").unwrap();
    assert!(pause_at < exit_at);
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_connection_dropped_mid_run() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = boot_steps();
    steps.extend([VmStep::Expect(Opcode::ProcessRun), VmStep::Close]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let (listener, log) = TraceListener::new();
    session.add_listener(Box::new(listener));

    let system = test_system();
    session.initialize(&[delta(&system)], None).await.unwrap();
    let exit = session.run().await.unwrap();

    assert_eq!(exit, exit_codes::CONNECTION_ERROR);
    assert_eq!(session.vm_state(), VmState::Terminated);
    assert!(log.contains("lostConnection"));
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_uncaught_exception() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = boot_steps();
    steps.extend([
        VmStep::Expect(Opcode::ProcessRun),
        VmStep::Send(Reply::UncaughtException {
            process_id: 2,
            function_id: BOOM,
            bytecode_index: 12,
        }),
        VmStep::Expect(Opcode::ProcessUncaughtExceptionRequest),
        VmStep::Send(Reply::Value(Literal::Str("E".into()))),
    ]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let (listener, log) = TraceListener::new();
    session.add_listener(Box::new(listener));

    let system = test_system();
    session.initialize(&[delta(&system)], None).await.unwrap();
    let exit = session.run().await.unwrap();

    assert_eq!(exit, exit_codes::UNCAUGHT_EXCEPTION);
    assert_eq!(session.vm_state(), VmState::Terminating);
    assert!(log.contains("pauseException 2 fn9:12 E"));
    assert_eq!(
        session.uncaught_exception().unwrap().as_literal(),
        Some(&Literal::Str("E".into()))
    );
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_step_out_single_visible_frame_degrades_to_cont() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = boot_steps();
    steps.extend(set_breakpoint_steps(7));
    steps.extend([
        VmStep::Expect(Opcode::ProcessRun),
        VmStep::Send(Reply::ProcessBreakpoint {
            process_id: 1,
            breakpoint_id: 7,
            function_id: FIB,
            bytecode_index: 4,
        }),
        VmStep::Expect(Opcode::ProcessBacktraceRequest),
        VmStep::Send(Reply::ProcessBacktrace {
            function_ids: vec![FIB],
            bytecode_indices: vec![4],
        }),
        VmStep::Expect(Opcode::ProcessContinue),
        VmStep::Send(Reply::ProcessTerminated),
    ]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let (listener, log) = TraceListener::new();
    session.add_listener(Box::new(listener));

    let system = test_system();
    session.initialize(&[delta(&system)], None).await.unwrap();
    session.set_breakpoint_at_method("main.fib", 4).await.unwrap();
    session.run().await.unwrap();

    let stop = session.step_out().await.unwrap();
    assert_eq!(stop, Reply::ProcessTerminated);
    assert!(log.contains("processExit 0"));

    // The VM never saw a step-out command.
    let received = vm.await.unwrap();
    assert!(received
        .iter()
        .all(|command| command.opcode() != Opcode::ProcessStepOut));
}

#[tokio::test]
async fn scenario_snapshot_hash_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("app.snapshot");
    std::fs::write(
        dir.path().join("app.snapshot.info.json"),
        format!(r#"{{"snapshot_hash": {}}}"#, 0xBBBBu32),
    )
    .unwrap();

    let (connection, stream) = Connection::in_memory(64 * 1024);
    let vm = run_script(
        stream,
        vec![
            VmStep::Expect(Opcode::Debugging),
            VmStep::Send(Reply::DebuggingReply {
                is_from_snapshot: true,
                snapshot_hash: 0xAAAA,
            }),
        ],
    );

    let mut session = new_session(connection);
    let system = test_system();
    let err = session
        .initialize(&[delta(&system)], Some(&snapshot))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::SnapshotHashMismatch {
            expected: 0xBBBB,
            actual: 0xAAAA,
        }
    ));
    // The session shut down before surfacing the error, and no spawn was sent.
    assert_eq!(session.vm_state(), VmState::Terminated);
    let received = vm.await.unwrap();
    assert!(received
        .iter()
        .all(|command| command.opcode() != Opcode::ProcessSpawnForMain));
}

#[tokio::test]
async fn scenario_snapshot_mode_translates_ids_both_ways() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("app.snapshot");
    std::fs::write(
        dir.path().join("app.snapshot.info.json"),
        format!(
            r#"{{"snapshot_hash": {}, "function_offsets": {{"main.fib": 1017}}}}"#,
            0xAAAAu32
        ),
    )
    .unwrap();

    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = vec![
        VmStep::Expect(Opcode::Debugging),
        VmStep::Send(Reply::DebuggingReply {
            is_from_snapshot: true,
            snapshot_hash: 0xAAAA,
        }),
        VmStep::Expect(Opcode::ProcessSpawnForMain),
    ];
    steps.extend(set_breakpoint_steps(7));
    steps.extend([
        VmStep::Expect(Opcode::ProcessRun),
        // The VM reports the snapshot offset, not the compiler id.
        VmStep::Send(Reply::ProcessBreakpoint {
            process_id: 1,
            breakpoint_id: 7,
            function_id: 1017,
            bytecode_index: 4,
        }),
    ]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let system = test_system();
    session
        .initialize(&[delta(&system)], Some(&snapshot))
        .await
        .unwrap();

    session.set_breakpoint_at_method("main.fib", 4).await.unwrap();
    session.run().await.unwrap();

    // Inbound offsets are translated back to compiler ids.
    assert_eq!(session.debug_state().top_frame().unwrap().function_id, FIB);

    // Outbound ids were translated to offsets.
    let received = vm.await.unwrap();
    let push = received
        .iter()
        .find_map(|command| match command {
            Command::PushFromMap { id, .. } => Some(*id),
            _ => None,
        })
        .unwrap();
    assert_eq!(push, 1017);
}

#[tokio::test]
async fn scenario_compile_time_error() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let mut steps = boot_steps();
    steps.extend([
        VmStep::Expect(Opcode::ProcessRun),
        VmStep::Send(Reply::ProcessCompileTimeError),
    ]);
    let vm = run_script(stream, steps);

    let mut session = new_session(connection);
    let (listener, log) = TraceListener::new();
    session.add_listener(Box::new(listener));

    let system = test_system();
    session.initialize(&[delta(&system)], None).await.unwrap();
    let exit = session.run().await.unwrap();

    assert_eq!(exit, exit_codes::COMPILE_TIME_ERROR);
    assert_eq!(session.vm_state(), VmState::Terminating);
    assert!(log.contains("processExit 0"));
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_initialize_applies_compilation_deltas() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let vm = run_script(
        stream,
        vec![
            VmStep::Expect(Opcode::Debugging),
            VmStep::Send(Reply::DebuggingReply {
                is_from_snapshot: false,
                snapshot_hash: 0,
            }),
            VmStep::Expect(Opcode::LiveEditing),
            // The delta's patch commands go out before the spawn.
            VmStep::Expect(Opcode::NewMap),
            VmStep::Expect(Opcode::PushFromMap),
            VmStep::Expect(Opcode::ProcessSpawnForMain),
        ],
    );

    let mut session = new_session(connection);
    let system = test_system();
    let patch = ember_debug::CompilationDelta {
        commands: vec![
            Command::NewMap {
                map: ember_wire::MapId::Methods,
            },
            Command::PushFromMap {
                map: ember_wire::MapId::Methods,
                id: 17,
            },
        ],
        system: system.clone(),
    };
    session.initialize(&[patch], None).await.unwrap();
    assert_eq!(session.vm_state(), VmState::Spawned);
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_handshake_succeeds() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    let vm = run_script(
        stream,
        vec![
            VmStep::Expect(Opcode::HandShake),
            VmStep::Send(Reply::HandShakeResult {
                success: true,
                version: "1.4.0".into(),
            }),
        ],
    );

    let mut session = new_session(connection);
    let reply = session.handshake("1.4.0").await.unwrap();
    assert_eq!(
        reply,
        Some(Reply::HandShakeResult {
            success: true,
            version: "1.4.0".into(),
        })
    );
    vm.await.unwrap();
}

#[tokio::test]
async fn scenario_handshake_times_out_and_retries() {
    let (connection, stream) = Connection::in_memory(64 * 1024);
    // Accept the first handshake, then go quiet without closing.
    let vm = run_script(
        stream,
        vec![
            VmStep::Expect(Opcode::HandShake),
            VmStep::Sleep(Duration::from_secs(2)),
        ],
    );

    let config = SessionConfig {
        handshake_retry_interval: Duration::from_millis(40),
        handshake_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    };
    let mut session = DebugSession::new(connection, config);
    let err = session.handshake("1.4.0").await.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeTimeout(_)));
    vm.abort();
}
