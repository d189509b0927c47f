//! Embedded script evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ti_core::test_support::{LogLevel, RecordingLog};
use ti_core::{ConcurrencyGate, DataType, OutputDecl, RunPhase, TypedValue};
use ti_placeholder::OutputBindings;
use ti_runner::{
    output_slots, PersistedScriptState, ScriptEnvironment, ScriptOutcome, ScriptRequest,
    ScriptResult, ScriptRunner,
};
use tokio_util::sync::CancellationToken;

fn outputs() -> Vec<OutputDecl> {
    vec![
        OutputDecl::new("result", DataType::Float),
        OutputDecl::new("report", DataType::FileReference),
        OutputDecl::new("label", DataType::ShortText),
    ]
}

fn request(source: &str, bindings: &OutputBindings, dir: &std::path::Path) -> ScriptRequest {
    let mut inputs = BTreeMap::new();
    inputs.insert("x".to_string(), TypedValue::Integer(4));
    ScriptRequest {
        phase: RunPhase::PostScript,
        source: source.to_string(),
        environment: ScriptEnvironment {
            working_dir: dir.to_path_buf(),
            input_dir: dir.join("Input"),
            output_dir: dir.join("Output"),
            config_dir: dir.join("Config"),
            tool_dir: dir.to_path_buf(),
            inputs,
            local_paths: BTreeMap::new(),
            execution_count: 2,
        },
        outputs: output_slots(bindings, &outputs()),
    }
}

async fn completed(runner: &ScriptRunner, request: ScriptRequest) -> ScriptResult {
    match runner
        .run(request, PersistedScriptState::new(), CancellationToken::new())
        .await
        .unwrap()
    {
        ScriptOutcome::Completed(result) => result,
        ScriptOutcome::Cancelled => panic!("script was cancelled"),
    }
}

#[tokio::test]
async fn output_variables_are_harvested() {
    let dir = tempfile::tempdir().unwrap();
    let bindings = OutputBindings::new(&outputs());
    let id = bindings.id_for("result").unwrap().to_string();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());

    let source = format!("{id} = inputs[\"x\"] * 2.5; print(\"computed\");");
    let result = completed(&runner, request(&source, &bindings, dir.path())).await;

    assert_eq!(result.outputs, vec![("result".to_string(), TypedValue::Float(10.0))]);
    assert_eq!(result.exit_code, None);
}

#[tokio::test]
async fn print_goes_to_tool_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let log = RecordingLog::new();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), log.clone());

    completed(
        &runner,
        request("print(`run ${execution_count()}`);", &OutputBindings::default(), dir.path()),
    )
    .await;

    assert!(log.contains(LogLevel::Stdout, "run 2"));
    assert!(log.contains(LogLevel::Info, "Executing post execution script..."));
}

#[tokio::test]
async fn explicit_writes_and_closes_are_collected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("report.txt"), "done").unwrap();
    let bindings = OutputBindings::new(&outputs());
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());

    let source = r#"
        write_output("report", "report.txt");
        write_output("label", 7);
        close_output("label");
    "#;
    let result = completed(&runner, request(source, &bindings, dir.path())).await;

    assert_eq!(
        result.outputs,
        vec![
            ("report".to_string(), TypedValue::FileReference(dir.path().join("report.txt"))),
            ("label".to_string(), TypedValue::ShortText("7".into())),
        ]
    );
    assert_eq!(result.closed, vec!["label".to_string()]);
}

#[tokio::test]
async fn undeclared_output_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());

    let err = runner
        .run(
            request("write_output(\"nope\", 1);", &OutputBindings::default(), dir.path()),
            PersistedScriptState::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ScriptExecutionError");
}

#[tokio::test]
async fn missing_output_file_fails_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let bindings = OutputBindings::new(&outputs());
    let id = bindings.id_for("report").unwrap().to_string();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());

    let err = runner
        .run(
            request(&format!("{id} = \"absent.txt\";"), &bindings, dir.path()),
            PersistedScriptState::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("report"));
    assert!(err.to_string().contains("doesn't exist"));
}

#[tokio::test]
async fn exit_value_must_be_zero_or_unit() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());
    let bindings = OutputBindings::default();

    let ok = completed(&runner, request("0", &bindings, dir.path())).await;
    assert_eq!(ok.exit_code, Some(0));

    for source in ["1", "\"done\""] {
        let err = runner
            .run(
                request(source, &bindings, dir.path()),
                PersistedScriptState::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ScriptExecutionError");
        assert!(err.to_string().contains("terminated abnormally - exit code"));
    }
}

#[tokio::test]
async fn state_survives_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());
    let bindings = OutputBindings::default();
    let source = r#"
        let total = if has_state("total") { read_state("total") } else { 0 };
        write_state("total", total + inputs["x"]);
    "#;

    let first = completed(&runner, request(source, &bindings, dir.path())).await;
    let second = match runner
        .run(request(source, &bindings, dir.path()), first.state, CancellationToken::new())
        .await
        .unwrap()
    {
        ScriptOutcome::Completed(result) => result,
        ScriptOutcome::Cancelled => panic!("script was cancelled"),
    };
    assert_eq!(second.state.get("total"), Some(&TypedValue::Integer(8)));
}

#[tokio::test]
async fn empty_script_returns_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let log = RecordingLog::new();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), log.clone());
    let mut state = PersistedScriptState::new();
    state.set("kept", TypedValue::Boolean(true));

    let outcome = runner
        .run(request("  \n", &OutputBindings::default(), dir.path()), state.clone(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ScriptOutcome::Completed(ScriptResult {
            state,
            ..ScriptResult::default()
        })
    );
    assert!(log.lines().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endless_script_is_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptRunner::new(ConcurrencyGate::default(), RecordingLog::new());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = runner
        .run(
            request("let spins = 0; loop { spins += 1; }", &OutputBindings::default(), dir.path()),
            PersistedScriptState::new(),
            cancel,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ScriptOutcome::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_for_the_script_lock_can_be_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let gate = ConcurrencyGate::default();
    let runner = Arc::new(ScriptRunner::new(gate.clone(), RecordingLog::new()));
    let held = gate.lock_scripts().await;

    let cancel = CancellationToken::new();
    let task = {
        let runner = Arc::clone(&runner);
        let cancel = cancel.clone();
        let request = request("print(\"never\");", &OutputBindings::default(), dir.path());
        tokio::spawn(async move { runner.run(request, PersistedScriptState::new(), cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    assert_eq!(task.await.unwrap().unwrap(), ScriptOutcome::Cancelled);
    drop(held);
}
