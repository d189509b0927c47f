//! Embedded script evaluation for pre, post and mock scripts.

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ti_core::{ComponentLog, ConcurrencyGate, DataType, Error, OutputDecl, Result, RunPhase, TypedValue};
use ti_placeholder::OutputBindings;

use crate::adapter::{infer, input_map, to_dynamic, to_typed};
use crate::state::PersistedScriptState;

/// A declared output as seen from inside a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSlot {
    pub name: String,
    /// Variable substituted for `${out:name}`.
    pub id: String,
    pub data_type: DataType,
}

/// Slots for every declared output that has an id in `bindings`.
pub fn output_slots(bindings: &OutputBindings, outputs: &[OutputDecl]) -> Vec<OutputSlot> {
    outputs
        .iter()
        .filter_map(|decl| {
            bindings.id_for(&decl.name).map(|id| OutputSlot {
                name: decl.name.clone(),
                id: id.to_string(),
                data_type: decl.data_type,
            })
        })
        .collect()
}

/// Paths and values a script can see.
#[derive(Debug, Clone, Default)]
pub struct ScriptEnvironment {
    pub working_dir: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config_dir: PathBuf,
    pub tool_dir: PathBuf,
    pub inputs: BTreeMap<String, TypedValue>,
    pub local_paths: BTreeMap<String, PathBuf>,
    pub execution_count: u64,
}

/// A rendered script and what it runs against.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub phase: RunPhase,
    pub source: String,
    pub environment: ScriptEnvironment,
    pub outputs: Vec<OutputSlot>,
}

/// What a completed script produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptResult {
    /// `(output name, value)` pairs in the order they were released.
    pub outputs: Vec<(String, TypedValue)>,
    pub closed: Vec<String>,
    pub exit_code: Option<i64>,
    pub state: PersistedScriptState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    Completed(ScriptResult),
    Cancelled,
}

/// Evaluates scripts one at a time across all jobs sharing a gate.
pub struct ScriptRunner {
    gate: ConcurrencyGate,
    log: Arc<dyn ComponentLog>,
}

impl ScriptRunner {
    pub fn new(gate: ConcurrencyGate, log: Arc<dyn ComponentLog>) -> Self {
        Self { gate, log }
    }

    /// Evaluate `request` under the script lock.
    ///
    /// An empty script completes immediately and hands `state` back unchanged.
    pub async fn run(
        &self,
        request: ScriptRequest,
        state: PersistedScriptState,
        cancel: CancellationToken,
    ) -> Result<ScriptOutcome> {
        if request.source.trim().is_empty() {
            return Ok(ScriptOutcome::Completed(ScriptResult {
                state,
                ..ScriptResult::default()
            }));
        }
        if cancel.is_cancelled() {
            return Ok(ScriptOutcome::Cancelled);
        }

        let _guard = tokio::select! {
            guard = self.gate.lock_scripts() => guard,
            _ = cancel.cancelled() => return Ok(ScriptOutcome::Cancelled),
        };

        let phase = request.phase;
        self.log
            .info(&format!("Executing {} script...", phase.label()));
        let log = Arc::clone(&self.log);
        let token = cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || evaluate(request, state, log, token))
            .await
            .map_err(|e| Error::script(phase.label(), format!("evaluation task failed: {e}")))??;

        match &outcome {
            ScriptOutcome::Completed(result) => match result.exit_code {
                Some(code) => self.log.info(&format!(
                    "{} script executed - exit code: {}",
                    capitalized(phase.label()),
                    code
                )),
                None => self
                    .log
                    .info(&format!("{} script executed", capitalized(phase.label()))),
            },
            ScriptOutcome::Cancelled => debug!("{} script cancelled", phase.label()),
        }
        Ok(outcome)
    }
}

fn capitalized(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn slash(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

/// Runs on the blocking pool; the engine never leaves this thread.
fn evaluate(
    request: ScriptRequest,
    state: PersistedScriptState,
    log: Arc<dyn ComponentLog>,
    cancel: CancellationToken,
) -> Result<ScriptOutcome> {
    let phase = request.phase.label();
    let env = &request.environment;
    let declared: BTreeMap<String, DataType> = request
        .outputs
        .iter()
        .map(|slot| (slot.name.clone(), slot.data_type))
        .collect();
    let declared = Rc::new(declared);
    let state = Rc::new(RefCell::new(state));
    let written: Rc<RefCell<Vec<(String, Dynamic)>>> = Rc::default();
    let closed: Rc<RefCell<Vec<String>>> = Rc::default();

    let mut engine = Engine::new();
    {
        let log = Arc::clone(&log);
        engine.on_print(move |text| log.tool_stdout(text));
    }
    {
        let log = Arc::clone(&log);
        engine.on_debug(move |text, _source, _pos| log.tool_stderr(text));
    }
    {
        let cancel = cancel.clone();
        engine.on_progress(move |_| cancel.is_cancelled().then_some(Dynamic::UNIT));
    }

    let count = i64::try_from(env.execution_count).unwrap_or(i64::MAX);
    engine.register_fn("execution_count", move || count);
    {
        let state = Rc::clone(&state);
        engine.register_fn("read_state", move |key: &str| {
            state.borrow().get(key).map(to_dynamic).unwrap_or(Dynamic::UNIT)
        });
    }
    {
        let state = Rc::clone(&state);
        engine.register_fn("has_state", move |key: &str| state.borrow().contains(key));
    }
    {
        let state = Rc::clone(&state);
        engine.register_fn(
            "write_state",
            move |key: &str, value: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
                let typed = infer(value).map_err(|e| format!("State variable '{key}': {e}"))?;
                state.borrow_mut().set(key, typed);
                Ok(())
            },
        );
    }
    {
        let declared = Rc::clone(&declared);
        let written = Rc::clone(&written);
        engine.register_fn(
            "write_output",
            move |name: &str, value: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
                if !declared.contains_key(name) {
                    return Err(format!("Output '{name}' is not declared").into());
                }
                written.borrow_mut().push((name.to_string(), value));
                Ok(())
            },
        );
    }
    {
        let declared = Rc::clone(&declared);
        let closed = Rc::clone(&closed);
        engine.register_fn(
            "close_output",
            move |name: &str| -> std::result::Result<(), Box<EvalAltResult>> {
                if !declared.contains_key(name) {
                    return Err(format!("Output '{name}' is not declared").into());
                }
                closed.borrow_mut().push(name.to_string());
                Ok(())
            },
        );
    }

    let mut scope = Scope::new();
    scope.push_constant("working_dir", slash(&env.working_dir));
    scope.push_constant("input_dir", slash(&env.input_dir));
    scope.push_constant("output_dir", slash(&env.output_dir));
    scope.push_constant("config_dir", slash(&env.config_dir));
    scope.push_constant("tool_dir", slash(&env.tool_dir));
    scope.push_constant("inputs", input_map(&env.inputs, &env.local_paths));
    for slot in &request.outputs {
        scope.push_dynamic(slot.id.as_str(), Dynamic::UNIT);
    }

    let value = match engine.eval_with_scope::<Dynamic>(&mut scope, &request.source) {
        Ok(value) => value,
        Err(err) if matches!(*err, EvalAltResult::ErrorTerminated(..)) => {
            return Ok(ScriptOutcome::Cancelled);
        }
        Err(err) => return Err(Error::script(phase, err.to_string())),
    };

    let exit_code = exit_code(phase, value)?;

    let mut outputs = Vec::new();
    for slot in &request.outputs {
        let Some(value) = scope.get_value::<Dynamic>(&slot.id) else {
            continue;
        };
        if value.is_unit() {
            continue;
        }
        outputs.push((slot.name.clone(), convert(phase, slot, value, &env.working_dir)?));
    }
    let explicit = std::mem::take(&mut *written.borrow_mut());
    for (name, value) in explicit {
        if let Some(slot) = request.outputs.iter().find(|s| s.name == name) {
            outputs.push((name, convert(phase, slot, value, &env.working_dir)?));
        }
    }

    let closed = std::mem::take(&mut *closed.borrow_mut());
    let state = state.borrow().clone();
    Ok(ScriptOutcome::Completed(ScriptResult {
        outputs,
        closed,
        exit_code,
        state,
    }))
}

/// The final value of a script is its exit code: unit means none, any other
/// value than integer 0 is a failure.
fn exit_code(phase: &str, value: Dynamic) -> Result<Option<i64>> {
    if value.is_unit() {
        return Ok(None);
    }
    match value.as_int() {
        Ok(0) => Ok(Some(0)),
        _ => Err(Error::script(
            phase,
            format!("terminated abnormally - exit code: {value}"),
        )),
    }
}

fn convert(phase: &str, slot: &OutputSlot, value: Dynamic, working_dir: &Path) -> Result<TypedValue> {
    to_typed(value, slot.data_type, working_dir).map_err(|e| {
        Error::script(phase, format!("Invalid value for output '{}': {}", slot.name, e))
    })
}
