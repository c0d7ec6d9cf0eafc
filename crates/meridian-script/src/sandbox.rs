// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebAssembly script engine using wasmtime.
//!
//! Scripts are compiled once into a cached [`Module`]. Every run gets a fresh
//! [`Store`] with its own fuel budget, memory limit and epoch deadline, so a
//! runaway select script cannot starve the poll loop that called it.
//!
//! A script module exports `memory` and a `run` function taking no arguments.
//! It reads its JSON scope through `get_input`, optionally queries the
//! connector's database or routes messages to other channels, and reports its
//! JSON result through `set_output`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use meridian_config::model::ScriptConfig;
use meridian_core::{CompiledScript, MeridianError, ScriptEngine, ScriptScope, ScriptSource};
use tracing::{debug, info};
use wasmtime::{Config, Engine, Linker, Module, Store, StoreLimitsBuilder};

use crate::host::{RunState, define_host_functions};

/// Granularity of the wall-clock deadline.
const EPOCH_TICK: Duration = Duration::from_millis(100);

/// Resource limits applied to every script run.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub fuel: u64,
    pub memory_bytes: usize,
    pub timeout: Duration,
}

impl From<&ScriptConfig> for SandboxLimits {
    fn from(config: &ScriptConfig) -> Self {
        Self {
            fuel: config.fuel,
            memory_bytes: usize::try_from(config.memory_mb)
                .unwrap_or(usize::MAX)
                .saturating_mul(1024 * 1024),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&ScriptConfig::default())
    }
}

/// Advances the engine epoch from a dedicated thread until dropped.
struct EpochTicker {
    stop: Arc<AtomicBool>,
}

impl EpochTicker {
    fn spawn(engine: Engine) -> Result<Self, MeridianError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("meridian-epoch".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| MeridianError::Internal(format!("failed to spawn epoch ticker: {e}")))?;
        Ok(Self { stop })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// [`ScriptEngine`] backed by wasmtime.
pub struct WasmScriptEngine {
    engine: Engine,
    limits: SandboxLimits,
    ticker: Arc<EpochTicker>,
}

impl WasmScriptEngine {
    pub fn new(limits: SandboxLimits) -> Result<Self, MeridianError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);

        let engine = Engine::new(&config).map_err(|e| {
            MeridianError::Internal(format!("failed to create wasmtime engine: {e}"))
        })?;
        let ticker = Arc::new(EpochTicker::spawn(engine.clone())?);

        info!(
            fuel = limits.fuel,
            memory_bytes = limits.memory_bytes,
            timeout_ms = limits.timeout.as_millis() as u64,
            "script engine initialized"
        );
        Ok(Self {
            engine,
            limits,
            ticker,
        })
    }
}

impl ScriptEngine for WasmScriptEngine {
    fn compile(&self, source: &ScriptSource) -> Result<Arc<dyn CompiledScript>, MeridianError> {
        // Module::new accepts both the binary format and WAT text.
        let module = Module::new(&self.engine, &source.code).map_err(|e| MeridianError::Compile {
            script: source.name.clone(),
            message: format!("{e:#}"),
        })?;

        let mut linker = Linker::new(&self.engine);
        define_host_functions(&mut linker).map_err(|e| {
            MeridianError::Internal(format!("failed to define host functions: {e}"))
        })?;

        // Reject modules that cannot be linked or lack the entry point now,
        // so the failure aborts deploy instead of every poll.
        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(|e| MeridianError::Compile {
                script: source.name.clone(),
                message: format!("{e:#}"),
            })?;
        let has_run = module
            .exports()
            .any(|export| export.name() == "run" && export.ty().func().is_some());
        if !has_run {
            return Err(MeridianError::Compile {
                script: source.name.clone(),
                message: "module does not export a `run` function".into(),
            });
        }

        debug!(script = %source.name, "compiled script");
        Ok(Arc::new(WasmCompiledScript {
            name: source.name.clone(),
            engine: self.engine.clone(),
            instance_pre,
            limits: self.limits,
            _ticker: Arc::clone(&self.ticker),
        }))
    }
}

/// A compiled, linked script ready to run.
pub struct WasmCompiledScript {
    name: String,
    engine: Engine,
    instance_pre: wasmtime::InstancePre<RunState>,
    limits: SandboxLimits,
    _ticker: Arc<EpochTicker>,
}

impl WasmCompiledScript {
    fn script_error(&self, message: impl Into<String>) -> MeridianError {
        MeridianError::Script {
            script: self.name.clone(),
            message: message.into(),
        }
    }

    fn classify(&self, error: &wasmtime::Error) -> MeridianError {
        let detail = format!("{error:#}");
        let message = if let Some(trap) = error.downcast_ref::<wasmtime::Trap>() {
            match trap {
                wasmtime::Trap::OutOfFuel => {
                    format!("exceeded fuel limit ({} units)", self.limits.fuel)
                }
                wasmtime::Trap::Interrupt => format!(
                    "exceeded wall-clock timeout ({}ms)",
                    self.limits.timeout.as_millis()
                ),
                _ => format!("trapped: {detail}"),
            }
        } else if detail.contains("capability not permitted") {
            format!("capability denied: {detail}")
        } else {
            detail
        };
        self.script_error(message)
    }
}

#[async_trait]
impl CompiledScript for WasmCompiledScript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, scope: ScriptScope) -> Result<serde_json::Value, MeridianError> {
        let input = scope.to_input_json()?;
        let state = RunState {
            script: self.name.clone(),
            input,
            output: None,
            database: scope.database.clone(),
            query_result: Vec::new(),
            router: scope.router.clone(),
            origin: scope.connector_message.clone(),
            route_result: Vec::new(),
            limits: StoreLimitsBuilder::new()
                .memory_size(self.limits.memory_bytes)
                .build(),
        };

        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.limits.fuel)
            .map_err(|e| self.script_error(format!("failed to set fuel: {e}")))?;
        let ticks = (self.limits.timeout.as_millis() / EPOCH_TICK.as_millis()).max(1);
        store.epoch_deadline_trap();
        store.set_epoch_deadline(u64::try_from(ticks).unwrap_or(u64::MAX));

        let instance_pre = self.instance_pre.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let instance = instance_pre.instantiate(&mut store)?;
            let run = instance.get_typed_func::<(), ()>(&mut store, "run")?;
            run.call(&mut store, ())?;
            Ok::<_, wasmtime::Error>(store.into_data())
        })
        .await
        .map_err(|e| self.script_error(format!("script task failed: {e}")))?;

        let state = outcome.map_err(|e| self.classify(&e))?;
        match state.output {
            None => Ok(serde_json::Value::Null),
            Some(bytes) if bytes.is_empty() => Ok(serde_json::Value::Null),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| self.script_error(format!("output is not valid JSON: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use meridian_core::{
        ChannelId, ConnectorMessage, ImmutableResponse, MessageRouter, RawMessage, Response,
        ScriptDatabase, ValueMap,
    };

    const ECHO: &str = r#"(module
        (import "meridian" "get_input_len" (func $len (result i32)))
        (import "meridian" "get_input" (func $get (param i32)))
        (import "meridian" "set_output" (func $set (param i32 i32)))
        (memory (export "memory") 1)
        (func (export "run")
            (local $n i32)
            (local.set $n (call $len))
            (call $get (i32.const 0))
            (call $set (i32.const 0) (local.get $n))))"#;

    const ROWS: &str = r#"(module
        (import "meridian" "set_output" (func $set (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "[{\"id\":1},{\"id\":2}]")
        (func (export "run")
            (call $set (i32.const 0) (i32.const 19))))"#;

    const QUERY: &str = r#"(module
        (import "meridian" "query" (func $query (param i32 i32) (result i32)))
        (import "meridian" "get_query_result" (func $result (param i32)))
        (import "meridian" "set_output" (func $set (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "SELECT id FROM outbox")
        (func (export "run")
            (local $n i32)
            (local.set $n (call $query (i32.const 0) (i32.const 21)))
            (call $result (i32.const 1024))
            (call $set (i32.const 1024) (local.get $n))))"#;

    const ROUTE: &str = r#"(module
        (import "meridian" "route" (func $route (param i32 i32) (result i32)))
        (import "meridian" "get_route_result" (func $result (param i32)))
        (import "meridian" "set_output" (func $set (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 0) "{\"channel\":\"lab-out\",\"message\":\"ORU^R01\"}")
        (func (export "run")
            (local $n i32)
            (local.set $n (call $route (i32.const 0) (i32.const 41)))
            (call $result (i32.const 1024))
            (call $set (i32.const 1024) (local.get $n))))"#;

    const SPIN: &str = r#"(module
        (memory (export "memory") 1)
        (func (export "run") (loop $l (br $l))))"#;

    fn engine(fuel: u64) -> WasmScriptEngine {
        WasmScriptEngine::new(SandboxLimits {
            fuel,
            memory_bytes: 16 * 1024 * 1024,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn source(name: &str, wat: &str) -> ScriptSource {
        ScriptSource::new(name, wat::parse_str(wat).unwrap())
    }

    struct FixedRows;

    #[async_trait]
    impl ScriptDatabase for FixedRows {
        async fn query(&self, sql: &str) -> Result<Vec<ValueMap>, MeridianError> {
            assert_eq!(sql, "SELECT id FROM outbox");
            let mut row = ValueMap::new();
            row.insert("id".into(), serde_json::json!(42));
            Ok(vec![row])
        }
    }

    #[derive(Default)]
    struct RecordingRouter {
        routed: Mutex<Vec<(String, String, Option<u64>)>>,
    }

    #[async_trait]
    impl MessageRouter for RecordingRouter {
        async fn route_message(
            &self,
            target: &str,
            message: RawMessage,
            origin: Option<&ConnectorMessage>,
        ) -> Option<ImmutableResponse> {
            self.routed.lock().unwrap().push((
                target.to_string(),
                message.raw_data,
                origin.map(|o| o.message_id),
            ));
            Some(Response::sent("ACK", "accepted").into())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echo_returns_scope() {
        let script = engine(1_000_000).compile(&source("echo", ECHO)).unwrap();
        let mut scope = ScriptScope::for_channel(ChannelId::from("adt-in"));
        scope
            .channel_map
            .insert("mrn".into(), serde_json::json!("A100"));
        let out = script.run(scope).await.unwrap();
        assert_eq!(out["channelId"], "adt-in");
        assert_eq!(out["channelMap"]["mrn"], "A100");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn constant_output_parses_as_rows() {
        let script = engine(1_000_000).compile(&source("rows", ROWS)).unwrap();
        let out = script.run(ScriptScope::default()).await.unwrap();
        assert_eq!(out, serde_json::json!([{"id": 1}, {"id": 2}]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wat_text_compiles_directly() {
        let script = engine(1_000_000)
            .compile(&ScriptSource::new("text", ROWS.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(script.name(), "text");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_uses_supplied_connection() {
        let script = engine(1_000_000).compile(&source("select", QUERY)).unwrap();
        let scope = ScriptScope::default().with_database(Arc::new(FixedRows));
        let out = script.run(scope).await.unwrap();
        assert_eq!(out, serde_json::json!([{"id": 42}]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_without_connection_is_denied() {
        let script = engine(1_000_000).compile(&source("select", QUERY)).unwrap();
        let err = script.run(ScriptScope::default()).await.unwrap_err();
        match err {
            MeridianError::Script { script, message } => {
                assert_eq!(script, "select");
                assert!(message.contains("capability denied"), "{message}");
            }
            other => panic!("expected script error, got {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn route_returns_target_response() {
        let script = engine(1_000_000).compile(&source("update", ROUTE)).unwrap();
        let router = Arc::new(RecordingRouter::default());
        let mut scope = ScriptScope::for_channel(ChannelId::from("adt-in"))
            .with_router(router.clone());
        scope.connector_message = Some(ConnectorMessage::new(
            7,
            0,
            ChannelId::from("adt-in"),
            "Source",
        ));

        let out = script.run(scope).await.unwrap();
        assert_eq!(out["status"], "SENT");
        assert_eq!(out["message"], "ACK");
        assert_eq!(out["statusMessage"], "accepted");

        let routed = router.routed.lock().unwrap();
        assert_eq!(
            *routed,
            vec![("lab-out".to_string(), "ORU^R01".to_string(), Some(7))]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn route_without_router_is_denied() {
        let script = engine(1_000_000).compile(&source("update", ROUTE)).unwrap();
        let err = script.run(ScriptScope::default()).await.unwrap_err();
        assert!(err.to_string().contains("capability denied"), "{err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runaway_script_exhausts_fuel() {
        let script = engine(10_000).compile(&source("spin", SPIN)).unwrap();
        let err = script.run(ScriptScope::default()).await.unwrap_err();
        assert!(err.to_string().contains("fuel"), "{err}");
        assert!(err.to_string().contains("spin"));
    }

    #[test]
    fn invalid_module_fails_compilation() {
        let err = match engine(1_000).compile(&ScriptSource::new("broken", b"(module (func".to_vec())) {
            Err(e) => e,
            Ok(_) => panic!("broken module compiled"),
        };
        assert!(matches!(err, MeridianError::Compile { ref script, .. } if script == "broken"));
    }

    #[test]
    fn missing_run_export_fails_compilation() {
        let err = match engine(1_000).compile(&source("norun", "(module (memory (export \"memory\") 1))")) {
            Err(e) => e,
            Ok(_) => panic!("module without run compiled"),
        };
        assert!(err.to_string().contains("run"));
    }

    #[test]
    fn unknown_import_fails_compilation() {
        let wat = r#"(module (import "meridian" "http_request" (func)) (func (export "run")))"#;
        assert!(engine(1_000).compile(&source("net", wat)).is_err());
    }
}
