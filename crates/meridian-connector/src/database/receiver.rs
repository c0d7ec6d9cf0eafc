// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The database polling source connector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use meridian_config::model::{DatabaseSourceConfig, UpdateMode};
use meridian_core::{
    CompiledScript, ConnectionStatus, ConnectorMessage, DispatchOptions, MeridianError,
    PollDecision, RawMessage, ScriptEngine, ScriptScope, ScriptSource, ValueMap,
};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::pool::{ConnectionPool, DatabaseUrl, PooledConnection};
use super::rows::{ConnectionDatabase, execute_named, fetch_rows};
use crate::lifecycle::{ConnectorContext, ConnectorState, SourceConnector, StateCell};
use crate::retry::RetryPolicy;
use crate::scheduler::{TaskHandle, spawn_repeating};

/// Scripts for a connector running in script mode.
#[derive(Clone)]
pub struct ScriptBundle {
    pub engine: Arc<dyn ScriptEngine>,
    pub select: ScriptSource,
    pub update: Option<ScriptSource>,
}

/// What one poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The tick did not run: the connector is not running or the gate said no.
    Skipped { reason: String },
    /// Rows were read and every one was dispatched and updated.
    Completed { dispatched: usize },
    /// The select failed on every attempt.
    Abandoned { attempts: u32, error: String },
    /// Dispatch or the update failed part way; the rest of the tick was dropped.
    Aborted { dispatched: usize, error: String },
}

struct CompiledScripts {
    select: Arc<dyn CompiledScript>,
    update: Option<Arc<dyn CompiledScript>>,
}

/// The connection a tick works on: the long-lived one, or one borrowed from the pool.
enum TickConnection {
    Held(tokio_rusqlite::Connection),
    Pooled(PooledConnection),
}

impl TickConnection {
    fn handle(&self) -> &tokio_rusqlite::Connection {
        match self {
            Self::Held(conn) => conn,
            Self::Pooled(pooled) => pooled.connection(),
        }
    }
}

/// Rows handed to the update step.
enum UpdateInput<'a> {
    Row(&'a ValueMap),
    Batch(&'a [ValueMap]),
}

/// Publishes IDLE when a tick ends, however it ends.
struct IdleGuard<'a>(&'a ConnectorContext);

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        self.0.publish_status(ConnectionStatus::Idle);
    }
}

struct Inner {
    ctx: ConnectorContext,
    settings: DatabaseSourceConfig,
    script_sources: Option<ScriptBundle>,
    retry: RetryPolicy,
    state: StateCell,
    running: AtomicBool,
    pool: RwLock<Option<ConnectionPool>>,
    held: tokio::sync::Mutex<Option<PooledConnection>>,
    scripts: RwLock<Option<Arc<CompiledScripts>>>,
}

/// Polls a database on a fixed interval and dispatches each result row
/// (or, with `aggregate_results`, the whole result set) into its channel.
pub struct DatabaseReceiver {
    inner: Arc<Inner>,
    task: tokio::sync::Mutex<Option<TaskHandle>>,
}

impl DatabaseReceiver {
    /// Creates a receiver. `scripts` is required when `settings.use_script` is set.
    pub fn new(
        ctx: ConnectorContext,
        settings: DatabaseSourceConfig,
        scripts: Option<ScriptBundle>,
    ) -> Self {
        let retry = RetryPolicy::from(&settings);
        Self {
            inner: Arc::new(Inner {
                ctx,
                settings,
                script_sources: scripts,
                retry,
                state: StateCell::new(),
                running: AtomicBool::new(false),
                pool: RwLock::new(None),
                held: tokio::sync::Mutex::new(None),
                scripts: RwLock::new(None),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &ConnectorContext {
        &self.inner.ctx
    }

    /// Runs one tick now. The schedule calls this; so can tests and operators.
    pub async fn poll(&self) -> PollOutcome {
        self.inner.poll().await
    }
}

#[async_trait]
impl SourceConnector for DatabaseReceiver {
    fn name(&self) -> &str {
        &self.inner.ctx.connector_name
    }

    fn state(&self) -> ConnectorState {
        self.inner.state.get()
    }

    async fn on_deploy(&self) -> Result<(), MeridianError> {
        let inner = &self.inner;
        if inner.state.get() != ConnectorState::Undeployed {
            return Err(inner.ctx.error("connector is already deployed"));
        }

        let url = DatabaseUrl::parse(&inner.settings.url)?;
        let scripts = inner.compile_scripts().inspect_err(|e| {
            error!(
                channel_id = %inner.ctx.channel_id,
                error = %e,
                "script compilation failed, deploy aborted"
            );
        })?;
        let pool = ConnectionPool::open(url, inner.settings.pool_size).await?;

        *write(&inner.pool) = Some(pool);
        *write(&inner.scripts) = scripts.map(Arc::new);
        inner
            .state
            .transition(&inner.ctx, &[ConnectorState::Undeployed], ConnectorState::Deployed)?;
        inner.ctx.publish_status(ConnectionStatus::Idle);
        info!(
            channel_id = %inner.ctx.channel_id,
            connector = %inner.ctx.connector_name,
            script_mode = inner.settings.use_script,
            "database source deployed"
        );
        Ok(())
    }

    async fn start(&self) -> Result<(), MeridianError> {
        let inner = &self.inner;
        inner.state.transition(
            &inner.ctx,
            &[ConnectorState::Deployed, ConnectorState::Stopped],
            ConnectorState::Running,
        )?;
        inner.running.store(true, Ordering::Release);

        let period = Duration::from_millis(inner.settings.poll_interval_ms);
        let ticking = Arc::clone(inner);
        let handle = spawn_repeating(
            format!("{}/{}", inner.ctx.channel_id, inner.ctx.connector_name),
            period,
            move || {
                let ticking = Arc::clone(&ticking);
                async move {
                    let outcome = ticking.poll().await;
                    trace!(?outcome, "poll tick finished");
                }
            },
        );
        *self.task.lock().await = Some(handle);
        info!(
            channel_id = %inner.ctx.channel_id,
            poll_interval_ms = inner.settings.poll_interval_ms,
            "database source started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), MeridianError> {
        let inner = &self.inner;
        match inner.state.get() {
            ConnectorState::Running => {}
            ConnectorState::Deployed | ConnectorState::Stopped => return Ok(()),
            ConnectorState::Undeployed => {
                return Err(inner.ctx.error("connector is not deployed"));
            }
        }

        inner.running.store(false, Ordering::Release);
        if let Some(handle) = self.task.lock().await.take() {
            handle.shutdown().await;
        }
        inner.release_held().await;
        inner.state.set(ConnectorState::Stopped);
        info!(channel_id = %inner.ctx.channel_id, "database source stopped");
        Ok(())
    }

    async fn on_undeploy(&self) -> Result<(), MeridianError> {
        let inner = &self.inner;
        match inner.state.get() {
            ConnectorState::Undeployed => return Ok(()),
            ConnectorState::Running => self.stop().await?,
            ConnectorState::Deployed | ConnectorState::Stopped => {}
        }

        *write(&inner.scripts) = None;
        let pool = write(&inner.pool).take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        inner.state.set(ConnectorState::Undeployed);
        debug!(channel_id = %inner.ctx.channel_id, "database source undeployed");
        Ok(())
    }
}

impl Inner {
    fn compile_scripts(&self) -> Result<Option<CompiledScripts>, MeridianError> {
        if !self.settings.use_script {
            return Ok(None);
        }
        let bundle = self.script_sources.as_ref().ok_or_else(|| {
            MeridianError::Config(format!(
                "channel {}: script mode requires select and update scripts",
                self.ctx.channel_id
            ))
        })?;
        let select = bundle.engine.compile(&bundle.select)?;
        // NEVER mode runs no update, so none is compiled.
        if self.settings.update_mode == UpdateMode::Never {
            return Ok(Some(CompiledScripts {
                select,
                update: None,
            }));
        }
        let update = bundle
            .update
            .as_ref()
            .map(|source| bundle.engine.compile(source))
            .transpose()?;
        if update.is_none() {
            return Err(MeridianError::Config(format!(
                "channel {}: update mode {:?} needs an update script",
                self.ctx.channel_id, self.settings.update_mode
            )));
        }
        Ok(Some(CompiledScripts { select, update }))
    }

    async fn poll(&self) -> PollOutcome {
        if !self.running.load(Ordering::Acquire) {
            return PollOutcome::Skipped {
                reason: "connector is not running".into(),
            };
        }
        let fencing_token = match self.ctx.gate.decide() {
            PollDecision::Proceed { fencing_token } => fencing_token,
            PollDecision::Skip { reason } => {
                debug!(channel_id = %self.ctx.channel_id, %reason, "poll skipped");
                return PollOutcome::Skipped { reason };
            }
        };

        let _idle = IdleGuard(&self.ctx);
        self.ctx.publish_status(ConnectionStatus::Polling);

        let (rows, conn) = match self.retry.run("select", |attempt| self.fetch(attempt)).await {
            Ok(fetched) => fetched,
            Err((e, attempts)) => {
                warn!(
                    channel_id = %self.ctx.channel_id,
                    attempts,
                    error = %e,
                    "select failed on every attempt, tick abandoned"
                );
                return PollOutcome::Abandoned {
                    attempts,
                    error: e.chain_report(),
                };
            }
        };
        debug!(channel_id = %self.ctx.channel_id, rows = rows.len(), "select returned");

        let mut dispatched = 0;
        match self
            .process(&rows, &conn, fencing_token, &mut dispatched)
            .await
        {
            Ok(()) => PollOutcome::Completed { dispatched },
            Err(e) => {
                error!(
                    channel_id = %self.ctx.channel_id,
                    dispatched,
                    error = %e,
                    "poll aborted"
                );
                PollOutcome::Aborted {
                    dispatched,
                    error: e.chain_report(),
                }
            }
        }
    }

    async fn fetch(&self, attempt: u32) -> Result<(Vec<ValueMap>, TickConnection), MeridianError> {
        trace!(channel_id = %self.ctx.channel_id, attempt, "select attempt");
        let conn = self.acquire_connection().await?;
        self.ctx.publish_status(ConnectionStatus::Reading);

        let rows = match self.compiled() {
            Some(scripts) => self.select_by_script(&scripts.select, conn.handle()).await,
            None => self.select_by_sql(conn.handle()).await,
        };
        match rows {
            Ok(rows) => Ok((rows, conn)),
            Err(e) => {
                // A connection that failed a select is never reused.
                match conn {
                    TickConnection::Held(_) => self.discard_held().await,
                    TickConnection::Pooled(pooled) => pooled.discard(),
                }
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        rows: &[ValueMap],
        conn: &TickConnection,
        fencing_token: Option<u64>,
        dispatched: &mut usize,
    ) -> Result<(), MeridianError> {
        let mode = self.settings.update_mode;
        let mut last = None;

        if self.settings.aggregate_results {
            if !rows.is_empty() {
                let batch = Value::Array(rows.iter().map(row_value).collect());
                last = self.dispatch(batch, fencing_token).await?;
                *dispatched += 1;
                if mode == UpdateMode::Each {
                    self.run_update(conn, UpdateInput::Batch(rows), last.clone(), fencing_token)
                        .await?;
                }
            }
        } else {
            for row in rows {
                let merged = self.dispatch(row_value(row), fencing_token).await?;
                *dispatched += 1;
                if mode == UpdateMode::Each {
                    self.run_update(conn, UpdateInput::Row(row), merged.clone(), fencing_token)
                        .await?;
                }
                last = merged;
            }
        }

        // The only place a ONCE update runs: exactly one per tick, rows or not.
        if mode == UpdateMode::Once {
            self.run_update(conn, UpdateInput::Batch(rows), last, fencing_token)
                .await?;
        }
        Ok(())
    }

    /// Dispatches one raw message and returns the merged connector message.
    async fn dispatch(
        &self,
        payload: Value,
        fencing_token: Option<u64>,
    ) -> Result<Option<ConnectorMessage>, MeridianError> {
        let raw_data = serde_json::to_string(&payload)
            .map_err(|e| self.ctx.error(format!("row encoding failed: {e}")))?;
        let mut source_map = ValueMap::new();
        source_map.insert(
            "connectorName".into(),
            Value::from(self.ctx.connector_name.clone()),
        );
        if let Some(token) = fencing_token {
            source_map.insert("fencingToken".into(), Value::from(token));
        }
        let result = self
            .ctx
            .dispatcher
            .dispatch_raw_message(
                RawMessage::new(raw_data).with_source_map(source_map),
                DispatchOptions::default(),
            )
            .await?;
        Ok(result.message.merged_connector_message())
    }

    async fn run_update(
        &self,
        conn: &TickConnection,
        input: UpdateInput<'_>,
        merged: Option<ConnectorMessage>,
        fencing_token: Option<u64>,
    ) -> Result<(), MeridianError> {
        if let Some(script) = self.compiled().and_then(|s| s.update.clone()) {
            self.check_fence(fencing_token).await?;
            let mut scope = self.scope(conn.handle());
            match input {
                UpdateInput::Row(row) => scope.result_map = Some(row.clone()),
                UpdateInput::Batch(rows) => scope.results = Some(rows.to_vec()),
            }
            scope.connector_message = merged;
            script.run(scope).await?;
            return Ok(());
        }

        let Some(sql) = self.settings.update.clone() else {
            return Ok(());
        };
        self.check_fence(fencing_token).await?;
        let params = match input {
            UpdateInput::Row(row) => row.clone(),
            UpdateInput::Batch(_) => ValueMap::new(),
        };
        let changed = conn
            .handle()
            .call(move |c| -> Result<usize, rusqlite::Error> { execute_named(c, &sql, &params) })
            .await
            .map_err(|e| MeridianError::Connector {
                channel_id: self.ctx.channel_id.clone(),
                connector: self.ctx.connector_name.clone(),
                message: "update statement failed".into(),
                source: Some(Box::new(e)),
            })?;
        trace!(channel_id = %self.ctx.channel_id, changed, "update applied");
        Ok(())
    }

    /// Refuses the write when this node's lease has been superseded since the
    /// tick's gate decision.
    async fn check_fence(&self, fencing_token: Option<u64>) -> Result<(), MeridianError> {
        match (&self.ctx.fencing, fencing_token) {
            (Some(fencing), Some(token)) => fencing.validate(token).await,
            _ => Ok(()),
        }
    }

    async fn select_by_sql(
        &self,
        conn: &tokio_rusqlite::Connection,
    ) -> Result<Vec<ValueMap>, MeridianError> {
        let sql = self.settings.select.clone();
        conn.call(move |c| -> Result<Vec<ValueMap>, rusqlite::Error> { fetch_rows(c, &sql) })
            .await
            .map_err(|e| MeridianError::Connector {
                channel_id: self.ctx.channel_id.clone(),
                connector: self.ctx.connector_name.clone(),
                message: "select statement failed".into(),
                source: Some(Box::new(e)),
            })
    }

    async fn select_by_script(
        &self,
        script: &Arc<dyn CompiledScript>,
        conn: &tokio_rusqlite::Connection,
    ) -> Result<Vec<ValueMap>, MeridianError> {
        let output = script.run(self.scope(conn)).await?;
        rows_from_output(script.name(), output)
    }

    fn scope(&self, conn: &tokio_rusqlite::Connection) -> ScriptScope {
        let scope = ScriptScope::for_channel(self.ctx.channel_id.clone())
            .with_database(Arc::new(ConnectionDatabase::new(conn.clone())));
        match &self.ctx.router {
            Some(router) => scope.with_router(Arc::clone(router)),
            None => scope,
        }
    }

    async fn acquire_connection(&self) -> Result<TickConnection, MeridianError> {
        let pool = read(&self.pool)
            .clone()
            .ok_or_else(|| self.ctx.error("connector is not deployed"))?;
        if !self.settings.keep_connection_open {
            return Ok(TickConnection::Pooled(pool.acquire().await?));
        }

        let mut held = self.held.lock().await;
        if let Some(pooled) = held.as_ref() {
            return Ok(TickConnection::Held(pooled.connection().clone()));
        }
        let pooled = pool.acquire().await?;
        let conn = pooled.connection().clone();
        *held = Some(pooled);
        self.ctx.publish_status(ConnectionStatus::Connected);
        Ok(TickConnection::Held(conn))
    }

    async fn release_held(&self) {
        if self.held.lock().await.take().is_some() {
            self.ctx.publish_status(ConnectionStatus::Disconnected);
        }
    }

    /// Drops the held connection without returning it to the pool.
    async fn discard_held(&self) {
        let held = self.held.lock().await.take();
        if let Some(pooled) = held {
            pooled.discard();
            self.ctx.publish_status(ConnectionStatus::Disconnected);
        }
    }

    fn compiled(&self) -> Option<Arc<CompiledScripts>> {
        read(&self.scripts).clone()
    }
}

/// Turns a select script's output into rows: an array of objects, a single
/// object, or `null` for nothing.
fn rows_from_output(script: &str, output: Value) -> Result<Vec<ValueMap>, MeridianError> {
    let invalid = || MeridianError::Script {
        script: script.to_string(),
        message: "select script must return an object, an array of objects, or null".into(),
    };
    match output {
        Value::Null => Ok(Vec::new()),
        Value::Object(obj) => Ok(vec![obj.into_iter().collect()]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj.into_iter().collect()),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn row_value(row: &ValueMap) -> Value {
    Value::Object(row.clone().into_iter().collect())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_output_shapes() {
        assert!(rows_from_output("s", Value::Null).unwrap().is_empty());
        assert_eq!(rows_from_output("s", json!({"id": 1})).unwrap().len(), 1);
        assert_eq!(
            rows_from_output("s", json!([{"id": 1}, {"id": 2}])).unwrap()[1]["id"],
            json!(2)
        );
        let err = rows_from_output("pick-orders", json!([1, 2])).unwrap_err();
        assert!(matches!(err, MeridianError::Script { ref script, .. } if script == "pick-orders"));
        assert!(rows_from_output("s", json!("text")).is_err());
    }
}
