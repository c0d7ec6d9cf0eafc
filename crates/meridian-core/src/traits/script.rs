// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User script compilation and execution.
//!
//! Scripts never see engine internals: everything they can read arrives as the
//! plain-data [`ScriptScope`]. The side effects they can request are a
//! database query through the optional [`ScriptDatabase`] handle and routing a
//! message to another channel through the optional [`MessageRouter`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::MeridianError;
use crate::traits::dispatch::MessageRouter;
use crate::message::{ConnectorMessage, ValueMap};
use crate::types::ChannelId;

/// Script source with its identity. The name appears in every error the script causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub name: String,
    pub code: Vec<u8>,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, code: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// Database access handed to a running script.
#[async_trait]
pub trait ScriptDatabase: Send + Sync + 'static {
    /// Runs one statement and returns its rows keyed by column name.
    /// Statements that return no rows yield an empty list.
    async fn query(&self, sql: &str) -> Result<Vec<ValueMap>, MeridianError>;
}

/// Everything a script run can see.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptScope {
    pub channel_id: Option<ChannelId>,
    pub channel_map: ValueMap,
    pub source_map: ValueMap,
    pub connector_map: ValueMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_map: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ValueMap>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_message: Option<ConnectorMessage>,
    #[serde(skip)]
    pub database: Option<Arc<dyn ScriptDatabase>>,
    #[serde(skip)]
    pub router: Option<Arc<dyn MessageRouter>>,
}

impl ScriptScope {
    pub fn for_channel(channel_id: ChannelId) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: Arc<dyn ScriptDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn MessageRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Serializes the scope to the JSON document scripts receive as input.
    pub fn to_input_json(&self) -> Result<Vec<u8>, MeridianError> {
        serde_json::to_vec(self).map_err(|e| MeridianError::Internal(format!("scope encoding: {e}")))
    }
}

impl std::fmt::Debug for ScriptScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptScope")
            .field("channel_id", &self.channel_id)
            .field("result_map", &self.result_map)
            .field("results", &self.results.as_ref().map(Vec::len))
            .field("database", &self.database.is_some())
            .field("router", &self.router.is_some())
            .finish_non_exhaustive()
    }
}

/// A script compiled once and run many times.
#[async_trait]
pub trait CompiledScript: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Runs the script against `scope` and returns its JSON output
    /// (`null` when the script produced none).
    async fn run(&self, scope: ScriptScope) -> Result<serde_json::Value, MeridianError>;
}

/// Compiles scripts. Compilation failures are [`MeridianError::Compile`].
pub trait ScriptEngine: Send + Sync + 'static {
    fn compile(&self, source: &ScriptSource) -> Result<Arc<dyn CompiledScript>, MeridianError>;
}
