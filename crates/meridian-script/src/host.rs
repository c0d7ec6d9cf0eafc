// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host functions exposed to scripts under the `meridian` import module.
//!
//! | import            | signature                 | effect                                   |
//! |-------------------|---------------------------|------------------------------------------|
//! | `log`             | `(level, ptr, len)`       | emits a tracing event                    |
//! | `get_input_len`   | `() -> i32`               | byte length of the JSON scope            |
//! | `get_input`       | `(ptr)`                   | copies the JSON scope into memory        |
//! | `set_output`      | `(ptr, len)`              | records the script's JSON result         |
//! | `query`           | `(ptr, len) -> i32`       | runs SQL, returns result length          |
//! | `get_query_result`| `(ptr)`                   | copies the last query result into memory |
//! | `route`           | `(ptr, len) -> i32`       | routes to a channel, returns result length |
//! | `get_route_result`| `(ptr)`                   | copies the last route response into memory |
//!
//! `query` traps with "capability not permitted" when the run was not handed a
//! database connection, `route` when it was not handed a router.
//!
//! A `route` request is a JSON object `{"channel": <id>, "message": <raw>}`
//! with an optional `sourceMap`. The result is the response as JSON
//! (`status`, `message`, `statusMessage`, `error`) or `null` when the target
//! channel selected none.

use std::sync::Arc;

use anyhow::anyhow;
use meridian_core::{ConnectorMessage, MessageRouter, RawMessage, ScriptDatabase, ValueMap};
use serde::Deserialize;
use tracing::{debug, warn};
use wasmtime::{Caller, Linker, Memory, StoreLimits};

pub(crate) const IMPORT_MODULE: &str = "meridian";

/// Per-run state stored in the wasmtime `Store`.
pub(crate) struct RunState {
    pub script: String,
    pub input: Vec<u8>,
    pub output: Option<Vec<u8>>,
    pub database: Option<Arc<dyn ScriptDatabase>>,
    pub query_result: Vec<u8>,
    pub router: Option<Arc<dyn MessageRouter>>,
    pub origin: Option<ConnectorMessage>,
    pub route_result: Vec<u8>,
    pub limits: StoreLimits,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRequest {
    channel: String,
    message: String,
    #[serde(default)]
    source_map: ValueMap,
}

pub(crate) fn define_host_functions(linker: &mut Linker<RunState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "log",
        |mut caller: Caller<'_, RunState>, level: i32, ptr: i32, len: i32| {
            let Some(memory) = exported_memory(&mut caller) else {
                return;
            };
            let Some(msg) = read_string(&memory, &caller, ptr, len) else {
                return;
            };
            let script = caller.data().script.as_str();
            match level {
                ..=1 => debug!(script, script_log = %msg, "script log"),
                2 => tracing::info!(script, script_log = %msg, "script log"),
                3 => warn!(script, script_log = %msg, "script log"),
                _ => tracing::error!(script, script_log = %msg, "script log"),
            }
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "get_input_len",
        |caller: Caller<'_, RunState>| -> i32 {
            i32::try_from(caller.data().input.len()).unwrap_or(i32::MAX)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "get_input",
        |mut caller: Caller<'_, RunState>, ptr: i32| -> Result<(), wasmtime::Error> {
            let memory = exported_memory(&mut caller)
                .ok_or_else(|| anyhow!("script module exports no memory"))?;
            let input = std::mem::take(&mut caller.data_mut().input);
            let written = write_bytes(&memory, &mut caller, ptr, &input);
            caller.data_mut().input = input;
            written
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "set_output",
        |mut caller: Caller<'_, RunState>, ptr: i32, len: i32| -> Result<(), wasmtime::Error> {
            let memory = exported_memory(&mut caller)
                .ok_or_else(|| anyhow!("script module exports no memory"))?;
            let bytes = read_bytes(&memory, &caller, ptr, len)
                .ok_or_else(|| anyhow!("set_output range out of bounds"))?;
            caller.data_mut().output = Some(bytes);
            Ok(())
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "query",
        |mut caller: Caller<'_, RunState>, ptr: i32, len: i32| -> Result<i32, wasmtime::Error> {
            let Some(database) = caller.data().database.clone() else {
                warn!(script = %caller.data().script, "script attempted query without a connection");
                return Err(anyhow!("capability not permitted: no database connection for this script").into());
            };
            let memory = exported_memory(&mut caller)
                .ok_or_else(|| anyhow!("script module exports no memory"))?;
            let sql = read_string(&memory, &caller, ptr, len)
                .ok_or_else(|| anyhow!("query text out of bounds or not UTF-8"))?;

            // Runs on a blocking thread inside the runtime, so the handle is available.
            let rows = tokio::runtime::Handle::current()
                .block_on(database.query(&sql))
                .map_err(|e| anyhow!("query failed: {e}"))?;
            let encoded = serde_json::to_vec(&rows)?;
            let n = i32::try_from(encoded.len())
                .map_err(|_| anyhow!("query result too large"))?;
            caller.data_mut().query_result = encoded;
            Ok(n)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "get_query_result",
        |mut caller: Caller<'_, RunState>, ptr: i32| -> Result<(), wasmtime::Error> {
            let memory = exported_memory(&mut caller)
                .ok_or_else(|| anyhow!("script module exports no memory"))?;
            let result = std::mem::take(&mut caller.data_mut().query_result);
            let written = write_bytes(&memory, &mut caller, ptr, &result);
            caller.data_mut().query_result = result;
            written
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "route",
        |mut caller: Caller<'_, RunState>, ptr: i32, len: i32| -> Result<i32, wasmtime::Error> {
            let Some(router) = caller.data().router.clone() else {
                warn!(script = %caller.data().script, "script attempted to route without a router");
                return Err(anyhow!("capability not permitted: message routing is not available to this script").into());
            };
            let memory = exported_memory(&mut caller)
                .ok_or_else(|| anyhow!("script module exports no memory"))?;
            let bytes = read_bytes(&memory, &caller, ptr, len)
                .ok_or_else(|| anyhow!("route request out of bounds"))?;
            let request: RouteRequest = serde_json::from_slice(&bytes)
                .map_err(|e| anyhow!("invalid route request: {e}"))?;
            let origin = caller.data().origin.clone();
            let message = RawMessage::new(request.message).with_source_map(request.source_map);

            let response = tokio::runtime::Handle::current().block_on(router.route_message(
                &request.channel,
                message,
                origin.as_ref(),
            ));
            debug!(
                script = %caller.data().script,
                target = %request.channel,
                status = ?response.as_ref().map(|r| r.status()),
                "script routed message"
            );
            let encoded = serde_json::to_vec(&response)?;
            let n = i32::try_from(encoded.len())
                .map_err(|_| anyhow!("route result too large"))?;
            caller.data_mut().route_result = encoded;
            Ok(n)
        },
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        "get_route_result",
        |mut caller: Caller<'_, RunState>, ptr: i32| -> Result<(), wasmtime::Error> {
            let memory = exported_memory(&mut caller)
                .ok_or_else(|| anyhow!("script module exports no memory"))?;
            let result = std::mem::take(&mut caller.data_mut().route_result);
            let written = write_bytes(&memory, &mut caller, ptr, &result);
            caller.data_mut().route_result = result;
            written
        },
    )?;

    Ok(())
}

fn exported_memory(caller: &mut Caller<'_, RunState>) -> Option<Memory> {
    match caller.get_export("memory") {
        Some(wasmtime::Extern::Memory(mem)) => Some(mem),
        _ => None,
    }
}

fn read_bytes(memory: &Memory, caller: &Caller<'_, RunState>, ptr: i32, len: i32) -> Option<Vec<u8>> {
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    memory.data(caller).get(start..end).map(<[u8]>::to_vec)
}

fn read_string(memory: &Memory, caller: &Caller<'_, RunState>, ptr: i32, len: i32) -> Option<String> {
    read_bytes(memory, caller, ptr, len).and_then(|b| String::from_utf8(b).ok())
}

fn write_bytes(
    memory: &Memory,
    caller: &mut Caller<'_, RunState>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), wasmtime::Error> {
    let start = usize::try_from(ptr).map_err(|_| anyhow!("negative pointer"))?;
    let end = start
        .checked_add(bytes.len())
        .ok_or_else(|| anyhow!("pointer overflow"))?;
    let target = memory
        .data_mut(caller)
        .get_mut(start..end)
        .ok_or_else(|| anyhow!("write of {} bytes at {start} out of bounds", bytes.len()))?;
    target.copy_from_slice(bytes);
    Ok(())
}
