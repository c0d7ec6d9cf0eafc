// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Script engine backed by Rust closures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::{CompiledScript, MeridianError, ScriptEngine, ScriptScope, ScriptSource};
use serde_json::Value;

/// Body of a fake script. An `Err` becomes a script failure naming the script.
pub type ScriptFn = Arc<dyn Fn(&ScriptScope) -> Result<Value, String> + Send + Sync>;

/// Compiles a [`ScriptSource`] by looking its name up in a table of closures.
#[derive(Default, Clone)]
pub struct FnScriptEngine {
    scripts: HashMap<String, ScriptFn>,
    compile_errors: HashMap<String, String>,
}

impl FnScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ScriptScope) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.scripts.insert(name.into(), Arc::new(f));
        self
    }

    /// Compiling `name` fails with `message`.
    pub fn with_compile_error(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.compile_errors.insert(name.into(), message.into());
        self
    }
}

impl ScriptEngine for FnScriptEngine {
    fn compile(&self, source: &ScriptSource) -> Result<Arc<dyn CompiledScript>, MeridianError> {
        if let Some(message) = self.compile_errors.get(&source.name) {
            return Err(MeridianError::Compile {
                script: source.name.clone(),
                message: message.clone(),
            });
        }
        let body = self
            .scripts
            .get(&source.name)
            .cloned()
            .ok_or_else(|| MeridianError::Compile {
                script: source.name.clone(),
                message: "no script registered under this name".into(),
            })?;
        Ok(Arc::new(FnScript {
            name: source.name.clone(),
            body,
        }))
    }
}

struct FnScript {
    name: String,
    body: ScriptFn,
}

#[async_trait]
impl CompiledScript for FnScript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, scope: ScriptScope) -> Result<Value, MeridianError> {
        (self.body)(&scope).map_err(|message| MeridianError::Script {
            script: self.name.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn runs_registered_closure() {
        let engine = FnScriptEngine::new().with_script("select", |_| Ok(json!([{"id": 1}])));
        let script = engine.compile(&ScriptSource::new("select", "")).unwrap();
        assert_eq!(script.run(ScriptScope::default()).await.unwrap(), json!([{"id": 1}]));
    }

    #[test]
    fn unknown_and_broken_scripts_fail_to_compile() {
        let engine = FnScriptEngine::new().with_compile_error("update", "unexpected token");
        let err = engine.compile(&ScriptSource::new("update", "")).err().unwrap();
        assert!(matches!(err, MeridianError::Compile { ref message, .. } if message == "unexpected token"));
        assert!(engine.compile(&ScriptSource::new("missing", "")).is_err());
    }
}
