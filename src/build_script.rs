//! Build-script execution.
//!
//! A script is lowered once, its modules are pre-loaded through the host,
//! and the body then runs synchronously against the unit's bindings.

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::bindings::Bindings;
use crate::config::CompilerConfig;
use crate::error::ScriptError;
use crate::host::CompilerHost;
use crate::interpreter::{Interpreter, Realm};
use crate::lower::{lower_script, LoweredScript};
use crate::value::{BuildStore, Value};

/// What a running script can reach besides its own code.
pub struct ScriptContext<'a> {
    pub bindings: &'a Bindings,
    pub props: Value,
    pub store: BuildStore,
    pub host: &'a dyn CompilerHost,
    pub file_url: &'a str,
    pub config: &'a CompilerConfig,
}

fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Parses and lowers a script. Path-like import specifiers are resolved
/// against `file_url`; bare ones are passed to the host untouched.
pub fn prepare(
    source: &str,
    module: bool,
    host: &dyn CompilerHost,
    file_url: &str,
) -> Result<LoweredScript, ScriptError> {
    let resolve = |specifier: &str| {
        if is_path_specifier(specifier) {
            host.resolve_url(file_url, specifier)
        } else {
            specifier.to_string()
        }
    };
    lower_script(source, module, &resolve)
}

/// Loads every module the script imports, then runs its body.
pub async fn run(lowered: &LoweredScript, ctx: ScriptContext<'_>) -> Result<(), ScriptError> {
    let mut modules = HashMap::new();
    for url in &lowered.modules {
        debug!(url = %url, file = %ctx.file_url, "preload module");
        let record = ctx.host.import_module(url).await?;
        modules.insert(url.clone(), record);
    }

    let interpreter = Interpreter::new(Realm {
        bindings: ctx.bindings,
        props: ctx.props,
        store: ctx.store,
        host: ctx.host,
        file_url: ctx.file_url.to_string(),
        modules,
        config: ctx.config,
    });
    interpreter.run_script(&lowered.body)
}

/// Runs a standalone JS module and returns its record of exports.
pub async fn evaluate_module(
    host: &dyn CompilerHost,
    url: &str,
    source: &str,
    config: &CompilerConfig,
    store: BuildStore,
) -> Result<Value, ScriptError> {
    let lowered = prepare(source, true, host, url)?;
    for reexport in &lowered.reexports {
        warn!(url, "re-export ignored in module: {}", reexport);
    }

    let bindings = Bindings::new();
    run(
        &lowered,
        ScriptContext {
            bindings: &bindings,
            props: Value::Undefined,
            store,
            host,
            file_url: url,
            config,
        },
    )
    .await?;

    let mut record = IndexMap::new();
    for alias in &lowered.aliases {
        record.insert(
            alias.exported.clone(),
            bindings.get(&alias.local).unwrap_or_default(),
        );
    }
    Ok(Value::object(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    async fn run_source(
        source: &str,
        module: bool,
        host: &MemoryHost,
        bindings: &Bindings,
    ) -> Result<LoweredScript, ScriptError> {
        let config = CompilerConfig::default();
        let lowered = prepare(source, module, host, "/pages/index.html")?;
        run(
            &lowered,
            ScriptContext {
                bindings,
                props: Value::Undefined,
                store: BuildStore::new(),
                host,
                file_url: "/pages/index.html",
                config: &config,
            },
        )
        .await?;
        Ok(lowered)
    }

    #[tokio::test]
    async fn test_declarations_land_in_bindings() {
        let host = MemoryHost::new();
        let bindings = Bindings::new();
        run_source("const a = 1; let b = a + 1; function f() { return b * 10; } var c = f();", false, &host, &bindings)
            .await
            .unwrap();
        assert_eq!(bindings.get("a").unwrap().to_number(), 1.0);
        assert_eq!(bindings.get("c").unwrap().to_number(), 20.0);
        assert!(!bindings.lookup("a").unwrap().mutable);
        assert!(bindings.lookup("b").unwrap().mutable);
    }

    #[tokio::test]
    async fn test_const_reassignment_in_later_script_fails() {
        let host = MemoryHost::new();
        let bindings = Bindings::new();
        run_source("const x = 1; let y = 1;", false, &host, &bindings)
            .await
            .unwrap();
        let err = run_source("x = 2;", false, &host, &bindings)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("constant"), "{}", err);
        assert_eq!(bindings.get("x").unwrap().to_number(), 1.0);

        run_source("y = 5;", false, &host, &bindings).await.unwrap();
        assert_eq!(bindings.get("y").unwrap().to_number(), 5.0);
    }

    #[tokio::test]
    async fn test_relative_imports_resolve_against_file() {
        let mut exports = IndexMap::new();
        exports.insert("default".to_string(), Value::from("hello"));
        exports.insert("n".to_string(), Value::from(4.0));
        let host = MemoryHost::new().with_module("/pages/lib.js", Value::object(exports));
        let bindings = Bindings::new();
        let lowered = run_source(
            "import greet, { n as count } from './lib.js';\nexport const shout = greet.toUpperCase() + count;",
            true,
            &host,
            &bindings,
        )
        .await
        .unwrap();
        assert_eq!(lowered.modules, vec!["/pages/lib.js".to_string()]);
        assert_eq!(bindings.get("shout").unwrap().as_str(), Some("HELLO4"));
        assert_eq!(lowered.aliases[0].exported, "shout");
    }

    #[tokio::test]
    async fn test_missing_module_is_script_failure() {
        let host = MemoryHost::new();
        let bindings = Bindings::new();
        let err = run_source("import x from './gone.js';", true, &host, &bindings)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::ModuleLoad(_)));
    }

    #[tokio::test]
    async fn test_plain_script_rejects_exports() {
        let host = MemoryHost::new();
        let bindings = Bindings::new();
        let err = run_source("export const a = 1;", false, &host, &bindings)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
    }

    #[tokio::test]
    async fn test_evaluate_module_collects_exports() {
        let host = MemoryHost::new();
        let record = evaluate_module(
            &host,
            "/lib/math.js",
            "export function sq(n) { return n * n; }\nconst base = 3;\nexport { base as start };\nexport default sq(base);",
            &CompilerConfig::default(),
            BuildStore::new(),
        )
        .await
        .unwrap();
        let json = record.to_json();
        let Value::Object(map) = &record else {
            panic!("record is an object: {:?}", json);
        };
        let map = map.borrow();
        assert_eq!(map.get("start").unwrap().to_number(), 3.0);
        assert_eq!(map.get("default").unwrap().to_number(), 9.0);
        assert!(map.contains_key("sq"));
    }
}
