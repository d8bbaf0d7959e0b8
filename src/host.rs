//! The compiler's view of the outside world: URL resolution, file reads
//! and module loading.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::build_script;
use crate::config::CompilerConfig;
use crate::error::HostError;
use crate::value::{BuildStore, Value};

#[async_trait(?Send)]
pub trait CompilerHost {
    /// Resolves `relative` against the document URL `base`.
    fn resolve_url(&self, base: &str, relative: &str) -> String {
        resolve_url(base, relative)
    }

    async fn read_file_content(&self, url: &str) -> Result<String, HostError>;

    /// Loads a module record: an object keyed by exported name.
    async fn import_module(&self, url: &str) -> Result<Value, HostError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// URL RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Joins `relative` onto `base` the way a browser would for a page served
/// from `file:///`.
///
/// Same-origin results come back as `path?query#fragment`; anything that
/// escapes the origin (another scheme, a host) is returned whole.
pub fn resolve_url(base: &str, relative: &str) -> String {
    let Ok(root) = Url::parse("file:///") else {
        return relative.to_string();
    };
    let base_path = if base.starts_with('/') {
        base.to_string()
    } else {
        format!("/{}", base)
    };
    let Ok(base_url) = root.join(&base_path) else {
        return relative.to_string();
    };
    match base_url.join(relative) {
        Ok(joined) if joined.scheme() == "file" && joined.host_str().unwrap_or("").is_empty() => {
            let mut out = joined.path().to_string();
            if let Some(query) = joined.query() {
                out.push('?');
                out.push_str(query);
            }
            if let Some(fragment) = joined.fragment() {
                out.push('#');
                out.push_str(fragment);
            }
            out
        }
        Ok(joined) => joined.to_string(),
        Err(_) => relative.to_string(),
    }
}

/// Relative references that URL rebasing should touch.
///
/// Absolute paths, protocol-relative and scheme-qualified URLs, fragment-only
/// references and values still holding a marker are left alone.
pub fn is_relative_reference(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.starts_with('/') || value.starts_with('#') || value.contains("{{")
    {
        return false;
    }
    !has_scheme(value)
}

fn has_scheme(value: &str) -> bool {
    match value.find(':') {
        Some(colon) => {
            let scheme = &value[..colon];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !value[..colon].contains('/')
        }
        None => false,
    }
}

fn extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn json_module(url: &str, text: &str) -> Result<Value, HostError> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| HostError::Module {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let mut record = IndexMap::new();
    record.insert("default".to_string(), Value::from_json(&json));
    Ok(Value::object(record))
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY HOST
// ═══════════════════════════════════════════════════════════════════════════════

/// Virtual files and pre-built module records.
#[derive(Default)]
pub struct MemoryHost {
    files: HashMap<String, String>,
    modules: HashMap<String, Value>,
    reads: RefCell<Vec<String>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, url: &str, content: &str) -> Self {
        self.files.insert(url.to_string(), content.to_string());
        self
    }

    pub fn with_module(mut self, url: &str, record: Value) -> Self {
        self.modules.insert(url.to_string(), record);
        self
    }

    /// Every URL passed to `read_file_content`, in call order.
    pub fn reads(&self) -> Vec<String> {
        self.reads.borrow().clone()
    }
}

#[async_trait(?Send)]
impl CompilerHost for MemoryHost {
    async fn read_file_content(&self, url: &str) -> Result<String, HostError> {
        self.reads.borrow_mut().push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| HostError::NotFound(url.to_string()))
    }

    async fn import_module(&self, url: &str) -> Result<Value, HostError> {
        if let Some(record) = self.modules.get(url) {
            return Ok(record.clone());
        }
        match (extension(url).as_str(), self.files.get(url)) {
            ("json", Some(text)) => json_module(url, text),
            _ => Err(HostError::NotFound(url.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILESYSTEM HOST
// ═══════════════════════════════════════════════════════════════════════════════

/// Serves URLs from a directory: `/a/b.html` is `<root>/a/b.html`.
pub struct FsHost {
    root: PathBuf,
    config: CompilerConfig,
    store: BuildStore,
    cache: RefCell<HashMap<String, Value>>,
    loading: RefCell<Vec<String>>,
}

impl FsHost {
    pub fn new(root: impl Into<PathBuf>, config: CompilerConfig, store: BuildStore) -> Self {
        Self {
            root: root.into(),
            config,
            store,
            cache: RefCell::new(HashMap::new()),
            loading: RefCell::new(Vec::new()),
        }
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.root.join(path.trim_start_matches('/'))
    }

    fn read(&self, url: &str) -> Result<String, HostError> {
        let path = self.path_for(url);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HostError::NotFound(url.to_string()),
            _ => HostError::Io {
                url: url.to_string(),
                message: e.to_string(),
            },
        })
    }

    async fn load_script_module(&self, url: &str) -> Result<Value, HostError> {
        if self.loading.borrow().iter().any(|u| u == url) {
            return Err(HostError::Cycle(url.to_string()));
        }
        let source = self.read(url)?;

        self.loading.borrow_mut().push(url.to_string());
        let result =
            build_script::evaluate_module(self, url, &source, &self.config, self.store.clone())
                .await;
        self.loading.borrow_mut().retain(|u| u != url);

        result.map_err(|e| HostError::Module {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait(?Send)]
impl CompilerHost for FsHost {
    async fn read_file_content(&self, url: &str) -> Result<String, HostError> {
        debug!(url, "read file");
        self.read(url)
    }

    async fn import_module(&self, url: &str) -> Result<Value, HostError> {
        if let Some(record) = self.cache.borrow().get(url) {
            return Ok(record.clone());
        }
        let record = match extension(url).as_str() {
            "json" => json_module(url, &self.read(url)?)?,
            "js" | "mjs" => self.load_script_module(url).await?,
            other => {
                return Err(HostError::Module {
                    url: url.to_string(),
                    message: format!("unsupported module type '.{}'", other),
                })
            }
        };
        debug!(url, "module loaded");
        self.cache
            .borrow_mut()
            .insert(url.to_string(), record.clone());
        Ok(record)
    }
}
