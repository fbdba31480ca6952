//! Extraction commands: the handlers that turn one source file into chunks, the
//! command definitions that select them and the file enumeration feeding them.

pub mod pdf;
pub mod text;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::{ExtractedChunk, ExtractionConfiguration},
    utils::names::is_valid_name,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Option key carrying the path of the file being extracted.
pub const FILE_OPTION: &str = "file";
/// Option key carrying the registration data directory.
pub const DATA_OPTION: &str = "data";

const DEFAULT_LOADREGS: &str = ".*";

#[async_trait]
pub trait ExtractionHandler: Send + Sync {
    /// Extracts the file named by the `file` option.
    async fn run(&self, options: &Map<String, Value>) -> Result<Vec<ExtractedChunk>, AppError>;
}

/// Extraction handlers keyed by `(mode, cmd)`, built once at startup.
#[derive(Default)]
pub struct ExtractorRegistry {
    handlers: HashMap<(String, String), Arc<dyn ExtractionHandler>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `extract text` and `extract pdf` commands.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register("extract", "text", Arc::new(text::TextExtractor))
            .register("extract", "pdf", Arc::new(pdf::PdfExtractor));
        registry
    }

    pub fn register(
        &mut self,
        mode: &str,
        cmd: &str,
        handler: Arc<dyn ExtractionHandler>,
    ) -> &mut Self {
        self.handlers
            .insert((mode.to_string(), cmd.to_string()), handler);
        self
    }

    pub fn resolve(&self, mode: &str, cmd: &str) -> Result<Arc<dyn ExtractionHandler>, AppError> {
        self.handlers
            .get(&(mode.to_string(), cmd.to_string()))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Extraction command is not available. mode={mode}, cmd={cmd}"
                ))
            })
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// A stored command definition, `<data_dir>/.cmds/cmd-<title>.json`.
///
/// Keys besides `mode`, `cmd` and `title` are the command's default options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandDefinition {
    pub mode: String,
    pub cmd: String,
    pub title: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl CommandDefinition {
    pub fn path(data_dir: &Path, title: &str) -> PathBuf {
        data_dir.join(".cmds").join(format!("cmd-{title}.json"))
    }

    pub async fn load(data_dir: &Path, title: &str) -> Result<Self, AppError> {
        if !is_valid_name(title) {
            return Err(AppError::Validation(format!(
                "Command title '{title}' can only contain alphanumeric characters, underscores, and hyphens."
            )));
        }
        let path = Self::path(data_dir, title);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AppError::NotFound(format!(
                "Specified extract command '{title}' not found at '{}'.",
                path.display()
            )));
        }
        let raw = tokio::fs::read(&path).await?;
        serde_json::from_slice(&raw).map_err(|e| {
            AppError::Validation(format!("Command definition '{title}' is malformed: {e}"))
        })
    }

    /// Option set for one extraction run. Later layers override earlier ones:
    /// command defaults, then the extraction configuration, then run parameters.
    pub fn merged_options(
        &self,
        extraction: &ExtractionConfiguration,
        data_dir: &Path,
    ) -> Map<String, Value> {
        let mut options = self.options.clone();
        options.extend(extraction.as_options());
        options.insert(
            DATA_OPTION.into(),
            Value::String(data_dir.display().to_string()),
        );
        options
    }
}

/// Direct children of `loadpath` whose file name matches `loadregs`, sorted by path.
/// Relative paths resolve against `data_dir`; directories are skipped.
pub async fn list_files(
    data_dir: &Path,
    loadpath: Option<&str>,
    loadregs: Option<&str>,
) -> Result<Vec<PathBuf>, AppError> {
    let loadpath = loadpath
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::Validation("loadpath is required.".into()))?;
    let pattern = loadregs
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_LOADREGS);
    let regex = Regex::new(pattern)
        .map_err(|e| AppError::Validation(format!("loadregs '{pattern}' is invalid: {e}")))?;

    let root = data_dir.join(loadpath);
    if !tokio::fs::metadata(&root)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
    {
        return Err(AppError::NotFound(format!(
            "loadpath '{}' is not a directory.",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if regex.is_match(&name.to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    debug!(loadpath = %root.display(), pattern, count = files.len(), "files selected");
    Ok(files)
}

/// Reads a required string option.
pub(crate) fn option_str<'a>(
    options: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, AppError> {
    options
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Extraction(format!("option '{key}' is required.")))
}

/// Reads an optional unsigned option given either as a number or a numeric string.
pub(crate) fn option_u64(options: &Map<String, Value>, key: &str) -> Result<Option<u64>, AppError> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| AppError::Extraction(format!("option '{key}' must be a positive integer."))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Extraction(format!("option '{key}' must be a positive integer."))),
        Some(_) => Err(AppError::Extraction(format!(
            "option '{key}' must be a positive integer."
        ))),
    }
}

/// Metadata shared by the built-in handlers.
pub(crate) fn base_metadata(path: &Path, origin_type: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("source".into(), Value::String(path.display().to_string()));
    metadata.insert(
        "origin_name".into(),
        Value::String(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
    );
    metadata.insert("origin_type".into(), Value::String(origin_type.into()));
    metadata.insert("content_type".into(), Value::String("text".into()));
    metadata
}
