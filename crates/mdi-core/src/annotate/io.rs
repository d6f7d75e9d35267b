//! Annotation config, document loading, resume and the CSV output sink.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::policy::RequestPolicy;
use super::rows::{DocumentRow, OutputRow};
use crate::error::AppError;
use crate::table::Table;
use crate::traits::AnnotationSink;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "MDI_LLM_API_KEY";
const SUPPORTED_PROVIDERS: &[&str] = &["openai"];
const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotateConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Repair attempts after the first validation failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_annotator")]
    pub annotator_name: String,
    #[serde(default)]
    pub request_sleep_sec: f64,
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_sec: f64,
    #[serde(default = "default_timeout_backoff")]
    pub timeout_backoff_sec: f64,
    pub io: IoConfig,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_sec() -> u64 {
    60
}

fn default_max_chars() -> usize {
    8000
}

fn default_max_retries() -> u32 {
    2
}

fn default_concurrency() -> usize {
    1
}

fn default_annotator() -> String {
    "llm_annotator".to_string()
}

fn default_request_retries() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    5.0
}

fn default_timeout_backoff() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub columns: ColumnMap,
}

/// Input column names for each document field.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMap {
    pub event_id: String,
    pub doc_id: String,
    pub source_type: String,
    pub source_name: String,
    pub title: String,
    pub lead: String,
    pub text: String,
    #[serde(default)]
    pub published_at: Option<String>,
}

impl AnnotateConfig {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid annotate config: {e}")))?;
        if !SUPPORTED_PROVIDERS.contains(&config.provider.as_str()) {
            return Err(AppError::ConfigError(format!(
                "Unsupported provider '{}' (supported: {})",
                config.provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }
        Ok(config)
    }

    /// Read the API key from `api_key_env`.
    pub fn api_key(&self) -> Result<String, AppError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Set the {} environment variable to the provider API key",
                    self.api_key_env
                ))
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            request_sleep: secs(self.request_sleep_sec),
            max_retries: self.request_retries,
            backoff_base: secs(self.backoff_base_sec),
            timeout_backoff: secs(self.timeout_backoff_sec),
        }
    }
}

/// Negative, NaN and out-of-range values mean no delay.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// CRLF and CR become LF; surrounding whitespace is trimmed.
pub fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Prompt body: labelled title, lead and text blocks, capped at `max_chars`
/// characters.
pub fn build_text_focus(title: &str, lead: &str, text: &str, max_chars: usize) -> String {
    let mut parts = Vec::with_capacity(3);
    if !title.is_empty() {
        parts.push(format!("ЗАГОЛОВОК: {title}"));
    }
    if !lead.is_empty() {
        parts.push(format!("ЛИД: {lead}"));
    }
    if !text.is_empty() {
        parts.push(format!("ТЕКСТ:\n{text}"));
    }
    let joined = parts.join("\n\n");
    let joined = joined.trim();

    match joined.char_indices().nth(max_chars) {
        Some((idx, _)) => joined[..idx].to_string(),
        None => joined.to_string(),
    }
}

/// Load documents from a CSV or spreadsheet table using the configured
/// column names.
pub fn load_documents(
    path: &Path,
    columns: &ColumnMap,
    max_chars: usize,
) -> Result<Vec<DocumentRow>, AppError> {
    read_documents(&Table::read(path)?, columns, max_chars)
}

fn read_documents(
    table: &Table,
    columns: &ColumnMap,
    max_chars: usize,
) -> Result<Vec<DocumentRow>, AppError> {
    let position = |name: &str| table.column(name);
    let required = |name: &str| {
        position(name).ok_or_else(|| {
            AppError::ConfigError(format!("Input table has no column '{name}'"))
        })
    };

    let event_id = required(columns.event_id.as_str())?;
    let doc_id = required(columns.doc_id.as_str())?;
    let source_type = required(columns.source_type.as_str())?;
    let source_name = required(columns.source_name.as_str())?;
    let title = position(columns.title.as_str());
    let lead = position(columns.lead.as_str());
    let text = position(columns.text.as_str());
    let published_at = columns.published_at.as_deref().and_then(position);

    let mut documents = Vec::new();
    for row in table.rows() {
        let cell = |idx: usize| row.get(idx);
        let optional = |idx: Option<usize>| normalize_text(idx.map(cell).unwrap_or_default());

        let title = optional(title);
        let lead = optional(lead);
        let text = optional(text);
        let text_focus = build_text_focus(&title, &lead, &text, max_chars);

        documents.push(DocumentRow {
            event_id: cell(event_id).trim().to_string(),
            doc_id: cell(doc_id).trim().to_string(),
            source_type: cell(source_type).trim().to_lowercase(),
            source_name: cell(source_name).trim().to_string(),
            published_at: published_at
                .map(cell)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            title,
            lead,
            text_focus,
        });
    }

    tracing::info!(count = documents.len(), "Loaded documents");
    Ok(documents)
}

/// Document ids already present in an output table. A missing file, or one
/// without a `doc_id` column, yields an empty set.
pub fn read_completed_ids(path: &Path) -> Result<HashSet<String>, AppError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim_start_matches(BOM).trim() == "doc_id");
    let Some(column) = column else {
        tracing::warn!(path = %path.display(), "Output has no doc_id column, nothing to resume");
        return Ok(HashSet::new());
    };

    let mut ids = HashSet::new();
    for record in reader.records() {
        if let Some(id) = record?.get(column) {
            ids.insert(id.trim().to_string());
        }
    }
    tracing::info!(count = ids.len(), "Found completed documents");
    Ok(ids)
}

/// Append-only CSV output. The header is written only when the file starts
/// out empty, and every row is flushed as soon as it is written.
pub struct CsvAnnotationSink {
    writer: csv::Writer<File>,
    needs_header: bool,
}

impl CsvAnnotationSink {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let needs_header = file.metadata()?.len() == 0;
        if needs_header {
            let mut bom = [0u8; 3];
            file.write_all(BOM.encode_utf8(&mut bom).as_bytes())?;
        }
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Self {
            writer,
            needs_header,
        })
    }
}

impl AnnotationSink for CsvAnnotationSink {
    fn append(&mut self, row: &OutputRow) -> Result<(), AppError> {
        if self.needs_header {
            self.writer.write_record(OutputRow::COLUMNS)?;
            self.needs_header = false;
        }
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}
