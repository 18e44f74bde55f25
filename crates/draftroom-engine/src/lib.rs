use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use draftroom_contracts::canvas::{
    CanvasState, CanvasStore, ExportFormat, GenerationResult, Section, Source, SubmitRejection,
};
use draftroom_contracts::events::{EventPayload, EventWriter, SessionEvent};
use draftroom_contracts::models::{ModelSelector, ModelSpec, GROUNDED_TEXT};
use draftroom_contracts::runs::summary::{write_summary, SessionSummary};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const FALLBACK_TEXT: &str = "Failed to generate content.";
pub const FALLBACK_SOURCE_TITLE: &str = "Research Link";
pub const FALLBACK_SOURCE_URI: &str = "#";

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Failure of a single generation call. The message is the upstream one,
/// shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationError {
    message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_anyhow(err: &anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GenerationError {}

#[derive(Debug, Clone)]
pub struct TextGenerateRequest {
    pub prompt: String,
    pub model: String,
}

pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &TextGenerateRequest)
        -> Result<GenerationResult, GenerationError>;
}

#[derive(Default)]
pub struct TextProviderRegistry {
    providers: BTreeMap<String, Box<dyn TextProvider>>,
}

impl TextProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: TextProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn TextProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Deterministic local provider: echoes the prompt and cites one stable link.
pub struct DryrunProvider;

impl TextProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(
        &self,
        request: &TextGenerateRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let id = short_id(&request.prompt);
        Ok(GenerationResult {
            text: format!("Dryrun draft ({}):\n\n{}", request.model, request.prompt.trim()),
            sources: vec![Source::new(
                format!("Dryrun reference {id}"),
                format!("https://dryrun.invalid/{id}"),
            )],
        })
    }
}

pub struct GeminiProvider {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiProvider {
    /// Reads the credential and API base once; later calls never re-read the environment.
    pub fn from_env() -> Result<Self> {
        let Some(api_key) = API_KEY_ENV_VARS.iter().find_map(|key| non_empty_env(key)) else {
            bail!("{} not set", API_KEY_ENV_VARS.join(" or "));
        };
        let api_base = non_empty_env("GEMINI_API_BASE")
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        Self::with_credentials(api_base, api_key)
    }

    /// The HTTP client has no request timeout; a call waits as long as the upstream takes.
    pub fn with_credentials(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "tools": [{ "googleSearch": {} }],
        })
    }

    fn post(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl TextProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &TextGenerateRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(&request.prompt);
        let response_payload = self
            .post(&endpoint, &payload)
            .map_err(|err| GenerationError::from_anyhow(&err))?;
        Ok(generation_result_from_response(&response_payload))
    }
}

/// Maps a `generateContent` response into text plus grounding sources.
///
/// Missing fields are substituted, never raised:
/// - no text in the first candidate gives [`FALLBACK_TEXT`]
/// - grounding chunks without a `web` citation are skipped
/// - a web citation without title or uri gets the fallback title/uri
pub fn generation_result_from_response(payload: &Value) -> GenerationResult {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    let text = candidate
        .map(extract_candidate_text)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| FALLBACK_TEXT.to_string());
    let sources = candidate.map(extract_grounding_sources).unwrap_or_default();
    GenerationResult { text, sources }
}

fn extract_candidate_text(candidate: &Value) -> String {
    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = String::new();
    for part in parts {
        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    out
}

fn extract_grounding_sources(candidate: &Value) -> Vec<Source> {
    let chunks = candidate
        .get("groundingMetadata")
        .or_else(|| candidate.get("grounding_metadata"))
        .and_then(|metadata| {
            metadata
                .get("groundingChunks")
                .or_else(|| metadata.get("grounding_chunks"))
        })
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    chunks
        .iter()
        .filter_map(|chunk| chunk.get("web").and_then(Value::as_object))
        .map(|web| {
            Source::new(
                non_empty_str(web.get("title")).unwrap_or(FALLBACK_SOURCE_TITLE),
                non_empty_str(web.get("uri")).unwrap_or(FALLBACK_SOURCE_URI),
            )
        })
        .collect()
}

fn default_provider_registry() -> TextProviderRegistry {
    let mut providers = TextProviderRegistry::new();
    providers.register(DryrunProvider);
    // Missing credentials are reported by `ensure_provider`, and only for gemini models.
    if let Ok(gemini) = GeminiProvider::from_env() {
        providers.register(gemini);
    }
    providers
}

/// Result of submitting one prompt to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Appended {
        section: Section,
        sources_added: usize,
    },
    Failed(GenerationError),
    Rejected(SubmitRejection),
}

pub struct DraftEngine {
    session_dir: PathBuf,
    session_id: String,
    events: EventWriter,
    store: CanvasStore,
    summary_path: PathBuf,
    started_at: String,
    model_selector: ModelSelector,
    model: ModelSpec,
    providers: TextProviderRegistry,
    failed_generations: u64,
    last_fallback_reason: Option<String>,
}

impl DraftEngine {
    pub fn new(
        session_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        model: Option<String>,
    ) -> Result<Self> {
        Self::with_providers(session_dir, events_path, model, default_provider_registry())
    }

    pub fn with_providers(
        session_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        model: Option<String>,
        providers: TextProviderRegistry,
    ) -> Result<Self> {
        let session_dir = session_dir.into();
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("failed to create {}", session_dir.display()))?;
        let session_id = session_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("session")
            .to_string();
        let events = EventWriter::new(events_path.into(), session_id.clone());
        let model_selector = ModelSelector::new(None);
        let selection = model_selector
            .select(model.as_deref(), GROUNDED_TEXT)
            .map_err(anyhow::Error::msg)?;
        ensure_provider(&providers, &selection.model)?;

        events.emit(
            SessionEvent::SessionStarted,
            map_object(json!({
                "out_dir": session_dir.to_string_lossy().to_string(),
                "model": selection.model.name,
                "provider": selection.model.provider,
                "model_fallback": selection.fallback_reason,
            })),
        )?;

        Ok(Self {
            summary_path: session_dir.join("summary.json"),
            session_dir,
            session_id,
            events,
            store: CanvasStore::new(),
            started_at: now_utc_iso(),
            model_selector,
            model: selection.model,
            providers,
            failed_generations: 0,
            last_fallback_reason: selection.fallback_reason,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn last_fallback_reason(&self) -> Option<&str> {
        self.last_fallback_reason.as_deref()
    }

    pub fn canvas(&self) -> &CanvasState {
        self.store.canvas()
    }

    pub fn store(&self) -> &CanvasStore {
        &self.store
    }

    pub fn last_error(&self) -> Option<&str> {
        self.store.last_error()
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn emit_event(&self, event: SessionEvent, payload: EventPayload) -> Result<Value> {
        self.events.emit(event, payload)
    }

    pub fn set_model(&mut self, model: &str) -> Result<&ModelSpec> {
        let selection = self
            .model_selector
            .select(Some(model), GROUNDED_TEXT)
            .map_err(anyhow::Error::msg)?;
        if let Some(reason) = selection.fallback_reason {
            bail!(reason);
        }
        ensure_provider(&self.providers, &selection.model)?;
        self.model = selection.model;
        self.last_fallback_reason = None;
        Ok(&self.model)
    }

    /// Runs one generation. A provider failure is an outcome, not an `Err`;
    /// `Err` is reserved for event/log I/O.
    pub fn generate(&mut self, prompt: &str) -> Result<SubmitOutcome> {
        if let Err(rejection) = self.store.begin(prompt) {
            return Ok(SubmitOutcome::Rejected(rejection));
        }

        let started = self.events.emit(
            SessionEvent::GenerationStarted,
            map_object(json!({
                "model": self.model.name,
                "provider": self.model.provider,
                "prompt_chars": prompt.chars().count(),
            })),
        );
        if let Err(err) = started {
            // Back to Idle; the canvas is untouched.
            self.store.fail(&format!("{err:#}"));
            return Err(err);
        }

        let request = TextGenerateRequest {
            prompt: prompt.to_string(),
            model: self.model.name.clone(),
        };
        let result = match self.providers.get(&self.model.provider) {
            Some(provider) => provider.generate(&request),
            None => Err(GenerationError::new(format!(
                "no provider registered for '{}'",
                self.model.provider
            ))),
        };

        match result {
            Ok(result) => {
                let sources_added = self.store.succeed(&result);
                let section = self
                    .store
                    .canvas()
                    .last_section()
                    .cloned()
                    .context("canvas has no section after append")?;
                self.events.emit(
                    SessionEvent::GenerationSucceeded,
                    map_object(json!({
                        "section_id": section.id,
                        "chars": section.content.chars().count(),
                        "fallback_text": section.content == FALLBACK_TEXT,
                        "sources_returned": result.sources.len(),
                        "sources_added": sources_added,
                        "total_sections": self.store.canvas().sections().len(),
                        "total_sources": self.store.canvas().sources().len(),
                    })),
                )?;
                Ok(SubmitOutcome::Appended {
                    section,
                    sources_added,
                })
            }
            Err(err) => {
                self.store.fail(err.message());
                self.failed_generations += 1;
                let shown = self
                    .store
                    .last_error()
                    .map(GenerationError::new)
                    .unwrap_or(err);
                self.events.emit(
                    SessionEvent::GenerationFailed,
                    map_object(json!({
                        "model": self.model.name,
                        "error": shown.message(),
                    })),
                )?;
                Ok(SubmitOutcome::Failed(shown))
            }
        }
    }

    /// Empties the canvas. Callers obtain the user's confirmation first.
    pub fn clear(&mut self) -> Result<()> {
        let removed_sections = self.store.canvas().sections().len();
        let removed_sources = self.store.canvas().sources().len();
        self.store.clear();
        self.events.emit(
            SessionEvent::CanvasCleared,
            map_object(json!({
                "removed_sections": removed_sections,
                "removed_sources": removed_sources,
            })),
        )?;
        Ok(())
    }

    pub fn default_export_path(&self, format: ExportFormat) -> PathBuf {
        self.session_dir
            .join(format!("canvas.{}", format.extension()))
    }

    pub fn export(&self, format: ExportFormat, path: Option<&Path>) -> Result<PathBuf> {
        let out_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_export_path(format));
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, format.render(self.store.canvas()))
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        self.events.emit(
            SessionEvent::CanvasExported,
            map_object(json!({
                "path": out_path.to_string_lossy().to_string(),
                "format": format.extension(),
                "sections": self.store.canvas().sections().len(),
                "sources": self.store.canvas().sources().len(),
            })),
        )?;
        Ok(out_path)
    }

    pub fn finish(&mut self) -> Result<()> {
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            model: self.model.name.clone(),
            total_sections: self.store.canvas().sections().len() as u64,
            total_sources: self.store.canvas().sources().len() as u64,
            failed_generations: self.failed_generations,
        };
        write_summary(&self.summary_path, &summary, None)?;
        self.events.emit(
            SessionEvent::SessionFinished,
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string(),
            })),
        )?;
        Ok(())
    }
}

fn ensure_provider(providers: &TextProviderRegistry, model: &ModelSpec) -> Result<()> {
    if providers.get(&model.provider).is_some() {
        return Ok(());
    }
    if model.provider == "gemini" {
        bail!(
            "model '{}' needs the gemini provider; set {}",
            model.name,
            API_KEY_ENV_VARS.join(" or ")
        );
    }
    bail!(
        "model '{}' needs provider '{}' (registered: {})",
        model.name,
        model.provider,
        providers.names().join(", ")
    )
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            upstream_error_message(&body)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

// Google APIs wrap failures as {"error": {"message": ...}}.
fn upstream_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

fn short_id(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.trim().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
