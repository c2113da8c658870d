//! Request processing pipeline.
//!
//! Every request runs the same stages: validate → build prompt → completion
//! → extract → build response. A [`TaskHandler`] supplies the per-variant
//! stages and [`run_pipeline`] drives them; [`Pipeline::process`] dispatches
//! the closed set of request variants.

use crate::completion::{CompletionRequest, CompletionService, MediaPayload};
use crate::extract::{ExtractionMetadata, ExtractionStatus, ParsedResult};
use crate::prompt::{OutputSchema, PromptEngine, PromptRequest, TaskType, SOURCE_SECTION_KEY};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const SUPPORTED_AUDIO_FORMATS: &[&str] = &["wav", "mp3", "m4a", "opus", "flac"];

/// 32 MiB
pub const MAX_AUDIO_BYTES: usize = 32 * 1024 * 1024;

pub const MAX_TEXT_CHARS: usize = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRequest {
    pub audio: Vec<u8>,
    pub audio_format: String,
    pub task: TaskType,
    pub source_language: Option<String>,
    pub target_languages: Vec<String>,
    /// Replaces the default user prompt
    pub user_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRequest {
    pub text: String,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRequest {
    Audio(AudioRequest),
    Text(TextRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub request_id: String,
    pub status: ExtractionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    /// Requested target code to translation
    pub translations: BTreeMap<String, String>,
    pub raw_response: String,
    /// Seconds
    pub processing_time: f64,
    pub metadata: ExtractionMetadata,
}

/// Per-variant pipeline stages.
pub trait TaskHandler {
    type Request;
    type Response;

    /// Name used in logs and error context
    fn name(&self) -> &'static str;

    /// Check the request and fill in defaults.
    fn validate(&self, request: &mut Self::Request) -> Result<()>;

    fn build_prompt(
        &self,
        engine: &PromptEngine,
        request: &Self::Request,
    ) -> Result<(CompletionRequest, OutputSchema)>;

    fn build_response(
        &self,
        parsed: ParsedResult,
        schema: &OutputSchema,
        request: &Self::Request,
        elapsed: Duration,
    ) -> Self::Response;
}

/// Run one request through every stage.
pub async fn run_pipeline<H, C>(
    handler: &H,
    engine: &PromptEngine,
    completion: &C,
    mut request: H::Request,
) -> Result<H::Response>
where
    H: TaskHandler,
    C: CompletionService,
{
    let started = Instant::now();

    handler
        .validate(&mut request)
        .with_context(|| format!("Invalid {} request", handler.name()))?;

    let (completion_request, schema) = handler.build_prompt(engine, &request)?;

    let raw = completion
        .complete(&completion_request)
        .await
        .with_context(|| format!("Completion failed for {} request", handler.name()))?;

    let parsed = engine.extract_structured(&raw, &schema);
    info!(
        "{} request processed: status={:?}, method={:?}",
        handler.name(),
        parsed.metadata.status,
        parsed.metadata.method
    );

    Ok(handler.build_response(parsed, &schema, &request, started.elapsed()))
}

fn new_request_id() -> String {
    format!("req_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn apply_default_targets(targets: &mut Vec<String>, defaults: &[String]) {
    targets.retain(|target| !target.trim().is_empty());
    if targets.is_empty() {
        targets.extend(defaults.iter().cloned());
    }
}

/// Non-empty translations for the schema's target sections; other keys are
/// logged and dropped.
fn collect_translations(parsed: &ParsedResult, schema: &OutputSchema) -> BTreeMap<String, String> {
    let mut translations = BTreeMap::new();
    for (key, value) in &parsed.sections {
        if schema.section_for_code(key).is_some() {
            if value.trim().is_empty() {
                continue;
            }
            translations.insert(key.clone(), value.clone());
        } else if key != SOURCE_SECTION_KEY {
            warn!("Dropping unexpected section '{}' from response", key);
        }
    }
    translations
}

fn ensure_targets_supported(schema: &OutputSchema, skipped: &[String]) -> Result<()> {
    if schema.target_sections().is_empty() {
        bail!(
            "None of the requested target languages are supported: {}",
            skipped.join(", ")
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AudioHandler {
    pub default_targets: Vec<String>,
}

impl TaskHandler for AudioHandler {
    type Request = AudioRequest;
    type Response = ProcessResponse;

    fn name(&self) -> &'static str {
        "audio"
    }

    fn validate(&self, request: &mut AudioRequest) -> Result<()> {
        if request.audio.is_empty() {
            bail!("Audio data is empty");
        }
        if request.audio.len() > MAX_AUDIO_BYTES {
            bail!(
                "Audio is {} bytes, larger than the {} byte limit",
                request.audio.len(),
                MAX_AUDIO_BYTES
            );
        }

        let format = request
            .audio_format
            .trim()
            .trim_start_matches('.')
            .to_lowercase();
        if !SUPPORTED_AUDIO_FORMATS.contains(&format.as_str()) {
            bail!(
                "Unsupported audio format '{}' (supported: {})",
                request.audio_format,
                SUPPORTED_AUDIO_FORMATS.join(", ")
            );
        }
        request.audio_format = format;

        match request.task {
            TaskType::Transcribe => request.target_languages.clear(),
            TaskType::Translate => {
                apply_default_targets(&mut request.target_languages, &self.default_targets);
                if request.target_languages.is_empty() {
                    bail!("Translation requires at least one target language");
                }
            }
        }
        Ok(())
    }

    fn build_prompt(
        &self,
        engine: &PromptEngine,
        request: &AudioRequest,
    ) -> Result<(CompletionRequest, OutputSchema)> {
        let mut prompt_request =
            PromptRequest::audio(request.task, request.target_languages.iter().cloned());
        prompt_request.source_language = request.source_language.clone();
        if let Some(user_prompt) = &request.user_prompt {
            prompt_request = prompt_request
                .with_variable("user_prompt", serde_json::Value::String(user_prompt.clone()));
        }

        let built = engine
            .build_prompt(&prompt_request)
            .context("Failed to build audio prompt")?;
        if request.task == TaskType::Translate {
            ensure_targets_supported(&built.output_schema, &built.skipped_languages)?;
        }

        let completion_request = CompletionRequest {
            system_prompt: built.system_prompt,
            user_prompt: built.user_prompt,
            media: Some(MediaPayload {
                data: request.audio.clone(),
                format: request.audio_format.clone(),
            }),
        };
        Ok((completion_request, built.output_schema))
    }

    fn build_response(
        &self,
        parsed: ParsedResult,
        schema: &OutputSchema,
        _request: &AudioRequest,
        elapsed: Duration,
    ) -> ProcessResponse {
        ProcessResponse {
            request_id: new_request_id(),
            status: parsed.metadata.status,
            transcription: parsed
                .source()
                .filter(|source| !source.trim().is_empty())
                .map(str::to_string),
            source_text: None,
            translations: collect_translations(&parsed, schema),
            raw_response: parsed.raw_text,
            processing_time: elapsed.as_secs_f64(),
            metadata: parsed.metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextHandler {
    pub default_targets: Vec<String>,
}

impl TaskHandler for TextHandler {
    type Request = TextRequest;
    type Response = ProcessResponse;

    fn name(&self) -> &'static str {
        "text"
    }

    fn validate(&self, request: &mut TextRequest) -> Result<()> {
        if request.text.trim().is_empty() {
            bail!("Text is empty");
        }
        let length = request.text.chars().count();
        if length > MAX_TEXT_CHARS {
            bail!(
                "Text is {} characters, longer than the {} character limit",
                length,
                MAX_TEXT_CHARS
            );
        }

        apply_default_targets(&mut request.target_languages, &self.default_targets);
        if request.target_languages.is_empty() {
            bail!("Translation requires at least one target language");
        }
        Ok(())
    }

    fn build_prompt(
        &self,
        engine: &PromptEngine,
        request: &TextRequest,
    ) -> Result<(CompletionRequest, OutputSchema)> {
        let mut prompt_request =
            PromptRequest::text(request.text.clone(), request.target_languages.iter().cloned());
        prompt_request.source_language = request.source_language.clone();

        let built = engine
            .build_prompt(&prompt_request)
            .context("Failed to build text prompt")?;
        ensure_targets_supported(&built.output_schema, &built.skipped_languages)?;

        let completion_request = CompletionRequest {
            system_prompt: built.system_prompt,
            user_prompt: built.user_prompt,
            media: None,
        };
        Ok((completion_request, built.output_schema))
    }

    fn build_response(
        &self,
        parsed: ParsedResult,
        schema: &OutputSchema,
        request: &TextRequest,
        elapsed: Duration,
    ) -> ProcessResponse {
        ProcessResponse {
            request_id: new_request_id(),
            status: parsed.metadata.status,
            transcription: None,
            source_text: Some(request.text.clone()),
            translations: collect_translations(&parsed, schema),
            raw_response: parsed.raw_text,
            processing_time: elapsed.as_secs_f64(),
            metadata: parsed.metadata,
        }
    }
}

/// Prompt engine plus completion service, processing either request variant.
pub struct Pipeline<C> {
    engine: PromptEngine,
    completion: C,
    audio: AudioHandler,
    text: TextHandler,
}

impl<C: CompletionService> Pipeline<C> {
    /// `default_targets` apply to translation requests that name no target.
    pub fn new(engine: PromptEngine, completion: C, default_targets: Vec<String>) -> Self {
        Self {
            engine,
            completion,
            audio: AudioHandler {
                default_targets: default_targets.clone(),
            },
            text: TextHandler { default_targets },
        }
    }

    pub fn engine(&self) -> &PromptEngine {
        &self.engine
    }

    pub async fn process(&self, request: ProcessRequest) -> Result<ProcessResponse> {
        match request {
            ProcessRequest::Audio(request) => {
                run_pipeline(&self.audio, &self.engine, &self.completion, request).await
            }
            ProcessRequest::Text(request) => {
                run_pipeline(&self.text, &self.engine, &self.completion, request).await
            }
        }
    }
}
