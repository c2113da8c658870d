//! Prompt construction and structured response extraction for
//! transcription/translation tasks.
//!
//! The crate turns a task description (audio or text, target languages) into
//! the system/user prompts a language model should receive, together with the
//! [`OutputSchema`] describing the reply it was asked for. Once the model has
//! answered, [`PromptEngine::extract_structured`] recovers the transcription
//! and per-language translations from the free-form reply, even when the model
//! ignored parts of the requested format.
//!
//! # Example
//!
//! ```rust,ignore
//! use lingua_prompt::{LanguageRegistry, PromptEngine, PromptRequest, TaskType};
//!
//! let engine = PromptEngine::new(LanguageRegistry::with_defaults())?;
//! let built = engine.build_prompt(&PromptRequest::audio(TaskType::Translate, ["en", "ja"]))?;
//! // ... send built.system_prompt / built.user_prompt to the model ...
//! let parsed = engine.extract_structured(&reply, &built.output_schema);
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod extract;
pub mod i18n;
pub mod pipeline;
pub mod prompt;
pub mod retry;

pub use error::{PromptError, PromptResult};
pub use extract::{
    ExtractOptions, ExtractionMetadata, ExtractionMethod, ExtractionStatus, FallbackReconciler,
    ParsedResult, ResponseExtractor,
};
pub use i18n::{Language, LanguageRegistry};
pub use prompt::{
    BuiltPrompt, InputKind, OutputFormat, OutputSchema, OutputSection, PromptEngine,
    PromptRequest, SchemaSynthesizer, TaskType, TemplateCatalog, SOURCE_SECTION_KEY,
};
