//! Error kinds raised while building prompts and extracting replies.
//!
//! None of these are fatal to the process. `UnknownLanguage` is recovered by
//! skipping the offending target, the structured-block errors by falling
//! through to line-oriented extraction, and `EmptyResidueAfterScrub` ends an
//! extraction with a `failed` status instead of an error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    /// Input language identifier matches no catalogue entry.
    #[error("unknown language: '{0}'")]
    UnknownLanguage(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Malformed template source or a helper applied to the wrong kind of value.
    #[error("template '{name}' failed to render: {message}")]
    TemplateRender { name: String, message: String },

    #[error("no fenced json block found in response")]
    StructuredBlockAbsent,

    #[error("fenced json block is invalid: {0}")]
    StructuredBlockInvalid(String),

    #[error("no sections could be extracted from response")]
    NoSectionsExtracted,

    #[error("response contained only prompt scaffolding")]
    EmptyResidueAfterScrub,
}

pub type PromptResult<T> = std::result::Result<T, PromptError>;
