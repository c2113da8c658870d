//! Language catalogue and identifier normalization.
//!
//! # Architecture
//!
//! - `language`: a single catalogue entry (code, localized names, aliases)
//! - `registry`: the read-only catalogue built once at startup, with
//!   normalization (code/display name/alias → code) and the laxer free-text
//!   identification used while extracting model replies
//!
//! # Example
//!
//! ```rust,ignore
//! use lingua_prompt::i18n::LanguageRegistry;
//!
//! let registry = LanguageRegistry::global();
//! assert_eq!(registry.normalize("Japanese")?, "ja");
//! assert_eq!(registry.display_name("ja"), "Japanese");
//! ```

mod language;
mod registry;

pub use language::Language;
pub use registry::{default_languages, LanguageRegistry};
