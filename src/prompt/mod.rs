//! Prompt construction.
//!
//! # Architecture
//!
//! - `types`: request, schema and build-output types
//! - `template`: the small template language prompts are written in
//! - `catalog`: named, pre-compiled prompt templates
//! - `schema`: per-request output schema synthesis
//!
//! [`PromptEngine`] ties these together with the language registry and the
//! response extractor: `build_prompt` before calling the model,
//! `extract_structured` on its reply.

mod catalog;
mod schema;
mod template;
mod types;

pub use catalog::{
    PromptTemplate, TemplateCatalog, AUDIO_TRANSCRIBE, AUDIO_TRANSCRIBE_STRUCTURED,
    AUDIO_TRANSLATE, AUDIO_TRANSLATE_STRUCTURED, TEXT_TRANSLATE, TEXT_TRANSLATE_STRUCTURED,
};
pub use schema::SchemaSynthesizer;
pub use template::{Template, TemplateError, Value, Variables};
pub use types::{
    BuiltPrompt, InputKind, OutputFormat, OutputSchema, OutputSection, PromptRequest, TaskType,
    SOURCE_ALIASES, SOURCE_LABEL, SOURCE_SECTION_KEY,
};

use crate::config::Config;
use crate::error::PromptResult;
use crate::extract::{ExtractOptions, ParsedResult, ResponseExtractor, DEFAULT_SEPARATORS};
use crate::i18n::{Language, LanguageRegistry};
use anyhow::Context;
use tracing::{debug, info};

/// Template used when a request does not name one.
pub fn default_template(task: TaskType, input: InputKind, format: OutputFormat) -> &'static str {
    match (input, task, format) {
        (InputKind::Audio, TaskType::Transcribe, OutputFormat::Json) => AUDIO_TRANSCRIBE,
        (InputKind::Audio, TaskType::Transcribe, OutputFormat::Structured) => {
            AUDIO_TRANSCRIBE_STRUCTURED
        }
        (InputKind::Audio, TaskType::Translate, OutputFormat::Json) => AUDIO_TRANSLATE,
        (InputKind::Audio, TaskType::Translate, OutputFormat::Structured) => {
            AUDIO_TRANSLATE_STRUCTURED
        }
        (InputKind::Text, _, OutputFormat::Json) => TEXT_TRANSLATE,
        (InputKind::Text, _, OutputFormat::Structured) => TEXT_TRANSLATE_STRUCTURED,
    }
}

/// Builds prompts and extracts replies.
///
/// Immutable after construction; share it behind an `Arc` between requests.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    registry: LanguageRegistry,
    catalog: TemplateCatalog,
    separators: Vec<String>,
    options: ExtractOptions,
}

impl PromptEngine {
    /// Engine with the built-in templates and default separators.
    pub fn new(registry: LanguageRegistry) -> PromptResult<Self> {
        Ok(Self {
            registry,
            catalog: TemplateCatalog::with_defaults()?,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            options: ExtractOptions::default(),
        })
    }

    /// Engine configured from the environment-derived [`Config`].
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = config.load_registry()?;
        let engine = Self::new(registry)
            .context("Failed to compile built-in prompt templates")?
            .with_separators(config.separators.clone())
            .with_extract_options(ExtractOptions {
                max_effort: config.max_effort_extraction,
            });
        Ok(engine)
    }

    /// Separators in priority order; the first one is used in instructions.
    /// An empty list keeps the current separators.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        let separators: Vec<String> = separators
            .into_iter()
            .filter(|separator| !separator.is_empty())
            .collect();
        if !separators.is_empty() {
            self.separators = separators;
        }
        self
    }

    pub fn with_extract_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    /// Every language in the catalogue.
    pub fn languages(&self) -> &[Language] {
        self.registry.list_all()
    }

    /// `(name, description)` of every registered template.
    pub fn list_templates(&self) -> Vec<(&str, &str)> {
        self.catalog.list_templates()
    }

    /// Render prompts and synthesize the reply schema for a request.
    ///
    /// Unknown target languages are skipped and reported in
    /// `skipped_languages`. Text input is always a translation task.
    ///
    /// # Errors
    /// `TemplateNotFound` for an unknown explicit template name,
    /// `TemplateRender` if rendering fails.
    pub fn build_prompt(&self, request: &PromptRequest) -> PromptResult<BuiltPrompt> {
        let task = match request.input {
            InputKind::Text => TaskType::Translate,
            InputKind::Audio => request.task,
        };
        let template_name = request
            .template
            .clone()
            .unwrap_or_else(|| default_template(task, request.input, request.output_format).to_string());
        let template = self.catalog.get(&template_name)?;

        let include_source = request.input == InputKind::Audio;
        let (schema, skipped_languages) = SchemaSynthesizer::new(&self.registry)
            .with_separator(self.instruction_separator())
            .build_schema(task, &request.target_languages, include_source);
        let schema = schema.with_format(template.output_format);

        let vars = self.template_variables(request, task, &schema);
        let (system_prompt, user_prompt) = template.render(&vars)?;

        debug!(
            "Rendered template '{}' ({} sections, {} skipped)",
            template_name,
            schema.sections.len(),
            skipped_languages.len()
        );
        if !skipped_languages.is_empty() {
            info!("Unknown target languages skipped: {:?}", skipped_languages);
        }

        Ok(BuiltPrompt {
            system_prompt,
            user_prompt,
            output_schema: schema,
            skipped_languages,
            template: template_name,
        })
    }

    /// Recover sections from a model reply.
    pub fn extract_structured(&self, raw_text: &str, schema: &OutputSchema) -> ParsedResult {
        ResponseExtractor::new(&self.registry)
            .with_separators(&self.separators)
            .with_options(self.options)
            .extract(raw_text, schema)
    }

    fn instruction_separator(&self) -> &str {
        self.separators
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_SEPARATORS[0])
    }

    /// Caller variables first; engine-computed values replace them.
    fn template_variables(
        &self,
        request: &PromptRequest,
        task: TaskType,
        schema: &OutputSchema,
    ) -> Variables {
        let mut vars: Variables = request
            .variables
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.clone())))
            .collect();

        let targets = schema.target_sections();
        let target_list: Vec<Value> = targets
            .iter()
            .map(|section| {
                Value::Map(
                    [
                        ("code".to_string(), Value::from(section.language_code.as_str())),
                        ("name".to_string(), Value::from(section.key.as_str())),
                    ]
                    .into_iter()
                    .collect(),
                )
            })
            .collect();

        vars.insert("targets".to_string(), Value::List(target_list));
        vars.insert(
            "target_codes".to_string(),
            Value::from(
                targets
                    .iter()
                    .map(|section| section.language_code.clone())
                    .collect::<Vec<_>>(),
            ),
        );
        vars.insert(
            "target_names".to_string(),
            Value::from(targets.iter().map(|section| section.key.clone()).collect::<Vec<_>>()),
        );
        vars.insert("task".to_string(), Value::from(task.as_str()));
        vars.insert("separator".to_string(), Value::from(schema.separator.as_str()));
        vars.insert("source_label".to_string(), Value::from(SOURCE_LABEL));

        if let Some(source) = request
            .source_language
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
        {
            let name = match self.registry.normalize(source) {
                Ok(code) => self.registry.display_name(code),
                Err(_) => source.to_string(),
            };
            vars.insert("source_language".to_string(), Value::from(name));
        }

        vars
    }
}
