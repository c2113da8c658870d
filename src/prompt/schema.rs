//! Per-request output schema synthesis.

use super::types::{
    OutputFormat, OutputSchema, OutputSection, TaskType, SOURCE_ALIASES, SOURCE_LABEL,
};
use crate::extract::DEFAULT_SEPARATORS;
use crate::i18n::LanguageRegistry;
use tracing::{debug, warn};

/// Builds the [`OutputSchema`] a reply is expected to follow.
#[derive(Debug, Clone)]
pub struct SchemaSynthesizer<'a> {
    registry: &'a LanguageRegistry,
    separator: String,
}

impl<'a> SchemaSynthesizer<'a> {
    pub fn new(registry: &'a LanguageRegistry) -> Self {
        Self {
            registry,
            separator: DEFAULT_SEPARATORS[0].to_string(),
        }
    }

    /// Separator rendered into structured-mode instructions.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Build the schema for a task.
    ///
    /// Transcription tasks ignore `targets`. Targets are normalized through the
    /// registry; unknown ones are skipped and duplicates (after normalization)
    /// are emitted once, so section orders stay gapless.
    ///
    /// # Returns
    /// The schema (in structured format; callers switch it with
    /// [`OutputSchema::with_format`]) and the targets that were skipped.
    pub fn build_schema(
        &self,
        task: TaskType,
        targets: &[String],
        include_source: bool,
    ) -> (OutputSchema, Vec<String>) {
        let mut sections = Vec::new();
        let mut skipped = Vec::new();

        if include_source || task == TaskType::Transcribe {
            sections.push(source_section());
        }

        if task == TaskType::Translate {
            for target in targets {
                let code = match self.registry.normalize(target) {
                    Ok(code) => code,
                    Err(e) => {
                        warn!("Skipping target language: {}", e);
                        skipped.push(target.clone());
                        continue;
                    }
                };

                if sections
                    .iter()
                    .any(|section: &OutputSection| section.language_code == code)
                {
                    debug!("Duplicate target language '{}' ignored", target);
                    continue;
                }

                let order = sections.len() as u32 + 1;
                sections.push(self.language_section(code, order));
            }
        }

        let schema = OutputSchema {
            format: OutputFormat::Structured,
            separator: self.separator.clone(),
            sections,
        };
        (schema, skipped)
    }

    fn language_section(&self, code: &str, order: u32) -> OutputSection {
        let mut aliases: Vec<String> = Vec::new();
        let mut push = |alias: &str| {
            let alias = alias.trim();
            if !alias.is_empty() && !aliases.iter().any(|a| a == alias) {
                aliases.push(alias.to_string());
            }
        };

        if let Some(language) = self.registry.get_by_code(code) {
            language.localized_names().for_each(&mut push);
            language.aliases.iter().for_each(|alias| push(alias.as_str()));
        }
        push(code);
        push(&code.to_uppercase());

        OutputSection {
            key: self.registry.display_name(code),
            aliases,
            language_code: code.to_string(),
            required: false,
            order,
        }
    }
}

fn source_section() -> OutputSection {
    OutputSection {
        key: SOURCE_LABEL.to_string(),
        aliases: SOURCE_ALIASES.iter().map(|alias| alias.to_string()).collect(),
        language_code: String::new(),
        required: true,
        order: 1,
    }
}
