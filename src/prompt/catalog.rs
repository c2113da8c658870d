//! Named prompt templates.
//!
//! Every template is compiled when the catalog is built, so malformed source
//! fails at startup rather than on the first request that uses it.

use super::template::{Template, Variables};
use super::types::OutputFormat;
use crate::error::{PromptError, PromptResult};
use std::collections::BTreeMap;

pub const AUDIO_TRANSCRIBE: &str = "audio_transcribe";
pub const AUDIO_TRANSCRIBE_STRUCTURED: &str = "audio_transcribe_structured";
pub const AUDIO_TRANSLATE: &str = "audio_translate";
pub const AUDIO_TRANSLATE_STRUCTURED: &str = "audio_translate_structured";
pub const TEXT_TRANSLATE: &str = "text_translate";
pub const TEXT_TRANSLATE_STRUCTURED: &str = "text_translate_structured";

/// A compiled system/user template pair.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub description: String,
    /// Reply shape the template asks for
    pub output_format: OutputFormat,
    system: Template,
    user: Template,
}

impl PromptTemplate {
    /// Compile a template pair.
    ///
    /// # Errors
    /// `PromptError::TemplateRender` if either source fails to parse.
    pub fn new(
        name: &str,
        description: &str,
        output_format: OutputFormat,
        system_source: &str,
        user_source: &str,
    ) -> PromptResult<Self> {
        let compile = |source: &str| {
            Template::parse(source).map_err(|e| PromptError::TemplateRender {
                name: name.to_string(),
                message: e.message().to_string(),
            })
        };

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            output_format,
            system: compile(system_source)?,
            user: compile(user_source)?,
        })
    }

    /// Render the system and user prompts.
    pub fn render(&self, vars: &Variables) -> PromptResult<(String, String)> {
        let render = |template: &Template| {
            template.render(vars).map_err(|e| PromptError::TemplateRender {
                name: self.name.clone(),
                message: e.message().to_string(),
            })
        };

        let system = render(&self.system)?;
        let user = render(&self.user)?;
        Ok((system.trim().to_string(), user.trim().to_string()))
    }
}

/// Read-only set of templates keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, PromptTemplate>,
}

impl TemplateCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in templates.
    pub fn with_defaults() -> PromptResult<Self> {
        let mut catalog = Self::new();
        for (name, description, format, system, user) in BUILTIN_TEMPLATES {
            let system = system.replace(PERSONA_SLOT, NEKO_PERSONA);
            catalog.register(PromptTemplate::new(name, description, *format, &system, user)?);
        }
        Ok(catalog)
    }

    /// Add a template, replacing any existing one with the same name.
    pub fn register(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> PromptResult<&PromptTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| PromptError::TemplateNotFound(name.to_string()))
    }

    /// Render a template by name.
    ///
    /// # Returns
    /// `(system_prompt, user_prompt)`, both trimmed
    pub fn render(&self, name: &str, vars: &Variables) -> PromptResult<(String, String)> {
        self.get(name)?.render(vars)
    }

    /// `(name, description)` of every template, sorted by name.
    pub fn list_templates(&self) -> Vec<(&str, &str)> {
        self.templates
            .values()
            .map(|template| (template.name.as_str(), template.description.as_str()))
            .collect()
    }
}

type BuiltinTemplate = (
    &'static str,
    &'static str,
    OutputFormat,
    &'static str,
    &'static str,
);

const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[
    (
        AUDIO_TRANSCRIBE,
        "Transcribe audio, reply as a fenced JSON block",
        OutputFormat::Json,
        AUDIO_TRANSCRIBE_SYSTEM,
        AUDIO_USER,
    ),
    (
        AUDIO_TRANSCRIBE_STRUCTURED,
        "Transcribe audio, reply as a labelled line",
        OutputFormat::Structured,
        AUDIO_TRANSCRIBE_STRUCTURED_SYSTEM,
        AUDIO_USER,
    ),
    (
        AUDIO_TRANSLATE,
        "Transcribe and translate audio, reply as a fenced JSON block",
        OutputFormat::Json,
        AUDIO_TRANSLATE_SYSTEM,
        AUDIO_USER,
    ),
    (
        AUDIO_TRANSLATE_STRUCTURED,
        "Transcribe and translate audio, reply as labelled lines",
        OutputFormat::Structured,
        AUDIO_TRANSLATE_STRUCTURED_SYSTEM,
        AUDIO_USER,
    ),
    (
        TEXT_TRANSLATE,
        "Translate text, reply as a fenced JSON block",
        OutputFormat::Json,
        TEXT_TRANSLATE_SYSTEM,
        TEXT_USER,
    ),
    (
        TEXT_TRANSLATE_STRUCTURED,
        "Translate text, reply as labelled lines",
        OutputFormat::Structured,
        TEXT_TRANSLATE_STRUCTURED_SYSTEM,
        TEXT_USER,
    ),
];

/// Spliced into built-in system prompts before compilation.
const PERSONA_SLOT: &str = "{{> persona}}";

const NEKO_PERSONA: &str = r##"{{#if contains target_codes "neko"}}
For the Catgirl translation, rewrite the text in a playful catgirl voice: end sentences with "nya~" where it fits and keep the meaning intact. Only that translation uses this voice.
{{/if}}"##;

const AUDIO_TRANSCRIBE_SYSTEM: &str = r##"You are a professional audio transcription assistant.
{{#if source_language}}The speaker uses {{source_language}}.
{{/if}}
Transcribe the speech accurately and completely. Keep the speaker's wording; do not summarize, translate or add commentary.

Reply with a single fenced JSON block and nothing else:
```json
{
  "transcription": "<verbatim transcription>"
}
```"##;

const AUDIO_TRANSCRIBE_STRUCTURED_SYSTEM: &str = r##"You are a professional audio transcription assistant.
{{#if source_language}}The speaker uses {{source_language}}.
{{/if}}
Transcribe the speech accurately and completely. Keep the speaker's wording; do not summarize, translate or add commentary.

Reply with exactly one labelled line and nothing else:
{{source_label}}{{separator}} <verbatim transcription>"##;

const AUDIO_TRANSLATE_SYSTEM: &str = r##"You are a professional audio transcription and translation assistant.
{{#if source_language}}The speaker uses {{source_language}}.
{{/if}}
Complete these steps:
1. Transcribe the speech accurately and completely.
{{#each targets}}{{add @index 2}}. Translate the transcription into {{this.name}}.
{{/each}}{{> persona}}
Reply with a single fenced JSON block and nothing else. Provide all {{length targets}} translations, keyed by language code:
```json
{
  "transcription": "<verbatim transcription>",
  "translations": {
{{#each targets}}    "{{this.code}}": "<{{this.name}} translation>"{{#unless @last}},{{/unless}}
{{/each}}  }
}
```"##;

const AUDIO_TRANSLATE_STRUCTURED_SYSTEM: &str = r##"You are a professional audio transcription and translation assistant.
{{#if source_language}}The speaker uses {{source_language}}.
{{/if}}
Complete these steps:
1. Transcribe the speech accurately and completely.
{{#each targets}}{{add @index 2}}. Translate the transcription into {{this.name}}.
{{/each}}{{> persona}}
Reply with exactly these {{add (length targets) 1}} labelled lines, in this order, and nothing else:
{{source_label}}{{separator}} <verbatim transcription>
{{#each targets}}{{this.name}}{{separator}} <{{this.name}} translation>
{{/each}}"##;

const TEXT_TRANSLATE_SYSTEM: &str = r##"You are a professional translator.
{{#if source_language}}The text is written in {{source_language}}.
{{/if}}
Translate the text the user sends:
{{#each targets}}{{add @index 1}}. Into {{this.name}}.
{{/each}}{{> persona}}
Translate faithfully. Do not explain or comment on the translation.

Reply with a single fenced JSON block and nothing else. Provide all {{length targets}} translations, keyed by language code:
```json
{
  "translations": {
{{#each targets}}    "{{this.code}}": "<{{this.name}} translation>"{{#unless @last}},{{/unless}}
{{/each}}  }
}
```"##;

const TEXT_TRANSLATE_STRUCTURED_SYSTEM: &str = r##"You are a professional translator.
{{#if source_language}}The text is written in {{source_language}}.
{{/if}}
Translate the text the user sends:
{{#each targets}}{{add @index 1}}. Into {{this.name}}.
{{/each}}{{> persona}}
Translate faithfully. Do not explain or comment on the translation.

Reply with exactly these {{length targets}} labelled lines, in this order, and nothing else:
{{#each targets}}{{this.name}}{{separator}} <{{this.name}} translation>
{{/each}}"##;

const AUDIO_USER: &str = r##"{{default user_prompt "Please process the attached audio as instructed."}}"##;

const TEXT_USER: &str = r##"{{default user_prompt "Please translate the following text."}}

{{source_text}}"##;
