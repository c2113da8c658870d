//! Command line front end.
//!
//! Usage:
//!   lingua-prompt translate [--to en,ja] [--from zh] [FILE]   # Translate text (FILE or stdin)
//!   lingua-prompt audio FILE [--to en,ja] [--from zh] [--transcribe] [--prompt TEXT]
//!   lingua-prompt preview [--to en,ja] [--from zh] [--audio] [--transcribe] [FILE]
//!   lingua-prompt extract [--to en,ja] [--audio] [--transcribe] [FILE]  # Parse a saved reply
//!   lingua-prompt languages
//!   lingua-prompt templates
//!
//! Required environment variables (translate/audio only):
//! - OPENAI_API_KEY
//!
//! Optional:
//! - OPENAI_MODEL (defaults to gpt-4o-mini)
//! - LANGUAGES_FILE (JSON language catalogue)
//! - DEFAULT_TARGET_LANGUAGES (defaults to en,ja)
//! - PARSING_SEPARATORS (|-separated, defaults to ":|：|->|=>")
//! - MAX_EFFORT_EXTRACTION (defaults to true)

use anyhow::{bail, Context, Result};
use lingua_prompt::completion::OpenAiCompletion;
use lingua_prompt::config::Config;
use lingua_prompt::pipeline::{AudioRequest, Pipeline, ProcessRequest, TextRequest};
use lingua_prompt::{PromptEngine, PromptRequest, TaskType};
use std::io::Read;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default)]
struct CliArgs {
    targets: Vec<String>,
    source: Option<String>,
    prompt: Option<String>,
    audio: bool,
    transcribe: bool,
    file: Option<String>,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--to" => {
                    let value = iter.next().context("--to needs a value")?;
                    parsed.targets = value
                        .split(',')
                        .map(|code| code.trim().to_string())
                        .filter(|code| !code.is_empty())
                        .collect();
                }
                "--from" => parsed.source = Some(iter.next().context("--from needs a value")?.clone()),
                "--prompt" => {
                    parsed.prompt = Some(iter.next().context("--prompt needs a value")?.clone())
                }
                "--audio" => parsed.audio = true,
                "--transcribe" => parsed.transcribe = true,
                other if other.starts_with("--") => bail!("Unknown option: {}", other),
                other => {
                    if parsed.file.is_some() {
                        bail!("Unexpected argument: {}", other);
                    }
                    parsed.file = Some(other.to_string());
                }
            }
        }
        Ok(parsed)
    }

    fn task(&self) -> TaskType {
        if self.transcribe {
            TaskType::Transcribe
        } else {
            TaskType::Translate
        }
    }

    fn targets_or(&self, defaults: &[String]) -> Vec<String> {
        if self.targets.is_empty() && !self.transcribe {
            defaults.to_vec()
        } else {
            self.targets.clone()
        }
    }

    fn prompt_request(&self, config: &Config, text: Option<String>) -> PromptRequest {
        let targets = self.targets_or(&config.default_target_languages);
        let mut request = match text {
            Some(text) if !self.audio => PromptRequest::text(text, targets),
            _ => PromptRequest::audio(self.task(), targets),
        };
        request.source_language = self.source.clone();
        request
    }
}

/// FILE contents, or stdin when no file is given.
fn read_input(file: Option<&str>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path)),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read stdin")?;
            Ok(input)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn pipeline(config: &Config, engine: PromptEngine) -> Result<Pipeline<OpenAiCompletion>> {
    let completion = OpenAiCompletion::from_config(config)?;
    info!("Using model {}", completion.model());
    Ok(Pipeline::new(
        engine,
        completion,
        config.default_target_languages.clone(),
    ))
}

async fn translate_command(config: &Config, engine: PromptEngine, args: &CliArgs) -> Result<()> {
    let text = read_input(args.file.as_deref())?;
    let request = TextRequest {
        text: text.trim().to_string(),
        source_language: args.source.clone(),
        target_languages: args.targets.clone(),
    };
    let response = pipeline(config, engine)?
        .process(ProcessRequest::Text(request))
        .await?;
    print_json(&response)
}

async fn audio_command(config: &Config, engine: PromptEngine, args: &CliArgs) -> Result<()> {
    let path = args.file.as_deref().context("audio needs a FILE argument")?;
    let audio = std::fs::read(path).with_context(|| format!("Failed to read {}", path))?;
    let audio_format = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_string();

    let request = AudioRequest {
        audio,
        audio_format,
        task: args.task(),
        source_language: args.source.clone(),
        target_languages: args.targets.clone(),
        user_prompt: args.prompt.clone(),
    };
    let response = pipeline(config, engine)?
        .process(ProcessRequest::Audio(request))
        .await?;
    print_json(&response)
}

fn preview_command(config: &Config, engine: &PromptEngine, args: &CliArgs) -> Result<()> {
    let text = if args.audio {
        None
    } else {
        Some(read_input(args.file.as_deref())?.trim().to_string())
    };
    let built = engine.build_prompt(&args.prompt_request(config, text))?;
    print_json(&built)
}

fn extract_command(config: &Config, engine: &PromptEngine, args: &CliArgs) -> Result<()> {
    let reply = read_input(args.file.as_deref())?;
    // Schema only; the text itself is irrelevant here
    let text = (!args.audio).then(String::new);
    let built = engine.build_prompt(&args.prompt_request(config, text))?;
    let parsed = engine.extract_structured(&reply, &built.output_schema);
    print_json(&parsed)
}

fn languages_command(engine: &PromptEngine) {
    for language in engine.languages() {
        println!("{:<6} {}", language.code, language.display_name());
    }
}

fn templates_command(engine: &PromptEngine) {
    for (name, description) in engine.list_templates() {
        println!("{:<28} {}", name, description);
    }
}

fn print_usage() {
    eprintln!("Usage: lingua-prompt <command> [options] [FILE]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  translate   Translate text from FILE or stdin");
    eprintln!("  audio       Transcribe or translate an audio FILE");
    eprintln!("  preview     Print the prompts and schema without calling the model");
    eprintln!("  extract     Parse a saved model reply from FILE or stdin");
    eprintln!("  languages   List supported languages");
    eprintln!("  templates   List prompt templates");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --to en,ja      Target languages (defaults to DEFAULT_TARGET_LANGUAGES)");
    eprintln!("  --from zh       Source language hint");
    eprintln!("  --audio         preview/extract: use the audio templates");
    eprintln!("  --transcribe    Transcription only, no translations");
    eprintln!("  --prompt TEXT   audio: replace the default user prompt");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lingua_prompt=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let command = args[1].as_str();
    if matches!(command, "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let cli = CliArgs::parse(&args[2..])?;
    let config = Config::from_env()?;
    let engine = PromptEngine::from_config(&config)?;

    match command {
        "translate" => translate_command(&config, engine, &cli).await,
        "audio" => audio_command(&config, engine, &cli).await,
        "preview" => preview_command(&config, &engine, &cli),
        "extract" => extract_command(&config, &engine, &cli),
        "languages" => {
            languages_command(&engine);
            Ok(())
        }
        "templates" => {
            templates_command(&engine);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    }
}
