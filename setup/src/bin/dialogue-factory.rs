use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};

use dialogue_configuration::{load_config, setup_logging};
use dialogue_domain::{DialogueRequest, LanguageTag};
use dialogue_setup::{output, Application};

struct CliArgs {
    config: Option<PathBuf>,
    prompts: PathBuf,
    output_dir: PathBuf,
    per_prompt: u32,
    language: LanguageTag,
}

const USAGE: &str = "usage: dialogue-factory --prompts <file> [--config <file>] \
[--output-dir <dir>] [--per-prompt <n>] [--language <tag>]";

fn parse_args() -> Result<CliArgs, String> {
    let mut config = None;
    let mut prompts = None;
    let mut output_dir = PathBuf::from("output");
    let mut per_prompt = 1u32;
    let mut language = LanguageTag::English;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{name} expects a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--prompts" => prompts = Some(PathBuf::from(value("--prompts")?)),
            "--output-dir" => output_dir = PathBuf::from(value("--output-dir")?),
            "--per-prompt" => {
                per_prompt = value("--per-prompt")?
                    .parse()
                    .map_err(|_| format!("--per-prompt expects a number\n{USAGE}"))?;
            }
            "--language" => {
                let raw = value("--language")?;
                language = LanguageTag::parse(&raw)
                    .ok_or_else(|| format!("unrecognised language `{raw}`\n{USAGE}"))?;
            }
            other => return Err(format!("unknown argument `{other}`\n{USAGE}")),
        }
    }

    let prompts = prompts.ok_or_else(|| format!("--prompts is required\n{USAGE}"))?;
    if per_prompt == 0 {
        return Err(format!("--per-prompt must be at least 1\n{USAGE}"));
    }
    Ok(CliArgs {
        config,
        prompts,
        output_dir,
        per_prompt,
        language,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(error) => {
            eprintln!("{error}");
            process::exit(2);
        }
    };

    let config = load_config(args.config.as_deref()).context("loading configuration")?;
    setup_logging(&config.logging);

    let raw_prompts = tokio::fs::read_to_string(&args.prompts)
        .await
        .with_context(|| format!("reading prompts from {}", args.prompts.display()))?;
    let requests: Vec<DialogueRequest> = raw_prompts
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| DialogueRequest {
            prompt_text: line.to_string(),
            target_language: args.language.clone(),
            count: args.per_prompt,
        })
        .collect();
    if requests.is_empty() {
        bail!("no prompts found in {}", args.prompts.display());
    }

    let app = Application::new(config).await.context("wiring pipeline")?;
    let outcome = app.run_batch(requests).await;
    output::write_outcome(&args.output_dir, &outcome).context("writing batch output")?;

    println!(
        "accepted {} / {} dialogue(s); output in {}",
        outcome.accepted.len(),
        outcome.total(),
        args.output_dir.display()
    );
    if outcome.accepted.is_empty() {
        process::exit(1);
    }
    Ok(())
}
