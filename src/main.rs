use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::Style;
use tracing_subscriber::EnvFilter;

use easel::cli::{Cli, Command, split_param};
use easel::comfy::ComfyClient;
use easel::config::EaselConfig;
use easel::generator::Generator;
use easel::tracker::WorkflowState;
use easel::ui::GenerationProgress;
use easel::workflow::{ParamType, TemplateLibrary, WorkflowTemplate};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = EaselConfig::load()?;
    if let Some(url) = &cli.url {
        config.url = url.trim_end_matches('/').to_string();
    }
    if let Some(dir) = &cli.template_dir {
        config.template_dir = dir.clone();
    }

    match &cli.command {
        Command::Generate {
            template_id,
            params,
            out,
            timeout_secs,
        } => generate(&config, template_id, params, out.as_deref(), *timeout_secs).await,
        Command::Templates { category } => list_templates(&config, category.as_deref()),
        Command::Status { prompt_id } => status(&config, prompt_id).await,
        Command::Cancel { prompt_id } => cancel(&config, prompt_id).await,
        Command::Check => check(&config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "easel=debug" } else { "easel=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn generate(
    config: &EaselConfig,
    template_id: &str,
    raw_params: &[String],
    out: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let mut library = TemplateLibrary::open(&config.template_dir)?;
    let template = library.load(template_id)?;
    let parameters = typed_params(&template, raw_params)?;

    let client = Arc::new(ComfyClient::from_config(config));
    let generator = Generator::new(Arc::clone(&client))
        .with_retry(config.retry_policy())
        .with_poll_interval(config.poll_interval())
        .with_wait_timeout(
            timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.wait_timeout()),
        );

    let progress = GenerationProgress::start(&template.name);
    let prompt = template.instantiate(&parameters)?;
    let record = match generator.generate(prompt).await {
        Ok(record) => record,
        Err(err) => {
            progress.finish_failure(&err.to_string());
            return Err(err.into());
        }
    };
    progress.finish_success(record.images.len(), record.duration_ms);

    match out.or(config.output_dir.as_deref()) {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory {dir}"))?;
            for artifact in &record.images {
                let bytes = client.fetch_artifact(artifact).await?;
                let target = Path::new(dir).join(&artifact.filename);
                std::fs::write(&target, bytes)?;
                println!("{}", target.display());
            }
        }
        None => {
            for artifact in &record.images {
                println!("{}", artifact.path());
            }
        }
    }
    Ok(())
}

/// Convert `nome=valor` CLI pairs using the types the template declares.
fn typed_params(
    template: &WorkflowTemplate,
    raw: &[String],
) -> Result<HashMap<String, serde_json::Value>> {
    let mut parameters = HashMap::new();
    for entry in raw {
        let Some((name, value)) = split_param(entry) else {
            bail!("invalid --param '{entry}', expected NAME=VALUE");
        };
        let Some(declared) = template.parameters.get(name) else {
            bail!("template '{}' has no parameter '{name}'", template.name);
        };
        let value = match declared.param_type {
            ParamType::Int => serde_json::Value::from(
                value
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("parameter '{name}' expects an integer"))?,
            ),
            ParamType::Float => serde_json::Value::from(
                value
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("parameter '{name}' expects a number"))?,
            ),
            ParamType::Bool => serde_json::Value::from(
                value
                    .trim()
                    .parse::<bool>()
                    .with_context(|| format!("parameter '{name}' expects true or false"))?,
            ),
            ParamType::String => serde_json::Value::from(value),
        };
        parameters.insert(name.to_string(), value);
    }
    Ok(parameters)
}

fn list_templates(config: &EaselConfig, category: Option<&str>) -> Result<()> {
    let mut library = TemplateLibrary::open(&config.template_dir)?;
    let ids = match category {
        Some(category) => library.by_category(Some(category))?,
        None => library.list()?,
    };
    if ids.is_empty() {
        println!("No templates found in {}", config.template_dir);
        return Ok(());
    }

    let bold = Style::new().bold();
    let dim = Style::new().dim();
    for id in ids {
        let template = library.load(&id)?;
        match &template.category {
            Some(category) => {
                println!("{} — {} [{category}]", bold.apply_to(&id), template.name)
            }
            None => println!("{} — {}", bold.apply_to(&id), template.name),
        }
        println!("  {}", template.description);
        for (name, param) in &template.parameters {
            let requirement = if param.required && param.default.is_none() {
                "required"
            } else {
                "optional"
            };
            println!(
                "  {}",
                dim.apply_to(format!(
                    "--param {name}=<{}> ({requirement}) — {}",
                    param.param_type, param.description
                ))
            );
        }
    }
    Ok(())
}

async fn status(config: &EaselConfig, prompt_id: &str) -> Result<()> {
    let client = ComfyClient::from_config(config);
    let status = client.status(prompt_id).await?;

    println!("{prompt_id}: {}", status.state);
    if let Some(position) = status.queue_position {
        println!("  queue position: {position}");
    }
    if status.state == WorkflowState::Running {
        println!("  progress: {:.0}%", status.progress * 100.0);
    }
    if let Some(images) = &status.result {
        for artifact in images {
            println!("  {}", artifact.path());
        }
    }
    if let Some(error) = &status.error {
        println!("  error: {error}");
    }
    Ok(())
}

async fn cancel(config: &EaselConfig, prompt_id: &str) -> Result<()> {
    let client = ComfyClient::from_config(config);
    if client.cancel(prompt_id).await? {
        println!("Cancellation acknowledged for {prompt_id}");
        Ok(())
    } else {
        eprintln!("Engine did not acknowledge cancellation for {prompt_id}");
        std::process::exit(1);
    }
}

async fn check(config: &EaselConfig) -> Result<()> {
    let client = ComfyClient::from_config(config);
    if client.health_check().await? {
        println!(
            "{} engine reachable at {}",
            Style::new().green().bold().apply_to("✔"),
            config.url
        );
        Ok(())
    } else {
        eprintln!(
            "{} engine unreachable at {}",
            Style::new().red().bold().apply_to("✘"),
            config.url
        );
        std::process::exit(1);
    }
}
