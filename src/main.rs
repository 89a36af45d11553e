mod pipeline;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use pipeline::{Pipeline, Stage, StageSelection};
use std::path::PathBuf;
use std::process::ExitCode;
use threadscope_core::{ConceptConfig, ConfigError, CoreError, ErrorExt, Settings};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "threadscope=info,reddit_client=info,insight_engine=info,llm_interface=info,artifact_store=info";

#[derive(Parser)]
#[command(name = "threadscope")]
#[command(about = "Collect Reddit discussions, extract insights with an LLM and synthesize a report", long_about = None)]
struct Cli {
    /// Concept configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Stages to run, comma separated
    #[arg(long, value_enum, value_delimiter = ',')]
    steps: Vec<Stage>,

    /// Reuse the existing threads file
    #[arg(long)]
    skip_fetch: bool,

    /// Reuse the existing analysis results
    #[arg(long)]
    skip_analyze: bool,

    #[arg(long)]
    skip_synthesize: bool,

    /// Overrides OUTPUT_DIR
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let selection = StageSelection::resolve(
        &cli.steps,
        cli.skip_fetch,
        cli.skip_analyze,
        cli.skip_synthesize,
    );
    if selection.is_empty() {
        Cli::command()
            .error(ErrorKind::ArgumentConflict, "no stages left to run")
            .exit();
    }

    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli, selection).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let message = if let Some(core) = e.downcast_ref::<CoreError>() {
                core.user_friendly_message()
            } else if let Some(config) = e.downcast_ref::<ConfigError>() {
                config.user_friendly_message()
            } else {
                e.to_string()
            };
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, selection: StageSelection) -> anyhow::Result<()> {
    let concept = ConceptConfig::load(&cli.config)?;
    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }
    settings.collection.validate()?;

    info!(
        "Concept '{}': {} subreddits, {} keywords, {} categories",
        concept.concept_name,
        concept.target_subreddits.len(),
        concept.keywords.len(),
        concept.analysis_categories.len()
    );

    Pipeline::new(concept, settings, selection).run().await
}
