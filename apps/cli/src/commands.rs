//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docgen_core::{ModelStatus, PipelineConfig, ProgressReporter, RunSummary, run_pipeline};
use docgen_generation::{PromptStrategy, StandardPrompt, TemplatePrompt, build_provider};
use docgen_shared::{
    AppConfig, DescriptionPolicy, GenerationConfig, ProviderConfig, find_config_file, init_config,
    load_config, resolve_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// dbt-docgen: AI-written documentation for dbt models.
#[derive(Parser)]
#[command(
    name = "dbt-docgen",
    version,
    about = "Generate documentation blocks for dbt models and reference them from schema files.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate documentation for the project's models.
    Generate(GenerateArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct GenerateArgs {
    /// Directory inside the dbt project (defaults to the current directory).
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Path to manifest.json (defaults to <target-path>/manifest.json).
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Doc block output directory, relative to the project root.
    #[arg(long)]
    pub docs_dir: Option<PathBuf>,

    /// Maximum in-flight generation requests.
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Only document these models (repeatable).
    #[arg(short, long = "select", value_name = "NAME")]
    pub select: Vec<String>,

    /// What to do with hand-written descriptions: overwrite or skip-if-present.
    #[arg(long)]
    pub policy: Option<DescriptionPolicy>,

    /// Stop admitting new requests after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the run summary as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init {
        /// Write docgen.toml into the current dbt project instead of ~/.dbt-docgen.
        #[arg(long)]
        project: bool,
    },
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Default directives for the library crates and this binary.
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "docgen=info,dbt_docgen=info",
        1 => "docgen=debug,dbt_docgen=debug",
        _ => "docgen=trace,dbt_docgen=trace",
    }
}

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate(args) => cmd_generate(args).await,
        Command::Config { action } => match action {
            ConfigAction::Init { project } => cmd_config_init(project),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

async fn cmd_generate(args: GenerateArgs) -> Result<()> {
    let cwd = std::env::current_dir().map_err(|e| eyre!("cannot determine working directory: {e}"))?;
    let start_dir = args.project_dir.clone().unwrap_or(cwd);
    let project_root = docgen_manifest::find_project_root(&start_dir)?;

    let mut config = load_config(Some(project_root.as_path()))?;
    if let Some(concurrency) = args.concurrency {
        config.generation.concurrency = concurrency;
    }
    if let Some(policy) = args.policy {
        config.output.description_policy = policy;
    }
    if let Some(docs_dir) = args.docs_dir {
        config.output.docs_dir = docs_dir;
    }
    if let Some(secs) = args.timeout {
        config.generation.run_timeout_secs = Some(secs);
    }

    // Fail on a missing key before any work is done.
    let api_key = resolve_api_key(&config)?;
    let provider = build_provider(&ProviderConfig::from_section(&config.provider, api_key)?)?;

    let manifest_path = match args.manifest {
        Some(path) => path,
        None => docgen_manifest::resolve_manifest_path(&project_root)?,
    };

    let strategy: Box<dyn PromptStrategy> = match &config.generation.prompt_template {
        Some(template) => Box::new(TemplatePrompt::from_file(
            &resolve_in(&project_root, template),
            config.generation.max_logic_chars,
        )?),
        None => Box::new(StandardPrompt::new(config.generation.max_logic_chars)),
    };

    let pipeline_config = PipelineConfig {
        docs_dir: resolve_in(&project_root, &config.output.docs_dir),
        project_root,
        manifest_path,
        generation: GenerationConfig::from(&config),
        description_policy: config.output.description_policy,
        run_timeout: config.generation.run_timeout_secs.map(Duration::from_secs),
        select: args.select,
    };

    info!(
        project = %pipeline_config.project_root.display(),
        manifest = %pipeline_config.manifest_path.display(),
        model = %config.provider.model,
        concurrency = pipeline_config.generation.concurrency,
        "generating documentation"
    );

    let reporter = CliProgress::new();
    let summary = match run_pipeline(&pipeline_config, provider, strategy.as_ref(), &reporter).await {
        Ok(summary) => summary,
        Err(e) => {
            reporter.spinner.finish_and_clear();
            if e.is_fatal() {
                return Err(eyre!("run aborted ({}): {e}", e.kind()));
            }
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.timed_out {
        return Err(eyre!("run timed out; {} model(s) not documented", summary.failed));
    }
    if summary.failed > 0 {
        return Err(eyre!("{} model(s) failed", summary.failed));
    }
    Ok(())
}

/// `path` as-is when absolute, otherwise relative to `root`.
fn resolve_in(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn print_summary(summary: &RunSummary) {
    let width = summary
        .outcomes
        .iter()
        .map(|o| o.unique_id.len())
        .max()
        .unwrap_or(0)
        .max("MODEL".len());

    println!();
    println!("  {:<width$}  {:<9}  DETAIL", "MODEL", "STATUS");
    for outcome in &summary.outcomes {
        let status = match outcome.status {
            ModelStatus::Succeeded => "ok",
            ModelStatus::Skipped => "skipped",
            ModelStatus::Failed => "failed",
        };
        let detail = match (&outcome.failure, &outcome.detail) {
            (Some(kind), Some(detail)) => format!("{kind}: {detail}"),
            (Some(kind), None) => kind.to_string(),
            (None, Some(detail)) => detail.clone(),
            (None, None) => outcome
                .doc_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        println!("  {:<width$}  {status:<9}  {detail}", outcome.unique_id);
    }

    println!();
    println!(
        "  Succeeded: {}  Skipped: {}  Failed: {}",
        summary.succeeded, summary.skipped, summary.failed
    );
    println!(
        "  Tokens:    {} in / {} out",
        summary.tokens_in, summary.tokens_out
    );
    println!("  Schema files rewritten: {}", summary.schema_files_rewritten);
    println!(
        "  Started:   {}  ({:.1}s)",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.elapsed.as_secs_f64()
    );
    if summary.timed_out {
        println!("  Run timeout reached before all models were scheduled.");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn model_generated(&self, unique_id: &str, succeeded: bool, current: usize, total: usize) {
        let mark = if succeeded { "done" } else { "failed" };
        self.spinner
            .set_message(format!("Generating [{current}/{total}] {unique_id} ({mark})"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(project: bool) -> Result<()> {
    let path = if project {
        let cwd = std::env::current_dir()?;
        let root = docgen_manifest::find_project_root(&cwd)?;
        init_config(Some(root.as_path()))?
    } else {
        init_config(None)?
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project_root = docgen_manifest::find_project_root(&cwd).ok();

    match find_config_file(project_root.as_deref())? {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config file found, showing defaults"),
    }

    let config: AppConfig = load_config(project_root.as_deref())?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
