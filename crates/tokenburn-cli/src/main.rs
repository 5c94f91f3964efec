use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokenburn_benchmark::{
    load_context_cases, BenchmarkRunner, ChatClient, ContextPromptGenerator, Cooldown, MeasurementEngine,
    PromptProvisioner, Recorders, RunControls, SliceDirection,
};
use tokenburn_core::{
    ContextCategory, OutcomeStatus, PromptCase, RunSession, SessionMeta, TokenBurnConfig, TokenBurnError,
};
use tokenburn_services::{
    format_elapsed, Comparison, ConsoleReporter, GpuMonitor, JsonReport, KeyReader, LiveRun, MemorySampler,
    ReportSet, TableLog,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tokenburn")]
#[command(about = "TokenBurn - streaming LLM throughput benchmarks", long_about = None)]
struct Cli {
    /// JSON config file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// OpenAI-compatible API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Directory for report files
    #[arg(long, global = true, default_value = ".")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// GPU label used in reports (e.g. RTX3090)
    gpu_name: String,

    /// Model to benchmark (e.g. qwen3:32b)
    model_name: String,

    /// Seconds to idle between prompts
    #[arg(long)]
    cooling: Option<u64>,
}

#[derive(Args)]
struct PromptArgs {
    /// Number of prompts sliced from the source text
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Source text to slice prompts from
    #[arg(long)]
    source: Option<PathBuf>,

    /// Directory holding the numbered prompt files
    #[arg(long)]
    prompts_dir: Option<PathBuf>,

    /// Slice prefixes instead of suffixes
    #[arg(long)]
    forward: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the prompt-length sweep and write the table report
    Sweep {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        prompts: PromptArgs,

        /// Also write the JSON report
        #[arg(long)]
        json: bool,
    },

    /// Benchmark large-context prompts with GPU memory tracking
    Context {
        #[command(flatten)]
        target: Target,

        /// Context categories to test (default: chosen from GPU memory)
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        categories: Vec<ContextCategory>,
    },

    /// Stream tokens live with GPU telemetry; press `s` to skip, `q` to quit
    Live {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        prompts: PromptArgs,

        /// Use large-context prompts from these categories instead of the sweep
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        categories: Vec<ContextCategory>,
    },

    /// Generate synthetic large-context prompt files
    GeneratePrompts {
        /// Categories to generate (default: chosen from GPU memory)
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        categories: Vec<ContextCategory>,

        /// Random seed for reproducible text
        #[arg(long)]
        seed: Option<u64>,

        /// Overwrite existing prompt files
        #[arg(long)]
        force: bool,
    },

    /// Check the API endpoint, model list and GPU tooling
    Check {
        /// Also time a short chat against this model
        #[arg(long)]
        model: Option<String>,
    },

    /// List models served by the endpoint
    Models,

    /// Compare JSON reports of two configurations per context size
    Compare {
        /// Reports of the reference configuration
        #[arg(long, required = true, num_args = 1..)]
        baseline: Vec<PathBuf>,

        /// Reports of the configuration under test
        #[arg(long, required = true, num_args = 1..)]
        candidate: Vec<PathBuf>,

        /// Column label for the baseline
        #[arg(long, default_value = "baseline")]
        baseline_name: String,

        /// Column label for the candidate
        #[arg(long, default_value = "candidate")]
        candidate_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = TokenBurnConfig::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(url) = &cli.base_url {
        config.endpoint.base_url = url.clone();
    }
    if let Some(key) = &cli.api_key {
        config.endpoint.api_key = key.clone();
    }

    match cli.command {
        Commands::Sweep {
            target,
            prompts,
            json,
        } => {
            apply_target(&mut config, &target);
            apply_prompt_args(&mut config, &prompts);
            config.validate()?;
            cmd_sweep(&config, &target, &cli.output_dir, json).await
        }
        Commands::Context { target, categories } => {
            apply_target(&mut config, &target);
            config.validate()?;
            cmd_context(&config, &target, categories, &cli.output_dir).await
        }
        Commands::Live {
            target,
            prompts,
            categories,
        } => {
            apply_target(&mut config, &target);
            apply_prompt_args(&mut config, &prompts);
            config.validate()?;
            cmd_live(config, target, categories, cli.output_dir).await
        }
        Commands::GeneratePrompts {
            categories,
            seed,
            force,
        } => cmd_generate_prompts(&config, categories, seed, force),
        Commands::Check { model } => cmd_check(&config, model).await,
        Commands::Models => cmd_models(&config).await,
        Commands::Compare {
            baseline,
            candidate,
            baseline_name,
            candidate_name,
        } => cmd_compare(&baseline, &candidate, baseline_name, candidate_name),
    }
}

fn apply_target(config: &mut TokenBurnConfig, target: &Target) {
    if let Some(cooling) = target.cooling {
        config.run.cooling_secs = cooling;
    }
}

fn apply_prompt_args(config: &mut TokenBurnConfig, args: &PromptArgs) {
    if let Some(count) = args.count {
        config.prompts.count = count;
    }
    if let Some(source) = &args.source {
        config.prompts.source_file = source.clone();
    }
    if let Some(dir) = &args.prompts_dir {
        config.prompts.prompts_dir = dir.clone();
    }
    if args.forward {
        config.prompts.reverse = false;
    }
}

fn build_runner(config: &TokenBurnConfig, model: &str) -> Result<BenchmarkRunner> {
    let client = ChatClient::new(&config.endpoint)?;
    let engine = MeasurementEngine::new(client, model, config);
    Ok(BenchmarkRunner::new(engine, Cooldown::from_secs(config.run.cooling_secs)))
}

fn session_meta(config: &TokenBurnConfig, target: &Target) -> SessionMeta {
    SessionMeta::new(
        &target.gpu_name,
        &target.model_name,
        &config.endpoint.base_url,
        Local::now().to_rfc3339(),
    )
}

/// Cancels the returned token on Ctrl-C.
fn quit_on_ctrl_c() -> CancellationToken {
    let quit = CancellationToken::new();
    let token = quit.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping after the current step...");
            token.cancel();
        }
    });
    quit
}

fn provision_sweep(config: &TokenBurnConfig) -> Result<Vec<PromptCase>> {
    let provisioner = PromptProvisioner::from_config(&config.prompts);
    info!(
        direction = SliceDirection::from_reverse(config.prompts.reverse).label(),
        dir = %provisioner.prompts_dir().display(),
        "Provisioning prompts"
    );
    provisioner
        .provision()
        .context("failed to provision prompts")
}

fn categories_or_detect(categories: Vec<ContextCategory>, config: &TokenBurnConfig) -> Vec<ContextCategory> {
    if !categories.is_empty() {
        return categories;
    }
    let identified = GpuMonitor::from_config(&config.gpu).identify();
    let total_mb = identified.as_ref().map(|(_, total)| *total).filter(|t| *t > 0);
    if let Some((name, total)) = &identified {
        println!("Detected {} with {:.1} GB", name, *total as f64 / 1024.0);
    }
    let detected = ContextCategory::for_total_memory_mb(total_mb);
    info!(categories = ?detected, "Selected context categories");
    detected
}

fn load_context(config: &TokenBurnConfig, categories: &[ContextCategory]) -> Result<Vec<PromptCase>> {
    match load_context_cases(&config.prompts.context_dir, categories) {
        Ok(cases) if !cases.is_empty() => Ok(cases),
        Ok(_) | Err(TokenBurnError::MissingInput(_)) => bail!(
            "no context prompts under {}; run `tokenburn generate-prompts` first",
            config.prompts.context_dir.display()
        ),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_sweep(
    config: &TokenBurnConfig,
    target: &Target,
    output_dir: &std::path::Path,
    json: bool,
) -> Result<()> {
    let cases = provision_sweep(config)?;
    std::fs::create_dir_all(output_dir)?;

    let log = TableLog::new(output_dir, &target.gpu_name, &target.model_name);
    let log_path = log.path().to_path_buf();
    let mut recorders = Recorders::new().with(ConsoleReporter::new()).with(log);
    if json {
        recorders.push(Box::new(JsonReport::new(
            output_dir,
            &target.gpu_name,
            &target.model_name,
            Local::now(),
        )));
    }

    let mut runner = build_runner(config, &target.model_name)?;
    let controls = RunControls::new(quit_on_ctrl_c());
    let session = runner
        .run(session_meta(config, target), &cases, &mut recorders, &controls)
        .await?;

    print_failures(&session);
    println!("Report written to {}", log_path.display());
    Ok(())
}

async fn cmd_context(
    config: &TokenBurnConfig,
    target: &Target,
    categories: Vec<ContextCategory>,
    output_dir: &std::path::Path,
) -> Result<()> {
    let categories = categories_or_detect(categories, config);
    let cases = load_context(config, &categories)?;
    std::fs::create_dir_all(output_dir)?;

    let report = JsonReport::new(output_dir, &target.gpu_name, &target.model_name, Local::now());
    let report_path = report.path().to_path_buf();
    let mut recorders = Recorders::new().with(ConsoleReporter::new()).with(report);

    let sampler = MemorySampler::new(
        GpuMonitor::from_config(&config.gpu),
        std::time::Duration::from_millis(config.gpu.memory_sample_interval_ms),
    );
    let mut runner = build_runner(config, &target.model_name)?.with_monitor(sampler);
    let controls = RunControls::new(quit_on_ctrl_c());
    let session = runner
        .run(session_meta(config, target), &cases, &mut recorders, &controls)
        .await?;

    print_context_summary(&session);
    println!("\nFull results saved to: {}", report_path.display());
    Ok(())
}

async fn cmd_live(
    config: TokenBurnConfig,
    target: Target,
    categories: Vec<ContextCategory>,
    output_dir: PathBuf,
) -> Result<()> {
    let cases = if categories.is_empty() {
        provision_sweep(&config)?
    } else {
        load_context(&config, &categories)?
    };
    std::fs::create_dir_all(&output_dir)?;

    let recorders = Recorders::new().with(JsonReport::new(
        &output_dir,
        &target.gpu_name,
        &target.model_name,
        Local::now(),
    ));
    let live = LiveRun {
        runner: build_runner(&config, &target.model_name)?,
        meta: session_meta(&config, &target),
        cases,
        recorder: recorders,
        quit: quit_on_ctrl_c(),
    };

    let monitor = GpuMonitor::from_config(&config.gpu);
    let session = tokio::task::spawn_blocking(move || {
        let poller = monitor.spawn_poller();
        let keys = KeyReader::spawn();
        live.run(&poller, keys.commands())
    })
    .await??;

    print_failures(&session);
    Ok(())
}

fn cmd_compare(
    baseline: &[PathBuf],
    candidate: &[PathBuf],
    baseline_name: String,
    candidate_name: String,
) -> Result<()> {
    let baseline = ReportSet::load(baseline_name, baseline).context("Failed to load baseline reports")?;
    let candidate = ReportSet::load(candidate_name, candidate).context("Failed to load candidate reports")?;
    println!(
        "Loaded {} baseline and {} candidate records",
        baseline.records.len(),
        candidate.records.len()
    );

    print!("{}", Comparison::new(&baseline, &candidate).render());
    Ok(())
}

fn cmd_generate_prompts(
    config: &TokenBurnConfig,
    categories: Vec<ContextCategory>,
    seed: Option<u64>,
    force: bool,
) -> Result<()> {
    let categories = categories_or_detect(categories, config);
    let seed = seed.unwrap_or(config.prompts.synthetic_seed);
    let generator = ContextPromptGenerator::new(&config.prompts.context_dir, seed).overwrite(force);

    let stats = generator.generate(&categories)?;
    println!();
    println!("{:<10} {:<8} {:>10} {:>10} {:>10}", "Category", "Label", "Target", "Words", "Size MB");
    println!("{:-<52}", "");
    for s in &stats {
        println!(
            "{:<10} {:<8} {:>10} {:>10} {:>10.2}",
            s.category, s.label, s.target_tokens, s.actual_words, s.file_size_mb
        );
    }
    println!();
    println!("Statistics saved to {}", generator.stats_path().display());
    Ok(())
}

async fn cmd_check(config: &TokenBurnConfig, model: Option<String>) -> Result<()> {
    let client = ChatClient::new(&config.endpoint)?;
    println!("System Check:");
    println!("{:-<40}", "");
    println!("  Endpoint: {}", client.base_url());

    match client.list_local_models().await {
        Ok(models) => println!("  Ollama API: connected ({} models installed)", models.len()),
        Err(e) => println!("  Ollama API: unavailable ({})", e),
    }
    match client.list_models().await {
        Ok(models) => println!("  OpenAI API: connected ({} models served)", models.len()),
        Err(e) => println!("  OpenAI API: unavailable ({})", e),
    }

    let monitor = GpuMonitor::from_config(&config.gpu);
    match monitor.sample() {
        Ok(gpu) => println!(
            "  GPU: {} ({} / {} MB used, driver {})",
            gpu.name, gpu.memory_used_mb, gpu.memory_total_mb, gpu.driver_version
        ),
        Err(e) => println!("  GPU: {}", e),
    }

    if let Some(model) = model {
        let mut quick = config.clone();
        quick.sampling.max_tokens = 50;
        let mut engine = MeasurementEngine::new(client, &model, &quick);
        match engine.measure("Say hello in one short sentence.", true).await {
            Ok(m) => println!(
                "  Chat ({}): TTFT {:.2}s, {:.2} t/s, {} tokens",
                model, m.time_to_first_token, m.completion_speed, m.completion_tokens
            ),
            Err(e) => {
                warn!(model = %model, error = %e, "Chat check failed");
                println!("  Chat ({}): failed ({})", model, e);
            }
        }
    }
    println!();
    Ok(())
}

async fn cmd_models(config: &TokenBurnConfig) -> Result<()> {
    let client = ChatClient::new(&config.endpoint)?;

    println!();
    println!("Available Models:");
    println!("{:-<65}", "");
    match client.list_local_models().await {
        Ok(models) => {
            println!("  {:<4} {:<40} {}", "#", "Name", "Quantization");
            println!("{:-<65}", "");
            for (i, m) in models.iter().enumerate() {
                let quant = m
                    .details
                    .as_ref()
                    .and_then(|d| d.quantization_level.as_deref())
                    .unwrap_or("-");
                println!("  {:<4} {:<40} {}", i + 1, m.name, quant);
            }
        }
        Err(e) => {
            info!(error = %e, "Ollama tags unavailable, falling back to /models");
            let ids = client.list_models().await.context("failed to list models")?;
            for (i, id) in ids.iter().enumerate() {
                println!("  {:<4} {}", i + 1, id);
            }
        }
    }
    println!();
    Ok(())
}

fn print_failures(session: &RunSession) {
    let failed: Vec<_> = session
        .outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .collect();
    if failed.is_empty() {
        return;
    }
    println!("\nFailed prompts:");
    for outcome in failed {
        println!("  - {}: {}", outcome.label, outcome.error.as_deref().unwrap_or("unknown error"));
    }
}

fn print_context_summary(session: &RunSession) {
    let summary = &session.summary;
    println!("\n{:=<60}", "");
    println!("BENCHMARK SUMMARY");
    println!("{:=<60}", "");
    println!("GPU: {}", session.meta.gpu);
    println!("Model: {}", session.meta.model);
    println!("Total tests: {}", summary.total);
    println!("Successful: {}", summary.succeeded);
    println!("Failed: {}", summary.failed);
    println!("Duration: {}", format_elapsed(summary.elapsed_secs));

    let successful: Vec<_> = session.outcomes.iter().filter(|o| o.is_success()).collect();
    if !successful.is_empty() {
        println!("\n{:<10} {:<12} {:<12} {:<15}", "Context", "PP Speed", "TG Speed", "Peak MB");
        println!("{:-<50}", "");
        for outcome in successful {
            let Some(m) = &outcome.measurement else { continue };
            let peak = outcome
                .memory_stats
                .as_ref()
                .map(|s| s.max_memory_mb.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            println!(
                "{:<10} {:<12.2} {:<12.2} {:<15}",
                outcome.label, m.prompt_speed, m.completion_speed, peak
            );
        }
    }
    print_failures(session);
}
