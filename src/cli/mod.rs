use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use crate::ai::{
    AiAnalyzer, AiClient, AiOptions, GeminiBackend, GenerationConfig, MAX_CONCURRENCY, Pricing,
    RetryPolicy,
};
use crate::cache::{FindingCache, FindingStore, JsonFileStore};
use crate::config::{EffectiveConfig, parse_groups, parse_modes};
use crate::core::{AnalysisModes, AnalysisReport, Template};
use crate::engine::{Engine, EngineOptions, ResourceFilter};
use crate::exit::ExitCode;
use crate::rules::RuleEvaluator;
use crate::synth::SynthOptions;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "infralens",
    version,
    about = "Reviews synthesized CloudFormation templates for security, cost and compliance problems"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Analyze a template (or the output of the synth command)")]
    Analyze(AnalyzeArgs),
    #[command(about = "List the rule catalog")]
    Rules(RulesArgs),
    #[command(about = "Search findings recorded by earlier runs")]
    Search(SearchArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[arg(long, short, help = "Template JSON file; when omitted the configured synth command is run")]
    pub template: Option<PathBuf>,
    #[arg(long = "group", help = "Rule group to run (repeatable; default: all)")]
    pub groups: Vec<String>,
    #[arg(long = "mode", help = "AI analysis mode (repeatable; default: all four categories)")]
    pub modes: Vec<String>,
    #[arg(long = "resource", help = "Glob over resource ids or types (repeatable)")]
    pub resources: Vec<String>,
    #[arg(long)]
    pub no_ai: bool,
    #[arg(long)]
    pub no_cache: bool,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(long)]
    pub markdown: bool,
    #[arg(long, help = "Also write the JSON report to this file")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[arg(long = "group")]
    pub groups: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub query: String,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleSummary {
    id: &'static str,
    group: &'static str,
    family: String,
    resource_types: &'static [&'static str],
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = home_dir()?;

    let env_config_path = std::env::var_os("INFRALENS_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Analyze(args) => {
            if args.markdown && cli.json {
                return Err(crate::exit::invalid_args(
                    "--markdown cannot be combined with --json",
                ));
            }
            let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;
            let filter = ResourceFilter::new(&args.resources).map_err(crate::exit::invalid_args_err)?;
            let engine = build_engine(&args, &cfg, &home_dir, show_progress)?;

            let template = load_template(&args, &cfg).map_err(crate::exit::synth_failed_err)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let report = runtime.block_on(engine.analyze(&template, &filter));

            if let Some(path) = &args.output {
                write_report_file(path, &report)?;
            }
            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                write_markdown_summary(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg);
            }

            return Ok(if report.is_clean() {
                ExitCode::Success
            } else {
                ExitCode::IssuesFound
            });
        }
        Commands::Rules(args) => {
            let groups = parse_groups(&args.groups).map_err(crate::exit::invalid_args_err)?;
            let evaluator = RuleEvaluator::new(&groups);
            if cli.json {
                let rules: Vec<RuleSummary> = evaluator
                    .rules()
                    .iter()
                    .map(|r| RuleSummary {
                        id: r.id,
                        group: r.group.as_str(),
                        family: r.group.family().to_string(),
                        resource_types: r.resource_types,
                    })
                    .collect();
                write_json(&rules)?;
            } else {
                crate::ui::print_rules(evaluator.rules(), &ui_cfg);
            }
        }
        Commands::Search(args) => {
            if args.query.trim().is_empty() {
                return Err(crate::exit::invalid_args("search: query must not be empty"));
            }
            let store = JsonFileStore::new(cfg.cache_dir(&home_dir));
            let mut found = store.search(&args.query)?;
            let total = found.len();
            found.truncate(args.limit);
            if cli.json {
                write_json(&found)?;
            } else {
                crate::ui::print_search_results(&args.query, &found, total, &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "infralens", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `infralens config --show`");
            }
        }
    }

    Ok(ExitCode::Success)
}

fn init_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let default = if verbose {
        "infralens=debug"
    } else if quiet {
        "infralens=warn"
    } else {
        "infralens=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .try_init();
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

fn load_template(args: &AnalyzeArgs, cfg: &EffectiveConfig) -> Result<Template> {
    match &args.template {
        Some(path) => crate::synth::load_template_file(path),
        None => crate::synth::synthesize(&SynthOptions {
            command: cfg.synth.command.clone(),
            output: PathBuf::from(&cfg.synth.output),
            timeout: Duration::from_secs(cfg.synth.timeout_secs),
            working_dir: None,
        }),
    }
}

fn build_engine(
    args: &AnalyzeArgs,
    cfg: &EffectiveConfig,
    home_dir: &Path,
    show_progress: bool,
) -> Result<Engine> {
    let rule_groups = if args.groups.is_empty() {
        cfg.rules.groups.clone()
    } else {
        parse_groups(&args.groups).map_err(crate::exit::invalid_args_err)?
    };
    let modes = if args.modes.is_empty() {
        AnalysisModes::new(cfg.ai.modes.iter().copied())
    } else {
        AnalysisModes::new(parse_modes(&args.modes).map_err(crate::exit::invalid_args_err)?)
    };
    let concurrency = args.concurrency.unwrap_or(cfg.ai.max_concurrency);
    if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
        return Err(crate::exit::invalid_args(format!(
            "--concurrency must be between 1 and {MAX_CONCURRENCY} (got {concurrency})"
        )));
    }

    let store = (cfg.cache.persistent && !args.no_cache).then(|| {
        let dir = cfg.cache_dir(home_dir);
        info!(dir = %dir.display(), "using persistent finding store");
        JsonFileStore::new(dir)
    });

    let mut engine = Engine::new(EngineOptions { rule_groups });
    if let Some(store) = &store {
        engine = engine.with_index(Box::new(store.clone()));
    }
    if args.no_ai || !cfg.ai.enabled {
        return Ok(engine.with_note("AI analysis disabled."));
    }

    let api_key = std::env::var(&cfg.ai.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());
    let Some(api_key) = api_key else {
        return Ok(engine.with_note(format!(
            "AI analysis skipped: {} is not set.",
            cfg.ai.api_key_env
        )));
    };

    let backend = GeminiBackend::new(
        &cfg.ai.base_url,
        api_key,
        Duration::from_secs(cfg.ai.request_timeout_secs),
    )?;
    let client = AiClient::new(Arc::new(backend))
        .with_retry(RetryPolicy {
            max_attempts: cfg.ai.max_attempts,
            initial_delay: Duration::from_millis(cfg.ai.initial_backoff_ms),
            max_delay: Duration::from_millis(cfg.ai.max_backoff_ms),
        })
        .with_generation(GenerationConfig {
            temperature: cfg.ai.temperature as f32,
            max_output_tokens: cfg.ai.max_output_tokens,
        });

    let cache = match store {
        Some(store) => FindingCache::with_store(Box::new(store)),
        None => FindingCache::in_memory(),
    };

    let opts = AiOptions {
        model: args.model.clone().or_else(|| cfg.ai.model.clone()),
        fallback_models: cfg.ai.fallback_models.clone(),
        modes,
        max_prompt_chars: cfg.ai.max_prompt_chars,
        max_concurrency: concurrency,
        pricing: Pricing {
            input_per_million: cfg.ai.input_price_per_million,
            output_per_million: cfg.ai.output_price_per_million,
        },
        show_progress,
    };
    Ok(engine.with_ai(AiAnalyzer::new(client, Arc::new(cache), opts)))
}

fn write_report_file(path: &Path, report: &AnalysisReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut buf = serde_json::to_vec_pretty(report)?;
    buf.push(b'\n');
    std::fs::write(path, buf)
        .with_context(|| format!("failed to write report: {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_markdown_summary(report: &AnalysisReport) -> Result<()> {
    use std::io::Write;

    let markdown = format_markdown_summary(report);
    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(markdown.as_bytes()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn format_markdown_summary(report: &AnalysisReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();

    let _ = writeln!(out, "# infralens report");
    let _ = writeln!(out);
    let status = if report.is_clean() { "passed" } else { "failed" };
    let _ = writeln!(out, "- Status: **{status}**");
    let _ = writeln!(out, "- Tool version: {}", report.tool_version);
    let _ = writeln!(out, "- Generated: {}", report.timestamp);
    if let Some(usage) = &report.token_usage {
        let _ = writeln!(
            out,
            "- Tokens: {} in / {} out (≈ ${:.4})",
            usage.input_tokens, usage.output_tokens, usage.estimated_cost
        );
    }
    for note in &report.notes {
        let _ = writeln!(out, "- Note: {note}");
    }

    for (title, lines) in [
        ("Issues", &report.issues),
        ("Optimizations", &report.optimizations),
        ("Recommendations", &report.recommendations),
    ] {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {title} ({})", lines.len());
        let _ = writeln!(out);
        if lines.is_empty() {
            let _ = writeln!(out, "_None._");
        }
        for line in lines {
            let _ = writeln!(out, "- {line}");
        }
    }

    if !report.resources.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Findings by resource");
    }
    for resource in &report.resources {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "### {} (`{}`)",
            resource.resource, resource.resource_type
        );
        let _ = writeln!(out);
        for f in &resource.findings {
            let source = match f.source {
                crate::core::FindingSource::Rule => "rule",
                crate::core::FindingSource::Ai => "ai",
            };
            let _ = writeln!(
                out,
                "- **[{}] {}** ({source}): {}",
                f.severity, f.category, f.issue
            );
            let _ = writeln!(out, "  - Recommendation: {}", f.recommendation);
        }
    }

    out
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
