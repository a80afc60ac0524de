use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sigscan::config::{Config, CONFIG_FILE_NAME};
use sigscan::error::EngineError;
use sigscan::output::OutputFormat;
use sigscan::rules::MetaValue;
use sigscan::ScanOptions;

#[derive(Parser)]
#[command(
    name = "sigscan",
    about = "Signature rule scanner for extracted firmware and binary content",
    version,
    author
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan files, directories or stdin against a rule set
    Scan {
        /// Rule file or directory of .yar/.yara files (repeatable)
        #[arg(long = "rules", short = 'r', required = true)]
        rules: Vec<PathBuf>,

        /// Targets to scan; `-` reads stdin
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format (console, json, sarif)
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        /// Per-target time budget in milliseconds
        #[arg(long, env = "SIGSCAN_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Per-target step budget
        #[arg(long)]
        max_steps: Option<u64>,

        /// Worker threads for the batch
        #[arg(long, short = 'j')]
        threads: Option<usize>,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Load and compile a rule set without scanning
    Check {
        #[arg(long = "rules", short = 'r', required = true)]
        rules: Vec<PathBuf>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// List the rules of a rule set
    ListRules {
        #[arg(long = "rules", short = 'r', required = true)]
        rules: Vec<PathBuf>,

        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .sigscan.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Scan {
            rules,
            paths,
            config,
            format,
            timeout_ms,
            max_steps,
            threads,
            output,
        } => cmd_scan(ScanArgs {
            rules,
            paths,
            config,
            format,
            timeout_ms,
            max_steps,
            threads,
            output,
        }),
        Commands::Check { rules, config } => cmd_check(rules, config),
        Commands::ListRules { rules, format } => cmd_list_rules(rules, format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sigscan=debug" } else { "sigscan=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct ScanArgs {
    rules: Vec<PathBuf>,
    paths: Vec<PathBuf>,
    config: Option<PathBuf>,
    format: String,
    timeout_ms: Option<u64>,
    max_steps: Option<u64>,
    threads: Option<usize>,
    output: Option<PathBuf>,
}

fn cmd_scan(args: ScanArgs) -> Result<i32, EngineError> {
    let format = OutputFormat::from_str_lenient(&args.format).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", args.format);
        OutputFormat::Console
    });

    if args.threads == Some(0) {
        return Err(EngineError::Config("--threads must be positive".into()));
    }

    let options = ScanOptions {
        rule_paths: args.rules,
        targets: args.paths,
        config_path: args.config,
        format,
        timeout_override: args.timeout_ms.map(Duration::from_millis),
        max_steps_override: args.max_steps,
        threads_override: args.threads,
    };

    let report = sigscan::run(&options)?;
    let rendered = sigscan::render_report(&report, format)?;

    match args.output {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 0 = nothing matched, 1 = verdicts, 2 = a target failed
    Ok(report.verdict.exit_code())
}

fn load_engine_config(config: Option<PathBuf>) -> Result<Config, EngineError> {
    let path = config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    Config::load(&path)
}

fn cmd_check(rules: Vec<PathBuf>, config: Option<PathBuf>) -> Result<i32, EngineError> {
    let config = load_engine_config(config)?;
    let registry = sigscan::load_rule_paths(&rules, config.engine)?;
    let compiled = registry.compiled();
    println!(
        "OK: {} rule(s), {} pattern(s), {} literal variant(s) in {} KiB, {} regex pattern(s)",
        registry.rule_count(),
        compiled.pattern_count(),
        compiled.automaton().output_count(),
        compiled.automaton().heap_bytes().div_ceil(1024),
        compiled.regexes().len(),
    );
    Ok(0)
}

fn cmd_list_rules(rules: Vec<PathBuf>, format_str: String) -> Result<i32, EngineError> {
    let config = load_engine_config(None)?;
    let registry = sigscan::load_rule_paths(&rules, config.engine)?;

    match format_str.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(registry.rules())?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<32} {:<24} {:<9} {:<40} DESCRIPTION",
                "RULE", "TAGS", "PATTERNS", "SOURCE"
            );
            println!("{}", "-".repeat(120));
            for rule in registry.rules() {
                let tags = if rule.tags.is_empty() {
                    "-".to_string()
                } else {
                    rule.tags.join(",")
                };
                let description = match rule.meta("description") {
                    Some(MetaValue::String(s)) => s.as_str(),
                    _ => "-",
                };
                println!(
                    "{:<32} {:<24} {:<9} {:<40} {}",
                    rule.name,
                    tags,
                    rule.patterns.len(),
                    rule.location.to_string(),
                    description,
                );
            }
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32, EngineError> {
    let path = PathBuf::from(CONFIG_FILE_NAME);

    if path.exists() && !force {
        eprintln!("{} already exists. Use --force to overwrite.", CONFIG_FILE_NAME);
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created {}", CONFIG_FILE_NAME);

    Ok(0)
}
