//! Waypoint CLI
//!
//! CLI tool for compiling redirect rules and exercising the runtime.

mod simulate;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use wp_compiler::{compile, parse_rules_json};
use wp_core::types::RawRule;
use wp_core::url::host_pattern;
use wp_core::validate::validate_rule;

use crate::simulate::{MetricsOptions, SimulateOptions};

#[derive(Parser)]
#[command(name = "wp-cli")]
#[command(about = "Waypoint redirect rule compiler and tools")]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule list into matching engine directives
    Compile {
        /// Input rule list (JSON array)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directive file
        #[arg(short, long, default_value = "directives.json")]
        output: PathBuf,

        /// Also write the reverse-lookup map here
        #[arg(short, long)]
        map: Option<PathBuf>,
    },

    /// Validate a single hostname / target pair
    Validate {
        #[arg(long)]
        hostname: String,

        #[arg(long)]
        target: String,
    },

    /// Sync rules into an in-memory engine and replay navigations
    Simulate {
        /// Rule list to store before starting (JSON array)
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// URLs to navigate to
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// Resource type of each navigation
        #[arg(long, default_value = "main_frame")]
        resource_type: String,

        /// Directory holding persistent stores (sync.json, local.json)
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Runtime config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print persisted redirect metrics
    Metrics {
        /// Directory holding persistent stores
        #[arg(short, long)]
        state: PathBuf,

        /// Runtime config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Commands::Compile { input, output, map } => cmd_compile(&input, &output, map.as_deref()),
        Commands::Validate { hostname, target } => cmd_validate(&hostname, &target),
        Commands::Simulate {
            rules,
            urls,
            resource_type,
            state,
            config,
        } => simulate::run_simulate(SimulateOptions {
            rules_path: rules,
            urls,
            resource_type,
            state_dir: state,
            config_path: config,
        }),
        Commands::Metrics { state, config } => simulate::run_metrics(MetricsOptions {
            state_dir: state,
            config_path: config,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(input: &Path, output: &Path, map: Option<&Path>) -> Result<(), String> {
    let start = Instant::now();

    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let rules = parse_rules_json(&text)
        .map_err(|e| format!("Failed to parse '{}': {}", input.display(), e))?;

    let out = compile(&rules);

    let directives = serde_json::to_string_pretty(&out.directives)
        .map_err(|e| format!("Failed to encode directives: {}", e))?;
    fs::write(output, directives)
        .map_err(|e| format!("Failed to write '{}': {}", output.display(), e))?;

    if let Some(map_path) = map {
        let encoded = serde_json::to_string_pretty(&out.reverse_map)
            .map_err(|e| format!("Failed to encode reverse map: {}", e))?;
        fs::write(map_path, encoded)
            .map_err(|e| format!("Failed to write '{}': {}", map_path.display(), e))?;
    }

    for skipped in &out.skipped {
        println!(
            "  skipped #{} ({}): {}",
            skipped.index,
            skipped.rule_id.as_deref().unwrap_or("<no id>"),
            skipped.error
        );
    }

    println!("Compiled '{}' to '{}'", input.display(), output.display());
    println!("  Rules:      {}", out.stats.total);
    println!("  Directives: {}", out.stats.compiled);
    println!("  Disabled:   {}", out.stats.disabled);
    println!("  Invalid:    {}", out.stats.invalid);
    println!("  Probed ids: {}", out.stats.probed);
    println!("  Time:       {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_validate(hostname: &str, target: &str) -> Result<(), String> {
    let raw = RawRule {
        id: Some("cli".to_string()),
        enabled: serde_json::Value::Bool(true),
        source_hostname: Some(hostname.to_string()),
        target_url: Some(target.to_string()),
    };
    let rule = validate_rule(&raw).map_err(|e| format!("{:?}: {}", e.kind(), e))?;

    println!("Rule is valid");
    println!("  Hostname: {}", rule.source_hostname);
    println!("  Target:   {}", rule.target_url);
    println!("  Pattern:  {}", host_pattern(&rule.source_hostname));

    Ok(())
}
