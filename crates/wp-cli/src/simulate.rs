use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use wp_core::types::{Metrics, ResourceTypes, ReverseMap};
use wp_runtime::store::read_or_default;
use wp_runtime::{
    JsonFileStore, KeyValueStore, MemoryEngine, MemoryStore, RuntimeConfig, Waypoint,
};

const RULES_AREA: &str = "sync";
const STATE_AREA: &str = "local";

pub struct SimulateOptions {
    pub rules_path: Option<PathBuf>,
    pub urls: Vec<String>,
    pub resource_type: String,
    pub state_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

pub struct MetricsOptions {
    pub state_dir: PathBuf,
    pub config_path: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::from_file(path).map_err(|e| e.to_string()),
        None => Ok(RuntimeConfig::default()),
    }
}

fn open_stores(
    state_dir: Option<&Path>,
    config: &RuntimeConfig,
) -> Result<(Arc<dyn KeyValueStore>, Arc<dyn KeyValueStore>), String> {
    let stores: (Arc<dyn KeyValueStore>, Arc<dyn KeyValueStore>) = match state_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create '{}': {}", dir.display(), e))?;
            (
                Arc::new(JsonFileStore::new(RULES_AREA, dir.join("sync.json"))),
                Arc::new(JsonFileStore::new(STATE_AREA, dir.join("local.json"))),
            )
        }
        None => (
            Arc::new(MemoryStore::new(RULES_AREA).with_latency(config.store_latency())),
            Arc::new(MemoryStore::new(STATE_AREA).with_latency(config.store_latency())),
        ),
    };
    Ok(stores)
}

pub fn run_simulate(opts: SimulateOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_simulate_async(opts))
}

async fn run_simulate_async(opts: SimulateOptions) -> Result<(), String> {
    let mut config = load_config(opts.config_path.as_deref())?;
    // Change notifications come from the rules store opened below.
    config.keys.rules_area = RULES_AREA.to_string();

    let (rules_store, state_store) = open_stores(opts.state_dir.as_deref(), &config)?;

    if let Some(path) = &opts.rules_path {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| format!("Failed to parse '{}': {}", path.display(), e))?;
        rules_store
            .set(&config.keys.rules, value)
            .await
            .map_err(|e| format!("Failed to store rules: {}", e))?;
    }

    let engine = Arc::new(MemoryEngine::new());
    let waypoint = Waypoint::start(&config, rules_store, state_store.clone(), engine.clone()).await;
    println!("Installed {} directive(s)", engine.len());

    let before = waypoint
        .metrics()
        .snapshot()
        .await
        .map_err(|e| e.to_string())?
        .total_redirects;

    let resource_type = ResourceTypes::from_name(&opts.resource_type);
    let mut redirected = 0u64;
    for url in &opts.urls {
        match engine.navigate(url, resource_type) {
            Some(target) => {
                redirected += 1;
                println!("  {} -> {}", url, target);
            }
            None => println!("  {} (no redirect)", url),
        }
    }

    let metrics = wait_for_total(&waypoint, before + redirected).await?;
    waypoint.shutdown().await;

    let map: ReverseMap = read_or_default(&*state_store, &config.keys.reverse_map)
        .await
        .map_err(|e| e.to_string())?;
    print_metrics(&metrics, &map);
    Ok(())
}

/// Match events reach the attributor through a background pump; poll until
/// they have all been applied.
async fn wait_for_total(waypoint: &Waypoint, expected: u64) -> Result<Metrics, String> {
    let mut metrics = Metrics::default();
    for _ in 0..200 {
        metrics = waypoint.metrics().snapshot().await.map_err(|e| e.to_string())?;
        if metrics.total_redirects >= expected {
            return Ok(metrics);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    log::warn!(
        "only {} of {} redirects were recorded",
        metrics.total_redirects,
        expected
    );
    Ok(metrics)
}

pub fn run_metrics(opts: MetricsOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(async {
        let config = load_config(opts.config_path.as_deref())?;
        let store = JsonFileStore::new(STATE_AREA, opts.state_dir.join("local.json"));
        let metrics: Metrics = read_or_default(&store, &config.keys.metrics)
            .await
            .map_err(|e| e.to_string())?;
        let map: ReverseMap = read_or_default(&store, &config.keys.reverse_map)
            .await
            .map_err(|e| e.to_string())?;
        print_metrics(&metrics, &map);
        Ok::<(), String>(())
    })
}

fn print_metrics(metrics: &Metrics, map: &ReverseMap) {
    println!("Metrics:");
    println!("  Total redirects: {}", metrics.total_redirects);
    for (rule_id, count) in &metrics.per_rule {
        let installed = map.iter().any(|(_, id)| id == rule_id.as_str());
        let note = if installed { "" } else { " (not installed)" };
        println!("  {:<36} {}{}", rule_id, count, note);
    }
}
