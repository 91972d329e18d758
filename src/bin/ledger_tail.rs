//! Debugging tail of the effective view.
//!
//! Reads line-delimited proxy events from stdin and prints the effective
//! view each time it is recomputed.
//!
//! Usage:
//! ```
//! proxy-engine --emit-events | ledger_tail --keyword api --filter 500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use proxyledger_core::api::CoreConfig;
use proxyledger_core::query::EffectiveView;
use proxyledger_core::{CategoricalFilter, JsonLinesSource, TrafficCore};
use tokio::io::BufReader;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Default)]
struct TailArgs {
    config: Option<PathBuf>,
    keyword: Option<String>,
    filter: Option<CategoricalFilter>,
    pin: Option<String>,
    debounce_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = parse_args(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::from_env_overrides(),
    };
    if let Some(ms) = args.debounce_ms {
        config.debounce_ms = ms;
    }

    let core = TrafficCore::new(config.clone());
    if let Some(pin) = &args.pin {
        core.pin_uri(pin);
        core.set_current_pin(Some(pin.as_str()))?;
    }
    core.set_keyword(args.keyword.as_deref());
    if let Some(filter) = args.filter {
        core.set_active_filter(Some(filter));
    }

    let source = JsonLinesSource::new(config.channel.clone(), BufReader::new(tokio::io::stdin()));
    core.attach(&source)
        .await
        .context("Failed to attach to stdin")?;

    let mut views = core.subscribe_view();
    let mut finished = tokio::time::interval(Duration::from_millis(100));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_view(&view);
            }
            _ = finished.tick() => {
                if core.ingestion_finished() {
                    break;
                }
            }
        }
    }

    print_view(&core.refresh_view_now());
    let stats = core.connection_stats();
    eprintln!(
        "{} connections, {} completed, {} anomalies",
        stats.total,
        stats.completed,
        stats.anomalies.total()
    );
    core.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(LevelFilter::INFO)
        .with_writer(std::io::stderr) // stdout carries the view
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_view(view: &EffectiveView) {
    let criteria = &view.criteria;
    println!(
        "#{} {} connections (pin: {}, keyword: {}, filter: {})",
        view.generation,
        view.records.len(),
        criteria.current_pin.as_deref().unwrap_or("-"),
        criteria.keyword.as_deref().unwrap_or("-"),
        criteria
            .filter
            .map(|f| f.label())
            .unwrap_or(CategoricalFilter::All.label()),
    );
    for conn in &view.records {
        let status = conn
            .response
            .as_ref()
            .map(|res| res.status.to_string())
            .unwrap_or_else(|| "...".to_string());
        println!(
            "  {:<8} {:<7} {:>3} {}",
            conn.id, conn.request.method, status, conn.request.uri
        );
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<TailArgs> {
    let mut parsed = TailArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = args.next().map(PathBuf::from),
            "--keyword" => parsed.keyword = args.next(),
            "--pin" => parsed.pin = args.next(),
            "--filter" => {
                let Some(label) = args.next() else {
                    bail!("--filter needs a label");
                };
                parsed.filter = match label.parse::<CategoricalFilter>() {
                    Ok(CategoricalFilter::All) => None,
                    Ok(filter) => Some(filter),
                    Err(err) => bail!(err),
                };
            }
            "--debounce-ms" => {
                let raw = args.next().unwrap_or_default();
                parsed.debounce_ms = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid --debounce-ms value: {raw}"))?,
                );
            }
            "--help" | "-h" => {
                eprintln!("Connection ledger tail");
                eprintln!();
                eprintln!("Usage: ledger_tail [OPTIONS] < events.jsonl");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --config <PATH>       JSON config file (default: env overrides)");
                eprintln!("  --keyword <TEXT>      Case-insensitive uri search");
                eprintln!("  --filter <LABEL>      One of: {}", filter_labels());
                eprintln!("  --pin <URI>           Pin and select a uri prefix");
                eprintln!("  --debounce-ms <MS>    Quiet period before recomputing");
                eprintln!("  --help, -h            Show this help");
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {arg}");
            }
        }
    }

    Ok(parsed)
}

fn filter_labels() -> String {
    CategoricalFilter::all_filters()
        .map(|f| f.label())
        .collect::<Vec<_>>()
        .join(", ")
}
