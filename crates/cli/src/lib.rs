use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipgrid_core::{
    AnnotationPatch, EngineConfig, EventDisposition, FilterCriteria, GridEngine, IngestReport,
    ItemId, ItemRecord, LoadPriority, ResourceEvent, ResourceState, SlotOp, SortMode,
    UnloadReason, ViewportState,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "clipgrid")]
#[command(about = "Virtualized video grid engine")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the visible, load and keep-alive ranges for a viewport.
    Ranges {
        #[arg(long)]
        count: usize,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        offset: f64,
        #[arg(long, default_value_t = 720.0)]
        extent: f64,
        #[arg(long, default_value_t = 4)]
        columns: usize,
        #[arg(long, default_value_t = 240.0)]
        row_height: f64,
        #[arg(long, default_value_t = 3)]
        load_buffer: usize,
        #[arg(long, default_value_t = 25)]
        unload_buffer: usize,
    },
    /// Replay a script of grid interactions and print the engine output per step.
    Simulate {
        #[arg(long, value_name = "FILE")]
        items: PathBuf,
        #[arg(long, value_name = "FILE")]
        script: PathBuf,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print the id derived from a file's path, size and modification time.
    Id {
        #[arg(long)]
        path: String,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        mtime: u64,
    },
    /// Print CLI version.
    Version,
}

/// One scripted interaction
#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    SetFilter {
        #[serde(default)]
        criteria: FilterCriteria,
    },
    SetSort {
        mode: SortMode,
    },
    Scroll {
        offset: f64,
    },
    Resize {
        extent: f64,
        columns: usize,
    },
    Event {
        id: ItemId,
        event: ResourceEvent,
    },
    Retry {
        id: ItemId,
    },
    Patch {
        id: ItemId,
        patch: AnnotationPatch,
    },
    AdvanceMs {
        ms: u64,
    },
    Reset,
}

impl Step {
    fn kind(&self) -> &'static str {
        match self {
            Step::SetFilter { .. } => "set_filter",
            Step::SetSort { .. } => "set_sort",
            Step::Scroll { .. } => "scroll",
            Step::Resize { .. } => "resize",
            Step::Event { .. } => "event",
            Step::Retry { .. } => "retry",
            Step::Patch { .. } => "patch",
            Step::AdvanceMs { .. } => "advance_ms",
            Step::Reset => "reset",
        }
    }
}

#[derive(Debug, Serialize)]
struct StepOutput {
    step: usize,
    kind: &'static str,
    elapsed_ms: u64,
    ops: Vec<SlotOp>,
    loads: Vec<LoadOutput>,
    unloads: Vec<UnloadOutput>,
    live: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingest: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disposition: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ResourceState>,
}

#[derive(Debug, Serialize)]
struct LoadOutput {
    id: ItemId,
    priority: LoadPriority,
    attempt: u32,
}

#[derive(Debug, Serialize)]
struct UnloadOutput {
    id: ItemId,
    reason: UnloadReason,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing();

    match cli.command {
        Commands::Ranges { count, offset, extent, columns, row_height, load_buffer, unload_buffer } => {
            let viewport = ViewportState::new(extent, columns, row_height)
                .with_scroll_offset(offset)
                .with_buffers(load_buffer, unload_buffer);
            run_ranges(&viewport, count)
        }
        Commands::Simulate { items, script, config } => {
            run_simulate(&items, &script, config.as_deref())
        }
        Commands::Id { path, size, mtime } => {
            println!("{}", ItemId::derive(&path, size, mtime));
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Diagnostics go to stderr so stdout stays machine-readable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run_ranges(viewport: &ViewportState, count: usize) -> Result<()> {
    let ranges = viewport.compute_ranges(count).context("invalid viewport geometry")?;
    let json = serde_json::to_string_pretty(&ranges)?;
    println!("{json}");
    Ok(())
}

fn run_simulate(items: &Path, script: &Path, config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .merge_env()
    .context("invalid CLIPGRID_* environment override")?;

    let records = load_items(items)?;
    let steps = load_script(script)?;

    let mut engine = GridEngine::new(config).context("failed to create grid engine")?;
    let origin = Instant::now();
    let mut elapsed = Duration::ZERO;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let report = engine.set_items_at(records, origin).context("failed to ingest items")?;
    let mut first = collect(&mut engine, 0, "set_items", elapsed);
    first.ingest = Some(report);
    writeln!(out, "{}", serde_json::to_string(&first)?)?;

    for (index, step) in steps.into_iter().enumerate() {
        let number = index + 1;
        let kind = step.kind();
        let mut disposition = None;
        let mut state = None;

        let now = origin + elapsed;
        match step {
            Step::SetFilter { criteria } => engine.set_filter_at(criteria, now)?,
            Step::SetSort { mode } => engine.set_sort_at(mode, now)?,
            Step::Scroll { offset } => {
                engine.on_scroll_at(offset, now)?;
            }
            Step::Resize { extent, columns } => engine.on_resize_at(extent, columns, now)?,
            Step::Event { id, event } => {
                let outcome = engine.report_resource_event_at(&id, event, now);
                disposition = Some(disposition_name(&outcome));
                state = Some(engine.state_of(&id));
            }
            Step::Retry { id } => {
                engine.retry_at(&id, now)?;
                state = Some(engine.state_of(&id));
            }
            Step::Patch { id, patch } => {
                engine.patch_annotations_at(&id, &patch, now)?;
            }
            Step::AdvanceMs { ms } => {
                elapsed += Duration::from_millis(ms);
                engine.tick(origin + elapsed)?;
            }
            Step::Reset => engine.reset(),
        }

        let mut output = collect(&mut engine, number, kind, elapsed);
        output.disposition = disposition;
        output.state = state;
        writeln!(out, "{}", serde_json::to_string(&output)?)
            .with_context(|| format!("failed to write output for step {number}"))?;
    }

    tracing::info!(stats = ?engine.stats(), "simulation finished");
    Ok(())
}

fn collect(engine: &mut GridEngine, step: usize, kind: &'static str, elapsed: Duration) -> StepOutput {
    let loads = engine
        .load_intents()
        .into_iter()
        .map(|intent| LoadOutput {
            id: intent.id,
            priority: intent.priority,
            attempt: intent.attempt,
        })
        .collect();
    let unloads = engine
        .unload_intents()
        .into_iter()
        .map(|intent| UnloadOutput { id: intent.id, reason: intent.reason })
        .collect();

    StepOutput {
        step,
        kind,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        ops: engine.operations(),
        loads,
        unloads,
        live: engine.stats().lifecycle.live,
        ingest: None,
        disposition: None,
        state: None,
    }
}

fn disposition_name(disposition: &EventDisposition) -> &'static str {
    match disposition {
        EventDisposition::Applied(_) => "applied",
        EventDisposition::RetryScheduled { .. } => "retry_scheduled",
        EventDisposition::Exhausted { .. } => "exhausted",
        EventDisposition::Ignored => "ignored",
    }
}

/// Records without an id get one derived from path, size and mtime.
/// A record without a path falls back to its name.
fn load_items(path: &Path) -> Result<Vec<ItemRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read items from {}", path.display()))?;
    let mut records: Vec<ItemRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse items in {}", path.display()))?;

    for record in &mut records {
        if record.id.is_empty() {
            let key = if record.path.is_empty() { &record.name } else { &record.path };
            record.id = ItemId::derive(key, record.size, record.mtime);
        }
    }
    Ok(records)
}

fn load_script(path: &Path) -> Result<Vec<Step>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read script from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse script in {}", path.display()))
}
