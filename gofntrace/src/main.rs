//! # gofntrace - Main Entry Point
//!
//! Program flow:
//! 1. parse arguments, validate the binary
//! 2. build the instrumentation plan from the symbol table
//! 3. optionally dump it / stop for `--dry-run` / ask for confirmation
//! 4. load and attach the uprobes, run the session until Ctrl+C
//! 5. detach, flush open goroutines, print a summary

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};

use gofntrace::cli::Args;
use gofntrace::config::TracerConfig;
use gofntrace::correlation::Correlator;
use gofntrace::domain::{PlanError, ProbeError};
use gofntrace::plan::{self, InstrumentationPlan, ProbeKind};
use gofntrace::preflight::{raise_rlimits, run_binary_checks, run_kernel_checks};
use gofntrace::probing::{AyaBackend, LoadConfig, ProbeBackend};
use gofntrace::render::{BootClock, TraceRenderer};
use gofntrace::session::{self, OutputWriter, SessionSummary, OUTPUT_CHANNEL_CAPACITY};
use gofntrace::symbolization::{ElfSymbolResolver, SymbolResolver};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Attaching is one syscall per probe; beyond this we ask first
const CONFIRM_THRESHOLD: usize = 1000;

fn main() {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let usage = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PlanError>(),
            Some(PlanError::InvalidTarget { .. } | PlanError::FetchArg(_))
        )
    });
    if usage {
        return EXIT_USAGE;
    }

    let msg = err.to_string().to_lowercase();
    let attach_denied = err.chain().any(|cause| {
        matches!(cause.downcast_ref::<ProbeError>(), Some(ProbeError::ProbeAttachFailed { error, .. })
            if error.to_lowercase().contains("permission denied"))
    });
    if msg.contains("permission denied") || attach_denied {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

/// Ask before attaching a very large number of probes
fn confirm(probes: usize) -> Result<bool> {
    eprint!(
        "found {probes} uprobes, large number of uprobes (>{CONFIRM_THRESHOLD}) need long time for \
         attaching and detaching, continue? [Y/n] "
    );
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).context("Failed to read answer")?;
    Ok(matches!(answer.trim(), "" | "y" | "Y" | "yes"))
}

fn print_plan_summary(plan: &InstrumentationPlan) {
    println!("{} uprobes, {} functions ({} selected)", plan.len(), plan.function_count(), plan.selected_count());
    for point in plan.points() {
        let kind = match point.kind {
            ProbeKind::Entry => "entry",
            ProbeKind::Return => "return",
            ProbeKind::ThreadExit => "goexit",
        };
        let marker = if point.is_selected { "*" } else { " " };
        println!(
            "{marker} {:<6} 0x{:x} {}+{}",
            kind,
            point.probe_address(),
            point.function_name,
            point.offset_from_entry
        );
        for spec in &point.argument_specs {
            println!("           {} = {} ({})", spec.name, spec.describe_rules(), spec.scalar_type);
        }
    }
}

fn log_summary(summary: &SessionSummary) {
    let stats = summary.stats;
    eprintln!(
        "\n{}: {:.1}s, {} events, {} payloads, {} traces printed ({} filtered), {} corrections, {} argument timeouts, {} dropped",
        summary.reason,
        summary.elapsed.as_secs_f64(),
        stats.events,
        stats.payloads,
        summary.traces_printed,
        summary.traces_filtered,
        stats.corrections,
        stats.timeouts,
        stats.dropped,
    );
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let config = TracerConfig::from_args(&args)?;

    run_binary_checks(&config.binary)?;

    // ── Plan ────────────────────────────────────────────────────────────
    let resolver = ElfSymbolResolver::new(&config.binary)
        .with_context(|| format!("Failed to load symbols from {}", config.binary.display()))?;
    let plan = plan::build(&resolver, &config.plan)?;
    info!(
        "found {} uprobes for {} functions ({} selected)",
        plan.len(),
        plan.function_count(),
        plan.selected_count()
    );

    if let Some(ref path) = config.dump_plan {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        plan.write_json(&mut writer).context("Failed to write plan")?;
        writer.flush()?;
        info!("plan written to {}", path.display());
    }

    if config.dry_run {
        print_plan_summary(&plan);
        return Ok(());
    }

    if plan.len() > CONFIRM_THRESHOLD && !config.assume_yes && !confirm(plan.len())? {
        info!("aborted");
        return Ok(());
    }

    // ── Kernel side ─────────────────────────────────────────────────────
    run_kernel_checks()?;
    raise_rlimits()?;

    let load_config = LoadConfig {
        g_offset: resolver.thread_local_g_offset().context("Failed to locate runtime.g in TLS")?,
        goid_offset: resolver
            .goroutine_id_field_offset()
            .context("Failed to find runtime.g.goid in DWARF (binary built with -ldflags=-w?)")?,
    };
    let clock = BootClock::from_proc_stat().context("Failed to read boot time")?;

    let mut backend = AyaBackend::new(&config.bpf_object);
    backend.load(&plan, &load_config)?;
    let attached = backend.attach(&config.binary, &plan)?;
    eprintln!("tracing {attached} uprobes in {}, Ctrl+C to stop", config.binary.display());

    // ── Session ─────────────────────────────────────────────────────────
    let writer = OutputWriter::spawn(io::stdout(), OUTPUT_CHANNEL_CAPACITY);
    let correlator = Correlator::new(&plan, &resolver, config.correlator);
    let renderer = TraceRenderer::new(&resolver, clock, config.render.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    let result =
        session::run(&mut backend, correlator, &renderer, writer.sender(), shutdown, config.duration).await;
    writer.finish().context("Failed to write traces")?;

    let summary = result?;
    log_summary(&summary);
    Ok(())
}
