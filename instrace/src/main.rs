use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use instrace::output::Output;
use instrace::report::pretty_print;
use instrace::trace_entry::replay_with;
use instrace::{InsTracer, Report, Result, TraceConfig, TraceEvent, TraceListener};
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use std::fs::{read_to_string, write, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(version, about = "Aggregate instruction traces into control-flow and register reports")]
struct Args {
    /// Log debug output
    #[clap(short, long)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded event log (one JSON event per line) and write its report
    Replay {
        /// Event log to replay
        #[clap()]
        events: PathBuf,
        /// Report destination, `-` for stdout
        #[clap(short, long, default_value = "itrace.out")]
        output: String,
        /// Indent the report
        #[clap(short, long)]
        pretty: bool,
    },
    /// Pretty-print a report with sorted keys
    Show {
        /// Report to print
        #[clap()]
        report: PathBuf,
        /// Save output additionally to file
        #[clap(short, long)]
        save: Option<PathBuf>,
        /// Don't print to stdout
        #[clap(short, long)]
        quiet: bool,
    },
    /// Check a report for internal inconsistencies
    Check {
        /// Report to check
        #[clap()]
        report: PathBuf,
    },
}

fn replay(events_path: PathBuf, output: String, pretty: bool) -> Result<()> {
    let tracer = InsTracer::new(TraceConfig::new(Output::parse(&output)).pretty(pretty))?;
    let reader = BufReader::new(File::open(&events_path)?);

    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {pos} events {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut ended = false;
    let delivered = replay_with(reader, &tracer, |event| {
        ended |= *event == TraceEvent::TraceEnd;
        bar.inc(1);
    })?;
    bar.finish_with_message("done");

    if !ended {
        warn!("Event log ends without trace_end, writing a truncated report");
        tracer.on_trace_end()?;
    }
    info!("Replayed {} events from {:?}", delivered, events_path);
    Ok(())
}

fn show(report: PathBuf, save: Option<PathBuf>, quiet: bool) -> Result<()> {
    let pretty = pretty_print(&read_to_string(report)?)?;
    if !quiet {
        println!("{}", pretty);
    }
    if let Some(path) = save {
        write(path, pretty)?;
    }
    Ok(())
}

fn check(path: PathBuf) -> Result<bool> {
    let report = Report::from_reader(BufReader::new(File::open(&path)?))?;
    let findings = report.check_integrity();
    for finding in &findings {
        error!("{}", finding);
    }
    info!(
        "{:?}: {} instructions, {} edges, {} findings",
        path,
        report.instructions.len(),
        report.edges.len(),
        findings.len()
    );
    Ok(findings.is_empty())
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).env().init() {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let result = match args.command {
        Command::Replay {
            events,
            output,
            pretty,
        } => replay(events, output, pretty).map(|_| true),
        Command::Show {
            report,
            save,
            quiet,
        } => show(report, save, quiet).map(|_| true),
        Command::Check { report } => check(report),
    };

    match result {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            match e.offending_address() {
                Some(address) => error!("Trace failed at 0x{:x}: {}", address, e),
                None => error!("{}", e),
            }
            exit(1);
        }
    }
}
