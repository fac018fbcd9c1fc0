//! Command-line utility that drives demo traffic through the WMI engine on a
//! loopback transport and inspects the resulting diagnostic state.

mod debugfs;
mod scenario;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use debugfs::DebugFs;
use runtime_native::LoopbackHtc;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use transport::Htc;
use wmi::{WmiConfig, WmiSoc, MAX_RADIOS};
use wmi_tlv::WmiTlvCatalog;

/// Text rendering helpers used by the CLI commands.
mod render {
    use std::fmt::Write;
    use wmi::HandleStatsSnapshot;

    /// Format the per-radio counters.
    pub fn stats(radio: usize, pending: u32, credits: i32, stats: &HandleStatsSnapshot) -> String {
        let mut out = String::new();
        writeln!(out, "wmi{radio}: pending={pending} credits={credits}").expect("write header");
        let rows = [
            ("cmds_sent", stats.cmds_sent),
            ("cmds_completed", stats.cmds_completed),
            ("send_failures", stats.send_failures),
            ("rx_rejected", stats.rx_rejected),
            ("rx_unhandled", stats.rx_unhandled),
            ("dispatched_immediate", stats.dispatched_immediate),
            ("dispatched_deferred", stats.dispatched_deferred),
            ("dispatched_default", stats.dispatched_default),
            ("queued", stats.queued),
            ("queue_dropped", stats.queue_dropped),
            ("watchdog_overruns", stats.watchdog_overruns),
        ];
        for (name, value) in rows {
            writeln!(out, "{name:<22}{value}").expect("write row");
        }
        out
    }
}

/// Exercise the WMI engine and read back its debug files.
#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect WMI command/event logs", long_about = None)]
struct Cli {
    /// Number of radios to attach.
    #[arg(long, default_value_t = 1)]
    radios: usize,

    /// Scan/management rounds to run per radio before inspecting.
    #[arg(long, default_value_t = 4)]
    rounds: usize,

    /// Entries per command/event log ring.
    #[arg(long)]
    log_entries: Option<usize>,

    /// Entries per management log ring.
    #[arg(long)]
    mgmt_log_entries: Option<usize>,

    /// Bytes captured per log record (multiple of 4).
    #[arg(long)]
    record_len: Option<usize>,

    /// Entries printed when showing a log.
    #[arg(long)]
    display_size: Option<usize>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every debug file.
    Ls,
    /// Print one debug file, e.g. `wmi0/command_log`.
    Show {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Write a value to a debug file and print it afterwards.
    Write {
        #[arg(value_name = "PATH")]
        path: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },
    /// Print per-radio counters and the scenario summary.
    Stats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Ndjson,
}

impl Cli {
    fn config(&self) -> WmiConfig {
        let mut config = wmi_tlv::default_config();
        if let Some(entries) = self.log_entries {
            config.log.max_entries = entries;
        }
        if let Some(entries) = self.mgmt_log_entries {
            config.log.mgmt_max_entries = entries;
        }
        if let Some(len) = self.record_len {
            config.log.record_len = len;
        }
        if let Some(size) = self.display_size {
            config.log.display_size = size;
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if cli.radios == 0 || cli.radios > MAX_RADIOS {
        bail!("--radios must be between 1 and {MAX_RADIOS}");
    }

    let htc = LoopbackHtc::new().context("failed to start loopback transport")?;
    scenario::install_responder(&htc);
    let transport: Arc<dyn Htc> = htc.clone();
    let soc = WmiSoc::builder(transport, Arc::new(WmiTlvCatalog::new()))
        .config(cli.config())
        .radios(cli.radios)
        .attach()
        .context("failed to attach WMI")?;

    let result = scenario::run(&soc, &htc, cli.rounds).and_then(|summary| {
        let fs = DebugFs::new(&soc).context("failed to open debug files")?;
        execute(&cli, &soc, &fs, &summary)
    });
    soc.detach();
    htc.shutdown();
    result
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(
    cli: &Cli,
    soc: &WmiSoc<WmiTlvCatalog>,
    fs: &DebugFs<'_, WmiTlvCatalog>,
    summary: &scenario::Summary,
) -> Result<()> {
    match &cli.command {
        Command::Ls => {
            for path in fs.paths() {
                println!("{path}");
            }
        }
        Command::Show { path } => print!("{}", show(cli.format, fs, path)?),
        Command::Write { path, value } => {
            fs.write(path, value)
                .with_context(|| format!("failed to write {path}"))?;
            print!("{}", show(cli.format, fs, path)?);
        }
        Command::Stats => {
            for radio in 0..soc.radio_count() {
                let handle = soc.handle(radio)?;
                let stats = handle.stats();
                match cli.format {
                    Format::Text => print!(
                        "{}",
                        render::stats(radio, handle.pending_cmds(), handle.host_credits(), &stats)
                    ),
                    Format::Ndjson => println!(
                        "{}",
                        serde_json::to_string(&serde_json::json!({ "radio": radio, "stats": stats }))?
                    ),
                }
            }
            match cli.format {
                Format::Text => println!("{summary:?}"),
                Format::Ndjson => println!("{}", serde_json::to_string(summary)?),
            }
        }
    }
    Ok(())
}

fn show(format: Format, fs: &DebugFs<'_, WmiTlvCatalog>, path: &str) -> Result<String> {
    let out = match format {
        Format::Text => fs.show(path),
        Format::Ndjson => fs.show_ndjson(path),
    };
    out.with_context(|| format!("failed to read {path}"))
}
