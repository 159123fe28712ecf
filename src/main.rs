//! CLI entry point for `mailstash`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailstash::backup::{
    latest_snapshot, list_snapshots, snapshot_dir_name, verify_backup, walk_backup_dir,
    BackupIndex, RestorePlan, RestoreState,
};
use mailstash::cancel::CancelToken;
use mailstash::config::Config;
use mailstash::export::{ExportOptions, Exporter, PlaintextDecryptor, ProgressReporter};
use mailstash::filter::{parse_filter_query, FilterSpec};
use mailstash::model::record::WriterOutcome;
use mailstash::source::DumpStore;

#[derive(Parser)]
#[command(
    name = "mailstash",
    version,
    about = "Incremental, resumable mailbox export",
    long_about = "Export a mailbox into a directory of .eml files with JSON sidecars.\n\
                  Re-running an export only writes messages that are not there yet."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Export messages from a mailbox dump into a backup directory
    Export(ExportArgs),
    /// Show what a restore from a backup root would bring back
    Scan {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Check exported messages against their recorded checksums
    Verify {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List snapshot directories under a backup root
    Snapshots { path: PathBuf },
    /// Explain how a filter is split between server and client
    Filter {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file location
        #[arg(long)]
        write: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(Args)]
struct ExportArgs {
    /// JSON mailbox dump to read messages from
    #[arg(long, value_name = "FILE")]
    dump: PathBuf,

    /// Backup root (defaults to `export.default_output_dir`)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Write into a new mail_YYYYMMDD_HHMMSS snapshot under the root
    #[arg(long)]
    snapshot: bool,

    /// Messages per metadata page
    #[arg(long)]
    page_size: Option<usize>,

    /// Messages per fetch batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Default)]
struct FilterArgs {
    /// Label ids (repeatable or comma-separated)
    #[arg(long = "label", value_name = "ID", value_delimiter = ',')]
    labels: Vec<String>,

    /// Sender patterns: user@domain.tld or @domain.tld
    #[arg(long = "from", value_name = "PATTERN", value_delimiter = ',')]
    senders: Vec<String>,

    /// Recipient patterns, matched against To, CC and BCC
    #[arg(long = "to", value_name = "PATTERN", value_delimiter = ',')]
    recipients: Vec<String>,

    /// Domains matched against sender and recipients
    #[arg(long = "domain", value_name = "DOMAIN", value_delimiter = ',')]
    domains: Vec<String>,

    /// Inclusive lower date bound
    #[arg(long, value_name = "DATE")]
    after: Option<String>,

    /// Exclusive upper date bound
    #[arg(long, value_name = "DATE")]
    before: Option<String>,

    /// Subject substring
    #[arg(long)]
    subject: Option<String>,

    /// Search-style query, e.g. 'label:0 from:@example.com after:2024-01-01'
    #[arg(short, long)]
    query: Option<String>,
}

impl FilterArgs {
    fn to_spec(&self) -> anyhow::Result<FilterSpec> {
        let mut spec = FilterSpec::from_lists(
            &self.labels.join(","),
            &self.senders.join(","),
            &self.recipients.join(","),
            &self.domains.join(","),
            self.after.as_deref().unwrap_or(""),
            self.before.as_deref().unwrap_or(""),
            self.subject.as_deref().unwrap_or(""),
        )?;
        if let Some(query) = &self.query {
            spec.merge(parse_filter_query(query)?);
            spec.validate()?;
        }
        Ok(spec)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = mailstash::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Export(args) => cmd_export(args, &config),
        Commands::Scan { path, json } => cmd_scan(&path, json),
        Commands::Verify { path, json } => cmd_verify(&path, json),
        Commands::Snapshots { path } => cmd_snapshots(&path),
        Commands::Filter { filter, json } => cmd_filter(&filter, json),
        Commands::Config { write } => cmd_config(&config, write),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = mailstash::config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let log_name = log_path.file_name().unwrap_or_default().to_os_string();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailstash", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Spinner that shows running export counts.
struct SpinnerProgress {
    pb: ProgressBar,
    skipped: AtomicUsize,
    exported: AtomicUsize,
}

impl SpinnerProgress {
    fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} Exporting {msg} [{elapsed}]")
                .expect("valid template"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Self {
            pb,
            skipped: AtomicUsize::new(0),
            exported: AtomicUsize::new(0),
        }
    }

    fn refresh(&self) {
        self.pb.set_message(format!(
            "{} written, {} skipped",
            self.exported.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed)
        ));
    }
}

impl ProgressReporter for SpinnerProgress {
    fn on_progress(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
        self.refresh();
    }

    fn on_exported(&self, _outcome: WriterOutcome) {
        self.exported.fetch_add(1, Ordering::Relaxed);
        self.refresh();
    }
}

/// Run an export from a mailbox dump.
fn cmd_export(args: ExportArgs, config: &Config) -> anyhow::Result<()> {
    let spec = args.filter.to_spec()?;
    let root = args
        .output
        .or_else(|| config.export.default_output_dir.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No output directory: pass --output or set export.default_output_dir")
        })?;
    if !args.dump.exists() {
        anyhow::bail!("Mailbox dump not found: {}", args.dump.display());
    }

    let mut options = ExportOptions::from(&config.export);
    if let Some(n) = args.page_size {
        options.page_size = n;
    }
    if let Some(n) = args.batch_size {
        options.batch_size = n;
    }
    let snapshot = args.snapshot || config.export.snapshot_per_run;

    let store = DumpStore::load(&args.dump)?;
    let exporter = Exporter::new(Arc::new(store), Arc::new(PlaintextDecryptor), options);
    let progress = Arc::new(SpinnerProgress::new());
    let start = Instant::now();

    let runtime = tokio::runtime::Runtime::new()?;
    let (result, target) = runtime.block_on(async {
        let cancel = CancelToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, stopping export");
                    cancel.cancel();
                }
            });
        }

        if snapshot {
            // Dedup against the root and every earlier snapshot
            let index = {
                let root = root.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || BackupIndex::build_tree(&root, &cancel))
                    .await??
            };
            let target = root.join(snapshot_dir_name(chrono::Utc::now()));
            let result = exporter
                .run_with_oracle(&spec, &target, Arc::new(index), progress.clone(), cancel)
                .await;
            anyhow::Ok((result, target))
        } else {
            let result = exporter.run(&spec, &root, progress.clone(), cancel).await;
            anyhow::Ok((result, root.clone()))
        }
    })?;
    progress.pb.finish_and_clear();
    let summary = result?;

    if args.json {
        let output = serde_json::json!({
            "output": target.to_string_lossy(),
            "summary": summary,
            "elapsed_ms": start.elapsed().as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};
    println!();
    println!("  Export complete:");
    println!("  {:<25} {}", "Output directory", target.display());
    println!("  {:<25} {}", "Written", summary.exported());
    println!("  {:<25} {}", "  complete", summary.complete);
    println!("  {:<25} {}", "  failed to assemble", summary.failed_to_assemble);
    println!("  {:<25} {}", "  missing key", summary.missing_key);
    println!("  {:<25} {}", "Skipped", summary.skipped);
    if summary.check_errors > 0 {
        println!("  {:<25} {}", "Check errors", summary.check_errors);
    }
    println!(
        "  {:<25} {}",
        "Bytes written",
        format_size(summary.bytes_written, BINARY)
    );
    println!("  {:<25} {:.2?}", "Elapsed", start.elapsed());
    println!();

    Ok(())
}

/// Print the restore plan for a backup root.
fn cmd_scan(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.is_dir() {
        anyhow::bail!("Backup directory not found: {}", path.display());
    }
    let plan = RestorePlan::build(path, &CancelToken::new())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!();
    println!("  {:<20} {}", "Backup root", path.display());
    println!("  {:<20} {}", "Messages", plan.items.len());
    println!("  {:<20} {}", "Complete", plan.count(RestoreState::Complete));
    println!("  {:<20} {}", "Partial", plan.count(RestoreState::Partial));
    println!("  {:<20} {}", "Missing content", plan.count(RestoreState::Missing));
    println!("  {:<20} {}", "Restorable", plan.restorable().count());
    if !plan.unreadable.is_empty() {
        println!("  {:<20} {}", "Unreadable", plan.unreadable.len());
    }

    let partial: Vec<_> = plan
        .items
        .iter()
        .filter(|i| i.state != RestoreState::Complete)
        .collect();
    if !partial.is_empty() {
        println!();
        println!("  {:<24} {:<24} {}", "Id", "Outcome", "Subject");
        println!("  {}", "-".repeat(78));
        for item in partial {
            let id: String = item.record.message.id.chars().take(23).collect();
            let subject: String = item.record.message.subject.chars().take(30).collect();
            println!(
                "  {:<24} {:<24} {}",
                id,
                item.record.outcome.to_string(),
                subject
            );
        }
    }
    println!();
    Ok(())
}

/// Verify content checksums in one backup directory.
fn cmd_verify(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.is_dir() {
        anyhow::bail!("Backup directory not found: {}", path.display());
    }
    let report = verify_backup(path, &CancelToken::new())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("  {:<20} {}", "Checked", report.checked);
        println!("  {:<20} {}", "OK", report.ok);
        println!("  {:<20} {}", "Partial", report.partial);
        if report.external > 0 {
            println!("  {:<20} {}", "Rendered elsewhere", report.external);
        }
        for id in &report.mismatched {
            println!("  {:<20} {}", "Checksum mismatch", id);
        }
        for id in &report.missing_content {
            println!("  {:<20} {}", "Missing content", id);
        }
        for p in &report.unreadable {
            println!("  {:<20} {}", "Unreadable", p.display());
        }
        println!();
    }

    if !report.is_clean() {
        anyhow::bail!("Backup at {} has damaged or missing entries", path.display());
    }
    Ok(())
}

/// List snapshots with their message counts.
fn cmd_snapshots(path: &Path) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let snapshots = list_snapshots(path, &cancel)?;
    if snapshots.is_empty() {
        println!("  No snapshots under {}", path.display());
        return Ok(());
    }
    let latest = latest_snapshot(path, &cancel)?;

    println!();
    for snapshot in &snapshots {
        let mut count = 0usize;
        walk_backup_dir(snapshot, &cancel, &mut |_| count += 1)?;
        let name = snapshot
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let marker = if latest.as_ref() == Some(snapshot) {
            " (latest)"
        } else {
            ""
        };
        println!("  {name:<24} {count:>8} message(s){marker}");
    }
    println!();
    Ok(())
}

/// Show the parsed filter and its server/client split.
fn cmd_filter(args: &FilterArgs, json: bool) -> anyhow::Result<()> {
    let spec = args.to_spec()?;
    let (server, client_side) = spec.to_server_filter();

    if json {
        let output = serde_json::json!({
            "filter": spec,
            "server": server,
            "client_side": client_side,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {}",
        "Server label",
        server.label_id.as_deref().unwrap_or("-")
    );
    println!(
        "  {:<20} {}",
        "Server subject",
        server.subject.as_deref().unwrap_or("-")
    );
    println!(
        "  {:<20} {}",
        "Client-side pass",
        if client_side { "yes" } else { "no" }
    );
    if spec.is_empty() {
        println!("  {:<20} every message", "Matches");
    }
    println!();
    Ok(())
}

/// Print (and optionally save) the effective configuration.
fn cmd_config(config: &Config, write: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if write {
        let path = mailstash::config::save_config(config)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
