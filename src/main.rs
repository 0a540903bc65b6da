//! CLI entry point for `wecom-audit`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use wecom_audit::aggregate;
use wecom_audit::config::{self, Config};
use wecom_audit::export::attachment::{download_attachments, DownloadOptions};
use wecom_audit::export::json::{read_messages, write_grouped, write_messages};
use wecom_audit::model::record::RetrievalCursor;
use wecom_audit::pipeline::{BatchProgress, RetrievalResult};
use wecom_audit::service::archive::ArchiveService;
use wecom_audit::session::AuditSession;

#[derive(Parser)]
#[command(
    name = "wecom-audit",
    version,
    about = "Retrieve, decrypt and archive an encrypted chat audit log"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, or TOML by extension)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dump directory holding chatdata.json and media/
    #[arg(
        long,
        global = true,
        env = "WECOM_AUDIT_ARCHIVE",
        default_value = "archive",
        value_name = "DIR"
    )]
    archive: PathBuf,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve and decrypt messages, writing messages.json
    Fetch {
        /// Resume after this sequence (default: retrieval.start_seq)
        #[arg(long)]
        seq: Option<u64>,
        /// Records per page (default: batch_size)
        #[arg(long)]
        limit: Option<u32>,
        /// Stop after this many pages
        #[arg(long)]
        max_batches: Option<usize>,
        /// Output directory (default: output.output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write one JSON file per sender
        #[arg(long)]
        group_by_sender: bool,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download one attachment by its sdkfileid
    Media {
        sdkfileid: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Download every attachment referenced by a messages file
    Attachments {
        /// Messages file written by `fetch` (default: <output_dir>/messages.json)
        #[arg(long)]
        messages: Option<PathBuf>,
        /// Output directory (default: output.output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show statistics for a messages file
    Stats {
        #[arg(long)]
        messages: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that do not talk to the service run without a config file.
    let loaded = config::load_config(cli.config.as_deref());

    let log_level = match cli.verbose {
        0 => loaded
            .as_ref()
            .map(|c| c.output.log_level.as_str())
            .unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, loaded.as_ref().ok());

    match cli.command {
        Commands::Fetch {
            seq,
            limit,
            max_batches,
            output,
            group_by_sender,
            json,
        } => {
            let mut config = loaded.context("cannot fetch without a configuration")?;
            if let Some(limit) = limit {
                config.batch_size = limit;
            }
            if max_batches.is_some() {
                config.retrieval.max_batches = max_batches;
            }
            let output = output.unwrap_or_else(|| config.output.output_dir.clone());
            cmd_fetch(&config, &cli.archive, seq, &output, group_by_sender, json)
        }
        Commands::Media { sdkfileid, output } => {
            let config = loaded.context("cannot download media without a configuration")?;
            cmd_media(&config, &cli.archive, &sdkfileid, &output)
        }
        Commands::Attachments { messages, output } => {
            let config = loaded.context("cannot download attachments without a configuration")?;
            let output = output.unwrap_or_else(|| config.output.output_dir.clone());
            let messages = messages.unwrap_or_else(|| output.join("messages.json"));
            cmd_attachments(&config, &cli.archive, &messages, &output)
        }
        Commands::Stats { messages, json } => {
            let messages = messages.unwrap_or_else(|| default_messages_path(loaded.as_ref().ok()));
            cmd_stats(&messages, json)
        }
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: Option<&Config>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "wecom-audit.log");
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

fn default_messages_path(config: Option<&Config>) -> PathBuf {
    config
        .map(|c| c.output.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("output"))
        .join("messages.json")
}

fn open_session(config: &Config, archive: &Path) -> anyhow::Result<AuditSession> {
    let service = ArchiveService::open(archive)
        .with_context(|| format!("opening archive {}", archive.display()))?;
    Ok(AuditSession::from_config(config, Box::new(service))?)
}

fn spinner(template: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template(template)?);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Ok(pb)
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "wecom-audit", &mut std::io::stdout());
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

/// Page through the log, decrypt, and write the results.
fn cmd_fetch(
    config: &Config,
    archive: &Path,
    seq: Option<u64>,
    output: &Path,
    group_by_sender: bool,
    json: bool,
) -> anyhow::Result<()> {
    let session = open_session(config, archive)?;
    let start = RetrievalCursor::new(seq.unwrap_or(config.retrieval.start_seq));

    let pb = spinner("{spinner:.green} Fetching {msg}")?;
    let started = Instant::now();
    let result = session.retrieve(
        start,
        Some(&|p: &BatchProgress| {
            pb.set_message(format!(
                "batch {}, {} records, {} messages, next seq {}",
                p.batch, p.records, p.total_messages, p.cursor
            ));
        }),
    );
    pb.finish_and_clear();
    let elapsed = started.elapsed();

    // Partial results are written even when the run failed.
    let messages_path = output.join("messages.json");
    write_messages(&result, &messages_path)?;
    let grouped = if group_by_sender {
        let groups = aggregate::group_by_sender(&result.messages);
        write_grouped(&groups, &output.join("by_sender"))?.len()
    } else {
        0
    };

    if json {
        let summary = serde_json::json!({
            "errcode": result.status,
            "errmsg": result.error,
            "next_seq": result.cursor,
            "exhausted": result.exhausted,
            "stats": result.stats,
            "messages_file": messages_path.to_string_lossy(),
            "sender_files": grouped,
            "elapsed_ms": elapsed.as_millis(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_fetch_summary(&result, &messages_path, grouped, elapsed);
    }

    if !result.is_success() {
        anyhow::bail!(
            "retrieval stopped at seq {} (status {}): {}",
            result.cursor,
            result.status,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_fetch_summary(
    result: &RetrievalResult,
    messages_path: &Path,
    grouped: usize,
    elapsed: std::time::Duration,
) {
    println!();
    println!("  {:<20} {}", "Batches", result.stats.batches);
    println!("  {:<20} {}", "Records", result.stats.records);
    println!("  {:<20} {}", "Decrypted", result.stats.decrypted);
    if result.stats.skipped > 0 {
        println!("  {:<20} {}", "Skipped", result.stats.skipped);
    }
    if result.stats.duplicates > 0 {
        println!("  {:<20} {}", "Duplicates", result.stats.duplicates);
    }
    println!("  {:<20} {}", "Next seq", result.cursor);
    println!(
        "  {:<20} {}",
        "End of log",
        if result.exhausted { "yes" } else { "no" }
    );
    println!("  {:<20} {:.2?}", "Elapsed", elapsed);
    println!("  {:<20} {}", "Messages file", messages_path.display());
    if grouped > 0 {
        println!("  {:<20} {}", "Sender files", grouped);
    }
    println!();
}

/// Download a single attachment.
fn cmd_media(config: &Config, archive: &Path, sdkfileid: &str, output: &Path) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let session = open_session(config, archive)?;
    let pb = spinner("{spinner:.green} Downloading {msg}")?;
    let data = session.media().assemble_with_progress(
        sdkfileid,
        Some(&|bytes| pb.set_message(format_size(bytes, BINARY))),
    )?;
    pb.finish_and_clear();

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &data).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "  Saved {} to {}",
        format_size(data.len(), BINARY),
        output.display()
    );
    Ok(())
}

/// Download every attachment referenced by a messages file.
fn cmd_attachments(
    config: &Config,
    archive: &Path,
    messages: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let result = read_messages(messages)?;
    let with_att = aggregate::count_with_attachments(&result.messages);
    if with_att == 0 {
        println!("  No messages with attachments found.");
        return Ok(());
    }
    println!("  Downloading attachments from {with_att} message(s)");

    let session = open_session(config, archive)?;
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Downloading [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    let options = DownloadOptions {
        verify_md5: config.output.verify_md5,
        workers: config.retrieval.decrypt_workers,
    };
    let report = download_attachments(
        &session.media(),
        &result.messages,
        output,
        options,
        &|current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        },
    )?;
    pb.finish_and_clear();

    println!(
        "  Saved {} attachment(s) to {}",
        report.saved.len(),
        output.display()
    );
    if !report.failed.is_empty() {
        println!("  {} attachment(s) failed:", report.failed.len());
        for (att, reason) in &report.failed {
            println!("    {}  {reason}", att.filename);
        }
    }
    Ok(())
}

/// Show statistics for a messages file.
fn cmd_stats(messages: &Path, json: bool) -> anyhow::Result<()> {
    let file_size = std::fs::metadata(messages)
        .with_context(|| format!("reading {}", messages.display()))?
        .len();
    let result = read_messages(messages)?;

    if json {
        print_stats_json(messages, file_size, &result)
    } else {
        print_stats_table(messages, file_size, &result);
        Ok(())
    }
}

/// Print statistics in a human-readable table.
fn print_stats_table(path: &Path, file_size: u64, result: &RetrievalResult) {
    use humansize::{format_size, BINARY};

    let messages = &result.messages;
    println!();
    println!("  {:<20} {}", "File", path.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Messages", messages.len());
    println!("  {:<20} {}", "Next seq", result.cursor);

    if let Some((min, max)) = aggregate::time_range(messages) {
        println!(
            "  {:<20} {} to {}",
            "Time range",
            min.format("%Y-%m-%d %H:%M"),
            max.format("%Y-%m-%d %H:%M")
        );
    }

    let with_att = aggregate::count_with_attachments(messages);
    println!(
        "  {:<20} {} ({:.1}%)",
        "With attachments",
        with_att,
        if messages.is_empty() {
            0.0
        } else {
            with_att as f64 / messages.len() as f64 * 100.0
        }
    );

    let types = aggregate::count_by_type(messages);
    if !types.is_empty() {
        println!();
        println!("  Message types:");
        for (msgtype, count) in &types {
            println!("    {count:>6}  {msgtype}");
        }
    }

    let top = aggregate::top_senders(messages, 10);
    if !top.is_empty() {
        println!();
        println!("  Top senders:");
        for (sender, count) in &top {
            let label = sender.as_deref().unwrap_or(aggregate::NO_SENDER_LABEL);
            println!("    {count:>6}  {label}");
        }
    }
    println!();
}

/// Print statistics as JSON.
fn print_stats_json(path: &Path, file_size: u64, result: &RetrievalResult) -> anyhow::Result<()> {
    let messages = &result.messages;
    let time_range = aggregate::time_range(messages).map(|(min, max)| {
        serde_json::json!({
            "oldest": min.to_rfc3339(),
            "newest": max.to_rfc3339(),
        })
    });

    let top_json: Vec<serde_json::Value> = aggregate::top_senders(messages, 10)
        .iter()
        .map(|(sender, count)| {
            serde_json::json!({
                "sender": sender,
                "count": count,
            })
        })
        .collect();

    let stats = serde_json::json!({
        "file": path.to_string_lossy(),
        "file_size": file_size,
        "message_count": messages.len(),
        "next_seq": result.cursor,
        "time_range": time_range,
        "with_attachments": aggregate::count_with_attachments(messages),
        "message_types": aggregate::count_by_type(messages),
        "top_senders": top_json,
    });

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
