mod progress;
mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bget_engine::{NullSink, Pipeline, PipelineConfig, ProgressSink, RunReport};
use bili_api::{AutoPicker, BiliClient, ClientConfig, VariantPicker};
use clap::Parser;
use colored::Colorize;
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Download a multi-part Bilibili video and remux each part into an mkv
/// file, copying codecs without re-encoding. Requires `ffmpeg` on the PATH
/// (or `FFMPEG_PATH`).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// BV id of the video asset to download
    #[arg(env = "BGET_BVID")]
    bvid: String,

    /// SESSDATA auth token
    #[arg(short, long, env = "BGET_TOKEN")]
    token: Option<String>,

    /// Raw Cookie header; takes precedence over --token
    #[arg(long, env = "BGET_COOKIE")]
    cookie: Option<String>,

    /// Output directory for the merged files
    #[arg(short, long, default_value = ".", env = "BGET_OUTPUT")]
    output: PathBuf,

    /// Pick video/audio variants interactively instead of taking the best
    #[arg(short, long)]
    select: bool,

    /// User-Agent override for API and media requests
    #[arg(long, env = "BGET_USER_AGENT")]
    user_agent: Option<String>,

    /// Concurrent downloads within one part
    #[arg(long, default_value_t = 2, env = "BGET_PARALLEL")]
    parallel: usize,

    /// Process this many parts concurrently instead of one after another
    #[arg(long, default_value_t = 1, env = "BGET_PARALLEL_PARTS")]
    parallel_parts: usize,

    /// Abort the whole run on the first failed part
    #[arg(long)]
    fail_fast: bool,

    /// Suppress progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let (sink, multi): (Arc<dyn ProgressSink>, Option<MultiProgress>) = if args.quiet {
        (Arc::new(NullSink), None)
    } else {
        let sink = progress::IndicatifSink::new();
        let multi = sink.multi();
        (Arc::new(sink), Some(multi))
    };

    init_logging(args.verbose, multi.clone());

    let mut client_config = ClientConfig::default()
        .with_token(args.token.clone())
        .with_cookie(args.cookie.clone());
    if let Some(user_agent) = &args.user_agent {
        client_config = client_config.with_user_agent(user_agent.as_str());
    }
    let client = BiliClient::new(client_config).context("failed to build API client")?;

    let picker: Arc<dyn VariantPicker> = if args.select {
        let multi = multi.clone().unwrap_or_default();
        Arc::new(prompt::SelectPicker::new(multi))
    } else {
        Arc::new(AutoPicker)
    };

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let config = PipelineConfig::default()
        .with_output_dir(&args.output)
        .with_download_workers(args.parallel)
        .with_part_workers(args.parallel_parts)
        .with_fail_fast(args.fail_fast);

    let pipeline = Pipeline::new(client, config, sink, picker, token);
    match pipeline.run(&args.bvid).await {
        Ok(report) => Ok(print_report(&report)),
        Err(err) if err.is_cancelled() => {
            eprintln!("{}", "run cancelled".yellow());
            Ok(130)
        }
        Err(err) => Err(err).with_context(|| format!("downloading {} failed", args.bvid)),
    }
}

fn print_report(report: &RunReport) -> i32 {
    if report.cancelled {
        println!("{}", "selection cancelled, nothing more to do".yellow());
        return 0;
    }

    for part in &report.parts {
        match &part.outcome {
            Ok(path) => println!(
                "{} {} -> {}",
                "done".green().bold(),
                part.name,
                path.display()
            ),
            Err(err) => eprintln!("{} {}: {err}", "failed".red().bold(), part.name),
        }
    }

    if report.failed() > 0 {
        eprintln!(
            "{} {} of {} parts failed",
            "error:".red().bold(),
            report.failed(),
            report.parts.len()
        );
        1
    } else {
        println!(
            "{} {} ({} parts)",
            "finished".green().bold(),
            report.title.cyan(),
            report.parts.len()
        );
        0
    }
}

fn init_logging(verbose: u8, multi: Option<MultiProgress>) {
    let default_directive = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match multi {
        Some(multi) => builder
            .with_writer(progress::SuspendingWriter::new(multi))
            .init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
}
