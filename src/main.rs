use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use framepipe::app::{RunSummary, run};
use framepipe::cli::{Cli, Commands};
use framepipe::codec::{SPEECH_CODECS, VIDEO_CODECS};
use framepipe::config::Config;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        None => {
            let mut config = load_config(cli.config.as_deref())?;
            cli.apply_to(&mut config);
            let summary = run(&config).context("pipeline did not start")?;
            if cli.stats_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if let Some(error) = &summary.first_error {
                bail!("run failed: {error}");
            }
        }
        Some(Commands::Codecs) => list_codecs(),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "framepipe",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the flags when set.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

fn list_codecs() {
    println!("Video codecs:");
    for codec in VIDEO_CODECS {
        println!(
            "  {:<6} {}  {}",
            codec.name.green(),
            codec.description,
            format!(".{}", codec.extensions.join(", .")).dimmed()
        );
    }
    println!("Speech codecs:");
    for codec in SPEECH_CODECS {
        println!(
            "  {:<6} {}  {}",
            codec.name.green(),
            codec.description,
            format!(".{}", codec.extensions.join(", .")).dimmed()
        );
    }
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    let status = if summary.is_success() {
        "finished".green().to_string()
    } else {
        "failed".red().to_string()
    };
    println!("Run {} ({:?})", status, summary.stop_reason);
    println!("  {}       {}", "Frames:".dimmed(), stats.frames);
    if let (Some(width), Some(height)) = (stats.image_width, stats.image_height) {
        println!("  {}        {}x{}", "Image:".dimmed(), width, height);
    }
    println!("  {}  {} bytes", "Video out:".dimmed(), stats.video_bytes);
    println!("  {} {} bytes", "Speech out:".dimmed(), stats.speech_bytes);
    for stage in &summary.stages {
        match &stage.error {
            None => println!("  {:<8} {} iterations", stage.stage, stage.iterations),
            Some(error) => println!(
                "  {:<8} {} iterations, {}",
                stage.stage,
                stage.iterations,
                error.red()
            ),
        }
    }
}
