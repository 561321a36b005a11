//! go-review - Reviews Go games with KataGo.
//!
//! Analyzes every position of a game with a pool of KataGo analysis engines,
//! prints the moves that lost more than the configured number of points, and
//! optionally writes a JSON report.

use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use go_review::{load_game, position_range, Overrides, ReviewConfig};
use katago_analysis::{
    AnalysisReport, BatchStatus, CancellationToken, ErrorDetector, GameAnalyzer,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "go-review")]
#[command(about = "Go game review with KataGo")]
struct Cli {
    /// Configuration file (defaults to go-review.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a game and flag losing moves
    Analyze {
        /// Game record (JSON)
        game: PathBuf,
        /// Number of engines to run in parallel (1-8)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Point loss above which a move is flagged
        #[arg(long)]
        threshold: Option<f64>,
        /// Visits per position
        #[arg(long)]
        visits: Option<u32>,
        /// Per-position timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// First position to analyze
        #[arg(long)]
        from: Option<usize>,
        /// Last position to analyze
        #[arg(long)]
        to: Option<usize>,
        /// Write a JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Stop the analysis after this many seconds
        #[arg(long)]
        max_time: Option<f64>,
    },
    /// Analyze a single position with the primary engine
    Position {
        /// Game record (JSON)
        game: PathBuf,
        /// Position index (0 is the empty board)
        index: usize,
        /// Visits for this position
        #[arg(long)]
        visits: Option<u32>,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ReviewConfig::load_from(path),
        None => ReviewConfig::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Commands::Analyze {
            game,
            threads,
            threshold,
            visits,
            timeout,
            from,
            to,
            output,
            max_time,
        } => {
            config.apply(&Overrides {
                threads,
                threshold,
                visits,
                timeout_secs: timeout,
            });
            let record = load_game(&game)
                .with_context(|| format!("Failed to load game {}", game.display()))?;
            let positions = position_range(record.position_count(), from, to);

            let cancel = CancellationToken::new();
            if let Some(secs) = max_time {
                let limit = Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("Invalid --max-time {secs}"))?;
                let cancel = cancel.clone();
                thread::spawn(move || {
                    thread::sleep(limit);
                    tracing::warn!("Time limit reached, cancelling analysis");
                    cancel.cancel();
                });
            }

            let detector = ErrorDetector::from_settings(&config.analysis, &config.engine);
            let top_moves = config.analysis.top_moves;
            let max_visits = config.engine.max_visits;
            let analyzer = GameAnalyzer::new(config.engine, config.analysis);

            println!(
                "Analyzing {} positions of {}",
                positions.len(),
                game.display()
            );
            let outcome = analyzer
                .analyze_batch_with_progress(&positions, &record, &cancel, &mut |done, total| {
                    eprint!("\rAnalyzed {done}/{total}");
                    let _ = std::io::stderr().flush();
                })
                .context("Analysis failed")?;
            eprintln!();
            analyzer.shutdown();

            if outcome.status == BatchStatus::Cancelled {
                println!("Analysis cancelled; the results below are partial.");
            }
            for (index, failure) in outcome.failures() {
                println!("Position {index}: {failure}");
            }

            let errors = detector.detect(&outcome.slots, &record.moves);
            if errors.is_empty() {
                println!("No moves lost more than {:.1} points.", detector.threshold);
            }
            for error in &errors {
                println!(
                    "Move {} ({}): lost {:.1} points, engine preferred {}",
                    error.move_number, error.played_move, error.point_loss, error.recommended_move
                );
            }

            if let Some(path) = output {
                let report =
                    AnalysisReport::build(&record, &outcome, &detector, top_moves, max_visits);
                report
                    .write_json(&path)
                    .with_context(|| format!("Failed to write report {}", path.display()))?;
                println!("Report written to {}", path.display());
            }
        }

        Commands::Position {
            game,
            index,
            visits,
            timeout,
        } => {
            config.apply(&Overrides {
                visits,
                timeout_secs: timeout,
                ..Overrides::default()
            });
            let record = load_game(&game)
                .with_context(|| format!("Failed to load game {}", game.display()))?;
            if index >= record.position_count() {
                bail!(
                    "Position {index} out of range (game has {} positions)",
                    record.position_count()
                );
            }

            let top_moves = config.analysis.top_moves;
            let analyzer = GameAnalyzer::new(config.engine, config.analysis);
            let result = analyzer
                .analyze_one(index, &record)
                .with_context(|| format!("Failed to analyze position {index}"))?;
            analyzer.shutdown();

            println!("Position {index}:");
            for (rank, candidate) in result.candidates.iter().take(top_moves).enumerate() {
                println!(
                    "{:>2}. {:<5} score {:+6.1}  win {:5.1}%  visits {}",
                    rank + 1,
                    candidate.mv,
                    candidate.score_lead,
                    candidate.winrate * 100.0,
                    candidate.visits
                );
            }
        }
    }

    Ok(())
}
