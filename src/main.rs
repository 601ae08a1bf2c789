mod analysis;
mod error;
mod report;
mod source;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use analysis::{Analysis, Threshold};
use report::Sheet;

#[derive(Parser)]
#[command(
    name = "cannibal",
    about = "Find pages competing with each other for the same search queries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ThresholdArg {
    /// Select the top N% of queries by metric (0-100)
    #[arg(
        short,
        long,
        default_value_t = 80,
        env = "CANNIBAL_THRESHOLD",
        value_parser = clap::value_parser!(u8).range(0..=100)
    )]
    threshold: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SheetKind {
    /// Competing by the first metric (clicks / traffic)
    Primary,
    /// Competing by the second metric (impressions / search volume)
    Secondary,
    /// Competing by both metrics
    Merged,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse an export and write the cannibalization workbook
    Analyze {
        /// Query + page export (.csv) from Search Console or a keyword research tool
        input: PathBuf,
        #[command(flatten)]
        threshold: ThresholdArg,
        /// Workbook path (default: cannibalization_data_threshold_<N>.xlsx)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Detect the export type and show row counts
    Inspect {
        input: PathBuf,
    },
    /// Print one result table to the terminal
    Preview {
        input: PathBuf,
        #[command(flatten)]
        threshold: ThresholdArg,
        #[arg(long, value_enum, default_value_t = SheetKind::Merged)]
        sheet: SheetKind,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze {
            input,
            threshold,
            output,
            json,
        } => {
            let threshold = Threshold::from_percent(threshold.threshold);
            let analysis = run_pipeline(&input, threshold)?;

            // Too low a threshold leaves nothing to export; say so, but still
            // show what each stage found.
            let outcome = analysis.ensure_competing();
            let written = match outcome {
                Ok(()) => {
                    let path = output.unwrap_or_else(|| report::default_output(threshold));
                    report::write_workbook(&path, &analysis.sheets())?;
                    Some(path)
                }
                Err(_) => None,
            };

            if json {
                let doc = report::SummaryReport::new(&analysis, &input, written.as_deref());
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("Summary, threshold set to {}%", threshold.percent());
                print!("{}", analysis.summary);
                if let Some(path) = &written {
                    println!("\nWrote {}", path.display());
                }
            }

            outcome.map_err(Into::into)
        }
        Commands::Inspect { input } => {
            let dataset = source::load(&input)?;
            let source = dataset.source;
            let dims = source.dimensions();
            let [first, second] = source.metrics();
            let total = dataset.rows.len();
            let kept = analysis::filter::filter_rows(dataset.rows, first.column);
            let groups = kept
                .iter()
                .map(|r| r.group.as_str())
                .collect::<std::collections::HashSet<_>>()
                .len();

            println!("Source:     {}", source.name());
            println!("Dimensions: {} / {}", dims.grouping, dims.secondary);
            println!(
                "Metrics:    {}, {} (merged as {})",
                first.column,
                second.column,
                source.merge_label()
            );
            println!("Rows:       {}", total);
            println!("Kept:       {}", kept.len());
            println!("Dropped:    {}", total - kept.len());
            println!("Unique {}: {}", source.noun(), groups);
            Ok(())
        }
        Commands::Preview {
            input,
            threshold,
            sheet,
            limit,
        } => {
            let threshold = Threshold::from_percent(threshold.threshold);
            let analysis = run_pipeline(&input, threshold)?;
            let table: &dyn Sheet = match sheet {
                SheetKind::Primary => &analysis.primary,
                SheetKind::Secondary => &analysis.secondary,
                SheetKind::Merged => &analysis.merged,
            };
            if table.records().is_empty() {
                println!("No competing pages at {}%. Try a higher threshold.", threshold.percent());
                return Ok(());
            }
            report::print_table(table, limit);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", elapsed_label(elapsed));
    }

    result
}

/// Load → filter → extract → merge, behind a spinner.
fn run_pipeline(input: &std::path::Path, threshold: Threshold) -> anyhow::Result<Analysis> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    pb.set_message(format!("Reading {}", input.display()));
    let dataset = source::load(input)?;

    pb.set_message(format!(
        "Finding competing pages in {} rows",
        dataset.rows.len()
    ));
    let analysis = analysis::run(dataset, threshold);

    pb.finish_and_clear();
    Ok(analysis)
}

fn elapsed_label(d: Duration) -> String {
    let secs = d.as_secs();
    match (secs / 3600, secs / 60 % 60, secs % 60) {
        (0, 0, _) => format!("{:.1}s", d.as_secs_f64()),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, s) => format!("{h}h {m:02}m {s:02}s"),
    }
}
