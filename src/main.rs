use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use walkingbass::db::LazyDatabase;
use walkingbass::db::models::BassStyle;
use walkingbass::harmony::pitch_label;
use walkingbass::scoring::{Scorer, TransposingAdapter};
use walkingbass::sequence::{ChordSequence, TimeSignature, UsableChordSequence};
use walkingbass::tiler::{self, BestFirstTiler};
use walkingbass::tiling::Tiling;

#[derive(Parser)]
#[command(name = "walkingbass", version, about = "Walking bass line generator from recorded fragments")]
struct Cli {
    /// Session directories (defaults to config file source_dirs)
    #[arg(long = "source", global = true)]
    sources: Vec<PathBuf>,

    /// Bass style (two-feet, walking, walking-double-note, walking-double-time)
    #[arg(long, global = true)]
    style: Option<BassStyle>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show fragment database statistics
    Stats,

    /// List fragments
    List {
        /// Only fragments of this many bars (1-4)
        #[arg(long)]
        size: Option<u8>,

        /// Include every style instead of --style
        #[arg(long)]
        all_styles: bool,

        /// Number of results
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Show fragments cut from overlapping bars of the same session
    Related {
        /// Fragment id, e.g. "blues-in-f#4-5"
        id: String,
    },

    /// Audit chord coverage and ghost notes of a style
    Check,

    /// Generate a bass line over a chord progression
    Generate {
        /// Progression, bars separated by '|', e.g. "Cm7 F7 | Bbmaj7 | Eb6 | D7"
        progression: String,

        /// Beats per bar
        #[arg(long, default_value = "4", value_parser = clap::value_parser!(u8).range(1..=12))]
        beats: u8,

        /// RNG seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Candidates kept per slot (overrides config)
        #[arg(long)]
        width: Option<usize>,

        /// Allow the same fragment more than once
        #[arg(long)]
        allow_repeats: bool,

        /// Print the resulting notes
        #[arg(long)]
        notes: bool,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = walkingbass::config::AppConfig::load();

    // Resolve session dirs: CLI > config > XDG default
    let source_dirs = if cli.sources.is_empty() {
        config.resolve_source_dirs()
    } else {
        cli.sources.clone()
    };
    for dir in &source_dirs {
        log::info!("Sessions: {}", dir.display());
    }
    let db = LazyDatabase::new(source_dirs, config.dedup);
    let style = cli.style.unwrap_or(config.default_style);

    match cli.command {
        Commands::Stats => {
            let stats = db.get().stats();
            println!("Fragment database:");
            println!("  Sessions:   {}", stats.sessions);
            println!("  Fragments:  {}", stats.fragments);
            println!("  Index keys: {}", stats.keys);
            for (i, count) in stats.per_size.iter().enumerate() {
                println!("  {} bar:      {}", i + 1, count);
            }
            for (style, count) in &stats.per_style {
                println!("  {:<20} {}", style.name(), count);
            }
        }

        Commands::List { size, all_styles, limit } => {
            let styles = if all_styles { Vec::new() } else { vec![style] };
            let fragments = db.get().fragments_of(size, &styles).context("Query failed")?;
            if fragments.is_empty() {
                println!("No fragments found.");
                return Ok(());
            }
            println!("{:<32} {:<20} {:>4}  Chords", "Id", "Style", "Bars");
            for f in fragments.iter().take(limit) {
                println!("{:<32} {:<20} {:>4}  {}", f.id(), f.style().name(), f.size(), f.chords());
            }
            if fragments.len() > limit {
                println!("... {} more", fragments.len() - limit);
            }
        }

        Commands::Related { id } => {
            let db = db.get();
            let Some(fragment) = db.get(&id) else {
                println!("No fragment with id \"{id}\".");
                return Ok(());
            };
            let related = db.related_fragments(fragment);
            println!("{} fragments overlapping {}:", related.len(), fragment);
            for f in related {
                println!("  {f}");
            }
        }

        Commands::Check => {
            let report = db.get().check_consistency(style);
            println!("{report}");
            for weak in &report.weak_types {
                println!("  weak chord type {:<10} {} fragment(s)", weak.chords, weak.candidates);
            }
            for ghost in &report.ghost_notes {
                println!("  ghost note #{} in {}", ghost.note_index, ghost.fragment_id);
            }
        }

        Commands::Generate {
            progression,
            beats,
            seed,
            width,
            allow_repeats,
            notes,
            jobs,
        } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build_global()
                .context("Failed to start worker pool")?;

            let chords = ChordSequence::parse(&progression, TimeSignature::new(beats))
                .with_context(|| format!("Invalid progression \"{progression}\""))?;
            let seed = seed.or(config.generation.seed).unwrap_or_else(rand::random);
            log::info!("Seed: {seed}");
            let mut rng = StdRng::seed_from_u64(seed);

            let tiler = BestFirstTiler {
                style,
                width: width.unwrap_or(config.generation.width),
                score_window: config.generation.score_window,
                no_repeat: config.generation.no_repeat && !allow_repeats,
            };
            let scorer = Scorer::with_adapter(TransposingAdapter);
            let mut tiling = Tiling::new(UsableChordSequence::new(chords));
            let untiled = tiler.tile(&mut tiling, db.get(), &scorer, &mut rng);

            println!("{:<10} {:<32} {:>6}  Chords", "Bars", "Fragment", "Score");
            for a in tiling.adaptations() {
                println!(
                    "{:<10} {:<32} {:>6.1}  {}",
                    a.bar_range().to_string(),
                    a.fragment().id(),
                    a.score().overall(),
                    a.target()
                );
            }
            if !untiled.is_empty() {
                println!("No fragment found for bars {untiled:?}");
            }

            if notes {
                println!();
                for n in tiler::render(&tiling, &TransposingAdapter).notes() {
                    println!(
                        "{:>7.2}  {:<5}  {:.2}  vel {}",
                        n.position,
                        pitch_label(n.pitch),
                        n.duration,
                        n.velocity
                    );
                }
            }
        }
    }

    Ok(())
}
