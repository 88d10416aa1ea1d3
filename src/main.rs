use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use midisig::config::SearchConfig;
use midisig::search::{Exporter, SearchReport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "midisig", version, about = "MIDI content fingerprinting and similarity search")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint MIDI files and write a corpus snapshot
    Index {
        /// Directories to index
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Snapshot path (defaults to config corpus_path, then XDG data dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of parallel workers (0 = auto)
        #[arg(short, long, default_value = "0")]
        jobs: usize,
    },

    /// Rank the corpus against query files and copy the best matches
    Search {
        /// Query files or directories (defaults to config query_dirs)
        queries: Vec<PathBuf>,

        /// Corpus snapshot to search
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Corpus MIDI root that matches are copied from
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Where matches are copied to (nothing is copied without it)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Transpositions searched in each direction (0-6)
        #[arg(short, long)]
        transpose: Option<u8>,

        /// Matches kept per query
        #[arg(short = 'n', long)]
        top: Option<usize>,

        /// Cost of a token present on one side only
        #[arg(long)]
        penalty: Option<f64>,

        /// Distance exponent
        #[arg(long)]
        exponent: Option<f64>,

        /// Include drum tokens
        #[arg(long)]
        with_drums: bool,

        /// Compare token ratios instead of raw counts
        #[arg(long)]
        ratios: bool,
    },

    /// Print the token histogram of a file
    Fingerprint {
        file: PathBuf,

        /// Transpositions in each direction (0-6)
        #[arg(short, long, default_value = "0")]
        transpose: u8,
    },

    /// Decode a file and report its structure and decode warnings
    Inspect { file: PathBuf },
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
    let config = midisig::config::AppConfig::load();

    match cli.command {
        Commands::Index { dirs, output, jobs } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let output = output.unwrap_or_else(|| config.resolve_corpus_path());

            let (entries, result) =
                midisig::corpus::build_corpus(&dirs, workers, &config.search.index_options())
                    .context("Indexing failed")?;
            midisig::corpus::save_snapshot(&output, &entries)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Index complete: {} scanned, {} indexed, {} failed, {} duplicates -> {}",
                result.scanned,
                result.indexed,
                result.failed,
                result.duplicates,
                output.display()
            );
        }

        Commands::Search {
            queries,
            corpus,
            source_dir,
            output_dir,
            transpose,
            top,
            penalty,
            exponent,
            with_drums,
            ratios,
        } => {
            // CLI > config > defaults
            let mut search = config.search.clone();
            if let Some(t) = transpose {
                search.transpose_factor = t;
            }
            if let Some(n) = top {
                search.top_matches = n;
            }
            if let Some(p) = penalty {
                search.mismatch_penalty = p;
            }
            if let Some(e) = exponent {
                search.distance_exponent = e;
            }
            if with_drums {
                search.omit_drums = false;
            }
            if ratios {
                search.counts_to_ratios = true;
            }
            search.distance_params().context("Invalid search settings")?;

            let query_roots = if !queries.is_empty() {
                queries
            } else if !config.query_dirs.is_empty() {
                config.query_dirs.clone()
            } else {
                anyhow::bail!("No query files. Pass paths as arguments or set query_dirs in config.");
            };
            let query_files = midisig::scanner::discover(&query_roots).context("Failed to list query files")?;
            if query_files.is_empty() {
                println!("No MIDI files found among the queries.");
                return Ok(());
            }

            let corpus_path = corpus.unwrap_or_else(|| config.resolve_corpus_path());
            let entries = midisig::corpus::load_snapshot(&corpus_path)
                .with_context(|| format!("Failed to load corpus {}", corpus_path.display()))?;
            let signatures =
                midisig::corpus::load_signatures(&entries, search.omit_drums, search.counts_to_ratios);
            let index = midisig::similarity::CorpusIndex::build(&signatures);
            println!(
                "Corpus: {} entries over {} tokens",
                index.len(),
                index.vocabulary().len()
            );

            let exporter = match (source_dir.or(config.source_dir.clone()), output_dir.or(config.output_dir.clone())) {
                (Some(source), Some(output)) => Some(Exporter::new(source, output)),
                (None, Some(_)) => anyhow::bail!("--output-dir needs --source-dir (or source_dir in config)"),
                _ => None,
            };

            let (reports, summary) =
                midisig::search::search_all(&index, &query_files, &search, exporter.as_ref());
            for report in &reports {
                print_report(report);
            }
            println!(
                "Search complete: {} of {} queries searched, {} errors, {} files copied",
                summary.searched, summary.queries, summary.errors, summary.copied
            );
        }

        Commands::Fingerprint { file, transpose } => {
            let options = SearchConfig {
                transpose_factor: transpose,
                omit_drums: false,
                ..config.search.clone()
            }
            .fingerprint_options();
            let fingerprints = midisig::fingerprint::file_fingerprints(&file, &options)
                .with_context(|| format!("Failed to fingerprint {}", file.display()))?;

            for tf in &fingerprints {
                println!(
                    "Transpose {:+}: {} distinct tokens, {} total",
                    tf.transpose,
                    tf.fingerprint.len(),
                    tf.fingerprint.total()
                );
                for (token, count) in tf.fingerprint.iter() {
                    println!("  {:>5} {:<10} {}", token, describe_token(token), count);
                }
            }
        }

        Commands::Inspect { file } => inspect(&file)?,
    }

    Ok(())
}

/// Human-readable name for a token.
fn describe_token(token: u32) -> String {
    use midisig::chords::Catalogue;
    use midisig::fingerprint::{CHORD_TOKEN_BASE, DRUM_TOKEN_OFFSET};

    if token < CHORD_TOKEN_BASE {
        format!("pitch {}", token)
    } else if token < DRUM_TOKEN_OFFSET {
        match Catalogue::Sorted.get((token - CHORD_TOKEN_BASE) as usize) {
            Some(shape) => format!("chord {}", shape),
            None => "chord ?".to_string(),
        }
    } else {
        format!("drum {}", token - DRUM_TOKEN_OFFSET)
    }
}

/// Print the matches selected for one query.
fn print_report(report: &SearchReport) {
    println!();
    println!("{}:", report.query.display());
    if report.matches.is_empty() {
        println!("  No matches.");
        return;
    }
    println!("{:>5} {:>10} {:>6}  {}", "Rank", "Distance", "Trans", "Id");
    println!("{}", "-".repeat(60));
    for m in &report.matches {
        println!("{:>5} {:>10.4} {:>+6}  {}", m.rank, m.distance, m.transpose, m.id);
    }
    if report.missing > 0 || report.failed > 0 {
        println!(
            "  ({} sources missing, {} copies failed)",
            report.missing, report.failed
        );
    }
}

fn inspect(file: &Path) -> Result<()> {
    use midisig::midi::{DecodeOptions, EventKind};

    let options = DecodeOptions {
        lenient_signature: true,
        ..Default::default()
    };
    let decoded = midisig::midi::read_file(file, &options)
        .with_context(|| format!("Failed to decode {}", file.display()))?;
    let opus = &decoded.opus;

    println!("File:      {}", file.display());
    println!("Format:    {}", decoded.format);
    println!("Tracks:    {} declared, {} decoded", decoded.declared_tracks, opus.tracks.len());
    println!("Division:  {} ticks per quarter", opus.ticks_per_quarter);
    println!();

    println!("{:>5} {:>8} {:>8} {:>8} {:>6}", "Track", "Events", "NoteOn", "NoteOff", "Tempo");
    println!("{}", "-".repeat(40));
    for (i, track) in opus.tracks.iter().enumerate() {
        let count = |kind: EventKind| track.iter().filter(|e| e.kind() == kind).count();
        println!(
            "{:>5} {:>8} {:>8} {:>8} {:>6}",
            i,
            track.len(),
            count(EventKind::NoteOn),
            count(EventKind::NoteOff),
            count(EventKind::SetTempo)
        );
    }

    let tempo_map = midisig::timing::TempoMap::from_opus(opus).context("Bad tempo map")?;
    let score = midisig::timing::single_track_ms_score(opus).context("Millisecond conversion failed")?;
    let notes = midisig::fingerprint::enhance_score(&score);
    let chords = midisig::chords::chordify_score(&score);
    let length_ms = notes.iter().map(|n| n.start + n.duration).max().unwrap_or(0);

    println!();
    println!("Tempo changes: {}", tempo_map.len());
    println!("Notes:         {}", notes.len());
    println!("Simultaneities: {}", chords.len());
    println!("Length:        {:.1} s", length_ms as f64 / 1000.0);

    if !decoded.diagnostics.is_empty() {
        println!();
        println!("Warnings:");
        for entry in decoded.diagnostics.entries() {
            println!("  {}", entry);
        }
    }

    Ok(())
}
