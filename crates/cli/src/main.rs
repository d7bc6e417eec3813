//! Morgonpodd CLI: generate episodes, run the daily schedule, manage music.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use morgonpodd_core::music::{MusicCatalog, MusicTrack, TrackInfo};
use morgonpodd_core::pipeline::EpisodePipeline;
use morgonpodd_core::script::{DialogueChunker, ScriptParser};
use morgonpodd_core::{PodcastConfig, Segment};

// ─── Top-level CLI ───────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "morgonpodd",
    about = "Daily two-host Swedish news podcast generator",
    version
)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "podcast.json")]
    config: PathBuf,

    /// Show verbose output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one episode now
    Run,
    /// Generate one episode every day at the configured time
    Schedule,
    /// Manage the background music catalog
    Music {
        #[command(subcommand)]
        action: MusicCommand,
    },
    /// Show how a script would be split, without calling any provider
    Parse(ParseArgs),
}

#[derive(Subcommand)]
enum MusicCommand {
    /// Import a track into the catalog
    Add(AddArgs),
    /// Remove a track by ID
    Remove {
        id: String,
    },
    /// List tracks, optionally filtered
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        mood: Option<String>,
    },
    /// Search artist, title and description
    Search {
        query: String,
    },
}

#[derive(Parser, Debug)]
struct AddArgs {
    /// Audio file to import
    file: PathBuf,

    #[arg(long)]
    artist: String,

    #[arg(long)]
    title: String,

    /// Category ID (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Mood ID (repeatable)
    #[arg(long = "mood")]
    moods: Vec<String>,

    /// Duration in seconds (probed from the file when omitted)
    #[arg(long)]
    duration: Option<f64>,

    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Parser, Debug)]
struct ParseArgs {
    /// Script text file
    script: PathBuf,

    /// Override the chunk character budget
    #[arg(long)]
    max_chars: Option<usize>,
}

// ─── Main ────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    // Init logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env loaded: {}", e);
    }

    let result = load_config(&cli.config).and_then(|config| match cli.command {
        Command::Run => run_once(config),
        Command::Schedule => run_schedule(config),
        Command::Music { action } => run_music(&config, action),
        Command::Parse(args) => run_parse(&config, args),
    });

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// A missing config file means defaults; a broken one is an error.
fn load_config(path: &Path) -> Result<PodcastConfig> {
    if path.exists() {
        let config = PodcastConfig::load(path)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    } else {
        log::warn!("{} not found, using default configuration", path.display());
        Ok(PodcastConfig::with_default_hosts())
    }
}

fn open_catalog(config: &PodcastConfig) -> Result<MusicCatalog> {
    MusicCatalog::open(&config.paths.music_dir, &config.paths.music_library)
}

fn print_track(track: &MusicTrack) {
    let duration = track
        .duration
        .map(|d| format!("{:.0}s", d))
        .unwrap_or_else(|| "?".to_string());
    let tags: Vec<&str> = track
        .categories
        .iter()
        .chain(track.moods.iter())
        .map(String::as_str)
        .collect();
    println!(
        "{}  {} - {}  ({})  [{}]",
        track.id,
        track.artist,
        track.title,
        duration,
        tags.join(", ")
    );
}

// ─── Runners ─────────────────────────────────────────────────────

fn run_once(config: PodcastConfig) -> Result<()> {
    let pipeline = EpisodePipeline::from_config(config)?;
    let meta = pipeline.generate_episode()?;
    println!("Episode {}: {}", meta.episode_number, meta.title);
    println!(
        "Feed: {}/feed.xml",
        pipeline.config().podcast.public_url.trim_end_matches('/')
    );
    Ok(())
}

fn run_schedule(config: PodcastConfig) -> Result<()> {
    EpisodePipeline::from_config(config)?.run_scheduled()
}

fn run_music(config: &PodcastConfig, action: MusicCommand) -> Result<()> {
    let mut catalog = open_catalog(config)?;
    match action {
        MusicCommand::Add(args) => {
            if !args.file.exists() {
                bail!("File not found: {}", args.file.display());
            }
            let id = catalog.add(
                &args.file,
                TrackInfo {
                    artist: args.artist,
                    title: args.title,
                    categories: args.categories,
                    moods: args.moods,
                    duration: args.duration,
                    description: args.description,
                },
            )?;
            println!("Added track {}", id);
        }
        MusicCommand::Remove { id } => {
            if catalog.remove(&id)? {
                println!("Removed track {}", id);
            } else {
                bail!("No track with ID {}", id);
            }
        }
        MusicCommand::List { category, mood } => {
            let tracks: Vec<&MusicTrack> = match (&category, &mood) {
                (Some(c), _) => catalog
                    .by_category(c)
                    .into_iter()
                    .filter(|t| mood.as_ref().map_or(true, |m| t.moods.contains(m)))
                    .collect(),
                (None, Some(m)) => catalog.by_mood(m),
                (None, None) => catalog.tracks().collect(),
            };
            for track in &tracks {
                print_track(track);
            }
            println!("{} track(s)", tracks.len());
        }
        MusicCommand::Search { query } => {
            let hits = catalog.search(&query);
            for track in &hits {
                print_track(track);
            }
            println!("{} match(es)", hits.len());
        }
    }
    Ok(())
}

fn run_parse(config: &PodcastConfig, args: ParseArgs) -> Result<()> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script: {}", args.script.display()))?;
    let parser = ScriptParser::from_config(config);

    if !parser.is_conversational(&script) {
        println!("Not a dialogue script: it would be read by a single voice.");
        return Ok(());
    }

    let segments = parser.parse(&script);
    println!("Segments ({}):", segments.len());
    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Dialogue(d) => println!("  {:>3}  {}: {}", i, d.speaker, d.text),
            Segment::Music(m) => println!("  {:>3}  {}", i, m.raw_marker),
        }
    }

    let mut chunker = DialogueChunker::from_config(config);
    if let Some(max_chars) = args.max_chars {
        let mut custom = config.clone();
        custom.chunking.max_chars = max_chars;
        chunker = DialogueChunker::from_config(&custom);
    }
    let plan = chunker.chunk(&segments);
    let catalog = open_catalog(config)?;
    let resolved = catalog.resolve_cues(&plan.cues);

    let describe = |ordinal: usize| match resolved.get(&ordinal) {
        Some(track) => format!("{} ({})", track.label(), track.id),
        None => format!("{} (unresolved)", plan.cues[ordinal].segment.track_ref),
    };

    println!("Chunks ({}):", plan.chunks.len());
    for &ordinal in &plan.leading {
        println!("  music  {}", describe(ordinal));
    }
    for (i, chunk) in plan.chunks.iter().enumerate() {
        println!(
            "  chunk {:>2}  {} lines, {} chars",
            i,
            chunk.len(),
            plan.chunk_chars(i)
        );
        for &ordinal in plan.after_chunk.get(&i).into_iter().flatten() {
            println!("  music  {}", describe(ordinal));
        }
    }
    Ok(())
}
