//! cuebank inspector
//!
//! Usage:
//!   cb-inspect Game.xgs settings                 - List categories, variables, curves
//!   cb-inspect Game.xgs bank Sfx.xsb             - List sounds and cues
//!   cb-inspect Game.xgs waves Music.xwb          - List wave bank entries
//!   cb-inspect Game.xgs eval DistanceAtten 0 50  - Evaluate a curve
//!   cb-inspect Game.xgs play Sfx.xsb Explosion -w Effects.xwb
//!   cb-inspect Game.xgs reencode Sfx.xsb         - Byte-compare re-encoded files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cb_core::{low_pass_gain, semitones_to_ratio};
use cb_cue::{
    AudioEngine, EngineConfig, MemoryBackend, SoundBank, SoundBankData, StreamMode,
    UNLIMITED_INSTANCES, WaveBank, WaveBankState,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

#[derive(Parser)]
#[command(name = "cb-inspect", about = "Inspect compiled cue banks")]
struct Cli {
    /// Global settings file
    settings: PathBuf,

    /// Engine configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List categories, variables and RPC curves
    Settings,
    /// List the sounds and cues of a sound bank
    Bank { path: PathBuf },
    /// List the entries of a wave bank
    Waves {
        path: PathBuf,
        /// Open as a streaming bank
        #[arg(short, long, value_enum)]
        stream: Option<StreamArg>,
    },
    /// Evaluate an RPC curve at one or more inputs
    Eval {
        curve: String,
        #[arg(required = true, allow_negative_numbers = true)]
        inputs: Vec<f32>,
    },
    /// Play a cue against the headless backend and print pushed parameters
    Play {
        bank: PathBuf,
        cue: String,
        /// Resident wave banks to load first
        #[arg(short, long)]
        waves: Vec<PathBuf>,
        /// Streaming wave banks to load first
        #[arg(long)]
        streaming: Vec<PathBuf>,
        /// Value for the cue's Distance variable
        #[arg(short, long)]
        distance: Option<f32>,
        /// Engine ticks to run after the play
        #[arg(short, long, default_value_t = 1)]
        ticks: u32,
    },
    /// Check that settings and sound banks re-encode byte-identically
    Reencode { banks: Vec<PathBuf> },
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamArg {
    Streaming,
    Deferred,
}

impl From<StreamArg> for StreamMode {
    fn from(arg: StreamArg) -> Self {
        match arg {
            StreamArg::Streaming => StreamMode::Streaming,
            StreamArg::Deferred => StreamMode::Deferred,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let backend = MemoryBackend::new();
    let engine = AudioEngine::new(&cli.settings, config, Box::new(backend.clone()))
        .with_context(|| format!("Failed to load settings {}", cli.settings.display()))?;

    let result = match cli.command {
        Commands::Settings => print_settings(&engine, cli.json),
        Commands::Bank { path } => print_bank(&engine, &path, cli.json),
        Commands::Waves { path, stream } => print_waves(&engine, &path, stream, cli.json),
        Commands::Eval { curve, inputs } => eval_curve(&engine, &curve, &inputs, cli.json),
        Commands::Play {
            bank,
            cue,
            waves,
            streaming,
            distance,
            ticks,
        } => play_cue(
            &engine,
            &backend,
            PlayArgs {
                bank: &bank,
                cue: &cue,
                waves: &waves,
                streaming: &streaming,
                distance,
                ticks,
            },
        ),
        Commands::Reencode { banks } => reencode(&engine, &cli.settings, &banks),
    };

    engine.dispose();
    result
}

// ═══════════════════════════════════════════════════════════════════════════════
// LISTINGS
// ═══════════════════════════════════════════════════════════════════════════════

fn print_settings(engine: &AudioEngine, as_json: bool) -> Result<()> {
    let settings = engine.settings();

    if as_json {
        let value = json!({
            "categories": settings.categories.iter().map(|c| json!({
                "name": c.name(),
                "gain": c.gain(),
                "background_music": c.is_background_music(),
                "max_instances": c.max_instances(),
            })).collect::<Vec<_>>(),
            "variables": settings.variables.iter().map(|v| json!({
                "name": v.name(),
                "global": v.is_global(),
                "range": [v.range().0, v.range().1],
            })).collect::<Vec<_>>(),
            "curves": settings.curves.iter().map(|c| json!({
                "name": c.name(),
                "variable": c.variable().name(),
                "parameter": format!("{:?}", c.parameter()),
                "points": c.points().iter().map(|p| [p.x, p.y]).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Categories ({}):", settings.categories.len());
    for category in &settings.categories {
        println!(
            "  {:<24} gain {:.3}{}",
            category.name(),
            category.gain(),
            if category.is_background_music() { "  [music]" } else { "" }
        );
    }
    println!("Variables ({}):", settings.variables.len());
    for variable in &settings.variables {
        let (min, max) = variable.range();
        println!(
            "  {:<24} {} [{}, {}]",
            variable.name(),
            if variable.is_global() { "global" } else { "cue   " },
            min,
            max
        );
    }
    println!("Curves ({}):", settings.curves.len());
    for curve in &settings.curves {
        println!(
            "  {:<24} {} -> {:?}, {} points",
            curve.name(),
            curve.variable().name(),
            curve.parameter(),
            curve.points().len()
        );
    }
    Ok(())
}

fn print_bank(engine: &AudioEngine, path: &Path, as_json: bool) -> Result<()> {
    let bank = SoundBank::new(engine, path)
        .with_context(|| format!("Failed to load sound bank {}", path.display()))?;

    if as_json {
        let value = json!({
            "name": bank.name(),
            "sounds": bank.sounds().iter().map(|s| json!({
                "category": s.category.name(),
                "priority": s.priority,
                "volume_db": s.volume_centibels as f32 / 100.0,
                "tracks": s.tracks.len(),
                "rpcs": s.rpcs.iter().map(|c| c.name()).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "cues": bank.cues().iter().map(|c| json!({
                "name": c.name(),
                "variation": format!("{:?}", c.variation()),
                "sounds": c.sound_indices(),
                "max_instances": c.instance_limit(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Sound bank '{}'", bank.name());
    println!("Sounds ({}):", bank.sounds().len());
    for (i, sound) in bank.sounds().iter().enumerate() {
        let waves: Vec<String> = sound
            .tracks
            .iter()
            .flat_map(|t| t.entries.iter())
            .map(|w| format!("{}#{}", w.bank_name, w.index))
            .collect();
        println!(
            "  [{:>3}] {:<16} {:+.1} dB  tracks {}  waves {}",
            i,
            sound.category.name(),
            sound.volume_centibels as f32 / 100.0,
            sound.tracks.len(),
            waves.join(", ")
        );
    }
    println!("Cues ({}):", bank.cues().len());
    for cue in bank.cues() {
        let limit = match cue.instance_limit() {
            Some(max) => max.to_string(),
            None => UNLIMITED_INSTANCES.to_string(),
        };
        println!(
            "  {:<32} {:?}  sounds {:?}  max {}",
            cue.name(),
            cue.variation(),
            cue.sound_indices(),
            limit
        );
    }
    Ok(())
}

fn print_waves(
    engine: &AudioEngine,
    path: &Path,
    stream: Option<StreamArg>,
    as_json: bool,
) -> Result<()> {
    let bank = match stream {
        Some(mode) => WaveBank::streaming(engine, path, mode.into()),
        None => WaveBank::new(engine, path),
    };
    engine.wait_for_io();
    if bank.state() != WaveBankState::Loaded {
        bail!("Wave bank {} did not load (see log)", path.display());
    }

    let sizes: Vec<usize> = (0..bank.entry_count())
        .filter_map(|i| bank.entry_size(i))
        .collect();

    if as_json {
        let value = json!({
            "name": bank.name(),
            "mode": bank.stream_mode().map_or("resident", StreamMode::folder),
            "sizes": sizes,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "Wave bank '{}' ({}), {} entries, {} bytes",
        bank.name(),
        bank.stream_mode().map_or("resident", StreamMode::folder),
        sizes.len(),
        sizes.iter().sum::<usize>()
    );
    for (i, size) in sizes.iter().enumerate() {
        println!("  [{:>4}] {} bytes", i, size);
    }
    Ok(())
}

fn eval_curve(engine: &AudioEngine, name: &str, inputs: &[f32], as_json: bool) -> Result<()> {
    let curve = engine.rpc(name)?;
    let outputs: Vec<f32> = inputs.iter().map(|&x| curve.evaluate(x)).collect();

    if as_json {
        let value = json!({
            "curve": curve.name(),
            "parameter": format!("{:?}", curve.parameter()),
            "values": inputs.iter().zip(&outputs).map(|(x, y)| [*x, *y]).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (x, y) in inputs.iter().zip(&outputs) {
        println!("{}({}) = {}", curve.name(), x, y);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYBACK
// ═══════════════════════════════════════════════════════════════════════════════

struct PlayArgs<'a> {
    bank: &'a Path,
    cue: &'a str,
    waves: &'a [PathBuf],
    streaming: &'a [PathBuf],
    distance: Option<f32>,
    ticks: u32,
}

fn play_cue(engine: &AudioEngine, backend: &MemoryBackend, args: PlayArgs<'_>) -> Result<()> {
    let mut wave_banks: Vec<WaveBank> = args
        .waves
        .iter()
        .map(|path| WaveBank::new(engine, path))
        .collect();
    wave_banks.extend(
        args.streaming
            .iter()
            .map(|path| WaveBank::streaming(engine, path, StreamMode::Streaming)),
    );
    engine.wait_for_io();
    for bank in &wave_banks {
        if !bank.is_loaded() {
            log::warn!("[Inspect] wave bank '{}' not loaded", bank.name());
        }
    }

    let sounds = SoundBank::new(engine, args.bank)
        .with_context(|| format!("Failed to load sound bank {}", args.bank.display()))?;
    let mut cue = sounds
        .get_cue(args.cue)
        .with_context(|| format!("No cue '{}' in '{}'", args.cue, sounds.name()))?;

    if let Some(distance) = args.distance {
        cue.set_variable("Distance", distance)?;
    }
    if !cue.play() {
        bail!("Cue '{}' refused to play", args.cue);
    }

    for tick in 1..=args.ticks {
        engine.wait_for_io();
        engine.tick();
        println!("tick {}: {} live voices", tick, engine.live_voice_count());
        for channel in backend.active_channels() {
            let Some(record) = backend.channel(channel) else {
                continue;
            };
            let Some(params) = record.params else {
                println!("  channel {}: no parameters yet", channel.0);
                continue;
            };
            println!(
                "  channel {}: volume {:.3}  low-pass {:.0} Hz (gain {:.3})  pitch x{:.3}  reverb {:.0}{}",
                channel.0,
                params.volume,
                params.low_pass_cutoff,
                low_pass_gain(params.low_pass_cutoff),
                semitones_to_ratio(params.pitch_semitones),
                params.reverb,
                if record.looping { "  looping" } else { "" }
            );
        }
    }

    let (in_use, fallbacks) = engine.stream_pool_usage();
    println!("stream buffers in use {}, heap fallbacks {}", in_use, fallbacks);
    cue.dispose();
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// RE-ENCODE CHECK
// ═══════════════════════════════════════════════════════════════════════════════

fn reencode(engine: &AudioEngine, settings_path: &Path, banks: &[PathBuf]) -> Result<()> {
    let mut failures = 0;

    let original = std::fs::read(settings_path)?;
    failures += report(settings_path, &original, &engine.settings().encode());

    for path in banks {
        let original = std::fs::read(path)?;
        let data = SoundBankData::parse(&original, engine.settings())
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        failures += report(path, &original, &data.encode());
    }

    if failures > 0 {
        bail!("{} file(s) did not re-encode identically", failures);
    }
    Ok(())
}

fn report(path: &Path, original: &[u8], encoded: &[u8]) -> usize {
    if original == encoded {
        println!("ok    {}", path.display());
        return 0;
    }
    let first_diff = original
        .iter()
        .zip(encoded)
        .position(|(a, b)| a != b)
        .unwrap_or(original.len().min(encoded.len()));
    println!(
        "DIFF  {} ({} vs {} bytes, first difference at offset {})",
        path.display(),
        original.len(),
        encoded.len(),
        first_diff
    );
    1
}
