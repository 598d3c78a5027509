//! Reading Buddies CLI - drive the buddy engine from a terminal.

mod platform;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use platform::{FileTransport, HeadlessEngine, LoggingAudioBackend};
use reading_buddies_core::{
    channel, AccessoryCategory, AccessoryInventory, Analytics, AnalyticsConfigUpdate,
    AnalyticsTransport, AnimationLoader, AssetSource, AudioController, BuddyController,
    BuddySession, CharacterType, Config, EventKind, EventSender, FileStore, FsAssetSource, Gesture,
    KeyValueStore, ProgressRecord, ProgressTracker,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Reading Buddies - grow a reading companion from an egg.
///
/// Tracks egg progress, manages the accessory inventory and audio
/// settings, and plays buddies headlessly. State is kept in a JSON file and
/// assets are read from a directory laid out like the web app's.
#[derive(Parser, Debug)]
#[command(name = "reading-buddies")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON file holding persisted state.
    #[arg(
        short = 's',
        long = "state",
        default_value = "reading-buddies-state.json",
        env = "READING_BUDDIES_STATE",
        global = true
    )]
    pub state: PathBuf,

    /// Directory that asset paths such as `/public/assets/...` resolve under.
    #[arg(
        short = 'a',
        long = "assets",
        default_value = ".",
        env = "READING_BUDDIES_ASSETS",
        global = true
    )]
    pub assets: PathBuf,

    /// Enable development helpers such as `egg simulate`.
    #[arg(long = "dev", env = "READING_BUDDIES_DEV", global = true)]
    pub dev: bool,

    /// Milliseconds the hatch animation takes.
    #[arg(long = "hatch-delay-ms", default_value = "2000", global = true)]
    pub hatch_delay_ms: u64,

    /// Enable debug logging. `RUST_LOG` takes precedence.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Convert CLI arguments to a Config.
    pub fn to_config(&self) -> Config {
        Config::new()
            .hatch_delay_ms(self.hatch_delay_ms)
            .dev_mode(self.dev)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Egg progress
    #[command(subcommand)]
    Egg(EggCommand),

    /// Accessory inventory
    #[command(subcommand)]
    Accessory(AccessoryCommand),

    /// Audio settings and playback
    #[command(subcommand)]
    Audio(AudioCommand),

    /// Play with a buddy
    #[command(subcommand)]
    Buddy(BuddyCommand),

    /// Analytics delivery
    #[command(subcommand)]
    Analytics(AnalyticsCommand),
}

impl Command {
    /// Whether the command emits events that the analytics batcher records.
    ///
    /// `analytics` commands own the stored analytics state themselves, so no
    /// batcher runs next to them.
    pub fn records_analytics(&self) -> bool {
        !matches!(self, Command::Analytics(_))
    }
}

#[derive(Subcommand, Debug)]
pub enum EggCommand {
    /// Start a new egg
    Start {
        subject: String,
        /// Milestone the egg is working towards
        #[arg(short, long, default_value = "read_3_days")]
        milestone: String,
        /// Progress needed to hatch
        #[arg(short, long)]
        target: Option<u32>,
    },

    /// Add reading progress to an egg
    Add { subject: String, amount: u32 },

    /// Hatch a ready egg
    Complete { subject: String },

    /// Show progress for one or all eggs
    Status { subject: Option<String> },

    /// Advance an egg by a step (requires --dev)
    Simulate { subject: String },
}

#[derive(Subcommand, Debug)]
pub enum AccessoryCommand {
    /// List the catalog
    List {
        /// Only show this category
        #[arg(short, long)]
        category: Option<AccessoryCategory>,
        /// Only show owned accessories
        #[arg(long)]
        owned: bool,
    },

    /// Unlock an accessory
    Unlock { id: String },

    /// Put an owned accessory on a buddy
    Equip { subject: String, id: String },

    /// Take an accessory off a buddy
    Unequip { subject: String, id: String },

    /// Grant the starter accessories
    Starter,

    /// Show how much of the catalog is unlocked
    Progress,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum AudioChannel {
    All,
    Voice,
    Sfx,
}

#[derive(Subcommand, Debug)]
pub enum AudioCommand {
    /// Show audio settings
    Show,

    /// Set the volume (0.0 - 1.0)
    Volume { volume: f32 },

    /// Enable audio output
    Enable {
        #[arg(value_enum, default_value = "all")]
        channel: AudioChannel,
    },

    /// Disable audio output
    Disable {
        #[arg(value_enum, default_value = "all")]
        channel: AudioChannel,
    },

    /// Set the voice-line locale
    Locale { locale: String },

    /// Play a gesture's voice line
    Play { subject: String, gesture: Gesture },
}

#[derive(Subcommand, Debug)]
pub enum BuddyCommand {
    /// Load a buddy and run gestures on it
    Play {
        subject: String,
        /// Gesture to trigger; repeatable
        #[arg(short, long = "gesture")]
        gestures: Vec<Gesture>,
        /// Hatch the egg before loading
        #[arg(long)]
        hatch: bool,
        /// Accessory to toggle; repeatable
        #[arg(short, long = "equip")]
        equip: Vec<String>,
        /// Switch to another character in the shared animation file
        #[arg(long = "switch")]
        switch: Option<CharacterType>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AnalyticsCommand {
    /// Retry delivery of backed-up events
    Flush,

    /// Print backed-up events
    Backup,

    /// Set or clear the file that receives analytics batches
    Endpoint {
        path: Option<String>,
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },
}

/// Handles shared by every command.
struct App {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    assets: Arc<dyn AssetSource>,
    events: EventSender,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(default)
        }))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.to_config();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&cli.state)
            .with_context(|| format!("cannot open state file {}", cli.state.display()))?,
    );
    let assets: Arc<dyn AssetSource> = Arc::new(FsAssetSource::new(&cli.assets));
    let transport: Arc<dyn AnalyticsTransport> = Arc::new(FileTransport);

    let (events, rx) = channel();
    let batcher = cli.command.records_analytics().then(|| {
        let analytics = Analytics::new(Arc::clone(&store), Some(Arc::clone(&transport)));
        tokio::spawn(analytics.run(rx))
    });
    let app = App {
        config,
        store,
        assets,
        events,
    };

    let outcome = match cli.command {
        Command::Egg(command) => run_egg(command, &app).await,
        Command::Accessory(command) => run_accessory(command, &app).await,
        Command::Audio(command) => run_audio(command, &app).await,
        Command::Buddy(command) => run_buddy(command, &app).await,
        Command::Analytics(command) => {
            let analytics = Analytics::new(Arc::clone(&app.store), Some(transport));
            run_analytics(command, analytics).await
        }
    };

    drop(app);
    if let Some(batcher) = batcher {
        batcher.await.context("analytics task failed")?;
    }
    outcome
}

fn print_record(record: &ProgressRecord) {
    println!(
        "{:<16} {:>3}% ({}/{}) milestone={}{}",
        record.subject_id,
        record.percentage(),
        record.current,
        record.target,
        record.milestone,
        if record.ready { " READY TO HATCH" } else { "" }
    );
}

async fn run_egg(command: EggCommand, app: &App) -> Result<()> {
    let mut tracker = ProgressTracker::new(
        Arc::clone(&app.store),
        Arc::clone(&app.assets),
        app.events.clone(),
        app.config.clone(),
    );
    tracker.initialize().await;

    match command {
        EggCommand::Start {
            subject,
            milestone,
            target,
        } => {
            match target {
                Some(target) => tracker.start(&subject, &milestone, target),
                None => tracker.start_default(&subject, &milestone),
            }
            if let Some(record) = tracker.progress(&subject) {
                print_record(record);
            }
        }
        EggCommand::Add { subject, amount } => {
            tracker.add_progress(&subject, amount);
            match tracker.progress(&subject) {
                Some(record) => print_record(record),
                None => bail!("no egg started for {}", subject),
            }
        }
        EggCommand::Complete { subject } => {
            let milestone = tracker.progress(&subject).map(|r| r.milestone.clone());
            if !tracker.complete(&subject) {
                bail!("the egg for {} is not ready to hatch", subject);
            }
            if let Some(milestone) = milestone {
                app.events.analytics(
                    EventKind::ReadingMilestoneMet,
                    json!({ "milestone": milestone, "progress": 100 }),
                );
            }
            println!("{} hatched!", subject);
        }
        EggCommand::Status { subject } => match subject {
            Some(subject) => match tracker.progress(&subject) {
                Some(record) => print_record(record),
                None => println!("{:<16} no egg", subject),
            },
            None => {
                let records = tracker.all_progress();
                if records.is_empty() {
                    println!("No eggs yet.");
                }
                for record in records {
                    print_record(record);
                }
            }
        },
        EggCommand::Simulate { subject } => {
            if !app.config.dev_mode {
                bail!("simulate requires --dev");
            }
            tracker.simulate_progress(&subject);
            match tracker.progress(&subject) {
                Some(record) => print_record(record),
                None => bail!("no egg started for {}", subject),
            }
        }
    }
    Ok(())
}

async fn run_accessory(command: AccessoryCommand, app: &App) -> Result<()> {
    let mut inventory = AccessoryInventory::new(
        Arc::clone(&app.store),
        Arc::clone(&app.assets),
        app.events.clone(),
        &app.config,
    );
    inventory.initialize().await;

    match command {
        AccessoryCommand::List { category, owned } => {
            let listed = match category {
                Some(category) => inventory.by_category(category),
                None => inventory.all(),
            };
            for accessory in listed {
                let is_owned = inventory.is_owned(&accessory.id);
                if owned && !is_owned {
                    continue;
                }
                println!(
                    "{} {:<16} {:<20} {:<8} {:<9} {}",
                    if is_owned { "*" } else { " " },
                    accessory.id,
                    accessory.name,
                    accessory.category,
                    accessory.rarity.as_str(),
                    accessory.unlock_milestone
                );
            }
        }
        AccessoryCommand::Unlock { id } => {
            if !inventory.unlock(&id) {
                bail!("unknown accessory {}", id);
            }
            println!("Unlocked {}", id);
        }
        AccessoryCommand::Equip { subject, id } => {
            if !inventory.equip(&subject, &id) {
                bail!("cannot equip {}: not owned or not in the catalog", id);
            }
            println!("{} is wearing {}", subject, id);
        }
        AccessoryCommand::Unequip { subject, id } => {
            if !inventory.unequip(&subject, &id) {
                bail!("{} is not wearing {}", subject, id);
            }
            println!("{} took off {}", subject, id);
        }
        AccessoryCommand::Starter => {
            inventory.grant_starter_accessories();
            for accessory in inventory.owned() {
                println!("* {}", accessory.id);
            }
        }
        AccessoryCommand::Progress => {
            let progress = inventory.unlock_progress();
            println!(
                "{}/{} unlocked ({}%)",
                progress.unlocked, progress.total, progress.percentage
            );
        }
    }
    Ok(())
}

fn audio_controller(app: &App) -> AudioController {
    AudioController::new(
        Arc::new(LoggingAudioBackend::new()),
        Arc::clone(&app.assets),
        Arc::clone(&app.store),
        app.events.clone(),
        &app.config,
    )
}

async fn run_audio(command: AudioCommand, app: &App) -> Result<()> {
    let mut audio = audio_controller(app);

    match command {
        AudioCommand::Show => {}
        AudioCommand::Volume { volume } => audio.set_volume(volume),
        AudioCommand::Enable { channel } => set_channel(&mut audio, channel, true),
        AudioCommand::Disable { channel } => set_channel(&mut audio, channel, false),
        AudioCommand::Locale { locale } => audio.set_locale(locale),
        AudioCommand::Play { subject, gesture } => {
            audio.initialize().await;
            match audio.transcript(&subject, gesture) {
                Some(transcript) => println!("{}: \"{}\"", subject, transcript),
                None => println!("{} has nothing to say for {}", subject, gesture),
            }
            audio.play_gesture_audio(&subject, gesture).await;
            audio.cleanup();
            return Ok(());
        }
    }

    println!("{}", serde_json::to_string_pretty(audio.settings())?);
    Ok(())
}

fn set_channel(audio: &mut AudioController, channel: AudioChannel, enabled: bool) {
    match channel {
        AudioChannel::All => audio.set_enabled(enabled),
        AudioChannel::Voice => audio.set_voice_lines_enabled(enabled),
        AudioChannel::Sfx => audio.set_sfx_enabled(enabled),
    }
}

async fn run_buddy(command: BuddyCommand, app: &App) -> Result<()> {
    let BuddyCommand::Play {
        subject,
        gestures,
        hatch,
        equip,
        switch,
    } = command;

    let engine = Arc::new(HeadlessEngine::new(Arc::clone(&app.assets)));
    let loader = Arc::new(AnimationLoader::new(engine));
    let buddy = BuddyController::new(
        Arc::clone(&loader),
        Arc::clone(&app.assets),
        app.events.clone(),
        app.config.clone(),
    );
    let states = buddy.subscribe(|state| println!("state: {}", state));

    let mut audio = audio_controller(app);
    audio.initialize().await;
    let mut session = BuddySession::new(buddy, audio);

    if hatch {
        session.buddy().hatch();
        tokio::time::sleep(app.config.hatch_delay + Duration::from_millis(50)).await;
    }

    session
        .load(&subject)
        .await
        .with_context(|| format!("failed to load buddy {}", subject))?;

    if let Some(variant) = switch {
        session
            .buddy()
            .switch_character(variant)
            .await
            .with_context(|| format!("failed to switch to {}", variant))?;
    }

    for accessory in &equip {
        session.buddy().equip(accessory);
    }

    for gesture in gestures {
        if let Some(transcript) = session.audio().transcript(&subject, gesture) {
            println!("  \"{}\"", transcript);
        }
        session.trigger_gesture(gesture).await;
    }

    let buddy = session.buddy();
    if let Some(config) = buddy.config() {
        println!("{} ({})", config.name, config.artboard_name);
    }
    let equipped: Vec<String> = buddy
        .equipped_accessories()
        .into_iter()
        .map(|a| a.id)
        .collect();
    if !equipped.is_empty() {
        println!("wearing: {}", equipped.join(", "));
    }
    println!("interactions: {}", buddy.interactions().len());

    states.unsubscribe();
    session.cleanup();
    loader.cleanup_all();
    Ok(())
}

async fn run_analytics(command: AnalyticsCommand, mut analytics: Analytics) -> Result<()> {
    match command {
        AnalyticsCommand::Flush => {
            let count = analytics.requeue_backup();
            analytics.flush().await;
            let left = analytics.backup().len();
            println!("retried {} events, {} still backed up", count, left);
        }
        AnalyticsCommand::Backup => {
            println!("{}", serde_json::to_string_pretty(&analytics.backup())?);
        }
        AnalyticsCommand::Endpoint { path, clear } => {
            if clear || path.is_some() {
                analytics.set_config(AnalyticsConfigUpdate {
                    endpoint: Some(path),
                    ..Default::default()
                });
            }
            match &analytics.config().endpoint {
                Some(endpoint) => println!("endpoint: {}", endpoint),
                None => println!("no endpoint; events are kept in the backup"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_commands_run_without_batcher() {
        let flush = Cli::try_parse_from(["reading-buddies", "analytics", "flush"]).unwrap();
        assert!(!flush.command.records_analytics());

        let endpoint =
            Cli::try_parse_from(["reading-buddies", "analytics", "endpoint", "--clear"]).unwrap();
        assert!(!endpoint.command.records_analytics());

        let egg = Cli::try_parse_from(["reading-buddies", "egg", "status"]).unwrap();
        assert!(egg.command.records_analytics());
    }

    #[test]
    fn test_cli_parses_buddy_play() {
        let cli = Cli::try_parse_from([
            "reading-buddies",
            "--assets",
            "/srv/assets",
            "buddy",
            "play",
            "kitten-ninja",
            "-g",
            "wave",
            "-g",
            "cheer",
            "--equip",
            "red-hat",
            "--switch",
            "puppy-wizard",
        ])
        .unwrap();

        assert_eq!(cli.assets, PathBuf::from("/srv/assets"));
        let Command::Buddy(BuddyCommand::Play {
            subject,
            gestures,
            equip,
            switch,
            hatch,
        }) = cli.command
        else {
            panic!("expected buddy play");
        };
        assert_eq!(subject, "kitten-ninja");
        assert_eq!(gestures, vec![Gesture::Wave, Gesture::Cheer]);
        assert_eq!(equip, vec!["red-hat".to_string()]);
        assert_eq!(switch, Some(CharacterType::PuppyWizard));
        assert!(!hatch);
    }

    #[test]
    fn test_cli_rejects_unknown_gesture() {
        let parsed = Cli::try_parse_from([
            "reading-buddies",
            "audio",
            "play",
            "kitten-ninja",
            "moonwalk",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_to_config_maps_flags() {
        let cli = Cli::try_parse_from([
            "reading-buddies",
            "--dev",
            "--hatch-delay-ms",
            "10",
            "egg",
            "status",
        ])
        .unwrap();
        let config = cli.to_config();
        assert!(config.dev_mode);
        assert_eq!(config.hatch_delay, Duration::from_millis(10));
    }
}
