// chameleon -- command-line tool for a Knox Chameleon64i matrix behind a
// serial-to-ethernet bridge. Stands in for a home-automation host: one-shot
// commands, a batch poll, a periodic watch loop and a stress test.
//
// Usage:
//   chameleon --host 192.168.1.50 identify
//   chameleon --host 192.168.1.50 zone 4
//   chameleon --config chameleon.json poll --concurrency 2
//   chameleon --host 192.168.1.50 volume level 4 0.5
//   chameleon --host 192.168.1.50 input set 4 2
//   chameleon --config chameleon.json watch --interval 30
//   chameleon --fake stress --iterations 200 --concurrency 4

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chameleon::{
    BalanceShift, ChameleonBuilder, ChameleonClient, DeviceConfig, InputId, PatternId, ToneLevel,
    Volume, ZoneId, ZoneState,
};
use chameleon_test_harness::{FakeChameleon, FakeOptions};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Control a Knox Chameleon64i matrix from the command line.
#[derive(Parser)]
#[command(name = "chameleon", version, about)]
struct Cli {
    /// Bridge host name or address. Overrides the config file.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Bridge TCP port (default: 8899, or the config file's).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// JSON config-entry file with host, zones and inputs.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Per-command timeout in milliseconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Attempts per command, including the first.
    #[arg(long, global = true)]
    attempts: Option<u32>,

    /// Run against an in-process simulated device instead of a real bridge.
    #[arg(long, global = true)]
    fake: bool,

    /// Verbose logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the sign-on message and installed cards.
    Identify,

    /// Run one health check round-trip.
    Health,

    /// Print the full state of one zone.
    Zone {
        zone: ZoneId,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Input routing.
    Input {
        #[command(subcommand)]
        action: InputAction,
    },

    /// Volume operations.
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },

    /// Mute operations.
    Mute {
        #[command(subcommand)]
        action: MuteAction,
    },

    /// Bass, treble and balance.
    Tone {
        #[command(subcommand)]
        action: ToneAction,
    },

    /// Poll the state of many zones at once.
    Poll {
        /// Zones to poll, e.g. "1-8,12". Default: configured zones, else all 64.
        #[arg(long)]
        zones: Option<String>,

        /// Zone queries in flight at once.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Poll periodically and print events until Ctrl-C.
    Watch {
        /// Seconds between polls (clamped to 10-300). Default: config or 60.
        #[arg(long)]
        interval: Option<u64>,

        /// Zones to poll, e.g. "1-8,12".
        #[arg(long)]
        zones: Option<String>,
    },

    /// Print the full crosspoint map.
    Map,

    /// Crosspoint patterns.
    Pattern {
        #[command(subcommand)]
        action: PatternAction,
    },

    /// Send one raw command line and print the reply.
    Raw { text: String },

    /// Stress test: concurrent random volume writes with read-back.
    Stress {
        /// Write/read cycles per worker.
        #[arg(long, default_value_t = 100)]
        iterations: u32,

        /// Concurrent workers; worker N uses zone N.
        #[arg(long, default_value_t = 4)]
        concurrency: u8,
    },
}

#[derive(Subcommand)]
enum InputAction {
    /// Print the input routed to a zone.
    Get { zone: ZoneId },
    /// Route an input (by number or configured name) to a zone.
    Set {
        zone: ZoneId,
        input: String,
        /// Route video only.
        #[arg(long, conflicts_with = "audio_only")]
        video_only: bool,
        /// Route audio only.
        #[arg(long)]
        audio_only: bool,
    },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Print a zone's volume in device units and as a level.
    Get { zone: ZoneId },
    /// Set device volume, 0 (loudest) to 63 (quietest).
    Set { zone: ZoneId, volume: Volume },
    /// Set volume as a level, 0.0 (silent) to 1.0 (full).
    Level { zone: ZoneId, level: f64 },
    /// Step louder.
    Up {
        zone: ZoneId,
        #[arg(long, default_value_t = 1)]
        steps: u8,
    },
    /// Step quieter.
    Down {
        zone: ZoneId,
        #[arg(long, default_value_t = 1)]
        steps: u8,
    },
}

#[derive(Subcommand)]
enum MuteAction {
    Get { zone: ZoneId },
    On { zone: ZoneId },
    Off { zone: ZoneId },
}

#[derive(Subcommand)]
enum ToneAction {
    /// Set bass, -7 to 7.
    Bass {
        zone: ZoneId,
        #[arg(allow_negative_numbers = true)]
        level: i8,
    },
    /// Set treble, -7 to 7.
    Treble {
        zone: ZoneId,
        #[arg(allow_negative_numbers = true)]
        level: i8,
    },
    /// Shift balance: left, right or center.
    Balance { zone: ZoneId, direction: String },
}

#[derive(Subcommand)]
enum PatternAction {
    /// Store the current routing in a slot (1-20).
    Store { slot: u8 },
    /// Recall a stored slot (1-20).
    Recall { slot: u8 },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a zone list like "1-8,12,20-22".
fn parse_zone_list(s: &str) -> Result<Vec<ZoneId>> {
    let mut zones = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: ZoneId = lo.trim().parse().with_context(|| format!("bad zone range {part:?}"))?;
                let hi: ZoneId = hi.trim().parse().with_context(|| format!("bad zone range {part:?}"))?;
                if lo > hi {
                    bail!("zone range {part:?} is reversed");
                }
                for z in lo.get()..=hi.get() {
                    zones.push(ZoneId::new(z)?);
                }
            }
            None => zones.push(part.parse().with_context(|| format!("bad zone {part:?}"))?),
        }
    }
    let mut seen = HashSet::new();
    zones.retain(|zone| seen.insert(*zone));
    if zones.is_empty() {
        bail!("zone list {s:?} is empty");
    }
    Ok(zones)
}

fn parse_balance(s: &str) -> Result<BalanceShift> {
    match s.to_ascii_lowercase().as_str() {
        "left" | "l" => Ok(BalanceShift::Left),
        "right" | "r" => Ok(BalanceShift::Right),
        "center" | "centre" | "c" => Ok(BalanceShift::Center),
        other => bail!("unknown balance direction {other:?} (left, right, center)"),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Everything a command needs: the client, the config it was built from,
/// and the simulator when running with `--fake`.
struct Session {
    client: ChameleonClient,
    config: DeviceConfig,
    fake: Option<FakeChameleon>,
}

impl Session {
    async fn open(cli: &Cli) -> Result<Session> {
        let mut config = match &cli.config {
            Some(path) => DeviceConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DeviceConfig::new(""),
        };

        let fake = if cli.fake {
            let device = FakeChameleon::start_with(FakeOptions::default()).await?;
            info!(addr = %device.addr(), "Started simulated Chameleon64i");
            config.host = device.host();
            config.port = device.port();
            Some(device)
        } else {
            if let Some(host) = &cli.host {
                config.host = host.clone();
            }
            if let Some(port) = cli.port {
                config.port = port;
            }
            None
        };
        if config.host.trim().is_empty() {
            bail!("no bridge host: pass --host, --config or --fake");
        }
        if let Some(ms) = cli.timeout {
            config.command_timeout_ms = Some(ms);
        }
        if let Some(n) = cli.attempts {
            config.max_attempts = Some(n);
        }
        config.validate()?;

        let client = ChameleonBuilder::from_config(&config).build()?;
        Ok(Session { client, config, fake })
    }

    fn zone_label(&self, zone: ZoneId) -> String {
        match self.config.zone_name(zone) {
            Some(name) => format!("{zone:>2} {name}"),
            None => format!("{zone:>2}"),
        }
    }

    fn input_label(&self, input: Option<InputId>) -> String {
        match input {
            Some(id) => match self.config.input_name(id) {
                Some(name) => format!("{id} ({name})"),
                None => id.to_string(),
            },
            None => "?".to_string(),
        }
    }

    /// Resolve an input given by number or configured name.
    fn resolve_input(&self, s: &str) -> Result<InputId> {
        if let Ok(id) = s.parse::<InputId>() {
            return Ok(id);
        }
        self.config
            .input_by_name(s)
            .with_context(|| format!("no input numbered or named {s:?}"))
    }

    fn poll_zones(&self, arg: Option<&str>) -> Result<Vec<ZoneId>> {
        match arg {
            Some(list) => parse_zone_list(list),
            None if !self.config.zones.is_empty() => Ok(self.config.zone_ids()),
            None => Ok(ZoneId::all().collect()),
        }
    }

    async fn close(self) {
        self.client.disconnect().await.ok();
        if let Some(device) = self.fake {
            device.shutdown().await;
        }
    }
}

fn format_state(session: &Session, state: &ZoneState) -> String {
    let volume = match state.volume {
        Some(v) => format!("{:>2} ({:>3.0}%)", v.get(), v.to_level() * 100.0),
        None => "  ?       ".to_string(),
    };
    format!(
        "zone {:<16} input {:<12} volume {}  mute {}",
        session.zone_label(state.zone),
        session.input_label(state.input),
        volume,
        state.mute
    )
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_identify(client: &ChameleonClient) -> Result<()> {
    let identity = client.identify().await?;
    println!("{identity}");
    match client.list_cards().await {
        Ok(cards) => {
            for card in cards {
                println!("  {card}");
            }
        }
        Err(e) => warn!(error = %e, "Card list unavailable"),
    }
    Ok(())
}

async fn cmd_health(client: &ChameleonClient) -> Result<()> {
    let start = Instant::now();
    if client.health_check().await {
        println!("healthy ({} ms)", start.elapsed().as_millis());
        Ok(())
    } else {
        bail!("health check failed");
    }
}

async fn cmd_zone(session: &Session, zone: ZoneId, json: bool) -> Result<()> {
    let state = session.client.get_zone_state(zone).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("{}", format_state(session, &state));
        if let (Some(bass), Some(treble)) = (state.bass, state.treble) {
            println!("  bass {bass:+}  treble {treble:+}");
        }
        if let (Some(left), Some(right)) = (state.balance_left, state.balance_right) {
            println!("  balance L{left} R{right}");
        }
        if let Some(loudness) = state.loudness {
            println!("  loudness {}", if loudness { "on" } else { "off" });
        }
    }
    Ok(())
}

async fn cmd_input(session: &Session, action: &InputAction) -> Result<()> {
    let client = &session.client;
    match action {
        InputAction::Get { zone } => {
            let entry = client.get_crosspoint(*zone).await?;
            println!(
                "zone {}: video {}  audio {}",
                session.zone_label(*zone),
                session.input_label(Some(entry.video)),
                session.input_label(Some(entry.audio))
            );
        }
        InputAction::Set {
            zone,
            input,
            video_only,
            audio_only,
        } => {
            let input = session.resolve_input(input)?;
            if *video_only {
                client.set_video_input(*zone, input).await?;
            } else if *audio_only {
                client.set_audio_input(*zone, input).await?;
            } else {
                client.set_input(*zone, input).await?;
            }
            println!("zone {} <- {}", session.zone_label(*zone), session.input_label(Some(input)));
        }
    }
    Ok(())
}

async fn cmd_volume(client: &ChameleonClient, action: &VolumeAction) -> Result<()> {
    match action {
        VolumeAction::Get { zone } => match client.get_volume(*zone).await? {
            Some(v) => println!("{} (level {:.3})", v.get(), v.to_level()),
            None => println!("unknown (zone reports no valid volume)"),
        },
        VolumeAction::Set { zone, volume } => {
            client.set_volume(*zone, *volume).await?;
            println!("{}", volume.get());
        }
        VolumeAction::Level { zone, level } => {
            let volume = client.set_volume_level(*zone, *level).await?;
            println!("level {level:.3} -> device {}", volume.get());
        }
        VolumeAction::Up { zone, steps } => {
            client.volume_up(*zone, *steps).await?;
        }
        VolumeAction::Down { zone, steps } => {
            client.volume_down(*zone, *steps).await?;
        }
    }
    Ok(())
}

async fn cmd_mute(client: &ChameleonClient, action: &MuteAction) -> Result<()> {
    match action {
        MuteAction::Get { zone } => println!("{}", client.get_mute(*zone).await?),
        MuteAction::On { zone } => client.set_mute(*zone, true).await?,
        MuteAction::Off { zone } => client.set_mute(*zone, false).await?,
    }
    Ok(())
}

async fn cmd_tone(client: &ChameleonClient, action: &ToneAction) -> Result<()> {
    match action {
        ToneAction::Bass { zone, level } => client.set_bass(*zone, ToneLevel::new(*level)?).await?,
        ToneAction::Treble { zone, level } => {
            client.set_treble(*zone, ToneLevel::new(*level)?).await?
        }
        ToneAction::Balance { zone, direction } => {
            client.shift_balance(*zone, parse_balance(direction)?).await?
        }
    }
    Ok(())
}

async fn cmd_poll(session: &Session, zones: &[ZoneId], json: bool) -> Result<()> {
    let start = Instant::now();
    let batch = session.client.get_all_zone_states(zones).await;
    let elapsed = start.elapsed();

    if json {
        let states: Vec<&ZoneState> = batch.states().collect();
        println!("{}", serde_json::to_string_pretty(&states)?);
    } else {
        for state in batch.states() {
            println!("{}", format_state(session, state));
        }
    }
    for (zone, err) in batch.failures() {
        eprintln!("zone {}: {err}", session.zone_label(zone));
    }
    eprintln!(
        "{} of {} zones in {:.2} s",
        batch.success_count(),
        batch.len(),
        elapsed.as_secs_f64()
    );
    if batch.success_count() == 0 && !batch.is_empty() {
        bail!("no zone answered");
    }
    Ok(())
}

async fn cmd_watch(session: &Session, zones: &[ZoneId], interval: Duration) -> Result<()> {
    let mut events = session.client.subscribe();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Vec<Option<ZoneState>> = vec![None; zones.len()];

    println!("Polling {} zones every {} s (Ctrl-C to stop)...", zones.len(), interval.as_secs());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let batch = session.client.get_all_zone_states(zones).await;
                for (i, (zone, result)) in batch.into_results().into_iter().enumerate() {
                    match result {
                        Ok(state) => {
                            if last[i].as_ref() != Some(&state) {
                                println!("{}", format_state(session, &state));
                            }
                            last[i] = Some(state);
                        }
                        Err(e) => warn!(zone = %zone, error = %e, "Zone unavailable"),
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("[event] {event:?}"),
                Err(RecvError::Lagged(n)) => println!("[warning] missed {n} events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping.");
                break;
            }
        }
    }
    Ok(())
}

async fn cmd_map(session: &Session) -> Result<()> {
    let entries = session.client.get_crosspoint_map().await?;
    for entry in entries {
        println!(
            "zone {:<16} video {:<12} audio {}",
            session.zone_label(entry.zone),
            session.input_label(Some(entry.video)),
            session.input_label(Some(entry.audio))
        );
    }
    Ok(())
}

async fn cmd_pattern(client: &ChameleonClient, action: &PatternAction) -> Result<()> {
    match action {
        PatternAction::Store { slot } => client.store_pattern(PatternId::new(*slot)?).await?,
        PatternAction::Recall { slot } => client.recall_pattern(PatternId::new(*slot)?).await?,
    }
    Ok(())
}

async fn cmd_raw(client: &ChameleonClient, text: &str) -> Result<()> {
    let timeout = client.connection().config().command_timeout;
    let response = client.send_raw(text, timeout).await?;
    for line in &response.lines {
        println!("{line}");
    }
    println!("[{:?}]", response.status);
    Ok(())
}

async fn cmd_stress(client: &ChameleonClient, iterations: u32, concurrency: u8) -> Result<()> {
    if concurrency == 0 || concurrency > 64 {
        bail!("concurrency must be 1-64");
    }
    let zones: Vec<ZoneId> = (1..=concurrency).map(ZoneId::new).collect::<Result<_, _>>()?;

    // Remember each zone's volume so it can be restored afterwards.
    let mut originals = Vec::with_capacity(zones.len());
    for &zone in &zones {
        originals.push((zone, client.get_volume(zone).await?));
    }
    println!("Stress test: {iterations} cycles x {concurrency} workers");

    let start = Instant::now();
    let mut workers = tokio::task::JoinSet::new();
    for &zone in &zones {
        let client = client.clone();
        workers.spawn(async move {
            let mut failures = 0u32;
            for i in 1..=iterations {
                let target = match Volume::new(rand::thread_rng().gen_range(0..=63)) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Err(e) = client.set_volume(zone, target).await {
                    eprintln!("[zone {zone} {i}/{iterations}] set failed: {e}");
                    failures += 1;
                    continue;
                }
                match client.get_volume(zone).await {
                    Ok(Some(v)) if v == target => {}
                    Ok(other) => {
                        eprintln!(
                            "[zone {zone} {i}/{iterations}] mismatch: set {} read {other:?}",
                            target.get()
                        );
                        failures += 1;
                    }
                    Err(e) => {
                        eprintln!("[zone {zone} {i}/{iterations}] get failed: {e}");
                        failures += 1;
                    }
                }
            }
            failures
        });
    }

    let mut failures = 0u32;
    while let Some(joined) = workers.join_next().await {
        failures += joined.context("stress worker panicked")?;
    }
    let elapsed = start.elapsed();
    let total = iterations * u32::from(concurrency);
    let rate = if elapsed.as_secs_f64() > 0.0 {
        f64::from(total) / elapsed.as_secs_f64()
    } else {
        0.0
    };

    println!();
    println!("Results:");
    println!("  Total cycles:   {total}");
    println!("  Failures:       {failures}");
    println!("  Elapsed:        {:.3} s", elapsed.as_secs_f64());
    println!("  Rate:           {rate:.1} cycles/sec");

    for (zone, original) in originals {
        if let Some(volume) = original {
            if let Err(e) = client.set_volume(zone, volume).await {
                eprintln!("Warning: failed to restore zone {zone}: {e}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} out of {total} stress cycles failed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut session = Session::open(&cli).await?;
    let client = session.client.clone();

    let result = match &cli.command {
        Command::Identify => cmd_identify(&client).await,
        Command::Health => cmd_health(&client).await,
        Command::Zone { zone, json } => cmd_zone(&session, *zone, *json).await,
        Command::Input { action } => cmd_input(&session, action).await,
        Command::Volume { action } => cmd_volume(&client, action).await,
        Command::Mute { action } => cmd_mute(&client, action).await,
        Command::Tone { action } => cmd_tone(&client, action).await,
        Command::Poll {
            zones,
            concurrency,
            json,
        } => {
            let zones = session.poll_zones(zones.as_deref())?;
            if let Some(n) = concurrency {
                session.config.poll_concurrency = Some(*n);
                session.config.validate()?;
                session.client = ChameleonBuilder::from_config(&session.config).build()?;
            }
            cmd_poll(&session, &zones, *json).await
        }
        Command::Watch { interval, zones } => {
            let zones = session.poll_zones(zones.as_deref())?;
            if let Some(secs) = interval {
                session.config.scan_interval_secs = *secs;
            }
            let interval = session.config.scan_interval();
            cmd_watch(&session, &zones, interval).await
        }
        Command::Map => cmd_map(&session).await,
        Command::Pattern { action } => cmd_pattern(&client, action).await,
        Command::Raw { text } => cmd_raw(&client, text).await,
        Command::Stress {
            iterations,
            concurrency,
        } => cmd_stress(&client, *iterations, *concurrency).await,
    };

    client.disconnect().await.ok();
    session.close().await;
    result
}
