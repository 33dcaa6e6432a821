//! tap-runner: headless front end for the tapcoin economy.
//!
//! Usage:
//!   tap-runner --player 123456 --config data/client.json --seconds 60
//!   tap-runner --player 123456 --ipc-mode
//!   tap-runner --offline --seed 7 --seconds 600 --cps 6

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tapcoin_core::{
    amount::{parse_amount, to_wire},
    catalog::UpgradeCatalog,
    clock::{Clock, ManualClock, SystemClock},
    config::ClientConfig,
    dispatch::{Dispatcher, InlineDispatcher, ThreadDispatcher},
    http::HttpAuthority,
    identity::resolve_player_id,
    memory::InMemoryAuthority,
    session::{GameSession, SessionPhase},
    store::ClientStore,
    wire::{PlayerProfile, SortKey},
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    State,
    Click {
        #[serde(default)]
        count: Option<u32>,
    },
    Buy {
        upgrade_id: String,
    },
    Leaderboard {
        sort: SortKey,
    },
    Transfer {
        receiver_username: String,
        amount: String,
    },
    History,
    Profile {
        profile: PlayerProfile,
    },
    Retry,
    DismissNotice,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let offline = args.iter().any(|a| a == "--offline");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let seed = parse_arg(&args, "--seed", 42u64);
    let seconds = parse_arg(&args, "--seconds", 300u64);
    let retries = parse_arg(&args, "--retries", 3u32);
    let cps = parse_arg(&args, "--cps", 6.0f64);
    let data_dir = str_arg(&args, "--data-dir").unwrap_or("./data");

    let config = match str_arg(&args, "--config") {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default().with_env_overrides(),
    };
    let catalog = Arc::new(UpgradeCatalog::load(data_dir).unwrap_or_else(|e| {
        log::warn!("{e}; using built-in catalog");
        UpgradeCatalog::builtin()
    }));
    let player_id = resolve_player_id(str_arg(&args, "--player"));

    let store = match &config.cache_path {
        Some(path) => {
            let store = ClientStore::open(path)?;
            store.migrate()?;
            Some(store)
        }
        None => None,
    };

    if !ipc_mode {
        println!("tapcoin tap-runner");
        println!("  player:    {player_id}");
        println!("  backend:   {}", if offline { "in-memory" } else { config.backend_url.as_str() });
        println!("  upgrades:  {}", catalog.len());
        println!("  started:   {}", chrono::Utc::now().to_rfc3339());
        println!();
    }

    if offline && !ipc_mode {
        return run_offline(player_id, catalog, &config, store, seed, seconds, cps);
    }

    let dispatcher: Box<dyn Dispatcher> = if offline {
        let authority = InMemoryAuthority::new(catalog.clone());
        Box::new(InlineDispatcher::new(Box::new(authority)))
    } else {
        let authority = HttpAuthority::new(&config.backend_url, config.request_timeout());
        Box::new(ThreadDispatcher::spawn(Box::new(authority))?)
    };

    let clock = SystemClock;
    let mut session = GameSession::start(
        player_id,
        catalog,
        dispatcher,
        &config,
        store,
        clock.now_millis(),
    );
    connect(&mut session, &clock, &config, retries)?;

    if ipc_mode {
        run_ipc_loop(&mut session, &clock, &config)?;
    } else {
        run_realtime(&mut session, &clock, &config, seconds);
        print_summary(&session, None);
    }

    session.flush_sync();
    session.frame(clock.now_millis());
    Ok(())
}

/// Drive frames until the startup fetch resolves. Offers `retries` retries.
fn connect(
    session: &mut GameSession,
    clock: &dyn Clock,
    config: &ClientConfig,
    retries: u32,
) -> Result<()> {
    let mut attempts = 0;
    loop {
        session.frame(clock.now_millis());
        match session.phase() {
            SessionPhase::Active => return Ok(()),
            SessionPhase::Connecting => thread::sleep(config.frame_interval()),
            SessionPhase::Disconnected => {
                let reason = session
                    .startup_error()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                if attempts >= retries {
                    anyhow::bail!("could not reach the backend: {reason}");
                }
                attempts += 1;
                eprintln!("connection failed ({reason}); retry {attempts}/{retries}");
                thread::sleep(Duration::from_secs(1));
                session.retry_connect();
            }
        }
    }
}

fn run_realtime(session: &mut GameSession, clock: &dyn Clock, config: &ClientConfig, seconds: u64) {
    let end = clock.now_millis() + (seconds as i64) * 1_000;
    let mut next_report = clock.now_millis();
    loop {
        let now = clock.now_millis();
        if now >= end {
            break;
        }
        session.frame(now);
        if now >= next_report {
            let view = session.view();
            println!(
                "  balance {} | +{}/s",
                view.balance.unwrap_or_default(),
                view.passive_rate.unwrap_or_default()
            );
            next_report = now + 10_000;
        }
        thread::sleep(config.frame_interval());
    }
}

fn run_ipc_loop(session: &mut GameSession, clock: &dyn Clock, config: &ClientConfig) -> Result<()> {
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut stdout = io::stdout();
    loop {
        session.frame(clock.now_millis());

        let line = match line_rx.try_recv() {
            Ok(line) => line,
            Err(mpsc::TryRecvError::Empty) => {
                thread::sleep(config.frame_interval());
                continue;
            }
            Err(mpsc::TryRecvError::Disconnected) => break, // EOF
        };
        if line.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        match handle_command(session, clock, cmd) {
            Ok(()) => writeln!(stdout, "{}", serde_json::to_string(&session.view())?)?,
            Err(e) => writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?,
        }
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(session: &mut GameSession, clock: &dyn Clock, cmd: IpcCommand) -> Result<()> {
    match cmd {
        IpcCommand::State | IpcCommand::Quit => {}
        IpcCommand::Click { count } => {
            for _ in 0..count.unwrap_or(1) {
                session.click(clock.now_millis())?;
            }
        }
        IpcCommand::Buy { upgrade_id } => {
            session.request_purchase(&upgrade_id)?;
        }
        IpcCommand::Leaderboard { sort } => {
            session.request_leaderboard(sort);
        }
        IpcCommand::Transfer { receiver_username, amount } => {
            let amount = parse_amount(&amount)
                .ok_or_else(|| anyhow::anyhow!("not a decimal amount: {amount}"))?;
            session.request_transfer(&receiver_username, amount)?;
        }
        IpcCommand::History => {
            session.request_history();
        }
        IpcCommand::Profile { profile } => {
            session.push_profile(profile);
        }
        IpcCommand::Retry => {
            session.retry_connect();
        }
        IpcCommand::DismissNotice => {
            session.clear_notice();
        }
    }
    Ok(())
}

/// Simulated play against the in-memory authority on a manual clock.
fn run_offline(
    player_id: String,
    catalog: Arc<UpgradeCatalog>,
    config: &ClientConfig,
    store: Option<ClientStore>,
    seed: u64,
    seconds: u64,
    cps: f64,
) -> Result<()> {
    let authority = InMemoryAuthority::new(catalog.clone());
    let dispatcher = InlineDispatcher::new(Box::new(authority.clone()));
    let clock = ManualClock::new(0);
    let mut session = GameSession::start(
        player_id.clone(),
        catalog,
        Box::new(dispatcher),
        config,
        store,
        clock.now_millis(),
    );
    session.frame(clock.now_millis());
    if session.phase() != SessionPhase::Active {
        anyhow::bail!("in-memory authority did not answer the startup fetch");
    }

    let frame_ms = config.frame_interval_ms.max(1) as i64;
    let click_p = (cps * frame_ms as f64 / 1_000.0).clamp(0.0, 1.0);
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut clicks = 0u64;
    let mut purchases = 0u64;

    let frames = seconds as i64 * 1_000 / frame_ms;
    for _ in 0..frames {
        let now = clock.advance(frame_ms);
        if rng.gen_bool(click_p) {
            session.click(now)?;
            clicks += 1;
        }
        if !session.sync_held() {
            if let Some(upgrade_id) = cheapest_affordable(&session) {
                if session.request_purchase(&upgrade_id).is_ok() {
                    purchases += 1;
                }
            }
        }
        session.frame(now);
    }
    session.flush_sync();
    session.frame(clock.now_millis());

    println!("  simulated:   {seconds}s, seed {seed}");
    println!("  clicks:      {clicks}");
    println!("  purchases:   {purchases}");
    print_summary(&session, authority.player(&player_id).map(|p| p.balance));
    Ok(())
}

fn cheapest_affordable(session: &GameSession) -> Option<String> {
    let engine = session.engine();
    engine
        .catalog()
        .iter()
        .filter_map(|def| {
            let cost: Decimal = engine.purchase_upgrade_locally(&def.id).ok()?;
            Some((cost, def.id.clone()))
        })
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, id)| id)
}

fn print_summary(session: &GameSession, authority_balance: Option<Decimal>) {
    let view = session.view();
    println!();
    println!("=== SESSION SUMMARY ===");
    println!("  player:        {}", view.player_id);
    println!("  balance:       {}", view.balance.unwrap_or_default());
    println!("  click value:   {}", view.click_value.unwrap_or_default());
    println!("  passive rate:  {}/s", view.passive_rate.unwrap_or_default());
    println!("  offline rate:  {}/s", view.offline_rate.unwrap_or_default());
    if let Some(balance) = authority_balance {
        println!("  authority:     {}", to_wire(balance));
    }
    println!();
    println!("=== UPGRADES ===");
    for upgrade in &view.upgrades {
        println!(
            "  {:<16} lvl {:>3} | next {}",
            upgrade.id, upgrade.level, upgrade.next_cost
        );
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
