use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use realtime_car_demo::config::{load_session_config, load_startup_config};
use realtime_car_demo::logging::init_logging;
use realtime_car_demo::session::{
    ConnectionSettings, SessionController, SessionNotification, WsTransport,
};
use realtime_car_demo::vehicle::drive_cycle::{DriveSimulator, UrbanCycle};
use realtime_car_demo::{ConfigOverride, SessionConfig, VehicleStore};

/// Inbound messages handled per loop iteration before the tick gets a turn
const MAX_EVENTS_PER_ITERATION: usize = 32;
const IDLE_SLEEP: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "realtime-car-demo",
    version,
    about = "Talk to a realtime model that drives a simulated car"
)]
struct Cli {
    /// Realtime endpoint, e.g. wss://api.openai.com/v1/realtime
    #[arg(long, env = "REALTIME_ENDPOINT", default_value = "")]
    endpoint: String,

    #[arg(long, env = "REALTIME_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Deployment name for hosted endpoints
    #[arg(long, env = "REALTIME_DEPLOYMENT")]
    deployment: Option<String>,

    /// Session config document (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drive-cycle tick interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Page that receives the metrics export as a query string
    #[arg(long)]
    report_url: Option<String>,

    /// Connect right away instead of waiting for /connect
    #[arg(long)]
    connect: bool,
}

enum Flow {
    Continue,
    Quit,
}

struct App {
    session: SessionController,
    config: SessionConfig,
    settings: ConnectionSettings,
    report_url: Option<String>,
}

const HELP: &str = "\
Commands:
  /connect                 open the session with the current config
  /disconnect              close the session
  /status                  vehicle state
  /metrics                 usage and latency totals
  /export                  metrics as a query string (opens --report-url if set)
  /config                  show the session config document
  /config load <path>      replace the config from a file
  /config raw <json>       replace the config from inline JSON
  /set <field> <value>     model | voice | instructions | threshold
  /battery <pct>           override battery level
  /speed <kmh>             override speed
  /log [n]                 last n audit entries (default 20)
  /quit
Anything else is sent to the model as a user message.";

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    // --- CONFIG ---
    let config = load_startup_config(cli.config.as_deref())?;
    let mut settings = ConnectionSettings::new(cli.endpoint, cli.api_key);
    settings.deployment = cli.deployment.filter(|d| !d.trim().is_empty());

    // --- STATE ---
    let vehicle = VehicleStore::default();
    let mut simulator = DriveSimulator::new(
        Box::new(UrbanCycle),
        Duration::from_millis(cli.tick_ms.max(100)),
    );
    let (session, notifications) = SessionController::new(Box::new(WsTransport), vehicle.clone());

    let mut app = App {
        session,
        config,
        settings,
        report_url: cli.report_url,
    };

    println!("realtime-car-demo. Type /help for commands.");
    if cli.connect {
        connect(&mut app);
    }

    // --- EVENT LOOP ---
    let input = spawn_stdin_reader();
    loop {
        for _ in 0..MAX_EVENTS_PER_ITERATION {
            if !app.session.poll() {
                break;
            }
        }

        for notification in notifications.try_iter() {
            print_notification(&notification);
        }

        simulator.poll(Instant::now(), &vehicle);

        match input.try_recv() {
            Ok(line) => {
                if let Flow::Quit = handle_line(&mut app, line.trim()) {
                    break;
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        if !app.session.is_connected() {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    app.session.disconnect();
    for notification in notifications.try_iter() {
        print_notification(&notification);
    }
    Ok(())
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_notification(notification: &SessionNotification) {
    match notification {
        SessionNotification::Open => println!("* session open"),
        SessionNotification::Closed => println!("* session closed"),
        SessionNotification::Error(message) => println!("! {}", message),
        SessionNotification::Event(kind) => tracing::debug!("[Session] event {}", kind),
    }
}

fn connect(app: &mut App) {
    // Failures are already reported through notifications and the audit log
    let _ = app.session.connect(&app.settings, &app.config);
}

fn adopt_config(app: &mut App, next: SessionConfig) {
    app.config = next;
    if app.session.is_connected() {
        println!("Config updated; it applies from the next /connect.");
    } else {
        println!("Config updated.");
    }
}

fn handle_line(app: &mut App, line: &str) -> Flow {
    if line.is_empty() {
        return Flow::Continue;
    }
    if !line.starts_with('/') {
        if let Err(e) = app.session.send_user_text(line) {
            println!("! not sent: {}", e);
        }
        return Flow::Continue;
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/quit" | "/exit" => return Flow::Quit,
        "/help" => println!("{}", HELP),
        "/connect" => connect(app),
        "/disconnect" => app.session.disconnect(),
        "/status" => {
            println!("session: {:?}", app.session.state());
            println!("{}", app.session.vehicle().snapshot().summary());
        }
        "/metrics" => println!("{}", app.session.metrics().summary()),
        "/export" => export_metrics(app),
        "/config" => handle_config(app, rest),
        "/set" => {
            let (field, value) = rest.split_once(' ').unwrap_or((rest, ""));
            match ConfigOverride::parse(field, value).and_then(|o| app.config.with_override(o)) {
                Ok(next) => adopt_config(app, next),
                Err(e) => println!("! {} (config unchanged)", e),
            }
        }
        "/battery" | "/speed" => {
            let field = command.trim_start_matches('/');
            match app.session.vehicle().apply_override(field, rest) {
                Ok(state) => println!("{}", state.summary()),
                Err(e) => println!("! {}", e),
            }
        }
        "/log" => {
            let n = rest.parse().unwrap_or(20);
            for entry in app.session.audit().tail(n) {
                println!("{}", entry.display_line());
            }
        }
        other => println!("Unknown command {}. Type /help.", other),
    }
    Flow::Continue
}

fn handle_config(app: &mut App, rest: &str) {
    let (sub, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let arg = arg.trim();

    let parsed = match sub {
        "" => {
            match app.config.to_document() {
                Ok(doc) => println!("{}", doc),
                Err(e) => println!("! {}", e),
            }
            return;
        }
        "load" => load_session_config(std::path::Path::new(arg)),
        "raw" => SessionConfig::parse(arg),
        other => {
            println!("Unknown /config option {}.", other);
            return;
        }
    };

    match parsed {
        Ok(next) => adopt_config(app, next),
        Err(e) => println!("! {} (previous config kept)", e),
    }
}

fn export_metrics(app: &App) {
    let model = app
        .session
        .active_config()
        .map(|c| c.model.as_str())
        .unwrap_or(app.config.model.as_str());
    let query = app.session.metrics().export_query(model);
    println!("{}", query);

    if let Some(base) = &app.report_url {
        let separator = if base.contains('?') { '&' } else { '?' };
        let target = format!("{}{}{}", base, separator, query);
        if let Err(e) = open::that(&target) {
            println!("! could not open report page: {}", e);
        }
    }
}
