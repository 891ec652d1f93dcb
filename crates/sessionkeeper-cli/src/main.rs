//! sessionkeeper - command-line driver for the session coordinator.
//!
//! Signs in against the admin backend, shows the current user, forces a
//! credential renewal, keeps a session alive with proactive renewal, or signs
//! out. The session is persisted between runs.

mod terminal;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionkeeper_core::auth::{FileSessionStore, KeyringSessionStore, SessionStore};
use sessionkeeper_core::models::UserInfo;
use sessionkeeper_core::{ApiClient, Config, SessionCoordinator, SessionEvent};

use terminal::{TerminalNavigator, TerminalNotifier};

/// Environment variable naming a directory for a daily rolling log file
const LOG_DIR_ENV: &str = "SESSIONKEEPER_LOG_DIR";

/// Profile endpoint, also used to check that the session is accepted
const CURRENT_USER_PATH: &str = "/admin/v1/me";

const USAGE: &str = "\
usage: sessionkeeper [--keyring] <command>

commands:
  login [username]   sign in and persist the session
  whoami             show the signed-in user (renews on expiry)
  refresh            renew the access credential now
  keepalive          stay running and renew proactively until Ctrl-C
  logout             sign out and clear the persisted session";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard must live until exit so the file writer flushes.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match std::env::var(LOG_DIR_ENV).ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sessionkeeper.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

/// Command completed
const EXIT_OK: u8 = 0;
/// Command ran but the session could not serve it
const EXIT_FAILURE: u8 = 1;
/// Unknown command
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    // dropped on return, after the last log line is queued
    let _log_guard = init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let use_keyring = match args.iter().position(|a| a == "--keyring") {
        Some(idx) => {
            args.remove(idx);
            true
        }
        None => false,
    };
    if args.is_empty() {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    let store: Arc<dyn SessionStore> = if use_keyring {
        Arc::new(KeyringSessionStore::default())
    } else {
        Arc::new(FileSessionStore::new(config.cache_dir()?))
    };

    let client = ApiClient::new(&config.api_base_url, &config.locale)?;
    let navigator = Arc::new(TerminalNavigator::new(&config.default_home_path));
    let coordinator = SessionCoordinator::connect(
        &config,
        client.clone(),
        store,
        navigator,
        Arc::new(TerminalNotifier),
    );

    if let Err(e) = coordinator.restore() {
        eprintln!("Warning: could not restore saved session: {}", e);
    }

    info!(command = %args[0], "sessionkeeper starting");
    let code = dispatch(&args, &mut config, &client, &coordinator).await?;
    info!(code, "sessionkeeper shutting down");
    Ok(ExitCode::from(code))
}

/// Run one command and return the process exit code.
async fn dispatch(
    args: &[String],
    config: &mut Config,
    client: &ApiClient,
    coordinator: &Arc<SessionCoordinator>,
) -> Result<u8> {
    let Some(command) = args.first() else {
        return Ok(EXIT_USAGE);
    };

    match command.as_str() {
        "login" => {
            let username = match args.get(1) {
                Some(name) => name.clone(),
                None => prompt_username(config.last_username.as_deref())?,
            };
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;

            let Some(user) = coordinator.login(&username, &password, None).await else {
                return Ok(EXIT_FAILURE);
            };
            print_user(&user, &coordinator.access_codes());
            config.last_username = Some(username);
            config.save().context("Failed to save configuration")?;
        }
        "whoami" => {
            if !coordinator.is_logged_in() && coordinator.session_snapshot().refresh_token.is_none() {
                eprintln!("Not signed in.");
                return Ok(EXIT_FAILURE);
            }
            match client.get::<UserInfo>(CURRENT_USER_PATH).await {
                Ok(user) => print_user(&user, &coordinator.access_codes()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return Ok(EXIT_FAILURE);
                }
            }
        }
        "refresh" => {
            let token = coordinator.renew_access_credential().await;
            if token.is_empty() {
                eprintln!("Renewal failed; sign in again.");
                return Ok(EXIT_FAILURE);
            }
            let snapshot = coordinator.session_snapshot();
            println!("Access credential renewed.");
            if let Some(at) = snapshot.access_expires_at {
                println!("  access expires:  {}", at.to_rfc3339());
            }
            if let Some(at) = snapshot.refresh_expires_at {
                println!("  refresh expires: {}", at.to_rfc3339());
            }
        }
        "keepalive" => return keepalive(coordinator).await,
        "logout" => {
            coordinator.logout(false).await;
            println!("Signed out.");
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            return Ok(EXIT_USAGE);
        }
    }
    Ok(EXIT_OK)
}

/// Stay resident, printing session events, until Ctrl-C or the session ends.
async fn keepalive(coordinator: &Arc<SessionCoordinator>) -> Result<u8> {
    if !coordinator.is_refresh_scheduled() {
        eprintln!("No renewable session; run `sessionkeeper login` first.");
        return Ok(EXIT_FAILURE);
    }
    if let Some(interval) = coordinator.scheduled_refresh_interval() {
        println!("Next renewal in {} minutes. Press Ctrl-C to stop.", interval.as_secs() / 60);
    }

    let mut events = coordinator.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping.");
                return Ok(EXIT_OK);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Renewed) => {
                    let next = coordinator
                        .scheduled_refresh_interval()
                        .map(|d| d.as_secs() / 60)
                        .unwrap_or_default();
                    println!("Credential renewed; next renewal in {} minutes.", next);
                }
                Ok(SessionEvent::Reset) | Ok(SessionEvent::LoginExpired) => {
                    println!("Session ended.");
                    return Ok(EXIT_OK);
                }
                Ok(SessionEvent::LoggedIn) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(EXIT_OK),
            }
        }
    }
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    use std::io::Write;

    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    match (input.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => Err(anyhow::anyhow!("Username is required")),
        (false, _) => Ok(input.to_string()),
    }
}

fn print_user(user: &UserInfo, codes: &[String]) {
    println!("Signed in as {}", user.display_name());
    if let Some(ref username) = user.username {
        println!("  username: {}", username);
    }
    if let Some(tenant) = user.tenant_id.filter(|_| user.is_tenant_user()) {
        println!("  tenant:   {}", tenant);
    }
    if !user.roles.is_empty() {
        println!("  roles:    {}", user.roles.join(", "));
    }
    if !codes.is_empty() {
        println!("  grants:   {}", codes.len());
    }
}
