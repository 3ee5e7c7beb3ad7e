pub mod models {
    pub mod actuator;
    pub mod calibration;
    pub mod environment;
}

pub mod control {
    pub mod controller;
    pub mod curve;
    pub mod drive;
    pub mod incremental;
    pub mod irrigation;
    pub mod relay;
}

pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod envfile;
pub mod errors;
pub mod lines;
pub mod ports;
pub mod schema;
pub mod services {
    pub mod admin;
    pub mod ingest;
    pub mod scheduler;
    pub mod simulation;
}

#[cfg(test)]
pub mod testing;

use crate::config::Config;
use crate::db::store::PgStore;
use crate::lines::SimulatedLineProvider;
use crate::models::actuator::{ActuatorId, OperatingMode};
use crate::ports::LocalClock;
use crate::services::admin::{AdminService, format_status_table};
use crate::services::scheduler::ActuatorScheduler;
use crate::services::{ingest, simulation};
use diesel::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

// =====================
// Command line
// =====================

#[derive(Debug, Clone, PartialEq)]
enum Command {
    /// Start every bound actuator's control loop.
    Run,
    /// Print the actuator table.
    Status,
    SetMode { id: ActuatorId, mode: OperatingMode },
    /// Store one sensor-station payload.
    Ingest { payload: String },
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Command,
}

const USAGE: &str = "usage: greenhouse-actuators [--env-file PATH] [run | status | set-mode <id> <mode> | ingest '<json>']";

fn parse_cli(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        let path = if arg == "--env-file" {
            Some(args.next().ok_or("`--env-file` requires a path argument")?)
        } else if let Some(value) = arg.strip_prefix("--env-file=") {
            Some(value.to_string())
        } else {
            None
        };
        match path {
            Some(_) if env_file.is_some() => return Err("`--env-file` provided more than once".to_string()),
            Some(p) if p.is_empty() => return Err("`--env-file` requires a path argument".to_string()),
            Some(p) => env_file = Some(PathBuf::from(p)),
            None if arg == "--" => {
                words.extend(args.by_ref());
            }
            None if arg.starts_with("--") => return Err(format!("unrecognised argument: {}\n{}", arg, USAGE)),
            None => words.push(arg),
        }
    }

    let command = match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["run"] => Command::Run,
        ["status"] => Command::Status,
        ["set-mode", id, mode] => Command::SetMode {
            id: ActuatorId::from(*id),
            mode: mode.parse()?,
        },
        ["ingest", payload] => Command::Ingest {
            payload: payload.to_string(),
        },
        _ => return Err(format!("unrecognised command: {}\n{}", words.join(" "), USAGE)),
    };
    Ok(CliArgs { env_file, command })
}

// =====================
// Entry points
// =====================

fn run(cfg: Config, command: Command) -> Result<(), String> {
    info!(
        "Config loaded (pool_size={}, idle_tick={}ms, stale_write_retries={}, simulate_environment={}, simulation_interval={}s, line_max={})",
        cfg.db_pool_size,
        cfg.idle_tick.as_millis(),
        cfg.stale_write_retries,
        cfg.simulate_environment,
        cfg.simulation_interval.as_secs(),
        cfg.simulated_line_max
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );

    let store = Arc::new(PgStore::connect(&cfg.database_url, cfg.db_pool_size)?);
    info!("Connected to database");
    apply_database_migrations(&mut *store.connection()?)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("Starting async runtime failed: {}", e))?;

    runtime.block_on(async move {
        match command {
            Command::Run => run_controllers(cfg, store).await,
            Command::Status => {
                let rows = AdminService::new(store).list_actuators().await.map_err(|e| e.to_string())?;
                print!("{}", format_status_table(&rows));
                Ok(())
            }
            Command::SetMode { id, mode } => AdminService::new(store)
                .set_mode(&id, mode)
                .await
                .map_err(|e| format!("set-mode {} failed: {}", id, e)),
            Command::Ingest { payload } => ingest::ingest(store.as_ref(), &payload).await.map(|_| ()),
        }
    })
}

async fn run_controllers(cfg: Config, store: Arc<PgStore>) -> Result<(), String> {
    if cfg.simulate_environment {
        tokio::spawn(simulation::run_feed(
            Arc::clone(&store),
            cfg.simulation_interval,
            cfg.simulation_seed,
        ));
    }

    let scheduler = ActuatorScheduler::new(
        store,
        Arc::new(SimulatedLineProvider::new(cfg.simulated_line_max)),
        Arc::new(LocalClock),
        cfg.controller_settings(),
    );
    scheduler.run().await
}

fn main() {
    let cli = match parse_cli(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match envfile::load(cli.env_file) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "greenhouse-actuators {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    let result = Config::from_env().and_then(|cfg| run(cfg, cli.command));
    if let Err(e) = result {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Result<CliArgs, String> {
        parse_cli(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_runs_the_controllers() {
        assert_eq!(
            cli(&[]).unwrap(),
            CliArgs {
                env_file: None,
                command: Command::Run
            }
        );
    }

    #[test]
    fn env_file_combines_with_subcommands() {
        let parsed = cli(&["--env-file", "prod.env", "set-mode", "curtain-1", "forced-open"]).unwrap();
        assert_eq!(parsed.env_file, Some(PathBuf::from("prod.env")));
        assert_eq!(
            parsed.command,
            Command::SetMode {
                id: ActuatorId::from("curtain-1"),
                mode: OperatingMode::ForcedOpen
            }
        );

        let parsed = cli(&["status", "--env-file=.env.local"]).unwrap();
        assert_eq!(parsed.env_file, Some(PathBuf::from(".env.local")));
        assert_eq!(parsed.command, Command::Status);
    }

    #[test]
    fn payload_after_double_dash_is_kept_verbatim() {
        let parsed = cli(&["ingest", "--", r#"{"temp": 21.5}"#]).unwrap();
        assert_eq!(
            parsed.command,
            Command::Ingest {
                payload: r#"{"temp": 21.5}"#.to_string()
            }
        );
    }

    #[test]
    fn bad_invocations_are_rejected() {
        assert!(cli(&["--env-file"]).is_err());
        assert!(cli(&["--env-file=a", "--env-file=b"]).is_err());
        assert!(cli(&["--verbose"]).is_err());
        assert!(cli(&["set-mode", "curtain-1"]).is_err());
        assert!(cli(&["set-mode", "curtain-1", "77"]).is_err());
        assert!(cli(&["reboot"]).is_err());
    }
}
