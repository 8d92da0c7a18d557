mod commands;
mod driver;

use clap::{Parser, Subcommand};
use magpie_core::{ExitCode, MagpieError, MagpieResult};
use magpie_fs::{
    ResolvedProfile, WorkspacePaths, init_workspace, load_config, resolve_profile,
    resolve_workspace,
};
use magpie_store::CredentialStore;
use magpie_sync::{EngineOptions, MirrorEngine};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::driver::ShellReauthDriver;

#[derive(Debug, Parser)]
#[command(
    name = "magpie",
    version,
    about = "Workspace-first bookmark mirror for an undocumented GraphQL host",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, global = true)]
    profile: Option<String>,

    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Init,
    Doctor,
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    Endpoints {
        #[command(subcommand)]
        command: EndpointsCommand,
    },
    Bookmark {
        #[command(subcommand)]
        command: BookmarkCommand,
    },
    Observe {
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum BookmarkCommand {
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    Delete {
        tweet_id: String,
    },
    Detail {
        tweet_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    List,
    Use {
        name: String,
    },
    Set {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        host: String,
    },
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    Status,
    Capture {
        #[arg(long)]
        file: PathBuf,
    },
    Reauth,
    Logout,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Pull {
        #[arg(long)]
        full: bool,
    },
    Status,
    Maintain,
    Reset,
}

#[derive(Debug, Subcommand)]
enum EventsCommand {
    List,
    Drain,
    Ack {
        ids: Vec<String>,
    },
    Apply,
}

#[derive(Debug, Subcommand)]
enum EndpointsCommand {
    List,
    Resolve {
        operation: String,
    },
    Discover {
        operation: String,
    },
    Warm,
    Store {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone)]
struct GlobalOptions {
    profile: Option<String>,
    workspace: Option<PathBuf>,
    host: Option<String>,
    json: bool,
    yes: bool,
}

struct EngineContext {
    paths: WorkspacePaths,
    profile: ResolvedProfile,
    store: CredentialStore,
    engine: MirrorEngine,
}

fn main() {
    let cli = Cli::parse();
    configure_logging(cli.debug, cli.json, cli.no_color);

    let globals = GlobalOptions {
        profile: cli.profile,
        workspace: cli.workspace,
        host: cli.host,
        json: cli.json,
        yes: cli.yes,
    };

    let result = run_command(cli.command, &globals);

    let exit = match result {
        Ok(code) => code,
        Err(error) => {
            render_error(&error, globals.json);
            error.exit_code()
        }
    };

    std::process::exit(exit.as_i32());
}

fn configure_logging(debug: bool, json: bool, no_color: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(!no_color)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run_command(command: Command, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    match command {
        Command::Init => commands::profile::cmd_init(globals),
        Command::Doctor => commands::profile::cmd_doctor(globals),
        Command::Profile { command } => commands::profile::cmd_profile(command, globals),
        Command::Auth { command } => commands::auth::cmd_auth(command, globals),
        Command::Sync { command } => commands::sync::cmd_sync(command, globals),
        Command::Events { command } => commands::events::cmd_events(command, globals),
        Command::Endpoints { command } => commands::endpoints::cmd_endpoints(command, globals),
        Command::Bookmark { command } => commands::bookmark::cmd_bookmark(command, globals),
        Command::Observe { file } => commands::observe::cmd_observe(&file, globals),
    }
}

fn with_engine_context<F>(globals: &GlobalOptions, run: F) -> MagpieResult<ExitCode>
where
    F: FnOnce(EngineContext) -> MagpieResult<ExitCode>,
{
    let target = workspace_target(globals)?;
    if !target.join(".magpie").is_dir() {
        init_workspace(Some(&target), globals.host.as_deref())?;
    }

    let paths = resolve_workspace(Some(&target))?;
    let config = load_config(&paths)?;
    let profile = resolve_profile(
        &config,
        globals.profile.as_deref(),
        globals.host.as_deref(),
    )?;

    let store = CredentialStore::from_workspace(&paths)?;
    let driver = ShellReauthDriver::new(profile.reauth_command.clone());
    let engine = MirrorEngine::new(
        store.clone(),
        EngineOptions::from_profile(&profile),
        Box::new(driver),
    )?;

    run(EngineContext {
        paths,
        profile,
        store,
        engine,
    })
}

fn workspace_target(globals: &GlobalOptions) -> MagpieResult<PathBuf> {
    if let Some(path) = &globals.workspace {
        return absolutize(path);
    }

    std::env::current_dir().map_err(|err| {
        MagpieError::io(format!(
            "failed to resolve current directory for workspace lookup: {err}"
        ))
    })
}

fn absolutize(path: &Path) -> MagpieResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir().map_err(|err| {
        MagpieError::io(format!(
            "failed to resolve current directory for path: {err}"
        ))
    })?;

    Ok(cwd.join(path))
}

fn render_error(error: &MagpieError, json_output: bool) {
    if json_output {
        let payload = json!({
            "ok": false,
            "error": {
                "kind": error.kind,
                "message": &error.message,
            }
        });
        let serialized = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| {
            "{\"ok\":false,\"error\":{\"kind\":\"io\",\"message\":\"failed to serialize error\"}}".to_string()
        });
        eprintln!("{serialized}");
    } else {
        eprintln!("error: {}", error.message);
    }
}

fn print_json<T: Serialize>(value: &T) -> MagpieResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| MagpieError::io(format!("failed to render JSON output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
