use magpie_core::{ExitCode, MagpieError, MagpieResult};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{AuthCommand, EngineContext, GlobalOptions, print_json, with_engine_context};

pub(crate) fn cmd_auth(command: AuthCommand, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    with_engine_context(globals, |ctx| match command {
        AuthCommand::Status => cmd_status(&ctx, globals),
        AuthCommand::Capture { file } => cmd_capture(&ctx, globals, &file),
        AuthCommand::Reauth => cmd_reauth(&ctx, globals),
        AuthCommand::Logout => cmd_logout(&ctx, globals),
    })
}

fn cmd_status(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let status = ctx.engine.check_auth();

    if globals.json {
        print_json(&json!({
            "ok": status.connected,
            "result": {
                "profile": ctx.profile.name,
                "host": ctx.profile.host,
                "connected": status.connected,
                "user_id": status.user_id,
                "captured_at": status.captured_at,
            }
        }))?;
    } else {
        println!("Host: {}", ctx.profile.host);
        println!("Profile: {}", ctx.profile.name);
        println!("Connected: {}", if status.connected { "yes" } else { "no" });
        if let Some(user_id) = &status.user_id {
            println!("User id: {user_id}");
        }
        if let Some(captured_at) = &status.captured_at {
            println!("Headers captured: {captured_at}");
        }
    }

    Ok(if status.connected {
        ExitCode::Success
    } else {
        ExitCode::Auth
    })
}

fn cmd_capture(ctx: &EngineContext, globals: &GlobalOptions, file: &Path) -> MagpieResult<ExitCode> {
    let raw = fs::read_to_string(file).map_err(|err| {
        MagpieError::io(format!(
            "failed to read header capture file '{}': {}",
            file.display(),
            err
        ))
    })?;

    let headers: BTreeMap<String, String> = serde_json::from_str(&raw).map_err(|err| {
        MagpieError::usage(format!(
            "header capture file '{}' is not a JSON object of header name/value pairs: {}",
            file.display(),
            err
        ))
    })?;

    let captured = ctx.engine.session().capture_from_observed_headers(&headers)?;
    if !captured {
        return Err(MagpieError::no_auth(
            "capture file is missing one of the required headers (authorization, session cookie, csrf token)",
        ));
    }

    if globals.json {
        print_json(&json!({"ok": true, "result": {"captured": true}}))?;
    } else {
        println!("Captured credential headers for profile '{}'.", ctx.profile.name);
        println!("Stored in {}", ctx.paths.state_db_path.display());
    }

    Ok(ExitCode::Success)
}

fn cmd_reauth(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let recovered = ctx.engine.silent_reauth()?;

    if globals.json {
        print_json(&json!({"ok": recovered, "result": {"reauthenticated": recovered}}))?;
    } else if recovered {
        println!("Session re-established.");
    } else {
        println!("Silent reauth did not produce fresh credentials.");
    }

    Ok(if recovered {
        ExitCode::Success
    } else {
        ExitCode::Auth
    })
}

fn cmd_logout(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    ctx.engine.session().clear_credentials()?;

    if globals.json {
        print_json(&json!({"ok": true, "result": {"cleared": true}}))?;
    } else {
        println!("Cleared stored credentials for profile '{}'.", ctx.profile.name);
    }

    Ok(ExitCode::Success)
}
