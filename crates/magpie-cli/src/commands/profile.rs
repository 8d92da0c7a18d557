use magpie_core::{ExitCode, MagpieResult};
use magpie_fs::{
    init_workspace, list_profiles, load_config, resolve_workspace, run_doctor, save_config,
    set_active_profile, set_profile_host,
};
use serde_json::json;

use crate::{GlobalOptions, ProfileCommand, print_json, workspace_target};

pub(crate) fn cmd_init(globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let target = workspace_target(globals)?;
    let result = init_workspace(Some(&target), globals.host.as_deref())?;

    if globals.json {
        print_json(&json!({
            "ok": true,
            "result": {
                "workspace": result.paths.root.display().to_string(),
                "created": result.created.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            }
        }))?;
    } else {
        println!("Initialized workspace at {}", result.paths.root.display());
        for path in &result.created {
            println!("  created {}", path.display());
        }
    }

    Ok(ExitCode::Success)
}

pub(crate) fn cmd_doctor(globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let target = workspace_target(globals)?;
    let paths = resolve_workspace(Some(&target))?;
    let report = run_doctor(&paths, globals.profile.as_deref(), globals.host.as_deref())?;

    if globals.json {
        print_json(&json!({"ok": report.healthy, "result": report}))?;
    } else {
        println!("Workspace: {}", report.workspace);
        for check in &report.checks {
            let marker = if check.ok { "ok" } else { "FAIL" };
            println!("  [{marker}] {}: {}", check.name, check.details);
        }
        if let Some(profile) = &report.active_profile {
            println!("Active profile: {profile}");
        }
        if let Some(host) = &report.host {
            println!("Host: {host}");
        }
    }

    Ok(if report.healthy {
        ExitCode::Success
    } else {
        ExitCode::Io
    })
}

pub(crate) fn cmd_profile(
    command: ProfileCommand,
    globals: &GlobalOptions,
) -> MagpieResult<ExitCode> {
    let target = workspace_target(globals)?;
    if !target.join(".magpie").is_dir() {
        init_workspace(Some(&target), globals.host.as_deref())?;
    }
    let paths = resolve_workspace(Some(&target))?;
    let mut config = load_config(&paths)?;

    match command {
        ProfileCommand::List => {
            let profiles = list_profiles(&config);
            if globals.json {
                print_json(&json!({"ok": true, "result": profiles}))?;
            } else {
                for profile in profiles {
                    let marker = if profile.active { "*" } else { " " };
                    println!("{marker} {} -> {}", profile.name, profile.host);
                }
            }
        }
        ProfileCommand::Use { name } => {
            set_active_profile(&mut config, &name)?;
            save_config(&paths, &config)?;
            if globals.json {
                print_json(&json!({"ok": true, "result": {"profile": name}}))?;
            } else {
                println!("Switched to profile '{name}'.");
            }
        }
        ProfileCommand::Set { name, host } => {
            let name = name.unwrap_or_else(|| config.active_profile.clone());
            set_profile_host(&mut config, &name, &host);
            save_config(&paths, &config)?;
            if globals.json {
                print_json(&json!({"ok": true, "result": {"profile": name, "host": host}}))?;
            } else {
                println!("Profile '{name}' now targets {host}.");
            }
        }
    }

    Ok(ExitCode::Success)
}
