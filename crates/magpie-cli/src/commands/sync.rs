use magpie_core::{ExitCode, MagpieError, MagpieResult};
use serde_json::json;

use crate::{EngineContext, GlobalOptions, SyncCommand, print_json, with_engine_context};

pub(crate) fn cmd_sync(command: SyncCommand, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    with_engine_context(globals, |ctx| match command {
        SyncCommand::Pull { full } => cmd_pull(&ctx, globals, full),
        SyncCommand::Status => cmd_status(&ctx, globals),
        SyncCommand::Maintain => cmd_maintain(&ctx, globals),
        SyncCommand::Reset => cmd_reset(&ctx, globals),
    })
}

fn cmd_maintain(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let report = ctx.engine.maintenance(chrono::Utc::now())?;

    if globals.json {
        print_json(&json!({"ok": true, "result": report}))?;
    } else {
        println!(
            "Maintenance done: {} catalog entries pruned, {} events pruned.",
            report.catalog_pruned, report.events_pruned
        );
    }

    Ok(ExitCode::Success)
}

fn cmd_pull(ctx: &EngineContext, globals: &GlobalOptions, full: bool) -> MagpieResult<ExitCode> {
    let report = if full {
        ctx.engine.hard_sync()?
    } else {
        ctx.engine.soft_sync()?
    };

    match report {
        Some(report) => {
            if globals.json {
                print_json(&json!({"ok": !report.aborted, "result": report}))?;
            } else {
                println!(
                    "{} sync: {} pages, {} new, {} removed, {} total.",
                    report.mode,
                    report.pages_requested,
                    report.new_bookmarks,
                    report.removed_stale,
                    report.total_bookmarks
                );
                if report.aborted {
                    println!("Walk aborted by timeout; partial progress was kept.");
                }
                if report.store_write_failed {
                    println!("Some pages could not be persisted; rerun `magpie sync pull --full`.");
                }
            }

            Ok(ExitCode::Success)
        }
        None => {
            if globals.json {
                print_json(&json!({"ok": true, "result": {"skipped": true}}))?;
            } else {
                println!("Sync skipped: another pass is running or the throttle window is open.");
            }

            Ok(ExitCode::Success)
        }
    }
}

fn cmd_status(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let state = ctx.engine.sync_state()?;
    let pending_events = ctx.engine.events().get()?.len();
    let catalog_entries = ctx.engine.catalog().len();

    if globals.json {
        print_json(&json!({
            "ok": true,
            "result": {
                "last_soft_sync_at": state.last_soft_sync_at,
                "last_full_sync_at": state.last_full_sync_at,
                "last_maintenance_at": state.last_maintenance_at,
                "last_error": state.last_error,
                "bookmark_count": state.bookmark_count,
                "pending_events": pending_events,
                "catalog_entries": catalog_entries,
            }
        }))?;
    } else {
        println!(
            "Last soft sync: {}",
            state.last_soft_sync_at.unwrap_or_else(|| "never".to_string())
        );
        println!(
            "Last full sync: {}",
            state.last_full_sync_at.unwrap_or_else(|| "never".to_string())
        );
        println!(
            "Last error: {}",
            state.last_error.unwrap_or_else(|| "none".to_string())
        );
        println!("Bookmarks: {}", state.bookmark_count);
        println!("Pending events: {pending_events}");
        println!("Catalog entries: {catalog_entries}");
    }

    Ok(ExitCode::Success)
}

fn cmd_reset(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    if !globals.yes {
        return Err(MagpieError::usage(
            "sync reset drops queued events and sync watermarks; rerun with --yes",
        ));
    }

    ctx.engine.reset()?;

    if globals.json {
        print_json(&json!({"ok": true, "result": {"reset": true}}))?;
    } else {
        println!("Runtime sync state cleared.");
    }

    Ok(ExitCode::Success)
}
