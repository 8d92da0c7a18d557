use magpie_core::{ExitCode, MagpieError, MagpieResult};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{EndpointsCommand, EngineContext, GlobalOptions, print_json, with_engine_context};

pub(crate) fn cmd_endpoints(
    command: EndpointsCommand,
    globals: &GlobalOptions,
) -> MagpieResult<ExitCode> {
    with_engine_context(globals, |ctx| match command {
        EndpointsCommand::List => cmd_list(&ctx, globals),
        EndpointsCommand::Resolve { operation } => cmd_resolve(&ctx, globals, &operation),
        EndpointsCommand::Discover { operation } => cmd_discover(&ctx, globals, &operation),
        EndpointsCommand::Warm => cmd_warm(&ctx, globals),
        EndpointsCommand::Store { file } => cmd_store(&ctx, globals, &file),
    })
}

fn cmd_warm(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let resolved = ctx
        .engine
        .discover_missing_query_ids()?
        .unwrap_or_default();

    if globals.json {
        print_json(&json!({"ok": true, "result": resolved}))?;
    } else if resolved.is_empty() {
        println!("No operations could be resolved.");
    } else {
        for (operation, query_id) in resolved {
            println!("{operation} = {query_id}");
        }
    }

    Ok(ExitCode::Success)
}

fn cmd_list(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let entries = ctx.engine.catalog().entries();
    let slots = ctx.store.load_all_query_ids(&ctx.profile.name)?;

    if globals.json {
        print_json(&json!({
            "ok": true,
            "result": {
                "catalog": entries,
                "stored_query_ids": slots,
            }
        }))?;
    } else {
        if slots.is_empty() {
            println!("No stored query ids.");
        } else {
            println!("Stored query ids:");
            for (operation, stored) in &slots {
                println!("  {} = {} ({})", operation, stored.query_id, stored.resolved_at);
            }
        }

        if entries.is_empty() {
            println!("Catalog is empty.");
        } else {
            println!("Observed endpoints:");
            for entry in entries {
                println!(
                    "  {}:{} seen {}x, last {}",
                    entry.operation, entry.query_id, entry.seen_count, entry.last_seen
                );
            }
        }
    }

    Ok(ExitCode::Success)
}

fn cmd_resolve(ctx: &EngineContext, globals: &GlobalOptions, operation: &str) -> MagpieResult<ExitCode> {
    let resolved = ctx.engine.resolver().resolve(operation, ctx.engine.catalog())?;

    match resolved {
        Some(query_id) => {
            if globals.json {
                print_json(&json!({"ok": true, "result": {"operation": operation, "query_id": query_id}}))?;
            } else {
                println!("{operation} = {query_id}");
            }
            Ok(ExitCode::Success)
        }
        None => Err(MagpieError::no_query_id(format!(
            "could not resolve a query id for operation '{operation}' through any fallback"
        ))),
    }
}

fn cmd_discover(ctx: &EngineContext, globals: &GlobalOptions, operation: &str) -> MagpieResult<ExitCode> {
    let rediscovered = ctx.engine.resolver().force_rediscover(operation)?;

    match rediscovered {
        Some(query_id) => {
            if globals.json {
                print_json(&json!({"ok": true, "result": {"operation": operation, "query_id": query_id}}))?;
            } else {
                println!("{operation} = {query_id} (rediscovered)");
            }
            Ok(ExitCode::Success)
        }
        None => Err(MagpieError::no_query_id(format!(
            "live discovery found no query id for operation '{operation}'"
        ))),
    }
}

fn cmd_store(ctx: &EngineContext, globals: &GlobalOptions, file: &Path) -> MagpieResult<ExitCode> {
    let raw = fs::read_to_string(file).map_err(|err| {
        MagpieError::io(format!(
            "failed to read query id file '{}': {}",
            file.display(),
            err
        ))
    })?;

    let query_ids: BTreeMap<String, String> = serde_json::from_str(&raw).map_err(|err| {
        MagpieError::usage(format!(
            "query id file '{}' is not a JSON object of operation/query-id pairs: {}",
            file.display(),
            err
        ))
    })?;

    let stored = ctx.engine.store_query_ids(&query_ids)?;

    if globals.json {
        print_json(&json!({"ok": true, "result": {"stored": stored}}))?;
    } else {
        println!("Stored {stored} query ids.");
    }

    Ok(ExitCode::Success)
}
