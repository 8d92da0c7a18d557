use magpie_core::{ExitCode, MagpieResult};
use serde_json::json;

use crate::{EngineContext, EventsCommand, GlobalOptions, print_json, with_engine_context};

pub(crate) fn cmd_events(command: EventsCommand, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    with_engine_context(globals, |ctx| match command {
        EventsCommand::List => cmd_list(&ctx, globals),
        EventsCommand::Drain => cmd_drain(&ctx, globals),
        EventsCommand::Ack { ids } => cmd_ack(&ctx, globals, ids),
        EventsCommand::Apply => cmd_apply(&ctx, globals),
    })
}

fn cmd_list(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let events = ctx.engine.events().get()?;

    if globals.json {
        print_json(&json!({"ok": true, "result": events}))?;
    } else if events.is_empty() {
        println!("No pending events.");
    } else {
        for event in events {
            println!(
                "{} | {:?} | {} | {}",
                event.id,
                event.kind,
                if event.tweet_id.is_empty() {
                    "-"
                } else {
                    event.tweet_id.as_str()
                },
                event.at
            );
        }
    }

    Ok(ExitCode::Success)
}

fn cmd_drain(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let events = ctx.engine.events().drain()?;

    if globals.json {
        print_json(&json!({"ok": true, "result": events}))?;
    } else {
        println!("Drained {} events.", events.len());
    }

    Ok(ExitCode::Success)
}

fn cmd_ack(ctx: &EngineContext, globals: &GlobalOptions, ids: Vec<String>) -> MagpieResult<ExitCode> {
    let acked = ctx.engine.events().ack(&ids)?;

    if globals.json {
        print_json(&json!({"ok": true, "result": {"acked": acked}}))?;
    } else {
        println!("Acknowledged {acked} events.");
    }

    Ok(ExitCode::Success)
}

fn cmd_apply(ctx: &EngineContext, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    let report = ctx.engine.apply_events()?;

    if globals.json {
        print_json(&json!({"ok": true, "result": report}))?;
    } else {
        println!(
            "Applied events: {} deleted, {} fetched, {} acknowledged.",
            report.deleted, report.fetched_new, report.acked
        );
    }

    Ok(ExitCode::Success)
}
