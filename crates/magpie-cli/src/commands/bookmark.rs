use magpie_core::{ExitCode, MagpieResult};
use serde_json::json;

use crate::{BookmarkCommand, EngineContext, GlobalOptions, print_json, with_engine_context};

pub(crate) fn cmd_bookmark(
    command: BookmarkCommand,
    globals: &GlobalOptions,
) -> MagpieResult<ExitCode> {
    with_engine_context(globals, |ctx| match command {
        BookmarkCommand::List { limit } => cmd_list(&ctx, globals, limit),
        BookmarkCommand::Delete { tweet_id } => cmd_delete(&ctx, globals, &tweet_id),
        BookmarkCommand::Detail { tweet_id } => cmd_detail(&ctx, globals, &tweet_id),
    })
}

fn cmd_list(
    ctx: &EngineContext,
    globals: &GlobalOptions,
    limit: Option<usize>,
) -> MagpieResult<ExitCode> {
    let bookmarks = ctx.store.list_bookmarks(&ctx.profile.name, limit)?;

    if globals.json {
        print_json(&json!({
            "ok": true,
            "result": bookmarks
                .iter()
                .map(|bookmark| json!({
                    "tweet_id": bookmark.tweet_id,
                    "sort_index": bookmark.sort_index,
                }))
                .collect::<Vec<_>>()
        }))?;
    } else if bookmarks.is_empty() {
        println!("No mirrored bookmarks.");
    } else {
        for bookmark in bookmarks {
            println!("{} (sort {})", bookmark.tweet_id, bookmark.sort_index);
        }
    }

    Ok(ExitCode::Success)
}

fn cmd_delete(ctx: &EngineContext, globals: &GlobalOptions, tweet_id: &str) -> MagpieResult<ExitCode> {
    let done = ctx.engine.delete_bookmark(tweet_id)?;

    if globals.json {
        print_json(&json!({"ok": done, "result": {"tweet_id": tweet_id, "done": done}}))?;
    } else if done {
        println!("Deleted bookmark {tweet_id}.");
    } else {
        println!("Host did not confirm the deletion of {tweet_id}.");
    }

    Ok(if done { ExitCode::Success } else { ExitCode::Api })
}

fn cmd_detail(ctx: &EngineContext, globals: &GlobalOptions, tweet_id: &str) -> MagpieResult<ExitCode> {
    let detail = ctx.engine.fetch_detail(tweet_id)?;

    if globals.json {
        print_json(&json!({"ok": true, "result": detail}))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&detail.payload).unwrap_or_default());
    }

    Ok(ExitCode::Success)
}
