use magpie_api::ObservedTraffic;
use magpie_core::{ExitCode, MagpieError, MagpieResult};
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::{GlobalOptions, print_json, with_engine_context};

/// Replays a JSONL capture of the host page's network activity through the
/// engine's observation path, one record per line.
pub(crate) fn cmd_observe(file: &Path, globals: &GlobalOptions) -> MagpieResult<ExitCode> {
    with_engine_context(globals, |ctx| {
        let raw = fs::read_to_string(file).map_err(|err| {
            MagpieError::io(format!(
                "failed to read capture file '{}': {}",
                file.display(),
                err
            ))
        })?;

        let mut ingested = 0usize;
        let mut skipped = 0usize;
        let mut catalog_recorded = 0usize;
        let mut credentials_captured = 0usize;
        let mut events_recorded = 0usize;

        for (line_number, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: ObservedTraffic = match serde_json::from_str(trimmed) {
                Ok(record) => record,
                Err(err) => {
                    warn!(line = line_number + 1, error = %err, "skipping malformed capture line");
                    skipped += 1;
                    continue;
                }
            };

            let outcome = ctx.engine.observe(&record)?;
            ingested += 1;
            if outcome.catalog_recorded {
                catalog_recorded += 1;
            }
            if outcome.credentials_captured {
                credentials_captured += 1;
            }
            if outcome.event_recorded {
                events_recorded += 1;
            }
        }

        // Nothing pending may be lost once the replay ends.
        ctx.engine.catalog().flush()?;

        if globals.json {
            print_json(&json!({
                "ok": true,
                "result": {
                    "ingested": ingested,
                    "skipped": skipped,
                    "catalog_recorded": catalog_recorded,
                    "credentials_captured": credentials_captured,
                    "events_recorded": events_recorded,
                }
            }))?;
        } else {
            println!(
                "Ingested {ingested} records ({skipped} skipped): {catalog_recorded} catalog updates, {credentials_captured} credential captures, {events_recorded} events."
            );
        }

        Ok(ExitCode::Success)
    })
}
