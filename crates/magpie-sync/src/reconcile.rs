use magpie_api::{Bookmark, BookmarkPage};
use magpie_core::MagpieResult;
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconcileOutcome {
    pub new_bookmarks: Vec<Bookmark>,
    pub stale_ids: Vec<String>,
    pub pages_requested: usize,
}

/// Walks the remote collection page by page and diffs it against the local
/// id set.
///
/// Incremental mode stops at the first page with nothing new: the remote
/// collection is ordered by recency, so a page of already-known items means
/// everything after it is known too. Full mode walks to the end and reports
/// the local ids never seen remotely as stale. New items are handed to
/// `on_page` as soon as each page is diffed; callers persist partial
/// progress instead of waiting for the walk to finish.
pub fn reconcile<F, P>(
    local_ids: &HashSet<String>,
    full: bool,
    mut fetch_page: F,
    mut on_page: P,
) -> MagpieResult<ReconcileOutcome>
where
    F: FnMut(Option<&str>) -> MagpieResult<BookmarkPage>,
    P: FnMut(&[Bookmark]) -> MagpieResult<()>,
{
    let mut seen: HashSet<String> = local_ids.clone();
    let mut remote_seen: HashSet<String> = HashSet::new();
    let mut seen_cursors: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;

    let mut new_bookmarks: Vec<Bookmark> = Vec::new();
    let mut pages_requested = 0usize;

    loop {
        let page = fetch_page(cursor.as_deref())?;
        pages_requested += 1;

        let mut fresh: Vec<Bookmark> = Vec::new();
        for bookmark in &page.bookmarks {
            remote_seen.insert(bookmark.tweet_id.clone());
            if seen.insert(bookmark.tweet_id.clone()) {
                fresh.push(bookmark.clone());
            }
        }

        if !fresh.is_empty() {
            on_page(&fresh)?;
            new_bookmarks.extend(fresh.iter().cloned());
        }

        if !full && fresh.is_empty() {
            break;
        }

        match page.next_cursor {
            None => {
                if pages_requested == 1 && !new_bookmarks.is_empty() {
                    warn!(
                        new_items = new_bookmarks.len(),
                        "single page returned new bookmarks without any cursor; the response shape may have changed upstream"
                    );
                }
                break;
            }
            Some(next) => {
                if cursor.as_deref() == Some(next.as_str()) {
                    break;
                }
                if !seen_cursors.insert(next.clone()) {
                    break;
                }
                cursor = Some(next);
            }
        }
    }

    let mut stale_ids: Vec<String> = if full {
        local_ids
            .iter()
            .filter(|id| !remote_seen.contains(*id))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    stale_ids.sort();

    Ok(ReconcileOutcome {
        new_bookmarks,
        stale_ids,
        pages_requested,
    })
}
