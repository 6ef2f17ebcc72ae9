//! Sync and print a timeline.
//!
//! The cached timeline is printed even when the sync fails.

use anyhow::{Context, Result};
use std::fmt::Write as _;

use fedline_client::{ClientError, TimelineState};
use fedline_core::TimelineStatus;
use fedline_types::{ContentId, Did, TimelineKey};

use crate::app::App;

/// Map the mutually exclusive flags to a timeline key.
pub fn key_from_flags(
    feed: Option<String>,
    author: Option<String>,
    list: Option<String>,
) -> Result<TimelineKey> {
    Ok(match (feed, author, list) {
        (Some(uri), None, None) => TimelineKey::Feed(ContentId::new(uri)),
        (None, Some(did), None) => {
            TimelineKey::Author(Did::parse(did).context("Invalid author did")?)
        }
        (None, None, Some(uri)) => TimelineKey::List(ContentId::new(uri)),
        (None, None, None) => TimelineKey::Following,
        _ => anyhow::bail!("Use at most one of --feed, --author and --list"),
    })
}

/// Run the timeline command.
pub async fn run(app: &App, key: TimelineKey, more: bool) -> Result<()> {
    let timelines = app.timelines();

    let synced = if more {
        timelines.load_more(&key).await
    } else {
        timelines.refresh(&key).await
    };
    match synced {
        Ok(()) => {}
        Err(ClientError::NotSignedIn) => {
            anyhow::bail!("Not signed in. Run 'fedline login --handle <handle>' first.")
        }
        Err(ClientError::SessionExpired) => {
            anyhow::bail!("Session expired. Sign in again with 'fedline login'.")
        }
        Err(e) => tracing::warn!(key = %key, error = %e, "sync failed, showing cached timeline"),
    }

    // Give author lookups a chance to land before printing.
    timelines.wait_for_hydration().await;
    let state = timelines
        .current(&key)
        .await
        .context("Failed to read cached timeline")?;
    print!("{}", render(&key, &state));
    Ok(())
}

/// Text rendering of a timeline state.
fn render(key: &TimelineKey, state: &TimelineState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", key);

    if let TimelineStatus::Error { message, .. } = &state.status {
        let _ = writeln!(out, "(offline copy: {})", message);
    }
    let _ = writeln!(out);

    for item in state.items() {
        let author = if item.author.is_unknown() {
            item.post.author.to_string()
        } else {
            item.author.handle.to_string()
        };
        let _ = writeln!(out, "{}", author);
        for line in item.post.text.lines() {
            let _ = writeln!(out, "  {}", line);
        }
        let _ = writeln!(
            out,
            "  {} replies  {} reposts  {} likes",
            item.post.reply_count, item.post.repost_count, item.post.like_count
        );
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "{} posts", state.len());
    match &state.last_cursor {
        Some(_) => {
            let _ = writeln!(out, "More: fedline timeline --more");
        }
        None if !state.is_empty() => {
            let _ = writeln!(out, "(end of feed)");
        }
        None => {}
    }
    out
}
