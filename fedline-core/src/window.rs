//! Tiled timeline window.
//!
//! A window is an ordered list of tiles. Each tile is a contiguous run of
//! content ids as returned by one page fetch, plus the cursor that fetches
//! the page after it. The cursor of the last tile is where load-more
//! continues; `None` there means the end of the feed was reached.
//!
//! Every refresh bumps the generation. A load-more records the generation
//! and cursor it started from and is only appended if both still match.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use fedline_types::{ContentId, Cursor};

/// One page worth of content ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tile {
    /// Content ids in server order.
    pub items: Vec<ContentId>,
    /// Cursor for the page after this tile.
    pub cursor: Option<Cursor>,
}

/// Result of [`TimelineWindow::apply_append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The page was appended as a new tile.
    Appended,
    /// A refresh or another load-more got there first; nothing changed.
    Superseded,
}

/// Ordered tiles of one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimelineWindow {
    /// Tiles, newest first.
    pub tiles: Vec<Tile>,
    /// Bumped by every refresh.
    pub generation: u64,
}

impl TimelineWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor where the next load-more continues.
    pub fn last_cursor(&self) -> Option<&Cursor> {
        self.tiles.last().and_then(|t| t.cursor.as_ref())
    }

    /// Check if the window holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// All content ids, in display order.
    pub fn item_ids(&self) -> impl Iterator<Item = &ContentId> {
        self.tiles.iter().flat_map(|t| t.items.iter())
    }

    /// Total number of items across tiles.
    pub fn len(&self) -> usize {
        self.tiles.iter().map(|t| t.items.len()).sum()
    }

    /// Replace the head of the window with a freshly fetched first page.
    ///
    /// If any page item already sits in tile `k`, the page becomes the new
    /// head tile followed by the rest of tile `k`, keeping tile `k`'s cursor,
    /// and tiles after `k` stay. Otherwise the window is rebuilt from the
    /// page alone. Duplicate ids are dropped from the older tiles.
    pub fn apply_refresh(&mut self, page: Vec<ContentId>, cursor: Option<Cursor>) {
        self.generation = self.generation.saturating_add(1);

        let fresh: HashSet<&ContentId> = page.iter().collect();
        let overlap = self
            .tiles
            .iter()
            .position(|tile| tile.items.iter().any(|id| fresh.contains(id)));

        let Some(k) = overlap else {
            self.tiles = vec![Tile {
                items: page,
                cursor,
            }];
            return;
        };

        let old = std::mem::take(&mut self.tiles);
        let mut rest = old.into_iter().skip(k);
        let anchor = match rest.next() {
            Some(tile) => tile,
            None => Tile::default(),
        };

        // Everything in tile k past the last overlapping item is older than
        // the page and still continuous with tile k's cursor.
        let last_seen = anchor
            .items
            .iter()
            .rposition(|id| fresh.contains(id))
            .map_or(0, |i| i + 1);
        let tail: Vec<ContentId> = anchor.items[last_seen..]
            .iter()
            .filter(|id| !fresh.contains(id))
            .cloned()
            .collect();

        let mut seen: HashSet<ContentId> = page.iter().cloned().collect();
        seen.extend(tail.iter().cloned());

        let mut head = page;
        head.extend(tail);
        let mut tiles = vec![Tile {
            items: head,
            cursor: anchor.cursor,
        }];
        for mut tile in rest {
            tile.items.retain(|id| seen.insert(id.clone()));
            tiles.push(tile);
        }
        self.tiles = tiles;
    }

    /// Append the page fetched with `used_cursor` while the window was at
    /// `expected_generation`.
    pub fn apply_append(
        &mut self,
        expected_generation: u64,
        used_cursor: &Cursor,
        page: Vec<ContentId>,
        cursor: Option<Cursor>,
    ) -> AppendOutcome {
        if self.generation != expected_generation || self.last_cursor() != Some(used_cursor) {
            return AppendOutcome::Superseded;
        }

        let mut seen: HashSet<ContentId> = self.item_ids().cloned().collect();
        let items: Vec<ContentId> = page.into_iter().filter(|id| seen.insert(id.clone())).collect();
        self.tiles.push(Tile { items, cursor });
        AppendOutcome::Appended
    }
}
