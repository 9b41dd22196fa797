//! Announcement-channel classification.
//!
//! Lower priority values are better. Channels that cannot carry posts, or
//! whose name matches nothing, are not candidates at all.

use crate::source::{ChannelInfo, ChannelKind};

/// Ordered keyword list; the index feeds into the priority.
pub const ANNOUNCEMENT_KEYWORDS: &[&str] = &[
    "announcements",
    "announcement",
    "news",
    "updates",
    "важное",
    "объявления",
    "анонсы",
];

const NATIVE_PRIORITY: u32 = 1;
const EXACT_NAME_PRIORITY: u32 = 2;
const KEYWORD_BASE_PRIORITY: u32 = 3;

/// Priority of a channel, or `None` if it is not announcement-like.
#[must_use]
pub fn channel_priority(kind: ChannelKind, name: &str) -> Option<u32> {
    match kind {
        ChannelKind::Announcement => return Some(NATIVE_PRIORITY),
        ChannelKind::Text => {},
        ChannelKind::Other => return None,
    }

    let name = name.to_lowercase();
    if name == "announcements" {
        return Some(EXACT_NAME_PRIORITY);
    }

    ANNOUNCEMENT_KEYWORDS
        .iter()
        .position(|kw| name.contains(kw))
        .map(|i| KEYWORD_BASE_PRIORITY + i as u32)
}

/// Keep the best `limit` channels by ascending priority. Ties keep the
/// input order.
#[must_use]
pub fn select_channels(channels: &[ChannelInfo], limit: usize) -> Vec<ChannelInfo> {
    let mut ranked: Vec<(u32, &ChannelInfo)> = channels
        .iter()
        .filter_map(|c| channel_priority(c.kind, &c.name).map(|p| (p, c)))
        .collect();
    ranked.sort_by_key(|(priority, _)| *priority);
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, c)| c.clone())
        .collect()
}
