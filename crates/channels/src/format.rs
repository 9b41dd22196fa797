//! Outbound message text: formatting and size-safe chunking.

use crate::{router::InboundMessage, source::ChannelInfo};

/// Render a routed message for the destination.
#[must_use]
pub fn format_message(msg: &InboundMessage, show_timestamp: bool) -> String {
    let mut out = String::with_capacity(msg.content.len() + 64);
    if show_timestamp {
        out.push_str(&format!(
            "📅 {}\n",
            msg.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    out.push_str(&format!("👤 {}\n💬 {}", msg.author, msg.content));
    out
}

/// Announcement sent into a community's thread when it is first registered.
#[must_use]
pub fn onboarding_notice(community: &str, channels: &[ChannelInfo]) -> String {
    let mut out = format!("🆕 New community: {community}");
    if !channels.is_empty() {
        out.push_str("\n\nMirrored channels:");
        for channel in channels {
            out.push_str(&format!("\n• #{}", channel.name));
        }
    }
    out
}

/// Split text into chunks of at most `max_len` bytes.
///
/// Splits prefer a newline, then a space, and never fall inside a
/// character. Byte length never undercounts Telegram's UTF-16 length.
#[must_use]
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return Vec::new();
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window = remaining.floor_char_boundary(max_len);
        if window == 0 {
            // A single character wider than the limit still has to go out.
            window = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }

        let head = &remaining[..window];
        let split_at = match head.rfind('\n').or_else(|| head.rfind(' ')) {
            Some(0) | None => window,
            Some(at) => at,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
        remaining = remaining.strip_prefix(' ').unwrap_or(remaining);
    }

    chunks
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::source::ChannelKind,
        chrono::{TimeZone, Utc},
    };

    fn message() -> InboundMessage {
        InboundMessage {
            source_id: "1".into(),
            content: "v2 is live".into(),
            author: "alice".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            community: "Acme".into(),
            channel: "announcements".into(),
        }
    }

    #[test]
    fn format_with_timestamp() {
        assert_eq!(
            format_message(&message(), true),
            "📅 2024-05-01 12:30:00 UTC\n👤 alice\n💬 v2 is live"
        );
    }

    #[test]
    fn format_without_timestamp() {
        assert_eq!(
            format_message(&message(), false),
            "👤 alice\n💬 v2 is live"
        );
    }

    #[test]
    fn onboarding_lists_channels() {
        let channels = vec![ChannelInfo {
            id: "1".into(),
            name: "announcements".into(),
            kind: ChannelKind::Text,
        }];
        assert_eq!(
            onboarding_notice("Acme", &channels),
            "🆕 New community: Acme\n\nMirrored channels:\n• #announcements"
        );
    }

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(chunk_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn prefers_newline_then_space() {
        assert_eq!(chunk_message("aaaa\nbbbb cccc", 10), vec!["aaaa", "bbbb cccc"]);
        assert_eq!(chunk_message("aaaa bbbb cccc", 10), vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn hard_split_without_separators() {
        assert_eq!(chunk_message("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn never_splits_a_character() {
        let text = format!("{}лz", "a".repeat(4095));
        let chunks = chunk_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4095);
        assert_eq!(chunks[1], "лz");
    }

    #[test]
    fn emoji_longer_than_limit_goes_out_whole() {
        let chunks = chunk_message("🚀🚀", 2);
        assert_eq!(chunks, vec!["🚀", "🚀"]);
    }

    #[test]
    fn chunks_reassemble_to_content() {
        let text = "word ".repeat(2000);
        let chunks = chunk_message(&text, 4000);
        assert!(chunks.iter().all(|c| c.len() <= 4000));
        assert_eq!(chunks.join(" ").split_whitespace().count(), 2000);
    }
}
