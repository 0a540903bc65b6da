//! Grouping and summary helpers over decrypted messages.
//!
//! Pure functions: no decryption, no I/O.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::model::message::DecryptedMessage;

/// Display label for messages without a `from` field.
pub const NO_SENDER_LABEL: &str = "(no sender)";

/// Messages grouped by sender. `None` holds messages without a `from` field,
/// so no real sender name can be merged with them.
pub type SenderGroups<'a> = BTreeMap<Option<String>, Vec<&'a DecryptedMessage>>;

/// Group messages by sender, keeping arrival order inside each group.
pub fn group_by_sender(messages: &[DecryptedMessage]) -> SenderGroups<'_> {
    let mut groups = SenderGroups::new();
    for msg in messages {
        groups
            .entry(msg.sender().map(str::to_string))
            .or_default()
            .push(msg);
    }
    groups
}

/// Return the top N senders by message count.
pub fn top_senders(messages: &[DecryptedMessage], n: usize) -> Vec<(Option<String>, usize)> {
    let mut counts: HashMap<Option<&str>, usize> = HashMap::new();
    for msg in messages {
        *counts.entry(msg.sender()).or_default() += 1;
    }
    let mut sorted: Vec<(Option<String>, usize)> = counts
        .into_iter()
        .map(|(sender, count)| (sender.map(str::to_string), count))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(n);
    sorted
}

/// Count messages per `msgtype`.
pub fn count_by_type(messages: &[DecryptedMessage]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for msg in messages {
        *counts
            .entry(msg.msgtype().unwrap_or("unknown").to_string())
            .or_default() += 1;
    }
    counts
}

/// Return the time range (oldest, newest) across the given messages.
pub fn time_range(messages: &[DecryptedMessage]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut times = messages.iter().filter_map(DecryptedMessage::timestamp);
    let first = times.next()?;
    Some(times.fold((first, first), |(min, max), t| (min.min(t), max.max(t))))
}

/// Count how many messages reference at least one attachment.
pub fn count_with_attachments(messages: &[DecryptedMessage]) -> usize {
    messages
        .iter()
        .filter(|m| !m.attachments().is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(seq: u64, from: Option<&str>) -> DecryptedMessage {
        let content = match from {
            Some(f) => json!({"from": f, "msgtype": "text", "msgtime": seq as i64 * 1000}),
            None => json!({"msgtype": "revoke"}),
        };
        DecryptedMessage {
            seq,
            msgid: format!("m{seq}"),
            content,
        }
    }

    #[test]
    fn test_group_preserves_arrival_order() {
        let messages = vec![
            msg(1, Some("alice")),
            msg(2, Some("bob")),
            msg(3, Some("alice")),
            msg(4, None),
            msg(5, Some("alice")),
        ];
        let groups = group_by_sender(&messages);
        assert_eq!(groups.len(), 3);
        let alice: Vec<u64> = groups[&Some("alice".to_string())].iter().map(|m| m.seq).collect();
        assert_eq!(alice, vec![1, 3, 5]);
        assert_eq!(groups[&Some("bob".to_string())].len(), 1);
        assert_eq!(groups[&None][0].seq, 4);
    }

    #[test]
    fn test_sender_named_unknown_is_not_merged_with_missing_sender() {
        let messages = vec![msg(1, Some("unknown")), msg(2, None), msg(3, Some("(no sender)"))];
        let groups = group_by_sender(&messages);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&Some("unknown".to_string())][0].seq, 1);
        assert_eq!(groups[&None][0].seq, 2);

        let top = top_senders(&messages, 10);
        assert_eq!(top.len(), 3);
    }

    #[test]
    fn test_group_empty() {
        assert!(group_by_sender(&[]).is_empty());
    }

    #[test]
    fn test_top_senders() {
        let messages = vec![
            msg(1, Some("bob")),
            msg(2, Some("alice")),
            msg(3, Some("alice")),
        ];
        let top = top_senders(&messages, 1);
        assert_eq!(top, vec![(Some("alice".to_string()), 2)]);
    }

    #[test]
    fn test_time_range_and_types() {
        let messages = vec![msg(5, Some("a")), msg(2, Some("b")), msg(9, None)];
        let (min, max) = time_range(&messages).unwrap();
        assert_eq!(min.timestamp(), 2);
        assert_eq!(max.timestamp(), 5);
        let types = count_by_type(&messages);
        assert_eq!(types["text"], 2);
        assert_eq!(types["revoke"], 1);
    }
}
