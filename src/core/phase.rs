use chrono::{DateTime, Duration, Utc};

use crate::models::Event;

/// Default length of the message window
pub const DEFAULT_MESSAGE_WINDOW_MINUTES: i64 = 10;

/// Whether the message phase accepts submissions at `now`.
///
/// Open iff the organizer flag is set, an opening time is recorded, and `now`
/// is no later than `opened_at + window` (the end instant itself is open).
/// A flag without an opening time counts as closed.
pub fn is_open(event: &Event, now: DateTime<Utc>, window: Duration) -> bool {
    match (event.message_write_open, event.message_opened_at) {
        (true, Some(opened_at)) => now <= opened_at + window,
        _ => false,
    }
}

/// When the current window closes, if one was ever opened
pub fn closes_at(event: &Event, window: Duration) -> Option<DateTime<Utc>> {
    event.message_opened_at.map(|opened_at| opened_at + window)
}
