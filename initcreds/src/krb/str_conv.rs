use chrono::{DateTime, Utc};

// Locale-style date and time, the format ticket-listing tools print.
const SFSTRING_FORMAT: &str = "%x %X";

pub fn timestamp_to_sfstring(timestamp: DateTime<Utc>) -> String {
    timestamp.format(SFSTRING_FORMAT).to_string()
}
