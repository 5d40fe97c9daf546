mod deltat;
mod str_conv;

pub use self::deltat::string_to_deltat;

use chrono::{DateTime, Utc};

pub struct StrConv;

impl StrConv {
    pub fn timestamp_to_sfstring(timestamp: DateTime<Utc>) -> String {
        str_conv::timestamp_to_sfstring(timestamp)
    }
}
