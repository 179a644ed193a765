use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::Level;

/// One rendered log line, kept around when capture is enabled.
#[derive(Clone, Debug)]
pub struct Record {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

impl Record {
    pub(crate) fn now(
        level: Level,
        target: &'static str,
        file: &'static str,
        line: u32,
        msg: String,
    ) -> Self {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
        Self {
            ts_ms,
            level,
            target,
            file,
            line,
            msg,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "ts_ms": self.ts_ms,
            "level": self.level.as_str(),
            "target": self.target,
            "file": self.file,
            "line": self.line,
            "msg": self.msg,
        })
    }

    pub fn text(&self, timestamps: bool) -> TextLine<'_> {
        TextLine {
            record: self,
            timestamps,
        }
    }
}

pub struct TextLine<'a> {
    record: &'a Record,
    timestamps: bool,
}

impl fmt::Display for TextLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timestamps {
            write!(f, "{} ", UtcMillis(self.record.ts_ms))?;
        }
        write!(
            f,
            "{:<5} {}: {}",
            self.record.level.as_str(),
            self.record.target,
            self.record.msg
        )
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` without pulling in a calendar crate.
struct UtcMillis(u64);

impl fmt::Display for UtcMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / 1000;
        let millis = self.0 % 1000;
        let (year, month, day) = date_from_epoch_days((secs / 86_400) as i64);
        let rem = secs % 86_400;
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
            rem / 3600,
            (rem / 60) % 60,
            rem % 60
        )
    }
}

// Hinnant's days-to-civil conversion.
fn date_from_epoch_days(days: i64) -> (i64, u32, u32) {
    let shifted = days + 719_468;
    let era = shifted.div_euclid(146_097);
    let day_of_era = shifted.rem_euclid(146_097);
    let year_of_era = (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * month_index + 2) / 5 + 1) as u32;
    let month = (if month_index < 10 { month_index + 3 } else { month_index - 9 }) as u32;
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
