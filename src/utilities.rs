use chrono::{DateTime, Datelike, SecondsFormat, Timelike, Utc};

/// Builds the S3 key for a recording started at `timestamp`.
///
/// The layout is `{year}{month}{day}-{hour}-{YYYY-MM-DDTHH:MM:SS}.mp3`, all in UTC.
/// Month and day are not zero-padded; existing buckets are keyed that way.
pub fn recording_object_key(timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}{}-{}-{}.mp3",
        timestamp.year(),
        timestamp.month(),
        timestamp.day(),
        timestamp.hour(),
        timestamp.format("%Y-%m-%dT%H:%M:%S")
    )
}

/// Millisecond precision UTC timestamp used to prefix ffmpeg stderr lines.
pub fn log_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
