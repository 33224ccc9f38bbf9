//! FFmpeg output parsing utilities.
//!
//! Reassembly runs ffmpeg with `-progress pipe:2`, so stderr carries the
//! regular log (including the input `Duration:` header) interleaved with
//! `key=value` progress lines such as `out_time=00:00:04.000000`.

/// Parse time string in HH:MM:SS.ms format to seconds.
///
/// # Examples
/// ```ignore
/// assert_eq!(parse_time("00:00:10.50"), Some(10.5));
/// assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
/// assert_eq!(parse_time("N/A"), None);
/// ```
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse the time field of a progress line, in seconds.
///
/// Matches both the classic stats line (`... time=00:01:30.50 bitrate=...`)
/// and the `-progress` form (`out_time=00:01:30.500000`).
pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parse the input duration from ffmpeg's stream header
/// (`  Duration: 00:00:10.00, start: 1.400000, bitrate: 1361 kb/s`).
pub fn parse_duration_header(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let end = rest.find(',').unwrap_or(rest.len());
    parse_time(&rest[..end])
}

/// Whether `line` is one of the `key=value` lines written by `-progress`
/// rather than regular log output.
pub fn is_progress_line(line: &str) -> bool {
    line.split_once('=').is_some_and(|(key, _)| {
        !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    })
}

/// Completion percentage of `position` within `duration`, clamped to 0-100.
pub fn progress_percent(position: f64, duration: f64) -> Option<f32> {
    if duration <= 0.0 || !position.is_finite() {
        return None;
    }
    Some(((position / duration) * 100.0).clamp(0.0, 100.0) as f32)
}
