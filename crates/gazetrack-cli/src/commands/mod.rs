pub mod client;
pub mod data;
pub mod heatmap;
pub mod server;
pub mod tracking;

use std::time::Duration;

use serde::Serialize;

use gazetrack_client::HttpChannel;
use gazetrack_core::Result;

/// Request timeout for one-shot remote commands.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse "100ms", "2s", "5m", "1h" or a bare number of seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        // Assume seconds
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    let ms = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("duration too large: {s}"))?;
    if ms == 0 {
        return Err(format!("duration must be positive: {s}"));
    }
    Ok(Duration::from_millis(ms))
}

/// Tokio runtime for a one-shot command.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

pub fn channel(api_url: &str) -> Result<HttpChannel> {
    HttpChannel::new(api_url, REQUEST_TIMEOUT)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one request against the server and pretty-print the reply.
pub fn remote<T, F, Fut>(api_url: &str, call: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(HttpChannel) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let channel = channel(api_url)?;
    let reply = runtime()?.block_on(call(channel))?;
    print_json(&reply)
}

pub fn parse_kind(s: &str) -> Result<gazetrack_core::ArtifactKind> {
    s.parse()
}
