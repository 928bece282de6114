use crate::analytics::{Filters, Grouping};
use failure::Error;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend_url: Url,
    pub stream_url: Url,
    pub live_poll: Duration,
    pub browse_poll: Duration,
    pub session_db: PathBuf,
    pub reconnect_delay: Duration,
    pub report_filters: Filters,
}

impl Settings {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup("BACKEND_URL").unwrap_or_else(|| "http://localhost:5000".to_string());
        let backend_url = Url::parse(&backend)
            .map_err(|e| format_err!("BACKEND_URL {:?} is not a URL: {}", backend, e))?;
        let stream_url = match lookup("STREAM_URL") {
            Some(s) => {
                Url::parse(&s).map_err(|e| format_err!("STREAM_URL {:?} is not a URL: {}", s, e))?
            }
            None => stream_url_for(&backend_url)?,
        };
        Ok(Settings {
            backend_url,
            stream_url,
            live_poll: interval_ms(&lookup, "LIVE_POLL_MS", 1000)?,
            browse_poll: interval_ms(&lookup, "BROWSE_POLL_MS", 5000)?,
            session_db: lookup("SESSION_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("session.db")),
            reconnect_delay: Duration::from_secs(number(&lookup, "RECONNECT_SECS", 10)?),
            report_filters: report_filters(&lookup)?,
        })
    }
}

fn number<F>(lookup: &F, key: &str, default: u64) -> Result<u64, Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(s) => s
            .trim()
            .parse()
            .map_err(|_| format_err!("{} must be a non-negative integer, got {:?}", key, s)),
        None => Ok(default),
    }
}

fn interval_ms<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, Error>
where
    F: Fn(&str) -> Option<String>,
{
    match number(lookup, key, default)? {
        0 => bail!("{} must be at least 1", key),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn report_filters<F>(lookup: &F) -> Result<Filters, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let grouping = match lookup("REPORT_GROUPING").as_deref().map(str::trim) {
        None | Some("") | Some("date") => Grouping::ByDate,
        Some("hour") => Grouping::ByHour,
        Some(other) => bail!("REPORT_GROUPING must be \"date\" or \"hour\", got {:?}", other),
    };
    let field = |key: &str| lookup(key).unwrap_or_default();
    Ok(Filters::from_form(
        &field("REPORT_START"),
        &field("REPORT_END"),
        &field("REPORT_VIOLATION"),
        grouping,
    ))
}

pub fn stream_url_for(backend_url: &Url) -> Result<Url, Error> {
    let mut url = backend_url.clone();
    let scheme = if backend_url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| format_err!("Cannot derive stream URL from {}", backend_url))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, Error> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.backend_url.as_str(), "http://localhost:5000/");
        assert_eq!(
            s.stream_url.as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(s.live_poll, Duration::from_millis(1000));
        assert_eq!(s.browse_poll, Duration::from_millis(5000));
        assert_eq!(s.reconnect_delay, Duration::from_secs(10));
        assert_eq!(s.report_filters, Filters::default());
    }

    #[test]
    fn report_filters_from_env() {
        let s = settings(&[
            ("REPORT_START", "2024-01-01"),
            ("REPORT_VIOLATION", "Overspeeding"),
            ("REPORT_GROUPING", "hour"),
        ])
        .unwrap();
        assert!(s.report_filters.start.is_some());
        assert_eq!(s.report_filters.end, None);
        assert_eq!(s.report_filters.violation.as_deref(), Some("Overspeeding"));
        assert_eq!(s.report_filters.grouping, Grouping::ByHour);
        assert!(settings(&[("REPORT_GROUPING", "weekly")]).is_err());
    }

    #[test]
    fn https_backend_gets_secure_stream() {
        let s = settings(&[("BACKEND_URL", "https://cams.example.org")]).unwrap();
        assert_eq!(s.stream_url.scheme(), "wss");
    }

    #[test]
    fn malformed_interval_is_an_error() {
        assert!(settings(&[("LIVE_POLL_MS", "fast")]).is_err());
        assert!(settings(&[("BACKEND_URL", "not a url")]).is_err());
    }

    #[test]
    fn zero_interval_is_an_error() {
        assert!(settings(&[("LIVE_POLL_MS", "0")]).is_err());
        assert!(settings(&[("BROWSE_POLL_MS", "0")]).is_err());
        let s = settings(&[("LIVE_POLL_MS", "1")]).unwrap();
        assert_eq!(s.live_poll, Duration::from_millis(1));
    }
}
