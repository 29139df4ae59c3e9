use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use dotenvy::dotenv;
use std::env;
use tracing::warn;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub schedule_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let database_url =
            env::var("PGVECTOR_CONNECTION").context("PGVECTOR_CONNECTION must be set")?;
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("PORT must be a valid number")?;

        let raw_tz = env::var("SCHEDULE_TIMEZONE")
            .or_else(|_| env::var("TZ"))
            .unwrap_or_default();
        let schedule_offset = match parse_utc_offset(&raw_tz) {
            Some(offset) => offset,
            None => {
                if !raw_tz.is_empty() && !raw_tz.eq_ignore_ascii_case("utc") {
                    warn!(tz = %raw_tz, "Unrecognized schedule timezone; using UTC");
                }
                Utc.fix()
            }
        };

        Ok(Self {
            database_url,
            port,
            schedule_offset,
        })
    }
}

/// Parse a fixed UTC offset like `-05:00`, `+0530`, or `+5`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (sign, rest) = match raw.as_bytes()[0] {
        b'+' => (1i32, &raw[1..]),
        b'-' => (-1i32, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
    } else if rest.len() == 4 {
        (rest[..2].parse().ok()?, rest[2..].parse().ok()?)
    } else {
        (rest.parse().ok()?, 0)
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offsets() {
        assert_eq!(
            parse_utc_offset("-05:00").unwrap().local_minus_utc(),
            -5 * 3600
        );
        assert_eq!(
            parse_utc_offset("+0530").unwrap().local_minus_utc(),
            5 * 3600 + 30 * 60
        );
        assert_eq!(parse_utc_offset("+5").unwrap().local_minus_utc(), 5 * 3600);
    }

    #[test]
    fn test_parse_offset_rejects_garbage() {
        assert!(parse_utc_offset("").is_none());
        assert!(parse_utc_offset("America/New_York").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
        assert!(parse_utc_offset("-05:99").is_none());
    }
}
