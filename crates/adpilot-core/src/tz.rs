//! Marketplace time zones and local-day helpers.
//!
//! Every stored timestamp is UTC. Local time is only used to decide where a
//! calendar day starts for an account (daily caps) and to place schedule runs
//! at a wall-clock time.
//!
//! DST handling for wall-clock times is fixed: a time that falls in a
//! spring-forward gap is shifted forward to the first valid minute, and a time
//! that occurs twice on fall-back resolves to the earliest instant.

use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::Config;
use crate::error::{AdpilotError, Result};

/// IANA zone for a marketplace country code.
pub fn marketplace_tz(code: &str) -> Option<Tz> {
    let tz = match code.to_ascii_uppercase().as_str() {
        "US" => chrono_tz::America::Los_Angeles,
        "CA" => chrono_tz::America::Los_Angeles,
        "MX" => chrono_tz::America::Los_Angeles,
        "BR" => chrono_tz::America::Sao_Paulo,
        "UK" | "GB" => chrono_tz::Europe::London,
        "DE" => chrono_tz::Europe::Berlin,
        "FR" => chrono_tz::Europe::Paris,
        "IT" => chrono_tz::Europe::Rome,
        "ES" => chrono_tz::Europe::Madrid,
        "NL" => chrono_tz::Europe::Amsterdam,
        "SE" => chrono_tz::Europe::Stockholm,
        "PL" => chrono_tz::Europe::Warsaw,
        "TR" => chrono_tz::Europe::Istanbul,
        "AE" => chrono_tz::Asia::Dubai,
        "SA" => chrono_tz::Asia::Riyadh,
        "IN" => chrono_tz::Asia::Kolkata,
        "JP" => chrono_tz::Asia::Tokyo,
        "AU" => chrono_tz::Australia::Sydney,
        "SG" => chrono_tz::Asia::Singapore,
        _ => return None,
    };
    Some(tz)
}

/// Resolves the time zone that defines an account's calendar day.
pub trait TimezoneResolver: Send + Sync {
    fn timezone_for(&self, account_id: &str) -> Result<Tz>;
}

/// Resolver backed by the `accounts` section of the config.
///
/// Order: explicit `timezone`, then the account `marketplace`, then
/// `default_marketplace`.
#[derive(Debug, Clone)]
pub struct ConfigTimezones {
    config: Config,
}

impl ConfigTimezones {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl TimezoneResolver for ConfigTimezones {
    fn timezone_for(&self, account_id: &str) -> Result<Tz> {
        let account = self.config.account(account_id);
        if let Some(name) = account.timezone {
            return name
                .parse::<Tz>()
                .map_err(|_| AdpilotError::UnknownTimezone(name.clone()));
        }
        let marketplace = account
            .marketplace
            .unwrap_or_else(|| self.config.default_marketplace.clone());
        marketplace_tz(&marketplace).ok_or(AdpilotError::UnknownTimezone(marketplace))
    }
}

/// Map a wall-clock time in `tz` to UTC, shifting gaps forward and taking the
/// earliest instant for ambiguous times.
pub fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let mut t = naive;
            // gaps are at most a couple of hours in practice
            for _ in 0..180 {
                t += Duration::minutes(1);
                if let LocalResult::Single(dt) = tz.from_local_datetime(&t) {
                    return Ok(dt.with_timezone(&Utc));
                }
            }
            Err(AdpilotError::InvalidInput(format!(
                "local time {naive} does not exist in {tz}"
            )))
        }
    }
}

/// Calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn marketplace_lookup_is_case_insensitive() {
        assert_eq!(marketplace_tz("de"), Some(chrono_tz::Europe::Berlin));
        assert_eq!(marketplace_tz("JP"), Some(chrono_tz::Asia::Tokyo));
        assert_eq!(marketplace_tz("ZZ"), None);
    }

    #[test]
    fn resolver_prefers_explicit_timezone() {
        let mut cfg = Config::default();
        cfg.accounts.insert(
            "a".to_string(),
            AccountConfig {
                marketplace: Some("DE".to_string()),
                timezone: Some("Asia/Tokyo".to_string()),
            },
        );
        cfg.accounts.insert(
            "b".to_string(),
            AccountConfig {
                marketplace: Some("DE".to_string()),
                timezone: None,
            },
        );
        let r = ConfigTimezones::new(cfg);
        assert_eq!(r.timezone_for("a").unwrap(), chrono_tz::Asia::Tokyo);
        assert_eq!(r.timezone_for("b").unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(
            r.timezone_for("unlisted").unwrap(),
            chrono_tz::America::Los_Angeles
        );
    }

    #[test]
    fn resolver_rejects_unknown_marketplace() {
        let mut cfg = Config::default();
        cfg.default_marketplace = "XX".to_string();
        let r = ConfigTimezones::new(cfg);
        assert!(matches!(
            r.timezone_for("a"),
            Err(AdpilotError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn gap_shifts_forward() {
        // New York skips 02:00-03:00 on 2024-03-10
        let tz: Tz = "America/New_York".parse().unwrap();
        let got = resolve_local(naive(2024, 3, 10, 2, 30), tz).unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2024, 3, 10, 7, 0, 0).unwrap());
    }

    #[test]
    fn ambiguous_takes_earliest() {
        // 01:30 occurs twice in New York on 2024-11-03; EDT instant is 05:30Z
        let tz: Tz = "America/New_York".parse().unwrap();
        let got = resolve_local(naive(2024, 11, 3, 1, 30), tz).unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap());
    }

    #[test]
    fn local_day_differs_from_utc_day() {
        // 23:30Z on Jan 1 is already Jan 2 in Tokyo and still Jan 1 in Los Angeles
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 23, 30, 0).unwrap();
        assert_eq!(
            local_date(now, chrono_tz::Asia::Tokyo),
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
        );
        assert_eq!(
            local_date(now, chrono_tz::America::Los_Angeles),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );
    }
}
