use std::fmt;
use std::time::Duration;

use chrono::{Datelike as _, NaiveDateTime, NaiveTime, TimeDelta};
use serde::Deserialize;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
const WEEKLY_FALLBACK: Duration = Duration::from_secs(24 * 3600);

/// How often a timeline fires.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
    Daily {
        #[serde(default)]
        time: ClockTime,
    },
    Weekly {
        #[serde(default)]
        time: ClockTime,
        /// 0 = Monday .. 6 = Sunday. Empty means Monday.
        #[serde(default)]
        days: Vec<u8>,
    },
    Interval {
        #[serde(default)]
        hours: i64,
        #[serde(default)]
        minutes: i64,
    },
}

impl Cadence {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Self::Weekly { days, .. } = self
            && let Some(day) = days.iter().find(|d| **d > 6)
        {
            anyhow::bail!("weekday out of range (0=Monday..6=Sunday): {day}");
        }
        Ok(())
    }

    /// Delay from `now` (local wall clock) until the next run.
    pub fn delay_from(&self, now: NaiveDateTime) -> Duration {
        match self {
            Self::Daily { time } => {
                let mut target = now.date().and_time(time.0);
                if target <= now {
                    target += TimeDelta::days(1);
                }
                to_duration(target - now)
            }
            Self::Weekly { time, days } => {
                let days: &[u8] = if days.is_empty() { &[0] } else { days };
                (0..=7)
                    .map(|offset| now.date() + TimeDelta::days(offset))
                    .filter(|date| {
                        let weekday = date.weekday().num_days_from_monday() as u8;
                        days.contains(&weekday)
                    })
                    .map(|date| date.and_time(time.0))
                    .find(|target| *target > now)
                    .map(|target| to_duration(target - now))
                    .unwrap_or(WEEKLY_FALLBACK)
            }
            Self::Interval { hours, minutes } => {
                let total = hours.saturating_mul(3600).saturating_add(minutes.saturating_mul(60));
                if total <= 0 {
                    DEFAULT_INTERVAL
                } else {
                    Duration::from_secs(total as u64)
                }
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily { time } => write!(f, "daily at {time}"),
            Self::Weekly { time, days } => write!(f, "weekly at {time} on {days:?}"),
            Self::Interval { hours, minutes } => write!(f, "every {hours}h{minutes}m"),
        }
    }
}

/// Delay for an optional cadence. Absent runs immediately.
pub fn delay_for(cadence: Option<&Cadence>, now: NaiveDateTime) -> Duration {
    cadence.map_or(Duration::ZERO, |c| c.delay_from(now))
}

fn to_duration(delta: TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

/// `HH:MM` wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ClockTime(pub NaiveTime);

impl Default for ClockTime {
    fn default() -> Self {
        Self(NaiveTime::MIN)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl std::str::FromStr for ClockTime {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(Self)
            .map_err(|err| format!("invalid time {raw:?} (expected HH:MM): {err}"))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}
