use std::path::Path;

use chrono::{NaiveDate, TimeDelta};
use serde::Deserialize;

use crate::dates::Timestamp;
use crate::error::AppError;
use crate::models::{Event, EventWindow};
use crate::table::Table;

/// Day offsets around each event.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowDays {
    pub before: i64,
    pub after: i64,
}

impl WindowDays {
    /// Widest accepted offset on either side of an event.
    pub const MAX_DAYS: i64 = 366;

    pub fn validate(&self) -> Result<(), AppError> {
        for (name, days) in [("before", self.before), ("after", self.after)] {
            if !(0..=Self::MAX_DAYS).contains(&days) {
                return Err(AppError::ConfigError(format!(
                    "window_days.{name} must be between 0 and {}, got {days}",
                    Self::MAX_DAYS
                )));
            }
        }
        Ok(())
    }
}

/// Load events from a CSV or spreadsheet table with an `event_date_time`
/// column and optional `decision` / `new_rate` columns.
pub fn load_events(path: &Path) -> Result<Vec<Event>, AppError> {
    read_events(&Table::read(path)?)
}

fn read_events(table: &Table) -> Result<Vec<Event>, AppError> {
    let ts_col = table.column("event_date_time").ok_or_else(|| {
        AppError::ConfigError("events file must contain event_date_time column".into())
    })?;
    let decision_col = table.column("decision");
    let rate_col = table.column("new_rate");

    let mut events = Vec::new();
    for (line, row) in table.rows().enumerate() {
        let raw_ts = row.get(ts_col).trim();
        let event_date_time = Timestamp::parse(raw_ts).ok_or_else(|| {
            AppError::ConfigError(format!(
                "Unparseable event_date_time '{raw_ts}' on data row {}",
                line + 1
            ))
        })?;

        let decision = decision_col
            .map(|c| row.get(c).trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let new_rate = rate_col
            .map(|c| row.get(c).trim().replace(',', "."))
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<f64>().ok());

        events.push(Event {
            event_date_time,
            decision,
            new_rate,
        });
    }

    tracing::info!(count = events.len(), "Loaded events");
    Ok(events)
}

/// One window per event: `[date - before, date + after]`.
pub fn event_windows(events: &[Event], days: WindowDays) -> Vec<EventWindow> {
    events
        .iter()
        .map(|event| {
            let date = event.event_date_time.date();
            EventWindow {
                event: event.clone(),
                start: shift(date, days.before.saturating_neg()),
                end: shift(date, days.after),
            }
        })
        .collect()
}

/// `date + days`, saturating at the calendar bounds.
fn shift(date: NaiveDate, days: i64) -> NaiveDate {
    TimeDelta::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}
