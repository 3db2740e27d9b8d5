//! Line codec for the instrument log.
//!
//! Every line starts with a flags cell that is always empty and is dropped.
//! Decimal commas are normalized to dots. The header names the time column
//! followed by one quoted id per mass channel; data rows carry a timestamp
//! followed by one ion current per channel.

use crate::error::{AppResult, MimsError};
use chrono::{NaiveDateTime, TimeDelta};

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Parsed header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Label the instrument gives the time column.
    pub time_label: String,
    /// Mass channel ids, quotes stripped.
    pub channels: Vec<String>,
}

/// One decoded data row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Instrument timestamp, fraction read as milliseconds.
    pub timestamp: NaiveDateTime,
    /// One ion current per header channel.
    pub currents: Vec<f64>,
}

impl RawRow {
    /// Ion-current sample: minutes since `t0`, then the currents.
    pub fn to_sample(&self, t0: NaiveDateTime) -> Vec<f64> {
        let mut sample = Vec::with_capacity(self.currents.len() + 1);
        sample.push(minutes_between(t0, self.timestamp));
        sample.extend_from_slice(&self.currents);
        sample
    }
}

/// Split a line into cells: the first separator removed (joining the flags
/// cell to the one after it), decimal commas normalized, quotes stripped,
/// trailing empty cells dropped.
pub fn split_cells(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']).replacen(';', "", 1);
    let mut cells: Vec<String> = line
        .split(';')
        .map(|cell| cell.replace(',', ".").replace('"', "").trim().to_string())
        .collect();
    while cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    cells
}

/// Decode the header line (line 1).
pub fn parse_header(line: &str) -> AppResult<Header> {
    let mut cells = split_cells(line).into_iter();
    let time_label = cells.next().ok_or_else(|| MimsError::Parse {
        line: 1,
        reason: "header has no time column".to_string(),
    })?;
    let channels: Vec<String> = cells.collect();
    if channels.is_empty() {
        return Err(MimsError::Parse {
            line: 1,
            reason: "header lists no mass channel".to_string(),
        });
    }
    Ok(Header {
        time_label,
        channels,
    })
}

/// Decode one data line.
pub fn parse_row(line: &str, line_no: usize, channel_count: usize) -> AppResult<RawRow> {
    let cells = split_cells(line);
    let (stamp, values) = cells.split_first().ok_or_else(|| MimsError::Parse {
        line: line_no,
        reason: "empty data row".to_string(),
    })?;

    if values.len() < channel_count {
        return Err(MimsError::Parse {
            line: line_no,
            reason: format!(
                "expected {channel_count} ion currents, found {}",
                values.len()
            ),
        });
    }

    let timestamp = parse_timestamp(stamp, line_no)?;
    let currents = values[..channel_count]
        .iter()
        .map(|cell| {
            cell.parse::<f64>().map_err(|_| MimsError::Parse {
                line: line_no,
                reason: format!("'{cell}' is not a number"),
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(RawRow {
        timestamp,
        currents,
    })
}

/// Parse `yyyy/MM/dd HH:mm:ss.S`.
///
/// The digits after the dot count milliseconds, so `12:00:00.5` is five
/// milliseconds past the second, matching how the acquisition software
/// reads its own logs.
pub fn parse_timestamp(cell: &str, line_no: usize) -> AppResult<NaiveDateTime> {
    let invalid = |reason: String| MimsError::Parse {
        line: line_no,
        reason,
    };

    let (base, millis) = match cell.rsplit_once('.') {
        Some((base, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            let millis = digits
                .parse::<i64>()
                .map_err(|e| invalid(format!("bad milliseconds '{digits}': {e}")))?;
            (base, millis)
        }
        _ => (cell, 0),
    };

    let seconds = NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT)
        .map_err(|e| invalid(format!("bad timestamp '{cell}': {e}")))?;
    let offset = TimeDelta::try_milliseconds(millis)
        .ok_or_else(|| invalid(format!("milliseconds out of range in '{cell}'")))?;
    Ok(seconds + offset)
}

/// Elapsed minutes from `t0` to `t`.
pub fn minutes_between(t0: NaiveDateTime, t: NaiveDateTime) -> f64 {
    (t - t0).num_milliseconds() as f64 / 60_000.0
}
