//! Reshapes raw upstream rows into a date-indexed [`ObservationTable`].
//!
//! The upstream sources disagree on both the number of columns and the way
//! the date cell is encoded (epoch seconds, epoch milliseconds or text).
//! [`normalize`] hides both differences from callers.

use chrono::NaiveDate;
use log::{debug, warn};

use crate::errors::{BvcError, Result};
use crate::models::payload::{Cell, RawPayload};
use crate::models::table::{Column, DateRange, ObservationTable};
use crate::util;

/// Whether the subject is a market index or a listed security.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Index,
    Security,
}

/// Column layout implied by the number of cells per row (date cell included).
fn layout_for(arity: usize) -> Option<&'static [Column]> {
    match arity {
        2 => Some(Column::SINGLE),
        6 => Some(Column::FULL),
        _ => None,
    }
}

fn parse_date_cell(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Number(n) => util::epoch_to_date(*n),
        Cell::Text(s) => util::parse_date_text(s),
        Cell::Null => None,
    }
}

/// Turn `payload` into an observation table.
///
/// Rows whose date cell cannot be parsed are dropped; when `range` is given
/// only rows dated inside it (inclusive) are kept. Row order is preserved as
/// delivered, callers that need ascending dates call
/// [`ObservationTable::sort_by_date`]. Value cells that are missing or not
/// numeric become `NaN`.
pub fn normalize(
    payload: &RawPayload,
    subject: SubjectKind,
    range: Option<&DateRange>,
) -> Result<ObservationTable> {
    let first = payload.rows.first().ok_or_else(|| {
        BvcError::EmptyPayload(format!("no rows returned for {}", payload.subject))
    })?;

    let arity = first.len();
    let layout = layout_for(arity).ok_or_else(|| {
        BvcError::MalformedPayload(format!(
            "{} rows have {} columns, expected 2 or 6",
            payload.subject, arity
        ))
    })?;

    if subject == SubjectKind::Security && arity == 2 {
        warn!("Security {} returned a single value column", payload.subject);
    }

    let mut index = Vec::with_capacity(payload.len());
    let mut series: Vec<Vec<f64>> = vec![Vec::with_capacity(payload.len()); layout.len()];
    let mut unparsed = 0usize;
    let mut filtered = 0usize;

    for (i, row) in payload.rows.iter().enumerate() {
        if row.len() != arity {
            return Err(BvcError::MalformedPayload(format!(
                "{} row {} has {} columns, expected {}",
                payload.subject,
                i,
                row.len(),
                arity
            )));
        }

        let date = match parse_date_cell(&row[0]) {
            Some(date) => date,
            None => {
                debug!("Dropping {} row {} with unparseable date {:?}", payload.subject, i, row[0]);
                unparsed += 1;
                continue;
            }
        };

        if let Some(range) = range {
            if !range.contains(&date) {
                filtered += 1;
                continue;
            }
        }

        index.push(date);
        for (values, cell) in series.iter_mut().zip(&row[1..]) {
            values.push(cell.as_f64().unwrap_or(f64::NAN));
        }
    }

    if unparsed == payload.len() {
        return Err(BvcError::EmptyPayload(format!(
            "none of the {} dates for {} could be parsed",
            unparsed, payload.subject
        )));
    }

    if index.is_empty() {
        return Err(BvcError::EmptyPayload(format!(
            "no {} rows inside the requested range ({} filtered out)",
            payload.subject, filtered
        )));
    }

    debug!(
        "Normalized {}: {} rows kept, {} undated, {} outside range",
        payload.subject,
        index.len(),
        unparsed,
        filtered
    );

    ObservationTable::new(
        &payload.subject,
        index,
        layout.iter().copied().zip(series).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn index_payload_in_epoch_seconds() {
        let payload = RawPayload::new(
            "MASI",
            vec![
                vec![1_600_000_000i64.into(), 10.5.into()],
                vec![1_700_000_000i64.into(), 11.0.into()],
            ],
        );

        let table = normalize(&payload, SubjectKind::Index, None).unwrap();

        assert_eq!(table.column_names(), vec![Column::Value]);
        assert_eq!(table.index(), &[d(2020, 9, 13), d(2023, 11, 14)]);
        assert_eq!(table.column(Column::Value).unwrap(), &[10.5, 11.0]);
    }

    #[test]
    fn security_payload_with_text_dates() {
        let payload = RawPayload::new(
            "ATW",
            vec![vec![
                "2021-01-04".into(),
                100i64.into(),
                95i64.into(),
                105i64.into(),
                1.2.into(),
                5000i64.into(),
            ]],
        );

        let table = normalize(&payload, SubjectKind::Security, None).unwrap();

        assert_eq!(table.column_names(), Column::FULL.to_vec());
        assert_eq!(table.index(), &[d(2021, 1, 4)]);
        let (_, values) = table.row(0).unwrap();
        assert_eq!(values, vec![100.0, 95.0, 105.0, 1.2, 5000.0]);
    }

    #[test]
    fn millisecond_epochs_are_detected() {
        let payload = RawPayload::new(
            "MSI20",
            vec![vec![1_600_000_000_000i64.into(), 1.0.into()]],
        );

        let table = normalize(&payload, SubjectKind::Index, None).unwrap();
        assert_eq!(table.index(), &[d(2020, 9, 13)]);
    }

    #[test]
    fn unparseable_dates_are_dropped() {
        let payload = RawPayload::new(
            "MASI",
            vec![
                vec!["2021-01-04".into(), 10.0.into()],
                vec!["not-a-date".into(), 12i64.into()],
                vec![Cell::Null, 13.0.into()],
                vec!["2021-01-05".into(), 11.0.into()],
            ],
        );

        let table = normalize(&payload, SubjectKind::Index, None).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.column(Column::Value).unwrap(), &[10.0, 11.0]);
    }

    #[test]
    fn range_filter_is_inclusive() {
        let payload = RawPayload::new(
            "MASI",
            vec![
                vec!["2021-01-01".into(), 1.0.into()],
                vec!["2021-01-02 09:30:00".into(), 2.0.into()],
                vec!["2021-01-03".into(), 3.0.into()],
                vec!["2021-01-04 16:00:00".into(), 4.0.into()],
                vec!["2021-01-05".into(), 5.0.into()],
            ],
        );
        let range = DateRange::new(d(2021, 1, 2), d(2021, 1, 4)).unwrap();

        let table = normalize(&payload, SubjectKind::Index, Some(&range)).unwrap();

        assert_eq!(table.index(), &[d(2021, 1, 2), d(2021, 1, 3), d(2021, 1, 4)]);
        assert!(table.index().iter().all(|date| range.contains(date)));
    }

    #[test]
    fn source_order_is_preserved() {
        let payload = RawPayload::new(
            "MASI",
            vec![
                vec!["2021-01-05".into(), 5.0.into()],
                vec!["2021-01-04".into(), 4.0.into()],
            ],
        );

        let table = normalize(&payload, SubjectKind::Index, None).unwrap();
        assert_eq!(table.index(), &[d(2021, 1, 5), d(2021, 1, 4)]);
    }

    #[test]
    fn unexpected_arity_is_malformed() {
        let payload = RawPayload::new(
            "ATW",
            vec![vec!["2021-01-04".into(), 1.0.into(), 2.0.into()]],
        );

        let err = normalize(&payload, SubjectKind::Security, None).unwrap_err();
        assert!(matches!(err, BvcError::MalformedPayload(_)));
    }

    #[test]
    fn ragged_rows_are_malformed() {
        let payload = RawPayload::new(
            "MASI",
            vec![
                vec!["2021-01-04".into(), 1.0.into()],
                vec!["2021-01-05".into(), 1.0.into(), 2.0.into()],
            ],
        );

        let err = normalize(&payload, SubjectKind::Index, None).unwrap_err();
        assert!(matches!(err, BvcError::MalformedPayload(_)));
    }

    #[test]
    fn empty_and_fully_undated_payloads() {
        let empty = RawPayload::new("MASI", vec![]);
        assert!(matches!(
            normalize(&empty, SubjectKind::Index, None),
            Err(BvcError::EmptyPayload(_))
        ));

        let undated = RawPayload::new("MASI", vec![vec!["??".into(), 1.0.into()]]);
        assert!(matches!(
            normalize(&undated, SubjectKind::Index, None),
            Err(BvcError::EmptyPayload(_))
        ));
    }

    #[test]
    fn nothing_in_range_is_empty() {
        let payload = RawPayload::new("MASI", vec![vec!["2020-06-01".into(), 1.0.into()]]);
        let range = DateRange::new(d(2021, 1, 1), d(2021, 12, 31)).unwrap();

        assert!(matches!(
            normalize(&payload, SubjectKind::Index, Some(&range)),
            Err(BvcError::EmptyPayload(_))
        ));
    }

    #[test]
    fn missing_values_become_nan() {
        let payload = RawPayload::new(
            "ATW",
            vec![vec![
                "2021-01-04".into(),
                "480,50".into(),
                Cell::Null,
                479i64.into(),
                "-".into(),
                12i64.into(),
            ]],
        );

        let table = normalize(&payload, SubjectKind::Security, None).unwrap();

        assert_eq!(table.column(Column::Value).unwrap(), &[480.5]);
        assert!(table.column(Column::Min).unwrap()[0].is_nan());
        assert!(table.column(Column::Variation).unwrap()[0].is_nan());
    }
}
