use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Numeric epoch values at or above this are milliseconds, below it seconds.
/// The upstream API has switched units between releases; the threshold is a
/// magnitude heuristic, not a documented contract.
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1e10;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// UTC calendar date of a numeric epoch value, seconds or milliseconds by magnitude.
pub fn epoch_to_date(value: f64) -> Option<NaiveDate> {
    if !value.is_finite() {
        return None;
    }

    let datetime = if value < EPOCH_MILLIS_THRESHOLD {
        let secs = value.floor();
        let nanos = ((value - secs) * 1e9) as u32;
        DateTime::<Utc>::from_timestamp(secs as i64, nanos)?
    } else {
        DateTime::<Utc>::from_timestamp_millis(value as i64)?
    };

    Some(datetime.date_naive())
}

/// Calendar date of a date or date-time string. All-digit strings are read as
/// epoch values.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    let digits = s.strip_prefix('-').unwrap_or(s);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(|v| epoch_to_date(v as f64));
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(s, format) {
            return Some(datetime.date());
        }
    }

    // 带时区的时间换算为 UTC 日期，与数字时间戳一致
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Parse a number written the way the Casablanca sites print them:
/// `1 234,56`, `12,5 %`, `-0,83%`, with regular or non-breaking spaces.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '%' && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Today's date on the exchange's clock.
pub fn today_in_casablanca() -> NaiveDate {
    Utc::now()
        .with_timezone(&chrono_tz::Africa::Casablanca)
        .date_naive()
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

pub fn date_to_days(date: &NaiveDate) -> i32 {
    date.signed_duration_since(unix_epoch()).num_days() as i32
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    unix_epoch().checked_add_signed(chrono::Duration::days(days as i64))
}

// Arrow数据转换工具
pub mod arrow_utils {
    use super::*;
    use crate::errors::{BvcError, Result};
    use crate::models::table::{Column, ObservationTable};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::reader::FileReader;
    use arrow::ipc::writer::FileWriter;
    use arrow::record_batch::RecordBatch;
    use arrow_array::{Array, ArrayRef, Date32Array, Float64Array};
    use log::info;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::path::Path;
    use std::sync::Arc;

    const SUBJECT_KEY: &str = "subject";
    const DATE_FIELD: &str = "date";

    /// `date` as Date32 followed by one Float64 field per column.
    pub fn table_to_record_batch(table: &ObservationTable) -> Result<RecordBatch> {
        let mut fields = vec![Field::new(DATE_FIELD, DataType::Date32, false)];
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(Date32Array::from(
            table.index().iter().map(date_to_days).collect::<Vec<i32>>(),
        ))];

        for (column, values) in table.columns() {
            fields.push(Field::new(column.name(), DataType::Float64, false));
            arrays.push(Arc::new(Float64Array::from(values.clone())));
        }

        let metadata = HashMap::from([(SUBJECT_KEY.to_string(), table.subject.clone())]);
        let schema = Schema::new(fields).with_metadata(metadata);

        RecordBatch::try_new(Arc::new(schema), arrays)
            .map_err(|e| BvcError::ArrowError(e.to_string()))
    }

    fn ensure_parent(path: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    // 将观测表保存到Arrow文件
    pub fn save_table_to_arrow(table: &ObservationTable, path: &str) -> Result<()> {
        info!("Saving {} rows of {} to {}", table.len(), table.subject, path);
        ensure_parent(path)?;

        let batch = table_to_record_batch(table)?;
        let file = File::create(path)?;

        let mut writer = FileWriter::try_new(file, &batch.schema())
            .map_err(|e| BvcError::ArrowError(e.to_string()))?;
        writer
            .write(&batch)
            .map_err(|e| BvcError::ArrowError(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| BvcError::ArrowError(e.to_string()))?;

        Ok(())
    }

    /// Newline-delimited JSON, one object per row.
    pub fn write_table_ndjson(table: &ObservationTable, path: &str) -> Result<()> {
        info!("Writing {} rows of {} to {}", table.len(), table.subject, path);
        ensure_parent(path)?;

        let batch = table_to_record_batch(table)?;
        let file = File::create(path)?;

        let mut writer = arrow_json::LineDelimitedWriter::new(file);
        writer.write(&batch)?;
        writer.finish()?;

        Ok(())
    }

    // 从Arrow文件读取观测表
    pub fn read_table_from_arrow(path: &str) -> Result<ObservationTable> {
        let file = File::open(path)?;
        let reader =
            FileReader::try_new(file, None).map_err(|e| BvcError::ArrowError(e.to_string()))?;

        let schema = reader.schema();
        let subject = schema
            .metadata()
            .get(SUBJECT_KEY)
            .cloned()
            .unwrap_or_default();

        let columns = schema
            .fields()
            .iter()
            .filter(|f| f.name() != DATE_FIELD)
            .map(|f| Column::parse(f.name()))
            .collect::<Result<Vec<Column>>>()?;

        let mut index = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];

        for batch in reader {
            let batch = batch.map_err(|e| BvcError::ArrowError(e.to_string()))?;

            let dates = batch
                .column_by_name(DATE_FIELD)
                .and_then(|a| a.as_any().downcast_ref::<Date32Array>())
                .ok_or_else(|| BvcError::ArrowError("Failed to downcast date column".to_string()))?;

            for i in 0..dates.len() {
                let date = days_to_date(dates.value(i)).ok_or_else(|| {
                    BvcError::ArrowError(format!("Date out of range: {}", dates.value(i)))
                })?;
                index.push(date);
            }

            for (slot, column) in values.iter_mut().zip(&columns) {
                let array = batch
                    .column_by_name(column.name())
                    .and_then(|a| a.as_any().downcast_ref::<Float64Array>())
                    .ok_or_else(|| {
                        BvcError::ArrowError(format!("Failed to downcast {} column", column))
                    })?;
                slot.extend(array.values().iter().copied());
            }
        }

        ObservationTable::new(&subject, index, columns.into_iter().zip(values).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn epoch_unit_is_chosen_by_magnitude() {
        assert_eq!(epoch_to_date(1_600_000_000.0), Some(d(2020, 9, 13)));
        assert_eq!(epoch_to_date(1_600_000_000_000.0), Some(d(2020, 9, 13)));
        // 9_999_999_999 s is still seconds: year 2286
        assert_eq!(epoch_to_date(9_999_999_999.0), Some(d(2286, 11, 20)));
        // 1e10 ms is 1970-04-26
        assert_eq!(epoch_to_date(1e10), Some(d(1970, 4, 26)));
        assert_eq!(epoch_to_date(f64::NAN), None);
    }

    #[test]
    fn date_strings_in_source_formats() {
        assert_eq!(parse_date_text("2021-01-04"), Some(d(2021, 1, 4)));
        assert_eq!(parse_date_text(" 2021-01-04 15:30:00 "), Some(d(2021, 1, 4)));
        assert_eq!(parse_date_text("2021-01-04T23:59:59"), Some(d(2021, 1, 4)));
        assert_eq!(parse_date_text("04/01/2021"), Some(d(2021, 1, 4)));
        assert_eq!(parse_date_text("04/01/2021 10:05"), Some(d(2021, 1, 4)));
        assert_eq!(parse_date_text("2021-01-04T12:00:00+01:00"), Some(d(2021, 1, 4)));
        assert_eq!(parse_date_text("1600000000"), Some(d(2020, 9, 13)));
        assert_eq!(parse_date_text("not-a-date"), None);
        assert_eq!(parse_date_text(""), None);
    }

    #[test]
    fn offset_timestamps_use_the_utc_date() {
        // UTC+01:00 的 00:30 是前一天 23:30 UTC
        assert_eq!(parse_date_text("2021-01-04T00:30:00+01:00"), Some(d(2021, 1, 3)));
        assert_eq!(
            parse_date_text("2021-01-04T00:30:00+01:00"),
            epoch_to_date(1_609_716_600.0)
        );
    }

    #[test]
    fn french_numbers() {
        assert_eq!(parse_number("1 234,56"), Some(1234.56));
        assert_eq!(parse_number("1\u{a0}234,56"), Some(1234.56));
        assert_eq!(parse_number("-0,83 %"), Some(-0.83));
        assert_eq!(parse_number("12.5"), Some(12.5));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("n.d."), None);
    }

    #[test]
    fn days_round_trip_through_epoch() {
        assert_eq!(date_to_days(&d(1970, 1, 2)), 1);
        assert_eq!(days_to_date(date_to_days(&d(2021, 1, 4))), Some(d(2021, 1, 4)));
    }

    #[test]
    fn arrow_file_keeps_subject_and_columns() {
        use crate::models::table::{Column, ObservationTable};

        let table = ObservationTable::new(
            "MASI",
            vec![d(2024, 1, 2), d(2024, 1, 3)],
            vec![(Column::Value, vec![12_000.5, 12_010.25])],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("masi.arrow");
        let path = path.to_str().unwrap();

        arrow_utils::save_table_to_arrow(&table, path).unwrap();
        let loaded = arrow_utils::read_table_from_arrow(path).unwrap();

        assert_eq!(loaded.subject, "MASI");
        assert_eq!(loaded.index(), table.index());
        assert_eq!(loaded.column(Column::Value).unwrap(), &[12_000.5, 12_010.25]);
    }

    #[test]
    fn ndjson_has_one_line_per_row() {
        use crate::models::table::{Column, ObservationTable};

        let table = ObservationTable::new(
            "IAM",
            vec![d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)],
            vec![(Column::Value, vec![1.0, 2.0, 3.0])],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/iam.ndjson");
        let path = path.to_str().unwrap();

        arrow_utils::write_table_ndjson(&table, path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();

        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().contains("2024-01-02"));
    }
}
