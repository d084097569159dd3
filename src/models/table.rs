use chrono::NaiveDate;
use std::fmt;

use crate::errors::{BvcError, Result};

/// Named numeric columns of an observation table, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Value,
    Min,
    Max,
    Variation,
    Volume,
}

impl Column {
    pub const SINGLE: &'static [Column] = &[Column::Value];
    pub const FULL: &'static [Column] = &[
        Column::Value,
        Column::Min,
        Column::Max,
        Column::Variation,
        Column::Volume,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::Value => "Value",
            Column::Min => "Min",
            Column::Max => "Max",
            Column::Variation => "Variation",
            Column::Volume => "Volume",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::FULL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| BvcError::Unknown(format!("Unknown column: {}", name)))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive calendar date window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(BvcError::Unknown(format!(
                "Invalid date range: {} is after {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.start <= *date && *date <= self.end
    }
}

/// Date-indexed table of observations for one subject
#[derive(Debug, Clone)]
pub struct ObservationTable {
    pub subject: String,
    index: Vec<NaiveDate>,
    columns: Vec<(Column, Vec<f64>)>,
}

impl ObservationTable {
    /// Every series must have the same length as the index.
    pub fn new(
        subject: &str,
        index: Vec<NaiveDate>,
        columns: Vec<(Column, Vec<f64>)>,
    ) -> Result<Self> {
        if let Some((column, values)) = columns.iter().find(|(_, v)| v.len() != index.len()) {
            return Err(BvcError::MalformedPayload(format!(
                "column {} has {} values for {} dates",
                column,
                values.len(),
                index.len()
            )));
        }

        Ok(Self {
            subject: subject.to_string(),
            index,
            columns,
        })
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> Vec<Column> {
        self.columns.iter().map(|(c, _)| *c).collect()
    }

    pub fn columns(&self) -> &[(Column, Vec<f64>)] {
        &self.columns
    }

    pub fn column(&self, column: Column) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, values)| values.as_slice())
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.index.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.index.last().copied()
    }

    /// Values of row `i`, in column order.
    pub fn row(&self, i: usize) -> Option<(NaiveDate, Vec<f64>)> {
        let date = *self.index.get(i)?;
        Some((date, self.columns.iter().map(|(_, v)| v[i]).collect()))
    }

    /// Stable ascending sort by date.
    pub fn sort_by_date(&mut self) {
        if self.index.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }

        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by_key(|&i| self.index[i]);

        self.index = order.iter().map(|&i| self.index[i]).collect();
        for (_, values) in self.columns.iter_mut() {
            *values = order.iter().map(|&i| values[i]).collect();
        }
    }
}

/// Intraday series keyed by the source's time labels
#[derive(Debug, Clone)]
pub struct IntradaySeries {
    pub subject: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl IntradaySeries {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn last(&self) -> Option<(&str, f64)> {
        let label = self.labels.last()?;
        let value = self.values.last()?;
        Some((label.as_str(), *value))
    }
}

/// Several subjects' series aligned on a shared ascending date index
#[derive(Debug, Clone)]
pub struct PanelTable {
    pub feature: Column,
    pub index: Vec<NaiveDate>,
    pub series: Vec<(String, Vec<Option<f64>>)>,
}

impl PanelTable {
    pub fn series(&self, subject: &str) -> Option<&[Option<f64>]> {
        self.series
            .iter()
            .find(|(name, _)| name == subject)
            .map(|(_, values)| values.as_slice())
    }
}
