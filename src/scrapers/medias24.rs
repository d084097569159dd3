use crate::config::Config;
use crate::errors::{BvcError, Result};
use crate::models::payload::{Cell, RawPayload};
use crate::models::table::{DateRange, IntradaySeries};
use crate::scrapers::base::Transport;
use crate::symbols::{MarketIndex, Subject};
use crate::util;
use chrono::NaiveDate;
use log::{debug, info};
use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::Arc;

/// medias24 JSON price API
pub struct Medias24Scraper {
    transport: Arc<dyn Transport + Send + Sync>,
    base_url: String,
    history_start: NaiveDate,
}

impl Medias24Scraper {
    pub fn new(config: &Config, transport: Arc<dyn Transport + Send + Sync>) -> Self {
        Self {
            transport,
            base_url: config.medias24_base_url.clone(),
            history_start: config.history_start,
        }
    }

    fn build_url(&self, params: &[(&str, &str)]) -> Result<String> {
        Url::parse_with_params(&self.base_url, params)
            .map(|url| url.to_string())
            .map_err(|e| BvcError::Unknown(format!("Invalid API URL {}: {}", self.base_url, e)))
    }

    /// Daily history URL. Indices always request the ten-year series; a
    /// security requests `range`, or `history_start`..today when none is given.
    pub fn history_url(&self, subject: &Subject, range: Option<&DateRange>) -> Result<String> {
        match subject {
            Subject::Index(MarketIndex::Masi) => self.build_url(&[
                ("method", "getMasiHistory"),
                ("periode", "10y"),
                ("format", "json"),
            ]),
            Subject::Index(MarketIndex::Msi20) => self.build_url(&[
                ("method", "getIndexHistory"),
                ("ISIN", "msi20"),
                ("periode", "10y"),
                ("format", "json"),
            ]),
            Subject::Security(listing) => {
                let (start, end) = match range {
                    Some(range) => (range.start, range.end),
                    None => (self.history_start, util::today_in_casablanca()),
                };
                let from = start.format("%Y-%m-%d").to_string();
                let to = end.format("%Y-%m-%d").to_string();

                self.build_url(&[
                    ("method", "getPriceHistory"),
                    ("ISIN", listing.isin.as_str()),
                    ("format", "json"),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                ])
            }
        }
    }

    pub fn intraday_url(&self, subject: &Subject) -> Result<String> {
        match subject {
            Subject::Index(MarketIndex::Masi) => {
                self.build_url(&[("method", "getMarketIntraday"), ("format", "json")])
            }
            Subject::Index(MarketIndex::Msi20) => self.build_url(&[
                ("method", "getIndexIntraday"),
                ("ISIN", "msi20"),
                ("format", "json"),
            ]),
            Subject::Security(listing) => self.build_url(&[
                ("method", "getStockIntraday"),
                ("ISIN", listing.isin.as_str()),
                ("format", "json"),
            ]),
        }
    }

    /// Raw daily rows for `subject`.
    pub async fn fetch_history(
        &self,
        subject: &Subject,
        range: Option<&DateRange>,
    ) -> Result<RawPayload> {
        let url = self.history_url(subject, range)?;
        info!("Fetching price history for {}", subject);

        let body = self.transport.get_text(&url).await?;
        let payload = payload_from_body(subject.label(), &body)?;

        debug!("Received {} history rows for {}", payload.len(), subject);
        Ok(payload)
    }

    pub async fn fetch_intraday(&self, subject: &Subject) -> Result<IntradaySeries> {
        let url = self.intraday_url(subject)?;
        info!("Fetching intraday series for {}", subject);

        let body = self.transport.get_text(&url).await?;
        intraday_from_body(subject.label(), &body)
    }
}

/// JSON document from a response body. Bodies rendered by a browser-like
/// proxy wrap the JSON in `<pre>`.
pub fn extract_json_body(body: &str) -> Result<Value> {
    let trimmed = body.trim_start_matches('\u{feff}').trim();

    let text = if trimmed.starts_with('<') {
        let document = Html::parse_document(trimmed);
        let pre = Selector::parse("pre")
            .map_err(|e| BvcError::Unknown(format!("Invalid selector: {:?}", e)))?;
        document
            .select(&pre)
            .next()
            .map(|el| el.text().collect::<String>())
            .ok_or_else(|| BvcError::BadResponse("HTML page without a JSON body".to_string()))?
    } else {
        trimmed.to_string()
    };

    let text = text.trim();
    if !text.starts_with('{') {
        let preview: String = text.chars().take(80).collect();
        return Err(BvcError::BadResponse(format!("not a JSON object: {}", preview)));
    }

    Ok(serde_json::from_str(text)?)
}

fn result_rows(subject: &str, json: &Value) -> Result<Vec<Value>> {
    match json.get("result") {
        Some(Value::Array(rows)) => Ok(rows.clone()),
        Some(Value::Null) | None => Err(BvcError::EmptyPayload(format!(
            "no result in response for {}",
            subject
        ))),
        Some(other) => Err(BvcError::MalformedPayload(format!(
            "result for {} is not an array: {}",
            subject, other
        ))),
    }
}

/// `result` rows of a history response.
pub fn payload_from_body(subject: &str, body: &str) -> Result<RawPayload> {
    let json = extract_json_body(body)?;
    let rows = result_rows(subject, &json)?;
    Ok(RawPayload::from_json_rows(subject, &rows))
}

fn label_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Intraday response: `result[0]` holds a `labels` array and one value array.
/// A `result` made of `[label, value]` pairs is accepted too.
pub fn intraday_from_body(subject: &str, body: &str) -> Result<IntradaySeries> {
    let json = extract_json_body(body)?;
    let rows = result_rows(subject, &json)?;

    let (labels, values): (Vec<String>, Vec<f64>) = match rows.first() {
        Some(Value::Object(series)) => {
            let labels = series
                .get("labels")
                .and_then(|l| l.as_array())
                .ok_or_else(|| {
                    BvcError::MalformedPayload(format!("intraday for {} has no labels", subject))
                })?;
            let values = series
                .iter()
                .filter(|(key, _)| key.as_str() != "labels")
                .find_map(|(_, v)| v.as_array())
                .ok_or_else(|| {
                    BvcError::MalformedPayload(format!("intraday for {} has no values", subject))
                })?;

            if labels.len() != values.len() {
                return Err(BvcError::MalformedPayload(format!(
                    "intraday for {} has {} labels and {} values",
                    subject,
                    labels.len(),
                    values.len()
                )));
            }

            (
                labels.iter().map(label_text).collect(),
                values
                    .iter()
                    .map(|v| Cell::from_json(v).as_f64().unwrap_or(f64::NAN))
                    .collect(),
            )
        }
        Some(Value::Array(_)) => {
            let mut labels = Vec::with_capacity(rows.len());
            let mut values = Vec::with_capacity(rows.len());
            for row in &rows {
                match row.as_array().map(|r| r.as_slice()) {
                    Some([label, value]) => {
                        labels.push(label_text(label));
                        values.push(Cell::from_json(value).as_f64().unwrap_or(f64::NAN));
                    }
                    _ => {
                        return Err(BvcError::MalformedPayload(format!(
                            "intraday row for {} is not a [label, value] pair",
                            subject
                        )))
                    }
                }
            }
            (labels, values)
        }
        Some(other) => {
            return Err(BvcError::MalformedPayload(format!(
                "unexpected intraday result for {}: {}",
                subject, other
            )))
        }
        None => (Vec::new(), Vec::new()),
    };

    if labels.is_empty() {
        return Err(BvcError::EmptyPayload(format!(
            "no intraday points for {}",
            subject
        )));
    }

    Ok(IntradaySeries {
        subject: subject.to_string(),
        labels,
        values,
    })
}
