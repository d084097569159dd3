use crate::config::Config;
use crate::errors::{BvcError, Result};
use crate::models::table::{Column, DateRange, IntradaySeries, ObservationTable, PanelTable};
use crate::normalizer::{normalize, SubjectKind};
use crate::scrapers::base::{HttpTransport, Transport};
use crate::scrapers::bourse::{BourseScraper, Report, ReportKind};
use crate::scrapers::medias24::Medias24Scraper;
use crate::symbols::{Subject, SymbolDirectory};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 市场数据服务：解析名称、抓取数据并规范化为时间序列
pub struct MarketDataService {
    symbols: SymbolDirectory,
    medias24: Medias24Scraper,
    bourse: BourseScraper,
}

impl MarketDataService {
    pub fn new(
        config: &Config,
        symbols: SymbolDirectory,
        transport: Arc<dyn Transport + Send + Sync>,
    ) -> Self {
        Self {
            symbols,
            medias24: Medias24Scraper::new(config, transport.clone()),
            bourse: BourseScraper::new(config, transport),
        }
    }

    /// Service over a fresh [`HttpTransport`] built from `config`.
    pub fn with_http(config: &Config, symbols: SymbolDirectory) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(config, symbols, Arc::new(transport)))
    }

    pub fn symbols(&self) -> &SymbolDirectory {
        &self.symbols
    }

    pub fn resolve(&self, name: &str) -> Result<Subject> {
        self.symbols.resolve(name)
    }

    /// Daily history of `name`, ascending by date, limited to `range` when given.
    pub async fn load_history(
        &self,
        name: &str,
        range: Option<&DateRange>,
    ) -> Result<ObservationTable> {
        let subject = self.resolve(name)?;
        let payload = self.medias24.fetch_history(&subject, range).await?;

        let mut table = normalize(&payload, subject.kind(), range)?;
        table.sort_by_date();

        info!(
            "Loaded {} rows for {} ({} .. {})",
            table.len(),
            subject,
            table.first_date().map(|d| d.to_string()).unwrap_or_default(),
            table.last_date().map(|d| d.to_string()).unwrap_or_default()
        );
        Ok(table)
    }

    /// One `column` per subject, aligned on the union of their dates. When a
    /// subject has several rows on one date the last of them is kept.
    pub async fn load_many(
        &self,
        names: &[&str],
        range: Option<&DateRange>,
        column: Column,
    ) -> Result<PanelTable> {
        let mut loaded = Vec::with_capacity(names.len());

        for name in names {
            let table = self.load_history(name, range).await?;
            let values = table.column(column).ok_or_else(|| {
                BvcError::MalformedPayload(format!("{} has no {} column", name, column))
            })?;

            // 同一天多条记录时保留最后一条（按日期升序后即当日最新值）
            let mut by_date = BTreeMap::new();
            let mut duplicates = 0usize;
            for (date, value) in table.index().iter().zip(values) {
                if by_date.insert(*date, *value).is_some() {
                    duplicates += 1;
                }
            }
            if duplicates > 0 {
                warn!(
                    "{} has {} rows sharing a date with another row, keeping the last value of each date",
                    name, duplicates
                );
            }
            loaded.push((name.to_string(), by_date));
        }

        Ok(align_series(column, loaded))
    }

    pub async fn intraday(&self, name: &str) -> Result<IntradaySeries> {
        let subject = self.resolve(name)?;
        let series = self.medias24.fetch_intraday(&subject).await?;

        if series.values.iter().any(|v| v.is_nan()) {
            warn!("Intraday series for {} has missing points", subject);
        }
        Ok(series)
    }

    /// HTML report; company reports need `name`.
    pub async fn report(&self, kind: ReportKind, name: Option<&str>) -> Result<Report> {
        let subject = name.map(|n| self.resolve(n)).transpose()?;

        if let Some(subject) = &subject {
            if !kind.needs_company() {
                warn!("{} report ignores subject {}", kind, subject);
            } else if subject.kind() != SubjectKind::Security {
                return Err(BvcError::UnknownSymbol(format!(
                    "{} report needs a listed company, got {}",
                    kind, subject
                )));
            }
        }

        self.bourse.fetch_report(kind, subject.as_ref()).await
    }
}

fn align_series(feature: Column, loaded: Vec<(String, BTreeMap<NaiveDate, f64>)>) -> PanelTable {
    let mut index: Vec<NaiveDate> = loaded
        .iter()
        .flat_map(|(_, by_date)| by_date.keys().copied())
        .collect();
    index.sort();
    index.dedup();

    let series = loaded
        .into_iter()
        .map(|(name, by_date)| {
            let values = index.iter().map(|d| by_date.get(d).copied()).collect();
            (name, values)
        })
        .collect();

    PanelTable {
        feature,
        index,
        series,
    }
}
