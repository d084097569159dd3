use crate::config::Config;
use crate::errors::{BvcError, Result};
use crate::models::payload::{Cell, RawPayload};
use crate::scrapers::base::Transport;
use crate::symbols::Subject;
use crate::util;
use log::{debug, info};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::Arc;

/// Server-rendered reports of the casablanca-bourse site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Session data, last trades, best limits and recent sessions of a company
    Session,
    KeyIndicators,
    Dividends,
    /// Summary of every index
    Indices,
    /// Index weights (pondération)
    Weights,
    /// Session recap on the home page
    IndexRecap,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::Session,
        ReportKind::KeyIndicators,
        ReportKind::Dividends,
        ReportKind::Indices,
        ReportKind::Weights,
        ReportKind::IndexRecap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::Session => "session",
            ReportKind::KeyIndicators => "indicators",
            ReportKind::Dividends => "dividends",
            ReportKind::Indices => "indices",
            ReportKind::Weights => "weights",
            ReportKind::IndexRecap => "recap",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == name)
            .ok_or_else(|| BvcError::Unknown(format!("Unknown report kind: {}", name)))
    }

    /// Company reports are rendered on the company page and need its code.
    pub fn needs_company(&self) -> bool {
        matches!(
            self,
            ReportKind::Session | ReportKind::KeyIndicators | ReportKind::Dividends
        )
    }

    fn page(&self, base_url: &str, company_code: Option<&str>) -> Result<String> {
        let (path, params): (&str, Vec<(&str, &str)>) = match self {
            ReportKind::Session | ReportKind::KeyIndicators | ReportKind::Dividends => (
                "Societe-Cote.aspx",
                vec![("codeValeur", company_code.unwrap_or_default()), ("cat", "7")],
            ),
            ReportKind::Indices => ("Activite-marche.aspx", vec![("Cat", "22"), ("IdLink", "297")]),
            ReportKind::Weights => ("indice-ponderation.aspx", vec![("Cat", "22"), ("IdLink", "298")]),
            ReportKind::IndexRecap => ("index.aspx", vec![]),
        };

        let page = format!("{}/{}", base_url, path);
        let url = if params.is_empty() {
            Url::parse(&page)
        } else {
            Url::parse_with_params(&page, &params)
        };

        url.map(|u| u.to_string())
            .map_err(|e| BvcError::Unknown(format!("Invalid report URL {}: {}", page, e)))
    }

    /// Extra form fields of the postback that renders the report; empty when
    /// a plain GET is enough.
    fn postback_fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ReportKind::Session => &[("__EVENTTARGET", "SocieteCotee1$LBIndicCle")],
            ReportKind::KeyIndicators => &[("__EVENTTARGET", "SocieteCotee1$LBFicheTech")],
            ReportKind::Dividends => &[("__EVENTTARGET", "SocieteCotee1$LBDividende")],
            ReportKind::Indices | ReportKind::Weights => &[],
            ReportKind::IndexRecap => &[(
                "TopControl1$ScriptManager1",
                "FrontTabContainer1$ctl00$UpdatePanel1|FrontTabContainer1$ctl00$ImageButton1",
            )],
        }
    }

    /// Lower-case words a table must contain to belong to the report.
    fn markers(&self) -> &'static [&'static str] {
        match self {
            ReportKind::Session => &["cours", "volume", "séance"],
            ReportKind::KeyIndicators => &["capitalisation", "capital", "nombre de titres"],
            ReportKind::Dividends => &["dividende"],
            ReportKind::Indices => &["indice"],
            ReportKind::Weights => &["pondération", "ponderation", "flottant", "facteur"],
            ReportKind::IndexRecap => &["indice", "masi", "capitalisation"],
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One extracted HTML table
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    /// Body rows as a payload, with cells read as French-formatted numbers
    /// where possible.
    pub fn to_payload(&self, subject: &str) -> RawPayload {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|text| {
                        if text.is_empty() {
                            Cell::Null
                        } else {
                            util::parse_number(text)
                                .map(Cell::Number)
                                .unwrap_or_else(|| Cell::Text(text.clone()))
                        }
                    })
                    .collect()
            })
            .collect();

        RawPayload::new(subject, rows)
    }

    /// Cell under the header column named `name` (case-insensitive) in every row.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let header = self.header.as_ref()?;
        let idx = header.iter().position(|h| h.eq_ignore_ascii_case(name.trim()))?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).map(|s| s.as_str()).unwrap_or_default())
                .collect(),
        )
    }

    fn text_lowercase(&self) -> String {
        self.header
            .iter()
            .chain(self.rows.iter())
            .flatten()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub kind: ReportKind,
    pub tables: Vec<ReportTable>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| BvcError::Unknown(format!("Invalid selector {}: {:?}", css, e)))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hidden `<input>` fields (`__VIEWSTATE`, `__EVENTVALIDATION`, ...) to echo back
/// in a postback.
pub fn hidden_form_fields(html: &str) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let hidden = selector(r#"input[type="hidden"]"#)?;

    Ok(document
        .select(&hidden)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect())
}

/// Innermost tables of `html` that look like `kind`'s report.
pub fn extract_report(kind: ReportKind, html: &str) -> Result<Report> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("th, td")?;
    let th_sel = selector("th")?;

    let mut tables = Vec::new();

    // 页面使用嵌套表格布局，只取最内层的数据表
    for table in document.select(&table_sel) {
        if table.select(&table_sel).next().is_some() {
            continue;
        }

        let mut header = None;
        let mut rows = Vec::new();

        for tr in table.select(&row_sel) {
            let cells: Vec<String> = tr.select(&cell_sel).map(cell_text).collect();
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }

            let all_th = tr.select(&th_sel).count() == cells.len();
            if header.is_none() && rows.is_empty() && all_th {
                header = Some(cells);
            } else {
                rows.push(cells);
            }
        }

        let candidate = ReportTable { header, rows };
        let wide_enough = candidate
            .header
            .iter()
            .chain(candidate.rows.iter())
            .any(|r| r.len() >= 2);
        if !wide_enough {
            continue;
        }

        let text = candidate.text_lowercase();
        if kind.markers().iter().any(|m| text.contains(m)) {
            tables.push(candidate);
        }
    }

    if tables.is_empty() {
        return Err(BvcError::Extraction(format!(
            "no {} table found in page",
            kind
        )));
    }

    debug!("Extracted {} {} tables", tables.len(), kind);
    Ok(Report { kind, tables })
}

/// HTML report scraper driving ASP.NET postbacks
pub struct BourseScraper {
    transport: Arc<dyn Transport + Send + Sync>,
    base_url: String,
}

impl BourseScraper {
    pub fn new(config: &Config, transport: Arc<dyn Transport + Send + Sync>) -> Self {
        Self {
            transport,
            base_url: config.bourse_base_url.clone(),
        }
    }

    /// Page URL of `kind`, for `subject` when the report is per company.
    pub fn report_url(&self, kind: ReportKind, subject: Option<&Subject>) -> Result<String> {
        if !kind.needs_company() {
            return kind.page(&self.base_url, None);
        }

        match subject {
            Some(Subject::Security(listing)) => {
                let code = listing.code.as_deref().ok_or_else(|| {
                    BvcError::UnknownSymbol(format!(
                        "{} has no casablanca-bourse code",
                        listing.name
                    ))
                })?;
                kind.page(&self.base_url, Some(code))
            }
            Some(other) => Err(BvcError::UnknownSymbol(format!(
                "{} report needs a listed company, got index {}",
                kind, other
            ))),
            None => Err(BvcError::UnknownSymbol(format!(
                "{} report needs a company name",
                kind
            ))),
        }
    }

    /// Load the page, submit the report's postback when it has one, and
    /// extract the report tables.
    pub async fn fetch_report(&self, kind: ReportKind, subject: Option<&Subject>) -> Result<Report> {
        let url = self.report_url(kind, subject)?;
        info!("Fetching {} report from {}", kind, url);

        let page = self.transport.get_text(&url).await?;
        let extra = kind.postback_fields();

        let html = if extra.is_empty() {
            page
        } else {
            let mut fields = hidden_form_fields(&page)?;
            for (name, value) in extra {
                match fields.iter_mut().find(|(n, _)| n == name) {
                    Some(field) => field.1 = value.to_string(),
                    None => fields.push((name.to_string(), value.to_string())),
                }
            }
            debug!("Posting back {} fields for {} report", fields.len(), kind);
            self.transport.post_form(&url, &fields).await?
        };

        extract_report(kind, &html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::base::mock::ScriptedTransport;
    use crate::symbols::{Listing, MarketIndex};

    const COMPANY_PAGE: &str = r#"
        <html><body>
        <form method="post" action="Societe-Cote.aspx?codeValeur=5200&amp;cat=7">
          <input type="hidden" name="__VIEWSTATE" value="dDwtMTA4" />
          <input type="hidden" name="__EVENTVALIDATION" value="wEWAgK" />
          <input type="hidden" name="__EVENTTARGET" value="" />
          <input type="text" name="search" value="ignored" />
        </form>
        </body></html>"#;

    const DIVIDENDS_PAGE: &str = r#"
        <html><body>
        <table class="layout"><tr><td>
          <table id="menu"><tr><td>Accueil</td></tr></table>
          <table id="dividendes">
            <tr><th>Année</th><th>Dividende</th><th>Date de détachement</th></tr>
            <tr><td>2023</td><td>15,50</td><td>04/07/2023</td></tr>
            <tr><td> 2022 </td><td>&nbsp;15,00 </td><td>05/07/2022</td></tr>
            <tr><td></td><td></td><td></td></tr>
          </table>
        </td></tr></table>
        </body></html>"#;

    const INDICES_PAGE: &str = r#"
        <table>
          <tr><th>Indice</th><th>Valeur</th><th>Variation</th></tr>
          <tr><td>MASI</td><td>12 345,67</td><td>-0,83 %</td></tr>
          <tr><td>MSI20</td><td>1 001,20</td><td>0,12 %</td></tr>
        </table>"#;

    fn atw_with_code() -> Subject {
        Subject::Security(Listing::new("Attijariwafa Bank", "ATW", "MA0000012445").with_code("5200"))
    }

    #[test]
    fn report_kinds_parse_by_name() {
        for kind in ReportKind::ALL {
            assert_eq!(ReportKind::parse(kind.name()).unwrap(), kind);
        }
        assert!(ReportKind::parse("balance-sheet").is_err());
    }

    #[test]
    fn hidden_fields_only() {
        let fields = hidden_form_fields(COMPANY_PAGE).unwrap();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(names, vec!["__VIEWSTATE", "__EVENTVALIDATION", "__EVENTTARGET"]);
        assert_eq!(fields[0].1, "dDwtMTA4");
    }

    #[test]
    fn innermost_matching_table_is_extracted() {
        let report = extract_report(ReportKind::Dividends, DIVIDENDS_PAGE).unwrap();

        assert_eq!(report.tables.len(), 1);
        let table = &report.tables[0];
        assert_eq!(
            table.header.as_deref().unwrap(),
            &["Année", "Dividende", "Date de détachement"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["2022", "15,00", "05/07/2022"]);
        assert_eq!(table.column("dividende").unwrap(), vec!["15,50", "15,00"]);
    }

    #[test]
    fn missing_report_table_is_an_extraction_error() {
        let err = extract_report(ReportKind::Weights, DIVIDENDS_PAGE).unwrap_err();
        assert!(matches!(err, BvcError::Extraction(_)));
    }

    #[test]
    fn table_cells_become_payload_cells() {
        let report = extract_report(ReportKind::Indices, INDICES_PAGE).unwrap();
        let payload = report.tables[0].to_payload("indices");

        assert_eq!(payload.rows[0][0], Cell::Text("MASI".into()));
        assert_eq!(payload.rows[0][1], Cell::Number(12345.67));
        assert_eq!(payload.rows[0][2], Cell::Number(-0.83));
    }

    #[test]
    fn company_reports_need_a_code() {
        let config = Config::new().with_bourse_base_url("https://bourse.test/bourseweb");
        let scraper = BourseScraper::new(&config, Arc::new(ScriptedTransport::new()));

        assert_eq!(
            scraper.report_url(ReportKind::Dividends, Some(&atw_with_code())).unwrap(),
            "https://bourse.test/bourseweb/Societe-Cote.aspx?codeValeur=5200&cat=7"
        );
        assert_eq!(
            scraper.report_url(ReportKind::Weights, None).unwrap(),
            "https://bourse.test/bourseweb/indice-ponderation.aspx?Cat=22&IdLink=298"
        );

        let no_code = Subject::Security(Listing::new("Cosumar", "CSR", "MA0000012247"));
        assert!(scraper.report_url(ReportKind::Session, Some(&no_code)).is_err());
        assert!(scraper
            .report_url(ReportKind::Session, Some(&Subject::Index(MarketIndex::Masi)))
            .is_err());
        assert!(scraper.report_url(ReportKind::KeyIndicators, None).is_err());
    }

    #[test]
    fn company_codes_are_query_encoded() {
        let config = Config::new().with_bourse_base_url("https://bourse.test/bourseweb");
        let scraper = BourseScraper::new(&config, Arc::new(ScriptedTransport::new()));
        let odd = Subject::Security(
            Listing::new("Odd Co", "ODD", "MA0000000000").with_code("52 00&cat=1"),
        );

        assert_eq!(
            scraper.report_url(ReportKind::Session, Some(&odd)).unwrap(),
            "https://bourse.test/bourseweb/Societe-Cote.aspx?codeValeur=52+00%26cat%3D1&cat=7"
        );
        assert_eq!(
            scraper.report_url(ReportKind::IndexRecap, None).unwrap(),
            "https://bourse.test/bourseweb/index.aspx"
        );
    }

    #[tokio::test]
    async fn company_report_posts_back_with_event_target() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route_post("Societe-Cote.aspx", DIVIDENDS_PAGE)
                .route("Societe-Cote.aspx", COMPANY_PAGE),
        );
        let config = Config::new().with_bourse_base_url("https://bourse.test/bourseweb");
        let scraper = BourseScraper::new(&config, transport.clone());

        let report = scraper
            .fetch_report(ReportKind::Dividends, Some(&atw_with_code()))
            .await
            .unwrap();
        assert_eq!(report.kind, ReportKind::Dividends);

        let requests = transport.recorded();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[1].method, "POST");

        let fields = &requests[1].fields;
        assert!(fields.contains(&("__VIEWSTATE".to_string(), "dDwtMTA4".to_string())));
        assert!(fields.contains(&(
            "__EVENTTARGET".to_string(),
            "SocieteCotee1$LBDividende".to_string()
        )));
        assert_eq!(fields.iter().filter(|(n, _)| n == "__EVENTTARGET").count(), 1);
    }

    #[tokio::test]
    async fn index_pages_are_plain_gets() {
        let transport = Arc::new(ScriptedTransport::new().route("Activite-marche.aspx", INDICES_PAGE));
        let config = Config::new().with_bourse_base_url("https://bourse.test/bourseweb");
        let scraper = BourseScraper::new(&config, transport.clone());

        let report = scraper.fetch_report(ReportKind::Indices, None).await.unwrap();

        assert_eq!(report.tables[0].rows.len(), 2);
        assert_eq!(transport.recorded().len(), 1);
    }
}
