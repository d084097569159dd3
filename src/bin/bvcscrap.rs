use bvcscrap::config::Config;
use bvcscrap::models::payload::Cell;
use bvcscrap::models::table::{Column, DateRange, ObservationTable};
use bvcscrap::scrapers::bourse::ReportKind;
use bvcscrap::services::MarketDataService;
use bvcscrap::symbols::SymbolDirectory;
use bvcscrap::util::{self, arrow_utils};

use chrono::NaiveDate;
use clap::{App, Arg, ArgMatches, SubCommand};
use log::{error, info};
use std::error::Error;
use std::path::Path;
use std::time::Duration;

fn date_arg(matches: &ArgMatches, name: &str) -> Result<Option<NaiveDate>, Box<dyn Error>> {
    match matches.value_of(name) {
        Some(s) => Ok(Some(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)),
        None => Ok(None),
    }
}

/// `--start`/`--end`; a missing bound defaults to the history start or today.
fn range_args(matches: &ArgMatches, config: &Config) -> Result<Option<DateRange>, Box<dyn Error>> {
    let start = date_arg(matches, "start")?;
    let end = date_arg(matches, "end")?;

    if start.is_none() && end.is_none() {
        return Ok(None);
    }

    let range = DateRange::new(
        start.unwrap_or(config.history_start),
        end.unwrap_or_else(util::today_in_casablanca),
    )?;
    Ok(Some(range))
}

/// Bare file names land in the data directory.
fn output_path(config: &Config, name: &str) -> String {
    let path = Path::new(name);
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => name.to_string(),
        _ => Path::new(&config.data_dir).join(path).to_string_lossy().into_owned(),
    }
}

fn print_table(table: &ObservationTable, limit: usize) {
    let names = table.column_names();

    info!("{} - {} rows", table.subject, table.len());
    info!("{:-<80}", "");
    info!(
        "{:<12}{}",
        "Date",
        names.iter().map(|c| format!("{:>13}", c.name())).collect::<String>()
    );
    info!("{:-<80}", "");

    // 只显示最近的记录
    let skip = table.len().saturating_sub(limit);
    for i in skip..table.len() {
        if let Some((date, values)) = table.row(i) {
            info!(
                "{:<12}{}",
                date.format("%Y-%m-%d"),
                values.iter().map(|v| format!("{:>13.2}", v)).collect::<String>()
            );
        }
    }

    if skip > 0 {
        info!("... {} earlier rows not shown", skip);
    }
}

fn format_cell(cell: &Cell) -> String {
    match cell {
        Cell::Number(n) => format!("{:>14.2}", n),
        Cell::Text(t) => t.clone(),
        Cell::Null => "-".to_string(),
    }
}

fn range_args_for<'a>(app: App<'a>) -> App<'a> {
    app.arg(
        Arg::with_name("start")
            .long("start")
            .value_name("DATE")
            .help("First date of the window (YYYY-MM-DD)")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("end")
            .long("end")
            .value_name("DATE")
            .help("Last date of the window (YYYY-MM-DD)")
            .takes_value(true),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = App::new("bvcscrap")
        .version("1.0.0")
        .about("Casablanca Stock Exchange data scraper")
        .arg(
            Arg::with_name("symbols")
                .long("symbols")
                .value_name("FILE")
                .help("JSON file with extra listings (name, ticker, isin, code)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("retries")
                .long("retries")
                .value_name("N")
                .help("Retries on rate limiting and transient failures")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .help("Request timeout")
                .takes_value(true)
                .default_value("60"),
        )
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory for exported files given without a path")
                .takes_value(true)
                .default_value("data"),
        );

    let app = app
        .subcommand(range_args_for(
            SubCommand::with_name("history")
                .about("Daily price history of a security or index")
                .arg(
                    Arg::with_name("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("Security name, ticker, ISIN, MASI or MSI20")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write the table to an Arrow IPC file")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("json")
                        .long("json")
                        .value_name("FILE")
                        .help("Write the table as newline-delimited JSON")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("limit")
                        .short('l')
                        .long("limit")
                        .value_name("LIMIT")
                        .help("Number of rows to display")
                        .takes_value(true)
                        .default_value("10"),
                ),
        ))
        .subcommand(range_args_for(
            SubCommand::with_name("many")
                .about("One column of several subjects, aligned by date")
                .arg(
                    Arg::with_name("names")
                        .long("names")
                        .value_name("A,B,...")
                        .help("Comma-separated names")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("column")
                        .short('c')
                        .long("column")
                        .value_name("COLUMN")
                        .help("Value, Min, Max, Variation or Volume")
                        .takes_value(true)
                        .default_value("Value"),
                ),
        ))
        .subcommand(
            SubCommand::with_name("intraday")
                .about("Intraday series of a security or index")
                .arg(
                    Arg::with_name("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("report")
                .about("Market report scraped from the exchange site")
                .arg(
                    Arg::with_name("kind")
                        .short('k')
                        .long("kind")
                        .value_name("KIND")
                        .help("session, indicators, dividends, indices, weights or recap")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("Company for session, indicators and dividends")
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("symbols").about("List known listings"));

    let matches = app.get_matches();

    let retries = matches.value_of("retries").unwrap_or("3").parse::<u32>().unwrap_or(3);
    let timeout = matches.value_of("timeout").unwrap_or("60").parse::<u64>().unwrap_or(60);
    let config = Config::new()
        .with_max_retries(retries)
        .with_timeout(Duration::from_secs(timeout))
        .with_data_dir(matches.value_of("data-dir").unwrap_or("data"));

    let symbols = match matches.value_of("symbols") {
        Some(path) => SymbolDirectory::load_from_file(path)?,
        None => SymbolDirectory::new(),
    };

    if matches.subcommand_matches("symbols").is_some() {
        for listing in symbols.all() {
            info!(
                "{:<8} {:<14} {:<8} {}",
                listing.ticker,
                listing.isin,
                listing.code.as_deref().unwrap_or("-"),
                listing.name
            );
        }
        return Ok(());
    }

    let service = MarketDataService::with_http(&config, symbols)?;

    if let Some(matches) = matches.subcommand_matches("history") {
        let name = matches.value_of("name").unwrap_or_default();
        let range = range_args(matches, &config)?;
        let limit = matches.value_of("limit").unwrap_or("10").parse::<usize>().unwrap_or(10);

        let table = service.load_history(name, range.as_ref()).await?;
        print_table(&table, limit);

        if let Some(path) = matches.value_of("output") {
            arrow_utils::save_table_to_arrow(&table, &output_path(&config, path))?;
        }
        if let Some(path) = matches.value_of("json") {
            arrow_utils::write_table_ndjson(&table, &output_path(&config, path))?;
        }
    } else if let Some(matches) = matches.subcommand_matches("many") {
        let names: Vec<&str> = matches
            .value_of("names")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let column = Column::parse(matches.value_of("column").unwrap_or("Value"))?;
        let range = range_args(matches, &config)?;

        let panel = service.load_many(&names, range.as_ref(), column).await?;

        info!("{} of {} subjects, {} dates", panel.feature, panel.series.len(), panel.index.len());
        info!(
            "{:<12}{}",
            "Date",
            panel.series.iter().map(|(n, _)| format!("{:>14}", n)).collect::<String>()
        );
        for (i, date) in panel.index.iter().enumerate() {
            let cells: String = panel
                .series
                .iter()
                .map(|(_, values)| match values[i] {
                    Some(v) => format!("{:>14.2}", v),
                    None => format!("{:>14}", "-"),
                })
                .collect();
            info!("{:<12}{}", date.format("%Y-%m-%d"), cells);
        }
    } else if let Some(matches) = matches.subcommand_matches("intraday") {
        let name = matches.value_of("name").unwrap_or_default();
        let series = service.intraday(name).await?;

        info!("{} - {} intraday points", series.subject, series.len());
        for (label, value) in series.labels.iter().zip(&series.values) {
            info!("{:<20} {:>12.2}", label, value);
        }
    } else if let Some(matches) = matches.subcommand_matches("report") {
        let kind = ReportKind::parse(matches.value_of("kind").unwrap_or_default())?;
        let report = service.report(kind, matches.value_of("name")).await?;

        for (i, table) in report.tables.iter().enumerate() {
            info!("{} table {}", report.kind, i + 1);
            info!("{:-<80}", "");
            if let Some(header) = &table.header {
                info!("{}", header.join(" | "));
                info!("{:-<80}", "");
            }
            // 数字按法式格式解析后右对齐显示
            for row in &table.to_payload(kind.name()).rows {
                info!("{}", row.iter().map(format_cell).collect::<Vec<_>>().join(" | "));
            }
        }
    } else {
        error!("No command specified. Use --help for usage information.");
    }

    Ok(())
}
