use bvcscrap::models::table::{Column, DateRange};
use bvcscrap::{Config, MarketDataService, SymbolDirectory};
use chrono::NaiveDate;
use log::info;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::new();
    let service = MarketDataService::with_http(&config, SymbolDirectory::new())?;

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("bad start date")?;
    let end = NaiveDate::from_ymd_opt(2024, 3, 31).ok_or("bad end date")?;
    let range = DateRange::new(start, end)?;

    let masi = service.load_history("MASI", Some(&range)).await?;
    info!("MASI closed the quarter at {:?}", masi.column(Column::Value).and_then(|v| v.last()));

    let panel = service
        .load_many(&["Attijariwafa Bank", "IAM"], Some(&range), Column::Value)
        .await?;
    for (name, values) in &panel.series {
        let present = values.iter().filter(|v| v.is_some()).count();
        info!("{}: {} of {} sessions", name, present, panel.index.len());
    }

    Ok(())
}
