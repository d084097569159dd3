// 公开导出的模块，供外部使用
pub mod errors;
pub mod models;
pub mod normalizer;
pub mod symbols;
pub mod services;

// 命令行工具需要直接访问这些模块
// 但在库使用场景中，这些应该是内部模块
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod scrapers;
#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use errors::{BvcError, Result};
pub use models::{Cell, Column, DateRange, IntradaySeries, ObservationTable, PanelTable, RawPayload};
pub use normalizer::{normalize, SubjectKind};
pub use services::MarketDataService;
pub use symbols::{Listing, MarketIndex, Subject, SymbolDirectory};
