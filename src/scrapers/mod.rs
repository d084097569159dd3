pub mod base;
pub mod bourse;
pub mod medias24;

pub use base::{HttpTransport, Transport};
pub use bourse::{BourseScraper, Report, ReportKind, ReportTable};
pub use medias24::Medias24Scraper;
