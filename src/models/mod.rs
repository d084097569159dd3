pub mod payload;
pub mod table;

pub use payload::{Cell, RawPayload};
pub use table::{Column, DateRange, IntradaySeries, ObservationTable, PanelTable};
