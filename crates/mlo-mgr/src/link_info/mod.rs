//! Link info table: per-MLD partner link records.

mod table;
mod types;

pub use table::{LinkInfoTable, LinkTableError};
pub use types::LinkInfo;
