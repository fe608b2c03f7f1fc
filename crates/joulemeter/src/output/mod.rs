//! Output formatting for runs and counter inventories.

mod json;
mod terminal;

pub use json::{counters_to_json, to_json, to_json_pretty, CounterInventory, DomainInfo, RunReport};
pub use terminal::{format_counters, format_preflight, format_run};
