//! Filter engine: the canonical [`FilterSpec`], its server/client split, and
//! the query and timestamp parsers that build it.

pub mod query;
pub mod server;
pub mod spec;

pub use query::{parse_filter_query, parse_timestamp};
pub use server::ServerFilter;
pub use spec::{matching_indices, FilterSpec};
