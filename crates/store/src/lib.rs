pub mod db;
pub mod query;
pub mod retention;
pub mod schema;
pub mod write;

pub use db::Store;
pub use query::Listing;
pub use retention::{PurgeReport, run_retention_loop};
