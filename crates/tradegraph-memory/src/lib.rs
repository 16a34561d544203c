mod store;

pub use store::{SessionSummary, SqliteStore};
