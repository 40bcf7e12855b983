mod db;
mod error;
mod memory;
mod pool;
mod records;
mod schema;
mod transcript;

pub use db::Store;
pub use error::{with_retry, Error, Result};
pub use pool::MAX_CONNECTIONS;
pub use records::{
    ExtractionRecord, NewExtraction, NewProject, NewTicket, ProjectKnowledge, ProjectMapRecord,
    UserPreferences,
};
pub use schema::SCHEMA_VERSION;
