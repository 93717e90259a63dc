pub mod bulk;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod dialect;
pub mod error;
pub mod node;
pub mod path;
pub mod position;
pub mod query;
pub mod queue;
pub mod schema;

pub use config::Config;
pub use error::{Error, TreeResult};
pub use schema::{TreeEntity, TreeFields, Value};

// Make testing helpers available for both unit tests and integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
