//! Catalog of the block nodes a publisher may stream to.

mod endpoint;
mod extractor;

pub use endpoint::{BlockNodeEndpoint, PREFERRED_PRIORITY};
pub use extractor::{BlockNodeCatalog, BlockNodeConfigExtractor, ConfigError, ConfigResult};
