pub mod hybrid;
pub mod lexical;
pub mod predicate;
pub mod vector;

pub use hybrid::HybridEngine;
pub use lexical::LexicalEngine;
pub use predicate::PredicateEngine;
pub use vector::VectorEngine;

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::registry::ToolMetadata;

/// Uniform cap for empty-query listings across all engines.
pub const EMPTY_QUERY_LIMIT: usize = 100;

/// Default cap for ranked results.
pub const RESULT_LIMIT: usize = 50;

/// A ranking back-end over the tool catalog.
///
/// `index` replaces the engine's whole view of the catalog; a concurrent
/// search sees either the old state or the new one, never a mix.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn index(&self, tools: &[ToolMetadata]) -> Result<(), BridgeError>;

    async fn search(&self, query: &str) -> Result<Vec<ToolMetadata>, BridgeError>;

    fn close(&self) {}
}

/// Empty-query result: a prefix of the catalog in insertion order.
pub(crate) fn empty_query_slice(catalog: &[ToolMetadata]) -> Vec<ToolMetadata> {
    catalog.iter().take(EMPTY_QUERY_LIMIT).cloned().collect()
}
