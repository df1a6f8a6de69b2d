//! Reference Adapters
//!
//! Process-local implementations of the domain ports, used by the `simulate`
//! command, benchmarks and tests.

pub mod comparator;
pub mod memory;
pub mod remote;
pub mod template;

pub use comparator::StructuralComparator;
pub use memory::{InMemoryProvider, InMemoryProviderConfig, ProviderCall};
pub use remote::{StaticRemote, StaticSession};
pub use template::TemplateRenderer;
