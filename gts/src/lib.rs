pub mod entities;
pub mod files_reader;
pub mod id;
pub mod ops;
pub mod path_resolver;
pub mod refinement;
pub mod resolver;
pub mod schema_cast;
pub mod schema_traits;
pub mod store;
pub mod x_gts_ref;

// Re-export commonly used types
pub use entities::{GtsConfig, GtsEntity, GtsFile, GtsRef};
pub use files_reader::GtsFileReader;
pub use id::{GTS_PREFIX, GTS_URI_PREFIX, GtsError, GtsID, GtsWildcard, Segment};
pub use ops::GtsOps;
pub use path_resolver::JsonPathResolver;
pub use refinement::RefinementEngine;
pub use resolver::{ResolverError, SchemaResolver};
pub use schema_cast::{GtsEntityCastResult, SchemaCastError};
pub use schema_traits::TraitChain;
pub use store::{GtsReader, GtsStore, GtsStoreQueryResult, StoreError};
pub use x_gts_ref::{XGtsRefValidator, XGtsRefViolation};
