//! # Version Routing
//!
//! Function versions, weighted aliases and concurrency admission.
//!
//! ```text
//! (function, alias) -> Router -> AliasTable -> version
//!                             -> ConcurrencyGovernor -> Permit | Throttled
//! ```

pub mod alias;
pub mod errors;
pub mod gateway;
pub mod governor;
pub mod retry;
pub mod router;
pub mod store;
pub mod version;

pub use alias::{Alias, AliasRouting, AliasTable};
pub use errors::{RoutingError, RoutingResult};
pub use gateway::{Gateway, Invocation, InvocationTarget};
pub use governor::{AdmissionMode, ConcurrencyConfig, ConcurrencyGovernor, Permit};
pub use retry::{acquire_with_retry, RetryPolicy};
pub use router::{select, Router, Selection};
pub use store::{FileRoutingStore, MemRoutingStore, RoutingState, RoutingStore, StoreError, StoreResult};
pub use version::{FunctionRecord, LatestPointer, Qualifier, Version, VersionStore, LATEST};
