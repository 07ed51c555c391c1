//! Vela State
//!
//! Durable state storage for the Vela provisioning tool. A state document
//! holds every `StateEntry` for one environment along with a serial number
//! and a lineage identifier; backends persist the document and expose it
//! through the `StateStore` trait from `vela-core`, with advisory locking
//! for safe concurrent operation.

pub mod document;
pub mod local;
pub mod lock;

pub use document::StateDocument;
pub use local::LocalStore;
pub use lock::LockInfo;
