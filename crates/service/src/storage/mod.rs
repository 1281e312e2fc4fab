//! Storage for the service layer
//!
//! Named JSON documents, one durable record each, with queued per-key
//! mutations, debounced writes and a final drain at shutdown.

pub mod codec;
pub mod drain;
pub mod file_store;
pub mod metrics;
pub mod persistent;
pub mod queue;
pub mod registry;

pub use drain::{termination_signal, DrainReport, ShutdownDrain};
pub use file_store::{FileStore, FsFileStore, MemoryFileStore};
pub use persistent::{Document, PersistentJson};
pub use registry::{ManagedStore, StoreOptions, StoreRegistry};
