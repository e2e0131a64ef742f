// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod error;
pub mod mock;
pub mod observer;
pub mod reconciler;
pub mod traits;

// Re-export primary types
pub use api_client::{ApiClient, ApiClientBuilder};
pub use error::{ReconcileError, Result};
pub use mock::{MockStore, StoreOperation};
pub use observer::{ReconcileEvent, ReconcileObserver, RecordingObserver, TracingObserver};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use traits::StatefulSetStore;
