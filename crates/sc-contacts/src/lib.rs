//! sc-contacts: Address book bridge for simple-contacts
//!
//! This crate reads a native address book through a [`ContactStore`] and
//! returns a uniform list of [`NormalizedContact`] values.
//!
//! ## Features
//!
//! - Permission checks and a single-flight permission prompt
//! - Batched, bounded-concurrency normalization of large address books
//! - In-memory and vCard file stores
//! - Callback delivery for hosts that cannot await futures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sc_contacts::{ContactsBridge, VcardStore};
//! use sc_core::Config;
//!
//! let config = Config::load()?;
//! let store = Arc::new(VcardStore::open("contacts.vcf")?);
//! let bridge = ContactsBridge::new(store, &config);
//!
//! let grade = bridge.request_permission().await?;
//! let contacts = bridge.get_contacts().await?;
//! ```

pub mod callback;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod permission;
pub mod pipeline;
pub mod store;

pub use callback::{CallbackContext, MainQueue, MainQueueReceiver};
pub use error::{ContactsError, NormalizationError, Result};
pub use models::{
    AuthorizationStatus, ContactField, FetchRequest, FieldSet, NormalizedContact, PermissionGrade,
    RawContact,
};
pub use orchestrator::{ContactsBridge, FetchState};
pub use permission::PermissionCoordinator;
pub use pipeline::{CancellationFlag, FetchSummary, Pipeline, PipelineOutput};
pub use store::{ContactStore, MemoryStore, PromptOutcome, VcardStore};

/// Re-export the common types for easy use
pub mod prelude {
    pub use super::{
        ContactStore, ContactsBridge, ContactsError, FetchSummary, NormalizedContact, PermissionGrade,
    };
}
