//! Native address-book store interface
//!
//! Everything the bridge needs from the platform goes through
//! [`ContactStore`]. The pipeline only ever calls [`ContactStore::enumerate`]
//! from its enumeration thread; workers see captured [`RawContact`] values.

pub mod memory;
pub mod vcard;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{AuthorizationStatus, FetchRequest, RawContact};

pub use memory::{MemoryStore, PromptOutcome, synthetic_records};
pub use vcard::VcardStore;

/// Lazy, finite, non-restartable walk over the store
///
/// An `Err` item means the walk broke; the driver stops reading after it.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<RawContact>> + Send + 'a>;

/// Capability exposed by a native address-book store
#[async_trait]
pub trait ContactStore: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether this platform can grant access to a user-selected subset
    fn supports_limited_access(&self) -> bool {
        false
    }

    /// Current authorization status, without prompting
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Show the platform permission prompt
    ///
    /// Resolves once the user decided. `Ok(true)` means some access was
    /// given. Platform failures are errors, not denials.
    async fn request_access(&self) -> Result<bool>;

    /// Minimal read used to tell partial access from no access
    ///
    /// Must not mutate anything.
    fn probe_access(&self) -> Result<()>;

    /// Start walking the records selected by `request`
    fn enumerate(&self, request: &FetchRequest) -> Result<RecordStream<'_>>;
}
