//! Fetch orchestrator
//!
//! Ties the permission coordinator to the pipeline:
//!
//! ```text
//! Idle → CheckingPermission → Denied
//!                           → Fetching → Delivered | Failed
//! ```
//!
//! No step is retried automatically.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use sc_core::{Config, DeniedPolicy};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ContactsError, Result};
use crate::models::{FetchRequest, FieldSet, NormalizedContact, PermissionGrade};
use crate::permission::PermissionCoordinator;
use crate::pipeline::{CancellationFlag, Pipeline, PipelineOutput};
use crate::store::ContactStore;

/// Where the most recent fetch is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Idle,
    CheckingPermission,
    Denied,
    Fetching,
    Delivered,
    Failed,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingPermission => "checking_permission",
            Self::Denied => "denied",
            Self::Fetching => "fetching",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Public entry point: permission queries and contact fetches
pub struct ContactsBridge {
    store: Arc<dyn ContactStore>,
    permissions: PermissionCoordinator,
    pipeline: Pipeline,
    denied_policy: DeniedPolicy,
    fields: FieldSet,
    state: Mutex<FetchState>,
}

impl ContactsBridge {
    pub fn new(store: Arc<dyn ContactStore>, config: &Config) -> Self {
        info!(
            "Contacts bridge over {} (denied policy {:?})",
            store.name(),
            config.permission.denied_policy
        );

        Self {
            permissions: PermissionCoordinator::new(Arc::clone(&store), config.permission.probe_restricted),
            pipeline: Pipeline::new(config.pipeline.clone()),
            denied_policy: config.permission.denied_policy,
            fields: FieldSet::all(),
            store,
            state: Mutex::new(FetchState::Idle),
        }
    }

    /// Restrict which fields get normalized
    pub fn with_fields(mut self, fields: FieldSet) -> Self {
        self.fields = fields;
        self
    }

    pub fn state(&self) -> FetchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check_permission(&self) -> PermissionGrade {
        self.permissions.check_permission()
    }

    pub async fn request_permission(&self) -> Result<PermissionGrade> {
        self.permissions.request_permission().await
    }

    /// Fetch the whole readable address book
    pub async fn get_contacts(&self) -> Result<Vec<NormalizedContact>> {
        self.get_contacts_with_summary().await.map(|output| output.contacts)
    }

    /// Fetch and report what the pipeline did
    pub async fn get_contacts_with_summary(&self) -> Result<PipelineOutput> {
        self.fetch(CancellationFlag::new()).await
    }

    /// Fetch, giving up at the next batch boundary once `cancel` is set
    pub async fn fetch(&self, cancel: CancellationFlag) -> Result<PipelineOutput> {
        self.transition(FetchState::CheckingPermission);

        let mut grade = self.permissions.check_permission();
        if grade == PermissionGrade::Undetermined {
            grade = match self.permissions.request_permission().await {
                Ok(grade) => grade,
                Err(e) => {
                    warn!("Permission request failed: {}", e);
                    self.transition(FetchState::Failed);
                    return Err(e);
                }
            };
        }

        let Some(request) = FetchRequest::for_grade(grade, self.fields.clone()) else {
            self.transition(FetchState::Denied);
            return match self.denied_policy {
                DeniedPolicy::Empty => {
                    info!("Address book access is {}, returning no contacts", grade);
                    Ok(PipelineOutput::default())
                }
                DeniedPolicy::Error => Err(ContactsError::PermissionDenied(grade)),
            };
        };

        self.transition(FetchState::Fetching);
        let result = self
            .pipeline
            .run(Arc::clone(&self.store), request, cancel)
            .await;

        match &result {
            Ok(_) => self.transition(FetchState::Delivered),
            Err(e) => {
                warn!("Fetch failed ({}, retryable: {}): {}", e.code(), e.is_retryable(), e);
                self.transition(FetchState::Failed);
            }
        }
        result
    }

    fn transition(&self, next: FetchState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Fetch state {} -> {}", *state, next);
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorizationStatus, RawContact};
    use crate::store::{MemoryStore, PromptOutcome, synthetic_records};
    use std::collections::HashSet;

    fn bridge(store: &Arc<MemoryStore>) -> ContactsBridge {
        ContactsBridge::new(store.clone(), &Config::default())
    }

    fn strict_bridge(store: &Arc<MemoryStore>) -> ContactsBridge {
        let mut config = Config::default();
        config.permission.denied_policy = DeniedPolicy::Error;
        ContactsBridge::new(store.clone(), &config)
    }

    #[tokio::test]
    async fn test_empty_address_book() {
        let store = Arc::new(MemoryStore::new(Vec::new()));
        let bridge = bridge(&store);
        assert_eq!(bridge.state(), FetchState::Idle);

        let contacts = bridge.get_contacts().await.unwrap();
        assert!(contacts.is_empty());
        assert_eq!(bridge.state(), FetchState::Delivered);
    }

    #[tokio::test]
    async fn test_denied_returns_empty_without_enumerating() {
        let store = Arc::new(MemoryStore::new(synthetic_records(20)).with_status(AuthorizationStatus::Denied));
        let bridge = bridge(&store);

        let contacts = bridge.get_contacts().await.unwrap();
        assert!(contacts.is_empty());
        assert_eq!(bridge.state(), FetchState::Denied);
        assert_eq!(store.enumeration_count(), 0);
        assert_eq!(store.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_policy_error() {
        let store = Arc::new(MemoryStore::new(synthetic_records(20)).with_status(AuthorizationStatus::Denied));
        let err = strict_bridge(&store).get_contacts().await.unwrap_err();

        assert_eq!(err, ContactsError::PermissionDenied(PermissionGrade::Denied));
        assert_eq!(store.enumeration_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_then_fetch() {
        let store = Arc::new(
            MemoryStore::new(synthetic_records(25)).with_status(AuthorizationStatus::NotDetermined),
        );
        let bridge = bridge(&store);

        assert_eq!(bridge.get_contacts().await.unwrap().len(), 25);
        assert_eq!(bridge.get_contacts().await.unwrap().len(), 25);
        assert_eq!(store.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_prompt_denied_yields_empty() {
        let store = Arc::new(
            MemoryStore::new(synthetic_records(25))
                .with_status(AuthorizationStatus::NotDetermined)
                .with_prompt_outcome(PromptOutcome::Deny),
        );
        let bridge = bridge(&store);

        assert!(bridge.get_contacts().await.unwrap().is_empty());
        assert_eq!(bridge.check_permission(), PermissionGrade::Denied);
    }

    #[tokio::test]
    async fn test_prompt_failure_short_circuits() {
        let store = Arc::new(
            MemoryStore::new(synthetic_records(25))
                .with_status(AuthorizationStatus::NotDetermined)
                .with_prompt_outcome(PromptOutcome::Fail("prompt crashed".into())),
        );
        let bridge = bridge(&store);

        let err = bridge.get_contacts().await.unwrap_err();
        assert!(matches!(err, ContactsError::PermissionRequestFailed(_)));
        assert_eq!(bridge.state(), FetchState::Failed);
        assert_eq!(store.enumeration_count(), 0);
    }

    #[tokio::test]
    async fn test_limited_access_returns_shared_subset() {
        let shared = ["contact-3", "contact-7", "contact-11", "contact-40"];
        let store = Arc::new(
            MemoryStore::new(synthetic_records(50))
                .with_status(AuthorizationStatus::Limited)
                .with_limited_subset(shared),
        );
        let bridge = bridge(&store);
        assert_eq!(bridge.check_permission(), PermissionGrade::Limited);

        let ids: HashSet<String> = bridge
            .get_contacts()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.record_id)
            .collect();
        let expected: HashSet<String> = shared.iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_enumeration_failure_propagates() {
        let store = Arc::new(MemoryStore::new(synthetic_records(500)).with_enumeration_failure_at(250));
        let bridge = bridge(&store);

        let err = bridge.get_contacts().await.unwrap_err();
        assert!(matches!(err, ContactsError::Enumeration(_)));
        assert_eq!(bridge.state(), FetchState::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_summary_counts_drops() {
        let mut records = synthetic_records(401);
        records.push(RawContact::new("  "));
        let store = Arc::new(MemoryStore::new(records));

        let output = bridge(&store).get_contacts_with_summary().await.unwrap();
        assert_eq!(output.summary.total_seen, 402);
        assert_eq!(output.summary.delivered, 401);
        assert_eq!(output.summary.dropped, 1);
        assert_eq!(output.summary.batches, 3);
    }

    #[tokio::test]
    async fn test_essential_fields_only() {
        let mut raw = RawContact::new("1")
            .with_name("Ada", "Lovelace")
            .with_email(None, "ada@example.com")
            .with_birthday(Some(1815), 12, 10);
        raw.note = "first programmer".to_string();
        let store = Arc::new(MemoryStore::new(vec![raw]));
        let bridge = bridge(&store).with_fields(FieldSet::essential());

        let contacts = bridge.get_contacts().await.unwrap();
        assert_eq!(contacts[0].display_name, "Ada Lovelace");
        assert_eq!(contacts[0].email_addresses.len(), 1);
        assert!(contacts[0].birthday.is_none());
        assert!(contacts[0].note.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_fetch() {
        let store = Arc::new(MemoryStore::new(synthetic_records(100)));
        let bridge = bridge(&store);
        let cancel = CancellationFlag::new();
        cancel.cancel();

        assert_eq!(bridge.fetch(cancel).await.unwrap_err(), ContactsError::Cancelled);
        assert_eq!(bridge.state(), FetchState::Failed);
    }
}
