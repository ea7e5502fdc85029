//! In-process store backed by a vector of raw records
//!
//! Stands in for the platform store in tests, benchmarks and the demo mode of
//! the bridge binary. Permission behavior and failures are scripted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{ContactStore, RecordStream};
use crate::error::{ContactsError, Result};
use crate::models::{
    AuthorizationStatus, FetchRequest, FetchScope, RawContact, RawLabeledValue, SortOrder,
};

/// What the scripted permission prompt does when shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Grant,
    GrantLimited,
    Deny,
    /// The prompt itself errors
    Fail(String),
    /// There is nothing to show the prompt on
    NoContext,
}

/// Scripted in-memory contact store
pub struct MemoryStore {
    records: Vec<RawContact>,
    status: Mutex<AuthorizationStatus>,
    prompt_outcome: PromptOutcome,
    prompt_delay: Duration,
    prompts: AtomicUsize,
    enumerations: AtomicUsize,
    fail_at: Option<usize>,
    limited_ids: Option<HashSet<String>>,
    probe_ok: bool,
}

impl MemoryStore {
    /// Create a store that is already authorized
    pub fn new(records: Vec<RawContact>) -> Self {
        Self {
            records,
            status: Mutex::new(AuthorizationStatus::Authorized),
            prompt_outcome: PromptOutcome::Grant,
            prompt_delay: Duration::ZERO,
            prompts: AtomicUsize::new(0),
            enumerations: AtomicUsize::new(0),
            fail_at: None,
            limited_ids: None,
            probe_ok: true,
        }
    }

    /// Set the current authorization status
    pub fn with_status(self, status: AuthorizationStatus) -> Self {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
        self
    }

    /// Script the permission prompt
    pub fn with_prompt_outcome(mut self, outcome: PromptOutcome) -> Self {
        self.prompt_outcome = outcome;
        self
    }

    /// Time the user "takes" to answer the prompt
    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    /// Break the walk when it reaches the record at `index`
    pub fn with_enumeration_failure_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Enable limited access; only these identifiers are shared
    pub fn with_limited_subset<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.limited_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the access probe succeeds
    pub fn with_probe(mut self, ok: bool) -> Self {
        self.probe_ok = ok;
        self
    }

    /// Number of times the permission prompt was shown
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Number of walks started
    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: AuthorizationStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn selected(&self, request: &FetchRequest) -> Vec<&RawContact> {
        let mut selected: Vec<&RawContact> = match (request.scope, &self.limited_ids) {
            (FetchScope::AuthorizedSubset, Some(ids)) => self
                .records
                .iter()
                .filter(|r| ids.contains(&r.identifier))
                .collect(),
            (FetchScope::AuthorizedSubset, None) => Vec::new(),
            (FetchScope::All, _) => self.records.iter().collect(),
        };

        // Stable sort keeps store order among equal keys
        match request.sort_order {
            SortOrder::Natural => {}
            SortOrder::GivenName => selected.sort_by(|a, b| a.given_name.cmp(&b.given_name)),
            SortOrder::FamilyName => selected.sort_by(|a, b| a.family_name.cmp(&b.family_name)),
        }

        selected
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports_limited_access(&self) -> bool {
        self.limited_ids.is_some()
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request_access(&self) -> Result<bool> {
        let shown = self.prompts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Memory store prompt shown ({} so far)", shown);

        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }

        match &self.prompt_outcome {
            PromptOutcome::Grant => {
                self.set_status(AuthorizationStatus::Authorized);
                Ok(true)
            }
            PromptOutcome::GrantLimited => {
                self.set_status(AuthorizationStatus::Limited);
                Ok(true)
            }
            PromptOutcome::Deny => {
                self.set_status(AuthorizationStatus::Denied);
                Ok(false)
            }
            PromptOutcome::Fail(reason) => Err(ContactsError::PermissionRequestFailed(reason.clone())),
            PromptOutcome::NoContext => Err(ContactsError::ContextUnavailable(
                "no foreground context to present the prompt".to_string(),
            )),
        }
    }

    fn probe_access(&self) -> Result<()> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(ContactsError::Enumeration(
                "default container is not readable".to_string(),
            ))
        }
    }

    fn enumerate(&self, request: &FetchRequest) -> Result<RecordStream<'_>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let selected = self.selected(request);
        let fail_at = self.fail_at;
        let mut broken = false;

        let stream = selected.into_iter().enumerate().map_while(move |(index, raw)| {
            if broken {
                return None;
            }
            if fail_at == Some(index) {
                broken = true;
                return Some(Err(ContactsError::Enumeration(format!(
                    "store cursor failed at record {}",
                    index
                ))));
            }
            Some(Ok(raw.clone()))
        });

        Ok(Box::new(stream))
    }
}

/// Generate `count` plausible raw records with identifiers `contact-<n>`
pub fn synthetic_records(count: usize) -> Vec<RawContact> {
    const GIVEN: [&str; 8] = ["Ada", "Grace", "Alan", "Edsger", "Barbara", "Ken", "Linus", "Margaret"];
    const FAMILY: [&str; 6] = ["Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Thompson"];

    (0..count)
        .map(|i| {
            let mut raw = RawContact::new(format!("contact-{}", i))
                .with_name(GIVEN[i % GIVEN.len()], FAMILY[i % FAMILY.len()])
                .with_phone(Some("_$!<Mobile>!$_"), format!("+1555{:07}", i));
            if i % 3 == 0 {
                raw = raw.with_email(None, format!("user{}@example.com", i));
            }
            if i % 5 == 0 {
                raw.url_addresses
                    .push(RawLabeledValue::new(Some("_$!<HomePage>!$_"), format!("https://example.com/{}", i)));
            }
            raw
        })
        .collect()
}
