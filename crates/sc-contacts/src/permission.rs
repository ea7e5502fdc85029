//! Permission coordinator
//!
//! Turns the store's native authorization status into a [`PermissionGrade`]
//! and makes sure the native prompt is never on screen twice.

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{AuthorizationStatus, PermissionGrade};
use crate::store::ContactStore;

type SharedRequest = Shared<BoxFuture<'static, Result<bool>>>;

/// The prompt currently on screen, tagged so only its starter clears it
struct InFlight {
    generation: u64,
    request: SharedRequest,
}

#[derive(Default)]
struct RequestSlot {
    current: Option<InFlight>,
    next_generation: u64,
}

pub struct PermissionCoordinator {
    store: Arc<dyn ContactStore>,
    probe_restricted: bool,
    slot: Mutex<RequestSlot>,
}

impl PermissionCoordinator {
    pub fn new(store: Arc<dyn ContactStore>, probe_restricted: bool) -> Self {
        Self {
            store,
            probe_restricted,
            slot: Mutex::new(RequestSlot::default()),
        }
    }

    /// Classify the current status without prompting
    pub fn check_permission(&self) -> PermissionGrade {
        let status = self.store.authorization_status();
        let grade = self.classify(status);
        debug!("Authorization status {:?} classified as {}", status, grade);
        grade
    }

    /// Prompt the user if the status is still undetermined
    ///
    /// Callers that arrive while a prompt is showing wait for that prompt
    /// instead of opening another one.
    pub async fn request_permission(&self) -> Result<PermissionGrade> {
        let current = self.check_permission();
        if current != PermissionGrade::Undetermined {
            return Ok(current);
        }

        let (generation, request) = self.join_or_start();
        let outcome = request.await;
        self.finish(generation);

        let answered = outcome?;
        let grade = self.check_permission();
        info!("Permission prompt answered (access given: {}), now {}", answered, grade);
        Ok(grade)
    }

    fn classify(&self, status: AuthorizationStatus) -> PermissionGrade {
        match status {
            AuthorizationStatus::Authorized => PermissionGrade::Granted,
            AuthorizationStatus::Denied => PermissionGrade::Denied,
            AuthorizationStatus::NotDetermined => PermissionGrade::Undetermined,
            AuthorizationStatus::Limited if self.store.supports_limited_access() => PermissionGrade::Limited,
            AuthorizationStatus::Limited => {
                warn!("{} reported limited access it does not support", self.store.name());
                PermissionGrade::Denied
            }
            AuthorizationStatus::Restricted | AuthorizationStatus::Unknown(_) => self.probe(),
        }
    }

    /// Best-effort read to tell partial access from none
    fn probe(&self) -> PermissionGrade {
        if !self.probe_restricted || !self.store.supports_limited_access() {
            return PermissionGrade::Denied;
        }

        match self.store.probe_access() {
            Ok(()) => PermissionGrade::Limited,
            Err(e) => {
                debug!("Access probe on {} failed: {}", self.store.name(), e);
                PermissionGrade::Denied
            }
        }
    }

    fn join_or_start(&self) -> (u64, SharedRequest) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(in_flight) = &slot.current {
            debug!("Joining permission prompt already in flight");
            return (in_flight.generation, in_flight.request.clone());
        }

        let generation = slot.next_generation;
        slot.next_generation += 1;

        let store = Arc::clone(&self.store);
        let request = async move { store.request_access().await }.boxed().shared();
        debug!("Showing permission prompt from {}", self.store.name());

        slot.current = Some(InFlight {
            generation,
            request: request.clone(),
        });
        (generation, request)
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.current.as_ref().is_some_and(|f| f.generation == generation) {
            slot.current = None;
        }
    }
}
