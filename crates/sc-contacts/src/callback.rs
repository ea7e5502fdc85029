//! Callback surface for UI hosts
//!
//! Hosts that cannot await a future hand over a [`CallbackContext`] (their
//! UI-affine executor) and a callback. The operation runs on the async
//! runtime and its result, success or error, is posted to the context once.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{ContactsError, Result};
use crate::models::{NormalizedContact, PermissionGrade};
use crate::orchestrator::ContactsBridge;

/// Unit of work posted to a callback context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor the host wants its callbacks to run on
pub trait CallbackContext: Send + Sync + 'static {
    /// Queue `task` to run on the context
    fn dispatch(&self, task: Task) -> Result<()>;
}

/// Channel-backed context: callbacks run wherever the receiver is drained
#[derive(Clone)]
pub struct MainQueue {
    sender: mpsc::UnboundedSender<Task>,
}

/// Receiving half of a [`MainQueue`], owned by the host's main loop
pub struct MainQueueReceiver {
    receiver: mpsc::UnboundedReceiver<Task>,
}

impl MainQueue {
    pub fn new() -> (Self, MainQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, MainQueueReceiver { receiver })
    }
}

impl CallbackContext for MainQueue {
    fn dispatch(&self, task: Task) -> Result<()> {
        self.sender
            .send(task)
            .map_err(|_| ContactsError::ContextUnavailable("main queue receiver dropped".to_string()))
    }
}

impl MainQueueReceiver {
    /// Wait for the next callback and run it; `false` once every sender is gone
    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run whatever is queued right now without waiting
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

impl ContactsBridge {
    /// Fetch contacts and post the outcome to `ctx`
    ///
    /// Returns the task handle, or `None` when no runtime was available (the
    /// callback then gets [`ContactsError::ContextUnavailable`]).
    pub fn get_contacts_callback<F>(
        self: &Arc<Self>,
        ctx: Arc<dyn CallbackContext>,
        callback: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Result<Vec<NormalizedContact>>) + Send + 'static,
    {
        let bridge = Arc::clone(self);
        deliver(ctx, async move { bridge.get_contacts().await }, callback)
    }

    pub fn check_permission_callback<F>(
        self: &Arc<Self>,
        ctx: Arc<dyn CallbackContext>,
        callback: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Result<PermissionGrade>) + Send + 'static,
    {
        let bridge = Arc::clone(self);
        deliver(ctx, async move { Ok(bridge.check_permission()) }, callback)
    }

    pub fn request_permission_callback<F>(
        self: &Arc<Self>,
        ctx: Arc<dyn CallbackContext>,
        callback: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Result<PermissionGrade>) + Send + 'static,
    {
        let bridge = Arc::clone(self);
        deliver(ctx, async move { bridge.request_permission().await }, callback)
    }
}

fn deliver<T, Fut, F>(ctx: Arc<dyn CallbackContext>, work: Fut, callback: F) -> Option<JoinHandle<()>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    F: FnOnce(Result<T>) + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            let result = work.await;
            post(ctx.as_ref(), result, callback);
        })),
        Err(e) => {
            error!("No async runtime for callback operation: {}", e);
            let unavailable = ContactsError::ContextUnavailable(format!("no async runtime: {}", e));
            post(ctx.as_ref(), Err(unavailable), callback);
            None
        }
    }
}

fn post<T, F>(ctx: &dyn CallbackContext, result: Result<T>, callback: F)
where
    T: Send + 'static,
    F: FnOnce(Result<T>) + Send + 'static,
{
    let succeeded = result.is_ok();
    match ctx.dispatch(Box::new(move || callback(result))) {
        Ok(()) => debug!("Posted callback (ok: {})", succeeded),
        Err(e) => error!("Callback could not be delivered: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthorizationStatus;
    use crate::store::{MemoryStore, synthetic_records};
    use sc_core::Config;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bridge(store: MemoryStore) -> Arc<ContactsBridge> {
        Arc::new(ContactsBridge::new(Arc::new(store), &Config::default()))
    }

    #[tokio::test]
    async fn test_contacts_delivered_on_queue() {
        let (queue, mut main) = MainQueue::new();
        let bridge = bridge(MemoryStore::new(synthetic_records(30)));
        let delivered = Arc::new(Mutex::new(None));

        let slot = delivered.clone();
        let handle = bridge
            .get_contacts_callback(Arc::new(queue), move |result| {
                *slot.lock().unwrap() = Some(result.map(|c| c.len()));
            })
            .unwrap();
        handle.await.unwrap();

        // Nothing runs until the host drains its queue
        assert!(delivered.lock().unwrap().is_none());
        assert!(main.run_next().await);
        assert_eq!(*delivered.lock().unwrap(), Some(Ok(30)));
    }

    #[tokio::test]
    async fn test_errors_take_the_same_path() {
        let (queue, mut main) = MainQueue::new();
        let bridge = bridge(MemoryStore::new(synthetic_records(30)).with_enumeration_failure_at(3));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        bridge
            .get_contacts_callback(Arc::new(queue), move |result| {
                assert!(matches!(result, Err(ContactsError::Enumeration(_))));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
            .await
            .unwrap();

        assert!(main.run_next().await);
        assert_eq!(main.run_pending(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permission_callbacks() {
        let (queue, mut main) = MainQueue::new();
        let ctx: Arc<dyn CallbackContext> = Arc::new(queue);
        let bridge = bridge(MemoryStore::new(Vec::new()).with_status(AuthorizationStatus::NotDetermined));
        let grades = Arc::new(Mutex::new(Vec::new()));

        let sink = grades.clone();
        bridge
            .check_permission_callback(ctx.clone(), move |g| sink.lock().unwrap().push(g))
            .unwrap()
            .await
            .unwrap();
        let sink = grades.clone();
        bridge
            .request_permission_callback(ctx, move |g| sink.lock().unwrap().push(g))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(main.run_pending(), 2);
        assert_eq!(
            *grades.lock().unwrap(),
            vec![Ok(PermissionGrade::Undetermined), Ok(PermissionGrade::Granted)]
        );
    }

    #[test]
    fn test_without_runtime_reports_unavailable() {
        let (queue, mut main) = MainQueue::new();
        let bridge = bridge(MemoryStore::new(Vec::new()));
        let delivered = Arc::new(Mutex::new(None));

        let slot = delivered.clone();
        let handle = bridge.get_contacts_callback(Arc::new(queue), move |result| {
            *slot.lock().unwrap() = Some(result);
        });

        assert!(handle.is_none());
        assert_eq!(main.run_pending(), 1);
        let result = delivered.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(ContactsError::ContextUnavailable(_))));
    }

    #[test]
    fn test_dispatch_after_receiver_dropped() {
        let (queue, main) = MainQueue::new();
        drop(main);
        let err = queue.dispatch(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, ContactsError::ContextUnavailable(_)));
    }
}
