use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::channel::oneshot;
use tracing::debug;

use crate::context::Context;
use crate::error::ExecutorError;
use crate::wait_set::{WaitResult, WaitSet};
use crate::waitable::{AnyData, EntityKind, ReadyCallback, Waitable};

use super::inbox::Inbox;

/// Resolves with the service's response once the executor spinning the
/// client has processed it.
pub type ResponseFuture<Resp> = oneshot::Receiver<Resp>;

struct Request<Req, Resp> {
    sequence: u64,
    payload: Req,
    reply_to: Weak<Inbox<(u64, Resp)>>,
}

/// Answers requests sent by clients with the same service name.
pub struct Service<Req, Resp> {
    name: String,
    inbox: Arc<Inbox<Request<Req, Resp>>>,
    callback: Box<dyn Fn(Req) -> Resp + Send + Sync>,
}

impl<Req, Resp> Service<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub(crate) fn new<F>(context: &Context, name: &str, callback: F) -> Result<Arc<Self>, ExecutorError>
    where
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let inbox = Inbox::new(usize::MAX);
        context.registry().advertise_service(name, &inbox)?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            inbox,
            callback: Box::new(callback),
        }))
    }

    pub fn service_name(&self) -> &str {
        &self.name
    }
}

impl<Req, Resp> Waitable for Service<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn kind(&self) -> EntityKind {
        EntityKind::Service
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_to_wait_set(&self, wait_set: &mut WaitSet) {
        wait_set.add_guard_condition(self.inbox.guard());
    }

    fn is_ready(&self, result: &WaitResult) -> bool {
        result.is_guard_ready(self.inbox.guard().id())
    }

    fn take_data(&self) -> Result<Option<AnyData>, ExecutorError> {
        Ok(self.inbox.take().map(|req| Box::new(req) as AnyData))
    }

    fn execute(&self, data: AnyData) -> Result<(), ExecutorError> {
        let request = data.downcast::<Request<Req, Resp>>().map_err(|_| {
            ExecutorError::InvalidArgument(format!("unexpected request type on '{}'", self.name))
        })?;
        let Request { sequence, payload, reply_to } = *request;
        let response = (self.callback)(payload);
        match reply_to.upgrade() {
            Some(client) => {
                client.deliver((sequence, response));
            }
            None => debug!(service = %self.name, sequence, "client gone, response dropped"),
        }
        Ok(())
    }

    fn supports_on_ready_callback(&self) -> bool {
        true
    }

    fn set_on_ready_callback(&self, callback: ReadyCallback) {
        self.inbox
            .guard()
            .set_on_trigger_callback(Some(Box::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.inbox.guard().set_on_trigger_callback(None);
    }
}

/// Sends requests to a service and resolves their futures as responses
/// are executed.
pub struct Client<Req, Resp> {
    name: String,
    context: Arc<Context>,
    inbox: Arc<Inbox<(u64, Resp)>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Resp>>>,
    next_sequence: AtomicU64,
    _marker: std::marker::PhantomData<fn(Req)>,
}

impl<Req, Resp> Client<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub(crate) fn new(context: Arc<Context>, name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            context,
            inbox: Inbox::new(usize::MAX),
            pending: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(1),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.name
    }

    pub fn service_is_ready(&self) -> bool {
        self.context
            .registry()
            .service::<Inbox<Request<Req, Resp>>>(&self.name)
            .is_some()
    }

    pub fn async_send_request(&self, request: Req) -> Result<ResponseFuture<Resp>, ExecutorError> {
        let service = self
            .context
            .registry()
            .service::<Inbox<Request<Req, Resp>>>(&self.name)
            .ok_or_else(|| ExecutorError::ServiceUnavailable(self.name.clone()))?;

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sequence, tx);

        service.deliver(Request {
            sequence,
            payload: request,
            reply_to: Arc::downgrade(&self.inbox),
        });
        Ok(rx)
    }

    /// Requests sent whose responses have not been executed yet.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<Req, Resp> Waitable for Client<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn kind(&self) -> EntityKind {
        EntityKind::Client
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_to_wait_set(&self, wait_set: &mut WaitSet) {
        wait_set.add_guard_condition(self.inbox.guard());
    }

    fn is_ready(&self, result: &WaitResult) -> bool {
        result.is_guard_ready(self.inbox.guard().id())
    }

    fn take_data(&self) -> Result<Option<AnyData>, ExecutorError> {
        Ok(self.inbox.take().map(|resp| Box::new(resp) as AnyData))
    }

    fn execute(&self, data: AnyData) -> Result<(), ExecutorError> {
        let response = data.downcast::<(u64, Resp)>().map_err(|_| {
            ExecutorError::InvalidArgument(format!("unexpected response type on '{}'", self.name))
        })?;
        let (sequence, response) = *response;
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sequence);
        match sender {
            // The caller may have dropped the future; that is not an error.
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(client = %self.name, sequence, "response without pending request"),
        }
        Ok(())
    }

    fn supports_on_ready_callback(&self) -> bool {
        true
    }

    fn set_on_ready_callback(&self, callback: ReadyCallback) {
        self.inbox
            .guard()
            .set_on_trigger_callback(Some(Box::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.inbox.guard().set_on_trigger_callback(None);
    }
}
