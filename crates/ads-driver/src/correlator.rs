//! Matching responses to requests.
//!
//! Every request takes an invoke id from the range `1..=255` and parks a
//! oneshot sender in the pending registry. The receive loop hands each inbound
//! packet to [`Correlator::dispatch`], which completes the waiting request or
//! returns the packet as unsolicited traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use ads_transport::{
    AdsPayload, AmsAddr, AmsPacket, AmsWriter, CommandId, InvokeId, PacketError, ReturnCode,
};
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Highest invoke id; ids wrap back to 1 and 0 is never used.
pub const MAX_INVOKE_ID: InvokeId = 255;

pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Decides whether an inbound packet carrying the right invoke id answers the
/// pending request.
pub(crate) type Matcher = Box<dyn Fn(&AmsPacket) -> bool + Send + Sync>;

struct Pending {
    token: u64,
    matcher: Matcher,
    tx: oneshot::Sender<Result<AmsPacket, PacketError>>,
}

pub(crate) struct Correlator {
    source: AmsAddr,
    target: AmsAddr,
    writer: tokio::sync::Mutex<AmsWriter<BoxedWrite>>,
    last_invoke_id: AtomicU32,
    next_token: AtomicU64,
    pending: Mutex<HashMap<InvokeId, Pending>>,
    closed: AtomicBool,
}

/// Frees the pending slot if the request ends without a match: timeout, send
/// failure or the caller dropping the future.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<InvokeId, Pending>>,
    invoke_id: InvokeId,
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending
            .get(&self.invoke_id)
            .is_some_and(|entry| entry.token == self.token)
        {
            pending.remove(&self.invoke_id);
        }
    }
}

impl Correlator {
    pub(crate) fn new(writer: AmsWriter<BoxedWrite>, source: AmsAddr, target: AmsAddr) -> Self {
        Self {
            source,
            target,
            writer: tokio::sync::Mutex::new(writer),
            last_invoke_id: AtomicU32::new(0),
            next_token: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Send `payload` and wait for the response of the same command.
    pub(crate) async fn request(&self, payload: AdsPayload, timeout: Duration) -> Result<AmsPacket> {
        let command = payload.command_id().unwrap_or(CommandId::Other(0));
        let matcher: Matcher = Box::new(move |packet| packet.command_id == command);
        self.request_matching(payload, matcher, timeout).await
    }

    /// Send `payload` and wait for a response with its invoke id accepted by
    /// `matcher`.
    pub(crate) async fn request_matching(
        &self,
        payload: AdsPayload,
        matcher: Matcher,
        timeout: Duration,
    ) -> Result<AmsPacket> {
        // one deadline for queueing behind other writers, sending and waiting
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let invoke_id = {
            let mut pending = self.pending.lock();
            // checked under the lock so close() cannot miss this entry
            if self.is_closed() {
                return Err(Error::ConnectionClosed);
            }
            let invoke_id = self.allocate_invoke_id(&pending)?;
            pending.insert(
                invoke_id,
                Pending {
                    token,
                    matcher,
                    tx,
                },
            );
            invoke_id
        };
        let _guard = PendingGuard {
            pending: &self.pending,
            invoke_id,
            token,
        };

        let timed_out = |stage: &str| {
            tracing::warn!(invoke_id, ?timeout, stage, "request timed out");
            Error::Timeout { invoke_id, timeout }
        };

        let packet = AmsPacket::request(self.target, self.source, invoke_id, payload);
        tracing::debug!(invoke_id, command = ?packet.command_id, "sending request");
        let send = async {
            let mut writer = self.writer.lock().await;
            writer.send(packet).await.map_err(Error::Send)
        };
        // a send cut short leaves the frame buffered in the writer, so the
        // stream stays framed for the next request
        tokio::time::timeout_at(deadline, send)
            .await
            .map_err(|_| timed_out("sending"))??;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(Ok(response))) => {
                if response.error_code != ReturnCode::OK {
                    return Err(Error::Protocol(response.error_code));
                }
                Ok(response)
            }
            Ok(Ok(Err(e))) => Err(Error::Decode(e)),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(timed_out("waiting for response")),
        }
    }

    /// Pick the next free invoke id. Ids still held by outstanding requests are
    /// skipped.
    fn allocate_invoke_id(&self, pending: &HashMap<InvokeId, Pending>) -> Result<InvokeId> {
        for _ in 0..MAX_INVOKE_ID {
            let previous = self
                .last_invoke_id
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| {
                    Some(id % MAX_INVOKE_ID + 1)
                })
                .unwrap_or_else(|id| id);
            let invoke_id = previous % MAX_INVOKE_ID + 1;
            if !pending.contains_key(&invoke_id) {
                return Ok(invoke_id);
            }
        }
        Err(Error::TooManyPendingRequests)
    }

    /// Complete the request `packet` answers. Packets nobody waits for are
    /// handed back.
    pub(crate) fn dispatch(&self, packet: AmsPacket) -> Option<AmsPacket> {
        let mut pending = self.pending.lock();
        let claimed = packet.is_response()
            && pending
                .get(&packet.invoke_id)
                .is_some_and(|entry| (entry.matcher)(&packet));
        if !claimed {
            return Some(packet);
        }

        let entry = pending.remove(&packet.invoke_id)?;
        drop(pending);
        tracing::debug!(invoke_id = packet.invoke_id, "matched response");
        if entry.tx.send(Ok(packet)).is_err() {
            tracing::debug!("response arrived after the caller gave up");
        }
        None
    }

    /// Fail the request a malformed response belongs to. Errors that cannot
    /// be attributed to an outstanding request are handed back.
    pub(crate) fn dispatch_error(&self, error: PacketError) -> Option<PacketError> {
        let Some(invoke_id) = error.response_invoke_id() else {
            return Some(error);
        };
        let Some(entry) = self.pending.lock().remove(&invoke_id) else {
            return Some(error);
        };
        tracing::warn!(invoke_id, error = %error, "malformed response");
        if entry.tx.send(Err(error)).is_err() {
            tracing::debug!("response arrived after the caller gave up");
        }
        None
    }

    /// Fail every outstanding request with [`Error::ConnectionClosed`] and
    /// refuse new ones.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let pending = std::mem::take(&mut *self.pending.lock());
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "failing outstanding requests");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) async fn shutdown_writer(&self) {
        use futures::SinkExt;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "closing writer");
        }
    }
}
