//! Device notifications.
//!
//! A subscription registers an ADS device notification for one tag. The
//! device then pushes `DeviceNotification` packets on its own; these are not
//! responses to any request and arrive through the unsolicited path of the
//! receive loop, which routes each sample to its subscription by handle.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ads_transport::{AdsPayload, AmsPacket, TransmissionMode};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::ValueError;
use crate::tag::DirectTag;
use crate::value::{PlcValue, decode_tag};

/// Samples kept for handles whose subscription is not registered yet.
const MAX_ORPHAN_SAMPLES: usize = 64;

/// 100ns intervals between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

/// How the device should report changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub mode: TransmissionMode,
    /// Sampling interval for cyclic mode, check interval for on-change mode.
    pub cycle_time: Duration,
    /// Longest the device may buffer samples before sending.
    pub max_delay: Duration,
}

impl SubscriptionOptions {
    pub fn on_change(cycle_time: Duration) -> Self {
        Self {
            mode: TransmissionMode::OnChange,
            cycle_time,
            max_delay: Duration::ZERO,
        }
    }

    pub fn cyclic(cycle_time: Duration) -> Self {
        Self {
            mode: TransmissionMode::Cyclic,
            cycle_time,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self::on_change(Duration::from_millis(100))
    }
}

/// Duration in the 100ns units ADS uses for notification timing.
pub(crate) fn hundred_nanos(duration: Duration) -> u32 {
    (duration.as_nanos() / 100).try_into().unwrap_or(u32::MAX)
}

/// Convert a Windows FILETIME to wall clock time.
pub fn filetime_to_system_time(filetime: u64) -> SystemTime {
    match filetime.checked_sub(FILETIME_UNIX_OFFSET) {
        Some(since_epoch) => UNIX_EPOCH + Duration::from_nanos(since_epoch.saturating_mul(100)),
        None => UNIX_EPOCH,
    }
}

/// One pushed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub timestamp: SystemTime,
    pub value: Result<PlcValue, ValueError>,
}

/// A live device notification.
///
/// Dropping a subscription stops delivery locally; the device keeps sending
/// until [`Connection::unsubscribe`](crate::Connection::unsubscribe) or the
/// connection closes.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) handle: u32,
    tag: DirectTag,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    pub(crate) fn new(handle: u32, tag: DirectTag, rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { handle, tag, rx }
    }

    /// Notification handle assigned by the device.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn tag(&self) -> &DirectTag {
        &self.tag
    }

    /// Wait for the next sample. Returns `None` once the connection closed.
    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

struct Route {
    tag: DirectTag,
    tx: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
struct RouterState {
    routes: HashMap<u32, Route>,
    /// A sample can arrive between the device accepting a notification and
    /// the subscriber registering its handle.
    orphans: VecDeque<(u32, SystemTime, Bytes)>,
}

/// Routes pushed samples to subscriptions by notification handle.
#[derive(Default)]
pub(crate) struct SubscriptionRouter {
    state: Mutex<RouterState>,
}

impl SubscriptionRouter {
    pub(crate) fn register(&self, handle: u32, tag: DirectTag) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (early, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.orphans)
            .into_iter()
            .partition(|(h, _, _)| *h == handle);
        state.orphans = rest;
        for (_, timestamp, data) in early {
            let _ = tx.send(Notification {
                timestamp,
                value: decode_tag(&tag, &data),
            });
        }
        state.routes.insert(
            handle,
            Route {
                tag: tag.clone(),
                tx,
            },
        );
        Subscription::new(handle, tag, rx)
    }

    pub(crate) fn unregister(&self, handle: u32) {
        self.state.lock().routes.remove(&handle);
    }

    pub(crate) fn handles(&self) -> Vec<u32> {
        self.state.lock().routes.keys().copied().collect()
    }

    /// Drop every route, ending all subscriptions.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.routes.clear();
        state.orphans.clear();
    }

    /// Handle a packet no pending request claimed.
    pub(crate) fn handle_unsolicited(&self, packet: AmsPacket) {
        let AdsPayload::DeviceNotification { stamps } = packet.payload else {
            tracing::warn!(
                invoke_id = packet.invoke_id,
                command = ?packet.command_id,
                "dropping unsolicited packet"
            );
            return;
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        for stamp in stamps {
            let timestamp = filetime_to_system_time(stamp.timestamp);
            for sample in stamp.samples {
                let Some(route) = state.routes.get(&sample.handle) else {
                    if state.orphans.len() == MAX_ORPHAN_SAMPLES {
                        if let Some((handle, _, _)) = state.orphans.pop_front() {
                            tracing::warn!(handle, "dropping notification for unknown handle");
                        }
                    }
                    state.orphans.push_back((sample.handle, timestamp, sample.data));
                    continue;
                };
                let notification = Notification {
                    timestamp,
                    value: decode_tag(&route.tag, &sample.data),
                };
                if route.tx.send(notification).is_err() {
                    tracing::debug!(handle = sample.handle, "subscription dropped, removing route");
                    state.routes.remove(&sample.handle);
                }
            }
        }
    }
}
