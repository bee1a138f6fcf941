//! A connection to one ADS device.

use std::sync::Arc;

use ads_transport::index_group::{
    ADSIGRP_SYM_DT_UPLOAD, ADSIGRP_SYM_UPLOAD, ADSIGRP_SYM_UPLOADINFO2,
};
use ads_transport::{
    AdsPayload, AmsCodec, AmsReader, AmsTransport, AmsWriter, CodecError, CommandId, DeviceInfo,
    NotificationRequest, split_with_codec,
};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::io::AsyncRead;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowseItem, browse};
use crate::config::ConnectionConfig;
use crate::context::{DriverContext, UPLOAD_INFO_LEN, UploadInfo};
use crate::correlator::{BoxedWrite, Correlator};
use crate::error::{Error, Result};
use crate::reader::{ReadRequest, ReadResponse};
use crate::resolver::ResolutionCache;
use crate::subscription::{Subscription, SubscriptionOptions, SubscriptionRouter, hundred_nanos};
use crate::tag::{Tag, parse_tag};
use crate::value::PlcValue;
use crate::writer::{WriteRequest, WriteResponse};

/// ADS and device state reported by `ReadState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    /// `ADSSTATE_*`, e.g. 5 for RUN.
    pub ads_state: u16,
    pub device_state: u16,
}

/// State shared between the connection handle, its receive loop and the
/// request pipelines.
pub(crate) struct Inner {
    pub(crate) config: ConnectionConfig,
    pub(crate) correlator: Correlator,
    context: RwLock<Arc<DriverContext>>,
    pub(crate) cache: ResolutionCache,
    pub(crate) subscriptions: SubscriptionRouter,
}

impl Inner {
    pub(crate) fn context(&self) -> Arc<DriverContext> {
        self.context.read().clone()
    }

    /// Send a request and return the response payload.
    pub(crate) async fn request(&self, payload: AdsPayload) -> Result<AdsPayload> {
        let response = self
            .correlator
            .request(payload, self.config.request_timeout())
            .await?;
        Ok(response.payload)
    }

    /// Download the symbol and data-type tables.
    async fn upload_symbols(&self) -> Result<DriverContext> {
        let info = self
            .read_raw(ADSIGRP_SYM_UPLOADINFO2, 0, UPLOAD_INFO_LEN)
            .await?;
        let info = UploadInfo::parse(&info)?;
        tracing::debug!(?info, "symbol upload info");

        let symbols = self
            .read_raw(ADSIGRP_SYM_UPLOAD, 0, info.symbol_length)
            .await?;
        let data_types = self
            .read_raw(ADSIGRP_SYM_DT_UPLOAD, 0, info.data_type_length)
            .await?;
        Ok(DriverContext::from_uploads(&symbols, &data_types)?)
    }
}

/// A connection to an ADS device.
///
/// All operations take `&self` and can run concurrently; each waits for its
/// own response. Dropping the connection stops the receive loop; call
/// [`Connection::close`] first to release device resources.
pub struct Connection {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    receive_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect over TCP to an AMS router, usually port 48898.
    pub async fn connect(addr: impl ToSocketAddrs, config: ConnectionConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::from_transport(stream, config).await
    }

    /// Run the connection over any transport and download the symbol tables.
    #[tracing::instrument(skip_all, fields(target = %config.target()))]
    pub async fn from_transport<T: AmsTransport>(
        transport: T,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let connection = Self::start(transport, config);
        connection.refresh_symbols().await?;
        Ok(connection)
    }

    /// Run the connection without downloading the symbol tables. Only
    /// direct tags resolve until [`Connection::refresh_symbols`] is called.
    pub fn start<T: AmsTransport>(transport: T, config: ConnectionConfig) -> Self {
        let codec = AmsCodec::with_max_size(config.max_frame_size);
        let (reader, writer) = split_with_codec(transport, codec);
        let writer: BoxedWrite = Box::new(writer.into_inner());

        let inner = Arc::new(Inner {
            correlator: Correlator::new(AmsWriter::new(writer), config.source(), config.target()),
            config,
            context: RwLock::new(Arc::new(DriverContext::default())),
            cache: ResolutionCache::default(),
            subscriptions: SubscriptionRouter::default(),
        });
        let cancel = CancellationToken::new();
        let receive_task = Self::spawn_receive_loop(reader, inner.clone(), cancel.clone());

        Self {
            inner,
            cancel,
            receive_task: parking_lot::Mutex::new(Some(receive_task)),
        }
    }

    /// Single reader of the transport: hands responses to the correlator and
    /// everything else to the subscriptions.
    fn spawn_receive_loop<R>(
        mut reader: AmsReader<R>,
        inner: Arc<Inner>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("receive loop cancelled");
                        break;
                    }
                    packet = reader.next() => {
                        match packet {
                            Some(Ok(packet)) => {
                                if let Some(unclaimed) = inner.correlator.dispatch(packet) {
                                    inner.subscriptions.handle_unsolicited(unclaimed);
                                }
                            }
                            Some(Err(CodecError::Packet(e))) => {
                                if let Some(e) = inner.correlator.dispatch_error(e) {
                                    tracing::warn!(error = %e, "discarded malformed frame");
                                }
                            }
                            Some(Err(e)) => {
                                tracing::error!(error = %e, "transport error");
                                break;
                            }
                            None => {
                                tracing::debug!("transport closed");
                                break;
                            }
                        }
                    }
                }
            }
            inner.correlator.close();
            inner.subscriptions.clear();
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The symbol and data-type tables downloaded from the device.
    pub fn context(&self) -> Arc<DriverContext> {
        self.inner.context()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.correlator.is_closed()
    }

    /// Download the symbol tables again, dropping every cached resolution.
    ///
    /// Call this after a program download on the device; cached resolutions
    /// otherwise keep addressing the old memory layout.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_symbols(&self) -> Result<()> {
        let context = self.inner.upload_symbols().await?;
        *self.inner.context.write() = Arc::new(context);
        self.inner.release_handles().await;
        Ok(())
    }

    /// Read any number of tags. One tag is read directly, more are batched
    /// into a single sum read.
    ///
    /// Every round trip of the call (handle resolution, then the read) is
    /// bounded by [`ConnectionConfig::request_timeout`]. For an overall
    /// deadline wrap the call in [`tokio::time::timeout`]; dropping the future
    /// frees its invoke ids and leaves other requests untouched.
    #[tracing::instrument(skip_all, fields(tags = request.len()))]
    pub async fn read(&self, request: ReadRequest) -> Result<ReadResponse> {
        self.inner.read(request).await
    }

    /// Read exactly one tag; any other count is a usage error.
    pub async fn read_single(&self, request: ReadRequest) -> Result<ReadResponse> {
        self.inner.read_single(request).await
    }

    /// Read one address, failing on a non-OK device status.
    #[tracing::instrument(skip(self))]
    pub async fn read_tag(&self, address: &str) -> Result<PlcValue> {
        let response = self
            .inner
            .read(ReadRequest::new().add_tag(address, parse_tag(address)?))
            .await?;
        let item = response
            .get(address)
            .ok_or(Error::UnexpectedResponse(CommandId::Read))?;
        item.code.into_result()?;
        item.value
            .clone()
            .ok_or(Error::UnexpectedResponse(CommandId::Read))
    }

    /// Write one tag; any other count is a usage error.
    ///
    /// Deadlines work as for [`Connection::read`].
    pub async fn write(&self, request: WriteRequest) -> Result<WriteResponse> {
        self.inner.write(request).await
    }

    /// Write one address, failing on a non-OK device status.
    #[tracing::instrument(skip(self, value))]
    pub async fn write_tag(&self, address: &str, value: PlcValue) -> Result<()> {
        let response = self
            .inner
            .write(WriteRequest::new().add_tag(address, parse_tag(address)?, value))
            .await?;
        response
            .code(address)
            .ok_or(Error::UnexpectedResponse(CommandId::Write))?
            .into_result()
    }

    /// List symbols and members matching `filter`. Answered from the
    /// downloaded tables without device traffic.
    pub fn browse(&self, filter: &str) -> Vec<BrowseItem> {
        browse(&self.inner.context(), filter)
    }

    /// Register a device notification for `address`.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe(&self, address: &str, options: SubscriptionOptions) -> Result<Subscription> {
        let tag: Tag = parse_tag(address)?;
        let direct = self.inner.resolve(&tag).await?;
        let payload = AdsPayload::AddDeviceNotificationRequest(NotificationRequest {
            index_group: direct.index_group,
            index_offset: direct.index_offset,
            length: direct.size()?,
            mode: options.mode,
            max_delay: hundred_nanos(options.max_delay),
            cycle_time: hundred_nanos(options.cycle_time),
        });
        match self.inner.request(payload).await? {
            AdsPayload::AddDeviceNotificationResponse { result, .. } if !result.is_ok() => {
                Err(Error::Protocol(result))
            }
            AdsPayload::AddDeviceNotificationResponse { handle, .. } => {
                tracing::debug!(address, handle, "subscribed");
                Ok(self.inner.subscriptions.register(handle, direct))
            }
            _ => Err(Error::UnexpectedResponse(CommandId::AddDeviceNotification)),
        }
    }

    /// Delete the device notification behind `subscription`.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        self.inner.subscriptions.unregister(subscription.handle);
        self.delete_notification(subscription.handle).await
    }

    async fn delete_notification(&self, handle: u32) -> Result<()> {
        match self
            .inner
            .request(AdsPayload::DeleteDeviceNotificationRequest { handle })
            .await?
        {
            AdsPayload::DeleteDeviceNotificationResponse { result } if result.is_ok() => Ok(()),
            AdsPayload::DeleteDeviceNotificationResponse { result } => Err(Error::Protocol(result)),
            _ => Err(Error::UnexpectedResponse(CommandId::DeleteDeviceNotification)),
        }
    }

    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        match self.inner.request(AdsPayload::ReadDeviceInfoRequest).await? {
            AdsPayload::ReadDeviceInfoResponse { result, .. } if !result.is_ok() => {
                Err(Error::Protocol(result))
            }
            AdsPayload::ReadDeviceInfoResponse { info, .. } => Ok(info),
            _ => Err(Error::UnexpectedResponse(CommandId::ReadDeviceInfo)),
        }
    }

    pub async fn read_state(&self) -> Result<DeviceState> {
        match self.inner.request(AdsPayload::ReadStateRequest).await? {
            AdsPayload::ReadStateResponse { result, .. } if !result.is_ok() => {
                Err(Error::Protocol(result))
            }
            AdsPayload::ReadStateResponse {
                ads_state,
                device_state,
                ..
            } => Ok(DeviceState {
                ads_state,
                device_state,
            }),
            _ => Err(Error::UnexpectedResponse(CommandId::ReadState)),
        }
    }

    /// Number of symbolic tags resolved and cached on this connection.
    pub fn cached_tags(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Delete notifications, release symbol handles and stop the receive
    /// loop. Outstanding requests fail with [`Error::ConnectionClosed`].
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        if !self.is_closed() {
            for handle in self.inner.subscriptions.handles() {
                if let Err(e) = self.delete_notification(handle).await {
                    tracing::debug!(handle, error = %e, "deleting notification");
                }
            }
            self.inner.release_handles().await;
        }

        self.cancel.cancel();
        self.inner.correlator.close();
        self.inner.subscriptions.clear();
        *self.inner.context.write() = Arc::new(DriverContext::default());
        self.inner.correlator.shutdown_writer().await;

        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "receive loop panicked");
            }
        }
        tracing::debug!("connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.inner.correlator.close();
    }
}
