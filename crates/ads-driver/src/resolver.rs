//! Symbolic tag resolution and its per-connection cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ads_transport::index_group::{
    ADSIGRP_SYM_HNDBYNAME, ADSIGRP_SYM_RELEASEHND, ADSIGRP_SYM_VALBYHND,
};
use ads_transport::{AdsPayload, CommandId};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::config::SymbolResolution;
use crate::connection::Inner;
use crate::error::{Error, ResolveError, Result, ValueError};
use crate::tag::{DirectTag, SymbolicTag, Tag};

/// Symbolic tags mapped to the direct tags they resolved to.
///
/// The first caller to resolve a tag runs the resolution; concurrent callers
/// for the same tag wait for its outcome instead of issuing their own round
/// trip. Failures leave no entry behind. Entries are never evicted, so a
/// program download on the device leaves stale mappings until
/// [`Connection::refresh_symbols`](crate::Connection::refresh_symbols).
///
/// Every drain starts a new generation. A resolution that began in an older
/// generation stays in the map and must not be stored as is.
#[derive(Default)]
pub(crate) struct ResolutionCache {
    entries: Mutex<HashMap<SymbolicTag, Arc<OnceCell<DirectTag>>>>,
    generation: AtomicU64,
}

impl ResolutionCache {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) async fn get_or_try_init<F, Fut>(
        &self,
        tag: &SymbolicTag,
        init: F,
    ) -> Result<DirectTag>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DirectTag>>,
    {
        let cell = self.entries.lock().entry(tag.clone()).or_default().clone();
        match cell.get_or_try_init(init).await {
            Ok(direct) => Ok(direct.clone()),
            Err(e) => {
                let mut entries = self.entries.lock();
                if entries
                    .get(tag)
                    .is_some_and(|c| Arc::ptr_eq(c, &cell) && !c.initialized())
                {
                    entries.remove(tag);
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, tag: &SymbolicTag) -> Option<DirectTag> {
        self.entries.lock().get(tag)?.get().cloned()
    }

    /// Number of resolved entries.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Drop every resolved entry and start a new generation, returning the
    /// symbol handles the entries held. Resolutions still in flight keep their
    /// entry so their outcome is not lost.
    pub(crate) fn take_handles(&self) -> Vec<u32> {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut handles = Vec::new();
        entries.retain(|_, cell| match cell.get() {
            Some(direct) => {
                if direct.index_group == ADSIGRP_SYM_VALBYHND {
                    handles.push(direct.index_offset);
                }
                false
            }
            None => true,
        });
        handles
    }
}

impl Inner {
    /// Map any tag to a direct tag, resolving and caching symbolic ones.
    pub(crate) async fn resolve(&self, tag: &Tag) -> Result<DirectTag> {
        match tag {
            Tag::Direct(direct) => Ok(direct.clone()),
            Tag::Symbolic(symbolic) => {
                self.cache
                    .get_or_try_init(symbolic, || self.resolve_symbolic(symbolic))
                    .await
            }
        }
    }

    /// Resolve against the current tables. A refresh during the round trip
    /// releases the handle just acquired and starts over.
    async fn resolve_symbolic(&self, tag: &SymbolicTag) -> Result<DirectTag> {
        loop {
            let generation = self.cache.generation();
            let direct = self.resolve_once(tag).await?;
            if self.cache.generation() == generation {
                return Ok(direct);
            }
            tracing::debug!(address = %tag.symbolic_address, "symbols refreshed while resolving");
            if direct.index_group == ADSIGRP_SYM_VALBYHND {
                self.release_handle(direct.index_offset).await;
            }
        }
    }

    async fn resolve_once(&self, tag: &SymbolicTag) -> Result<DirectTag> {
        let direct = self.context().resolve_tag(tag)?;

        // a handle always covers the whole variable, so slices address it
        // through the tables
        if self.config.symbol_resolution == SymbolResolution::Offset || !tag.array_info.is_empty()
        {
            tracing::debug!(
                address = %tag.symbolic_address,
                index_group = direct.index_group,
                index_offset = direct.index_offset,
                "resolved symbol from tables"
            );
            return Ok(direct);
        }

        let handle = self.acquire_handle(&tag.symbolic_address).await?;
        tracing::debug!(address = %tag.symbolic_address, handle, "acquired symbol handle");
        Ok(DirectTag {
            index_group: ADSIGRP_SYM_VALBYHND,
            index_offset: handle,
            ..direct
        })
    }

    async fn acquire_handle(&self, address: &str) -> Result<u32> {
        let payload = AdsPayload::ReadWriteRequest {
            index_group: ADSIGRP_SYM_HNDBYNAME,
            index_offset: 0,
            read_length: 4,
            data: Bytes::copy_from_slice(address.as_bytes()),
        };
        match self.request(payload).await? {
            AdsPayload::ReadWriteResponse { result, .. } if !result.is_ok() => {
                Err(ResolveError::HandleRejected {
                    address: address.to_string(),
                    code: result,
                }
                .into())
            }
            AdsPayload::ReadWriteResponse { data, .. } => match data.get(..4) {
                Some(handle) => Ok(u32::from_le_bytes([handle[0], handle[1], handle[2], handle[3]])),
                None => Err(ValueError::Truncated {
                    needed: 4,
                    available: data.len(),
                }
                .into()),
            },
            _ => Err(Error::UnexpectedResponse(CommandId::ReadWrite)),
        }
    }

    /// Release every cached symbol handle. Failures are logged only; the
    /// device drops handles with the connection anyway.
    pub(crate) async fn release_handles(&self) {
        for handle in self.cache.take_handles() {
            self.release_handle(handle).await;
        }
    }

    async fn release_handle(&self, handle: u32) {
        let payload = AdsPayload::WriteRequest {
            index_group: ADSIGRP_SYM_RELEASEHND,
            index_offset: 0,
            data: Bytes::copy_from_slice(&handle.to_le_bytes()),
        };
        match self.request(payload).await {
            Ok(AdsPayload::WriteResponse { result }) if result.is_ok() => {
                tracing::debug!(handle, "released symbol handle");
            }
            Ok(other) => tracing::debug!(handle, ?other, "device refused handle release"),
            Err(e) => tracing::debug!(handle, error = %e, "releasing symbol handle"),
        }
    }
}
