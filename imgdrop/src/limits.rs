//! Upload concurrency limiting.
//!
//! Each upload holds a disk write stream and a staged temp file for as long as the client takes to
//! send the body, so the number of uploads in flight is bounded by a semaphore with a bounded,
//! time-limited waiting queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{FileLimitsConfig, LimitsConfig};
use crate::errors::{Error, Result};

const BUSY_MESSAGE: &str = "Too many uploads in progress. Please retry later.";

/// Container for all resource limiters.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Limiter for concurrent uploads. None means unlimited.
    pub file_uploads: Option<Arc<UploadLimiter>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            file_uploads: UploadLimiter::new(&config.files).map(Arc::new),
        }
    }

    /// Take an upload slot if uploads are limited. `None` means no limit is configured.
    pub async fn acquire_upload(&self) -> Result<Option<UploadPermit>> {
        match &self.file_uploads {
            Some(limiter) => limiter.acquire().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Bounded concurrency for uploads with a bounded waiting queue and a wait timeout.
#[derive(Debug)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    /// None = unlimited waiters
    max_waiting: Option<usize>,
    max_wait: Duration,
}

/// Decrements the waiting count however the wait ends.
struct WaitingSlot<'a>(&'a AtomicUsize);

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl UploadLimiter {
    /// Returns `None` when `max_concurrent_uploads` is 0 (unlimited).
    pub fn new(config: &FileLimitsConfig) -> Option<Self> {
        if config.max_concurrent_uploads == 0 {
            return None;
        }

        Some(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            waiting: AtomicUsize::new(0),
            max_waiting: (config.max_waiting_uploads != 0).then_some(config.max_waiting_uploads),
            max_wait: Duration::from_secs(config.max_upload_wait_secs),
        })
    }

    /// Wait for an upload slot.
    ///
    /// Fails with [`Error::TooManyRequests`] when the waiting queue is full, when `max_wait` is
    /// zero and no slot is free, or when the wait times out.
    pub async fn acquire(&self) -> Result<UploadPermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        let already_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _slot = WaitingSlot(&self.waiting);

        if self.max_waiting.is_some_and(|max| already_waiting >= max) {
            return Err(Error::TooManyRequests {
                message: BUSY_MESSAGE.to_string(),
            });
        }

        // a permit may have been released while we joined the queue
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        if self.max_wait.is_zero() {
            return Err(Error::TooManyRequests {
                message: BUSY_MESSAGE.to_string(),
            });
        }

        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(UploadPermit { _permit: permit }),
            Ok(Err(_closed)) => Err(Error::Internal {
                operation: "acquire upload slot: limiter closed".to_string(),
            }),
            Err(_elapsed) => Err(Error::TooManyRequests {
                message: "Timed out waiting for an upload slot. Please retry later.".to_string(),
            }),
        }
    }

    /// Number of requests currently queued for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Releases the upload slot when dropped.
#[must_use]
#[derive(Debug)]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}
