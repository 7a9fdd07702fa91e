// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Activity Monitor
//!
//! Per-device watcher that turns file create/modify/delete events on an
//! authorized device into audit records.
//!
//! The monitor makes no authorization decisions. The enforcement loop starts
//! one when a device is authorized and stops it when the device disappears or
//! loses its authorization. Stopping cancels the task and waits for it, so no
//! record is written for a device after [`MonitorHandle::stop`] returns.

#[cfg(target_os = "linux")]
mod inotify;

#[cfg(target_os = "linux")]
pub use inotify::InotifySource;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WatchError;
use crate::models::{AuditAction, AuditRecord, DeviceDescriptor, Fingerprint};
use crate::storage::AuditSink;

/// Capacity of the per-device event channel.
pub const EVENT_BUFFER: usize = 1024;

/// One file event observed under a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub action: AuditAction,
}

/// Source of file events for a directory tree.
///
/// Events stop flowing once `cancel` fires; implementations must observe it
/// promptly and release their OS resources.
pub trait FileEventSource: Send + Sync {
    fn watch(
        &self,
        root: &Path,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<FsEvent>, WatchError>;
}

/// Event source for the current platform.
pub fn platform_source() -> Arc<dyn FileEventSource> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(InotifySource::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedSource)
    }
}

#[cfg(not(target_os = "linux"))]
struct UnsupportedSource;

#[cfg(not(target_os = "linux"))]
impl FileEventSource for UnsupportedSource {
    fn watch(
        &self,
        _root: &Path,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<FsEvent>, WatchError> {
        Err(WatchError::Unsupported)
    }
}

/// Starts per-device monitors that forward events to the audit sink.
#[derive(Clone)]
pub struct ActivityMonitor {
    source: Arc<dyn FileEventSource>,
    sink: Arc<dyn AuditSink>,
}

impl ActivityMonitor {
    pub fn new(source: Arc<dyn FileEventSource>, sink: Arc<dyn AuditSink>) -> Self {
        Self { source, sink }
    }

    /// Begin auditing `device`. Must be called from within a tokio runtime.
    pub fn start(
        &self,
        device: &DeviceDescriptor,
        fingerprint: Fingerprint,
    ) -> Result<MonitorHandle, WatchError> {
        let cancel = CancellationToken::new();
        let events = self.source.watch(device.root(), cancel.clone())?;

        info!(
            volume = %device.volume_id,
            label = %device.display_name(),
            fingerprint = %fingerprint,
            "Activity monitor started"
        );

        let task = tokio::spawn(forward_events(
            device.display_name().to_string(),
            device.volume_id.clone(),
            fingerprint,
            events,
            Arc::clone(&self.sink),
            cancel.clone(),
        ));

        Ok(MonitorHandle {
            cancel,
            task: Some(task),
        })
    }
}

async fn forward_events(
    label: String,
    volume: String,
    fingerprint: Fingerprint,
    mut events: mpsc::Receiver<FsEvent>,
    sink: Arc<dyn AuditSink>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    debug!(volume = %volume, "Event source closed");
                    break;
                };
                let record = AuditRecord::new(label.clone(), fingerprint.clone(), event.path, event.action);
                let sink = Arc::clone(&sink);
                match tokio::task::spawn_blocking(move || sink.append(&record).map(|_| record)).await {
                    Ok(Ok(record)) => info!(
                        volume = %volume,
                        path = %record.path.display(),
                        action = record.action.as_str(),
                        "Logged file activity"
                    ),
                    Ok(Err(e)) => warn!(volume = %volume, error = %e, "Failed to append audit record"),
                    Err(e) => warn!(volume = %volume, error = %e, "Audit append task failed"),
                }
            }
        }
    }
    info!(volume = %volume, "Activity monitor stopped");
}

/// Owning handle for one running monitor. Dropping it cancels the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Cancel and wait for the monitor to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Activity monitor task ended abnormally");
            }
        }
    }

    /// Whether the monitor task has exited on its own (e.g. source closed).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Test source: hands the sender side of each watch to the test.
    #[derive(Default)]
    pub struct ChannelSource {
        senders: Mutex<HashMap<PathBuf, mpsc::Sender<FsEvent>>>,
        cancels: Mutex<HashMap<PathBuf, CancellationToken>>,
    }

    impl ChannelSource {
        pub fn sender(&self, root: &str) -> Option<mpsc::Sender<FsEvent>> {
            self.senders.lock().unwrap().get(Path::new(root)).cloned()
        }

        pub fn is_watching(&self, root: &str) -> bool {
            self.cancels
                .lock()
                .unwrap()
                .get(Path::new(root))
                .is_some_and(|c| !c.is_cancelled())
        }

        pub fn watch_count(&self) -> usize {
            self.cancels.lock().unwrap().len()
        }

        /// Drop every sender, closing all watch channels.
        pub fn close_all(&self) {
            self.senders.lock().unwrap().clear();
        }
    }

    impl FileEventSource for ChannelSource {
        fn watch(
            &self,
            root: &Path,
            cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<FsEvent>, WatchError> {
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            self.senders.lock().unwrap().insert(root.to_path_buf(), tx);
            self.cancels.lock().unwrap().insert(root.to_path_buf(), cancel);
            Ok(rx)
        }
    }
}
