// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Enforcement Loop
//!
//! Background task that detects removable devices, verifies their tokens and
//! ejects anything not authorized.
//!
//! ## Cycle
//!
//! Every `poll_interval` (default 5 s) the loop:
//! 1. Enumerates devices. Entries for devices no longer listed are dropped and
//!    their monitors stopped. This is the only place entries are destroyed.
//! 2. Verifies every present device concurrently. Tokens are re-read each
//!    cycle; nothing is cached. Missing fingerprints, absent tokens and read
//!    failures all fail closed.
//! 3. Starts an activity monitor for each authorized device that lacks one,
//!    and stops the monitor of any device that lost its authorization.
//! 4. Ejects unauthorized devices concurrently. A failed eject is retried
//!    `eject_retries` times after `eject_retry_delay`; if it still fails the
//!    device stays `EjectFailed` and is tried again next cycle.
//!
//! Blocking collaborator calls run on the blocking pool under a timeout. A
//! token read that outlives its timeout stays attached to the device's entry;
//! until it returns no new read is started and the device fails closed.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; all monitors are stopped
//! before [`EnforcementLoop::run`] returns.

pub mod decision;
mod entry;

pub use decision::decide;
pub use entry::{DeviceKey, DeviceState, EnforcementEntry};

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::authority::AuthorityService;
use crate::config::EnforcementPolicy;
use crate::error::{EjectError, EnumerationError};
use crate::models::{AuthorizationDecision, DeviceDescriptor, Fingerprint, IndeterminateReason};
use crate::monitor::ActivityMonitor;
use crate::platform::{DeviceEnumerator, Ejector, Notifier};
use crate::storage::{EnrollmentPause, TokenRead, TokenStore};

const ALERT_TITLE: &str = "USB Alert";

/// External collaborators the loop drives.
#[derive(Clone)]
pub struct Collaborators {
    pub enumerator: Arc<dyn DeviceEnumerator>,
    pub token_store: Arc<dyn TokenStore>,
    pub ejector: Arc<dyn Ejector>,
    pub notifier: Arc<dyn Notifier>,
}

/// Summary of one enforcement cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub present: usize,
    pub removed: usize,
    pub authorized: usize,
    pub unauthorized: usize,
    pub ejected: usize,
    pub eject_failed: usize,
}

/// Result of ejecting one device within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EjectOutcome {
    pub attempts: u32,
    pub result: Result<(), EjectError>,
}

/// The detect → verify → enforce state machine.
pub struct EnforcementLoop {
    authority: Arc<AuthorityService>,
    collaborators: Collaborators,
    monitor: ActivityMonitor,
    policy: EnforcementPolicy,
    pause: Option<EnrollmentPause>,
    entries: HashMap<DeviceKey, EnforcementEntry>,
}

impl EnforcementLoop {
    pub fn new(
        authority: Arc<AuthorityService>,
        collaborators: Collaborators,
        monitor: ActivityMonitor,
        policy: EnforcementPolicy,
    ) -> Self {
        Self {
            authority,
            collaborators,
            monitor,
            policy,
            pause: None,
            entries: HashMap::new(),
        }
    }

    /// Honour the enrollment pause marker.
    pub fn with_pause(mut self, pause: EnrollmentPause) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Run the loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(enforcement.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.policy.poll_interval.as_secs(),
            eject_retries = self.policy.eject_retries,
            "Enforcement loop starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.policy.poll_interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Enforcement loop shutting down");
        self.release_all().await;
    }

    /// Tracked devices.
    pub fn entries(&self) -> impl Iterator<Item = (&DeviceKey, &EnforcementEntry)> {
        self.entries.iter()
    }

    /// Entry for the device mounted at `volume_id`, if tracked.
    pub fn entry_for_volume(&self, volume_id: &str) -> Option<&EnforcementEntry> {
        self.entries
            .iter()
            .find(|(key, _)| key.volume_id() == volume_id)
            .map(|(_, entry)| entry)
    }

    /// Execute one enforcement cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let devices = self.enumerate().await;
        report.present = devices.len();

        // Removal
        let present: HashSet<DeviceKey> = devices.iter().map(DeviceKey::for_device).collect();
        let gone: Vec<DeviceKey> = self
            .entries
            .keys()
            .filter(|key| !present.contains(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(entry) = self.entries.remove(&key) {
                release(&key, entry).await;
                report.removed += 1;
            }
        }

        // Verification
        let mut verifications = JoinSet::new();
        let mut decisions: HashMap<DeviceKey, AuthorizationDecision> = HashMap::new();
        let mut seen = HashSet::new();
        for device in devices {
            let key = DeviceKey::for_device(&device);
            if !seen.insert(key.clone()) {
                continue;
            }
            let entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| EnforcementEntry::detected(device.clone()));
            entry.descriptor = device.clone();
            entry.transition(DeviceState::Verifying);

            let Some(fp) = key.fingerprint().cloned() else {
                // No token can be bound to this device; skip the read.
                decisions.insert(key, decide(&self.authority, None, &TokenRead::Absent));
                continue;
            };
            // At most one blocking read per device; a hung one is not replaced.
            if entry.has_pending_read() {
                warn!(device = %key, "Previous token read still blocked, failing closed");
                decisions.insert(
                    key,
                    AuthorizationDecision::Indeterminate(IndeterminateReason::TokenIo(
                        "token read still pending".to_string(),
                    )),
                );
                continue;
            }
            entry.pending_read = None;

            let store = Arc::clone(&self.collaborators.token_store);
            let read = tokio::task::spawn_blocking(move || store.read(&device));
            let authority = Arc::clone(&self.authority);
            let io_timeout = self.policy.io_timeout;
            verifications.spawn(async move {
                let (decision, pending) = verify_device(&authority, &fp, read, io_timeout).await;
                (key, decision, pending)
            });
        }

        while let Some(joined) = verifications.join_next().await {
            match joined {
                Ok((key, decision, pending)) => {
                    if let Some(entry) = self.entries.get_mut(&key) {
                        entry.pending_read = pending;
                    }
                    decisions.insert(key, decision);
                }
                Err(e) => error!(error = %e, "Verification task failed"),
            }
        }

        // Decisions
        let mut to_eject = Vec::new();
        for key in seen {
            let decision = decisions.remove(&key).unwrap_or_else(|| {
                AuthorizationDecision::Indeterminate(IndeterminateReason::TokenIo(
                    "verification did not complete".to_string(),
                ))
            });
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };

            log_decision(&key, entry.descriptor(), &decision);
            let was_denied = entry.decision.as_ref().is_some_and(|d| !d.is_authorized());
            entry.decision = Some(decision.clone());

            if decision.is_authorized() {
                report.authorized += 1;
                entry.transition(DeviceState::Authorized);
                entry.eject_attempts = 0;

                if !entry.is_monitored() {
                    if let Some(stale) = entry.monitor.take() {
                        stale.stop().await;
                    }
                    if let Some(fp) = key.fingerprint() {
                        match self.monitor.start(&entry.descriptor, fp.clone()) {
                            Ok(handle) => entry.monitor = Some(handle),
                            Err(e) => warn!(
                                device = %key,
                                error = %e,
                                "Failed to start activity monitor, will retry next cycle"
                            ),
                        }
                    }
                }
            } else {
                report.unauthorized += 1;
                if let Some(handle) = entry.monitor.take() {
                    info!(device = %key, "Authorization lost, stopping activity monitor");
                    handle.stop().await;
                }
                if !was_denied {
                    notify(
                        &self.collaborators.notifier,
                        self.policy.io_timeout,
                        format!(
                            "Your USB {} is not authenticated. Ejecting...",
                            entry.descriptor.display_name()
                        ),
                    )
                    .await;
                }
                entry.transition(DeviceState::Unauthorized);
                to_eject.push(key);
            }
        }

        if to_eject.is_empty() {
            return report;
        }

        if self.pause.as_ref().is_some_and(EnrollmentPause::is_active) {
            info!(
                devices = to_eject.len(),
                "Enrollment in progress, ejection suspended this cycle"
            );
            return report;
        }

        // Enforcement
        let mut ejections = JoinSet::new();
        for key in to_eject {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            error!(
                device = %key,
                label = %entry.descriptor.display_name(),
                "Unauthorized USB detected"
            );
            entry.transition(DeviceState::Ejecting);

            let ejector = Arc::clone(&self.collaborators.ejector);
            let volume_id = entry.descriptor.volume_id.clone();
            let policy = self.policy.clone();
            ejections.spawn(async move {
                let outcome = eject_with_retry(ejector, volume_id, &policy).await;
                (key, outcome)
            });
        }

        let mut outcomes: HashMap<DeviceKey, EjectOutcome> = HashMap::new();
        while let Some(joined) = ejections.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    outcomes.insert(key, outcome);
                }
                Err(e) => error!(error = %e, "Eject task failed"),
            }
        }

        for (key, entry) in self.entries.iter_mut() {
            if entry.state != DeviceState::Ejecting {
                continue;
            }
            match outcomes.remove(key) {
                Some(EjectOutcome {
                    attempts,
                    result: Ok(()),
                }) => {
                    entry.eject_attempts += attempts;
                    entry.transition(DeviceState::Ejected);
                    report.ejected += 1;
                    info!(device = %key, attempts, "USB ejected successfully");
                }
                Some(EjectOutcome {
                    attempts,
                    result: Err(e),
                }) => {
                    entry.eject_attempts += attempts;
                    entry.transition(DeviceState::EjectFailed);
                    report.eject_failed += 1;
                    error!(
                        device = %key,
                        attempts,
                        error = %e,
                        "Eject failed, deferring to next cycle"
                    );
                    notify(
                        &self.collaborators.notifier,
                        self.policy.io_timeout,
                        format!(
                            "Could not eject unauthorized USB {}: {e}",
                            entry.descriptor.display_name()
                        ),
                    )
                    .await;
                }
                None => {
                    entry.transition(DeviceState::EjectFailed);
                    report.eject_failed += 1;
                }
            }
        }

        report
    }

    async fn enumerate(&self) -> Vec<DeviceDescriptor> {
        let enumerator = Arc::clone(&self.collaborators.enumerator);
        let listing = tokio::task::spawn_blocking(move || enumerator.list());

        let result = match tokio::time::timeout(self.policy.io_timeout, listing).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EnumerationError::Command(format!("enumeration task failed: {e}"))),
            Err(_) => Err(EnumerationError::TimedOut(self.policy.io_timeout)),
        };
        result.unwrap_or_else(|e| {
            warn!(error = %e, "Device enumeration failed, treating as no devices");
            Vec::new()
        })
    }

    async fn release_all(&mut self) {
        for (key, entry) in self.entries.drain() {
            release(&key, entry).await;
        }
    }
}

async fn release(key: &DeviceKey, mut entry: EnforcementEntry) {
    if let Some(handle) = entry.monitor.take() {
        handle.stop().await;
    }
    info!(
        device = %key,
        last_state = entry.state.as_str(),
        eject_attempts = entry.eject_attempts,
        "Device removed"
    );
    entry.transition(DeviceState::Removed);
}

/// Wait for a token read under the I/O timeout.
///
/// A read that times out is handed back so the caller can hold it instead of
/// starting another on the same device.
async fn verify_device(
    authority: &AuthorityService,
    fingerprint: &Fingerprint,
    mut read: JoinHandle<TokenRead>,
    io_timeout: Duration,
) -> (AuthorizationDecision, Option<JoinHandle<TokenRead>>) {
    let waited = tokio::time::timeout(io_timeout, &mut read).await;
    let (token, pending) = match waited {
        Ok(Ok(token)) => (token, None),
        Ok(Err(e)) => (TokenRead::Io(io::Error::other(e.to_string())), None),
        Err(_) => (
            TokenRead::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("token read exceeded {io_timeout:?}"),
            )),
            Some(read),
        ),
    };
    (decide(authority, Some(fingerprint), &token), pending)
}

/// Eject a volume, retrying after a fixed delay.
///
/// Makes at most `1 + policy.eject_retries` calls.
pub async fn eject_with_retry(
    ejector: Arc<dyn Ejector>,
    volume_id: String,
    policy: &EnforcementPolicy,
) -> EjectOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = eject_once(Arc::clone(&ejector), volume_id.clone(), policy).await;
        if let Err(e) = &result {
            warn!(volume = %volume_id, attempt = attempts, error = %e, "Error ejecting USB");
        }
        if result.is_ok() || attempts > policy.eject_retries {
            return EjectOutcome { attempts, result };
        }
        warn!(volume = %volume_id, "Retrying ejection...");
        tokio::time::sleep(policy.eject_retry_delay).await;
    }
}

async fn eject_once(
    ejector: Arc<dyn Ejector>,
    volume_id: String,
    policy: &EnforcementPolicy,
) -> Result<(), EjectError> {
    let call = tokio::task::spawn_blocking(move || ejector.eject(&volume_id));
    match tokio::time::timeout(policy.eject_timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(EjectError::Failed(format!("eject task failed: {e}"))),
        Err(_) => Err(EjectError::TimedOut(policy.eject_timeout)),
    }
}

fn log_decision(key: &DeviceKey, device: &DeviceDescriptor, decision: &AuthorizationDecision) {
    let label = device.display_name();
    match decision {
        AuthorizationDecision::Authorized => {
            info!(device = %key, label = %label, status = "authorized", "Device status");
        }
        AuthorizationDecision::Indeterminate(IndeterminateReason::TokenIo(e)) => {
            warn!(
                device = %key,
                label = %label,
                error = %e,
                "License verification error, failing closed"
            );
        }
        other => {
            info!(device = %key, label = %label, status = %other, "Device status");
        }
    }
}

async fn notify(notifier: &Arc<dyn Notifier>, timeout: Duration, message: String) {
    let notifier = Arc::clone(notifier);
    let call = tokio::task::spawn_blocking(move || notifier.notify(ALERT_TITLE, &message));
    if tokio::time::timeout(timeout, call).await.is_err() {
        warn!("Notification timed out");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;
    use crate::authority::{fingerprint, SharedSecret};
    use crate::models::{sample_descriptor, AuditAction};
    use crate::monitor::testing::ChannelSource;
    use crate::monitor::FsEvent;
    use crate::storage::audit::testing::MemoryAuditSink;
    use crate::storage::{FsTokenStore, PauseGuard, StoragePaths};

    const SECRET: &[u8] = b"4654365f-a510-47b4-a2b6-e2bf1993f0ef";

    #[derive(Default)]
    struct ScriptedEnumerator {
        devices: Mutex<Option<Vec<DeviceDescriptor>>>,
    }

    impl ScriptedEnumerator {
        fn set(&self, devices: Vec<DeviceDescriptor>) {
            *self.devices.lock().unwrap() = Some(devices);
        }

        fn fail(&self) {
            *self.devices.lock().unwrap() = None;
        }
    }

    impl DeviceEnumerator for ScriptedEnumerator {
        fn list(&self) -> Result<Vec<DeviceDescriptor>, EnumerationError> {
            self.devices
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| EnumerationError::Command("lsblk exited with status 1".into()))
        }
    }

    #[derive(Default)]
    struct ScriptedEjector {
        fail: AtomicBool,
        hang: Mutex<Option<Duration>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedEjector {
        fn failing() -> Self {
            let ejector = Self::default();
            ejector.fail.store(true, Ordering::SeqCst);
            ejector
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Ejector for ScriptedEjector {
        fn eject(&self, volume_id: &str) -> Result<(), EjectError> {
            self.calls.lock().unwrap().push(volume_id.to_string());
            if let Some(delay) = *self.hang.lock().unwrap() {
                std::thread::sleep(delay);
            }
            if self.fail.load(Ordering::SeqCst) {
                Err(EjectError::Failed("device busy".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, _title: &str, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    struct UnreadableTokenStore;

    impl TokenStore for UnreadableTokenStore {
        fn read(&self, _device: &DeviceDescriptor) -> TokenRead {
            TokenRead::Io(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"))
        }

        fn write(
            &self,
            _device: &DeviceDescriptor,
            _token: &crate::models::Token,
        ) -> Result<(), crate::error::TokenWriteError> {
            Ok(())
        }
    }

    /// Token store whose reads block until released.
    #[derive(Default)]
    struct BlockingTokenStore {
        started: AtomicUsize,
        finished: AtomicUsize,
        release: AtomicBool,
    }

    impl TokenStore for BlockingTokenStore {
        fn read(&self, _device: &DeviceDescriptor) -> TokenRead {
            self.started.fetch_add(1, Ordering::SeqCst);
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while !self.release.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            TokenRead::Absent
        }

        fn write(
            &self,
            _device: &DeviceDescriptor,
            _token: &crate::models::Token,
        ) -> Result<(), crate::error::TokenWriteError> {
            Ok(())
        }
    }

    struct Harness {
        authority: Arc<AuthorityService>,
        enumerator: Arc<ScriptedEnumerator>,
        ejector: Arc<ScriptedEjector>,
        notifier: Arc<RecordingNotifier>,
        source: Arc<ChannelSource>,
        sink: Arc<MemoryAuditSink>,
        enforcement: EnforcementLoop,
    }

    fn test_policy() -> EnforcementPolicy {
        EnforcementPolicy {
            poll_interval: Duration::from_millis(20),
            eject_retries: 1,
            eject_retry_delay: Duration::from_millis(10),
            io_timeout: Duration::from_millis(500),
            eject_timeout: Duration::from_millis(200),
        }
    }

    fn harness(ejector: ScriptedEjector) -> Harness {
        harness_with(ejector, Arc::new(FsTokenStore))
    }

    fn harness_with(ejector: ScriptedEjector, token_store: Arc<dyn TokenStore>) -> Harness {
        let authority = Arc::new(AuthorityService::new(
            &SharedSecret::from_bytes(SECRET.to_vec()).unwrap(),
        ));
        let enumerator = Arc::new(ScriptedEnumerator::default());
        let ejector = Arc::new(ejector);
        let notifier = Arc::new(RecordingNotifier::default());
        let source = Arc::new(ChannelSource::default());
        let sink = Arc::new(MemoryAuditSink::default());

        let enforcement = EnforcementLoop::new(
            Arc::clone(&authority),
            Collaborators {
                enumerator: enumerator.clone(),
                token_store,
                ejector: ejector.clone(),
                notifier: notifier.clone(),
            },
            ActivityMonitor::new(source.clone(), sink.clone()),
            test_policy(),
        );

        Harness {
            authority,
            enumerator,
            ejector,
            notifier,
            source,
            sink,
            enforcement,
        }
    }

    fn usb(dir: &TempDir, serial: &str) -> DeviceDescriptor {
        sample_descriptor(&dir.path().to_string_lossy(), serial)
    }

    fn enroll(authority: &AuthorityService, device: &DeviceDescriptor) -> String {
        let token = authority.issue(fingerprint(device).as_ref()).unwrap();
        FsTokenStore.write(device, &token).unwrap();
        token.as_str().to_string()
    }

    fn token_path(device: &DeviceDescriptor) -> PathBuf {
        StoragePaths::token_artifact(device.root())
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn enrolled_device_is_authorized_and_audited() {
        let mut h = harness(ScriptedEjector::default());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        enroll(&h.authority, &device);
        h.enumerator.set(vec![device.clone()]);

        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.present, 1);
        assert_eq!(report.authorized, 1);
        assert_eq!(report.unauthorized, 0);
        assert_eq!(h.ejector.calls(), 0);

        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert_eq!(entry.state(), DeviceState::Authorized);
        assert_eq!(entry.decision(), Some(&AuthorizationDecision::Authorized));
        assert!(entry.is_monitored());
        assert!(h.source.is_watching(&device.volume_id));

        let tx = h.source.sender(&device.volume_id).unwrap();
        tx.send(FsEvent {
            path: device.root().join("notes.txt"),
            action: AuditAction::Created,
        })
        .await
        .unwrap();
        assert!(wait_for(|| h.sink.records().len() == 1).await);

        // Still authorized on the next cycle; the same monitor keeps running.
        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.authorized, 1);
        tx.send(FsEvent {
            path: device.root().join("notes.txt"),
            action: AuditAction::Modified,
        })
        .await
        .unwrap();
        assert!(wait_for(|| h.sink.records().len() == 2).await);
        assert_eq!(h.source.watch_count(), 1);
        assert_eq!(h.ejector.calls(), 0);
        assert!(h.notifier.messages().is_empty());

        let records = h.sink.records();
        assert_eq!(records[0].device_label, "KINGSTON");
        assert_eq!(records[0].fingerprint.as_str(), "ABC123");
        assert_eq!(records[1].action, AuditAction::Modified);
    }

    #[tokio::test]
    async fn tampered_token_is_ejected_with_one_retry_per_cycle() {
        let mut h = harness(ScriptedEjector::failing());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        let token = enroll(&h.authority, &device);

        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        fs::write(token_path(&device), &tampered).unwrap();
        h.enumerator.set(vec![device.clone()]);

        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.unauthorized, 1);
        assert_eq!(report.eject_failed, 1);
        assert_eq!(h.ejector.calls(), 2);

        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert_eq!(entry.state(), DeviceState::EjectFailed);
        assert_eq!(entry.decision(), Some(&AuthorizationDecision::Unauthorized));
        assert_eq!(entry.eject_attempts(), 2);
        assert!(!entry.is_monitored());

        // Retried next cycle, without a second "not authenticated" alert.
        h.enforcement.run_cycle().await;
        assert_eq!(h.ejector.calls(), 4);
        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert_eq!(entry.eject_attempts(), 4);

        let messages = h.notifier.messages();
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.contains("is not authenticated"))
                .count(),
            1
        );
        assert_eq!(messages.iter().filter(|m| m.contains("Could not eject")).count(), 2);
        assert!(h.sink.records().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_device_ejected_on_first_attempt() {
        let mut h = harness(ScriptedEjector::default());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        fs::write(token_path(&device), "not-a-token").unwrap();
        h.enumerator.set(vec![device.clone()]);

        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.ejected, 1);
        assert_eq!(h.ejector.calls(), 1);
        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert_eq!(entry.state(), DeviceState::Ejected);
        assert_eq!(entry.eject_attempts(), 1);
        assert_eq!(h.notifier.messages(), vec![
            "Your USB KINGSTON is not authenticated. Ejecting...".to_string()
        ]);
    }

    #[tokio::test]
    async fn deleting_token_revokes_authorization() {
        let mut h = harness(ScriptedEjector::default());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        enroll(&h.authority, &device);
        h.enumerator.set(vec![device.clone()]);

        h.enforcement.run_cycle().await;
        assert!(h.source.is_watching(&device.volume_id));

        fs::remove_file(token_path(&device)).unwrap();
        let report = h.enforcement.run_cycle().await;

        assert_eq!(report.authorized, 0);
        assert_eq!(report.unauthorized, 1);
        assert_eq!(h.ejector.calls(), 1);
        assert!(!h.source.is_watching(&device.volume_id));

        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert!(!entry.is_monitored());
        assert_eq!(entry.state(), DeviceState::Ejected);
        assert_eq!(
            entry.decision(),
            Some(&AuthorizationDecision::Indeterminate(IndeterminateReason::TokenAbsent))
        );
    }

    #[tokio::test]
    async fn removed_device_is_forgotten() {
        let mut h = harness(ScriptedEjector::failing());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        h.enumerator.set(vec![device.clone()]);

        h.enforcement.run_cycle().await;
        assert_eq!(
            h.enforcement.entry_for_volume(&device.volume_id).map(EnforcementEntry::state),
            Some(DeviceState::EjectFailed)
        );
        let calls = h.ejector.calls();

        h.enumerator.set(Vec::new());
        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.present, 0);
        assert!(h.enforcement.entries().next().is_none());

        h.enforcement.run_cycle().await;
        assert_eq!(h.ejector.calls(), calls);
    }

    #[tokio::test]
    async fn device_without_serial_is_never_authorized() {
        let mut h = harness(ScriptedEjector::default());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "Unknown");
        // Any token on disk is irrelevant without a fingerprint.
        let other = usb(&dir, "ABC123");
        enroll(&h.authority, &other);
        h.enumerator.set(vec![device.clone()]);

        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.unauthorized, 1);
        assert_eq!(h.ejector.calls(), 1);

        let (key, entry) = h.enforcement.entries().next().unwrap();
        assert!(key.fingerprint().is_none());
        assert_eq!(
            entry.decision(),
            Some(&AuthorizationDecision::Indeterminate(IndeterminateReason::NoFingerprint))
        );
    }

    #[tokio::test]
    async fn unreadable_token_fails_closed() {
        let mut h = harness_with(ScriptedEjector::default(), Arc::new(UnreadableTokenStore));
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        h.enumerator.set(vec![device.clone()]);

        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.unauthorized, 1);
        assert_eq!(report.ejected, 1);

        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert!(matches!(
            entry.decision(),
            Some(AuthorizationDecision::Indeterminate(IndeterminateReason::TokenIo(_)))
        ));
    }

    #[tokio::test]
    async fn hung_token_read_is_not_restarted() {
        let store = Arc::new(BlockingTokenStore::default());
        let mut h = harness_with(ScriptedEjector::default(), store.clone());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        h.enumerator.set(vec![device.clone()]);

        for _ in 0..3 {
            let report = h.enforcement.run_cycle().await;
            assert_eq!(report.unauthorized, 1);
            assert_eq!(report.ejected, 1);

            let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
            assert!(entry.has_pending_read());
            assert!(matches!(
                entry.decision(),
                Some(AuthorizationDecision::Indeterminate(IndeterminateReason::TokenIo(_)))
            ));
        }
        assert_eq!(store.started.load(Ordering::SeqCst), 1);
        assert_eq!(h.ejector.calls(), 3);

        // Once the stuck read returns, the next cycle reads again.
        store.release.store(true, Ordering::SeqCst);
        assert!(wait_for(|| store.finished.load(Ordering::SeqCst) == 1).await);
        assert!(
            wait_for(|| !h
                .enforcement
                .entry_for_volume(&device.volume_id)
                .is_some_and(EnforcementEntry::has_pending_read))
            .await
        );

        h.enforcement.run_cycle().await;
        assert_eq!(store.started.load(Ordering::SeqCst), 2);
        let entry = h.enforcement.entry_for_volume(&device.volume_id).unwrap();
        assert!(!entry.has_pending_read());
        assert_eq!(
            entry.decision(),
            Some(&AuthorizationDecision::Indeterminate(IndeterminateReason::TokenAbsent))
        );
    }

    #[tokio::test]
    async fn enumeration_failure_counts_as_no_devices() {
        let mut h = harness(ScriptedEjector::default());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        enroll(&h.authority, &device);
        h.enumerator.set(vec![device.clone()]);
        h.enforcement.run_cycle().await;
        assert!(h.source.is_watching(&device.volume_id));

        h.enumerator.fail();
        let report = h.enforcement.run_cycle().await;
        assert_eq!(report, CycleReport { removed: 1, ..CycleReport::default() });
        assert!(!h.source.is_watching(&device.volume_id));

        // Recovers on the next successful enumeration.
        h.enumerator.set(vec![device.clone()]);
        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.authorized, 1);
        assert!(h.source.is_watching(&device.volume_id));
        assert_eq!(h.ejector.calls(), 0);
    }

    #[tokio::test]
    async fn enrollment_pause_suspends_ejection() {
        let state = TempDir::new().unwrap();
        let paths = StoragePaths::new(state.path());
        let mut h = harness(ScriptedEjector::default());
        h.enforcement = h.enforcement.with_pause(EnrollmentPause::new(&paths));

        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        h.enumerator.set(vec![device.clone()]);

        let guard = PauseGuard::acquire(&paths).unwrap();
        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.unauthorized, 1);
        assert_eq!(report.ejected, 0);
        assert_eq!(h.ejector.calls(), 0);
        assert_eq!(
            h.enforcement.entry_for_volume(&device.volume_id).map(EnforcementEntry::state),
            Some(DeviceState::Unauthorized)
        );

        drop(guard);
        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.ejected, 1);
        assert_eq!(h.ejector.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_serials_are_tracked_per_volume() {
        let mut h = harness(ScriptedEjector::default());
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let enrolled = usb(&first, "ABC123");
        let clone = usb(&second, "ABC123");
        enroll(&h.authority, &enrolled);
        h.enumerator.set(vec![enrolled.clone(), clone.clone()]);

        let report = h.enforcement.run_cycle().await;
        assert_eq!(report.authorized, 1);
        assert_eq!(report.unauthorized, 1);
        assert_eq!(*h.ejector.calls.lock().unwrap(), vec![clone.volume_id.clone()]);
    }

    #[tokio::test]
    async fn hung_eject_times_out_and_retries() {
        let ejector = ScriptedEjector::default();
        *ejector.hang.lock().unwrap() = Some(Duration::from_millis(400));
        let ejector: Arc<dyn Ejector> = Arc::new(ejector);

        let outcome = eject_with_retry(Arc::clone(&ejector), "/media/usb0".into(), &test_policy()).await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, Err(EjectError::TimedOut(Duration::from_millis(200))));
    }

    #[tokio::test]
    async fn no_retry_when_disabled() {
        let ejector = Arc::new(ScriptedEjector::failing());
        let policy = EnforcementPolicy {
            eject_retries: 0,
            ..test_policy()
        };

        let outcome = eject_with_retry(ejector.clone(), "/media/usb0".into(), &policy).await;
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.is_err());
        assert_eq!(ejector.calls(), 1);
    }

    #[tokio::test]
    async fn run_stops_monitors_on_shutdown() {
        let h = harness(ScriptedEjector::default());
        let dir = TempDir::new().unwrap();
        let device = usb(&dir, "ABC123");
        enroll(&h.authority, &device);
        h.enumerator.set(vec![device.clone()]);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(h.enforcement.run(shutdown.clone()));

        let source = h.source.clone();
        let volume = device.volume_id.clone();
        assert!(wait_for(|| source.is_watching(&volume)).await);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!h.source.is_watching(&device.volume_id));
    }
}
