// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use usb_sentinel::authority::{AuthorityService, SharedSecret};
use usb_sentinel::config::DaemonConfig;
use usb_sentinel::enforcement::{Collaborators, EnforcementLoop};
use usb_sentinel::logging;
use usb_sentinel::monitor::{platform_source, ActivityMonitor};
use usb_sentinel::storage::{EnrollmentPause, RedbAuditSink, StoragePaths};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match DaemonConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let secret = match SharedSecret::load(&config.secret_file) {
        Ok(secret) => secret,
        Err(e) => {
            error!(error = %e, "Failed to load shared secret");
            return ExitCode::FAILURE;
        }
    };
    let authority = Arc::new(AuthorityService::new(&secret));

    let paths = StoragePaths::new(&config.data_dir);
    if let Err(e) = std::fs::create_dir_all(paths.root()) {
        error!(path = %paths.root().display(), error = %e, "Failed to create data directory");
        return ExitCode::FAILURE;
    }
    let audit = match RedbAuditSink::open(&paths.audit_db()) {
        Ok(audit) => Arc::new(audit),
        Err(e) => {
            error!(path = %paths.audit_db().display(), error = %e, "Failed to open audit database");
            return ExitCode::FAILURE;
        }
    };
    match audit.count() {
        Ok(records) => info!(records, "Audit trail opened"),
        Err(e) => error!(error = %e, "Failed to read audit trail size"),
    }

    let Some(collaborators) = platform_collaborators(config.notifications) else {
        error!("Removable device enforcement is not supported on this platform");
        return ExitCode::FAILURE;
    };

    let monitor = ActivityMonitor::new(platform_source(), audit);
    let enforcement = EnforcementLoop::new(authority, collaborators, monitor, config.policy.clone())
        .with_pause(EnrollmentPause::new(&paths));

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(enforcement.run(shutdown.clone()));

    info!(
        data_dir = %config.data_dir.display(),
        notifications = config.notifications,
        "USB Sentinel running"
    );

    wait_for_signal().await;
    info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = task.await {
        error!(error = %e, "Enforcement loop ended abnormally");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(target_os = "linux")]
fn platform_collaborators(notifications: bool) -> Option<Collaborators> {
    use usb_sentinel::platform::linux::{CommandEjector, DesktopNotifier, LsblkEnumerator};
    use usb_sentinel::platform::{LogNotifier, Notifier};
    use usb_sentinel::storage::FsTokenStore;

    let notifier: Arc<dyn Notifier> = if notifications {
        Arc::new(DesktopNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    Some(Collaborators {
        enumerator: Arc::new(LsblkEnumerator),
        token_store: Arc::new(FsTokenStore),
        ejector: Arc::new(CommandEjector),
        notifier,
    })
}

#[cfg(not(target_os = "linux"))]
fn platform_collaborators(_notifications: bool) -> Option<Collaborators> {
    None
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
