// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recursive inotify event source.
//!
//! inotify watches one directory at a time, so every directory under the
//! device root gets its own watch, and directories created later are added as
//! their `IN_CREATE` arrives. The descriptor is non-blocking and polled from a
//! dedicated thread so cancellation is seen within one idle interval.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{FileEventSource, FsEvent, EVENT_BUFFER};
use crate::error::WatchError;
use crate::models::AuditAction;

const DEFAULT_IDLE: Duration = Duration::from_millis(200);

/// inotify-backed [`FileEventSource`].
#[derive(Debug, Clone)]
pub struct InotifySource {
    idle: Duration,
}

impl Default for InotifySource {
    fn default() -> Self {
        Self { idle: DEFAULT_IDLE }
    }
}

impl InotifySource {
    pub fn with_idle(idle: Duration) -> Self {
        Self { idle }
    }
}

fn watch_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_CLOSE_WRITE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO
}

impl FileEventSource for InotifySource {
    fn watch(
        &self,
        root: &Path,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<FsEvent>, WatchError> {
        let setup_err = |reason: String| WatchError::Setup {
            path: root.to_path_buf(),
            reason,
        };

        let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)
            .map_err(|e| setup_err(format!("inotify init failed: {e}")))?;

        let mut dirs = HashMap::new();
        let root_wd = inotify
            .add_watch(root, watch_mask())
            .map_err(|e| setup_err(format!("inotify add watch failed: {e}")))?;
        dirs.insert(root_wd, root.to_path_buf());
        add_subtree(&inotify, root, &mut dirs);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let idle = self.idle;
        let root_name = root.to_path_buf();
        std::thread::Builder::new()
            .name("usb-watch".to_string())
            .spawn(move || pump(inotify, dirs, tx, cancel, idle, root_name))
            .map_err(|e| setup_err(format!("failed to spawn watch thread: {e}")))?;

        Ok(rx)
    }
}

/// Watch every directory strictly below `dir`.
fn add_subtree(inotify: &Inotify, dir: &Path, dirs: &mut HashMap<WatchDescriptor, PathBuf>) {
    let subdirs = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir());

    for entry in subdirs {
        match inotify.add_watch(entry.path(), watch_mask()) {
            Ok(wd) => {
                dirs.insert(wd, entry.path().to_path_buf());
            }
            Err(e) => tracing::warn!(
                dir = %entry.path().display(),
                error = %e,
                "Failed to watch directory"
            ),
        }
    }
}

fn pump(
    inotify: Inotify,
    mut dirs: HashMap<WatchDescriptor, PathBuf>,
    tx: mpsc::Sender<FsEvent>,
    cancel: CancellationToken,
    idle: Duration,
    root: PathBuf,
) {
    while !cancel.is_cancelled() {
        let events = match inotify.read_events() {
            Ok(events) => events,
            Err(Errno::EAGAIN) => {
                std::thread::sleep(idle);
                continue;
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "inotify read failed");
                return;
            }
        };

        for event in events {
            if let Some(fs_event) = translate(&inotify, &mut dirs, event, &root) {
                if tx.blocking_send(fs_event).is_err() {
                    // Monitor is gone.
                    return;
                }
            }
        }
    }
}

fn translate(
    inotify: &Inotify,
    dirs: &mut HashMap<WatchDescriptor, PathBuf>,
    event: InotifyEvent,
    root: &Path,
) -> Option<FsEvent> {
    let mask = event.mask;

    if mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
        tracing::warn!(root = %root.display(), "inotify queue overflow (events may be lost)");
        return None;
    }
    if mask.contains(AddWatchFlags::IN_IGNORED) {
        dirs.remove(&event.wd);
        return None;
    }

    let path = dirs.get(&event.wd)?.join(event.name?);

    if mask.contains(AddWatchFlags::IN_ISDIR) {
        if mask.intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO) {
            if let Ok(wd) = inotify.add_watch(path.as_path(), watch_mask()) {
                dirs.insert(wd, path.clone());
            }
            add_subtree(inotify, &path, dirs);
        }
        // Directory events are not audited.
        return None;
    }

    let action = if mask.intersects(AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO) {
        AuditAction::Created
    } else if mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
        AuditAction::Modified
    } else if mask.intersects(AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM) {
        AuditAction::Deleted
    } else {
        return None;
    };

    Some(FsEvent { path, action })
}
