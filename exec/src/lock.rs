// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process-wide advisory lock
//!
//! One file path serializes every mutating operation on this host.  The
//! guard releases on drop, so no exit path can leak the lock.  Waiting is
//! silent for the first second, then announces itself once so an operator
//! knows why nothing is happening.

use camino::{Utf8Path, Utf8PathBuf};
use nix::fcntl::{Flock, FlockArg};
use slog::{debug, Logger};
use std::time::Duration;
use updateadm_common::error::InternalError;
use updateadm_common::progress::ProgressReporter;

/// Held for the duration of a mutating operation; the underlying `flock`
/// is dropped (and thus released) with this value.
pub struct UpdateLock {
    _flock: Flock<std::fs::File>,
    path: Utf8PathBuf,
}

impl UpdateLock {
    /// Acquire the advisory lock at `path`, blocking until it is free.  A
    /// progress message is emitted after one second of waiting.
    pub async fn acquire(
        log: &Logger,
        path: &Utf8Path,
        progress: &dyn ProgressReporter,
    ) -> Result<UpdateLock, InternalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| {
                InternalError::io(
                    format!("creating lock directory {}", parent),
                    source,
                )
            })?;
        }
        let file = open_lock_file(path)?;

        // Fast path: uncontended.
        let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                debug!(log, "acquired lock"; "path" => %path);
                return Ok(UpdateLock {
                    _flock: flock,
                    path: path.to_owned(),
                });
            }
            Err((file, nix::errno::Errno::EWOULDBLOCK)) => file,
            Err((_, errno)) => {
                return Err(InternalError::Lock {
                    path: path.to_string(),
                    source: std::io::Error::from(errno),
                });
            }
        };

        // Contended: block in a worker thread, announcing the wait if it
        // lasts longer than a second.
        debug!(log, "lock is held; waiting"; "path" => %path);
        let mut join = tokio::task::spawn_blocking(move || {
            Flock::lock(file, FlockArg::LockExclusive)
        });
        let flock = tokio::select! {
            result = &mut join => unwrap_join(result)?,
            () = tokio::time::sleep(Duration::from_secs(1)) => {
                progress.message(&format!(
                    "Waiting for lock at {} held by another process",
                    path,
                ));
                unwrap_join(join.await)?
            }
        };
        let flock = flock.map_err(|(_, errno)| InternalError::Lock {
            path: path.to_string(),
            source: std::io::Error::from(errno),
        })?;
        debug!(log, "acquired lock after waiting"; "path" => %path);
        Ok(UpdateLock { _flock: flock, path: path.to_owned() })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn open_lock_file(path: &Utf8Path) -> Result<std::fs::File, InternalError> {
    std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| {
            InternalError::io(format!("opening lock file {}", path), source)
        })
}

fn unwrap_join<T>(
    result: Result<T, tokio::task::JoinError>,
) -> Result<T, InternalError> {
    result.map_err(|join_error| {
        InternalError::UnexpectedState(format!(
            "lock task failed: {}",
            join_error
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use updateadm_common::progress::NullProgress;
    use updateadm_common::test_utils::test_logger;

    #[tokio::test]
    async fn test_lock_excludes_second_acquirer() {
        let log = test_logger("test_lock_excludes_second_acquirer");
        let dir = std::env::temp_dir().join(format!(
            "updateadm-lock-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.join("test.lock"))
            .expect("temp path is utf-8");

        let guard =
            UpdateLock::acquire(&log, &path, &NullProgress).await.unwrap();
        assert_eq!(guard.path(), path);

        // a second acquire waits; it proceeds once the first releases
        let waiter = {
            let log = log.clone();
            let path = path.clone();
            tokio::spawn(async move {
                UpdateLock::acquire(&log, &path, &NullProgress).await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap().unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
