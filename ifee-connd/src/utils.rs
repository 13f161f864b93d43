use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::{process::Command, time};
use tokio_util::sync::CancellationToken;

pub async fn run_cmd(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd).args(args).output().await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let err = String::from_utf8_lossy(&output.stderr);
        let args = args.join(" ");
        Err(eyre!("Failed to run {cmd} {args}. Error {err}"))
    }
}

/// Shared handle over a value guarded by a single lock, so readers always
/// observe a fully written value.
pub struct State<T> {
    state: Arc<RwLock<T>>,
}

impl<T> State<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn read<F, K>(&self, f: F) -> Result<K, PoisonError<RwLockReadGuard<'_, T>>>
    where
        F: FnOnce(&T) -> K,
    {
        let value = self.state.read()?;
        Ok(f(&value))
    }

    pub fn write<F, K>(&self, f: F) -> Result<K, PoisonError<RwLockWriteGuard<'_, T>>>
    where
        F: FnOnce(&mut T) -> K,
    {
        let mut value = self.state.write()?;
        Ok(f(&mut value))
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

/// Sleeps for `dur` unless `cancel` fires first.
/// Returns `false` if the sleep was interrupted by cancellation.
pub async fn sleep_or_cancel(cancel: &CancellationToken, dur: std::time::Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = time::sleep(dur) => true,
    }
}
