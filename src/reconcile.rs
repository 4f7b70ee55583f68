//! Mount-free repair of dangling snapshot redirects.
//!
//! A repair cycle is a plain function over the directory; [`Reconciler::run`]
//! only decides when cycles happen. Another trigger (for example a change
//! watcher) can drive [`Reconciler::run_cycle`] without touching it.

use crate::config::require_dir;
use crate::error::Result;
use crate::index::SnapshotIndex;
use crate::link::replace_redirect;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub fixed: usize,
    pub failed: usize,
    /// No real snapshot existed, so nothing was examined.
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    index: SnapshotIndex,
}

impl Reconciler {
    pub fn new(index: SnapshotIndex) -> Self {
        Self { index }
    }

    /// Repoints every broken redirect at the current latest real snapshot.
    ///
    /// Individual repair failures are counted, not returned; an error means
    /// the directory itself could not be scanned.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let Some(latest) = self.index.latest() else {
            tracing::warn!(dir = %self.index.dir().display(), "no valid snapshots found");
            report.skipped = true;
            return Ok(report);
        };

        for entry in self.index.broken_redirects()? {
            tracing::info!(
                "fixing broken symlink {} -> {}",
                entry.name.to_string_lossy(),
                latest.name.to_string_lossy()
            );
            match replace_redirect(self.index.dir(), &entry.name, &latest.name) {
                Ok(_) => report.fixed += 1,
                Err(err) => {
                    tracing::error!("failed to repair {}: {err}", entry.name.to_string_lossy());
                    report.failed += 1;
                }
            }
        }

        if report.fixed > 0 {
            tracing::info!("fixed {} broken symlinks", report.fixed);
        }
        Ok(report)
    }

    /// Runs a cycle immediately and then once per `interval` until `shutdown`
    /// resolves. Only a missing directory at startup is fatal.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) -> Result<()> {
        require_dir(self.index.dir())?;
        tracing::info!(
            dir = %self.index.dir().display(),
            interval_secs = interval.as_secs_f64(),
            "starting snapshot monitor"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("snapshot monitor stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle() {
                        tracing::error!("error in monitoring cycle: {err}");
                    }
                }
            }
        }
    }
}
