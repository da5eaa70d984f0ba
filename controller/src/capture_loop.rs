use admute_common::label::Label;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::archive::FrameArchive;
use crate::capture::FrameSource;
use crate::channel::Actuator;
use crate::classifier::Classifier;
use crate::mute::{ControllerStats, MuteController};

/// Drives capture → classify → actuate at a fixed period.
///
/// One cycle finishes before the next starts. The shutdown future is
/// checked while waiting for a tick and while a frame is being captured or
/// classified; a command that is already being written to the device is
/// allowed to complete.
pub struct CaptureLoop<A> {
    source: Box<dyn FrameSource>,
    classifier: Classifier,
    controller: MuteController<A>,
    archive: Option<FrameArchive>,
    period: Duration,
}

impl<A: Actuator> CaptureLoop<A> {
    pub fn new(
        source: Box<dyn FrameSource>,
        classifier: Classifier,
        controller: MuteController<A>,
        archive: Option<FrameArchive>,
        period: Duration,
    ) -> Self {
        Self {
            source,
            classifier,
            controller,
            archive,
            period,
        }
    }

    /// Run until `shutdown` resolves, then leave the device unmuted and
    /// release it.
    pub async fn run<F>(mut self, shutdown: F) -> ControllerStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: u64 = 0;
        let mut skipped: u64 = 0;

        info!(
            period_secs = self.period.as_secs_f64(),
            source = self.source.name(),
            backend = self.classifier.backend_name(),
            "entering capture loop"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let observed = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                observed = self.observe() => observed,
            };

            cycles += 1;
            if cycles % 100 == 0 {
                let stats = self.controller.stats();
                debug!(
                    cycles,
                    skipped,
                    ads = stats.ads,
                    shows = stats.shows,
                    unknowns = stats.unknowns,
                    "cycles processed"
                );
            }
            let Some(label) = observed else {
                skipped += 1;
                continue;
            };

            // Failures are logged by the controller; the next label that asks
            // for the same change retries it.
            if let Err(e) = self.controller.apply(label).await {
                debug!(error = %e, "actuation deferred to a later cycle");
            }
        }

        info!(
            cycles,
            skipped,
            state = %self.controller.state(),
            "capture loop interrupted, shutting down"
        );
        self.controller.shutdown().await
    }

    /// Capture and classify one frame. `None` when no frame was available.
    async fn observe(&mut self) -> Option<Label> {
        let frame = match self.source.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "frame capture failed, skipping cycle");
                return None;
            }
        };

        let label = self.classifier.classify(&frame.jpeg).await;
        info!(seq = frame.seq, bytes = frame.len(), %label, "frame classified");

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.store(&frame, label).await {
                warn!(error = %e, seq = frame.seq, "failed to archive frame");
            }
        }

        Some(label)
    }
}
