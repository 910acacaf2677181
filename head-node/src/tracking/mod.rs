//! Object tracking: target selection, error computation, dead zones and
//! the PD loop that turns detections into head-speed commands.

pub mod controller;
pub mod dead_zone;
pub mod error_signal;
pub mod selector;

use rizmo_common::utils::current_timestamp_secs;
use rizmo_common::{
    Detection, Detections, LocalBus, MaestroCommand, Message, MessagePublisher, SetHeadSpeed, Topic,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::TrackingConfig;
use crate::error::Result;
use controller::PdController;
use dead_zone::DeadZone;
use error_signal::{compute_errors, ErrorGeometry};
use selector::TargetSelector;

pub use error_signal::TrackingErrors;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingUpdate {
    Target(Detection),
    /// Sent once when a tracked target disappears.
    Lost,
}

impl TrackingUpdate {
    pub fn into_message(self) -> Message {
        match self {
            TrackingUpdate::Target(target) => Message::Tracking(Some(target)),
            TrackingUpdate::Lost => Message::Tracking(None),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerOutput {
    pub head_speed: Option<SetHeadSpeed>,
    pub tracking: Option<TrackingUpdate>,
}

/// All mutable state of the tracking loop.
pub struct Tracker {
    selector: TargetSelector,
    controller: PdController,
    geometry: ErrorGeometry,
    x_dead_zone: DeadZone,
    y_dead_zone: DeadZone,
    last_target: Option<Detection>,
    prev_x_error: f64,
    /// Time of the last frame that had a target.
    last_update: Option<f64>,
}

impl Tracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            selector: TargetSelector::new(config.label_priorities.clone(), config.hysteresis()),
            controller: PdController::new(config),
            geometry: ErrorGeometry {
                target_area: config.target_area,
                person_anchor_fraction: config.person_anchor_fraction,
                bottom_margin_px: config.bottom_margin_px,
            },
            x_dead_zone: DeadZone::new(config.max_x_dead_zone, config.dead_zone_growth_secs),
            y_dead_zone: DeadZone::new(config.max_y_dead_zone, config.dead_zone_growth_secs),
            last_target: None,
            prev_x_error: 0.0,
            last_update: None,
        }
    }

    pub fn dead_zones(&self) -> (f64, f64) {
        (self.x_dead_zone.width(), self.y_dead_zone.width())
    }

    /// Run one control cycle for a frame processed at `now` (seconds since
    /// the epoch).
    pub async fn process(&mut self, frame: &Detections, now: f64) -> TrackerOutput {
        let latency = now - frame.timestamp;
        let target = self.selector.select(&frame.objects).await;
        let previous = std::mem::replace(&mut self.last_target, target.clone());

        debug!("latency: {:.3}s, tracking: {:?}", latency, target);

        let Some(target) = target else {
            return TrackerOutput {
                head_speed: None,
                tracking: previous.map(|_| TrackingUpdate::Lost),
            };
        };

        let dt = self.last_update.map(|last| now - last);
        let errors = compute_errors(&target, frame.image_size, &self.geometry);
        debug!("(x, y, z) error: {:.2}, {:.2}, {:.2}", errors.x, errors.y, errors.z);

        let x = match self.x_dead_zone.apply(errors.x, dt) {
            Some(x) => x,
            None => {
                self.prev_x_error = 0.0;
                0.0
            }
        };
        let y = self.y_dead_zone.apply(errors.y, dt).unwrap_or(0.0);

        let filtered = TrackingErrors { x, y, z: errors.z };
        let head_speed = self.controller.command(filtered, self.prev_x_error, dt, latency);

        self.prev_x_error = x;
        self.last_update = Some(now);

        TrackerOutput {
            head_speed: Some(head_speed),
            tracking: Some(TrackingUpdate::Target(target)),
        }
    }
}

/// Follow `objects_detected` and publish head-speed commands and tracking
/// updates. Frames are skipped while nothing listens on `maestro_cmd`.
pub async fn run_tracker(bus: LocalBus, config: TrackingConfig, cancel: CancellationToken) -> Result<()> {
    let mut frames = bus.subscribe(Topic::ObjectsDetected);
    let mut tracker = Tracker::new(&config);
    info!("Tracker started");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            message = frames.recv() => match message {
                Some(Message::ObjectsDetected(frame)) => frame,
                Some(_) => continue,
                None => break,
            },
        };

        if !bus.has_listeners(Topic::MaestroCmd) {
            trace!("No listener on {}, skipping frame", Topic::MaestroCmd);
            continue;
        }

        let output = tracker.process(&frame, current_timestamp_secs()).await;
        if let Some(head_speed) = output.head_speed {
            bus.publish(Message::MaestroCmd(MaestroCommand::SetHeadSpeed(head_speed)))
                .await?;
        }
        if let Some(update) = output.tracking {
            bus.publish(update.into_message()).await?;
        }
    }

    info!("Tracker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rizmo_common::BBox;
    use std::time::Duration;
    use tokio::time::sleep;

    fn frame(timestamp: f64, objects: Vec<Detection>) -> Detections {
        Detections {
            timestamp,
            image_size: (640, 480),
            objects,
        }
    }

    fn cat_at(x: i32) -> Detection {
        Detection::new("cat", 0.9, BBox::new(x, 190, 100, 100))
    }

    #[tokio::test]
    async fn test_lost_is_edge_triggered() {
        let mut tracker = Tracker::new(&TrackingConfig::default());
        let frames = [
            frame(0.0, vec![cat_at(400)]),
            frame(0.1, vec![]),
            frame(0.2, vec![]),
            frame(0.3, vec![]),
        ];

        let mut lost = 0;
        for f in &frames {
            let output = tracker.process(f, f.timestamp + 0.085).await;
            if output.tracking == Some(TrackingUpdate::Lost) {
                lost += 1;
            }
        }
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_nothing_sent_without_ever_tracking() {
        let mut tracker = Tracker::new(&TrackingConfig::default());
        let output = tracker.process(&frame(0.0, vec![]), 0.1).await;
        assert_eq!(output, TrackerOutput::default());
    }

    #[tokio::test]
    async fn test_target_right_of_center_pans_negative() {
        let mut tracker = Tracker::new(&TrackingConfig::default());
        let output = tracker.process(&frame(0.0, vec![cat_at(400)]), 0.085).await;

        let head_speed = output.head_speed.unwrap();
        assert!(head_speed.pan_dps.unwrap() < 0.0);
        assert_eq!(output.tracking, Some(TrackingUpdate::Target(cat_at(400))));
        // First frame: no dt, so no growth yet.
        assert_eq!(tracker.dead_zones(), (0.0, 0.0));
    }

    #[tokio::test]
    async fn test_steady_small_error_settles_to_rest() {
        let mut tracker = Tracker::new(&TrackingConfig::default());
        // cx = 338 -> x error of 0.075 with centered y.
        let target = vec![cat_at(288)];

        let mut last = None;
        for i in 0..80 {
            let t = f64::from(i) * 0.1;
            last = tracker.process(&frame(t, target.clone()), t + 0.085).await.head_speed;
        }

        let (x_zone, y_zone) = tracker.dead_zones();
        assert!((x_zone - 0.2).abs() < 1e-9);
        assert!((y_zone - 0.2).abs() < 1e-9);
        assert_eq!(last.and_then(|cmd| cmd.pan_dps), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_tracker_waits_for_command_listener() {
        let bus = LocalBus::new();
        let cancel = CancellationToken::new();
        let mut tracking = bus.subscribe(Topic::Tracking);
        let task = tokio::spawn(run_tracker(bus.clone(), TrackingConfig::default(), cancel.clone()));

        while !bus.has_listeners(Topic::ObjectsDetected) {
            sleep(Duration::from_millis(1)).await;
        }

        let now = current_timestamp_secs();
        bus.publish(Message::ObjectsDetected(frame(now, vec![cat_at(400)])))
            .await
            .unwrap();
        // Skipped: nobody listens for head commands yet.
        sleep(Duration::from_millis(10)).await;

        let mut commands = bus.subscribe(Topic::MaestroCmd);
        bus.publish(Message::ObjectsDetected(frame(now, vec![cat_at(100)])))
            .await
            .unwrap();

        assert!(matches!(
            commands.recv().await,
            Some(Message::MaestroCmd(MaestroCommand::SetHeadSpeed(_)))
        ));
        assert_eq!(tracking.recv().await, Some(Message::Tracking(Some(cat_at(100)))));
        assert!(tracking.try_recv().is_none());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
