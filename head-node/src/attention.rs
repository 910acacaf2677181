//! Idle behavior: look around when nothing is tracked and the camera can
//! see.

use rand::Rng;
use rizmo_common::utils::format_duration;
use rizmo_common::{
    DelayedTask, Detection, LocalBus, MaestroCommand, Message, MessagePublisher, ServoTarget,
    SetServoPosition, Topic,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AttentionConfig;
use crate::error::Result;

/// A random look within the configured ranges, lean held level.
pub fn random_look(config: &AttentionConfig, rng: &mut impl Rng) -> SetServoPosition {
    SetServoPosition {
        pan_deg: Some(ServoTarget::Degrees(
            rng.gen_range(config.pan_min_deg..=config.pan_max_deg),
        )),
        tilt0_deg: Some(ServoTarget::Degrees(0.0)),
        tilt1_deg: Some(ServoTarget::Degrees(
            rng.gen_range(config.tilt_min_deg..=config.tilt_max_deg),
        )),
        speed_dps: Some(config.explore_speed_dps),
    }
}

fn neutral(speed_dps: f64) -> SetServoPosition {
    SetServoPosition {
        pan_deg: Some(ServoTarget::Degrees(0.0)),
        tilt0_deg: Some(ServoTarget::Degrees(0.0)),
        tilt1_deg: Some(ServoTarget::Degrees(0.0)),
        speed_dps: Some(speed_dps),
    }
}

/// Looks once, then again after 1 s, 2 s, 4 s, ... until cancelled.
async fn explore(config: AttentionConfig, publisher: Arc<dyn MessagePublisher>) {
    let mut delay = config.initial_delay();
    let max_delay = config.max_delay();

    loop {
        let look = random_look(&config, &mut rand::thread_rng());
        debug!("Exploring: {:?}", look);
        if let Err(e) = publisher
            .publish(Message::MaestroCmd(MaestroCommand::SetServoPosition(look)))
            .await
        {
            warn!("Failed to send look command: {}", e);
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
}

pub struct Explorer {
    publisher: Arc<dyn MessagePublisher>,
    covered_speed_dps: f64,
    camera_is_covered: bool,
    target: Option<String>,
    exploration: DelayedTask,
}

impl Explorer {
    pub fn new(config: AttentionConfig, publisher: Arc<dyn MessagePublisher>) -> Self {
        let covered_speed_dps = config.covered_speed_dps;
        let start_delay = config.start_delay();
        let explore_publisher = publisher.clone();
        let exploration = DelayedTask::new(start_delay, move || {
            explore(config.clone(), explore_publisher.clone())
        });

        Self {
            publisher,
            covered_speed_dps,
            camera_is_covered: false,
            target: None,
            exploration,
        }
    }

    fn is_idle(&self) -> bool {
        !self.camera_is_covered && self.target.is_none()
    }

    pub fn is_exploring(&self) -> bool {
        self.exploration.is_pending()
    }

    pub fn start(&mut self) {
        if self.is_idle() {
            debug!("First look in {}", format_duration(self.exploration.delay()));
            self.exploration.schedule();
        }
    }

    pub async fn stop(&mut self) {
        self.exploration.cancel().await;
    }

    pub async fn on_tracking(&mut self, target: Option<&Detection>) {
        let label = target.map(|t| t.label.clone());
        if label != self.target {
            info!("Target: {}", label.as_deref().unwrap_or("none"));
        }
        self.target = label;

        let idle = self.is_idle();
        self.exploration.set(idle).await;
    }

    pub async fn on_camera_covered(&mut self, covered: bool) -> Result<()> {
        if covered != self.camera_is_covered {
            info!("Camera covered: {}", covered);
        }
        self.camera_is_covered = covered;

        let idle = self.is_idle();
        self.exploration.set(idle).await;

        if covered {
            let command = MaestroCommand::SetServoPosition(neutral(self.covered_speed_dps));
            self.publisher.publish(Message::MaestroCmd(command)).await?;
        }
        Ok(())
    }
}

pub async fn run_explorer(bus: LocalBus, config: AttentionConfig, cancel: CancellationToken) -> Result<()> {
    let mut tracking = bus.subscribe(Topic::Tracking);
    let mut covered = bus.subscribe(Topic::CameraCovered);
    let mut explorer = Explorer::new(config, Arc::new(bus.clone()));
    explorer.start();
    info!("Explorer started");

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            message = tracking.recv() => match message {
                Some(Message::Tracking(target)) => explorer.on_tracking(target.as_ref()).await,
                Some(_) => {}
                None => break Ok(()),
            },
            message = covered.recv() => match message {
                Some(Message::CameraCovered(is_covered)) => {
                    if let Err(e) = explorer.on_camera_covered(is_covered).await {
                        break Err(e);
                    }
                }
                Some(_) => {}
                None => break Ok(()),
            },
        }
    };

    explorer.stop().await;
    info!("Explorer stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rizmo_common::{BBox, BusError};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(Instant, Message)>>,
    }

    impl RecordingPublisher {
        fn times(&self, since: Instant) -> Vec<Duration> {
            self.sent.lock().unwrap().iter().map(|(at, _)| at.saturating_duration_since(since)).collect()
        }

        fn messages(&self) -> Vec<Message> {
            self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl MessagePublisher for RecordingPublisher {
        async fn publish(&self, message: Message) -> std::result::Result<usize, BusError> {
            self.sent.lock().unwrap().push((Instant::now(), message));
            Ok(1)
        }

        fn has_listeners(&self, _topic: Topic) -> bool {
            true
        }
    }

    fn explorer(config: AttentionConfig) -> (Explorer, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        (Explorer::new(config, publisher.clone()), publisher)
    }

    fn assert_times(actual: &[Duration], expected_secs: &[f64]) {
        assert_eq!(actual.len(), expected_secs.len(), "{:?}", actual);
        for (at, expected) in actual.iter().zip(expected_secs) {
            assert!((at.as_secs_f64() - expected).abs() < 0.01, "{:?}", actual);
        }
    }

    fn cat() -> Detection {
        Detection::new("cat", 0.9, BBox::new(0, 0, 10, 10))
    }

    #[test]
    fn test_random_look_within_ranges() {
        let config = AttentionConfig::default();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let look = random_look(&config, &mut rng);
            let Some(ServoTarget::Degrees(pan)) = look.pan_deg else { panic!() };
            let Some(ServoTarget::Degrees(tilt)) = look.tilt1_deg else { panic!() };
            assert!((-120.0..=120.0).contains(&pan));
            assert!((0.0..=45.0).contains(&tilt));
            assert_eq!(look.tilt0_deg, Some(ServoTarget::Degrees(0.0)));
            assert_eq!(look.speed_dps, Some(15.0));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles() {
        let (mut explorer, publisher) = explorer(AttentionConfig::default());
        let start = Instant::now();
        explorer.start();

        sleep(Duration::from_millis(12_500)).await;
        assert_times(&publisher.times(start), &[5.0, 6.0, 8.0, 12.0]);
        assert!(explorer.is_exploring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let config = AttentionConfig {
            max_delay_secs: 3.0,
            ..Default::default()
        };
        let (mut explorer, publisher) = explorer(config);
        let start = Instant::now();
        explorer.start();

        sleep(Duration::from_millis(14_500)).await;
        assert_times(&publisher.times(start), &[5.0, 6.0, 8.0, 11.0, 14.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_cancels_before_first_look() {
        let (mut explorer, publisher) = explorer(AttentionConfig::default());
        explorer.start();
        explorer.on_tracking(Some(&cat())).await;
        assert!(!explorer.is_exploring());

        sleep(Duration::from_secs(120)).await;
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_target_restarts_with_fresh_backoff() {
        let (mut explorer, publisher) = explorer(AttentionConfig::default());
        explorer.start();
        sleep(Duration::from_millis(8_500)).await;
        assert_eq!(publisher.messages().len(), 3);

        explorer.on_tracking(Some(&cat())).await;
        sleep(Duration::from_secs(30)).await;
        assert_eq!(publisher.messages().len(), 3);

        let restart = Instant::now();
        explorer.on_tracking(None).await;
        sleep(Duration::from_millis(6_500)).await;
        let times = publisher.times(restart);
        assert_times(&times[3..], &[5.0, 6.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_covering_camera_centers_and_pauses() {
        let (mut explorer, publisher) = explorer(AttentionConfig::default());
        explorer.start();
        explorer.on_camera_covered(true).await.unwrap();
        assert!(!explorer.is_exploring());

        sleep(Duration::from_secs(60)).await;
        assert_eq!(
            publisher.messages(),
            vec![Message::MaestroCmd(MaestroCommand::SetServoPosition(neutral(30.0)))]
        );

        explorer.on_camera_covered(false).await.unwrap();
        assert!(explorer.is_exploring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncovering_with_target_stays_idle() {
        let (mut explorer, _publisher) = explorer(AttentionConfig::default());
        explorer.on_tracking(Some(&cat())).await;
        explorer.on_camera_covered(true).await.unwrap();
        explorer.on_camera_covered(false).await.unwrap();
        assert!(!explorer.is_exploring());
    }
}
