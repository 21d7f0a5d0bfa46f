//! Periodic telemetry publisher.
//!
//! Fires when `publish_interval_ms` of monotonic time has passed since the
//! last fire, whatever the connection state. A fire always consumes the
//! interval; if the session is down the reading is dropped, never queued.

use hs_mqtt_channel::{Channel, PublishError};
use hs_protocol::{ShadowPayload, topics};

use crate::sensor::Sensor;

/// What a fired tick did with its reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Handed to the session; `bytes` is the serialized payload length.
    Published { bytes: usize },
    /// Session not ready, reading dropped.
    Dropped,
    /// Publish attempted and failed.
    Failed(PublishError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub fired: u64,
    pub published: u64,
    pub dropped: u64,
    pub failed: u64,
}

pub struct TelemetryScheduler {
    interval_ms: u64,
    last_fire_ms: u64,
    topic: String,
    stats: SchedulerStats,
}

impl TelemetryScheduler {
    /// The update topic is derived from `thing_name` once, here.
    ///
    /// `last_fire_ms` starts at zero, so the first fire happens one full
    /// interval after the clock origin.
    pub fn new(thing_name: &str, interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fire_ms: 0,
            topic: topics::shadow_update(thing_name),
            stats: SchedulerStats::default(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_fire_ms(&self) -> u64 {
        self.last_fire_ms
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_fire_ms) >= self.interval_ms
    }

    /// Fire if due. Returns `None` when the interval has not elapsed.
    pub async fn tick(
        &mut self,
        now_ms: u64,
        sensor: &mut dyn Sensor,
        channel: &mut dyn Channel,
    ) -> Option<TickOutcome> {
        if !self.is_due(now_ms) {
            return None;
        }
        self.last_fire_ms = now_ms;
        self.stats.fired += 1;

        let reading = sensor.read().await;
        if reading.is_empty() {
            tracing::warn!("sensor returned no values; publishing empty reported state");
        }
        let payload = ShadowPayload::from_reading(&reading);

        if !channel.is_ready() {
            self.stats.dropped += 1;
            tracing::info!(topic = %self.topic, "session not ready, reading dropped");
            return Some(TickOutcome::Dropped);
        }

        let bytes = match payload.to_json() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.failed += 1;
                tracing::error!(error = %e, "failed to serialize shadow payload");
                return Some(TickOutcome::Failed(PublishError::Encode(e.to_string())));
            }
        };
        if let Ok(pretty) = payload.to_json_pretty() {
            tracing::debug!(topic = %self.topic, "publishing:\n{pretty}");
        }

        match channel.publish(&self.topic, &bytes).await {
            Ok(()) => {
                self.stats.published += 1;
                tracing::info!(
                    topic = %self.topic,
                    humidity = ?reading.humidity,
                    temperature = ?reading.temperature,
                    "telemetry published"
                );
                Some(TickOutcome::Published { bytes: bytes.len() })
            }
            Err(PublishError::NotConnected) => {
                self.stats.dropped += 1;
                tracing::info!(topic = %self.topic, "session not ready, reading dropped");
                Some(TickOutcome::Dropped)
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!(topic = %self.topic, error = %e, "failed to publish telemetry");
                Some(TickOutcome::Failed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSensor;
    use hs_mqtt_channel::MockChannel;
    use hs_protocol::Reading;

    const INTERVAL: u64 = 60_000;

    fn scheduler() -> TelemetryScheduler {
        TelemetryScheduler::new("humidity-temp-2", INTERVAL)
    }

    #[test]
    fn topic_is_derived_from_thing_name() {
        assert_eq!(
            scheduler().topic(),
            "$aws/things/humidity-temp-2/shadow/update"
        );
    }

    #[tokio::test]
    async fn fires_exactly_at_interval() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::new(55.2, 21.7));
        let mut channel = MockChannel::new();

        assert_eq!(s.tick(59_999, &mut sensor, &mut channel).await, None);
        assert!(s.tick(60_000, &mut sensor, &mut channel).await.is_some());
        assert_eq!(s.last_fire_ms(), 60_000);
        assert_eq!(sensor.read_count(), 1);
    }

    #[tokio::test]
    async fn fires_at_most_once_per_interval() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::new(50.0, 20.0));
        let mut channel = MockChannel::new();

        let mut fires = 0;
        // Poll every 7ms over ten minutes.
        for now in (0..=600_000).step_by(7) {
            if s.tick(now, &mut sensor, &mut channel).await.is_some() {
                fires += 1;
            }
        }
        assert_eq!(fires, 9);
        assert_eq!(channel.published().len(), 9);
    }

    #[tokio::test]
    async fn late_tick_does_not_catch_up() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::new(50.0, 20.0));
        let mut channel = MockChannel::new();

        // Loop stalled for three intervals: one fire, not three.
        assert!(s.tick(200_000, &mut sensor, &mut channel).await.is_some());
        assert_eq!(s.tick(200_001, &mut sensor, &mut channel).await, None);
        assert_eq!(s.tick(259_999, &mut sensor, &mut channel).await, None);
        assert!(s.tick(260_000, &mut sensor, &mut channel).await.is_some());
    }

    #[tokio::test]
    async fn publishes_shadow_document() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::new(55.2, 21.7));
        let mut channel = MockChannel::new();

        let outcome = s.tick(INTERVAL, &mut sensor, &mut channel).await;
        let msg = channel.last_published().unwrap();
        assert_eq!(msg.topic, "$aws/things/humidity-temp-2/shadow/update");
        assert_eq!(
            msg.payload,
            br#"{"state":{"reported":{"humidity":55.2,"temperature":21.7}}}"#.to_vec()
        );
        assert_eq!(
            outcome,
            Some(TickOutcome::Published {
                bytes: msg.payload.len()
            })
        );
    }

    #[tokio::test]
    async fn each_fire_takes_a_fresh_reading() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::new(55.2, 21.7));
        sensor.push(Reading::new(40.0, 18.0));
        sensor.push(Reading::from_raw(f64::NAN, 19.5));
        let mut channel = MockChannel::new();

        for fire in 1..=3 {
            assert!(s.tick(fire * INTERVAL, &mut sensor, &mut channel).await.is_some());
        }
        let payloads: Vec<_> = channel.published().iter().map(|m| m.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                br#"{"state":{"reported":{"humidity":40.0,"temperature":18.0}}}"#.to_vec(),
                br#"{"state":{"reported":{"temperature":19.5}}}"#.to_vec(),
                br#"{"state":{"reported":{"humidity":55.2,"temperature":21.7}}}"#.to_vec(),
            ]
        );
        assert_eq!(sensor.read_count(), 3);
    }

    #[tokio::test]
    async fn empty_reading_still_consumes_tick_and_publishes() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::EMPTY);
        let mut channel = MockChannel::new();

        assert!(s.tick(INTERVAL, &mut sensor, &mut channel).await.is_some());
        assert_eq!(s.last_fire_ms(), INTERVAL);
        assert_eq!(
            channel.last_published().unwrap().payload,
            br#"{"state":{"reported":{}}}"#.to_vec()
        );
    }

    #[tokio::test]
    async fn not_ready_drops_reading_without_publish() {
        let mut s = scheduler();
        let mut sensor = MockSensor::constant(Reading::new(40.0, 18.0));
        let mut channel = MockChannel::new();
        channel.set_ready(false);

        let outcome = s.tick(INTERVAL, &mut sensor, &mut channel).await;
        assert_eq!(outcome, Some(TickOutcome::Dropped));
        assert!(channel.published().is_empty());
        assert_eq!(channel.rejected(), 0);
        assert_eq!(s.stats().dropped, 1);

        // The tick was consumed: nothing retried before the next interval.
        channel.set_ready(true);
        assert_eq!(s.tick(INTERVAL + 1, &mut sensor, &mut channel).await, None);
        assert!(s.tick(2 * INTERVAL, &mut sensor, &mut channel).await.is_some());
        assert_eq!(channel.published().len(), 1);
    }
}
