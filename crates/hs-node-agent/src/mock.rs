//! Scripted sensor for tests.

use std::collections::VecDeque;

use async_trait::async_trait;

use hs_protocol::Reading;

use crate::sensor::Sensor;

/// Returns queued readings in order, then repeats a fallback.
#[derive(Debug, Default)]
pub struct MockSensor {
    queued: VecDeque<Reading>,
    fallback: Reading,
    reads: usize,
}

impl MockSensor {
    /// Always returns `reading`.
    pub fn constant(reading: Reading) -> Self {
        Self {
            fallback: reading,
            ..Self::default()
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.queued.push_back(reading);
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }
}

#[async_trait]
impl Sensor for MockSensor {
    async fn read(&mut self) -> Reading {
        self.reads += 1;
        self.queued.pop_front().unwrap_or(self.fallback)
    }
}
