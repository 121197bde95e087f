use std::collections::VecDeque;

use crate::reading::SensorReading;

pub const DEFAULT_BUFFER_SIZE: usize = 6;

/// A fixed-size window of the most recent readings.
/// Attached to each packet as context only, it never feeds the energy math.
#[derive(Debug, Clone)]
pub struct ReadingBuffer {
    readings: VecDeque<SensorReading>,
    capacity: usize,
}

impl ReadingBuffer {
    /// Creates an empty buffer holding at most `capacity` readings (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a reading, evicting the oldest one once the window is full.
    pub fn push(&mut self, reading: SensorReading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    /// Copies the window out, oldest first.
    pub fn snapshot(&self) -> Vec<SensorReading> {
        self.readings.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
