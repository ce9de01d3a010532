//! Sensor Acquisition
//!
//! The election core needs exactly one thing from a sensor: a signed
//! 16-bit reading on demand. Readings are temperature in centi-degrees
//! Celsius (2150 = 21.50 C).

use rand::Rng;
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// Source of local sensor readings
pub trait SensorSource: Send {
    /// Take a fresh reading
    fn read(&mut self) -> Result<i16>;
}

/// Shared handle to the local sensor
///
/// Both the election machine (aggregate seeding) and the endpoint server
/// (answering query-sensor requests) read the same sensor.
pub type SharedSensor = Arc<Mutex<dyn SensorSource>>;

/// Simulated temperature sensor
///
/// Produces a bounded random walk so repeated readings look like a slowly
/// drifting room temperature.
pub struct SimulatedSensor {
    value: i16,
    min: i16,
    max: i16,
}

impl SimulatedSensor {
    /// Create a sensor drifting around the given starting value
    pub fn new(start: i16, min: i16, max: i16) -> Self {
        Self {
            value: start.clamp(min, max),
            min,
            max,
        }
    }

    /// Share this sensor between the machine and the endpoint server
    pub fn shared(self) -> SharedSensor {
        Arc::new(Mutex::new(self))
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        // 21.50 C start, drifting within 15.00 C..30.00 C
        Self::new(2150, 1500, 3000)
    }
}

impl SensorSource for SimulatedSensor {
    fn read(&mut self) -> Result<i16> {
        let step: i16 = rand::thread_rng().gen_range(-25..=25);
        self.value = self.value.saturating_add(step).clamp(self.min, self.max);
        Ok(self.value)
    }
}
