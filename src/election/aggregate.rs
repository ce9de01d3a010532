//! Sensor Aggregate
//!
//! Exponentially weighted moving average over reported sensor values.
//! Updates use the incremental form `agg + (value - agg) / W`, computed
//! in i32 so the difference cannot overflow, truncating toward zero.
//! The weight is a power of two, validated at config load.

/// Running EWMA of reported sensor values
///
/// Meaningful only while the node is coordinator; reseeded from a fresh
/// local reading on every transition into that role and on each periodic
/// re-query cycle.
#[derive(Debug, Clone, Copy)]
pub struct SensorAggregate {
    value: i16,
    weight: i32,
}

impl SensorAggregate {
    /// Create an aggregate with the given weight divisor
    pub fn new(weight: i32) -> Self {
        debug_assert!(weight > 0 && (weight as u32).is_power_of_two());
        Self { value: 0, weight }
    }

    /// Set the aggregate to a fresh reading
    pub fn seed(&mut self, value: i16) {
        self.value = value;
    }

    /// Fold a reported value into the aggregate, returning the new value
    pub fn update(&mut self, value: i16) -> i16 {
        let agg = self.value as i32;
        let delta = value as i32 - agg;
        self.value = (agg + delta / self.weight) as i16;
        self.value
    }

    /// Current aggregate value
    pub fn value(&self) -> i16 {
        self.value
    }
}
