//! Synthetic reading generation for simulated nodes.
//!
//! A reading vector is the current Unix timestamp followed by one uniformly
//! distributed value per parameter spec, in spec order.

use std::fmt;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Named numeric range used to synthesize one value of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }
}

/// One generated reading: `[epoch_secs, v1, v2, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingVector {
    /// Unix epoch timestamp in whole seconds
    pub timestamp: i64,

    /// One value per parameter spec, in spec order
    pub values: Vec<f64>,
}

impl ReadingVector {
    /// Number of elements including the leading timestamp.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.values.len() + 1
    }
}

impl fmt::Display for ReadingVector {
    /// Renders as a bracketed list, e.g. `[1700000000, 12.5, 40.0]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.timestamp)?;
        for value in &self.values {
            // Debug keeps the fractional part on whole numbers (40.0, not 40)
            write!(f, ", {:?}", value)?;
        }
        write!(f, "]")
    }
}

/// Produces reading vectors from parameter specs.
///
/// Stateless apart from the wall clock and the thread-local random source, so a
/// single instance can be shared freely between job loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadingGenerator;

impl ReadingGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate a reading stamped with the current time.
    pub fn generate(&self, specs: &[ParamSpec]) -> ReadingVector {
        self.generate_at(Utc::now().timestamp(), specs)
    }

    /// Generate a reading with an explicit timestamp.
    pub fn generate_at(&self, timestamp: i64, specs: &[ParamSpec]) -> ReadingVector {
        let mut rng = rand::thread_rng();
        let values = specs
            .iter()
            .map(|spec| sample(&mut rng, spec))
            .collect();

        ReadingVector { timestamp, values }
    }
}

fn sample(rng: &mut impl Rng, spec: &ParamSpec) -> f64 {
    if spec.min >= spec.max {
        return spec.min;
    }
    if (spec.max - spec.min).is_finite() {
        return rng.gen_range(spec.min..=spec.max);
    }
    // Span overflows f64; interpolate between the bounds instead
    let u: f64 = rng.gen_range(0.0..=1.0);
    (spec.min * (1.0 - u) + spec.max * u)
        .max(spec.min)
        .min(spec.max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_spec_yields_two_elements_in_range() {
        let generator = ReadingGenerator::new();
        let specs = vec![ParamSpec::new("pm10", 10.0, 60.0)];

        for _ in 0..1000 {
            let reading = generator.generate(&specs);
            assert_eq!(reading.len(), 2);
            assert_eq!(reading.values.len(), 1);
            assert!(reading.values[0] >= 10.0 && reading.values[0] <= 60.0);
        }
    }

    #[test]
    fn test_timestamp_is_current_epoch() {
        let before = Utc::now().timestamp();
        let reading = ReadingGenerator::new().generate(&[]);
        let after = Utc::now().timestamp();

        assert!(reading.timestamp >= before && reading.timestamp <= after);
        assert!(reading.values.is_empty());
        assert_eq!(reading.len(), 1);
    }

    #[test]
    fn test_values_follow_spec_order() {
        let specs = vec![
            ParamSpec::new("low", 0.0, 1.0),
            ParamSpec::new("high", 1000.0, 1001.0),
            ParamSpec::new("mid", 50.0, 51.0),
        ];
        let reading = ReadingGenerator::new().generate(&specs);

        assert!(reading.values[0] <= 1.0);
        assert!(reading.values[1] >= 1000.0);
        assert!(reading.values[2] >= 50.0 && reading.values[2] <= 51.0);
    }

    #[test]
    fn test_degenerate_range_returns_bound() {
        let specs = vec![ParamSpec::new("fixed", 7.5, 7.5)];
        let reading = ReadingGenerator::new().generate(&specs);
        assert_eq!(reading.values, vec![7.5]);
    }

    #[test]
    fn test_span_wider_than_f64_stays_in_bounds() {
        let specs = vec![
            ParamSpec::new("wide", -1e308, 1e308),
            ParamSpec::new("extreme", f64::MIN, f64::MAX),
        ];
        let generator = ReadingGenerator::new();

        for _ in 0..1000 {
            let reading = generator.generate(&specs);
            assert!(reading.values[0].is_finite());
            assert!(reading.values[0] >= -1e308 && reading.values[0] <= 1e308);
            assert!(reading.values[1].is_finite());
        }
    }

    #[test]
    fn test_display_format() {
        let reading = ReadingVector {
            timestamp: 1_700_000_000,
            values: vec![12.5, 40.0],
        };
        assert_eq!(reading.to_string(), "[1700000000, 12.5, 40.0]");

        let empty = ReadingVector {
            timestamp: 1,
            values: vec![],
        };
        assert_eq!(empty.to_string(), "[1]");
    }
}
