//! Physical units and unit-tagged quantities
//!
//! Every `Unit` belongs to exactly one `UnitFamily`. Conversion is only
//! defined within a family and is derived from a per-unit affine map onto the
//! family's base unit, so inverse and composite conversions fall out
//! algebraically instead of being transcribed pair by pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physical dimension a unit measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitFamily {
    Temperature,
    Distance,
    Velocity,
    Acceleration,
    AngularVelocity,
    AngularDistance,
    Pressure,
    SoundIntensity,
    MagneticField,
    LightIntensity,
    Frequency,
    Time,
    Percentage,
    NotSpecified,
}

/// Unit of a numeric value reported or accepted by a device property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Meter,
    Centimeter,
    Millimeter,
    MeterPerSecond,
    MeterPerSecondSquared,
    RadianPerSecond,
    DegreePerSecond,
    Radian,
    Degree,
    Pascal,
    Hectopascal,
    Decibel,
    Microtesla,
    Lux,
    Hertz,
    Bpm,
    Second,
    Millisecond,
    Percent,
    NotSpecified,
}

/// Affine map from a unit onto its family base: `base = value * scale + offset`
struct AffineMap {
    scale: f64,
    offset: f64,
}

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

impl Unit {
    /// The family this unit belongs to (exhaustive by construction)
    pub fn family(self) -> UnitFamily {
        match self {
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin => UnitFamily::Temperature,
            Unit::Meter | Unit::Centimeter | Unit::Millimeter => UnitFamily::Distance,
            Unit::MeterPerSecond => UnitFamily::Velocity,
            Unit::MeterPerSecondSquared => UnitFamily::Acceleration,
            Unit::RadianPerSecond | Unit::DegreePerSecond => UnitFamily::AngularVelocity,
            Unit::Radian | Unit::Degree => UnitFamily::AngularDistance,
            Unit::Pascal | Unit::Hectopascal => UnitFamily::Pressure,
            Unit::Decibel => UnitFamily::SoundIntensity,
            Unit::Microtesla => UnitFamily::MagneticField,
            Unit::Lux => UnitFamily::LightIntensity,
            Unit::Hertz | Unit::Bpm => UnitFamily::Frequency,
            Unit::Second | Unit::Millisecond => UnitFamily::Time,
            Unit::Percent => UnitFamily::Percentage,
            Unit::NotSpecified => UnitFamily::NotSpecified,
        }
    }

    /// Display symbol used by catalogs and diagnostics
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Celsius => "\u{00b0}C",
            Unit::Fahrenheit => "\u{00b0}F",
            Unit::Kelvin => "K",
            Unit::Meter => "m",
            Unit::Centimeter => "cm",
            Unit::Millimeter => "mm",
            Unit::MeterPerSecond => "m/s",
            Unit::MeterPerSecondSquared => "m/s\u{00b2}",
            Unit::RadianPerSecond => "rad/s",
            Unit::DegreePerSecond => "\u{00b0}/s",
            Unit::Radian => "rad",
            Unit::Degree => "\u{00b0}",
            Unit::Pascal => "Pa",
            Unit::Hectopascal => "hPa",
            Unit::Decibel => "dB",
            Unit::Microtesla => "\u{00b5}T",
            Unit::Lux => "lux",
            Unit::Hertz => "Hz",
            Unit::Bpm => "BPM",
            Unit::Second => "s",
            Unit::Millisecond => "ms",
            Unit::Percent => "%",
            Unit::NotSpecified => "",
        }
    }

    /// Map onto the family base unit.
    ///
    /// Base units: Celsius, meter, rad/s, radian, pascal, hertz, second.
    /// Single-unit families map with identity.
    fn to_base(self) -> AffineMap {
        let (scale, offset) = match self {
            Unit::Celsius => (1.0, 0.0),
            Unit::Fahrenheit => (1.0 / 1.8, -32.0 / 1.8),
            Unit::Kelvin => (1.0, -273.15),
            Unit::Meter => (1.0, 0.0),
            Unit::Centimeter => (0.01, 0.0),
            Unit::Millimeter => (0.001, 0.0),
            Unit::RadianPerSecond => (1.0, 0.0),
            Unit::DegreePerSecond => (DEG_TO_RAD, 0.0),
            Unit::Radian => (1.0, 0.0),
            Unit::Degree => (DEG_TO_RAD, 0.0),
            Unit::Pascal => (1.0, 0.0),
            Unit::Hectopascal => (100.0, 0.0),
            Unit::Hertz => (1.0, 0.0),
            Unit::Bpm => (1.0 / 60.0, 0.0),
            Unit::Second => (1.0, 0.0),
            Unit::Millisecond => (0.001, 0.0),
            Unit::MeterPerSecond
            | Unit::MeterPerSecondSquared
            | Unit::Decibel
            | Unit::Microtesla
            | Unit::Lux
            | Unit::Percent
            | Unit::NotSpecified => (1.0, 0.0),
        };
        AffineMap { scale, offset }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unit conversion failures
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnitError {
    #[error("no conversion from {from:?} ({from_family:?}) to {to:?} ({to_family:?})")]
    UnsupportedConversion {
        from: Unit,
        from_family: UnitFamily,
        to: Unit,
        to_family: UnitFamily,
    },
}

/// An immutable numeric value tagged with its unit.
///
/// Equality requires equal unit; `1.0 m != 100.0 cm` without an explicit
/// conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Bare number with no declared unit
    pub fn unitless(value: f64) -> Self {
        Self {
            value,
            unit: Unit::NotSpecified,
        }
    }

    /// Convert to another unit of the same family.
    ///
    /// Routes through the family base unit: `to = (value * s1 + o1 - o2) / s2`
    /// where `(s1, o1)` and `(s2, o2)` are the affine maps of the source and
    /// destination units. Cross-family conversion is an error, never a guess.
    pub fn convert_to(self, to: Unit) -> Result<Quantity, UnitError> {
        if self.unit == to {
            return Ok(self);
        }
        if self.unit.family() != to.family() {
            return Err(UnitError::UnsupportedConversion {
                from: self.unit,
                from_family: self.unit.family(),
                to,
                to_family: to.family(),
            });
        }
        let src = self.unit.to_base();
        let dst = to.to_base();
        let base = self.value * src.scale + src.offset;
        Ok(Quantity {
            value: (base - dst.offset) / dst.scale,
            unit: to,
        })
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unit == Unit::NotSpecified {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < TOLERANCE, "expected {b}, got {a}");
    }

    #[test]
    fn celsius_to_fahrenheit_freezing_point() {
        let q = Quantity::new(0.0, Unit::Celsius)
            .convert_to(Unit::Fahrenheit)
            .unwrap();
        assert_eq!(q.unit, Unit::Fahrenheit);
        assert_close(q.value, 32.0);
    }

    #[test]
    fn fahrenheit_to_celsius_freezing_point() {
        let q = Quantity::new(32.0, Unit::Fahrenheit)
            .convert_to(Unit::Celsius)
            .unwrap();
        assert_close(q.value, 0.0);
    }

    #[test]
    fn celsius_to_kelvin() {
        let q = Quantity::new(0.0, Unit::Celsius)
            .convert_to(Unit::Kelvin)
            .unwrap();
        assert_close(q.value, 273.15);
    }

    #[test]
    fn kelvin_to_fahrenheit_routes_through_base() {
        // 273.15 K = 0 degC = 32 degF
        let q = Quantity::new(273.15, Unit::Kelvin)
            .convert_to(Unit::Fahrenheit)
            .unwrap();
        assert_close(q.value, 32.0);
    }

    #[test]
    fn bpm_to_hertz() {
        let q = Quantity::new(120.0, Unit::Bpm).convert_to(Unit::Hertz).unwrap();
        assert_close(q.value, 2.0);
    }

    #[test]
    fn round_trip_law_across_families() {
        let pairs = [
            (Unit::Celsius, Unit::Fahrenheit),
            (Unit::Celsius, Unit::Kelvin),
            (Unit::Fahrenheit, Unit::Kelvin),
            (Unit::Meter, Unit::Centimeter),
            (Unit::Meter, Unit::Millimeter),
            (Unit::RadianPerSecond, Unit::DegreePerSecond),
            (Unit::Radian, Unit::Degree),
            (Unit::Pascal, Unit::Hectopascal),
            (Unit::Hertz, Unit::Bpm),
            (Unit::Second, Unit::Millisecond),
        ];
        for (u1, u2) in pairs {
            for value in [-40.0, 0.0, 1.0, 37.5, 1000.0] {
                let q = Quantity::new(value, u1);
                let back = q.convert_to(u2).unwrap().convert_to(u1).unwrap();
                assert!(
                    (back.value - value).abs() < TOLERANCE,
                    "{value} {u1:?} -> {u2:?} -> {u1:?} drifted to {}",
                    back.value
                );
            }
        }
    }

    #[test]
    fn cross_family_conversion_fails() {
        let err = Quantity::new(1.0, Unit::Celsius)
            .convert_to(Unit::Centimeter)
            .unwrap_err();
        assert!(matches!(err, UnitError::UnsupportedConversion { .. }));
    }

    #[test]
    fn identity_conversion_is_exact() {
        let q = Quantity::new(12.34, Unit::Lux);
        assert_eq!(q.convert_to(Unit::Lux).unwrap(), q);
    }

    #[test]
    fn equality_requires_equal_unit() {
        assert_ne!(
            Quantity::new(1.0, Unit::Meter),
            Quantity::new(100.0, Unit::Centimeter)
        );
    }

    #[test]
    fn every_unit_has_a_family_and_symbol() {
        // Exhaustiveness is enforced by the match arms; spot-check a few
        assert_eq!(Unit::DegreePerSecond.family(), UnitFamily::AngularVelocity);
        assert_eq!(Unit::Microtesla.family(), UnitFamily::MagneticField);
        assert_eq!(Unit::Centimeter.symbol(), "cm");
    }
}
