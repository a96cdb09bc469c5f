//! Legal value spaces for device properties
//!
//! A `Constraint` describes what a device pin/property may produce or accept:
//! a numeric range in one unit, a closed label set, or anything at all.
//! Compatibility is directional (a requirement must fit inside an offering)
//! and never crosses kinds or units implicitly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units::Unit;

/// Kind tag used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    None,
    Numeric,
    Categorical,
}

/// Failures from constraint combination and membership checks
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ConstraintError {
    #[error("cannot combine numeric constraints in {left} with {right}")]
    IncompatibleUnit { left: Unit, right: Unit },

    #[error("cannot combine a {left:?} constraint with a {right:?} constraint")]
    IncompatibleKind {
        left: ConstraintKind,
        right: ConstraintKind,
    },

    #[error("{value} {unit} is outside the allowed range [{min}, {max}]")]
    OutOfRange {
        value: f64,
        unit: Unit,
        min: f64,
        max: f64,
    },
}

/// The legal value space of a device property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Accepts or produces any value
    None,
    /// Inclusive range in a single unit
    Numeric { min: f64, max: f64, unit: Unit },
    /// Closed label set
    Categorical { allowed: BTreeSet<String> },
}

impl Constraint {
    pub fn numeric(min: f64, max: f64, unit: Unit) -> Self {
        Constraint::Numeric { min, max, unit }
    }

    pub fn categorical<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Constraint::Categorical {
            allowed: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::None => ConstraintKind::None,
            Constraint::Numeric { .. } => ConstraintKind::Numeric,
            Constraint::Categorical { .. } => ConstraintKind::Categorical,
        }
    }

    /// Whether a requirement is satisfied by an offering.
    ///
    /// Directional: `required` must fit entirely inside `offered`. A required
    /// `None` is satisfied by anything; a required range is satisfied only by
    /// an offered range of the same unit that encloses it; a required label
    /// set only by an offered superset. Kind or unit mismatch is simply
    /// `false` — this is a test, not a combination.
    pub fn is_compatible(required: &Constraint, offered: &Constraint) -> bool {
        match (required, offered) {
            (Constraint::None, _) => true,
            (
                Constraint::Numeric {
                    min: r_min,
                    max: r_max,
                    unit: r_unit,
                },
                Constraint::Numeric {
                    min: o_min,
                    max: o_max,
                    unit: o_unit,
                },
            ) => r_unit == o_unit && o_min <= r_min && o_max >= r_max,
            (
                Constraint::Categorical { allowed: required },
                Constraint::Categorical { allowed: offered },
            ) => required.is_subset(offered),
            _ => false,
        }
    }

    /// Combine two constraints a single property must simultaneously satisfy.
    ///
    /// `None` is the identity. Numeric union requires identical units and
    /// yields the enclosing range; categorical union is the label set union.
    /// Mixing kinds is `IncompatibleKind`, mixing units `IncompatibleUnit` —
    /// never a silent pick of one side.
    pub fn union(&self, other: &Constraint) -> Result<Constraint, ConstraintError> {
        match (self, other) {
            (Constraint::None, c) | (c, Constraint::None) => Ok(c.clone()),
            (
                Constraint::Numeric {
                    min: a_min,
                    max: a_max,
                    unit: a_unit,
                },
                Constraint::Numeric {
                    min: b_min,
                    max: b_max,
                    unit: b_unit,
                },
            ) => {
                if a_unit != b_unit {
                    return Err(ConstraintError::IncompatibleUnit {
                        left: *a_unit,
                        right: *b_unit,
                    });
                }
                Ok(Constraint::Numeric {
                    min: a_min.min(*b_min),
                    max: a_max.max(*b_max),
                    unit: *a_unit,
                })
            }
            (Constraint::Categorical { allowed: a }, Constraint::Categorical { allowed: b }) => {
                Ok(Constraint::Categorical {
                    allowed: a.union(b).cloned().collect(),
                })
            }
            (a, b) => Err(ConstraintError::IncompatibleKind {
                left: a.kind(),
                right: b.kind(),
            }),
        }
    }

    /// Membership check for a concrete numeric value
    pub fn test_value(&self, value: f64, unit: Unit) -> bool {
        match self {
            Constraint::None => true,
            Constraint::Numeric {
                min,
                max,
                unit: own,
            } => unit == *own && value >= *min && value <= *max,
            Constraint::Categorical { .. } => false,
        }
    }

    /// Range check for a concrete numeric value, reporting how it failed.
    ///
    /// Only a same-unit numeric bound can produce `OutOfRange`; unit and
    /// kind mismatches are combination concerns reported by [`union`] and
    /// pass through here untouched.
    ///
    /// [`union`]: Constraint::union
    pub fn check_value(&self, value: f64, unit: Unit) -> Result<(), ConstraintError> {
        match self {
            Constraint::Numeric {
                min,
                max,
                unit: own,
            } if unit == *own && !(*min..=*max).contains(&value) => {
                Err(ConstraintError::OutOfRange {
                    value,
                    unit,
                    min: *min,
                    max: *max,
                })
            }
            _ => Ok(()),
        }
    }

    /// Membership check for a concrete label
    pub fn test_label(&self, label: &str) -> bool {
        match self {
            Constraint::None => true,
            Constraint::Numeric { .. } => false,
            Constraint::Categorical { allowed } => allowed.contains(label),
        }
    }
}
