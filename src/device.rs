//! Device descriptors and the catalog registry
//!
//! Generic devices are abstract roles ("distance sensor"); actual devices are
//! concrete parts offering their own per-property constraints. The
//! `DeviceLibrary` is built explicitly and handed to the core — no global
//! catalog state — and its constraints are read by shared reference only.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;

/// Firmware target a project compiles for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    ArduinoAvr8,
    ArduinoEsp32,
    ArduinoEsp8266,
}

impl Platform {
    /// PlatformIO platform identifier used in build manifests
    pub fn pio_id(self) -> &'static str {
        match self {
            Platform::ArduinoAvr8 => "atmelavr",
            Platform::ArduinoEsp32 => "espressif32",
            Platform::ArduinoEsp8266 => "espressif8266",
        }
    }
}

/// Whether a property is read from or written to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Device-reported, readable in conditions
    Value,
    /// Writable, assignable in scenes
    Parameter,
}

/// Named property of a generic device with its required constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
    pub constraint: Constraint,
}

/// An abstract device role with named properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericDevice {
    pub id: String,
    pub display_name: String,
    pub properties: Vec<Property>,
}

impl GenericDevice {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A concrete hardware part bindable to a generic device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualDevice {
    pub id: String,
    pub display_name: String,
    /// Generic role this part implements
    pub generic_id: String,
    /// Per-property constraint the part offers
    pub offered: BTreeMap<String, Constraint>,
    /// Firmware library this part pulls into the build
    pub library: String,
    pub supported_platforms: BTreeSet<Platform>,
}

/// USB vendor/product pair identifying a board on a serial bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSignature {
    pub vid: u16,
    pub pid: u16,
}

/// A flashable target board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub display_name: String,
    pub platform: Platform,
    /// Known USB signatures for auto-selecting a serial port
    pub usb_signatures: Vec<UsbSignature>,
}

/// A single problem found while resolving one device binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindingProblem {
    /// No actual device bound yet
    Unbound,
    UnknownGeneric { generic_id: String },
    UnknownActual { actual_id: String },
    /// Bound part implements a different generic role
    GenericMismatch { actual_id: String, expected: String, found: String },
    /// Bound part does not support the project's target platform
    PlatformUnsupported { actual_id: String, platform: Platform },
    /// Part offers no constraint for a property the project consumes
    PropertyNotOffered { actual_id: String, property: String },
    /// Offered constraint does not cover the union of required constraints
    ConstraintNotCovered {
        actual_id: String,
        property: String,
        required: Constraint,
        offered: Constraint,
    },
}

impl std::fmt::Display for BindingProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingProblem::Unbound => write!(f, "no actual device selected"),
            BindingProblem::UnknownGeneric { generic_id } => {
                write!(f, "unknown generic device '{generic_id}'")
            }
            BindingProblem::UnknownActual { actual_id } => {
                write!(f, "unknown actual device '{actual_id}'")
            }
            BindingProblem::GenericMismatch {
                actual_id,
                expected,
                found,
            } => write!(
                f,
                "'{actual_id}' implements '{found}', project device needs '{expected}'"
            ),
            BindingProblem::PlatformUnsupported {
                actual_id,
                platform,
            } => write!(f, "'{actual_id}' does not support {platform:?}"),
            BindingProblem::PropertyNotOffered {
                actual_id,
                property,
            } => write!(f, "'{actual_id}' offers no property '{property}'"),
            BindingProblem::ConstraintNotCovered {
                actual_id,
                property,
                ..
            } => write!(
                f,
                "'{actual_id}' cannot cover the required range of '{property}'"
            ),
        }
    }
}

/// Explicitly constructed, read-only catalog of device descriptors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceLibrary {
    generics: BTreeMap<String, GenericDevice>,
    actuals: BTreeMap<String, ActualDevice>,
    boards: BTreeMap<String, Board>,
}

impl DeviceLibrary {
    pub fn new(
        generics: impl IntoIterator<Item = GenericDevice>,
        actuals: impl IntoIterator<Item = ActualDevice>,
        boards: impl IntoIterator<Item = Board>,
    ) -> Self {
        Self {
            generics: generics.into_iter().map(|g| (g.id.clone(), g)).collect(),
            actuals: actuals.into_iter().map(|a| (a.id.clone(), a)).collect(),
            boards: boards.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }

    pub fn generic(&self, id: &str) -> Option<&GenericDevice> {
        self.generics.get(id)
    }

    pub fn actual(&self, id: &str) -> Option<&ActualDevice> {
        self.actuals.get(id)
    }

    pub fn board(&self, id: &str) -> Option<&Board> {
        self.boards.get(id)
    }

    /// Resolve one device binding against the catalog.
    ///
    /// `required` is the per-property union of constraints across every usage
    /// in the project (computed by the caller, which owns the usage sweep).
    /// Returns every problem found, not just the first.
    pub fn validate_binding(
        &self,
        generic_id: &str,
        actual_id: Option<&str>,
        platform: Platform,
        required: &BTreeMap<String, Constraint>,
    ) -> Vec<BindingProblem> {
        let mut problems = Vec::new();

        if self.generic(generic_id).is_none() {
            problems.push(BindingProblem::UnknownGeneric {
                generic_id: generic_id.to_string(),
            });
        }

        let actual_id = match actual_id {
            Some(id) => id,
            None => {
                problems.push(BindingProblem::Unbound);
                return problems;
            }
        };

        let actual = match self.actual(actual_id) {
            Some(a) => a,
            None => {
                problems.push(BindingProblem::UnknownActual {
                    actual_id: actual_id.to_string(),
                });
                return problems;
            }
        };

        if actual.generic_id != generic_id {
            problems.push(BindingProblem::GenericMismatch {
                actual_id: actual_id.to_string(),
                expected: generic_id.to_string(),
                found: actual.generic_id.clone(),
            });
        }

        if !actual.supported_platforms.contains(&platform) {
            problems.push(BindingProblem::PlatformUnsupported {
                actual_id: actual_id.to_string(),
                platform,
            });
        }

        for (property, req) in required {
            match actual.offered.get(property) {
                None => problems.push(BindingProblem::PropertyNotOffered {
                    actual_id: actual_id.to_string(),
                    property: property.clone(),
                }),
                Some(offered) => {
                    if !Constraint::is_compatible(req, offered) {
                        problems.push(BindingProblem::ConstraintNotCovered {
                            actual_id: actual_id.to_string(),
                            property: property.clone(),
                            required: req.clone(),
                            offered: offered.clone(),
                        });
                    }
                }
            }
        }

        problems
    }
}
