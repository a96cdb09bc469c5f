//! Project validation and firmware source generation
//!
//! `generate` runs a full validation sweep before emitting anything: every
//! binding and every expression is checked and all violations are returned
//! together, so a user can fix everything in one pass instead of replaying
//! generate-fix-generate loops. Emission itself is deterministic — the same
//! snapshot always produces a byte-identical bundle.

mod arduino;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::constraint::{Constraint, ConstraintError};
use crate::device::{BindingProblem, DeviceLibrary, PropertyKind};
use crate::project::{AssignmentSource, NodeRef, Project};
use crate::term::eval::OperandType;
use crate::term::ExpressionError;
use crate::units::Unit;

/// One problem found during the validation sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// A device binding the resolution engine rejected
    Binding { device: String, problem: BindingProblem },
    /// The per-usage required constraints of one property cannot be combined
    ConstraintConflict {
        device: String,
        property: String,
        error: ConstraintError,
    },
    /// An expression failed the type/unit pass
    Expression { owner: String, error: ExpressionError },
    /// A condition expression does not reduce to a boolean
    ConditionNotBoolean { condition: String },
    /// A scene assigns an expression that does not reduce to a number
    AssignmentNotNumeric {
        scene: String,
        device: String,
        property: String,
    },
    /// A setting names a device that is not in the project
    UnknownDevice { owner: String, device: String },
    /// A setting writes a property the generic device does not declare
    UnknownProperty {
        owner: String,
        device: String,
        property: String,
    },
    /// A setting writes a readable value instead of a parameter
    NotAParameter {
        owner: String,
        device: String,
        property: String,
    },
    /// A categorical setting uses a label outside the allowed set
    LabelNotAllowed {
        owner: String,
        device: String,
        property: String,
        label: String,
    },
    UnknownBoard { board_id: String },
    /// Board exists but targets a different platform than the project
    BoardPlatformMismatch { board_id: String },
    /// A graph edge references a scene or condition that does not exist
    UnknownNode { node: NodeRef },
}

impl Violation {
    /// Stable ordering key so reports do not depend on sweep order
    fn sort_key(&self) -> (u8, String) {
        match self {
            Violation::UnknownBoard { board_id } => (0, board_id.clone()),
            Violation::BoardPlatformMismatch { board_id } => (1, board_id.clone()),
            Violation::Binding { device, problem } => (2, format!("{device}/{problem}")),
            Violation::ConstraintConflict {
                device, property, ..
            } => (3, format!("{device}/{property}")),
            Violation::UnknownDevice { owner, device } => (4, format!("{owner}/{device}")),
            Violation::UnknownProperty {
                owner,
                device,
                property,
            } => (5, format!("{owner}/{device}/{property}")),
            Violation::NotAParameter {
                owner,
                device,
                property,
            } => (6, format!("{owner}/{device}/{property}")),
            Violation::LabelNotAllowed {
                owner,
                device,
                property,
                label,
            } => (7, format!("{owner}/{device}/{property}/{label}")),
            Violation::Expression { owner, error } => (8, format!("{owner}/{error}")),
            Violation::ConditionNotBoolean { condition } => (9, condition.clone()),
            Violation::AssignmentNotNumeric {
                scene,
                device,
                property,
            } => (10, format!("{scene}/{device}/{property}")),
            Violation::UnknownNode { node } => (11, format!("{node:?}")),
        }
    }
}

/// Every violation found by the full sweep, never just the first
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("project validation failed with {} violation(s)", violations.len())]
pub struct GenerationError {
    pub violations: Vec<Violation>,
}

/// Build manifest accompanying the generated source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Toolchain platform identifier (PlatformIO)
    pub platform: String,
    pub board: String,
    /// Firmware libraries pulled in by the bound actual devices
    pub libraries: BTreeSet<String>,
    pub entry_points: Vec<String>,
}

/// Successful generation output: source files plus manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationBundle {
    /// Relative path -> file text
    pub source_files: BTreeMap<String, String>,
    pub manifest: Manifest,
}

/// Lower a validated project snapshot to a firmware source bundle.
///
/// Runs the full validation sweep first; all violations come back at once in
/// `GenerationError`. On a clean sweep, emits source in project-declared
/// order so identical snapshots produce byte-identical bundles.
pub fn generate(
    project: &Project,
    library: &DeviceLibrary,
) -> Result<GenerationBundle, GenerationError> {
    let mut violations = validate(project, library);

    if !violations.is_empty() {
        violations.sort_by_cached_key(Violation::sort_key);
        violations.dedup();
        debug!(
            project = %project.name,
            count = violations.len(),
            "validation sweep found violations"
        );
        return Err(GenerationError { violations });
    }

    let source_files = arduino::emit(project, library);

    let mut libraries: BTreeSet<String> = BTreeSet::new();
    for device in &project.devices {
        if let Some(actual) = device.actual_id.as_deref().and_then(|id| library.actual(id)) {
            libraries.insert(actual.library.clone());
        }
    }

    let manifest = Manifest {
        platform: project.platform.pio_id().to_string(),
        board: project.board_id.clone(),
        libraries,
        entry_points: vec!["src/main.cpp".to_string()],
    };

    debug!(project = %project.name, files = source_files.len(), "generated bundle");
    Ok(GenerationBundle {
        source_files,
        manifest,
    })
}

/// Unit that a device-value reference reports, looked up through the
/// project device's generic descriptor
fn ref_unit(project: &Project, library: &DeviceLibrary, device: &str, property: &str) -> Option<Unit> {
    let project_device = project.device(device)?;
    let generic = library.generic(&project_device.generic_id)?;
    let prop = generic.property(property)?;
    if prop.kind != PropertyKind::Value {
        return None;
    }
    Some(match &prop.constraint {
        Constraint::Numeric { unit, .. } => *unit,
        _ => Unit::NotSpecified,
    })
}

/// Full sweep: bindings, expressions, structural integrity. Collects every
/// violation; order does not matter here (sorted before reporting).
fn validate(project: &Project, library: &DeviceLibrary) -> Vec<Violation> {
    let mut violations = Vec::new();

    // Board
    match library.board(&project.board_id) {
        None => violations.push(Violation::UnknownBoard {
            board_id: project.board_id.clone(),
        }),
        Some(board) if board.platform != project.platform => {
            violations.push(Violation::BoardPlatformMismatch {
                board_id: project.board_id.clone(),
            })
        }
        Some(_) => {}
    }

    // Per-device required constraints: the generic's declared constraint for
    // each property, unioned with point constraints from every scene setting
    // that writes the property (constraints are read from descriptors by
    // shared reference only).
    let mut required: BTreeMap<String, BTreeMap<String, Constraint>> = BTreeMap::new();
    for device in &project.devices {
        let entry = required.entry(device.name.clone()).or_default();
        if let Some(generic) = library.generic(&device.generic_id) {
            for prop in &generic.properties {
                entry.insert(prop.name.clone(), prop.constraint.clone());
            }
        }
    }

    for scene in &project.scenes {
        let owner = format!("scene '{}'", scene.name);
        for setting in &scene.settings {
            let Some(device) = project.device(&setting.device) else {
                violations.push(Violation::UnknownDevice {
                    owner: owner.clone(),
                    device: setting.device.clone(),
                });
                continue;
            };
            let generic = library.generic(&device.generic_id);

            for assignment in &setting.assignments {
                let prop = generic.and_then(|g| g.property(&assignment.property));
                match prop {
                    None if generic.is_some() => {
                        violations.push(Violation::UnknownProperty {
                            owner: owner.clone(),
                            device: setting.device.clone(),
                            property: assignment.property.clone(),
                        });
                        continue;
                    }
                    Some(p) if p.kind != PropertyKind::Parameter => {
                        violations.push(Violation::NotAParameter {
                            owner: owner.clone(),
                            device: setting.device.clone(),
                            property: assignment.property.clone(),
                        });
                        continue;
                    }
                    _ => {}
                }

                match &assignment.source {
                    AssignmentSource::Constant(q) => {
                        // A constant the bound hardware cannot represent is a
                        // range failure in its own right; only in-range
                        // constants feed the per-property constraint union.
                        let offered = device
                            .actual_id
                            .as_deref()
                            .and_then(|id| library.actual(id))
                            .and_then(|actual| actual.offered.get(&assignment.property));
                        if let Some(offered) = offered {
                            if let Err(error) = offered.check_value(q.value, q.unit) {
                                violations.push(Violation::ConstraintConflict {
                                    device: setting.device.clone(),
                                    property: assignment.property.clone(),
                                    error,
                                });
                                continue;
                            }
                        }
                        merge_required(
                            &mut violations,
                            &mut required,
                            &setting.device,
                            &assignment.property,
                            &Constraint::numeric(q.value, q.value, q.unit),
                        );
                    }
                    AssignmentSource::Label(label) => {
                        if let Some(p) = prop {
                            if !matches!(p.constraint, Constraint::None)
                                && !p.constraint.test_label(label)
                            {
                                violations.push(Violation::LabelNotAllowed {
                                    owner: owner.clone(),
                                    device: setting.device.clone(),
                                    property: assignment.property.clone(),
                                    label: label.clone(),
                                });
                            }
                        }
                        merge_required(
                            &mut violations,
                            &mut required,
                            &setting.device,
                            &assignment.property,
                            &Constraint::categorical([label.clone()]),
                        );
                    }
                    AssignmentSource::Expression(expr) => {
                        let expr_owner = format!(
                            "{owner}, {}.{}",
                            setting.device, assignment.property
                        );
                        match expr.check(|d, p| ref_unit(project, library, d, p)) {
                            Ok(OperandType::Number(_)) => {}
                            Ok(_) => violations.push(Violation::AssignmentNotNumeric {
                                scene: scene.name.clone(),
                                device: setting.device.clone(),
                                property: assignment.property.clone(),
                            }),
                            Err(error) => violations.push(Violation::Expression {
                                owner: expr_owner,
                                error,
                            }),
                        }
                    }
                }
            }
        }
    }

    for condition in &project.conditions {
        let owner = format!("condition '{}'", condition.name);
        match condition
            .expression
            .check(|d, p| ref_unit(project, library, d, p))
        {
            Ok(OperandType::Bool) => {}
            Ok(_) => violations.push(Violation::ConditionNotBoolean {
                condition: condition.name.clone(),
            }),
            Err(error) => violations.push(Violation::Expression { owner, error }),
        }
    }

    // Bindings, against the per-property constraint unions computed above
    for device in &project.devices {
        let empty = BTreeMap::new();
        let device_required = required.get(&device.name).unwrap_or(&empty);
        for problem in library.validate_binding(
            &device.generic_id,
            device.actual_id.as_deref(),
            project.platform,
            device_required,
        ) {
            violations.push(Violation::Binding {
                device: device.name.clone(),
                problem,
            });
        }
    }

    // Graph edges must point at real nodes
    for edge in &project.edges {
        for node in [&edge.from, &edge.to] {
            let known = match node {
                NodeRef::Begin => true,
                NodeRef::Scene { name } => project.scene(name).is_some(),
                NodeRef::Condition { name } => project.condition(name).is_some(),
            };
            if !known {
                violations.push(Violation::UnknownNode { node: node.clone() });
            }
        }
    }

    violations
}

fn merge_required(
    violations: &mut Vec<Violation>,
    required: &mut BTreeMap<String, BTreeMap<String, Constraint>>,
    device: &str,
    property: &str,
    usage: &Constraint,
) {
    let entry = required
        .entry(device.to_string())
        .or_default()
        .entry(property.to_string())
        .or_insert(Constraint::None);
    match entry.union(usage) {
        Ok(combined) => *entry = combined,
        Err(error) => violations.push(Violation::ConstraintConflict {
            device: device.to_string(),
            property: property.to_string(),
            error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::device::{
        ActualDevice, Board, GenericDevice, Platform, Property, UsbSignature,
    };
    use crate::project::{
        Condition, Edge, PropertyAssignment, ProjectDevice, Scene, UserSetting,
    };
    use crate::term::{Expression, Operator, Term};
    use crate::units::Quantity;

    fn library() -> DeviceLibrary {
        DeviceLibrary::new(
            [
                GenericDevice {
                    id: "distance-sensor".into(),
                    display_name: "Distance Sensor".into(),
                    properties: vec![Property {
                        name: "distance".into(),
                        kind: PropertyKind::Value,
                        constraint: Constraint::numeric(0.0, 300.0, Unit::Centimeter),
                    }],
                },
                GenericDevice {
                    id: "led".into(),
                    display_name: "LED".into(),
                    properties: vec![Property {
                        name: "brightness".into(),
                        kind: PropertyKind::Parameter,
                        constraint: Constraint::numeric(0.0, 100.0, Unit::Percent),
                    }],
                },
            ],
            [
                ActualDevice {
                    id: "hc-sr04".into(),
                    display_name: "HC-SR04".into(),
                    generic_id: "distance-sensor".into(),
                    offered: BTreeMap::from([(
                        "distance".to_string(),
                        Constraint::numeric(0.0, 400.0, Unit::Centimeter),
                    )]),
                    library: "MP_DISTANCE_HCSR04".into(),
                    supported_platforms: BTreeSet::from([Platform::ArduinoAvr8]),
                },
                ActualDevice {
                    id: "led-5mm".into(),
                    display_name: "5mm LED".into(),
                    generic_id: "led".into(),
                    offered: BTreeMap::from([(
                        "brightness".to_string(),
                        Constraint::numeric(0.0, 100.0, Unit::Percent),
                    )]),
                    library: "MP_LED".into(),
                    supported_platforms: BTreeSet::from([Platform::ArduinoAvr8]),
                },
            ],
            [Board {
                id: "uno".into(),
                display_name: "Arduino Uno".into(),
                platform: Platform::ArduinoAvr8,
                usb_signatures: vec![UsbSignature {
                    vid: 0x2341,
                    pid: 0x0043,
                }],
            }],
        )
    }

    fn near_condition() -> Condition {
        Condition {
            name: "near".into(),
            expression: Expression::new([
                Term::value_ref("sensor1", "distance"),
                Term::Op(Operator::LessThan),
                Term::number(20.0, Unit::Centimeter),
            ]),
        }
    }

    fn valid_project() -> Project {
        Project {
            name: "night-light".into(),
            platform: Platform::ArduinoAvr8,
            board_id: "uno".into(),
            devices: vec![
                ProjectDevice {
                    name: "sensor1".into(),
                    generic_id: "distance-sensor".into(),
                    actual_id: Some("hc-sr04".into()),
                },
                ProjectDevice {
                    name: "led1".into(),
                    generic_id: "led".into(),
                    actual_id: Some("led-5mm".into()),
                },
            ],
            scenes: vec![
                Scene {
                    name: "on".into(),
                    settings: vec![UserSetting {
                        device: "led1".into(),
                        assignments: vec![PropertyAssignment {
                            property: "brightness".into(),
                            source: AssignmentSource::Constant(Quantity::new(
                                100.0,
                                Unit::Percent,
                            )),
                        }],
                    }],
                },
                Scene {
                    name: "off".into(),
                    settings: vec![UserSetting {
                        device: "led1".into(),
                        assignments: vec![PropertyAssignment {
                            property: "brightness".into(),
                            source: AssignmentSource::Constant(Quantity::new(0.0, Unit::Percent)),
                        }],
                    }],
                },
            ],
            conditions: vec![near_condition()],
            edges: vec![
                Edge {
                    from: NodeRef::Begin,
                    to: NodeRef::scene("off"),
                },
                Edge {
                    from: NodeRef::scene("off"),
                    to: NodeRef::condition("near"),
                },
                Edge {
                    from: NodeRef::condition("near"),
                    to: NodeRef::scene("on"),
                },
            ],
        }
    }

    #[test]
    fn valid_project_generates_a_bundle() {
        let bundle = generate(&valid_project(), &library()).unwrap();
        assert!(bundle.source_files.contains_key("src/main.cpp"));
        assert!(bundle.source_files.contains_key("platformio.ini"));
        assert_eq!(bundle.manifest.platform, "atmelavr");
        assert_eq!(bundle.manifest.board, "uno");
        assert_eq!(
            bundle.manifest.libraries,
            BTreeSet::from(["MP_DISTANCE_HCSR04".to_string(), "MP_LED".to_string()])
        );
    }

    #[test]
    fn generation_is_deterministic() {
        let project = valid_project();
        let lib = library();
        let a = generate(&project, &lib).unwrap();
        let b = generate(&project, &lib).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn one_bad_binding_and_one_bad_expression_yield_two_violations() {
        let mut project = valid_project();
        // Unresolve one binding
        project.devices[1].actual_id = None;
        // Break one expression: temperature literal compared to a distance value
        project.conditions[0].expression = Expression::new([
            Term::value_ref("sensor1", "distance"),
            Term::Op(Operator::LessThan),
            Term::number(20.0, Unit::Celsius),
        ]);

        let err = generate(&project, &library()).unwrap_err();
        assert_eq!(err.violations.len(), 2, "{:?}", err.violations);
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::Binding {
                problem: BindingProblem::Unbound,
                ..
            }
        )));
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::Expression {
                error: ExpressionError::TypeMismatch { .. },
                ..
            }
        )));
    }

    #[test]
    fn violations_are_reported_in_stable_order() {
        let mut project = valid_project();
        project.devices[0].actual_id = None;
        project.devices[1].actual_id = None;
        project.board_id = "missing".into();

        let err = generate(&project, &library()).unwrap_err();
        let keys: Vec<_> = err.violations.iter().map(Violation::sort_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(matches!(err.violations[0], Violation::UnknownBoard { .. }));
    }

    #[test]
    fn constant_outside_offered_range_is_out_of_range() {
        let mut project = valid_project();
        project.scenes[0].settings[0].assignments[0].source =
            AssignmentSource::Constant(Quantity::new(150.0, Unit::Percent));

        let err = generate(&project, &library()).unwrap_err();
        assert_eq!(err.violations.len(), 1, "{:?}", err.violations);
        assert!(matches!(
            &err.violations[0],
            Violation::ConstraintConflict {
                device,
                property,
                error: ConstraintError::OutOfRange { value, .. },
            } if device == "led1" && property == "brightness" && *value == 150.0
        ));
    }

    #[test]
    fn out_of_range_constant_on_an_unbound_device_reports_unbound() {
        let mut project = valid_project();
        project.devices[1].actual_id = None;
        project.scenes[0].settings[0].assignments[0].source =
            AssignmentSource::Constant(Quantity::new(150.0, Unit::Percent));

        // No offered constraint to range-check without a bound actual; the
        // device surfaces through the binding sweep instead
        let err = generate(&project, &library()).unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::Binding {
                problem: BindingProblem::Unbound,
                ..
            }
        )));
    }

    #[test]
    fn constant_in_wrong_unit_is_a_constraint_conflict() {
        let mut project = valid_project();
        project.scenes[0].settings[0].assignments[0].source =
            AssignmentSource::Constant(Quantity::new(50.0, Unit::Lux));

        let err = generate(&project, &library()).unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::ConstraintConflict {
                error: ConstraintError::IncompatibleUnit { .. },
                ..
            }
        )));
    }

    #[test]
    fn writing_a_sensor_value_is_not_a_parameter() {
        let mut project = valid_project();
        project.scenes[0].settings.push(UserSetting {
            device: "sensor1".into(),
            assignments: vec![PropertyAssignment {
                property: "distance".into(),
                source: AssignmentSource::Constant(Quantity::new(1.0, Unit::Centimeter)),
            }],
        });

        let err = generate(&project, &library()).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| matches!(v, Violation::NotAParameter { .. })));
    }

    #[test]
    fn numeric_condition_is_not_boolean() {
        let mut project = valid_project();
        project.conditions[0].expression = Expression::new([
            Term::value_ref("sensor1", "distance"),
            Term::Op(Operator::Plus),
            Term::number(1.0, Unit::Centimeter),
        ]);

        let err = generate(&project, &library()).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| matches!(v, Violation::ConditionNotBoolean { .. })));
    }

    #[test]
    fn dangling_edge_is_reported() {
        let mut project = valid_project();
        project.edges.push(Edge {
            from: NodeRef::scene("on"),
            to: NodeRef::scene("nonexistent"),
        });

        let err = generate(&project, &library()).unwrap_err();
        assert!(err
            .violations
            .iter()
            .any(|v| matches!(v, Violation::UnknownNode { .. })));
    }
}
