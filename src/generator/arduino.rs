//! Arduino C++ emitter
//!
//! Emits one `src/main.cpp` plus a `platformio.ini` for the project's board.
//! The sketch follows a scene-pointer structure: every scene is a function
//! that applies its property writes and hands control to a per-node
//! transition checker; checkers poll condition functions each `loop()` pass.
//! Emission order is fixed by project declaration order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::device::DeviceLibrary;
use crate::project::{AssignmentSource, NodeRef, Project, Scene};

const INDENT: &str = "    ";

/// C identifier for a device instance variable
fn device_var(name: &str) -> String {
    format!("_{}", sanitize(name))
}

fn scene_fn(name: &str) -> String {
    format!("scene_{}", sanitize(name))
}

fn condition_fn(name: &str) -> String {
    format!("condition_{}", sanitize(name))
}

fn check_fn(node: &NodeRef) -> String {
    match node {
        NodeRef::Begin => "check_begin".to_string(),
        NodeRef::Scene { name } => format!("check_{}", sanitize(name)),
        NodeRef::Condition { name } => format!("check_cond_{}", sanitize(name)),
    }
}

/// Keep only characters valid in a C identifier
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Runtime accessor for a device-reported value
fn value_accessor(device: &str, property: &str) -> String {
    format!("{}.get_{}()", device_var(device), sanitize(property))
}

fn render_number(value: f64) -> String {
    format!("{value}")
}

/// Emit the full source bundle for an already-validated project.
///
/// Must only be called after the validation sweep: lookups that failed there
/// are skipped silently here rather than re-reported.
pub(super) fn emit(project: &Project, library: &DeviceLibrary) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    files.insert("src/main.cpp".to_string(), emit_main(project, library));
    files.insert("platformio.ini".to_string(), emit_pio_ini(project, library));
    files
}

fn emit_main(project: &Project, library: &DeviceLibrary) -> String {
    let mut out = String::new();

    // Includes: framework header then device libraries, sorted and distinct
    out.push_str("#include \"MakerPlayground.h\"\n");
    let libs: BTreeSet<&str> = project
        .devices
        .iter()
        .filter_map(|d| d.actual_id.as_deref())
        .filter_map(|id| library.actual(id))
        .map(|a| a.library.as_str())
        .collect();
    for lib in &libs {
        let _ = writeln!(out, "#include \"{lib}.h\"");
    }
    out.push('\n');

    // Scene pointer and forward declarations
    out.push_str("void (*currentScene)(void);\n\n");
    for scene in &project.scenes {
        let _ = writeln!(out, "void {}();", scene_fn(&scene.name));
    }
    let _ = writeln!(out, "void {}();", check_fn(&NodeRef::Begin));
    for scene in &project.scenes {
        let _ = writeln!(
            out,
            "void {}();",
            check_fn(&NodeRef::scene(scene.name.clone()))
        );
    }
    out.push('\n');

    // Device instances, once per distinct bound device, declared order
    for device in &project.devices {
        if let Some(actual) = device.actual_id.as_deref().and_then(|id| library.actual(id)) {
            let _ = writeln!(out, "{} {};", actual.library, device_var(&device.name));
        }
    }
    out.push('\n');

    // Condition functions
    for condition in &project.conditions {
        let rendered = condition
            .expression
            .render_c(|d, p| Some(value_accessor(d, p)))
            .unwrap_or_else(|_| "false".to_string());
        let _ = writeln!(out, "bool {}() {{", condition_fn(&condition.name));
        let _ = writeln!(out, "{INDENT}return {rendered};");
        out.push_str("}\n\n");
    }

    // Scene functions: apply settings, then hand off to the node's checker
    for scene in &project.scenes {
        let _ = writeln!(out, "void {}() {{", scene_fn(&scene.name));
        emit_scene_body(&mut out, scene);
        let _ = writeln!(
            out,
            "{INDENT}currentScene = {};",
            check_fn(&NodeRef::scene(scene.name.clone()))
        );
        out.push_str("}\n\n");
    }

    // Transition checkers for Begin and every scene
    emit_checker(&mut out, project, &NodeRef::Begin);
    for scene in &project.scenes {
        emit_checker(&mut out, project, &NodeRef::scene(scene.name.clone()));
    }

    // Entry points
    out.push_str("void setup() {\n");
    out.push_str(format!("{INDENT}MPSerial.begin(115200);\n").as_str());
    for device in &project.devices {
        if device.actual_id.is_some() {
            let _ = writeln!(out, "{INDENT}{}.init();", device_var(&device.name));
        }
    }
    let _ = writeln!(out, "{INDENT}currentScene = {};", check_fn(&NodeRef::Begin));
    out.push_str("}\n\n");

    out.push_str("void loop() {\n");
    for device in &project.devices {
        if device.actual_id.is_some() {
            let _ = writeln!(out, "{INDENT}{}.update();", device_var(&device.name));
        }
    }
    out.push_str(format!("{INDENT}currentScene();\n").as_str());
    out.push_str("}\n");

    out
}

fn emit_scene_body(out: &mut String, scene: &Scene) {
    for setting in &scene.settings {
        for assignment in &setting.assignments {
            let setter = format!(
                "{}.set_{}",
                device_var(&setting.device),
                sanitize(&assignment.property)
            );
            let argument = match &assignment.source {
                AssignmentSource::Constant(q) => render_number(q.value),
                AssignmentSource::Label(label) => {
                    format!("\"{}\"", label.replace('\\', "\\\\").replace('"', "\\\""))
                }
                AssignmentSource::Expression(expr) => expr
                    .render_c(|d, p| Some(value_accessor(d, p)))
                    .unwrap_or_else(|_| "0".to_string()),
            };
            let _ = writeln!(out, "{INDENT}{setter}({argument});");
        }
    }
}

/// Emit the transition checker of one node: the first outgoing scene edge is
/// taken unconditionally; condition edges poll and follow the condition's own
/// outgoing edges when it fires. Condition-to-condition chains nest.
fn emit_checker(out: &mut String, project: &Project, node: &NodeRef) {
    let _ = writeln!(out, "void {}() {{", check_fn(node));
    let mut visited = Vec::new();
    emit_transitions(out, project, node, 1, &mut visited);
    out.push_str("}\n\n");
}

fn emit_transitions(
    out: &mut String,
    project: &Project,
    node: &NodeRef,
    depth: usize,
    visited: &mut Vec<NodeRef>,
) {
    if visited.contains(node) {
        return;
    }
    visited.push(node.clone());

    let pad = INDENT.repeat(depth);
    for edge in project.outgoing(node) {
        match &edge.to {
            NodeRef::Scene { name } => {
                let _ = writeln!(out, "{pad}currentScene = {};", scene_fn(name));
                let _ = writeln!(out, "{pad}return;");
                break; // unconditional transition wins; later edges unreachable
            }
            NodeRef::Condition { name } => {
                let _ = writeln!(out, "{pad}if ({}()) {{", condition_fn(name));
                emit_transitions(
                    out,
                    project,
                    &NodeRef::condition(name.clone()),
                    depth + 1,
                    visited,
                );
                let _ = writeln!(out, "{pad}}}");
            }
            NodeRef::Begin => {} // validated away
        }
    }

    visited.pop();
}

fn emit_pio_ini(project: &Project, library: &DeviceLibrary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[env:{}]", project.board_id);
    let _ = writeln!(out, "platform = {}", project.platform.pio_id());
    let _ = writeln!(out, "board = {}", project.board_id);
    out.push_str("framework = arduino\n");

    let libs: BTreeSet<&str> = project
        .devices
        .iter()
        .filter_map(|d| d.actual_id.as_deref())
        .filter_map(|id| library.actual(id))
        .map(|a| a.library.as_str())
        .collect();
    if !libs.is_empty() {
        out.push_str("lib_deps =\n");
        for lib in libs {
            let _ = writeln!(out, "{INDENT}{lib}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::constraint::Constraint;
    use crate::device::{
        ActualDevice, Board, GenericDevice, Platform, Property, PropertyKind, UsbSignature,
    };
    use crate::project::{Condition, Edge, PropertyAssignment, ProjectDevice, UserSetting};
    use crate::term::{Expression, Operator, Term};
    use crate::units::{Quantity, Unit};

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
                    offered: Default::default(),
                    library: "MP_DISTANCE_HCSR04".into(),
                    supported_platforms: BTreeSet::from([Platform::ArduinoAvr8]),
                },
                ActualDevice {
                    id: "led-5mm".into(),
                    display_name: "5mm LED".into(),
                    generic_id: "led".into(),
                    offered: Default::default(),
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

    fn project() -> Project {
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
            scenes: vec![Scene {
                name: "on".into(),
                settings: vec![UserSetting {
                    device: "led1".into(),
                    assignments: vec![PropertyAssignment {
                        property: "brightness".into(),
                        source: AssignmentSource::Constant(Quantity::new(100.0, Unit::Percent)),
                    }],
                }],
            }],
            conditions: vec![Condition {
                name: "near".into(),
                expression: Expression::new([
                    Term::value_ref("sensor1", "distance"),
                    Term::Op(Operator::LessThan),
                    Term::number(20.0, Unit::Centimeter),
                ]),
            }],
            edges: vec![
                Edge {
                    from: NodeRef::Begin,
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
    fn main_cpp_has_expected_blocks() {
        let main = emit_main(&project(), &library());

        assert!(main.starts_with("#include \"MakerPlayground.h\"\n"));
        assert!(main.contains("#include \"MP_DISTANCE_HCSR04.h\""));
        assert!(main.contains("#include \"MP_LED.h\""));
        assert!(main.contains("MP_DISTANCE_HCSR04 _sensor1;"));
        assert!(main.contains("MP_LED _led1;"));
        assert!(main.contains("bool condition_near() {"));
        assert!(main.contains("return (_sensor1.get_distance() < 20);"));
        assert!(main.contains("void scene_on() {"));
        assert!(main.contains("_led1.set_brightness(100);"));
        assert!(main.contains("currentScene = check_begin;"));
    }

    #[test]
    fn begin_checker_polls_condition_then_enters_scene() {
        let main = emit_main(&project(), &library());
        let checker = main
            .split("void check_begin() {")
            .nth(1)
            .and_then(|rest| rest.split('}').next())
            .unwrap();
        assert!(checker.contains("if (condition_near()) {"));
        assert!(checker.contains("currentScene = scene_on;"));
    }

    #[test]
    fn pio_ini_lists_board_platform_and_libraries() {
        let ini = emit_pio_ini(&project(), &library());
        assert!(ini.contains("[env:uno]"));
        assert!(ini.contains("platform = atmelavr"));
        assert!(ini.contains("board = uno"));
        assert!(ini.contains("MP_DISTANCE_HCSR04"));
        assert!(ini.contains("MP_LED"));
    }

    #[test]
    fn includes_are_sorted_and_deduplicated() {
        let mut p = project();
        // Second device instance of the same part must not duplicate the include
        p.devices.push(ProjectDevice {
            name: "led2".into(),
            generic_id: "led".into(),
            actual_id: Some("led-5mm".into()),
        });
        let main = emit_main(&p, &library());
        assert_eq!(main.matches("#include \"MP_LED.h\"").count(), 1);
        assert!(main.contains("MP_LED _led2;"));
    }
}
