//! Immutable project snapshot
//!
//! The editing UI owns the live, mutable graph; the core only ever receives a
//! fully materialized snapshot of it. Declaration order of devices, scenes,
//! and conditions is significant and preserved all the way into generated
//! source.

use serde::{Deserialize, Serialize};

use crate::device::Platform;
use crate::term::Expression;
use crate::units::Quantity;

/// A user-placed instance of a generic device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDevice {
    /// Instance name, unique within the project (e.g. "sensor1")
    pub name: String,
    pub generic_id: String,
    /// Concrete part selected by the user, if any
    pub actual_id: Option<String>,
}

/// What a scene writes into a device parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Computed from device-reported values
    Expression(Expression),
    /// Fixed numeric setting
    Constant(Quantity),
    /// Fixed categorical setting
    Label(String),
}

/// One property write inside a user setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyAssignment {
    pub property: String,
    pub source: AssignmentSource,
}

/// Binds a project device to the property assignments a scene applies to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSetting {
    /// Project device instance name
    pub device: String,
    pub assignments: Vec<PropertyAssignment>,
}

/// A set of device states applied as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    pub settings: Vec<UserSetting>,
}

/// A boolean predicate over device-reported values guarding a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub expression: Expression,
}

/// Node reference in the scene/condition graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeRef {
    /// Program entry
    Begin,
    Scene { name: String },
    Condition { name: String },
}

impl NodeRef {
    pub fn scene(name: impl Into<String>) -> Self {
        NodeRef::Scene { name: name.into() }
    }

    pub fn condition(name: impl Into<String>) -> Self {
        NodeRef::Condition { name: name.into() }
    }
}

/// Directed edge between two graph nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeRef,
    pub to: NodeRef,
}

/// A complete project snapshot handed to validation and generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub platform: Platform,
    pub board_id: String,
    pub devices: Vec<ProjectDevice>,
    pub scenes: Vec<Scene>,
    pub conditions: Vec<Condition>,
    pub edges: Vec<Edge>,
}

impl Project {
    pub fn device(&self, name: &str) -> Option<&ProjectDevice> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.name == name)
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    /// Outgoing edges of a node, in declared order
    pub fn outgoing<'a>(&'a self, from: &'a NodeRef) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| &e.from == from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let project = Project {
            name: "p".into(),
            platform: Platform::ArduinoAvr8,
            board_id: "uno".into(),
            devices: vec![ProjectDevice {
                name: "led1".into(),
                generic_id: "led".into(),
                actual_id: None,
            }],
            scenes: vec![Scene {
                name: "on".into(),
                settings: vec![],
            }],
            conditions: vec![],
            edges: vec![Edge {
                from: NodeRef::Begin,
                to: NodeRef::scene("on"),
            }],
        };

        assert!(project.device("led1").is_some());
        assert!(project.device("led2").is_none());
        assert!(project.scene("on").is_some());
        assert_eq!(project.outgoing(&NodeRef::Begin).count(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let project = Project {
            name: "p".into(),
            platform: Platform::ArduinoEsp32,
            board_id: "esp32dev".into(),
            devices: vec![],
            scenes: vec![],
            conditions: vec![],
            edges: vec![],
        };
        let json = serde_json::to_string(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back, project);
    }
}
