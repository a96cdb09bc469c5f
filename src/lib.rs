//! Deviceforge - IoT Application Composer Core
//!
//! The engine behind a diagram-based IoT app builder: projects wire abstract
//! device roles into scenes and conditions, and the core turns a valid
//! project into flashable Arduino firmware.
//!
//! This library provides:
//! - Unit-aware quantities with affine conversion between compatible units
//! - Constraint algebra for matching device requirements to hardware offers
//! - An expression AST with type/unit checking, evaluation, and C rendering
//! - Deterministic Arduino source and build-manifest generation
//! - An async compile-and-upload pipeline driving PlatformIO

pub mod config;
pub mod constraint;
pub mod device;
pub mod generator;
pub mod pipeline;
pub mod project;
pub mod term;
pub mod units;
