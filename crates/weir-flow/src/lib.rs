//! Flow controller for conditional pipelines with bounded self-correction.
//!
//! A flow is a directed graph of named steps wired by edges from producer
//! outputs to consumer inputs. Steps invoke external operations through the
//! `StepExecutor` boundary; branching steps carry ordered route predicates
//! over the Run State; cycles are allowed and bounded per back edge by a
//! traversal ceiling. One `FlowController` drives one run to completion,
//! producing a `RunReport` or a typed failure.

pub mod condition;
pub mod controller;
pub mod definition;
pub mod graph;
pub mod validator;

pub use condition::{select_branch, Predicate, Route};
pub use controller::{
    ExecutorRegistry, ExternalInputs, FlowController, RunReport, StepResult,
};
pub use definition::GraphDefinition;
pub use graph::{Edge, Graph, PortRef, Step};
pub use validator::{clean_artifact, SchemaValidator, ValidationResult, ValidatorStep};
