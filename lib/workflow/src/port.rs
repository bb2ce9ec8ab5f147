//! Port system for workflow nodes.
//!
//! Ports are named connection points on nodes. Input ports may be required
//! (a node of that type cannot run without an incoming edge there) or
//! optional. Each node type derives its ports from its parameters and
//! settings, so a Switch with three rules has three rule outputs.

use serde::{Deserialize, Serialize};

/// The conventional single input/output port name.
pub const MAIN_PORT: &str = "main";

/// Output port that receives items of a failed node configured to route errors.
pub const ERROR_PORT: &str = "error";

/// An input port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    /// The name of this port.
    pub name: String,
    /// Whether this input is required (must have an incoming edge).
    pub required: bool,
}

impl InputPort {
    /// Creates a new required input port.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// Creates a new optional input port.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// An output port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    /// The name of this port.
    pub name: String,
}

impl OutputPort {
    /// Creates a new output port.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The declared ports of one node, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSet {
    /// Input ports.
    pub inputs: Vec<InputPort>,
    /// Output ports.
    pub outputs: Vec<OutputPort>,
}

impl PortSet {
    /// Creates an empty port set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One required `main` input and one `main` output.
    #[must_use]
    pub fn single() -> Self {
        Self::new()
            .with_input(InputPort::required(MAIN_PORT))
            .with_output(MAIN_PORT)
    }

    /// No inputs and one `main` output.
    #[must_use]
    pub fn source() -> Self {
        Self::new().with_output(MAIN_PORT)
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputPort::new(name));
        self
    }

    /// Returns the input port with the given name, if any.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Returns the output port with the given name, if any.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Returns the output port names in declaration order.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|p| p.name.as_str())
    }
}
