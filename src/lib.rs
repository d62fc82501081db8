//! Isolated development sandboxes: a fresh clone of a base repository with a
//! project attached as a submodule on its own feature branch, tracked in a
//! JSON registry inside the workspace root.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod tools;

pub use error::{Result, SandboxError};
pub use lifecycle::SandboxManager;
pub use model::{SandboxConfig, SandboxInfo, SandboxRegistry};
pub use registry::RegistryStore;
