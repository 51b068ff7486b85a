// All formatting functionality is in examops-core
// This CLI acts as a thin wrapper around the core library

// CLI-specific modules
pub mod logging;
pub mod settings;

// Re-export core types for convenience
pub use examops_core::*;
