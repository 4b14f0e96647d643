//! Service implementations
//!
//! Production implementations of the collaborator and infrastructure
//! traits. The channel collaborators here are the simulated variants used
//! when no platform credentials are configured.

pub mod channels;
pub mod file_system;

#[cfg(test)]
mod tests;

pub use channels::{SimulatedAdvertising, SimulatedCommerce, SimulatedContent, SimulatedSocial};
pub use file_system::RealFileSystem;
