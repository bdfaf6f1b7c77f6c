//! kcm Cluster - Provision, converge and tear down a managed cluster
//!
//! This crate ties the pieces of a kcm run together:
//! - `Provisioner`: Terraform, minikube or nothing, creating the infrastructure
//! - `Renderer`: Helm charts or MiniJinja templates producing manifests
//! - `CredentialSource`: Static or provisioner-provided cluster access
//! - `ClusterManager`: The provision/destroy orchestrator and its ledger handling

pub mod credentials;
pub mod error;
pub mod manager;
pub mod options;
pub mod provisioner;
pub mod renderer;

pub use credentials::{CredentialSource, ProvisionerCredentials, StaticCredentials};
pub use error::{ClusterError, InfraStage, Result};
pub use manager::{ClusterManager, InfraAction, RunReport};
pub use options::ManagerOptions;
pub use provisioner::{AnyProvisioner, Provisioner, ProvisionerConfig};
pub use renderer::{AnyRenderer, Renderer, RendererConfig};
