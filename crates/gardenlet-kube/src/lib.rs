//! Gardenlet Kube - Kubernetes integration for component deployers
//!
//! This crate provides:
//! - **Object client**: the [`ObjectClient`] seam, a kube-rs implementation and an in-memory mock
//! - **Status poller**: interval/timeout polling with minor and severe errors
//! - **Health checks**: readiness predicates for extension objects, managed resources, DNS and etcd tasks
//! - **Extension lifecycle**: deploy, wait, migrate, restore and delete extension resources
//! - **Managed resources**: manifest bundles reconciled by the resource manager
//! - **Component traits**: the capabilities every component deployer offers

pub mod client;
pub mod component;
pub mod error;
pub mod extension;
pub mod health;
pub mod managed_resource;
pub mod mock;
pub mod object;
pub mod retry;

pub use client::{ApplyResult, DeleteResult, FIELD_MANAGER, KubeObjectClient, ObjectClient};
pub use component::{
    DeployMigrateWaiter, DeployWaiter, Deployer, MigrateWaiter, Migrator, Waiter,
};
pub use error::{KubeError, Result};
pub use extension::{Clock, ExtensionPhase};
pub use health::{ExtensionStatus, LastError, LastOperation, LastOperationState, LastOperationType};
pub use managed_resource::ManagedResource;
pub use mock::{MockObjectClient, OperationCounts};
pub use retry::{Poll, until_timeout};
