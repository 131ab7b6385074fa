//! Capability traits implemented by component deployers
//!
//! Every component can be deployed and destroyed and offers a way to wait
//! for both. Extension resources additionally support migration between
//! seeds. Callers depend on the narrowest trait they need.

use async_trait::async_trait;
use gardenlet_core::ShootState;
use tracing::info;

use crate::error::Result;

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Create or update all objects of the component
    async fn deploy(&self) -> Result<()>;

    /// Delete all objects of the component
    async fn destroy(&self) -> Result<()>;
}

#[async_trait]
pub trait Waiter: Send + Sync {
    /// Block until the deployed objects are healthy
    async fn wait(&self) -> Result<()>;

    /// Block until the deleted objects are gone
    async fn wait_cleanup(&self) -> Result<()>;
}

#[async_trait]
pub trait Migrator: Send + Sync {
    /// Hand the component over to another seed
    async fn migrate(&self) -> Result<()>;

    /// Recreate the component from a captured state snapshot
    async fn restore(&self, shoot_state: &ShootState) -> Result<()>;
}

#[async_trait]
pub trait MigrateWaiter: Send + Sync {
    /// Block until the migration finished
    async fn wait_migrate(&self) -> Result<()>;
}

pub trait DeployWaiter: Deployer + Waiter {}

impl<T: Deployer + Waiter + ?Sized> DeployWaiter for T {}

pub trait DeployMigrateWaiter: DeployWaiter + Migrator + MigrateWaiter {}

impl<T: DeployWaiter + Migrator + MigrateWaiter + ?Sized> DeployMigrateWaiter for T {}

/// Deploy a component and wait until it is healthy
pub async fn deploy_and_wait(component: &dyn DeployWaiter) -> Result<()> {
    component.deploy().await?;
    component.wait().await
}

/// Destroy a component and wait until its objects are gone
pub async fn destroy_and_wait(component: &dyn DeployWaiter) -> Result<()> {
    component.destroy().await?;
    component.wait_cleanup().await
}

/// Migrate a component and wait until the controller confirmed it
pub async fn migrate_and_wait(component: &dyn DeployMigrateWaiter) -> Result<()> {
    component.migrate().await?;
    component.wait_migrate().await?;
    info!("Component migrated");
    Ok(())
}

/// Restore a component and wait until it is healthy again
pub async fn restore_and_wait(
    component: &dyn DeployMigrateWaiter,
    shoot_state: &ShootState,
) -> Result<()> {
    component.restore(shoot_state).await?;
    component.wait().await
}
