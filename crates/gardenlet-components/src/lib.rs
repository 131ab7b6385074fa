//! Gardenlet Components - deployers for shoot control plane components
//!
//! Each module builds the desired objects of one component and wires them
//! into the [`gardenlet_kube::component`] capability traits:
//!
//! - [`apiserver_proxy`]: Envoy DaemonSet in the shoot (managed resource)
//! - [`kube_state_metrics`]: metrics exporter in the seed plus its monitoring config
//! - [`dns`]: DNS entries, providers and owners
//! - [`infrastructure`], [`backup_entry`]: extension resources with migrate/restore
//! - [`etcd_copy_backups_task`]: etcd-druid backup copy task
//!
//! Built-in wait timings can be overridden through a
//! [`gardenlet_core::DeployerConfig`] keyed by each module's `NAME`.

pub mod apiserver_proxy;
pub mod backup_entry;
pub mod dns;
pub mod etcd_copy_backups_task;
pub mod infrastructure;
pub mod kube_state_metrics;

pub use apiserver_proxy::ApiserverProxy;
pub use backup_entry::BackupEntry;
pub use dns::{DnsEntry, DnsOwner, DnsProvider};
pub use etcd_copy_backups_task::EtcdCopyBackupsTask;
pub use infrastructure::Infrastructure;
pub use kube_state_metrics::KubeStateMetrics;
