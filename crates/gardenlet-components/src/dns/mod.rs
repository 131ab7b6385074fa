//! DNS objects handled by the external dns-controller-manager
//!
//! Entries and providers report `status.state`; `Error` and `Invalid` are
//! surfaced as controller errors. Owners have no status worth waiting for.

mod entry;
mod owner;
mod provider;

use std::collections::BTreeMap;
use std::time::Duration;

use gardenlet_core::WaitTimings;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub use entry::{DnsEntry, DnsEntrySpec, EntryValues};
pub use owner::{DnsOwner, DnsOwnerSpec, OwnerValues};
pub use provider::{DnsProvider, DnsProviderSpec, DnsSelection, ProviderValues, SecretReference};

/// Component name used for configuration lookups
pub const NAME: &str = "dns";

pub const API_VERSION: &str = "dns.gardener.cloud/v1alpha1";

/// Selects the dns-controller-manager responsible for an object
pub const CLASS_ANNOTATION: &str = "dns.gardener.cloud/class";

pub const DEFAULT_TIMINGS: WaitTimings = WaitTimings::new(
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(120),
);

fn metadata(namespace: Option<&str>, name: &str, class: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        annotations: class.map(|class| {
            BTreeMap::from([(CLASS_ANNOTATION.to_string(), class.to_string())])
        }),
        ..Default::default()
    }
}
