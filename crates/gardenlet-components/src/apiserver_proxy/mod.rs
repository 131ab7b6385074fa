//! apiserver-proxy
//!
//! Runs an Envoy on every shoot node that listens on the advertised address
//! of the kube-apiserver and forwards connections to the seed's reversed
//! proxy. An optional webhook points pods at the proxy.
//!
//! All objects are delivered into the shoot as one managed resource:
//!
//! | kind | name |
//! |------|------|
//! | ConfigMap | `apiserver-proxy-config-<hash>` |
//! | ServiceAccount, Service, DaemonSet | `apiserver-proxy` |
//! | MutatingWebhookConfiguration | `apiserver-proxy.networking.gardener.cloud` (pod mutator only) |
//! | ClusterRole, PodSecurityPolicy, RoleBinding | PSP access (unless PSPs are disabled) |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gardenlet_core::annotations::{labels, reference_annotation_key, resources};
use gardenlet_core::{Registry, WaitTimings, unique_name};
use gardenlet_engine::Engine;
use gardenlet_kube::{Deployer, KubeError, ObjectClient, Result, Waiter, managed_resource};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    HTTPGetAction, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecurityContext, Service,
    ServiceAccount, ServicePort, ServiceSpec, Toleration, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

/// Component name used for configuration lookups
pub const NAME: &str = "apiserver-proxy";

/// Name of the managed resource in the control plane namespace
pub const MANAGED_RESOURCE_NAME: &str = "shoot-core-apiserver-proxy";

/// Port serving Envoy metrics and readiness
pub const DEFAULT_ADMIN_PORT: u16 = 16910;

/// Port of the seed's reversed proxy
pub const DEFAULT_PROXY_SEED_SERVER_PORT: u16 = 8443;

pub const WEBHOOK_NAME: &str = "apiserver-proxy.networking.gardener.cloud";

pub const DEFAULT_TIMINGS: WaitTimings = WaitTimings::new(
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(120),
);

const NAMESPACE: &str = "kube-system";
const CONFIG_MAP_NAME: &str = "apiserver-proxy-config";
const CONFIG_KEY: &str = "envoy.yaml";
const PSP_NAME: &str = "gardener.kube-system.apiserver-proxy";
const PSP_CLUSTER_ROLE_NAME: &str = "gardener.cloud:psp:kube-system:apiserver-proxy";
const PSP_ROLE_BINDING_NAME: &str = "gardener.cloud:psp:apiserver-proxy";
const ADMIN_SOCKET_DIR: &str = "/etc/admin-uds";
const CONFIG_DIR: &str = "/etc/apiserver-proxy";

const ENVOY_TEMPLATE: &str = include_str!("envoy.yaml.j2");

/// Configuration of the apiserver-proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Values {
    /// Envoy image
    pub proxy_image: String,
    /// Image of the sidecar that adds the advertised address to the node
    pub sidecar_image: String,
    /// Address the kube-apiserver is reachable at from inside the shoot
    pub advertise_ip_address: String,
    /// Host of the reversed proxy in the seed
    pub proxy_seed_server_host: String,
    pub proxy_seed_server_port: u16,
    pub admin_port: u16,
    /// Deploy the webhook that injects the apiserver host into pods
    pub pod_mutator_enabled: bool,
    pub psp_disabled: bool,
}

impl Default for Values {
    fn default() -> Self {
        Self {
            proxy_image: String::new(),
            sidecar_image: String::new(),
            advertise_ip_address: String::new(),
            proxy_seed_server_host: String::new(),
            proxy_seed_server_port: DEFAULT_PROXY_SEED_SERVER_PORT,
            admin_port: DEFAULT_ADMIN_PORT,
            pod_mutator_enabled: false,
            psp_disabled: false,
        }
    }
}

/// Variables of the Envoy configuration template
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvoyConfigContext<'a> {
    #[serde(rename = "advertiseIPAddress")]
    advertise_ip_address: &'a str,
    admin_port: u16,
    proxy_seed_server_host: &'a str,
    proxy_seed_server_port: u16,
}

/// Deployer of the apiserver-proxy
pub struct ApiserverProxy {
    client: Arc<dyn ObjectClient>,
    namespace: String,
    values: Values,
    engine: Engine,
    timings: WaitTimings,
}

impl ApiserverProxy {
    /// Create a deployer whose managed resource lives in `namespace`
    pub fn new(
        client: Arc<dyn ObjectClient>,
        namespace: impl Into<String>,
        values: Values,
    ) -> Result<Self> {
        let engine = Engine::builder().template(CONFIG_KEY, ENVOY_TEMPLATE).build()?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            values,
            engine,
            timings: DEFAULT_TIMINGS,
        })
    }

    pub fn with_timings(mut self, timings: WaitTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// The advertised address is only known once the load balancer exists
    pub fn set_advertise_ip_address(&mut self, address: impl Into<String>) {
        self.values.advertise_ip_address = address.into();
    }

    /// Render the Envoy configuration
    pub fn render_envoy_config(&self) -> Result<String> {
        let context = EnvoyConfigContext {
            advertise_ip_address: &self.values.advertise_ip_address,
            admin_port: self.values.admin_port,
            proxy_seed_server_host: &self.values.proxy_seed_server_host,
            proxy_seed_server_port: self.values.proxy_seed_server_port,
        };
        Ok(self.engine.render(CONFIG_KEY, &context)?)
    }

    /// Build all objects of the component
    pub fn build_registry(&self) -> Result<Registry> {
        if self.values.advertise_ip_address.is_empty() {
            return Err(KubeError::Precondition(
                "advertise IP address of apiserver-proxy is not set".to_string(),
            ));
        }
        if self.values.proxy_seed_server_host.is_empty() {
            return Err(KubeError::Precondition(
                "proxy seed server host of apiserver-proxy is not set".to_string(),
            ));
        }

        let config_map = self.config_map()?;
        let config_map_name = config_map.metadata.name.clone().unwrap_or_default();

        let mut registry = Registry::new();
        registry.add(&config_map)?;
        registry.add(&self.service_account())?;
        registry.add(&self.service())?;
        registry.add(&self.daemon_set(&config_map_name))?;

        registry.add_optional(
            self.values
                .pod_mutator_enabled
                .then(|| self.mutating_webhook_configuration())
                .as_ref(),
        )?;

        if !self.values.psp_disabled {
            registry.add(&self.psp_cluster_role())?;
            registry.add(&self.pod_security_policy())?;
            registry.add(&self.psp_role_binding())?;
        }

        Ok(registry)
    }

    fn config_map(&self) -> Result<ConfigMap> {
        let data = BTreeMap::from([(CONFIG_KEY.to_string(), self.render_envoy_config()?)]);
        let mut object_labels = selector_labels();
        object_labels.insert(
            resources::GARBAGE_COLLECTABLE_REFERENCE.to_string(),
            "true".to_string(),
        );

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(unique_name(CONFIG_MAP_NAME, &data)),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(object_labels),
                ..Default::default()
            },
            data: Some(data),
            immutable: Some(true),
            ..Default::default()
        })
    }

    fn service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some(NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(selector_labels()),
                ..Default::default()
            },
            automount_service_account_token: Some(false),
            ..Default::default()
        }
    }

    fn service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(selector_labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some("None".to_string()),
                selector: Some(selector_labels()),
                ports: Some(vec![ServicePort {
                    name: Some("metrics".to_string()),
                    port: i32::from(self.values.admin_port),
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(i32::from(self.values.admin_port))),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn daemon_set(&self, config_map_name: &str) -> DaemonSet {
        let annotations = BTreeMap::from([(
            reference_annotation_key("ConfigMap", config_map_name),
            config_map_name.to_string(),
        )]);

        let mut object_labels = selector_labels();
        object_labels.insert(
            labels::GARDEN_ROLE.to_string(),
            labels::GARDEN_ROLE_SYSTEM_COMPONENT.to_string(),
        );
        object_labels.insert("node.gardener.cloud/critical-component".to_string(), "true".to_string());

        let sidecar = |name: &str, daemon: bool| Container {
            name: name.to_string(),
            image: Some(self.values.sidecar_image.clone()),
            args: Some(vec![
                format!("--ip-address={}", self.values.advertise_ip_address),
                format!("--daemon={}", daemon),
                "--interface=lo".to_string(),
            ]),
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_ADMIN".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            resources: Some(requests("20m", "20Mi")),
            ..Default::default()
        };

        let proxy = Container {
            name: "proxy".to_string(),
            image: Some(self.values.proxy_image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(vec![
                "envoy".to_string(),
                "--concurrency".to_string(),
                "2".to_string(),
                "--use-dynamic-base-id".to_string(),
                "-c".to_string(),
                format!("{}/{}", CONFIG_DIR, CONFIG_KEY),
            ]),
            ports: Some(vec![ContainerPort {
                name: Some("metrics".to_string()),
                container_port: i32::from(self.values.admin_port),
                host_port: Some(i32::from(self.values.admin_port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/ready".to_string()),
                    port: IntOrString::Int(i32::from(self.values.admin_port)),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(1),
                period_seconds: Some(2),
                ..Default::default()
            }),
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_BIND_SERVICE".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            resources: Some(requests("20m", "20Mi")),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: "proxy-config".to_string(),
                    mount_path: CONFIG_DIR.to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    name: "admin-uds".to_string(),
                    mount_path: ADMIN_SOCKET_DIR.to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        DaemonSet {
            metadata: ObjectMeta {
                name: Some(NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(object_labels.clone()),
                annotations: Some(annotations.clone()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                revision_history_limit: Some(2),
                selector: LabelSelector {
                    match_labels: Some(selector_labels()),
                    ..Default::default()
                },
                update_strategy: Some(DaemonSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(object_labels),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(NAME.to_string()),
                        automount_service_account_token: Some(false),
                        priority_class_name: Some("system-node-critical".to_string()),
                        host_network: Some(true),
                        tolerations: Some(vec![
                            Toleration {
                                effect: Some("NoSchedule".to_string()),
                                operator: Some("Exists".to_string()),
                                ..Default::default()
                            },
                            Toleration {
                                effect: Some("NoExecute".to_string()),
                                operator: Some("Exists".to_string()),
                                ..Default::default()
                            },
                        ]),
                        init_containers: Some(vec![sidecar("setup", false)]),
                        containers: vec![sidecar("sidecar", true), proxy],
                        volumes: Some(vec![
                            Volume {
                                name: "proxy-config".to_string(),
                                config_map: Some(ConfigMapVolumeSource {
                                    name: config_map_name.to_string(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                            Volume {
                                name: "admin-uds".to_string(),
                                empty_dir: Some(EmptyDirVolumeSource::default()),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn mutating_webhook_configuration(&self) -> MutatingWebhookConfiguration {
        let not_in = |key: &str, values: &[&str]| LabelSelectorRequirement {
            key: key.to_string(),
            operator: "NotIn".to_string(),
            values: Some(values.iter().map(|v| v.to_string()).collect()),
        };

        MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(WEBHOOK_NAME.to_string()),
                labels: Some(selector_labels()),
                ..Default::default()
            },
            webhooks: Some(vec![MutatingWebhook {
                name: WEBHOOK_NAME.to_string(),
                admission_review_versions: vec!["v1beta1".to_string(), "v1".to_string()],
                client_config: WebhookClientConfig {
                    url: Some(format!(
                        "https://{}:{}/webhooks/pod-apiserver-env",
                        self.values.proxy_seed_server_host, self.values.proxy_seed_server_port
                    )),
                    ..Default::default()
                },
                failure_policy: Some("Ignore".to_string()),
                match_policy: Some("Exact".to_string()),
                reinvocation_policy: Some("IfNeeded".to_string()),
                side_effects: "None".to_string(),
                timeout_seconds: Some(2),
                namespace_selector: Some(LabelSelector {
                    match_expressions: Some(vec![not_in(
                        "apiserver-proxy.networking.gardener.cloud/inject",
                        &["disable"],
                    )]),
                    ..Default::default()
                }),
                object_selector: Some(LabelSelector {
                    match_expressions: Some(vec![not_in(
                        "apiserver-proxy.networking.gardener.cloud/inject",
                        &["disable"],
                    )]),
                    ..Default::default()
                }),
                rules: Some(vec![RuleWithOperations {
                    api_groups: Some(vec![String::new()]),
                    api_versions: Some(vec!["v1".to_string()]),
                    operations: Some(vec!["CREATE".to_string()]),
                    resources: Some(vec!["pods".to_string()]),
                    scope: Some("*".to_string()),
                }]),
                ..Default::default()
            }]),
        }
    }

    fn psp_cluster_role(&self) -> ClusterRole {
        ClusterRole {
            metadata: ObjectMeta {
                name: Some(PSP_CLUSTER_ROLE_NAME.to_string()),
                labels: Some(selector_labels()),
                ..Default::default()
            },
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec!["policy".to_string(), "extensions".to_string()]),
                resources: Some(vec!["podsecuritypolicies".to_string()]),
                resource_names: Some(vec![PSP_NAME.to_string()]),
                verbs: vec!["use".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    /// PodSecurityPolicy is gone from current API versions, so it is built untyped
    fn pod_security_policy(&self) -> Value {
        let admin_port = self.values.admin_port;
        json!({
            "apiVersion": "policy/v1beta1",
            "kind": "PodSecurityPolicy",
            "metadata": {
                "name": PSP_NAME,
                "labels": selector_labels(),
                "annotations": {
                    "seccomp.security.alpha.kubernetes.io/allowedProfileNames": "runtime/default",
                    "seccomp.security.alpha.kubernetes.io/defaultProfileName": "runtime/default"
                }
            },
            "spec": {
                "privileged": false,
                "allowPrivilegeEscalation": true,
                "allowedCapabilities": ["NET_ADMIN", "NET_BIND_SERVICE"],
                "volumes": ["secret", "configMap", "emptyDir"],
                "hostNetwork": true,
                "hostPorts": [
                    {"min": admin_port, "max": admin_port},
                    {"min": 443, "max": 443}
                ],
                "runAsUser": {"rule": "RunAsAny"},
                "seLinux": {"rule": "RunAsAny"},
                "supplementalGroups": {"rule": "RunAsAny"},
                "fsGroup": {"rule": "RunAsAny"},
                "readOnlyRootFilesystem": false
            }
        })
    }

    fn psp_role_binding(&self) -> RoleBinding {
        RoleBinding {
            metadata: ObjectMeta {
                name: Some(PSP_ROLE_BINDING_NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(selector_labels()),
                annotations: Some(BTreeMap::from([(
                    resources::DELETE_ON_INVALID_UPDATE.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: PSP_CLUSTER_ROLE_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: NAME.to_string(),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            }]),
        }
    }
}

fn selector_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::APP.to_string(), "kubernetes".to_string()),
        (labels::ROLE.to_string(), NAME.to_string()),
    ])
}

fn requests(cpu: &str, memory: &str) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])),
        ..Default::default()
    }
}

#[async_trait]
impl Deployer for ApiserverProxy {
    async fn deploy(&self) -> Result<()> {
        let registry = self.build_registry()?;
        managed_resource::create_for_shoot(
            &*self.client,
            &self.namespace,
            MANAGED_RESOURCE_NAME,
            false,
            &registry,
        )
        .await?;
        info!(namespace = %self.namespace, objects = registry.len(), "Deployed apiserver-proxy");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        managed_resource::delete(&*self.client, &self.namespace, MANAGED_RESOURCE_NAME).await
    }
}

#[async_trait]
impl Waiter for ApiserverProxy {
    async fn wait(&self) -> Result<()> {
        managed_resource::wait_until_healthy(
            &*self.client,
            &self.namespace,
            MANAGED_RESOURCE_NAME,
            &self.timings,
        )
        .await
    }

    async fn wait_cleanup(&self) -> Result<()> {
        managed_resource::wait_until_deleted(
            &*self.client,
            &self.namespace,
            MANAGED_RESOURCE_NAME,
            &self.timings,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gardenlet_kube::MockObjectClient;

    fn values() -> Values {
        Values {
            proxy_image: "envoyproxy/envoy:v1.31".to_string(),
            sidecar_image: "apiserver-proxy-sidecar:v0.1".to_string(),
            advertise_ip_address: "10.96.0.2".to_string(),
            proxy_seed_server_host: "api.foo.bar.example.com".to_string(),
            ..Default::default()
        }
    }

    fn proxy(values: Values) -> ApiserverProxy {
        ApiserverProxy::new(Arc::new(MockObjectClient::new()), "shoot--foo--bar", values).unwrap()
    }

    #[test]
    fn test_envoy_config_variables() {
        let config = proxy(values()).render_envoy_config().unwrap();
        assert!(config.contains("address: 10.96.0.2\n"));
        assert!(config.contains("port_value: 16910\n"));
        assert!(config.contains("address: api.foo.bar.example.com\n"));
        assert!(config.contains("port_value: 8443\n"));
        assert!(config.ends_with("path: /etc/admin-uds/admin.socket\n"));
    }

    #[test]
    fn test_minimal_object_set() {
        let registry = proxy(Values {
            pod_mutator_enabled: false,
            psp_disabled: true,
            ..values()
        })
        .build_registry()
        .unwrap();

        let names: Vec<_> = registry.filenames().collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"daemonset__kube-system__apiserver-proxy.yaml"));
        assert!(!names.iter().any(|n| n.starts_with("podsecuritypolicy")));
    }

    #[test]
    fn test_config_map_name_follows_content() {
        let a = proxy(values()).build_registry().unwrap();
        let b = proxy(Values {
            advertise_ip_address: "10.96.0.3".to_string(),
            ..values()
        })
        .build_registry()
        .unwrap();

        let config_map = |r: &Registry| {
            r.filenames()
                .find(|n| n.starts_with("configmap__"))
                .map(str::to_string)
                .unwrap()
        };
        assert_ne!(config_map(&a), config_map(&b));
    }

    #[test]
    fn test_missing_advertise_address() {
        let err = proxy(Values {
            advertise_ip_address: String::new(),
            ..values()
        })
        .build_registry()
        .unwrap_err();
        assert!(matches!(err, KubeError::Precondition(_)));
    }

    #[test]
    fn test_missing_seed_server_host() {
        let err = proxy(Values {
            proxy_seed_server_host: String::new(),
            pod_mutator_enabled: true,
            ..values()
        })
        .build_registry()
        .unwrap_err();
        assert!(matches!(err, KubeError::Precondition(ref msg) if msg.contains("seed server host")));
    }
}
