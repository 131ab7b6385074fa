//! kube-state-metrics for a control plane namespace
//!
//! Deployed into the seed as a managed resource of class `seed`. The
//! component also renders the Prometheus scrape configuration and alerting
//! rules the monitoring stack picks up for it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gardenlet_core::annotations::labels;
use gardenlet_core::{Registry, WaitTimings};
use gardenlet_engine::Engine;
use gardenlet_kube::{Deployer, ObjectClient, Result, Waiter, managed_resource};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

pub const NAME: &str = "kube-state-metrics";

pub const MANAGED_RESOURCE_NAME: &str = "kube-state-metrics";

pub const DEFAULT_TIMINGS: WaitTimings = WaitTimings::new(
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(120),
);

const CLUSTER_ROLE_NAME: &str = "gardener.cloud:monitoring:kube-state-metrics";
const PORT: i32 = 8080;
const TELEMETRY_PORT: i32 = 8081;
const SERVICE_PORT: i32 = 80;
const PORT_NAME: &str = "metrics";

const SCRAPE_CONFIG_TEMPLATE: &str = "scrape_config.yaml";
const ALERTING_RULES_TEMPLATE: &str = "alerting_rules.yaml";

/// Metrics kept by the scrape job
pub const ALLOWED_METRICS: &[&str] = &[
    "kube_daemonset_metadata_generation",
    "kube_daemonset_status_current_number_scheduled",
    "kube_daemonset_status_desired_number_scheduled",
    "kube_daemonset_status_number_available",
    "kube_daemonset_status_number_unavailable",
    "kube_daemonset_status_updated_number_scheduled",
    "kube_deployment_metadata_generation",
    "kube_deployment_spec_replicas",
    "kube_deployment_status_observed_generation",
    "kube_deployment_status_replicas",
    "kube_deployment_status_replicas_available",
    "kube_deployment_status_replicas_unavailable",
    "kube_deployment_status_replicas_updated",
    "kube_pod_container_info",
    "kube_pod_container_resource_limits",
    "kube_pod_container_resource_requests",
    "kube_pod_container_status_restarts_total",
    "kube_pod_info",
    "kube_pod_labels",
    "kube_pod_status_phase",
    "kube_pod_status_ready",
    "kube_replicaset_owner",
    "kube_statefulset_metadata_generation",
    "kube_statefulset_replicas",
    "kube_statefulset_status_observed_generation",
    "kube_statefulset_status_replicas",
    "kube_statefulset_status_replicas_current",
    "kube_statefulset_status_replicas_ready",
    "kube_statefulset_status_replicas_updated",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Values {
    pub image: String,
    pub replicas: i32,
    /// Labels attached to every scraped series and every alert
    pub monitoring_labels: BTreeMap<String, String>,
}

impl Default for Values {
    fn default() -> Self {
        Self {
            image: String::new(),
            replicas: 1,
            monitoring_labels: BTreeMap::from([
                ("service".to_string(), NAME.to_string()),
                ("type".to_string(), "seed".to_string()),
                ("visibility".to_string(), "operator".to_string()),
            ]),
        }
    }
}

#[derive(Debug, Serialize)]
struct MonitoringContext<'a> {
    job: &'a str,
    service: &'a str,
    port_name: &'a str,
    namespace: &'a str,
    metrics: &'a [&'a str],
    labels: &'a BTreeMap<String, String>,
}

pub struct KubeStateMetrics {
    client: Arc<dyn ObjectClient>,
    namespace: String,
    values: Values,
    engine: Engine,
    timings: WaitTimings,
}

impl KubeStateMetrics {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        namespace: impl Into<String>,
        values: Values,
    ) -> Result<Self> {
        let engine = Engine::builder()
            .template(SCRAPE_CONFIG_TEMPLATE, include_str!("scrape_config.yaml.j2"))
            .template(ALERTING_RULES_TEMPLATE, include_str!("alerting_rules.yaml.j2"))
            .build()?;
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

    /// Prometheus scrape configuration
    pub fn scrape_configs(&self) -> Result<String> {
        Ok(self
            .engine
            .render(SCRAPE_CONFIG_TEMPLATE, self.monitoring_context())?)
    }

    /// Prometheus alerting rules
    pub fn alerting_rules(&self) -> Result<String> {
        Ok(self
            .engine
            .render(ALERTING_RULES_TEMPLATE, self.monitoring_context())?)
    }

    fn monitoring_context(&self) -> MonitoringContext<'_> {
        MonitoringContext {
            job: NAME,
            service: NAME,
            port_name: PORT_NAME,
            namespace: &self.namespace,
            metrics: ALLOWED_METRICS,
            labels: &self.values.monitoring_labels,
        }
    }

    pub fn build_registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        registry.add(&self.service_account())?;
        registry.add(&self.cluster_role())?;
        registry.add(&self.cluster_role_binding())?;
        registry.add(&self.service())?;
        registry.add(&self.deployment())?;
        registry.add(&self.vertical_pod_autoscaler())?;
        registry.add(&self.network_policy())?;
        Ok(registry)
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(selector_labels()),
            ..Default::default()
        }
    }

    fn service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(NAME),
            automount_service_account_token: Some(false),
            ..Default::default()
        }
    }

    fn cluster_role(&self) -> ClusterRole {
        let list_watch = |group: &str, resources: &[&str]| PolicyRule {
            api_groups: Some(vec![group.to_string()]),
            resources: Some(resources.iter().map(|r| r.to_string()).collect()),
            verbs: vec!["list".to_string(), "watch".to_string()],
            ..Default::default()
        };

        ClusterRole {
            metadata: ObjectMeta {
                name: Some(CLUSTER_ROLE_NAME.to_string()),
                labels: Some(selector_labels()),
                ..Default::default()
            },
            rules: Some(vec![
                list_watch(
                    "",
                    &[
                        "nodes",
                        "pods",
                        "services",
                        "resourcequotas",
                        "replicationcontrollers",
                        "limitranges",
                        "persistentvolumeclaims",
                        "namespaces",
                    ],
                ),
                list_watch("apps", &["deployments", "daemonsets", "statefulsets", "replicasets"]),
                list_watch("batch", &["cronjobs", "jobs"]),
                list_watch("autoscaling", &["horizontalpodautoscalers"]),
                list_watch("policy", &["poddisruptionbudgets"]),
            ]),
            ..Default::default()
        }
    }

    fn cluster_role_binding(&self) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(CLUSTER_ROLE_NAME.to_string()),
                labels: Some(selector_labels()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: CLUSTER_ROLE_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: NAME.to_string(),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            }]),
        }
    }

    fn service(&self) -> Service {
        Service {
            metadata: self.metadata(NAME),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels()),
                ports: Some(vec![ServicePort {
                    name: Some(PORT_NAME.to_string()),
                    port: SERVICE_PORT,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn deployment(&self) -> Deployment {
        let mut object_labels = selector_labels();
        object_labels.insert(
            labels::GARDEN_ROLE.to_string(),
            labels::GARDEN_ROLE_MONITORING.to_string(),
        );

        let probe = |path: &str, port: i32| Probe {
            http_get: Some(HTTPGetAction {
                path: Some(path.to_string()),
                port: IntOrString::Int(port),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            timeout_seconds: Some(5),
            ..Default::default()
        };

        Deployment {
            metadata: ObjectMeta {
                labels: Some(object_labels.clone()),
                ..self.metadata(NAME)
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.values.replicas),
                revision_history_limit: Some(2),
                selector: LabelSelector {
                    match_labels: Some(selector_labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(object_labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(NAME.to_string()),
                        automount_service_account_token: Some(true),
                        priority_class_name: Some("gardener-system-100".to_string()),
                        containers: vec![Container {
                            name: NAME.to_string(),
                            image: Some(self.values.image.clone()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            args: Some(vec![
                                format!("--port={}", PORT),
                                format!("--telemetry-port={}", TELEMETRY_PORT),
                                format!("--namespaces={}", self.namespace),
                                "--resources=deployments,pods,statefulsets,daemonsets,replicasets,persistentvolumeclaims,horizontalpodautoscalers".to_string(),
                            ]),
                            ports: Some(vec![ContainerPort {
                                name: Some(PORT_NAME.to_string()),
                                container_port: PORT,
                                protocol: Some("TCP".to_string()),
                                ..Default::default()
                            }]),
                            liveness_probe: Some(probe("/healthz", PORT)),
                            readiness_probe: Some(probe("/", TELEMETRY_PORT)),
                            resources: Some(ResourceRequirements {
                                requests: Some(BTreeMap::from([
                                    ("cpu".to_string(), Quantity("10m".to_string())),
                                    ("memory".to_string(), Quantity("32Mi".to_string())),
                                ])),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn vertical_pod_autoscaler(&self) -> Value {
        json!({
            "apiVersion": "autoscaling.k8s.io/v1",
            "kind": "VerticalPodAutoscaler",
            "metadata": {
                "name": format!("{}-vpa", NAME),
                "namespace": self.namespace,
                "labels": selector_labels(),
            },
            "spec": {
                "targetRef": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": NAME,
                },
                "updatePolicy": {"updateMode": "Auto"},
                "resourcePolicy": {
                    "containerPolicies": [{
                        "containerName": "*",
                        "minAllowed": {"memory": "32Mi"},
                        "controlledValues": "RequestsOnly",
                    }],
                },
            },
        })
    }

    /// Only Prometheus may scrape the metrics port
    fn network_policy(&self) -> Value {
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "NetworkPolicy",
            "metadata": {
                "name": NAME,
                "namespace": self.namespace,
                "labels": selector_labels(),
            },
            "spec": {
                "podSelector": {"matchLabels": selector_labels()},
                "policyTypes": ["Ingress"],
                "ingress": [{
                    "from": [{
                        "podSelector": {
                            "matchLabels": {
                                "app": "prometheus",
                                "role": "monitoring",
                            },
                        },
                    }],
                    "ports": [{"protocol": "TCP", "port": PORT}],
                }],
            },
        })
    }
}

fn selector_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("component".to_string(), NAME.to_string()),
        (labels::ROLE.to_string(), "monitoring".to_string()),
    ])
}

#[async_trait]
impl Deployer for KubeStateMetrics {
    async fn deploy(&self) -> Result<()> {
        let registry = self.build_registry()?;
        managed_resource::create_for_seed(
            &*self.client,
            &self.namespace,
            MANAGED_RESOURCE_NAME,
            false,
            &registry,
        )
        .await?;
        info!(namespace = %self.namespace, "Deployed kube-state-metrics");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        managed_resource::delete(&*self.client, &self.namespace, MANAGED_RESOURCE_NAME).await
    }
}

#[async_trait]
impl Waiter for KubeStateMetrics {
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
