//! Integration tests for component deployers against the in-memory client

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use gardenlet_core::annotations::gardener;
use gardenlet_core::{ObjectKey, WaitTimings};
use gardenlet_kube::object::annotation;
use gardenlet_kube::{Deployer, MockObjectClient, ObjectClient, Waiter};
use serde_json::{Value, json};

/// Timings short enough to keep timeouts fast
fn fast_timings() -> WaitTimings {
    WaitTimings::new(
        Duration::from_millis(10),
        Duration::from_millis(50),
        Duration::from_millis(500),
    )
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
}

fn mock() -> (MockObjectClient, Arc<dyn ObjectClient>) {
    let client = MockObjectClient::new();
    let shared: Arc<dyn ObjectClient> = Arc::new(client.clone());
    (client, shared)
}

/// Controller reaction: pick up the pending operation and report `status`
fn complete_operation(client: &MockObjectClient, key: &ObjectKey, status: Value) {
    client.push_reaction(key, move |object| {
        if let Some(annotations) = object.metadata.annotations.as_mut() {
            annotations.remove(gardener::OPERATION);
        }
        object.data["status"] = status.clone();
    });
}

mod apiserver_proxy {
    use super::*;
    use gardenlet_components::apiserver_proxy::{self, ApiserverProxy, Values};
    use gardenlet_core::annotations::reference_annotation_key;
    use gardenlet_core::unique_name;
    use gardenlet_kube::managed_resource::{self, decode_bundle};

    fn values() -> Values {
        Values {
            proxy_image: "envoyproxy/envoy:v1.31".to_string(),
            sidecar_image: "apiserver-proxy-sidecar:v0.1".to_string(),
            advertise_ip_address: "10.96.0.2".to_string(),
            proxy_seed_server_host: "api.foo.bar.example.com".to_string(),
            pod_mutator_enabled: true,
            psp_disabled: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_object_set() {
        let (_, client) = mock();
        let proxy = ApiserverProxy::new(client, "shoot--foo--bar", values()).unwrap();
        let registry = proxy.build_registry().unwrap();

        let config = proxy.render_envoy_config().unwrap();
        let config_map_name = unique_name(
            "apiserver-proxy-config",
            &BTreeMap::from([("envoy.yaml".to_string(), config)]),
        );

        let names: Vec<String> = registry.filenames().map(str::to_string).collect();
        assert_eq!(
            names,
            vec![
                "clusterrole____gardener.cloud_psp_kube-system_apiserver-proxy.yaml".to_string(),
                format!("configmap__kube-system__{}.yaml", config_map_name),
                "daemonset__kube-system__apiserver-proxy.yaml".to_string(),
                "mutatingwebhookconfiguration____apiserver-proxy.networking.gardener.cloud.yaml"
                    .to_string(),
                "podsecuritypolicy____gardener.kube-system.apiserver-proxy.yaml".to_string(),
                "rolebinding__kube-system__gardener.cloud_psp_apiserver-proxy.yaml".to_string(),
                "service__kube-system__apiserver-proxy.yaml".to_string(),
                "serviceaccount__kube-system__apiserver-proxy.yaml".to_string(),
            ]
        );

        let objects = registry.serialized_objects();
        let daemon_set = &objects["daemonset__kube-system__apiserver-proxy.yaml"];
        assert!(daemon_set.contains(&reference_annotation_key("ConfigMap", &config_map_name)));
        assert!(daemon_set.contains(&format!("name: {}", config_map_name)));

        let config_map = &objects[&format!("configmap__kube-system__{}.yaml", config_map_name)];
        assert!(config_map.contains("immutable: true"));
        assert!(config_map.contains("resources.gardener.cloud/garbage-collectable-reference: 'true'"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let (_, client) = mock();
        let a = ApiserverProxy::new(client.clone(), "shoot--foo--bar", values())
            .unwrap()
            .build_registry()
            .unwrap();
        let b = ApiserverProxy::new(client, "shoot--foo--bar", values())
            .unwrap()
            .build_registry()
            .unwrap();
        assert_eq!(a.serialized_objects(), b.serialized_objects());
    }

    #[tokio::test]
    async fn test_deploy_wait_destroy() {
        let (mock, client) = mock();
        let proxy = ApiserverProxy::new(client, "shoot--foo--bar", values())
            .unwrap()
            .with_timings(fast_timings());

        proxy.deploy().await.unwrap();

        let secret = mock
            .object(&managed_resource::secret_key(
                "shoot--foo--bar",
                apiserver_proxy::MANAGED_RESOURCE_NAME,
            ))
            .unwrap();
        assert_eq!(
            decode_bundle(&secret).unwrap(),
            proxy.build_registry().unwrap().serialized_objects()
        );

        let key = managed_resource::managed_resource_key(
            "shoot--foo--bar",
            apiserver_proxy::MANAGED_RESOURCE_NAME,
        );
        let mr = mock.object(&key).unwrap();
        assert_eq!(
            mr.data["spec"]["injectLabels"],
            json!({"shoot.gardener.cloud/no-cleanup": "true"})
        );

        mock.push_status(
            &key,
            json!({
                "observedGeneration": 1,
                "conditions": [
                    {"type": "ResourcesApplied", "status": "True"},
                    {"type": "ResourcesHealthy", "status": "True"}
                ]
            }),
        );
        proxy.wait().await.unwrap();

        proxy.destroy().await.unwrap();
        assert!(mock.keys().is_empty());
        proxy.wait_cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_reports_unhealthy_condition() {
        let (mock, client) = mock();
        let proxy = ApiserverProxy::new(client, "shoot--foo--bar", values())
            .unwrap()
            .with_timings(fast_timings());
        proxy.deploy().await.unwrap();

        let key = managed_resource::managed_resource_key(
            "shoot--foo--bar",
            apiserver_proxy::MANAGED_RESOURCE_NAME,
        );
        mock.set_status(
            &key,
            json!({
                "observedGeneration": 1,
                "conditions": [
                    {"type": "ResourcesApplied", "status": "True"},
                    {
                        "type": "ResourcesHealthy",
                        "status": "False",
                        "reason": "DaemonSetUnhealthy",
                        "message": "DaemonSet kube-system/apiserver-proxy is unhealthy"
                    }
                ]
            }),
        )
        .unwrap();

        let err = proxy.wait().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("DaemonSetUnhealthy"));
    }
}

mod infrastructure {
    use super::*;
    use gardenlet_components::infrastructure::{Infrastructure, Values};
    use gardenlet_core::{ExtensionResourceState, ShootState};
    use gardenlet_kube::component::{deploy_and_wait, migrate_and_wait};
    use gardenlet_kube::{ExtensionPhase, KubeError, MigrateWaiter, Migrator};

    fn infrastructure(client: Arc<dyn ObjectClient>) -> Infrastructure {
        Infrastructure::new(
            client,
            Values {
                namespace: "shoot--foo--bar".to_string(),
                name: "bar".to_string(),
                type_: "local".to_string(),
                region: "local".to_string(),
                provider_config: Some(json!({"apiVersion": "local.provider.extensions.gardener.cloud/v1alpha1"})),
                annotate_operation: false,
            },
        )
        .with_timings(fast_timings())
        .with_clock(fixed_now)
    }

    fn succeeded(observed_generation: i64) -> Value {
        json!({
            "observedGeneration": observed_generation,
            "lastOperation": {"type": "Reconcile", "state": "Succeeded"},
            "providerStatus": {"vpc": {"id": "vpc-1234"}},
            "nodesCIDR": "10.250.0.0/16"
        })
    }

    #[tokio::test]
    async fn test_deploy_annotates_new_object() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();

        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(annotation(&object, gardener::OPERATION), Some("reconcile"));
        assert_eq!(
            annotation(&object, gardener::TIMESTAMP),
            Some("2024-05-06T07:08:09Z")
        );
        assert_eq!(object.data["spec"]["secretRef"]["name"], "cloudprovider");
        assert_eq!(ExtensionPhase::observe(Some(&object)), ExtensionPhase::Creating);
    }

    #[tokio::test]
    async fn test_redeploy_leaves_operation_alone() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();

        mock.insert({
            let mut object = mock.object(&infra.key()).unwrap();
            object.metadata.annotations = None;
            object
        })
        .unwrap();

        infra.deploy().await.unwrap();
        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(annotation(&object, gardener::OPERATION), None);
    }

    #[tokio::test]
    async fn test_redeploy_after_error_requests_reconcile() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();

        complete_operation(
            &mock,
            &infra.key(),
            json!({
                "observedGeneration": 1,
                "lastOperation": {"type": "Reconcile", "state": "Error"},
                "lastError": {"description": "boom"}
            }),
        );
        assert!(infra.wait().await.is_err());
        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(annotation(&object, gardener::OPERATION), None);
        assert_eq!(ExtensionPhase::observe(Some(&object)), ExtensionPhase::Failed);

        infra.deploy().await.unwrap();
        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(annotation(&object, gardener::OPERATION), Some("reconcile"));

        complete_operation(&mock, &infra.key(), succeeded(1));
        infra.wait().await.unwrap();
        assert_eq!(infra.nodes_cidr().as_deref(), Some("10.250.0.0/16"));
    }

    #[tokio::test]
    async fn test_wait_polls_until_generation_observed() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();
        assert_eq!(mock.object(&infra.key()).unwrap().metadata.generation, Some(1));

        mock.push_status(&infra.key(), json!({"observedGeneration": 0}));
        complete_operation(&mock, &infra.key(), succeeded(1));
        mock.reset_counts();

        infra.wait().await.unwrap();

        assert_eq!(mock.operation_counts().gets, 2);
        assert_eq!(infra.provider_status(), Some(json!({"vpc": {"id": "vpc-1234"}})));
        assert_eq!(infra.nodes_cidr().as_deref(), Some("10.250.0.0/16"));
    }

    #[tokio::test]
    async fn test_wait_surfaces_last_error() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();

        complete_operation(
            &mock,
            &infra.key(),
            json!({
                "observedGeneration": 1,
                "lastOperation": {"type": "Reconcile", "state": "Error"},
                "lastError": {"description": "VPC quota exceeded", "codes": ["ERR_INFRA_QUOTA_EXCEEDED"]}
            }),
        );

        let err = infra.wait().await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("VPC quota exceeded"), "{}", err);
        assert_eq!(infra.provider_status(), None);
    }

    #[tokio::test]
    async fn test_wait_on_missing_object_times_out() {
        let (_, client) = mock();
        let err = infrastructure(client).wait().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_wait_cleanup_never_created() {
        let (mock, client) = mock();
        infrastructure(client).wait_cleanup().await.unwrap();
        assert_eq!(mock.operation_counts().gets, 1);
    }

    #[tokio::test]
    async fn test_destroy_then_wait_cleanup_times_out() {
        let (mock, client) = mock();
        let infra = infrastructure(client);

        let mut object = infra.object().unwrap();
        object.metadata.finalizers = Some(vec!["extensions.gardener.cloud/local".to_string()]);
        mock.insert(object).unwrap();

        infra.destroy().await.unwrap();
        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(
            annotation(&object, gardener::CONFIRMATION_DELETION),
            Some("true")
        );
        assert_eq!(ExtensionPhase::observe(Some(&object)), ExtensionPhase::Deleting);

        let err = infra.wait_cleanup().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("still present"), "{}", err);
    }

    #[tokio::test]
    async fn test_destroy_then_wait_cleanup_after_finalizer_release() {
        let (mock, client) = mock();
        let infra = infrastructure(client);

        let mut object = infra.object().unwrap();
        object.metadata.finalizers = Some(vec!["extensions.gardener.cloud/local".to_string()]);
        mock.insert(object).unwrap();

        infra.destroy().await.unwrap();
        mock.push_status(&infra.key(), json!({"lastOperation": {"type": "Delete", "state": "Processing"}}));
        mock.push_removal(&infra.key());

        infra.wait_cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_migrate_and_wait() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();

        complete_operation(
            &mock,
            &infra.key(),
            json!({
                "observedGeneration": 1,
                "lastOperation": {"type": "Migrate", "state": "Succeeded"}
            }),
        );
        migrate_and_wait(&infra).await.unwrap();

        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(ExtensionPhase::observe(Some(&object)), ExtensionPhase::Migrated);
    }

    #[tokio::test]
    async fn test_wait_migrate_reports_error() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();
        infra.migrate().await.unwrap();

        mock.set_status(
            &infra.key(),
            json!({
                "lastOperation": {"type": "Migrate", "state": "Error"},
                "lastError": {"description": "cannot detach network"}
            }),
        )
        .unwrap();

        let err = infra.wait_migrate().await.unwrap_err();
        assert!(err.to_string().contains("cannot detach network"));
    }

    #[tokio::test]
    async fn test_restore_pushes_state() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        let shoot_state = ShootState {
            extensions: vec![ExtensionResourceState {
                kind: "Infrastructure".to_string(),
                name: Some("bar".to_string()),
                purpose: None,
                state: Some(json!({"vpcID": "vpc-1234"})),
                resources: vec![],
            }],
        };

        infra.restore(&shoot_state).await.unwrap();

        let object = mock.object(&infra.key()).unwrap();
        assert_eq!(object.data["status"]["state"], json!({"vpcID": "vpc-1234"}));
        assert_eq!(annotation(&object, gardener::OPERATION), Some("restore"));
        assert_eq!(ExtensionPhase::observe(Some(&object)), ExtensionPhase::Restoring);

        complete_operation(&mock, &infra.key(), succeeded(1));
        deploy_and_wait(&infra).await.unwrap();
    }

    #[tokio::test]
    async fn test_severe_error_is_wrapped() {
        let (mock, client) = mock();
        let infra = infrastructure(client);
        infra.deploy().await.unwrap();
        mock.set_status(
            &infra.key(),
            json!({
                "observedGeneration": 1,
                "lastError": {"description": "invalid credentials"}
            }),
        )
        .unwrap();

        match infra.wait().await.unwrap_err() {
            KubeError::WaitFailed { operation, source } => {
                assert!(operation.contains("Infrastructure shoot--foo--bar/bar"));
                assert!(source.is_retriable());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

mod backup_entry {
    use super::*;
    use gardenlet_components::backup_entry::{self, BackupEntry, BackupEntrySpec, SecretReference, Values};

    fn entry(client: Arc<dyn ObjectClient>) -> BackupEntry {
        BackupEntry::new(
            client,
            Values {
                name: "shoot--foo--bar--0c9b1a4e".to_string(),
                spec: BackupEntrySpec {
                    type_: "local".to_string(),
                    region: "local".to_string(),
                    bucket_name: "bucket-1234".to_string(),
                    secret_ref: SecretReference {
                        name: "backup-secret".to_string(),
                        namespace: "garden".to_string(),
                    },
                    provider_config: None,
                },
            },
        )
        .with_timings(fast_timings())
        .with_clock(fixed_now)
    }

    #[tokio::test]
    async fn test_cluster_scoped_object() {
        let (mock, client) = mock();
        let entry = entry(client);
        entry.deploy().await.unwrap();

        let key = entry.key();
        assert_eq!(key.namespace, None);
        assert_eq!(key.kind, backup_entry::KIND);

        let object = mock.object(&key).unwrap();
        assert_eq!(object.metadata.namespace, None);
        assert_eq!(object.data["spec"]["bucketName"], "bucket-1234");
        assert_eq!(annotation(&object, gardener::OPERATION), Some("reconcile"));
    }

    #[tokio::test]
    async fn test_deploy_and_wait() {
        let (mock, client) = mock();
        let entry = entry(client);
        entry.deploy().await.unwrap();

        complete_operation(
            &mock,
            &entry.key(),
            json!({
                "observedGeneration": 1,
                "lastOperation": {"type": "Reconcile", "state": "Succeeded"}
            }),
        );
        entry.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_without_finalizers() {
        let (mock, client) = mock();
        let entry = entry(client);
        entry.deploy().await.unwrap();

        entry.destroy().await.unwrap();
        assert!(mock.object(&entry.key()).is_none());
        entry.wait_cleanup().await.unwrap();
    }
}

mod dns {
    use super::*;
    use gardenlet_components::dns::{
        DnsEntry, DnsEntrySpec, DnsOwner, DnsOwnerSpec, DnsProvider, DnsProviderSpec, DnsSelection,
        EntryValues, OwnerValues, ProviderValues, SecretReference,
    };

    fn entry(client: Arc<dyn ObjectClient>) -> DnsEntry {
        DnsEntry::new(
            client,
            "shoot--foo--bar",
            EntryValues {
                name: "external".to_string(),
                class: Some("garden".to_string()),
                spec: DnsEntrySpec {
                    dns_name: "api.foo.bar.example.com".to_string(),
                    ttl: Some(120),
                    targets: vec!["1.2.3.4".to_string()],
                    owner_id: Some("shoot--foo--bar-owner".to_string()),
                },
            },
        )
        .with_timings(fast_timings())
    }

    #[tokio::test]
    async fn test_entry_object() {
        let (mock, client) = mock();
        let entry = entry(client);
        entry.deploy().await.unwrap();

        let object = mock.object(&entry.key()).unwrap();
        assert_eq!(
            object.data["spec"],
            json!({
                "dnsName": "api.foo.bar.example.com",
                "ttl": 120,
                "targets": ["1.2.3.4"],
                "ownerId": "shoot--foo--bar-owner"
            })
        );
        assert_eq!(annotation(&object, "dns.gardener.cloud/class"), Some("garden"));
    }

    #[tokio::test]
    async fn test_entry_wait() {
        let (mock, client) = mock();
        let entry = entry(client);
        entry.deploy().await.unwrap();

        mock.push_status(&entry.key(), json!({"observedGeneration": 1, "state": "Pending"}));
        mock.push_status(&entry.key(), json!({"observedGeneration": 1, "state": "Ready"}));
        entry.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_error_state() {
        let (mock, client) = mock();
        let entry = entry(client);
        entry.deploy().await.unwrap();

        mock.set_status(
            &entry.key(),
            json!({
                "observedGeneration": 1,
                "state": "Error",
                "message": "no provider found for api.foo.bar.example.com"
            }),
        )
        .unwrap();

        let err = entry.wait().await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("no provider found"));
    }

    #[tokio::test]
    async fn test_provider_wait() {
        let (mock, client) = mock();
        let provider = DnsProvider::new(
            client,
            "shoot--foo--bar",
            ProviderValues {
                name: "external".to_string(),
                class: None,
                spec: DnsProviderSpec {
                    type_: "aws-route53".to_string(),
                    secret_ref: SecretReference {
                        name: "route53-credentials".to_string(),
                        namespace: None,
                    },
                    domains: Some(DnsSelection {
                        include: vec!["foo.bar.example.com".to_string()],
                        exclude: vec![],
                    }),
                    zones: None,
                },
            },
        )
        .with_timings(fast_timings());

        provider.deploy().await.unwrap();
        let object = mock.object(&provider.key()).unwrap();
        assert_eq!(
            object.data["spec"],
            json!({
                "type": "aws-route53",
                "secretRef": {"name": "route53-credentials"},
                "domains": {"include": ["foo.bar.example.com"]}
            })
        );

        mock.push_status(&provider.key(), json!({"observedGeneration": 1, "state": "Ready"}));
        provider.wait().await.unwrap();

        provider.destroy().await.unwrap();
        provider.wait_cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_waits_for_existence_only() {
        let (mock, client) = mock();
        let owner = DnsOwner::new(
            client,
            OwnerValues {
                name: "shoot--foo--bar-owner".to_string(),
                class: None,
                spec: DnsOwnerSpec {
                    owner_id: "shoot--foo--bar-owner".to_string(),
                    active: Some(true),
                },
            },
        )
        .with_timings(fast_timings());

        owner.deploy().await.unwrap();
        assert_eq!(owner.key().namespace, None);
        mock.reset_counts();

        owner.wait().await.unwrap();
        assert_eq!(mock.operation_counts().gets, 1);
    }
}

mod etcd_copy_backups_task {
    use super::*;
    use gardenlet_components::etcd_copy_backups_task::{
        EtcdCopyBackupsTask, EtcdCopyBackupsTaskSpec, StoreSpec, Values, WaitForFinalSnapshotSpec,
    };

    fn task(client: Arc<dyn ObjectClient>) -> EtcdCopyBackupsTask {
        EtcdCopyBackupsTask::new(
            client,
            Values {
                namespace: "shoot--foo--bar".to_string(),
                name: "shoot--foo--bar".to_string(),
                spec: EtcdCopyBackupsTaskSpec {
                    source_store: StoreSpec {
                        provider: Some("local".to_string()),
                        prefix: "shoot--foo--bar--source/etcd-main".to_string(),
                        ..Default::default()
                    },
                    target_store: StoreSpec {
                        provider: Some("local".to_string()),
                        prefix: "shoot--foo--bar--target/etcd-main".to_string(),
                        ..Default::default()
                    },
                    wait_for_final_snapshot: Some(WaitForFinalSnapshotSpec {
                        enabled: true,
                        timeout: Some("10m".to_string()),
                    }),
                    ..Default::default()
                },
            },
        )
        .with_timings(fast_timings())
    }

    #[tokio::test]
    async fn test_wait_for_success() {
        let (mock, client) = mock();
        let task = task(client);
        task.deploy().await.unwrap();

        let object = mock.object(&task.key()).unwrap();
        assert_eq!(
            object.data["spec"]["waitForFinalSnapshot"],
            json!({"enabled": true, "timeout": "10m"})
        );

        mock.push_status(&task.key(), json!({"observedGeneration": 1, "conditions": []}));
        mock.push_status(
            &task.key(),
            json!({
                "observedGeneration": 1,
                "conditions": [{"type": "Succeeded", "status": "True"}]
            }),
        );
        task.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_condition() {
        let (mock, client) = mock();
        let task = task(client);
        task.deploy().await.unwrap();

        mock.set_status(
            &task.key(),
            json!({
                "observedGeneration": 1,
                "conditions": [{
                    "type": "Failed",
                    "status": "True",
                    "reason": "CopyFailed",
                    "message": "source store is not reachable"
                }]
            }),
        )
        .unwrap();

        let err = task.wait().await.unwrap_err();
        assert!(err.to_string().contains("CopyFailed: source store is not reachable"));
    }

    #[tokio::test]
    async fn test_destroy() {
        let (mock, client) = mock();
        let task = task(client);
        task.deploy().await.unwrap();
        task.destroy().await.unwrap();
        assert!(mock.keys().is_empty());
        task.wait_cleanup().await.unwrap();
    }
}

mod config {
    use gardenlet_components::{infrastructure, kube_state_metrics};
    use gardenlet_core::DeployerConfig;
    use std::time::Duration;

    #[test]
    fn test_component_timings_override() {
        let config = DeployerConfig::from_yaml_str(
            r#"
defaults:
  interval: 2s
components:
  infrastructure:
    timeout: 15m
    severeThreshold: 1m
"#,
        )
        .unwrap();

        let timings = config
            .timings_for(infrastructure::NAME, infrastructure::DEFAULT_TIMINGS)
            .unwrap();
        assert_eq!(timings.interval, Duration::from_secs(2));
        assert_eq!(timings.severe_threshold, Duration::from_secs(60));
        assert_eq!(timings.timeout, Duration::from_secs(900));

        let timings = config
            .timings_for(kube_state_metrics::NAME, kube_state_metrics::DEFAULT_TIMINGS)
            .unwrap();
        assert_eq!(timings.interval, Duration::from_secs(2));
        assert_eq!(timings.timeout, kube_state_metrics::DEFAULT_TIMINGS.timeout);
    }
}
