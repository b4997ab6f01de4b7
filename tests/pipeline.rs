//! Migration pipeline integration tests
//!
//! Exercises the resource transformation pipeline and the rule
//! orchestration end to end with in-memory fakes, over the object shapes
//! a real migration produces.

use std::collections::BTreeMap;

use migration_operator::adapters::testing::{dynamic_object, FakeDriver, FakeRuleExecutor};
use migration_operator::crd::{
    Migration, MigrationSpec, MigrationStatusValue, ResourceInfo, MIGRATION_REPLICAS_ANNOTATION,
};
use migration_operator::migrator::{rules, transform};
use migration_operator::unstructured;

fn spec(namespaces: &[&str]) -> MigrationSpec {
    MigrationSpec {
        cluster_pair: "pairX".to_string(),
        namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
        selectors: None,
        include_volumes: None,
        include_resources: None,
        start_applications: None,
        pre_exec_rule: None,
        post_exec_rule: None,
    }
}

fn info(group: &str, version: &str, kind: &str, namespace: &str, name: &str) -> ResourceInfo {
    ResourceInfo {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        status: MigrationStatusValue::InProgress,
        reason: String::new(),
    }
}

// =============================================================================
// Happy Path: volumes + resources
// =============================================================================

mod happy_path {
    use super::*;
    use serde_json::json;

    /// The application bundle from a typical team namespace: one
    /// Deployment with three replicas, one Service with an allocated
    /// clusterIP, one bound PVC, and its PersistentVolume.
    #[tokio::test]
    async fn test_team_namespace_bundle_is_made_portable() {
        let driver = FakeDriver::new();
        let spec = spec(&["team-a"]);

        let deployment = dynamic_object(
            "apps/v1",
            "Deployment",
            Some("team-a"),
            "web",
            json!({
                "spec": {"replicas": 3, "selector": {"matchLabels": {"app": "web"}}, "template": {}},
                "status": {"readyReplicas": 3}
            }),
        );
        let service = dynamic_object(
            "v1",
            "Service",
            Some("team-a"),
            "web",
            json!({
                "spec": {"clusterIP": "10.0.0.5", "ports": [{"port": 80}]},
                "status": {"loadBalancer": {}}
            }),
        );
        let claim = dynamic_object(
            "v1",
            "PersistentVolumeClaim",
            Some("team-a"),
            "data",
            json!({
                "spec": {"volumeName": "pv-1", "storageClassName": "fast"},
                "status": {"phase": "Bound"}
            }),
        );
        let volume = dynamic_object(
            "v1",
            "PersistentVolume",
            None,
            "pv-1",
            json!({
                "spec": {
                    "claimRef": {"namespace": "team-a", "name": "data"},
                    "storageClassName": "fast",
                    "csi": {"volumeHandle": "vol-123"}
                },
                "status": {"phase": "Bound"}
            }),
        );

        let mut infos = vec![
            info("apps", "v1", "Deployment", "team-a", "web"),
            info("core", "v1", "Service", "team-a", "web"),
            info("core", "v1", "PersistentVolumeClaim", "team-a", "data"),
            info("core", "v1", "PersistentVolume", "", "pv-1"),
        ];

        let prepared = transform::prepare_resources(
            &driver,
            &spec,
            vec![deployment, service, claim, volume],
            &mut infos,
        )
        .await;

        assert_eq!(prepared.len(), 4);
        assert!(infos
            .iter()
            .all(|i| i.status == MigrationStatusValue::InProgress));

        // Deployment lands scaled to zero, with the original count in the
        // migration annotation
        let deployment = &prepared[0];
        assert_eq!(
            unstructured::get_int(&deployment.data, &["spec", "replicas"]).unwrap(),
            Some(0)
        );
        assert_eq!(
            deployment
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(MIGRATION_REPLICAS_ANNOTATION))
                .map(String::as_str),
            Some("3")
        );

        // Service loses its allocated clusterIP
        let service = &prepared[1];
        assert_eq!(
            unstructured::get(&service.data, &["spec", "clusterIP"]),
            None
        );

        // Claim keeps its spec but loses status
        let claim = &prepared[2];
        assert_eq!(unstructured::get(&claim.data, &["status"]), None);
        assert_eq!(
            unstructured::get_str(&claim.data, &["spec", "volumeName"]),
            Some("pv-1")
        );

        // Volume loses its binding and storage class, and carries the
        // driver's rewritten handle
        let volume = &prepared[3];
        assert_eq!(unstructured::get(&volume.data, &["spec", "claimRef"]), None);
        assert_eq!(
            unstructured::get(&volume.data, &["spec", "storageClassName"]),
            None
        );
        assert_eq!(
            unstructured::get_str(&volume.data, &["spec", "csi", "volumeHandle"]),
            Some("vol-123-remote")
        );
        assert_eq!(driver.rewrite_count(), 1);

        // Nothing carries a status or non-portable metadata
        for object in &prepared {
            assert_eq!(unstructured::get(&object.data, &["status"]), None);
            assert!(object.metadata.uid.is_none());
            assert!(object.metadata.resource_version.is_none());
            assert!(object.metadata.owner_references.is_none());
        }
    }

    #[tokio::test]
    async fn test_start_applications_keeps_replica_counts() {
        let mut spec = spec(&["team-a"]);
        spec.start_applications = Some(true);

        let deployment = dynamic_object(
            "apps/v1",
            "Deployment",
            Some("team-a"),
            "web",
            json!({"spec": {"replicas": 3}}),
        );
        let mut infos = vec![info("apps", "v1", "Deployment", "team-a", "web")];

        let prepared =
            transform::prepare_resources(&FakeDriver::new(), &spec, vec![deployment], &mut infos)
                .await;

        assert_eq!(
            unstructured::get_int(&prepared[0].data, &["spec", "replicas"]).unwrap(),
            Some(3)
        );
        assert!(prepared[0].metadata.annotations.is_none());
    }
}

// =============================================================================
// Headless Services
// =============================================================================

mod headless_service {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_headless_service_survives_transformation() {
        let service = dynamic_object(
            "v1",
            "Service",
            Some("team-a"),
            "db-headless",
            json!({"spec": {"clusterIP": "None", "ports": [{"port": 5432}]}}),
        );
        let mut infos = vec![info("core", "v1", "Service", "team-a", "db-headless")];

        let prepared = transform::prepare_resources(
            &FakeDriver::new(),
            &spec(&["team-a"]),
            vec![service],
            &mut infos,
        )
        .await;

        assert_eq!(
            unstructured::get_str(&prepared[0].data, &["spec", "clusterIP"]),
            Some("None")
        );
    }
}

// =============================================================================
// Partial Failure Isolation
// =============================================================================

mod partial_failure {
    use super::*;
    use serde_json::json;

    /// One object failing preparation must not stop the other nine, and
    /// only its own ResourceInfo may be marked Failed.
    #[tokio::test]
    async fn test_one_failing_object_out_of_ten() {
        let mut objects = Vec::new();
        let mut infos = Vec::new();
        for i in 0..10 {
            let name = format!("cm-{}", i);
            let data = if i == 6 {
                // Deployments reject fractional replica counts
                json!({"spec": {"replicas": 1.5}})
            } else {
                json!({"data": {}})
            };
            let kind = if i == 6 { "Deployment" } else { "ConfigMap" };
            let api_version = if i == 6 { "apps/v1" } else { "v1" };
            objects.push(dynamic_object(api_version, kind, Some("team-a"), &name, data));
            infos.push(info(
                if i == 6 { "apps" } else { "core" },
                "v1",
                kind,
                "team-a",
                &name,
            ));
        }

        let prepared = transform::prepare_resources(
            &FakeDriver::new(),
            &spec(&["team-a"]),
            objects,
            &mut infos,
        )
        .await;

        assert_eq!(prepared.len(), 9);
        assert_eq!(infos[6].status, MigrationStatusValue::Failed);
        assert!(!infos[6].reason.is_empty());
        for (i, entry) in infos.iter().enumerate() {
            if i != 6 {
                assert_eq!(entry.status, MigrationStatusValue::InProgress);
            }
        }
    }
}

// =============================================================================
// Rule Orchestration
// =============================================================================

mod rule_lifecycle {
    use super::*;

    fn migration(namespaces: &[&str], pre: Option<&str>) -> Migration {
        let mut migration = Migration::new(
            "app-migration",
            MigrationSpec {
                pre_exec_rule: pre.map(String::from),
                ..spec(namespaces)
            },
        );
        migration.metadata.namespace = Some("team-a".to_string());
        migration
    }

    /// Helpers forked by the pre rule stay alive until the controller
    /// fires their signals after the driver accepts the cutover.
    #[tokio::test]
    async fn test_helpers_outlive_the_pre_stage_until_fired() {
        let executor = FakeRuleExecutor::new();
        executor.add_rule("quiesce", "team-a");
        executor.fork_helpers();

        let migration = migration(&["team-a", "team-b"], Some("quiesce"));
        let signals = rules::run_pre_exec_rule(&executor, &migration)
            .await
            .unwrap();

        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| !s.is_fired()));

        // Driver accepted the migration start: every helper stops
        for signal in &signals {
            signal.fire();
        }
        assert!(executor.signals().iter().all(|s| s.is_fired()));

        // A second fire is harmless
        for signal in &signals {
            signal.fire();
        }
    }

    #[tokio::test]
    async fn test_mid_walk_failure_stops_earlier_helpers() {
        let executor = FakeRuleExecutor::new();
        executor.add_rule("quiesce", "team-a");
        executor.fork_helpers();
        executor.fail_in_namespace("team-b");

        let migration = migration(&["team-a", "team-b", "team-c"], Some("quiesce"));
        assert!(rules::run_pre_exec_rule(&executor, &migration).await.is_err());

        // Only team-a's helper was started, and it was stopped on unwind
        let signals = executor.signals();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].is_fired());
    }
}

// =============================================================================
// Manifest Parsing
// =============================================================================

mod manifest {
    use super::*;

    #[test]
    fn test_migration_manifest_round_trip() {
        let yaml = r#"
apiVersion: stork.libopenstorage.org/v1alpha1
kind: Migration
metadata:
  name: app-migration
  namespace: team-a
spec:
  clusterPair: pairX
  namespaces:
    - team-a
  includeVolumes: true
  includeResources: true
  startApplications: false
  selectors:
    app: db
"#;
        let migration: Migration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(migration.spec.cluster_pair, "pairX");
        assert_eq!(migration.spec.namespaces, vec!["team-a".to_string()]);
        assert!(migration.spec.wants_volumes());
        assert!(migration.spec.wants_resources());
        assert!(!migration.spec.starts_applications());
        assert_eq!(migration.spec.label_selector().as_deref(), Some("app=db"));
        assert!(migration.status.is_none());
    }

    #[test]
    fn test_minimal_manifest_gets_defaults() {
        let yaml = r#"
apiVersion: stork.libopenstorage.org/v1alpha1
kind: Migration
metadata:
  name: app-migration
  namespace: team-a
spec:
  clusterPair: pairX
"#;
        let migration: Migration = serde_yaml::from_str(yaml).unwrap();
        assert!(migration.spec.namespaces.is_empty());
        assert!(migration.spec.wants_volumes());
        assert!(migration.spec.wants_resources());
        assert!(!migration.spec.starts_applications());
        assert_eq!(migration.spec.pre_exec_rule(), None);
    }

    #[test]
    fn test_status_annotations_serialize_for_the_api_server() {
        let mut map = BTreeMap::new();
        map.insert("app".to_string(), "db".to_string());

        let mut migration = Migration::new(
            "app-migration",
            MigrationSpec {
                selectors: Some(map),
                ..spec(&["team-a"])
            },
        );
        migration.status = Some(Default::default());

        let value = serde_json::to_value(&migration).unwrap();
        assert_eq!(value["spec"]["clusterPair"], "pairX");
        assert_eq!(value["status"]["stage"], "Initial");
        assert_eq!(value["status"]["status"], "Initial");
    }
}
