//! Integration tests for plan validation and desired-state computation
//!
//! These tests verify that validation accepts valid plans and rejects
//! invalid ones across kinds, and that the computed Secret payload and
//! CronJob spec are deterministic functions of the plan.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use backup_plan_operator::crd::{
    BackupPlan, ConsulBackupPlan, ConsulBackupPlanSpec, Destination, MongoDBBackupPlan,
    MongoDBBackupPlanSpec, ObjectStoreSpec,
};
use backup_plan_operator::reconcilers::cronjob::{
    build_cron_job_spec, CronJobParams, WORKER_CONFIG_FILE_PATH,
};
use backup_plan_operator::reconcilers::plan::validate;

// ============================================================================
// Test Helpers
// ============================================================================

fn valid_destination() -> Destination {
    Destination {
        object_store: Some(ObjectStoreSpec {
            endpoint: "minio.backup.svc:9000".to_string(),
            bucket: "backups".to_string(),
            access_key: "$S3_ACCESS_KEY".to_string(),
            secret_key: "$S3_SECRET_KEY".to_string(),
            ..Default::default()
        }),
    }
}

fn default_metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        ..Default::default()
    }
}

fn valid_mongodb_spec() -> MongoDBBackupPlanSpec {
    MongoDBBackupPlanSpec {
        schedule: "0 3 * * *".to_string(),
        active_deadline_seconds: 3600,
        retention: 3,
        env: vec![],
        uri: "mongodb://db:27017".to_string(),
        pushgateway: None,
        destination: Some(valid_destination()),
        volumes: vec![],
        volume_mounts: vec![],
    }
}

fn valid_consul_spec() -> ConsulBackupPlanSpec {
    ConsulBackupPlanSpec {
        schedule: "*/30 * * * *".to_string(),
        active_deadline_seconds: 600,
        retention: 5,
        env: vec![],
        address: "consul.svc:8500".to_string(),
        username: None,
        password: None,
        pushgateway: None,
        destination: Some(valid_destination()),
        volumes: vec![],
        volume_mounts: vec![],
    }
}

fn mongodb_plan(spec: MongoDBBackupPlanSpec) -> MongoDBBackupPlan {
    let mut plan = MongoDBBackupPlan::new("db-nightly", spec);
    plan.metadata = default_metadata("db-nightly");
    plan
}

fn consul_plan(spec: ConsulBackupPlanSpec) -> ConsulBackupPlan {
    let mut plan = ConsulBackupPlan::new("consul-halfhourly", spec);
    plan.metadata = default_metadata("consul-halfhourly");
    plan
}

// ============================================================================
// Validation Across Kinds
// ============================================================================

#[test]
fn valid_plans_of_both_kinds_pass() {
    assert!(validate(&mongodb_plan(valid_mongodb_spec())).is_ok());
    assert!(validate(&consul_plan(valid_consul_spec())).is_ok());
}

#[test]
fn malformed_schedule_is_rejected() {
    let mut spec = valid_mongodb_spec();
    spec.schedule = "not a schedule".to_string();
    assert!(validate(&mongodb_plan(spec)).is_err());
}

#[test]
fn zero_retention_is_rejected_for_all_kinds() {
    let mut mongodb = valid_mongodb_spec();
    mongodb.retention = 0;
    assert!(validate(&mongodb_plan(mongodb)).is_err());

    let mut consul = valid_consul_spec();
    consul.retention = 0;
    assert!(validate(&consul_plan(consul)).is_err());
}

#[test]
fn missing_destination_is_rejected() {
    let mut spec = valid_consul_spec();
    spec.destination = None;
    assert!(validate(&consul_plan(spec)).is_err());

    let mut spec = valid_consul_spec();
    spec.destination = Some(Destination { object_store: None });
    assert!(validate(&consul_plan(spec)).is_err());
}

#[test]
fn empty_connection_fields_are_rejected() {
    let mut mongodb = valid_mongodb_spec();
    mongodb.uri = String::new();
    assert!(validate(&mongodb_plan(mongodb)).is_err());

    let mut consul = valid_consul_spec();
    consul.address = String::new();
    assert!(validate(&consul_plan(consul)).is_err());
}

// ============================================================================
// Desired State Determinism
// ============================================================================

#[test]
fn secret_payload_round_trips_to_the_same_plan() {
    let plan = mongodb_plan(valid_mongodb_spec());
    let payload = plan.secret_payload().unwrap();
    let restored: MongoDBBackupPlan = serde_json::from_slice(&payload).unwrap();
    assert_eq!(restored.spec.uri, plan.spec.uri);
    assert_eq!(restored.metadata.name, plan.metadata.name);
}

#[test]
fn cron_job_spec_is_identical_across_kinds_given_equal_inputs() {
    let params = CronJobParams {
        schedule: "0 3 * * *",
        active_deadline_seconds: 3600,
        image: "backup-plan-worker:latest",
        env: &[],
        subcommand: "mongodb",
        secret_name: "db-nightly",
        volumes: &[],
        volume_mounts: &[],
    };
    let a = build_cron_job_spec(&params);
    let b = build_cron_job_spec(&params);
    assert_eq!(a, b);

    let job = a.job_template.spec.unwrap();
    let pod = job.template.spec.unwrap();
    assert_eq!(job.active_deadline_seconds, Some(3600));
    assert_eq!(
        pod.containers[0].args,
        Some(vec!["mongodb".to_string(), WORKER_CONFIG_FILE_PATH.to_string()])
    );
}
