//! Pure CronJob spec builder
//!
//! Maps plan fields to the periodic-job template that launches the worker.
//! No hidden state: identical inputs always yield an identical spec, which is
//! what makes the create-or-update path in the reconciler idempotent.

use k8s_openapi::api::batch::v1::{CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};

/// Name of the worker container inside the job pod
pub const WORKER_CONTAINER_NAME: &str = "worker";
/// Name of the volume carrying the plan config Secret
pub const WORKER_CONFIG_VOLUME_NAME: &str = "config";
/// Mount path of the config volume
pub const WORKER_CONFIG_MOUNT_PATH: &str = "/etc/worker";
/// Data key under which the serialized plan is stored in the Secret
pub const WORKER_CONFIG_KEY: &str = "plan.json";
/// Full path of the plan config file as seen by the worker
pub const WORKER_CONFIG_FILE_PATH: &str = "/etc/worker/plan.json";

/// Inputs for [`build_cron_job_spec`]
pub struct CronJobParams<'a> {
    /// Schedule in cron format
    pub schedule: &'a str,
    /// Deadline for a single job run in seconds
    pub active_deadline_seconds: i64,
    /// Worker container image
    pub image: &'a str,
    /// Environment for the worker container
    pub env: &'a [EnvVar],
    /// Worker subcommand, e.g. `mongodb`
    pub subcommand: &'a str,
    /// Name of the Secret carrying the serialized plan
    pub secret_name: &'a str,
    /// Extra volumes bound to the pod
    pub volumes: &'a [Volume],
    /// Extra mounts for the worker container
    pub volume_mounts: &'a [VolumeMount],
}

/// Build the desired CronJob spec for a plan: one worker container with
/// `[subcommand, config path]` as arguments, the config Secret mounted
/// read-only at a fixed path, restart on failure. Retry and backoff of
/// failed runs stay with the Kubernetes job controller.
pub fn build_cron_job_spec(params: &CronJobParams<'_>) -> CronJobSpec {
    let mut volumes = params.volumes.to_vec();
    volumes.push(Volume {
        name: WORKER_CONFIG_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(params.secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });

    let mut volume_mounts = params.volume_mounts.to_vec();
    volume_mounts.push(VolumeMount {
        name: WORKER_CONFIG_VOLUME_NAME.to_string(),
        mount_path: WORKER_CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    });

    let container = Container {
        name: WORKER_CONTAINER_NAME.to_string(),
        image: Some(params.image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: if params.env.is_empty() {
            None
        } else {
            Some(params.env.to_vec())
        },
        command: Some(vec!["/worker".to_string()]),
        args: Some(vec![
            params.subcommand.to_string(),
            WORKER_CONFIG_FILE_PATH.to_string(),
        ]),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    CronJobSpec {
        schedule: params.schedule.to_string(),
        job_template: JobTemplateSpec {
            spec: Some(JobSpec {
                active_deadline_seconds: Some(params.active_deadline_seconds),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(volumes),
                        restart_policy: Some("OnFailure".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params<'a>(env: &'a [EnvVar]) -> CronJobParams<'a> {
        CronJobParams {
            schedule: "0 3 * * *",
            active_deadline_seconds: 300,
            image: "backup-worker:latest",
            env,
            subcommand: "mongodb",
            secret_name: "plan-a",
            volumes: &[],
            volume_mounts: &[],
        }
    }

    #[test]
    fn identical_inputs_yield_identical_specs() {
        let env = vec![EnvVar {
            name: "S3_SECRET_ACCESS_KEY".to_string(),
            value: Some("hunter2".to_string()),
            ..Default::default()
        }];
        let a = build_cron_job_spec(&params(&env));
        let b = build_cron_job_spec(&params(&env));
        assert_eq!(a, b);
    }

    #[test]
    fn worker_args_carry_subcommand_and_config_path() {
        let spec = build_cron_job_spec(&params(&[]));
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.name, WORKER_CONTAINER_NAME);
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec!["mongodb".to_string(), WORKER_CONFIG_FILE_PATH.to_string()]
        );
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
    }

    #[test]
    fn config_volume_is_mounted_read_only() {
        let spec = build_cron_job_spec(&params(&[]));
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        let mounts = pod.containers[0].volume_mounts.as_ref().unwrap();
        let config = mounts
            .iter()
            .find(|m| m.name == WORKER_CONFIG_VOLUME_NAME)
            .unwrap();
        assert_eq!(config.mount_path, WORKER_CONFIG_MOUNT_PATH);
        assert_eq!(config.read_only, Some(true));
        let volumes = pod.volumes.as_ref().unwrap();
        let secret = volumes
            .iter()
            .find(|v| v.name == WORKER_CONFIG_VOLUME_NAME)
            .unwrap();
        assert_eq!(
            secret.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("plan-a")
        );
    }

    #[test]
    fn extra_volumes_are_preserved() {
        let extra_vol = vec![Volume {
            name: "certs".to_string(),
            ..Default::default()
        }];
        let extra_mount = vec![VolumeMount {
            name: "certs".to_string(),
            mount_path: "/etc/certs".to_string(),
            ..Default::default()
        }];
        let mut p = params(&[]);
        p.volumes = &extra_vol;
        p.volume_mounts = &extra_mount;
        let spec = build_cron_job_spec(&p);
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 2);
        assert_eq!(
            pod.containers[0].volume_mounts.as_ref().unwrap().len(),
            2
        );
    }
}
