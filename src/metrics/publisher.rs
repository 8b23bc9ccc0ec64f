//! Pushgateway publisher for worker run metrics
//!
//! CronJob pods are short-lived, so worker metrics are pushed to a
//! Prometheus Pushgateway instead of being scraped. A plan without a usable
//! pushgateway configuration gets the no-op publisher; the backup itself
//! never fails because metrics cannot be delivered.

use std::time::Instant;

use async_trait::async_trait;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::{info, warn};

use crate::crd::Pushgateway;
use crate::error::{Error, Result};

/// Run metrics sink for a single worker invocation
#[async_trait]
pub trait MetricsPublisher: Send {
    /// Mark the start of the run
    fn start_timer(&mut self);

    /// Mark the end of the run and record its duration
    fn stop_timer(&mut self);

    /// Record the size of the produced artifact
    fn set_backup_size_in_bytes(&mut self, size: u64);

    /// Record that the run completed successfully
    fn set_successful_run(&mut self);

    /// Deliver the recorded metrics
    async fn publish(&mut self) -> Result<()>;
}

/// Publisher that records nothing and always succeeds
pub struct NopMetricsPublisher;

#[async_trait]
impl MetricsPublisher for NopMetricsPublisher {
    fn start_timer(&mut self) {}
    fn stop_timer(&mut self) {}
    fn set_backup_size_in_bytes(&mut self, _size: u64) {}
    fn set_successful_run(&mut self) {}
    async fn publish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Publisher pushing run metrics to a Prometheus Pushgateway
pub struct PushMetricsPublisher {
    url: String,
    username: Option<String>,
    password: Option<String>,
    job: String,
    instance: String,
    namespace: String,
    registry: Registry,
    started: Option<Instant>,
    last_completion: Gauge,
    last_success: Gauge,
    duration: Gauge,
    size: Gauge,
    client: reqwest::Client,
}

impl PushMetricsPublisher {
    /// Build a publisher from plan configuration, falling back to the
    /// `PUSHGATEWAY_URL`, `PUSHGATEWAY_USERNAME` and `PUSHGATEWAY_PASSWORD`
    /// environment variables. Returns the no-op publisher when no URL is
    /// available so a missing gateway never blocks a backup.
    pub fn from_config(
        conf: Option<&Pushgateway>,
        namespace: &str,
        name: &str,
    ) -> Box<dyn MetricsPublisher> {
        let url = conf
            .and_then(|c| c.url.clone())
            .or_else(|| std::env::var("PUSHGATEWAY_URL").ok())
            .filter(|u| !u.is_empty());
        let Some(url) = url else {
            warn!("No pushgateway configured, run metrics will not be published");
            return Box::new(NopMetricsPublisher);
        };
        let username = conf
            .and_then(|c| c.username.clone())
            .or_else(|| std::env::var("PUSHGATEWAY_USERNAME").ok())
            .filter(|u| !u.is_empty());
        let password = conf
            .and_then(|c| c.password.clone())
            .or_else(|| std::env::var("PUSHGATEWAY_PASSWORD").ok())
            .filter(|p| !p.is_empty());
        let instance = std::env::var("K8S_POD").unwrap_or_default();
        let job = std::env::var("K8S_JOB").unwrap_or_else(|_| name.to_string());

        match Self::new(url, username, password, job, instance, namespace.to_string()) {
            Ok(publisher) => Box::new(publisher),
            Err(e) => {
                warn!(error = %e, "Invalid pushgateway configuration, falling back to no-op");
                Box::new(NopMetricsPublisher)
            }
        }
    }

    fn new(
        url: String,
        username: Option<String>,
        password: Option<String>,
        job: String,
        instance: String,
        namespace: String,
    ) -> Result<Self> {
        if job.is_empty() {
            return Err(Error::config("pushgateway job name must not be empty"));
        }
        let registry = Registry::new();
        let last_completion = register(
            &registry,
            "backup_last_completion_timestamp_seconds",
            "Unix timestamp of the last completed backup run",
        )?;
        let last_success = register(
            &registry,
            "backup_last_success_timestamp_seconds",
            "Unix timestamp of the last successful backup run",
        )?;
        let duration = register(
            &registry,
            "backup_duration_seconds",
            "Duration of the last backup run in seconds",
        )?;
        let size = register(
            &registry,
            "backup_size_in_bytes",
            "Size of the last backup artifact in bytes",
        )?;
        Ok(Self {
            url,
            username,
            password,
            job,
            instance,
            namespace,
            registry,
            started: None,
            last_completion,
            last_success,
            duration,
            size,
            client: reqwest::Client::new(),
        })
    }

    fn push_url(&self) -> String {
        let mut url = format!(
            "{}/metrics/job/{}",
            self.url.trim_end_matches('/'),
            self.job
        );
        if !self.instance.is_empty() {
            url.push_str(&format!("/instance/{}", self.instance));
        }
        if !self.namespace.is_empty() {
            url.push_str(&format!("/namespace/{}", self.namespace));
        }
        url
    }

    fn now_seconds() -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

fn register(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help))
        .map_err(|e| Error::config(format!("failed to create gauge '{}': {}", name, e)))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| Error::config(format!("failed to register gauge '{}': {}", name, e)))?;
    Ok(gauge)
}

#[async_trait]
impl MetricsPublisher for PushMetricsPublisher {
    fn start_timer(&mut self) {
        self.started = Some(Instant::now());
    }

    fn stop_timer(&mut self) {
        if let Some(started) = self.started.take() {
            self.duration.set(started.elapsed().as_secs_f64());
        }
        self.last_completion.set(Self::now_seconds());
    }

    fn set_backup_size_in_bytes(&mut self, size: u64) {
        self.size.set(size as f64);
    }

    fn set_successful_run(&mut self) {
        self.last_success.set(Self::now_seconds());
    }

    async fn publish(&mut self) -> Result<()> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::config(format!("failed to encode run metrics: {}", e)))?;

        let url = self.push_url();
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", encoder.format_type())
            .body(buffer);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }
        request
            .send()
            .await
            .map_err(|e| Error::config(format!("push to '{}' failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| Error::config(format!("push to '{}' rejected: {}", url, e)))?;
        info!(url = %url, "Run metrics published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_url_carries_groupings() {
        let publisher = PushMetricsPublisher::new(
            "http://gateway:9091/".to_string(),
            None,
            None,
            "db-nightly".to_string(),
            "pod-abc".to_string(),
            "default".to_string(),
        )
        .unwrap();
        assert_eq!(
            publisher.push_url(),
            "http://gateway:9091/metrics/job/db-nightly/instance/pod-abc/namespace/default"
        );
    }

    #[test]
    fn empty_job_is_rejected() {
        let result = PushMetricsPublisher::new(
            "http://gateway:9091".to_string(),
            None,
            None,
            String::new(),
            String::new(),
            String::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn nop_publisher_always_succeeds() {
        let mut publisher = NopMetricsPublisher;
        publisher.start_timer();
        publisher.set_backup_size_in_bytes(42);
        publisher.set_successful_run();
        publisher.stop_timer();
        assert!(publisher.publish().await.is_ok());
    }
}
