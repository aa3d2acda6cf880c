//! Provider client boundary.
//!
//! A real cloud-calling implementation has fixed semantics owned by the cloud provider
//! and has no counterpart in this repository; only the trait boundary the engine calls
//! against is specified here, following `durable/src/activity/definition.rs`'s `Activity`
//! trait shape (`#[async_trait]`, typed request/response). [`MockProviderClient`] below is
//! the one implementation that ships, an in-memory cluster simulation used by the CLI's
//! `demo` subcommand and the HTTP control plane's own default wiring.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{BlueGreenDeploymentInfo, ClusterSnapshot, InstanceRole};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("terminal provider error: {0}")]
    Terminal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Typed calls the engine issues against the managed database service.
///
/// Implementations must be safe for concurrent use: the engine holds a single shared
/// `Arc<dyn ProviderClient>` and calls into it from every operation's worker task.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot, ProviderError>;

    async fn modify_instance(
        &self,
        instance_id: &str,
        target_instance_type: &str,
    ) -> Result<(), ProviderError>;

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    async fn create_instance(&self, cluster_id: &str, instance_id: &str) -> Result<(), ProviderError>;

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    async fn failover(
        &self,
        cluster_id: &str,
        target_instance_id: Option<&str>,
    ) -> Result<(), ProviderError>;

    async fn create_cluster_parameter_group(
        &self,
        name: &str,
        target_engine_version: &str,
        copy_from: Option<&str>,
    ) -> Result<(), ProviderError>;

    async fn create_blue_green_deployment(
        &self,
        cluster_id: &str,
        target_engine_version: &str,
        parameter_group_name: Option<&str>,
    ) -> Result<BlueGreenDeploymentInfo, ProviderError>;

    async fn switchover_blue_green_deployment(&self, deployment_id: &str) -> Result<(), ProviderError>;

    async fn delete_blue_green_deployment(&self, deployment_id: &str) -> Result<(), ProviderError>;

    async fn list_upgrade_targets(&self, cluster_id: &str) -> Result<Vec<String>, ProviderError>;
}

/// In-memory simulation of the managed database service, grounded on
/// `handlers::tests::StubProvider`'s shape (a locked [`ClusterSnapshot`] per
/// cluster) but generalized to many named clusters so the CLI demo can seed
/// distinct scenarios (single-instance, multi-instance, blue-green upgrade)
/// side by side.
pub struct MockProviderClient {
    clusters: StdMutex<HashMap<String, ClusterSnapshot>>,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            clusters: StdMutex::new(HashMap::new()),
        }
    }

    /// Seed (or replace) a cluster's starting snapshot.
    pub fn seed_cluster(&self, snapshot: ClusterSnapshot) {
        self.clusters.lock().unwrap().insert(snapshot.cluster_id.clone(), snapshot);
    }

    fn with_cluster<T>(
        &self,
        cluster_id: &str,
        f: impl FnOnce(&mut ClusterSnapshot) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut clusters = self.clusters.lock().unwrap();
        let snapshot = clusters
            .get_mut(cluster_id)
            .ok_or_else(|| ProviderError::Terminal(format!("unknown cluster '{cluster_id}'")))?;
        f(snapshot)
    }
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterSnapshot, ProviderError> {
        self.with_cluster(cluster_id, |s| Ok(s.clone()))
    }

    async fn modify_instance(&self, instance_id: &str, target_instance_type: &str) -> Result<(), ProviderError> {
        let target = target_instance_type.to_string();
        self.mutate_instance(instance_id, move |i| i.instance_type = target.clone())
    }

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.mutate_instance(instance_id, |_| {})
    }

    async fn create_instance(&self, cluster_id: &str, instance_id: &str) -> Result<(), ProviderError> {
        let instance_id = instance_id.to_string();
        self.with_cluster(cluster_id, move |s| {
            s.instances.push(crate::types::InstanceInfo {
                id: instance_id,
                role: InstanceRole::Reader,
                instance_type: s
                    .instances
                    .first()
                    .map(|i| i.instance_type.clone())
                    .unwrap_or_else(|| "db.r6g.large".to_string()),
                status: "available".to_string(),
                autoscaled: false,
            });
            Ok(())
        })
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        let mut clusters = self.clusters.lock().unwrap();
        for snapshot in clusters.values_mut() {
            snapshot.instances.retain(|i| i.id != instance_id);
        }
        Ok(())
    }

    async fn failover(&self, cluster_id: &str, target_instance_id: Option<&str>) -> Result<(), ProviderError> {
        let target = target_instance_id.map(str::to_string);
        self.with_cluster(cluster_id, move |s| {
            let new_writer_idx = match &target {
                Some(id) => s.instances.iter().position(|i| &i.id == id),
                None => s
                    .instances
                    .iter()
                    .position(|i| i.role == InstanceRole::Reader && !i.autoscaled),
            }
            .ok_or_else(|| ProviderError::Terminal("no eligible failover target".to_string()))?;

            for (idx, instance) in s.instances.iter_mut().enumerate() {
                instance.role = if idx == new_writer_idx {
                    InstanceRole::Writer
                } else if instance.role == InstanceRole::Writer {
                    InstanceRole::Reader
                } else {
                    instance.role
                };
            }
            Ok(())
        })
    }

    async fn create_cluster_parameter_group(
        &self,
        name: &str,
        _target_engine_version: &str,
        _copy_from: Option<&str>,
    ) -> Result<(), ProviderError> {
        let name = name.to_string();
        let mut clusters = self.clusters.lock().unwrap();
        for snapshot in clusters.values_mut() {
            snapshot.parameter_group_name = Some(name.clone());
        }
        Ok(())
    }

    async fn create_blue_green_deployment(
        &self,
        cluster_id: &str,
        target_engine_version: &str,
        parameter_group_name: Option<&str>,
    ) -> Result<BlueGreenDeploymentInfo, ProviderError> {
        let target_engine_version = target_engine_version.to_string();
        let parameter_group_name = parameter_group_name.map(str::to_string);
        self.with_cluster(cluster_id, move |s| {
            // No settle delay is simulated (see module doc): the deployment is reported
            // AVAILABLE immediately so callers waiting on BlueGreenDeploymentStatus don't
            // need a background task to ever flip it.
            let info = BlueGreenDeploymentInfo {
                deployment_id: format!("bgd-{}", Uuid::now_v7()),
                target_engine_version,
                status: "AVAILABLE".to_string(),
            };
            s.active_blue_green_deployment = Some(info.clone());
            s.parameter_group_name = parameter_group_name.or(s.parameter_group_name.take());
            Ok(info)
        })
    }

    async fn switchover_blue_green_deployment(&self, deployment_id: &str) -> Result<(), ProviderError> {
        self.mutate_blue_green(deployment_id, |s, info| {
            info.status = "SWITCHOVER_COMPLETED".to_string();
            s.engine_version = info.target_engine_version.clone();
        })
    }

    async fn delete_blue_green_deployment(&self, deployment_id: &str) -> Result<(), ProviderError> {
        let mut clusters = self.clusters.lock().unwrap();
        for snapshot in clusters.values_mut() {
            if snapshot
                .active_blue_green_deployment
                .as_ref()
                .is_some_and(|d| d.deployment_id == deployment_id)
            {
                snapshot.active_blue_green_deployment = None;
            }
        }
        Ok(())
    }

    async fn list_upgrade_targets(&self, cluster_id: &str) -> Result<Vec<String>, ProviderError> {
        self.with_cluster(cluster_id, |s| Ok(s.upgrade_targets.clone()))
    }
}

impl MockProviderClient {
    fn mutate_instance(
        &self,
        instance_id: &str,
        mutate: impl FnOnce(&mut crate::types::InstanceInfo),
    ) -> Result<(), ProviderError> {
        let mut clusters = self.clusters.lock().unwrap();
        for snapshot in clusters.values_mut() {
            if let Some(instance) = snapshot.instances.iter_mut().find(|i| i.id == instance_id) {
                mutate(instance);
                return Ok(());
            }
        }
        Err(ProviderError::Terminal(format!("unknown instance '{instance_id}'")))
    }

    fn mutate_blue_green(
        &self,
        deployment_id: &str,
        mutate: impl FnOnce(&mut ClusterSnapshot, &mut BlueGreenDeploymentInfo),
    ) -> Result<(), ProviderError> {
        let mut clusters = self.clusters.lock().unwrap();
        for snapshot in clusters.values_mut() {
            let matches = snapshot
                .active_blue_green_deployment
                .as_ref()
                .is_some_and(|d| d.deployment_id == deployment_id);
            if matches {
                let mut info = snapshot.active_blue_green_deployment.take().unwrap();
                mutate(snapshot, &mut info);
                snapshot.active_blue_green_deployment = Some(info);
                return Ok(());
            }
        }
        Err(ProviderError::Terminal(format!("unknown blue/green deployment '{deployment_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceInfo;

    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot {
            cluster_id: "demo".into(),
            engine_version: "15.4".into(),
            instances: vec![
                InstanceInfo {
                    id: "w".into(),
                    role: InstanceRole::Writer,
                    instance_type: "db.r6g.large".into(),
                    status: "available".into(),
                    autoscaled: false,
                },
                InstanceInfo {
                    id: "r1".into(),
                    role: InstanceRole::Reader,
                    instance_type: "db.r6g.large".into(),
                    status: "available".into(),
                    autoscaled: false,
                },
            ],
            upgrade_targets: vec!["15.7".into()],
            orderable_instance_types: vec!["db.r6g.xlarge".into()],
            active_blue_green_deployment: None,
            parameter_group_name: None,
        }
    }

    #[tokio::test]
    async fn modify_instance_updates_type() {
        let mock = MockProviderClient::new();
        mock.seed_cluster(snapshot());
        mock.modify_instance("w", "db.r6g.xlarge").await.unwrap();
        let observed = mock.describe_cluster("demo").await.unwrap();
        assert_eq!(observed.writer().unwrap().instance_type, "db.r6g.xlarge");
    }

    #[tokio::test]
    async fn failover_promotes_target_reader() {
        let mock = MockProviderClient::new();
        mock.seed_cluster(snapshot());
        mock.failover("demo", Some("r1")).await.unwrap();
        let observed = mock.describe_cluster("demo").await.unwrap();
        assert_eq!(observed.writer().unwrap().id, "r1");
        assert!(observed.readers().iter().any(|r| r.id == "w"));
    }

    #[tokio::test]
    async fn blue_green_switchover_bumps_engine_version() {
        let mock = MockProviderClient::new();
        mock.seed_cluster(snapshot());
        let info = mock.create_blue_green_deployment("demo", "15.7", None).await.unwrap();
        mock.switchover_blue_green_deployment(&info.deployment_id).await.unwrap();
        let observed = mock.describe_cluster("demo").await.unwrap();
        assert_eq!(observed.engine_version, "15.7");
    }

    #[tokio::test]
    async fn unknown_cluster_is_terminal_error() {
        let mock = MockProviderClient::new();
        let err = mock.describe_cluster("nope").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
