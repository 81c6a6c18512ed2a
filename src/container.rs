//! Container Shim: create/start/inspect/stop/remove a container with
//! networking disabled and the capabilities this driver needs to wire it up
//! itself.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::service::HostConfig;

use crate::error::{DvnetError, DvnetResult};

/// Runtime-agnostic seam between the Network Builder and whatever manages
/// container lifecycle, so the Builder can be exercised against a fake
/// without a live daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates, starts, and inspects a container with hostname `name`,
    /// returning its id and init PID.
    async fn run(&self, image: &str, name: &str) -> DvnetResult<(String, i32)>;

    /// Best-effort stop followed by a force remove.
    async fn remove(&self, id: &str) -> DvnetResult<()>;
}

pub struct BollardRuntime {
    client: Docker,
}

impl BollardRuntime {
    /// Connects using the environment's default Docker endpoint (reads
    /// runtime endpoint configuration from standard environment variables).
    pub fn connect() -> DvnetResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| DvnetError::container(format!("couldn't connect to container runtime: {e}")))?;
        Ok(Self { client })
    }

    fn config(image: &str, name: &str) -> Config<String> {
        let mut sysctls = HashMap::new();
        sysctls.insert("net.ipv4.ip_forward".to_string(), "1".to_string());
        sysctls.insert("net.ipv6.conf.all.disable_ipv6".to_string(), "0".to_string());
        sysctls.insert(
            "net.bridge.bridge-nf-call-iptables".to_string(),
            "0".to_string(),
        );

        let host_config = HostConfig {
            network_mode: Some("none".to_string()),
            sysctls: Some(sysctls),
            cap_add: Some(vec!["SYS_ADMIN".to_string(), "NET_ADMIN".to_string()]),
            dns: Some(vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]),
            ..Default::default()
        };

        Config {
            image: Some(image.to_string()),
            hostname: Some(name.to_string()),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn run(&self, image: &str, name: &str) -> DvnetResult<(String, i32)> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let config = Self::config(image, name);

        let created = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| DvnetError::container(format!("couldn't create container {name}: {e}")))?;

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DvnetError::container(format!("couldn't start container {name}: {e}")))?;

        let inspected = self
            .client
            .inspect_container(&created.id, None)
            .await
            .map_err(|e| DvnetError::container(format!("couldn't inspect container {name}: {e}")))?;

        let pid = inspected
            .state
            .and_then(|s| s.pid)
            .filter(|pid| *pid != 0)
            .ok_or_else(|| {
                DvnetError::container(format!("container {name} has no init pid after start"))
            })?;

        Ok((created.id, pid as i32))
    }

    async fn remove(&self, id: &str) -> DvnetResult<()> {
        if let Err(e) = self
            .client
            .stop_container(id, Some(StopContainerOptions { t: 5 }))
            .await
        {
            log::debug!("couldn't stop container {id} before removal, continuing: {e}");
        }

        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| DvnetError::container(format!("couldn't remove container {id}: {e}")))
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory `ContainerRuntime` for exercising the Network Builder
    /// without a daemon: `run` hands out deterministic incrementing fake
    /// pids, `remove` just forgets the id.
    #[derive(Default)]
    pub struct FakeRuntime {
        next_pid: Mutex<i32>,
        created: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self {
                next_pid: Mutex::new(1000),
                created: Mutex::new(Vec::new()),
            }
        }

        pub fn created_names(&self) -> Vec<String> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn run(&self, _image: &str, name: &str) -> DvnetResult<(String, i32)> {
            let mut pid = self.next_pid.lock().unwrap();
            *pid += 1;
            self.created.lock().unwrap().push(name.to_string());
            Ok((format!("fake-{name}"), *pid))
        }

        async fn remove(&self, id: &str) -> DvnetResult<()> {
            self.created.lock().unwrap().retain(|n| format!("fake-{n}") != id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_then_remove_round_trips() {
        let rt = FakeRuntime::new();
        let (id, pid) = rt.run("alpine", "A-1").await.unwrap();
        assert_eq!(id, "fake-A-1");
        assert!(pid > 1000);
        assert_eq!(rt.created_names(), vec!["A-1".to_string()]);
        rt.remove(&id).await.unwrap();
        assert!(rt.created_names().is_empty());
    }
}
