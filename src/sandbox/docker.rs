//! Docker engine backend for [`ContainerRuntime`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use super::{ContainerRuntime, ContainerSpec};

/// Talks to the local Docker daemon (socket or `DOCKER_HOST`).
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("failed to initialize Docker client")?;
        Ok(Self { docker })
    }

    /// Confirm the daemon answers before any job is fetched.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon is not reachable")?;
        Ok(())
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let host_config = HostConfig {
        mounts: Some(vec![Mount {
            typ: Some(MountTypeEnum::BIND),
            source: Some(spec.mount_source.display().to_string()),
            target: Some(spec.mount_target.clone()),
            read_only: Some(false),
            ..Default::default()
        }]),
        memory: Some(spec.memory_bytes),
        // Equal to memory: no swap on top of the ceiling
        memory_swap: Some(spec.memory_bytes),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            let info = progress.with_context(|| format!("failed to pull image {}", image))?;
            if let Some(status) = info.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .context("failed to create container")?;
        for warning in &response.warnings {
            debug!(container_id = %response.id, warning = %warning, "Create warning");
        }
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .context("failed to start container")?;
        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut stream = self.docker.wait_container(container_id, options);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; the agent still exited
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(anyhow::Error::new(e).context("container wait failed")),
            None => anyhow::bail!("wait stream closed before container {} exited", container_id),
        }
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        self.docker
            .kill_container(container_id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .context("failed to kill container")?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        self.docker
            .remove_container(container_id, options)
            .await
            .context("failed to remove container")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_container_config_applies_limits_and_mount() {
        let spec = ContainerSpec {
            name: "bounty-judge-test".to_string(),
            image: "student/agent:latest".to_string(),
            env: vec!["GEMINI_API_KEY=k".to_string()],
            mount_source: PathBuf::from("/srv/private-repo"),
            mount_target: "/workspace".to_string(),
            memory_bytes: 1 << 30,
        };
        let config = container_config(&spec);
        assert_eq!(config.image.as_deref(), Some("student/agent:latest"));
        assert_eq!(config.env.as_ref().map(Vec::len), Some(1));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(1 << 30));
        let mounts = host.mounts.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::BIND));
        assert_eq!(mounts[0].source.as_deref(), Some("/srv/private-repo"));
        assert_eq!(mounts[0].target.as_deref(), Some("/workspace"));
        assert_eq!(mounts[0].read_only, Some(false));
    }
}
