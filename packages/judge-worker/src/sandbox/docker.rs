use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use tracing::debug;

use super::{ContainerRuntime, ContainerSpec, RawExit, SandboxError};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the Docker Engine API.
pub struct DockerRuntime {
    docker: Docker,
}

fn runtime_error(e: DockerError) -> SandboxError {
    SandboxError::Runtime(e.to_string())
}

fn is_not_found(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl DockerRuntime {
    /// Connect to `host` (`unix://` socket or `tcp://`/`http://` address), or
    /// to the local defaults when unset.
    pub fn connect(host: Option<&str>) -> Result<Self, SandboxError> {
        let docker = match host {
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(runtime_error)?;
        Ok(Self { docker })
    }

    async fn collect_logs(&self, id: &str) -> Result<(String, String), SandboxError> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut logs = self.docker.logs(id, options);
        while let Some(chunk) = logs.next().await {
            match chunk.map_err(runtime_error)? {
                LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                _ => {}
            }
        }
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(runtime_error(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            let info = progress.map_err(runtime_error)?;
            if let Some(status) = info.status {
                debug!(image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(spec.memory_bytes),
                memory_swap: Some(spec.memory_bytes),
                nano_cpus: Some(spec.cpu_count * 1_000_000_000),
                network_mode: Some("none".to_string()),
                auto_remove: Some(false),
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(runtime_error)?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(runtime_error)
    }

    async fn run_container(&self, id: &str) -> Result<RawExit, SandboxError> {
        self.start_container(id).await?;

        let mut exit_code = 0;
        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        while let Some(status) = wait.next().await {
            match status {
                Ok(response) => exit_code = response.status_code,
                // Non-zero exits surface as an error on the wait stream.
                Err(DockerError::DockerContainerWaitError { code, .. }) => exit_code = code,
                Err(e) => return Err(runtime_error(e)),
            }
        }

        let (stdout, stderr) = self.collect_logs(id).await?;
        let oom_killed = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(runtime_error)?
            .state
            .and_then(|state| state.oom_killed)
            .unwrap_or(false);

        Ok(RawExit {
            exit_code,
            stdout,
            stderr,
            oom_killed,
        })
    }

    async fn exec(&self, id: &str, cmd: &[String], working_dir: &str) -> Result<RawExit, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    working_dir: Some(working_dir.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(runtime_error)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(runtime_error)?
        {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(runtime_error)? {
                    LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                    LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(runtime_error)?;
        Ok(RawExit {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
            oom_killed: false,
        })
    }

    async fn memory_usage(&self, id: &str) -> Result<Option<u64>, SandboxError> {
        let mut stats = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        match stats.next().await {
            Some(Ok(stats)) => Ok(stats.memory_stats.usage),
            Some(Err(e)) => Err(runtime_error(e)),
            None => Ok(None),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        match self.docker.remove_container(id, options).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(runtime_error(e)),
        }
    }
}
