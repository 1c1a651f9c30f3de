//! Docker Engine backend over the local Unix socket.

use super::{
    ContainerDetails, ContainerRecord, ContainerSpec, ExecFrame, ExecSpec, ExecStartOptions,
    ExecStatus, ExecStream, ImageRecord, RuntimeApi,
};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, RenameContainerOptionsBuilder,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::{StreamExt, TryStreamExt};
use hostshim_shared::errors::{ShimError, ShimResult};
use std::path::Path;

/// Request timeout handed to the client. Applies to obtaining a response,
/// not to reading an exec stream.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// `RuntimeApi` backed by the Docker Engine API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon listening on `socket_path`.
    ///
    /// No request is made; an unreachable daemon surfaces on first use.
    pub fn connect(socket_path: &Path) -> ShimResult<Self> {
        let path = socket_path.to_str().ok_or_else(|| {
            ShimError::Config(format!(
                "socket path is not valid UTF-8: {}",
                socket_path.display()
            ))
        })?;
        let docker = Docker::connect_with_unix(path, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(|e| ShimError::runtime("connect", e))?;
        tracing::debug!(socket = %path, "Connected to container runtime");
        Ok(Self { docker })
    }

    /// Wrap an already configured client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl RuntimeApi for DockerRuntime {
    async fn list_containers(&self, all: bool) -> ShimResult<Vec<ContainerRecord>> {
        let options = ListContainersOptionsBuilder::new().all(all).build();
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ShimError::runtime("list_containers", e))?;

        Ok(containers
            .into_iter()
            .map(|summary| ContainerRecord {
                id: summary.id.unwrap_or_default(),
                names: summary.names.unwrap_or_default(),
                image: summary.image.unwrap_or_default(),
                image_id: summary.image_id,
                labels: summary.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> ShimResult<()> {
        let (from_image, tag) = split_image_reference(reference);
        let mut builder = CreateImageOptionsBuilder::new().from_image(from_image);
        if let Some(tag) = tag {
            builder = builder.tag(tag);
        }

        tracing::debug!(image = %reference, "Pulling image");
        self.docker
            .create_image(Some(builder.build()), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| ShimError::runtime("pull_image", e))?;
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> ShimResult<ImageRecord> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| ShimError::runtime("inspect_image", e))?;
        Ok(ImageRecord {
            id: image.id,
            repo_tags: image.repo_tags.unwrap_or_default(),
        })
    }

    async fn get_container(&self, id: &str) -> ShimResult<ContainerDetails> {
        let inspected = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| ShimError::runtime("inspect_container", e))?;

        let running = inspected
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let (binds, privileged) = inspected
            .host_config
            .map(|hc| (hc.binds.unwrap_or_default(), hc.privileged.unwrap_or(false)))
            .unwrap_or_default();
        let labels = inspected
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default();

        Ok(ContainerDetails {
            id: inspected.id.unwrap_or_else(|| id.to_string()),
            name: inspected.name.unwrap_or_default(),
            image: inspected.image.unwrap_or_default(),
            running,
            privileged,
            binds,
            labels,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> ShimResult<String> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            labels: Some(spec.labels.clone()),
            attach_stdin: Some(false),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                privileged: Some(spec.privileged),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(|e| ShimError::runtime("create_container", e))?;
        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, "Runtime warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> ShimResult<()> {
        self.docker
            .rename_container(id, RenameContainerOptionsBuilder::new().name(new_name).build())
            .await
            .map_err(|e| ShimError::runtime("rename_container", e))
    }

    async fn start_container(&self, id: &str) -> ShimResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| ShimError::runtime("start_container", e))
    }

    async fn remove_container(&self, id: &str) -> ShimResult<()> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(ShimError::runtime("remove_container", e)),
        }
    }

    async fn exec_create(&self, container_id: &str, spec: &ExecSpec) -> ShimResult<String> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            tty: Some(spec.tty),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(|e| ShimError::runtime("exec_create", e))?;
        Ok(created.id)
    }

    async fn exec_start(
        &self,
        exec_id: &str,
        options: ExecStartOptions,
    ) -> ShimResult<ExecStream> {
        let start = StartExecOptions {
            detach: false,
            tty: options.tty,
            ..Default::default()
        };
        match self
            .docker
            .start_exec(exec_id, Some(start))
            .await
            .map_err(|e| ShimError::runtime("exec_start", e))?
        {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .map(|item| {
                        item.map(ExecFrame::from)
                            .map_err(|e| ShimError::Stream(e.to_string()))
                    })
                    .boxed();
                Ok(ExecStream {
                    output,
                    input: options.stdin.then_some(input),
                })
            }
            StartExecResults::Detached => Err(ShimError::Stream(format!(
                "exec {exec_id} started detached, no stream to attach"
            ))),
        }
    }

    async fn exec_inspect(&self, exec_id: &str) -> ShimResult<ExecStatus> {
        let inspected = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| ShimError::runtime("exec_inspect", e))?;
        Ok(ExecStatus {
            running: inspected.running.unwrap_or(false),
            exit_code: inspected.exit_code,
        })
    }
}

impl From<LogOutput> for ExecFrame {
    fn from(output: LogOutput) -> Self {
        match output {
            LogOutput::StdErr { message } => ExecFrame::Stderr(message),
            LogOutput::Console { message } => ExecFrame::Console(message),
            // The daemon writes echoed stdin on the stdout channel.
            LogOutput::StdOut { message } | LogOutput::StdIn { message } => {
                ExecFrame::Stdout(message)
            }
        }
    }
}

/// Split `repo[:tag]` for the pull API.
///
/// Digest references are passed through whole. A missing tag means `latest`.
/// A `:` before the last `/` belongs to a registry port, not a tag.
fn split_image_reference(reference: &str) -> (&str, Option<&str>) {
    if reference.contains('@') {
        return (reference, None);
    }
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&reference[..split], Some(&reference[split + 1..]))
        }
        None => (reference, Some("latest")),
    }
}
