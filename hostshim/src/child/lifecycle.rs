//! Create-or-reuse lifecycle for the child container.

use super::ChildHandle;
use crate::engine::{ContainerDetails, ContainerRecord, ContainerSpec, RuntimeApi};
use crate::options::ShimOptions;
use hostshim_shared::constants::{defaults, labels};
use hostshim_shared::errors::{ShimError, ShimResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Finds, validates, creates and starts the child container.
pub struct ChildManager {
    runtime: Arc<dyn RuntimeApi>,
    /// `parent_mount_path:child_mount_path`
    bind: String,
}

impl ChildManager {
    pub fn new(runtime: Arc<dyn RuntimeApi>, options: &ShimOptions) -> Self {
        Self {
            runtime,
            bind: options.bind_spec(),
        }
    }

    /// Return a handle to a running child named `name`, creating it from
    /// `image` when none exists.
    ///
    /// Calling this repeatedly with the same name reuses the same container.
    pub async fn ensure_child(&self, name: &str, image: &str) -> ShimResult<ChildHandle> {
        match self.find_child(name).await? {
            Some(record) => self.adopt(record, name).await,
            None => self.create(name, image).await,
        }
    }

    /// Locate an existing child.
    ///
    /// Only containers whose name contains `name` are candidates. Among
    /// them, one labelled as the child named `name` wins over the first
    /// plain match.
    pub async fn find_child(&self, name: &str) -> ShimResult<Option<ContainerRecord>> {
        let mut containers = self.runtime.list_containers(true).await?;
        containers.retain(|c| c.name_contains(name));

        let index = containers
            .iter()
            .position(|c| {
                c.has_label(labels::ROLE, labels::ROLE_CHILD) && c.has_label(labels::NAME, name)
            })
            .or_else(|| (!containers.is_empty()).then_some(0));

        Ok(index.map(|i| containers.swap_remove(i)))
    }

    async fn adopt(&self, record: ContainerRecord, name: &str) -> ShimResult<ChildHandle> {
        let details = self.runtime.get_container(&record.id).await?;
        self.check_compatible(&details, name)?;

        if !details.running {
            tracing::info!(container_id = %details.id, "Starting stopped child container");
            self.runtime
                .start_container(&details.id)
                .await
                .map_err(|e| create_failed(name, e))?;
        }

        tracing::debug!(container_id = %details.id, name, "Reusing existing child container");
        Ok(ChildHandle {
            id: details.id,
            name: name.to_string(),
            image: details.image,
            adopted: true,
        })
    }

    fn check_compatible(&self, details: &ContainerDetails, name: &str) -> ShimResult<()> {
        let incompatible = |reason: String| ShimError::ContainerIncompatible {
            name: name.to_string(),
            reason,
        };

        if !details.privileged {
            return Err(incompatible(format!(
                "container {} is not privileged",
                details.id
            )));
        }
        if !details.binds.iter().any(|b| bind_matches(b, &self.bind)) {
            return Err(incompatible(format!(
                "expected bind mount {}, found [{}]",
                self.bind,
                details.binds.join(", ")
            )));
        }
        Ok(())
    }

    async fn create(&self, name: &str, image: &str) -> ShimResult<ChildHandle> {
        tracing::info!(name, image, bind = %self.bind, "Creating child container");

        let spec = self.child_spec(name, image);
        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| create_failed(name, e))?;

        if let Err(e) = self.runtime.rename_container(&id, name).await {
            self.discard(&id).await;
            // A concurrent caller may have claimed the name first.
            if let Some(record) = self.find_child(name).await? {
                tracing::debug!(
                    container_id = %record.id,
                    name,
                    "Lost child name race, adopting winner"
                );
                return self.adopt(record, name).await;
            }
            return Err(create_failed(name, e));
        }
        if let Err(e) = self.runtime.start_container(&id).await {
            self.discard(&id).await;
            return Err(create_failed(name, e));
        }

        tracing::debug!(container_id = %id, name, "Child container started");
        Ok(ChildHandle {
            id,
            name: name.to_string(),
            image: image.to_string(),
            adopted: false,
        })
    }

    /// Remove a half-built child so later discovery cannot adopt it.
    async fn discard(&self, id: &str) {
        if let Err(e) = self.runtime.remove_container(id).await {
            tracing::warn!(
                container_id = %id,
                error = %e,
                "Failed to remove half-built child container"
            );
        }
    }

    fn child_spec(&self, name: &str, image: &str) -> ContainerSpec {
        let mut child_labels = HashMap::new();
        child_labels.insert(labels::ROLE.to_string(), labels::ROLE_CHILD.to_string());
        child_labels.insert(labels::NAME.to_string(), name.to_string());

        ContainerSpec {
            image: image.to_string(),
            cmd: defaults::IDLE_COMMAND.iter().map(|s| s.to_string()).collect(),
            binds: vec![self.bind.clone()],
            privileged: true,
            labels: child_labels,
            attach_stdout: false,
            attach_stderr: false,
        }
    }
}

fn create_failed(name: &str, err: ShimError) -> ShimError {
    ShimError::ContainerCreateFailed {
        name: name.to_string(),
        message: err.to_string(),
    }
}

/// Whether a runtime bind entry (`src:dst[:opts]`) maps `expected` (`src:dst`).
fn bind_matches(bind: &str, expected: &str) -> bool {
    bind == expected
        || bind
            .strip_prefix(expected)
            .is_some_and(|rest| rest.starts_with(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_match_ignores_mount_options() {
        assert!(bind_matches("/:/mnt/root", "/:/mnt/root"));
        assert!(bind_matches("/:/mnt/root:rw", "/:/mnt/root"));
        assert!(!bind_matches("/:/mnt/rootfs", "/:/mnt/root"));
        assert!(!bind_matches("/home:/mnt/root", "/:/mnt/root"));
    }
}
