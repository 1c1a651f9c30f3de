//! Image resolution for the child container.

use crate::engine::RuntimeApi;
use hostshim_shared::errors::{ShimError, ShimResult};
use std::sync::Arc;

/// Resolves the image the child container is instantiated from.
pub struct ImageResolver {
    runtime: Arc<dyn RuntimeApi>,
}

impl ImageResolver {
    pub fn new(runtime: Arc<dyn RuntimeApi>) -> Self {
        Self { runtime }
    }

    /// Resolve the child image.
    ///
    /// With an explicit `image_ref`, the image is pulled and inspected and
    /// any failure is returned as [`ShimError::ImageUnavailable`]; there is no
    /// fallback to the parent's image. Without one, the image of the first
    /// container whose name contains `parent_name` is used.
    pub async fn resolve(&self, image_ref: Option<&str>, parent_name: &str) -> ShimResult<String> {
        match image_ref {
            Some(reference) => self.resolve_explicit(reference).await,
            None => self.inherit_from_parent(parent_name).await,
        }
    }

    async fn resolve_explicit(&self, reference: &str) -> ShimResult<String> {
        let unavailable = |e: ShimError| ShimError::ImageUnavailable {
            reference: reference.to_string(),
            message: e.to_string(),
        };

        tracing::info!(image = %reference, "Pulling child image");
        self.runtime.pull_image(reference).await.map_err(unavailable)?;

        let image = self
            .runtime
            .inspect_image(reference)
            .await
            .map_err(unavailable)?;

        image
            .id
            .or_else(|| image.repo_tags.into_iter().next())
            .ok_or_else(|| ShimError::ImageUnavailable {
                reference: reference.to_string(),
                message: "image has neither an id nor a repo tag".into(),
            })
    }

    async fn inherit_from_parent(&self, parent_name: &str) -> ShimResult<String> {
        let containers = self.runtime.list_containers(true).await?;
        let parent = containers
            .into_iter()
            .find(|c| c.name_contains(parent_name))
            .ok_or_else(|| ShimError::ParentNotFound(parent_name.to_string()))?;

        let image = parent
            .image_id
            .filter(|id| !id.is_empty())
            .unwrap_or(parent.image);
        tracing::debug!(
            container_id = %parent.id,
            image = %image,
            "Inheriting image from parent container"
        );
        Ok(image)
    }
}
