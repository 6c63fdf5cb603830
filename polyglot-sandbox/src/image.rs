//! Makes sure an isolation image is stored locally before it is used

use crate::error::{Result, SandboxError};
use crate::runtime::RuntimeProvider;
use std::sync::Arc;

/// Check-then-pull image availability.
///
/// Not transactional: two requests for the same missing image may both pull
/// it. Pulls are idempotent, so that only costs bandwidth.
#[derive(Clone)]
pub struct ImageManager {
    provider: Arc<dyn RuntimeProvider>,
}

impl ImageManager {
    pub fn new(provider: Arc<dyn RuntimeProvider>) -> Self {
        Self { provider }
    }

    /// Resolves once `image` is usable; pulls it if the local listing lacks it.
    pub async fn ensure_available(&self, image: &str) -> Result<()> {
        let listed = match self.provider.list_local_images(image).await {
            Ok(listed) => listed,
            Err(e) => {
                // A failed check falls through to the pull
                tracing::warn!(image = %image, "Local image listing failed: {}", e);
                Vec::new()
            }
        };

        if listed.iter().any(|entry| image_matches(entry, image)) {
            tracing::debug!(image = %image, "Image available locally");
            return Ok(());
        }

        tracing::info!(image = %image, provider = self.provider.name(), "Pulling image");
        self.provider
            .pull_image(image)
            .await
            .map_err(|e| SandboxError::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(image = %image, "Image pulled");
        Ok(())
    }
}

/// Whether a listed `repository:tag` satisfies the wanted reference.
///
/// A wanted reference without a tag accepts any tag of the repository.
fn image_matches(listed: &str, wanted: &str) -> bool {
    if listed == wanted {
        return true;
    }
    let (wanted_repo, wanted_tag) = split_reference(wanted);
    let (listed_repo, listed_tag) = split_reference(listed);
    listed_repo == wanted_repo && (wanted_tag.is_none() || wanted_tag == listed_tag)
}

fn split_reference(reference: &str) -> (&str, Option<&str>) {
    // A colon before the last '/' belongs to a registry port, not a tag
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&reference[..split], Some(&reference[split + 1..]))
        }
        None => (reference, None),
    }
}
