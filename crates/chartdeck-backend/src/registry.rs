//! Image registry and service → image lookup interfaces.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BackendError, BackendResult};

/// A container registry that can enumerate tags and date them.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Tags of `image`, in registry order.
    async fn list_tags(&self, image: &str) -> BackendResult<Vec<String>>;

    /// Creation time of `image:tag`.
    async fn tag_created_at(&self, image: &str, tag: &str) -> BackendResult<DateTime<Utc>>;
}

/// Resolves the image reference a running service was built from.
#[async_trait]
pub trait ServiceImageLookup: Send + Sync {
    async fn image_for_service(&self, service: &str) -> BackendResult<String>;
}

/// Lookup backed by a fixed service → image table.
#[derive(Debug, Clone, Default)]
pub struct StaticImageLookup {
    images: HashMap<String, String>,
}

impl StaticImageLookup {
    pub fn new(images: HashMap<String, String>) -> Self {
        Self { images }
    }
}

#[async_trait]
impl ServiceImageLookup for StaticImageLookup {
    async fn image_for_service(&self, service: &str) -> BackendResult<String> {
        self.images
            .get(service)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("no image configured for service {service}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_lookup_resolves_configured_services() {
        let lookup = StaticImageLookup::new(HashMap::from([(
            "billing".to_string(),
            "registry.example.com/billing".to_string(),
        )]));

        assert_eq!(
            lookup.image_for_service("billing").await.unwrap(),
            "registry.example.com/billing"
        );
        assert!(matches!(
            lookup.image_for_service("ledger").await,
            Err(BackendError::NotFound(_))
        ));
    }
}
