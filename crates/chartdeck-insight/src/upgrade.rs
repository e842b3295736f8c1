//! Upgrade detection for running services.
//!
//! A newer tag qualifies only if it was created after the current tag
//! *and* canonicalizes to a larger number. Of the qualifying tags, the
//! last one in registry order is reported.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use chartdeck_backend::{ImageRegistry, ServiceImageLookup, TagRecord};

use crate::cache::{CachePolicy, CacheStats, PolicyCache};
use crate::error::{InsightError, InsightResult};
use crate::version::canonicalize;

/// One row of a bulk upgrade check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeQuery {
    pub service: String,
    pub current_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub service: String,
    pub current_tag: String,
    pub upgrade: Option<String>,
    /// Set when this row could not be evaluated.
    pub error: Option<String>,
}

pub struct UpgradeDetector {
    registry: Arc<dyn ImageRegistry>,
    images: Arc<dyn ServiceImageLookup>,
    /// service → image reference
    image_cache: PolicyCache<String>,
    /// `image:tag` → creation time
    tag_dates: PolicyCache<DateTime<Utc>>,
}

impl UpgradeDetector {
    pub fn new(
        registry: Arc<dyn ImageRegistry>,
        images: Arc<dyn ServiceImageLookup>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            registry,
            images,
            image_cache: PolicyCache::new(policy),
            tag_dates: PolicyCache::new(policy),
        }
    }

    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.image_cache.stats(), self.tag_dates.stats())
    }

    async fn image_for(&self, service: &str) -> InsightResult<String> {
        let image = self
            .image_cache
            .get_or_try_insert_with(service, || self.images.image_for_service(service))
            .await?;
        Ok(image)
    }

    /// Every tag of `image` with its creation time, in registry order.
    ///
    /// Tags whose creation time cannot be read are left out.
    pub async fn tags_with_dates(&self, image: &str) -> InsightResult<Vec<TagRecord>> {
        let tags = self.registry.list_tags(image).await?;
        let mut records = Vec::with_capacity(tags.len());
        for tag in tags {
            let key = format!("{image}:{tag}");
            let created = self
                .tag_dates
                .get_or_try_insert_with(&key, || self.registry.tag_created_at(image, &tag))
                .await;
            match created {
                Ok(created_at) => records.push(TagRecord { tag, created_at }),
                Err(e) => warn!(%image, %tag, error = %e, "skipping tag without creation time"),
            }
        }
        Ok(records)
    }

    /// The newest qualifying tag for `service`, if any.
    pub async fn detect_upgrade(&self, service: &str, current_tag: &str) -> InsightResult<Option<String>> {
        let image = self.image_for(service).await?;
        let records = self.tags_with_dates(&image).await?;

        let current_created = records
            .iter()
            .find(|r| r.tag == current_tag)
            .map(|r| r.created_at)
            .ok_or_else(|| InsightError::UnknownTag {
                image: image.clone(),
                tag: current_tag.to_string(),
            })?;

        let upgrade = newest_upgrade(&records, current_tag, current_created);
        debug!(%service, %current_tag, upgrade = ?upgrade, "upgrade check");
        Ok(upgrade)
    }

    /// Check many services at once, one task per row.
    ///
    /// Every row gets a report; a failing row carries its error. Reports are
    /// sorted by service name.
    pub async fn detect_many(self: &Arc<Self>, queries: Vec<UpgradeQuery>) -> Vec<UpgradeReport> {
        let mut tasks = JoinSet::new();
        for query in queries {
            let detector = self.clone();
            tasks.spawn(async move {
                let outcome = detector
                    .detect_upgrade(&query.service, &query.current_tag)
                    .await;
                let (upgrade, error) = match outcome {
                    Ok(upgrade) => (upgrade, None),
                    Err(e) => (None, Some(e.to_string())),
                };
                UpgradeReport {
                    service: query.service,
                    current_tag: query.current_tag,
                    upgrade,
                    error,
                }
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "upgrade check task failed"),
            }
        }
        reports.sort_by(|a, b| a.service.cmp(&b.service));
        reports
    }
}

/// Last record created after `current_created` with a larger canonical tag.
fn newest_upgrade(records: &[TagRecord], current_tag: &str, current_created: DateTime<Utc>) -> Option<String> {
    let current = canonicalize(current_tag);
    records
        .iter()
        .filter(|r| r.created_at > current_created)
        .filter(|r| canonicalize(&r.tag) > current)
        .next_back()
        .map(|r| r.tag.clone())
}
