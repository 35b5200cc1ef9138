//! Watermark lifecycle rules.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{Clock, SystemClock, Watermark, WatermarkError, WatermarkStore};

/// Manager for the initialize/advance/read contract of watermarks.
///
/// The manager holds no connection of its own: every operation receives
/// the store (often an open storage transaction) it should act on.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{MemoryStore, WatermarkManager};
///
/// let manager = WatermarkManager::new();
/// let mut store = MemoryStore::new();
///
/// manager.initialize(&mut store, "customers").await?;
/// let current = manager.read(&mut store, "customers").await?;
/// manager
///     .advance(&mut store, "customers", current.max_created, later)
///     .await?;
/// ```
pub struct WatermarkManager<C: Clock = SystemClock> {
    clock: C,
}

impl WatermarkManager<SystemClock> {
    /// Manager that stamps initializations with the wall clock.
    pub fn new() -> Self {
        Self { clock: SystemClock }
    }
}

impl Default for WatermarkManager<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> WatermarkManager<C> {
    /// Manager with a custom clock.
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Create the watermark of an entity with both timestamps set to now.
    ///
    /// # Errors
    ///
    /// `DuplicateEntity` if the entity already has a watermark.
    pub async fn initialize<S: WatermarkStore + ?Sized>(
        &self,
        store: &mut S,
        entity: &str,
    ) -> Result<Watermark, WatermarkError> {
        let now = self.clock.now();
        self.initialize_at(store, entity, now).await
    }

    /// Create the watermark of an entity with both timestamps set to `at`.
    pub async fn initialize_at<S: WatermarkStore + ?Sized>(
        &self,
        store: &mut S,
        entity: &str,
        at: DateTime<Utc>,
    ) -> Result<Watermark, WatermarkError> {
        if store.load_watermark(entity).await?.is_some() {
            return Err(WatermarkError::DuplicateEntity(entity.to_string()));
        }

        let watermark = Watermark::new(entity, at, at);
        store.insert_watermark(&watermark).await?;
        info!(
            "Initialized watermark for '{}': {}",
            entity,
            watermark.to_cli_string()
        );
        Ok(watermark)
    }

    /// Read the watermark of an entity.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if the entity has never been initialized.
    pub async fn read<S: WatermarkStore + ?Sized>(
        &self,
        store: &mut S,
        entity: &str,
    ) -> Result<Watermark, WatermarkError> {
        store
            .load_watermark(entity)
            .await?
            .ok_or_else(|| WatermarkError::UnknownEntity(entity.to_string()))
    }

    /// Read the watermark of an entity, `None` if it was never initialized.
    pub async fn try_read<S: WatermarkStore + ?Sized>(
        &self,
        store: &mut S,
        entity: &str,
    ) -> Result<Option<Watermark>, WatermarkError> {
        store.load_watermark(entity).await
    }

    /// Move the watermark of an entity to new maxima.
    ///
    /// The values must be the maxima observed in data already committed to
    /// the target. A value lower than the stored one is rejected with
    /// `Regression` and nothing is written; callers treat that as a skipped
    /// advance rather than a failed cycle.
    ///
    /// # Errors
    ///
    /// - `UnknownEntity` if the entity has never been initialized
    /// - `Regression` if either timestamp would decrease
    pub async fn advance<S: WatermarkStore + ?Sized>(
        &self,
        store: &mut S,
        entity: &str,
        new_max_created: DateTime<Utc>,
        new_max_modified: DateTime<Utc>,
    ) -> Result<Watermark, WatermarkError> {
        let current = self.read(store, entity).await?;

        if current.would_regress(new_max_created, new_max_modified) {
            let err = WatermarkError::Regression {
                entity: entity.to_string(),
                current_created: current.max_created,
                current_modified: current.max_modified,
                proposed_created: new_max_created,
                proposed_modified: new_max_modified,
            };
            warn!("Skipping watermark advance: {err}");
            return Err(err);
        }

        let advanced = Watermark::new(entity, new_max_created, new_max_modified);
        if advanced == current {
            return Ok(current);
        }

        store.update_watermark(&advanced).await?;
        info!(
            "Advanced watermark for '{}': {} -> {}",
            entity,
            current.to_cli_string(),
            advanced.to_cli_string()
        );
        Ok(advanced)
    }
}
