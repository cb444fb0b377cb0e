//! Lazily loaded, self-refreshing access to a license pool.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::anchors::TrustAnchors;
use crate::clients::ClientInfo;
use crate::config::PoolConfig;
use crate::error::LicenseResult;
use crate::pool::LicensePool;

/// Hands out the service's license pool.
///
/// The pool is created and loaded on first use. Later calls return the
/// same pool, reloading it first when its sources changed on disk.
pub struct PoolProvider {
    config: PoolConfig,
    anchors: TrustAnchors,
    client_info: Arc<dyn ClientInfo>,
    pool: Mutex<Option<Arc<LicensePool>>>,
}

impl PoolProvider {
    #[must_use]
    pub fn new(config: PoolConfig, anchors: TrustAnchors, client_info: Arc<dyn ClientInfo>) -> Self {
        Self {
            config,
            anchors,
            client_info,
            pool: Mutex::new(None),
        }
    }

    /// Returns the pool, loading or refreshing it as needed.
    ///
    /// A failed refresh is logged and the previously loaded contents are
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`](crate::LicenseError::Config) for
    /// out-of-range percentages, or the load error if the pool has never
    /// been loaded successfully.
    pub fn pool(&self) -> LicenseResult<Arc<LicensePool>> {
        let mut slot = self.pool.lock();

        if let Some(pool) = slot.as_ref() {
            if pool.modified() {
                info!("License sources changed, reloading");
                if let Err(e) = pool.load() {
                    warn!(error = %e, "Reloading licenses failed, keeping previous licenses");
                }
            }
            return Ok(Arc::clone(pool));
        }

        self.config.validate()?;
        let pool = LicensePool::new(
            self.config.clone(),
            self.anchors.clone(),
            Arc::clone(&self.client_info),
        );
        pool.load()?;
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Drops the cached pool; the next [`pool`](Self::pool) call builds a
    /// new one.
    pub fn invalidate(&self) {
        self.pool.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientNumbers;

    fn provider() -> PoolProvider {
        PoolProvider::new(
            PoolConfig::default(),
            TrustAnchors::embedded().unwrap(),
            Arc::new(ClientNumbers::new(3, 1, 0)),
        )
    }

    #[test]
    fn pool_is_reused_until_invalidated() {
        let provider = provider();
        let first = provider.pool().unwrap();
        let second = provider.pool().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.client_numbers().all, 4);

        provider.invalidate();
        let third = provider.pool().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn invalid_config_is_rejected_before_loading() {
        let provider = PoolProvider::new(
            PoolConfig {
                over_limit_percent: u32::MAX,
                ..PoolConfig::default()
            },
            TrustAnchors::embedded().unwrap(),
            Arc::new(ClientNumbers::new(50, 0, 0)),
        );
        assert!(matches!(
            provider.pool(),
            Err(crate::LicenseError::Config(_))
        ));
    }
}
