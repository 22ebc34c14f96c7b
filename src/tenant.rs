use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::{BusinessHours, Clock};
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    hours: BusinessHours,
    clock: Arc<dyn Clock>,
}

/// Keep only characters that are safe in a file name.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, hours: BusinessHours, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            hours,
            clock,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        // Keyed by the sanitized name so "a/b" and "ab" share one WAL and one engine.
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let entry = self.engines.entry(safe_name.clone());
        if let dashmap::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(
            wal_path,
            Arc::new(NotifyHub::new()),
            self.hours,
            self.clock.clone(),
        )?);
        entry.or_insert(engine.clone());

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        tracing::info!("tenant {safe_name} loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        TenantManager::new(dir, 1000, BusinessHours::default(), Arc::new(FixedClock(now)))
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = manager(test_data_dir("isolation"));

        let eng_a = tm.get_or_create("salon_a").unwrap();
        let eng_b = tm.get_or_create("salon_b").unwrap();

        // Same provider id in both tenants.
        let pid = Ulid::new();
        eng_a.create_provider(pid, None).await.unwrap();
        eng_b.create_provider(pid, None).await.unwrap();

        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        eng_a.toggle_date_override(pid, saturday).await.unwrap();

        assert!(eng_a.is_working_day(pid, saturday).await.unwrap());
        assert!(!eng_b.is_working_day(pid, saturday).await.unwrap());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let tm = manager(test_data_dir("same_eng"));

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        let evil = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        // Both spellings map to the same WAL, so they must share an engine.
        assert!(Arc::ptr_eq(&evil, &tm.get_or_create("evil").unwrap()));

        let err = tm.get_or_create("../..").err().unwrap();
        assert!(err.to_string().contains("empty tenant name"));
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let tm = manager(test_data_dir("name_too_long"));

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let tm = manager(test_data_dir("count_limit"));

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
