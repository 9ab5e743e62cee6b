use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use pacterp_core::TenantId;

/// Storage behind a read model row type.
///
/// Rows live and die with their tenant: every lookup carries a `TenantId`,
/// and `clear_tenant` exists so a projection can throw a tenant's rows away
/// and rebuild them from the event stream. Implementations hold one row per
/// `(tenant, key)` pair.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    /// All rows for one tenant, in no particular order.
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Drop every row of one tenant, ahead of a projection rebuild.
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// Hash-map backed store for contract summaries and project rollups.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    rows: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let rows = self.rows.read().ok()?;
        rows.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert((tenant_id, key), value);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let rows = match self.rows.read() {
            Ok(rows) => rows,
            Err(_) => return vec![],
        };

        rows.iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut rows) = self.rows.write() {
            rows.retain(|(t, _), _| *t != tenant_id);
        }
    }
}
