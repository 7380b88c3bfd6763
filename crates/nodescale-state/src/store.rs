//! StateStore — redb-backed state persistence for nodescale.
//!
//! Provides typed CRUD operations over scaling specs, their published
//! status, and bootstrap results. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        // Opening a table in a write transaction creates it if absent.
        for table in [AUTOSCALERS, STATUSES, BOOTSTRAP] {
            txn.open_table(table).map_err(StateError::table(table.name()))?;
        }
        txn.commit()?;
        Ok(())
    }

    // ── Scaling specs ──────────────────────────────────────────────

    /// Insert or update a scaling spec.
    pub fn put_autoscaler(&self, spec: &ScalingSpec) -> StateResult<()> {
        self.put(AUTOSCALERS, &spec.name, spec)?;
        debug!(name = %spec.name, "scaling spec stored");
        Ok(())
    }

    /// Get a scaling spec by name.
    pub fn get_autoscaler(&self, name: &str) -> StateResult<Option<ScalingSpec>> {
        self.get(AUTOSCALERS, name)
    }

    /// List all scaling specs, ordered by name.
    pub fn list_autoscalers(&self) -> StateResult<Vec<ScalingSpec>> {
        self.list(AUTOSCALERS)
    }

    /// Delete a scaling spec and its status. Returns true if the spec existed.
    pub fn delete_autoscaler(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove(AUTOSCALERS, name)?;
        self.remove(STATUSES, name)?;
        debug!(%name, existed, "scaling spec deleted");
        Ok(existed)
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Publish the status for a spec.
    pub fn put_status(&self, name: &str, status: &ScalingStatus) -> StateResult<()> {
        self.put(STATUSES, name, status)
    }

    /// Last published status for a spec.
    pub fn get_status(&self, name: &str) -> StateResult<Option<ScalingStatus>> {
        self.get(STATUSES, name)
    }

    /// Drop the status for a spec. Returns true if it existed.
    pub fn delete_status(&self, name: &str) -> StateResult<bool> {
        self.remove(STATUSES, name)
    }

    // ── Bootstrap ──────────────────────────────────────────────────

    /// Record the outcome of a bootstrap run, keyed by cluster name.
    pub fn put_bootstrap(&self, state: &BootstrapState) -> StateResult<()> {
        self.put(BOOTSTRAP, &state.cluster.name, state)?;
        debug!(cluster = %state.cluster.name, "bootstrap state recorded");
        Ok(())
    }

    /// Last recorded bootstrap for a cluster.
    pub fn get_bootstrap(&self, cluster: &str) -> StateResult<Option<BootstrapState>> {
        self.get(BOOTSTRAP, cluster)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let name = table.name();
        let value = serde_json::to_vec(value).map_err(|source| StateError::Encode {
            table: name.to_string(),
            key: key.to_string(),
            source,
        })?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(table).map_err(StateError::table(name))?;
            table
                .insert(key, value.as_slice())
                .map_err(StateError::storage(name))?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let name = table.name();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table).map_err(StateError::table(name))?;
        match table.get(key).map_err(StateError::storage(name))? {
            Some(guard) => decode(name, key, guard.value()).map(Some),
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let name = table.name();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table).map_err(StateError::table(name))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(StateError::storage(name))? {
            let (key, value) = entry.map_err(StateError::storage(name))?;
            results.push(decode(name, key.value(), value.value())?);
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let name = table.name();
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(StateError::table(name))?;
            existed = table
                .remove(key)
                .map_err(StateError::storage(name))?
                .is_some();
        }
        txn.commit()?;
        Ok(existed)
    }
}

fn decode<T: DeserializeOwned>(table: &str, key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|source| StateError::Corrupt {
        table: table.to_string(),
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_spec(name: &str) -> ScalingSpec {
        ScalingSpec {
            name: name.to_string(),
            node_group: "workers".to_string(),
            metric: MetricTarget {
                query: "avg(node_cpu_reserved_ratio)".to_string(),
                semantics: MetricSemantics::AverageUtilization,
                target: 60.0,
            },
            min_replicas: None,
            max_replicas: Some(20),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_bootstrap(cluster: &str) -> BootstrapState {
        BootstrapState {
            cluster: ClusterDescriptor {
                name: cluster.to_string(),
                endpoint: "https://api.example".to_string(),
                certificate_authority: "Y2E=".to_string(),
                security_group_ids: vec!["sg-1".to_string()],
                cluster_security_group_id: None,
                subnet_ids: vec!["subnet-1".to_string()],
            },
            role: Role {
                name: "NodescaleNodeRole".to_string(),
                arn: "arn:aws:iam::000000000000:role/NodescaleNodeRole".to_string(),
                assume_role_policy: "{}".to_string(),
            },
            attached_policies: vec![],
            instance_profile: InstanceProfile {
                name: "NodescaleNodeRole".to_string(),
                arn: "arn:aws:iam::000000000000:instance-profile/NodescaleNodeRole".to_string(),
                roles: vec!["NodescaleNodeRole".to_string()],
            },
            launch_template: LaunchTemplate {
                id: "lt-1".to_string(),
                name: format!("NodescaleLaunchTemplate-{cluster}"),
                data: LaunchTemplateData {
                    image_id: "ami-1".to_string(),
                    instance_profile_name: "NodescaleNodeRole".to_string(),
                    security_group_ids: vec!["sg-1".to_string()],
                    user_data: String::new(),
                    instance_tags: BTreeMap::new(),
                },
            },
            zonal_subnets: BTreeMap::from([(
                "us-west-2a".to_string(),
                Subnet {
                    id: "subnet-1".to_string(),
                    zone: "us-west-2a".to_string(),
                },
            )]),
            auth: AuthRegistration {
                role_arn: "arn:aws:iam::000000000000:role/NodescaleNodeRole".to_string(),
                username: "system:node:{{EC2PrivateDNSName}}".to_string(),
                groups: vec!["system:nodes".to_string()],
            },
        }
    }

    // ── Spec CRUD ──────────────────────────────────────────────────

    #[test]
    fn autoscaler_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let spec = test_spec("reserved-capacity");

        store.put_autoscaler(&spec).unwrap();
        let retrieved = store.get_autoscaler("reserved-capacity").unwrap();

        assert_eq!(retrieved, Some(spec));
    }

    #[test]
    fn autoscaler_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_autoscaler("nothing").unwrap().is_none());
    }

    #[test]
    fn autoscaler_list_is_ordered_by_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_autoscaler(&test_spec("b")).unwrap();
        store.put_autoscaler(&test_spec("a")).unwrap();
        store.put_autoscaler(&test_spec("c")).unwrap();

        let names: Vec<String> = store
            .list_autoscalers()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn autoscaler_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut spec = test_spec("queue");
        store.put_autoscaler(&spec).unwrap();

        spec.metric.target = 4.0;
        spec.updated_at = 2000;
        store.put_autoscaler(&spec).unwrap();

        let retrieved = store.get_autoscaler("queue").unwrap().unwrap();
        assert_eq!(retrieved.metric.target, 4.0);
        assert_eq!(retrieved.updated_at, 2000);
        assert_eq!(store.list_autoscalers().unwrap().len(), 1);
    }

    #[test]
    fn autoscaler_delete_drops_status() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_autoscaler(&test_spec("queue")).unwrap();
        store.put_status("queue", &ScalingStatus::default()).unwrap();

        assert!(store.delete_autoscaler("queue").unwrap());
        assert!(!store.delete_autoscaler("queue").unwrap());
        assert!(store.get_status("queue").unwrap().is_none());
    }

    // ── Status ─────────────────────────────────────────────────────

    #[test]
    fn status_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let status = ScalingStatus {
            phase: ScalingPhase::Healthy,
            current_replicas: Some(8),
            desired_replicas: Some(8),
            metric_value: Some(85.0),
            ..Default::default()
        };

        store.put_status("reserved-capacity", &status).unwrap();
        assert_eq!(store.get_status("reserved-capacity").unwrap(), Some(status));
        assert!(store.delete_status("reserved-capacity").unwrap());
        assert!(store.get_status("reserved-capacity").unwrap().is_none());
    }

    // ── Bootstrap ──────────────────────────────────────────────────

    #[test]
    fn bootstrap_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let state = test_bootstrap("dev");

        store.put_bootstrap(&state).unwrap();
        assert_eq!(store.get_bootstrap("dev").unwrap(), Some(state));
        assert!(store.get_bootstrap("prod").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_autoscaler(&test_spec("queue")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let spec = store.get_autoscaler("queue").unwrap();
        assert_eq!(spec.map(|s| s.name), Some("queue".to_string()));
    }

    #[test]
    fn corrupt_entry_names_table_and_key() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_autoscaler(&test_spec("good")).unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(AUTOSCALERS).unwrap();
            table.insert("broken", b"{not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let err = store.get_autoscaler("broken").unwrap_err();
        assert!(matches!(
            &err,
            StateError::Corrupt { table, key, .. } if table == "autoscalers" && key == "broken"
        ));
        assert!(matches!(
            store.list_autoscalers().unwrap_err(),
            StateError::Corrupt { .. }
        ));
        assert!(store.get_autoscaler("good").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_autoscalers().unwrap().is_empty());
        assert!(store.get_status("any").unwrap().is_none());
        assert!(!store.delete_autoscaler("nope").unwrap());
        assert!(!store.delete_status("nope").unwrap());
    }
}
