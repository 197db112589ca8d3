use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mirror_config::shared::PgConnectionConfig;

use crate::connection::{Connection, ConnectionFactory, ConnectionRole};
use crate::error::SyncResult;

#[derive(Debug)]
struct TestConnectionInner {
    name: String,
    role: ConnectionRole,
    tables: BTreeMap<String, Vec<String>>,
    disconnected: AtomicBool,
}

/// In-memory [`Connection`] that only knows the tables of its schemas.
#[derive(Debug, Clone)]
pub struct TestConnection {
    inner: Arc<TestConnectionInner>,
}

impl TestConnection {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> ConnectionRole {
        self.inner.role
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::SeqCst)
    }
}

impl Connection for TestConnection {
    async fn list_tables(&self, schema: &str) -> SyncResult<Vec<String>> {
        Ok(self.inner.tables.get(schema).cloned().unwrap_or_default())
    }

    async fn disconnect(&self) {
        self.inner.disconnected.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    // Source name -> schema -> tables.
    tables: HashMap<String, BTreeMap<String, Vec<String>>>,
    created: Vec<TestConnection>,
}

/// [`ConnectionFactory`] producing [`TestConnection`]s and remembering each of them.
#[derive(Debug, Clone, Default)]
pub struct TestConnectionFactory {
    inner: Arc<Mutex<FactoryInner>>,
}

impl TestConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `tables` discoverable in `schema` of source `source`.
    pub fn with_tables(self, source: &str, schema: &str, tables: &[&str]) -> Self {
        self.inner
            .lock()
            .unwrap()
            .tables
            .entry(source.to_string())
            .or_default()
            .insert(
                schema.to_string(),
                tables.iter().map(|table| table.to_string()).collect(),
            );

        self
    }

    /// Every connection created so far, in creation order.
    pub fn created(&self) -> Vec<TestConnection> {
        self.inner.lock().unwrap().created.clone()
    }

    /// Number of connections created so far for `role`.
    pub fn created_count(&self, role: ConnectionRole) -> usize {
        self.created()
            .iter()
            .filter(|connection| connection.role() == role)
            .count()
    }
}

impl ConnectionFactory for TestConnectionFactory {
    type Connection = TestConnection;

    fn create(
        &self,
        name: &str,
        _config: &PgConnectionConfig,
        role: ConnectionRole,
    ) -> SyncResult<TestConnection> {
        let mut inner = self.inner.lock().unwrap();

        let connection = TestConnection {
            inner: Arc::new(TestConnectionInner {
                name: name.to_string(),
                role,
                tables: inner.tables.get(name).cloned().unwrap_or_default(),
                disconnected: AtomicBool::new(false),
            }),
        };
        inner.created.push(connection.clone());

        Ok(connection)
    }
}
