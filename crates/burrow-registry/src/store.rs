//! Node registry store.
//!
//! The registry is the single source of truth for routing. The invariant it
//! guards: `proxy_port` is `Some` if and only if `connection_valid` is true.
//! Every write that touches either column sets both in one UPDATE statement,
//! so a concurrent reader can never observe the pair out of step.

use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use sea_orm::sea_query::Expr;
use thiserror::Error;
use tracing::debug;

use crate::entities::node;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Keyed store of node records, one row per registered node.
///
/// Clones share the underlying connection pool, so handlers can hold their
/// own copy. Updates are per-row, keyed by node name; operations on
/// different nodes never contend.
#[derive(Clone)]
pub struct NodeStore {
    db: DatabaseConnection,
}

impl NodeStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Register a new node, disconnected until a tunnel is provisioned.
    pub async fn create(
        &self,
        name: &str,
        password: &str,
        service_port: u16,
    ) -> Result<node::Model, RegistryError> {
        if self.get(name).await?.is_some() {
            return Err(RegistryError::DuplicateNode(name.to_string()));
        }

        let record = node::ActiveModel {
            name: Set(name.to_string()),
            password: Set(password.to_string()),
            service_port: Set(i32::from(service_port)),
            connection_valid: Set(false),
            proxy_port: Set(None),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        };

        debug!(node = %name, service_port, "registering node");
        Ok(record.insert(&self.db).await?)
    }

    /// Fetch a node by name.
    pub async fn get(&self, name: &str) -> Result<Option<node::Model>, RegistryError> {
        Ok(node::Entity::find()
            .filter(node::Column::Name.eq(name))
            .one(&self.db)
            .await?)
    }

    /// Fetch a node by name, erroring if it is not registered.
    pub async fn get_required(&self, name: &str) -> Result<node::Model, RegistryError> {
        self.get(name)
            .await?
            .ok_or_else(|| RegistryError::NodeNotFound(name.to_string()))
    }

    /// Exact name + password equality. Pure read, no side effects.
    pub async fn credentials_match(&self, name: &str, password: &str) -> Result<bool, RegistryError> {
        Ok(self
            .get(name)
            .await?
            .is_some_and(|record| record.password == password))
    }

    /// Record a live tunnel: sets `connection_valid` and `proxy_port`
    /// together. This is the only place the pair is ever set.
    pub async fn mark_connected(&self, name: &str, proxy_port: u16) -> Result<(), RegistryError> {
        let record = self.get_required(name).await?;

        let mut record: node::ActiveModel = record.into();
        record.connection_valid = Set(true);
        record.proxy_port = Set(Some(i32::from(proxy_port)));
        record.update(&self.db).await?;

        debug!(node = %name, proxy_port, "node marked connected");
        Ok(())
    }

    /// Record a dead tunnel: clears `connection_valid` and `proxy_port`
    /// together. Idempotent for already-disconnected nodes.
    pub async fn mark_disconnected(&self, name: &str) -> Result<(), RegistryError> {
        let record = self.get_required(name).await?;

        let mut record: node::ActiveModel = record.into();
        record.connection_valid = Set(false);
        record.proxy_port = Set(None);
        record.update(&self.db).await?;

        debug!(node = %name, "node marked disconnected");
        Ok(())
    }

    /// True while a live tunnel backs the node. Unregistered names read as
    /// false rather than erroring, since callers poll this in a loop.
    pub async fn connection_valid(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self
            .get(name)
            .await?
            .is_some_and(|record| record.connection_valid))
    }

    /// Mark every node disconnected in one statement. Run at broker
    /// startup: no tunnel survives the process that owned it, so rows
    /// restored from disk must not claim otherwise.
    pub async fn reset_connections(&self) -> Result<u64, RegistryError> {
        let result = node::Entity::update_many()
            .col_expr(node::Column::ConnectionValid, Expr::value(false))
            .col_expr(node::Column::ProxyPort, Expr::value(Option::<i32>::None))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
