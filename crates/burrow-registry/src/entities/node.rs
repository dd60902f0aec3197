//! Node entity: one row per registered client identity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
    /// Surrogate primary key
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Unique node name, immutable after registration
    #[sea_orm(unique)]
    pub name: String,

    /// Shared secret compared on every account check
    pub password: String,

    /// Port on the node's machine that its service listens on
    pub service_port: i32,

    /// True only while a live tunnel backs this node
    pub connection_valid: bool,

    /// Broker-side SOCKS5 port, set exactly while the connection is valid
    pub proxy_port: Option<i32>,

    /// When the node was registered
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
