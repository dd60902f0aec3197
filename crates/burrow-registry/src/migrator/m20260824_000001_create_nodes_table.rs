//! Initial schema: the nodes table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Node::Table)
                    .if_not_exists()
                    .col(pk_auto(Node::Id))
                    .col(string_len(Node::Name, 255).not_null().unique_key())
                    .col(string_len(Node::Password, 255).not_null())
                    .col(integer(Node::ServicePort).not_null())
                    .col(boolean(Node::ConnectionValid).not_null().default(false))
                    .col(integer_null(Node::ProxyPort))
                    .col(
                        timestamp_with_time_zone(Node::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_nodes_name")
                    .table(Node::Table)
                    .col(Node::Name)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Node::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Node {
    #[sea_orm(iden = "nodes")]
    Table,
    Id,
    Name,
    Password,
    ServicePort,
    ConnectionValid,
    ProxyPort,
    CreatedAt,
}
