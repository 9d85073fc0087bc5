//! Migration to create the checkpoint_entries table.
//!
//! Durable key/value storage for job checkpoints. Each row carries its own
//! expiry so stale entries can be skipped on read and purged in bulk.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CheckpointEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CheckpointEntries::Key)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CheckpointEntries::Value)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CheckpointEntries::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CheckpointEntries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_checkpoint_entries_expires_at")
                    .table(CheckpointEntries::Table)
                    .col(CheckpointEntries::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_checkpoint_entries_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CheckpointEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CheckpointEntries {
    Table,
    Key,
    Value,
    ExpiresAt,
    UpdatedAt,
}
