//! Migration to create the sync_apps table.
//!
//! Sync applications are operator-configured sync targets: a unique name, a
//! deploy credential, the set of source tables, and an optional cron schedule.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncApps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncApps::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncApps::Name).text().not_null())
                    .col(ColumnDef::new(SyncApps::Description).text().null())
                    .col(ColumnDef::new(SyncApps::DeployKey).text().not_null())
                    .col(ColumnDef::new(SyncApps::Tables).json_binary().not_null())
                    .col(ColumnDef::new(SyncApps::TableMapping).json_binary().null())
                    .col(ColumnDef::new(SyncApps::CronSchedule).text().null())
                    .col(
                        ColumnDef::new(SyncApps::CronEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncApps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncApps::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // App names are the operator-facing identity and must stay unique.
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_apps_name_unique")
                    .table(SyncApps::Table)
                    .col(SyncApps::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_apps_name_unique").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncApps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncApps {
    Table,
    Id,
    Name,
    Description,
    DeployKey,
    Tables,
    TableMapping,
    CronSchedule,
    CronEnabled,
    CreatedAt,
    UpdatedAt,
}
