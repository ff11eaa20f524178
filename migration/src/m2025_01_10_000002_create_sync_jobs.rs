//! Migration to create the sync_jobs table.
//!
//! One row per sync attempt, carrying lifecycle status, timing, and the
//! completion stats reported by the external worker. There is deliberately no
//! foreign key to sync_apps: deleting an application keeps its job history,
//! and jobs denormalize the app name for display after deletion.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::AppId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::AppName).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::DurationSeconds).big_integer().null())
                    .col(ColumnDef::new(SyncJobs::TablesProcessed).integer().null())
                    .col(ColumnDef::new(SyncJobs::RowsImported).big_integer().null())
                    .col(ColumnDef::new(SyncJobs::ErrorMessage).text().null())
                    .col(ColumnDef::new(SyncJobs::LogContent).text().null())
                    .col(ColumnDef::new(SyncJobs::TriggeredBy).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Per-app history, newest first.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_sync_jobs_app_started ON sync_jobs (app_id, started_at DESC)".to_string(),
            ))
            .await?;

        // Status views (dashboard filters, sweeper scans).
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_status_started")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::Status)
                    .col(SyncJobs::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_jobs_status_started").to_owned())
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_sync_jobs_app_started".to_string(),
            ))
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    AppId,
    AppName,
    Status,
    StartedAt,
    CompletedAt,
    DurationSeconds,
    TablesProcessed,
    RowsImported,
    ErrorMessage,
    LogContent,
    TriggeredBy,
    CreatedAt,
    UpdatedAt,
}
