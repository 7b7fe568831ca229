use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Authenticators::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Authenticators::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Authenticators::UserId).uuid().not_null())
                    .col(ColumnDef::new(Authenticators::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(Authenticators::Secret).binary())
                    .col(ColumnDef::new(Authenticators::Destination).string())
                    .col(ColumnDef::new(Authenticators::State).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Authenticators::FailedAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Authenticators::LockedUntil).timestamp_with_time_zone())
                    .col(ColumnDef::new(Authenticators::LastIssuedCode).string_len(16))
                    .col(ColumnDef::new(Authenticators::LastIssuedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Authenticators::LastUsedStep).big_integer())
                    .col(ColumnDef::new(Authenticators::ConfirmedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Authenticators::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Authenticators::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // One record per (user, kind); inserts racing on it surface as conflicts.
        manager
            .create_index(
                Index::create()
                    .table(Authenticators::Table)
                    .col(Authenticators::UserId)
                    .col(Authenticators::Kind)
                    .unique()
                    .name("uq_authenticators_user_id_kind")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Authenticators::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Authenticators {
    Table,
    Id,
    UserId,
    Kind,
    Secret,
    Destination,
    State,
    FailedAttempts,
    LockedUntil,
    LastIssuedCode,
    LastIssuedAt,
    LastUsedStep,
    ConfirmedAt,
    CreatedAt,
    Version,
}
