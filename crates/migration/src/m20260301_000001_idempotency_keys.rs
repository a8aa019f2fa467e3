use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum IdempotencyKeys {
    Table,
    IdempotencyKey,
    StatusCode,
    Body,
    ContentType,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdempotencyKeys::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdempotencyKeys::IdempotencyKey)
                            .string_len(255)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IdempotencyKeys::StatusCode)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IdempotencyKeys::Body).binary().not_null())
                    .col(ColumnDef::new(IdempotencyKeys::ContentType).string())
                    .col(
                        ColumnDef::new(IdempotencyKeys::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The sweeper deletes by age.
        manager
            .create_index(
                Index::create()
                    .name("idx-idempotency_keys-created_at")
                    .table(IdempotencyKeys::Table)
                    .col(IdempotencyKeys::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx-idempotency_keys-created_at")
                    .table(IdempotencyKeys::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(IdempotencyKeys::Table).to_owned())
            .await?;

        Ok(())
    }
}
