use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Invites::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Invites::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Invites::CompanyId).uuid().not_null())
                    .col(ColumnDef::new(Invites::EmployeeId).uuid().not_null())
                    .col(ColumnDef::new(Invites::Role).string().not_null())
                    .col(ColumnDef::new(Invites::TargetEmail).string().null())
                    .col(ColumnDef::new(Invites::LookupHash).string().not_null())
                    .col(
                        ColumnDef::new(Invites::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Invites::IssuedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(Invites::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invites::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invites::AcceptedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Invites::AcceptedBy).uuid().null())
                    .col(
                        ColumnDef::new(Invites::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invites_company")
                            .from(Invites::Table, Invites::CompanyId)
                            .to(Companies::Table, Companies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_invites_employee")
                            .from(Invites::Table, Invites::EmployeeId)
                            .to(Employees::Table, Employees::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // The lookup hash is the only handle a token holder has on an invite;
        // it must be unique across every status.
        manager
            .create_index(
                Index::create()
                    .name("idx_invites_lookup_hash_unique")
                    .table(Invites::Table)
                    .col(Invites::LookupHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_invites_employee_status")
                    .table(Invites::Table)
                    .col(Invites::EmployeeId)
                    .col(Invites::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Invites::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Invites {
    Table,
    Id,
    CompanyId,
    EmployeeId,
    Role,
    TargetEmail,
    LookupHash,
    Status,
    IssuedBy,
    IssuedAt,
    ExpiresAt,
    AcceptedAt,
    AcceptedBy,
    RevokedAt,
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Employees {
    Table,
    Id,
}
