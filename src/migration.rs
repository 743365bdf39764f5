use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(Migration001CreateTables)]
    }
}

pub struct Migration001CreateTables;

impl MigrationName for Migration001CreateTables {
    fn name(&self) -> &str {
        "m001_create_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration001CreateTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // accounts table
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Accounts::Email)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Accounts::Provider)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::ImapHost)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::ImapPort)
                            .integer()
                            .not_null()
                            .default(993),
                    )
                    .col(
                        ColumnDef::new(Accounts::PasswordEncrypted)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::SyncState)
                            .string_len(20)
                            .not_null()
                            .default("stopped"),
                    )
                    .col(ColumnDef::new(Accounts::ReadPoolSize).integer().null())
                    .col(ColumnDef::new(Accounts::WritePoolSize).integer().null())
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // folders table
        manager
            .create_table(
                Table::create()
                    .table(Folders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Folders::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Folders::AccountId).uuid().not_null())
                    .col(ColumnDef::new(Folders::Name).text().not_null())
                    .col(
                        ColumnDef::new(Folders::CanonicalRole)
                            .string_len(50)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Folders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Folders::Table, Folders::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index on (account_id, name)
        manager
            .create_index(
                Index::create()
                    .name("idx_folders_account_name")
                    .table(Folders::Table)
                    .col(Folders::AccountId)
                    .col(Folders::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // folder_sync_status table
        manager
            .create_table(
                Table::create()
                    .table(FolderSyncStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FolderSyncStatus::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FolderSyncStatus::FolderId).uuid().not_null())
                    .col(
                        ColumnDef::new(FolderSyncStatus::State)
                            .string_len(50)
                            .not_null()
                            .default("initial"),
                    )
                    .col(ColumnDef::new(FolderSyncStatus::Metrics).json_binary().null())
                    .col(
                        ColumnDef::new(FolderSyncStatus::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(FolderSyncStatus::Table, FolderSyncStatus::FolderId)
                            .to(Folders::Table, Folders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_folder_sync_status_folder")
                    .table(FolderSyncStatus::Table)
                    .col(FolderSyncStatus::FolderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // folder_imap_info table
        manager
            .create_table(
                Table::create()
                    .table(FolderImapInfo::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FolderImapInfo::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FolderImapInfo::FolderId).uuid().not_null())
                    .col(
                        ColumnDef::new(FolderImapInfo::Uidvalidity)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FolderImapInfo::Uidnext).big_integer().null())
                    .col(
                        ColumnDef::new(FolderImapInfo::Highestmodseq)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FolderImapInfo::LastSlowRefresh)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FolderImapInfo::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(FolderImapInfo::Table, FolderImapInfo::FolderId)
                            .to(Folders::Table, Folders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_folder_imap_info_folder")
                    .table(FolderImapInfo::Table)
                    .col(FolderImapInfo::FolderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // threads table
        manager
            .create_table(
                Table::create()
                    .table(Threads::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Threads::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Threads::AccountId).uuid().not_null())
                    .col(ColumnDef::new(Threads::GThrid).big_integer().null())
                    .col(ColumnDef::new(Threads::Labels).json_binary().null())
                    .col(
                        ColumnDef::new(Threads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Threads::Table, Threads::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index on (account_id, g_thrid)
        manager
            .create_index(
                Index::create()
                    .name("idx_threads_account_gthrid")
                    .table(Threads::Table)
                    .col(Threads::AccountId)
                    .col(Threads::GThrid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // messages table
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Messages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Messages::AccountId).uuid().not_null())
                    .col(ColumnDef::new(Messages::Sha256).string_len(64).not_null())
                    .col(ColumnDef::new(Messages::Size).big_integer().not_null())
                    .col(ColumnDef::new(Messages::ThreadId).uuid().null())
                    .col(ColumnDef::new(Messages::GMsgid).big_integer().null())
                    .col(ColumnDef::new(Messages::GThrid).big_integer().null())
                    .col(ColumnDef::new(Messages::Subject).text().null())
                    .col(ColumnDef::new(Messages::FromAddr).text().null())
                    .col(
                        ColumnDef::new(Messages::ReceivedDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Messages::MarkedForDeletion)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Messages::Table, Messages::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Messages::Table, Messages::ThreadId)
                            .to(Threads::Table, Threads::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Content-address and Gmail message-id lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_messages_account_sha")
                    .table(Messages::Table)
                    .col(Messages::AccountId)
                    .col(Messages::Sha256)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_account_gmsgid")
                    .table(Messages::Table)
                    .col(Messages::AccountId)
                    .col(Messages::GMsgid)
                    .to_owned(),
            )
            .await?;

        // uid_records table
        manager
            .create_table(
                Table::create()
                    .table(UidRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UidRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UidRecords::AccountId).uuid().not_null())
                    .col(ColumnDef::new(UidRecords::FolderId).uuid().not_null())
                    .col(ColumnDef::new(UidRecords::Uid).big_integer().not_null())
                    .col(ColumnDef::new(UidRecords::MessageId).uuid().not_null())
                    .col(
                        ColumnDef::new(UidRecords::IsSeen)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UidRecords::IsAnswered)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UidRecords::IsFlagged)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UidRecords::IsDraft)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UidRecords::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(UidRecords::IsRecent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(UidRecords::GLabels).json_binary().null())
                    .col(
                        ColumnDef::new(UidRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(UidRecords::Table, UidRecords::FolderId)
                            .to(Folders::Table, Folders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(UidRecords::Table, UidRecords::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index on (account_id, folder_id, uid)
        manager
            .create_index(
                Index::create()
                    .name("idx_uid_records_account_folder_uid")
                    .table(UidRecords::Table)
                    .col(UidRecords::AccountId)
                    .col(UidRecords::FolderId)
                    .col(UidRecords::Uid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Reference check when deciding whether a message is orphaned
        manager
            .create_index(
                Index::create()
                    .name("idx_uid_records_message")
                    .table(UidRecords::Table)
                    .col(UidRecords::MessageId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UidRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Threads::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FolderImapInfo::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FolderSyncStatus::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Folders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

// ========== Table identifiers ==========

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    Email,
    Provider,
    ImapHost,
    ImapPort,
    PasswordEncrypted,
    SyncState,
    ReadPoolSize,
    WritePoolSize,
    CreatedAt,
}

#[derive(Iden)]
enum Folders {
    Table,
    Id,
    AccountId,
    Name,
    CanonicalRole,
    CreatedAt,
}

#[derive(Iden)]
enum FolderSyncStatus {
    Table,
    Id,
    FolderId,
    State,
    Metrics,
    UpdatedAt,
}

#[derive(Iden)]
enum FolderImapInfo {
    Table,
    Id,
    FolderId,
    Uidvalidity,
    Uidnext,
    Highestmodseq,
    LastSlowRefresh,
    UpdatedAt,
}

#[derive(Iden)]
enum Threads {
    Table,
    Id,
    AccountId,
    GThrid,
    Labels,
    CreatedAt,
}

#[derive(Iden)]
enum Messages {
    Table,
    Id,
    AccountId,
    Sha256,
    Size,
    ThreadId,
    GMsgid,
    GThrid,
    Subject,
    FromAddr,
    ReceivedDate,
    MarkedForDeletion,
    CreatedAt,
}

#[derive(Iden)]
enum UidRecords {
    Table,
    Id,
    AccountId,
    FolderId,
    Uid,
    MessageId,
    IsSeen,
    IsAnswered,
    IsFlagged,
    IsDraft,
    IsDeleted,
    IsRecent,
    GLabels,
    UpdatedAt,
}
