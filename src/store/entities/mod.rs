pub mod account;
pub mod folder;
pub mod folder_imap_info;
pub mod folder_sync_status;
pub mod message;
pub mod thread;
pub mod uid_record;
