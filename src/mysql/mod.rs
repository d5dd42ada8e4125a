// ABOUTME: MySQL utilities module
// ABOUTME: Exports connection management, metadata queries, and the dump tool wrapper

pub mod connection;
pub mod dump;
pub mod privileges;
pub mod schema;

pub use connection::{connect, Credentials, Password};
pub use dump::Mysqldump;
pub use privileges::{
    grants_allow_consistent_snapshot, has_consistent_snapshot_capability, GrantSource,
    SNAPSHOT_PRIVILEGE,
};
pub use schema::{build_preamble, database_preamble, quote_identifier};
