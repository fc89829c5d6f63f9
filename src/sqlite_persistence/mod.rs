mod versioned_schema;

pub use versioned_schema::{open_database, Table, VersionedSchema};
