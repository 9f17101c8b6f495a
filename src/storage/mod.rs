pub mod traits;
pub mod duckdb;

pub use traits::{
    Record, RecordStore, RecordUpdate, StatusRow, StatusStore, StatusTableInfo, StorageError,
};
