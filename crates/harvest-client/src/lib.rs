pub mod export;
pub mod snapshot;
pub mod transport;

pub use export::{write_csv, write_csv_file};
pub use snapshot::{SNAPSHOT_FIELDS, SnapshotExtractor};
pub use transport::ReqwestTransport;
