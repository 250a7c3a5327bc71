mod blob;

pub use blob::{BlobError, BlobNamespace, BlobStorage, is_valid_oid};
