//! Evidence container builder for endpoint collection exports.
//!
//! Many independently produced output streams — artifact query results,
//! uploaded files, sparse disk-image extracts — are assembled into one
//! portable `.evc` archive with optional password encryption, whole-stream
//! SHA-256 hashing and safe concurrent member writes.
//!
//! ```no_run
//! use evc::{Container, ContainerOptions, UploadSource};
//!
//! let container = Container::create_file("collection.evc", ContainerOptions::default())?;
//! let mut data = std::io::Cursor::new(b"registry hive".to_vec());
//! let response = container.upload("C:\\Windows\\System32\\config\\SAM", None,
//!     UploadSource::Stream(&mut data))?;
//! println!("{} sha256={}", response.path, response.sha256);
//! container.close()?;
//! # Ok::<(), evc::ContainerError>(())
//! ```

pub mod artifact;
pub mod container;
pub mod crypto;
pub mod frame;
pub mod index;
pub mod sanitize;
pub mod tee;
pub mod upload;

pub use artifact::{CancelToken, ResultFormat, Row};
pub use container::reader::ContainerReader;
pub use container::{
    CloseSummary, Container, ContainerError, ContainerOptions, MemberWriter,
    ENCRYPTED_PAYLOAD_NAME,
};
pub use index::{ContainerIndex, MemberRecord};
pub use sanitize::sanitize_name;
pub use upload::{ByteRange, RangeReader, SparseIndex, UploadResponse, UploadSource};
