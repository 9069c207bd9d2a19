use serde::{Deserialize, Serialize};

use crate::frame::MemberCodec;

/// One archive entry as recorded in the central index.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemberRecord {
    pub name: String,
    /// Offset of the member's frame header within the archive stream.
    pub offset: u64,
    pub comp_size: u64,
    pub orig_size: u64,
    /// Unix seconds; 0 means "no recorded mtime".
    pub mtime: i64,
    pub codec: u8,
    pub crc32: u32,
    /// Length-framed chunk payload; sizes in the frame header are zero.
    #[serde(default)]
    pub chunked: bool,
}

impl MemberRecord {
    pub fn codec(&self) -> Option<MemberCodec> {
        MemberCodec::from_u8(self.codec).ok()
    }
}

/// Central metadata written as the final frame before the trailer.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ContainerIndex {
    pub members: Vec<MemberRecord>,
}

impl ContainerIndex {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn find(&self, name: &str) -> Option<&MemberRecord> {
        self.members.iter().find(|m| m.name == name)
    }
}
