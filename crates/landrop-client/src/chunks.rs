//! File slicing and reassembly for the `fileTransfer` data channel.

use bytes::Bytes;

use landrop_shared::constants::CHUNK_SIZE;
use landrop_shared::protocol::ChannelMessage;

use crate::error::ClientError;

pub fn chunk_count(file_size: u64) -> u32 {
    file_size.div_ceil(CHUNK_SIZE as u64) as u32
}

/// Slice a payload into ordered `(index, bytes)` chunks of [`CHUNK_SIZE`].
pub fn split(data: &Bytes) -> Vec<(u32, Bytes)> {
    (0..chunk_count(data.len() as u64))
        .map(|index| {
            let start = index as usize * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(data.len());
            (index, data.slice(start..end))
        })
        .collect()
}

/// Receiver-side reassembly buffer, allocated when the metadata object
/// arrives and filled chunk by chunk.
#[derive(Debug)]
pub struct FileAssembly {
    slots: Vec<Option<Bytes>>,
    received: u32,
}

impl FileAssembly {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            slots: vec![None; total_chunks as usize],
            received: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Place a chunk at its index. Re-delivered chunks are counted once.
    pub fn insert(&mut self, index: u32, data: Vec<u8>) -> Result<(), ClientError> {
        let total = self.total();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(ClientError::ChunkOutOfRange { index, total })?;
        if slot.is_none() {
            *slot = Some(Bytes::from(data));
            self.received += 1;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.total()
    }

    /// Percentage with conventional rounding, so 3 chunks report
    /// 33 / 67 / 100.
    pub fn progress(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 100;
        }
        ((self.received as f64 / total as f64) * 100.0).round() as u8
    }

    /// Concatenate in index order; any empty slot is fatal.
    pub fn assemble(self) -> Result<Bytes, ClientError> {
        let mut out = Vec::with_capacity(self.slots.iter().flatten().map(|b| b.len()).sum());
        for (index, slot) in self.slots.into_iter().enumerate() {
            let chunk = slot.ok_or(ClientError::MissingChunk {
                index: index as u32,
            })?;
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }
}

/// The metadata object the sender emits before the first chunk.
pub fn metadata_for(file_name: &str, file_type: &str, data: &Bytes) -> ChannelMessage {
    ChannelMessage::Metadata {
        file_name: file_name.to_string(),
        file_size: data.len() as u64,
        file_type: file_type.to_string(),
        total_chunks: chunk_count(data.len() as u64),
    }
}
