//! IPC protocol messages for tomopar worker processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//!
//! Bulk data never travels over this channel: commands carry segment handles
//! and chunk ranges, and workers read and write the shared segments directly.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::arena::SegmentHandle;
use crate::error::{Error, Result};
use crate::operation::OperationDescriptor;
use crate::partition::ChunkDescriptor;

/// Largest accepted message body.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Command sent from parent to worker process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Ping to check if worker is alive.
    Ping,

    /// Attach to the segments of one execution and resolve its operation.
    Attach {
        /// The volume segment.
        volume: SegmentHandle,
        /// The paired per-slice array, for two-input operations.
        pair: Option<SegmentHandle>,
        /// The control block holding the chunk cursor, progress and cancel flag.
        control: SegmentHandle,
        /// Every chunk of the execution, claimed through the control block.
        chunks: Vec<ChunkDescriptor>,
        /// What to apply to each slice.
        operation: OperationDescriptor,
    },

    /// Start claiming and processing chunks.
    Run,

    /// Shutdown the worker process gracefully.
    Shutdown,
}

/// Response sent from worker to parent process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Response to Ping command.
    Pong,

    /// Segments attached and operation resolved.
    Attached,

    /// No chunks left to claim.
    Finished {
        /// Chunks this worker processed.
        chunks: u64,
        /// Slices this worker processed.
        slices: u64,
    },

    /// The filter failed on a slice; the worker stopped claiming.
    ChunkFailed {
        chunk: ChunkDescriptor,
        slice: u64,
        message: String,
    },

    /// The cancel flag was seen before a slice.
    Cancelled {
        /// Slices this worker processed before stopping.
        slices: u64,
    },

    /// A command could not be carried out.
    Error {
        /// Error message.
        message: String,
    },

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Ipc(format!("IPC message too large: {} bytes", bytes.len())))?;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// # Safety
///
/// Uses unchecked deserialization. Only safe when reading from trusted
/// sources (our own parent or worker processes).
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_BYTES {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    // rkyv needs the archive root aligned; AlignedVec guarantees it.
    let mut bytes = rkyv::util::AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    // SAFETY: both ends of the channel are our own processes.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&bytes) }
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(message)
}

/// Read a message, treating a cleanly closed stream as `None`.
pub fn read_message_or_eof<R: Read, T>(reader: &mut R) -> Result<Option<T>>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut first = [0u8; 1];
    loop {
        match reader.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Ipc(format!("Failed to read IPC message length: {}", e))),
        }
    }
    let mut chained = std::io::Read::chain(&first[..], reader);
    read_message(&mut chained).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SegmentKind;
    use crate::element::ElementType;
    use crate::operation::FilterRegistry;
    use std::io::Cursor;

    fn handle(kind: SegmentKind, shape: Vec<u64>) -> SegmentHandle {
        SegmentHandle {
            id: "seg".to_string(),
            path: "/dev/shm/tomopar-1-seg.seg".to_string(),
            kind,
            shape,
            byte_len: 384,
        }
    }

    #[test]
    fn test_attach_command_roundtrip() {
        let operation = OperationDescriptor::builder("gaussian")
            .param("sigma", 1.5)
            .param("mode", "wrap")
            .build(&FilterRegistry::builtin())
            .unwrap();
        let cmd = WorkerCommand::Attach {
            volume: handle(SegmentKind::Array(ElementType::F32), vec![8, 4, 3]),
            pair: None,
            control: handle(SegmentKind::Control, vec![]),
            chunks: vec![ChunkDescriptor::new(0, 3), ChunkDescriptor::new(3, 8)],
            operation: operation.clone(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerCommand = read_message(&mut cursor).unwrap();

        match decoded {
            WorkerCommand::Attach {
                volume,
                pair,
                control,
                chunks,
                operation: decoded_op,
            } => {
                assert_eq!(volume.shape, vec![8, 4, 3]);
                assert_eq!(volume.element_type(), Some(ElementType::F32));
                assert!(pair.is_none());
                assert_eq!(control.kind, SegmentKind::Control);
                assert_eq!(chunks.len(), 2);
                assert_eq!(decoded_op, operation);
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_failure_response_roundtrip() {
        let resp = WorkerResponse::ChunkFailed {
            chunk: ChunkDescriptor::new(3, 6),
            slice: 5,
            message: "injected failure at slice 5".to_string(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerResponse = read_message(&mut cursor).unwrap();

        match decoded {
            WorkerResponse::ChunkFailed {
                chunk,
                slice,
                message,
            } => {
                assert_eq!(chunk, ChunkDescriptor::new(3, 6));
                assert_eq!(slice, 5);
                assert!(message.contains("slice 5"));
            }
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_sequence_and_eof() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerCommand::Ping).unwrap();
        write_message(&mut buf, &WorkerCommand::Run).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: Option<WorkerCommand> = read_message_or_eof(&mut cursor).unwrap();
        let second: Option<WorkerCommand> = read_message_or_eof(&mut cursor).unwrap();
        let third: Option<WorkerCommand> = read_message_or_eof(&mut cursor).unwrap();
        assert!(matches!(first, Some(WorkerCommand::Ping)));
        assert!(matches!(second, Some(WorkerCommand::Run)));
        assert!(third.is_none());
    }

    #[test]
    fn test_truncated_and_oversized() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::Pong).unwrap();
        buf.truncate(buf.len() - 1);
        let result: Result<WorkerResponse> = read_message(&mut Cursor::new(buf));
        assert!(matches!(result, Err(Error::Ipc(_))));

        let huge = ((MAX_MESSAGE_BYTES + 1) as u32).to_le_bytes().to_vec();
        let result: Result<WorkerResponse> = read_message(&mut Cursor::new(huge));
        assert!(matches!(result, Err(Error::Ipc(_))));
    }
}
