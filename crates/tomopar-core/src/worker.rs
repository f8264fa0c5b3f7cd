//! Worker side of the IPC protocol.
//!
//! A worker answers commands on its stdin/stdout until it is told to shut
//! down or the parent closes the stream. For each execution it attaches to
//! the shared segments named in [`WorkerCommand::Attach`], then on
//! [`WorkerCommand::Run`] claims chunks from the control block until none are
//! left, the cancel flag is raised, or the filter fails.

use std::io::{Read, Write};

use ndarray::{Ix2, Ix3};

use crate::arena::{Segment, SegmentHandle, SegmentKind, attach};
use crate::element::{Element, ElementType};
use crate::error::{Error, Result};
use crate::execute::{ChunkOutcome, process_chunk};
use crate::ipc::{WorkerCommand, WorkerResponse, read_message_or_eof, write_message};
use crate::operation::{FilterRegistry, Forwarding, OperationDescriptor, ResolvedOperation};
use crate::partition::ChunkDescriptor;
use crate::progress::Progress;

/// Serve commands from `reader`, answering on `writer`.
///
/// Returns `Ok(())` after a shutdown request or when the parent closes the
/// stream; IPC failures are returned as errors.
pub fn serve<R: Read, W: Write>(reader: &mut R, writer: &mut W, registry: &FilterRegistry) -> Result<()> {
    let mut session: Option<Session> = None;

    loop {
        let Some(command) = read_message_or_eof::<_, WorkerCommand>(reader)? else {
            tracing::debug!("Parent closed the command stream");
            return Ok(());
        };

        let response = match command {
            WorkerCommand::Ping => WorkerResponse::Pong,
            WorkerCommand::Attach {
                volume,
                pair,
                control,
                chunks,
                operation,
            } => {
                session = None;
                match Session::attach(registry, &volume, pair.as_ref(), &control, chunks, &operation) {
                    Ok(attached) => {
                        tracing::debug!(
                            "Attached to {} ({} chunks, operation {})",
                            volume.id,
                            attached.chunks.len(),
                            operation.function_id()
                        );
                        session = Some(attached);
                        WorkerResponse::Attached
                    }
                    Err(e) => WorkerResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            WorkerCommand::Run => match session.take() {
                Some(mut attached) => attached.run(),
                None => WorkerResponse::Error {
                    message: "run requested before attach".to_string(),
                },
            },
            WorkerCommand::Shutdown => {
                write_message(writer, &WorkerResponse::ShuttingDown)?;
                return Ok(());
            }
        };

        write_message(writer, &response)?;
    }
}

/// Segments and operation of one execution, as seen by a worker.
struct Session {
    volume: Segment,
    pair: Option<Segment>,
    control: Segment,
    chunks: Vec<ChunkDescriptor>,
    operation: ResolvedOperation,
}

impl Session {
    fn attach(
        registry: &FilterRegistry,
        volume: &SegmentHandle,
        pair: Option<&SegmentHandle>,
        control: &SegmentHandle,
        chunks: Vec<ChunkDescriptor>,
        operation: &OperationDescriptor,
    ) -> Result<Self> {
        let operation = registry.resolve(operation)?;

        let element = volume
            .element_type()
            .ok_or_else(|| Error::Attach(format!("segment {} is not an array", volume.id)))?;
        let shape = volume.dims();
        if shape.len() != 3 {
            return Err(Error::Attach(format!(
                "segment {} has {} dimensions, expected 3",
                volume.id,
                shape.len()
            )));
        }
        if let Some(bad) = chunks.iter().find(|c| c.is_empty() || c.end as usize > shape[0]) {
            return Err(Error::Attach(format!(
                "chunk {} does not fit {} slices",
                bad, shape[0]
            )));
        }

        let pair = match (operation.forwarding(), pair) {
            (Forwarding::InPlace2, Some(handle)) => {
                let dims = handle.dims();
                if dims.len() != 2 || dims[0] != shape[0] {
                    return Err(Error::Attach(format!(
                        "paired segment {} has shape {:?}, expected {} rows",
                        handle.id, dims, shape[0]
                    )));
                }
                Some(attach(handle, SegmentKind::Array(ElementType::F64), &dims)?)
            }
            (Forwarding::InPlace1, None) => None,
            (forwarding, _) => {
                return Err(Error::InvalidOperation(format!(
                    "{} operation {} got the wrong number of arrays",
                    forwarding.name(),
                    operation.descriptor().function_id()
                )));
            }
        };

        Ok(Self {
            volume: attach(volume, SegmentKind::Array(element), &shape)?,
            pair,
            control: attach(control, SegmentKind::Control, &[])?,
            chunks,
            operation,
        })
    }

    fn run(&mut self) -> WorkerResponse {
        let result = match self.volume.handle().element_type() {
            Some(ElementType::F32) => self.run_typed::<f32>(),
            Some(ElementType::F64) => self.run_typed::<f64>(),
            None => Err(Error::Attach("volume segment is not an array".to_string())),
        };
        result.unwrap_or_else(|e| WorkerResponse::Error {
            message: e.to_string(),
        })
    }

    fn run_typed<T: Element>(&mut self) -> Result<WorkerResponse> {
        let Session {
            volume,
            pair,
            control,
            chunks,
            operation,
        } = self;

        let control = control.control()?;
        let mut volume = volume
            .view_mut::<T>()?
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::Attach(e.to_string()))?;
        let mut pair = match pair {
            Some(segment) => Some(
                segment
                    .view_mut::<f64>()?
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| Error::Attach(e.to_string()))?,
            ),
            None => None,
        };
        let progress = Progress::shared(control);

        let mut done_chunks = 0u64;
        let mut done_slices = 0u64;
        loop {
            let Some(&chunk) = chunks.get(control.claim_chunk() as usize) else {
                tracing::debug!("No chunks left after {} chunks", done_chunks);
                return Ok(WorkerResponse::Finished {
                    chunks: done_chunks,
                    slices: done_slices,
                });
            };

            let outcome = process_chunk(
                operation,
                &mut volume,
                pair.as_mut(),
                chunk,
                || control.is_cancelled(),
                &progress,
            );
            match outcome {
                ChunkOutcome::Done => {
                    done_chunks += 1;
                    done_slices += chunk.len() as u64;
                }
                ChunkOutcome::Cancelled { processed } => {
                    return Ok(WorkerResponse::Cancelled {
                        slices: done_slices + processed as u64,
                    });
                }
                ChunkOutcome::Failed { slice, error } => {
                    tracing::debug!("Chunk {} failed at slice {}: {}", chunk, slice, error);
                    return Ok(WorkerResponse::ChunkFailed {
                        chunk,
                        slice: slice as u64,
                        message: error.to_string(),
                    });
                }
            }
        }
    }
}
