//! Buffers capture records until the channel can take them.
//!
//! A flush takes the whole buffer at once, so a record is sent in exactly one
//! batch. Records appended while a flush is in progress wait for the next one.

use tracing::{error, info};

use crate::{CaptureBatch, CaptureRecord, ChannelFailure, ChannelSink, WireFormat};

#[derive(Debug)]
pub(crate) struct PendingFlush {
    batch: CaptureBatch,
    pub(crate) wire: String,
}

#[derive(Debug)]
pub(crate) struct CaptureAggregator {
    pending: Vec<CaptureRecord>,
    next_seq: u64,
    format: WireFormat,
}

impl CaptureAggregator {
    pub(crate) fn new(format: WireFormat) -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 1,
            format,
        }
    }

    pub(crate) fn push_batch(&mut self, records: Vec<CaptureRecord>) {
        self.pending.extend(records);
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Takes the entire buffer. `None` when there is nothing to send.
    pub(crate) fn begin_flush(&mut self) -> Result<Option<PendingFlush>, serde_json::Error> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let batch = CaptureBatch {
            seq: self.next_seq,
            records: std::mem::take(&mut self.pending),
        };
        match batch.to_wire(self.format) {
            Ok(wire) => Ok(Some(PendingFlush { batch, wire })),
            Err(err) => {
                self.pending = batch.records;
                Err(err)
            }
        }
    }

    pub(crate) fn complete(&mut self, flush: PendingFlush) -> CaptureBatch {
        self.next_seq = flush.batch.seq + 1;
        flush.batch
    }

    /// Puts the taken records back ahead of anything appended since.
    pub(crate) fn abort(&mut self, flush: PendingFlush) {
        let mut restored = flush.batch.records;
        restored.append(&mut self.pending);
        self.pending = restored;
    }

    pub(crate) async fn flush_if_ready<C: ChannelSink + ?Sized>(
        &mut self,
        channel: &mut C,
    ) -> Result<Option<CaptureBatch>, ChannelFailure> {
        if !channel.is_open() {
            return Ok(None);
        }
        let flush = match self.begin_flush() {
            Ok(Some(flush)) => flush,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!(error = %err, "could not serialize capture batch");
                return Ok(None);
            }
        };

        match channel.send(&flush.wire).await {
            Ok(()) => {
                let batch = self.complete(flush);
                info!(seq = batch.seq, records = batch.records.len(), "capture batch sent");
                Ok(Some(batch))
            }
            Err(err) => {
                self.abort(flush);
                Err(err)
            }
        }
    }
}
