//! Batched element writes.
//!
//! Each element occupies one buffer slot per row it emits: entities and
//! self-edges take one, other edges take two. An element's rows are never
//! split across flushes, so both rows of an edge land in the same put. When
//! an element does not fit in the remaining slots the buffer is flushed
//! first; an element wider than the whole buffer is written alone.

use tracing::debug;

use crate::error::Result;
use crate::model::Element;
use crate::storage::{ElementCodec, StoreMetrics};
use crate::table::{Cell, Table};

/// Outcome of one ingest call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Elements encoded and written.
    pub elements: u64,
    /// Cells written, counting both rows of an edge.
    pub cells: u64,
    /// Null inputs skipped.
    pub skipped: u64,
    /// Puts issued against the table.
    pub flushes: u64,
}

struct CellBuffer<'t> {
    table: &'t dyn Table,
    slots: usize,
    cells: Vec<Cell>,
    report: IngestReport,
}

impl<'t> CellBuffer<'t> {
    fn new(table: &'t dyn Table, slots: usize) -> Self {
        Self {
            table,
            slots: slots.max(1),
            cells: Vec::new(),
            report: IngestReport::default(),
        }
    }

    fn push(&mut self, cells: Vec<Cell>) -> Result<()> {
        if !self.cells.is_empty() && self.cells.len() + cells.len() > self.slots {
            self.flush()?;
        }
        self.cells.extend(cells);
        if self.cells.len() >= self.slots {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.cells.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.cells);
        let count = batch.len() as u64;
        self.table.put(batch)?;
        self.report.cells += count;
        self.report.flushes += 1;
        debug!(table = self.table.name(), cells = count, "ingest.flush");
        Ok(())
    }
}

/// Encodes and writes `elements`, skipping `None`s.
///
/// Writes are at-least-once: after an error, batches flushed before it stay
/// in the table.
pub fn add_elements<I>(
    table: &dyn Table,
    codec: &ElementCodec,
    metrics: &dyn StoreMetrics,
    write_buffer_size: usize,
    elements: I,
) -> Result<IngestReport>
where
    I: IntoIterator,
    I::Item: Into<Option<Element>>,
{
    let mut buffer = CellBuffer::new(table, write_buffer_size);
    for element in elements {
        let Some(element) = element.into() else {
            buffer.report.skipped += 1;
            continue;
        };
        let encoded = codec.encode(&element)?;
        let cells: Vec<Cell> = encoded.cells().collect();
        metrics.element_written();
        if cells.len() > 1 {
            metrics.duplicate_edge_row_written();
        }
        buffer.report.elements += 1;
        buffer.push(cells)?;
    }
    buffer.flush()?;
    Ok(buffer.report)
}
