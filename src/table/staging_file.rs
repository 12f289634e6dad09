//! Sorted cell files produced by staged imports and consumed by
//! [`Table::bulk_load`](super::Table::bulk_load).
//!
//! Layout: the magic header, then per cell the row, family, qualifier,
//! visibility and value as length-prefixed fields with a ZigZag timestamp
//! between qualifier and visibility.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::primitives::bytes::{field, var};

use super::Cell;

const MAGIC: &[u8; 8] = b"WGSTAGE1";

/// Writes `cells` to `path`, sorted by row, qualifier and descending timestamp.
pub fn write_cells(path: &Path, mut cells: Vec<Cell>) -> Result<u64> {
    cells.sort_by(|a, b| {
        a.row
            .cmp(&b.row)
            .then_with(|| a.qualifier.cmp(&b.qualifier))
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.visibility.cmp(&b.visibility))
    });
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(MAGIC)?;
    let mut buf = Vec::new();
    for cell in &cells {
        buf.clear();
        field::put(&mut buf, &cell.row);
        field::put(&mut buf, &cell.family);
        field::put(&mut buf, &cell.qualifier);
        var::encode_i64(cell.timestamp, &mut buf);
        field::put(&mut buf, &cell.visibility);
        field::put(&mut buf, &cell.value);
        out.write_all(&buf)?;
    }
    out.flush()?;
    Ok(cells.len() as u64)
}

/// Reads every cell from a file written by [`write_cells`].
pub fn read_cells(path: &Path) -> Result<Vec<Cell>> {
    let mut raw = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut raw)?;
    let body = raw
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| StoreError::data(format!("{} is not a staged cell file", path.display())))?;
    let mut off = 0;
    let mut cells = Vec::new();
    let next = |off: &mut usize| -> Result<Bytes> {
        field::get(body, off)?
            .map(Bytes::copy_from_slice)
            .ok_or_else(|| StoreError::data("absent field in staged cell"))
    };
    while off < body.len() {
        let row = next(&mut off)?;
        let family = next(&mut off)?;
        let qualifier = next(&mut off)?;
        let timestamp = var::decode_i64(body, &mut off)?;
        let visibility = next(&mut off)?;
        let value = next(&mut off)?;
        cells.push(Cell {
            row,
            family,
            qualifier,
            timestamp,
            visibility,
            value,
        });
    }
    Ok(cells)
}
