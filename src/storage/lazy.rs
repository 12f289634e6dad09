use std::cell::OnceCell;

use crate::error::Result;
use crate::model::{Element, Properties};
use crate::table::Cell;

use super::codec::{ElementCodec, RowKey};

/// A raw cell bundled with the codec, decoding each part on first access.
///
/// Caches are single-threaded; a lazy cell never leaves the scan that
/// created it.
pub struct LazyCell<'c> {
    cell: Cell,
    codec: &'c ElementCodec,
    row: OnceCell<RowKey>,
    properties: OnceCell<Properties>,
    element: OnceCell<Element>,
}

impl<'c> LazyCell<'c> {
    /// Wraps a raw cell.
    pub fn new(cell: Cell, codec: &'c ElementCodec) -> Self {
        Self {
            cell,
            codec,
            row: OnceCell::new(),
            properties: OnceCell::new(),
            element: OnceCell::new(),
        }
    }

    /// The raw cell.
    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// The codec this cell decodes with.
    pub fn codec(&self) -> &'c ElementCodec {
        self.codec
    }

    /// Row key parts. Does not touch qualifier or value.
    pub fn row(&self) -> Result<&RowKey> {
        if let Some(row) = self.row.get() {
            return Ok(row);
        }
        let row = self.codec.decode_row(&self.cell.row)?;
        Ok(self.row.get_or_init(|| row))
    }

    /// Group name.
    pub fn group(&self) -> Result<&str> {
        Ok(&self.row()?.group)
    }

    /// Group-by and value properties, without timestamp or visibility.
    pub fn properties(&self) -> Result<&Properties> {
        if let Some(props) = self.properties.get() {
            return Ok(props);
        }
        let group = self.group()?;
        let mut props = self.codec.decode_qualifier(group, &self.cell.qualifier)?;
        props.extend(self.codec.decode_value(group, &self.cell.value)?);
        Ok(self.properties.get_or_init(|| props))
    }

    /// The fully decoded element.
    pub fn element(&self) -> Result<&Element> {
        if let Some(element) = self.element.get() {
            return Ok(element);
        }
        let row = self.row()?;
        let mut props = self.properties()?.clone();
        self.codec.restore_cell_properties(&row.group, &self.cell, &mut props)?;
        let element = self.codec.element_from_parts(row, props)?;
        Ok(self.element.get_or_init(|| element))
    }

    /// Unwraps the raw cell.
    pub fn into_cell(self) -> Cell {
        self.cell
    }
}
