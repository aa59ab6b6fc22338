//! The cell-array container (spec.md §4.C): owns the packed cell colors and
//! the transient accumulators used while a scan is in progress.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::scan_tables::ScanTablesHandle;

/// Packs R, G, B into a 32-bit cell word. Bits 24-31 are reserved and
/// always zero; this exact layout is part of the wire format (spec.md §4.C).
pub fn pack(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Inverse of [`pack`]; returns `(r, g, b, reserved)`.
pub fn unpack(word: u32) -> (u8, u8, u8, u8) {
    let r = ((word >> 16) & 0xFF) as u8;
    let g = ((word >> 8) & 0xFF) as u8;
    let b = (word & 0xFF) as u8;
    let reserved = ((word >> 24) & 0xFF) as u8;
    (r, g, b, reserved)
}

/// A populated (or in-progress) log-polar cell array. Constructed with a
/// reference to scan tables and raster dimensions, populated by exactly one
/// scan operation, then treated as immutable by every subscriber.
#[derive(Clone)]
pub struct LPXImage {
    tables: ScanTablesHandle,
    spiral_per: f32,
    width: i32,
    height: i32,
    x_ofs: f32,
    y_ofs: f32,
    cell_array: Vec<u32>,
}

impl LPXImage {
    pub fn new_empty(tables: ScanTablesHandle, width: i32, height: i32) -> Self {
        // `length` is the cell count the scan populates (bounded by
        // `lastCellIndex + 1`), not `tables.length()` — that field is the
        // outer-pixel run-table size used only to build the pixel->cell LUT
        // (spec.md §3).
        let length = tables.last_cell_index() as usize + 1;
        Self {
            spiral_per: tables.spiral_per(),
            width,
            height,
            x_ofs: width as f32 / 2.0,
            y_ofs: height as f32 / 2.0,
            cell_array: vec![0u32; length],
            tables,
        }
    }

    pub fn tables(&self) -> &ScanTablesHandle {
        &self.tables
    }

    pub const fn length(&self) -> usize {
        self.cell_array.len()
    }

    pub const fn spiral_per(&self) -> f32 {
        self.spiral_per
    }

    pub const fn width(&self) -> i32 {
        self.width
    }

    pub const fn height(&self) -> i32 {
        self.height
    }

    pub const fn x_ofs(&self) -> f32 {
        self.x_ofs
    }

    pub const fn y_ofs(&self) -> f32 {
        self.y_ofs
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.x_ofs = x;
        self.y_ofs = y;
    }

    pub fn get_cell_value(&self, i: usize) -> Option<u32> {
        self.cell_array.get(i).copied()
    }

    pub fn cell_array(&self) -> &[u32] {
        &self.cell_array
    }

    pub(crate) fn cell_array_mut(&mut self) -> &mut [u32] {
        &mut self.cell_array
    }

    /// Header + cell array, identical to the wire payload minus the
    /// `cmdType` prefix (spec.md §6).
    pub fn write_body(&self, mut w: impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.cell_array.len() as u32)?;
        w.write_f32::<LittleEndian>(self.spiral_per)?;
        w.write_i32::<LittleEndian>(self.width)?;
        w.write_i32::<LittleEndian>(self.height)?;
        w.write_f32::<LittleEndian>(self.x_ofs)?;
        w.write_f32::<LittleEndian>(self.y_ofs)?;
        for cell in &self.cell_array {
            w.write_u32::<LittleEndian>(*cell)?;
        }
        Ok(())
    }

    pub fn read_body(tables: ScanTablesHandle, mut r: impl Read) -> Result<Self> {
        let length = r.read_u32::<LittleEndian>()? as usize;
        let n_max_cells = tables.last_cell_index() as usize + 1;
        if length > n_max_cells {
            return Err(Error::OutOfRange { what: "cell array length", value: length, max: n_max_cells });
        }
        let spiral_per = r.read_f32::<LittleEndian>()?;
        let width = r.read_i32::<LittleEndian>()?;
        let height = r.read_i32::<LittleEndian>()?;
        let x_ofs = r.read_f32::<LittleEndian>()?;
        let y_ofs = r.read_f32::<LittleEndian>()?;
        let mut cell_array = Vec::with_capacity(length);
        for _ in 0..length {
            cell_array.push(r.read_u32::<LittleEndian>()?);
        }
        Ok(Self { tables, spiral_per, width, height, x_ofs, y_ofs, cell_array })
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_body(file)
    }

    pub fn load_from_file(
        tables: ScanTablesHandle,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_body(tables, file)
    }
}

impl std::fmt::Debug for LPXImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LPXImage")
            .field("length", &self.cell_array.len())
            .field("spiral_per", &self.spiral_per)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("x_ofs", &self.x_ofs)
            .field("y_ofs", &self.y_ofs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let word = pack(1, 2, 3);
        assert_eq!(unpack(word), (1, 2, 3, 0));
    }

    #[test]
    fn load_rejects_length_over_max() {
        let tables = crate::scan_tables::ScanTables::synthesize(8, 6.0, 1);
        let mut buf = Vec::new();
        {
            use byteorder::{LittleEndian, WriteBytesExt};
            // Declare an absurd length that exceeds nMaxCells.
            buf.write_u32::<LittleEndian>(1_000_000).unwrap();
            buf.write_f32::<LittleEndian>(6.0).unwrap();
            buf.write_i32::<LittleEndian>(8).unwrap();
            buf.write_i32::<LittleEndian>(8).unwrap();
            buf.write_f32::<LittleEndian>(4.0).unwrap();
            buf.write_f32::<LittleEndian>(4.0).unwrap();
        }
        let result = LPXImage::read_body(tables, &buf[..]);
        assert!(matches!(result, Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn save_and_load_round_trip() {
        let tables = crate::scan_tables::ScanTables::synthesize(8, 6.0, 1);
        let mut img = LPXImage::new_empty(tables.clone(), 8, 8);
        for (i, cell) in img.cell_array_mut().iter_mut().enumerate() {
            *cell = pack(i as u8, i as u8, i as u8);
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.lpx");
        img.save_to_file(&path).unwrap();
        let loaded = LPXImage::load_from_file(tables, &path).unwrap();
        assert_eq!(loaded.cell_array(), img.cell_array());
    }
}
