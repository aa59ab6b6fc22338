//! Binary and textual on-disk layouts for scan-table files (spec.md §6).

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 4] = b"LPXT";
pub const VERSION: u32 = 1;

/// Raw, unvalidated field values as they appear on disk, in declaration
/// order. [`super::ScanTables::load`] is responsible for validating these
/// before they become a usable [`super::ScanTables`].
pub struct RawTables {
    pub map_width: i32,
    pub spiral_per: f32,
    pub length: i32,
    pub inner_length: i32,
    pub last_fovea_index: i32,
    pub last_cell_index: i32,
    pub outer_pixel_index: Vec<i32>,
    pub outer_pixel_cell_idx: Vec<i32>,
    pub inner_cells: Vec<(i32, i32)>,
}

pub fn read_binary(mut r: impl Read) -> Result<RawTables> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::InvalidFormat {
            path: "<stream>".into(),
            reason: "missing LPXT magic".into(),
        });
    }

    let _version = r.read_u32::<LittleEndian>()?;
    let map_width = r.read_i32::<LittleEndian>()?;
    let spiral_per = r.read_f32::<LittleEndian>()?;
    let length = r.read_i32::<LittleEndian>()?;
    let inner_length = r.read_i32::<LittleEndian>()?;
    let last_fovea_index = r.read_i32::<LittleEndian>()?;
    let last_cell_index = r.read_i32::<LittleEndian>()?;

    let outer_pixel_index = read_i32_array(&mut r, length)?;
    let outer_pixel_cell_idx = read_i32_array(&mut r, length)?;

    let mut inner_cells = Vec::with_capacity(inner_length.max(0) as usize);
    for _ in 0..inner_length.max(0) {
        let x = r.read_i32::<LittleEndian>()?;
        let y = r.read_i32::<LittleEndian>()?;
        inner_cells.push((x, y));
    }

    Ok(RawTables {
        map_width,
        spiral_per,
        length,
        inner_length,
        last_fovea_index,
        last_cell_index,
        outer_pixel_index,
        outer_pixel_cell_idx,
        inner_cells,
    })
}

fn read_i32_array(r: &mut impl Read, len: i32) -> Result<Vec<i32>> {
    let mut out = Vec::with_capacity(len.max(0) as usize);
    for _ in 0..len.max(0) {
        out.push(r.read_i32::<LittleEndian>()?);
    }
    Ok(out)
}

pub fn write_binary(mut w: impl Write, t: &RawTables) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_i32::<LittleEndian>(t.map_width)?;
    w.write_f32::<LittleEndian>(t.spiral_per)?;
    w.write_i32::<LittleEndian>(t.length)?;
    w.write_i32::<LittleEndian>(t.inner_length)?;
    w.write_i32::<LittleEndian>(t.last_fovea_index)?;
    w.write_i32::<LittleEndian>(t.last_cell_index)?;
    for v in &t.outer_pixel_index {
        w.write_i32::<LittleEndian>(*v)?;
    }
    for v in &t.outer_pixel_cell_idx {
        w.write_i32::<LittleEndian>(*v)?;
    }
    for (x, y) in &t.inner_cells {
        w.write_i32::<LittleEndian>(*x)?;
        w.write_i32::<LittleEndian>(*y)?;
    }
    Ok(())
}

/// Textual layout: the same fields as the binary header, as a structured
/// document. Field names match the binary header names verbatim.
#[derive(Serialize, Deserialize)]
struct TextualTables {
    #[serde(rename = "mapWidth")]
    map_width: i32,
    #[serde(rename = "spiralPer")]
    spiral_per: f32,
    length: i32,
    #[serde(rename = "innerLength")]
    inner_length: i32,
    #[serde(rename = "lastFoveaIndex")]
    last_fovea_index: i32,
    #[serde(rename = "lastCellIndex")]
    last_cell_index: i32,
    #[serde(rename = "outerPixelIndex")]
    outer_pixel_index: Vec<i32>,
    #[serde(rename = "outerPixelCellIdx")]
    outer_pixel_cell_idx: Vec<i32>,
    #[serde(rename = "innerCells")]
    inner_cells: Vec<(i32, i32)>,
}

pub fn read_textual(bytes: &[u8]) -> Result<RawTables> {
    let t: TextualTables = serde_json::from_slice(bytes).map_err(|e| Error::InvalidFormat {
        path: "<stream>".into(),
        reason: e.to_string(),
    })?;
    Ok(RawTables {
        map_width: t.map_width,
        spiral_per: t.spiral_per,
        length: t.length,
        inner_length: t.inner_length,
        last_fovea_index: t.last_fovea_index,
        last_cell_index: t.last_cell_index,
        outer_pixel_index: t.outer_pixel_index,
        outer_pixel_cell_idx: t.outer_pixel_cell_idx,
        inner_cells: t.inner_cells,
    })
}

pub fn write_textual(w: impl Write, t: &RawTables) -> Result<()> {
    let textual = TextualTables {
        map_width: t.map_width,
        spiral_per: t.spiral_per,
        length: t.length,
        inner_length: t.inner_length,
        last_fovea_index: t.last_fovea_index,
        last_cell_index: t.last_cell_index,
        outer_pixel_index: t.outer_pixel_index.clone(),
        outer_pixel_cell_idx: t.outer_pixel_cell_idx.clone(),
        inner_cells: t.inner_cells.clone(),
    };
    serde_json::to_writer_pretty(w, &textual).map_err(|e| Error::InvalidFormat {
        path: "<stream>".into(),
        reason: e.to_string(),
    })
}

/// Auto-detects the on-disk format from the first four bytes and parses it.
pub fn read_auto(bytes: &[u8]) -> Result<RawTables> {
    if bytes.len() >= 4 && &bytes[0..4] == MAGIC {
        read_binary(bytes)
    } else {
        read_textual(bytes)
    }
}
