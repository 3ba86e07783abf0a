// Value cell encoding.
//
// A cell is a type tag, flags, an array length and a 16 byte union. Fixed
// width scalars sit in the union. Strings and arrays go out of line behind
// a relative pointer; array elements are a contiguous run of unions.
// Reference, object and instance values keep an external reference slot.

use crate::error::{Result, ScmoError};
use crate::memory::layout::*;
use crate::memory::Chunk;
use crate::types::{CimDateTime, CimType};
use crate::value::{CimValue, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CellHeader {
    pub cim_type: CimType,
    pub is_null: bool,
    pub is_array: bool,
    pub is_set: bool,
    pub array_size: u32,
}

pub(crate) fn read_header(chunk: &Chunk, cell: usize) -> Result<CellHeader> {
    let tag = chunk.read_u32(cell + CELL_TYPE);
    let cim_type = CimType::from_u32(tag)
        .ok_or_else(|| ScmoError::invalid_chunk(format!("unknown type tag {} at {}", tag, cell)))?;
    let flags = chunk.read_u32(cell + CELL_FLAGS);
    Ok(CellHeader {
        cim_type,
        is_null: flags & CELL_FLAG_NULL != 0,
        is_array: flags & CELL_FLAG_ARRAY != 0,
        is_set: flags & CELL_FLAG_SET != 0,
        array_size: chunk.read_u32(cell + CELL_ARRAY_SIZE),
    })
}

pub(crate) fn is_set(chunk: &Chunk, cell: usize) -> bool {
    chunk.read_u32(cell + CELL_FLAGS) & CELL_FLAG_SET != 0
}

/// Encodes `value` into the cell at `cell`, releasing whatever external
/// references the cell held before.
pub(crate) fn write_cell(chunk: &mut Chunk, cell: usize, value: &CimValue, set: bool) -> Result<()> {
    release_cell(chunk, cell);

    let mut flags = if set { CELL_FLAG_SET } else { 0 };
    if value.is_array() {
        flags |= CELL_FLAG_ARRAY;
    }
    chunk.write_u32(cell + CELL_TYPE, value.cim_type() as u32);
    chunk.write_u32(cell + CELL_ARRAY_SIZE, 0);
    chunk.write_ptr(cell + CELL_UNION, Default::default());

    match value {
        CimValue::Null { .. } => flags |= CELL_FLAG_NULL,
        CimValue::Scalar(s) => write_union(chunk, cell + CELL_UNION, s)?,
        CimValue::Array { elements, .. } => {
            let run = chunk.alloc(elements.len() * UNION_SIZE)?;
            chunk.write_ptr(cell + CELL_UNION, run);
            chunk.write_u32(cell + CELL_ARRAY_SIZE, elements.len() as u32);
            for (i, e) in elements.iter().enumerate() {
                write_union(chunk, run.start as usize + i * UNION_SIZE, e)?;
            }
        }
    }
    chunk.write_u32(cell + CELL_FLAGS, flags);
    Ok(())
}

pub(crate) fn read_cell(chunk: &Chunk, cell: usize) -> Result<CimValue> {
    let header = read_header(chunk, cell)?;
    if header.is_null {
        return Ok(CimValue::Null {
            cim_type: header.cim_type,
            is_array: header.is_array,
        });
    }
    if !header.is_array {
        return Ok(CimValue::Scalar(read_union(
            chunk,
            cell + CELL_UNION,
            header.cim_type,
        )?));
    }
    let run = chunk.read_ptr(cell + CELL_UNION);
    let n = header.array_size as usize;
    if n > 0 {
        chunk.check_ptr(run, n * UNION_SIZE)?;
    }
    let mut elements = Vec::with_capacity(n);
    for i in 0..n {
        elements.push(read_union(
            chunk,
            run.start as usize + i * UNION_SIZE,
            header.cim_type,
        )?);
    }
    Ok(CimValue::Array {
        cim_type: header.cim_type,
        elements,
    })
}

pub(crate) fn write_union(chunk: &mut Chunk, at: usize, value: &Scalar) -> Result<()> {
    if let Some(bits) = value.inline_bits() {
        chunk.write_u64(at, bits);
        return Ok(());
    }
    match value {
        Scalar::String(s) => chunk.set_str(at, s),
        Scalar::DateTime(d) => chunk.set_str(at, d.as_str()),
        Scalar::Reference(i) | Scalar::Object(i) | Scalar::Instance(i) => {
            chunk.add_ext_ref(at, i.clone())
        }
        _ => Ok(()),
    }
}

pub(crate) fn read_union(chunk: &Chunk, at: usize, cim_type: CimType) -> Result<Scalar> {
    if let Some(s) = Scalar::from_inline_bits(cim_type, chunk.read_u64(at)) {
        return Ok(s);
    }
    match cim_type {
        t if t.is_string_like() => {
            let s = chunk
                .str_field(at)
                .ok_or_else(|| ScmoError::invalid_chunk(format!("bad string pointer at {}", at)))?;
            Ok(match cim_type {
                CimType::DateTime => Scalar::DateTime(CimDateTime::from_stored(s)),
                _ => Scalar::String(s.to_string()),
            })
        }
        _ => chunk
            .ext_ref_at(at)
            .cloned()
            .and_then(|i| Scalar::with_external_type(i, cim_type))
            .ok_or_else(|| {
                ScmoError::invalid_chunk(format!("dangling external reference at {}", at))
            }),
    }
}

/// Drops the external references held by a cell about to be overwritten.
pub(crate) fn release_cell(chunk: &mut Chunk, cell: usize) {
    let Ok(header) = read_header(chunk, cell) else {
        return;
    };
    if !header.cim_type.is_external() || header.is_null {
        return;
    }
    if header.is_array {
        let run = chunk.read_ptr(cell + CELL_UNION).start as usize;
        for i in 0..header.array_size as usize {
            chunk.remove_ext_ref(run + i * UNION_SIZE);
        }
    } else {
        chunk.remove_ext_ref(cell + CELL_UNION);
    }
}
