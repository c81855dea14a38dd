use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::reader::{
    FLAG_LOGICAL, MI_DOUBLE, MI_INT32, MI_INT8, MI_MATRIX, MI_UINT16, MI_UINT32, MX_CELL,
    MX_CHAR, MX_DOUBLE, MX_STRUCT,
};
use super::MatValue;
use crate::error::Result;

const HEADER_TEXT: &str = "MATLAB 5.0 MAT-file, Platform: rust, Created by: session_converter";

/// Writes variables to an uncompressed little-endian level-5 MAT file.
///
/// Numeric arrays are always stored as doubles.
pub fn write_file<P: AsRef<Path>>(file_path: P, variables: &[(&str, &MatValue)]) -> Result<()> {
    let file = File::create(file_path.as_ref())?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&to_bytes(variables))?;
    writer.flush()?;
    Ok(())
}

/// Encodes variables into the bytes of a level-5 MAT file.
pub fn to_bytes(variables: &[(&str, &MatValue)]) -> Vec<u8> {
    let mut out = Vec::new();

    let mut text = HEADER_TEXT.as_bytes().to_vec();
    text.resize(116, b' ');
    out.extend_from_slice(&text);
    out.extend_from_slice(&[0u8; 8]); // subsystem data offset
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(b"IM");

    for (name, value) in variables {
        push_element(&mut out, MI_MATRIX, &encode_matrix(name, value));
    }

    out
}

/// Appends a tagged element, padded to an 8-byte boundary.
fn push_element(out: &mut Vec<u8>, data_type: u32, data: &[u8]) {
    out.extend_from_slice(&data_type.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    let padding = (8 - data.len() % 8) % 8;
    out.extend(std::iter::repeat(0u8).take(padding));
}

/// Encodes the content of a `miMATRIX` element (without its own tag).
fn encode_matrix(name: &str, value: &MatValue) -> Vec<u8> {
    let mut out = Vec::new();

    let (class, flags, dims) = match value {
        MatValue::Numeric(n) => {
            let flags = if n.logical { FLAG_LOGICAL } else { 0 };
            (MX_DOUBLE, flags, vec![n.rows(), n.cols()])
        }
        MatValue::Char(c) => {
            let cols = c.rows.iter().map(|r| r.encode_utf16().count()).max().unwrap_or(0);
            (MX_CHAR, 0, vec![c.rows.len(), cols])
        }
        MatValue::Cell(c) => (MX_CELL, 0, c.dims.clone()),
        MatValue::Struct(s) => (MX_STRUCT, 0, s.dims.clone()),
    };

    let mut flag_bytes = Vec::with_capacity(8);
    flag_bytes.extend_from_slice(&(class | flags).to_le_bytes());
    flag_bytes.extend_from_slice(&0u32.to_le_bytes());
    push_element(&mut out, MI_UINT32, &flag_bytes);

    let mut dim_bytes = Vec::with_capacity(dims.len() * 4);
    for dim in &dims {
        // Writing into a Vec cannot fail
        let _ = dim_bytes.write_i32::<LittleEndian>(*dim as i32);
    }
    push_element(&mut out, MI_INT32, &dim_bytes);
    push_element(&mut out, MI_INT8, name.as_bytes());

    match value {
        MatValue::Numeric(n) => {
            let mut data = Vec::with_capacity(n.data.len() * 8);
            for v in n.data.t().iter() {
                let _ = data.write_f64::<LittleEndian>(*v);
            }
            push_element(&mut out, MI_DOUBLE, &data);
        }
        MatValue::Char(c) => {
            let rows = c.rows.len();
            let cols = dims[1];
            let units: Vec<Vec<u16>> = c.rows.iter().map(|r| r.encode_utf16().collect()).collect();
            let mut data = Vec::with_capacity(rows * cols * 2);
            for col in 0..cols {
                for row in &units {
                    let unit = row.get(col).copied().unwrap_or(0);
                    let _ = data.write_u16::<LittleEndian>(unit);
                }
            }
            push_element(&mut out, MI_UINT16, &data);
        }
        MatValue::Cell(c) => {
            for item in &c.items {
                push_element(&mut out, MI_MATRIX, &encode_matrix("", item));
            }
        }
        MatValue::Struct(s) => {
            let name_len = s.field_names.iter().map(|f| f.len()).max().unwrap_or(0) + 1;
            push_element(&mut out, MI_INT32, &(name_len as i32).to_le_bytes());

            let mut names = Vec::with_capacity(name_len * s.field_names.len());
            for field in &s.field_names {
                let mut bytes = field.as_bytes().to_vec();
                bytes.resize(name_len, 0);
                names.extend_from_slice(&bytes);
            }
            push_element(&mut out, MI_INT8, &names);

            for element in &s.elements {
                for field_value in element {
                    push_element(&mut out, MI_MATRIX, &encode_matrix("", field_value));
                }
            }
        }
    }

    out
}
