use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use ndarray::{Array2, ShapeBuilder};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::marker::PhantomData;
use std::path::Path;

use tracing::debug;

use super::{CellArray, CharArray, MatClass, MatFile, MatValue, NumericArray, StructArray};
use crate::error::{ConvertError, Result};

// Header layout (from the MathWorks MAT-file format description)
const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;
// Smallest nested matrix element: a bare 8-byte tag
const TAG_LEN: usize = 8;
const VERSION_OFFSET: usize = 124;
const ENDIAN_OFFSET: usize = 126;
const MAT_VERSION_73: u16 = 0x0200;

// Data element types
pub(super) const MI_INT8: u32 = 1;
pub(super) const MI_UINT8: u32 = 2;
pub(super) const MI_INT16: u32 = 3;
pub(super) const MI_UINT16: u32 = 4;
pub(super) const MI_INT32: u32 = 5;
pub(super) const MI_UINT32: u32 = 6;
pub(super) const MI_SINGLE: u32 = 7;
pub(super) const MI_DOUBLE: u32 = 9;
pub(super) const MI_INT64: u32 = 12;
pub(super) const MI_UINT64: u32 = 13;
pub(super) const MI_MATRIX: u32 = 14;
pub(super) const MI_COMPRESSED: u32 = 15;
pub(super) const MI_UTF8: u32 = 16;
pub(super) const MI_UTF16: u32 = 17;
pub(super) const MI_UTF32: u32 = 18;

// Array classes
pub(super) const MX_CELL: u32 = 1;
pub(super) const MX_STRUCT: u32 = 2;
pub(super) const MX_CHAR: u32 = 4;
pub(super) const MX_DOUBLE: u32 = 6;

// Array flag bits
pub(super) const FLAG_COMPLEX: u32 = 0x0800;
pub(super) const FLAG_LOGICAL: u32 = 0x0200;

/// Decoding failure, converted into `ConvertError::Mat` once the file path is known.
#[derive(Debug)]
struct DecodeError(String);

impl From<io::Error> for DecodeError {
    fn from(error: io::Error) -> Self {
        DecodeError(format!("truncated element ({})", error))
    }
}

impl From<&str> for DecodeError {
    fn from(message: &str) -> Self {
        DecodeError(message.to_string())
    }
}

type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Element tag; `small` marks the packed 4-byte data format.
struct Tag {
    data_type: u32,
    num_bytes: usize,
    small: bool,
}

/// Loads a MAT file from disk.
pub fn load_file<P: AsRef<Path>>(file_path: P) -> Result<MatFile> {
    let path = file_path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(65536, file); // 64KB buffer
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mat = parse_bytes(path, &bytes)?;
    debug!(
        "decoded {} ({} variables)",
        path.display(),
        mat.variables.len()
    );
    Ok(mat)
}

/// Decodes an in-memory MAT file. `path` is only used for error reporting.
pub fn parse_bytes(path: &Path, bytes: &[u8]) -> Result<MatFile> {
    if bytes.len() < HEADER_LEN {
        return Err(ConvertError::mat(path, "file is shorter than the MAT header"));
    }

    let header = String::from_utf8_lossy(&bytes[..HEADER_TEXT_LEN])
        .trim_end_matches(|c: char| c == ' ' || c == '\0')
        .to_string();
    if !header.starts_with("MATLAB") {
        return Err(ConvertError::mat(path, "unrecognized file format"));
    }

    let decoded = match &bytes[ENDIAN_OFFSET..HEADER_LEN] {
        b"IM" => Decoder::<LittleEndian>::new().decode(bytes),
        b"MI" => Decoder::<BigEndian>::new().decode(bytes),
        _ => Err(DecodeError::from("invalid endian indicator")),
    };

    let variables = decoded.map_err(|DecodeError(message)| ConvertError::mat(path, message))?;
    Ok(MatFile {
        path: path.to_path_buf(),
        header,
        variables,
    })
}

struct Decoder<B: ByteOrder> {
    _order: PhantomData<B>,
}

impl<B: ByteOrder> Decoder<B> {
    fn new() -> Self {
        Decoder {
            _order: PhantomData,
        }
    }

    fn decode(&self, bytes: &[u8]) -> DecodeResult<Vec<(String, MatValue)>> {
        let version = B::read_u16(&bytes[VERSION_OFFSET..ENDIAN_OFFSET]);
        if version == MAT_VERSION_73 {
            return Err("v7.3 (HDF5-based) MAT files are not supported".into());
        }

        let body = &bytes[HEADER_LEN..];
        let mut cursor = Cursor::new(body);
        let mut variables = Vec::new();

        while (cursor.position() as usize) + 8 <= body.len() {
            if let Some(variable) = self.read_top_level(&mut cursor)? {
                variables.push(variable);
            }
        }

        Ok(variables)
    }

    /// Reads one top-level element, inflating it first if it is compressed.
    fn read_top_level(&self, cursor: &mut Cursor<&[u8]>) -> DecodeResult<Option<(String, MatValue)>> {
        let tag = read_tag::<B>(cursor)?;
        let payload = take(cursor, &tag)?;

        match tag.data_type {
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(payload)
                    .read_to_end(&mut inflated)
                    .map_err(|e| DecodeError(format!("cannot inflate compressed element: {}", e)))?;
                let mut inner = Cursor::new(inflated.as_slice());
                self.read_top_level(&mut inner)
            }
            MI_MATRIX => self.parse_matrix(payload).map(Some),
            other => {
                debug!("skipping top-level element of type {}", other);
                Ok(None)
            }
        }
    }

    /// Reads a nested `miMATRIX` element (cell item or struct field).
    fn read_nested(&self, cursor: &mut Cursor<&[u8]>) -> DecodeResult<MatValue> {
        let tag = read_tag::<B>(cursor)?;
        if tag.data_type != MI_MATRIX {
            return Err(DecodeError(format!(
                "expected a matrix element, found type {}",
                tag.data_type
            )));
        }
        let payload = take(cursor, &tag)?;
        self.parse_matrix(payload).map(|(_, value)| value)
    }

    fn parse_matrix(&self, payload: &[u8]) -> DecodeResult<(String, MatValue)> {
        // MATLAB writes empty cells as matrix elements without content
        if payload.is_empty() {
            return Ok((String::new(), empty_double()));
        }

        let mut cursor = Cursor::new(payload);

        // Array flags
        let flags_tag = read_tag::<B>(&mut cursor)?;
        let flags_bytes = take(&mut cursor, &flags_tag)?;
        if flags_bytes.len() < 4 {
            return Err("array flags element is too short".into());
        }
        let flags = B::read_u32(&flags_bytes[..4]);
        let class = flags & 0xff;

        let dims = self.read_dimensions(&mut cursor)?;

        // Array name
        let name_tag = read_tag::<B>(&mut cursor)?;
        let name_bytes = take(&mut cursor, &name_tag)?;
        let name = String::from_utf8_lossy(name_bytes).trim_end_matches('\0').to_string();

        let value = match class {
            MX_CELL => {
                let count = element_count(&dims)?;
                let remaining = remaining_bytes(&cursor);
                if count > remaining / TAG_LEN {
                    return Err(DecodeError(format!(
                        "{} cell items cannot fit in {} bytes",
                        count, remaining
                    )));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_nested(&mut cursor)?);
                }
                MatValue::Cell(CellArray { dims, items })
            }
            MX_STRUCT => self.parse_struct(&mut cursor, dims)?,
            MX_CHAR => {
                let data_tag = read_tag::<B>(&mut cursor)?;
                let data = take(&mut cursor, &data_tag)?;
                if dims[0] > payload.len() {
                    return Err(DecodeError(format!(
                        "{} character rows cannot fit in {} bytes",
                        dims[0],
                        payload.len()
                    )));
                }
                let chars = decode_chars::<B>(data_tag.data_type, data)?;
                MatValue::Char(arrange_char_rows(dims, chars))
            }
            MX_DOUBLE..=15 => {
                if flags & FLAG_COMPLEX != 0 {
                    return Err("complex arrays are not supported".into());
                }
                let data_tag = read_tag::<B>(&mut cursor)?;
                let data = take(&mut cursor, &data_tag)?;
                let values = decode_numeric::<B>(data_tag.data_type, data)?;
                MatValue::Numeric(build_numeric(class, flags & FLAG_LOGICAL != 0, dims, values)?)
            }
            other => {
                return Err(DecodeError(format!("unsupported array class {}", other)));
            }
        };

        Ok((name, value))
    }

    fn read_dimensions(&self, cursor: &mut Cursor<&[u8]>) -> DecodeResult<Vec<usize>> {
        let tag = read_tag::<B>(cursor)?;
        let bytes = take(cursor, &tag)?;
        let dims: Vec<usize> = bytes
            .chunks_exact(4)
            .map(|chunk| B::read_i32(chunk).max(0) as usize)
            .collect();
        if dims.len() < 2 {
            return Err("dimensions element must hold at least two values".into());
        }
        Ok(dims)
    }

    fn parse_struct(&self, cursor: &mut Cursor<&[u8]>, dims: Vec<usize>) -> DecodeResult<MatValue> {
        let len_tag = read_tag::<B>(cursor)?;
        let len_bytes = take(cursor, &len_tag)?;
        if len_bytes.len() < 4 {
            return Err("field name length element is too short".into());
        }
        let name_len = B::read_i32(&len_bytes[..4]).max(0) as usize;
        if name_len == 0 {
            return Err("field name length must be positive".into());
        }

        let names_tag = read_tag::<B>(cursor)?;
        let names_bytes = take(cursor, &names_tag)?;
        let field_names: Vec<String> = names_bytes
            .chunks(name_len)
            .map(|chunk| String::from_utf8_lossy(chunk).trim_end_matches('\0').to_string())
            .collect();

        let count = element_count(&dims)?;
        let remaining = remaining_bytes(cursor);
        let nested = count
            .checked_mul(field_names.len().max(1))
            .ok_or("struct dimensions overflow")?;
        if nested > (remaining / TAG_LEN).max(1) {
            return Err(DecodeError(format!(
                "{} struct fields cannot fit in {} bytes",
                nested, remaining
            )));
        }
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            let mut values = Vec::with_capacity(field_names.len());
            for _ in 0..field_names.len() {
                values.push(self.read_nested(cursor)?);
            }
            elements.push(values);
        }

        Ok(MatValue::Struct(StructArray {
            dims,
            field_names,
            elements,
        }))
    }
}

/// Reads a tag in either the regular or the small data element format.
fn read_tag<B: ByteOrder>(cursor: &mut Cursor<&[u8]>) -> DecodeResult<Tag> {
    let first = cursor.read_u32::<B>()?;
    if first >> 16 != 0 {
        return Ok(Tag {
            data_type: first & 0xffff,
            num_bytes: (first >> 16) as usize,
            small: true,
        });
    }
    let num_bytes = cursor.read_u32::<B>()? as usize;
    Ok(Tag {
        data_type: first,
        num_bytes,
        small: false,
    })
}

/// Returns the element's data and advances past it, including padding.
fn take<'a>(cursor: &mut Cursor<&'a [u8]>, tag: &Tag) -> DecodeResult<&'a [u8]> {
    let data: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;

    if tag.small {
        let packed = data.get(start..start + 4).ok_or("truncated small element")?;
        cursor.set_position((start + 4) as u64);
        return packed.get(..tag.num_bytes).ok_or_else(|| "invalid small element size".into());
    }

    let end = start + tag.num_bytes;
    let bytes = data.get(start..end).ok_or("element extends past end of data")?;
    // Compressed elements are not padded
    let padded_end = if tag.data_type == MI_COMPRESSED {
        end
    } else {
        (end + 7) & !7
    };
    cursor.set_position(padded_end.min(data.len()) as u64);
    Ok(bytes)
}

fn element_count(dims: &[usize]) -> DecodeResult<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| DecodeError(format!("dimensions {:?} overflow", dims)))
}

fn remaining_bytes(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn empty_double() -> MatValue {
    MatValue::Numeric(NumericArray {
        class: MatClass::Double,
        logical: false,
        dims: vec![0, 0],
        data: Array2::zeros((0, 0)),
    })
}

fn numeric_class(class: u32) -> DecodeResult<MatClass> {
    Ok(match class {
        6 => MatClass::Double,
        7 => MatClass::Single,
        8 => MatClass::Int8,
        9 => MatClass::UInt8,
        10 => MatClass::Int16,
        11 => MatClass::UInt16,
        12 => MatClass::Int32,
        13 => MatClass::UInt32,
        14 => MatClass::Int64,
        15 => MatClass::UInt64,
        other => return Err(DecodeError(format!("unsupported numeric class {}", other))),
    })
}

fn build_numeric(class: u32, logical: bool, dims: Vec<usize>, values: Vec<f64>) -> DecodeResult<NumericArray> {
    let rows = dims[0];
    let cols = element_count(&dims[1..])?;
    let count = element_count(&dims)?;
    if values.len() != count {
        return Err(DecodeError(format!(
            "array holds {} values but dimensions {:?} require {}",
            values.len(),
            dims,
            count
        )));
    }
    let data = Array2::from_shape_vec((rows, cols).f(), values)
        .map_err(|e| DecodeError(format!("invalid array shape: {}", e)))?;
    Ok(NumericArray {
        class: numeric_class(class)?,
        logical,
        dims,
        data,
    })
}

/// Converts a numeric data element of any storage type to `f64`.
fn decode_numeric<B: ByteOrder>(data_type: u32, bytes: &[u8]) -> DecodeResult<Vec<f64>> {
    let values = match data_type {
        MI_INT8 => bytes.iter().map(|&b| b as i8 as f64).collect(),
        MI_UINT8 => bytes.iter().map(|&b| b as f64).collect(),
        MI_INT16 => bytes.chunks_exact(2).map(|c| B::read_i16(c) as f64).collect(),
        MI_UINT16 => bytes.chunks_exact(2).map(|c| B::read_u16(c) as f64).collect(),
        MI_INT32 => bytes.chunks_exact(4).map(|c| B::read_i32(c) as f64).collect(),
        MI_UINT32 => bytes.chunks_exact(4).map(|c| B::read_u32(c) as f64).collect(),
        MI_SINGLE => bytes.chunks_exact(4).map(|c| B::read_f32(c) as f64).collect(),
        MI_DOUBLE => bytes.chunks_exact(8).map(B::read_f64).collect(),
        MI_INT64 => bytes.chunks_exact(8).map(|c| B::read_i64(c) as f64).collect(),
        MI_UINT64 => bytes.chunks_exact(8).map(|c| B::read_u64(c) as f64).collect(),
        other => return Err(DecodeError(format!("unsupported numeric data type {}", other))),
    };
    Ok(values)
}

fn decode_chars<B: ByteOrder>(data_type: u32, bytes: &[u8]) -> DecodeResult<Vec<char>> {
    let chars = match data_type {
        MI_UTF8 => String::from_utf8_lossy(bytes).chars().collect(),
        MI_INT8 | MI_UINT8 => bytes.iter().map(|&b| b as char).collect(),
        MI_UINT16 | MI_UTF16 => {
            let units: Vec<u16> = bytes.chunks_exact(2).map(B::read_u16).collect();
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        MI_UINT32 | MI_UTF32 => bytes
            .chunks_exact(4)
            .map(|c| char::from_u32(B::read_u32(c)).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
        other => return Err(DecodeError(format!("unsupported character data type {}", other))),
    };
    Ok(chars)
}

/// Char arrays are stored column-major; rebuild one string per row.
fn arrange_char_rows(dims: Vec<usize>, chars: Vec<char>) -> CharArray {
    let rows = dims[0];
    let cols: usize = dims[1..].iter().product();
    let text_rows = (0..rows)
        .map(|r| {
            (0..cols)
                .filter_map(|c| chars.get(c * rows + r))
                .collect::<String>()
                .trim_end_matches('\0')
                .to_string()
        })
        .collect();
    CharArray {
        dims,
        rows: text_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mat::to_bytes;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn sample_bytes() -> Vec<u8> {
        let rgb = MatValue::structure(vec![
            ("Center", MatValue::matrix(3, 2, vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0]).unwrap()),
            ("MotionMeasure", MatValue::column(vec![0.5, 0.25, f64::NAN])),
        ]);
        let lines = MatValue::cell(
            2,
            2,
            vec![
                MatValue::text("B6"),
                MatValue::text("CRH"),
                MatValue::text("Bl6"),
                MatValue::text("CRH-Cre"),
            ],
        );
        to_bytes(&[("RGB", &rgb), ("Lines", &lines)])
    }

    #[test]
    fn decodes_nested_struct_fields() {
        let mat = parse_bytes(Path::new("sample.mat"), &sample_bytes()).unwrap();
        assert!(mat.header.starts_with("MATLAB 5.0 MAT-file"));

        let center = mat.require_numeric("RGB.Center").unwrap();
        assert_eq!(center.rows(), 3);
        assert_eq!(center.column(0).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(center.column(1).unwrap(), vec![10.0, 20.0, 30.0]);

        let motion = mat.require_numeric("RGB.MotionMeasure").unwrap().flatten();
        assert_eq!(motion[1], 0.25);
        assert!(motion[2].is_nan());
    }

    #[test]
    fn decodes_cell_items_column_major() {
        let mat = parse_bytes(Path::new("sample.mat"), &sample_bytes()).unwrap();
        let lines = mat.get("Lines").and_then(|v| v.as_cell()).unwrap();
        assert_eq!(lines.get(0, 0).and_then(|v| v.as_text()).unwrap(), "B6");
        assert_eq!(lines.get(1, 0).and_then(|v| v.as_text()).unwrap(), "CRH");
        assert_eq!(lines.get(1, 1).and_then(|v| v.as_text()).unwrap(), "CRH-Cre");
        assert!(lines.get(2, 0).is_none());
    }

    #[test]
    fn missing_entry_is_reported_with_path() {
        let mat = parse_bytes(Path::new("sample.mat"), &sample_bytes()).unwrap();
        let err = mat.require("RGB.Speed").unwrap_err();
        assert!(matches!(err, ConvertError::MissingMatEntry { ref entry, .. } if entry == "RGB.Speed"));
    }

    #[test]
    fn inflates_compressed_elements() {
        let plain = sample_bytes();
        let body = &plain[HEADER_LEN..];

        // Re-wrap each top-level element into its own compressed element
        let mut out = plain[..HEADER_LEN].to_vec();
        let mut cursor = Cursor::new(body);
        while (cursor.position() as usize) < body.len() {
            let start = cursor.position() as usize;
            let tag = read_tag::<LittleEndian>(&mut cursor).unwrap();
            take(&mut cursor, &tag).unwrap();
            let end = cursor.position() as usize;

            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body[start..end]).unwrap();
            let compressed = encoder.finish().unwrap();
            out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
            out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            out.extend_from_slice(&compressed);
        }

        let mat = parse_bytes(Path::new("compressed.mat"), &out).unwrap();
        assert_eq!(mat.variables.len(), 2);
        assert_eq!(mat.require_numeric("RGB.Center").unwrap().rows(), 3);
    }

    #[test]
    fn decodes_small_element_int16_data() {
        // 1x2 int16 matrix whose data fits into a small data element
        let mut payload = Vec::new();
        payload.extend_from_slice(&MI_UINT32.to_le_bytes());
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(&10u32.to_le_bytes()); // mxINT16_CLASS
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&MI_INT32.to_le_bytes());
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(&1i32.to_le_bytes());
        payload.extend_from_slice(&2i32.to_le_bytes());
        payload.extend_from_slice(&((1u32 << 16) | MI_INT8).to_le_bytes());
        payload.extend_from_slice(b"x\0\0\0");
        payload.extend_from_slice(&((4u32 << 16) | MI_INT16).to_le_bytes());
        payload.extend_from_slice(&(-3i16).to_le_bytes());
        payload.extend_from_slice(&7i16.to_le_bytes());

        let mut bytes = to_bytes(&[]);
        bytes.extend_from_slice(&MI_MATRIX.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        let mat = parse_bytes(Path::new("small.mat"), &bytes).unwrap();
        let x = mat.require_numeric("x").unwrap();
        assert_eq!(x.class, MatClass::Int16);
        assert_eq!(x.flatten(), vec![-3.0, 7.0]);
    }

    /// A top-level cell matrix named `c` with the given dimensions and no items.
    fn empty_cell_with_dims(dims: &[i32]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&MI_UINT32.to_le_bytes());
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(&MX_CELL.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&MI_INT32.to_le_bytes());
        payload.extend_from_slice(&((dims.len() * 4) as u32).to_le_bytes());
        for dim in dims {
            payload.extend_from_slice(&dim.to_le_bytes());
        }
        if dims.len() % 2 == 1 {
            payload.extend_from_slice(&[0; 4]);
        }
        payload.extend_from_slice(&((1u32 << 16) | MI_INT8).to_le_bytes());
        payload.extend_from_slice(b"c\0\0\0");

        let mut bytes = to_bytes(&[]);
        bytes.extend_from_slice(&MI_MATRIX.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    #[test]
    fn corrupt_dimensions_are_decoding_errors() {
        let overflow = empty_cell_with_dims(&[i32::MAX, i32::MAX, i32::MAX]);
        let err = parse_bytes(Path::new("overflow.mat"), &overflow).unwrap_err();
        assert!(matches!(err, ConvertError::Mat { ref message, .. } if message.contains("overflow")));

        let oversized = empty_cell_with_dims(&[100_000, 100_000]);
        let err = parse_bytes(Path::new("oversized.mat"), &oversized).unwrap_err();
        assert!(matches!(err, ConvertError::Mat { ref message, .. } if message.contains("cannot fit")));
    }

    #[test]
    fn rejects_non_mat_files() {
        let err = parse_bytes(Path::new("notes.txt"), &[b'x'; 200]).unwrap_err();
        assert!(matches!(err, ConvertError::Mat { .. }));
    }
}
