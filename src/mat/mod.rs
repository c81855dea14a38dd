//! MATLAB level-5 MAT-file support.
//!
//! The lab's analysis toolchain exports tracking, cardiac, thermal and event
//! data as `.mat` files holding nested structs, cell arrays and numeric
//! matrices. This module decodes them into [`MatValue`] trees with numeric
//! data held as column-major-decoded [`ndarray::Array2<f64>`] matrices, and
//! can write the same subset back out.
//!
//! Supported: numeric classes (converted to `f64`), logical, char, cell and
//! struct arrays, both byte orders, and zlib-compressed elements. Sparse,
//! object and complex arrays, and v7.3 (HDF5-based) files are rejected.

mod reader;
mod writer;

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis, ShapeBuilder};

use crate::error::{ConvertError, Result};

pub use reader::parse_bytes;
pub use writer::{to_bytes, write_file};

/// Storage class of a numeric array as recorded in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatClass {
    Double,
    Single,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
}

/// A numeric (or logical) array.
///
/// N-dimensional arrays are folded into two dimensions: `dims[0]` rows and
/// the product of the remaining dimensions as columns.
#[derive(Debug, Clone)]
pub struct NumericArray {
    /// Class the values were stored with
    pub class: MatClass,
    /// Whether the array is a MATLAB logical
    pub logical: bool,
    /// Dimensions as stored in the file
    pub dims: Vec<usize>,
    /// Values converted to `f64`
    pub data: Array2<f64>,
}

impl NumericArray {
    /// Builds a double array from column-major values.
    pub fn from_column_major(rows: usize, cols: usize, values: Vec<f64>) -> Option<Self> {
        let data = Array2::from_shape_vec((rows, cols).f(), values).ok()?;
        Some(NumericArray {
            class: MatClass::Double,
            logical: false,
            dims: vec![rows, cols],
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies out one column, or `None` if it does not exist.
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.cols() {
            return None;
        }
        Some(self.data.column(index).to_vec())
    }

    /// All values in column-major order. For row or column vectors this is
    /// simply the vector.
    pub fn flatten(&self) -> Vec<f64> {
        self.data.t().iter().copied().collect()
    }

    /// The first value, if any.
    pub fn scalar(&self) -> Option<f64> {
        self.data.iter().next().copied()
    }
}

/// A character array, one `String` per row.
#[derive(Debug, Clone)]
pub struct CharArray {
    pub dims: Vec<usize>,
    pub rows: Vec<String>,
}

/// A cell array with items stored column-major.
#[derive(Debug, Clone)]
pub struct CellArray {
    pub dims: Vec<usize>,
    pub items: Vec<MatValue>,
}

impl CellArray {
    pub fn rows(&self) -> usize {
        self.dims.first().copied().unwrap_or(0)
    }

    /// Item at (`row`, `col`), zero-based.
    pub fn get(&self, row: usize, col: usize) -> Option<&MatValue> {
        let rows = self.rows();
        if row >= rows {
            return None;
        }
        self.items.get(col * rows + row)
    }
}

/// A struct array. Each element holds one value per field, in field order.
#[derive(Debug, Clone)]
pub struct StructArray {
    pub dims: Vec<usize>,
    pub field_names: Vec<String>,
    pub elements: Vec<Vec<MatValue>>,
}

impl StructArray {
    /// Field `name` of the first element.
    pub fn field(&self, name: &str) -> Option<&MatValue> {
        let index = self.field_names.iter().position(|f| f == name)?;
        self.elements.first().and_then(|element| element.get(index))
    }
}

/// Any value stored in a MAT file.
#[derive(Debug, Clone)]
pub enum MatValue {
    Numeric(NumericArray),
    Char(CharArray),
    Cell(CellArray),
    Struct(StructArray),
}

impl MatValue {
    /// Double matrix from column-major values, `None` unless
    /// `values.len() == rows * cols`.
    pub fn matrix(rows: usize, cols: usize, values: Vec<f64>) -> Option<Self> {
        NumericArray::from_column_major(rows, cols, values).map(MatValue::Numeric)
    }

    /// Column vector.
    pub fn column(values: Vec<f64>) -> Self {
        let rows = values.len();
        MatValue::Numeric(NumericArray {
            class: MatClass::Double,
            logical: false,
            dims: vec![rows, 1],
            data: Array1::from(values).insert_axis(Axis(1)),
        })
    }

    /// 1×N character array.
    pub fn text(value: &str) -> Self {
        MatValue::Char(CharArray {
            dims: vec![1, value.chars().count()],
            rows: vec![value.to_string()],
        })
    }

    /// Cell array from column-major items.
    pub fn cell(rows: usize, cols: usize, items: Vec<MatValue>) -> Self {
        MatValue::Cell(CellArray {
            dims: vec![rows, cols],
            items,
        })
    }

    /// 1×1 struct with the given fields.
    pub fn structure(fields: Vec<(&str, MatValue)>) -> Self {
        let (names, values): (Vec<_>, Vec<_>) = fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .unzip();
        MatValue::Struct(StructArray {
            dims: vec![1, 1],
            field_names: names,
            elements: vec![values],
        })
    }

    /// Field of a struct (first element). Also looks through 1×1 cells,
    /// which the toolchain sometimes wraps structs in.
    pub fn field(&self, name: &str) -> Option<&MatValue> {
        match self {
            MatValue::Struct(s) => s.field(name),
            MatValue::Cell(c) if c.items.len() == 1 => c.items[0].field(name),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&NumericArray> {
        match self {
            MatValue::Numeric(n) => Some(n),
            MatValue::Cell(c) if c.items.len() == 1 => c.items[0].as_numeric(),
            _ => None,
        }
    }

    /// Text content of a char array (rows joined by newlines).
    pub fn as_text(&self) -> Option<String> {
        match self {
            MatValue::Char(c) => Some(c.rows.join("\n")),
            MatValue::Cell(c) if c.items.len() == 1 => c.items[0].as_text(),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&CellArray> {
        match self {
            MatValue::Cell(c) => Some(c),
            _ => None,
        }
    }

    /// True for empty numeric, char or cell arrays.
    pub fn is_empty(&self) -> bool {
        match self {
            MatValue::Numeric(n) => n.is_empty(),
            MatValue::Char(c) => c.rows.iter().all(|r| r.is_empty()),
            MatValue::Cell(c) => c.items.is_empty(),
            MatValue::Struct(s) => s.elements.is_empty(),
        }
    }
}

/// A decoded MAT file: the header text and its top-level variables.
#[derive(Debug, Clone)]
pub struct MatFile {
    /// Where the file was read from (used in error messages)
    pub path: PathBuf,
    /// Descriptive header text
    pub header: String,
    /// Variables in file order
    pub variables: Vec<(String, MatValue)>,
}

impl MatFile {
    pub fn get(&self, name: &str) -> Option<&MatValue> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Follows a dotted path such as `"RGB.Center"`: the first segment names a
    /// variable, the rest name nested struct fields.
    pub fn lookup(&self, dotted: &str) -> Option<&MatValue> {
        let mut segments = dotted.split('.');
        let mut value = self.get(segments.next()?)?;
        for segment in segments {
            value = value.field(segment)?;
        }
        Some(value)
    }

    /// Like [`lookup`](Self::lookup) but fails with `MissingMatEntry`.
    pub fn require(&self, dotted: &str) -> Result<&MatValue> {
        self.lookup(dotted).ok_or_else(|| ConvertError::MissingMatEntry {
            path: self.path.clone(),
            entry: dotted.to_string(),
        })
    }

    /// Requires a numeric array at `dotted`.
    pub fn require_numeric(&self, dotted: &str) -> Result<&NumericArray> {
        self.require(dotted)?.as_numeric().ok_or_else(|| {
            ConvertError::mat(&self.path, format!("entry '{}' is not numeric", dotted))
        })
    }
}

/// Loads and decodes a MAT file.
///
/// # Examples
///
/// ```no_run
/// use session_converter::mat;
///
/// let tracking = mat::load("M1_01_230522_Fear_Tracking.mat").unwrap();
/// if let Some(center) = tracking.lookup("RGB.Center").and_then(|v| v.as_numeric()) {
///     println!("{} tracked frames", center.rows());
/// }
/// ```
pub fn load<P: AsRef<Path>>(file_path: P) -> Result<MatFile> {
    reader::load_file(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_requires_matching_value_count() {
        assert!(MatValue::matrix(2, 2, vec![1.0, 2.0, 3.0]).is_none());
        let value = MatValue::matrix(2, 1, vec![1.0, 2.0]).unwrap();
        let column = MatValue::column(vec![1.0, 2.0]);
        assert_eq!(value.as_numeric().unwrap().data, column.as_numeric().unwrap().data);
        assert_eq!(column.as_numeric().unwrap().dims, vec![2, 1]);
    }
}
