//! Dense, dtype-tagged arrays shared by the column store and the artifact writers.
//!
//! A column keeps the element type it has on disk all the way into the
//! artifact, so each supported dtype gets its own [`ArrayD`] behind one enum.
//! Only the record exporter and the verifier widen values to `f64`.

use std::fmt;

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

/// Element types a vault column may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Float64,
    Int32,
    Int64,
    Uint8,
    Bool,
}

impl DType {
    /// Parse a NumPy-style dtype name (`float32`, `<f4`, `bool`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches("dtype(").trim_end_matches(')').trim_matches('\'') {
            "float32" | "f4" | "<f4" => Some(Self::Float32),
            "float64" | "f8" | "<f8" => Some(Self::Float64),
            "int32" | "i4" | "<i4" => Some(Self::Int32),
            "int64" | "i8" | "<i8" => Some(Self::Int64),
            "uint8" | "u1" | "|u1" => Some(Self::Uint8),
            "bool" | "b1" | "|b1" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Bytes per element in a little-endian chunk file.
    pub fn size(&self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
            Self::Uint8 | Self::Bool => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Bool => "bool",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Element conversions
// ---------------------------------------------------------------------------

/// Scalar types a [`ColumnArray`] can hold.
pub(crate) trait Element: Copy + Default {
    /// Decode one element from exactly `size_of::<Self>()` little-endian bytes.
    fn from_le(bytes: &[u8]) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! numeric_element {
    ($($t:ty),*) => {$(
        impl Element for $t {
            fn from_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

numeric_element!(f32, f64, i32, i64, u8);

impl Element for bool {
    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

fn decode<T: Element>(shape: &[usize], bytes: &[u8], size: usize) -> Option<ArrayD<T>> {
    let values = bytes.chunks_exact(size).map(T::from_le).collect();
    ArrayD::from_shape_vec(IxDyn(shape), values).ok()
}

/// Copy `src` into `dst` starting at row `start`. Rows must hold the same
/// number of elements; `src` takes on `dst`'s row shape.
fn place<T: Element>(dst: &mut ArrayD<T>, start: usize, src: &ArrayD<T>) -> Result<(), String> {
    if dst.ndim() == 0 || src.ndim() == 0 {
        return Err("cannot place rows into or from a 0-d array".into());
    }
    let dst_row = &dst.shape()[1..];
    let src_row = &src.shape()[1..];
    if dst_row.iter().product::<usize>() != src_row.iter().product::<usize>() {
        return Err(format!(
            "row shape {src_row:?} does not match buffer row shape {dst_row:?}"
        ));
    }
    let rows = src.len_of(Axis(0));
    let end = start + rows;
    let capacity = dst.len_of(Axis(0));
    if end > capacity {
        return Err(format!("rows [{start}, {end}) exceed buffer of {capacity} rows"));
    }

    let mut shape = dst.shape().to_vec();
    shape[0] = rows;
    let src = src
        .view()
        .into_shape_with_order(shape)
        .map_err(|e| format!("cannot reshape rows: {e}"))?;
    dst.slice_axis_mut(Axis(0), Slice::from(start..end)).assign(&src);
    Ok(())
}

// ---------------------------------------------------------------------------
// ColumnArray
// ---------------------------------------------------------------------------

/// A dense row-major array whose leading axis is time.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnArray {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
    Bool(ArrayD<bool>),
}

/// Run `$body` with `$a` bound to the inner array, whatever its element type.
macro_rules! with_array {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            ColumnArray::Float32($a) => $body,
            ColumnArray::Float64($a) => $body,
            ColumnArray::Int32($a) => $body,
            ColumnArray::Int64($a) => $body,
            ColumnArray::Uint8($a) => $body,
            ColumnArray::Bool($a) => $body,
        }
    };
}

/// Same as [`with_array!`], rebuilding the same variant from the result.
macro_rules! map_array {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            ColumnArray::Float32($a) => ColumnArray::Float32($body),
            ColumnArray::Float64($a) => ColumnArray::Float64($body),
            ColumnArray::Int32($a) => ColumnArray::Int32($body),
            ColumnArray::Int64($a) => ColumnArray::Int64($body),
            ColumnArray::Uint8($a) => ColumnArray::Uint8($body),
            ColumnArray::Bool($a) => ColumnArray::Bool($body),
        }
    };
}

pub(crate) use with_array;

impl ColumnArray {
    /// Decode raw little-endian bytes. Returns `None` if the byte count does
    /// not match `shape` and `dtype`.
    pub fn from_le_bytes(dtype: DType, shape: &[usize], bytes: &[u8]) -> Option<Self> {
        let size = dtype.size();
        if shape.iter().product::<usize>() * size != bytes.len() {
            return None;
        }
        Some(match dtype {
            DType::Float32 => Self::Float32(decode(shape, bytes, size)?),
            DType::Float64 => Self::Float64(decode(shape, bytes, size)?),
            DType::Int32 => Self::Int32(decode(shape, bytes, size)?),
            DType::Int64 => Self::Int64(decode(shape, bytes, size)?),
            DType::Uint8 => Self::Uint8(decode(shape, bytes, size)?),
            DType::Bool => Self::Bool(decode(shape, bytes, size)?),
        })
    }

    /// A zero-filled array, used to preallocate destination buffers.
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let shape = IxDyn(shape);
        match dtype {
            DType::Float32 => Self::Float32(ArrayD::default(shape)),
            DType::Float64 => Self::Float64(ArrayD::default(shape)),
            DType::Int32 => Self::Int32(ArrayD::default(shape)),
            DType::Int64 => Self::Int64(ArrayD::default(shape)),
            DType::Uint8 => Self::Uint8(ArrayD::default(shape)),
            DType::Bool => Self::Bool(ArrayD::default(shape)),
        }
    }

    pub fn from_f32(shape: &[usize], values: &[f32]) -> Option<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), values.to_vec())
            .ok()
            .map(Self::Float32)
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Uint8(_) => DType::Uint8,
            Self::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Length of the leading (time) axis; 0-d arrays report 1.
    pub fn len(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        with_array!(self, a => a.is_empty())
    }

    /// Elements per timestep.
    pub fn row_elements(&self) -> usize {
        self.shape().iter().skip(1).product()
    }

    /// Reinterpret with a new shape covering the same element count.
    pub fn reshape(self, shape: &[usize]) -> Option<Self> {
        let shape = shape.to_vec();
        with_array!(self, a => a.into_shape_with_order(shape).ok().map(Self::from))
    }

    /// Copy `src` into this array at time offset `start`.
    ///
    /// `src` must share dtype and per-row element count, and fit inside the
    /// buffer. Placement is keyed by absolute index, so calls may arrive in
    /// any order.
    pub fn write_rows(&mut self, start: usize, src: &ColumnArray) -> Result<(), String> {
        match (self, src) {
            (Self::Float32(d), Self::Float32(s)) => place(d, start, s),
            (Self::Float64(d), Self::Float64(s)) => place(d, start, s),
            (Self::Int32(d), Self::Int32(s)) => place(d, start, s),
            (Self::Int64(d), Self::Int64(s)) => place(d, start, s),
            (Self::Uint8(d), Self::Uint8(s)) => place(d, start, s),
            (Self::Bool(d), Self::Bool(s)) => place(d, start, s),
            (dst, src) => Err(format!(
                "dtype {} does not match buffer dtype {}",
                src.dtype(),
                dst.dtype()
            )),
        }
    }

    /// Rows `[start, end)` as a new array, clamped to the stored length.
    pub fn rows(&self, start: usize, end: usize) -> Self {
        let Some(&len) = self.shape().first() else {
            return self.clone();
        };
        let end = end.min(len);
        let start = start.min(end);
        map_array!(self, a => a.slice_axis(Axis(0), Slice::from(start..end)).to_owned())
    }

    /// All values of timestep `t`, widened to `f64`.
    pub fn row_f64(&self, t: usize) -> Vec<f64> {
        with_array!(self, a => a.index_axis(Axis(0), t).iter().map(|v| v.to_f64()).collect())
    }

    /// Timestep `t` split into `groups` equal vectors (e.g. one per agent).
    pub fn row_grouped(&self, t: usize, groups: usize) -> Vec<Vec<f64>> {
        let row = self.row_f64(t);
        if groups == 0 {
            return Vec::new();
        }
        let width = row.len() / groups;
        if width == 0 {
            return vec![Vec::new(); groups];
        }
        row.chunks(width).map(<[f64]>::to_vec).collect()
    }

    /// Every value widened to `f64`, row-major.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_array!(self, a => a.iter().map(|v| v.to_f64()).collect())
    }

    /// The single value of a 0-d array.
    pub fn scalar_f64(&self) -> Option<f64> {
        with_array!(self, a => if a.ndim() == 0 { a.first().map(|v| v.to_f64()) } else { None })
    }

    /// First non-finite value, as `(row, value)`. Integer arrays have none.
    pub fn first_non_finite(&self) -> Option<(usize, f64)> {
        let row_len = self.row_elements().max(1);
        with_array!(self, a => a
            .iter()
            .map(|v| v.to_f64())
            .enumerate()
            .find(|(_, v)| !v.is_finite())
            .map(|(i, v)| (i / row_len, v)))
    }
}

macro_rules! from_array {
    ($($t:ty => $variant:ident),*) => {$(
        impl From<ArrayD<$t>> for ColumnArray {
            fn from(array: ArrayD<$t>) -> Self {
                Self::$variant(array)
            }
        }
    )*};
}

from_array!(f32 => Float32, f64 => Float64, i32 => Int32, i64 => Int64, u8 => Uint8, bool => Bool);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_parses_numpy_spellings() {
        assert_eq!(DType::parse("float32"), Some(DType::Float32));
        assert_eq!(DType::parse("<f4"), Some(DType::Float32));
        assert_eq!(DType::parse("dtype('int32')"), Some(DType::Int32));
        assert_eq!(DType::parse("|b1"), Some(DType::Bool));
        assert_eq!(DType::parse("complex64"), None);
    }

    #[test]
    fn from_le_bytes_rejects_wrong_length() {
        assert!(ColumnArray::from_le_bytes(DType::Float32, &[2, 3], &[0; 24]).is_some());
        assert!(ColumnArray::from_le_bytes(DType::Float32, &[2, 3], &[0; 23]).is_none());
    }

    #[test]
    fn from_le_bytes_decodes_each_dtype() {
        let ints: Vec<u8> = [-3i64, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        let arr = ColumnArray::from_le_bytes(DType::Int64, &[2], &ints).unwrap();
        assert_eq!(arr.to_f64_vec(), vec![-3.0, 7.0]);

        let flags = ColumnArray::from_le_bytes(DType::Bool, &[3], &[0, 1, 2]).unwrap();
        assert_eq!(flags.to_f64_vec(), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn write_rows_places_by_absolute_index() {
        let mut buf = ColumnArray::zeros(DType::Float32, &[4, 2]);
        let late = ColumnArray::from_f32(&[2, 2], &[5.0, 6.0, 7.0, 8.0]).unwrap();
        let early = ColumnArray::from_f32(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        // Out-of-order arrival lands in the same place.
        buf.write_rows(2, &late).unwrap();
        buf.write_rows(0, &early).unwrap();
        assert_eq!(buf.to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn write_rows_rejects_overflow_and_dtype() {
        let mut buf = ColumnArray::zeros(DType::Float32, &[2, 2]);
        let src = ColumnArray::from_f32(&[2, 2], &[0.0; 4]).unwrap();
        assert!(buf.write_rows(1, &src).is_err());

        let ints = ColumnArray::zeros(DType::Int32, &[1, 2]);
        assert!(buf.write_rows(0, &ints).is_err());

        let wide = ColumnArray::from_f32(&[1, 3], &[0.0; 3]).unwrap();
        assert!(buf.write_rows(0, &wide).is_err());
    }

    #[test]
    fn write_rows_adopts_buffer_row_shape() {
        let mut buf = ColumnArray::zeros(DType::Int32, &[3, 2, 1]);
        let src = ColumnArray::from(ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1i32, 2, 3, 4]).unwrap());
        buf.write_rows(1, &src).unwrap();
        assert_eq!(buf.shape(), &[3, 2, 1]);
        assert_eq!(buf.to_f64_vec(), vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn row_grouped_splits_per_agent() {
        let arr = ColumnArray::from_f32(&[1, 2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(
            arr.row_grouped(0, 2),
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]
        );
    }

    #[test]
    fn rows_clamps_to_length() {
        let arr = ColumnArray::from_f32(&[3, 1], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(arr.rows(1, 10).to_f64_vec(), vec![2.0, 3.0]);
        assert_eq!(arr.rows(5, 10).len(), 0);
    }

    #[test]
    fn reshape_keeps_values() {
        let arr = ColumnArray::from(ArrayD::from_shape_vec(IxDyn(&[3, 2]), (0..6i32).collect()).unwrap());
        let reshaped = arr.clone().reshape(&[3, 2, 1]).unwrap();
        assert_eq!(reshaped.shape(), &[3, 2, 1]);
        assert_eq!(reshaped.to_f64_vec(), arr.to_f64_vec());
        assert!(reshaped.reshape(&[7]).is_none());
    }

    #[test]
    fn finds_first_non_finite_row() {
        let arr = ColumnArray::from_f32(&[3, 2], &[0.0, 1.0, 2.0, f32::NAN, 4.0, f32::INFINITY]).unwrap();
        let (row, value) = arr.first_non_finite().unwrap();
        assert_eq!(row, 1);
        assert!(value.is_nan());

        let ints = ColumnArray::zeros(DType::Int32, &[2]);
        assert!(ints.first_non_finite().is_none());
    }
}
