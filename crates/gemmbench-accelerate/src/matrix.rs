//! Host-side matrices.
//!
//! Matrices are stored row-major. Two element types are supported; both are
//! four bytes wide so every device encoding can share the same byte math.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{AccelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementType {
    F32,
    U32,
}

impl Default for ElementType {
    fn default() -> Self {
        ElementType::F32
    }
}

impl ElementType {
    pub const fn size_bytes(self) -> u32 {
        4
    }

    /// WGSL scalar type name.
    pub fn wgsl_scalar(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::U32 => "u32",
        }
    }

    pub fn as_str(self) -> &'static str {
        self.wgsl_scalar()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar types that can live in a [`HostMatrix`].
pub trait Element: Pod + Zeroable + PartialEq + fmt::Debug + fmt::Display + Send + Sync {
    const TYPE: ElementType;

    fn from_index(index: usize) -> Self;
    fn mul_add(acc: Self, a: Self, b: Self) -> Self;
    fn add(a: Self, b: Self) -> Self;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;

    fn from_index(index: usize) -> Self {
        index as f32
    }

    fn mul_add(acc: Self, a: Self, b: Self) -> Self {
        acc + a * b
    }

    fn add(a: Self, b: Self) -> Self {
        a + b
    }
}

// Device u32 arithmetic wraps; the host mirrors it so integer comparisons stay exact.
impl Element for u32 {
    const TYPE: ElementType = ElementType::U32;

    fn from_index(index: usize) -> Self {
        index as u32
    }

    fn mul_add(acc: Self, a: Self, b: Self) -> Self {
        acc.wrapping_add(a.wrapping_mul(b))
    }

    fn add(a: Self, b: Self) -> Self {
        a.wrapping_add(b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "kebab-case")]
pub enum MatrixData {
    F32(Vec<f32>),
    U32(Vec<u32>),
}

impl MatrixData {
    pub fn element_type(&self) -> ElementType {
        match self {
            MatrixData::F32(_) => ElementType::F32,
            MatrixData::U32(_) => ElementType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MatrixData::F32(v) => v.len(),
            MatrixData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MatrixData::F32(v) => bytemuck::cast_slice(v),
            MatrixData::U32(v) => bytemuck::cast_slice(v),
        }
    }

    /// Reinterprets native-endian device bytes; trailing partial words are ignored.
    pub fn from_bytes(element: ElementType, bytes: &[u8]) -> Self {
        match element {
            ElementType::F32 => MatrixData::F32(
                bytes
                    .chunks_exact(4)
                    .map(bytemuck::pod_read_unaligned::<f32>)
                    .collect(),
            ),
            ElementType::U32 => MatrixData::U32(
                bytes
                    .chunks_exact(4)
                    .map(bytemuck::pod_read_unaligned::<u32>)
                    .collect(),
            ),
        }
    }
}

impl From<Vec<f32>> for MatrixData {
    fn from(v: Vec<f32>) -> Self {
        MatrixData::F32(v)
    }
}

impl From<Vec<u32>> for MatrixData {
    fn from(v: Vec<u32>) -> Self {
        MatrixData::U32(v)
    }
}

/// Row-major matrix on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: MatrixData,
}

impl HostMatrix {
    pub fn new(rows: usize, cols: usize, data: impl Into<MatrixData>) -> Result<Self> {
        let matrix = Self {
            rows,
            cols,
            data: data.into(),
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Fields are public, so anything handed to a kernel or host routine is
    /// checked again here: non-zero dimensions and `rows * cols` elements.
    pub fn validate(&self) -> Result<()> {
        let (rows, cols) = (self.rows, self.cols);
        if rows == 0 || cols == 0 {
            return Err(AccelError::config(format!(
                "matrix dimensions must be non-zero (got {rows}x{cols})"
            )));
        }
        if rows.checked_mul(cols) != Some(self.data.len()) {
            return Err(AccelError::config(format!(
                "matrix data length {} does not match {rows}x{cols}",
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn from_fn<T: Element>(rows: usize, cols: usize, f: impl Fn(usize, usize) -> T) -> Self
    where
        MatrixData: From<Vec<T>>,
    {
        let mut values = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                values.push(f(row, col));
            }
        }
        Self {
            rows,
            cols,
            data: MatrixData::from(values),
        }
    }

    /// `rows x cols` matrix holding `0, 1, 2, ...` in row-major order.
    pub fn sequential(element: ElementType, rows: usize, cols: usize) -> Self {
        match element {
            ElementType::F32 => Self::from_fn(rows, cols, |r, c| f32::from_index(r * cols + c)),
            ElementType::U32 => Self::from_fn(rows, cols, |r, c| u32::from_index(r * cols + c)),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> u64 {
        self.len() as u64 * self.element_type().size_bytes() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            MatrixData::F32(v) => Some(v),
            MatrixData::U32(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match &self.data {
            MatrixData::U32(v) => Some(v),
            MatrixData::F32(_) => None,
        }
    }
}

fn host_matmul_typed<T: Element>(a: &[T], b: &[T], m: usize, k: usize, n: usize) -> Vec<T> {
    let mut out = vec![T::zeroed(); m * n];
    for row in 0..m {
        for col in 0..n {
            let mut acc = T::zeroed();
            for inner in 0..k {
                acc = T::mul_add(acc, a[row * k + inner], b[inner * n + col]);
            }
            out[row * n + col] = acc;
        }
    }
    out
}

/// Host product `a * b`, accumulated in the same order as the device kernels.
pub fn host_matmul(a: &HostMatrix, b: &HostMatrix) -> Result<HostMatrix> {
    a.validate()?;
    b.validate()?;
    if a.cols != b.rows {
        return Err(AccelError::config(format!(
            "matmul: inner dimensions differ ({}x{} * {}x{})",
            a.rows, a.cols, b.rows, b.cols
        )));
    }
    let data = match (&a.data, &b.data) {
        (MatrixData::F32(x), MatrixData::F32(y)) => {
            MatrixData::F32(host_matmul_typed(x, y, a.rows, a.cols, b.cols))
        }
        (MatrixData::U32(x), MatrixData::U32(y)) => {
            MatrixData::U32(host_matmul_typed(x, y, a.rows, a.cols, b.cols))
        }
        _ => return Err(AccelError::config("matmul: operands differ in element type")),
    };
    HostMatrix::new(a.rows, b.cols, data)
}

pub fn host_add(a: &HostMatrix, b: &HostMatrix) -> Result<HostMatrix> {
    a.validate()?;
    b.validate()?;
    if a.rows != b.rows || a.cols != b.cols {
        return Err(AccelError::config(format!(
            "add: shapes differ ({}x{} vs {}x{})",
            a.rows, a.cols, b.rows, b.cols
        )));
    }
    let data = match (&a.data, &b.data) {
        (MatrixData::F32(x), MatrixData::F32(y)) => {
            MatrixData::F32(x.iter().zip(y).map(|(p, q)| f32::add(*p, *q)).collect())
        }
        (MatrixData::U32(x), MatrixData::U32(y)) => {
            MatrixData::U32(x.iter().zip(y).map(|(p, q)| u32::add(*p, *q)).collect())
        }
        _ => return Err(AccelError::config("add: operands differ in element type")),
    };
    HostMatrix::new(a.rows, a.cols, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_is_row_major() {
        let m = HostMatrix::sequential(ElementType::U32, 2, 3);
        assert_eq!(m.as_u32().unwrap(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(m.byte_len(), 24);
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let err = HostMatrix::new(2, 2, vec![1.0f32; 3]).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(HostMatrix::new(0, 2, Vec::<f32>::new()).is_err());
    }

    #[test]
    fn hand_built_matrix_with_short_data_is_rejected() {
        let short = HostMatrix {
            rows: 4,
            cols: 4,
            data: MatrixData::F32(vec![1.0; 3]),
        };
        assert_eq!(short.validate().unwrap_err().kind(), "config");
        let full = HostMatrix::sequential(ElementType::F32, 4, 4);
        assert_eq!(host_matmul(&short, &full).unwrap_err().kind(), "config");
        assert_eq!(host_add(&full, &short).unwrap_err().kind(), "config");
    }

    #[test]
    fn identity_times_b_is_b() {
        let a = HostMatrix::new(2, 2, vec![1.0f32, 0.0, 0.0, 1.0]).unwrap();
        let b = HostMatrix::new(2, 2, vec![5.0f32, 6.0, 7.0, 8.0]).unwrap();
        let c = host_matmul(&a, &b).unwrap();
        assert_eq!(c.as_f32().unwrap(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn rectangular_product_shape() {
        let a = HostMatrix::sequential(ElementType::F32, 3, 2);
        let b = HostMatrix::sequential(ElementType::F32, 2, 4);
        let c = host_matmul(&a, &b).unwrap();
        assert_eq!((c.rows, c.cols), (3, 4));
        // row 1 of a = [2, 3]; col 2 of b = [2, 6]
        assert_eq!(c.as_f32().unwrap()[4 + 2], 2.0 * 2.0 + 3.0 * 6.0);
    }

    #[test]
    fn integer_products_wrap() {
        let a = HostMatrix::new(1, 1, vec![u32::MAX]).unwrap();
        let b = HostMatrix::new(1, 1, vec![2u32]).unwrap();
        let c = host_matmul(&a, &b).unwrap();
        assert_eq!(c.as_u32().unwrap(), &[u32::MAX.wrapping_mul(2)]);
    }

    #[test]
    fn bytes_reinterpret_per_element_type() {
        let data = MatrixData::U32(vec![7, 8, 9]);
        let back = MatrixData::from_bytes(ElementType::U32, data.as_bytes());
        assert_eq!(back, data);
        let floats = MatrixData::from_bytes(ElementType::F32, &1.5f32.to_ne_bytes());
        assert_eq!(floats, MatrixData::F32(vec![1.5]));
    }

    #[test]
    fn add_rejects_mixed_types() {
        let a = HostMatrix::sequential(ElementType::F32, 2, 2);
        let b = HostMatrix::sequential(ElementType::U32, 2, 2);
        assert!(host_add(&a, &b).is_err());
        let c = host_add(&a, &a).unwrap();
        assert_eq!(c.as_f32().unwrap(), &[0.0, 2.0, 4.0, 6.0]);
    }
}
