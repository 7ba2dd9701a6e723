use crate::error::{AccelError, Result};
use crate::harness::config::Tolerance;
use crate::matrix::{HostMatrix, MatrixData};

/// Element-wise comparison summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub mismatches: usize,
    /// Index, expected and actual value of the first mismatch.
    pub first: Option<(usize, String, String)>,
    pub max_abs_error: f64,
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        self.mismatches == 0
    }
}

fn within(expected: f32, actual: f32, tol: &Tolerance) -> bool {
    if expected.is_nan() || actual.is_nan() {
        return expected.is_nan() && actual.is_nan();
    }
    let (e, a) = (expected as f64, actual as f64);
    (e - a).abs() <= tol.absolute + tol.relative * e.abs()
}

/// Shape or type disagreement: every element counts as a mismatch.
fn layout_mismatch(expected: &HostMatrix, actual: &HostMatrix) -> Comparison {
    Comparison {
        mismatches: expected.len().max(actual.len()),
        first: Some((
            0,
            format!("{}x{} {}", expected.rows, expected.cols, expected.element_type()),
            format!("{}x{} {}", actual.rows, actual.cols, actual.element_type()),
        )),
        max_abs_error: f64::INFINITY,
    }
}

pub fn compare(expected: &HostMatrix, actual: &HostMatrix, tol: &Tolerance) -> Comparison {
    if (expected.rows, expected.cols) != (actual.rows, actual.cols) {
        return layout_mismatch(expected, actual);
    }
    let mut mismatches = 0;
    let mut first = None;
    let mut max_abs_error = 0.0f64;
    match (&expected.data, &actual.data) {
        (MatrixData::F32(e), MatrixData::F32(a)) => {
            for (idx, (x, y)) in e.iter().zip(a).enumerate() {
                max_abs_error = max_abs_error.max((*x as f64 - *y as f64).abs());
                if !within(*x, *y, tol) {
                    mismatches += 1;
                    first.get_or_insert((idx, x.to_string(), y.to_string()));
                }
            }
        }
        (MatrixData::U32(e), MatrixData::U32(a)) => {
            for (idx, (x, y)) in e.iter().zip(a).enumerate() {
                max_abs_error = max_abs_error.max(x.abs_diff(*y) as f64);
                if x != y {
                    mismatches += 1;
                    first.get_or_insert((idx, x.to_string(), y.to_string()));
                }
            }
        }
        _ => return layout_mismatch(expected, actual),
    }
    Comparison {
        mismatches,
        first,
        max_abs_error,
    }
}

/// Fails with [`AccelError::ComparisonMismatch`] when `actual` diverges.
pub fn ensure_matches(
    variant: &str,
    expected: &HostMatrix,
    actual: &HostMatrix,
    tol: &Tolerance,
) -> Result<()> {
    let cmp = compare(expected, actual, tol);
    match cmp.first {
        None => Ok(()),
        Some((first_index, expected, actual)) => Err(AccelError::ComparisonMismatch {
            variant: variant.to_string(),
            mismatches: cmp.mismatches,
            first_index,
            expected,
            actual,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ElementType;

    #[test]
    fn integers_compare_exactly() {
        let a = HostMatrix::new(1, 3, vec![1u32, 2, 3]).unwrap();
        let b = HostMatrix::new(1, 3, vec![1u32, 2, 4]).unwrap();
        let cmp = compare(&a, &b, &Tolerance::default());
        assert_eq!(cmp.mismatches, 1);
        assert_eq!(cmp.first, Some((2, "3".into(), "4".into())));
        assert!(compare(&a, &a, &Tolerance::default()).is_match());
    }

    #[test]
    fn floats_use_relative_tolerance() {
        let tol = Tolerance {
            relative: 1e-3,
            absolute: 0.0,
        };
        let a = HostMatrix::new(1, 2, vec![1000.0f32, 1.0]).unwrap();
        let close = HostMatrix::new(1, 2, vec![1000.5f32, 1.0]).unwrap();
        let far = HostMatrix::new(1, 2, vec![1002.0f32, 1.0]).unwrap();
        assert!(compare(&a, &close, &tol).is_match());
        assert_eq!(compare(&a, &far, &tol).mismatches, 1);
    }

    #[test]
    fn shape_mismatch_counts_everything() {
        let a = HostMatrix::sequential(ElementType::F32, 2, 2);
        let b = HostMatrix::sequential(ElementType::F32, 1, 4);
        let err = ensure_matches("tiled", &a, &b, &Tolerance::default()).unwrap_err();
        assert_eq!(err.kind(), "comparison-mismatch");
        assert!(err.to_string().contains("4 element"));
    }

    #[test]
    fn nan_only_matches_nan() {
        let a = HostMatrix::new(1, 1, vec![f32::NAN]).unwrap();
        let b = HostMatrix::new(1, 1, vec![0.0f32]).unwrap();
        assert!(compare(&a, &a, &Tolerance::default()).is_match());
        assert!(!compare(&a, &b, &Tolerance::default()).is_match());
    }
}
