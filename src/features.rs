use candle_core::{Device, Tensor};

use crate::error::ApiError;
use crate::types::Features;

/// Rectangular `f32` copy of a request's feature array.
///
/// `shape[0]` is the row count; everything after it is flattened into one
/// row of model inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBatch {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl FeatureBatch {
    pub fn from_nested(features: &Features) -> Result<Self, ApiError> {
        let shape = leading_shape(features);

        match shape.as_slice() {
            [] => {
                return Err(ApiError::Shape(
                    "expected a list of rows, got a single number".to_string(),
                ))
            }
            // `[]` is a batch with no rows
            [0] => {
                return Ok(Self {
                    shape,
                    values: Vec::new(),
                })
            }
            [_] => {
                return Err(ApiError::Shape(
                    "expected a list of rows, each row being a list of features".to_string(),
                ))
            }
            _ => {}
        }

        let mut values = Vec::with_capacity(shape.iter().product());
        flatten(features, &shape, 0, &mut values)?;

        Ok(Self { shape, values })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Number of model inputs per row (product of the trailing dims).
    pub fn row_width(&self) -> usize {
        if self.rows() == 0 {
            return 0;
        }
        self.shape[1..].iter().product()
    }

    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.values, (self.rows(), self.row_width()), device)
    }
}

// Shape as seen by following the first element at every level.
fn leading_shape(features: &Features) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut cur = features;
    while let Features::List(items) = cur {
        shape.push(items.len());
        match items.first() {
            Some(first) => cur = first,
            None => break,
        }
    }
    shape
}

fn flatten(
    features: &Features,
    shape: &[usize],
    depth: usize,
    out: &mut Vec<f32>,
) -> Result<(), ApiError> {
    match (features, shape.get(depth)) {
        (Features::Value(v), None) => {
            let x = *v as f32;
            if !x.is_finite() {
                return Err(ApiError::Body(format!(
                    "feature value {v:e} does not fit in a 32-bit float"
                )));
            }
            out.push(x);
            Ok(())
        }
        (Features::List(items), Some(&len)) if items.len() == len => {
            for item in items {
                flatten(item, shape, depth + 1, out)?;
            }
            Ok(())
        }
        _ => Err(ApiError::Shape(format!(
            "ragged feature array at depth {depth}, expected shape {shape:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Features {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn rows_by_features() {
        let batch = FeatureBatch::from_nested(&parse("[[1.0, 2.0, 3.0], [4, 5, 6]]")).unwrap();
        assert_eq!(batch.shape(), &[2, 3]);
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.row_width(), 3);

        let t = batch.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(
            t.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]
        );
    }

    #[test]
    fn windowed_rows_are_flattened() {
        // one window of 8 hours x 3 channels
        let window: Vec<Vec<f64>> = (0..8).map(|h| vec![h as f64, 0.5, 0.25]).collect();
        let json = serde_json::to_string(&vec![window]).unwrap();

        let batch = FeatureBatch::from_nested(&parse(&json)).unwrap();
        assert_eq!(batch.shape(), &[1, 8, 3]);
        assert_eq!(batch.row_width(), 24);

        let t = batch.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[1, 24]);
        assert_eq!(t.to_vec2::<f32>().unwrap()[0][3], 1.0);
    }

    #[test]
    fn empty_list_is_zero_rows() {
        let batch = FeatureBatch::from_nested(&parse("[]")).unwrap();
        assert_eq!(batch.rows(), 0);
        assert_eq!(batch.row_width(), 0);
    }

    #[test]
    fn empty_rows_have_zero_width() {
        let batch = FeatureBatch::from_nested(&parse("[[], []]")).unwrap();
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.row_width(), 0);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = FeatureBatch::from_nested(&parse("[[1, 2, 3], [4, 5]]")).unwrap_err();
        assert!(matches!(err, ApiError::Shape(_)));
    }

    #[test]
    fn rejects_mixed_depths() {
        let err = FeatureBatch::from_nested(&parse("[[1, 2], [3, [4]]]")).unwrap_err();
        assert!(matches!(err, ApiError::Shape(_)));
    }

    #[test]
    fn rejects_values_outside_f32_range() {
        let err = FeatureBatch::from_nested(&parse("[[1e300, 0, 0]]")).unwrap_err();
        assert!(matches!(err, ApiError::Body(_)));
        assert!(err.to_string().contains("1e300"));

        let err = FeatureBatch::from_nested(&parse("[[0, -1e39]]")).unwrap_err();
        assert!(matches!(err, ApiError::Body(_)));
    }

    #[test]
    fn accepts_f32_extremes() {
        let json = format!("[[{}, {}]]", f32::MAX, f32::MIN_POSITIVE);
        let batch = FeatureBatch::from_nested(&parse(&json)).unwrap();
        assert_eq!(batch.row_width(), 2);
    }

    #[test]
    fn rejects_scalar_and_flat_input() {
        assert!(matches!(
            FeatureBatch::from_nested(&parse("1.5")),
            Err(ApiError::Shape(_))
        ));
        assert!(matches!(
            FeatureBatch::from_nested(&parse("[1.0, 2.0, 3.0]")),
            Err(ApiError::Shape(_))
        ));
    }
}
