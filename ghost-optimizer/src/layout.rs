use ghost_structs::core::Tensor;
use ndarray::{s, Array1, ArrayD, ArrayViewMut1, IxDyn};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("expected {expected} tensors, found {found}")]
    TensorCount { expected: usize, found: usize },
    #[error("tensor {index} has shape {found:?}, expected {expected:?}")]
    Shape {
        index: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("flat vector has length {found}, expected {expected}")]
    Length { expected: usize, found: usize },
}

/// Ordered list of tensor shapes describing how a flat parameter vector is
/// split into the tensors of a model.
///
/// `pack` and `unpack` are the only conversions between the two
/// representations; elements are laid out tensor by tensor in row-major
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    shapes: Vec<Vec<usize>>,
    offsets: Vec<usize>,
    len: usize,
}

impl ParamLayout {
    pub fn new(shapes: Vec<Vec<usize>>) -> Self {
        let mut offsets = Vec::with_capacity(shapes.len());
        let mut len = 0;
        for shape in &shapes {
            offsets.push(len);
            len += shape.iter().product::<usize>();
        }
        Self {
            shapes,
            offsets,
            len,
        }
    }

    pub fn from_params(params: &[ArrayD<f64>]) -> Self {
        Self::new(params.iter().map(|p| p.shape().to_vec()).collect())
    }

    /// Flattened dimension `n`.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_tensors(&self) -> usize {
        self.shapes.len()
    }

    pub fn check(&self, tensors: &[ArrayD<f64>]) -> Result<(), LayoutError> {
        if tensors.len() != self.shapes.len() {
            return Err(LayoutError::TensorCount {
                expected: self.shapes.len(),
                found: tensors.len(),
            });
        }
        for (index, (tensor, shape)) in tensors.iter().zip(&self.shapes).enumerate() {
            if tensor.shape() != shape.as_slice() {
                return Err(LayoutError::Shape {
                    index,
                    expected: shape.clone(),
                    found: tensor.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    pub fn pack(&self, tensors: &[ArrayD<f64>]) -> Result<Array1<f64>, LayoutError> {
        let mut flat = Array1::zeros(self.len);
        self.pack_into(tensors, flat.view_mut())?;
        Ok(flat)
    }

    /// Writes the flattened tensors into `out`, e.g. one row of a Jacobian.
    pub fn pack_into(
        &self,
        tensors: &[ArrayD<f64>],
        mut out: ArrayViewMut1<f64>,
    ) -> Result<(), LayoutError> {
        self.check(tensors)?;
        if out.len() != self.len {
            return Err(LayoutError::Length {
                expected: self.len,
                found: out.len(),
            });
        }
        for (tensor, &offset) in tensors.iter().zip(&self.offsets) {
            let mut segment = out.slice_mut(s![offset..offset + tensor.len()]);
            for (dst, src) in segment.iter_mut().zip(tensor.iter()) {
                *dst = *src;
            }
        }
        Ok(())
    }

    pub fn unpack(&self, flat: &Array1<f64>) -> Result<Vec<ArrayD<f64>>, LayoutError> {
        if flat.len() != self.len {
            return Err(LayoutError::Length {
                expected: self.len,
                found: flat.len(),
            });
        }
        let mut tensors = Vec::with_capacity(self.shapes.len());
        for (shape, &offset) in self.shapes.iter().zip(&self.offsets) {
            let size = shape.iter().product::<usize>();
            let data = flat.slice(s![offset..offset + size]).to_vec();
            let tensor = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
                LayoutError::Length {
                    expected: size,
                    found: flat.len() - offset,
                }
            })?;
            tensors.push(tensor);
        }
        Ok(tensors)
    }

    /// `params <- params + alpha * flat`, tensor by tensor.
    pub fn axpy(
        &self,
        params: &mut [ArrayD<f64>],
        alpha: f64,
        flat: &Array1<f64>,
    ) -> Result<(), LayoutError> {
        self.check(params)?;
        if flat.len() != self.len {
            return Err(LayoutError::Length {
                expected: self.len,
                found: flat.len(),
            });
        }
        for (tensor, &offset) in params.iter_mut().zip(&self.offsets) {
            let size = tensor.len();
            let segment = flat.slice(s![offset..offset + size]);
            for (w, d) in tensor.iter_mut().zip(segment.iter()) {
                *w += alpha * d;
            }
        }
        Ok(())
    }
}

pub fn to_tensors(params: &[ArrayD<f64>]) -> Vec<Tensor> {
    params
        .iter()
        .map(|p| Tensor {
            shape: p.shape().to_vec(),
            data: p.iter().cloned().collect(),
        })
        .collect()
}

pub fn from_tensors(tensors: &[Tensor]) -> Result<Vec<ArrayD<f64>>, LayoutError> {
    tensors
        .iter()
        .enumerate()
        .map(|(index, t)| {
            ArrayD::from_shape_vec(IxDyn(&t.shape), t.data.clone()).map_err(|_| {
                LayoutError::Shape {
                    index,
                    expected: t.shape.clone(),
                    found: vec![t.data.len()],
                }
            })
        })
        .collect()
}
