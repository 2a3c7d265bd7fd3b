//! Flat, owned lookup tables with row-major indexing.

use crate::error::GeometryError;

/// A dense N-dimensional table stored in one row-major buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTable<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> FlatTable<T> {
    /// Builds a table by evaluating `f` at every index, in row-major order.
    pub fn from_fn<F>(shape: &[usize], mut f: F) -> Self
    where
        F: FnMut(&[usize]) -> T,
    {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = vec![0usize; shape.len()];
        for _ in 0..len {
            data.push(f(&index));
            for d in (0..shape.len()).rev() {
                index[d] += 1;
                if index[d] < shape[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Table dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major offset of `index`.
    ///
    /// # Errors
    /// Returns [`GeometryError::Arity`] for a wrong number of indices and
    /// [`GeometryError::OutOfRange`] for an index past its dimension.
    pub fn offset(&self, index: &[usize]) -> Result<usize, GeometryError> {
        if index.len() != self.shape.len() {
            return Err(GeometryError::Arity {
                expected: self.shape.len(),
                got: index.len(),
            });
        }
        let mut offset = 0;
        for (dimension, (&i, &len)) in index.iter().zip(&self.shape).enumerate() {
            if i >= len {
                return Err(GeometryError::OutOfRange {
                    dimension,
                    index: i,
                    len,
                });
            }
            offset = offset * len + i;
        }
        Ok(offset)
    }

    /// Entry at `index`.
    ///
    /// # Errors
    /// See [`FlatTable::offset`].
    pub fn get(&self, index: &[usize]) -> Result<&T, GeometryError> {
        let offset = self.offset(index)?;
        Ok(&self.data[offset])
    }

    /// Mutable entry at `index`.
    ///
    /// # Errors
    /// See [`FlatTable::offset`].
    pub fn get_mut(&mut self, index: &[usize]) -> Result<&mut T, GeometryError> {
        let offset = self.offset(index)?;
        Ok(&mut self.data[offset])
    }
}

impl<T: Clone> FlatTable<T> {
    /// Creates a table filled with `value`.
    #[must_use]
    pub fn filled(shape: &[usize], value: T) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_offsets() {
        let table = FlatTable::from_fn(&[2, 3, 4], |i| i[0] * 100 + i[1] * 10 + i[2]);
        assert_eq!(table.len(), 24);
        assert_eq!(table.offset(&[1, 2, 3]).unwrap(), 23);
        assert_eq!(*table.get(&[1, 0, 2]).unwrap(), 102);
        assert_eq!(*table.get(&[0, 2, 1]).unwrap(), 21);
    }

    #[test]
    fn test_bounds_checked() {
        let mut table = FlatTable::filled(&[2, 2], 0u8);
        assert_eq!(
            table.get(&[0, 2]),
            Err(GeometryError::OutOfRange {
                dimension: 1,
                index: 2,
                len: 2
            })
        );
        assert_eq!(
            table.get(&[0]),
            Err(GeometryError::Arity {
                expected: 2,
                got: 1
            })
        );
        *table.get_mut(&[1, 1]).unwrap() = 7;
        assert_eq!(*table.get(&[1, 1]).unwrap(), 7);
    }
}
