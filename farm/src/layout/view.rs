//! Bounds-checked typed views over flat bank buffers.
//!
//! Banks own raw byte buffers; all element access goes through a view that
//! knows the bank's dims and row-major strides, replacing manual offset
//! arithmetic at every call site.

use super::{DataType, Schema};
use crate::MAX_RANK;
use std::marker::PhantomData;
use tracing_unwrap::ResultExt;

/// A datatype that can live in a bank buffer, little-endian on the wire.
pub trait Element: Copy + Default {
    const DTYPE: DataType;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

impl Element for f64 {
    const DTYPE: DataType = DataType::F64;

    fn read_le(bytes: &[u8]) -> Self {
        f64::from_le_bytes(bytes[..8].try_into().unwrap_or_log())
    }

    fn write_le(self, bytes: &mut [u8]) {
        bytes[..8].copy_from_slice(&self.to_le_bytes());
    }
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;

    fn read_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes(bytes[..4].try_into().unwrap_or_log())
    }

    fn write_le(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_le_bytes());
    }
}

#[derive(Debug)]
pub struct GridView<'a, T: Element> {
    data: &'a [u8],
    dims: [usize; MAX_RANK],
    _marker: PhantomData<T>,
}

impl<'a, T: Element> GridView<'a, T> {
    pub fn new(data: &'a [u8], layout: &Schema) -> Self {
        assert_eq!(layout.dtype, T::DTYPE, "view datatype mismatch");
        assert_eq!(data.len(), layout.byte_size, "view over unallocated bank");

        Self {
            data,
            dims: layout.dims,
            _marker: PhantomData,
        }
    }

    pub fn dims(&self) -> [usize; MAX_RANK] {
        self.dims
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        T::read_le(&self.data[index::<T>(self.dims, row, col)..])
    }
}

#[derive(Debug)]
pub struct GridViewMut<'a, T: Element> {
    data: &'a mut [u8],
    dims: [usize; MAX_RANK],
    _marker: PhantomData<T>,
}

impl<'a, T: Element> GridViewMut<'a, T> {
    pub fn new(data: &'a mut [u8], layout: &Schema) -> Self {
        assert_eq!(layout.dtype, T::DTYPE, "view datatype mismatch");
        assert_eq!(data.len(), layout.byte_size, "view over unallocated bank");

        Self {
            data,
            dims: layout.dims,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        T::read_le(&self.data[index::<T>(self.dims, row, col)..])
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        let at = index::<T>(self.dims, row, col);
        value.write_le(&mut self.data[at..]);
    }
}

fn index<T: Element>(dims: [usize; MAX_RANK], row: usize, col: usize) -> usize {
    assert!(row < dims[0] && col < dims[1], "bank index out of bounds");

    (row * dims[1] + col) * T::DTYPE.size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Bank, MappingPolicy};

    #[test]
    fn roundtrip_f64() {
        let mut schema = Schema::new("test", [2, 3], DataType::F64, MappingPolicy::Group);
        crate::layout::check_schema(&mut schema).unwrap();

        let mut bank = Bank::new(schema);
        bank.allocate().unwrap();

        {
            let mut view = bank.grid_mut::<f64>();
            view.set(1, 2, 42.5);
            view.set(0, 0, -1.0);
        }

        let view = bank.grid::<f64>();
        assert_eq!(view.get(1, 2), 42.5);
        assert_eq!(view.get(0, 0), -1.0);
        assert_eq!(view.get(0, 1), 0.0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn rejects_out_of_bounds() {
        let mut schema = Schema::new("test", [2, 2], DataType::I32, MappingPolicy::Group);
        crate::layout::check_schema(&mut schema).unwrap();

        let mut bank = Bank::new(schema);
        bank.allocate().unwrap();
        bank.grid::<i32>().get(2, 0);
    }
}
