use bytemuck::{Pod, Zeroable};

/// Uniform block shared by every kernel, in wire order.
///
/// For a product of an `M x K` input with a `K x N` filter the output is
/// `M x N`; widths count columns and heights count rows.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ShapeDescriptor {
    pub input_width: u32,
    pub input_height: u32,
    pub filter_width: u32,
    pub filter_height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl ShapeDescriptor {
    pub fn matmul(m: u32, k: u32, n: u32) -> Self {
        Self {
            input_width: k,
            input_height: m,
            filter_width: n,
            filter_height: k,
            output_width: n,
            output_height: m,
        }
    }

    pub fn elementwise(rows: u32, cols: u32) -> Self {
        Self {
            input_width: cols,
            input_height: rows,
            filter_width: cols,
            filter_height: rows,
            output_width: cols,
            output_height: rows,
        }
    }

    pub fn m(&self) -> u32 {
        self.output_height
    }

    pub fn n(&self) -> u32 {
        self.output_width
    }

    pub fn k(&self) -> u32 {
        self.input_width
    }

    pub fn output_len(&self) -> usize {
        self.output_width as usize * self.output_height as usize
    }

    pub fn as_words(&self) -> [u32; 6] {
        [
            self.input_width,
            self.input_height,
            self.filter_width,
            self.filter_height,
            self.output_width,
            self.output_height,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::wgpu::config::SHAPE_UNIFORM_BYTES;

    #[test]
    fn wire_order_and_size() {
        let shape = ShapeDescriptor::matmul(3, 5, 7);
        assert_eq!(shape.as_words(), [5, 3, 7, 5, 7, 3]);
        let bytes = bytemuck::bytes_of(&shape);
        assert_eq!(bytes.len() as u64, SHAPE_UNIFORM_BYTES);
        assert_eq!(&bytes[0..4], &5u32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &3u32.to_ne_bytes());
        assert_eq!((shape.m(), shape.k(), shape.n()), (3, 5, 7));
    }

    #[test]
    fn elementwise_uses_operand_shape_everywhere() {
        let shape = ShapeDescriptor::elementwise(4, 9);
        assert_eq!(shape.as_words(), [9, 4, 9, 4, 9, 4]);
        assert_eq!(shape.output_len(), 36);
    }
}
