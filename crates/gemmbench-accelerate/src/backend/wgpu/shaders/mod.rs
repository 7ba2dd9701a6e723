pub mod elementwise;
pub mod matmul;
pub mod matmul_vec4;
