//! Scalar matmul templates.
//!
//! A kernel is assembled from `SHAPE_HEADER`, one storage section (buffer or
//! texture helpers `mm_read_a` / `mm_read_b` / `mm_write`) and a body. `@NAME@`
//! sentinels are substituted by the kernel generator.

pub const SHAPE_HEADER: &str = r#"
struct Shape {
    input_width: u32,
    input_height: u32,
    filter_width: u32,
    filter_height: u32,
    output_width: u32,
    output_height: u32,
};
@group(0) @binding(0) var<uniform> shape: Shape;

const WG_X: u32 = @WG_X@u;
const WG_Y: u32 = @WG_Y@u;
const ROWS_PER_THREAD: u32 = @ROWS_PER_THREAD@u;
const COLS_PER_THREAD: u32 = @COLS_PER_THREAD@u;
const TILE_A_OUTER: u32 = @TILE_A_OUTER@u;
const TILE_B_OUTER: u32 = @TILE_B_OUTER@u;
const TILE_INNER: u32 = @TILE_INNER@u;
const FLAT_DISPATCH: bool = @FLAT_DISPATCH@;
"#;

pub const BUFFER_SCALAR_IO: &str = r#"
struct Tensor { data: array<@SCALAR@>, };
@group(0) @binding(1) var<storage, read> A: Tensor;
@group(0) @binding(2) var<storage, read> B: Tensor;
@group(0) @binding(3) var<storage, read_write> Out: Tensor;

fn mm_read_a(row: u32, col: u32) -> @SCALAR@ {
    if (row < shape.input_height && col < shape.input_width) {
        return A.data[row * shape.input_width + col];
    }
    return @SCALAR@(0);
}

fn mm_read_b(row: u32, col: u32) -> @SCALAR@ {
    if (row < shape.filter_height && col < shape.filter_width) {
        return B.data[row * shape.filter_width + col];
    }
    return @SCALAR@(0);
}

fn mm_write(row: u32, col: u32, value: @SCALAR@) {
    if (row < shape.output_height && col < shape.output_width) {
        Out.data[row * shape.output_width + col] = value;
    }
}
"#;

pub const TEXTURE_SCALAR_IO: &str = r#"
@group(0) @binding(1) var A: texture_2d<@SCALAR@>;
@group(0) @binding(2) var B: texture_2d<@SCALAR@>;
@group(0) @binding(3) var Out: texture_storage_2d<@FORMAT@, write>;

fn mm_read_a(row: u32, col: u32) -> @SCALAR@ {
    if (row < shape.input_height && col < shape.input_width) {
        return textureLoad(A, vec2<i32>(i32(col), i32(row)), 0).x;
    }
    return @SCALAR@(0);
}

fn mm_read_b(row: u32, col: u32) -> @SCALAR@ {
    if (row < shape.filter_height && col < shape.filter_width) {
        return textureLoad(B, vec2<i32>(i32(col), i32(row)), 0).x;
    }
    return @SCALAR@(0);
}

fn mm_write(row: u32, col: u32, value: @SCALAR@) {
    if (row < shape.output_height && col < shape.output_width) {
        let zero = @SCALAR@(0);
        textureStore(Out, vec2<i32>(i32(col), i32(row)), vec4<@SCALAR@>(value, zero, zero, zero));
    }
}
"#;

/// One output element per invocation; used as the reference variant.
pub const NAIVE_BODY: &str = r#"
@compute @workgroup_size(@WG_X@, @WG_Y@, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let tiles_x = (shape.output_width + WG_X - 1u) / WG_X;
    let tile_x = select(wid.x, wid.x % tiles_x, FLAT_DISPATCH);
    let tile_y = select(wid.y, wid.x / tiles_x, FLAT_DISPATCH);
    let row = tile_y * WG_Y + lid.y;
    let col = tile_x * WG_X + lid.x;
    if (row >= shape.output_height || col >= shape.output_width) {
        return;
    }
    var acc: @SCALAR@ = @SCALAR@(0);
    for (var k: u32 = 0u; k < shape.input_width; k = k + 1u) {
        acc = acc + mm_read_a(row, k) * mm_read_b(k, col);
    }
    mm_write(row, col, acc);
}
"#;

/// Tiled body: each invocation accumulates a ROWS_PER_THREAD x COLS_PER_THREAD block.
pub const TILED_SCALAR_BODY: &str = r#"
var<workgroup> mm_asub: array<array<@SCALAR@, @TILE_INNER@>, @TILE_A_OUTER@>;
var<workgroup> mm_bsub: array<array<@SCALAR@, @TILE_B_OUTER@>, @TILE_INNER@>;

@compute @workgroup_size(@WG_X@, @WG_Y@, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let tiles_x = (shape.output_width + TILE_B_OUTER - 1u) / TILE_B_OUTER;
    let tile_x = select(wid.x, wid.x % tiles_x, FLAT_DISPATCH);
    let tile_y = select(wid.y, wid.x / tiles_x, FLAT_DISPATCH);

    let local_row = lid.y * ROWS_PER_THREAD;
    let local_col = lid.x * COLS_PER_THREAD;
    let row_base = tile_y * TILE_A_OUTER;
    let col_base = tile_x * TILE_B_OUTER;
    let cols_per_thread_a = TILE_INNER / WG_X;
    let tile_col_a = lid.x * cols_per_thread_a;
    let rows_per_thread_b = TILE_INNER / WG_Y;
    let tile_row_b = lid.y * rows_per_thread_b;

    var acc: array<array<@SCALAR@, @COLS_PER_THREAD@>, @ROWS_PER_THREAD@>;
    var b_cached: array<@SCALAR@, @COLS_PER_THREAD@>;

    let num_tiles = (shape.input_width + TILE_INNER - 1u) / TILE_INNER;
    for (var t: u32 = 0u; t < num_tiles; t = t + 1u) {
        let k_base = t * TILE_INNER;
        for (var r: u32 = 0u; r < ROWS_PER_THREAD; r = r + 1u) {
            for (var c: u32 = 0u; c < cols_per_thread_a; c = c + 1u) {
                let in_row = local_row + r;
                let in_col = tile_col_a + c;
                mm_asub[in_row][in_col] = mm_read_a(row_base + in_row, k_base + in_col);
            }
        }
        for (var r: u32 = 0u; r < rows_per_thread_b; r = r + 1u) {
            for (var c: u32 = 0u; c < COLS_PER_THREAD; c = c + 1u) {
                let in_row = tile_row_b + r;
                let in_col = local_col + c;
                mm_bsub[in_row][in_col] = mm_read_b(k_base + in_row, col_base + in_col);
            }
        }
        workgroupBarrier();

        for (var k: u32 = 0u; k < TILE_INNER; k = k + 1u) {
            for (var c: u32 = 0u; c < COLS_PER_THREAD; c = c + 1u) {
                b_cached[c] = mm_bsub[k][local_col + c];
            }
            for (var r: u32 = 0u; r < ROWS_PER_THREAD; r = r + 1u) {
                let a_val = mm_asub[local_row + r][k];
                for (var c: u32 = 0u; c < COLS_PER_THREAD; c = c + 1u) {
                    acc[r][c] = acc[r][c] + a_val * b_cached[c];
                }
            }
        }
        workgroupBarrier();
    }

    for (var r: u32 = 0u; r < ROWS_PER_THREAD; r = r + 1u) {
        for (var c: u32 = 0u; c < COLS_PER_THREAD; c = c + 1u) {
            mm_write(row_base + local_row + r, col_base + local_col + c, acc[r][c]);
        }
    }
}
"#;
