//! Four-wide matmul templates.
//!
//! Operands hold `vec4` rows: A is `M x ceil(K/4)`, B is `K x ceil(N/4)` and the
//! output `M x ceil(N/4)`, zero padded past the logical width. The same body
//! serves packed buffers and rgba textures.

pub const BUFFER_VEC4_IO: &str = r#"
struct Tensor4 { data: array<vec4<@SCALAR@>>, };
@group(0) @binding(1) var<storage, read> A: Tensor4;
@group(0) @binding(2) var<storage, read> B: Tensor4;
@group(0) @binding(3) var<storage, read_write> Out: Tensor4;

fn vec4_cols(width: u32) -> u32 {
    return (width + 3u) / 4u;
}

fn mm_read_a(row: u32, col4: u32) -> vec4<@SCALAR@> {
    let cols = vec4_cols(shape.input_width);
    if (row < shape.input_height && col4 < cols) {
        return A.data[row * cols + col4];
    }
    return vec4<@SCALAR@>();
}

fn mm_read_b(row: u32, col4: u32) -> vec4<@SCALAR@> {
    let cols = vec4_cols(shape.filter_width);
    if (row < shape.filter_height && col4 < cols) {
        return B.data[row * cols + col4];
    }
    return vec4<@SCALAR@>();
}

fn mm_write(row: u32, col4: u32, value: vec4<@SCALAR@>) {
    let cols = vec4_cols(shape.output_width);
    if (row < shape.output_height && col4 < cols) {
        Out.data[row * cols + col4] = value;
    }
}
"#;

pub const TEXTURE_VEC4_IO: &str = r#"
@group(0) @binding(1) var A: texture_2d<@SCALAR@>;
@group(0) @binding(2) var B: texture_2d<@SCALAR@>;
@group(0) @binding(3) var Out: texture_storage_2d<@FORMAT@, write>;

fn vec4_cols(width: u32) -> u32 {
    return (width + 3u) / 4u;
}

fn mm_read_a(row: u32, col4: u32) -> vec4<@SCALAR@> {
    if (row < shape.input_height && col4 < vec4_cols(shape.input_width)) {
        return textureLoad(A, vec2<i32>(i32(col4), i32(row)), 0);
    }
    return vec4<@SCALAR@>();
}

fn mm_read_b(row: u32, col4: u32) -> vec4<@SCALAR@> {
    if (row < shape.filter_height && col4 < vec4_cols(shape.filter_width)) {
        return textureLoad(B, vec2<i32>(i32(col4), i32(row)), 0);
    }
    return vec4<@SCALAR@>();
}

fn mm_write(row: u32, col4: u32, value: vec4<@SCALAR@>) {
    if (row < shape.output_height && col4 < vec4_cols(shape.output_width)) {
        textureStore(Out, vec2<i32>(i32(col4), i32(row)), value);
    }
}
"#;

pub const TILED_VEC4_BODY: &str = r#"
var<workgroup> mm_asub: array<array<vec4<@SCALAR@>, @TILE_INNER_VEC4@>, @TILE_A_OUTER@>;
var<workgroup> mm_bsub: array<array<vec4<@SCALAR@>, @TILE_B_OUTER_VEC4@>, @TILE_INNER@>;

@compute @workgroup_size(@WG_X@, @WG_Y@, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let tiles_x = (shape.output_width + TILE_B_OUTER - 1u) / TILE_B_OUTER;
    let tile_x = select(wid.x, wid.x % tiles_x, FLAT_DISPATCH);
    let tile_y = select(wid.y, wid.x / tiles_x, FLAT_DISPATCH);

    let cols4_per_thread = COLS_PER_THREAD / 4u;
    let local_row = lid.y * ROWS_PER_THREAD;
    let local_col4 = lid.x * cols4_per_thread;
    let row_base = tile_y * TILE_A_OUTER;
    let col4_base = tile_x * (TILE_B_OUTER / 4u);
    let cols4_per_thread_a = (TILE_INNER / 4u) / WG_X;
    let tile_col4_a = lid.x * cols4_per_thread_a;
    let rows_per_thread_b = TILE_INNER / WG_Y;
    let tile_row_b = lid.y * rows_per_thread_b;

    var acc: array<array<vec4<@SCALAR@>, @COLS_PER_THREAD_VEC4@>, @ROWS_PER_THREAD@>;

    let num_tiles = (shape.input_width + TILE_INNER - 1u) / TILE_INNER;
    for (var t: u32 = 0u; t < num_tiles; t = t + 1u) {
        let k_base = t * TILE_INNER;
        for (var r: u32 = 0u; r < ROWS_PER_THREAD; r = r + 1u) {
            for (var c: u32 = 0u; c < cols4_per_thread_a; c = c + 1u) {
                let in_row = local_row + r;
                let in_col4 = tile_col4_a + c;
                mm_asub[in_row][in_col4] = mm_read_a(row_base + in_row, k_base / 4u + in_col4);
            }
        }
        for (var r: u32 = 0u; r < rows_per_thread_b; r = r + 1u) {
            for (var c: u32 = 0u; c < cols4_per_thread; c = c + 1u) {
                let in_row = tile_row_b + r;
                let in_col4 = local_col4 + c;
                mm_bsub[in_row][in_col4] = mm_read_b(k_base + in_row, col4_base + in_col4);
            }
        }
        workgroupBarrier();

        for (var k4: u32 = 0u; k4 < TILE_INNER / 4u; k4 = k4 + 1u) {
            let k = k4 * 4u;
            for (var r: u32 = 0u; r < ROWS_PER_THREAD; r = r + 1u) {
                let a = mm_asub[local_row + r][k4];
                for (var c: u32 = 0u; c < cols4_per_thread; c = c + 1u) {
                    let col4 = local_col4 + c;
                    acc[r][c] = acc[r][c]
                        + mm_bsub[k][col4] * a.x
                        + mm_bsub[k + 1u][col4] * a.y
                        + mm_bsub[k + 2u][col4] * a.z
                        + mm_bsub[k + 3u][col4] * a.w;
                }
            }
        }
        workgroupBarrier();
    }

    for (var r: u32 = 0u; r < ROWS_PER_THREAD; r = r + 1u) {
        for (var c: u32 = 0u; c < cols4_per_thread; c = c + 1u) {
            mm_write(row_base + local_row + r, col4_base + local_col4 + c, acc[r][c]);
        }
    }
}
"#;
