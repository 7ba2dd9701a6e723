//! Elementwise add. One invocation per element (buffer) or texel (texture).
//! Both use `SHAPE_HEADER` from the matmul templates.

/// `@ELEMENT@` is the scalar or its `vec4`; `@VALUES_PER_ELEMENT@` is 1 or 4.
pub const BUFFER_ADD: &str = r#"
struct Tensor { data: array<@ELEMENT@>, };
@group(0) @binding(1) var<storage, read> A: Tensor;
@group(0) @binding(2) var<storage, read> B: Tensor;
@group(0) @binding(3) var<storage, read_write> Out: Tensor;

const VALUES_PER_ELEMENT: u32 = @VALUES_PER_ELEMENT@u;

@compute @workgroup_size(@WG_X@, @WG_Y@, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let cols = (shape.output_width + VALUES_PER_ELEMENT - 1u) / VALUES_PER_ELEMENT;
    let tiles_x = (cols + WG_X - 1u) / WG_X;
    let tile_x = select(wid.x, wid.x % tiles_x, FLAT_DISPATCH);
    let tile_y = select(wid.y, wid.x / tiles_x, FLAT_DISPATCH);
    let row = tile_y * WG_Y + lid.y;
    let col = tile_x * WG_X + lid.x;
    if (row >= shape.output_height || col >= cols) {
        return;
    }
    let idx = row * cols + col;
    Out.data[idx] = A.data[idx] + B.data[idx];
}
"#;

pub const TEXTURE_ADD: &str = r#"
@group(0) @binding(1) var A: texture_2d<@SCALAR@>;
@group(0) @binding(2) var B: texture_2d<@SCALAR@>;
@group(0) @binding(3) var Out: texture_storage_2d<@FORMAT@, write>;

@compute @workgroup_size(@WG_X@, @WG_Y@, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let dims = textureDimensions(Out);
    let tiles_x = (dims.x + WG_X - 1u) / WG_X;
    let tile_x = select(wid.x, wid.x % tiles_x, FLAT_DISPATCH);
    let tile_y = select(wid.y, wid.x / tiles_x, FLAT_DISPATCH);
    let row = tile_y * WG_Y + lid.y;
    let col = tile_x * WG_X + lid.x;
    if (row >= dims.y || col >= dims.x) {
        return;
    }
    let coord = vec2<i32>(i32(col), i32(row));
    textureStore(Out, coord, textureLoad(A, coord, 0) + textureLoad(B, coord, 0));
}
"#;
