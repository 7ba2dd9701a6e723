use std::sync::{Arc, Mutex};

use gemmbench_accelerate::harness::shape_for;
use gemmbench_accelerate::ops::texture_roundtrip;
use gemmbench_accelerate::{
    host_matmul, ComputeOp, DeviceOptions, ElementType, Encoding, GpuContext, HostMatrix,
    KernelKind, TexelPacking, VariantOp, VariantSpec,
};
use once_cell::sync::Lazy;

static TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn context() -> Option<Arc<GpuContext>> {
    context_with(&DeviceOptions::default())
}

fn context_with(options: &DeviceOptions) -> Option<Arc<GpuContext>> {
    match GpuContext::new(options) {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(err) => {
            eprintln!("skipping: {err}");
            None
        }
    }
}

fn build(ctx: &Arc<GpuContext>, spec: &VariantSpec, a: &HostMatrix, b: &HostMatrix) -> VariantOp {
    let shape = shape_for(spec.kind, a, b).unwrap();
    VariantOp::construct(ctx, spec, &[a.clone(), b.clone()], shape).unwrap()
}

#[test]
fn readback_is_idempotent() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let a = HostMatrix::sequential(ElementType::F32, 9, 5);
    let b = HostMatrix::sequential(ElementType::F32, 5, 7);
    for spec in [
        VariantSpec::matmul(Encoding::PackedBuffer, 8, (4, 4)),
        VariantSpec::matmul(Encoding::TextureFourChannel, 8, (4, 4)),
    ] {
        let mut op = build(&ctx, &spec, &a, &b);
        op.dispatch().unwrap();
        let first = op.read_result().unwrap();
        let second = op.read_result().unwrap();
        assert_eq!(first, second);
        op.dispatch().unwrap();
        assert_eq!(op.read_result().unwrap(), first);
        op.release().unwrap();
    }
}

#[test]
fn bounded_waits_cover_fence_and_readback_map() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let options = DeviceOptions {
        fence_timeout_ms: Some(30_000),
        ..DeviceOptions::default()
    };
    let Some(ctx) = context_with(&options) else { return };
    let a = HostMatrix::sequential(ElementType::U32, 6, 4);
    let b = HostMatrix::sequential(ElementType::U32, 4, 3);
    let expected = host_matmul(&a, &b).unwrap();
    for spec in [
        VariantSpec::matmul(Encoding::Buffer, 8, (1, 1)),
        VariantSpec::matmul(Encoding::TextureSingleChannel, 8, (1, 1)),
    ] {
        let mut op = build(&ctx, &spec, &a, &b);
        op.dispatch().unwrap();
        assert_eq!(op.read_result().unwrap(), expected);
        op.release().unwrap();
    }
    let round = texture_roundtrip(&ctx, &a, TexelPacking::FourChannel).unwrap();
    assert_eq!(round, a);
}

#[test]
fn read_before_dispatch_is_invalid() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let a = HostMatrix::sequential(ElementType::F32, 4, 4);
    let mut op = build(&ctx, &VariantSpec::matmul(Encoding::Buffer, 16, (1, 1)), &a, &a);
    assert_eq!(op.read_result().unwrap_err().kind(), "invalid-state");
    op.release().unwrap();
}

#[test]
fn released_operation_rejects_every_call() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let a = HostMatrix::sequential(ElementType::F32, 4, 4);
    for encoding in [Encoding::PackedBuffer, Encoding::TextureSingleChannel] {
        let mut op = build(&ctx, &VariantSpec::matmul(encoding, 4, (1, 1)), &a, &a);
        op.dispatch().unwrap();
        op.release().unwrap();
        assert!(op.is_released());
        assert_eq!(op.dispatch().unwrap_err().kind(), "invalid-state");
        assert_eq!(op.read_result().unwrap_err().kind(), "invalid-state");
        assert_eq!(op.release().unwrap_err().kind(), "invalid-state");
    }
}

#[test]
fn async_dispatch_completes() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let a = HostMatrix::sequential(ElementType::F32, 17, 17);
    let expected = host_matmul(&a, &a).unwrap();
    let mut op = build(&ctx, &VariantSpec::matmul(Encoding::Vec4Buffer, 8, (4, 4)), &a, &a);
    pollster::block_on(op.dispatch_async()).unwrap();
    let out = op.read_result().unwrap();
    let cmp = gemmbench_accelerate::harness::compare(&expected, &out, &Default::default());
    assert!(cmp.is_match(), "{cmp:?}");
    op.release().unwrap();
}

#[test]
fn texture_roundtrip_strips_padding() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    for packing in [TexelPacking::SingleChannel, TexelPacking::FourChannel] {
        for (rows, cols) in [(1, 1), (3, 5), (7, 70)] {
            let m = HostMatrix::sequential(ElementType::U32, rows, cols);
            let back = texture_roundtrip(&ctx, &m, packing).unwrap();
            assert_eq!(back, m, "{packing:?} {rows}x{cols}");
        }
    }
}

#[test]
fn oversized_workgroup_is_rejected_before_compile() {
    let _guard = TEST_MUTEX.lock().unwrap();
    let Some(ctx) = context() else { return };
    let a = HostMatrix::sequential(ElementType::F32, 4, 4);
    let spec = VariantSpec::matmul(Encoding::PackedBuffer, 64, (1, 1));
    let shape = shape_for(KernelKind::Matmul, &a, &a).unwrap();
    let err = VariantOp::construct(&ctx, &spec, &[a.clone(), a], shape).err().unwrap();
    assert_eq!(err.kind(), "config");
}
