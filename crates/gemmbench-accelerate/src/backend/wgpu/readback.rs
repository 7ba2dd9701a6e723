//! Device -> host copies through `MAP_READ` staging buffers.

use std::time::{Duration, Instant};

use futures::channel::oneshot;
use pollster::block_on;

use crate::backend::wgpu::context::GpuContext;
use crate::backend::wgpu::fence::Fence;
use crate::error::{AccelError, Result};

fn staging_buffer(ctx: &GpuContext, label: &str, size_bytes: u64) -> Result<wgpu::Buffer> {
    ctx.allocate_buffer(
        &format!("{label}-staging"),
        size_bytes,
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    )
}

/// Calls `poll` until it yields a value or `timeout` has elapsed.
fn poll_until<T>(timeout: Duration, mut poll: impl FnMut() -> Option<T>) -> Option<T> {
    let start = Instant::now();
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::yield_now();
    }
}

/// Maps `staging` and copies it out. With a fence timeout set, the map wait
/// is bounded by the same timeout and reported against `fence_value`.
fn map_readback_bytes(
    device: &wgpu::Device,
    staging: wgpu::Buffer,
    size_bytes: u64,
    context: &str,
    fence_value: u64,
    timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    let size_usize = usize::try_from(size_bytes)
        .map_err(|_| AccelError::Device(format!("{context}: readback size overflow")))?;
    let dropped = || AccelError::Device(format!("{context}: map_async callback dropped"));
    let slice = staging.slice(..);
    let (tx, mut rx) = oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    let map_result = match timeout {
        None => {
            device.poll(wgpu::Maintain::Wait);
            block_on(rx).map_err(|_| dropped())?
        }
        Some(timeout) => {
            let polled = poll_until(timeout, || {
                device.poll(wgpu::Maintain::Poll);
                rx.try_recv().transpose()
            });
            match polled {
                Some(received) => received.map_err(|_| dropped())?,
                None => {
                    log::warn!("{}: readback map timed out after {:?}", context, timeout);
                    return Err(AccelError::SyncTimeout {
                        value: fence_value,
                        waited: timeout,
                    });
                }
            }
        }
    };
    map_result?;
    let data = slice.get_mapped_range();
    let mut out = vec![0u8; size_usize];
    out.copy_from_slice(&data[..size_usize]);
    drop(data);
    staging.unmap();
    Ok(out)
}

fn finish_readback(
    ctx: &GpuContext,
    fence: &mut Fence,
    encoder: wgpu::CommandEncoder,
    staging: wgpu::Buffer,
    size_bytes: u64,
    label: &str,
) -> Result<Vec<u8>> {
    ctx.submit(encoder);
    let value = fence.signal();
    fence.wait(value)?;
    let bytes = map_readback_bytes(
        ctx.device(),
        staging,
        size_bytes,
        label,
        value,
        fence.timeout(),
    )?;
    ctx.metrics().add_read_back(size_bytes);
    Ok(bytes)
}

/// Copies the first `size_bytes` of `source` back to the host.
pub fn read_buffer(
    ctx: &GpuContext,
    fence: &mut Fence,
    source: &wgpu::Buffer,
    size_bytes: u64,
    label: &str,
) -> Result<Vec<u8>> {
    let _span = tracing::info_span!("readback", label = label, bytes = size_bytes).entered();
    let staging = staging_buffer(ctx, label, size_bytes)?;
    let mut encoder = ctx.create_encoder(&format!("{label}-readback"));
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size_bytes);
    finish_readback(ctx, fence, encoder, staging, size_bytes, label)
}

/// Copies a whole 2D texture back with `bytes_per_row` padding left in place.
pub fn read_texture(
    ctx: &GpuContext,
    fence: &mut Fence,
    texture: &wgpu::Texture,
    bytes_per_row: u32,
    label: &str,
) -> Result<Vec<u8>> {
    let size_bytes = bytes_per_row as u64 * texture.height() as u64;
    let _span = tracing::info_span!("readback", label = label, bytes = size_bytes).entered();
    let staging = staging_buffer(ctx, label, size_bytes)?;
    let mut encoder = ctx.create_encoder(&format!("{label}-readback"));
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(texture.height()),
            },
        },
        texture.size(),
    );
    finish_readback(ctx, fence, encoder, staging, size_bytes, label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_poll_returns_once_ready() {
        let mut calls = 0;
        let value = poll_until(Duration::from_secs(5), || {
            calls += 1;
            (calls == 3).then_some(calls)
        });
        assert_eq!(value, Some(3));
    }

    #[test]
    fn bounded_poll_gives_up_after_timeout() {
        let timeout = Duration::from_millis(20);
        let start = Instant::now();
        let value: Option<()> = poll_until(timeout, || None);
        assert!(value.is_none());
        assert!(start.elapsed() >= timeout);
    }
}
