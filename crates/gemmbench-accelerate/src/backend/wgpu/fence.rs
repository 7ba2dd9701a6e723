//! Completion counter for queue submissions.
//!
//! `signal` hands out increasing values and registers a queue callback that
//! publishes the value once all previously submitted work has finished. Waits
//! drive `Device::poll` until the value is observed.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use crate::backend::wgpu::metrics::GpuMetrics;
use crate::error::{AccelError, Result};

pub struct Fence {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    metrics: Arc<GpuMetrics>,
    issued: u64,
    completed: Arc<AtomicU64>,
    timeout: Option<Duration>,
}

impl Fence {
    pub(crate) fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        metrics: Arc<GpuMetrics>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            device,
            queue,
            metrics,
            issued: 0,
            completed: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Marks everything submitted so far; returns the value to wait for.
    pub fn signal(&mut self) -> u64 {
        self.issued += 1;
        let value = self.issued;
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        value
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_signaled(&self, value: u64) -> bool {
        self.completed() >= value
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn check_issued(&self, value: u64) -> Result<()> {
        if value > self.issued {
            return Err(AccelError::invalid_state(
                "fence wait",
                format!("value {value} was never signalled (last issued {})", self.issued),
            ));
        }
        Ok(())
    }

    /// Blocks until `value` completes, bounded by the fence timeout if one is set.
    pub fn wait(&self, value: u64) -> Result<()> {
        self.check_issued(value)?;
        self.metrics.inc_fence_wait();
        if self.is_signaled(value) {
            return Ok(());
        }
        match self.timeout {
            None => {
                self.device.poll(wgpu::Maintain::Wait);
                if self.is_signaled(value) {
                    Ok(())
                } else {
                    Err(AccelError::Device(format!(
                        "fence value {value} not observed after the device went idle"
                    )))
                }
            }
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    self.device.poll(wgpu::Maintain::Poll);
                    if self.is_signaled(value) {
                        return Ok(());
                    }
                    if start.elapsed() >= timeout {
                        log::warn!("fence wait for {} timed out after {:?}", value, timeout);
                        return Err(AccelError::SyncTimeout {
                            value,
                            waited: start.elapsed(),
                        });
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Non-blocking wait; the returned future re-polls the device each time it is polled.
    pub fn wait_async(&self, value: u64) -> impl Future<Output = Result<()>> + '_ {
        let start = Instant::now();
        let checked = self.check_issued(value);
        if checked.is_ok() {
            self.metrics.inc_fence_wait();
        }
        let mut checked = Some(checked);
        futures::future::poll_fn(move |cx| {
            if let Some(Err(err)) = checked.take() {
                return Poll::Ready(Err(err));
            }
            self.device.poll(wgpu::Maintain::Poll);
            if self.is_signaled(value) {
                return Poll::Ready(Ok(()));
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    return Poll::Ready(Err(AccelError::SyncTimeout {
                        value,
                        waited: start.elapsed(),
                    }));
                }
            }
            cx.waker().wake_by_ref();
            Poll::Pending
        })
    }
}
