//! Headless test doubles for `vireo-gpu`.
//!
//! [`HeadlessDevice`] implements [`vireo_gpu::GpuDevice`] on host memory:
//! copies and blits really move bytes, and every barrier, copy and present is
//! checked against tracked layouts, queue family owners, semaphore signal
//! state and pending work. [`HeadlessSurface`] plays the window system for
//! the frame scheduler. Tests call
//! [`HeadlessDevice::assert_no_violations`] after driving the code under test.

mod device;
mod state;
mod surface;

pub use device::{submit_and_wait, HeadlessDevice};
pub use state::{Event, LiveObjects};
pub use surface::{HeadlessSurface, ScriptedAcquire};

/// Install a test subscriber so warnings from the device show up in test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
