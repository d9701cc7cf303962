//! Vireo RHI demo viewer.
//!
//! Clears the window with an animated color while exercising the RHI core
//! every frame: a per-slot transform is uploaded into a strided dynamic
//! uniform buffer, and a mip-mapped texture plus that buffer are bound
//! through sets from the descriptor pool allocator.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vireo-viewer -- [OPTIONS]
//! ```
//!
//! ## Controls
//!
//! - `Space`: regenerate the texture (the old one is retired once no frame
//!   in flight can still sample it)
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use vireo_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let mut config = AppConfig::new("Vireo Viewer").with_size(WIDTH, HEIGHT);
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--vsync" => config = config.with_vsync(true),
            "--buffering" => {
                if let Some(n) = args.next().and_then(|v| v.parse().ok()) {
                    config = config.with_buffering(n);
                }
            }
            "--fps" => {
                if let Some(fps) = args.next().and_then(|v| v.parse().ok()) {
                    config = config.with_target_fps(fps);
                }
            }
            _ => {}
        }
    }

    run_app::<Viewer>(config)
}

fn print_help() {
    eprintln!(
        "Vireo RHI demo viewer

USAGE:
    cargo run -p vireo-viewer -- [OPTIONS]

OPTIONS:
    --vsync             Present with FIFO
    --buffering <N>     Requested swapchain images / frames in flight (default: 2)
    --fps <N>           Cap the frame rate
    -h, --help          Print this help message

CONTROLS:
    Space               Regenerate the texture

ENVIRONMENT VARIABLES:
    RUST_LOG            Set log level (e.g., info, debug, trace)"
    );
}
