//! The connect / send / disconnect cycle driver.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use relaygl_core::frame::DEFAULT_STRIP_HEIGHT;
use relaygl_core::transport::default_port;
use relaygl_core::{
    Endpoint, FakerConfig, Frame, FrameSender, SenderOptions, SessionError, Subsampling,
};

use crate::args::HarnessArgs;

pub const WIDTH: u32 = 301;
pub const HEIGHT: u32 = 301;
pub const PIXEL_SIZE: u8 = 3;
pub const QUALITY: u8 = 50;

/// Everything one harness run needs, resolved from arguments and config.
#[derive(Debug, Clone)]
pub struct HarnessPlan {
    pub host: String,
    pub port: u16,
    pub iterations: u32,
    pub frames: u32,
    pub window_id: u64,
    pub options: SenderOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessReport {
    pub iterations: u32,
    pub frames: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl HarnessPlan {
    /// `-client` wins over the configured client; `localhost` otherwise.
    /// `-ssl` forces TLS on top of whatever the config says.
    pub fn new(args: &HarnessArgs, config: &FakerConfig) -> Self {
        let endpoint = match &args.client {
            Some(client) => Endpoint::parse(client),
            None => config.endpoint(),
        };
        let ssl = args.ssl || config.transport.ssl;
        let mut options = config.transport.sender_options();
        options.tls = ssl.then(|| config.transport.tls.clone());
        Self {
            host: endpoint.host,
            port: config.transport.port.unwrap_or_else(|| default_port(ssl)),
            iterations: args.iterations,
            frames: args.frames,
            window_id: u64::from(std::process::id()),
            options,
        }
    }
}

/// Alternating stripes whose polarity flips every iteration.
pub fn fill_pattern(pixels: &mut [u8], iteration: u32) {
    let (base, even) = if iteration % 2 == 0 { (0, 255) } else { (255, 0) };
    for (j, b) in pixels.iter_mut().enumerate() {
        *b = if j % 2 == 0 { even } else { base };
    }
}

fn prepare(frame: &mut Frame, plan: &HarnessPlan, iteration: u32) {
    fill_pattern(&mut frame.pixels, iteration);
    frame.quality = QUALITY;
    frame.subsampling = Subsampling::S411;
    frame.window_id = plan.window_id;
    frame.strip_height = DEFAULT_STRIP_HEIGHT;
}

/// Run every cycle, stopping at the first failure.
pub async fn run(plan: &HarnessPlan) -> Result<HarnessReport, SessionError> {
    info!(
        host = %plan.host,
        port = plan.port,
        secure = plan.options.tls.is_some(),
        window = format_args!("{:#x}", plan.window_id),
        "testing client for memory leaks and stability"
    );
    info!("{} iterations", plan.iterations);

    let started = Instant::now();
    let mut report = HarnessReport::default();
    for i in 0..plan.iterations {
        let sender = FrameSender::connect(&plan.host, plan.port, plan.options.clone()).await?;
        for _ in 0..plan.frames {
            let mut frame = sender.frame(WIDTH, HEIGHT, PIXEL_SIZE);
            prepare(&mut frame, plan, i);
            sender.send_frame(frame).await?;
        }
        let stats = sender.close().await?;
        debug!(iteration = i, frames = stats.frames, "cycle complete");
        report.iterations += 1;
        report.frames += stats.frames;
        report.bytes += stats.bytes;
    }
    report.elapsed = started.elapsed();
    info!(
        iterations = report.iterations,
        frames = report.frames,
        elapsed = ?report.elapsed,
        "harness finished"
    );
    Ok(report)
}
