//! # Threaded streaming bindings for [LimeSDR][1] devices
//!
//! This crate wraps the [LimeSuite][2] driver library. It provides a
//! device → channel → antenna object model, and a streaming pipeline that
//! polls every enabled receive channel on its own thread and delivers decoded
//! [`Complex32`][num_complex::Complex32] samples to a single callback.
//!
//! ```ignore
//! # async fn example() -> Result<(), limesdr_async::Error> {
//! use limesdr_async::devices;
//!
//! let info = devices()?.into_iter().next().expect("no device");
//! let device = info.open()?;
//!
//! device.rx_channel(0)?
//!     .enable()?
//!     .set_antenna_by_name("LNAW")?
//!     .set_center_frequency(100e6)?;
//!
//! device.set_callback(|samples, channel, timestamp| {
//!     println!("{} samples from channel {channel} at {timestamp}", samples.len());
//! });
//!
//! device.start().await?;
//! // ...
//! device.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The native driver is only reached through the [`Driver`] trait. Enable the
//! `limesuite` feature to link against `libLimeSuite`.
//!
//! [1]: https://limemicro.com/technology/lms7002m/
//! [2]: https://github.com/myriadrf/LimeSuite

mod channel;
pub mod codec;
mod device;
mod device_loop;
pub mod driver;
mod enumerate;
mod worker;

use std::time::Duration;

#[cfg(feature = "limesuite")]
pub use crate::{
    driver::limesuite::LimeSuite,
    enumerate::devices,
};
pub use crate::{
    channel::{
        Antenna,
        Channel,
        ChannelRef,
    },
    codec::{
        DecodeError,
        SampleFormat,
    },
    device::{
        Advanced,
        ChannelStreamState,
        LimeSdr,
        RunState,
        StreamStats,
    },
    driver::{
        Direction,
        Driver,
        GfirIndex,
        Range,
        SampleStream,
    },
    enumerate::{
        DeviceInfo,
        HardwareInfo,
    },
    worker::SampleBlock,
};

/// Number of samples requested from the driver per poll.
pub const DEFAULT_BLOCK_SIZE: usize = 16384;

/// How long a single poll waits for samples.
///
/// This also bounds how long it takes for a stream worker to notice it should
/// stop.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Driver-side FIFO depth in samples.
pub const DEFAULT_FIFO_SIZE: u32 = 32 * DEFAULT_BLOCK_SIZE as u32;

/// Errors returned by a [`LimeSdr`]
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("LimeSuite error: {function} failed for {device}: {message}")]
    LimeSuite {
        function: &'static str,
        device: String,
        message: String,
    },
    #[error("operation not allowed while the device is streaming")]
    DeviceRunning,
    #[error("invalid {direction} channel: {channel}")]
    InvalidChannel {
        direction: Direction,
        channel: usize,
    },
    #[error("unknown antenna: {name}")]
    UnknownAntenna { name: String },
    #[error("no digital filter bandwidth set for channel {channel}")]
    NoDigitalBandwidth { channel: usize },
    #[error("advanced filtering is active on channel {channel}, use the GFIR functions instead")]
    AdvancedFilteringActive { channel: usize },
    #[error("device loop died unexpectedly")]
    DeviceLoopDead,
    #[error("failed to spawn thread: {message}")]
    Spawn { message: String },
    #[error("invalid block size: {block_size}")]
    InvalidBlockSize { block_size: usize },
}

impl Error {
    /// Creates an error for a failed LimeSuite call, picking up the driver's
    /// last error message.
    #[cfg(feature = "limesuite")]
    pub(crate) fn from_lib(function: &'static str, device: &str) -> Self {
        Self::LimeSuite {
            function,
            device: device.to_owned(),
            message: driver::limesuite::last_error_message(),
        }
    }

    pub(crate) fn from_spawn(error: std::io::Error) -> Self {
        Self::Spawn {
            message: error.to_string(),
        }
    }
}

/// Streaming and open-time settings for a [`LimeSdr`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    /// Number of samples requested per poll.
    pub block_size: usize,

    /// Timeout for a single poll.
    pub read_timeout: Duration,

    /// Driver FIFO depth in samples.
    pub fifo_size: u32,

    /// 0.0 favours latency, 1.0 favours throughput
    pub throughput_vs_latency: f32,

    /// Wire format used for new streams.
    pub sample_format: SampleFormat,

    /// Sample rate applied when the device is opened.
    pub initial_sample_rate: f64,

    /// Hardware oversampling applied when the device is opened.
    pub initial_oversample: u32,
}

impl Config {
    /// Checks that a buffer for `block_size` samples can be allocated in every
    /// format, and that the driver can report that many samples.
    pub fn validate(&self) -> Result<(), Error> {
        let widest = SampleFormat::Float32.bytes_per_sample();
        let fits = self.block_size > 0
            && i32::try_from(self.block_size).is_ok()
            && widest.checked_mul(self.block_size).is_some();
        if fits {
            Ok(())
        }
        else {
            Err(Error::InvalidBlockSize {
                block_size: self.block_size,
            })
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            fifo_size: DEFAULT_FIFO_SIZE,
            throughput_vs_latency: 0.5,
            sample_format: SampleFormat::default(),
            initial_sample_rate: 1e6,
            initial_oversample: 4,
        }
    }
}
