//! The narrow interface through which we talk to the native driver.
//!
//! [`LimeSdr`][crate::LimeSdr] never calls LimeSuite directly. Everything goes
//! through [`Driver`] and [`SampleStream`], which keeps the streaming pipeline
//! testable without hardware.

#[cfg(test)]
pub(crate) mod fake;
#[cfg(feature = "limesuite")]
mod ffi;
#[cfg(feature = "limesuite")]
pub mod limesuite;

use std::{
    fmt::Display,
    time::Duration,
};

use crate::{
    Error,
    codec::SampleFormat,
    enumerate::HardwareInfo,
};

/// Direction of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Receive
    Rx,
    /// Transmit
    Tx,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rx => write!(f, "RX"),
            Self::Tx => write!(f, "TX"),
        }
    }
}

/// Range with step, as reported by LimeSuite for frequencies, bandwidths and
/// sample rates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Antenna port as reported by the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct AntennaDescriptor {
    pub name: String,
    pub bandwidth: Range,
}

/// One of the three GFIR filter blocks in each channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfirIndex {
    Gfir1,
    Gfir2,
    Gfir3,
}

/// Parameters for provisioning a hardware stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamConfig {
    pub channel: usize,
    pub direction: Direction,
    pub format: SampleFormat,
    /// FIFO depth in samples
    pub fifo_size: u32,
    /// 0.0 favours latency, 1.0 favours throughput
    pub throughput_vs_latency: f32,
}

/// Result of a single [`SampleStream::recv`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvResult {
    /// Number of samples received. Negative values are driver errors.
    pub status: i32,
    /// Hardware timestamp of the first sample in the buffer.
    pub timestamp: u64,
}

/// A provisioned hardware stream.
///
/// Streams are exclusively owned. Implementations must release the native
/// stream when dropped.
pub trait SampleStream: Send + 'static {
    fn start(&mut self) -> Result<(), Error>;

    fn stop(&mut self) -> Result<(), Error>;

    /// Read up to `max_samples` samples into `buffer`, waiting at most
    /// `timeout`.
    ///
    /// `buffer` must be large enough to hold `max_samples` samples in the
    /// stream's format.
    fn recv(&mut self, buffer: &mut [u8], max_samples: usize, timeout: Duration) -> RecvResult;
}

/// An open device.
///
/// All methods are plain request/response calls into the driver. They're
/// called with the device lock held, so implementations don't need to do any
/// synchronization themselves.
pub trait Driver: Send + 'static {
    type Stream: SampleStream;

    /// Human readable description used in error messages, e.g.
    /// `LimeSDR Mini at USB 3.0`.
    fn describe(&self) -> String;

    fn reset(&mut self) -> Result<(), Error>;

    fn init(&mut self) -> Result<(), Error>;

    fn hardware_info(&mut self) -> Result<HardwareInfo, Error>;

    fn num_channels(&mut self, direction: Direction) -> Result<usize, Error>;

    fn antennas(
        &mut self,
        direction: Direction,
        channel: usize,
    ) -> Result<Vec<AntennaDescriptor>, Error>;

    fn lpf_bandwidth_range(&mut self, direction: Direction) -> Result<Range, Error>;

    fn sample_rate_range(&mut self) -> Result<Range, Error>;

    fn set_sample_rate(&mut self, sample_rate: f64, oversample: u32) -> Result<(), Error>;

    /// Returns host and RF sample rate.
    fn sample_rate(&mut self) -> Result<(f64, f64), Error>;

    fn enable_channel(
        &mut self,
        direction: Direction,
        channel: usize,
        enable: bool,
    ) -> Result<(), Error>;

    fn setup_stream(&mut self, config: &StreamConfig) -> Result<Self::Stream, Error>;

    fn set_gain_db(&mut self, direction: Direction, channel: usize, gain: u32)
    -> Result<(), Error>;

    fn gain_db(&mut self, direction: Direction, channel: usize) -> Result<u32, Error>;

    fn set_normalized_gain(
        &mut self,
        direction: Direction,
        channel: usize,
        gain: f64,
    ) -> Result<(), Error>;

    fn normalized_gain(&mut self, direction: Direction, channel: usize) -> Result<f64, Error>;

    fn set_lpf_bandwidth(
        &mut self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> Result<(), Error>;

    fn lpf_bandwidth(&mut self, direction: Direction, channel: usize) -> Result<f64, Error>;

    fn set_lpf(&mut self, direction: Direction, channel: usize, enable: bool) -> Result<(), Error>;

    fn set_gfir_lpf(
        &mut self,
        direction: Direction,
        channel: usize,
        enable: bool,
        bandwidth: f64,
    ) -> Result<(), Error>;

    fn set_gfir_coefficients(
        &mut self,
        direction: Direction,
        channel: usize,
        gfir: GfirIndex,
        taps: &[f64],
    ) -> Result<(), Error>;

    fn set_gfir(
        &mut self,
        direction: Direction,
        channel: usize,
        gfir: GfirIndex,
        enable: bool,
    ) -> Result<(), Error>;

    fn set_antenna(
        &mut self,
        direction: Direction,
        channel: usize,
        antenna: usize,
    ) -> Result<(), Error>;

    fn set_lo_frequency(
        &mut self,
        direction: Direction,
        channel: usize,
        frequency: f64,
    ) -> Result<(), Error>;

    fn lo_frequency(&mut self, direction: Direction, channel: usize) -> Result<f64, Error>;

    fn chip_temperature(&mut self) -> Result<f64, Error>;
}
