//! In-memory driver used by the tests.
//!
//! Each stream pops scripted reads off a queue shared with the [`FakeDevice`],
//! so tests can feed samples and errors into a running device and watch what
//! happens to the native streams.

use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::Arc,
    thread,
    time::Duration,
};

use bytes::BufMut;
use num_complex::Complex32;
use parking_lot::Mutex;

use super::{
    AntennaDescriptor,
    Direction,
    Driver,
    GfirIndex,
    Range,
    RecvResult,
    SampleStream,
    StreamConfig,
};
use crate::{
    Error,
    codec::SampleFormat,
    enumerate::HardwareInfo,
};

/// Upper bound for how long an idle fake stream sleeps per poll.
const MAX_IDLE: Duration = Duration::from_millis(5);

#[derive(Debug)]
enum FakeRead {
    Samples {
        timestamp: u64,
        samples: Vec<Complex32>,
    },
    /// Returned as is without touching the buffer.
    Status(i32),
}

#[derive(Debug, Default)]
struct FakeChannel {
    reads: VecDeque<FakeRead>,
    enabled: bool,
    running: bool,
    starts: usize,
    fail_start: bool,
    fail_setup: Option<SampleFormat>,
    antenna: usize,
    gain_db: u32,
    normalized_gain: f64,
    lpf_bandwidth: f64,
    lo_frequency: f64,
}

#[derive(Debug, Default)]
struct FakeState {
    channels: HashMap<(Direction, usize), FakeChannel>,
    sample_rate: (f64, f64),
    live_streams: usize,
    calls: Vec<String>,
}

impl FakeState {
    fn channel(&mut self, direction: Direction, channel: usize) -> &mut FakeChannel {
        self.channels.entry((direction, channel)).or_default()
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }
}

fn fake_error(function: &'static str) -> Error {
    Error::LimeSuite {
        function,
        device: "FakeSDR".to_owned(),
        message: "scripted failure".to_owned(),
    }
}

/// Test handle to the shared fake hardware.
#[derive(Clone, Debug)]
pub(crate) struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
    num_rx: usize,
    num_tx: usize,
}

impl FakeDevice {
    pub fn new(num_rx: usize, num_tx: usize) -> Self {
        Self {
            state: Default::default(),
            num_rx,
            num_tx,
        }
    }

    pub fn driver(&self) -> FakeDriver {
        FakeDriver {
            device: self.clone(),
        }
    }

    /// Provisions a stream directly, bypassing the driver.
    pub fn stream(&self, direction: Direction, channel: usize, format: SampleFormat) -> FakeStream {
        self.state.lock().live_streams += 1;
        FakeStream {
            state: self.state.clone(),
            key: (direction, channel),
            format,
        }
    }

    pub fn push_samples(&self, channel: usize, timestamp: u64, samples: Vec<Complex32>) {
        self.state
            .lock()
            .channel(Direction::Rx, channel)
            .reads
            .push_back(FakeRead::Samples { timestamp, samples });
    }

    pub fn push_status(&self, channel: usize, status: i32) {
        self.state
            .lock()
            .channel(Direction::Rx, channel)
            .reads
            .push_back(FakeRead::Status(status));
    }

    pub fn pending_reads(&self, channel: usize) -> usize {
        self.state.lock().channel(Direction::Rx, channel).reads.len()
    }

    /// Makes every following stream start on this channel fail.
    pub fn fail_start(&self, channel: usize) {
        self.state.lock().channel(Direction::Rx, channel).fail_start = true;
    }

    /// Makes stream setup in `format` fail on this channel.
    pub fn fail_setup(&self, direction: Direction, channel: usize, format: SampleFormat) {
        self.state.lock().channel(direction, channel).fail_setup = Some(format);
    }

    pub fn is_running(&self, direction: Direction, channel: usize) -> bool {
        self.state.lock().channel(direction, channel).running
    }

    pub fn is_enabled(&self, direction: Direction, channel: usize) -> bool {
        self.state.lock().channel(direction, channel).enabled
    }

    /// The antenna index the driver last selected.
    pub fn antenna(&self, direction: Direction, channel: usize) -> usize {
        self.state.lock().channel(direction, channel).antenna
    }

    pub fn lo_frequency(&self, direction: Direction, channel: usize) -> f64 {
        self.state.lock().channel(direction, channel).lo_frequency
    }

    pub fn starts(&self, channel: usize) -> usize {
        self.state.lock().channel(Direction::Rx, channel).starts
    }

    pub fn live_streams(&self) -> usize {
        self.state.lock().live_streams
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }
}

#[derive(Debug)]
pub(crate) struct FakeDriver {
    device: FakeDevice,
}

impl Driver for FakeDriver {
    type Stream = FakeStream;

    fn describe(&self) -> String {
        "FakeSDR at memory".to_owned()
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.device.state.lock().record("reset".to_owned());
        Ok(())
    }

    fn init(&mut self) -> Result<(), Error> {
        self.device.state.lock().record("init".to_owned());
        Ok(())
    }

    fn hardware_info(&mut self) -> Result<HardwareInfo, Error> {
        Ok(HardwareInfo {
            device_name: "FakeSDR".to_owned(),
            firmware_version: "1".to_owned(),
            hardware_version: "2".to_owned(),
            board_serial_number: 0x1234,
            ..Default::default()
        })
    }

    fn num_channels(&mut self, direction: Direction) -> Result<usize, Error> {
        Ok(match direction {
            Direction::Rx => self.device.num_rx,
            Direction::Tx => self.device.num_tx,
        })
    }

    fn antennas(
        &mut self,
        direction: Direction,
        _channel: usize,
    ) -> Result<Vec<AntennaDescriptor>, Error> {
        let names: &[(&str, f64, f64)] = match direction {
            Direction::Rx => {
                &[
                    ("NONE", 0.0, 0.0),
                    ("LNAH", 2e9, 2.6e9),
                    ("LNAL", 0.7e9, 0.9e9),
                    ("LNAW", 0.7e9, 2.6e9),
                ]
            }
            Direction::Tx => &[("NONE", 0.0, 0.0), ("BAND1", 2e9, 2.6e9), ("BAND2", 30e6, 1.9e9)],
        };
        Ok(names
            .iter()
            .map(|(name, min, max)| {
                AntennaDescriptor {
                    name: (*name).to_owned(),
                    bandwidth: Range {
                        min: *min,
                        max: *max,
                        step: 1.0,
                    },
                }
            })
            .collect())
    }

    fn lpf_bandwidth_range(&mut self, _direction: Direction) -> Result<Range, Error> {
        Ok(Range {
            min: 1.4e6,
            max: 130e6,
            step: 1.0,
        })
    }

    fn sample_rate_range(&mut self) -> Result<Range, Error> {
        Ok(Range {
            min: 100e3,
            max: 61.44e6,
            step: 1.0,
        })
    }

    fn set_sample_rate(&mut self, sample_rate: f64, oversample: u32) -> Result<(), Error> {
        let mut state = self.device.state.lock();
        state.sample_rate = (sample_rate, sample_rate * f64::from(oversample.max(1)));
        state.record(format!("set_sample_rate {sample_rate} {oversample}"));
        Ok(())
    }

    fn sample_rate(&mut self) -> Result<(f64, f64), Error> {
        Ok(self.device.state.lock().sample_rate)
    }

    fn enable_channel(
        &mut self,
        direction: Direction,
        channel: usize,
        enable: bool,
    ) -> Result<(), Error> {
        let mut state = self.device.state.lock();
        state.channel(direction, channel).enabled = enable;
        state.record(format!("enable_channel {direction} {channel} {enable}"));
        Ok(())
    }

    fn setup_stream(&mut self, config: &StreamConfig) -> Result<Self::Stream, Error> {
        {
            let mut state = self.device.state.lock();
            state.record(format!(
                "setup_stream {} {} {}",
                config.direction, config.channel, config.format
            ));
            if state.channel(config.direction, config.channel).fail_setup == Some(config.format) {
                return Err(fake_error("LMS_SetupStream"));
            }
        }
        Ok(self
            .device
            .stream(config.direction, config.channel, config.format))
    }

    fn set_gain_db(
        &mut self,
        direction: Direction,
        channel: usize,
        gain: u32,
    ) -> Result<(), Error> {
        self.device.state.lock().channel(direction, channel).gain_db = gain;
        Ok(())
    }

    fn gain_db(&mut self, direction: Direction, channel: usize) -> Result<u32, Error> {
        Ok(self.device.state.lock().channel(direction, channel).gain_db)
    }

    fn set_normalized_gain(
        &mut self,
        direction: Direction,
        channel: usize,
        gain: f64,
    ) -> Result<(), Error> {
        self.device
            .state
            .lock()
            .channel(direction, channel)
            .normalized_gain = gain;
        Ok(())
    }

    fn normalized_gain(&mut self, direction: Direction, channel: usize) -> Result<f64, Error> {
        Ok(self
            .device
            .state
            .lock()
            .channel(direction, channel)
            .normalized_gain)
    }

    fn set_lpf_bandwidth(
        &mut self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> Result<(), Error> {
        self.device
            .state
            .lock()
            .channel(direction, channel)
            .lpf_bandwidth = bandwidth;
        Ok(())
    }

    fn lpf_bandwidth(&mut self, direction: Direction, channel: usize) -> Result<f64, Error> {
        Ok(self
            .device
            .state
            .lock()
            .channel(direction, channel)
            .lpf_bandwidth)
    }

    fn set_lpf(&mut self, direction: Direction, channel: usize, enable: bool) -> Result<(), Error> {
        self.device
            .state
            .lock()
            .record(format!("set_lpf {direction} {channel} {enable}"));
        Ok(())
    }

    fn set_gfir_lpf(
        &mut self,
        direction: Direction,
        channel: usize,
        enable: bool,
        bandwidth: f64,
    ) -> Result<(), Error> {
        self.device.state.lock().record(format!(
            "set_gfir_lpf {direction} {channel} {enable} {bandwidth}"
        ));
        Ok(())
    }

    fn set_gfir_coefficients(
        &mut self,
        direction: Direction,
        channel: usize,
        gfir: GfirIndex,
        taps: &[f64],
    ) -> Result<(), Error> {
        self.device.state.lock().record(format!(
            "set_gfir_coefficients {direction} {channel} {gfir:?} {}",
            taps.len()
        ));
        Ok(())
    }

    fn set_gfir(
        &mut self,
        direction: Direction,
        channel: usize,
        gfir: GfirIndex,
        enable: bool,
    ) -> Result<(), Error> {
        self.device
            .state
            .lock()
            .record(format!("set_gfir {direction} {channel} {gfir:?} {enable}"));
        Ok(())
    }

    fn set_antenna(
        &mut self,
        direction: Direction,
        channel: usize,
        antenna: usize,
    ) -> Result<(), Error> {
        self.device.state.lock().channel(direction, channel).antenna = antenna;
        Ok(())
    }

    fn set_lo_frequency(
        &mut self,
        direction: Direction,
        channel: usize,
        frequency: f64,
    ) -> Result<(), Error> {
        self.device
            .state
            .lock()
            .channel(direction, channel)
            .lo_frequency = frequency;
        Ok(())
    }

    fn lo_frequency(&mut self, direction: Direction, channel: usize) -> Result<f64, Error> {
        Ok(self
            .device
            .state
            .lock()
            .channel(direction, channel)
            .lo_frequency)
    }

    fn chip_temperature(&mut self) -> Result<f64, Error> {
        Ok(42.5)
    }
}

#[derive(Debug)]
pub(crate) struct FakeStream {
    state: Arc<Mutex<FakeState>>,
    key: (Direction, usize),
    format: SampleFormat,
}

impl SampleStream for FakeStream {
    fn start(&mut self) -> Result<(), Error> {
        let mut state = self.state.lock();
        let channel = state.channel(self.key.0, self.key.1);
        if channel.fail_start {
            return Err(fake_error("LMS_StartStream"));
        }
        channel.running = true;
        channel.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.state.lock().channel(self.key.0, self.key.1).running = false;
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8], max_samples: usize, timeout: Duration) -> RecvResult {
        let read = self
            .state
            .lock()
            .channel(self.key.0, self.key.1)
            .reads
            .pop_front();

        match read {
            None => {
                thread::sleep(timeout.min(MAX_IDLE));
                RecvResult {
                    status: 0,
                    timestamp: 0,
                }
            }
            Some(FakeRead::Status(status)) => RecvResult { status, timestamp: 0 },
            Some(FakeRead::Samples { timestamp, samples }) => {
                let count = samples
                    .len()
                    .min(max_samples)
                    .min(buffer.len() / self.format.bytes_per_sample());
                let mut out = &mut buffer[..];
                for sample in &samples[..count] {
                    match self.format {
                        SampleFormat::Float32 => {
                            out.put_f32_le(sample.re);
                            out.put_f32_le(sample.im);
                        }
                        SampleFormat::Int16 | SampleFormat::Int12 => {
                            out.put_i16_le(to_i16(sample.re));
                            out.put_i16_le(to_i16(sample.im));
                        }
                    }
                }
                RecvResult {
                    status: i32::try_from(count).unwrap_or(i32::MAX),
                    timestamp,
                }
            }
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.live_streams -= 1;
        state.channel(self.key.0, self.key.1).running = false;
    }
}

fn to_i16(x: f32) -> i16 {
    (x * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}
