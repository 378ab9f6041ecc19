use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    fmt::Display,
    sync::Arc,
};

use num_complex::Complex32;
use parking_lot::Mutex;

use crate::{
    Config,
    Error,
    channel::{
        Antenna,
        Channel,
        ChannelRef,
    },
    codec::SampleFormat,
    device_loop::{
        DeviceLoop,
        Shared,
        StreamTable,
    },
    driver::{
        Direction,
        Driver,
        GfirIndex,
        Range,
        StreamConfig,
    },
    enumerate::HardwareInfo,
    worker::ChannelStream,
};

/// Lifecycle state of the streaming pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

/// Whether a channel has a hardware stream, and in which format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStreamState {
    pub provisioned: bool,
    pub format: Option<SampleFormat>,
}

impl ChannelStreamState {
    /// Bytes per complex sample on the wire.
    pub fn sample_width(&self) -> Option<usize> {
        self.format.map(|format| format.bytes_per_sample())
    }
}

/// Per-channel counters since the last start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub blocks: u64,
    pub samples: u64,
    pub read_errors: u64,
    pub decode_errors: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct DigitalFilter {
    bandwidth: f64,
    enabled: bool,
    /// GFIR taps were set by hand
    advanced: bool,
}

/// An open LimeSDR.
///
/// Control calls are synchronous and serialized on the driver. Streaming runs
/// on background threads between [`start`][Self::start] and
/// [`stop`][Self::stop]. Every enabled receive channel gets its own worker,
/// and all decoded blocks are delivered to the callback from a single thread,
/// so the callback never runs concurrently with itself.
///
/// Dropping the device stops streaming and releases all native streams.
#[derive(derive_more::Debug)]
pub struct LimeSdr<D: Driver> {
    #[debug(skip)]
    driver: Mutex<D>,
    description: String,
    hardware_info: HardwareInfo,
    rx_channels: Vec<Channel>,
    tx_channels: Vec<Channel>,
    sample_rate_range: Range,
    rx_lpf_range: Range,
    tx_lpf_range: Range,
    config: Config,
    sample_format: Mutex<SampleFormat>,
    digital_filters: Mutex<HashMap<(Direction, usize), DigitalFilter>>,
    #[debug(skip)]
    shared: Arc<Shared<D::Stream>>,
    #[debug(skip)]
    device_loop: tokio::sync::Mutex<Option<DeviceLoop>>,
}

impl<D: Driver> LimeSdr<D> {
    /// Opens the device with the default [`Config`].
    pub fn new(driver: D) -> Result<Self, Error> {
        Self::with_config(driver, Config::default())
    }

    /// Resets and initializes the device, and loads its channel layout.
    pub fn with_config(mut driver: D, config: Config) -> Result<Self, Error> {
        config.validate()?;

        let description = driver.describe();
        let _guard = tracing::debug_span!("open", device = %description).entered();

        driver.reset()?;
        driver.init()?;

        let hardware_info = driver.hardware_info()?;
        let rx_channels = load_channels(&mut driver, Direction::Rx)?;
        let tx_channels = load_channels(&mut driver, Direction::Tx)?;
        let rx_lpf_range = driver.lpf_bandwidth_range(Direction::Rx)?;
        let tx_lpf_range = driver.lpf_bandwidth_range(Direction::Tx)?;
        let sample_rate_range = driver.sample_rate_range()?;

        driver.set_sample_rate(config.initial_sample_rate, config.initial_oversample)?;

        tracing::debug!(
            num_rx = rx_channels.len(),
            num_tx = tx_channels.len(),
            "device opened"
        );

        let shared = Arc::new(Shared::new(rx_channels.len(), tx_channels.len()));

        Ok(Self {
            driver: Mutex::new(driver),
            description,
            hardware_info,
            rx_channels,
            tx_channels,
            sample_rate_range,
            rx_lpf_range,
            tx_lpf_range,
            config,
            sample_format: Mutex::new(config.sample_format),
            digital_filters: Mutex::new(HashMap::new()),
            shared,
            device_loop: tokio::sync::Mutex::new(None),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn hardware_info(&self) -> &HardwareInfo {
        &self.hardware_info
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rx_channels(&self) -> &[Channel] {
        &self.rx_channels
    }

    pub fn tx_channels(&self) -> &[Channel] {
        &self.tx_channels
    }

    pub fn channels(&self, direction: Direction) -> &[Channel] {
        match direction {
            Direction::Rx => &self.rx_channels,
            Direction::Tx => &self.tx_channels,
        }
    }

    pub fn rx_channel(&self, index: usize) -> Result<ChannelRef<'_, D>, Error> {
        Ok(ChannelRef::new(self, self.channel(Direction::Rx, index)?))
    }

    pub fn tx_channel(&self, index: usize) -> Result<ChannelRef<'_, D>, Error> {
        Ok(ChannelRef::new(self, self.channel(Direction::Tx, index)?))
    }

    pub fn sample_rate_range(&self) -> Range {
        self.sample_rate_range
    }

    pub fn lpf_bandwidth_range(&self, direction: Direction) -> Range {
        match direction {
            Direction::Rx => self.rx_lpf_range,
            Direction::Tx => self.tx_lpf_range,
        }
    }

    fn channel(&self, direction: Direction, index: usize) -> Result<&Channel, Error> {
        self.channels(direction)
            .get(index)
            .ok_or(Error::InvalidChannel {
                direction,
                channel: index,
            })
    }

    fn ensure_stopped(&self) -> Result<(), Error> {
        match *self.shared.run_state.lock() {
            RunState::Stopped => Ok(()),
            _ => Err(Error::DeviceRunning),
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.shared.run_state.lock()
    }

    /// Sets the function that receives decoded samples.
    ///
    /// It's called as `callback(samples, channel, timestamp)`. This can be
    /// changed while streaming, and takes effect with the next block.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&[Complex32], usize, u64) + Send + Sync + 'static,
    {
        *self.shared.callback.lock() = Some(Arc::new(callback));
    }

    /// Removes the callback. Blocks received without a callback are dropped.
    pub fn clear_callback(&self) {
        *self.shared.callback.lock() = None;
    }

    pub fn stream_state(
        &self,
        direction: Direction,
        channel: usize,
    ) -> Result<ChannelStreamState, Error> {
        self.channel(direction, channel)?;
        Ok(self
            .shared
            .streams
            .lock()
            .state(direction, channel)
            .unwrap_or_default())
    }

    /// Counters for every channel streamed during the current (or last) run.
    pub fn stream_stats(&self) -> BTreeMap<usize, StreamStats> {
        self.shared.stats.lock().clone()
    }

    pub fn sample_format(&self) -> SampleFormat {
        *self.sample_format.lock()
    }

    /// Changes the wire format, and re-provisions all existing streams with it.
    ///
    /// If the driver refuses one of the new streams, the streams changed so far
    /// are provisioned in the old format again and the format is kept.
    pub fn set_sample_format(&self, format: SampleFormat) -> Result<(), Error> {
        let mut streams = self.shared.streams.lock();
        self.ensure_stopped()?;

        let mut sample_format = self.sample_format.lock();
        let previous = *sample_format;

        let channels = [Direction::Rx, Direction::Tx]
            .into_iter()
            .flat_map(|direction| {
                streams
                    .provisioned(direction)
                    .into_iter()
                    .map(move |channel| (direction, channel))
            })
            .collect::<Vec<_>>();

        let mut driver = self.driver.lock();
        for (num_done, &(direction, channel)) in channels.iter().enumerate() {
            let result = provision(
                &mut streams,
                &mut *driver,
                &self.config,
                direction,
                channel,
                format,
            );

            if let Err(error) = result {
                tracing::error!(%direction, channel, ?error, "failed to re-provision stream. rolling back");
                for &(direction, channel) in &channels[..=num_done] {
                    if let Err(error) = provision(
                        &mut streams,
                        &mut *driver,
                        &self.config,
                        direction,
                        channel,
                        previous,
                    ) {
                        tracing::error!(%direction, channel, ?error, "failed to restore stream");
                    }
                }
                return Err(error);
            }
        }

        *sample_format = format;
        tracing::debug!(%format, "sample format changed");
        Ok(())
    }

    /// Enables a channel and provisions a stream for it.
    pub fn enable_channel(&self, direction: Direction, channel: usize) -> Result<(), Error> {
        self.channel(direction, channel)?;

        let mut streams = self.shared.streams.lock();
        self.ensure_stopped()?;

        let format = self.sample_format();
        let mut driver = self.driver.lock();
        driver.enable_channel(direction, channel, true)?;
        provision(
            &mut streams,
            &mut *driver,
            &self.config,
            direction,
            channel,
            format,
        )?;

        tracing::debug!(%direction, channel, %format, "channel enabled");
        Ok(())
    }

    /// Disables a channel and tears down its stream.
    pub fn disable_channel(&self, direction: Direction, channel: usize) -> Result<(), Error> {
        self.channel(direction, channel)?;

        let mut streams = self.shared.streams.lock();
        self.ensure_stopped()?;

        self.driver
            .lock()
            .enable_channel(direction, channel, false)?;
        drop(streams.replace(direction, channel, None));

        tracing::debug!(%direction, channel, "channel disabled");
        Ok(())
    }

    /// Starts streaming all enabled receive channels.
    ///
    /// This returns once every stream has started, or with the first error, in
    /// which case nothing is streaming. Starting a running device does
    /// nothing.
    pub async fn start(&self) -> Result<(), Error> {
        let mut device_loop = self.device_loop.lock().await;

        if let Some(running) = &*device_loop {
            if !running.is_finished() {
                tracing::warn!("device already running");
                return Ok(());
            }
            tracing::warn!("device loop died. restarting");
            *device_loop = None;
        }

        // from here on, channels can't be enabled or disabled
        self.shared.set_run_state(RunState::Running);

        let (new_loop, ready) = match DeviceLoop::spawn(self.shared.clone(), self.config) {
            Ok(spawned) => spawned,
            Err(error) => {
                self.shared.set_run_state(RunState::Stopped);
                return Err(error);
            }
        };

        match ready.await {
            Ok(Ok(())) => {
                *device_loop = Some(new_loop);
                tracing::debug!("device started");
                Ok(())
            }
            Ok(Err(error)) => Err(error),
            Err(_) => {
                self.shared.set_run_state(RunState::Stopped);
                Err(Error::DeviceLoopDead)
            }
        }
    }

    /// Stops streaming.
    ///
    /// Returns once all workers exited. No callback runs after this returns.
    /// Stopping a stopped device does nothing.
    pub async fn stop(&self) -> Result<(), Error> {
        let mut device_loop = self.device_loop.lock().await;

        let Some(running) = device_loop.take()
        else {
            tracing::warn!("device not running");
            return Ok(());
        };

        self.shared.set_run_state(RunState::Stopping);

        let result = running.shutdown().await;
        match &result {
            Ok(()) => tracing::debug!("device stopped"),
            Err(error) => {
                tracing::error!(?error, "device loop died");
                self.shared.set_run_state(RunState::Stopped);
            }
        }
        result
    }

    /// Stops streaming if necessary, and closes the device.
    pub async fn close(self) -> Result<(), Error> {
        if self.run_state() != RunState::Stopped {
            self.stop().await?;
        }
        Ok(())
    }

    pub fn set_sample_rate(&self, sample_rate: f64, oversample: u32) -> Result<(), Error> {
        self.driver.lock().set_sample_rate(sample_rate, oversample)
    }

    /// Returns host and RF sample rate.
    pub fn sample_rate(&self) -> Result<(f64, f64), Error> {
        self.driver.lock().sample_rate()
    }

    /// Chip temperature in °C
    pub fn temperature(&self) -> Result<f64, Error> {
        self.driver.lock().chip_temperature()
    }

    pub fn set_gain_db(&self, direction: Direction, channel: usize, gain: u32) -> Result<(), Error> {
        self.channel(direction, channel)?;
        self.driver.lock().set_gain_db(direction, channel, gain)
    }

    pub fn gain_db(&self, direction: Direction, channel: usize) -> Result<u32, Error> {
        self.channel(direction, channel)?;
        self.driver.lock().gain_db(direction, channel)
    }

    /// Sets the gain in the range `[0, 1]`.
    pub fn set_normalized_gain(
        &self,
        direction: Direction,
        channel: usize,
        gain: f64,
    ) -> Result<(), Error> {
        self.channel(direction, channel)?;
        self.driver
            .lock()
            .set_normalized_gain(direction, channel, gain)
    }

    pub fn normalized_gain(&self, direction: Direction, channel: usize) -> Result<f64, Error> {
        self.channel(direction, channel)?;
        self.driver.lock().normalized_gain(direction, channel)
    }

    pub fn set_lpf_bandwidth(
        &self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> Result<(), Error> {
        self.channel(direction, channel)?;
        self.driver
            .lock()
            .set_lpf_bandwidth(direction, channel, bandwidth)
    }

    pub fn lpf_bandwidth(&self, direction: Direction, channel: usize) -> Result<f64, Error> {
        self.channel(direction, channel)?;
        self.driver.lock().lpf_bandwidth(direction, channel)
    }

    pub fn enable_lpf(&self, direction: Direction, channel: usize) -> Result<(), Error> {
        self.channel(direction, channel)?;
        self.driver.lock().set_lpf(direction, channel, true)
    }

    pub fn disable_lpf(&self, direction: Direction, channel: usize) -> Result<(), Error> {
        self.channel(direction, channel)?;
        self.driver.lock().set_lpf(direction, channel, false)
    }

    /// Sets the bandwidth of the digital low pass filter.
    ///
    /// This replaces any taps set through [`Advanced`].
    pub fn set_digital_filter(
        &self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> Result<(), Error> {
        self.channel(direction, channel)?;
        if bandwidth <= 0.0 {
            return Err(Error::NoDigitalBandwidth { channel });
        }

        let mut filters = self.digital_filters.lock();
        let filter = filters.entry((direction, channel)).or_default();
        self.driver
            .lock()
            .set_gfir_lpf(direction, channel, filter.enabled, bandwidth)?;
        filter.bandwidth = bandwidth;
        filter.advanced = false;
        Ok(())
    }

    pub fn enable_digital_filter(&self, direction: Direction, channel: usize) -> Result<(), Error> {
        self.switch_digital_filter(direction, channel, true)
    }

    pub fn disable_digital_filter(
        &self,
        direction: Direction,
        channel: usize,
    ) -> Result<(), Error> {
        self.switch_digital_filter(direction, channel, false)
    }

    fn switch_digital_filter(
        &self,
        direction: Direction,
        channel: usize,
        enable: bool,
    ) -> Result<(), Error> {
        self.channel(direction, channel)?;

        let mut filters = self.digital_filters.lock();
        let filter = filters.entry((direction, channel)).or_default();
        if filter.advanced {
            return Err(Error::AdvancedFilteringActive { channel });
        }
        if enable && filter.bandwidth <= 0.0 {
            return Err(Error::NoDigitalBandwidth { channel });
        }

        self.driver
            .lock()
            .set_gfir_lpf(direction, channel, enable, filter.bandwidth)?;
        filter.enabled = enable;
        Ok(())
    }

    pub fn set_antenna(&self, direction: Direction, channel: usize, index: usize) -> Result<(), Error> {
        let antenna = self
            .channel(direction, channel)?
            .antennas
            .get(index)
            .ok_or_else(|| {
                Error::UnknownAntenna {
                    name: index.to_string(),
                }
            })?;
        self.select_antenna(direction, antenna)
    }

    /// Selects an antenna by its name, ignoring case.
    pub fn set_antenna_by_name(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<(), Error> {
        let antenna = self
            .channel(direction, channel)?
            .antenna_by_name(name)
            .ok_or_else(|| {
                Error::UnknownAntenna {
                    name: name.to_owned(),
                }
            })?;
        self.select_antenna(direction, antenna)
    }

    fn select_antenna(&self, direction: Direction, antenna: &Antenna) -> Result<(), Error> {
        self.driver
            .lock()
            .set_antenna(direction, antenna.channel, antenna.index)?;
        tracing::debug!(%direction, channel = antenna.channel, antenna = %antenna.name, "antenna selected");
        Ok(())
    }

    pub fn set_center_frequency(
        &self,
        direction: Direction,
        channel: usize,
        frequency: f64,
    ) -> Result<(), Error> {
        self.channel(direction, channel)?;
        self.driver
            .lock()
            .set_lo_frequency(direction, channel, frequency)
    }

    pub fn center_frequency(&self, direction: Direction, channel: usize) -> Result<f64, Error> {
        self.channel(direction, channel)?;
        self.driver.lock().lo_frequency(direction, channel)
    }

    /// Direct access to the GFIR filter blocks.
    pub fn advanced(&self) -> Advanced<'_, D> {
        Advanced { device: self }
    }
}

impl<D: Driver> Display for LimeSdr<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = &self.hardware_info;
        writeln!(f, "{}", self.description)?;
        writeln!(
            f,
            "  firmware {}, hardware {}, gateware {} ({}), serial {:x}",
            info.firmware_version,
            info.hardware_version,
            info.gateware_version,
            info.gateware_target_board,
            info.board_serial_number
        )?;
        writeln!(
            f,
            "  sample rate: {:.0} -> {:.0} Hz",
            self.sample_rate_range.min, self.sample_rate_range.max
        )?;
        for channel in self.rx_channels.iter().chain(&self.tx_channels) {
            write!(f, "{channel}")?;
        }
        Ok(())
    }
}

/// Manual control over the GFIR filters.
///
/// Setting taps here marks the channel as using advanced filtering. The simple
/// digital filter calls are rejected until a bandwidth is set again with
/// [`LimeSdr::set_digital_filter`].
#[derive(derive_more::Debug)]
pub struct Advanced<'a, D: Driver> {
    #[debug(skip)]
    device: &'a LimeSdr<D>,
}

impl<D: Driver> Advanced<'_, D> {
    pub fn set_gfir_coefficients(
        &self,
        gfir: GfirIndex,
        direction: Direction,
        channel: usize,
        taps: &[f64],
    ) -> Result<(), Error> {
        self.device.channel(direction, channel)?;

        let mut filters = self.device.digital_filters.lock();
        self.device
            .driver
            .lock()
            .set_gfir_coefficients(direction, channel, gfir, taps)?;
        filters.entry((direction, channel)).or_default().advanced = true;
        Ok(())
    }

    pub fn enable_gfir(
        &self,
        gfir: GfirIndex,
        direction: Direction,
        channel: usize,
    ) -> Result<(), Error> {
        self.device.channel(direction, channel)?;
        self.device
            .driver
            .lock()
            .set_gfir(direction, channel, gfir, true)
    }

    pub fn disable_gfir(
        &self,
        gfir: GfirIndex,
        direction: Direction,
        channel: usize,
    ) -> Result<(), Error> {
        self.device.channel(direction, channel)?;
        self.device
            .driver
            .lock()
            .set_gfir(direction, channel, gfir, false)
    }
}

fn load_channels<D: Driver>(driver: &mut D, direction: Direction) -> Result<Vec<Channel>, Error> {
    let num_channels = driver.num_channels(direction)?;

    (0..num_channels)
        .map(|index| {
            let antennas = driver
                .antennas(direction, index)?
                .into_iter()
                .enumerate()
                .map(|(antenna_index, antenna)| {
                    Antenna {
                        name: antenna.name,
                        channel: index,
                        index: antenna_index,
                        min_frequency: antenna.bandwidth.min,
                        max_frequency: antenna.bandwidth.max,
                        step: antenna.bandwidth.step,
                    }
                })
                .collect();

            Ok(Channel {
                index,
                direction,
                antennas,
            })
        })
        .collect()
}

/// Replaces the stream of a channel with a fresh one in `format`.
fn provision<D: Driver>(
    streams: &mut StreamTable<D::Stream>,
    driver: &mut D,
    config: &Config,
    direction: Direction,
    channel: usize,
    format: SampleFormat,
) -> Result<(), Error> {
    // the old stream must be gone before the driver sets up a new one
    drop(streams.replace(direction, channel, None));

    let stream = driver.setup_stream(&StreamConfig {
        channel,
        direction,
        format,
        fifo_size: config.fifo_size,
        throughput_vs_latency: config.throughput_vs_latency,
    })?;

    streams.replace(direction, channel, Some(ChannelStream { stream, format }));
    Ok(())
}
