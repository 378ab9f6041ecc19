//! [`Driver`] implementation on top of the LimeSuite C library.

use std::{
    ffi::{
        CStr,
        c_char,
        c_int,
        c_uint,
        c_void,
    },
    ptr::null_mut,
    sync::Arc,
    time::Duration,
};

use bytemuck::Zeroable;

use super::{
    AntennaDescriptor,
    Direction,
    Driver,
    GfirIndex,
    Range,
    RecvResult,
    SampleStream,
    StreamConfig,
    ffi,
};
use crate::{
    Error,
    codec::SampleFormat,
    enumerate::{
        DeviceInfo,
        HardwareInfo,
        string_from_bytes,
    },
};

/// LimeSuite takes a `dir_tx` flag everywhere.
fn dir_tx(direction: Direction) -> bool {
    match direction {
        Direction::Rx => ffi::LMS_CH_RX,
        Direction::Tx => ffi::LMS_CH_TX,
    }
}

/// Enumerates devices through `LMS_GetDeviceList`.
pub(crate) fn device_list() -> Result<Vec<DeviceInfo>, Error> {
    let ret = unsafe { ffi::LMS_GetDeviceList(null_mut()) };
    tracing::debug!(ret, "LMS_GetDeviceList");
    let Ok(count) = usize::try_from(ret)
    else {
        return Err(Error::from_lib("LMS_GetDeviceList", "LimeSuite"));
    };
    if count == 0 {
        return Ok(vec![]);
    }

    let mut list: Vec<ffi::lms_info_str_t> = vec![[0; 256]; count];
    let ret = unsafe { ffi::LMS_GetDeviceList(list.as_mut_ptr()) };
    tracing::debug!(ret, "LMS_GetDeviceList");
    if ret < 0 {
        return Err(Error::from_lib("LMS_GetDeviceList", "LimeSuite"));
    }

    // the device count might have changed between the two calls
    let count = count.min(ret as usize);

    Ok(list[..count]
        .iter()
        .map(|info| DeviceInfo::parse(&string_from_bytes(bytemuck::cast_slice(info.as_slice()))))
        .collect())
}

/// Owns the native `lms_device_t`.
///
/// It's shared between the driver and all streams created from it, because
/// `LMS_DestroyStream` needs the device. The device is closed once the last of
/// them is dropped.
#[derive(Debug)]
struct RawDevice {
    device: *mut ffi::lms_device_t,
    description: String,
}

// LimeSuite's API is thread-safe for the calls we make, and all control calls
// go through the `LimeSdr`'s driver mutex anyway.
unsafe impl Send for RawDevice {}
unsafe impl Sync for RawDevice {}

impl RawDevice {
    fn check(&self, function: &'static str, ret: c_int) -> Result<(), Error> {
        if ret == 0 {
            Ok(())
        }
        else {
            Err(Error::from_lib(function, &self.description))
        }
    }
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        let ret = unsafe { ffi::LMS_Close(self.device) };
        tracing::debug!(ret, device = %self.description, "LMS_Close");
    }
}

/// A device opened through LimeSuite.
#[derive(Debug)]
pub struct LimeSuite {
    device: Arc<RawDevice>,
}

impl LimeSuite {
    /// Opens the device described by `info`.
    ///
    /// You usually want [`DeviceInfo::open`] instead, which also initializes
    /// the device.
    pub fn open(info: &DeviceInfo) -> Result<Self, Error> {
        let description = info.to_string();

        let mut info_str: ffi::lms_info_str_t = [0; 256];
        for (dst, src) in info_str
            .iter_mut()
            .zip(info.info_string().as_bytes().iter().take(255))
        {
            *dst = *src as c_char;
        }

        let mut device = null_mut();
        let ret = unsafe { ffi::LMS_Open(&mut device, info_str.as_ptr(), null_mut()) };
        tracing::debug!(ret, %description, "LMS_Open");
        if ret != 0 || device.is_null() {
            return Err(Error::from_lib("LMS_Open", &description));
        }

        Ok(Self {
            device: Arc::new(RawDevice {
                device,
                description,
            }),
        })
    }

    fn raw(&self) -> *mut ffi::lms_device_t {
        self.device.device
    }

    fn check(&self, function: &'static str, ret: c_int) -> Result<(), Error> {
        self.device.check(function, ret)
    }
}

impl Driver for LimeSuite {
    type Stream = LmsStream;

    fn describe(&self) -> String {
        self.device.description.clone()
    }

    fn reset(&mut self) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_Reset(self.raw()) };
        tracing::debug!(ret, "LMS_Reset");
        self.check("LMS_Reset", ret)
    }

    fn init(&mut self) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_Init(self.raw()) };
        tracing::debug!(ret, "LMS_Init");
        self.check("LMS_Init", ret)
    }

    fn hardware_info(&mut self) -> Result<HardwareInfo, Error> {
        let info = unsafe { ffi::LMS_GetDeviceInfo(self.raw()) };
        tracing::debug!(is_null = info.is_null(), "LMS_GetDeviceInfo");
        if info.is_null() {
            return Err(Error::from_lib("LMS_GetDeviceInfo", &self.device.description));
        }
        let info = unsafe { *info };

        Ok(HardwareInfo {
            device_name: string_from_bytes(&info.deviceName),
            expansion_name: string_from_bytes(&info.expansionName),
            firmware_version: string_from_bytes(&info.firmwareVersion),
            hardware_version: string_from_bytes(&info.hardwareVersion),
            protocol_version: string_from_bytes(&info.protocolVersion),
            board_serial_number: info.boardSerialNumber,
            gateware_version: string_from_bytes(&info.gatewareVersion),
            gateware_target_board: string_from_bytes(&info.gatewareTargetBoard),
        })
    }

    fn num_channels(&mut self, direction: Direction) -> Result<usize, Error> {
        let ret = unsafe { ffi::LMS_GetNumChannels(self.raw(), dir_tx(direction)) };
        tracing::debug!(ret, %direction, "LMS_GetNumChannels");
        usize::try_from(ret)
            .map_err(|_| Error::from_lib("LMS_GetNumChannels", &self.device.description))
    }

    fn antennas(
        &mut self,
        direction: Direction,
        channel: usize,
    ) -> Result<Vec<AntennaDescriptor>, Error> {
        let ret = unsafe {
            ffi::LMS_GetAntennaList(self.raw(), dir_tx(direction), channel, null_mut())
        };
        tracing::debug!(ret, %direction, channel, "LMS_GetAntennaList");
        let Ok(count) = usize::try_from(ret)
        else {
            return Err(Error::from_lib("LMS_GetAntennaList", &self.device.description));
        };

        let mut names: Vec<ffi::lms_name_t> = vec![[0; 16]; count];
        if count > 0 {
            let ret = unsafe {
                ffi::LMS_GetAntennaList(self.raw(), dir_tx(direction), channel, names.as_mut_ptr())
            };
            if ret < 0 {
                return Err(Error::from_lib("LMS_GetAntennaList", &self.device.description));
            }
        }

        names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let mut range = ffi::lms_range_t::zeroed();
                let ret = unsafe {
                    ffi::LMS_GetAntennaBW(
                        self.raw(),
                        dir_tx(direction),
                        channel,
                        index,
                        &mut range,
                    )
                };
                tracing::debug!(ret, %direction, channel, index, "LMS_GetAntennaBW");
                self.check("LMS_GetAntennaBW", ret)?;

                Ok(AntennaDescriptor {
                    name: string_from_bytes(bytemuck::cast_slice(name.as_slice())),
                    bandwidth: range.into(),
                })
            })
            .collect()
    }

    fn lpf_bandwidth_range(&mut self, direction: Direction) -> Result<Range, Error> {
        let mut range = ffi::lms_range_t::zeroed();
        let ret = unsafe { ffi::LMS_GetLPFBWRange(self.raw(), dir_tx(direction), &mut range) };
        tracing::debug!(ret, %direction, "LMS_GetLPFBWRange");
        self.check("LMS_GetLPFBWRange", ret)?;
        Ok(range.into())
    }

    fn sample_rate_range(&mut self) -> Result<Range, Error> {
        let mut range = ffi::lms_range_t::zeroed();
        let ret = unsafe { ffi::LMS_GetSampleRateRange(self.raw(), ffi::LMS_CH_RX, &mut range) };
        tracing::debug!(ret, "LMS_GetSampleRateRange");
        self.check("LMS_GetSampleRateRange", ret)?;
        Ok(range.into())
    }

    fn set_sample_rate(&mut self, sample_rate: f64, oversample: u32) -> Result<(), Error> {
        let ret =
            unsafe { ffi::LMS_SetSampleRate(self.raw(), sample_rate, oversample as usize) };
        tracing::debug!(ret, sample_rate, oversample, "LMS_SetSampleRate");
        self.check("LMS_SetSampleRate", ret)
    }

    fn sample_rate(&mut self) -> Result<(f64, f64), Error> {
        let mut host = 0.0;
        let mut rf = 0.0;
        let ret = unsafe {
            ffi::LMS_GetSampleRate(self.raw(), ffi::LMS_CH_RX, 0, &mut host, &mut rf)
        };
        tracing::debug!(ret, host, rf, "LMS_GetSampleRate");
        self.check("LMS_GetSampleRate", ret)?;
        Ok((host, rf))
    }

    fn enable_channel(
        &mut self,
        direction: Direction,
        channel: usize,
        enable: bool,
    ) -> Result<(), Error> {
        let ret =
            unsafe { ffi::LMS_EnableChannel(self.raw(), dir_tx(direction), channel, enable) };
        tracing::debug!(ret, %direction, channel, enable, "LMS_EnableChannel");
        self.check("LMS_EnableChannel", ret)
    }

    fn setup_stream(&mut self, config: &StreamConfig) -> Result<LmsStream, Error> {
        let channel = u32::try_from(config.channel).map_err(|_| {
            Error::InvalidChannel {
                direction: config.direction,
                channel: config.channel,
            }
        })?;

        let mut stream = Box::new(ffi::lms_stream_t {
            handle: 0,
            isTx: dir_tx(config.direction),
            channel,
            fifoSize: config.fifo_size,
            throughputVsLatency: config.throughput_vs_latency,
            dataFmt: match config.format {
                SampleFormat::Float32 => ffi::LMS_FMT_F32,
                SampleFormat::Int16 => ffi::LMS_FMT_I16,
                SampleFormat::Int12 => ffi::LMS_FMT_I12,
            },
            linkFmt: ffi::LMS_LINK_FMT_DEFAULT,
        });

        let ret = unsafe { ffi::LMS_SetupStream(self.raw(), &mut *stream) };
        tracing::debug!(ret, ?config, "LMS_SetupStream");
        self.check("LMS_SetupStream", ret)?;

        Ok(LmsStream {
            device: self.device.clone(),
            stream,
            running: false,
        })
    }

    fn set_gain_db(
        &mut self,
        direction: Direction,
        channel: usize,
        gain: u32,
    ) -> Result<(), Error> {
        let ret = unsafe {
            ffi::LMS_SetGaindB(self.raw(), dir_tx(direction), channel, gain as c_uint)
        };
        tracing::debug!(ret, %direction, channel, gain, "LMS_SetGaindB");
        self.check("LMS_SetGaindB", ret)
    }

    fn gain_db(&mut self, direction: Direction, channel: usize) -> Result<u32, Error> {
        let mut gain: c_uint = 0;
        let ret = unsafe { ffi::LMS_GetGaindB(self.raw(), dir_tx(direction), channel, &mut gain) };
        tracing::debug!(ret, %direction, channel, gain, "LMS_GetGaindB");
        self.check("LMS_GetGaindB", ret)?;
        Ok(gain)
    }

    fn set_normalized_gain(
        &mut self,
        direction: Direction,
        channel: usize,
        gain: f64,
    ) -> Result<(), Error> {
        let ret =
            unsafe { ffi::LMS_SetNormalizedGain(self.raw(), dir_tx(direction), channel, gain) };
        tracing::debug!(ret, %direction, channel, gain, "LMS_SetNormalizedGain");
        self.check("LMS_SetNormalizedGain", ret)
    }

    fn normalized_gain(&mut self, direction: Direction, channel: usize) -> Result<f64, Error> {
        let mut gain = 0.0;
        let ret = unsafe {
            ffi::LMS_GetNormalizedGain(self.raw(), dir_tx(direction), channel, &mut gain)
        };
        tracing::debug!(ret, %direction, channel, gain, "LMS_GetNormalizedGain");
        self.check("LMS_GetNormalizedGain", ret)?;
        Ok(gain)
    }

    fn set_lpf_bandwidth(
        &mut self,
        direction: Direction,
        channel: usize,
        bandwidth: f64,
    ) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_SetLPFBW(self.raw(), dir_tx(direction), channel, bandwidth) };
        tracing::debug!(ret, %direction, channel, bandwidth, "LMS_SetLPFBW");
        self.check("LMS_SetLPFBW", ret)
    }

    fn lpf_bandwidth(&mut self, direction: Direction, channel: usize) -> Result<f64, Error> {
        let mut bandwidth = 0.0;
        let ret =
            unsafe { ffi::LMS_GetLPFBW(self.raw(), dir_tx(direction), channel, &mut bandwidth) };
        tracing::debug!(ret, %direction, channel, bandwidth, "LMS_GetLPFBW");
        self.check("LMS_GetLPFBW", ret)?;
        Ok(bandwidth)
    }

    fn set_lpf(&mut self, direction: Direction, channel: usize, enable: bool) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_SetLPF(self.raw(), dir_tx(direction), channel, enable) };
        tracing::debug!(ret, %direction, channel, enable, "LMS_SetLPF");
        self.check("LMS_SetLPF", ret)
    }

    fn set_gfir_lpf(
        &mut self,
        direction: Direction,
        channel: usize,
        enable: bool,
        bandwidth: f64,
    ) -> Result<(), Error> {
        let ret = unsafe {
            ffi::LMS_SetGFIRLPF(self.raw(), dir_tx(direction), channel, enable, bandwidth)
        };
        tracing::debug!(ret, %direction, channel, enable, bandwidth, "LMS_SetGFIRLPF");
        self.check("LMS_SetGFIRLPF", ret)
    }

    fn set_gfir_coefficients(
        &mut self,
        direction: Direction,
        channel: usize,
        gfir: GfirIndex,
        taps: &[f64],
    ) -> Result<(), Error> {
        let ret = unsafe {
            ffi::LMS_SetGFIRCoeff(
                self.raw(),
                dir_tx(direction),
                channel,
                gfir_index(gfir),
                taps.as_ptr(),
                taps.len(),
            )
        };
        tracing::debug!(ret, %direction, channel, ?gfir, num_taps = taps.len(), "LMS_SetGFIRCoeff");
        self.check("LMS_SetGFIRCoeff", ret)
    }

    fn set_gfir(
        &mut self,
        direction: Direction,
        channel: usize,
        gfir: GfirIndex,
        enable: bool,
    ) -> Result<(), Error> {
        let ret = unsafe {
            ffi::LMS_SetGFIR(
                self.raw(),
                dir_tx(direction),
                channel,
                gfir_index(gfir),
                enable,
            )
        };
        tracing::debug!(ret, %direction, channel, ?gfir, enable, "LMS_SetGFIR");
        self.check("LMS_SetGFIR", ret)
    }

    fn set_antenna(
        &mut self,
        direction: Direction,
        channel: usize,
        antenna: usize,
    ) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_SetAntenna(self.raw(), dir_tx(direction), channel, antenna) };
        tracing::debug!(ret, %direction, channel, antenna, "LMS_SetAntenna");
        self.check("LMS_SetAntenna", ret)
    }

    fn set_lo_frequency(
        &mut self,
        direction: Direction,
        channel: usize,
        frequency: f64,
    ) -> Result<(), Error> {
        let ret =
            unsafe { ffi::LMS_SetLOFrequency(self.raw(), dir_tx(direction), channel, frequency) };
        tracing::debug!(ret, %direction, channel, frequency, "LMS_SetLOFrequency");
        self.check("LMS_SetLOFrequency", ret)
    }

    fn lo_frequency(&mut self, direction: Direction, channel: usize) -> Result<f64, Error> {
        let mut frequency = 0.0;
        let ret = unsafe {
            ffi::LMS_GetLOFrequency(self.raw(), dir_tx(direction), channel, &mut frequency)
        };
        tracing::debug!(ret, %direction, channel, frequency, "LMS_GetLOFrequency");
        self.check("LMS_GetLOFrequency", ret)?;
        Ok(frequency)
    }

    fn chip_temperature(&mut self) -> Result<f64, Error> {
        let mut temperature = 0.0;
        let ret = unsafe { ffi::LMS_GetChipTemperature(self.raw(), 0, &mut temperature) };
        tracing::debug!(ret, temperature, "LMS_GetChipTemperature");
        self.check("LMS_GetChipTemperature", ret)?;
        Ok(temperature)
    }
}

/// A stream set up with `LMS_SetupStream`. It's stopped and destroyed when
/// dropped.
#[derive(derive_more::Debug)]
pub struct LmsStream {
    #[debug(skip)]
    device: Arc<RawDevice>,
    stream: Box<ffi::lms_stream_t>,
    running: bool,
}

impl SampleStream for LmsStream {
    fn start(&mut self) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_StartStream(&mut *self.stream) };
        tracing::debug!(ret, channel = self.stream.channel, "LMS_StartStream");
        self.device.check("LMS_StartStream", ret)?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let ret = unsafe { ffi::LMS_StopStream(&mut *self.stream) };
        tracing::debug!(ret, channel = self.stream.channel, "LMS_StopStream");
        self.running = false;
        self.device.check("LMS_StopStream", ret)
    }

    fn recv(&mut self, buffer: &mut [u8], max_samples: usize, timeout: Duration) -> RecvResult {
        let mut meta = ffi::lms_stream_meta_t::default();
        let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);

        let status = unsafe {
            ffi::LMS_RecvStream(
                &mut *self.stream,
                buffer.as_mut_ptr() as *mut c_void,
                max_samples,
                &mut meta,
                timeout_ms,
            )
        };
        tracing::trace!(status, timestamp = meta.timestamp, "LMS_RecvStream");

        RecvResult {
            status,
            timestamp: meta.timestamp,
        }
    }
}

impl Drop for LmsStream {
    fn drop(&mut self) {
        if self.running {
            let ret = unsafe { ffi::LMS_StopStream(&mut *self.stream) };
            tracing::debug!(ret, channel = self.stream.channel, "LMS_StopStream");
        }
        let ret = unsafe { ffi::LMS_DestroyStream(self.device.device, &mut *self.stream) };
        tracing::debug!(ret, channel = self.stream.channel, "LMS_DestroyStream");
    }
}

impl From<ffi::lms_range_t> for Range {
    fn from(value: ffi::lms_range_t) -> Self {
        Self {
            min: value.min,
            max: value.max,
            step: value.step,
        }
    }
}

fn gfir_index(gfir: GfirIndex) -> c_int {
    match gfir {
        GfirIndex::Gfir1 => ffi::LMS_GFIR1,
        GfirIndex::Gfir2 => ffi::LMS_GFIR2,
        GfirIndex::Gfir3 => ffi::LMS_GFIR3,
    }
}

/// Last error message reported by LimeSuite.
pub(crate) fn last_error_message() -> String {
    let message = unsafe { ffi::LMS_GetLastErrorMessage() };
    if message.is_null() {
        String::new()
    }
    else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}
