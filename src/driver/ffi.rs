//! Raw declarations for the parts of `LimeSuite.h` we use.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::{
    c_char,
    c_int,
    c_uint,
    c_void,
};

use bytemuck::{
    Pod,
    Zeroable,
};

pub type float_type = f64;

/// `char[256]`: device identification string
pub type lms_info_str_t = [c_char; 256];

/// `char[16]`: antenna name
pub type lms_name_t = [c_char; 16];

/// opaque `lms_device_t`
pub type lms_device_t = c_void;

pub const LMS_CH_TX: bool = true;
pub const LMS_CH_RX: bool = false;

pub const LMS_FMT_F32: c_int = 0;
pub const LMS_FMT_I16: c_int = 1;
pub const LMS_FMT_I12: c_int = 2;

pub const LMS_LINK_FMT_DEFAULT: c_int = 0;

pub const LMS_GFIR1: c_int = 0;
pub const LMS_GFIR2: c_int = 1;
pub const LMS_GFIR3: c_int = 2;

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct lms_range_t {
    pub min: float_type,
    pub max: float_type,
    pub step: float_type,
}

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct lms_dev_info_t {
    pub deviceName: [u8; 32],
    pub expansionName: [u8; 32],
    pub firmwareVersion: [u8; 16],
    pub hardwareVersion: [u8; 16],
    pub protocolVersion: [u8; 16],
    pub boardSerialNumber: u64,
    pub gatewareVersion: [u8; 16],
    pub gatewareTargetBoard: [u8; 32],
}

/// Stream descriptor. LimeSuite writes `handle` during `LMS_SetupStream` and
/// keeps referring to this struct, so it must not move afterwards.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct lms_stream_t {
    pub handle: usize,
    pub isTx: bool,
    pub channel: u32,
    pub fifoSize: u32,
    pub throughputVsLatency: f32,
    pub dataFmt: c_int,
    pub linkFmt: c_int,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct lms_stream_meta_t {
    pub timestamp: u64,
    pub waitForTimestamp: bool,
    pub flushPartialPacket: bool,
}

#[link(name = "LimeSuite")]
unsafe extern "C" {
    pub fn LMS_GetDeviceList(dev_list: *mut lms_info_str_t) -> c_int;
    pub fn LMS_Open(
        device: *mut *mut lms_device_t,
        info: *const c_char,
        args: *mut c_void,
    ) -> c_int;
    pub fn LMS_Close(device: *mut lms_device_t) -> c_int;
    pub fn LMS_Init(device: *mut lms_device_t) -> c_int;
    pub fn LMS_Reset(device: *mut lms_device_t) -> c_int;
    pub fn LMS_GetDeviceInfo(device: *mut lms_device_t) -> *const lms_dev_info_t;
    pub fn LMS_GetLastErrorMessage() -> *const c_char;

    pub fn LMS_GetNumChannels(device: *mut lms_device_t, dir_tx: bool) -> c_int;
    pub fn LMS_EnableChannel(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        enabled: bool,
    ) -> c_int;

    pub fn LMS_SetSampleRate(
        device: *mut lms_device_t,
        rate: float_type,
        oversample: usize,
    ) -> c_int;
    pub fn LMS_GetSampleRate(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        host_Hz: *mut float_type,
        rf_Hz: *mut float_type,
    ) -> c_int;
    pub fn LMS_GetSampleRateRange(
        device: *mut lms_device_t,
        dir_tx: bool,
        range: *mut lms_range_t,
    ) -> c_int;

    pub fn LMS_SetLOFrequency(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        frequency: float_type,
    ) -> c_int;
    pub fn LMS_GetLOFrequency(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        frequency: *mut float_type,
    ) -> c_int;

    pub fn LMS_GetAntennaList(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        list: *mut lms_name_t,
    ) -> c_int;
    pub fn LMS_SetAntenna(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        index: usize,
    ) -> c_int;
    pub fn LMS_GetAntennaBW(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        index: usize,
        range: *mut lms_range_t,
    ) -> c_int;

    pub fn LMS_SetNormalizedGain(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        gain: float_type,
    ) -> c_int;
    pub fn LMS_GetNormalizedGain(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        gain: *mut float_type,
    ) -> c_int;
    pub fn LMS_SetGaindB(device: *mut lms_device_t, dir_tx: bool, chan: usize, gain: c_uint)
    -> c_int;
    pub fn LMS_GetGaindB(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        gain: *mut c_uint,
    ) -> c_int;

    pub fn LMS_SetLPFBW(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        bandwidth: float_type,
    ) -> c_int;
    pub fn LMS_GetLPFBW(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        bandwidth: *mut float_type,
    ) -> c_int;
    pub fn LMS_GetLPFBWRange(
        device: *mut lms_device_t,
        dir_tx: bool,
        range: *mut lms_range_t,
    ) -> c_int;
    pub fn LMS_SetLPF(device: *mut lms_device_t, dir_tx: bool, chan: usize, enable: bool)
    -> c_int;
    pub fn LMS_SetGFIRLPF(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        enabled: bool,
        bandwidth: float_type,
    ) -> c_int;
    pub fn LMS_SetGFIRCoeff(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        filt: c_int,
        coef: *const float_type,
        count: usize,
    ) -> c_int;
    pub fn LMS_SetGFIR(
        device: *mut lms_device_t,
        dir_tx: bool,
        chan: usize,
        filt: c_int,
        enabled: bool,
    ) -> c_int;

    pub fn LMS_GetChipTemperature(
        device: *mut lms_device_t,
        ind: usize,
        temp: *mut float_type,
    ) -> c_int;

    pub fn LMS_SetupStream(device: *mut lms_device_t, stream: *mut lms_stream_t) -> c_int;
    pub fn LMS_DestroyStream(device: *mut lms_device_t, stream: *mut lms_stream_t) -> c_int;
    pub fn LMS_StartStream(stream: *mut lms_stream_t) -> c_int;
    pub fn LMS_StopStream(stream: *mut lms_stream_t) -> c_int;
    pub fn LMS_RecvStream(
        stream: *mut lms_stream_t,
        samples: *mut c_void,
        sample_count: usize,
        meta: *mut lms_stream_meta_t,
        timeout_ms: c_uint,
    ) -> c_int;
}
