use std::fmt::Display;

use crate::{
    ChannelStreamState,
    Error,
    LimeSdr,
    driver::{
        Direction,
        Driver,
    },
};

/// An RF port of a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Antenna {
    pub name: String,
    /// Index of the channel this antenna belongs to.
    pub channel: usize,
    /// Index of the antenna in the channel's antenna list. This is what the
    /// driver uses to select it.
    pub index: usize,
    pub min_frequency: f64,
    pub max_frequency: f64,
    pub step: f64,
}

impl Display for Antenna {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:>4}: {:14.0} -> {:14.0} Hz",
            self.name, self.min_frequency, self.max_frequency
        )
    }
}

/// Static description of a channel, loaded when the device is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub index: usize,
    pub direction: Direction,
    pub antennas: Vec<Antenna>,
}

impl Channel {
    /// Finds an antenna by name, ignoring case.
    pub fn antenna_by_name(&self, name: &str) -> Option<&Antenna> {
        self.antennas
            .iter()
            .find(|antenna| antenna.name.eq_ignore_ascii_case(name))
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} channel {}", self.direction, self.index)?;
        for antenna in &self.antennas {
            writeln!(f, "  {antenna}")?;
        }
        Ok(())
    }
}

/// A channel of an open device.
///
/// Setters return the reference again, so calls can be chained:
///
/// ```ignore
/// device.rx_channel(0)?
///     .enable()?
///     .set_antenna_by_name("LNAW")?
///     .set_gain_db(40)?;
/// ```
#[derive(derive_more::Debug)]
pub struct ChannelRef<'a, D: Driver> {
    #[debug(skip)]
    device: &'a LimeSdr<D>,
    channel: &'a Channel,
}

impl<D: Driver> Clone for ChannelRef<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Driver> Copy for ChannelRef<'_, D> {}

impl<'a, D: Driver> ChannelRef<'a, D> {
    pub(crate) fn new(device: &'a LimeSdr<D>, channel: &'a Channel) -> Self {
        Self { device, channel }
    }

    pub fn index(&self) -> usize {
        self.channel.index
    }

    pub fn direction(&self) -> Direction {
        self.channel.direction
    }

    pub fn info(&self) -> &'a Channel {
        self.channel
    }

    pub fn antennas(&self) -> &'a [Antenna] {
        &self.channel.antennas
    }

    pub fn stream_state(&self) -> ChannelStreamState {
        self.device
            .stream_state(self.direction(), self.index())
            .unwrap_or_default()
    }

    /// Enables the channel and provisions its stream.
    pub fn enable(self) -> Result<Self, Error> {
        self.device.enable_channel(self.direction(), self.index())?;
        Ok(self)
    }

    pub fn disable(self) -> Result<Self, Error> {
        self.device.disable_channel(self.direction(), self.index())?;
        Ok(self)
    }

    pub fn set_gain_db(self, gain: u32) -> Result<Self, Error> {
        self.device
            .set_gain_db(self.direction(), self.index(), gain)?;
        Ok(self)
    }

    pub fn gain_db(&self) -> Result<u32, Error> {
        self.device.gain_db(self.direction(), self.index())
    }

    pub fn set_normalized_gain(self, gain: f64) -> Result<Self, Error> {
        self.device
            .set_normalized_gain(self.direction(), self.index(), gain)?;
        Ok(self)
    }

    pub fn normalized_gain(&self) -> Result<f64, Error> {
        self.device.normalized_gain(self.direction(), self.index())
    }

    /// Sets the analog low pass filter bandwidth.
    pub fn set_lpf(self, bandwidth: f64) -> Result<Self, Error> {
        self.device
            .set_lpf_bandwidth(self.direction(), self.index(), bandwidth)?;
        Ok(self)
    }

    pub fn lpf(&self) -> Result<f64, Error> {
        self.device.lpf_bandwidth(self.direction(), self.index())
    }

    pub fn enable_lpf(self) -> Result<Self, Error> {
        self.device.enable_lpf(self.direction(), self.index())?;
        Ok(self)
    }

    pub fn disable_lpf(self) -> Result<Self, Error> {
        self.device.disable_lpf(self.direction(), self.index())?;
        Ok(self)
    }

    /// Sets the bandwidth of the digital (GFIR) low pass filter.
    pub fn set_digital_lpf(self, bandwidth: f64) -> Result<Self, Error> {
        self.device
            .set_digital_filter(self.direction(), self.index(), bandwidth)?;
        Ok(self)
    }

    pub fn enable_digital_lpf(self) -> Result<Self, Error> {
        self.device
            .enable_digital_filter(self.direction(), self.index())?;
        Ok(self)
    }

    pub fn disable_digital_lpf(self) -> Result<Self, Error> {
        self.device
            .disable_digital_filter(self.direction(), self.index())?;
        Ok(self)
    }

    pub fn set_antenna(self, index: usize) -> Result<Self, Error> {
        self.device
            .set_antenna(self.direction(), self.index(), index)?;
        Ok(self)
    }

    pub fn set_antenna_by_name(self, name: &str) -> Result<Self, Error> {
        self.device
            .set_antenna_by_name(self.direction(), self.index(), name)?;
        Ok(self)
    }

    pub fn set_center_frequency(self, frequency: f64) -> Result<Self, Error> {
        self.device
            .set_center_frequency(self.direction(), self.index(), frequency)?;
        Ok(self)
    }

    pub fn center_frequency(&self) -> Result<f64, Error> {
        self.device
            .center_frequency(self.direction(), self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Antenna,
        Channel,
    };
    use crate::driver::Direction;

    fn antenna(name: &str, index: usize) -> Antenna {
        Antenna {
            name: name.to_owned(),
            channel: 0,
            index,
            min_frequency: 700e6,
            max_frequency: 2.6e9,
            step: 1.0,
        }
    }

    #[test]
    fn antenna_lookup_ignores_case() {
        let channel = Channel {
            index: 0,
            direction: Direction::Rx,
            antennas: vec![antenna("NONE", 0), antenna("LNAW", 3)],
        };
        assert_eq!(channel.antenna_by_name("lnaw").unwrap().index, 3);
        assert_eq!(channel.antenna_by_name("LnAw").unwrap().index, 3);
        assert!(channel.antenna_by_name("LNAX").is_none());
    }

    #[test]
    fn antennas_display_their_range() {
        assert_eq!(
            antenna("LNAW", 3).to_string(),
            "LNAW:      700000000 ->     2600000000 Hz"
        );
        assert_eq!(
            antenna("NA", 0).to_string(),
            "  NA:      700000000 ->     2600000000 Hz"
        );
    }
}
