use std::{
    error::Error,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use limesdr_async::{
    SampleFormat,
    devices,
};
use parking_lot::Mutex;

#[derive(Debug, Parser)]
struct Args {
    /// Index into the device list
    #[clap(short, long, env = "LIMESDR_DEVICE", default_value = "0")]
    device: usize,

    #[clap(short, long, env = "LIMESDR_FREQUENCY", default_value = "100000000")]
    frequency: f64,

    #[clap(short, long = "samplerate", env = "LIMESDR_SAMPLE_RATE", default_value = "2000000")]
    sample_rate: f64,

    #[clap(long, default_value = "LNAW")]
    antenna: String,

    /// Normalized gain, 0 to 1
    #[clap(short, long, default_value = "0.7")]
    gain: f64,

    /// Receive on both channels
    #[clap(long)]
    mimo: bool,

    /// Stream 32 bit floats instead of 16 bit integers
    #[clap(long)]
    float: bool,

    /// How long to stream, in seconds
    #[clap(short = 't', long, default_value = "5")]
    duration: u64,
}

#[derive(Clone, Debug, Default)]
struct Power {
    sum: f32,
    num_samples: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let devices = devices()?;
    for (index, info) in devices.iter().enumerate() {
        println!("{index}: {info}");
    }
    let info = devices
        .get(args.device)
        .ok_or_else(|| format!("no device with index {}", args.device))?;

    let device = info.open()?;
    println!("{device}");

    if args.float {
        device.set_sample_format(SampleFormat::Float32)?;
    }
    device.set_sample_rate(args.sample_rate, 4)?;

    let num_channels = if args.mimo {
        device.rx_channels().len().min(2)
    }
    else {
        1
    };

    for index in 0..num_channels {
        device
            .rx_channel(index)?
            .enable()?
            .set_antenna_by_name(&args.antenna)?
            .set_center_frequency(args.frequency)?
            .set_normalized_gain(args.gain)?
            .set_lpf(args.sample_rate)?
            .enable_lpf()?;
    }

    // this is really a measure of energy
    let power = Arc::new(Mutex::new(vec![Power::default(); num_channels]));
    let report_every = args.sample_rate as usize;

    device.set_callback({
        let power = power.clone();
        move |samples, channel, _timestamp| {
            let mut power = power.lock();
            let Some(power) = power.get_mut(channel)
            else {
                return;
            };

            for sample in samples {
                power.sum += sample.norm_sqr();
                power.num_samples += 1;

                if power.num_samples == report_every {
                    let db = 10.0 * (power.sum / power.num_samples as f32).log10();
                    println!("channel {channel}: {db:.4} dBFS");
                    *power = Power::default();
                }
            }
        }
    });

    device.start().await?;
    tokio::time::sleep(Duration::from_secs(args.duration)).await;
    device.stop().await?;

    for (channel, stats) in device.stream_stats() {
        println!(
            "channel {channel}: {} blocks, {} samples, {} read errors, {} decode errors",
            stats.blocks, stats.samples, stats.read_errors, stats.decode_errors
        );
    }

    device.close().await?;

    Ok(())
}
