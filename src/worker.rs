use std::thread;

use num_complex::Complex32;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    Config,
    Error,
    codec::{
        DecodeError,
        SampleFormat,
        decode_samples,
    },
    driver::SampleStream,
};

/// A block of decoded samples from one receive channel.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    /// Index of the channel the samples were received on.
    pub channel: usize,
    pub samples: Vec<Complex32>,
    /// Hardware timestamp of the first sample, as reported by the driver.
    pub timestamp: u64,
}

/// What a stream worker publishes to the device loop.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Block(SampleBlock),
    ReadError { channel: usize, status: i32 },
    DecodeError { channel: usize, error: DecodeError },
}

/// A stream handed to a worker together with the format it was provisioned
/// with.
#[derive(Debug)]
pub(crate) struct ChannelStream<S> {
    pub stream: S,
    pub format: SampleFormat,
}

/// Spawns a thread that drains `stream` until `stop` is cancelled.
///
/// The hardware stream must already be started. The worker stops it before
/// exiting, and hands it back through the join handle.
pub(crate) fn spawn_stream_worker<S: SampleStream>(
    channel: usize,
    stream: ChannelStream<S>,
    config: &Config,
    stop: CancellationToken,
    sink: mpsc::Sender<WorkerEvent>,
) -> Result<thread::JoinHandle<ChannelStream<S>>, Error> {
    let block_size = config.block_size;
    let read_timeout = config.read_timeout;

    thread::Builder::new()
        .name(format!("limesdr-rx-{channel}"))
        .spawn(move || {
            stream_worker(
                channel,
                stream,
                block_size,
                read_timeout,
                stop,
                sink,
            )
        })
        .map_err(Error::from_spawn)
}

fn stream_worker<S: SampleStream>(
    channel: usize,
    mut stream: ChannelStream<S>,
    block_size: usize,
    read_timeout: std::time::Duration,
    stop: CancellationToken,
    sink: mpsc::Sender<WorkerEvent>,
) -> ChannelStream<S> {
    let _guard = tracing::debug_span!("stream worker", channel).entered();

    // one block in this stream's format, as interleaved I/Q components
    let mut buffer = vec![0u8; stream.format.buffer_len(block_size)];

    tracing::debug!(format = %stream.format, block_size, "stream worker spawned");

    loop {
        if stop.is_cancelled() {
            tracing::debug!("stop requested. exiting");
            break;
        }

        let result = stream.stream.recv(&mut buffer, block_size, read_timeout);

        let event = match usize::try_from(result.status) {
            // timeout without data is normal
            Ok(0) => None,
            Ok(num_samples) => {
                match decode_samples(&buffer, stream.format, num_samples) {
                    Ok(samples) => {
                        Some(WorkerEvent::Block(SampleBlock {
                            channel,
                            samples,
                            timestamp: result.timestamp,
                        }))
                    }
                    Err(error) => Some(WorkerEvent::DecodeError { channel, error }),
                }
            }
            Err(_) => {
                Some(WorkerEvent::ReadError {
                    channel,
                    status: result.status,
                })
            }
        };

        if let Some(event) = event {
            // don't emit anything once we've been told to stop
            if stop.is_cancelled() {
                tracing::debug!("stop requested. exiting");
                break;
            }

            // this blocks while the device loop is busy with the callback
            if sink.blocking_send(event).is_err() {
                tracing::debug!("device loop gone. exiting");
                break;
            }
        }

        thread::yield_now();
    }

    if let Err(error) = stream.stream.stop() {
        tracing::warn!(?error, "failed to stop stream");
    }

    stream
}
