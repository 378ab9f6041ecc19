use std::{
    collections::BTreeMap,
    sync::Arc,
    thread,
};

use num_complex::Complex32;
use parking_lot::Mutex;
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::{
    Config,
    Error,
    codec::SampleFormat,
    device::{
        ChannelStreamState,
        RunState,
        StreamStats,
    },
    driver::{
        Direction,
        SampleStream,
    },
    worker::{
        ChannelStream,
        WorkerEvent,
        spawn_stream_worker,
    },
};

/// The sample callback: `(samples, channel, timestamp)`.
pub(crate) type Callback = Arc<dyn Fn(&[Complex32], usize, u64) + Send + Sync>;

/// Provisioned streams, indexed by channel.
#[derive(Debug)]
pub(crate) struct StreamTable<S> {
    rx: Vec<Slot<S>>,
    tx: Vec<Slot<S>>,
}

#[derive(Debug)]
enum Slot<S> {
    Empty,
    Idle(ChannelStream<S>),
    /// The stream is owned by its worker.
    Streaming(SampleFormat),
}

impl<S> StreamTable<S> {
    pub fn new(num_rx: usize, num_tx: usize) -> Self {
        Self {
            rx: std::iter::repeat_with(|| Slot::Empty).take(num_rx).collect(),
            tx: std::iter::repeat_with(|| Slot::Empty).take(num_tx).collect(),
        }
    }

    pub fn state(&self, direction: Direction, channel: usize) -> Option<ChannelStreamState> {
        let format = match self.slots(direction).get(channel)? {
            Slot::Empty => None,
            Slot::Idle(stream) => Some(stream.format),
            Slot::Streaming(format) => Some(*format),
        };
        Some(ChannelStreamState {
            provisioned: format.is_some(),
            format,
        })
    }

    /// Replaces the idle stream for a channel, returning the old one.
    ///
    /// Must not be used while the channel is streaming. Streams for channels
    /// that don't exist are handed back.
    pub fn replace(
        &mut self,
        direction: Direction,
        channel: usize,
        stream: Option<ChannelStream<S>>,
    ) -> Option<ChannelStream<S>> {
        let slots = match direction {
            Direction::Rx => &mut self.rx,
            Direction::Tx => &mut self.tx,
        };
        let Some(slot) = slots.get_mut(channel)
        else {
            return stream;
        };
        let new = stream.map_or(Slot::Empty, Slot::Idle);
        match std::mem::replace(slot, new) {
            Slot::Idle(old) => Some(old),
            Slot::Empty | Slot::Streaming(_) => None,
        }
    }

    /// Channels with a stream, in channel order.
    pub fn provisioned(&self, direction: Direction) -> Vec<usize> {
        self.slots(direction)
            .iter()
            .enumerate()
            .filter(|(_, slot)| !matches!(slot, Slot::Empty))
            .map(|(channel, _)| channel)
            .collect()
    }

    fn slots(&self, direction: Direction) -> &[Slot<S>] {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    /// Hands out all idle receive streams, leaving a marker with their format.
    fn take_rx(&mut self) -> Vec<(usize, ChannelStream<S>)> {
        let mut streams = vec![];
        for (channel, slot) in self.rx.iter_mut().enumerate() {
            if let Slot::Idle(stream) = slot {
                let format = stream.format;
                if let Slot::Idle(stream) = std::mem::replace(slot, Slot::Streaming(format)) {
                    streams.push((channel, stream));
                }
            }
        }
        streams
    }

    fn restore(&mut self, channel: usize, stream: ChannelStream<S>) {
        if let Some(slot) = self.rx.get_mut(channel) {
            *slot = Slot::Idle(stream);
        }
    }

    fn lost(&mut self, channel: usize) {
        if let Some(slot) = self.rx.get_mut(channel) {
            *slot = Slot::Empty;
        }
    }
}

/// State shared between the device handle and its device loop.
pub(crate) struct Shared<S> {
    pub streams: Mutex<StreamTable<S>>,
    pub callback: Mutex<Option<Callback>>,
    pub run_state: Mutex<RunState>,
    pub stats: Mutex<BTreeMap<usize, StreamStats>>,
}

impl<S> Shared<S> {
    pub fn new(num_rx: usize, num_tx: usize) -> Self {
        Self {
            streams: Mutex::new(StreamTable::new(num_rx, num_tx)),
            callback: Mutex::new(None),
            run_state: Mutex::new(RunState::Stopped),
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_run_state(&self, run_state: RunState) {
        *self.run_state.lock() = run_state;
    }

    fn restore(&self, streams: impl IntoIterator<Item = (usize, ChannelStream<S>)>) {
        let mut table = self.streams.lock();
        for (channel, stream) in streams {
            table.restore(channel, stream);
        }
    }
}

#[derive(Debug)]
enum LoopCommand {
    Shutdown {
        done: oneshot::Sender<()>,
        span: Span,
    },
}

/// Handle to a running device loop thread.
///
/// Dropping it closes the control channel, which makes the loop shut down on
/// its own.
#[derive(Debug)]
pub(crate) struct DeviceLoop {
    control: mpsc::Sender<LoopCommand>,
    thread: thread::JoinHandle<()>,
}

impl DeviceLoop {
    /// Spawns the device loop.
    ///
    /// The loop takes every provisioned receive stream out of the table, starts
    /// it and spawns a worker for it. The returned receiver resolves once that
    /// is done, or with the error that prevented it. On error all streams are
    /// back in the table and the run state is [`RunState::Stopped`].
    pub fn spawn<S: SampleStream>(
        shared: Arc<Shared<S>>,
        config: Config,
    ) -> Result<(Self, oneshot::Receiver<Result<(), Error>>), Error> {
        let (control_sender, control_receiver) = mpsc::channel(1);
        let (ready_sender, ready_receiver) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("limesdr-device-loop".to_owned())
            .spawn(move || {
                device_loop(shared, config, control_receiver, ready_sender);
            })
            .map_err(Error::from_spawn)?;

        Ok((
            Self {
                control: control_sender,
                thread,
            },
            ready_receiver,
        ))
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Asks the loop to stop and waits until every worker has exited.
    pub async fn shutdown(self) -> Result<(), Error> {
        let (done_sender, done_receiver) = oneshot::channel();
        self.control
            .send(LoopCommand::Shutdown {
                done: done_sender,
                span: Span::current(),
            })
            .await
            .map_err(|_| Error::DeviceLoopDead)?;
        done_receiver.await.map_err(|_| Error::DeviceLoopDead)
    }
}

struct Worker<S> {
    channel: usize,
    join_handle: thread::JoinHandle<ChannelStream<S>>,
}

fn device_loop<S: SampleStream>(
    shared: Arc<Shared<S>>,
    config: Config,
    mut control: mpsc::Receiver<LoopCommand>,
    ready: oneshot::Sender<Result<(), Error>>,
) {
    let _guard = tracing::debug_span!("device loop").entered();

    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(?error, "failed to build runtime");
            shared.set_run_state(RunState::Stopped);
            let _ = ready.send(Err(Error::from_spawn(error)));
            return;
        }
    };

    let streams = shared.streams.lock().take_rx();

    {
        let mut stats = shared.stats.lock();
        stats.clear();
        for (channel, _) in &streams {
            stats.insert(*channel, StreamStats::default());
        }
    }

    // start all hardware streams, rolling back if one of them fails.
    let mut started = Vec::with_capacity(streams.len());
    let mut pending = streams.into_iter();
    while let Some((channel, mut stream)) = pending.next() {
        tracing::debug!(channel, format = %stream.format, "starting stream");

        if let Err(error) = stream.stream.start() {
            tracing::error!(channel, ?error, "failed to start stream");
            stop_streams(&mut started);
            shared.restore(started);
            shared.restore(std::iter::once((channel, stream)));
            shared.restore(pending.by_ref());
            shared.set_run_state(RunState::Stopped);
            let _ = ready.send(Err(error));
            return;
        }

        started.push((channel, stream));
    }

    let (event_sender, events) = mpsc::channel(1);
    let mut pipeline = Pipeline {
        shared: &shared,
        stop: CancellationToken::new(),
        events,
        workers: Vec::with_capacity(started.len()),
    };
    let mut started = started.into_iter();
    let mut spawn_error = None;

    for (channel, stream) in started.by_ref() {
        match spawn_stream_worker(
            channel,
            stream,
            &config,
            pipeline.stop.child_token(),
            event_sender.clone(),
        ) {
            Ok(join_handle) => {
                pipeline.workers.push(Worker {
                    channel,
                    join_handle,
                })
            }
            Err(error) => {
                // the stream went down with the thread closure
                tracing::error!(channel, ?error, "failed to spawn stream worker. stream lost");
                spawn_error = Some(error);
                break;
            }
        }
    }

    // only the workers hold senders now, so the event channel closes once all of
    // them are gone.
    drop(event_sender);

    if let Some(error) = spawn_error {
        let mut remaining = started.collect::<Vec<_>>();
        stop_streams(&mut remaining);
        shared.restore(remaining);
        drop(pipeline);
        let _ = ready.send(Err(error));
        return;
    }

    tracing::debug!(num_workers = pipeline.workers.len(), "device loop running");
    let _ = ready.send(Ok(()));

    // a panicking callback unwinds out of here, and dropping the pipeline on the
    // way out still stops the workers.
    let shutdown = runtime.block_on(async {
        let mut workers_alive = !pipeline.workers.is_empty();

        loop {
            tokio::select! {
                biased;
                command = control.recv() => {
                    match command {
                        Some(LoopCommand::Shutdown { done, span }) => break Some((done, span)),
                        None => break None,
                    }
                }
                event = pipeline.events.recv(), if workers_alive => {
                    match event {
                        Some(event) => dispatch(&shared, event),
                        None => {
                            tracing::error!("all stream workers exited");
                            workers_alive = false;
                        }
                    }
                }
            }
        }
    });

    let (done, span) = match shutdown {
        Some((done, span)) => (Some(done), span),
        None => {
            tracing::debug!("device handle dropped");
            (None, Span::none())
        }
    };

    {
        let _guard = span.enter();
        tracing::debug!("shutting down");
        shared.set_run_state(RunState::Stopping);
        drop(pipeline);
    }

    // if the handle is gone, this releases the streams
    drop(shared);

    if let Some(done) = done {
        let _ = done.send(());
    }
}

/// The running workers and their fan-in.
///
/// Dropping it shuts the workers down and leaves the device stopped, also when
/// the loop thread unwinds.
struct Pipeline<'a, S: SampleStream> {
    shared: &'a Shared<S>,
    stop: CancellationToken,
    events: mpsc::Receiver<WorkerEvent>,
    workers: Vec<Worker<S>>,
}

impl<S: SampleStream> Drop for Pipeline<'_, S> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("device loop panicked. stopping stream workers");
        }
        shut_down(
            self.shared,
            &self.stop,
            &mut self.events,
            std::mem::take(&mut self.workers),
        );
        self.shared.set_run_state(RunState::Stopped);
    }
}

fn dispatch<S>(shared: &Shared<S>, event: WorkerEvent) {
    match event {
        WorkerEvent::Block(block) => {
            if let Some(stats) = shared.stats.lock().get_mut(&block.channel) {
                stats.blocks += 1;
                stats.samples += block.samples.len() as u64;
            }

            // no lock may be held while the callback runs
            let callback = shared.callback.lock().clone();
            match callback {
                Some(callback) => callback(&block.samples, block.channel, block.timestamp),
                None => {
                    tracing::trace!(channel = block.channel, "no callback set. dropping block")
                }
            }
        }
        WorkerEvent::ReadError { channel, status } => {
            tracing::warn!(channel, status, "error receiving samples");
            if let Some(stats) = shared.stats.lock().get_mut(&channel) {
                stats.read_errors += 1;
            }
        }
        WorkerEvent::DecodeError { channel, error } => {
            tracing::error!(channel, ?error, "failed to decode samples");
            if let Some(stats) = shared.stats.lock().get_mut(&channel) {
                stats.decode_errors += 1;
            }
        }
    }
}

/// Cancels all workers, waits for them to exit and puts their streams back.
fn shut_down<S: SampleStream>(
    shared: &Shared<S>,
    stop: &CancellationToken,
    events: &mut mpsc::Receiver<WorkerEvent>,
    workers: Vec<Worker<S>>,
) {
    stop.cancel();

    // a worker might be blocked on sending to us, so keep draining until all of
    // them hung up.
    let mut discarded = 0usize;
    while events.blocking_recv().is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        tracing::debug!(discarded, "discarded events after stop");
    }

    let mut restored = Vec::with_capacity(workers.len());
    for worker in workers {
        match worker.join_handle.join() {
            Ok(stream) => restored.push((worker.channel, stream)),
            Err(_) => {
                tracing::error!(channel = worker.channel, "stream worker panicked. stream lost");
                shared.streams.lock().lost(worker.channel);
            }
        }
    }

    shared.restore(restored);
}

fn stop_streams<S: SampleStream>(streams: &mut [(usize, ChannelStream<S>)]) {
    for (channel, stream) in streams {
        if let Err(error) = stream.stream.stop() {
            tracing::warn!(channel = *channel, ?error, "failed to stop stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StreamTable;
    use crate::{
        ChannelStreamState,
        codec::SampleFormat,
        driver::Direction,
        worker::ChannelStream,
    };

    fn stream(id: u8, format: SampleFormat) -> ChannelStream<u8> {
        ChannelStream { stream: id, format }
    }

    #[test]
    fn replace_returns_the_previous_stream() {
        let mut table = StreamTable::new(2, 1);
        assert!(
            table
                .replace(Direction::Rx, 1, Some(stream(1, SampleFormat::Int16)))
                .is_none()
        );
        let old = table
            .replace(Direction::Rx, 1, Some(stream(2, SampleFormat::Float32)))
            .unwrap();
        assert_eq!(old.stream, 1);
        assert_eq!(
            table.state(Direction::Rx, 1),
            Some(ChannelStreamState {
                provisioned: true,
                format: Some(SampleFormat::Float32)
            })
        );
        assert_eq!(
            table.state(Direction::Tx, 0),
            Some(ChannelStreamState::default())
        );
    }

    #[test]
    fn out_of_range_channels_are_not_stored() {
        let mut table = StreamTable::<u8>::new(1, 0);
        let rejected = table
            .replace(Direction::Tx, 0, Some(stream(7, SampleFormat::Int16)))
            .unwrap();
        assert_eq!(rejected.stream, 7);
        assert!(table.state(Direction::Rx, 5).is_none());
    }

    #[test]
    fn streaming_channels_stay_provisioned() {
        let mut table = StreamTable::new(3, 1);
        table.replace(Direction::Rx, 0, Some(stream(0, SampleFormat::Int16)));
        table.replace(Direction::Rx, 2, Some(stream(2, SampleFormat::Int12)));
        table.replace(Direction::Tx, 0, Some(stream(9, SampleFormat::Int16)));

        let taken = table.take_rx();
        assert_eq!(
            taken.iter().map(|(channel, _)| *channel).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(table.provisioned(Direction::Rx), vec![0, 2]);
        assert_eq!(
            table.state(Direction::Rx, 2).unwrap().format,
            Some(SampleFormat::Int12)
        );
        assert!(table.take_rx().is_empty());

        let mut taken = taken.into_iter();
        let (channel, stream) = taken.next().unwrap();
        table.restore(channel, stream);
        table.lost(2);
        assert_eq!(table.provisioned(Direction::Rx), vec![0]);
        assert_eq!(table.take_rx().len(), 1);
    }
}
