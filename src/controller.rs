use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::board::ChannelLayout;
use crate::config::{ConfigError, SessionConfig};
use crate::link::{DeviceLink, FramingError, LinkError};
use crate::sample::{ConvertedSample, Sample};
use crate::sink::{Sink, SinkError, SinkFailure};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl State {
    fn to_u8(self) -> u8 {
        match self {
            State::Idle => 0,
            State::Running => 1,
            State::Stopping => 2,
            State::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Idle,
            1 => State::Running,
            2 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `max_sample_count` samples were collected.
    MaxCount,
    /// `stop_collection` was called.
    Requested,
    /// The session timeout elapsed.
    Deadline,
    /// The transport went away; the session could not continue.
    LinkLost(String),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("sampling already ran on this controller, build a new one per session")]
    AlreadyRun,
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub collected: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct SessionReport {
    pub collected: u64,
    pub dropped: u64,
    pub reason: StopReason,
    pub sink_failures: Vec<SinkFailure>,
    pub elapsed: Duration,
}

impl SessionReport {
    /// The session ended by count, deadline or request rather than a lost link.
    pub fn is_clean(&self) -> bool {
        !matches!(self.reason, StopReason::LinkLost(_))
    }

    pub fn summary(&self) -> String {
        format!(
            "Collected {} samples with {} dropped",
            self.collected, self.dropped
        )
    }
}

/// State shared between the sampling thread and whoever controls it.
#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    stop_requested: AtomicBool,
    collected: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn counters(&self) -> Counters {
        Counters {
            collected: self.collected.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
        }
    }
}

/// Cloneable, thread-safe handle to stop a session and watch its progress.
///
/// A handle belongs to exactly one controller; stopping it never affects a
/// later session, so any timer or signal handler holding it can fire late
/// without harm.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    shared: Arc<Shared>,
}

impl ControllerHandle {
    /// Asks the sampling loop to stop at its next iteration boundary.
    ///
    /// Safe from any thread, at any time; repeated calls and calls after the
    /// loop has finished do nothing.
    pub fn stop_collection(&self) {
        if self.shared.stop_requested.swap(true, Ordering::AcqRel) {
            log::debug!("stop already requested");
            return;
        }

        match self.shared.state.compare_exchange(
            State::Running.to_u8(),
            State::Stopping.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => log::info!("stop requested, waiting for the sampling loop"),
            Err(current) => log::debug!(
                "stop requested in state {:?}",
                State::from_u8(current)
            ),
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn counters(&self) -> Counters {
        self.shared.counters()
    }
}

struct SinkSlot {
    sink: Box<dyn Sink>,
    failed_writes: u64,
    first_error: Option<SinkError>,
}

/// Runs one sampling session: reads samples from the link, converts them and
/// fans them out to every sink in order.
pub struct Controller<L> {
    link: L,
    config: SessionConfig,
    layout: ChannelLayout,
    sinks: Vec<SinkSlot>,
    shared: Arc<Shared>,
    fatal_error: Option<LinkError>,
}

pub struct ControllerBuilder<L> {
    link: L,
    config: SessionConfig,
    layout: Option<ChannelLayout>,
    sinks: Vec<Box<dyn Sink>>,
}

impl<L: DeviceLink> ControllerBuilder<L> {
    pub fn layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Adds a sink. Sinks are expected to be open already and are written in
    /// the order they were added.
    pub fn sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(mut self, sinks: impl IntoIterator<Item = Box<dyn Sink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    pub fn build(self) -> Result<Controller<L>, ConfigError> {
        let layout = self.layout.ok_or(ConfigError::ZeroWidth)?;
        if layout.width == 0 {
            return Err(ConfigError::ZeroWidth);
        }
        if self.sinks.is_empty() {
            return Err(ConfigError::NoSinks);
        }

        if self.config.is_unbounded() {
            log::info!("no sample count or timeout set, sampling until stopped");
        }

        let sinks = self
            .sinks
            .into_iter()
            .map(|sink| SinkSlot {
                sink,
                failed_writes: 0,
                first_error: None,
            })
            .collect();

        Ok(Controller {
            link: self.link,
            config: self.config,
            layout,
            sinks,
            shared: Arc::new(Shared::default()),
            fatal_error: None,
        })
    }
}

impl<L: DeviceLink> Controller<L> {
    pub fn builder(link: L, config: SessionConfig) -> ControllerBuilder<L> {
        ControllerBuilder {
            link,
            config,
            layout: None,
            sinks: Vec::new(),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn stop_collection(&self) {
        self.handle().stop_collection();
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn counters(&self) -> Counters {
        self.shared.counters()
    }

    pub fn sample_count(&self) -> u64 {
        self.shared.collected.load(Ordering::Acquire)
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    /// The transport error that ended the session, if it did not end cleanly.
    pub fn fatal_error(&self) -> Option<&LinkError> {
        self.fatal_error.as_ref()
    }

    /// Hands the sinks back so the caller can close them.
    pub fn into_sinks(self) -> Vec<Box<dyn Sink>> {
        self.sinks.into_iter().map(|slot| slot.sink).collect()
    }

    /// Runs the sampling loop until the sample count is reached, the timeout
    /// elapses, a stop is requested or the link is lost.
    ///
    /// Blocks the calling thread; see [`crate::SamplingSession`] for running it
    /// on a dedicated one. Only one run per controller is allowed.
    pub fn collect_samples(&mut self) -> Result<SessionReport, ControllerError> {
        if self
            .shared
            .state
            .compare_exchange(
                State::Idle.to_u8(),
                State::Running.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ControllerError::AlreadyRun);
        }

        log::info!(
            "sampling {} channels from {} (max count {}, timeout {:?})",
            self.layout.width,
            self.config.port,
            self.config.max_sample_count,
            self.config.timeout
        );

        let started_at = Instant::now();

        let reason = match self.link.start_streaming() {
            Ok(()) => self.sampling_loop(started_at),
            Err(err) => self.lose_link(err),
        };

        if !matches!(reason, StopReason::LinkLost(_)) {
            if let Err(err) = self.link.stop_streaming() {
                log::warn!("failed to stop board streaming: {}", err);
            }
        }

        self.shared
            .state
            .store(State::Stopped.to_u8(), Ordering::Release);

        let counters = self.counters();
        log::info!(
            "sampling stopped ({:?}): {} collected, {} dropped",
            reason,
            counters.collected,
            counters.dropped
        );

        let sink_failures = self
            .sinks
            .iter_mut()
            .filter_map(|slot| {
                slot.first_error.take().map(|first_error| SinkFailure {
                    sink: slot.sink.name().to_string(),
                    failed_writes: slot.failed_writes,
                    first_error,
                })
            })
            .collect();

        Ok(SessionReport {
            collected: counters.collected,
            dropped: counters.dropped,
            reason,
            sink_failures,
            elapsed: started_at.elapsed(),
        })
    }

    fn sampling_loop(&mut self, started_at: Instant) -> StopReason {
        let deadline = self.config.timeout.map(|timeout| started_at + timeout);

        let mut rate_measured_at = Instant::now();
        let mut rate_samples = 0u64;

        loop {
            if let Some(reason) = self.stop_condition(deadline) {
                return reason;
            }

            let read_timeout = match deadline {
                Some(deadline) => self
                    .config
                    .read_timeout
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.config.read_timeout,
            };

            match self.link.read_next_sample(read_timeout) {
                Ok(sample) => {
                    if self.accept(sample) {
                        rate_samples += 1;
                    }
                }
                Err(LinkError::Timeout) => {}
                Err(LinkError::Framing(err)) => self.drop_frame(err),
                Err(err) => return self.lose_link(err),
            }

            let now = Instant::now();
            if now - rate_measured_at >= Duration::from_secs(1) {
                let rate = rate_samples as f64 / (now - rate_measured_at).as_secs_f64();
                log::debug!("measured rate {} samples/s", rate.round() as i64);

                rate_samples = 0;
                rate_measured_at = now;
            }
        }
    }

    fn stop_condition(&self, deadline: Option<Instant>) -> Option<StopReason> {
        let max_count = self.config.max_sample_count;

        if max_count > 0 && self.sample_count() >= max_count {
            Some(StopReason::MaxCount)
        } else if self.shared.stop_requested.load(Ordering::Acquire) {
            Some(StopReason::Requested)
        } else if matches!(deadline, Some(deadline) if Instant::now() >= deadline) {
            Some(StopReason::Deadline)
        } else {
            None
        }
    }

    /// Converts and delivers a sample, or drops it if its width is wrong.
    fn accept(&mut self, sample: Sample) -> bool {
        if sample.width() != self.layout.width {
            self.drop_frame(FramingError::WidthMismatch {
                expected: self.layout.width,
                actual: sample.width(),
            });
            return false;
        }

        let converted = self.layout.converter.convert(&sample);
        self.fan_out(&converted);

        self.shared.collected.fetch_add(1, Ordering::AcqRel);
        log::trace!("collected sample at {}", sample.timestamp());

        true
    }

    fn fan_out(&mut self, converted: &ConvertedSample) {
        for slot in self.sinks.iter_mut() {
            if let Err(err) = slot.sink.write(converted) {
                slot.failed_writes += 1;

                if slot.first_error.is_none() {
                    log::warn!("sink {} failed to write: {}", slot.sink.name(), err);
                    slot.first_error = Some(err);
                } else {
                    log::trace!("sink {} failed to write: {}", slot.sink.name(), err);
                }
            }
        }
    }

    fn drop_frame(&self, err: FramingError) {
        log::warn!("dropping frame: {}", err);
        self.shared.dropped.fetch_add(1, Ordering::AcqRel);
    }

    fn lose_link(&mut self, err: LinkError) -> StopReason {
        log::error!("device link lost: {}", err);

        let reason = StopReason::LinkLost(err.to_string());
        self.fatal_error = Some(err);
        reason
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::converter::Converter;
    use crate::link::mock::MockTransport;
    use crate::link::protocol::{self, Command};
    use crate::link::BoardLink;
    use crate::sink::MemorySink;
    use crate::testing::FailingSink;

    fn layout(width: usize) -> ChannelLayout {
        ChannelLayout {
            width,
            converter: Converter::NoConversion,
        }
    }

    fn frames(transport: &MockTransport, values: impl IntoIterator<Item = Vec<i16>>) {
        for channels in values {
            transport.inject_read(&protocol::build_data_frame(&channels));
        }
    }

    fn corrupted_frame(channels: &[i16]) -> Vec<u8> {
        let mut bytes = protocol::build_data_frame(channels);
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        bytes
    }

    fn build_controller(
        transport: &MockTransport,
        config: SessionConfig,
        width: usize,
    ) -> (Controller<BoardLink<MockTransport>>, crate::sink::MemorySinkHandle) {
        let mut sink = MemorySink::new("mem");
        sink.open().unwrap();
        let handle = sink.handle();

        let controller = Controller::builder(BoardLink::new(transport.clone()), config)
            .layout(layout(width))
            .sink(Box::new(sink))
            .build()
            .unwrap();

        (controller, handle)
    }

    fn config() -> SessionConfig {
        SessionConfig::new("mock").with_read_timeout(Duration::from_millis(5))
    }

    #[test]
    fn collects_every_valid_frame() {
        let transport = MockTransport::new();
        frames(&transport, (0..10).map(|i| vec![i, i + 1, i + 2]));

        let (mut controller, sink) =
            build_controller(&transport, config().with_max_sample_count(10), 3);
        let report = controller.collect_samples().unwrap();

        assert_eq!(report.collected, 10);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.reason, StopReason::MaxCount);
        assert!(report.is_clean());
        assert!(report.sink_failures.is_empty());
        assert_eq!(controller.state(), State::Stopped);

        let samples = sink.samples();
        assert_eq!(samples.len(), 10);
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.values()[0], i as f64);
        }
    }

    #[test]
    fn malformed_frames_are_dropped_not_delivered() {
        let transport = MockTransport::new();
        transport.inject_read(&protocol::build_data_frame(&[0, 0, 0]));
        transport.inject_read(&corrupted_frame(&[9, 9, 9]));
        transport.inject_read(&protocol::build_data_frame(&[1, 1, 1]));
        transport.inject_read(&protocol::build_frame(Command::Data, &[1, 2, 3]));
        transport.inject_read(&protocol::build_data_frame(&[2, 2, 2]));
        transport.inject_read(&protocol::build_data_frame(&[7]));
        transport.inject_read(&protocol::build_data_frame(&[3, 3, 3]));
        transport.inject_read(&corrupted_frame(&[8, 8, 8]));
        transport.inject_read(&protocol::build_data_frame(&[4, 4, 4]));

        let (mut controller, sink) =
            build_controller(&transport, config().with_max_sample_count(5), 3);
        let report = controller.collect_samples().unwrap();

        assert_eq!(report.collected, 5);
        assert_eq!(report.dropped, 4);

        let firsts = sink
            .samples()
            .iter()
            .map(|sample| sample.values()[0])
            .collect::<Vec<_>>();
        assert_eq!(firsts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn corrupted_frame_counts_as_one_drop() {
        let transport = MockTransport::new();
        transport.inject_read(&protocol::build_data_frame(&[0]));
        // 0x5AA5 encodes as the sync pair
        transport.inject_read(&corrupted_frame(&[0x5AA5]));
        frames(&transport, (1..5).map(|i| vec![i]));

        let (mut controller, sink) =
            build_controller(&transport, config().with_max_sample_count(5), 1);
        let report = controller.collect_samples().unwrap();

        assert_eq!(report.collected, 5);
        assert_eq!(report.dropped, 1);
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn unbounded_session_runs_until_stopped() {
        let transport = MockTransport::new();
        frames(&transport, (0..5).map(|i| vec![i]));

        let (mut controller, sink) = build_controller(&transport, config(), 1);
        let handle = controller.handle();

        let worker = thread::spawn(move || {
            let report = controller.collect_samples().unwrap();
            (controller, report)
        });

        let waiting_since = Instant::now();
        while handle.counters().collected < 5 {
            assert!(waiting_since.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
        assert_ne!(handle.state(), State::Stopped);

        handle.stop_collection();
        handle.stop_collection();

        let (controller, report) = worker.join().unwrap();
        assert_eq!(report.collected, 5);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.reason, StopReason::Requested);
        assert_eq!(sink.len(), 5);

        handle.stop_collection();
        assert_eq!(controller.state(), State::Stopped);
        assert_eq!(
            controller.counters(),
            Counters {
                collected: 5,
                dropped: 0
            }
        );
    }

    #[test]
    fn stop_after_completion_changes_nothing() {
        let transport = MockTransport::new();
        frames(&transport, (0..3).map(|i| vec![i]));

        let (mut controller, _sink) =
            build_controller(&transport, config().with_max_sample_count(3), 1);
        let report = controller.collect_samples().unwrap();
        let before = controller.counters();

        controller.stop_collection();
        controller.stop_collection();

        assert_eq!(report.reason, StopReason::MaxCount);
        assert_eq!(controller.counters(), before);
        assert_eq!(controller.state(), State::Stopped);
    }

    #[test]
    fn stop_before_start_collects_nothing() {
        let transport = MockTransport::new();
        frames(&transport, (0..3).map(|i| vec![i]));

        let (mut controller, sink) = build_controller(&transport, config(), 1);
        controller.stop_collection();

        let report = controller.collect_samples().unwrap();

        assert_eq!(report.collected, 0);
        assert_eq!(report.reason, StopReason::Requested);
        assert!(sink.is_empty());
    }

    #[test]
    fn failing_sink_does_not_starve_the_others() {
        let transport = MockTransport::new();
        frames(&transport, (0..4).map(|i| vec![i]));

        let mut healthy = MemorySink::new("healthy");
        healthy.open().unwrap();
        let healthy_samples = healthy.handle();

        let mut controller = Controller::builder(
            BoardLink::new(transport.clone()),
            config().with_max_sample_count(4),
        )
        .layout(layout(1))
        .sink(Box::new(FailingSink::failing_at(&[2])))
        .sink(Box::new(healthy))
        .build()
        .unwrap();

        let report = controller.collect_samples().unwrap();

        assert_eq!(report.collected, 4);
        assert_eq!(healthy_samples.len(), 4);
        assert_eq!(healthy_samples.samples()[2].values(), &[2.0]);

        assert_eq!(report.sink_failures.len(), 1);
        assert_eq!(report.sink_failures[0].sink, "failing");
        assert_eq!(report.sink_failures[0].failed_writes, 1);
    }

    #[test]
    fn timeout_ends_the_session() {
        let transport = MockTransport::new();
        frames(&transport, (0..2).map(|i| vec![i]));

        let (mut controller, _sink) = build_controller(
            &transport,
            config().with_timeout(Duration::from_millis(30)),
            1,
        );
        let report = controller.collect_samples().unwrap();

        assert_eq!(report.reason, StopReason::Deadline);
        assert_eq!(report.collected, 2);
        assert!(report.elapsed >= Duration::from_millis(30));
    }

    #[test]
    fn lost_link_is_fatal_and_reported() {
        let transport = MockTransport::new();
        frames(&transport, (0..2).map(|i| vec![i]));
        transport.close();

        let (mut controller, sink) = build_controller(&transport, config(), 1);
        let report = controller.collect_samples().unwrap();

        assert!(matches!(report.reason, StopReason::LinkLost(_)));
        assert!(!report.is_clean());
        assert_eq!(report.collected, 2);
        assert_eq!(sink.len(), 2);
        assert!(matches!(
            controller.fatal_error(),
            Some(LinkError::Disconnected(_))
        ));
        assert_eq!(controller.state(), State::Stopped);
    }

    #[test]
    fn second_run_is_rejected() {
        let transport = MockTransport::new();
        frames(&transport, (0..2).map(|i| vec![i]));

        let (mut controller, _sink) =
            build_controller(&transport, config().with_max_sample_count(1), 1);
        controller.collect_samples().unwrap();

        assert!(matches!(
            controller.collect_samples(),
            Err(ControllerError::AlreadyRun)
        ));
        assert_eq!(controller.sample_count(), 1);
    }

    #[test]
    fn streaming_is_started_and_stopped_on_the_board() {
        let transport = MockTransport::new();
        frames(&transport, [vec![1]]);

        let (mut controller, _sink) =
            build_controller(&transport, config().with_max_sample_count(1), 1);
        controller.collect_samples().unwrap();

        let mut expected = protocol::build_frame(Command::Start, &[]);
        expected.extend(protocol::build_frame(Command::Stop, &[]));
        assert_eq!(transport.written(), expected);
    }

    #[test]
    fn kx134_samples_arrive_in_g() {
        let transport = MockTransport::new();
        frames(&transport, [vec![2048, -1024, 0]]);

        let mut sink = MemorySink::new("mem");
        sink.open().unwrap();
        let samples = sink.handle();

        let mut controller = Controller::builder(
            BoardLink::new(transport.clone()),
            config().with_max_sample_count(1),
        )
        .layout(ChannelLayout {
            width: 3,
            converter: Converter::signed_int16(1.0 / 1024.0),
        })
        .sink(Box::new(sink))
        .build()
        .unwrap();

        controller.collect_samples().unwrap();

        assert_eq!(samples.samples()[0].values(), &[2.0, -1.0, 0.0]);
    }

    #[test]
    fn builder_rejects_bad_configuration() {
        let transport = MockTransport::new();

        let zero_width = Controller::builder(BoardLink::new(transport.clone()), config())
            .layout(layout(0))
            .sink(Box::new(MemorySink::new("mem")))
            .build();
        assert!(matches!(zero_width, Err(ConfigError::ZeroWidth)));

        let no_layout = Controller::builder(BoardLink::new(transport.clone()), config())
            .sink(Box::new(MemorySink::new("mem")))
            .build();
        assert!(matches!(no_layout, Err(ConfigError::ZeroWidth)));

        let no_sinks = Controller::builder(BoardLink::new(transport), config())
            .layout(layout(1))
            .build();
        assert!(matches!(no_sinks, Err(ConfigError::NoSinks)));
    }

    #[test]
    fn into_sinks_returns_them_in_order() {
        let transport = MockTransport::new();

        let controller = Controller::builder(BoardLink::new(transport), config())
            .layout(layout(1))
            .sink(Box::new(MemorySink::new("first")))
            .sink(Box::new(MemorySink::new("second")))
            .build()
            .unwrap();

        let names = controller
            .into_sinks()
            .iter()
            .map(|sink| sink.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["first", "second"]);
    }
}
