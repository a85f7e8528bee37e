use std::thread;

use anyhow::Context;

use crate::controller::{
    Controller, ControllerError, ControllerHandle, Counters, SessionReport, State,
};
use crate::link::DeviceLink;

type WorkerResult<L> = (Controller<L>, Result<SessionReport, ControllerError>);

/// A controller running its sampling loop on a dedicated thread.
pub struct SamplingSession<L> {
    join_handle: thread::JoinHandle<WorkerResult<L>>,
    handle: ControllerHandle,
}

impl<L: DeviceLink + 'static> SamplingSession<L> {
    pub fn start(mut controller: Controller<L>) -> anyhow::Result<SamplingSession<L>> {
        let handle = controller.handle();

        let join_handle = thread::Builder::new()
            .name("sampler".into())
            .spawn(move || {
                let result = controller.collect_samples();

                if let Err(err) = &result {
                    log::error!("sampler thread returned with error: {:?}", err);
                }

                (controller, result)
            })
            .context("failed to spawn sampler thread")?;

        Ok(SamplingSession {
            join_handle,
            handle,
        })
    }

    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    pub fn stop_collection(&self) {
        self.handle.stop_collection();
    }

    pub fn counters(&self) -> Counters {
        self.handle.counters()
    }

    pub fn state(&self) -> State {
        self.handle.state()
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Waits for the sampling loop to end on its own and returns the report
    /// together with the controller, so its sinks can be closed.
    pub fn join(self) -> anyhow::Result<(SessionReport, Controller<L>)> {
        let (controller, result) = self
            .join_handle
            .join()
            .map_err(|_| anyhow::anyhow!("sampler thread panicked"))?;

        let report = result.context("sampling session failed")?;

        Ok((report, controller))
    }

    pub fn stop(self) -> anyhow::Result<(SessionReport, Controller<L>)> {
        self.stop_collection();
        self.join()
    }
}
