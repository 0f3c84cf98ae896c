use std::io;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use futures_util::future::LocalBoxFuture;
use trustee_logging::{trustee_debug, trustee_error};

/// A unit of work. The closure runs on the worker thread and builds the future it then drives.
pub type Job = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

/// One worker thread with a FIFO queue. Jobs run strictly one after another.
pub struct WorkerPool {
    name: &'static str,
    tx: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts the worker. `after_job` runs on the worker thread after every job.
    pub fn spawn(
        name: &'static str,
        lane: &'static str,
        after_job: impl Fn() + Send + 'static,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(format!("trustee-{name}"))
            .spawn(move || {
                trustee_logging::set_lane_label(lane);
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        trustee_error!("Cannot start runtime, worker exits: {}", err);
                        return;
                    }
                };
                while let Ok(job) = rx.recv() {
                    runtime.block_on(job());
                    after_job();
                }
                trustee_debug!("Worker queue closed");
            })?;
        Ok(Self {
            name,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queues a job. Hands it back if the worker is gone.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        match &self.tx {
            Some(tx) => tx.send(job).map_err(|err| err.0),
            None => Err(job),
        }
    }

    /// Lets the queue drain, then joins the worker.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                trustee_error!("Worker {} panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
