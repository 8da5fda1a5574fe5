//! Background reclaimer thread.

use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::DomainInner;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

pub(crate) struct Reclaimer {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Reclaimer {
    pub(crate) fn spawn(domain: Weak<DomainInner>, interval: Duration) -> io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("layerscope-reclaimer".into())
            .spawn(move || run(domain, thread_signal, interval))?;
        Ok(Self {
            signal,
            thread_id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit and wait for it, unless called from the loop
    /// itself (the last domain handle can be dropped there).
    pub(crate) fn stop(mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if thread::current().id() != self.thread_id {
                let _ = handle.join();
            }
        }
    }
}

fn run(domain: Weak<DomainInner>, signal: Arc<StopSignal>, interval: Duration) {
    debug!(?interval, "reclaimer started");
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if !*stopped {
                signal.cond.wait_for(&mut stopped, interval);
            }
            if *stopped {
                break;
            }
        }
        let Some(domain) = domain.upgrade() else {
            break;
        };
        let freed = domain.collect();
        if freed > 0 {
            trace!(freed, "reclaim cycle");
        }
    }
    debug!("reclaimer stopped");
}
