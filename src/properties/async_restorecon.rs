//! Queued asynchronous restorecon.
//!
//! A recursive relabel over something like /data can take minutes; doing it
//! on the property-service thread would starve every client of the 2 second
//! budget. Requests are queued and worked off by at most one detached
//! thread, which reports each finished path back through the regular client
//! socket (so the completion property is serialized with all other writes)
//! and exits once the queue drains.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::error;

use crate::platform::selinux::FileContexts;

#[derive(Default)]
struct QueueState {
    paths: VecDeque<String>,
    thread_started: bool,
}

// A worker that panics mid-relabel must not poison the queue: the next
// client request still has to be able to enqueue and restart a worker.
// The recovered state is consistent, pop happens before any relabel work.
fn lock_queue(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AsyncRestorecon {
    state: Mutex<QueueState>,
    file_contexts: Arc<FileContexts>,
    property_socket: PathBuf,
}

impl AsyncRestorecon {
    pub fn new(file_contexts: Arc<FileContexts>, property_socket: PathBuf) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            file_contexts,
            property_socket,
        }
    }

    /// Queue `path` for relabeling, starting the worker if none is running.
    pub fn trigger(self: &Arc<Self>, path: String) {
        let mut state = lock_queue(&self.state);
        state.paths.push_back(path);

        if !state.thread_started {
            state.thread_started = true;
            let this = Arc::clone(self);
            std::thread::spawn(move || this.work());
        }
    }

    fn work(&self) {
        loop {
            let path = {
                let mut state = lock_queue(&self.state);
                match state.paths.pop_front() {
                    Some(path) => path,
                    None => {
                        state.thread_started = false;
                        return;
                    }
                }
            };

            if let Err(e) = self.file_contexts.restorecon(Path::new(&path), true) {
                error!("Asynchronous restorecon of '{path}' failed: {e}");
            }
            // The completed path is stored as the property's value, through
            // the socket like any other client write.
            match super::client::set_property(
                &self.property_socket,
                super::RESTORECON_PROPERTY,
                &path,
            ) {
                Ok(code) if code == super::PROP_SUCCESS => {}
                Ok(code) => error!("Storing restorecon completion for '{path}' failed: {code}"),
                Err(e) => error!("Storing restorecon completion for '{path}' failed: {e}"),
            }
        }
    }
}
