//! The in-memory property store (the shared namespace itself).
//!
//! Writes arrive from the property-service thread, plus from the supervisor
//! thread during early boot before that thread exists and whenever the
//! supervisor publishes service state. A successful write is mirrored to the
//! persistent store for `persist.*` names and fanned out as a change
//! notification over the internal socket; both happen under the write lock
//! so observers see changes in set order.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, warn};

use super::messages::{send_message, PropertyMessage};
use super::persistent::PersistentStore;
use super::property_info::PropertyInfoArea;
use super::property_type::check_type;
use super::{is_legal_property_name, PropError, PROP_VALUE_MAX};

pub struct PropertyStore {
    props: RwLock<HashMap<String, String>>,
    info: PropertyInfoArea,
    persist: PersistentStore,
    persistent_loaded: AtomicBool,
    accept_messages: AtomicBool,
    notify_socket: Mutex<Option<Arc<OwnedFd>>>,
}

impl PropertyStore {
    pub fn new(info: PropertyInfoArea, persist: PersistentStore) -> Self {
        Self {
            props: RwLock::new(HashMap::new()),
            info,
            persist,
            persistent_loaded: AtomicBool::new(false),
            accept_messages: AtomicBool::new(false),
            notify_socket: Mutex::new(None),
        }
    }

    // The namespace outlives any single thread of PID 1. If the server
    // thread dies mid-write, service-state publishing from the supervisor
    // still has to go through, so a poisoned map is recovered instead of
    // propagated. The map itself is valid: every writer fully inserts
    // before anything that can panic.
    fn props_read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.props.read().unwrap_or_else(|e| {
            warn!("Recovered the property map from a crashed writer");
            e.into_inner()
        })
    }

    fn props_write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.props.write().unwrap_or_else(|e| {
            warn!("Recovered the property map from a crashed writer");
            e.into_inner()
        })
    }

    #[must_use]
    pub fn property_info(&self) -> &PropertyInfoArea {
        &self.info
    }

    /// Store `name=value`. This is the final validation and commit step;
    /// access control happened at the server before we get here.
    pub fn set(&self, name: &str, value: &str) -> Result<(), PropError> {
        if !is_legal_property_name(name) {
            return Err(PropError::InvalidName);
        }
        if value.len() >= PROP_VALUE_MAX {
            return Err(PropError::InvalidValue);
        }
        let (_, type_str) = self.info.query(name);
        if !check_type(type_str, value) {
            return Err(PropError::InvalidValue);
        }

        let mut props = self.props_write();
        if props.contains_key(name) && name.starts_with("ro.") {
            // ro.* properties are actually "write-once"
            return Err(PropError::ReadOnlyProperty);
        }
        props.insert(name.to_owned(), value.to_owned());

        // Don't write properties to disk until the boot-time load pass is
        // done, it would overwrite persisted values with defaults.
        if self.persistent_loaded.load(Ordering::Relaxed) && name.starts_with("persist.") {
            if let Err(e) = self.persist.write(name, value) {
                error!("Could not persist '{name}': {e}");
            }
        }

        if self.accept_messages.load(Ordering::Relaxed) {
            self.send_property_changed(name, value);
        }
        Ok(())
    }

    /// Supervisor-side set with pid-1 authority: same validation and commit,
    /// failures are logged instead of propagated. Callers never pass names
    /// with control semantics here.
    pub fn init_set(&self, name: &str, value: &str) {
        if let Err(e) = self.set(name, value) {
            error!("Init cannot set '{name}' to '{value}': {e}");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.props_read().get(name).cloned()
    }

    #[must_use]
    pub fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_owned())
    }

    #[must_use]
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name).as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        }
    }

    /// Numeric property with a cap, falling back on parse failure.
    #[must_use]
    pub fn get_uint(&self, name: &str, default: u64, max: u64) -> u64 {
        match self.get(name).and_then(|v| v.parse::<u64>().ok()) {
            Some(v) if v <= max => v,
            _ => default,
        }
    }

    pub fn set_notify_socket(&self, socket: Arc<OwnedFd>) {
        *self
            .notify_socket
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(socket);
    }

    pub fn set_accept_messages(&self, accept: bool) {
        self.accept_messages.store(accept, Ordering::Relaxed);
    }

    #[must_use]
    pub fn accept_messages(&self) -> bool {
        self.accept_messages.load(Ordering::Relaxed)
    }

    pub fn set_persistent_loaded(&self) {
        self.persistent_loaded.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn persistent_loaded(&self) -> bool {
        self.persistent_loaded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn persistent_store(&self) -> &PersistentStore {
        &self.persist
    }

    fn send_property_changed(&self, name: &str, value: &str) {
        let socket = self
            .notify_socket
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(socket) = socket.as_ref() else {
            return;
        };
        let msg = PropertyMessage::Changed {
            name: name.to_owned(),
            value: value.to_owned(),
        };
        if let Err(e) = send_message(socket.as_raw_fd(), &msg, None) {
            warn!("Failed to send property changed message: {e}");
        }
    }
}
