//! The RuntimeInfo groups what every part of init needs to reach: the loaded
//! configuration and the property store. The service registry is *not* in
//! here — it is owned exclusively by the supervisor thread, which passes it
//! explicitly where service mutations happen.

use std::sync::Arc;

use crate::config::Config;
use crate::properties::store::PropertyStore;

pub struct RuntimeInfo {
    pub config: Config,
    pub props: Arc<PropertyStore>,
}

pub type ArcRuntimeInfo = Arc<RuntimeInfo>;
