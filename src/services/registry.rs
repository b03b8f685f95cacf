//! The process-wide service registry, owned by the supervisor thread.
//!
//! Names are unique. The registry also carries the cross-service state the
//! lifecycle operations need (start-order counter, delayed-start list,
//! post-data markers) split into [`RegistryState`] so a service can be
//! mutated while that state is borrowed alongside it.

use log::{error, info, warn};
use nix::unistd::Pid;

use super::service::{Service, ServiceError, ServiceFlags};
use crate::runtime_info::RuntimeInfo;
use crate::signal_handler::ChildTermination;

/// Lifecycle actions a control property can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn parse(msg: &str) -> Option<Self> {
        match msg {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }
}

/// State shared by all services but owned by the registry.
#[derive(Debug)]
pub struct RegistryState {
    /// Monotonic; strictly increases across every successful start.
    pub next_start_order: u64,
    /// Updatable services that asked to start before their configs loaded.
    pub delayed_services: Vec<String>,
    pub services_updated: bool,
    /// Monotonic true once userdata is mounted.
    pub post_data: bool,
    pub exec_service_running: bool,
    exec_count: u64,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_start_order: 1,
            delayed_services: Vec::new(),
            services_updated: false,
            post_data: false,
            exec_service_running: false,
            exec_count: 0,
        }
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Service>,
    pub state: RegistryState,
}

impl ServiceRegistry {
    pub fn add_service(&mut self, service: Service) -> Result<(), String> {
        if self.find(&service.name).is_some() {
            return Err(format!("Service '{}' already exists", service.name));
        }
        self.services.push(service);
        Ok(())
    }

    pub fn remove_service(&mut self, name: &str) {
        self.services.retain(|s| s.name != name);
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<(&mut Service, &mut RegistryState)> {
        let Self { services, state } = self;
        services
            .iter_mut()
            .find(|s| s.name == name)
            .map(|s| (s, &mut *state))
    }

    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Create and register an anonymous `exec` one-shot service.
    pub fn make_exec_oneshot_service(
        &mut self,
        args: &[String],
        ctx: &RuntimeInfo,
    ) -> Result<String, String> {
        self.state.exec_count += 1;
        let service = Service::make_temporary_oneshot_service(
            args,
            self.state.exec_count,
            ctx.config.max_supp_gids,
        )?;
        let name = service.name.clone();
        self.add_service(service)?;
        Ok(name)
    }

    pub fn start_service(&mut self, name: &str, ctx: &RuntimeInfo) -> Result<(), ServiceError> {
        let Some((service, state)) = self.find_mut(name) else {
            warn!("Could not find service '{name}' to start");
            return Ok(());
        };
        service.start(ctx, state)
    }

    /// Updatable configs are in; release every start that was queued while
    /// they were not.
    pub fn mark_services_updated(&mut self, ctx: &RuntimeInfo) {
        self.state.services_updated = true;
        let delayed = std::mem::take(&mut self.state.delayed_services);
        for name in delayed {
            info!("Starting previously delayed service '{name}'");
            if let Err(e) = self.start_service(&name, ctx) {
                error!("Could not start delayed service '{name}': {e}");
            }
        }
    }

    #[must_use]
    pub fn is_post_data(&self) -> bool {
        self.state.post_data
    }

    /// Userdata is mounted. Stays set for the rest of the boot.
    pub fn mark_post_data(&mut self) {
        self.state.post_data = true;
    }

    /// Reset every service started after userdata was mounted, remembering
    /// which were running so `start_if_post_data` can bring them back.
    pub fn reset_if_post_data(&mut self, ctx: &RuntimeInfo) {
        for service in &mut self.services {
            service.reset_if_post_data(ctx);
        }
    }

    pub fn start_if_post_data(&mut self, ctx: &RuntimeInfo) {
        let Self { services, state } = self;
        for service in services.iter_mut() {
            if let Err(e) = service.start_if_post_data(ctx, state) {
                error!("Could not restart post-data service '{}': {e}", service.name);
            }
        }
    }

    /// Route a child death to its service. Temporary services are dropped
    /// from the registry after their reap. Returns false when no service
    /// owns the pid.
    pub fn reap(&mut self, pid: Pid, code: &ChildTermination, ctx: &RuntimeInfo) -> bool {
        let Self { services, state } = self;
        let Some(service) = services.iter_mut().find(|s| s.pid == Some(pid)) else {
            return false;
        };
        service.reap(code, ctx, state);
        if service.flags.contains(ServiceFlags::TEMPORARY) {
            let name = service.name.clone();
            self.remove_service(&name);
        }
        true
    }

    /// A granted control-property write, dispatched FIFO by the supervisor.
    pub fn handle_control_message(
        &mut self,
        action: ControlAction,
        name: &str,
        from_pid: i32,
        ctx: &RuntimeInfo,
    ) -> bool {
        let Some((service, state)) = self.find_mut(name) else {
            error!("Control message for nonexistent service '{name}' from pid {from_pid}");
            return false;
        };
        info!(
            "Received control message '{action:?}' for '{name}' from pid: {from_pid}"
        );
        match action {
            ControlAction::Start => match service.start(ctx, state) {
                Ok(()) => true,
                Err(e) => {
                    error!("Could not ctl.start service '{name}': {e}");
                    false
                }
            },
            ControlAction::Stop => {
                service.stop(ctx);
                true
            }
            ControlAction::Restart => {
                service.restart(ctx, state);
                true
            }
        }
    }

    pub fn dump_state(&self) {
        for service in &self.services {
            service.dump_state();
        }
    }
}
