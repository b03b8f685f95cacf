//! The per-service object: declared configuration, runtime flags, and every
//! lifecycle operation the supervisor performs on it.

use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use log::{error, info, warn};
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::unistd::{ForkResult, Gid, Pid, Uid};

use super::descriptor::DescriptorInfo;
use super::fork_child::{self, ChildSpec};
use super::registry::RegistryState;
use crate::platform::cgroups;
use crate::platform::proc_attr::{IoSchedClass, ProcAttr};
use crate::platform::selinux;
use crate::properties::expand::expand_args;
use crate::runtime_info::RuntimeInfo;
use crate::signal_handler::ChildTermination;
use crate::util;

bitflags! {
    /// The flag set is intentionally non-disjoint: a service can be RUNNING
    /// and DISABLED between Stop and the SIGCHLD that reaps it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServiceFlags: u32 {
        /// Do not autostart with its class; Start must be explicit.
        const DISABLED = 0x001;
        /// Do not restart on exit.
        const ONESHOT = 0x002;
        /// Currently active (pid is set).
        const RUNNING = 0x004;
        /// Waiting to be restarted after exit.
        const RESTARTING = 0x008;
        /// Requires a console.
        const CONSOLE = 0x010;
        /// Crashing quickly escalates to a fatal supervisor abort.
        const CRITICAL = 0x020;
        /// Stopped by class reset instead of an explicit stop.
        const RESET = 0x040;
        /// Declared disabled in its config.
        const RC_DISABLED = 0x080;
        /// Stopped with the intent to start again.
        const RESTART = 0x100;
        /// Start was requested while DISABLED; latched until Enable.
        const DISABLED_START = 0x200;
        /// An exec-style invocation the supervisor is waiting on.
        const EXEC = 0x400;
        /// Anonymous one-shot; no state properties are published.
        const TEMPORARY = 0x800;
    }
}

/// Memory controls applied to the service's process group.
#[derive(Debug, Clone, Default)]
pub struct MemoryControl {
    pub swappiness: Option<u64>,
    pub soft_limit_bytes: Option<u64>,
    pub limit_bytes: Option<u64>,
    pub limit_percent: Option<u64>,
    pub limit_property: Option<String>,
}

impl MemoryControl {
    fn any_set(&self) -> bool {
        self.swappiness.is_some()
            || self.soft_limit_bytes.is_some()
            || self.limit_bytes.is_some()
            || self.limit_percent.is_some()
            || self.limit_property.is_some()
    }
}

#[derive(Debug)]
pub enum ServiceError {
    UpdatableServiceDelayed(String),
    UpdatableServiceBeforeConfigs(String),
    ConsoleOpenFailed(PathBuf, nix::Error),
    ExecutableMissing(String, nix::Error),
    SelinuxContext(String),
    NoDomainTransition(String, String),
    ExpansionFailed(String),
    ForkFailed(nix::Error),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::UpdatableServiceDelayed(name) => format!(
                "Cannot start an updatable service '{name}' before updatable configs are loaded. \
                 Queued for execution."
            ),
            Self::UpdatableServiceBeforeConfigs(name) => format!(
                "Cannot start an updatable service '{name}' before updatable configs are loaded"
            ),
            Self::ConsoleOpenFailed(path, e) => format!("Couldn't open console {path:?}: {e}"),
            Self::ExecutableMissing(path, e) => format!("Cannot find '{path}': {e}"),
            Self::SelinuxContext(e) => format!("Could not compute security context: {e}"),
            Self::NoDomainTransition(path, context) => format!(
                "File {path} (labeled '{context}') has incorrect label or no domain transition \
                 from init to another SELinux domain defined. Have you configured your service \
                 correctly?"
            ),
            Self::ExpansionFailed(e) => format!("Could not expand arguments: {e}"),
            Self::ForkFailed(e) => format!("Failed to fork: {e}"),
        };
        fmt.write_str(&msg)
    }
}

/// The crash-loop window: more than 4 crashes within this window (or before
/// boot completes) triggers the crash policy.
const CRASH_WINDOW: Duration = Duration::from_secs(4 * 60);
const CRASH_LIMIT: u32 = 4;

pub struct Service {
    pub name: String,
    pub classnames: Vec<String>,
    pub flags: ServiceFlags,
    pub pid: Option<Pid>,
    pub crash_count: u32,
    pub time_started: Option<Duration>,
    pub time_crashed: Option<Duration>,

    pub uid: Uid,
    pub gid: Gid,
    pub supp_gids: Vec<Gid>,
    pub priority: i32,
    pub ioprio_class: IoSchedClass,
    pub ioprio_pri: i32,
    pub capabilities: Option<u64>,
    pub oom_score_adjust: Option<i32>,

    pub namespace_flags: CloneFlags,
    pub namespaces_to_enter: Vec<(CloneFlags, PathBuf)>,
    pub seclabel: Option<String>,
    pub console: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub writepid_files: Vec<PathBuf>,
    pub descriptors: Vec<DescriptorInfo>,
    pub memcg: MemoryControl,
    pub args: Vec<String>,
    /// Command blocks executed when the service transitions to restarting.
    pub on_restart: Vec<Vec<String>>,
    pub sigstop: bool,
    pub timeout_period: Option<Duration>,

    pub start_order: u64,
    pub process_cgroup_empty: bool,
    pub pre_apexd: bool,
    pub post_data: bool,
    pub running_at_post_data_reset: bool,
    /// Whether this service came from an updatable (APEX) config.
    pub updatable: bool,

    pub reap_callbacks: Vec<Box<dyn Fn(Pid, &ChildTermination) + Send>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Service")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("pid", &self.pid)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self::new_with(
            name,
            ServiceFlags::empty(),
            Uid::from_raw(0),
            Gid::from_raw(0),
            Vec::new(),
            None,
            args,
        )
    }

    pub fn new_with(
        name: impl Into<String>,
        flags: ServiceFlags,
        uid: Uid,
        gid: Gid,
        supp_gids: Vec<Gid>,
        seclabel: Option<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            classnames: vec!["default".to_owned()],
            flags,
            pid: None,
            crash_count: 0,
            time_started: None,
            time_crashed: None,
            uid,
            gid,
            supp_gids,
            priority: 0,
            ioprio_class: IoSchedClass::None,
            ioprio_pri: 0,
            capabilities: None,
            oom_score_adjust: None,
            namespace_flags: CloneFlags::empty(),
            namespaces_to_enter: Vec::new(),
            seclabel,
            console: None,
            env: Vec::new(),
            writepid_files: Vec::new(),
            descriptors: Vec::new(),
            memcg: MemoryControl::default(),
            args,
            on_restart: Vec::new(),
            sigstop: false,
            timeout_period: None,
            start_order: 0,
            process_cgroup_empty: true,
            pre_apexd: false,
            post_data: false,
            running_at_post_data_reset: false,
            updatable: false,
            reap_callbacks: Vec::new(),
        }
    }

    /// Parse `exec [SECLABEL [UID [GID SUPP_GID*]] --] COMMAND ARGS...` into
    /// an anonymous one-shot service. SECLABEL can be `-` for the default.
    pub fn make_temporary_oneshot_service(
        args: &[String],
        exec_count: u64,
        max_supp_gids: usize,
    ) -> Result<Self, String> {
        let mut command_arg = 1;
        for (i, arg) in args.iter().enumerate().skip(1) {
            if arg == "--" {
                command_arg = i + 1;
                break;
            }
        }
        if command_arg > 4 + max_supp_gids {
            return Err("exec called with too many supplementary group ids".to_owned());
        }
        if command_arg >= args.len() {
            return Err("exec called without command".to_owned());
        }
        let str_args: Vec<String> = args[command_arg..].to_vec();

        let name = format!("exec {exec_count} ({})", str_args.join(" "));

        let seclabel = if command_arg > 2 && args[1] != "-" {
            Some(args[1].clone())
        } else {
            None
        };
        let uid = if command_arg > 3 {
            util::decode_uid(&args[2]).map_err(|e| format!("Unable to decode UID: {e}"))?
        } else {
            Uid::from_raw(0)
        };
        let mut gid = Gid::from_raw(0);
        let mut supp_gids = Vec::new();
        if command_arg > 4 {
            gid = util::decode_gid(&args[3]).map_err(|e| format!("Unable to decode GID: {e}"))?;
            for arg in &args[4..command_arg - 1] {
                supp_gids
                    .push(util::decode_gid(arg).map_err(|e| format!("Unable to decode GID: {e}"))?);
            }
        }

        Ok(Self::new_with(
            name,
            ServiceFlags::ONESHOT | ServiceFlags::TEMPORARY,
            uid,
            gid,
            supp_gids,
            seclabel,
            str_args,
        ))
    }

    fn notify_state_change(&self, new_state: &str, ctx: &RuntimeInfo) {
        if self.flags.contains(ServiceFlags::TEMPORARY) {
            // Services created by 'exec' don't have properties tracking
            // their state.
            return;
        }

        ctx.props
            .init_set(&format!("init.svc.{}", self.name), new_state);

        if new_state == "running" {
            let start_ns = self
                .time_started
                .map(|t| t.as_nanos() as u64)
                .unwrap_or_default();
            let boottime_prop = format!("ro.boottime.{}", self.name);
            if ctx.props.get_or(&boottime_prop, "").is_empty() {
                ctx.props.init_set(&boottime_prop, &start_ns.to_string());
            }
        }
    }

    /// Signal the whole process group of the service. Once the group has
    /// been torn down this is a no-op; repeating it would only produce
    /// errors against a removed group.
    fn kill_process_group(&mut self, signal: Signal, ctx: &RuntimeInfo) {
        if self.process_cgroup_empty {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };
        info!(
            "Sending signal {signal} to service '{}' (pid {pid}) process group...",
            self.name
        );
        let result = if signal == Signal::SIGTERM {
            cgroups::kill_process_group_once(&ctx.config.cgroup_root, self.uid, pid, signal)
        } else {
            cgroups::kill_process_group(&ctx.config.cgroup_root, self.uid, pid, signal)
        };
        match result {
            Ok(()) => self.process_cgroup_empty = true,
            Err(e) => error!("Could not kill process group of '{}': {e}", self.name),
        }
    }

    fn compute_context(&self, ctx: &RuntimeInfo) -> Result<Option<String>, ServiceError> {
        if let Some(seclabel) = &self.seclabel {
            return Ok(Some(seclabel.clone()));
        }
        if !ctx.config.selinux {
            return Ok(None);
        }

        let mycon = selinux::current_context().map_err(ServiceError::SelinuxContext)?;
        let filecon = selinux::file_context(std::path::Path::new(&self.args[0]))
            .map_err(ServiceError::SelinuxContext)?;
        let computed = selinux::compute_create(&mycon, &filecon, "process")
            .map_err(ServiceError::SelinuxContext)?;
        if computed == mycon {
            return Err(ServiceError::NoDomainTransition(
                self.args[0].clone(),
                filecon,
            ));
        }
        Ok(Some(computed))
    }

    fn apply_memcg(&self, ctx: &RuntimeInfo, pid: Pid) {
        let root = &ctx.config.cgroup_root;
        if let Some(swappiness) = self.memcg.swappiness {
            if let Err(e) = cgroups::set_swappiness(root, self.uid, pid, swappiness) {
                error!("setProcessGroupSwappiness failed: {e}");
            }
        }
        if let Some(soft_limit) = self.memcg.soft_limit_bytes {
            if let Err(e) = cgroups::set_soft_limit(root, self.uid, pid, soft_limit) {
                error!("setProcessGroupSoftLimit failed: {e}");
            }
        }

        let mut computed_limit = self.memcg.limit_bytes;
        if let Some(percent) = self.memcg.limit_percent {
            if let Some(max_mem) = cgroups::physical_memory_bytes() {
                let by_percent = (max_mem / 100).saturating_mul(percent);
                computed_limit = Some(computed_limit.map_or(by_percent, |l| l.min(by_percent)));
            }
        }
        if let Some(limit_property) = &self.memcg.limit_property {
            // Overrides the computed value, but only if the property is set.
            let fallback = computed_limit.unwrap_or(u64::MAX);
            computed_limit = Some(ctx.props.get_uint(limit_property, fallback, u64::MAX));
        }
        if let Some(limit) = computed_limit.filter(|l| *l != u64::MAX) {
            if let Err(e) = cgroups::set_limit(root, self.uid, pid, limit) {
                error!("setProcessGroupLimit failed: {e}");
            }
        }
    }

    pub fn start(
        &mut self,
        ctx: &RuntimeInfo,
        reg: &mut RegistryState,
    ) -> Result<(), ServiceError> {
        if self.updatable && !reg.services_updated {
            reg.delayed_services.push(self.name.clone());
            return Err(ServiceError::UpdatableServiceDelayed(self.name.clone()));
        }

        let disabled = self
            .flags
            .intersects(ServiceFlags::DISABLED | ServiceFlags::RESET);
        // Starting a service removes it from the disabled or reset state and
        // immediately takes it out of the restarting state if it was there.
        self.flags.remove(
            ServiceFlags::DISABLED
                | ServiceFlags::RESTARTING
                | ServiceFlags::RESET
                | ServiceFlags::RESTART
                | ServiceFlags::DISABLED_START,
        );

        // A running process requires no work. If it is mid-exit we have
        // ensured it restarts on reap, except for one-shots, which instead
        // get the RESTART flag latched here.
        if self.flags.contains(ServiceFlags::RUNNING) {
            if self.flags.contains(ServiceFlags::ONESHOT) && disabled {
                self.flags.insert(ServiceFlags::RESTART);
            }
            // Not an error to try to start a service that is running.
            return Ok(());
        }

        if self.flags.contains(ServiceFlags::CONSOLE) {
            let console = self
                .console
                .clone()
                .unwrap_or_else(|| ctx.config.default_console.clone());
            // Open once to verify a console driver is registered for the
            // device node, then close again.
            match nix::fcntl::open(
                &console,
                nix::fcntl::OFlag::O_RDWR | nix::fcntl::OFlag::O_CLOEXEC,
                nix::sys::stat::Mode::empty(),
            ) {
                Ok(fd) => {
                    let _ = nix::unistd::close(fd);
                }
                Err(e) => {
                    self.flags.insert(ServiceFlags::DISABLED);
                    return Err(ServiceError::ConsoleOpenFailed(console, e));
                }
            }
        }

        if let Err(e) = nix::sys::stat::stat(std::path::Path::new(&self.args[0])) {
            self.flags.insert(ServiceFlags::DISABLED);
            return Err(ServiceError::ExecutableMissing(self.args[0].clone(), e));
        }

        let scon = self.compute_context(ctx)?;

        if !ctx.config.runtime_apex_dir.exists() && !self.pre_apexd {
            // Started before the updatable runtime became available; the
            // mark is permanent so crash restarts keep the same identity.
            self.pre_apexd = true;
        }

        self.post_data = reg.post_data;

        // Expanded in the parent, from the values as of this Start; the
        // child must not touch the store's lock between fork and exec. The
        // exec strings are also allocated here, before forking.
        let expanded_args =
            expand_args(&self.args, &ctx.props).map_err(ServiceError::ExpansionFailed)?;
        let (cmd, argv) =
            fork_child::prepare_exec_args(&expanded_args).map_err(ServiceError::ExpansionFailed)?;

        info!("starting service '{}'...", self.name);

        let attr = ProcAttr {
            ioprio_class: self.ioprio_class,
            ioprio_pri: self.ioprio_pri,
            uid: self.uid,
            gid: self.gid,
            supp_gids: self.supp_gids.clone(),
            priority: self.priority,
        };
        let child_spec = ChildSpec {
            name: &self.name,
            cmd: &cmd,
            argv: &argv,
            env: &self.env,
            attr: &attr,
            capabilities: self.capabilities,
            namespaces_to_enter: &self.namespaces_to_enter,
            descriptors: &self.descriptors,
            writepid_files: &self.writepid_files,
            scon: scon.as_deref(),
            sigstop: self.sigstop,
            publish_dir: &ctx.config.socket_publish_dir,
            selinux: ctx.config.selinux,
        };

        let pid = match fork_child::fork_with_flags(self.namespace_flags) {
            Ok(ForkResult::Child) => {
                nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o077));
                fork_child::run(&child_spec);
            }
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => {
                self.pid = None;
                return Err(ServiceError::ForkFailed(e));
            }
        };

        if let Some(oom_score_adjust) = self.oom_score_adjust {
            let oom_file = ctx
                .config
                .proc_dir
                .join(pid.to_string())
                .join("oom_score_adj");
            if let Err(e) = util::write_file(&oom_file, &oom_score_adjust.to_string()) {
                error!("couldn't write oom_score_adj: {e}");
            }
        }

        self.time_started = Some(util::boot_time());
        self.pid = Some(pid);
        self.flags.insert(ServiceFlags::RUNNING);
        self.start_order = reg.next_start_order;
        reg.next_start_order += 1;
        self.process_cgroup_empty = false;

        if let Err(e) = cgroups::create_process_group(&ctx.config.cgroup_root, self.uid, pid) {
            error!(
                "createProcessGroup({}, {pid}) failed for service '{}': {e}",
                self.uid, self.name
            );
        } else if self.memcg.any_set() {
            self.apply_memcg(ctx, pid);
        }

        self.notify_state_change("running", ctx);
        Ok(())
    }

    /// Start for `exec`-style one-shots: the caller depends on the side
    /// effects of the execution, so an updatable service is refused instead
    /// of queued.
    pub fn exec_start(
        &mut self,
        ctx: &RuntimeInfo,
        reg: &mut RegistryState,
    ) -> Result<(), ServiceError> {
        if self.updatable && !reg.services_updated {
            return Err(ServiceError::UpdatableServiceBeforeConfigs(
                self.name.clone(),
            ));
        }

        self.flags.insert(ServiceFlags::ONESHOT);
        self.start(ctx, reg)?;
        self.flags.insert(ServiceFlags::EXEC);
        reg.exec_service_running = true;

        info!(
            "EXEC service '{}' pid {} (uid {} gid {}+{} context {}) started; waiting...",
            self.name,
            self.pid.map(Pid::as_raw).unwrap_or_default(),
            self.uid,
            self.gid,
            self.supp_gids.len(),
            self.seclabel.as_deref().unwrap_or("default")
        );
        Ok(())
    }

    pub fn start_if_not_disabled(
        &mut self,
        ctx: &RuntimeInfo,
        reg: &mut RegistryState,
    ) -> Result<(), ServiceError> {
        if self.flags.contains(ServiceFlags::DISABLED) {
            self.flags.insert(ServiceFlags::DISABLED_START);
            Ok(())
        } else {
            self.start(ctx, reg)
        }
    }

    pub fn enable(
        &mut self,
        ctx: &RuntimeInfo,
        reg: &mut RegistryState,
    ) -> Result<(), ServiceError> {
        self.flags
            .remove(ServiceFlags::DISABLED | ServiceFlags::RC_DISABLED);
        if self.flags.contains(ServiceFlags::DISABLED_START) {
            return self.start(ctx, reg);
        }
        Ok(())
    }

    pub fn stop(&mut self, ctx: &RuntimeInfo) {
        self.stop_or_reset(ServiceFlags::DISABLED, ctx);
    }

    pub fn reset(&mut self, ctx: &RuntimeInfo) {
        self.stop_or_reset(ServiceFlags::RESET, ctx);
    }

    pub fn restart(&mut self, ctx: &RuntimeInfo, reg: &mut RegistryState) {
        if self.flags.contains(ServiceFlags::RUNNING) {
            // Stop, wait, then start the service.
            self.stop_or_reset(ServiceFlags::RESTART, ctx);
        } else if !self.flags.contains(ServiceFlags::RESTARTING) {
            // Just start the service since it's not running.
            if let Err(e) = self.start(ctx, reg) {
                error!("Could not restart '{}': {e}", self.name);
            }
        }
        // else: service is restarting anyway
    }

    pub fn terminate(&mut self, ctx: &RuntimeInfo) {
        self.flags
            .remove(ServiceFlags::RESTARTING | ServiceFlags::DISABLED_START);
        self.flags.insert(ServiceFlags::DISABLED);
        if self.pid.is_some() {
            self.kill_process_group(Signal::SIGTERM, ctx);
            self.notify_state_change("stopping", ctx);
        }
    }

    /// The timeout only kills; all flag transitions happen in the eventual
    /// Reap. One-shots end up disabled, everything else restarts.
    pub fn timeout(&mut self, ctx: &RuntimeInfo) {
        info!(
            "Service '{}' expired its timeout of {:?} and will now be killed",
            self.name, self.timeout_period
        );
        if self.pid.is_some() {
            self.kill_process_group(Signal::SIGKILL, ctx);
            self.notify_state_change("stopping", ctx);
        }
    }

    pub fn reset_if_post_data(&mut self, ctx: &RuntimeInfo) {
        if self.post_data {
            if self.flags.contains(ServiceFlags::RUNNING) {
                self.running_at_post_data_reset = true;
            }
            self.stop_or_reset(ServiceFlags::RESET, ctx);
        }
    }

    /// Start again, but only if the service was started after userdata was
    /// mounted and was still running at the post-data reset.
    pub fn start_if_post_data(
        &mut self,
        ctx: &RuntimeInfo,
        reg: &mut RegistryState,
    ) -> Result<(), ServiceError> {
        if self.running_at_post_data_reset {
            return self.start(ctx, reg);
        }
        Ok(())
    }

    /// `how` must be DISABLED, RESET, or RESTART; anything else is coerced
    /// to DISABLED.
    pub fn stop_or_reset(&mut self, how: ServiceFlags, ctx: &RuntimeInfo) {
        // Still RUNNING until the process exits, but if it already exited
        // it must not attempt a restart from here.
        self.flags
            .remove(ServiceFlags::RESTARTING | ServiceFlags::DISABLED_START);

        let how = if how == ServiceFlags::DISABLED
            || how == ServiceFlags::RESET
            || how == ServiceFlags::RESTART
        {
            how
        } else {
            // An illegal intent: default to DISABLED.
            ServiceFlags::DISABLED
        };

        if how == ServiceFlags::RESET {
            // RESET of an rc-disabled service pins it DISABLED so a class
            // restart won't bring it back.
            self.flags.insert(if self.flags.contains(ServiceFlags::RC_DISABLED) {
                ServiceFlags::DISABLED
            } else {
                ServiceFlags::RESET
            });
        } else {
            self.flags.insert(how);
        }
        // Keep the state sane when a restart immediately follows a
        // stop/reset or vice versa.
        if how == ServiceFlags::RESTART {
            self.flags
                .remove(ServiceFlags::DISABLED | ServiceFlags::RESET);
        } else {
            self.flags.remove(ServiceFlags::RESTART);
        }

        if self.pid.is_some() {
            self.kill_process_group(Signal::SIGKILL, ctx);
            self.notify_state_change("stopping", ctx);
        } else {
            self.notify_state_change("stopped", ctx);
        }
    }

    /// Called by the supervisor when SIGCHLD delivered this service's pid.
    pub fn reap(&mut self, code: &ChildTermination, ctx: &RuntimeInfo, reg: &mut RegistryState) {
        if !self.flags.contains(ServiceFlags::ONESHOT) || self.flags.contains(ServiceFlags::RESTART)
        {
            self.kill_process_group(Signal::SIGKILL, ctx);
        }

        for descriptor in &self.descriptors {
            descriptor.clean(&ctx.config.socket_publish_dir);
        }

        let reaped_pid = self.pid.unwrap_or(Pid::from_raw(0));
        for callback in &self.reap_callbacks {
            callback(reaped_pid, code);
        }

        if self.flags.contains(ServiceFlags::EXEC) {
            self.flags.remove(ServiceFlags::EXEC);
            reg.exec_service_running = false;
        }

        if self.flags.contains(ServiceFlags::TEMPORARY) {
            return;
        }

        self.pid = None;
        self.flags.remove(ServiceFlags::RUNNING);
        self.start_order = 0;

        // One-shot processes go into the disabled state on exit, except
        // when manually restarted.
        if self.flags.contains(ServiceFlags::ONESHOT)
            && !self.flags.contains(ServiceFlags::RESTART)
            && !self.flags.contains(ServiceFlags::RESET)
        {
            self.flags.insert(ServiceFlags::DISABLED);
        }

        // Disabled and reset processes do not get restarted automatically.
        if self
            .flags
            .intersects(ServiceFlags::DISABLED | ServiceFlags::RESET)
        {
            self.notify_state_change("stopped", ctx);
            return;
        }

        self.run_crash_policy(ctx);

        self.flags.remove(ServiceFlags::RESTART);
        self.flags.insert(ServiceFlags::RESTARTING);

        self.execute_on_restart_commands();

        self.notify_state_change("restarting", ctx);
    }

    /// Crash accounting for critical and updatable services: more than 4
    /// exits within 4 minutes (or at any rate before boot completed) aborts
    /// the supervisor for critical services and raises the crashing marker
    /// for updatable ones.
    fn run_crash_policy(&mut self, ctx: &RuntimeInfo) {
        let is_apex_updatable = ctx.props.get_bool("ro.apex.updatable", false);
        let is_process_updatable = !self.pre_apexd && is_apex_updatable;

        if !(self.flags.contains(ServiceFlags::CRITICAL) || is_process_updatable)
            || self.flags.contains(ServiceFlags::RESTART)
        {
            return;
        }

        let boot_completed = ctx.props.get_bool("sys.boot_completed", false);
        let now = util::boot_time();
        let within_window = self
            .time_crashed
            .is_some_and(|crashed| now < crashed + CRASH_WINDOW);

        if within_window || !boot_completed {
            self.crash_count += 1;
            if self.crash_count > CRASH_LIMIT {
                let when = if boot_completed {
                    "in 4 minutes"
                } else {
                    "before boot completed"
                };
                if self.flags.contains(ServiceFlags::CRITICAL) {
                    // Aborts back into the bootloader.
                    error!("critical process '{}' exited 4 times {when}", self.name);
                    panic!("critical process '{}' exited 4 times {when}", self.name);
                }
                error!("updatable process '{}' exited 4 times {when}", self.name);
                // Notifies the update verifier of the crash loop.
                ctx.props.init_set("ro.init.updatable_crashing", "1");
            }
        } else {
            self.time_crashed = Some(now);
            self.crash_count = 1;
        }
    }

    fn execute_on_restart_commands(&self) {
        for argv in &self.on_restart {
            let Some(cmd) = argv.first() else {
                continue;
            };
            match std::process::Command::new(cmd).args(&argv[1..]).status() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(
                    "onrestart command {argv:?} for '{}' exited with {status}",
                    self.name
                ),
                Err(e) => warn!(
                    "onrestart command {argv:?} for '{}' failed to run: {e}",
                    self.name
                ),
            }
        }
    }

    pub fn dump_state(&self) {
        info!("service {}", self.name);
        info!("  class '{}'", self.classnames.join(" "));
        info!("  exec {}", self.args.join(" "));
        for descriptor in &self.descriptors {
            info!("  descriptor {} ({:?})", descriptor.name, descriptor.kind);
        }
    }
}
