use nix::unistd::Pid;

use crate::services::{Service, ServiceFlags, ServiceRegistry};
use crate::signal_handler::ChildTermination;
use crate::tests::{find_bin, test_runtime};
use crate::util;

fn wait_for(pid: Pid) -> ChildTermination {
    match nix::sys::wait::waitpid(pid, None).unwrap() {
        nix::sys::wait::WaitStatus::Exited(_, code) => ChildTermination::Exit(code),
        nix::sys::wait::WaitStatus::Signaled(_, sig, _) => ChildTermination::Signal(sig),
        other => panic!("Unexpected wait status: {other:?}"),
    }
}

#[test]
fn start_reap_cycle_restarts_a_plain_service() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    registry
        .add_service(Service::new("cycler", vec![find_bin("true")]))
        .unwrap();

    registry.start_service("cycler", &ctx).unwrap();
    let service = registry.find("cycler").unwrap();
    assert!(service.flags.contains(ServiceFlags::RUNNING));
    let pid = service.pid.expect("RUNNING implies a pid");
    assert!(pid.as_raw() > 0);
    assert_eq!(service.start_order, 1);
    assert_eq!(ctx.props.get("init.svc.cycler").as_deref(), Some("running"));
    assert!(!ctx.props.get_or("ro.boottime.cycler", "").is_empty());

    let code = wait_for(pid);
    assert!(registry.reap(pid, &code, &ctx));

    let service = registry.find("cycler").unwrap();
    assert!(!service.flags.contains(ServiceFlags::RUNNING));
    assert!(service.flags.contains(ServiceFlags::RESTARTING));
    assert_eq!(service.pid, None);
    assert_eq!(
        ctx.props.get("init.svc.cycler").as_deref(),
        Some("restarting")
    );
}

#[test]
fn start_order_strictly_increases() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    registry
        .add_service(Service::new("ordered", vec![find_bin("true")]))
        .unwrap();

    registry.start_service("ordered", &ctx).unwrap();
    let first_order = registry.find("ordered").unwrap().start_order;
    let pid = registry.find("ordered").unwrap().pid.unwrap();
    let code = wait_for(pid);
    registry.reap(pid, &code, &ctx);

    registry.start_service("ordered", &ctx).unwrap();
    let second_order = registry.find("ordered").unwrap().start_order;
    assert!(second_order > first_order);

    let pid = registry.find("ordered").unwrap().pid.unwrap();
    let code = wait_for(pid);
    registry.reap(pid, &code, &ctx);
}

#[test]
fn oneshot_is_disabled_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    let mut service = Service::new("once", vec![find_bin("true")]);
    service.flags.insert(ServiceFlags::ONESHOT);
    registry.add_service(service).unwrap();

    registry.start_service("once", &ctx).unwrap();
    let pid = registry.find("once").unwrap().pid.unwrap();
    let code = wait_for(pid);
    registry.reap(pid, &code, &ctx);

    let service = registry.find("once").unwrap();
    assert!(service.flags.contains(ServiceFlags::DISABLED));
    assert!(!service.flags.contains(ServiceFlags::RESTARTING));
    assert_eq!(ctx.props.get("init.svc.once").as_deref(), Some("stopped"));

    // a class start latches DISABLED_START instead of launching
    let (service, state) = registry.find_mut("once").unwrap();
    service.start_if_not_disabled(&ctx, state).unwrap();
    let service = registry.find("once").unwrap();
    assert!(service.pid.is_none());
    assert!(service.flags.contains(ServiceFlags::DISABLED_START));

    // enable releases the latched start
    let (service, state) = registry.find_mut("once").unwrap();
    service.enable(&ctx, state).unwrap();
    let service = registry.find("once").unwrap();
    assert!(!service.flags.contains(ServiceFlags::DISABLED));
    let pid = service.pid.expect("enable starts the latched service");
    let code = wait_for(pid);
    registry.reap(pid, &code, &ctx);
}

#[test]
fn enable_without_latched_start_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    registry
        .add_service(Service::new("idem", vec![find_bin("true")]))
        .unwrap();

    let (service, state) = registry.find_mut("idem").unwrap();
    service.enable(&ctx, state).unwrap();
    let flags_after_first = registry.find("idem").unwrap().flags;
    let (service, state) = registry.find_mut("idem").unwrap();
    service.enable(&ctx, state).unwrap();
    let service = registry.find("idem").unwrap();
    assert_eq!(service.flags, flags_after_first);
    assert!(service.pid.is_none());
}

#[test]
fn stop_or_reset_transition_table() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    // DISABLED intent
    let mut service = Service::new("t1", vec!["/bin/true".to_owned()]);
    service.flags =
        ServiceFlags::RESTARTING | ServiceFlags::DISABLED_START | ServiceFlags::RESTART;
    service.stop_or_reset(ServiceFlags::DISABLED, &ctx);
    assert_eq!(service.flags, ServiceFlags::DISABLED);
    assert_eq!(ctx.props.get("init.svc.t1").as_deref(), Some("stopped"));

    // RESET intent without RC_DISABLED keeps RESET
    let mut service = Service::new("t2", vec!["/bin/true".to_owned()]);
    service.flags = ServiceFlags::RESTARTING;
    service.stop_or_reset(ServiceFlags::RESET, &ctx);
    assert_eq!(service.flags, ServiceFlags::RESET);

    // RESET intent with RC_DISABLED pins DISABLED instead
    let mut service = Service::new("t3", vec!["/bin/true".to_owned()]);
    service.flags = ServiceFlags::RC_DISABLED;
    service.stop_or_reset(ServiceFlags::RESET, &ctx);
    assert_eq!(service.flags, ServiceFlags::RC_DISABLED | ServiceFlags::DISABLED);

    // RESTART intent clears the stop-ish flags
    let mut service = Service::new("t4", vec!["/bin/true".to_owned()]);
    service.flags = ServiceFlags::DISABLED | ServiceFlags::RESET | ServiceFlags::DISABLED_START;
    service.stop_or_reset(ServiceFlags::RESTART, &ctx);
    assert_eq!(service.flags, ServiceFlags::RESTART);

    // anything else coerces to DISABLED
    let mut service = Service::new("t5", vec!["/bin/true".to_owned()]);
    service.stop_or_reset(ServiceFlags::EXEC, &ctx);
    assert!(service.flags.contains(ServiceFlags::DISABLED));
}

#[test]
fn stop_or_reset_disable_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    let mut service = Service::new("twice", vec!["/bin/true".to_owned()]);
    service.stop_or_reset(ServiceFlags::DISABLED, &ctx);
    let first = service.flags;
    service.stop_or_reset(ServiceFlags::DISABLED, &ctx);
    assert_eq!(service.flags, first);
}

#[test]
fn critical_crash_loop_aborts_on_the_fifth_reap() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    let mut service = Service::new("crasher", vec!["/bin/true".to_owned()]);
    service.flags.insert(ServiceFlags::CRITICAL);
    registry.add_service(service).unwrap();

    // boot is not complete (sys.boot_completed unset), so every rapid exit
    // counts against the limit
    for i in 1..=4 {
        let (service, state) = registry.find_mut("crasher").unwrap();
        service.reap(&ChildTermination::Exit(127), &ctx, state);
        assert_eq!(registry.find("crasher").unwrap().crash_count, i);
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let (service, state) = registry.find_mut("crasher").unwrap();
        service.reap(&ChildTermination::Exit(127), &ctx, state);
    }));
    assert!(result.is_err(), "fifth rapid crash must abort");
}

#[test]
fn updatable_crash_loop_sets_the_crashing_property() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    ctx.props.init_set("ro.apex.updatable", "true");
    let mut registry = ServiceRegistry::default();
    let service = Service::new("updatable", vec!["/bin/true".to_owned()]);
    registry.add_service(service).unwrap();

    for _ in 0..5 {
        let (service, state) = registry.find_mut("updatable").unwrap();
        service.reap(&ChildTermination::Exit(1), &ctx, state);
    }
    assert_eq!(
        ctx.props.get("ro.init.updatable_crashing").as_deref(),
        Some("1")
    );
}

#[test]
fn crash_count_resets_outside_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    ctx.props.init_set("sys.boot_completed", "1");
    let mut registry = ServiceRegistry::default();
    let mut service = Service::new("slowcrash", vec!["/bin/true".to_owned()]);
    service.flags.insert(ServiceFlags::CRITICAL);
    service.crash_count = 4;
    // last crash well outside the 4 minute window
    service.time_crashed = Some(util::boot_time().saturating_sub(std::time::Duration::from_secs(600)));
    registry.add_service(service).unwrap();

    let (service, state) = registry.find_mut("slowcrash").unwrap();
    service.reap(&ChildTermination::Exit(1), &ctx, state);
    assert_eq!(registry.find("slowcrash").unwrap().crash_count, 1);
}

#[test]
fn temporary_services_are_dropped_after_reap() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();

    let args: Vec<String> = ["exec", "--", find_bin("true").as_str()]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    let name = registry.make_exec_oneshot_service(&args, &ctx).unwrap();
    assert!(name.starts_with("exec 1 ("));

    let (service, state) = registry.find_mut(&name).unwrap();
    service.exec_start(&ctx, state).unwrap();
    assert!(registry.state.exec_service_running);
    // temporary services publish no state properties
    assert_eq!(ctx.props.get(&format!("init.svc.{name}")), None);

    let pid = registry.find(&name).unwrap().pid.unwrap();
    let code = wait_for(pid);
    registry.reap(pid, &code, &ctx);
    assert!(!registry.state.exec_service_running);
    assert!(registry.find(&name).is_none());
}

#[test]
fn post_data_reset_and_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    registry.mark_post_data();
    registry
        .add_service(Service::new("datasvc", vec![find_bin("true")]))
        .unwrap();

    registry.start_service("datasvc", &ctx).unwrap();
    assert!(registry.find("datasvc").unwrap().post_data);
    let pid = registry.find("datasvc").unwrap().pid.unwrap();
    // collect the exit up front so the reset below signals a gone process
    let code = wait_for(pid);

    registry.reset_if_post_data(&ctx);
    let service = registry.find("datasvc").unwrap();
    assert!(service.running_at_post_data_reset);
    assert_eq!(ctx.props.get("init.svc.datasvc").as_deref(), Some("stopping"));

    registry.reap(pid, &code, &ctx);
    assert_eq!(ctx.props.get("init.svc.datasvc").as_deref(), Some("stopped"));

    registry.start_if_post_data(&ctx);
    let service = registry.find("datasvc").unwrap();
    assert!(service.flags.contains(ServiceFlags::RUNNING));
    let pid = service.pid.unwrap();
    let code = wait_for(pid);
    registry.reap(pid, &code, &ctx);
}

#[test]
fn temporary_oneshot_argument_parsing() {
    let args = |list: &[&str]| -> Vec<String> { list.iter().map(|s| (*s).to_owned()).collect() };

    // full form: seclabel, uid, gid, one supp gid
    let service = Service::make_temporary_oneshot_service(
        &args(&["exec", "u:r:shell:s0", "0", "0", "0", "--", "/bin/true", "-v"]),
        7,
        12,
    )
    .unwrap();
    assert_eq!(service.name, "exec 7 (/bin/true -v)");
    assert_eq!(service.seclabel.as_deref(), Some("u:r:shell:s0"));
    assert_eq!(service.args, vec!["/bin/true".to_owned(), "-v".to_owned()]);
    assert!(service.flags.contains(ServiceFlags::ONESHOT));
    assert!(service.flags.contains(ServiceFlags::TEMPORARY));

    // '-' seclabel means default
    let service =
        Service::make_temporary_oneshot_service(&args(&["exec", "-", "--", "/bin/true"]), 1, 12)
            .unwrap();
    assert_eq!(service.seclabel, None);

    // no command
    assert!(Service::make_temporary_oneshot_service(&args(&["exec"]), 1, 12).is_err());
    assert!(
        Service::make_temporary_oneshot_service(&args(&["exec", "-", "--"]), 1, 12).is_err()
    );

    // too many supplementary gids
    let mut many = vec!["exec", "-", "0", "0"];
    let gids = vec!["0"; 13];
    many.extend(gids);
    many.extend(["--", "/bin/true"]);
    assert!(Service::make_temporary_oneshot_service(&args(&many), 1, 2).is_err());

    // bad uid
    assert!(Service::make_temporary_oneshot_service(
        &args(&["exec", "-", "no-such-user-hopefully", "--", "/bin/true"]),
        1,
        12
    )
    .is_err());
}
