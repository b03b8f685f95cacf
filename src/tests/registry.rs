use crate::services::{ControlAction, Service, ServiceFlags, ServiceRegistry};
use crate::tests::{find_bin, test_runtime};

#[test]
fn names_are_unique() {
    let mut registry = ServiceRegistry::default();
    registry
        .add_service(Service::new("twin", vec!["/bin/true".to_owned()]))
        .unwrap();
    assert!(registry
        .add_service(Service::new("twin", vec!["/bin/false".to_owned()]))
        .is_err());
}

#[test]
fn updatable_starts_are_delayed_until_marked() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    let mut service = Service::new("modular", vec![find_bin("true")]);
    service.updatable = true;
    registry.add_service(service).unwrap();

    // before the mark, starting only enqueues
    assert!(registry.start_service("modular", &ctx).is_err());
    let service = registry.find("modular").unwrap();
    assert!(!service.flags.contains(ServiceFlags::RUNNING));
    assert_eq!(registry.state.delayed_services, vec!["modular".to_owned()]);

    // the mark drains the queue and actually launches
    registry.mark_services_updated(&ctx);
    assert!(registry.state.delayed_services.is_empty());
    let service = registry.find("modular").unwrap();
    assert!(service.flags.contains(ServiceFlags::RUNNING));

    let pid = service.pid.unwrap();
    let code = match nix::sys::wait::waitpid(pid, None).unwrap() {
        nix::sys::wait::WaitStatus::Exited(_, c) => {
            crate::signal_handler::ChildTermination::Exit(c)
        }
        other => panic!("unexpected: {other:?}"),
    };
    registry.reap(pid, &code, &ctx);
}

#[test]
fn control_actions_parse() {
    assert_eq!(ControlAction::parse("start"), Some(ControlAction::Start));
    assert_eq!(ControlAction::parse("stop"), Some(ControlAction::Stop));
    assert_eq!(ControlAction::parse("restart"), Some(ControlAction::Restart));
    assert_eq!(ControlAction::parse("interface_start"), None);
}

#[test]
fn control_message_starts_a_service() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    let mut registry = ServiceRegistry::default();
    registry
        .add_service(Service::new("ctlsvc", vec![find_bin("true")]))
        .unwrap();

    assert!(registry.handle_control_message(ControlAction::Start, "ctlsvc", 4242, &ctx));
    let service = registry.find("ctlsvc").unwrap();
    assert!(service.flags.contains(ServiceFlags::RUNNING));
    let pid = service.pid.unwrap();
    let code = match nix::sys::wait::waitpid(pid, None).unwrap() {
        nix::sys::wait::WaitStatus::Exited(_, c) => {
            crate::signal_handler::ChildTermination::Exit(c)
        }
        other => panic!("unexpected: {other:?}"),
    };
    registry.reap(pid, &code, &ctx);

    // unknown services fail the control message
    assert!(!registry.handle_control_message(ControlAction::Start, "ghost", 4242, &ctx));
}
