use crate::properties::property_info::{parse_property_info_file, PropertyInfoArea};
use crate::properties::{is_legal_property_name, PropError};
use crate::tests::{test_runtime, test_runtime_with_info};

#[test]
fn name_legality() {
    assert!(is_legal_property_name("ro.build.fingerprint"));
    assert!(is_legal_property_name("persist.sys.usb.config"));
    assert!(is_legal_property_name("a"));
    assert!(is_legal_property_name("snake_case-with-dash.0"));

    assert!(!is_legal_property_name(""));
    assert!(!is_legal_property_name(".starts.with.dot"));
    assert!(!is_legal_property_name("ends.with.dot."));
    assert!(!is_legal_property_name("empty..segment"));
    assert!(!is_legal_property_name("has space"));
    assert!(!is_legal_property_name("has/slash"));

    // 31 characters is the longest legal name, 32 is rejected
    let name31 = "a".repeat(31);
    let name32 = "a".repeat(32);
    assert!(is_legal_property_name(&name31));
    assert!(!is_legal_property_name(&name32));
}

#[test]
fn value_length_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    let value91 = "v".repeat(91);
    let value92 = "v".repeat(92);
    assert_eq!(ctx.props.set("test.value", &value91), Ok(()));
    assert_eq!(
        ctx.props.set("test.value", &value92),
        Err(PropError::InvalidValue)
    );
    assert_eq!(ctx.props.get("test.value").as_deref(), Some(value91.as_str()));
}

#[test]
fn set_then_get_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    assert_eq!(ctx.props.set("test.key", "some value"), Ok(()));
    assert_eq!(ctx.props.get("test.key").as_deref(), Some("some value"));

    // plain properties can be set again
    assert_eq!(ctx.props.set("test.key", "other"), Ok(()));
    assert_eq!(ctx.props.get("test.key").as_deref(), Some("other"));
}

#[test]
fn read_only_properties_are_write_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    assert_eq!(ctx.props.set("ro.foo", "1"), Ok(()));
    assert_eq!(ctx.props.set("ro.foo", "2"), Err(PropError::ReadOnlyProperty));
    assert_eq!(ctx.props.get("ro.foo").as_deref(), Some("1"));
}

#[test]
fn illegal_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    assert_eq!(ctx.props.set("", "v"), Err(PropError::InvalidName));
    assert_eq!(ctx.props.set("bad..name", "v"), Err(PropError::InvalidName));
}

#[test]
fn type_checks_consult_the_trie() {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    parse_property_info_file(
        "test.int.value u:object_r:test_prop:s0 int\n\
         test.bool.value u:object_r:test_prop:s0 bool\n\
         test.mode u:object_r:test_prop:s0 enum off slow fast\n",
        &mut entries,
        &mut errors,
    );
    assert!(errors.is_empty());
    let info = PropertyInfoArea::build(entries, "u:object_r:default_prop:s0", "string");

    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime_with_info(dir.path(), info);

    assert_eq!(ctx.props.set("test.int.value", "-42"), Ok(()));
    assert_eq!(
        ctx.props.set("test.int.value", "not a number"),
        Err(PropError::InvalidValue)
    );
    assert_eq!(ctx.props.set("test.bool.value", "true"), Ok(()));
    assert_eq!(
        ctx.props.set("test.bool.value", "yes"),
        Err(PropError::InvalidValue)
    );
    assert_eq!(ctx.props.set("test.mode", "slow"), Ok(()));
    assert_eq!(
        ctx.props.set("test.mode", "warp"),
        Err(PropError::InvalidValue)
    );
    // names the trie doesn't know default to string
    assert_eq!(ctx.props.set("test.unknown", "anything at all"), Ok(()));
}

#[test]
fn persist_mirror_waits_for_load() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());

    // before the load pass nothing may be mirrored
    assert_eq!(ctx.props.set("persist.test.early", "1"), Ok(()));
    assert!(!dir.path().join("persist").join("persist.test.early").exists());

    ctx.props.set_persistent_loaded();
    assert_eq!(ctx.props.set("persist.test.late", "2"), Ok(()));
    let mirrored = dir.path().join("persist").join("persist.test.late");
    assert_eq!(std::fs::read_to_string(mirrored).unwrap(), "2");

    // non-persist names are never mirrored
    assert_eq!(ctx.props.set("test.volatile", "3"), Ok(()));
    assert!(!dir.path().join("persist").join("test.volatile").exists());
}

#[test]
fn persistent_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = crate::properties::persistent::PersistentStore::new(dir.path().join("persist"));

    store.write("persist.alpha", "a").unwrap();
    store.write("persist.beta", "b").unwrap();
    store.write("persist.alpha", "a2").unwrap();
    // stray temp file from an interrupted write
    std::fs::write(dir.path().join("persist").join(".tmp.persist.gone"), "x").unwrap();
    // foreign file that must be ignored
    std::fs::write(dir.path().join("persist").join("not-a-property"), "x").unwrap();

    let loaded = store.load();
    assert_eq!(
        loaded,
        vec![
            ("persist.alpha".to_owned(), "a2".to_owned()),
            ("persist.beta".to_owned(), "b".to_owned()),
        ]
    );
    assert!(!dir.path().join("persist").join(".tmp.persist.gone").exists());
}
