use crate::config::PropFileEntry;
use crate::properties::load::{load_override_properties, property_load_boot_defaults};
use crate::properties::property_info::PropertyInfoArea;
use crate::tests::{test_config, test_runtime_from};

fn entry(paths: &[&std::path::Path], filter: Option<&str>) -> PropFileEntry {
    let strs: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let refs: Vec<&str> = strs.iter().map(String::as_str).collect();
    PropFileEntry::new(&refs, filter)
}

fn default_info() -> PropertyInfoArea {
    PropertyInfoArea::empty("u:object_r:default_prop:s0", "string")
}

#[test]
fn later_files_override_earlier_even_for_ro() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.prop");
    let b = dir.path().join("b.prop");
    std::fs::write(
        &a,
        "# build defaults\n\
         ro.test.owner = alpha\n\
         test.plain=first\n\
         \n\
         malformed line without equals\n",
    )
    .unwrap();
    std::fs::write(&b, "ro.test.owner=beta\n").unwrap();

    let mut config = test_config(dir.path());
    config.boot_prop_files = vec![entry(&[&a], None), entry(&[&b], None)];
    let ctx = test_runtime_from(config, default_info());

    property_load_boot_defaults(&ctx);
    assert_eq!(ctx.props.get("ro.test.owner").as_deref(), Some("beta"));
    assert_eq!(ctx.props.get("test.plain").as_deref(), Some("first"));
}

#[test]
fn fallback_chain_uses_first_readable_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.prop");
    let present = dir.path().join("present.prop");
    std::fs::write(&present, "test.from=fallback\n").unwrap();

    let mut config = test_config(dir.path());
    config.boot_prop_files = vec![entry(&[&missing, &present], None)];
    let ctx = test_runtime_from(config, default_info());

    property_load_boot_defaults(&ctx);
    assert_eq!(ctx.props.get("test.from").as_deref(), Some("fallback"));
}

#[test]
fn filters_restrict_loaded_keys() {
    let dir = tempfile::tempdir().unwrap();
    let factory = dir.path().join("factory.prop");
    std::fs::write(
        &factory,
        "ro.factory.serial=12345\n\
         persist.leak=no\n",
    )
    .unwrap();

    let mut config = test_config(dir.path());
    config.boot_prop_files = vec![entry(&[&factory], Some("ro.*"))];
    let ctx = test_runtime_from(config, default_info());

    property_load_boot_defaults(&ctx);
    assert_eq!(ctx.props.get("ro.factory.serial").as_deref(), Some("12345"));
    assert_eq!(ctx.props.get("persist.leak"), None);
}

#[test]
fn import_directives_follow_expansion_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let imported = dir.path().join("imported.prop");
    std::fs::write(
        &imported,
        "test.wanted=yes\n\
         test.unwanted=no\n",
    )
    .unwrap();
    let main = dir.path().join("main.prop");
    std::fs::write(
        &main,
        format!(
            "test.dir={}\n\
             import ${{test.dir}}/imported.prop test.wanted\n",
            dir.path().display()
        ),
    )
    .unwrap();

    let mut config = test_config(dir.path());
    config.boot_prop_files = vec![entry(&[&main], None)];
    let ctx = test_runtime_from(config, default_info());
    // the import path references a property, which must already be live
    ctx.props.init_set("test.dir", &dir.path().display().to_string());

    property_load_boot_defaults(&ctx);
    assert_eq!(ctx.props.get("test.wanted").as_deref(), Some("yes"));
    assert_eq!(ctx.props.get("test.unwanted"), None);
}

#[test]
fn disallowed_side_effect_keys_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let evil = dir.path().join("evil.prop");
    std::fs::write(
        &evil,
        "ctl.start=shell\n\
         sys.powerctl=reboot\n\
         selinux.restorecon_recursive=/data\n\
         test.fine=1\n",
    )
    .unwrap();

    let mut config = test_config(dir.path());
    config.boot_prop_files = vec![entry(&[&evil], None)];
    let ctx = test_runtime_from(config, default_info());

    property_load_boot_defaults(&ctx);
    assert_eq!(ctx.props.get("ctl.start"), None);
    assert_eq!(ctx.props.get("sys.powerctl"), None);
    assert_eq!(ctx.props.get("selinux.restorecon_recursive"), None);
    assert_eq!(ctx.props.get("test.fine").as_deref(), Some("1"));
}

#[test]
fn product_aliases_and_fingerprint_are_derived() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.prop");
    std::fs::write(
        &build,
        "ro.product.vendor.brand=acme\n\
         ro.product.vendor.name=gadget\n\
         ro.product.vendor.device=gadget0\n\
         ro.build.version.release=11\n\
         ro.build.id=TEST.11\n\
         ro.build.version.incremental=7\n\
         ro.build.type=userdebug\n\
         ro.build.tags=test-keys\n",
    )
    .unwrap();

    let mut config = test_config(dir.path());
    config.boot_prop_files = vec![entry(&[&build], None)];
    let ctx = test_runtime_from(config, default_info());

    property_load_boot_defaults(&ctx);
    // derived from the partition-qualified source in default order
    assert_eq!(ctx.props.get("ro.product.brand").as_deref(), Some("acme"));
    assert_eq!(ctx.props.get("ro.product.device").as_deref(), Some("gadget0"));
    // six components, assembled in the canonical shape
    assert_eq!(
        ctx.props.get("ro.build.fingerprint").as_deref(),
        Some("acme/gadget/gadget0:11/TEST.11/7:userdebug/test-keys")
    );
}

#[test]
fn local_override_cannot_beat_write_once() {
    let dir = tempfile::tempdir().unwrap();
    let override_file = dir.path().join("local.prop");
    std::fs::write(
        &override_file,
        "test.overridable=changed\n\
         ro.test.fixed=changed\n",
    )
    .unwrap();

    let mut config = test_config(dir.path());
    config.local_override_prop = Some(override_file);
    let ctx = test_runtime_from(config, default_info());
    ctx.props.init_set("test.overridable", "original");
    ctx.props.init_set("ro.test.fixed", "original");

    load_override_properties(&ctx);
    assert_eq!(ctx.props.get("test.overridable").as_deref(), Some("changed"));
    assert_eq!(ctx.props.get("ro.test.fixed").as_deref(), Some("original"));
}
