use crate::properties::expand::{expand_args, expand_props};
use crate::tests::test_runtime;

#[test]
fn expansion_forms() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    ctx.props.init_set("test.device", "sda1");

    assert_eq!(
        expand_props("/dev/block/${test.device}", &ctx.props).unwrap(),
        "/dev/block/sda1"
    );
    assert_eq!(
        expand_props("${test.missing:-fallback}", &ctx.props).unwrap(),
        "fallback"
    );
    assert_eq!(
        expand_props("${test.device:-fallback}", &ctx.props).unwrap(),
        "sda1"
    );
    assert_eq!(expand_props("cost: $$5", &ctx.props).unwrap(), "cost: $5");
    assert_eq!(expand_props("no references", &ctx.props).unwrap(), "no references");

    assert!(expand_props("${unterminated", &ctx.props).is_err());
    assert!(expand_props("${}", &ctx.props).is_err());
    assert!(expand_props("bare $dollar", &ctx.props).is_err());
    assert!(expand_props("${test.missing}", &ctx.props).is_err());
}

#[test]
fn argv0_is_never_expanded() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_runtime(dir.path());
    ctx.props.init_set("test.flag", "--verbose");

    let args = vec![
        "/bin/${not.expanded}".to_owned(),
        "${test.flag}".to_owned(),
    ];
    let expanded = expand_args(&args, &ctx.props).unwrap();
    assert_eq!(expanded[0], "/bin/${not.expanded}");
    assert_eq!(expanded[1], "--verbose");
}
