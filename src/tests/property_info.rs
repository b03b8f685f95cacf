use crate::properties::property_info::{
    parse_property_info_file, parse_property_info_line, PropertyInfoArea,
};
use crate::properties::property_type::check_type;

fn build_area(contexts: &str) -> PropertyInfoArea {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    parse_property_info_file(contexts, &mut entries, &mut errors);
    assert!(errors.is_empty(), "parse errors: {errors:?}");
    PropertyInfoArea::build(entries, "u:object_r:default_prop:s0", "string")
}

#[test]
fn line_parsing() {
    let entry = parse_property_info_line("ro.serialno u:object_r:serialno_prop:s0 string")
        .unwrap()
        .unwrap();
    assert_eq!(entry.name, "ro.serialno");
    assert_eq!(entry.context, "u:object_r:serialno_prop:s0");
    assert_eq!(entry.type_str, "string");
    assert!(entry.exact);

    let entry = parse_property_info_line("persist.radio.* u:object_r:radio_prop:s0")
        .unwrap()
        .unwrap();
    assert_eq!(entry.name, "persist.radio.");
    assert!(!entry.exact);
    assert_eq!(entry.type_str, "string");

    let entry = parse_property_info_line("test.mode u:object_r:t:s0 enum a b")
        .unwrap()
        .unwrap();
    assert_eq!(entry.type_str, "enum a b");

    assert!(parse_property_info_line("# comment").unwrap().is_none());
    assert!(parse_property_info_line("   ").unwrap().is_none());
    assert!(parse_property_info_line("lonely.name").is_err());
}

#[test]
fn query_prefers_exact_over_prefix() {
    let area = build_area(
        "ro.boot.* u:object_r:bootloader_prop:s0\n\
         ro.boot.serialno u:object_r:serialno_prop:s0\n",
    );
    assert_eq!(area.query("ro.boot.serialno").0, "u:object_r:serialno_prop:s0");
    assert_eq!(area.query("ro.boot.mode").0, "u:object_r:bootloader_prop:s0");
}

#[test]
fn query_prefers_longest_prefix() {
    let area = build_area(
        "persist.* u:object_r:persist_prop:s0\n\
         persist.radio.* u:object_r:radio_prop:s0\n",
    );
    assert_eq!(
        area.query("persist.radio.airplane").0,
        "u:object_r:radio_prop:s0"
    );
    assert_eq!(area.query("persist.sys.locale").0, "u:object_r:persist_prop:s0");
}

#[test]
fn query_handles_partial_segment_prefixes() {
    let area = build_area("ro.build* u:object_r:build_prop:s0\n");
    assert_eq!(area.query("ro.buildinfo").0, "u:object_r:build_prop:s0");
    assert_eq!(area.query("ro.build.id").0, "u:object_r:build_prop:s0");
    assert_eq!(area.query("ro.bui").0, "u:object_r:default_prop:s0");
}

#[test]
fn query_falls_back_to_defaults() {
    let area = build_area("ro.x u:object_r:x_prop:s0 int\n");
    let (context, type_str) = area.query("something.else.entirely");
    assert_eq!(context, "u:object_r:default_prop:s0");
    assert_eq!(type_str, "string");
}

#[test]
fn publish_writes_the_serialized_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let area = build_area("ro.x u:object_r:x_prop:s0 int\n");
    let path = dir.path().join("properties").join("property_info");
    area.publish(&path, "u:object_r:properties_serial:s0").unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["entries"][0]["name"], "ro.x");
    assert_eq!(parsed["default_context"], "u:object_r:default_prop:s0");
}

#[test]
fn type_checking() {
    assert!(check_type("string", "anything"));
    assert!(check_type("", "anything"));

    assert!(check_type("bool", "true"));
    assert!(check_type("bool", "0"));
    assert!(!check_type("bool", "yes"));

    assert!(check_type("int", "-17"));
    assert!(!check_type("int", "seventeen"));
    assert!(check_type("uint", "17"));
    assert!(!check_type("uint", "-17"));

    assert!(check_type("double", "3.25"));
    assert!(!check_type("double", "pi"));

    assert!(check_type("size", "4096k"));
    assert!(check_type("size", "1g"));
    assert!(!check_type("size", "4096"));
    assert!(!check_type("size", "k"));

    assert!(check_type("enum allow deny log", "deny"));
    assert!(!check_type("enum allow deny log", "denyy"));
}
