use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::properties::persistent::PersistentStore;
use crate::properties::property_info::PropertyInfoArea;
use crate::properties::store::PropertyStore;
use crate::runtime_info::RuntimeInfo;

mod expansion;
mod property_files;
mod property_info;
mod property_store;
mod registry;
mod service_transitions;

/// A config rooted entirely inside `root` with SELinux off, so tests never
/// touch the real system.
pub fn test_config(root: &Path) -> Config {
    Config {
        property_socket_path: root.join("property_service"),
        socket_publish_dir: root.join("sockets"),
        persist_dir: root.join("persist"),
        property_info_file: root.join("properties").join("property_info"),
        property_info_file_context: "u:object_r:properties_serial:s0".to_owned(),
        property_contexts: vec![],
        file_contexts: vec![],
        boot_prop_files: vec![],
        debug_ramdisk_prop: None,
        local_override_prop: None,
        kernel_cmdline: root.join("cmdline"),
        android_dt_dir: root.join("device-tree"),
        proc_dir: root.join("proc"),
        cgroup_root: root.join("cgroup"),
        default_console: std::path::PathBuf::from("/dev/null"),
        runtime_apex_dir: root.join("apex"),
        max_supp_gids: 12,
        vendor_api_level: 30,
        default_property_context: "u:object_r:default_prop:s0".to_owned(),
        init_context: "u:r:init:s0".to_owned(),
        vendor_init_context: "u:r:vendor_init:s0".to_owned(),
        selinux: false,
    }
}

pub fn test_runtime(root: &Path) -> Arc<RuntimeInfo> {
    test_runtime_with_info(
        root,
        PropertyInfoArea::empty("u:object_r:default_prop:s0", "string"),
    )
}

pub fn test_runtime_with_info(root: &Path, info: PropertyInfoArea) -> Arc<RuntimeInfo> {
    test_runtime_from(test_config(root), info)
}

pub fn test_runtime_from(config: Config, info: PropertyInfoArea) -> Arc<RuntimeInfo> {
    let persist = PersistentStore::new(config.persist_dir.clone());
    let props = Arc::new(PropertyStore::new(info, persist));
    Arc::new(RuntimeInfo { config, props })
}

pub fn find_bin(cmd: &str) -> String {
    for dir in &[
        "/usr/bin",
        "/bin",
        "/usr/local/bin",
        "/run/current-system/sw/bin",
    ] {
        let path = format!("{}/{}", dir, cmd);
        if std::path::Path::new(&path).exists() {
            return path;
        }
    }
    panic!("Could not find `{}` in any standard location", cmd);
}
