//! Configuration for initd-rs.
//!
//! There is no config file: like the init it replaces, initd-rs uses
//! compiled-in well-known paths. Everything path-like lives in [`Config`] so
//! the supervisor, the property service, and the tests all agree on where the
//! world is rooted.

use std::path::PathBuf;

#[derive(Debug)]
pub struct LoggingConfig {
    pub log_to_stdout: bool,
    pub log_to_kmsg: bool,
}

/// One entry of the boot-time property file load order. The first readable
/// candidate wins; later entries in the list override earlier ones key-wise.
#[derive(Debug, Clone)]
pub struct PropFileEntry {
    pub candidates: Vec<PathBuf>,
    pub filter: Option<String>,
}

impl PropFileEntry {
    pub fn new(candidates: &[&str], filter: Option<&str>) -> Self {
        Self {
            candidates: candidates.iter().map(PathBuf::from).collect(),
            filter: filter.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Listening socket of the property service, mode 0666.
    pub property_socket_path: PathBuf,
    /// Directory where service descriptors (sockets, fifos) are published.
    pub socket_publish_dir: PathBuf,
    /// Durable store for `persist.*` properties, one file per key.
    pub persist_dir: PathBuf,
    /// Where the serialized property-info trie is published for readers.
    pub property_info_file: PathBuf,
    /// SELinux context restored onto the published trie artifact.
    pub property_info_file_context: String,
    /// property_contexts sources, in load order. Inner vec is a fallback
    /// chain: the first readable file of a chain is used.
    pub property_contexts: Vec<Vec<PathBuf>>,
    /// file_contexts sources used by restorecon.
    pub file_contexts: Vec<PathBuf>,
    /// Ordered `*.prop` ingestion list.
    pub boot_prop_files: Vec<PropFileEntry>,
    /// Extra prop file present only on debug ramdisks.
    pub debug_ramdisk_prop: Option<PathBuf>,
    /// `/data/local.prop` override, only honored on debuggable builds.
    pub local_override_prop: Option<PathBuf>,
    pub kernel_cmdline: PathBuf,
    pub android_dt_dir: PathBuf,
    pub proc_dir: PathBuf,
    pub cgroup_root: PathBuf,
    pub default_console: PathBuf,
    /// Presence of this directory means the updatable runtime is available.
    pub runtime_apex_dir: PathBuf,
    pub max_supp_gids: usize,
    /// Vendor API level of the image. Control-message replies are passed the
    /// client descriptor when this is above 29.
    pub vendor_api_level: u32,
    pub default_property_context: String,
    pub init_context: String,
    pub vendor_init_context: String,
    /// Whether SELinux transitions and access checks are active. Auto-detected
    /// from the mounted selinuxfs; forced off in tests.
    pub selinux: bool,
}

impl Config {
    /// The path the kernel mounts selinuxfs on.
    pub const SELINUXFS: &'static str = "/sys/fs/selinux";
}

pub fn load_config() -> (LoggingConfig, Config) {
    let vendor_api_level = 30;
    let config = Config {
        property_socket_path: PathBuf::from("/dev/socket/property_service"),
        socket_publish_dir: PathBuf::from("/dev/socket"),
        persist_dir: PathBuf::from("/data/property"),
        property_info_file: PathBuf::from("/dev/__properties__/property_info"),
        property_info_file_context: "u:object_r:properties_serial:s0".to_owned(),
        property_contexts: vec![
            vec![PathBuf::from("/system/etc/selinux/plat_property_contexts")],
            vec![PathBuf::from(
                "/system_ext/etc/selinux/system_ext_property_contexts",
            )],
            vec![
                PathBuf::from("/vendor/etc/selinux/vendor_property_contexts"),
                PathBuf::from("/vendor/etc/selinux/nonplat_property_contexts"),
            ],
            vec![PathBuf::from(
                "/product/etc/selinux/product_property_contexts",
            )],
            vec![PathBuf::from("/odm/etc/selinux/odm_property_contexts")],
        ],
        file_contexts: vec![
            PathBuf::from("/system/etc/selinux/plat_file_contexts"),
            PathBuf::from("/vendor/etc/selinux/vendor_file_contexts"),
        ],
        boot_prop_files: default_prop_files(vendor_api_level),
        debug_ramdisk_prop: Some(PathBuf::from("/debug_ramdisk/adb_debug.prop")),
        local_override_prop: None,
        kernel_cmdline: PathBuf::from("/proc/cmdline"),
        android_dt_dir: PathBuf::from("/proc/device-tree/firmware/android"),
        proc_dir: PathBuf::from("/proc"),
        cgroup_root: PathBuf::from("/sys/fs/cgroup"),
        default_console: PathBuf::from("/dev/console"),
        runtime_apex_dir: PathBuf::from("/apex/com.android.runtime"),
        max_supp_gids: 12,
        vendor_api_level,
        default_property_context: "u:object_r:default_prop:s0".to_owned(),
        init_context: "u:r:init:s0".to_owned(),
        vendor_init_context: "u:r:vendor_init:s0".to_owned(),
        selinux: std::path::Path::new(Config::SELINUXFS)
            .join("enforce")
            .exists(),
    };

    let logging_config = LoggingConfig {
        log_to_stdout: true,
        log_to_kmsg: false,
    };

    (logging_config, config)
}

fn default_prop_files(vendor_api_level: u32) -> Vec<PropFileEntry> {
    let mut files = vec![
        PropFileEntry::new(
            &["/system/etc/prop.default", "/prop.default", "/default.prop"],
            None,
        ),
        PropFileEntry::new(&["/system/build.prop"], None),
        PropFileEntry::new(&["/system_ext/build.prop"], None),
        PropFileEntry::new(&["/vendor/default.prop"], None),
        PropFileEntry::new(&["/vendor/build.prop"], None),
    ];
    if vendor_api_level >= 29 {
        files.push(PropFileEntry::new(&["/odm/etc/build.prop"], None));
    } else {
        files.push(PropFileEntry::new(&["/odm/default.prop"], None));
        files.push(PropFileEntry::new(&["/odm/build.prop"], None));
    }
    files.push(PropFileEntry::new(&["/product/build.prop"], None));
    files.push(PropFileEntry::new(&["/factory/factory.prop"], Some("ro.*")));
    files
}
