//! Boot-time property ingestion: the property-info trie, kernel-provided
//! values (device tree, cmdline), the fixed `*.prop` file order, and the
//! derived `ro.product.*` / fingerprint values.

use std::collections::BTreeMap;
use std::path::Path;

use log::{error, info, warn};

use super::expand::expand_props;
use super::property_info::{parse_property_info_file, PropertyInfoArea, PropertyInfoEntry};
use super::server::{check_permissions, PeerCred};
use super::{CTL_PREFIX, POWERCTL_PROPERTY, RESTORECON_PROPERTY};
use crate::config::Config;
use crate::runtime_info::RuntimeInfo;

const INIT_CRED: PeerCred = PeerCred {
    pid: 1,
    uid: 0,
    gid: 0,
};

/// Build the property-info trie from the concatenated property_contexts
/// sources and publish the serialized form for readers. Parse errors are
/// reported but never fail the boot; an empty trie still answers every
/// query with the defaults.
pub fn load_property_info(config: &Config) -> PropertyInfoArea {
    let mut entries: Vec<PropertyInfoEntry> = Vec::new();

    for chain in &config.property_contexts {
        let Some((path, content)) = chain
            .iter()
            .find_map(|p| std::fs::read_to_string(p).ok().map(|c| (p, c)))
        else {
            continue;
        };
        let mut errors = Vec::new();
        parse_property_info_file(&content, &mut entries, &mut errors);
        for e in errors {
            error!("Could not read line from {path:?}: {e}");
        }
    }

    let area = PropertyInfoArea::build(entries, &config.default_property_context, "string");
    if let Err(e) = area.publish(
        &config.property_info_file,
        &config.property_info_file_context,
    ) {
        error!("Unable to publish serialized property info: {e}");
    }
    area
}

/// Kernel device-tree overrides: every file under the android DT node
/// becomes `ro.boot.<name>`, with ',' turned into '.' in the content.
fn process_kernel_dt(ctx: &RuntimeInfo) {
    let dir = &ctx.config.android_dt_dir;
    let compatible = dir.join("compatible");
    let Ok(raw) = std::fs::read(&compatible) else {
        return;
    };
    if !raw
        .split(|b| *b == 0)
        .any(|s| s == b"android,firmware".as_slice())
    {
        return;
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name == "compatible" || file_name == "name" {
            continue;
        }
        let Ok(raw) = std::fs::read(entry.path()) else {
            continue;
        };
        let value: String = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\0', '\n'])
            .replace(',', ".");
        ctx.props.init_set(&format!("ro.boot.{file_name}"), &value);
    }
}

/// Kernel cmdline: `androidboot.<x>=<v>` tokens become `ro.boot.<x>`. If a
/// `qemu` token is present every token is additionally exported under
/// `ro.kernel.<key>` for the emulator.
fn process_kernel_cmdline(ctx: &RuntimeInfo) {
    let Ok(cmdline) = std::fs::read_to_string(&ctx.config.kernel_cmdline) else {
        return;
    };

    let tokens: Vec<(&str, &str)> = cmdline
        .split_whitespace()
        .map(|tok| tok.split_once('=').unwrap_or((tok, "")))
        .collect();

    let mut for_emulator = false;
    for (key, value) in &tokens {
        if *key == "qemu" {
            for_emulator = true;
        } else if let Some(tail) = key.strip_prefix("androidboot.") {
            ctx.props.init_set(&format!("ro.boot.{tail}"), value);
        }
    }

    if for_emulator {
        for (key, value) in &tokens {
            ctx.props.init_set(&format!("ro.kernel.{key}"), value);
        }
    }
}

/// Fixed `ro.boot.*` → `ro.*` aliases with their declared defaults.
fn export_kernel_boot_props(ctx: &RuntimeInfo) {
    const UNSET: &str = "";
    let prop_map = [
        ("ro.boot.serialno", "ro.serialno", UNSET),
        ("ro.boot.mode", "ro.bootmode", "unknown"),
        ("ro.boot.baseband", "ro.baseband", "unknown"),
        ("ro.boot.bootloader", "ro.bootloader", "unknown"),
        ("ro.boot.hardware", "ro.hardware", "unknown"),
        ("ro.boot.revision", "ro.revision", "0"),
    ];
    for (src, dst, default) in prop_map {
        let value = ctx.props.get_or(src, default);
        if value != UNSET {
            ctx.props.init_set(dst, &value);
        }
    }
}

fn passes_filter(key: &str, filter: &str) -> bool {
    match filter.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == filter,
    }
}

/// Parse one prop file's contents into `properties`. `filter` restricts the
/// accepted keys (`prefix.*` or exact); `import` directives only apply in
/// unfiltered loads and are resolved with property expansion.
fn load_properties(
    ctx: &RuntimeInfo,
    data: &str,
    filter: Option<&str>,
    filename: &Path,
    properties: &mut BTreeMap<String, String>,
) {
    // Files shipped on the vendor partitions are checked against the vendor
    // init context, everything else against init's own.
    let source_context = if ctx.config.vendor_api_level >= 28
        && (filename.starts_with("/vendor") || filename.starts_with("/odm"))
    {
        &ctx.config.vendor_init_context
    } else {
        &ctx.config.init_context
    };

    for raw_line in data.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(import) = line.strip_prefix("import ") {
            if filter.is_some() {
                continue;
            }
            let mut fields = import.trim().splitn(2, char::is_whitespace);
            let Some(import_file) = fields.next() else {
                continue;
            };
            let import_filter = fields.next().map(str::trim).filter(|f| !f.is_empty());

            match expand_props(import_file, &ctx.props) {
                Ok(expanded) => {
                    load_properties_from_file(
                        ctx,
                        Path::new(&expanded),
                        import_filter,
                        properties,
                    );
                }
                Err(e) => error!("Could not expand import filename '{import_file}': {e}"),
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            continue;
        }
        if let Some(filter) = filter {
            if !passes_filter(key, filter) {
                continue;
            }
        }

        if key.starts_with(CTL_PREFIX) || key == POWERCTL_PROPERTY || key == RESTORECON_PROPERTY {
            error!(
                "Ignoring disallowed property '{key}' with special meaning in prop file {filename:?}"
            );
            continue;
        }

        if let Err(e) = check_permissions(ctx, key, value, source_context, &INIT_CRED) {
            error!(
                "Do not have permissions to set '{key}' to '{value}' in property file {filename:?}: {e}"
            );
            continue;
        }

        if let Some(previous) = properties.get(key) {
            if previous != value {
                warn!(
                    "Overriding previous property '{key}':'{previous}' with new value '{value}'"
                );
            }
        }
        properties.insert(key.to_owned(), value.to_owned());
    }
}

fn load_properties_from_file(
    ctx: &RuntimeInfo,
    filename: &Path,
    filter: Option<&str>,
    properties: &mut BTreeMap<String, String>,
) -> bool {
    let contents = match std::fs::read_to_string(filename) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Couldn't load property file {filename:?}: {e}");
            return false;
        }
    };
    load_properties(ctx, &contents, filter, filename, properties);
    true
}

/// Derive `ro.product.<attr>` from the first partition-qualified source
/// that has it, honoring `ro.product.property_source_order` when the
/// configured order only names known sources.
fn initialize_ro_product_props(ctx: &RuntimeInfo) {
    const PREFIX: &str = "ro.product.";
    const PROPS: [&str; 5] = ["brand", "device", "manufacturer", "model", "name"];
    const ALLOWED_SOURCES: [&str; 5] = ["odm", "product", "system_ext", "system", "vendor"];
    const DEFAULT_ORDER: &str = "product,odm,vendor,system_ext,system";

    let mut source_order = ctx.props.get_or("ro.product.property_source_order", "");
    if source_order.is_empty() {
        source_order = DEFAULT_ORDER.to_owned();
    } else if source_order
        .split(',')
        .any(|source| !ALLOWED_SOURCES.contains(&source))
    {
        error!(
            "Found unexpected source in ro.product.property_source_order; \
             using the default property source order"
        );
        source_order = DEFAULT_ORDER.to_owned();
    }

    for prop in PROPS {
        let base_prop = format!("{PREFIX}{prop}");
        if !ctx.props.get_or(&base_prop, "").is_empty() {
            continue;
        }

        for source in source_order.split(',') {
            let target_prop = format!("{PREFIX}{source}.{prop}");
            let value = ctx.props.get_or(&target_prop, "");
            if !value.is_empty() {
                info!("Setting product property {base_prop} to '{value}' (from {target_prop})");
                ctx.props.init_set(&base_prop, &value);
                break;
            }
        }
    }
}

/// Assemble `ro.build.fingerprint` from its six components when the build
/// didn't ship one.
fn derive_build_fingerprint(ctx: &RuntimeInfo) {
    if !ctx.props.get_or("ro.build.fingerprint", "").is_empty() {
        return;
    }

    const UNKNOWN: &str = "unknown";
    let get = |name: &str| ctx.props.get_or(name, UNKNOWN);
    let fingerprint = format!(
        "{}/{}/{}:{}/{}/{}:{}/{}",
        get("ro.product.brand"),
        get("ro.product.name"),
        get("ro.product.device"),
        get("ro.build.version.release"),
        get("ro.build.id"),
        get("ro.build.version.incremental"),
        get("ro.build.type"),
        get("ro.build.tags"),
    );

    info!("Setting property 'ro.build.fingerprint' to '{fingerprint}'");
    ctx.props.init_set("ro.build.fingerprint", &fingerprint);
}

/// `persist.sys.usb.config` can't be assembled at build time when the prop
/// files are split across partitions, so the adb default is merged here.
fn update_sys_usb_config(ctx: &RuntimeInfo) {
    let is_debuggable = ctx.props.get_bool("ro.debuggable", false);
    let config = ctx.props.get_or("persist.sys.usb.config", "");
    if config.is_empty() {
        ctx.props
            .init_set("persist.sys.usb.config", if is_debuggable { "adb" } else { "none" });
    } else if is_debuggable
        && !config.split(',').any(|f| f == "adb")
        && config.len() + 4 < super::PROP_VALUE_MAX
    {
        ctx.props
            .init_set("persist.sys.usb.config", &format!("{config},adb"));
    }
}

/// The full boot-defaults pass: every prop file in its fixed order into one
/// map (later files override earlier, `ro.` or not), then committed to the
/// store, then the derived properties.
pub fn property_load_boot_defaults(ctx: &RuntimeInfo) {
    let mut properties = BTreeMap::new();

    for entry in &ctx.config.boot_prop_files {
        for candidate in &entry.candidates {
            if load_properties_from_file(ctx, candidate, entry.filter.as_deref(), &mut properties)
            {
                break;
            }
        }
    }

    if let Some(debug_prop) = &ctx.config.debug_ramdisk_prop {
        if debug_prop.exists() {
            info!("Loading {debug_prop:?}");
            load_properties_from_file(ctx, debug_prop, None, &mut properties);
        }
    }

    for (name, value) in &properties {
        if let Err(e) = ctx.props.set(name, value) {
            error!("Could not set '{name}' to '{value}' while loading .prop files: {e}");
        }
    }

    initialize_ro_product_props(ctx);
    derive_build_fingerprint(ctx);
    update_sys_usb_config(ctx);
}

/// `/data/local.prop` overrides, loaded right before the persistent
/// properties. Only wired up on builds that allow local override.
pub fn load_override_properties(ctx: &RuntimeInfo) {
    let Some(path) = &ctx.config.local_override_prop else {
        return;
    };
    let mut properties = BTreeMap::new();
    load_properties_from_file(ctx, path, None, &mut properties);
    for (name, value) in &properties {
        if let Err(e) = ctx.props.set(name, value) {
            error!("Could not set '{name}' to '{value}' in {path:?}: {e}");
        }
    }
}

/// Property subsystem bring-up on the supervisor thread, before the server
/// thread exists: kernel-provided values first (device tree beats cmdline),
/// then the exported aliases, then the prop files.
pub fn property_init(ctx: &RuntimeInfo) {
    process_kernel_dt(ctx);
    process_kernel_cmdline(ctx);
    export_kernel_boot_props(ctx);
    property_load_boot_defaults(ctx);
}
