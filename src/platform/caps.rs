//! Capability handling for service children.
//!
//! nix has no capability coverage, so this talks to the kernel directly:
//! `prctl` for securebits / bounding set / ambient set and the raw
//! `capget`/`capset` syscalls for the three main sets. All of it runs in the
//! child between fork and exec.

const SECBIT_KEEP_CAPS: libc::c_ulong = 1 << 4;
const SECBIT_KEEP_CAPS_LOCKED: libc::c_ulong = 1 << 5;

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

fn capget() -> Result<[CapUserData; 2], String> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];
    let ret = unsafe { libc::syscall(libc::SYS_capget, &mut header, data.as_mut_ptr()) };
    if ret != 0 {
        return Err(format!("capget failed: {}", std::io::Error::last_os_error()));
    }
    Ok(data)
}

fn capset(data: &[CapUserData; 2]) -> Result<(), String> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let ret = unsafe { libc::syscall(libc::SYS_capset, &mut header, data.as_ptr()) };
    if ret != 0 {
        return Err(format!("capset failed: {}", std::io::Error::last_os_error()));
    }
    Ok(())
}

fn last_cap() -> u8 {
    std::fs::read_to_string("/proc/sys/kernel/cap_last_cap")
        .ok()
        .and_then(|s| s.trim().parse::<u8>().ok())
        .unwrap_or(40)
}

/// Set the keep-capabilities securebits before the uid changes. Bits that
/// are already locked (containers do this) are preserved untouched.
pub fn keep_caps_across_uid_change() -> Result<(), String> {
    let securebits = unsafe { libc::prctl(libc::PR_GET_SECUREBITS) };
    if securebits < 0 {
        return Err(format!(
            "prctl(PR_GET_SECUREBITS) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    let securebits = securebits as libc::c_ulong | SECBIT_KEEP_CAPS | SECBIT_KEEP_CAPS_LOCKED;
    if unsafe { libc::prctl(libc::PR_SET_SECUREBITS, securebits) } != 0 {
        return Err(format!(
            "prctl(PR_SET_SECUREBITS) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

/// Install the declared capability mask as the full state carried across
/// exec: bounding set reduced to the mask, permitted/effective/inheritable
/// set to it, and every bit raised in the ambient set so a non-root child
/// actually receives them.
pub fn set_caps_for_exec(caps: u64) -> Result<(), String> {
    for cap in 0..=last_cap() {
        if caps & (1u64 << cap) != 0 {
            continue;
        }
        if unsafe { libc::prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(cap)) } != 0 {
            return Err(format!(
                "prctl(PR_CAPBSET_DROP, {cap}) failed: {}",
                std::io::Error::last_os_error()
            ));
        }
    }

    let lower = (caps & 0xffff_ffff) as u32;
    let upper = (caps >> 32) as u32;
    let data = [
        CapUserData {
            effective: lower,
            permitted: lower,
            inheritable: lower,
        },
        CapUserData {
            effective: upper,
            permitted: upper,
            inheritable: upper,
        },
    ];
    capset(&data)?;

    for cap in 0..=last_cap() {
        if caps & (1u64 << cap) == 0 {
            continue;
        }
        let ret = unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_RAISE as libc::c_ulong,
                libc::c_ulong::from(cap),
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        if ret != 0 {
            return Err(format!(
                "prctl(PR_CAP_AMBIENT_RAISE, {cap}) failed: {}",
                std::io::Error::last_os_error()
            ));
        }
    }
    Ok(())
}

/// Clear the inheritable set. Used when the uid changed but no explicit
/// capability mask was declared; inheritable bits can be non-zero when init
/// itself runs in a container.
pub fn drop_inheritable_caps() -> Result<(), String> {
    let mut data = capget()?;
    data[0].inheritable = 0;
    data[1].inheritable = 0;
    capset(&data)
}
