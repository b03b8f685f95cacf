use std::path::Path;
use std::time::Duration;

/// Time since boot including suspend, the clock all service timestamps use.
/// Wall-clock time jumps when the RTC is corrected during boot, the boot
/// clock does not.
pub fn boot_time() -> Duration {
    match nix::time::clock_gettime(nix::time::ClockId::CLOCK_BOOTTIME) {
        Ok(ts) => Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32),
        // CLOCK_BOOTTIME exists on every kernel we run on; fall back to
        // monotonic if an exotic build lacks it.
        Err(_) => match nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32),
            Err(_) => Duration::ZERO,
        },
    }
}

/// Resolve a user reference (decimal uid or account name) to a `Uid`.
pub fn decode_uid(user: &str) -> Result<nix::unistd::Uid, String> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok(nix::unistd::Uid::from_raw(uid));
    }
    match nix::unistd::User::from_name(user) {
        Ok(Some(entry)) => Ok(entry.uid),
        Ok(None) => Err(format!("No passwd entry for user '{user}'")),
        Err(e) => Err(format!("getpwnam failed for user '{user}': {e}")),
    }
}

/// Resolve a group reference (decimal gid or group name) to a `Gid`.
pub fn decode_gid(group: &str) -> Result<nix::unistd::Gid, String> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(nix::unistd::Gid::from_raw(gid));
    }
    match nix::unistd::Group::from_name(group) {
        Ok(Some(entry)) => Ok(entry.gid),
        Ok(None) => Err(format!("No group entry for group '{group}'")),
        Err(e) => Err(format!("getgrnam failed for group '{group}': {e}")),
    }
}

/// Overwrite `path` with `content`. Used for the small write-only control
/// files (oom_score_adj, cgroup knobs, writepid targets).
pub fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    std::fs::write(path, content)
}
