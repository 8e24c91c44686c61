use std::fs::File;
use std::io::{Read, Write};

const LOCK_FILE_PATH: &str = "/tmp/tame.lock";

/// Try to acquire the single-instance lock.
/// Returns Some(File) if we acquired the lock (and may drive the volume).
/// Returns None if another live instance holds it; two limiters would fight.
pub fn try_acquire_instance_lock() -> Option<File> {
    if let Ok(mut file) = std::fs::OpenOptions::new().read(true).open(LOCK_FILE_PATH) {
        let mut pid_str = String::new();
        if file.read_to_string(&mut pid_str).is_ok() {
            if let Ok(pid) = pid_str.trim().parse::<i32>() {
                if pid != std::process::id() as i32 && process_alive(pid) {
                    return None;
                }
            }
        }
    }

    // Missing or stale: take it over
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(LOCK_FILE_PATH)
        .ok()?;
    write!(file, "{}", std::process::id()).ok()?;
    Some(file)
}

pub fn release_instance_lock() {
    let _ = std::fs::remove_file(LOCK_FILE_PATH);
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: alive, just owned by another user
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}
