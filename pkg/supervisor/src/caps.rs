//! Capability narrowing for the re-executed launcher.
//!
//! A non-root child gets its capabilities after `execve` from the ambient
//! set only. Clearing that set and raising a single capability leaves the
//! child with exactly that one.

use std::io;

use pkg_constants::hypervisor::CAP_NET_BIND_SERVICE;

#[cfg(target_os = "linux")]
const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[cfg(target_os = "linux")]
#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[cfg(target_os = "linux")]
#[repr(C)]
#[derive(Default, Clone, Copy)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Word index and bit mask of `cap` in the two-word v3 capability sets.
fn cap_mask(cap: u32) -> (usize, u32) {
    ((cap / 32) as usize, 1u32 << (cap % 32))
}

/// Keep only CAP_NET_BIND_SERVICE across the next `execve`.
pub fn retain_net_bind_service() -> io::Result<()> {
    retain_only(CAP_NET_BIND_SERVICE)
}

/// Make `cap` the only inheritable and ambient capability of the calling
/// process. If `cap` is not permitted it cannot be raised and both sets end
/// up empty.
///
/// Only raw syscalls are used, so this is safe to call from `pre_exec`.
#[cfg(target_os = "linux")]
pub fn retain_only(cap: u32) -> io::Result<()> {
    let (word, bit) = cap_mask(cap);
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];

    // SAFETY: header and data match the kernel's v3 layout (two data words).
    if unsafe { libc::syscall(libc::SYS_capget, &mut header, data.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let permitted = data[word].permitted & bit != 0;
    for d in data.iter_mut() {
        d.inheritable = 0;
    }
    if permitted {
        data[word].inheritable = bit;
    }

    // SAFETY: same layout as above.
    if unsafe { libc::syscall(libc::SYS_capset, &mut header, data.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // unused arguments must be zero at full width or the kernel returns EINVAL
    // SAFETY: prctl with integer arguments only.
    let rc = unsafe {
        libc::prctl(
            libc::PR_CAP_AMBIENT,
            libc::PR_CAP_AMBIENT_CLEAR_ALL as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if permitted {
        // SAFETY: prctl with integer arguments only.
        let rc = unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_RAISE as libc::c_ulong,
                cap as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn retain_only(_cap: u32) -> io::Result<()> {
    Ok(())
}
