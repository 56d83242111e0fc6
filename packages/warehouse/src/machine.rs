use std::fmt::Debug;

/// Operating system queries the supervisor needs to size its reservation.
///
/// All OS calls go through this trait, enabling them to be mocked in tests. Production
/// code uses [`BuildTargetBindings`]; callers who need determinism instead override the
/// total via the supervisor builder, which bypasses the bindings entirely.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    /// Total physical memory installed in the system, in bytes.
    fn total_physical_memory(&self) -> usize;
}

/// Bindings for the operating system this build targets.
#[derive(Debug)]
pub(crate) struct BuildTargetBindings;

impl Bindings for BuildTargetBindings {
    #[cfg(unix)]
    fn total_physical_memory(&self) -> usize {
        // SAFETY: sysconf is always safe to call with a valid name constant.
        let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };

        // SAFETY: As above.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };

        usize::try_from(pages)
            .ok()
            .zip(usize::try_from(page_size).ok())
            .and_then(|(pages, page_size)| pages.checked_mul(page_size))
            .expect("the OS reports no usable physical memory size - cannot size the reservation")
    }

    #[cfg(windows)]
    fn total_physical_memory(&self) -> usize {
        use windows::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

        let mut status = MEMORYSTATUSEX {
            dwLength: u32::try_from(size_of::<MEMORYSTATUSEX>())
                .expect("MEMORYSTATUSEX is a small fixed-size struct"),
            ..Default::default()
        };

        // SAFETY: The pointer refers to a live MEMORYSTATUSEX with dwLength filled in.
        unsafe { GlobalMemoryStatusEx(&mut status) }
            .expect("the OS reports no usable physical memory size - cannot size the reservation");

        usize::try_from(status.ullTotalPhys)
            .expect("physical memory size always fits in usize on supported targets")
    }

    #[cfg(not(any(unix, windows)))]
    fn total_physical_memory(&self) -> usize {
        // No memory query on this platform; assume a modest machine. Callers that care
        // should set the total explicitly via the supervisor builder.
        const ASSUMED_TOTAL: u64 = 16 * 1024 * 1024 * 1024;

        usize::try_from(ASSUMED_TOTAL).unwrap_or(usize::MAX)
    }
}
