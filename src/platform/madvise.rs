/*!
 * madvise Dump Exclusion
 * MADV_DONTDUMP on Linux and Android
 */

use super::traits::DumpExclusion;
use nix::errno::Errno;
use std::ffi::c_void;
use std::ptr::NonNull;

#[cfg(any(target_os = "linux", target_os = "android"))]
use nix::sys::mman::{madvise, MmapAdvise};

/// Dump exclusion through `madvise(addr, len, MADV_DONTDUMP)`
///
/// On other platforms `is_supported` is false and `exclude` reports `ENOSYS`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MadviseDontDump;

impl DumpExclusion for MadviseDontDump {
    const NAME: &'static str = "madvise(MADV_DONTDUMP)";

    fn is_supported() -> bool {
        cfg!(any(target_os = "linux", target_os = "android"))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe fn exclude(addr: NonNull<c_void>, len: usize) -> Result<(), Errno> {
        madvise(addr, len, MmapAdvise::MADV_DONTDUMP)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    unsafe fn exclude(_addr: NonNull<c_void>, _len: usize) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "android")))]
mod tests {
    use super::*;
    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
    use std::num::NonZeroUsize;

    #[test]
    fn test_supported_on_linux() {
        assert!(MadviseDontDump::is_supported());
    }

    #[test]
    fn test_excludes_anonymous_mapping() {
        let len = NonZeroUsize::new(4 * 4096).unwrap();
        let addr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();

        let result = unsafe { MadviseDontDump::exclude(addr, len.get()) };
        assert!(result.is_ok());

        unsafe { munmap(addr, len.get()) }.unwrap();
    }

    #[test]
    fn test_unaligned_address_is_rejected() {
        let len = NonZeroUsize::new(2 * 4096).unwrap();
        let addr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();

        let unaligned = unsafe { NonNull::new_unchecked(addr.as_ptr().cast::<u8>().add(1).cast()) };
        let result = unsafe { MadviseDontDump::exclude(unaligned, 4096) };
        assert_eq!(result, Err(Errno::EINVAL));

        unsafe { munmap(addr, len.get()) }.unwrap();
    }
}
