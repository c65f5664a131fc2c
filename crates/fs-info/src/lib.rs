//! Volume information for a path.
//!
//! Provides the device id, filesystem type and read-only state of the
//! volume a path lives on.

use std::io;
use std::path::Path;

/// Information about the volume holding a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Device id, as reported by `stat`.
    pub dev: u64,
    /// The filesystem type (e.g., "btrfs", "ext4", "xfs")
    pub fs_type: Option<String>,
    /// Mounted read-only.
    pub readonly: bool,
}

/// Get volume information for a path.
#[cfg(unix)]
pub fn volume_info(path: &Path) -> io::Result<VolumeInfo> {
    use nix::sys::statvfs::{FsFlags, statvfs};
    use std::os::unix::fs::MetadataExt;

    let dev = std::fs::metadata(path)?.dev();
    let vfs = statvfs(path).map_err(io::Error::from)?;

    Ok(VolumeInfo {
        dev,
        fs_type: fs_type(path),
        readonly: vfs.flags().contains(FsFlags::ST_RDONLY),
    })
}

#[cfg(not(unix))]
pub fn volume_info(_path: &Path) -> io::Result<VolumeInfo> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "volume information is only available on unix",
    ))
}

/// Filesystem magic numbers (from magic.h) for the common cases.
#[cfg(any(target_os = "linux", target_os = "android"))]
const KNOWN_FILESYSTEMS: &[(u64, &str)] = &[
    (0x9123683E, "btrfs"),
    (0xEF53, "ext4"), // also ext2/ext3
    (0x58465342, "xfs"),
    (0x2fc12fc1, "zfs"),
    (0xf2f52010, "f2fs"),
    (0x01021994, "tmpfs"),
    (0x858458f6, "ramfs"),
    (0x794c7630, "overlayfs"),
    (0x65735546, "fuse"),
    (0x6969, "nfs"),
    (0xfe534d42, "smb2"),
    (0xff534d42, "cifs"),
    (0x4d44, "vfat"),
    (0x5346544e, "ntfs"),
    (0x73717368, "squashfs"),
    (0x9fa0, "proc"),
    (0x62656572, "sysfs"),
];

#[cfg(any(target_os = "linux", target_os = "android"))]
fn fs_type(path: &Path) -> Option<String> {
    let stat = nix::sys::statfs::statfs(path).ok()?;
    let magic = (stat.filesystem_type().0 as u64) & 0xffff_ffff;
    KNOWN_FILESYSTEMS
        .iter()
        .find(|(known, _)| *known == magic)
        .map(|(_, name)| name.to_string())
}

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
fn fs_type(path: &Path) -> Option<String> {
    let stat = nix::sys::statfs::statfs(path).ok()?;
    Some(stat.filesystem_type_name().to_string())
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "freebsd"
    ))
))]
fn fs_type(_path: &Path) -> Option<String> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_volume_info_matches_stat() {
        let dir = tempfile::tempdir().unwrap();
        let info = volume_info(dir.path()).unwrap();
        assert_eq!(info.dev, std::fs::metadata(dir.path()).unwrap().dev());
        assert!(!info.readonly);
    }

    #[test]
    fn test_volume_info_missing_path() {
        let err = volume_info(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
