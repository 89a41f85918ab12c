//! Character-device special files: `/dev/null`, `/dev/zero`, `/dev/tty0`.
//!
//! A special-file vnode's `read`/`write` never go through its owning
//! filesystem's `VnodeOps`; they dispatch on the `devid` stamped on the
//! vnode at `mknod` time instead. Block devices are out of scope for this
//! core (no block-backed mmobj), so they are mirrored here only to reject
//! `read`/`write` with `ENXIO`.

use crate::error::{Errno, KResult};
use crate::fs::vnode::{VnodeKind, VnodeRef};

/// `MKDEVID`: packs (major, minor) into the single `u32` stamped on a
/// device vnode, mirroring the original's bit-packed `devid_t`.
pub const fn mkdevid(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

pub const DEV_NULL: u32 = mkdevid(1, 3);
pub const DEV_ZERO: u32 = mkdevid(1, 5);
pub const DEV_TTY0: u32 = mkdevid(4, 0);

/// Reads from the char device named by `devid` at the vnode level (offset is
/// accepted for interface symmetry with `VnodeOps::read` but ignored by
/// every device in this table, matching their original semantics).
pub fn read(devid: u32, buf: &mut [u8]) -> KResult<usize> {
    match devid {
        DEV_NULL => Ok(0),
        DEV_ZERO => {
            buf.fill(0);
            Ok(buf.len())
        }
        DEV_TTY0 => Ok(0),
        _ => Err(Errno::ENXIO),
    }
}

pub fn write(devid: u32, buf: &[u8]) -> KResult<usize> {
    match devid {
        DEV_NULL => Ok(buf.len()),
        DEV_ZERO => Ok(buf.len()),
        DEV_TTY0 => {
            for &b in buf {
                crate::serial::_print(format_args!("{}", b as char));
            }
            Ok(buf.len())
        }
        _ => Err(Errno::ENXIO),
    }
}

/// Routes a read through a vnode if it names a character device; `None` if
/// `vn` isn't a device at all (caller should fall through to `VnodeOps`).
/// `Some(Err(ENXIO))` for a block device, per the restriction above.
pub fn vnode_read(vn: &VnodeRef, buf: &mut [u8]) -> Option<KResult<usize>> {
    match (vn.kind, vn.devid) {
        (VnodeKind::CharDevice, Some(devid)) => Some(read(devid, buf)),
        (VnodeKind::BlockDevice, _) => Some(Err(Errno::ENXIO)),
        _ => None,
    }
}

pub fn vnode_write(vn: &VnodeRef, buf: &[u8]) -> Option<KResult<usize>> {
    match (vn.kind, vn.devid) {
        (VnodeKind::CharDevice, Some(devid)) => Some(write(devid, buf)),
        (VnodeKind::BlockDevice, _) => Some(Err(Errno::ENXIO)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_zero_fills_the_whole_buffer() {
        let mut buf = [0xFFu8; 8];
        assert_eq!(read(DEV_ZERO, &mut buf).unwrap(), 8);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn dev_null_read_is_always_eof() {
        let mut buf = [0xFFu8; 8];
        assert_eq!(read(DEV_NULL, &mut buf).unwrap(), 0);
    }

    #[test]
    fn dev_null_write_discards_and_reports_full_length() {
        assert_eq!(write(DEV_NULL, b"hello").unwrap(), 5);
    }

    #[test]
    fn unknown_devid_is_enxio() {
        assert_eq!(read(0xDEAD_BEEF, &mut [0u8; 1]), Err(Errno::ENXIO));
    }
}
