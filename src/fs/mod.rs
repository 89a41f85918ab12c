//! Virtual filesystem: vnode abstraction, path resolution, the per-process
//! fd table, device special files, and the one in-memory filesystem this
//! core ships (no mount table, no real block device).

pub mod device;
pub mod file;
pub mod namev;
pub mod ramfs;
pub mod vnode;

use lazy_static::lazy_static;

use vnode::VnodeRef;

lazy_static! {
    /// The single backing store mounted at `/`. This core has exactly one
    /// filesystem and no `mount`/`unmount` surface.
    static ref ROOT_FS: alloc::sync::Arc<ramfs::RamFs> = ramfs::RamFs::new();
}

/// A fresh logical reference to the root vnode, for `proc_create`'s cwd and
/// any syscall that needs to start an absolute-path resolution.
pub fn vfs_root() -> VnodeRef {
    vnode::vref(&ramfs::root(&ROOT_FS))
}

/// Populates `/dev/null`, `/dev/zero`, `/dev/tty0` and a couple of starter
/// files against the vnode/ramfs API.
pub fn init() {
    let fs = &*ROOT_FS;
    let root = ramfs::root(fs);

    let _ = fs.mkdir(root.ino, "dev");
    if let Ok(dev) = fs.lookup(root.ino, "dev") {
        let _ = fs.mknod(dev.ino, "null", vnode::VnodeKind::CharDevice, Some(device::DEV_NULL));
        let _ = fs.mknod(dev.ino, "zero", vnode::VnodeKind::CharDevice, Some(device::DEV_ZERO));
        let _ = fs.mknod(dev.ino, "tty0", vnode::VnodeKind::CharDevice, Some(device::DEV_TTY0));
        vnode::vput(dev);
    }

    let _ = fs.mkdir(root.ino, "etc");
    if let Ok(etc) = fs.lookup(root.ino, "etc") {
        if let Ok(hostname) = fs.create(etc.ino, "hostname") {
            let _ = hostname.write(0, b"atomicos\n");
            vnode::vput(hostname);
        }
        vnode::vput(etc);
    }

    vnode::vput(root);
    crate::log_info!("VFS initialized: ramfs at /, /dev seeded.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfs_root_hands_out_a_fresh_reference_each_call() {
        let a = vfs_root();
        let before = a.refcount();
        let b = vfs_root();
        assert_eq!(a.refcount(), before + 1);
        vnode::vput(a);
        vnode::vput(b);
    }
}
