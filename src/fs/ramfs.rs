//! RAMFS — a fully in-memory filesystem, and the concrete `VnodeOps`
//! backing store the VFS tests and the no-real-disk parts of the kernel run
//! against.
//!
//! Nodes are keyed by inode number rather than path (the vnode model
//! is ino-addressed); a directory's contents are just a `(name, ino)` list.
//! `VnodeOps` is implemented for `Arc<RamFs>` rather than `RamFs` itself so
//! every vnode handed back shares the same `Arc` the filesystem is reached
//! through.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{Errno, KResult};
use crate::fs::vnode::{Vnode, VnodeKind, VnodeOps, VnodeRef};

struct RamNode {
    kind: VnodeKind,
    data: Vec<u8>,
    children: Vec<(String, u64)>,
    devid: Option<u32>,
}

pub struct RamFs {
    nodes: Mutex<BTreeMap<u64, RamNode>>,
    next_ino: Mutex<u64>,
}

const ROOT_INO: u64 = 0;

impl RamFs {
    pub fn new() -> Arc<RamFs> {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_INO, RamNode { kind: VnodeKind::Directory, data: Vec::new(), children: Vec::new(), devid: None });
        Arc::new(RamFs { nodes: Mutex::new(nodes), next_ino: Mutex::new(1) })
    }

    fn alloc_ino(&self) -> u64 {
        let mut next = self.next_ino.lock();
        let id = *next;
        *next += 1;
        id
    }

    fn child_ino(&self, parent: u64, name: &str) -> KResult<u64> {
        let nodes = self.nodes.lock();
        let node = nodes.get(&parent).ok_or(Errno::ENOENT)?;
        node.children.iter().find(|(n, _)| n == name).map(|(_, i)| *i).ok_or(Errno::ENOENT)
    }

    fn remove_child(&self, parent: u64, name: &str) -> KResult<u64> {
        let mut nodes = self.nodes.lock();
        let parent_node = nodes.get_mut(&parent).ok_or(Errno::ENOENT)?;
        if parent_node.kind != VnodeKind::Directory {
            return Err(Errno::ENOTDIR);
        }
        let pos = parent_node.children.iter().position(|(n, _)| n == name).ok_or(Errno::ENOENT)?;
        Ok(parent_node.children.remove(pos).1)
    }

    fn insert_child(&self, parent: u64, name: &str, kind: VnodeKind, devid: Option<u32>) -> KResult<u64> {
        let ino = self.alloc_ino();
        let mut nodes = self.nodes.lock();
        {
            let parent_node = nodes.get_mut(&parent).ok_or(Errno::ENOENT)?;
            if parent_node.kind != VnodeKind::Directory {
                return Err(Errno::ENOTDIR);
            }
            if parent_node.children.iter().any(|(n, _)| n == name) {
                return Err(Errno::EEXIST);
            }
            parent_node.children.push((String::from(name), ino));
        }
        nodes.insert(ino, RamNode { kind, data: Vec::new(), children: Vec::new(), devid });
        Ok(ino)
    }
}

impl VnodeOps for Arc<RamFs> {
    fn read(&self, ino: u64, offset: usize, buf: &mut [u8]) -> KResult<usize> {
        let nodes = self.nodes.lock();
        let node = nodes.get(&ino).ok_or(Errno::ENOENT)?;
        if node.kind == VnodeKind::Directory {
            return Err(Errno::EISDIR);
        }
        if offset >= node.data.len() {
            return Ok(0);
        }
        let available = &node.data[offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&self, ino: u64, offset: usize, buf: &[u8]) -> KResult<usize> {
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(&ino).ok_or(Errno::ENOENT)?;
        if node.kind == VnodeKind::Directory {
            return Err(Errno::EISDIR);
        }
        let end = offset + buf.len();
        if end > node.data.len() {
            node.data.resize(end, 0);
        }
        node.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn truncate(&self, ino: u64, len: usize) -> KResult<()> {
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(&ino).ok_or(Errno::ENOENT)?;
        node.data.resize(len, 0);
        Ok(())
    }

    fn size(&self, ino: u64) -> usize {
        self.nodes.lock().get(&ino).map(|n| n.data.len()).unwrap_or(0)
    }

    fn lookup(&self, ino: u64, name: &str) -> KResult<VnodeRef> {
        let child_ino = self.child_ino(ino, name)?;
        let (kind, devid) = {
            let nodes = self.nodes.lock();
            let n = nodes.get(&child_ino).ok_or(Errno::ENOENT)?;
            (n.kind, n.devid)
        };
        Ok(Vnode::new(child_ino, kind, self.clone(), devid))
    }

    fn mknod(&self, ino: u64, name: &str, kind: VnodeKind, devid: Option<u32>) -> KResult<VnodeRef> {
        let child_ino = self.insert_child(ino, name, kind, devid)?;
        Ok(Vnode::new(child_ino, kind, self.clone(), devid))
    }

    fn mkdir(&self, ino: u64, name: &str) -> KResult<VnodeRef> {
        VnodeOps::mknod(self, ino, name, VnodeKind::Directory, None)
    }

    fn rmdir(&self, ino: u64, name: &str) -> KResult<()> {
        let child_ino = self.remove_child(ino, name)?;
        let mut nodes = self.nodes.lock();
        match nodes.get(&child_ino) {
            Some(n) if n.kind != VnodeKind::Directory => Err(Errno::ENOTDIR),
            Some(n) if !n.children.is_empty() => Err(Errno::ENOTEMPTY),
            Some(_) => {
                nodes.remove(&child_ino);
                Ok(())
            }
            None => Err(Errno::ENOENT),
        }
    }

    fn unlink(&self, ino: u64, name: &str) -> KResult<()> {
        let child_ino = self.remove_child(ino, name)?;
        let mut nodes = self.nodes.lock();
        if let Some(n) = nodes.get(&child_ino) {
            if n.kind == VnodeKind::Directory {
                return Err(Errno::EISDIR);
            }
        }
        nodes.remove(&child_ino);
        Ok(())
    }

    fn link(&self, ino: u64, name: &str, target: u64) -> KResult<()> {
        let mut nodes = self.nodes.lock();
        if !nodes.contains_key(&target) {
            return Err(Errno::ENOENT);
        }
        let node = nodes.get_mut(&ino).ok_or(Errno::ENOENT)?;
        if node.kind != VnodeKind::Directory {
            return Err(Errno::ENOTDIR);
        }
        if node.children.iter().any(|(n, _)| n == name) {
            return Err(Errno::EEXIST);
        }
        node.children.push((String::from(name), target));
        Ok(())
    }

    fn readdir(&self, ino: u64, offset: usize) -> KResult<Vec<(String, u64)>> {
        let nodes = self.nodes.lock();
        let node = nodes.get(&ino).ok_or(Errno::ENOENT)?;
        if node.kind != VnodeKind::Directory {
            return Err(Errno::ENOTDIR);
        }
        Ok(node.children.iter().skip(offset).cloned().collect())
    }
}

/// Convenience so callers don't have to spell out `as Arc<dyn VnodeOps>`.
pub fn root(fs: &Arc<RamFs>) -> VnodeRef {
    Vnode::new(ROOT_INO, VnodeKind::Directory, fs.clone(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkdir_then_lookup_finds_the_new_directory() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mkdir(r.ino, "home").unwrap();
        let home = fs.lookup(r.ino, "home").unwrap();
        assert_eq!(home.kind, VnodeKind::Directory);
    }

    #[test]
    fn write_then_read_round_trips() {
        let fs = RamFs::new();
        let r = root(&fs);
        let file = fs.mknod(r.ino, "a.txt", VnodeKind::Regular, None).unwrap();
        file.write(0, b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(file.read(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn rmdir_of_nonempty_directory_is_enotempty() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mkdir(r.ino, "d").unwrap();
        let d = fs.lookup(r.ino, "d").unwrap();
        fs.mknod(d.ino, "x", VnodeKind::Regular, None).unwrap();
        assert_eq!(fs.rmdir(r.ino, "d"), Err(Errno::ENOTEMPTY));
    }

    #[test]
    fn lookup_of_missing_name_is_enoent() {
        let fs = RamFs::new();
        let r = root(&fs);
        assert_eq!(fs.lookup(r.ino, "nope"), Err(Errno::ENOENT));
    }

    #[test]
    fn link_adds_a_second_name_for_the_same_inode() {
        let fs = RamFs::new();
        let r = root(&fs);
        let file = fs.mknod(r.ino, "a.txt", VnodeKind::Regular, None).unwrap();
        fs.link(r.ino, "b.txt", file.ino).unwrap();
        let via_b = fs.lookup(r.ino, "b.txt").unwrap();
        assert_eq!(via_b.ino, file.ino);
    }
}
