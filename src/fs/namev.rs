//! Path resolution: `lookup`, `dir_namev`, `open_namev`.
//!
//! Components are split on `/`; runs of empty components collapse to
//! nothing, so `"/a//b"` resolves identically to `"/a/b"`. Both
//! entry points take `root`/`cwd` explicitly rather than reaching for a
//! global — a process's cwd changes via `do_chdir`, and `root` is whatever
//! vnode the caller mounted as `/`. Every vnode handed back through
//! `dir_namev`/`open_namev` carries one fresh logical reference the caller
//! must `vput`; intermediate vnodes visited along the way are `vput` before
//! moving on.

use alloc::vec::Vec;

use crate::config::NAME_LEN;
use crate::error::{Errno, KResult};
use crate::fs::vnode::{vput, vref, VnodeKind, VnodeRef};

/// Splits `path` on `/`, dropping empty components (leading, trailing, or
/// from a run of consecutive slashes).
fn split_components(path: &str) -> KResult<Vec<&str>> {
    let mut out = Vec::new();
    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }
        if part.len() > NAME_LEN {
            return Err(Errno::ENAMETOOLONG);
        }
        out.push(part);
    }
    Ok(out)
}

/// `dir_namev`: resolves every component but the last, returning the
/// directory it lives in (a fresh reference) plus the last component's name.
/// An empty `path` (after component-splitting) names `cwd`/`root` itself —
/// the caller is left holding a second reference to it and an empty name,
/// matching the treatment of a path like `"/"` or `""`.
pub fn dir_namev<'a>(path: &'a str, root: &VnodeRef, cwd: &VnodeRef) -> KResult<(VnodeRef, &'a str)> {
    let components = split_components(path)?;
    let absolute = path.starts_with('/');
    if components.is_empty() {
        return Ok((vref(if absolute { root } else { cwd }), ""));
    }

    let mut cur = vref(if absolute { root } else { cwd });
    for comp in &components[..components.len() - 1] {
        let next = crate::fs::vnode::lookup(&cur, comp);
        vput(cur);
        cur = next?;
    }
    Ok((cur, components[components.len() - 1]))
}

/// `open_namev`: full path resolution. `create` requests the final component
/// be created (as a plain regular file) if it does not already exist;
/// otherwise a missing final component is `ENOENT`. If the original path
/// ended in `/`, the resolved vnode must be a directory, else `ENOTDIR`.
pub fn open_namev(path: &str, create: bool, root: &VnodeRef, cwd: &VnodeRef) -> KResult<VnodeRef> {
    let trailing_slash = path.ends_with('/');
    let (dir, name) = dir_namev(path, root, cwd)?;
    if name.is_empty() {
        return Ok(dir);
    }
    let result = crate::fs::vnode::lookup(&dir, name);
    let vn = match result {
        Ok(vn) => {
            vput(dir);
            vn
        }
        Err(Errno::ENOENT) if create => {
            let created = dir.ops.create(dir.ino, name);
            vput(dir);
            created?
        }
        Err(e) => {
            vput(dir);
            return Err(e);
        }
    };
    if trailing_slash && vn.kind != VnodeKind::Directory {
        vput(vn);
        return Err(Errno::ENOTDIR);
    }
    Ok(vn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::{root, RamFs};
    use crate::fs::vnode::VnodeKind;

    #[test]
    fn dir_namev_splits_off_the_last_component() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mkdir(r.ino, "a").unwrap();
        let a = fs.lookup(r.ino, "a").unwrap();
        fs.mknod(a.ino, "b.txt", VnodeKind::Regular, None).unwrap();

        let (dir, name) = dir_namev("/a/b.txt", &r, &r).unwrap();
        assert_eq!(name, "b.txt");
        assert_eq!(dir.ino, a.ino);
        vput(dir);
    }

    #[test]
    fn empty_path_components_are_skipped() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mkdir(r.ino, "a").unwrap();
        let a = fs.lookup(r.ino, "a").unwrap();
        fs.mknod(a.ino, "b.txt", VnodeKind::Regular, None).unwrap();

        let (dir, name) = dir_namev("/a//b.txt", &r, &r).unwrap();
        assert_eq!(name, "b.txt");
        assert_eq!(dir.ino, a.ino);
        vput(dir);
    }

    #[test]
    fn relative_path_resolves_against_cwd_not_root() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mkdir(r.ino, "a").unwrap();
        let a = fs.lookup(r.ino, "a").unwrap();
        fs.mknod(a.ino, "b.txt", VnodeKind::Regular, None).unwrap();

        let vn = open_namev("b.txt", false, &r, &a).unwrap();
        assert_eq!(vn.ino, fs.lookup(a.ino, "b.txt").unwrap().ino);
        vput(vn);
        vput(a);
    }

    #[test]
    fn open_namev_resolves_an_existing_file() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mknod(r.ino, "f.txt", VnodeKind::Regular, None).unwrap();
        let vn = open_namev("f.txt", false, &r, &r).unwrap();
        assert_eq!(vn.kind, VnodeKind::Regular);
        vput(vn);
    }

    #[test]
    fn open_namev_without_create_on_missing_file_is_enoent() {
        let fs = RamFs::new();
        let r = root(&fs);
        assert_eq!(open_namev("missing.txt", false, &r, &r), Err(Errno::ENOENT));
    }

    #[test]
    fn open_namev_with_create_makes_a_new_regular_file() {
        let fs = RamFs::new();
        let r = root(&fs);
        let vn = open_namev("new.txt", true, &r, &r).unwrap();
        assert_eq!(vn.kind, VnodeKind::Regular);
        vput(vn);
        assert!(fs.lookup(r.ino, "new.txt").is_ok());
    }

    #[test]
    fn open_namev_with_trailing_slash_on_a_regular_file_is_enotdir() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mknod(r.ino, "f.txt", VnodeKind::Regular, None).unwrap();
        assert_eq!(open_namev("f.txt/", false, &r, &r), Err(Errno::ENOTDIR));
    }

    #[test]
    fn open_namev_with_trailing_slash_on_a_directory_succeeds() {
        let fs = RamFs::new();
        let r = root(&fs);
        fs.mkdir(r.ino, "a").unwrap();
        let vn = open_namev("a/", false, &r, &r).unwrap();
        assert_eq!(vn.kind, VnodeKind::Directory);
        vput(vn);
    }

    #[test]
    fn component_longer_than_name_len_is_enametoolong() {
        let fs = RamFs::new();
        let r = root(&fs);
        let long = "a".repeat(NAME_LEN + 1);
        assert_eq!(open_namev(&long, true, &r, &r), Err(Errno::ENAMETOOLONG));
    }
}
