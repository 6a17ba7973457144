//! Deterministic content hashing of filesystem trees
//!
//! Entries are visited in byte order of their names. Each entry contributes
//! its relative path, its type, its permission bits and its content (file
//! bytes or symlink target). Timestamps and ownership are ignored so that the
//! same content hashes the same wherever it was unpacked.

use repro_core::{ContentHash, ReproError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Hash the tree (or single file) at `root` without modifying it
pub fn scan_tree(root: &Path) -> Result<ContentHash> {
    let meta = fs::symlink_metadata(root).map_err(|e| {
        ReproError::Transport(format!("cannot scan {}: {}", root.display(), e))
    })?;

    let mut hasher = Sha256::new();
    if meta.is_dir() {
        hasher.update(b"d\0");
        visit_dir(&mut hasher, root, "")?;
    } else {
        hash_entry(&mut hasher, root, ".", &meta)?;
    }

    Ok(ContentHash::new(hex::encode(hasher.finalize())))
}

fn visit_dir(hasher: &mut Sha256, dir: &Path, prefix: &str) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let rel = format!("{}/{}", prefix, name.to_string_lossy());
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;
        hash_entry(hasher, &path, &rel, &meta)?;
        if meta.is_dir() {
            visit_dir(hasher, &path, &rel)?;
        }
    }
    Ok(())
}

fn hash_entry(hasher: &mut Sha256, path: &Path, rel: &str, meta: &fs::Metadata) -> Result<()> {
    let file_type = meta.file_type();
    let tag: &[u8] = if file_type.is_dir() {
        b"d"
    } else if file_type.is_file() {
        b"f"
    } else if file_type.is_symlink() {
        b"l"
    } else {
        return Err(ReproError::Transport(format!(
            "cannot scan special file {}",
            path.display()
        )));
    };

    hasher.update(tag);
    hasher.update(rel.as_bytes());
    hasher.update([0u8]);
    hasher.update(mode_bits(meta).to_be_bytes());

    if file_type.is_file() {
        hasher.update(meta.len().to_be_bytes());
        hasher.update(file_digest(path)?);
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        hasher.update(target.to_string_lossy().as_bytes());
        hasher.update([0u8]);
    }
    Ok(())
}

fn file_digest(path: &Path) -> Result<[u8; 32]> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    if meta.file_type().is_symlink() {
        // symlink permissions are meaningless and vary by platform
        0
    } else {
        meta.permissions().mode() & 0o7777
    }
}

#[cfg(not(unix))]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
