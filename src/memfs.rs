//! An in-memory filesystem.
//!
//! A flat map from cleaned paths to nodes (directories and byte-vector
//! files) behind a shared lock, implementing the [`Filesystem`] collaborator
//! trait. Suits guests that need a small working tree and the tests in this
//! repository; it is not a general-purpose filesystem.
//!
//! File modification times are taken from an optionally attached clock;
//! without one they stay 0.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use crate::clock::Clock;
use crate::fs::{clean_path, Caps, DirEntry, Filesystem, Handle, Metadata};
use crate::types::{Errno, Filetype, FsResult, OpenMode, Whence};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
enum Node {
    Dir,
    File { data: Vec<u8>, mtim: u64 },
}

impl Node {
    fn filetype(&self) -> Filetype {
        match self {
            Node::Dir => Filetype::Directory,
            Node::File { .. } => Filetype::RegularFile,
        }
    }
}

type Nodes = HashMap<String, Node>;

fn lock(nodes: &Arc<Mutex<Nodes>>) -> FsResult<MutexGuard<'_, Nodes>> {
    nodes.lock().map_err(|_| Errno::Busy)
}

/// The parent path of `path`; the root is its own parent.
fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, base)| base).unwrap_or(path)
}

/// The path as reported in stat metadata: the root displays as "/".
fn display_name(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// An in-memory [`Filesystem`]. Cloning shares the same tree.
#[derive(Clone)]
pub struct MemFs {
    nodes: Arc<Mutex<Nodes>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl MemFs {
    pub fn new() -> MemFs {
        let mut nodes = Nodes::new();
        nodes.insert(String::new(), Node::Dir);
        MemFs {
            nodes: Arc::new(Mutex::new(nodes)),
            clock: None,
        }
    }

    /// Attaches a clock used to timestamp file writes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> MemFs {
        self.clock = Some(clock);
        self
    }

    fn now(&self) -> u64 {
        self.clock.as_ref().map(|c| c.now()).unwrap_or(0)
    }

    /// Host-side seeding helper: creates or replaces the file at `path`.
    /// The parent directory must exist.
    pub fn write_file(&self, path: &str, contents: &[u8]) -> FsResult<()> {
        let path = clean_path(path);
        if path.is_empty() {
            return Err(Errno::IsDir);
        }
        let mtim = self.now();
        let mut nodes = lock(&self.nodes)?;
        match nodes.get(parent(&path)) {
            Some(Node::Dir) => {}
            Some(_) => return Err(Errno::NotDir),
            None => return Err(Errno::NoEnt),
        }
        nodes.insert(
            path,
            Node::File {
                data: contents.to_vec(),
                mtim,
            },
        );
        Ok(())
    }
}

impl Default for MemFs {
    fn default() -> MemFs {
        MemFs::new()
    }
}

impl Filesystem for MemFs {
    fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Box<dyn Handle>> {
        let path = clean_path(path);
        let readable = mode.contains(OpenMode::READ);
        let writable = mode.contains(OpenMode::WRITE) || mode.contains(OpenMode::APPEND);
        let now = self.now();
        {
            let mut nodes = lock(&self.nodes)?;
            match nodes.get_mut(&path) {
                Some(Node::Dir) => {
                    if mode.contains(OpenMode::CREATE) && mode.contains(OpenMode::EXCLUSIVE) {
                        return Err(Errno::Exist);
                    }
                }
                Some(Node::File { data, mtim }) => {
                    if mode.contains(OpenMode::DIRECTORY) {
                        return Err(Errno::NotDir);
                    }
                    if mode.contains(OpenMode::CREATE) && mode.contains(OpenMode::EXCLUSIVE) {
                        return Err(Errno::Exist);
                    }
                    if mode.contains(OpenMode::TRUNCATE) {
                        data.clear();
                        *mtim = now;
                    }
                }
                None => {
                    if !mode.contains(OpenMode::CREATE) || mode.contains(OpenMode::DIRECTORY) {
                        return Err(Errno::NoEnt);
                    }
                    match nodes.get(parent(&path)) {
                        Some(Node::Dir) => {}
                        Some(_) => return Err(Errno::NotDir),
                        None => return Err(Errno::NoEnt),
                    }
                    nodes.insert(
                        path.clone(),
                        Node::File {
                            data: Vec::new(),
                            mtim: now,
                        },
                    );
                }
            }
        }
        Ok(Box::new(MemFile {
            nodes: Arc::clone(&self.nodes),
            clock: self.clock.clone(),
            path,
            pos: 0,
            readable,
            writable,
            append: mode.contains(OpenMode::APPEND),
        }))
    }

    fn stat(&mut self, path: &str) -> FsResult<Metadata> {
        let path = clean_path(path);
        let nodes = lock(&self.nodes)?;
        match nodes.get(&path) {
            Some(node) => Ok(metadata(&path, node)),
            None => Err(Errno::NoEnt),
        }
    }

    fn read_dir(&mut self, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = clean_path(path);
        let nodes = lock(&self.nodes)?;
        match nodes.get(&path) {
            Some(Node::Dir) => {}
            Some(_) => return Err(Errno::NotDir),
            None => return Err(Errno::NoEnt),
        }
        let mut entries: Vec<DirEntry> = nodes
            .iter()
            .filter(|(name, _)| !name.is_empty() && parent(name) == path)
            .map(|(name, node)| DirEntry {
                name: base_name(name).to_string(),
                filetype: node.filetype(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_dir(&mut self, path: &str) -> FsResult<()> {
        let path = clean_path(path);
        let mut nodes = lock(&self.nodes)?;
        if nodes.contains_key(&path) {
            return Err(Errno::Exist);
        }
        match nodes.get(parent(&path)) {
            Some(Node::Dir) => {}
            Some(_) => return Err(Errno::NotDir),
            None => return Err(Errno::NoEnt),
        }
        nodes.insert(path, Node::Dir);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> FsResult<()> {
        let path = clean_path(path);
        if path.is_empty() {
            return Err(Errno::Inval);
        }
        let mut nodes = lock(&self.nodes)?;
        let is_dir = match nodes.get(&path) {
            None => return Err(Errno::NoEnt),
            Some(Node::Dir) => true,
            Some(_) => false,
        };
        if is_dir {
            let prefix = format!("{}/", path);
            if nodes.keys().any(|name| name.starts_with(&prefix)) {
                return Err(Errno::NotEmpty);
            }
        }
        nodes.remove(&path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let from = clean_path(from);
        let to = clean_path(to);
        if from.is_empty() || to.is_empty() {
            return Err(Errno::Inval);
        }
        let mut nodes = lock(&self.nodes)?;
        if !nodes.contains_key(&from) {
            return Err(Errno::NoEnt);
        }
        match nodes.get(parent(&to)) {
            Some(Node::Dir) => {}
            Some(_) => return Err(Errno::NotDir),
            None => return Err(Errno::NoEnt),
        }
        let prefix = format!("{}/", from);
        let moved: Vec<String> = nodes
            .keys()
            .filter(|name| **name == from || name.starts_with(&prefix))
            .cloned()
            .collect();
        for name in moved {
            if let Some(node) = nodes.remove(&name) {
                let dest = format!("{}{}", to, &name[from.len()..]);
                nodes.insert(dest, node);
            }
        }
        Ok(())
    }
}

fn metadata(path: &str, node: &Node) -> Metadata {
    match node {
        Node::Dir => Metadata {
            name: display_name(path),
            filetype: Filetype::Directory,
            size: 0,
            mtim: 0,
        },
        Node::File { data, mtim } => Metadata {
            name: display_name(path),
            filetype: Filetype::RegularFile,
            size: data.len() as u64,
            mtim: *mtim,
        },
    }
}

/// A handle into a [`MemFs`] node.
struct MemFile {
    nodes: Arc<Mutex<Nodes>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    path: String,
    pos: u64,
    readable: bool,
    writable: bool,
    append: bool,
}

impl MemFile {
    fn now(&self) -> u64 {
        self.clock.as_ref().map(|c| c.now()).unwrap_or(0)
    }
}

impl Handle for MemFile {
    fn caps(&self) -> Caps {
        let mut caps = Caps::SEEK | Caps::STAT;
        if self.readable {
            caps = caps | Caps::READ;
        }
        if self.writable {
            caps = caps | Caps::WRITE;
        }
        caps
    }

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if !self.readable {
            return Err(Errno::Badf);
        }
        let nodes = lock(&self.nodes)?;
        match nodes.get(&self.path) {
            Some(Node::File { data, .. }) => {
                let pos = self.pos.min(data.len() as u64) as usize;
                let n = (data.len() - pos).min(buf.len());
                buf[..n].copy_from_slice(&data[pos..pos + n]);
                self.pos += n as u64;
                Ok(n)
            }
            Some(Node::Dir) => Err(Errno::IsDir),
            None => Err(Errno::NoEnt),
        }
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        if !self.writable {
            return Err(Errno::Badf);
        }
        let now = self.now();
        let mut nodes = lock(&self.nodes)?;
        match nodes.get_mut(&self.path) {
            Some(Node::File { data, mtim }) => {
                if self.append {
                    self.pos = data.len() as u64;
                }
                let pos = self.pos as usize;
                if data.len() < pos + buf.len() {
                    data.resize(pos + buf.len(), 0);
                }
                data[pos..pos + buf.len()].copy_from_slice(buf);
                self.pos += buf.len() as u64;
                *mtim = now;
                Ok(buf.len())
            }
            Some(Node::Dir) => Err(Errno::IsDir),
            None => Err(Errno::NoEnt),
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> FsResult<u64> {
        let len = {
            let nodes = lock(&self.nodes)?;
            match nodes.get(&self.path) {
                Some(Node::File { data, .. }) => data.len() as i64,
                Some(Node::Dir) => 0,
                None => return Err(Errno::NoEnt),
            }
        };
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos as i64,
            Whence::End => len,
        };
        let target = base.checked_add(offset).ok_or(Errno::Inval)?;
        if target < 0 {
            return Err(Errno::Inval);
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    fn stat(&self) -> FsResult<Metadata> {
        let nodes = lock(&self.nodes)?;
        match nodes.get(&self.path) {
            Some(node) => Ok(metadata(&self.path, node)),
            None => Err(Errno::NoEnt),
        }
    }
}
