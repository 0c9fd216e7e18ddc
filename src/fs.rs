//! File descriptors and the filesystem adapter.
//!
//! The descriptor table maps small integer descriptors to descriptor
//! records. Descriptors 0, 1 and 2 are the standard streams and live for
//! the whole session; descriptor 3 is the preopened root directory when a
//! filesystem is configured. Descriptors handed out by `path_open` start at
//! 4 and are reference counted: `open` creates one reference, `close`
//! releases it, and the underlying handle is dropped when the count reaches
//! zero.
//!
//! Path operations are keyed on a directory descriptor plus a relative
//! path. Paths are cleaned lexically and a single leading `/` is stripped:
//! the virtual filesystem is rooted, so absolute-looking paths are
//! root-relative.
//!
//! The host filesystem itself is a collaborator behind the [`Filesystem`]
//! and [`Handle`] traits. Which of read/write/seek/stat a descriptor
//! supports is probed at creation time and recorded as an explicit
//! capability set.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use crate::types::{
    Dirent, Errno, Fd, Fdflags, Fdstat, Filestat, Filetype, FsResult, Lookupflags, Oflags,
    OpenMode, Rights, Size, Whence,
};
use crc::{Crc, CRC_64_XZ};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::io::{Read, Write};

/// Descriptors at or below this number are owned by the environment and are
/// neither reference counted nor closable.
pub(crate) const STDIO_MAX_FD: Fd = 3;
/// The preopened root directory, present iff a filesystem is configured.
pub(crate) const ROOT_FD: Fd = 3;

////////////////////////////////////////////////////////////////////////////////
// Collaborator traits.
////////////////////////////////////////////////////////////////////////////////

/// Attributes reported by a [`Filesystem`] or [`Handle`] stat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Path of the object within its filesystem (`"/"` for the root);
    /// empty when unknown.
    pub name: String,
    pub filetype: Filetype,
    /// Size in bytes; 0 for directories and streams.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtim: u64,
}

/// One child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub filetype: Filetype,
}

/// The host virtual filesystem. Implementations resolve the rooted,
/// pre-cleaned paths produced by the adapter (no leading `/`, no dot
/// segments).
pub trait Filesystem: Send {
    /// Opens `path` with the translated host `mode` and returns a handle.
    fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Box<dyn Handle>>;
    fn stat(&mut self, path: &str) -> FsResult<Metadata>;
    /// Lists the children of the directory at `path`.
    fn read_dir(&mut self, path: &str) -> FsResult<Vec<DirEntry>>;
    fn create_dir(&mut self, path: &str) -> FsResult<()>;
    /// Removes a file or an empty directory.
    fn remove(&mut self, path: &str) -> FsResult<()>;
    fn rename(&mut self, from: &str, to: &str) -> FsResult<()>;
}

/// An open file or stream underlying a descriptor. A sink implements the
/// subset of operations it supports and reports that subset via [`caps`];
/// the defaults fail with `NoSys`.
///
/// [`caps`]: Handle::caps
pub trait Handle: Send {
    /// The operations this handle supports.
    fn caps(&self) -> Caps;

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let _ = buf;
        Err(Errno::NoSys)
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let _ = buf;
        Err(Errno::NoSys)
    }

    /// Repositions the handle and returns the new position.
    fn seek(&mut self, offset: i64, whence: Whence) -> FsResult<u64> {
        let _ = (offset, whence);
        Err(Errno::NoSys)
    }

    fn stat(&self) -> FsResult<Metadata> {
        Err(Errno::NoSys)
    }
}

/// The set of operations a descriptor's underlying handle supports,
/// recorded once when the descriptor is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caps(pub u8);

impl Caps {
    pub const READ: Caps = Caps(1);
    pub const WRITE: Caps = Caps(1 << 1);
    pub const SEEK: Caps = Caps(1 << 2);
    pub const STAT: Caps = Caps(1 << 3);

    pub fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Caps {
    type Output = Caps;
    fn bitor(self, rhs: Caps) -> Caps {
        Caps(self.0 | rhs.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Standard streams.
////////////////////////////////////////////////////////////////////////////////

/// The sink behind descriptors 0, 1 and 2: an optional reader and an
/// optional writer. Reading without a reader reports end of stream; writing
/// without a writer is an invalid argument; seeking is unsupported; stat is
/// synthetic.
pub(crate) struct Stream {
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl Stream {
    pub fn new(
        reader: Option<Box<dyn Read + Send>>,
        writer: Option<Box<dyn Write + Send>>,
    ) -> Stream {
        Stream { reader, writer }
    }
}

impl Handle for Stream {
    fn caps(&self) -> Caps {
        let mut caps = Caps::STAT;
        if self.reader.is_some() {
            caps = caps | Caps::READ;
        }
        if self.writer.is_some() {
            caps = caps | Caps::WRITE;
        }
        caps
    }

    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match &mut self.reader {
            Some(reader) => reader.read(buf).map_err(Errno::from),
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        match &mut self.writer {
            Some(writer) => writer.write(buf).map_err(Errno::from),
            None => Err(Errno::Inval),
        }
    }

    fn stat(&self) -> FsResult<Metadata> {
        Ok(Metadata {
            name: String::new(),
            filetype: Filetype::CharacterDevice,
            size: 0,
            mtim: 0,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Descriptor records.
////////////////////////////////////////////////////////////////////////////////

pub(crate) struct FileDesc {
    no: Fd,
    handle: Option<Box<dyn Handle>>,
    caps: Caps,
    pub(crate) fdstat: Fdstat,
    /// Absolute preopen path; non-empty iff this descriptor is a preopen
    /// root.
    pub(crate) preopen: String,
    /// Directory entries, materialized on the first `readdir`.
    entries: Option<Vec<DirEntry>>,
    /// Reference count; not tracked for descriptors <= STDIO_MAX_FD.
    rc: i32,
}

impl FileDesc {
    fn stream(stream: Stream) -> FileDesc {
        let caps = stream.caps();
        FileDesc {
            no: 0,
            handle: Some(Box::new(stream)),
            caps,
            fdstat: Fdstat {
                filetype: Filetype::CharacterDevice,
                ..Fdstat::default()
            },
            preopen: String::new(),
            entries: None,
            rc: 0,
        }
    }

    fn preopen(path: &str) -> FileDesc {
        FileDesc {
            no: 0,
            handle: None,
            caps: Caps(0),
            fdstat: Fdstat {
                filetype: Filetype::Directory,
                ..Fdstat::default()
            },
            preopen: path.to_string(),
            entries: None,
            rc: 0,
        }
    }

    /// Wraps a handle freshly opened from the filesystem, probing its stat
    /// for the descriptor's filetype.
    fn file(handle: Box<dyn Handle>) -> FsResult<FileDesc> {
        let caps = handle.caps();
        let filetype = if caps.contains(Caps::STAT) {
            handle.stat()?.filetype
        } else {
            Filetype::Unknown
        };
        Ok(FileDesc {
            no: 0,
            handle: Some(handle),
            caps,
            fdstat: Fdstat {
                filetype,
                ..Fdstat::default()
            },
            preopen: String::new(),
            entries: None,
            rc: 0,
        })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match &mut self.handle {
            Some(handle) => handle.read(buf),
            None => Err(Errno::Badf),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        match &mut self.handle {
            Some(handle) => handle.write(buf),
            None => Err(Errno::Badf),
        }
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> FsResult<u64> {
        if !self.caps.contains(Caps::SEEK) {
            return Err(Errno::NoSys);
        }
        match &mut self.handle {
            Some(handle) => handle.seek(offset, whence),
            None => Err(Errno::NoSys),
        }
    }

    pub fn metadata(&self) -> FsResult<Metadata> {
        if !self.caps.contains(Caps::STAT) {
            return Err(Errno::NoSys);
        }
        match &self.handle {
            Some(handle) => handle.stat(),
            None => Err(Errno::NoSys),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Inode numbers.
////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    /// CRC-64 with the ECMA polynomial (reflected); inode numbers derived
    /// from it are stable across runs for the same path.
    static ref INO: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);
}

/// The inode number for `name`; when no name is available, for the
/// synthetic path `/proc/fd/<no>`.
fn ino(fd: Fd, name: &str) -> u64 {
    if name.is_empty() {
        return INO.checksum(format!("/proc/fd/{}", fd).as_bytes());
    }
    INO.checksum(name.as_bytes())
}

////////////////////////////////////////////////////////////////////////////////
// The descriptor table and filesystem adapter.
////////////////////////////////////////////////////////////////////////////////

pub(crate) struct FileTable {
    fds: HashMap<Fd, FileDesc>,
    /// The next descriptor number to hand out; monotonically non-decreasing.
    next: Fd,
    fs: Option<Box<dyn Filesystem>>,
    /// Session-wide device number reported in every filestat.
    dev: u64,
}

impl FileTable {
    pub fn new(
        fs: Option<Box<dyn Filesystem>>,
        stdin: Option<Box<dyn Read + Send>>,
        stdout: Option<Box<dyn Write + Send>>,
        stderr: Option<Box<dyn Write + Send>>,
    ) -> FileTable {
        let mut table = FileTable {
            fds: HashMap::new(),
            next: STDIO_MAX_FD + 1,
            fs,
            dev: 0,
        };
        table.set(0, FileDesc::stream(Stream::new(stdin, None)));
        table.set(1, FileDesc::stream(Stream::new(None, stdout)));
        table.set(2, FileDesc::stream(Stream::new(None, stderr)));
        if table.fs.is_some() {
            table.set(ROOT_FD, FileDesc::preopen("/"));
        }
        table
    }

    fn set(&mut self, no: Fd, mut desc: FileDesc) {
        desc.no = no;
        self.fds.insert(no, desc);
        if self.next <= no {
            self.next = no + 1;
        }
    }

    pub fn get(&self, fd: Fd) -> FsResult<&FileDesc> {
        self.fds.get(&fd).ok_or(Errno::Badf)
    }

    pub fn get_mut(&mut self, fd: Fd) -> FsResult<&mut FileDesc> {
        self.fds.get_mut(&fd).ok_or(Errno::Badf)
    }

    /// Installs `desc` under a fresh descriptor number with one reference.
    fn alloc(&mut self, desc: FileDesc) -> Fd {
        let fd = self.next;
        self.next += 1; // TODO: handle wrap-around past u32::MAX
        self.set(fd, desc);
        self.share(fd);
        fd
    }

    fn share(&mut self, fd: Fd) {
        if let Some(desc) = self.fds.get_mut(&fd) {
            if desc.no <= STDIO_MAX_FD {
                return;
            }
            desc.rc += 1;
        }
    }

    fn unshare(&mut self, fd: Fd) {
        if let Some(desc) = self.fds.get_mut(&fd) {
            if desc.no <= STDIO_MAX_FD {
                return;
            }
            desc.rc -= 1;
            if desc.rc <= 0 {
                // The final reference: dropping the record releases the
                // underlying handle.
                self.fds.remove(&fd);
            }
        }
    }

    /// Releases one reference. Closing a standard descriptor is a no-op.
    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        if !self.fds.contains_key(&fd) {
            return Err(Errno::Badf);
        }
        self.unshare(fd);
        Ok(())
    }

    pub fn fdstat(&self, fd: Fd) -> FsResult<Fdstat> {
        Ok(self.get(fd)?.fdstat)
    }

    /// The filestat for `fd`. The filetype is directory if the underlying
    /// stat reports one and regular file otherwise; `nlink` is always 1.
    pub fn stat(&self, fd: Fd) -> FsResult<Filestat> {
        let desc = self.get(fd)?;
        let meta = desc.metadata()?;
        Ok(Filestat {
            dev: self.dev,
            ino: ino(fd, &meta.name),
            filetype: if meta.filetype == Filetype::Directory {
                Filetype::Directory
            } else {
                Filetype::RegularFile
            },
            nlink: 1,
            size: meta.size,
            atim: 0,
            mtim: meta.mtim,
            ctim: 0,
        })
    }

    /// Resolves `name` relative to the directory descriptor `basefd`.
    fn resolve(&self, basefd: Fd, name: &str) -> FsResult<String> {
        let name = clean_path(name);
        if basefd == 0 || (self.fs.is_some() && basefd == ROOT_FD) {
            return Ok(name);
        }
        let desc = self.get(basefd)?;
        if desc.fdstat.filetype != Filetype::Directory {
            return Err(Errno::NotDir);
        }
        if !desc.preopen.is_empty() {
            return Ok(format!("{}{}", desc.preopen, name));
        }
        let meta = desc.metadata()?;
        Ok(join(&meta.name, &name))
    }

    /// Opens a path relative to `basefd` and returns the fresh descriptor.
    pub fn open(
        &mut self,
        basefd: Fd,
        path: &str,
        dirflags: Lookupflags,
        oflags: Oflags,
        fdflags: Fdflags,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> FsResult<Fd> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let path = self.resolve(basefd, path)?;
        let mode = OpenMode::from_wasi(dirflags, oflags, fdflags, rights_base);
        let fs = self.fs.as_mut().ok_or(Errno::NoSys)?;
        let handle = fs.open(&path, mode)?;
        let mut desc = FileDesc::file(handle)?;
        desc.fdstat.flags = fdflags;
        desc.fdstat.rights_base = rights_base;
        desc.fdstat.rights_inheriting = rights_inheriting;
        Ok(self.alloc(desc))
    }

    /// Produces the directory entry at `cookie`, materializing the cached
    /// entry list on the first call for this descriptor (which restarts
    /// iteration at index 0 regardless of the cookie). An out-of-range
    /// cookie yields `None`.
    pub fn readdir(&mut self, fd: Fd, cookie: u64) -> FsResult<Option<(Dirent, String)>> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let desc = self.fds.get_mut(&fd).ok_or(Errno::Badf)?;
        let mut index = cookie as usize;
        if desc.entries.is_none() {
            let dir = if !desc.preopen.is_empty() {
                desc.preopen.clone()
            } else {
                desc.metadata()?.name
            };
            let fs = self.fs.as_mut().ok_or(Errno::NoSys)?;
            desc.entries = Some(fs.read_dir(&dir)?);
            index = 0;
        }
        let entries = desc.entries.as_deref().unwrap_or(&[]);
        let entry = match entries.get(index) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let dirent = Dirent {
            next: index as u64 + 1,
            ino: ino(fd, &entry.name),
            namlen: entry.name.len() as Size,
            dtype: if entry.filetype == Filetype::Directory {
                Filetype::Directory
            } else {
                Filetype::RegularFile
            },
        };
        Ok(Some((dirent, entry.name.clone())))
    }

    pub fn create_dir(&mut self, fd: Fd, name: &str) -> FsResult<()> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let path = self.resolve(fd, name)?;
        self.fs.as_mut().ok_or(Errno::NoSys)?.create_dir(&path)
    }

    pub fn remove(&mut self, fd: Fd, name: &str) -> FsResult<()> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let path = self.resolve(fd, name)?;
        self.fs.as_mut().ok_or(Errno::NoSys)?.remove(&path)
    }

    /// Removes a directory; the target must stat as one.
    pub fn remove_dir(&mut self, fd: Fd, name: &str) -> FsResult<()> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let path = self.resolve(fd, name)?;
        let fs = self.fs.as_mut().ok_or(Errno::NoSys)?;
        let meta = fs.stat(&path)?;
        if meta.filetype != Filetype::Directory {
            return Err(Errno::NotDir);
        }
        fs.remove(&path)
    }

    pub fn rename(&mut self, fd: Fd, old: &str, new: &str) -> FsResult<()> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let old = self.resolve(fd, old)?;
        let new = self.resolve(fd, new)?;
        self.fs.as_mut().ok_or(Errno::NoSys)?.rename(&old, &new)
    }

    /// The trivial readlink: the base name of whatever the path stats as.
    pub fn readlink(&mut self, fd: Fd, name: &str) -> FsResult<String> {
        if self.fs.is_none() {
            return Err(Errno::NoSys);
        }
        let path = self.resolve(fd, name)?;
        let meta = self.fs.as_mut().ok_or(Errno::NoSys)?.stat(&path)?;
        let base = meta.name.rsplit('/').next().unwrap_or("");
        Ok(base.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Path handling.
////////////////////////////////////////////////////////////////////////////////

/// Lexically cleans `name`: dot and dot-dot segments are collapsed, empty
/// segments dropped, and a single leading `/` stripped. The cleaned root is
/// the empty string.
pub(crate) fn clean_path(name: &str) -> String {
    let rooted = name.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in name.split('/') {
        match seg {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") => parts.push(".."),
                Some(_) => {
                    parts.pop();
                }
                None if !rooted => parts.push(".."),
                None => {}
            },
            seg => parts.push(seg),
        }
    }
    parts.join("/")
}

fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return name.to_string();
    }
    if name.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base, name)
}
