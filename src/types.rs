//! WASI preview1 ABI types.
//!
//! Every structure that crosses the guest/host boundary has a fixed
//! little-endian layout shared with the guest's libc. Rather than punning
//! host structs over guest memory, each type carries an explicit codec
//! (`Pack`/`Unpack`) that reads and writes its exact byte layout, padding
//! included.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::warn;
use std::io::{self, Cursor};

/// `size_t` on the guest side.
pub type Size = u32;
/// A 32-bit guest pointer into linear memory.
pub type Ptr = u32;
/// A file descriptor number.
pub type Fd = u32;

/// Width of a guest pointer in bytes.
pub const PTR_SIZE: Size = 4;

/// Result type shared by the descriptor table, the filesystem adapter and
/// the collaborator traits. `Err(Errno::Success)` must never be produced.
pub type FsResult<T> = Result<T, Errno>;

////////////////////////////////////////////////////////////////////////////////
// Errno.
////////////////////////////////////////////////////////////////////////////////

/// The preview1 error taxonomy, numbered as the guest libc expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    /// No error occurred. System call completed successfully.
    Success = 0,
    /// Argument list too long.
    TooBig,
    /// Permission denied.
    Acces,
    /// Address in use.
    AddrInUse,
    /// Address not available.
    AddrNotAvail,
    /// Address family not supported.
    AfNoSupport,
    /// Resource unavailable, or operation would block.
    Again,
    /// Connection already in progress.
    Already,
    /// Bad file descriptor.
    Badf,
    /// Bad message.
    BadMsg,
    /// Device or resource busy.
    Busy,
    /// Operation canceled.
    Canceled,
    /// No child processes.
    Child,
    /// Connection aborted.
    ConnAborted,
    /// Connection refused.
    ConnRefused,
    /// Connection reset.
    ConnReset,
    /// Resource deadlock would occur.
    DeadLk,
    /// Destination address required.
    DestAddrReq,
    /// Mathematics argument out of domain of function.
    Dom,
    /// Reserved.
    DQuot,
    /// File exists.
    Exist,
    /// Bad address.
    Fault,
    /// File too large.
    FBig,
    /// Host is unreachable.
    HostUnreach,
    /// Identifier removed.
    IdRm,
    /// Illegal byte sequence.
    IlSeq,
    /// Operation in progress.
    InProgress,
    /// Interrupted function.
    Intr,
    /// Invalid argument.
    Inval,
    /// I/O error.
    Io,
    /// Socket is connected.
    IsConn,
    /// Is a directory.
    IsDir,
    /// Too many levels of symbolic links.
    Loop,
    /// File descriptor value too large.
    MFile,
    /// Too many links.
    MLink,
    /// Message too large.
    MsgSize,
    /// Reserved.
    MultiHop,
    /// Filename too long.
    NameTooLong,
    /// Network is down.
    NetDown,
    /// Connection aborted by network.
    NetReset,
    /// Network unreachable.
    NetUnreach,
    /// Too many files open in system.
    NFile,
    /// No buffer space available.
    NoBufs,
    /// No such device.
    NoDev,
    /// No such file or directory.
    NoEnt,
    /// Executable file format error.
    NoExec,
    /// No locks available.
    NoLck,
    /// Reserved.
    NoLink,
    /// Not enough space.
    NoMem,
    /// No message of the desired type.
    NoMsg,
    /// Protocol not available.
    NoProtoOpt,
    /// No space left on device.
    NoSpc,
    /// Function not supported.
    NoSys,
    /// The socket is not connected.
    NotConn,
    /// Not a directory or a symbolic link to a directory.
    NotDir,
    /// Directory not empty.
    NotEmpty,
    /// State not recoverable.
    NotRecoverable,
    /// Not a socket.
    NotSock,
    /// Not supported, or operation not supported on socket.
    NotSup,
    /// Inappropriate I/O control operation.
    NoTty,
    /// No such device or address.
    NxIo,
    /// Value too large to be stored in data type.
    Overflow,
    /// Previous owner died.
    OwnerDead,
    /// Operation not permitted.
    Perm,
    /// Broken pipe.
    Pipe,
    /// Protocol error.
    Proto,
    /// Protocol not supported.
    ProtoNoSupport,
    /// Protocol wrong type for socket.
    ProtoType,
    /// Result too large.
    Range,
    /// Read-only file system.
    RoFs,
    /// Invalid seek.
    SPipe,
    /// No such process.
    Srch,
    /// Reserved.
    Stale,
    /// Connection timed out.
    TimedOut,
    /// Text file busy.
    TxtBsy,
    /// Cross-device link.
    XDev,
    /// Extension: capabilities insufficient.
    NotCapable,
}

impl From<io::Error> for Errno {
    /// Maps a host error into the guest taxonomy. Everything the shim does
    /// not recognize becomes `NoSys`, with a host-side diagnostic.
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Errno::NoEnt,
            io::ErrorKind::InvalidInput => Errno::Inval,
            io::ErrorKind::UnexpectedEof => Errno::Io,
            _ => {
                warn!("unhandled host error: {}", err);
                Errno::NoSys
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// File types and flag sets.
////////////////////////////////////////////////////////////////////////////////

/// The type of a file descriptor or file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Filetype {
    /// The type is unknown or different from any of the other types specified.
    #[default]
    Unknown = 0,
    /// A block device inode.
    BlockDevice = 1,
    /// A character device inode.
    CharacterDevice = 2,
    /// A directory inode.
    Directory = 3,
    /// A regular file inode.
    RegularFile = 4,
    /// A datagram socket.
    SocketDgram = 5,
    /// A byte-stream socket.
    SocketStream = 6,
    /// A symbolic link inode.
    SymbolicLink = 7,
}

/// File descriptor flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fdflags(pub u16);

impl Fdflags {
    /// Append mode: data written to the file is always appended to its end.
    pub const APPEND: Fdflags = Fdflags(1);
    /// Write according to synchronized I/O data integrity completion.
    pub const DSYNC: Fdflags = Fdflags(1 << 1);
    /// Non-blocking mode.
    pub const NONBLOCK: Fdflags = Fdflags(1 << 2);
    /// Synchronized read I/O operations.
    pub const RSYNC: Fdflags = Fdflags(1 << 3);
    /// Write according to synchronized I/O file integrity completion.
    pub const SYNC: Fdflags = Fdflags(1 << 4);

    pub fn contains(self, other: Fdflags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Fdflags {
    type Output = Fdflags;
    fn bitor(self, rhs: Fdflags) -> Fdflags {
        Fdflags(self.0 | rhs.0)
    }
}

/// Flags determining how a path is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Oflags(pub u16);

impl Oflags {
    /// Create the file if it does not exist.
    pub const CREAT: Oflags = Oflags(1);
    /// Fail if the path is not a directory.
    pub const DIRECTORY: Oflags = Oflags(1 << 1);
    /// Fail if the file already exists.
    pub const EXCL: Oflags = Oflags(1 << 2);
    /// Truncate the file to size 0.
    pub const TRUNC: Oflags = Oflags(1 << 3);

    pub fn contains(self, other: Oflags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Oflags {
    type Output = Oflags;
    fn bitor(self, rhs: Oflags) -> Oflags {
        Oflags(self.0 | rhs.0)
    }
}

/// Flags determining how a path is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lookupflags(pub u32);

impl Lookupflags {
    /// Follow symbolic links in the final path component.
    pub const SYMLINK_FOLLOW: Lookupflags = Lookupflags(1);

    pub fn contains(self, other: Lookupflags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Per-descriptor rights. Carried through `path_open` and reported back by
/// `fd_fdstat_get`; this shim records them but does not enforce them beyond
/// the access-mode translation below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rights(pub u64);

impl Rights {
    pub const FD_DATASYNC: Rights = Rights(1);
    pub const FD_READ: Rights = Rights(1 << 1);
    pub const FD_SEEK: Rights = Rights(1 << 2);
    pub const FD_FDSTAT_SET_FLAGS: Rights = Rights(1 << 3);
    pub const FD_SYNC: Rights = Rights(1 << 4);
    pub const FD_TELL: Rights = Rights(1 << 5);
    pub const FD_WRITE: Rights = Rights(1 << 6);
    pub const FD_ADVISE: Rights = Rights(1 << 7);
    pub const FD_ALLOCATE: Rights = Rights(1 << 8);
    pub const PATH_CREATE_DIRECTORY: Rights = Rights(1 << 9);
    pub const PATH_CREATE_FILE: Rights = Rights(1 << 10);
    pub const PATH_LINK_SOURCE: Rights = Rights(1 << 11);
    pub const PATH_LINK_TARGET: Rights = Rights(1 << 12);
    pub const PATH_OPEN: Rights = Rights(1 << 13);
    pub const FD_READDIR: Rights = Rights(1 << 14);
    pub const PATH_READLINK: Rights = Rights(1 << 15);
    pub const PATH_RENAME_SOURCE: Rights = Rights(1 << 16);
    pub const PATH_RENAME_TARGET: Rights = Rights(1 << 17);
    pub const PATH_FILESTAT_GET: Rights = Rights(1 << 18);
    pub const PATH_FILESTAT_SET_SIZE: Rights = Rights(1 << 19);
    pub const PATH_FILESTAT_SET_TIMES: Rights = Rights(1 << 20);
    pub const FD_FILESTAT_GET: Rights = Rights(1 << 21);
    pub const FD_FILESTAT_SET_SIZE: Rights = Rights(1 << 22);
    pub const FD_FILESTAT_SET_TIMES: Rights = Rights(1 << 23);
    pub const PATH_SYMLINK: Rights = Rights(1 << 24);
    pub const PATH_REMOVE_DIRECTORY: Rights = Rights(1 << 25);
    pub const PATH_UNLINK_FILE: Rights = Rights(1 << 26);
    pub const POLL_FD_READWRITE: Rights = Rights(1 << 27);
    pub const SOCK_SHUTDOWN: Rights = Rights(1 << 28);
    pub const SOCK_ACCEPT: Rights = Rights(1 << 29);

    pub fn contains(self, other: Rights) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Rights {
    type Output = Rights;
    fn bitor(self, rhs: Rights) -> Rights {
        Rights(self.0 | rhs.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Host open mode.
////////////////////////////////////////////////////////////////////////////////

/// Open flags understood by the host [`Filesystem`](crate::Filesystem)
/// collaborator. The virtual filesystem defines its own bit values; they are
/// not the platform's `O_*` constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode(pub u32);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(1);
    pub const WRITE: OpenMode = OpenMode(1 << 1);
    pub const CREATE: OpenMode = OpenMode(1 << 2);
    pub const EXCLUSIVE: OpenMode = OpenMode(1 << 3);
    pub const TRUNCATE: OpenMode = OpenMode(1 << 4);
    pub const APPEND: OpenMode = OpenMode(1 << 5);
    pub const DIRECTORY: OpenMode = OpenMode(1 << 6);
    pub const NOFOLLOW: OpenMode = OpenMode(1 << 7);
    pub const DSYNC: OpenMode = OpenMode(1 << 8);
    pub const NONBLOCK: OpenMode = OpenMode(1 << 9);
    pub const SYNC: OpenMode = OpenMode(1 << 10);

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Translates the flag sets of a `path_open` call into a host open mode.
    ///
    /// `Oflags::DIRECTORY` forces a read-only open irrespective of rights.
    pub fn from_wasi(
        dirflags: Lookupflags,
        oflags: Oflags,
        fdflags: Fdflags,
        rights: Rights,
    ) -> OpenMode {
        let mut mode = OpenMode(0);
        if !dirflags.contains(Lookupflags::SYMLINK_FOLLOW) {
            mode = mode | OpenMode::NOFOLLOW;
        }
        if oflags.contains(Oflags::CREAT) {
            mode = mode | OpenMode::CREATE;
        }
        if oflags.contains(Oflags::DIRECTORY) {
            mode = mode | OpenMode::DIRECTORY;
        }
        if oflags.contains(Oflags::EXCL) {
            mode = mode | OpenMode::EXCLUSIVE;
        }
        if oflags.contains(Oflags::TRUNC) {
            mode = mode | OpenMode::TRUNCATE;
        }
        if fdflags.contains(Fdflags::APPEND) {
            mode = mode | OpenMode::APPEND;
        }
        if fdflags.contains(Fdflags::DSYNC) {
            mode = mode | OpenMode::DSYNC;
        }
        if fdflags.contains(Fdflags::NONBLOCK) {
            mode = mode | OpenMode::NONBLOCK;
        }
        if fdflags.contains(Fdflags::SYNC) {
            mode = mode | OpenMode::SYNC;
        }

        let wants_write = oflags.contains(Oflags::CREAT)
            || oflags.contains(Oflags::TRUNC)
            || fdflags.contains(Fdflags::APPEND);
        if oflags.contains(Oflags::DIRECTORY) {
            mode = mode | OpenMode::READ;
        } else if rights.contains(Rights::FD_READ | Rights::FD_WRITE) {
            mode = mode | OpenMode::READ | OpenMode::WRITE;
        } else if rights.contains(Rights::FD_WRITE) {
            mode = mode | OpenMode::WRITE;
        } else if rights.contains(Rights::FD_READ) {
            if wants_write {
                mode = mode | OpenMode::READ | OpenMode::WRITE;
            } else {
                mode = mode | OpenMode::READ;
            }
        }
        mode
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = OpenMode;
    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Seek origin.
////////////////////////////////////////////////////////////////////////////////

/// The position a seek offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Whence {
    Start = 0,
    Current = 1,
    End = 2,
}

impl TryFrom<u8> for Whence {
    type Error = Errno;
    fn try_from(raw: u8) -> FsResult<Whence> {
        match raw {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(Errno::Inval),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ABI structures and their codecs.
////////////////////////////////////////////////////////////////////////////////

/// Decode a `T` from its exact wire representation.
pub(crate) trait Unpack: Sized {
    /// Encoded size in bytes.
    const SIZE: Size;
    fn unpack(bytes: &[u8]) -> FsResult<Self>;
}

/// Encode a value into its exact wire representation. `bytes` must hold at
/// least `SIZE` bytes; padding is zero-written.
pub(crate) trait Pack {
    /// Encoded size in bytes.
    const SIZE: Size;
    fn pack(&self, bytes: &mut [u8]);
}

/// Decode a contiguous array of `count` elements.
pub(crate) fn unpack_array<T: Unpack>(bytes: &[u8]) -> FsResult<Vec<T>> {
    bytes.chunks(T::SIZE as usize).map(T::unpack).collect()
}

/// One segment of a scatter read: {guest buffer, length}.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Iovec {
    pub buf: Ptr,
    pub len: Size,
}

/// One segment of a gather write: {guest buffer, length}.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ciovec {
    pub buf: Ptr,
    pub len: Size,
}

impl Unpack for Iovec {
    const SIZE: Size = 8;
    fn unpack(bytes: &[u8]) -> FsResult<Iovec> {
        if bytes.len() != Self::SIZE as usize {
            return Err(Errno::Inval);
        }
        let mut rdr = Cursor::new(bytes);
        let buf = rdr.read_u32::<LittleEndian>()?;
        let len = rdr.read_u32::<LittleEndian>()?;
        Ok(Iovec { buf, len })
    }
}

impl Unpack for Ciovec {
    const SIZE: Size = 8;
    fn unpack(bytes: &[u8]) -> FsResult<Ciovec> {
        if bytes.len() != Self::SIZE as usize {
            return Err(Errno::Inval);
        }
        let mut rdr = Cursor::new(bytes);
        let buf = rdr.read_u32::<LittleEndian>()?;
        let len = rdr.read_u32::<LittleEndian>()?;
        Ok(Ciovec { buf, len })
    }
}

/// The contents of a `prestat` for a preopened directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrestatDir {
    /// Discriminant; 0 is the only defined variant (directory).
    pub tag: u8,
    /// Length of the preopened directory name.
    pub dir_len: Size,
}

impl Pack for PrestatDir {
    const SIZE: Size = 8;
    fn pack(&self, bytes: &mut [u8]) {
        let bytes = &mut bytes[..Self::SIZE as usize];
        bytes.fill(0);
        bytes[0] = self.tag;
        LittleEndian::write_u32(&mut bytes[4..8], self.dir_len);
    }
}

/// File descriptor attributes, as reported by `fd_fdstat_get`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fdstat {
    pub filetype: Filetype,
    pub flags: Fdflags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

impl Pack for Fdstat {
    const SIZE: Size = 24;
    fn pack(&self, bytes: &mut [u8]) {
        let bytes = &mut bytes[..Self::SIZE as usize];
        bytes.fill(0);
        bytes[0] = self.filetype as u8;
        LittleEndian::write_u16(&mut bytes[2..4], self.flags.0);
        LittleEndian::write_u64(&mut bytes[8..16], self.rights_base.0);
        LittleEndian::write_u64(&mut bytes[16..24], self.rights_inheriting.0);
    }
}

/// File attributes, as reported by `fd_filestat_get` and friends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filestat {
    /// Device ID of the device containing the file.
    pub dev: u64,
    /// File serial number.
    pub ino: u64,
    pub filetype: Filetype,
    /// Number of hard links to the file.
    pub nlink: u64,
    /// For regular files, the file size in bytes.
    pub size: u64,
    /// Last data access timestamp.
    pub atim: u64,
    /// Last data modification timestamp.
    pub mtim: u64,
    /// Last file status change timestamp.
    pub ctim: u64,
}

impl Pack for Filestat {
    const SIZE: Size = 64;
    fn pack(&self, bytes: &mut [u8]) {
        let bytes = &mut bytes[..Self::SIZE as usize];
        bytes.fill(0);
        LittleEndian::write_u64(&mut bytes[0..8], self.dev);
        LittleEndian::write_u64(&mut bytes[8..16], self.ino);
        bytes[16] = self.filetype as u8;
        LittleEndian::write_u64(&mut bytes[24..32], self.nlink);
        LittleEndian::write_u64(&mut bytes[32..40], self.size);
        LittleEndian::write_u64(&mut bytes[40..48], self.atim);
        LittleEndian::write_u64(&mut bytes[48..56], self.mtim);
        LittleEndian::write_u64(&mut bytes[56..64], self.ctim);
    }
}

/// A directory entry header; the entry name follows it on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirent {
    /// Cookie locating the next entry.
    pub next: u64,
    /// Serial number of the named file.
    pub ino: u64,
    /// Length of the name that follows.
    pub namlen: Size,
    /// Type of the named file.
    pub dtype: Filetype,
}

impl Pack for Dirent {
    const SIZE: Size = 24;
    fn pack(&self, bytes: &mut [u8]) {
        let bytes = &mut bytes[..Self::SIZE as usize];
        bytes.fill(0);
        LittleEndian::write_u64(&mut bytes[0..8], self.next);
        LittleEndian::write_u64(&mut bytes[8..16], self.ino);
        LittleEndian::write_u32(&mut bytes[16..20], self.namlen);
        bytes[20] = self.dtype as u8;
    }
}
