//! The `wasi_snapshot_preview1` function set.
//!
//! Every imported function shares one skeleton: type the raw i32 parameters,
//! trace the call if enabled, run the body under the memory gateway with the
//! set of maximum addresses it will touch, dispatch into the descriptor
//! table or filesystem adapter, encode the results, and hand a numeric errno
//! back to the guest. Gateway faults and `proc_exit` with a non-zero code
//! surface as engine traps instead.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use crate::charbuf::CharBuffer;
use crate::clock::{Clock, SystemClock};
use crate::fs::FileTable;
use crate::memory;
use crate::strace::Trace;
use crate::types::{
    Ciovec, Dirent, Errno, Fd, Fdflags, Fdstat, Filestat, FsResult, Iovec, Lookupflags, Oflags,
    Pack, PrestatDir, Ptr, Rights, Size, Unpack, Whence, PTR_SIZE,
};
use crate::Options;
use std::str;
use wasmi::{core::Trap, errors::LinkerError, Caller, Linker};

/// A WASI environment: the host state behind one guest instance. Sharing an
/// environment across concurrent instances is unsupported.
pub struct Wasi {
    pub(crate) args: CharBuffer,
    pub(crate) environ: CharBuffer,
    pub(crate) files: FileTable,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) debug: bool,
    pub(crate) exit_code: Option<u32>,
}

impl Wasi {
    /// The name of the guest's entry point.
    pub const ENTRY_POINT_NAME: &'static str = "_start";
    /// The module name all imports are registered under.
    pub const WASI_SNAPSHOT_MODULE_NAME: &'static str = "wasi_snapshot_preview1";

    /// Assembles an environment from `options`: the environ vector is the
    /// flattened `NAME=VALUE` pairs, the clock defaults to the host wall
    /// clock, and the descriptor table starts with stdio at 0/1/2 plus the
    /// preopen root at 3 when a filesystem is configured.
    pub fn new(options: Options) -> Wasi {
        let environ = options
            .env
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Wasi {
            args: CharBuffer::new(options.args),
            environ: CharBuffer::new(environ),
            files: FileTable::new(options.fs, options.stdin, options.stdout, options.stderr),
            clock: options.clock.unwrap_or_else(|| Box::new(SystemClock)),
            debug: options.debug,
            exit_code: None,
        }
    }

    /// The code recorded by `proc_exit`, if the guest called it.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }
}

/// Registers every supported WASI function with the linker. Fails if any
/// symbol cannot be registered.
pub fn link(linker: &mut Linker<Wasi>) -> Result<(), LinkerError> {
    const MOD: &str = Wasi::WASI_SNAPSHOT_MODULE_NAME;
    linker
        .func_wrap(MOD, "args_sizes_get", args_sizes_get)?
        .func_wrap(MOD, "args_get", args_get)?
        .func_wrap(MOD, "environ_sizes_get", environ_sizes_get)?
        .func_wrap(MOD, "environ_get", environ_get)?
        .func_wrap(MOD, "clock_time_get", clock_time_get)?
        .func_wrap(MOD, "fd_close", fd_close)?
        .func_wrap(MOD, "fd_fdstat_get", fd_fdstat_get)?
        .func_wrap(MOD, "fd_fdstat_set_flags", fd_fdstat_set_flags)?
        .func_wrap(MOD, "fd_prestat_get", fd_prestat_get)?
        .func_wrap(MOD, "fd_prestat_dir_name", fd_prestat_dir_name)?
        .func_wrap(MOD, "fd_filestat_get", fd_filestat_get)?
        .func_wrap(MOD, "fd_seek", fd_seek)?
        .func_wrap(MOD, "fd_write", fd_write)?
        .func_wrap(MOD, "fd_read", fd_read)?
        .func_wrap(MOD, "fd_pread", fd_pread)?
        .func_wrap(MOD, "fd_readdir", fd_readdir)?
        .func_wrap(MOD, "path_open", path_open)?
        .func_wrap(MOD, "path_filestat_get", path_filestat_get)?
        .func_wrap(MOD, "path_readlink", path_readlink)?
        .func_wrap(MOD, "path_rename", path_rename)?
        .func_wrap(MOD, "path_create_directory", path_create_directory)?
        .func_wrap(MOD, "path_remove_directory", path_remove_directory)?
        .func_wrap(MOD, "path_unlink_file", path_unlink_file)?
        .func_wrap(MOD, "poll_oneoff", poll_oneoff)?
        .func_wrap(MOD, "proc_exit", proc_exit)?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Arguments and environment.
////////////////////////////////////////////////////////////////////////////////

fn args_sizes_get(mut caller: Caller<'_, Wasi>, argc: i32, argv: i32) -> Result<i32, Trap> {
    let (argc, argv) = (argc as Ptr, argv as Ptr);
    let mut t = Trace::func(caller.data().debug, "args_sizes_get");
    t.arg_hex(argc);
    t.arg_hex(argv);

    let errno = memory::ensure(
        &mut caller,
        &[memory::span(argc, PTR_SIZE), memory::span(argv, PTR_SIZE)],
        |data, wasi| {
            wasi.args.write_sizes(data, argc, argv);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn args_get(mut caller: Caller<'_, Wasi>, argv: i32, argbuf: i32) -> Result<i32, Trap> {
    let (argv, argbuf) = (argv as Ptr, argbuf as Ptr);
    let mut t = Trace::func(caller.data().debug, "args_get");
    t.arg_hex(argv);
    t.arg_hex(argbuf);

    let (count, size) = (caller.data().args.count(), caller.data().args.size());
    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span_array(argv, PTR_SIZE, count),
            memory::span(argbuf, size),
        ],
        |data, wasi| {
            wasi.args.write(data, argv, argbuf);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn environ_sizes_get(mut caller: Caller<'_, Wasi>, envc: i32, size_ptr: i32) -> Result<i32, Trap> {
    let (envc, size_ptr) = (envc as Ptr, size_ptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "environ_sizes_get");
    t.arg_hex(envc);
    t.arg_hex(size_ptr);

    let errno = memory::ensure(
        &mut caller,
        &[memory::span(envc, PTR_SIZE), memory::span(size_ptr, PTR_SIZE)],
        |data, wasi| {
            wasi.environ.write_sizes(data, envc, size_ptr);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn environ_get(mut caller: Caller<'_, Wasi>, env: i32, envbuf: i32) -> Result<i32, Trap> {
    let (env, envbuf) = (env as Ptr, envbuf as Ptr);
    let mut t = Trace::func(caller.data().debug, "environ_get");
    t.arg_hex(env);
    t.arg_hex(envbuf);

    let (count, size) = (caller.data().environ.count(), caller.data().environ.size());
    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span_array(env, PTR_SIZE, count),
            memory::span(envbuf, size),
        ],
        |data, wasi| {
            wasi.environ.write(data, env, envbuf);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

////////////////////////////////////////////////////////////////////////////////
// Clock and process.
////////////////////////////////////////////////////////////////////////////////

fn clock_time_get(
    mut caller: Caller<'_, Wasi>,
    clockid: i32,
    resolution: i64,
    tsptr: i32,
) -> Result<i32, Trap> {
    let tsptr = tsptr as Ptr;
    let mut t = Trace::func(caller.data().debug, "clock_time_get");
    t.arg_dec(clockid);
    t.arg_dec(resolution);
    t.arg_hex(tsptr);

    // Clock ids are accepted but not differentiated.
    let now = caller.data().clock.now();
    let errno = memory::ensure(&mut caller, &[memory::span(tsptr, 8)], |data, _| {
        memory::write_u64(data, tsptr, now);
        Ok(Errno::Success)
    })?;
    Ok(t.result(errno) as i32)
}

fn proc_exit(mut caller: Caller<'_, Wasi>, code: i32) -> Result<(), Trap> {
    caller.data_mut().exit_code = Some(code as u32);
    if code > 0 {
        return Err(Trap::new(format!("exit: {}", code)));
    }
    Ok(())
}

fn poll_oneoff(
    caller: Caller<'_, Wasi>,
    in_ptr: i32,
    out_ptr: i32,
    nsubs: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let mut t = Trace::func(caller.data().debug, "poll_oneoff");
    t.arg_hex(in_ptr as Ptr);
    t.arg_hex(out_ptr as Ptr);
    t.arg_dec(nsubs);
    t.arg_hex(retptr as Ptr);
    Ok(t.result(Errno::NoSys) as i32)
}

////////////////////////////////////////////////////////////////////////////////
// Descriptor operations.
////////////////////////////////////////////////////////////////////////////////

fn fd_close(mut caller: Caller<'_, Wasi>, fd: i32) -> Result<i32, Trap> {
    let fd = fd as Fd;
    let mut t = Trace::func(caller.data().debug, "fd_close");
    t.arg_dec(fd);

    let errno = match caller.data_mut().files.close(fd) {
        Ok(()) => Errno::Success,
        Err(errno) => errno,
    };
    Ok(t.result(errno) as i32)
}

fn fd_fdstat_get(mut caller: Caller<'_, Wasi>, fd: i32, retptr: i32) -> Result<i32, Trap> {
    let (fd, retptr) = (fd as Fd, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_fdstat_get");
    t.arg_dec(fd);
    t.arg_hex(retptr);

    let stat = match caller.data().files.fdstat(fd) {
        Ok(stat) => stat,
        Err(errno) => return Ok(t.result(errno) as i32),
    };
    let errno = memory::ensure(
        &mut caller,
        &[memory::span(retptr, Fdstat::SIZE)],
        |data, _| {
            stat.pack(&mut data[retptr as usize..]);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn fd_fdstat_set_flags(caller: Caller<'_, Wasi>, fd: i32, flags: i32) -> Result<i32, Trap> {
    let mut t = Trace::func(caller.data().debug, "fd_fdstat_set_flags");
    t.arg_dec(fd);
    t.arg_hex(flags as u32);
    // Accepted but not supported.
    Ok(t.result(Errno::NoSys) as i32)
}

fn fd_filestat_get(mut caller: Caller<'_, Wasi>, fd: i32, retptr: i32) -> Result<i32, Trap> {
    let (fd, retptr) = (fd as Fd, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_filestat_get");
    t.arg_dec(fd);
    t.arg_hex(retptr);

    let stat = match caller.data().files.stat(fd) {
        Ok(stat) => stat,
        Err(errno) => return Ok(t.result(errno) as i32),
    };
    let errno = memory::ensure(
        &mut caller,
        &[memory::span(retptr, Filestat::SIZE)],
        |data, _| {
            stat.pack(&mut data[retptr as usize..]);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn fd_seek(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    offset: i64,
    whence: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, retptr) = (fd as Fd, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_seek");
    t.arg_dec(fd);
    t.arg_dec(offset);
    t.arg_dec(whence);
    t.arg_hex(retptr);

    let whence = match u8::try_from(whence)
        .map_err(|_| Errno::Inval)
        .and_then(Whence::try_from)
    {
        Ok(whence) => whence,
        Err(errno) => return Ok(t.result(errno) as i32),
    };
    let pos = match caller
        .data_mut()
        .files
        .get_mut(fd)
        .and_then(|desc| desc.seek(offset, whence))
    {
        Ok(pos) => pos,
        Err(errno) => return Ok(t.result(errno) as i32),
    };
    let errno = memory::ensure(&mut caller, &[memory::span(retptr, 8)], |data, _| {
        memory::write_u64(data, retptr, pos);
        Ok(Errno::Success)
    })?;
    Ok(t.result(errno) as i32)
}

fn fd_write(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    iovs: i32,
    iovslen: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, iovs, iovslen, retptr) = (fd as Fd, iovs as Ptr, iovslen as Size, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_write");
    t.arg_dec(fd);
    t.arg_hex(iovs);
    t.arg_dec(iovslen);
    t.arg_hex(retptr);

    if let Err(errno) = caller.data().files.get(fd) {
        return Ok(t.result(errno) as i32);
    }
    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span_array(iovs, Ciovec::SIZE, iovslen),
            memory::span(retptr, PTR_SIZE),
        ],
        |data, wasi| {
            let end = memory::span_array(iovs, Ciovec::SIZE, iovslen) as usize;
            let vecs = match crate::types::unpack_array::<Ciovec>(&data[iovs as usize..end]) {
                Ok(vecs) => vecs,
                Err(errno) => return Ok(errno),
            };
            let desc = match wasi.files.get_mut(fd) {
                Ok(desc) => desc,
                Err(errno) => return Ok(errno),
            };
            let mut errno = Errno::Success;
            let mut total: Size = 0;
            for vec in &vecs {
                let buf = memory::slice(data, vec.buf, vec.len)?;
                match desc.write(buf) {
                    Ok(n) => total += n as Size,
                    Err(e) => {
                        errno = e;
                        break;
                    }
                }
            }
            memory::write_u32(data, retptr, total);
            Ok(errno)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn fd_read(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    iovs: i32,
    iovslen: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, iovs, iovslen, retptr) = (fd as Fd, iovs as Ptr, iovslen as Size, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_read");
    t.arg_dec(fd);
    t.arg_hex(iovs);
    t.arg_dec(iovslen);
    t.arg_hex(retptr);

    if let Err(errno) = caller.data().files.get(fd) {
        return Ok(t.result(errno) as i32);
    }
    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span_array(iovs, Iovec::SIZE, iovslen),
            memory::span(retptr, PTR_SIZE),
        ],
        |data, wasi| {
            let end = memory::span_array(iovs, Iovec::SIZE, iovslen) as usize;
            let vecs = match crate::types::unpack_array::<Iovec>(&data[iovs as usize..end]) {
                Ok(vecs) => vecs,
                Err(errno) => return Ok(errno),
            };
            let desc = match wasi.files.get_mut(fd) {
                Ok(desc) => desc,
                Err(errno) => return Ok(errno),
            };
            let mut errno = Errno::Success;
            let mut total: Size = 0;
            for vec in &vecs {
                // The destination window within each iovec starts at the
                // running total, so the slice shrinks as the total grows.
                let start = vec.buf as u64 + total as u64;
                let end = vec.buf as u64 + vec.len as u64;
                let buf = memory::window(data, start, end)?;
                match desc.read(buf) {
                    Ok(0) => break,
                    Ok(n) => total += n as Size,
                    Err(e) => {
                        errno = e;
                        break;
                    }
                }
            }
            memory::write_u32(data, retptr, total);
            Ok(errno)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn fd_pread(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    iovs: i32,
    iovslen: i32,
    offset: i64,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, iovs, iovslen, retptr) = (fd as Fd, iovs as Ptr, iovslen as Size, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_pread");
    t.arg_dec(fd);
    t.arg_hex(iovs);
    t.arg_dec(iovslen);
    t.arg_dec(offset);
    t.arg_hex(retptr);

    let saved = match caller
        .data_mut()
        .files
        .get_mut(fd)
        .and_then(|desc| desc.seek(0, Whence::Current))
    {
        Ok(pos) => pos,
        Err(errno) => return Ok(t.result(errno) as i32),
    };

    let offset = offset as u64;
    let mut errno = Errno::Success;
    // The seek to `offset` happens only when both the current position and
    // the offset are non-zero.
    if saved != 0 && offset != 0 {
        if let Err(e) = caller
            .data_mut()
            .files
            .get_mut(fd)
            .and_then(|desc| desc.seek(offset as i64, Whence::Start))
        {
            errno = e;
        }
    }

    let mut result = if errno == Errno::Success {
        memory::ensure(
            &mut caller,
            &[
                memory::span_array(iovs, Iovec::SIZE, iovslen),
                memory::span(retptr, PTR_SIZE),
            ],
            |data, wasi| {
                let end = memory::span_array(iovs, Iovec::SIZE, iovslen) as usize;
                let vecs = match crate::types::unpack_array::<Iovec>(&data[iovs as usize..end]) {
                    Ok(vecs) => vecs,
                    Err(errno) => return Ok(errno),
                };
                let desc = match wasi.files.get_mut(fd) {
                    Ok(desc) => desc,
                    Err(errno) => return Ok(errno),
                };
                let mut errno = Errno::Success;
                let mut total: Size = 0;
                for vec in &vecs {
                    let buf = memory::slice(data, vec.buf, vec.len)?;
                    match desc.read(buf) {
                        Ok(0) => break,
                        Ok(n) => total += n as Size,
                        Err(e) => {
                            errno = e;
                            break;
                        }
                    }
                }
                memory::write_u32(data, retptr, total);
                Ok(errno)
            },
        )
    } else {
        Ok(errno)
    };

    // The saved position is restored on every exit path, preferring an
    // earlier errno over the restoration's own.
    if let Err(e) = caller
        .data_mut()
        .files
        .get_mut(fd)
        .and_then(|desc| desc.seek(saved as i64, Whence::Start))
    {
        if matches!(result, Ok(Errno::Success)) {
            result = Ok(e);
        }
    }

    match result {
        Ok(errno) => Ok(t.result(errno) as i32),
        Err(fault) => Err(fault.into()),
    }
}

fn fd_prestat_get(mut caller: Caller<'_, Wasi>, fd: i32, prestat: i32) -> Result<i32, Trap> {
    let (fd, prestat) = (fd as Fd, prestat as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_prestat_get");
    t.arg_dec(fd);
    t.arg_hex(prestat);

    let dir = {
        let desc = match caller.data().files.get(fd) {
            Ok(desc) => desc,
            Err(errno) => return Ok(t.result(errno) as i32),
        };
        if desc.preopen.is_empty() {
            return Ok(t.result(Errno::Badf) as i32);
        }
        PrestatDir {
            tag: 0, // directory
            dir_len: desc.preopen.len() as Size,
        }
    };
    let errno = memory::ensure(
        &mut caller,
        &[memory::span(prestat, PrestatDir::SIZE)],
        |data, _| {
            dir.pack(&mut data[prestat as usize..]);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn fd_prestat_dir_name(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    buf: i32,
    len: i32,
) -> Result<i32, Trap> {
    let (fd, buf, len) = (fd as Fd, buf as Ptr, len as Size);
    let mut t = Trace::func(caller.data().debug, "fd_prestat_dir_name");
    t.arg_dec(fd);
    t.arg_hex(buf);
    t.arg_dec(len);

    let preopen = {
        let desc = match caller.data().files.get(fd) {
            Ok(desc) => desc,
            Err(errno) => return Ok(t.result(errno) as i32),
        };
        if desc.preopen.is_empty() {
            return Ok(t.result(Errno::Badf) as i32);
        }
        desc.preopen.clone()
    };
    let errno = memory::ensure(&mut caller, &[memory::span(buf, len)], |data, _| {
        // Truncates when the buffer is shorter than the preopen path.
        let n = preopen.len().min(len as usize);
        data[buf as usize..buf as usize + n].copy_from_slice(&preopen.as_bytes()[..n]);
        Ok(Errno::Success)
    })?;
    Ok(t.result(errno) as i32)
}

fn fd_readdir(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    buf: i32,
    buflen: i32,
    cookie: i64,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, buf, buflen, retptr) = (fd as Fd, buf as Ptr, buflen as Size, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "fd_readdir");
    t.arg_dec(fd);
    t.arg_hex(buf);
    t.arg_dec(buflen);
    t.arg_dec(cookie);
    t.arg_hex(retptr);

    let errno = memory::ensure(
        &mut caller,
        &[memory::span(buf, buflen), memory::span(retptr, PTR_SIZE)],
        |data, wasi| {
            let mut cookie = cookie as u64;
            let mut wrote: Size = 0;
            loop {
                let (dirent, name) = match wasi.files.readdir(fd, cookie) {
                    Ok(Some(entry)) => entry,
                    Ok(None) | Err(_) => break,
                };
                if wrote as u64 + Dirent::SIZE as u64 > buflen as u64 {
                    break;
                }
                dirent.pack(&mut data[buf as usize + wrote as usize..]);
                wrote += Dirent::SIZE;
                // When the name does not fully fit, write as much of it as
                // fits and stop.
                let n = name.len().min((buflen - wrote) as usize);
                let at = buf as usize + wrote as usize;
                data[at..at + n].copy_from_slice(&name.as_bytes()[..n]);
                wrote += n as Size;
                if n != name.len() {
                    break;
                }
                cookie += 1;
            }
            memory::write_u32(data, retptr, wrote);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

////////////////////////////////////////////////////////////////////////////////
// Path operations.
////////////////////////////////////////////////////////////////////////////////

fn decode_path<'a>(data: &'a [u8], ptr: Ptr, len: Size) -> FsResult<&'a str> {
    str::from_utf8(&data[ptr as usize..ptr as usize + len as usize]).map_err(|_| Errno::IlSeq)
}

fn path_open(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    dirflags: i32,
    pathptr: i32,
    pathlen: i32,
    oflags: i32,
    rights_base: i64,
    rights_inheriting: i64,
    fdflags: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, pathptr, pathlen, retptr) = (fd as Fd, pathptr as Ptr, pathlen as Size, retptr as Ptr);
    let dirflags = Lookupflags(dirflags as u32);
    let oflags = Oflags(oflags as u16);
    let fdflags = Fdflags(fdflags as u16);
    let rights_base = Rights(rights_base as u64);
    let rights_inheriting = Rights(rights_inheriting as u64);
    let mut t = Trace::func(caller.data().debug, "path_open");
    t.arg_dec(fd);
    t.arg_hex(dirflags.0);
    t.arg_hex(oflags.0);
    t.arg_hex(rights_base.0);
    t.arg_hex(fdflags.0);
    t.arg_hex(retptr);

    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span(pathptr, pathlen),
            memory::span(retptr, PTR_SIZE),
        ],
        |data, wasi| {
            let path = match decode_path(data, pathptr, pathlen) {
                Ok(path) => path,
                Err(errno) => return Ok(errno),
            };
            t.arg_str(path);
            let (newfd, errno) = match wasi.files.open(
                fd,
                path,
                dirflags,
                oflags,
                fdflags,
                rights_base,
                rights_inheriting,
            ) {
                Ok(newfd) => (newfd, Errno::Success),
                Err(errno) => (0, errno),
            };
            memory::write_u32(data, retptr, newfd);
            Ok(errno)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn path_filestat_get(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    lookupflags: i32,
    path: i32,
    pathlen: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, path, pathlen, retptr) = (fd as Fd, path as Ptr, pathlen as Size, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "path_filestat_get");
    t.arg_dec(fd);
    t.arg_hex(lookupflags as u32);
    t.arg_hex(retptr);

    // The stat written back is the directory descriptor's own; the path is
    // decoded for diagnostics only.
    let stat = match caller.data().files.stat(fd) {
        Ok(stat) => stat,
        Err(errno) => return Ok(t.result(errno) as i32),
    };
    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span(path, pathlen),
            memory::span(retptr, Filestat::SIZE),
        ],
        |data, _| {
            if let Ok(name) = decode_path(data, path, pathlen) {
                t.arg_str(name);
            }
            stat.pack(&mut data[retptr as usize..]);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn path_readlink(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    path: i32,
    pathlen: i32,
    bufptr: i32,
    buflen: i32,
    retptr: i32,
) -> Result<i32, Trap> {
    let (fd, path, pathlen) = (fd as Fd, path as Ptr, pathlen as Size);
    let (bufptr, buflen, retptr) = (bufptr as Ptr, buflen as Size, retptr as Ptr);
    let mut t = Trace::func(caller.data().debug, "path_readlink");
    t.arg_dec(fd);
    t.arg_hex(bufptr);
    t.arg_dec(buflen);
    t.arg_hex(retptr);

    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span(path, pathlen),
            memory::span(bufptr, buflen),
            memory::span(retptr, PTR_SIZE),
        ],
        |data, wasi| {
            let name = match decode_path(data, path, pathlen) {
                Ok(name) => name,
                Err(errno) => return Ok(errno),
            };
            t.arg_str(name);
            let link = match wasi.files.readlink(fd, name) {
                Ok(link) => link,
                Err(errno) => return Ok(errno),
            };
            // Truncation on an insufficient buffer is silent.
            let n = link.len().min(buflen as usize);
            data[bufptr as usize..bufptr as usize + n].copy_from_slice(&link.as_bytes()[..n]);
            memory::write_u32(data, retptr, n as u32);
            Ok(Errno::Success)
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn path_rename(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    oldpath: i32,
    old_len: i32,
    new_fd_ptr: i32,
    newpath: i32,
    new_len: i32,
) -> Result<i32, Trap> {
    let (fd, oldpath, old_len) = (fd as Fd, oldpath as Ptr, old_len as Size);
    let (new_fd_ptr, newpath, new_len) = (new_fd_ptr as Ptr, newpath as Ptr, new_len as Size);
    let mut t = Trace::func(caller.data().debug, "path_rename");
    t.arg_dec(fd);
    t.arg_hex(new_fd_ptr);

    let errno = memory::ensure(
        &mut caller,
        &[
            memory::span(oldpath, old_len),
            memory::span(newpath, new_len),
            memory::span(new_fd_ptr, PTR_SIZE),
        ],
        |data, wasi| {
            let old = match decode_path(data, oldpath, old_len) {
                Ok(old) => old.to_string(),
                Err(errno) => return Ok(errno),
            };
            let new = match decode_path(data, newpath, new_len) {
                Ok(new) => new,
                Err(errno) => return Ok(errno),
            };
            t.arg_str(&old);
            t.arg_str(new);
            match wasi.files.rename(fd, &old, new) {
                Ok(()) => {
                    // The source descriptor is reported back; a different
                    // target directory descriptor is not honored.
                    memory::write_u32(data, new_fd_ptr, fd);
                    Ok(Errno::Success)
                }
                Err(errno) => Ok(errno),
            }
        },
    )?;
    Ok(t.result(errno) as i32)
}

fn path_create_directory(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    path: i32,
    pathlen: i32,
) -> Result<i32, Trap> {
    let (fd, path, pathlen) = (fd as Fd, path as Ptr, pathlen as Size);
    let mut t = Trace::func(caller.data().debug, "path_create_directory");
    t.arg_dec(fd);

    let errno = memory::ensure(&mut caller, &[memory::span(path, pathlen)], |data, wasi| {
        let name = match decode_path(data, path, pathlen) {
            Ok(name) => name,
            Err(errno) => return Ok(errno),
        };
        t.arg_str(name);
        match wasi.files.create_dir(fd, name) {
            Ok(()) => Ok(Errno::Success),
            Err(errno) => Ok(errno),
        }
    })?;
    Ok(t.result(errno) as i32)
}

fn path_remove_directory(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    path: i32,
    pathlen: i32,
) -> Result<i32, Trap> {
    let (fd, path, pathlen) = (fd as Fd, path as Ptr, pathlen as Size);
    let mut t = Trace::func(caller.data().debug, "path_remove_directory");
    t.arg_dec(fd);

    let errno = memory::ensure(&mut caller, &[memory::span(path, pathlen)], |data, wasi| {
        let name = match decode_path(data, path, pathlen) {
            Ok(name) => name,
            Err(errno) => return Ok(errno),
        };
        t.arg_str(name);
        match wasi.files.remove_dir(fd, name) {
            Ok(()) => Ok(Errno::Success),
            Err(errno) => Ok(errno),
        }
    })?;
    Ok(t.result(errno) as i32)
}

fn path_unlink_file(
    mut caller: Caller<'_, Wasi>,
    fd: i32,
    path: i32,
    pathlen: i32,
) -> Result<i32, Trap> {
    let (fd, path, pathlen) = (fd as Fd, path as Ptr, pathlen as Size);
    let mut t = Trace::func(caller.data().debug, "path_unlink_file");
    t.arg_dec(fd);

    let errno = memory::ensure(&mut caller, &[memory::span(path, pathlen)], |data, wasi| {
        let name = match decode_path(data, path, pathlen) {
            Ok(name) => name,
            Err(errno) => return Ok(errno),
        };
        t.arg_str(name);
        match wasi.files.remove(fd, name) {
            Ok(()) => Ok(Errno::Success),
            Err(errno) => Ok(errno),
        }
    })?;
    Ok(t.result(errno) as i32)
}
