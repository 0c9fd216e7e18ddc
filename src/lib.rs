//! Host side of the `wasi_snapshot_preview1` ABI.
//!
//! A WebAssembly guest compiled against a libc targeting
//! `wasi_snapshot_preview1` calls imported functions for process, clock and
//! filesystem services. This crate implements those imports over the wasmi
//! interpreter: it translates guest linear-memory addresses into checked
//! host byte ranges, encodes and decodes the preview1 data structures
//! bit-exactly, keeps a refcounted file-descriptor table with
//! preopened-directory semantics, and multiplexes configurable host sinks
//! (argument vector, environment, clock, virtual filesystem, standard
//! streams) behind it.
//!
//! Typical embedding:
//!
//! ```no_run
//! use wasi_host::{MemFs, Options};
//!
//! let fs = MemFs::new();
//! fs.write_file("input.txt", b"hello").unwrap();
//! let options = Options::new()
//!     .args(["input.txt"])
//!     .env("GREET", "hello")
//!     .fs(fs);
//! let wasm: Vec<u8> = std::fs::read("guest.wasm").unwrap();
//! let exit_code = wasi_host::execute(&wasm, options).unwrap();
//! ```
//!
//! Embedders that own their engine setup can instead register the imports on
//! their linker with [`link`] and drive the instance themselves; the
//! [`Wasi`] environment is the store's data.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

#![allow(clippy::too_many_arguments)]

mod charbuf;
mod clock;
mod fs;
mod memfs;
mod memory;
mod strace;
mod types;
mod wasi;

pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::fs::{Caps, DirEntry, Filesystem, Handle, Metadata};
pub use crate::memfs::MemFs;
pub use crate::types::{
    Ciovec, Dirent, Errno, Fd, Fdflags, Fdstat, Filestat, Filetype, FsResult, Iovec, Lookupflags,
    Oflags, OpenMode, PrestatDir, Ptr, Rights, Size, Whence,
};
pub use crate::wasi::{link, Wasi};

use anyhow::Result;
use std::io::{Read, Write};
use wasmi::{Engine, Linker, Module, Store};

/// Configuration applied when a [`Wasi`] environment is assembled.
///
/// All fields are optional; the defaults are an empty argument vector, an
/// empty environment, no filesystem (filesystem calls return `NoSys`), the
/// host wall clock, and disconnected standard streams.
#[derive(Default)]
pub struct Options {
    /// Command-line arguments; the first element is `argv[0]`.
    pub args: Vec<String>,
    /// Environment variables as ordered name/value pairs.
    pub env: Vec<(String, String)>,
    /// The virtual filesystem root; enables descriptor 3 as the preopen "/".
    pub fs: Option<Box<dyn Filesystem>>,
    /// The clock source behind `clock_time_get`.
    pub clock: Option<Box<dyn Clock>>,
    /// The reader behind descriptor 0.
    pub stdin: Option<Box<dyn Read + Send>>,
    /// The writer behind descriptor 1.
    pub stdout: Option<Box<dyn Write + Send>>,
    /// The writer behind descriptor 2.
    pub stderr: Option<Box<dyn Write + Send>>,
    /// Trace every imported call to the log facade.
    pub debug: bool,
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    /// Sets the command-line arguments.
    pub fn args<I, S>(mut self, args: I) -> Options
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Options {
        self.env.push((name.into(), value.into()));
        self
    }

    /// Uses the given filesystem and preopens it as "/" on descriptor 3.
    pub fn fs(mut self, fs: impl Filesystem + 'static) -> Options {
        self.fs = Some(Box::new(fs));
        self
    }

    /// Sets the clock source.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Options {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Sets standard input.
    pub fn stdin(mut self, reader: impl Read + Send + 'static) -> Options {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Sets standard output.
    pub fn stdout(mut self, writer: impl Write + Send + 'static) -> Options {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// Sets standard error.
    pub fn stderr(mut self, writer: impl Write + Send + 'static) -> Options {
        self.stderr = Some(Box::new(writer));
        self
    }

    /// Toggles per-call trace logging.
    pub fn debug(mut self, enabled: bool) -> Options {
        self.debug = enabled;
        self
    }
}

/// Compiles `wasm`, links the WASI imports, and invokes the guest's
/// `_start`. Returns the guest's exit code: 0 on a clean return, or the code
/// recorded by `proc_exit` (whose trap is suppressed here). Any other trap,
/// including memory faults raised by the shim, is an error.
pub fn execute(wasm: &[u8], options: Options) -> Result<u32> {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm)?;
    let mut store = Store::new(&engine, Wasi::new(options));
    let mut linker = Linker::new(&engine);
    link(&mut linker)?;
    let instance = linker.instantiate(&mut store, &module)?.start(&mut store)?;
    let entry = instance.get_typed_func::<(), ()>(&store, Wasi::ENTRY_POINT_NAME)?;
    match entry.call(&mut store, ()) {
        Ok(()) => Ok(store.data().exit_code().unwrap_or(0)),
        Err(trap) => match store.data().exit_code() {
            Some(code) => Ok(code),
            None => Err(trap.into()),
        },
    }
}
