//! End-to-end tests driving the ABI through a real wasmi instance.
//!
//! The guest module imports every supported WASI function and re-exports it
//! alongside a one-page linear memory, so the tests can exercise the exact
//! wire encodings from the host side without a guest toolchain.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use wasi_host::{link, Errno, FixedClock, Filesystem, MemFs, Options, Rights, Wasi};
use wasmi::{Engine, Extern, Instance, Linker, Memory, Module, Store, Value};

const GUEST: &str = r#"
(module
  (import "wasi_snapshot_preview1" "args_sizes_get" (func $args_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "args_get" (func $args_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_sizes_get" (func $environ_sizes_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "environ_get" (func $environ_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "clock_time_get" (func $clock_time_get (param i32 i64 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_close" (func $fd_close (param i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_fdstat_get" (func $fd_fdstat_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_fdstat_set_flags" (func $fd_fdstat_set_flags (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_prestat_get" (func $fd_prestat_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_prestat_dir_name" (func $fd_prestat_dir_name (param i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_filestat_get" (func $fd_filestat_get (param i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_seek" (func $fd_seek (param i32 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_read" (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_pread" (func $fd_pread (param i32 i32 i32 i64 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_readdir" (func $fd_readdir (param i32 i32 i32 i64 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_open" (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_filestat_get" (func $path_filestat_get (param i32 i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_readlink" (func $path_readlink (param i32 i32 i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_rename" (func $path_rename (param i32 i32 i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_create_directory" (func $path_create_directory (param i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_remove_directory" (func $path_remove_directory (param i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_unlink_file" (func $path_unlink_file (param i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "poll_oneoff" (func $poll_oneoff (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  ;; Each export below is a thin wasm-level wrapper that calls the
  ;; corresponding import, rather than re-exporting the import directly.
  ;; This keeps the host function's invocation a nested wasm-to-host call
  ;; (so the engine attaches the calling instance to it) instead of a
  ;; direct root call from the test harness.
  (func (export "args_sizes_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $args_sizes_get)
  (func (export "args_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $args_get)
  (func (export "environ_sizes_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $environ_sizes_get)
  (func (export "environ_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $environ_get)
  (func (export "clock_time_get") (param i32 i64 i32) (result i32)
    local.get 0 local.get 1 local.get 2 call $clock_time_get)
  (func (export "fd_close") (param i32) (result i32)
    local.get 0 call $fd_close)
  (func (export "fd_fdstat_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $fd_fdstat_get)
  (func (export "fd_fdstat_set_flags") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $fd_fdstat_set_flags)
  (func (export "fd_prestat_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $fd_prestat_get)
  (func (export "fd_prestat_dir_name") (param i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 call $fd_prestat_dir_name)
  (func (export "fd_filestat_get") (param i32 i32) (result i32)
    local.get 0 local.get 1 call $fd_filestat_get)
  (func (export "fd_seek") (param i32 i64 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 call $fd_seek)
  (func (export "fd_write") (param i32 i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 call $fd_write)
  (func (export "fd_read") (param i32 i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 call $fd_read)
  (func (export "fd_pread") (param i32 i32 i32 i64 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 local.get 4 call $fd_pread)
  (func (export "fd_readdir") (param i32 i32 i32 i64 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 local.get 4 call $fd_readdir)
  (func (export "path_open") (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 local.get 4
    local.get 5 local.get 6 local.get 7 local.get 8 call $path_open)
  (func (export "path_filestat_get") (param i32 i32 i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 local.get 4 call $path_filestat_get)
  (func (export "path_readlink") (param i32 i32 i32 i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 local.get 4 local.get 5 call $path_readlink)
  (func (export "path_rename") (param i32 i32 i32 i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 local.get 4 local.get 5 call $path_rename)
  (func (export "path_create_directory") (param i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 call $path_create_directory)
  (func (export "path_remove_directory") (param i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 call $path_remove_directory)
  (func (export "path_unlink_file") (param i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 call $path_unlink_file)
  (func (export "poll_oneoff") (param i32 i32 i32 i32) (result i32)
    local.get 0 local.get 1 local.get 2 local.get 3 call $poll_oneoff)
  (func (export "proc_exit") (param i32)
    local.get 0 call $proc_exit)
)
"#;

const SUCCESS: i32 = Errno::Success as i32;
const BADF: i32 = Errno::Badf as i32;
const NOENT: i32 = Errno::NoEnt as i32;
const NOSYS: i32 = Errno::NoSys as i32;

const OFLAG_CREAT: i32 = 1;
const OFLAG_DIRECTORY: i32 = 2;
const SYMLINK_FOLLOW: i32 = 1;

const FD_READ: i64 = Rights::FD_READ.0 as i64;
const FD_WRITE: i64 = Rights::FD_WRITE.0 as i64;

/// A writer that shares its buffer with the test.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Guest {
    store: Store<Wasi>,
    instance: Instance,
}

impl Guest {
    fn new(options: Options) -> Guest {
        let engine = Engine::default();
        let wasm = wat::parse_str(GUEST).expect("guest assembles");
        let module = Module::new(&engine, &wasm[..]).expect("guest compiles");
        let mut store = Store::new(&engine, Wasi::new(options));
        let mut linker = Linker::new(&engine);
        link(&mut linker).expect("imports register");
        let instance = linker
            .instantiate(&mut store, &module)
            .expect("guest instantiates")
            .start(&mut store)
            .expect("guest starts");
        Guest { store, instance }
    }

    fn memory(&mut self) -> Memory {
        self.instance
            .get_export(&self.store, "memory")
            .and_then(Extern::into_memory)
            .expect("guest memory")
    }

    fn write_mem(&mut self, ptr: u32, bytes: &[u8]) {
        let memory = self.memory();
        memory.data_mut(&mut self.store)[ptr as usize..][..bytes.len()].copy_from_slice(bytes);
    }

    fn read_mem(&mut self, ptr: u32, len: usize) -> Vec<u8> {
        let memory = self.memory();
        memory.data(&self.store)[ptr as usize..][..len].to_vec()
    }

    fn read_u32(&mut self, ptr: u32) -> u32 {
        u32::from_le_bytes(self.read_mem(ptr, 4).try_into().unwrap())
    }

    fn read_u64(&mut self, ptr: u32) -> u64 {
        u64::from_le_bytes(self.read_mem(ptr, 8).try_into().unwrap())
    }

    fn write_iovec(&mut self, at: u32, buf: u32, len: u32) {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&buf.to_le_bytes());
        bytes[4..].copy_from_slice(&len.to_le_bytes());
        self.write_mem(at, &bytes);
    }

    /// Invokes an export, returning its errno or the trap.
    fn call(&mut self, name: &str, args: &[Value]) -> Result<i32, wasmi::Error> {
        let func = self
            .instance
            .get_func(&self.store, name)
            .unwrap_or_else(|| panic!("no export {}", name));
        let results_len = func.ty(&self.store).results().len();
        let mut results = vec![Value::I32(0); results_len];
        func.call(&mut self.store, args, &mut results)?;
        Ok(match results.first() {
            Some(Value::I32(errno)) => *errno,
            _ => 0,
        })
    }

    fn errno(&mut self, name: &str, args: &[Value]) -> i32 {
        self.call(name, args)
            .unwrap_or_else(|err| panic!("{} trapped: {}", name, err))
    }

    /// `path_open` relative to `basefd`, following symlinks, returning
    /// (errno, new fd).
    fn path_open(&mut self, basefd: i32, path: &str, oflags: i32, rights: i64) -> (i32, u32) {
        const PATH: u32 = 0x3000;
        const RET: u32 = 0x3100;
        self.write_mem(PATH, path.as_bytes());
        let errno = self.errno(
            "path_open",
            &[
                Value::I32(basefd),
                Value::I32(SYMLINK_FOLLOW),
                Value::I32(PATH as i32),
                Value::I32(path.len() as i32),
                Value::I32(oflags),
                Value::I64(rights),
                Value::I64(0),
                Value::I32(0),
                Value::I32(RET as i32),
            ],
        );
        let fd = self.read_u32(RET);
        (errno, fd)
    }

    /// One scatter read into `buf`, returning (errno, bytes read).
    fn fd_read(&mut self, fd: i32, buf: u32, len: u32) -> (i32, u32) {
        const IOVS: u32 = 0x2000;
        const RET: u32 = 0x2010;
        self.write_iovec(IOVS, buf, len);
        let errno = self.errno(
            "fd_read",
            &[
                Value::I32(fd),
                Value::I32(IOVS as i32),
                Value::I32(1),
                Value::I32(RET as i32),
            ],
        );
        let n = self.read_u32(RET);
        (errno, n)
    }

    /// One gather write from `buf`, returning (errno, bytes written).
    fn fd_write(&mut self, fd: i32, buf: u32, len: u32) -> (i32, u32) {
        const IOVS: u32 = 0x2020;
        const RET: u32 = 0x2030;
        self.write_iovec(IOVS, buf, len);
        let errno = self.errno(
            "fd_write",
            &[
                Value::I32(fd),
                Value::I32(IOVS as i32),
                Value::I32(1),
                Value::I32(RET as i32),
            ],
        );
        let n = self.read_u32(RET);
        (errno, n)
    }

    fn path_call(&mut self, name: &str, fd: i32, path: &str) -> i32 {
        const PATH: u32 = 0x3200;
        self.write_mem(PATH, path.as_bytes());
        self.errno(
            name,
            &[
                Value::I32(fd),
                Value::I32(PATH as i32),
                Value::I32(path.len() as i32),
            ],
        )
    }
}

////////////////////////////////////////////////////////////////////////////////
// Scenarios.
////////////////////////////////////////////////////////////////////////////////

#[test]
fn args_round_trip() {
    let mut g = Guest::new(Options::new().args(["hello", "world"]));

    assert_eq!(
        g.errno("args_sizes_get", &[Value::I32(0x100), Value::I32(0x104)]),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x100), 2);
    assert_eq!(g.read_u32(0x104), 12);

    assert_eq!(
        g.errno("args_get", &[Value::I32(0x200), Value::I32(0x300)]),
        SUCCESS
    );
    // The pointer array points into the packed blob.
    assert_eq!(g.read_u32(0x200), 0x300);
    assert_eq!(g.read_u32(0x204), 0x306);
    assert_eq!(g.read_mem(0x300, 12), b"hello\0world\0");
}

#[test]
fn environ_round_trip() {
    let mut g = Guest::new(Options::new().env("TEST", "it works"));

    assert_eq!(
        g.errno("environ_sizes_get", &[Value::I32(0x100), Value::I32(0x104)]),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x100), 1);
    assert_eq!(g.read_u32(0x104), 14);

    assert_eq!(
        g.errno("environ_get", &[Value::I32(0x200), Value::I32(0x300)]),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x200), 0x300);
    assert_eq!(g.read_mem(0x300, 14), b"TEST=it works\0");
}

#[test]
fn fixed_clock_time() {
    let clock = FixedClock::new(1_690_674_910, 239_502_000);
    let mut g = Guest::new(Options::new().clock(clock));

    assert_eq!(
        g.errno(
            "clock_time_get",
            &[Value::I32(0), Value::I64(0), Value::I32(0x100)]
        ),
        SUCCESS
    );
    let nanos = g.read_u64(0x100);
    assert_eq!(nanos / 1_000_000_000, 1_690_674_910);
    assert_eq!(nanos % 1_000_000_000, 239_502_000);
}

#[test]
fn open_and_read_file() {
    let fs = MemFs::new();
    fs.write_file("hello.txt", b"hello world!").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    let (errno, fd) = g.path_open(3, "hello.txt", 0, FD_READ);
    assert_eq!(errno, SUCCESS);
    assert_eq!(fd, 4);

    // The new descriptor stats as a regular file of the right size.
    assert_eq!(
        g.errno("fd_filestat_get", &[Value::I32(4), Value::I32(0x800)]),
        SUCCESS
    );
    assert_eq!(g.read_mem(0x810, 1), [4]); // filetype: regular file
    assert_eq!(g.read_u64(0x820), 12); // size

    let (errno, n) = g.fd_read(4, 0x700, 64);
    assert_eq!(errno, SUCCESS);
    assert_eq!(n, 12);
    assert_eq!(g.read_mem(0x700, 12), b"hello world!");

    // A second read is at end of stream.
    let (errno, n) = g.fd_read(4, 0x700, 64);
    assert_eq!(errno, SUCCESS);
    assert_eq!(n, 0);

    // Close exactly once; afterwards the fd is gone.
    assert_eq!(g.errno("fd_close", &[Value::I32(4)]), SUCCESS);
    let (errno, _) = g.fd_read(4, 0x700, 64);
    assert_eq!(errno, BADF);
    assert_eq!(g.errno("fd_close", &[Value::I32(4)]), BADF);

    // Descriptor numbers are never reused.
    let (errno, fd) = g.path_open(3, "hello.txt", 0, FD_READ);
    assert_eq!(errno, SUCCESS);
    assert_eq!(fd, 5);
}

#[test]
fn list_directory() {
    let fs = MemFs::new();
    fs.write_file("a.txt", b"a").unwrap();
    fs.write_file("b.txt", b"b").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    let (errno, fd) = g.path_open(3, "/", OFLAG_DIRECTORY, FD_READ);
    assert_eq!(errno, SUCCESS);

    assert_eq!(
        g.errno(
            "fd_readdir",
            &[
                Value::I32(fd as i32),
                Value::I32(0x1000),
                Value::I32(512),
                Value::I64(0),
                Value::I32(0x2000),
            ]
        ),
        SUCCESS
    );
    // Two entries: 24-byte dirent followed by the raw name, contiguously.
    let used = g.read_u32(0x2000);
    assert_eq!(used, 2 * (24 + 5));

    assert_eq!(g.read_u64(0x1000), 1); // next cookie
    assert_eq!(g.read_u32(0x1010), 5); // namlen
    assert_eq!(g.read_mem(0x1014, 1), [4]); // dtype: regular file
    assert_ne!(g.read_u64(0x1008), 0); // ino
    assert_eq!(g.read_mem(0x1018, 5), b"a.txt");

    let second = 0x1000 + 29;
    assert_eq!(g.read_u64(second), 2);
    assert_eq!(g.read_mem(second + 24, 5), b"b.txt");

    // Resuming from a cookie yields the tail of the cached list.
    assert_eq!(
        g.errno(
            "fd_readdir",
            &[
                Value::I32(fd as i32),
                Value::I32(0x1000),
                Value::I32(512),
                Value::I64(1),
                Value::I32(0x2000),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x2000), 29);
    assert_eq!(g.read_mem(0x1018, 5), b"b.txt");

    // A dirent that fits but whose name does not is truncated in place.
    assert_eq!(
        g.errno(
            "fd_readdir",
            &[
                Value::I32(fd as i32),
                Value::I32(0x1000),
                Value::I32(27),
                Value::I64(0),
                Value::I32(0x2000),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x2000), 27);
    assert_eq!(g.read_mem(0x1018, 3), b"a.t");
}

#[test]
fn echo_stdin_to_stdout() {
    let text = "is this thing on?\nhow about this?\n";
    let stdout = SharedBuf::default();
    let mut g = Guest::new(
        Options::new()
            .stdin(Cursor::new(text.as_bytes().to_vec()))
            .stdout(stdout.clone()),
    );

    loop {
        let (errno, n) = g.fd_read(0, 0x700, 16);
        assert_eq!(errno, SUCCESS);
        if n == 0 {
            break;
        }
        let (errno, wrote) = g.fd_write(1, 0x700, n);
        assert_eq!(errno, SUCCESS);
        assert_eq!(wrote, n);
    }
    assert_eq!(stdout.contents(), text.as_bytes());
}

#[test]
fn mkdir_and_stat() {
    let clock = FixedClock::new(1_690_674_910, 239_502_000);
    let mut g = Guest::new(Options::new().fs(MemFs::new()).clock(clock));

    for name in ["a", "b", "c", "d"] {
        assert_eq!(g.path_call("path_create_directory", 3, name), SUCCESS);
    }

    // Listing the preopen root itself works.
    assert_eq!(
        g.errno(
            "fd_readdir",
            &[
                Value::I32(3),
                Value::I32(0x1000),
                Value::I32(512),
                Value::I64(0),
                Value::I32(0x2000),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x2000), 4 * (24 + 1));
    let mut names = Vec::new();
    for i in 0..4u32 {
        let at = 0x1000 + i * 25;
        assert_eq!(g.read_mem(at + 20, 1), [3]); // dtype: directory
        names.push(g.read_mem(at + 24, 1)[0] as char);
    }
    assert_eq!(names, ['a', 'b', 'c', 'd']);

    // Each directory stats as empty with mtime 0.
    for name in ["a", "b", "c", "d"] {
        let (errno, fd) = g.path_open(3, name, OFLAG_DIRECTORY, FD_READ);
        assert_eq!(errno, SUCCESS);
        assert_eq!(
            g.errno("fd_filestat_get", &[Value::I32(fd as i32), Value::I32(0x800)]),
            SUCCESS
        );
        assert_eq!(g.read_mem(0x810, 1), [3]); // filetype: directory
        assert_eq!(g.read_u64(0x820), 0); // size
        assert_eq!(g.read_u64(0x830), 0); // mtim
    }
}

#[test]
fn create_write_then_read_back() {
    let fs = MemFs::new();
    let mut g = Guest::new(Options::new().fs(fs));

    let (errno, fd) = g.path_open(3, "out.txt", OFLAG_CREAT, FD_READ | FD_WRITE);
    assert_eq!(errno, SUCCESS);
    g.write_mem(0x700, b"written by guest");
    let (errno, n) = g.fd_write(fd as i32, 0x700, 16);
    assert_eq!(errno, SUCCESS);
    assert_eq!(n, 16);

    // Seek back and read what was written.
    assert_eq!(
        g.errno(
            "fd_seek",
            &[
                Value::I32(fd as i32),
                Value::I64(0),
                Value::I32(0),
                Value::I32(0x500),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u64(0x500), 0);
    let (errno, n) = g.fd_read(fd as i32, 0x900, 64);
    assert_eq!(errno, SUCCESS);
    assert_eq!(n, 16);
    assert_eq!(g.read_mem(0x900, 16), b"written by guest");
}

////////////////////////////////////////////////////////////////////////////////
// Descriptor table and prestat.
////////////////////////////////////////////////////////////////////////////////

#[test]
fn prestat_reports_the_preopen_root() {
    let mut g = Guest::new(Options::new().fs(MemFs::new()));

    assert_eq!(
        g.errno("fd_prestat_get", &[Value::I32(3), Value::I32(0x100)]),
        SUCCESS
    );
    assert_eq!(g.read_mem(0x100, 1), [0]); // tag: directory
    assert_eq!(g.read_u32(0x104), 1); // dir_len == len("/")

    assert_eq!(
        g.errno(
            "fd_prestat_dir_name",
            &[Value::I32(3), Value::I32(0x200), Value::I32(1)]
        ),
        SUCCESS
    );
    assert_eq!(g.read_mem(0x200, 1), b"/");

    // Standard streams are not preopens.
    assert_eq!(
        g.errno("fd_prestat_get", &[Value::I32(1), Value::I32(0x100)]),
        BADF
    );
}

#[test]
fn prestat_without_filesystem_is_badf() {
    let mut g = Guest::new(Options::new());
    assert_eq!(
        g.errno("fd_prestat_get", &[Value::I32(3), Value::I32(0x100)]),
        BADF
    );
}

#[test]
fn stdio_descriptors_survive_close() {
    let stdout = SharedBuf::default();
    let mut g = Guest::new(Options::new().fs(MemFs::new()).stdout(stdout.clone()));

    for _ in 0..3 {
        assert_eq!(g.errno("fd_close", &[Value::I32(1)]), SUCCESS);
        assert_eq!(g.errno("fd_close", &[Value::I32(3)]), SUCCESS);
    }
    g.write_mem(0x700, b"still here");
    let (errno, n) = g.fd_write(1, 0x700, 10);
    assert_eq!(errno, SUCCESS);
    assert_eq!(n, 10);
    assert_eq!(stdout.contents(), b"still here");

    // The preopen root still satisfies its role.
    assert_eq!(
        g.errno("fd_prestat_get", &[Value::I32(3), Value::I32(0x100)]),
        SUCCESS
    );

    // Stdio stats as a character device.
    assert_eq!(
        g.errno("fd_fdstat_get", &[Value::I32(1), Value::I32(0x300)]),
        SUCCESS
    );
    assert_eq!(g.read_mem(0x300, 1), [2]);
}

#[test]
fn fdstat_records_open_flags_and_rights() {
    let fs = MemFs::new();
    fs.write_file("f", b"x").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    const PATH: u32 = 0x3000;
    g.write_mem(PATH, b"f");
    let append = 1i32; // Fdflags::APPEND
    assert_eq!(
        g.errno(
            "path_open",
            &[
                Value::I32(3),
                Value::I32(SYMLINK_FOLLOW),
                Value::I32(PATH as i32),
                Value::I32(1),
                Value::I32(0),
                Value::I64(FD_READ | FD_WRITE),
                Value::I64(0),
                Value::I32(append),
                Value::I32(0x3100),
            ]
        ),
        SUCCESS
    );
    let fd = g.read_u32(0x3100);

    assert_eq!(
        g.errno("fd_fdstat_get", &[Value::I32(fd as i32), Value::I32(0x400)]),
        SUCCESS
    );
    assert_eq!(g.read_mem(0x400, 1), [4]); // filetype: regular file
    assert_eq!(g.read_mem(0x402, 2), [1, 0]); // flags: append
    assert_eq!(g.read_u64(0x408), (FD_READ | FD_WRITE) as u64);
}

////////////////////////////////////////////////////////////////////////////////
// Seek and pread.
////////////////////////////////////////////////////////////////////////////////

#[test]
fn seek_and_pread_position_handling() {
    let fs = MemFs::new();
    fs.write_file("f", b"0123456789").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));
    let (errno, fd) = g.path_open(3, "f", 0, FD_READ);
    assert_eq!(errno, SUCCESS);
    let fd = fd as i32;

    // With the position at zero, the offset is not applied: the read comes
    // from the start of the file.
    g.write_iovec(0x600, 0x700, 4);
    assert_eq!(
        g.errno(
            "fd_pread",
            &[
                Value::I32(fd),
                Value::I32(0x600),
                Value::I32(1),
                Value::I64(6),
                Value::I32(0x500),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x500), 4);
    assert_eq!(g.read_mem(0x700, 4), b"0123");

    // Position the descriptor, then pread elsewhere: the offset is honored
    // and the position restored afterwards.
    assert_eq!(
        g.errno(
            "fd_seek",
            &[Value::I32(fd), Value::I64(2), Value::I32(0), Value::I32(0x500)]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u64(0x500), 2);

    g.write_iovec(0x600, 0x700, 4);
    assert_eq!(
        g.errno(
            "fd_pread",
            &[
                Value::I32(fd),
                Value::I32(0x600),
                Value::I32(1),
                Value::I64(6),
                Value::I32(0x500),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x500), 4);
    assert_eq!(g.read_mem(0x700, 4), b"6789");

    // The position was restored: a plain read continues from offset 2.
    let (errno, n) = g.fd_read(fd, 0x900, 4);
    assert_eq!(errno, SUCCESS);
    assert_eq!(n, 4);
    assert_eq!(g.read_mem(0x900, 4), b"2345");

    // Seeking a stream is unsupported.
    assert_eq!(
        g.errno(
            "fd_seek",
            &[Value::I32(1), Value::I64(0), Value::I32(0), Value::I32(0x500)]
        ),
        NOSYS
    );
}

////////////////////////////////////////////////////////////////////////////////
// Path operations.
////////////////////////////////////////////////////////////////////////////////

#[test]
fn rename_reports_source_fd() {
    let fs = MemFs::new();
    fs.write_file("old.txt", b"contents").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    g.write_mem(0x3000, b"old.txt");
    g.write_mem(0x3400, b"new.txt");
    assert_eq!(
        g.errno(
            "path_rename",
            &[
                Value::I32(3),
                Value::I32(0x3000),
                Value::I32(7),
                Value::I32(0x900),
                Value::I32(0x3400),
                Value::I32(7),
            ]
        ),
        SUCCESS
    );
    // The source descriptor is echoed into new_fd_ptr.
    assert_eq!(g.read_u32(0x900), 3);

    let (errno, _) = g.path_open(3, "old.txt", 0, FD_READ);
    assert_eq!(errno, NOENT);
    let (errno, _) = g.path_open(3, "new.txt", 0, FD_READ);
    assert_eq!(errno, SUCCESS);
}

#[test]
fn readlink_reports_the_base_name() {
    let fs = MemFs::new();
    fs.write_file("hello.txt", b"x").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    g.write_mem(0x3000, b"/hello.txt");
    assert_eq!(
        g.errno(
            "path_readlink",
            &[
                Value::I32(3),
                Value::I32(0x3000),
                Value::I32(10),
                Value::I32(0x400),
                Value::I32(64),
                Value::I32(0x500),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x500), 9);
    assert_eq!(g.read_mem(0x400, 9), b"hello.txt");

    // Truncation on a short buffer is silent.
    assert_eq!(
        g.errno(
            "path_readlink",
            &[
                Value::I32(3),
                Value::I32(0x3000),
                Value::I32(10),
                Value::I32(0x400),
                Value::I32(5),
                Value::I32(0x500),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_u32(0x500), 5);
    assert_eq!(g.read_mem(0x400, 5), b"hello");
}

#[test]
fn path_filestat_returns_the_directory_stat() {
    let mut fs = MemFs::new();
    fs.create_dir("sub").unwrap();
    fs.write_file("sub/a.txt", b"aaaa").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    let (errno, fd) = g.path_open(3, "sub", OFLAG_DIRECTORY, FD_READ);
    assert_eq!(errno, SUCCESS);

    // The stat written back is the base descriptor's, not the named path's.
    g.write_mem(0x3000, b"a.txt");
    assert_eq!(
        g.errno(
            "path_filestat_get",
            &[
                Value::I32(fd as i32),
                Value::I32(0),
                Value::I32(0x3000),
                Value::I32(5),
                Value::I32(0x800),
            ]
        ),
        SUCCESS
    );
    assert_eq!(g.read_mem(0x810, 1), [3]); // filetype: directory
    assert_eq!(g.read_u64(0x820), 0); // a directory's size, not the file's
}

#[test]
fn remove_operations() {
    let mut fs = MemFs::new();
    fs.create_dir("d").unwrap();
    fs.write_file("f", b"x").unwrap();
    let mut g = Guest::new(Options::new().fs(fs));

    // rmdir on a file reports NOTDIR; unlink works on it.
    assert_eq!(
        g.path_call("path_remove_directory", 3, "f"),
        Errno::NotDir as i32
    );
    assert_eq!(g.path_call("path_unlink_file", 3, "f"), SUCCESS);
    assert_eq!(g.path_call("path_unlink_file", 3, "f"), NOENT);
    assert_eq!(g.path_call("path_remove_directory", 3, "d"), SUCCESS);
}

////////////////////////////////////////////////////////////////////////////////
// Negative paths and traps.
////////////////////////////////////////////////////////////////////////////////

#[test]
fn bad_descriptor_is_badf() {
    let mut g = Guest::new(Options::new());
    let (errno, _) = g.fd_write(42, 0x700, 4);
    assert_eq!(errno, BADF);
    assert_eq!(
        g.errno("fd_filestat_get", &[Value::I32(42), Value::I32(0x800)]),
        BADF
    );
}

#[test]
fn path_open_without_filesystem_is_nosys() {
    let mut g = Guest::new(Options::new());
    let (errno, _) = g.path_open(3, "anything", 0, FD_READ);
    assert_eq!(errno, NOSYS);
}

#[test]
fn unsupported_calls_are_nosys() {
    let mut g = Guest::new(Options::new());
    assert_eq!(
        g.errno(
            "poll_oneoff",
            &[Value::I32(0), Value::I32(0), Value::I32(1), Value::I32(0x100)]
        ),
        NOSYS
    );
    assert_eq!(
        g.errno("fd_fdstat_set_flags", &[Value::I32(1), Value::I32(1)]),
        NOSYS
    );
}

#[test]
fn straddling_iovec_array_traps() {
    let stdout = SharedBuf::default();
    let mut g = Guest::new(Options::new().stdout(stdout));

    // The iovec array itself runs past the end of the one-page memory.
    let err = g
        .call(
            "fd_write",
            &[
                Value::I32(1),
                Value::I32(65532),
                Value::I32(1),
                Value::I32(0x100),
            ]
        )
        .unwrap_err();
    assert!(err.to_string().contains("segfault"), "got: {}", err);
}

#[test]
fn out_of_bounds_retptr_traps_without_writing() {
    let mut g = Guest::new(Options::new().args(["x"]));
    let err = g
        .call("args_sizes_get", &[Value::I32(0x100), Value::I32(65533)])
        .unwrap_err();
    assert!(err.to_string().contains("segfault"), "got: {}", err);
    // The in-bounds word was not touched either.
    assert_eq!(g.read_u32(0x100), 0);
}

#[test]
fn proc_exit_traps_with_the_code() {
    let mut g = Guest::new(Options::new());
    let err = g.call("proc_exit", &[Value::I32(7)]).unwrap_err();
    assert!(err.to_string().contains("exit: 7"), "got: {}", err);

    // A zero code returns without trapping.
    let mut g = Guest::new(Options::new());
    assert_eq!(g.call("proc_exit", &[Value::I32(0)]).unwrap(), 0);
}

////////////////////////////////////////////////////////////////////////////////
// The execute runner.
////////////////////////////////////////////////////////////////////////////////

#[test]
fn execute_returns_the_exit_code() {
    const EXIT3: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
      (memory (export "memory") 1)
      (func (export "_start") (call $proc_exit (i32.const 3))))
    "#;
    let wasm = wat::parse_str(EXIT3).unwrap();
    assert_eq!(wasi_host::execute(&wasm, Options::new()).unwrap(), 3);

    const CLEAN: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "_start")))
    "#;
    let wasm = wat::parse_str(CLEAN).unwrap();
    assert_eq!(wasi_host::execute(&wasm, Options::new()).unwrap(), 0);
}
