//! The memory gateway.
//!
//! Every guest address the shim touches goes through [`ensure`]: the caller
//! lists the exclusive upper bound of each region it will access, the
//! gateway checks them against the current size of the exported linear
//! memory, and only then runs the access closure over the byte slice and the
//! host state. A failed check is a [`Fault`], which the shim converts into
//! an engine trap rather than an errno.
//!
//! Bounds arithmetic is carried out in 64 bits so that `pointer + length`
//! cannot wrap the 32-bit address space.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use crate::types::{Ptr, Size};
use byteorder::{ByteOrder, LittleEndian};
use err_derive::Error;
use wasmi::{core::Trap, Caller, Extern};

/// Name of the guest's exported linear memory.
pub(crate) const LINEAR_MEMORY_NAME: &str = "memory";

/// An unrecoverable memory-access failure. Surfaces as an engine trap.
#[derive(Debug, Error)]
pub(crate) enum Fault {
    /// The instance does not export a linear memory under the expected name.
    #[error(display = "no exported linear memory named \"memory\"")]
    NoMemory,
    /// An access would touch `addr`, past the end of memory at `max`.
    #[error(display = "segfault: {:#x} > {:#x}", addr, max)]
    Segfault { addr: u64, max: u64 },
}

impl From<Fault> for Trap {
    fn from(fault: Fault) -> Trap {
        Trap::new(fault.to_string())
    }
}

/// The exclusive upper bound of a `len`-byte region at `ptr`.
pub(crate) fn span(ptr: Ptr, len: Size) -> u64 {
    ptr as u64 + len as u64
}

/// The exclusive upper bound of `count` elements of `size` bytes at `ptr`.
pub(crate) fn span_array(ptr: Ptr, size: Size, count: Size) -> u64 {
    ptr as u64 + size as u64 * count as u64
}

/// Runs `f` over the caller's linear memory and host state, after checking
/// that every address in `bounds` lies within the memory's current data
/// size. The borrow of the backing store lasts exactly for the call, so the
/// slice cannot be invalidated by a concurrent grow.
pub(crate) fn ensure<T, R>(
    caller: &mut Caller<'_, T>,
    bounds: &[u64],
    f: impl FnOnce(&mut [u8], &mut T) -> Result<R, Fault>,
) -> Result<R, Fault> {
    let memory = caller
        .get_export(LINEAR_MEMORY_NAME)
        .and_then(Extern::into_memory)
        .ok_or(Fault::NoMemory)?;
    let (data, state) = memory.data_and_store_mut(&mut *caller);
    let max = data.len() as u64;
    if let Some(&addr) = bounds.iter().max() {
        if addr > max {
            return Err(Fault::Segfault { addr, max });
        }
    }
    f(data, state)
}

/// A checked window `[start, end)` into memory, for regions whose bounds are
/// only known once guest data (e.g. an iovec) has been decoded.
pub(crate) fn window(data: &mut [u8], start: u64, end: u64) -> Result<&mut [u8], Fault> {
    let max = data.len() as u64;
    if start > end || end > max {
        return Err(Fault::Segfault {
            addr: end.max(start),
            max,
        });
    }
    Ok(&mut data[start as usize..end as usize])
}

/// A checked `len`-byte window at `ptr`.
pub(crate) fn slice(data: &mut [u8], ptr: Ptr, len: Size) -> Result<&mut [u8], Fault> {
    window(data, ptr as u64, span(ptr, len))
}

/// Writes a little-endian u32 at `ptr`. The caller must have ensured bounds.
pub(crate) fn write_u32(data: &mut [u8], ptr: Ptr, value: u32) {
    LittleEndian::write_u32(&mut data[ptr as usize..][..4], value);
}

/// Writes a little-endian u64 at `ptr`. The caller must have ensured bounds.
pub(crate) fn write_u64(data: &mut [u8], ptr: Ptr, value: u64) {
    LittleEndian::write_u64(&mut data[ptr as usize..][..8], value);
}
