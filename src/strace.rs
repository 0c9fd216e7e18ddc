//! Strace-like call tracing.
//!
//! Tracing is a capability injected into the WASI environment rather than
//! conditional prints scattered through the shim: each imported call builds
//! a `Trace`, feeds it its arguments, and finishes it with the resulting
//! errno, producing a single `name(args) = errno` line on the `log` facade.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use crate::types::Errno;
use log::debug;
use std::fmt::{Display, LowerHex, Write};

pub(crate) struct Trace {
    enabled: bool,
    line: String,
    seen_args: bool,
}

impl Trace {
    /// Starts a trace for the named imported function.
    pub fn func(enabled: bool, name: &str) -> Trace {
        let mut line = String::new();
        if enabled {
            line.push_str(name);
            line.push('(');
        }
        Trace {
            enabled,
            line,
            seen_args: false,
        }
    }

    fn comma(&mut self) {
        if self.seen_args {
            self.line.push_str(", ");
        }
        self.seen_args = true;
    }

    /// An argument rendered in decimal.
    pub fn arg_dec<T: Display>(&mut self, n: T) {
        if !self.enabled {
            return;
        }
        self.comma();
        let _ = write!(self.line, "{}", n);
    }

    /// An argument rendered in hexadecimal (pointers, flag sets).
    pub fn arg_hex<T: LowerHex>(&mut self, n: T) {
        if !self.enabled {
            return;
        }
        self.comma();
        let _ = write!(self.line, "{:#x}", n);
    }

    /// A string argument, quoted and escaped.
    pub fn arg_str(&mut self, s: &str) {
        if !self.enabled {
            return;
        }
        self.comma();
        let _ = write!(self.line, "{:?}", s);
    }

    /// Finishes the trace with the call's result and hands the errno back.
    pub fn result(self, errno: Errno) -> Errno {
        if self.enabled {
            debug!(target: "wasi", "{}) = {:?}", self.line, errno);
        }
        errno
    }
}
