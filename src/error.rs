//! Unified error taxonomy for the core, one family per §7 error kind.
//!
//! `ClassFormat`/`ClassNotFound`/`Linkage` are platform errors: they abort
//! the operation that triggered them (a `load`, a `resolve`) and are
//! surfaced to the caller directly. `Throwable` carries an in-flight Java
//! exception/error through Rust's `Result` plumbing until the interpreter's
//! exception-dispatch loop (§4.8) can catch it or it reaches the root frame.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::heap::ObjectHandle;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed class file: {0}")]
    ClassFormat(String),

    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("no such field: {class}.{name}:{descriptor}")]
    NoSuchField {
        class: String,
        name: String,
        descriptor: String,
    },

    #[error("no such method: {class}.{name}{descriptor}")]
    NoSuchMethod {
        class: String,
        name: String,
        descriptor: String,
    },

    #[error("a Java exception is propagating: {0:?}")]
    Throwable(JavaThrowable),

    #[error("unsupported opcode behavior: {0}")]
    Unsupported(String),

    #[error("stack overflow")]
    StackOverflow,

    /// A `System.exit`-shaped cooperative exit, unwound by the interpreter
    /// loop rather than by calling `std::process::exit` from deep within a
    /// native-method hook.
    #[error("VM exit requested with status {0}")]
    Exit(i32),
}

impl VmError {
    pub fn class_format(msg: impl Into<String>) -> Self {
        VmError::ClassFormat(msg.into())
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// One `at Class.method(Source.java:line)` entry, recorded as a Java
/// exception unwinds past a frame with no matching handler (§4.8 "print a
/// stack trace").
#[derive(Clone, Debug)]
pub struct TraceElement {
    pub class: String,
    pub method: String,
    pub source_file: Option<String>,
    /// `None` when the method has no `LineNumberTable`; the raw `pc` is
    /// printed in that case instead (§4.8).
    pub line: Option<u16>,
    pub pc: usize,
}

/// A live Java exception/error object in flight through the Rust call stack.
/// Carries just enough to print a trace if it escapes the root frame (§4.8).
#[derive(Clone)]
pub struct JavaThrowable {
    pub class_name: String,
    pub object: Option<ObjectHandle>,
    pub trace: Vec<TraceElement>,
}

impl JavaThrowable {
    pub fn new(class_name: impl Into<String>, object: ObjectHandle) -> Self {
        JavaThrowable {
            class_name: class_name.into(),
            object: Some(object),
            trace: Vec::new(),
        }
    }

    /// Used for VM-internal throwables raised before any object can be
    /// allocated (e.g. while the heap itself is not yet available).
    pub fn bare(class_name: impl Into<String>) -> Self {
        JavaThrowable {
            class_name: class_name.into(),
            object: None,
            trace: Vec::new(),
        }
    }

    pub fn push_frame(&mut self, frame: TraceElement) {
        self.trace.push(frame);
    }
}

impl fmt::Debug for JavaThrowable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name)
    }
}

impl From<JavaThrowable> for VmError {
    fn from(t: JavaThrowable) -> Self {
        VmError::Throwable(t)
    }
}
