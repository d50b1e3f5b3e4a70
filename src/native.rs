//! The native-method bridge (§4.9): loads shared libraries named on the
//! classpath/library path and calls into them through a C calling
//! convention built at bind time from the method's own descriptor.
//!
//! A `native` method is bound once, the first time it is invoked, to a
//! [`NativeThunk`] wrapping a `libffi` call interface sized for its actual
//! parameter/return types; the interpreter then just hands the thunk its
//! already-popped argument slots. Looking a symbol up tries the mangled
//! long form (`Java_Class_method__descriptor`) before the short form
//! (`Java_Class_method`), exactly as the JNI spec requires when a class
//! overloads a native method.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use libffi::middle::{Arg, Cif, CodePtr, Type};
use libloading::Library;

use crate::descriptor::{FieldDescriptor, MethodDescriptor, ReturnDescriptor};
use crate::error::{VmError, VmResult};
use crate::value::Slot;

fn ffi_type(descriptor: &FieldDescriptor) -> Type {
    match descriptor {
        FieldDescriptor::Byte | FieldDescriptor::Boolean => Type::i8(),
        FieldDescriptor::Char | FieldDescriptor::Short => Type::i16(),
        FieldDescriptor::Int => Type::i32(),
        FieldDescriptor::Long => Type::i64(),
        FieldDescriptor::Float => Type::f32(),
        FieldDescriptor::Double => Type::f64(),
        FieldDescriptor::Object(_) | FieldDescriptor::Array(_) => Type::pointer(),
    }
}

fn ffi_return_type(descriptor: &ReturnDescriptor) -> Type {
    match descriptor {
        ReturnDescriptor::Void => Type::void(),
        ReturnDescriptor::Field(field) => ffi_type(field),
    }
}

/// JNI name mangling (JNI spec §Resolving Native Method Names): alphanumerics
/// and `_` pass through as `_1`/unchanged, `;`/`[` become `_2`/`_3`, `/`
/// becomes `_`, everything else becomes a `_0xxxx` escape.
pub fn clean_str(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '_' => out.push_str("_1"),
            ';' => out.push_str("_2"),
            '[' => out.push_str("_3"),
            '/' => out.push('_'),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => out.push_str(&format!("_{:04x}", c as u32)),
        }
    }
    out
}

/// The descriptor-suffixed long form used to disambiguate overloaded natives.
pub fn clean_desc(descriptor: &str) -> String {
    clean_str(descriptor)
}

/// Loads and remembers native libraries, and resolves `Java_Class_method`
/// symbols out of them (§4.9 "Native library resolution").
pub struct NativeManager {
    libs: HashMap<PathBuf, Library>,
    load_order: Vec<PathBuf>,
}

impl NativeManager {
    pub fn new() -> Self {
        NativeManager {
            libs: HashMap::new(),
            load_order: Vec::new(),
        }
    }

    pub fn load_library(&mut self, path: impl AsRef<Path>) -> VmResult<()> {
        let path = path.as_ref().to_path_buf();
        if self.libs.contains_key(&path) {
            return Ok(());
        }
        let library = unsafe {
            Library::new(&path).map_err(|e| {
                VmError::Unsupported(format!("failed to load native library {}: {}", path.display(), e))
            })?
        };
        self.load_order.push(path.clone());
        self.libs.insert(path, library);
        Ok(())
    }

    /// `Java_pkg_Class_method` then `Java_pkg_Class_method__descriptor`,
    /// searched across every loaded library in load order.
    pub fn find_symbol(&self, class: &str, name: &str, descriptor: &str) -> Option<*const c_void> {
        let class_part = clean_str(class);
        let name_part = clean_str(name);
        let short = format!("Java_{}_{}", class_part, name_part);
        let long = format!("Java_{}_{}__{}", class_part, name_part, clean_desc(descriptor));

        for path in &self.load_order {
            let library = self.libs.get(path)?;
            unsafe {
                if let Ok(symbol) = library.get::<unsafe extern "C" fn()>(long.as_bytes()) {
                    return Some(*symbol as *const c_void);
                }
                if let Ok(symbol) = library.get::<unsafe extern "C" fn()>(short.as_bytes()) {
                    return Some(*symbol as *const c_void);
                }
            }
        }
        None
    }
}

/// A bound native call: a `libffi` call interface sized for one method's
/// actual parameter/return shape, plus two synthetic leading parameters for
/// the JNI environment pointer and the class/receiver pointer (§4.9 "Calling
/// convention").
pub struct NativeThunk {
    cif: Cif,
    code: CodePtr,
    descriptor: MethodDescriptor,
}

impl NativeThunk {
    pub fn bind(fn_ptr: *const c_void, descriptor: MethodDescriptor) -> Self {
        let mut arg_types = vec![Type::pointer(), Type::pointer()];
        arg_types.extend(descriptor.parameters.iter().map(ffi_type));
        let return_type = ffi_return_type(&descriptor.return_type);
        let cif = Cif::new(arg_types, return_type);
        NativeThunk {
            cif,
            code: CodePtr(fn_ptr as *mut c_void),
            descriptor,
        }
    }

    /// Invokes the bound native function with `env`/`target` as the two
    /// leading pointer arguments and `args` (already widened/narrowed to
    /// match `descriptor.parameters`) as the rest. Category-2 arguments
    /// occupy a single `Slot` here (unlike the operand stack), since the
    /// caller already collapsed them before calling in.
    ///
    /// # Safety
    /// `fn_ptr` passed to `bind` must point at a function matching
    /// `descriptor`'s actual C ABI shape; this is trusted, not checked.
    pub fn call(&self, env: *const c_void, target: *const c_void, args: &[Slot]) -> VmResult<Option<Slot>> {
        if args.len() != self.descriptor.parameters.len() {
            return Err(VmError::Unsupported(format!(
                "native call argument count mismatch: expected {}, got {}",
                self.descriptor.parameters.len(),
                args.len()
            )));
        }

        // Reference arguments borrow from this buffer rather than directly
        // from `Slot::Reference`'s `Option<ObjectHandle>`, since `Arg::new`
        // needs a `*const c_void` lvalue to point at, not an `Rc`.
        let mut pointer_storage: Vec<*const c_void> = Vec::with_capacity(args.len());
        for slot in args {
            if let Slot::Reference(handle) = slot {
                let ptr = handle
                    .as_ref()
                    .map(|h| Rc::as_ptr(h) as *const c_void)
                    .unwrap_or(std::ptr::null());
                pointer_storage.push(ptr);
            }
        }

        let mut ffi_args: Vec<Arg> = Vec::with_capacity(args.len() + 2);
        ffi_args.push(Arg::new(&env));
        ffi_args.push(Arg::new(&target));

        let mut pointer_cursor = 0usize;
        for slot in args {
            ffi_args.push(match slot {
                Slot::Int(v) => Arg::new(v),
                Slot::Long(v) => Arg::new(v),
                Slot::Float(v) => Arg::new(v),
                Slot::Double(v) => Arg::new(v),
                Slot::Reference(_) => {
                    let arg = Arg::new(&pointer_storage[pointer_cursor]);
                    pointer_cursor += 1;
                    arg
                }
                Slot::Top => {
                    return Err(VmError::Unsupported(
                        "native call received a padding slot as an argument".into(),
                    ))
                }
            });
        }

        unsafe {
            Ok(match &self.descriptor.return_type {
                ReturnDescriptor::Void => {
                    self.cif.call::<()>(self.code, &ffi_args);
                    None
                }
                ReturnDescriptor::Field(FieldDescriptor::Long) => {
                    Some(Slot::Long(self.cif.call(self.code, &ffi_args)))
                }
                ReturnDescriptor::Field(FieldDescriptor::Double) => {
                    Some(Slot::Double(self.cif.call(self.code, &ffi_args)))
                }
                ReturnDescriptor::Field(FieldDescriptor::Float) => {
                    Some(Slot::Float(self.cif.call(self.code, &ffi_args)))
                }
                ReturnDescriptor::Field(FieldDescriptor::Object(_))
                | ReturnDescriptor::Field(FieldDescriptor::Array(_)) => {
                    // Mapping a raw returned pointer back to a heap-managed
                    // `ObjectHandle` would require the native side to publish
                    // through the same `Heap`, which is outside this bridge's
                    // surface; native methods returning references are only
                    // reachable through the hook table, never through this path.
                    let _ptr: *const c_void = self.cif.call(self.code, &ffi_args);
                    None
                }
                ReturnDescriptor::Field(_) => Some(Slot::Int(self.cif.call(self.code, &ffi_args))),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_reserved_characters() {
        assert_eq!(clean_str("java/lang/Object"), "java_lang_Object");
        assert_eq!(clean_str("a_b"), "a_1b");
        assert_eq!(clean_desc("(I)V"), "_0028I_0029V");
    }
}
