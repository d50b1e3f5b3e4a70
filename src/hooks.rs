//! In-process native method hooks for the handful of `java.lang`/`java.io`
//! natives the core needs to run ordinary class files without a full
//! platform library on the classpath (§SPEC_FULL.md B "Native method
//! hooks"). Consulted before the FFI bridge in [`crate::native`]: a real
//! native library on the classpath can still override any of these by
//! exporting the matching `Java_Class_method` symbol, since the interpreter
//! only falls back to the hook table when [`Vm::resolve_native`] fails.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::error::{VmError, VmResult};
use crate::heap::ObjectHandle;
use crate::value::Slot;
use crate::vm::Vm;

pub type Hook = fn(&Vm, Option<ObjectHandle>, &[Slot]) -> VmResult<Option<Slot>>;

lazy_static! {
    static ref HOOKS: HashMap<(&'static str, &'static str, &'static str), Hook> = {
        let mut table: HashMap<(&'static str, &'static str, &'static str), Hook> = HashMap::new();

        table.insert(("java/lang/Object", "<init>", "()V"), object_init as Hook);
        table.insert(("java/lang/Object", "hashCode", "()I"), object_hash_code as Hook);
        table.insert(("java/lang/Object", "getClass", "()Ljava/lang/Class;"), object_get_class as Hook);
        table.insert(("java/lang/Object", "registerNatives", "()V"), no_op as Hook);

        table.insert(
            ("java/lang/System", "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V"),
            system_arraycopy as Hook,
        );
        table.insert(
            ("java/lang/System", "identityHashCode", "(Ljava/lang/Object;)I"),
            system_identity_hash_code as Hook,
        );
        table.insert(("java/lang/System", "exit", "(I)V"), system_exit as Hook);
        table.insert(("java/lang/System", "registerNatives", "()V"), no_op as Hook);
        table.insert(("java/lang/System", "currentTimeMillis", "()J"), system_current_time_millis as Hook);

        table.insert(("java/lang/Runtime", "halt", "(I)V"), system_exit as Hook);

        table.insert(
            ("java/lang/Throwable", "fillInStackTrace", "(I)Ljava/lang/Throwable;"),
            throwable_fill_in_stack_trace as Hook,
        );
        table.insert(("java/lang/Throwable", "fillInStackTrace", "()Ljava/lang/Throwable;"), throwable_fill_in_stack_trace as Hook);

        for descriptor in [
            "()V", "(Z)V", "(C)V", "(I)V", "(J)V", "(F)V", "(D)V",
            "(Ljava/lang/String;)V", "(Ljava/lang/Object;)V",
        ] {
            table.insert(("java/io/PrintStream", "println", descriptor), print_stream_println as Hook);
            table.insert(("java/io/PrintStream", "print", descriptor), print_stream_print as Hook);
        }

        table
    };
}

/// Looks up a hook for `class.name(descriptor)`, if one is registered.
pub fn find(class: &str, name: &str, descriptor: &str) -> Option<Hook> {
    HOOKS.get(&(class, name, descriptor)).copied()
}

fn no_op(_vm: &Vm, _receiver: Option<ObjectHandle>, _args: &[Slot]) -> VmResult<Option<Slot>> {
    Ok(None)
}

fn object_init(_vm: &Vm, _receiver: Option<ObjectHandle>, _args: &[Slot]) -> VmResult<Option<Slot>> {
    Ok(None)
}

fn object_hash_code(_vm: &Vm, receiver: Option<ObjectHandle>, _args: &[Slot]) -> VmResult<Option<Slot>> {
    let handle = receiver.expect("instance hook called without a receiver");
    Ok(Some(Slot::Int(handle.identity_hash())))
}

fn object_get_class(vm: &Vm, receiver: Option<ObjectHandle>, _args: &[Slot]) -> VmResult<Option<Slot>> {
    let handle = receiver.expect("instance hook called without a receiver");
    let mirror = vm.class_mirror(&handle.class())?;
    Ok(Some(Slot::Reference(Some(mirror))))
}

fn system_arraycopy(_vm: &Vm, _receiver: Option<ObjectHandle>, args: &[Slot]) -> VmResult<Option<Slot>> {
    let src = args[0].as_reference().expect("arraycopy source must not be null");
    let src_pos = args[1].as_int();
    let dst = args[2].as_reference().expect("arraycopy destination must not be null");
    let dst_pos = args[3].as_int();
    let length = args[4].as_int();
    dst.array_copy_from(&src, src_pos, dst_pos, length)?;
    Ok(None)
}

fn system_identity_hash_code(_vm: &Vm, _receiver: Option<ObjectHandle>, args: &[Slot]) -> VmResult<Option<Slot>> {
    let hash = match args[0].as_reference() {
        Some(handle) => handle.identity_hash(),
        None => 0,
    };
    Ok(Some(Slot::Int(hash)))
}

fn system_exit(_vm: &Vm, _receiver: Option<ObjectHandle>, args: &[Slot]) -> VmResult<Option<Slot>> {
    Err(VmError::Exit(args[0].as_int()))
}

fn system_current_time_millis(_vm: &Vm, _receiver: Option<ObjectHandle>, _args: &[Slot]) -> VmResult<Option<Slot>> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(Some(Slot::Long(millis)))
}

fn throwable_fill_in_stack_trace(_vm: &Vm, receiver: Option<ObjectHandle>, _args: &[Slot]) -> VmResult<Option<Slot>> {
    // No stack-trace capture in this core; `fillInStackTrace` is a no-op
    // that returns the receiver, matching its documented return value.
    Ok(Some(Slot::Reference(receiver)))
}

fn print_stream_println(vm: &Vm, _receiver: Option<ObjectHandle>, args: &[Slot]) -> VmResult<Option<Slot>> {
    println!("{}", render_print_arg(vm, args)?);
    Ok(None)
}

fn print_stream_print(vm: &Vm, _receiver: Option<ObjectHandle>, args: &[Slot]) -> VmResult<Option<Slot>> {
    print!("{}", render_print_arg(vm, args)?);
    Ok(None)
}

/// `println`/`print` hooks don't distinguish `System.out` from `System.err`
/// by receiver identity (the core doesn't model file descriptors): both
/// write to standard output. See DESIGN.md for this tradeoff.
fn render_print_arg(vm: &Vm, args: &[Slot]) -> VmResult<String> {
    Ok(match args.first() {
        None => String::new(),
        Some(Slot::Int(v)) => v.to_string(),
        Some(Slot::Long(v)) => v.to_string(),
        Some(Slot::Float(v)) => v.to_string(),
        Some(Slot::Double(v)) => v.to_string(),
        Some(Slot::Reference(Some(handle))) => vm.read_string(handle).unwrap_or_else(|_| "null".to_string()),
        Some(Slot::Reference(None)) => "null".to_string(),
        Some(Slot::Top) => String::new(),
    })
}
