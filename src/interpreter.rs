//! The bytecode interpreter (§4.6 "Frame and stack", §4.7 "Interpreter
//! dispatch", §4.8 "Exception dispatch").
//!
//! Each Rust stack frame mirrors one JVM frame: `invoke` recurses into
//! `run_frame` for every non-native call, so `athrow`/array-bounds/linkage
//! errors simply unwind through `Result` until some enclosing `run_frame`'s
//! exception table catches them or they reach `Vm::run_main`. This sidesteps
//! the source's explicit frame stack and per-opcode length bookkeeping in
//! favor of the host language's own call stack (see DESIGN.md).

use std::cmp::Ordering;
use std::os::raw::c_void;
use std::rc::Rc;

use crate::class::{Class, Method};
use crate::constant_pool::Constant;
use crate::descriptor::{Category, FieldDescriptor};
use crate::error::{VmError, VmResult};
use crate::heap::ObjectHandle;
use crate::hooks;
use crate::initializer;
use crate::linker::{self, ResolvedMethod};
use crate::stack::FrameMemory;
use crate::value::Slot;
use crate::vm::Vm;

/// Invokes `method` of `class` with `args` already assembled as one slot per
/// logical parameter (category-2 values collapsed to a single [`Slot`], the
/// same convention [`crate::native`] uses) plus, for an instance method, the
/// receiver as `args[0]`. Used by call sites that don't already have the
/// callee's arguments sitting on the operand stack: `Vm::run_main` and
/// `<clinit>` invocation.
pub fn invoke(vm: &Vm, class: &Rc<Class>, method: &Rc<Method>, args: Vec<Slot>) -> VmResult<Option<Slot>> {
    let param_slots = args.len();
    for arg in args {
        vm.stack().push_raw(arg)?;
    }
    invoke_staged(vm, class, method, param_slots)
}

/// Invokes `method` assuming `param_slots` worth of arguments are already
/// staged at the top of `vm.stack()` (the ordinary case for an `invoke*`
/// opcode, where the operand stack already holds them in evaluation order).
fn invoke_staged(vm: &Vm, class: &Rc<Class>, method: &Rc<Method>, param_slots: usize) -> VmResult<Option<Slot>> {
    if method.is_native() {
        invoke_native(vm, class, method, param_slots)
    } else if method.is_abstract() {
        Err(VmError::Unsupported(format!(
            "{}.{} is abstract and has no code to run",
            class.name, method.name
        )))
    } else {
        let code = method.code.as_ref().ok_or_else(|| {
            VmError::Unsupported(format!("{}.{} has no Code attribute", class.name, method.name))
        })?;

        let frame = vm.stack().push_frame(param_slots, code.max_locals, code.max_stack)?;
        let result = run_frame(vm, class, method, code, frame);
        vm.stack().pop_frame(&frame);

        let value = result?;
        if let Some(slot) = value {
            vm.stack().push_raw(slot)?;
        }
        Ok(value)
    }
}

/// Binds the staged arguments to a hook or the FFI bridge (§4.9). Natives get
/// a frame with `max_locals == param_slots` and `max_stack == 0` (§4.6), so
/// their "locals" are exactly the caller's staged arguments and nothing else.
fn invoke_native(vm: &Vm, class: &Rc<Class>, method: &Rc<Method>, param_slots: usize) -> VmResult<Option<Slot>> {
    let frame = vm.stack().push_frame(param_slots, param_slots as u16, 0)?;

    let mut next_local = 0usize;
    let receiver = if method.is_static() {
        None
    } else {
        let handle = vm.stack().get(frame.local_index(next_local)).as_reference();
        next_local += 1;
        handle
    };

    let mut args = Vec::with_capacity(method.descriptor.parameters.len());
    for param in &method.descriptor.parameters {
        args.push(vm.stack().get(frame.local_index(next_local)));
        next_local += param.category().width();
    }

    let result = if let Some(hook) = hooks::find(&class.name, &method.name, &method.raw_descriptor()) {
        hook(vm, receiver, &args)
    } else {
        let thunk = vm.resolve_native(class, method)?;
        let target = match &receiver {
            Some(handle) => Rc::as_ptr(handle) as *const c_void,
            None => Rc::as_ptr(class) as *const c_void,
        };
        thunk.call(std::ptr::null(), target, &args)
    };

    vm.stack().pop_frame(&frame);
    let value = result?;
    if let Some(slot) = value {
        vm.stack().push_raw(slot)?;
    }
    Ok(value)
}

/// One executing frame's identity: everything `step` needs besides the
/// program counter, which the dispatch loop keeps in a plain local for speed
/// (§4.6 "kept in local variables of the dispatch loop").
struct ExecState<'a> {
    vm: &'a Vm,
    class: &'a Rc<Class>,
    method: &'a Rc<Method>,
    code: &'a crate::attributes::CodeAttribute,
    frame: FrameMemory,
}

enum StepOutcome {
    Continue,
    Return(Option<Slot>),
}

/// Runs `code` to completion: either a normal/exceptional return, or an
/// unhandled exception that propagates to the caller (§4.8).
fn run_frame(
    vm: &Vm,
    class: &Rc<Class>,
    method: &Rc<Method>,
    code: &crate::attributes::CodeAttribute,
    frame: FrameMemory,
) -> VmResult<Option<Slot>> {
    let state = ExecState { vm, class, method, code, frame };
    let mut pc: usize = 0;

    loop {
        let instruction_pc = pc;
        match step(&state, &mut pc) {
            Ok(StepOutcome::Continue) => continue,
            Ok(StepOutcome::Return(value)) => return Ok(value),
            Err(err) => match find_handler(vm, class, code, instruction_pc, &err)? {
                Some((handler_pc, exception)) => {
                    vm.stack().sync_to(frame.operand_base);
                    vm.stack().push_raw(exception)?;
                    pc = handler_pc as usize;
                }
                None => return Err(record_frame(err, class, method, code, instruction_pc)),
            },
        }
    }
}

/// Searches `code`'s exception table for an entry covering `pc` whose catch
/// type matches the thrown exception's dynamic class (§4.8 "first matching
/// entry wins"). Only a `VmError::Throwable` is catchable; platform errors
/// (I/O, stack overflow, ...) always propagate past every handler.
fn find_handler(
    vm: &Vm,
    class: &Rc<Class>,
    code: &crate::attributes::CodeAttribute,
    pc: usize,
    err: &VmError,
) -> VmResult<Option<(u16, Slot)>> {
    let throwable = match err {
        VmError::Throwable(t) => t,
        _ => return Ok(None),
    };

    let handle = match &throwable.object {
        Some(handle) => handle.clone(),
        None => vm.materialize_throwable(&throwable.class_name)?,
    };
    let dyn_class = handle.class();

    for entry in &code.exception_table {
        if (entry.start_pc as usize) <= pc && pc < (entry.end_pc as usize) {
            let matches = if entry.catch_type_index == 0 {
                true
            } else {
                let catch_name = class
                    .constant_pool
                    .class(entry.catch_type_index)
                    .map_err(|e| VmError::class_format(e.to_string()))?
                    .name
                    .clone();
                dyn_class.is_subclass_of(&catch_name)
            };
            if matches {
                return Ok(Some((entry.handler_pc, Slot::Reference(Some(handle)))));
            }
        }
    }
    Ok(None)
}

/// Appends one `at Class.method(...)` trace entry to a propagating throwable
/// as it unwinds past `class`/`method` with no matching handler (§4.8 "print
/// a stack trace"). Platform errors pass through unchanged.
fn record_frame(
    err: VmError,
    class: &Rc<Class>,
    method: &Rc<Method>,
    code: &crate::attributes::CodeAttribute,
    pc: usize,
) -> VmError {
    match err {
        VmError::Throwable(mut throwable) => {
            throwable.push_frame(crate::error::TraceElement {
                class: class.name.clone(),
                method: method.name.clone(),
                source_file: class.source_file.clone(),
                line: code.line_for_pc(pc),
                pc,
            });
            VmError::Throwable(throwable)
        }
        other => other,
    }
}

/// Rewrites a resolution-time platform error into the catchable Java
/// throwable bytecode execution expects from a failed `new`/`getfield`/
/// `invoke*`/`checkcast` (§4.8, §7 "some platform errors convert to Java
/// exceptions at the point bytecode triggers them").
fn convert_link_error(vm: &Vm, err: VmError) -> VmError {
    match err {
        VmError::NoSuchField { class, name, descriptor } => {
            vm.throw("java/lang/NoSuchFieldError", &format!("{}.{}:{}", class, name, descriptor))
        }
        VmError::NoSuchMethod { class, name, descriptor } => {
            vm.throw("java/lang/NoSuchMethodError", &format!("{}.{}{}", class, name, descriptor))
        }
        VmError::ClassNotFound(name) => vm.throw("java/lang/NoClassDefFoundError", &name),
        VmError::ClassFormat(message) => vm.throw("java/lang/ClassFormatError", &message),
        other => other,
    }
}

fn throw_npe(vm: &Vm) -> VmError {
    vm.throw("java/lang/NullPointerException", "")
}

fn require_non_null(vm: &Vm, handle: Option<ObjectHandle>) -> VmResult<ObjectHandle> {
    handle.ok_or_else(|| throw_npe(vm))
}

// --- operand stack helpers (§4.6, §3 "category-2 ... occupies two slots") ---

fn push_i(state: &ExecState, v: i32) -> VmResult<()> {
    state.vm.stack().push_raw(Slot::Int(v))
}
fn push_f(state: &ExecState, v: f32) -> VmResult<()> {
    state.vm.stack().push_raw(Slot::Float(v))
}
fn push_a(state: &ExecState, v: Option<ObjectHandle>) -> VmResult<()> {
    state.vm.stack().push_raw(Slot::Reference(v))
}
fn push_long(state: &ExecState, v: i64) -> VmResult<()> {
    state.vm.stack().push_raw(Slot::Long(v))?;
    state.vm.stack().push_raw(Slot::Top)
}
fn push_double(state: &ExecState, v: f64) -> VmResult<()> {
    state.vm.stack().push_raw(Slot::Double(v))?;
    state.vm.stack().push_raw(Slot::Top)
}

fn pop_i(state: &ExecState) -> i32 {
    state.vm.stack().pop_raw().as_int()
}
fn pop_f(state: &ExecState) -> f32 {
    state.vm.stack().pop_raw().as_float()
}
fn pop_a(state: &ExecState) -> Option<ObjectHandle> {
    state.vm.stack().pop_raw().as_reference()
}
fn pop_long(state: &ExecState) -> i64 {
    let _top = state.vm.stack().pop_raw();
    state.vm.stack().pop_raw().as_long()
}
fn pop_double(state: &ExecState) -> f64 {
    let _top = state.vm.stack().pop_raw();
    state.vm.stack().pop_raw().as_double()
}

/// Pushes a value already tagged with its own category (a static/instance
/// field or a `ldc2_w` constant), splitting a category-2 value into its two
/// operand-stack slots.
fn push_slot(state: &ExecState, slot: Slot) -> VmResult<()> {
    match slot {
        Slot::Long(_) | Slot::Double(_) => {
            state.vm.stack().push_raw(slot)?;
            state.vm.stack().push_raw(Slot::Top)
        }
        other => state.vm.stack().push_raw(other),
    }
}

fn pop_slot(state: &ExecState, category: Category) -> Slot {
    match category {
        Category::Two => {
            let _top = state.vm.stack().pop_raw();
            state.vm.stack().pop_raw()
        }
        Category::One => state.vm.stack().pop_raw(),
    }
}

// --- locals (§4.6, §3 "a long/double local occupies two adjacent slots") ---

fn get_local_i(state: &ExecState, n: usize) -> i32 {
    state.vm.stack().get(state.frame.local_index(n)).as_int()
}
fn set_local_i(state: &ExecState, n: usize, v: i32) {
    state.vm.stack().set(state.frame.local_index(n), Slot::Int(v));
}
fn get_local_f(state: &ExecState, n: usize) -> f32 {
    state.vm.stack().get(state.frame.local_index(n)).as_float()
}
fn set_local_f(state: &ExecState, n: usize, v: f32) {
    state.vm.stack().set(state.frame.local_index(n), Slot::Float(v));
}
fn get_local_a(state: &ExecState, n: usize) -> Option<ObjectHandle> {
    state.vm.stack().get(state.frame.local_index(n)).as_reference()
}
fn set_local_a(state: &ExecState, n: usize, v: Option<ObjectHandle>) {
    state.vm.stack().set(state.frame.local_index(n), Slot::Reference(v));
}
fn get_local_long(state: &ExecState, n: usize) -> i64 {
    state.vm.stack().get(state.frame.local_index(n)).as_long()
}
fn set_local_long(state: &ExecState, n: usize, v: i64) {
    state.vm.stack().set(state.frame.local_index(n), Slot::Long(v));
    state.vm.stack().set(state.frame.local_index(n + 1), Slot::Top);
}
fn get_local_double(state: &ExecState, n: usize) -> f64 {
    state.vm.stack().get(state.frame.local_index(n)).as_double()
}
fn set_local_double(state: &ExecState, n: usize, v: f64) {
    state.vm.stack().set(state.frame.local_index(n), Slot::Double(v));
    state.vm.stack().set(state.frame.local_index(n + 1), Slot::Top);
}

// --- immediate-operand reads (§4.1 "Code", big-endian per §6) ---

fn read_u8(code: &crate::attributes::CodeAttribute, pc: &mut usize) -> u8 {
    let v = code.code[*pc];
    *pc += 1;
    v
}
fn read_i8(code: &crate::attributes::CodeAttribute, pc: &mut usize) -> i8 {
    read_u8(code, pc) as i8
}
fn read_u16(code: &crate::attributes::CodeAttribute, pc: &mut usize) -> u16 {
    let hi = read_u8(code, pc) as u16;
    let lo = read_u8(code, pc) as u16;
    (hi << 8) | lo
}
fn read_i16(code: &crate::attributes::CodeAttribute, pc: &mut usize) -> i16 {
    read_u16(code, pc) as i16
}
fn read_i32(code: &crate::attributes::CodeAttribute, pc: &mut usize) -> i32 {
    let a = read_u8(code, pc) as u32;
    let b = read_u8(code, pc) as u32;
    let c = read_u8(code, pc) as u32;
    let d = read_u8(code, pc) as u32;
    ((a << 24) | (b << 16) | (c << 8) | d) as i32
}

/// Resolves a `ldc`/`ldc_w` constant to the single slot it pushes (§4.7
/// "Constants"); `ldc2_w`'s long/double case is handled separately since it
/// pushes two slots.
fn resolve_ldc(vm: &Vm, class: &Rc<Class>, index: u16) -> VmResult<Slot> {
    let constant = class
        .constant_pool
        .get(index)
        .map_err(|e| VmError::class_format(e.to_string()))?
        .clone();
    match constant {
        Constant::Integer(v) => Ok(Slot::Int(v)),
        Constant::Float(v) => Ok(Slot::Float(v)),
        Constant::String(text) => Ok(Slot::Reference(Some(vm.intern_string(&text)?))),
        Constant::Class(class_ref) => {
            let target = vm.repo().load(&class_ref.name).map_err(|e| convert_link_error(vm, e))?;
            Ok(Slot::Reference(Some(vm.class_mirror(&target)?)))
        }
        other => Err(VmError::class_format(format!(
            "constant pool index {} is not loadable via ldc (found {:?})",
            index, other
        ))),
    }
}

fn resolve_ldc2(class: &Rc<Class>, index: u16) -> VmResult<Slot> {
    match class.constant_pool.get(index).map_err(|e| VmError::class_format(e.to_string()))? {
        Constant::Long(v) => Ok(Slot::Long(*v)),
        Constant::Double(v) => Ok(Slot::Double(*v)),
        other => Err(VmError::class_format(format!(
            "constant pool index {} is not a Long/Double (found {:?})",
            index, other
        ))),
    }
}

fn newarray_class_name(type_code: u8) -> VmResult<&'static str> {
    Ok(match type_code {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        other => return Err(VmError::class_format(format!("unknown newarray type code {}", other))),
    })
}

fn anewarray_class_name(component_name: &str) -> VmResult<String> {
    let descriptor = if let Some(array_descriptor) = component_name.strip_prefix('[') {
        FieldDescriptor::parse(&format!("[{}", array_descriptor))
            .map_err(|e| VmError::class_format(e.to_string()))?
    } else {
        FieldDescriptor::Object(component_name.to_string())
    };
    Ok(descriptor.array_class_name())
}

/// Allocates the outermost dimension of a `multianewarray` and recurses for
/// the rest, stopping naturally once a dimension's count reaches zero or the
/// requested dimensions are exhausted (§4.7 "Allocation").
fn build_multianewarray(vm: &Vm, array_class_name: &str, counts: &[i32]) -> VmResult<ObjectHandle> {
    let count = counts[0];
    if count < 0 {
        return Err(vm.throw("java/lang/NegativeArraySizeException", &count.to_string()));
    }
    let array_class = vm.repo().load(array_class_name).map_err(|e| convert_link_error(vm, e))?;
    let handle = vm.heap().new_array(&array_class, count)?;

    if counts.len() > 1 {
        let element_name = &array_class_name[1..];
        for i in 0..count {
            let element = build_multianewarray(vm, element_name, &counts[1..])?;
            handle.set_element(i, Slot::Reference(Some(element)))?;
        }
    }
    Ok(handle)
}

/// Executes one instruction, advancing `pc` past it (or branching it
/// elsewhere) and returning whether the frame should keep running or hand
/// back a return value (§4.7 lists every opcode family below by name).
fn step(state: &ExecState, pc: &mut usize) -> VmResult<StepOutcome> {
    let vm = state.vm;
    let class = state.class;
    let code = state.code;
    let frame = state.frame;

    let opcode_pc = *pc;
    let opcode = read_u8(code, pc);

    match opcode {
        // --- Constants ---
        0x00 => {} // nop
        0x01 => push_a(state, None)?,
        0x02..=0x08 => push_i(state, opcode as i32 - 3)?,
        0x09 | 0x0a => push_long(state, (opcode - 0x09) as i64)?,
        0x0b..=0x0d => push_f(state, (opcode - 0x0b) as f32)?,
        0x0e | 0x0f => push_double(state, (opcode - 0x0e) as f64)?,
        0x10 => {
            let v = read_i8(code, pc) as i32;
            push_i(state, v)?;
        }
        0x11 => {
            let v = read_i16(code, pc) as i32;
            push_i(state, v)?;
        }
        0x12 => {
            let index = read_u8(code, pc) as u16;
            let slot = resolve_ldc(vm, class, index).map_err(|e| convert_link_error(vm, e))?;
            vm.stack().push_raw(slot)?;
        }
        0x13 => {
            let index = read_u16(code, pc);
            let slot = resolve_ldc(vm, class, index).map_err(|e| convert_link_error(vm, e))?;
            vm.stack().push_raw(slot)?;
        }
        0x14 => {
            let index = read_u16(code, pc);
            let slot = resolve_ldc2(class, index)?;
            push_slot(state, slot)?;
        }

        // --- Loads ---
        0x15 => {
            let n = read_u8(code, pc) as usize;
            push_i(state, get_local_i(state, n))?;
        }
        0x16 => {
            let n = read_u8(code, pc) as usize;
            push_long(state, get_local_long(state, n))?;
        }
        0x17 => {
            let n = read_u8(code, pc) as usize;
            push_f(state, get_local_f(state, n))?;
        }
        0x18 => {
            let n = read_u8(code, pc) as usize;
            push_double(state, get_local_double(state, n))?;
        }
        0x19 => {
            let n = read_u8(code, pc) as usize;
            push_a(state, get_local_a(state, n))?;
        }
        0x1a..=0x1d => push_i(state, get_local_i(state, (opcode - 0x1a) as usize))?,
        0x1e..=0x21 => push_long(state, get_local_long(state, (opcode - 0x1e) as usize))?,
        0x22..=0x25 => push_f(state, get_local_f(state, (opcode - 0x22) as usize))?,
        0x26..=0x29 => push_double(state, get_local_double(state, (opcode - 0x26) as usize))?,
        0x2a..=0x2d => push_a(state, get_local_a(state, (opcode - 0x2a) as usize))?,

        // --- Array loads ---
        0x2e | 0x2f | 0x30 | 0x31 | 0x32 | 0x33 | 0x34 | 0x35 => {
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            let slot = array.get_element(index)?;
            match opcode {
                0x2e | 0x33 | 0x34 | 0x35 => push_i(state, slot.as_int())?, // iaload/baload/caload/saload
                0x2f => push_long(state, slot.as_long())?,                  // laload
                0x30 => push_f(state, slot.as_float())?,                   // faload
                0x31 => push_double(state, slot.as_double())?,             // daload
                0x32 => push_a(state, slot.as_reference())?,               // aaload
                _ => unreachable!(),
            }
        }

        // --- Stores ---
        0x36 => {
            let n = read_u8(code, pc) as usize;
            let v = pop_i(state);
            set_local_i(state, n, v);
        }
        0x37 => {
            let n = read_u8(code, pc) as usize;
            let v = pop_long(state);
            set_local_long(state, n, v);
        }
        0x38 => {
            let n = read_u8(code, pc) as usize;
            let v = pop_f(state);
            set_local_f(state, n, v);
        }
        0x39 => {
            let n = read_u8(code, pc) as usize;
            let v = pop_double(state);
            set_local_double(state, n, v);
        }
        0x3a => {
            let n = read_u8(code, pc) as usize;
            let v = pop_a(state);
            set_local_a(state, n, v);
        }
        0x3b..=0x3e => {
            let n = (opcode - 0x3b) as usize;
            let v = pop_i(state);
            set_local_i(state, n, v);
        }
        0x3f..=0x42 => {
            let n = (opcode - 0x3f) as usize;
            let v = pop_long(state);
            set_local_long(state, n, v);
        }
        0x43..=0x46 => {
            let n = (opcode - 0x43) as usize;
            let v = pop_f(state);
            set_local_f(state, n, v);
        }
        0x47..=0x4a => {
            let n = (opcode - 0x47) as usize;
            let v = pop_double(state);
            set_local_double(state, n, v);
        }
        0x4b..=0x4e => {
            let n = (opcode - 0x4b) as usize;
            let v = pop_a(state);
            set_local_a(state, n, v);
        }

        // --- Array stores ---
        0x4f => {
            let v = pop_i(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Int(v))?;
        }
        0x50 => {
            let v = pop_long(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Long(v))?;
        }
        0x51 => {
            let v = pop_f(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Float(v))?;
        }
        0x52 => {
            let v = pop_double(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Double(v))?;
        }
        0x53 => {
            let v = pop_a(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Reference(v))?;
        }
        0x54 => {
            let v = pop_i(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Int((v as i8) as i32))?;
        }
        0x55 => {
            let v = pop_i(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Int((v as u16) as i32))?;
        }
        0x56 => {
            let v = pop_i(state);
            let index = pop_i(state);
            let array = require_non_null(vm, pop_a(state))?;
            array.set_element(index, Slot::Int((v as i16) as i32))?;
        }

        // --- Stack manipulation (§4.7 "Stack") ---
        0x57 => {
            vm.stack().pop_raw();
        }
        0x58 => {
            vm.stack().pop_n(2);
        }
        0x59 => {
            let v = vm.stack().top_slots(1)[0].clone();
            vm.stack().push_raw(v)?;
        }
        0x5a => {
            let s = vm.stack().top_slots(2);
            vm.stack().pop_n(2);
            vm.stack().push_raw(s[1].clone())?;
            vm.stack().push_raw(s[0].clone())?;
            vm.stack().push_raw(s[1].clone())?;
        }
        0x5b => {
            let s = vm.stack().top_slots(3);
            vm.stack().pop_n(3);
            vm.stack().push_raw(s[2].clone())?;
            vm.stack().push_raw(s[0].clone())?;
            vm.stack().push_raw(s[1].clone())?;
            vm.stack().push_raw(s[2].clone())?;
        }
        0x5c => {
            let s = vm.stack().top_slots(2);
            vm.stack().push_raw(s[0].clone())?;
            vm.stack().push_raw(s[1].clone())?;
        }
        0x5d => {
            let s = vm.stack().top_slots(3);
            vm.stack().pop_n(3);
            vm.stack().push_raw(s[1].clone())?;
            vm.stack().push_raw(s[2].clone())?;
            vm.stack().push_raw(s[0].clone())?;
            vm.stack().push_raw(s[1].clone())?;
            vm.stack().push_raw(s[2].clone())?;
        }
        0x5e => {
            let s = vm.stack().top_slots(4);
            vm.stack().pop_n(4);
            vm.stack().push_raw(s[2].clone())?;
            vm.stack().push_raw(s[3].clone())?;
            vm.stack().push_raw(s[0].clone())?;
            vm.stack().push_raw(s[1].clone())?;
            vm.stack().push_raw(s[2].clone())?;
            vm.stack().push_raw(s[3].clone())?;
        }
        0x5f => {
            let s = vm.stack().top_slots(2);
            vm.stack().pop_n(2);
            vm.stack().push_raw(s[1].clone())?;
            vm.stack().push_raw(s[0].clone())?;
        }

        // --- Arithmetic (§4.7 "Arithmetic") ---
        0x60 => { let b = pop_i(state); let a = pop_i(state); push_i(state, a.wrapping_add(b))?; }
        0x61 => { let b = pop_long(state); let a = pop_long(state); push_long(state, a.wrapping_add(b))?; }
        0x62 => { let b = pop_f(state); let a = pop_f(state); push_f(state, a + b)?; }
        0x63 => { let b = pop_double(state); let a = pop_double(state); push_double(state, a + b)?; }
        0x64 => { let b = pop_i(state); let a = pop_i(state); push_i(state, a.wrapping_sub(b))?; }
        0x65 => { let b = pop_long(state); let a = pop_long(state); push_long(state, a.wrapping_sub(b))?; }
        0x66 => { let b = pop_f(state); let a = pop_f(state); push_f(state, a - b)?; }
        0x67 => { let b = pop_double(state); let a = pop_double(state); push_double(state, a - b)?; }
        0x68 => { let b = pop_i(state); let a = pop_i(state); push_i(state, a.wrapping_mul(b))?; }
        0x69 => { let b = pop_long(state); let a = pop_long(state); push_long(state, a.wrapping_mul(b))?; }
        0x6a => { let b = pop_f(state); let a = pop_f(state); push_f(state, a * b)?; }
        0x6b => { let b = pop_double(state); let a = pop_double(state); push_double(state, a * b)?; }
        0x6c => {
            let b = pop_i(state);
            let a = pop_i(state);
            if b == 0 {
                return Err(vm.throw("java/lang/ArithmeticException", "/ by zero"));
            }
            push_i(state, a.wrapping_div(b))?;
        }
        0x6d => {
            let b = pop_long(state);
            let a = pop_long(state);
            if b == 0 {
                return Err(vm.throw("java/lang/ArithmeticException", "/ by zero"));
            }
            push_long(state, a.wrapping_div(b))?;
        }
        0x6e => { let b = pop_f(state); let a = pop_f(state); push_f(state, a / b)?; }
        0x6f => { let b = pop_double(state); let a = pop_double(state); push_double(state, a / b)?; }
        0x70 => {
            let b = pop_i(state);
            let a = pop_i(state);
            if b == 0 {
                return Err(vm.throw("java/lang/ArithmeticException", "/ by zero"));
            }
            push_i(state, a.wrapping_rem(b))?;
        }
        0x71 => {
            let b = pop_long(state);
            let a = pop_long(state);
            if b == 0 {
                return Err(vm.throw("java/lang/ArithmeticException", "/ by zero"));
            }
            push_long(state, a.wrapping_rem(b))?;
        }
        0x72 => { let b = pop_f(state); let a = pop_f(state); push_f(state, a % b)?; }
        0x73 => { let b = pop_double(state); let a = pop_double(state); push_double(state, a % b)?; }
        0x74 => { let a = pop_i(state); push_i(state, a.wrapping_neg())?; }
        0x75 => { let a = pop_long(state); push_long(state, a.wrapping_neg())?; }
        0x76 => { let a = pop_f(state); push_f(state, -a)?; }
        0x77 => { let a = pop_double(state); push_double(state, -a)?; }
        0x78 => { let s = pop_i(state) & 0x1f; let a = pop_i(state); push_i(state, a << s)?; }
        0x79 => { let s = pop_i(state) & 0x3f; let a = pop_long(state); push_long(state, a << s)?; }
        0x7a => { let s = pop_i(state) & 0x1f; let a = pop_i(state); push_i(state, a >> s)?; }
        0x7b => { let s = pop_i(state) & 0x3f; let a = pop_long(state); push_long(state, a >> s)?; }
        0x7c => { let s = pop_i(state) & 0x1f; let a = pop_i(state); push_i(state, ((a as u32) >> s) as i32)?; }
        0x7d => { let s = pop_i(state) & 0x3f; let a = pop_long(state); push_long(state, ((a as u64) >> s) as i64)?; }
        0x7e => { let b = pop_i(state); let a = pop_i(state); push_i(state, a & b)?; }
        0x7f => { let b = pop_long(state); let a = pop_long(state); push_long(state, a & b)?; }
        0x80 => { let b = pop_i(state); let a = pop_i(state); push_i(state, a | b)?; }
        0x81 => { let b = pop_long(state); let a = pop_long(state); push_long(state, a | b)?; }
        0x82 => { let b = pop_i(state); let a = pop_i(state); push_i(state, a ^ b)?; }
        0x83 => { let b = pop_long(state); let a = pop_long(state); push_long(state, a ^ b)?; }
        0x84 => {
            let index = read_u8(code, pc) as usize;
            let delta = read_i8(code, pc) as i32;
            let v = get_local_i(state, index).wrapping_add(delta);
            set_local_i(state, index, v);
        }

        // --- Conversions (§4.7 "Conversions"; Rust's `as` saturates exactly
        // as a narrowing float-to-int JVM conversion requires) ---
        0x85 => { let v = pop_i(state); push_long(state, v as i64)?; }
        0x86 => { let v = pop_i(state); push_f(state, v as f32)?; }
        0x87 => { let v = pop_i(state); push_double(state, v as f64)?; }
        0x88 => { let v = pop_long(state); push_i(state, v as i32)?; }
        0x89 => { let v = pop_long(state); push_f(state, v as f32)?; }
        0x8a => { let v = pop_long(state); push_double(state, v as f64)?; }
        0x8b => { let v = pop_f(state); push_i(state, v as i32)?; }
        0x8c => { let v = pop_f(state); push_long(state, v as i64)?; }
        0x8d => { let v = pop_f(state); push_double(state, v as f64)?; }
        0x8e => { let v = pop_double(state); push_i(state, v as i32)?; }
        0x8f => { let v = pop_double(state); push_long(state, v as i64)?; }
        0x90 => { let v = pop_double(state); push_f(state, v as f32)?; }
        0x91 => { let v = pop_i(state); push_i(state, (v as i8) as i32)?; }
        0x92 => { let v = pop_i(state); push_i(state, (v as u16) as i32)?; }
        0x93 => { let v = pop_i(state); push_i(state, (v as i16) as i32)?; }

        // --- Comparisons (§4.7 "Comparisons") ---
        0x94 => {
            let b = pop_long(state);
            let a = pop_long(state);
            push_i(state, a.cmp(&b) as i32)?;
        }
        0x95 | 0x96 => {
            let b = pop_f(state);
            let a = pop_f(state);
            push_i(state, fcmp(a, b, opcode == 0x95))?;
        }
        0x97 | 0x98 => {
            let b = pop_double(state);
            let a = pop_double(state);
            push_i(state, dcmp(a, b, opcode == 0x97))?;
        }

        // --- Control (§4.7 "Control"; branch offsets are relative to the
        // opcode's own address) ---
        0x99 => branch_if(state, pc, opcode_pc, pop_i(state) == 0)?,
        0x9a => branch_if(state, pc, opcode_pc, pop_i(state) != 0)?,
        0x9b => branch_if(state, pc, opcode_pc, pop_i(state) < 0)?,
        0x9c => branch_if(state, pc, opcode_pc, pop_i(state) >= 0)?,
        0x9d => branch_if(state, pc, opcode_pc, pop_i(state) > 0)?,
        0x9e => branch_if(state, pc, opcode_pc, pop_i(state) <= 0)?,
        0x9f => { let b = pop_i(state); let a = pop_i(state); branch_if(state, pc, opcode_pc, a == b)?; }
        0xa0 => { let b = pop_i(state); let a = pop_i(state); branch_if(state, pc, opcode_pc, a != b)?; }
        0xa1 => { let b = pop_i(state); let a = pop_i(state); branch_if(state, pc, opcode_pc, a < b)?; }
        0xa2 => { let b = pop_i(state); let a = pop_i(state); branch_if(state, pc, opcode_pc, a >= b)?; }
        0xa3 => { let b = pop_i(state); let a = pop_i(state); branch_if(state, pc, opcode_pc, a > b)?; }
        0xa4 => { let b = pop_i(state); let a = pop_i(state); branch_if(state, pc, opcode_pc, a <= b)?; }
        0xa5 => { let b = pop_a(state); let a = pop_a(state); branch_if(state, pc, opcode_pc, same_reference(&a, &b))?; }
        0xa6 => { let b = pop_a(state); let a = pop_a(state); branch_if(state, pc, opcode_pc, !same_reference(&a, &b))?; }
        0xa7 => {
            let offset = read_i16(code, pc) as i64;
            *pc = (opcode_pc as i64 + offset) as usize;
        }
        0xa8 | 0xa9 => {
            return Err(VmError::Unsupported("jsr/ret (old-style subroutines) are not supported".into()));
        }
        0xaa => tableswitch(state, pc, opcode_pc)?,
        0xab => lookupswitch(state, pc, opcode_pc)?,

        // --- Returns (§4.7 "Returns") ---
        0xac => { let v = pop_i(state); return Ok(StepOutcome::Return(Some(Slot::Int(v)))); }
        0xad => { let v = pop_long(state); return Ok(StepOutcome::Return(Some(Slot::Long(v)))); }
        0xae => { let v = pop_f(state); return Ok(StepOutcome::Return(Some(Slot::Float(v)))); }
        0xaf => { let v = pop_double(state); return Ok(StepOutcome::Return(Some(Slot::Double(v)))); }
        0xb0 => { let v = pop_a(state); return Ok(StepOutcome::Return(Some(Slot::Reference(v)))); }
        0xb1 => return Ok(StepOutcome::Return(None)),

        // --- Object/field access (§4.7 "Object/field") ---
        0xb2 => {
            let index = read_u16(code, pc);
            let resolved = linker::resolve_field_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            initializer::initialize(vm, &resolved.owner)?;
            push_slot(state, resolved.owner.static_slot(resolved.index))?;
        }
        0xb3 => {
            let index = read_u16(code, pc);
            let resolved = linker::resolve_field_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            initializer::initialize(vm, &resolved.owner)?;
            let mut value = pop_slot(state, resolved.category);
            if resolved.is_boolean {
                value = Slot::Int(value.as_bool_int());
            }
            resolved.owner.set_static_slot(resolved.index, value);
        }
        0xb4 => {
            let index = read_u16(code, pc);
            let resolved = linker::resolve_field_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            let object = require_non_null(vm, pop_a(state))?;
            push_slot(state, object.get_field(resolved.index))?;
        }
        0xb5 => {
            let index = read_u16(code, pc);
            let resolved = linker::resolve_field_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            let mut value = pop_slot(state, resolved.category);
            let object = require_non_null(vm, pop_a(state))?;
            if resolved.is_boolean {
                value = Slot::Int(value.as_bool_int());
            }
            object.set_field(resolved.index, value);
        }

        // --- Calls (§4.7 "Calls") ---
        0xb6 | 0xb9 => {
            let index = read_u16(code, pc);
            if opcode == 0xb9 {
                let _count = read_u8(code, pc);
                let _zero = read_u8(code, pc);
            }
            let resolved = linker::resolve_method_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            let param_slots = 1 + resolved.method.descriptor.parameter_slots();
            let receiver = vm.stack().top_slots(param_slots)[0].as_reference();
            require_non_null(vm, receiver.clone())?;
            let receiver_class = receiver.expect("checked non-null above").class();
            let selected = select_method(vm, &receiver_class, &resolved)?;
            invoke_staged(vm, &selected.owner, &selected.method, param_slots)?;
        }
        0xb7 => {
            let index = read_u16(code, pc);
            let resolved = linker::resolve_method_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            let param_slots = 1 + resolved.method.descriptor.parameter_slots();
            let receiver = vm.stack().top_slots(param_slots)[0].as_reference();
            require_non_null(vm, receiver)?;
            invoke_staged(vm, &resolved.owner, &resolved.method, param_slots)?;
        }
        0xb8 => {
            let index = read_u16(code, pc);
            let resolved = linker::resolve_method_ref(class, vm.repo(), index).map_err(|e| convert_link_error(vm, e))?;
            initializer::initialize(vm, &resolved.owner)?;
            let param_slots = resolved.method.descriptor.parameter_slots();
            invoke_staged(vm, &resolved.owner, &resolved.method, param_slots)?;
        }
        0xba => {
            return Err(VmError::Unsupported("invokedynamic is not supported".into()));
        }

        // --- Allocation (§4.7 "Allocation") ---
        0xbb => {
            let index = read_u16(code, pc);
            let class_ref = class
                .constant_pool
                .class(index)
                .map_err(|e| VmError::class_format(e.to_string()))?
                .clone();
            let target = vm.repo().load(&class_ref.name).map_err(|e| convert_link_error(vm, e))?;
            initializer::initialize(vm, &target)?;
            let handle = vm.heap().new_instance(&target)?;
            push_a(state, Some(handle))?;
        }
        0xbc => {
            let type_code = read_u8(code, pc);
            let count = pop_i(state);
            if count < 0 {
                return Err(vm.throw("java/lang/NegativeArraySizeException", &count.to_string()));
            }
            let array_name = newarray_class_name(type_code)?;
            let array_class = vm.repo().load(array_name).map_err(|e| convert_link_error(vm, e))?;
            let handle = vm.heap().new_array(&array_class, count)?;
            push_a(state, Some(handle))?;
        }
        0xbd => {
            let index = read_u16(code, pc);
            let class_ref = class
                .constant_pool
                .class(index)
                .map_err(|e| VmError::class_format(e.to_string()))?
                .clone();
            let count = pop_i(state);
            if count < 0 {
                return Err(vm.throw("java/lang/NegativeArraySizeException", &count.to_string()));
            }
            let array_name = anewarray_class_name(&class_ref.name)?;
            let array_class = vm.repo().load(&array_name).map_err(|e| convert_link_error(vm, e))?;
            let handle = vm.heap().new_array(&array_class, count)?;
            push_a(state, Some(handle))?;
        }
        0xbe => {
            let array = require_non_null(vm, pop_a(state))?;
            push_i(state, array.array_length()?)?;
        }

        // --- Throw (§4.7 "Throw", §4.8) ---
        0xbf => {
            let handle = require_non_null(vm, pop_a(state))?;
            let class_name = handle.class().name.clone();
            return Err(VmError::from(crate::error::JavaThrowable::new(class_name, handle)));
        }

        // --- Type tests (§4.7 "Type tests"; no array-covariance check, see
        // DESIGN.md) ---
        0xc0 => {
            let index = read_u16(code, pc);
            let class_ref = class
                .constant_pool
                .class(index)
                .map_err(|e| VmError::class_format(e.to_string()))?
                .clone();
            let top = vm.stack().top_slots(1)[0].clone();
            if let Slot::Reference(Some(handle)) = top {
                let target = vm.repo().load(&class_ref.name).map_err(|e| convert_link_error(vm, e))?;
                if !handle.class().is_subclass_of(&target.name) {
                    return Err(vm.throw(
                        "java/lang/ClassCastException",
                        &format!("{} cannot be cast to {}", handle.class().name, target.name),
                    ));
                }
            }
        }
        0xc1 => {
            let index = read_u16(code, pc);
            let class_ref = class
                .constant_pool
                .class(index)
                .map_err(|e| VmError::class_format(e.to_string()))?
                .clone();
            let value = pop_a(state);
            let result = match value {
                Some(handle) => {
                    let target = vm.repo().load(&class_ref.name).map_err(|e| convert_link_error(vm, e))?;
                    handle.class().is_subclass_of(&target.name) as i32
                }
                None => 0,
            };
            push_i(state, result)?;
        }

        // --- Monitors (single-threaded core, §5: no general monitor support
        // required, but a null receiver must still raise NPE) ---
        0xc2 | 0xc3 => {
            require_non_null(vm, pop_a(state))?;
        }

        // --- Wide ---
        0xc4 => wide(state, code, pc)?,

        // --- multianewarray ---
        0xc5 => {
            let index = read_u16(code, pc);
            let dimensions = read_u8(code, pc) as usize;
            let array_name = class
                .constant_pool
                .class(index)
                .map_err(|e| VmError::class_format(e.to_string()))?
                .name
                .clone();

            let mut counts = Vec::with_capacity(dimensions);
            for _ in 0..dimensions {
                counts.push(pop_i(state));
            }
            counts.reverse();

            let handle = build_multianewarray(vm, &array_name, &counts)?;
            push_a(state, Some(handle))?;
        }

        // --- ifnull/ifnonnull ---
        0xc6 => { let v = pop_a(state); branch_if(state, pc, opcode_pc, v.is_none())?; }
        0xc7 => { let v = pop_a(state); branch_if(state, pc, opcode_pc, v.is_some())?; }

        0xc8 => {
            let offset = read_i32(code, pc) as i64;
            *pc = (opcode_pc as i64 + offset) as usize;
        }
        0xc9 => {
            return Err(VmError::Unsupported("jsr_w (old-style subroutines) is not supported".into()));
        }

        other => {
            return Err(VmError::class_format(format!("unknown opcode {:#x} at pc {}", other, opcode_pc)));
        }
    }

    Ok(StepOutcome::Continue)
}

fn branch_if(state: &ExecState, pc: &mut usize, opcode_pc: usize, condition: bool) -> VmResult<()> {
    let offset = read_i16(state.code, pc) as i64;
    if condition {
        *pc = (opcode_pc as i64 + offset) as usize;
    }
    Ok(())
}

fn same_reference(a: &Option<ObjectHandle>, b: &Option<ObjectHandle>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn fcmp(a: f32, b: f32, nan_is_negative: bool) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None => if nan_is_negative { -1 } else { 1 },
    }
}

fn dcmp(a: f64, b: f64, nan_is_negative: bool) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None => if nan_is_negative { -1 } else { 1 },
    }
}

/// §4.3 "Method selection" applied at an `invokevirtual`/`invokeinterface`
/// site: dispatch against the receiver's dynamic class rather than the
/// statically resolved one.
fn select_method(vm: &Vm, receiver_class: &Rc<Class>, resolved: &ResolvedMethod) -> VmResult<Rc<ResolvedMethod>> {
    linker::select_method(receiver_class, resolved).map_err(|e| convert_link_error(vm, e))
}

fn tableswitch(state: &ExecState, pc: &mut usize, opcode_pc: usize) -> VmResult<()> {
    align_to_four(state.code, pc, opcode_pc);
    let default = read_i32(state.code, pc);
    let low = read_i32(state.code, pc);
    let high = read_i32(state.code, pc);

    let index = pop_i(state);
    let offset = if index < low || index > high {
        default
    } else {
        let mut target = default;
        for i in low..=high {
            let value = read_i32(state.code, pc);
            if i == index {
                target = value;
            }
        }
        target
    };
    *pc = (opcode_pc as i64 + offset as i64) as usize;
    Ok(())
}

fn lookupswitch(state: &ExecState, pc: &mut usize, opcode_pc: usize) -> VmResult<()> {
    align_to_four(state.code, pc, opcode_pc);
    let default = read_i32(state.code, pc);
    let npairs = read_i32(state.code, pc);

    let key = pop_i(state);
    let mut offset = default;
    for _ in 0..npairs {
        let match_key = read_i32(state.code, pc);
        let match_offset = read_i32(state.code, pc);
        if match_key == key {
            offset = match_offset;
        }
    }
    *pc = (opcode_pc as i64 + offset as i64) as usize;
    Ok(())
}

/// `tableswitch`/`lookupswitch` pad the gap between the opcode and its first
/// 4-byte operand so that operand is aligned to a multiple of 4 from the
/// start of `code` (§4.7 "Control").
fn align_to_four(code: &crate::attributes::CodeAttribute, pc: &mut usize, _opcode_pc: usize) {
    let _ = code;
    while *pc % 4 != 0 {
        *pc += 1;
    }
}

fn wide(state: &ExecState, code: &crate::attributes::CodeAttribute, pc: &mut usize) -> VmResult<()> {
    let sub_opcode = read_u8(code, pc);
    match sub_opcode {
        0x15 => { let n = read_u16(code, pc) as usize; push_i(state, get_local_i(state, n))?; }
        0x16 => { let n = read_u16(code, pc) as usize; push_long(state, get_local_long(state, n))?; }
        0x17 => { let n = read_u16(code, pc) as usize; push_f(state, get_local_f(state, n))?; }
        0x18 => { let n = read_u16(code, pc) as usize; push_double(state, get_local_double(state, n))?; }
        0x19 => { let n = read_u16(code, pc) as usize; push_a(state, get_local_a(state, n))?; }
        0x36 => { let n = read_u16(code, pc) as usize; let v = pop_i(state); set_local_i(state, n, v); }
        0x37 => { let n = read_u16(code, pc) as usize; let v = pop_long(state); set_local_long(state, n, v); }
        0x38 => { let n = read_u16(code, pc) as usize; let v = pop_f(state); set_local_f(state, n, v); }
        0x39 => { let n = read_u16(code, pc) as usize; let v = pop_double(state); set_local_double(state, n, v); }
        0x3a => { let n = read_u16(code, pc) as usize; let v = pop_a(state); set_local_a(state, n, v); }
        0x84 => {
            let n = read_u16(code, pc) as usize;
            let delta = read_i16(code, pc) as i32;
            let v = get_local_i(state, n).wrapping_add(delta);
            set_local_i(state, n, v);
        }
        0xa9 => return Err(VmError::Unsupported("wide ret (old-style subroutines) is not supported".into())),
        other => return Err(VmError::class_format(format!("unknown wide sub-opcode {:#x}", other))),
    }
    Ok(())
}
