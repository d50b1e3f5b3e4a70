//! The class-initialization state machine (§4.4): executes `<clinit>` and
//! `ConstantValue` static-final assignments exactly once per class, under
//! the class's own lock so concurrent/recursive triggers observe a
//! consistent view.

use std::rc::Rc;
use std::thread;

use log::debug;

use crate::class::{Class, InitState};
use crate::constant_pool::Constant;
use crate::error::{VmError, VmResult};
use crate::value::Slot;
use crate::vm::Vm;

/// §4.4 `initialize(class, thread)`, steps 1-11.
pub fn initialize(vm: &Vm, class: &Rc<Class>) -> VmResult<()> {
    let current = thread::current().id();

    {
        let mut guard = class.init_state().lock().unwrap();
        loop {
            match *guard {
                InitState::InProgress(owner) if owner == current => return Ok(()),
                InitState::InProgress(_) => {
                    guard = class.init_condvar().wait(guard).unwrap();
                    continue;
                }
                InitState::Initialized => return Ok(()),
                InitState::Erroneous => {
                    let message = class
                        .init_error()
                        .unwrap_or_else(|| format!("{} failed to initialize", class.name));
                    return Err(vm.throw("java/lang/NoClassDefFoundError", &message));
                }
                InitState::Uninitialized => {
                    *guard = InitState::InProgress(current);
                    break;
                }
            }
        }
    }

    debug!("initializing class {}", class.name);

    match run(vm, class) {
        Ok(()) => {
            let mut guard = class.init_state().lock().unwrap();
            *guard = InitState::Initialized;
            class.init_condvar().notify_all();
            Ok(())
        }
        Err(err) => {
            let message = display_message(&err);
            class.set_init_error(message);
            let mut guard = class.init_state().lock().unwrap();
            *guard = InitState::Erroneous;
            class.init_condvar().notify_all();
            Err(err)
        }
    }
}

fn display_message(err: &VmError) -> String {
    match err {
        VmError::Throwable(t) => t.class_name.clone(),
        other => other.to_string(),
    }
}

fn run(vm: &Vm, class: &Rc<Class>) -> VmResult<()> {
    crate::linker::resolve(class)?;

    // Step 7: static-final ConstantValue assignments.
    for field in &class.fields {
        let layout = match field.layout.get() {
            Some(l) if l.is_static => l,
            _ => continue,
        };
        let Some(constant) = &field.constant_value else {
            continue;
        };
        let slot = match constant {
            Constant::Integer(v) => Slot::Int(*v),
            Constant::Float(v) => Slot::Float(*v),
            Constant::Long(v) => Slot::Long(*v),
            Constant::Double(v) => Slot::Double(*v),
            Constant::String(text) => Slot::Reference(Some(vm.intern_string(text)?)),
            other => {
                return Err(VmError::class_format(format!(
                    "unsupported ConstantValue kind for {}.{}: {:?}",
                    class.name, field.name, other
                )))
            }
        };
        class.set_static_slot(layout.index, slot);
    }

    // Step 8: superclass, then direct superinterfaces.
    if let Some(super_class) = &class.super_class {
        initialize(vm, super_class)?;
    }
    for interface in &class.interfaces {
        initialize(vm, interface)?;
    }

    // Step 9: <clinit>, if present.
    if let Some(clinit) = class.methods.iter().find(|m| m.is_clinit()) {
        crate::interpreter::invoke(vm, class, clinit, Vec::new())?;
    }

    Ok(())
}
