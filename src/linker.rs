//! Linker: resolution (§4.3) and method selection (§4.3 "Method selection").
//!
//! `resolve` assigns field/static layout and is idempotent and recursive
//! exactly as specified; `resolve_field`/`resolve_method` walk the JVM-spec
//! search order for a symbolic reference; `select_method` implements the
//! virtual/interface dispatch policy on top of a resolved method.

use std::rc::Rc;

use crate::class::{Class, ClassLayout, FieldAccessFlags, FieldLayout, Method};
use crate::constant_pool::Constant;
use crate::descriptor::{Category, FieldDescriptor};
use crate::error::{VmError, VmResult};
use crate::loader::ClassRepository;

/// A field reference resolved down to owning class, slot index, category,
/// and the boolean-masking bit (§4.3 "cache on the fieldref").
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub owner: Rc<Class>,
    pub index: usize,
    pub category: Category,
    pub is_static: bool,
    pub is_boolean: bool,
}

/// A method reference resolved to a concrete declaring class and method.
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub owner: Rc<Class>,
    pub method: Rc<Method>,
}

/// §4.3 `resolve(class)`. Safe to call repeatedly; only the first call per
/// class does any work (§3 "Once a class is resolved, the layout fields ...
/// are immutable").
pub fn resolve(class: &Rc<Class>) -> VmResult<()> {
    if class.layout().is_some() {
        return Ok(());
    }

    if let Some(super_class) = &class.super_class {
        resolve(super_class)?;
    }

    let parent_instance_count = class
        .super_class
        .as_ref()
        .and_then(|s| s.layout())
        .map(|l| l.instance_field_count)
        .unwrap_or(0);

    let mut instance_index = parent_instance_count;
    let mut static_index = 0usize;

    for field in &class.fields {
        let category = field.descriptor.category();
        let is_boolean = field.descriptor == FieldDescriptor::Boolean;
        let is_static = field.access_flags.contains(FieldAccessFlags::STATIC);

        let index = if is_static {
            let i = static_index;
            static_index += category.width();
            i
        } else {
            let i = instance_index;
            instance_index += category.width();
            i
        };

        field.layout.set(Some(FieldLayout {
            index,
            category,
            is_static,
            is_boolean,
        }));
    }

    class.set_layout(ClassLayout {
        instance_field_count: instance_index,
        static_field_count: static_index,
    });

    for interface in &class.interfaces {
        resolve(interface)?;
    }

    Ok(())
}

/// Field resolution (§4.3 "Field resolution on a symbolic fieldref"):
/// declared fields of `owner`, then each direct superinterface recursively,
/// then the superclass recursively.
pub fn resolve_field(owner: &Rc<Class>, name: &str, descriptor: &str) -> VmResult<Rc<ResolvedField>> {
    resolve(owner)?;
    find_field(owner, name)?.ok_or_else(|| VmError::NoSuchField {
        class: owner.name.clone(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

fn find_field(class: &Rc<Class>, name: &str) -> VmResult<Option<Rc<ResolvedField>>> {
    resolve(class)?;

    if let Some(field) = class.find_declared_field(name) {
        let layout = field
            .layout
            .get()
            .expect("resolved class must have laid-out fields");
        return Ok(Some(Rc::new(ResolvedField {
            owner: class.clone(),
            index: layout.index,
            category: layout.category,
            is_static: layout.is_static,
            is_boolean: layout.is_boolean,
        })));
    }

    for interface in &class.interfaces {
        if let Some(found) = find_field(interface, name)? {
            return Ok(Some(found));
        }
    }

    if let Some(super_class) = &class.super_class {
        return find_field(super_class, name);
    }

    Ok(None)
}

/// Method resolution (§4.3 "Method resolution on a method/interfacemethod
/// ref"): the declaring class's own superclass chain first, then a fallback
/// walk over superclasses and superinterfaces preferring a maximally
/// specific non-abstract method.
pub fn resolve_method(
    declaring: &Rc<Class>,
    name: &str,
    descriptor: &str,
) -> VmResult<Rc<ResolvedMethod>> {
    let mut current = Some(declaring.clone());
    while let Some(class) = current {
        if let Some(method) = class.find_declared_method(name, descriptor) {
            return Ok(Rc::new(ResolvedMethod {
                owner: class.clone(),
                method: method.clone(),
            }));
        }
        current = class.super_class.clone();
    }

    let mut fallback = None;
    if let Some(found) = search_interfaces(declaring, name, descriptor, &mut fallback)? {
        return Ok(found);
    }
    if let Some(found) = fallback {
        return Ok(found);
    }

    Err(VmError::NoSuchMethod {
        class: declaring.name.clone(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

/// Depth-first search over `class`'s interfaces (and its superclasses'
/// interfaces); a non-abstract match returns immediately as "maximally
/// specific", an abstract match is stashed in `fallback` for use only if
/// nothing better turns up (§4.3 step 2).
fn search_interfaces(
    class: &Rc<Class>,
    name: &str,
    descriptor: &str,
    fallback: &mut Option<Rc<ResolvedMethod>>,
) -> VmResult<Option<Rc<ResolvedMethod>>> {
    for interface in &class.interfaces {
        if let Some(method) = interface.find_declared_method(name, descriptor) {
            let resolved = Rc::new(ResolvedMethod {
                owner: interface.clone(),
                method: method.clone(),
            });
            if !method.is_abstract() {
                return Ok(Some(resolved));
            }
            if fallback.is_none() {
                *fallback = Some(resolved);
            }
        }
        if let Some(found) = search_interfaces(interface, name, descriptor, fallback)? {
            return Ok(Some(found));
        }
    }
    if let Some(super_class) = &class.super_class {
        if let Some(found) = search_interfaces(super_class, name, descriptor, fallback)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// §4.3 "Method selection": runtime dispatch for `invokevirtual`/
/// `invokeinterface`. Private methods select directly (no virtual dispatch);
/// otherwise walk the receiver's dynamic class chain for an overriding
/// method, falling back to the resolution search if none overrides.
pub fn select_method(
    receiver_class: &Rc<Class>,
    resolved: &ResolvedMethod,
) -> VmResult<Rc<ResolvedMethod>> {
    if resolved.method.is_private() {
        return Ok(Rc::new(resolved.clone()));
    }

    let descriptor = resolved.method.raw_descriptor();
    let mut current = Some(receiver_class.clone());
    while let Some(class) = current {
        if let Some(method) = class.find_declared_method(&resolved.method.name, &descriptor) {
            if !method.is_private() {
                return Ok(Rc::new(ResolvedMethod {
                    owner: class.clone(),
                    method: method.clone(),
                }));
            }
        }
        current = class.super_class.clone();
    }

    resolve_method(receiver_class, &resolved.method.name, &descriptor)
}

/// Resolve a `fieldref` constant-pool entry held by `referencing`'s own
/// pool, caching the result on `referencing` so a repeated `getfield`/
/// `getstatic` at the same bytecode site is O(1) (§3 "Constant-pool entry").
pub fn resolve_field_ref(
    referencing: &Rc<Class>,
    repo: &ClassRepository,
    index: u16,
) -> VmResult<Rc<ResolvedField>> {
    let member = match referencing
        .constant_pool
        .get(index)
        .map_err(|e| VmError::class_format(e.to_string()))?
    {
        Constant::FieldRef(member) => member.clone(),
        other => {
            return Err(VmError::class_format(format!(
                "constant pool index {} is not a FieldRef (found {:?})",
                index, other
            )))
        }
    };

    let key = (member.class.clone(), member.name.clone(), member.descriptor.clone());
    if let Some(cached) = referencing.resolved_fields_cache().borrow().get(&key) {
        return Ok(cached.clone());
    }

    let owner = repo.load(&member.class)?;
    let resolved = resolve_field(&owner, &member.name, &member.descriptor)?;
    referencing
        .resolved_fields_cache()
        .borrow_mut()
        .insert(key, resolved.clone());
    Ok(resolved)
}

/// Resolve a `methodref`/`interfacemethodref` constant-pool entry held by
/// `referencing`'s own pool, with the same per-class cache as
/// [`resolve_field_ref`].
pub fn resolve_method_ref(
    referencing: &Rc<Class>,
    repo: &ClassRepository,
    index: u16,
) -> VmResult<Rc<ResolvedMethod>> {
    let member = match referencing
        .constant_pool
        .get(index)
        .map_err(|e| VmError::class_format(e.to_string()))?
    {
        Constant::MethodRef(member) | Constant::InterfaceMethodRef(member) => member.clone(),
        other => {
            return Err(VmError::class_format(format!(
                "constant pool index {} is not a MethodRef/InterfaceMethodRef (found {:?})",
                index, other
            )))
        }
    };

    let key = (member.class.clone(), member.name.clone(), member.descriptor.clone());
    if let Some(cached) = referencing.resolved_methods_cache().borrow().get(&key) {
        return Ok(cached.clone());
    }

    let owner = repo.load(&member.class)?;
    let resolved = resolve_method(&owner, &member.name, &member.descriptor)?;
    referencing
        .resolved_methods_cache()
        .borrow_mut()
        .insert(key, resolved.clone());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassAccessFlags, ClassKind, Field, FieldAccessFlags, MethodAccessFlags};
    use crate::constant_pool::ConstantPool;
    use crate::descriptor::{MethodDescriptor, ReturnDescriptor};

    fn empty_class(name: &str, super_class: Option<Rc<Class>>) -> Rc<Class> {
        Rc::new(Class::new(
            name.into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            super_class,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            ClassKind::Normal,
        ))
    }

    fn method(name: &str, returns: FieldDescriptor) -> Rc<Method> {
        Rc::new(Method {
            access_flags: MethodAccessFlags::PUBLIC,
            name: name.into(),
            descriptor: MethodDescriptor {
                parameters: Vec::new(),
                return_type: ReturnDescriptor::Field(returns),
            },
            code: None,
            exceptions: Vec::new(),
        })
    }

    #[test]
    fn instance_fields_start_after_superclass_fields() {
        let object = empty_class("java/lang/Object", None);
        resolve(&object).unwrap();

        let parent = Rc::new(Class::new(
            "Parent".into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            Some(object.clone()),
            Vec::new(),
            vec![Rc::new(Field {
                access_flags: FieldAccessFlags::PRIVATE,
                name: "a".into(),
                descriptor: FieldDescriptor::Int,
                constant_value: None,
                layout: std::cell::Cell::new(None),
            })],
            Vec::new(),
            None,
            ClassKind::Normal,
        ));
        resolve(&parent).unwrap();
        assert_eq!(parent.layout().unwrap().instance_field_count, 1);

        let child = Rc::new(Class::new(
            "Child".into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            Some(parent),
            Vec::new(),
            vec![Rc::new(Field {
                access_flags: FieldAccessFlags::PRIVATE,
                name: "b".into(),
                descriptor: FieldDescriptor::Long,
                constant_value: None,
                layout: std::cell::Cell::new(None),
            })],
            Vec::new(),
            None,
            ClassKind::Normal,
        ));
        resolve(&child).unwrap();
        let field = child.find_declared_field("b").unwrap();
        assert_eq!(field.layout.get().unwrap().index, 1); // after parent's single category-1 field
        assert_eq!(child.layout().unwrap().instance_field_count, 3); // 1 + 2 (long)
    }

    #[test]
    fn virtual_dispatch_selects_override() {
        let object = empty_class("java/lang/Object", None);
        resolve(&object).unwrap();

        let a = Rc::new(Class::new(
            "A".into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            Some(object.clone()),
            Vec::new(),
            Vec::new(),
            vec![method("f", FieldDescriptor::Int)],
            None,
            ClassKind::Normal,
        ));
        resolve(&a).unwrap();

        let b = Rc::new(Class::new(
            "B".into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            Some(a.clone()),
            Vec::new(),
            Vec::new(),
            vec![method("f", FieldDescriptor::Int)],
            None,
            ClassKind::Normal,
        ));
        resolve(&b).unwrap();

        let resolved = resolve_method(&a, "f", "()I").unwrap();
        assert!(Rc::ptr_eq(&resolved.owner, &a));

        let selected = select_method(&b, &resolved).unwrap();
        assert!(Rc::ptr_eq(&selected.owner, &b));
    }
}
