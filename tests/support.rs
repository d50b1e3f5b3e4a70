//! Shared scaffolding for the end-to-end tests (spec §8 scenarios): builds
//! classes directly as [`javacore::class::Class`] values (the same way
//! `javacore::heap`'s own unit tests build a fixture `java/lang/String`)
//! rather than through the class-file parser, and assembles a [`Vm`] over
//! them with `ClassRepository::from_classes`/`Vm::assemble`. This exercises
//! the linker, initializer, and interpreter exactly as a real class-file-
//! backed run would, without needing a JDK-shaped classpath on the test
//! machine.

use std::cell::Cell;
use std::rc::Rc;

use javacore::archive::ClassPath;
use javacore::attributes::CodeAttribute;
use javacore::class::{
    Class, ClassAccessFlags, ClassKind, Field, FieldAccessFlags, Method, MethodAccessFlags,
};
use javacore::constant_pool::{Constant, ConstantPool};
use javacore::descriptor::{FieldDescriptor, MethodDescriptor};
use javacore::heap::Heap;
use javacore::loader::ClassRepository;
use javacore::stack::Stack;
use javacore::vm::Vm;

/// A minimal `java/lang/Object`: no fields, and a `native` `<init>()V` that
/// resolves to `javacore::hooks`' registered no-op rather than real bytecode.
pub fn object_class() -> Rc<Class> {
    let init = Rc::new(Method {
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE,
        name: "<init>".to_string(),
        descriptor: MethodDescriptor::parse("()V").unwrap(),
        code: None,
        exceptions: Vec::new(),
    });

    Rc::new(Class::new(
        "java/lang/Object".to_string(),
        ClassAccessFlags::PUBLIC,
        ConstantPool::empty(),
        None,
        Vec::new(),
        Vec::new(),
        vec![init],
        None,
        ClassKind::Normal,
    ))
}

pub fn static_int_field(name: &str) -> Rc<Field> {
    Rc::new(Field {
        access_flags: FieldAccessFlags::STATIC,
        name: name.to_string(),
        descriptor: FieldDescriptor::Int,
        constant_value: None,
        layout: Cell::new(None),
    })
}

/// An ordinary instance method/`<clinit>` backed by real bytecode.
pub fn code_method(
    name: &str,
    descriptor: &str,
    is_static: bool,
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
) -> Rc<Method> {
    let mut flags = MethodAccessFlags::PUBLIC;
    if is_static {
        flags |= MethodAccessFlags::STATIC;
    }
    Rc::new(Method {
        access_flags: flags,
        name: name.to_string(),
        descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        code: Some(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            line_number_table: Vec::new(),
        }),
        exceptions: Vec::new(),
    })
}

/// A class built from already-assembled pool/fields/methods, always
/// extending `super_class` and carrying no interfaces — everything these
/// tests need.
pub fn class(
    name: &str,
    pool: ConstantPool,
    super_class: Rc<Class>,
    fields: Vec<Rc<Field>>,
    methods: Vec<Rc<Method>>,
) -> Rc<Class> {
    Rc::new(Class::new(
        name.to_string(),
        ClassAccessFlags::PUBLIC,
        pool,
        Some(super_class),
        Vec::new(),
        fields,
        methods,
        None,
        ClassKind::Normal,
    ))
}

/// Builds a `Vm` whose repository contains exactly `classes` (plus the
/// primitive/array pseudo-classes `ClassRepository::from_classes` always
/// pre-populates) and a fresh heap/stack.
pub fn vm_with(classes: Vec<Rc<Class>>) -> Vm {
    let repo = ClassRepository::from_classes(ClassPath::parse(""), classes).unwrap();
    let heap = Heap::new();
    let stack = Stack::new(1 << 16);
    Vm::assemble(repo, heap, stack)
}
