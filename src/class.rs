//! The in-memory class representation (§3 "Class", "Field and method
//! descriptors") and its mutable linkage/initialization state (§4.3, §4.4).
//!
//! A [`Class`] is built by the loader once its superclass and superinterfaces
//! are already loaded, so `super_class`/`interfaces` are direct `Rc` links
//! rather than symbolic names. Layout (§4.3) and initialization (§4.4) are
//! filled in later, behind `RefCell`/`Mutex` so `resolve`/`initialize` can be
//! idempotent and re-entrant without requiring `&mut Class` everywhere a
//! class is touched.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;

use bitflags::bitflags;

use crate::attributes::CodeAttribute;
use crate::constant_pool::{Constant, ConstantPool};
use crate::descriptor::{Category, FieldDescriptor, MethodDescriptor};
use crate::heap::ObjectHandle;
use crate::value::Slot;

bitflags! {
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

/// Where a field/local/static slot lives once the class is resolved (§4.3
/// step 4).
#[derive(Debug, Clone, Copy)]
pub struct FieldLayout {
    pub index: usize,
    pub category: Category,
    pub is_static: bool,
    /// Writes through a `boolean`-descriptor field mask to the low bit
    /// (§4.7 "Object/field").
    pub is_boolean: bool,
}

pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: FieldDescriptor,
    /// Present only for `static final` fields carrying a `ConstantValue`
    /// attribute (§4.4 step 7).
    pub constant_value: Option<Constant>,
    pub layout: Cell<Option<FieldLayout>>,
}

impl Field {
    pub fn category(&self) -> Category {
        self.descriptor.category()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("name", &self.name).finish()
    }
}

pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub code: Option<CodeAttribute>,
    pub exceptions: Vec<String>,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PRIVATE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    pub fn is_clinit(&self) -> bool {
        self.name == "<clinit>" && self.descriptor.parameters.is_empty()
    }

    /// Builds a `public [static]` method backed by `code`, for tests that
    /// need to supply their own exception table or line-number table rather
    /// than the empty ones a plain bytecode-only fixture gets. Panics if
    /// `descriptor` doesn't parse, since a test fixture with a malformed
    /// descriptor is a bug in the test, not a runtime condition.
    pub fn new_for_test(
        name: &str,
        descriptor: &str,
        is_static: bool,
        code: CodeAttribute,
    ) -> Rc<Method> {
        let mut flags = MethodAccessFlags::PUBLIC;
        if is_static {
            flags |= MethodAccessFlags::STATIC;
        }
        Rc::new(Method {
            access_flags: flags,
            name: name.to_string(),
            descriptor: MethodDescriptor::parse(descriptor).expect("valid test descriptor"),
            code: Some(code),
            exceptions: Vec::new(),
        })
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("name", &self.name).finish()
    }
}

/// What kind of pseudo- or real class this is (§4.2).
pub enum ClassKind {
    Normal,
    Array { element: FieldDescriptor },
    Primitive,
}

/// §4.3 layout, computed once by `resolve` and then immutable.
#[derive(Debug, Clone, Copy)]
pub struct ClassLayout {
    pub instance_field_count: usize,
    pub static_field_count: usize,
}

/// §4.4 per-class initialization state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    InProgress(ThreadId),
    Initialized,
    Erroneous,
}

pub struct Class {
    pub name: String,
    pub access_flags: ClassAccessFlags,
    pub constant_pool: ConstantPool,
    pub super_class: Option<Rc<Class>>,
    pub interfaces: Vec<Rc<Class>>,
    pub fields: Vec<Rc<Field>>,
    pub methods: Vec<Rc<Method>>,
    pub source_file: Option<String>,
    pub kind: ClassKind,

    layout: RefCell<Option<ClassLayout>>,
    static_storage: RefCell<Vec<Slot>>,

    init_state: Mutex<InitState>,
    init_condvar: Condvar,

    resolved_fields: RefCell<HashMap<(String, String, String), Rc<crate::linker::ResolvedField>>>,
    resolved_methods: RefCell<HashMap<(String, String, String), Rc<crate::linker::ResolvedMethod>>>,

    /// The `java/lang/Class` instance describing this class, lazily built
    /// (§4.2 "the Class instance's own class header is patched to itself").
    class_object: RefCell<Option<ObjectHandle>>,

    /// Set when `initialize` marks this class *erroneous* (§4.4 step 8/11),
    /// so a later re-entrant `initialize` can lift the original failure
    /// message into `no-class-def-found` instead of a generic one.
    init_error: RefCell<Option<String>>,
}

impl Class {
    pub fn new(
        name: String,
        access_flags: ClassAccessFlags,
        constant_pool: ConstantPool,
        super_class: Option<Rc<Class>>,
        interfaces: Vec<Rc<Class>>,
        fields: Vec<Rc<Field>>,
        methods: Vec<Rc<Method>>,
        source_file: Option<String>,
        kind: ClassKind,
    ) -> Self {
        Class {
            name,
            access_flags,
            constant_pool,
            super_class,
            interfaces,
            fields,
            methods,
            source_file,
            kind,
            layout: RefCell::new(None),
            static_storage: RefCell::new(Vec::new()),
            init_state: Mutex::new(InitState::Uninitialized),
            init_condvar: Condvar::new(),
            resolved_fields: RefCell::new(HashMap::new()),
            resolved_methods: RefCell::new(HashMap::new()),
            class_object: RefCell::new(None),
            init_error: RefCell::new(None),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    pub fn array_element(&self) -> Option<&FieldDescriptor> {
        match &self.kind {
            ClassKind::Array { element } => Some(element),
            _ => None,
        }
    }

    pub fn find_declared_method(&self, name: &str, descriptor: &str) -> Option<&Rc<Method>> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor_matches(descriptor))
    }

    pub fn find_declared_field(&self, name: &str) -> Option<&Rc<Field>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `true` if `self` names `other` or a (super/interface) ancestor of it.
    /// Resolution of `other` is not required; name comparison along the
    /// class chain suffices (§4.8, §9 open question).
    pub fn is_subclass_of(self: &Rc<Self>, other_name: &str) -> bool {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if class.name == other_name {
                return true;
            }
            if class.implements_interface(other_name) {
                return true;
            }
            current = class.super_class.clone();
        }
        false
    }

    fn implements_interface(&self, name: &str) -> bool {
        self.interfaces
            .iter()
            .any(|i| i.name == name || i.implements_interface(name))
    }

    // --- §4.3 layout, populated by the linker ---

    pub fn layout(&self) -> Option<ClassLayout> {
        *self.layout.borrow()
    }

    pub fn set_layout(&self, layout: ClassLayout) {
        *self.layout.borrow_mut() = Some(layout);
        let mut storage = self.static_storage.borrow_mut();
        storage.resize(layout.static_field_count, Slot::Int(0));
        for field in &self.fields {
            if let Some(l) = field.layout.get() {
                if l.is_static {
                    storage[l.index] = field.descriptor.default_slot();
                }
            }
        }
    }

    pub fn static_slot(&self, index: usize) -> Slot {
        self.static_storage.borrow()[index].clone()
    }

    pub fn set_static_slot(&self, index: usize, value: Slot) {
        self.static_storage.borrow_mut()[index] = value;
    }

    pub fn resolved_fields_cache(
        &self,
    ) -> &RefCell<HashMap<(String, String, String), Rc<crate::linker::ResolvedField>>> {
        &self.resolved_fields
    }

    pub fn resolved_methods_cache(
        &self,
    ) -> &RefCell<HashMap<(String, String, String), Rc<crate::linker::ResolvedMethod>>> {
        &self.resolved_methods
    }

    // --- §4.4 initialization state ---

    pub fn init_state(&self) -> &Mutex<InitState> {
        &self.init_state
    }

    pub fn init_condvar(&self) -> &Condvar {
        &self.init_condvar
    }

    pub fn class_object(&self) -> Option<ObjectHandle> {
        self.class_object.borrow().clone()
    }

    pub fn set_class_object(&self, handle: ObjectHandle) {
        *self.class_object.borrow_mut() = Some(handle);
    }

    pub fn init_error(&self) -> Option<String> {
        self.init_error.borrow().clone()
    }

    pub fn set_init_error(&self, message: String) {
        *self.init_error.borrow_mut() = Some(message);
    }
}

impl Method {
    fn descriptor_matches(&self, raw: &str) -> bool {
        // Compared against the original descriptor text rather than a
        // round-tripped re-encoding so `find_declared_method` stays cheap.
        self.raw_descriptor() == raw
    }

    /// The descriptor text as it appeared in the class file, reconstructed
    /// from the parsed [`MethodDescriptor`] (used by the linker to compare
    /// candidates found via different search paths, §4.3).
    pub(crate) fn raw_descriptor(&self) -> String {
        let mut text = String::from("(");
        for param in &self.descriptor.parameters {
            text.push_str(&descriptor_tag(param));
        }
        text.push(')');
        match &self.descriptor.return_type {
            crate::descriptor::ReturnDescriptor::Void => text.push('V'),
            crate::descriptor::ReturnDescriptor::Field(f) => text.push_str(&descriptor_tag(f)),
        }
        text
    }
}

fn descriptor_tag(d: &FieldDescriptor) -> String {
    match d {
        FieldDescriptor::Byte => "B".to_string(),
        FieldDescriptor::Char => "C".to_string(),
        FieldDescriptor::Double => "D".to_string(),
        FieldDescriptor::Float => "F".to_string(),
        FieldDescriptor::Int => "I".to_string(),
        FieldDescriptor::Long => "J".to_string(),
        FieldDescriptor::Short => "S".to_string(),
        FieldDescriptor::Boolean => "Z".to_string(),
        FieldDescriptor::Object(name) => format!("L{};", name),
        FieldDescriptor::Array(inner) => format!("[{}", descriptor_tag(inner)),
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class").field("name", &self.name).finish()
    }
}
