//! The object/heap model (§3 "Object", §4.5 "Heap"): untyped instance and
//! array objects sharing a class-pointer header, plus string construction
//! and interning.
//!
//! The source represents every object as a raw pointer into a block of
//! memory shaped by its class; this port keeps the "uniform header plus
//! slot array" shape but represents the slot array as a `Vec<Slot>` behind
//! an `Rc`, so an [`ObjectHandle`] is just a cloneable reference rather than
//! a pointer into memory this crate must manage by hand. The heap is
//! append-only (§5): every object ever allocated is retained in `objects`
//! for the life of the interpreter, exactly as the spec requires.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::class::Class;
use crate::descriptor::FieldDescriptor;
use crate::error::{JavaThrowable, VmError, VmResult};
use crate::modified_utf8;
use crate::value::Slot;

/// A heap object: its class header plus either instance-field slots or
/// array-element slots (§3 "Object").
pub struct Object {
    class: Rc<Class>,
    data: RefCell<ObjectData>,
}

enum ObjectData {
    Instance(Vec<Slot>),
    Array(Vec<Slot>),
}

pub type ObjectHandle = Rc<Object>;

impl Object {
    pub fn class(&self) -> Rc<Class> {
        self.class.clone()
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.data.borrow(), ObjectData::Array(_))
    }

    /// The array header's 32-bit length (§3 "Object").
    pub fn array_length(&self) -> VmResult<i32> {
        match &*self.data.borrow() {
            ObjectData::Array(slots) => Ok(slots.len() as i32),
            ObjectData::Instance(_) => Err(VmError::Unsupported(
                "arraylength on a non-array object".into(),
            )),
        }
    }

    pub fn get_field(&self, index: usize) -> Slot {
        match &*self.data.borrow() {
            ObjectData::Instance(slots) => slots[index].clone(),
            ObjectData::Array(_) => panic!("get_field on an array object"),
        }
    }

    pub fn set_field(&self, index: usize, value: Slot) {
        match &mut *self.data.borrow_mut() {
            ObjectData::Instance(slots) => slots[index] = value,
            ObjectData::Array(_) => panic!("set_field on an array object"),
        }
    }

    /// Bounds-checked element read (§4.7 "array ops ... bounds-check the
    /// index").
    pub fn get_element(&self, index: i32) -> VmResult<Slot> {
        match &*self.data.borrow() {
            ObjectData::Array(slots) => {
                if index < 0 || index as usize >= slots.len() {
                    return Err(array_index_oob(index, slots.len()));
                }
                Ok(slots[index as usize].clone())
            }
            ObjectData::Instance(_) => Err(VmError::Unsupported("array op on an instance".into())),
        }
    }

    pub fn set_element(&self, index: i32, value: Slot) -> VmResult<()> {
        match &mut *self.data.borrow_mut() {
            ObjectData::Array(slots) => {
                if index < 0 || index as usize >= slots.len() {
                    return Err(array_index_oob(index, slots.len()));
                }
                slots[index as usize] = value;
                Ok(())
            }
            ObjectData::Instance(_) => Err(VmError::Unsupported("array op on an instance".into())),
        }
    }

    pub fn array_elements(&self) -> VmResult<Vec<Slot>> {
        match &*self.data.borrow() {
            ObjectData::Array(slots) => Ok(slots.clone()),
            ObjectData::Instance(_) => Err(VmError::Unsupported("array op on an instance".into())),
        }
    }

    /// Used by `System.arraycopy` (§ SPEC_FULL.md B, ambient `java.lang`
    /// hooks): copy a contiguous run of elements between two arrays that may
    /// be the same object, matching Java's overlap-safe semantics.
    pub fn array_copy_from(
        &self,
        src: &Object,
        src_pos: i32,
        dst_pos: i32,
        length: i32,
    ) -> VmResult<()> {
        let source: Vec<Slot> = {
            match &*src.data.borrow() {
                ObjectData::Array(slots) => {
                    let (start, len) = (src_pos as usize, length as usize);
                    if src_pos < 0 || start + len > slots.len() {
                        return Err(array_index_oob(src_pos, slots.len()));
                    }
                    slots[start..start + len].to_vec()
                }
                ObjectData::Instance(_) => {
                    return Err(VmError::Unsupported("arraycopy on an instance".into()))
                }
            }
        };
        match &mut *self.data.borrow_mut() {
            ObjectData::Array(slots) => {
                let (start, len) = (dst_pos as usize, length as usize);
                if dst_pos < 0 || start + len > slots.len() {
                    return Err(array_index_oob(dst_pos, slots.len()));
                }
                slots[start..start + len].clone_from_slice(&source);
                Ok(())
            }
            ObjectData::Instance(_) => Err(VmError::Unsupported("arraycopy on an instance".into())),
        }
    }

    /// Identity hash (§ SPEC_FULL.md B, `Object.hashCode`/`identityHashCode`):
    /// derived from the `Rc`'s address, stable for the object's lifetime
    /// since the heap never moves or frees anything (§5).
    pub fn identity_hash(self: &Rc<Self>) -> i32 {
        Rc::as_ptr(self) as usize as i32
    }
}

/// Reference identity, matching Java's `==` on object references: two
/// handles are equal iff they point at the same heap object, never by
/// comparing field contents.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

fn array_index_oob(_index: i32, _length: usize) -> VmError {
    VmError::from(JavaThrowable::bare("java/lang/ArrayIndexOutOfBoundsException"))
}

pub struct Heap {
    objects: RefCell<Vec<ObjectHandle>>,
    interned: RefCell<HashMap<String, ObjectHandle>>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: RefCell::new(Vec::new()),
            interned: RefCell::new(HashMap::new()),
        }
    }

    fn retain(&self, object: Object) -> ObjectHandle {
        let handle = Rc::new(object);
        self.objects.borrow_mut().push(handle.clone());
        handle
    }

    /// `new_instance(class)` (§4.5): a resolved class's instance-field slot
    /// count sizes the region; every slot starts at its descriptor's zero
    /// value rather than raw zero bytes, since `Slot` is a tagged union.
    pub fn new_instance(&self, class: &Rc<Class>) -> VmResult<ObjectHandle> {
        let layout = class.layout().ok_or_else(|| {
            VmError::Unsupported(format!("new_instance on unresolved class {}", class.name))
        })?;
        let mut slots = vec![Slot::Int(0); layout.instance_field_count];
        fill_instance_defaults(class, &mut slots);
        Ok(self.retain(Object {
            class: class.clone(),
            data: RefCell::new(ObjectData::Instance(slots)),
        }))
    }

    /// `new_array(class, count)` (§4.5). `count` must already be
    /// non-negative; the interpreter performs that check before calling in
    /// (§4.7 "Allocation", §7 "Negative-array-size").
    pub fn new_array(&self, class: &Rc<Class>, count: i32) -> VmResult<ObjectHandle> {
        debug_assert!(count >= 0, "negative array length reached the heap");
        let element = class
            .array_element()
            .cloned()
            .ok_or_else(|| VmError::Unsupported(format!("new_array on non-array class {}", class.name)))?;
        let slots = vec![element.default_slot(); count.max(0) as usize];
        Ok(self.retain(Object {
            class: class.clone(),
            data: RefCell::new(ObjectData::Array(slots)),
        }))
    }

    /// `make_string(utf16)` (§4.5): allocates the backing byte array holding
    /// the UTF-16 units in native byte order, then the `String` instance
    /// itself with `coder = 1`.
    pub fn make_string_utf16(
        &self,
        string_class: &Rc<Class>,
        byte_array_class: &Rc<Class>,
        units: &[u16],
    ) -> VmResult<ObjectHandle> {
        let mut bytes = Vec::with_capacity(units.len() * 2);
        for &unit in units {
            let [lo, hi] = unit.to_ne_bytes();
            bytes.push(lo);
            bytes.push(hi);
        }
        let value_array = self.byte_array_from(byte_array_class, &bytes)?;
        self.build_string(string_class, value_array, 1)
    }

    fn byte_array_from(&self, byte_array_class: &Rc<Class>, bytes: &[u8]) -> VmResult<ObjectHandle> {
        let slots: Vec<Slot> = bytes.iter().map(|&b| Slot::Int(b as i8 as i32)).collect();
        Ok(self.retain(Object {
            class: byte_array_class.clone(),
            data: RefCell::new(ObjectData::Array(slots)),
        }))
    }

    fn build_string(
        &self,
        string_class: &Rc<Class>,
        value_array: ObjectHandle,
        coder: i32,
    ) -> VmResult<ObjectHandle> {
        let value_field = find_field_index(string_class, "value")?;
        let coder_field = find_field_index(string_class, "coder")?;
        let layout = string_class.layout().ok_or_else(|| {
            VmError::Unsupported("java/lang/String has not been resolved".into())
        })?;
        let mut slots = vec![Slot::Int(0); layout.instance_field_count];
        fill_instance_defaults(string_class, &mut slots);
        slots[value_field] = Slot::Reference(Some(value_array));
        slots[coder_field] = Slot::Int(coder);
        Ok(self.retain(Object {
            class: string_class.clone(),
            data: RefCell::new(ObjectData::Instance(slots)),
        }))
    }

    /// `make_string(modified_utf8)` (§4.5): converts to UTF-16 first, then
    /// delegates to the UTF-16 constructor; does not intern.
    pub fn make_string_utf8(
        &self,
        string_class: &Rc<Class>,
        byte_array_class: &Rc<Class>,
        text: &str,
    ) -> VmResult<ObjectHandle> {
        let units = modified_utf8::to_utf16(text);
        self.make_string_utf16(string_class, byte_array_class, &units)
    }

    /// `load_string(utf8)` (§4.5): returns the interned string for `text` if
    /// one already exists, otherwise builds and interns one. Two `ldc`
    /// instructions on the same source text in the same class therefore
    /// yield the same reference (§8 "String identity").
    pub fn load_string(
        &self,
        string_class: &Rc<Class>,
        byte_array_class: &Rc<Class>,
        text: &str,
    ) -> VmResult<ObjectHandle> {
        if let Some(existing) = self.interned.borrow().get(text) {
            return Ok(existing.clone());
        }
        let handle = self.make_string_utf8(string_class, byte_array_class, text)?;
        self.interned.borrow_mut().insert(text.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn live_object_count(&self) -> usize {
        self.objects.borrow().len()
    }

    /// The inverse of [`Heap::make_string_utf16`]: read a `java/lang/String`
    /// instance's backing byte array back out as a Rust `String`, honoring
    /// `coder` (0 = Latin-1, 1 = UTF-16) the way `String.getBytes`/`charAt`
    /// would (§ SPEC_FULL.md B, native `PrintStream`/`String` hooks).
    pub fn read_java_string(&self, string_class: &Rc<Class>, handle: &ObjectHandle) -> VmResult<String> {
        let value_field = find_field_index(string_class, "value")?;
        let coder_field = find_field_index(string_class, "coder")?;
        let value = match handle.get_field(value_field) {
            Slot::Reference(Some(array)) => array,
            _ => return Ok(String::new()),
        };
        let coder = handle.get_field(coder_field).as_int();
        let bytes = value.array_elements()?;

        if coder == 0 {
            Ok(bytes.iter().map(|s| s.as_int() as u8 as char).collect())
        } else {
            let mut units = Vec::with_capacity(bytes.len() / 2);
            for pair in bytes.chunks_exact(2) {
                let lo = pair[0].as_int() as u8;
                let hi = pair[1].as_int() as u8;
                units.push(u16::from_ne_bytes([lo, hi]));
            }
            Ok(modified_utf8::from_utf16(&units))
        }
    }
}

fn find_field_index(class: &Rc<Class>, name: &str) -> VmResult<usize> {
    let field = class
        .find_declared_field(name)
        .ok_or_else(|| VmError::NoSuchField {
            class: class.name.clone(),
            name: name.to_string(),
            descriptor: String::new(),
        })?;
    let layout = field.layout.get().ok_or_else(|| {
        VmError::Unsupported(format!("{} field {} is not laid out", class.name, name))
    })?;
    Ok(layout.index)
}

fn fill_instance_defaults(class: &Rc<Class>, slots: &mut [Slot]) {
    let mut current = Some(class.clone());
    while let Some(c) = current {
        for field in &c.fields {
            if let Some(layout) = field.layout.get() {
                if !layout.is_static {
                    slots[layout.index] = field.descriptor.default_slot();
                }
            }
        }
        current = c.super_class.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassAccessFlags, ClassKind, Field, FieldAccessFlags, Method};
    use crate::constant_pool::ConstantPool;
    use crate::linker;

    fn object_class() -> Rc<Class> {
        let class = Rc::new(Class::new(
            "java/lang/Object".into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            ClassKind::Normal,
        ));
        linker::resolve(&class).unwrap();
        class
    }

    fn string_class(object: Rc<Class>) -> Rc<Class> {
        let value = Rc::new(Field {
            access_flags: FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL,
            name: "value".into(),
            descriptor: FieldDescriptor::Array(Box::new(FieldDescriptor::Byte)),
            constant_value: None,
            layout: std::cell::Cell::new(None),
        });
        let coder = Rc::new(Field {
            access_flags: FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL,
            name: "coder".into(),
            descriptor: FieldDescriptor::Byte,
            constant_value: None,
            layout: std::cell::Cell::new(None),
        });
        let class = Rc::new(Class::new(
            "java/lang/String".into(),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
            ConstantPool::empty(),
            Some(object),
            Vec::new(),
            vec![value, coder],
            Vec::<Rc<Method>>::new(),
            None,
            ClassKind::Normal,
        ));
        linker::resolve(&class).unwrap();
        class
    }

    fn byte_array_class(object: Rc<Class>) -> Rc<Class> {
        Rc::new(Class::new(
            "[B".into(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            Some(object),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            ClassKind::Array {
                element: FieldDescriptor::Byte,
            },
        ))
    }

    #[test]
    fn interning_returns_same_reference_for_same_text() {
        let heap = Heap::new();
        let object = object_class();
        let string = string_class(object.clone());
        let bytes = byte_array_class(object);

        let a = heap.load_string(&string, &bytes, "hello").unwrap();
        let b = heap.load_string(&string, &bytes, "hello").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn supplementary_code_point_doubles_utf16_length() {
        let heap = Heap::new();
        let object = object_class();
        let string = string_class(object.clone());
        let bytes = byte_array_class(object);

        let handle = heap
            .make_string_utf8(&string, &bytes, "h\u{1F600}i")
            .unwrap();
        let value_index = find_field_index(&string, "value").unwrap();
        let value = match handle.get_field(value_index) {
            Slot::Reference(Some(obj)) => obj,
            other => panic!("expected a reference slot, found {:?}", other),
        };
        // 'h' + surrogate pair (2 units) + 'i' = 4 UTF-16 units, 8 bytes.
        assert_eq!(value.array_length().unwrap(), 8);
    }

    #[test]
    fn array_bounds_are_checked() {
        let heap = Heap::new();
        let object = object_class();
        let array_class = byte_array_class(object);
        let array = heap.new_array(&array_class, 4).unwrap();
        assert!(array.get_element(4).is_err());
        assert!(array.get_element(-1).is_err());
        assert!(array.get_element(3).is_ok());
    }
}
