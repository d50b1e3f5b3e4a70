//! Class repository and bootstrap loader (§4.2).
//!
//! Holds the name→class map and the classpath, and knows how to synthesize
//! array and primitive pseudo-classes without ever touching the classpath
//! for them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::archive::ClassPath;
use crate::class::{Class, ClassAccessFlags, ClassKind, Field, Method};
use crate::class_file::ClassFile;
use crate::constant_pool::ConstantPool;
use crate::descriptor::FieldDescriptor;
use crate::error::{VmError, VmResult};
use crate::version::ClassVersion;

const PRIMITIVES: [&str; 8] = ["B", "C", "D", "F", "I", "J", "S", "Z"];

pub struct ClassRepository {
    classpath: ClassPath,
    classes: RefCell<HashMap<String, Rc<Class>>>,
}

impl ClassRepository {
    /// Pre-populates primitive/array pseudo-classes and eagerly loads the
    /// handful of classes the rest of the VM assumes are always present
    /// (§4.2 "`java/lang/Object`, ... are eagerly loaded").
    pub fn bootstrap(classpath: ClassPath) -> VmResult<Self> {
        let repository = ClassRepository {
            classpath,
            classes: RefCell::new(HashMap::new()),
        };

        for primitive in PRIMITIVES {
            repository.register(Rc::new(primitive_class(primitive)));
        }
        for primitive in PRIMITIVES {
            let array_name = format!("[{}", primitive);
            let element = FieldDescriptor::parse(primitive).expect("primitive tag");
            let array_class = repository.synthesize_array(&array_name, element)?;
            repository.register(array_class);
        }

        for name in [
            "java/lang/Object",
            "java/lang/Class",
            "java/lang/String",
            "java/lang/Cloneable",
            "java/io/Serializable",
        ] {
            let class = repository.load(name)?;
            if name == "java/lang/Class" {
                // The Class instance's own class header is patched to itself
                // once the heap exists; recorded as a deferred hook the VM
                // performs right after `bootstrap` (see `Vm::new`).
                let _ = class;
            }
        }

        Ok(repository)
    }

    /// Builds a repository from classes assembled in-process rather than
    /// read from a classpath. Primitive/array pseudo-classes are still
    /// pre-populated exactly as in [`ClassRepository::bootstrap`]; `classes`
    /// supplies everything else (the bootstrap platform classes plus any
    /// application classes), keyed by their own `name`. Used by embedders
    /// that synthesize their own class graph and by integration tests that
    /// drive the interpreter against hand-built classes without a real
    /// class-file-backed classpath.
    pub fn from_classes(classpath: ClassPath, classes: impl IntoIterator<Item = Rc<Class>>) -> VmResult<Self> {
        let repository = ClassRepository {
            classpath,
            classes: RefCell::new(HashMap::new()),
        };

        for primitive in PRIMITIVES {
            repository.register(Rc::new(primitive_class(primitive)));
        }
        for primitive in PRIMITIVES {
            let array_name = format!("[{}", primitive);
            let element = FieldDescriptor::parse(primitive).expect("primitive tag");
            let array_class = repository.synthesize_array(&array_name, element)?;
            repository.register(array_class);
        }

        for class in classes {
            repository.register(class);
        }

        Ok(repository)
    }

    fn register(&self, class: Rc<Class>) {
        self.classes.borrow_mut().insert(class.name.clone(), class);
    }

    pub fn get_loaded(&self, name: &str) -> Option<Rc<Class>> {
        self.classes.borrow().get(name).cloned()
    }

    /// §4.2 `load(name)`.
    pub fn load(&self, name: &str) -> VmResult<Rc<Class>> {
        if let Some(class) = self.get_loaded(name) {
            return Ok(class);
        }

        if let Some(stripped) = name.strip_prefix('[') {
            return self.load_array(name, stripped);
        }

        self.load_from_classpath(name)
    }

    fn load_array(&self, array_name: &str, inner: &str) -> VmResult<Rc<Class>> {
        let element_name = if let Some(object_name) = inner.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            object_name.to_string()
        } else {
            inner.to_string()
        };

        // Ensure the element type exists; array-of-array recurses through
        // `load` again via the leading '['.
        self.load(&element_name)?;

        let descriptor = FieldDescriptor::parse(inner)
            .map_err(|_| VmError::class_format(format!("malformed array element descriptor {}", inner)))?;

        let class = self.synthesize_array(array_name, descriptor)?;
        self.register(class.clone());
        Ok(class)
    }

    fn synthesize_array(&self, array_name: &str, element: FieldDescriptor) -> VmResult<Rc<Class>> {
        let object_class = if array_name == "[B" || array_name == "[C" || array_name == "[D"
            || array_name == "[F" || array_name == "[I" || array_name == "[J"
            || array_name == "[S" || array_name == "[Z"
        {
            // Primitive arrays are synthesized during `bootstrap`, before
            // `java/lang/Object` necessarily exists yet; tolerate that.
            self.get_loaded("java/lang/Object")
        } else {
            Some(self.load("java/lang/Object")?)
        };

        // Every array class implements Cloneable and Serializable (§4.2); both
        // are bootstrapped before any non-primitive array, but primitive
        // arrays are synthesized first, so tolerate either not existing yet
        // and leave the array class with no interfaces in that case.
        let interfaces = match (self.get_loaded("java/lang/Cloneable"), self.get_loaded("java/io/Serializable")) {
            (Some(cloneable), Some(serializable)) => vec![cloneable, serializable],
            _ => Vec::new(),
        };

        Ok(Rc::new(Class::new(
            array_name.to_string(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            object_class,
            interfaces,
            Vec::new(),
            Vec::new(),
            None,
            ClassKind::Array { element },
        )))
    }

    fn load_from_classpath(&self, name: &str) -> VmResult<Rc<Class>> {
        debug!("loading class {}", name);
        let bytes = self
            .classpath
            .find(name)?
            .ok_or_else(|| VmError::ClassNotFound(name.to_string()))?;

        let class_file = ClassFile::parse(bytes).map_err(|e| VmError::class_format(e.to_string()))?;
        if class_file.this_class != name {
            return Err(VmError::class_format(format!(
                "requested class {} but file declares {}",
                name, class_file.this_class
            )));
        }

        self.build_class(class_file)
    }

    fn build_class(&self, class_file: ClassFile) -> VmResult<Rc<Class>> {
        let super_class = match &class_file.super_class {
            Some(name) => Some(self.load(name)?),
            None => None,
        };

        let mut interfaces = Vec::with_capacity(class_file.interfaces.len());
        for name in &class_file.interfaces {
            interfaces.push(self.load(name)?);
        }

        let fields = class_file
            .fields
            .into_iter()
            .map(|f| {
                Rc::new(Field {
                    access_flags: f.access_flags,
                    name: f.name,
                    descriptor: f.descriptor,
                    constant_value: f.attributes.constant_value,
                    layout: std::cell::Cell::new(None),
                })
            })
            .collect();

        let methods = class_file
            .methods
            .into_iter()
            .map(|m| {
                Rc::new(Method {
                    access_flags: m.access_flags,
                    name: m.name,
                    descriptor: m.descriptor,
                    code: m.attributes.code,
                    exceptions: m.attributes.exceptions,
                })
            })
            .collect();

        let class = Rc::new(Class::new(
            class_file.this_class.clone(),
            class_file.access_flags,
            class_file.constant_pool,
            super_class,
            interfaces,
            fields,
            methods,
            class_file.attributes.source_file,
            ClassKind::Normal,
        ));

        self.register(class.clone());
        Ok(class)
    }
}

fn primitive_class(tag: &str) -> Class {
    let name = match tag {
        "B" => "byte",
        "C" => "char",
        "D" => "double",
        "F" => "float",
        "I" => "int",
        "J" => "long",
        "S" => "short",
        "Z" => "boolean",
        other => other,
    };
    Class::new(
        name.to_string(),
        ClassAccessFlags::PUBLIC,
        ConstantPool::empty(),
        None,
        Vec::new(),
        Vec::new(),
        Vec::new(),
        None,
        ClassKind::Primitive,
    )
}

impl ConstantPool {
    /// An empty pool for synthesized classes that have no real class file
    /// (array/primitive pseudo-classes, §4.2).
    pub fn empty() -> Self {
        ConstantPool::from_entries(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bare `java/lang/Object` fixture, enough to stand in for the platform
    /// class `bootstrap` would otherwise load from a real classpath.
    fn object_class() -> Rc<Class> {
        Rc::new(Class::new(
            "java/lang/Object".to_string(),
            ClassAccessFlags::PUBLIC,
            ConstantPool::empty(),
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            ClassKind::Normal,
        ))
    }

    #[test]
    fn synthesizes_primitive_array_without_classpath() {
        // `from_classes` pre-populates primitive/array pseudo-classes exactly
        // as `bootstrap` does, without `bootstrap`'s eager classpath loads
        // (there is no classpath here to load `java/lang/Object` etc. from).
        let repo = ClassRepository::from_classes(ClassPath::parse(""), Vec::new()).unwrap();
        let array_class = repo.load("[I").unwrap();
        assert!(array_class.is_array());
        assert_eq!(array_class.array_element(), Some(&FieldDescriptor::Int));
    }

    #[test]
    fn caches_loaded_classes_by_identity() {
        let repo = ClassRepository::from_classes(ClassPath::parse(""), vec![object_class()]).unwrap();
        let a = repo.load("java/lang/Object").unwrap();
        let b = repo.load("java/lang/Object").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }
}
