//! The VM: ties the class repository, heap, and shared stack together into
//! one object the rest of the core is handed by reference (§4 overview,
//! §6 "Embedding/CLI surface").

use std::collections::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

use crate::archive::ClassPath;
use crate::class::Class;
use crate::error::{JavaThrowable, VmError, VmResult};
use crate::heap::{Heap, ObjectHandle};
use crate::loader::ClassRepository;
use crate::native::{NativeManager, NativeThunk};
use crate::stack::Stack;
use crate::value::Slot;

/// Launch-time knobs that outlive a single run (§6, §ambient configuration).
pub struct LaunchConfig {
    pub classpath: String,
    pub native_libraries: Vec<String>,
    pub stack_slot_limit: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        LaunchConfig {
            classpath: String::new(),
            native_libraries: Vec::new(),
            // A generous default; §4.6 leaves the exact limit to the host,
            // only requiring that exceeding it raises StackOverflowError.
            stack_slot_limit: 1 << 20,
        }
    }
}

pub struct Vm {
    repo: ClassRepository,
    heap: Heap,
    stack: Stack,
    natives: RefCell<NativeManager>,
    thunks: RefCell<HashMap<(String, String, String), Rc<NativeThunk>>>,
}

impl Vm {
    pub fn bootstrap(config: &LaunchConfig) -> VmResult<Vm> {
        let classpath = ClassPath::parse(&config.classpath);
        let repo = ClassRepository::bootstrap(classpath)?;
        let heap = Heap::new();
        let stack = Stack::new(config.stack_slot_limit);

        let vm = Vm {
            repo,
            heap,
            stack,
            natives: RefCell::new(NativeManager::new()),
            thunks: RefCell::new(HashMap::new()),
        };

        // Patch `java/lang/Class`'s own class header to point at an
        // instance of itself (§4.2 "the Class instance's own class header is
        // patched to itself").
        let class_class = vm.repo.load("java/lang/Class")?;
        crate::linker::resolve(&class_class)?;
        let mirror = vm.heap.new_instance(&class_class)?;
        class_class.set_class_object(mirror);

        for path in &config.native_libraries {
            vm.natives.borrow_mut().load_library(path)?;
        }

        Ok(vm)
    }

    /// Assembles a `Vm` from an already-built repository/heap/stack rather
    /// than a classpath (the counterpart to
    /// [`crate::loader::ClassRepository::from_classes`]). Used by embedders
    /// and integration tests that synthesize their own class graph instead
    /// of reading real class files.
    pub fn assemble(repo: ClassRepository, heap: Heap, stack: Stack) -> Vm {
        Vm {
            repo,
            heap,
            stack,
            natives: RefCell::new(NativeManager::new()),
            thunks: RefCell::new(HashMap::new()),
        }
    }

    pub fn repo(&self) -> &ClassRepository {
        &self.repo
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// The `java/lang/Class` mirror for `class`, built lazily on first use
    /// (§4.2, used by `ldc` of a `Class` constant and `Object.getClass`).
    pub fn class_mirror(&self, class: &Rc<Class>) -> VmResult<ObjectHandle> {
        if let Some(existing) = class.class_object() {
            return Ok(existing);
        }
        let class_class = self.repo.load("java/lang/Class")?;
        let handle = self.heap.new_instance(&class_class)?;
        class.set_class_object(handle.clone());
        Ok(handle)
    }

    pub fn intern_string(&self, text: &str) -> VmResult<ObjectHandle> {
        let string_class = self.repo.load("java/lang/String")?;
        let byte_array_class = self.repo.load("[B")?;
        self.heap.load_string(&string_class, &byte_array_class, text)
    }

    pub fn new_string(&self, text: &str) -> VmResult<ObjectHandle> {
        let string_class = self.repo.load("java/lang/String")?;
        let byte_array_class = self.repo.load("[B")?;
        self.heap.make_string_utf8(&string_class, &byte_array_class, text)
    }

    pub fn read_string(&self, handle: &ObjectHandle) -> VmResult<String> {
        let string_class = self.repo.load("java/lang/String")?;
        self.heap.read_java_string(&string_class, handle)
    }

    /// Builds a real exception/error instance carrying `message` as its
    /// `detailMessage` field when the class and `java/lang/String` can both
    /// be loaded; otherwise falls back to a bare, object-less throwable so a
    /// platform error never itself faults the VM (§4.8, §7).
    pub fn throw(&self, class_name: &str, message: &str) -> VmError {
        match self.build_throwable(class_name, message) {
            Ok(throwable) => VmError::from(throwable),
            Err(_) => VmError::from(JavaThrowable::bare(class_name)),
        }
    }

    /// Materializes a bare, object-less throwable (one raised before the heap
    /// could allocate it, e.g. an array-bounds check) into a real instance so
    /// exception dispatch has something to push onto the handler's operand
    /// stack (§4.8).
    pub fn materialize_throwable(&self, class_name: &str) -> VmResult<ObjectHandle> {
        self.build_throwable(class_name, "")
            .map(|t| t.object.expect("build_throwable always returns an object"))
    }

    fn build_throwable(&self, class_name: &str, message: &str) -> VmResult<JavaThrowable> {
        let class = self.repo.load(class_name)?;
        crate::linker::resolve(&class)?;
        let handle = self.heap.new_instance(&class)?;
        if !message.is_empty() {
            if let Some(field) = class.find_declared_field("detailMessage") {
                if let Some(layout) = field.layout.get() {
                    let text = self.new_string(message)?;
                    handle.set_field(layout.index, Slot::Reference(Some(text)));
                }
            }
        }
        Ok(JavaThrowable::new(class_name, handle))
    }

    /// Binds (and caches) the native thunk for `owner.method`, searching
    /// already-loaded native libraries (§4.9). Callers fall back to the
    /// hook table when this fails.
    pub fn resolve_native(
        &self,
        owner: &Rc<Class>,
        method: &Rc<crate::class::Method>,
    ) -> VmResult<Rc<NativeThunk>> {
        let key = (owner.name.clone(), method.name.clone(), method.raw_descriptor());
        if let Some(thunk) = self.thunks.borrow().get(&key) {
            return Ok(thunk.clone());
        }

        let symbol = self
            .natives
            .borrow()
            .find_symbol(&owner.name, &method.name, &method.raw_descriptor());

        let fn_ptr = symbol.ok_or_else(|| {
            VmError::Unsupported(format!(
                "no native implementation found for {}.{}{}",
                owner.name,
                method.name,
                method.raw_descriptor()
            ))
        })?;

        let thunk = Rc::new(NativeThunk::bind(fn_ptr, method.descriptor.clone()));
        self.thunks.borrow_mut().insert(key, thunk.clone());
        Ok(thunk)
    }

    /// Loads, initializes, and runs `main_class`'s `main(String[])`, mapping
    /// the result to a process exit status the way `java`'s launcher does
    /// (§6 "CLI surface").
    pub fn run_main(&self, main_class_name: &str, program_args: &[String]) -> i32 {
        match self.run_main_inner(main_class_name, program_args) {
            Ok(()) => 0,
            Err(VmError::Exit(code)) => code,
            Err(VmError::Throwable(throwable)) => {
                eprintln!("Exception in thread \"main\" {}", throwable.class_name);
                for frame in &throwable.trace {
                    let location = match (&frame.source_file, frame.line) {
                        (Some(file), Some(line)) => format!("{}:{}", file, line),
                        (Some(file), None) => file.clone(),
                        (None, _) => format!("pc={}", frame.pc),
                    };
                    eprintln!("\tat {}.{}({})", frame.class, frame.method, location);
                }
                1
            }
            Err(other) => {
                eprintln!("error: {}", other);
                1
            }
        }
    }

    fn run_main_inner(&self, main_class_name: &str, program_args: &[String]) -> VmResult<()> {
        let class = self.repo.load(main_class_name)?;
        crate::initializer::initialize(self, &class)?;

        let method = class
            .find_declared_method("main", "([Ljava/lang/String;)V")
            .cloned()
            .ok_or_else(|| VmError::NoSuchMethod {
                class: main_class_name.to_string(),
                name: "main".to_string(),
                descriptor: "([Ljava/lang/String;)V".to_string(),
            })?;

        let array_class = self.repo.load("[Ljava/lang/String;")?;
        let args_array = self.heap.new_array(&array_class, program_args.len() as i32)?;
        for (i, arg) in program_args.iter().enumerate() {
            let text = self.new_string(arg)?;
            args_array.set_element(i as i32, Slot::Reference(Some(text)))?;
        }

        crate::interpreter::invoke(
            self,
            &class,
            &method,
            vec![Slot::Reference(Some(args_array))],
        )?;
        Ok(())
    }
}
