//! End-to-end scenarios (spec §8) driven against hand-built classes via
//! `support::vm_with`, exercising the linker/initializer/interpreter
//! together the way a real classfile-backed run would.

mod support;

use std::rc::Rc;

use javacore::class::{ClassAccessFlags, ClassKind};
use javacore::constant_pool::{Constant, ConstantPool, MemberRef};
use javacore::value::Slot;

use support::{class, code_method, object_class, static_int_field, vm_with};

/// Scenario 1: two's-complement wrap on `idiv(MIN_VALUE, -1)`, chained
/// through an add and a negate, the way the interpreter is required to
/// evaluate it (no native `BigInteger`-style overflow checking anywhere).
#[test]
fn arithmetic_wraps_on_min_int_division_by_minus_one() {
    let object = object_class();

    let pool = ConstantPool::from_entries(vec![Constant::Integer(i32::MIN)]);
    let code = vec![
        0x12, 0x01, // ldc #1           (MIN_VALUE)
        0x02, // iconst_m1
        0x6c, // idiv
        0x04, // iconst_1
        0x60, // iadd
        0x02, // iconst_m1
        0x68, // imul
        0xac, // ireturn
    ];
    let compute = code_method("compute", "()I", true, code, 2, 0);
    let main = class("Main", pool, object.clone(), Vec::new(), vec![compute]);

    let vm = vm_with(vec![object, main.clone()]);
    let method = main.find_declared_method("compute", "()I").unwrap().clone();
    let result = javacore::interpreter::invoke(&vm, &main, &method, Vec::new()).unwrap();

    // MIN_VALUE / -1 wraps back to MIN_VALUE (never traps, never widens);
    // MIN_VALUE + 1 == -2147483647, and negating that (which does NOT
    // itself overflow) gives 2147483647.
    assert_eq!(result, Some(Slot::Int(i32::MAX)));
}

#[test]
fn idiv_min_value_by_minus_one_is_min_value() {
    let object = object_class();
    let code = vec![
        0x04, // iconst_1 -> placeholder, overwritten below
    ];
    let _ = code;

    let pool = ConstantPool::from_entries(vec![Constant::Integer(i32::MIN)]);
    let code = vec![
        0x12, 0x01, // ldc #1 (MIN_VALUE)
        0x02, // iconst_m1
        0x6c, // idiv
        0xac, // ireturn
    ];
    let compute = code_method("compute", "()I", true, code, 2, 0);
    let main = class("Main", pool, object.clone(), Vec::new(), vec![compute]);

    let vm = vm_with(vec![object, main.clone()]);
    let method = main.find_declared_method("compute", "()I").unwrap().clone();
    let result = javacore::interpreter::invoke(&vm, &main, &method, Vec::new()).unwrap();
    assert_eq!(result, Some(Slot::Int(i32::MIN)));
}

/// Scenario 2: `A.f()` returns 1, `B extends A` overrides it to return 2.
/// `invokevirtual` resolved statically against `A.f` must still select
/// `B.f` when the receiver's dynamic class is `B`.
#[test]
fn virtual_dispatch_selects_the_overriding_method() {
    let object = object_class();

    let a_pool = ConstantPool::empty();
    let f_a = code_method("f", "()I", false, vec![0x04, 0xac], 1, 1); // iconst_1; ireturn
    let a = class("A", a_pool, object.clone(), Vec::new(), vec![f_a]);

    let b_pool = ConstantPool::empty();
    let f_b = code_method("f", "()I", false, vec![0x05, 0xac], 1, 1); // iconst_2; ireturn
    let b = class("B", b_pool, a.clone(), Vec::new(), vec![f_b]);

    let main_pool = ConstantPool::from_entries(vec![
        Constant::Class(javacore::constant_pool::ClassRef { name: "B".to_string() }),
        Constant::MethodRef(MemberRef {
            class: "B".to_string(),
            name: "<init>".to_string(),
            descriptor: "()V".to_string(),
        }),
        Constant::MethodRef(MemberRef {
            class: "A".to_string(),
            name: "f".to_string(),
            descriptor: "()I".to_string(),
        }),
    ]);
    let code = vec![
        0xbb, 0x00, 0x01, // new #1 (B)
        0x59, // dup
        0xb7, 0x00, 0x02, // invokespecial #2 (B.<init>)
        0xb6, 0x00, 0x03, // invokevirtual #3 (A.f, statically)
        0xac, // ireturn
    ];
    let compute = code_method("compute", "()I", true, code, 2, 0);
    let main = class("Main", main_pool, object.clone(), Vec::new(), vec![compute]);

    let vm = vm_with(vec![object, a, b, main.clone()]);
    let method = main.find_declared_method("compute", "()I").unwrap().clone();
    let result = javacore::interpreter::invoke(&vm, &main, &method, Vec::new()).unwrap();

    assert_eq!(result, Some(Slot::Int(2)));
}

/// Scenario 3: `X` has a static initializer, `Y extends X` has its own;
/// referencing `Y` must run `X`'s `<clinit>` first.
#[test]
fn static_initializers_run_superclass_before_subclass() {
    let object = object_class();

    let counter_field = static_int_field("next");
    let counter = class("Counter", ConstantPool::empty(), object.clone(), vec![counter_field], Vec::new());

    fn bump_and_record(owner: &str) -> Vec<u8> {
        let _ = owner;
        vec![
            0xb2, 0x00, 0x01, // getstatic #1 (Counter.next)
            0x04, // iconst_1
            0x60, // iadd
            0x59, // dup
            0xb3, 0x00, 0x01, // putstatic #1 (Counter.next)
            0xb3, 0x00, 0x02, // putstatic #2 (own .mark)
            0xb1, // return
        ]
    }

    let x_pool = ConstantPool::from_entries(vec![
        Constant::FieldRef(MemberRef { class: "Counter".to_string(), name: "next".to_string(), descriptor: "I".to_string() }),
        Constant::FieldRef(MemberRef { class: "X".to_string(), name: "mark".to_string(), descriptor: "I".to_string() }),
    ]);
    let x_mark = static_int_field("mark");
    let x_clinit = code_method("<clinit>", "()V", true, bump_and_record("X"), 2, 0);
    let x = class("X", x_pool, object.clone(), vec![x_mark], vec![x_clinit]);

    let y_pool = ConstantPool::from_entries(vec![
        Constant::FieldRef(MemberRef { class: "Counter".to_string(), name: "next".to_string(), descriptor: "I".to_string() }),
        Constant::FieldRef(MemberRef { class: "Y".to_string(), name: "mark".to_string(), descriptor: "I".to_string() }),
    ]);
    let y_mark = static_int_field("mark");
    let y_clinit = code_method("<clinit>", "()V", true, bump_and_record("Y"), 2, 0);
    let y = class("Y", y_pool, x.clone(), vec![y_mark], vec![y_clinit]);

    let main_pool = ConstantPool::from_entries(vec![
        Constant::FieldRef(MemberRef { class: "Y".to_string(), name: "mark".to_string(), descriptor: "I".to_string() }),
        Constant::FieldRef(MemberRef { class: "X".to_string(), name: "mark".to_string(), descriptor: "I".to_string() }),
    ]);
    let code = vec![
        0xb2, 0x00, 0x01, // getstatic #1 (Y.mark) -- triggers Y's (and first X's) <clinit>
        0x57, // pop
        0xb2, 0x00, 0x02, // getstatic #2 (X.mark)
        0x10, 10, // bipush 10
        0x68, // imul
        0xb2, 0x00, 0x01, // getstatic #1 (Y.mark)
        0x60, // iadd
        0xac, // ireturn
    ];
    let compute = code_method("compute", "()I", true, code, 2, 0);
    let main = class("Main", main_pool, object.clone(), Vec::new(), vec![compute]);

    let vm = vm_with(vec![object, counter, x, y, main.clone()]);
    let method = main.find_declared_method("compute", "()I").unwrap().clone();
    let result = javacore::interpreter::invoke(&vm, &main, &method, Vec::new()).unwrap();

    // X.mark must have been assigned before Y.mark (X's <clinit> runs
    // first), so X.mark == 1 and Y.mark == 2: 1*10 + 2 == 12.
    assert_eq!(result, Some(Slot::Int(12)));
}

/// Scenario 4: a handler for an unrelated exception type precedes the
/// matching one in the exception table; the matching entry must still win
/// (first-matching-entry, not first-listed-entry).
#[test]
fn exception_dispatch_selects_the_matching_handler_not_the_first_listed() {
    let object = object_class();

    let base_pool = ConstantPool::from_entries(vec![Constant::MethodRef(MemberRef {
        class: "java/lang/Object".to_string(),
        name: "<init>".to_string(),
        descriptor: "()V".to_string(),
    })]);
    let base_init = code_method("<init>", "()V", false, vec![0x2a, 0xb7, 0x00, 0x01, 0xb1], 1, 1);
    let base = class("ExceptionBase", base_pool, object.clone(), Vec::new(), vec![base_init]);

    fn subclass_init(super_name: &str) -> (ConstantPool, Vec<u8>) {
        let pool = ConstantPool::from_entries(vec![Constant::MethodRef(MemberRef {
            class: super_name.to_string(),
            name: "<init>".to_string(),
            descriptor: "()V".to_string(),
        })]);
        let code = vec![0x2a, 0xb7, 0x00, 0x01, 0xb1];
        (pool, code)
    }

    let (runtime_pool, runtime_code) = subclass_init("ExceptionBase");
    let runtime_init = code_method("<init>", "()V", false, runtime_code, 1, 1);
    let runtime_ex = class("RuntimeEx", runtime_pool, base.clone(), Vec::new(), vec![runtime_init]);

    let (io_pool, io_code) = subclass_init("ExceptionBase");
    let io_init = code_method("<init>", "()V", false, io_code, 1, 1);
    let io_ex = class("IOEx", io_pool, base.clone(), Vec::new(), vec![io_init]);

    let main_pool = ConstantPool::from_entries(vec![
        Constant::Class(javacore::constant_pool::ClassRef { name: "RuntimeEx".to_string() }),
        Constant::MethodRef(MemberRef {
            class: "RuntimeEx".to_string(),
            name: "<init>".to_string(),
            descriptor: "()V".to_string(),
        }),
        Constant::Class(javacore::constant_pool::ClassRef { name: "IOEx".to_string() }),
        Constant::Class(javacore::constant_pool::ClassRef { name: "ExceptionBase".to_string() }),
    ]);
    let code = vec![
        0xbb, 0x00, 0x01, // new #1 (RuntimeEx)           pc 0..3
        0x59, // dup                                       pc 3
        0xb7, 0x00, 0x02, // invokespecial #2 (<init>)      pc 4..7
        0xbf, // athrow                                     pc 7
        0x04, // [handler: IOEx]  iconst_1                  pc 8
        0xac, // ireturn                                     pc 9
        0x05, // [handler: ExceptionBase]  iconst_2         pc 10
        0xac, // ireturn                                     pc 11
    ];

    let compute_with_table = {
        use javacore::attributes::{CodeAttribute, ExceptionTableEntry};
        javacore::class::Method::new_for_test(
            "compute",
            "()I",
            true,
            CodeAttribute {
                max_stack: 2,
                max_locals: 0,
                code,
                exception_table: vec![
                    ExceptionTableEntry { start_pc: 0, end_pc: 8, handler_pc: 8, catch_type_index: 3 },
                    ExceptionTableEntry { start_pc: 0, end_pc: 8, handler_pc: 10, catch_type_index: 4 },
                ],
                line_number_table: Vec::new(),
            },
        )
    };

    let main = class("Main", main_pool, object.clone(), Vec::new(), vec![compute_with_table]);

    let vm = vm_with(vec![object, base, runtime_ex, io_ex, main.clone()]);
    let method = main.find_declared_method("compute", "()I").unwrap().clone();
    let result = javacore::interpreter::invoke(&vm, &main, &method, Vec::new()).unwrap();

    assert_eq!(result, Some(Slot::Int(2)));
}

/// Scenario 6: `tableswitch` over `low=0, high=3`, keyed `2` returns the
/// third entry; an out-of-range key falls through to `default`.
#[test]
fn tableswitch_dispatches_by_index_and_falls_back_to_default() {
    let object = object_class();
    let pool = ConstantPool::empty();

    // tableswitch layout: opcode at pc0, padding to a multiple of 4, then
    // default/low/high (4 bytes each) and high-low+1 = 4 offsets, each
    // relative to the opcode's own pc.
    fn build(key_load: u8) -> Vec<u8> {
        let mut code = vec![key_load]; // push the switch key (iload_0)
        let opcode_pc = code.len(); // where `tableswitch` itself sits
        code.push(0xaa); // tableswitch
        while (code.len()) % 4 != 0 {
            code.push(0); // padding
        }
        // offsets are computed once we know where each return sequence sits;
        // build the bodies first, then patch.
        let header_len = 4 * 3 + 4 * 4; // default, low, high, 4 offsets
        let body_start = code.len() + header_len;

        let targets: Vec<i32> = vec![10, 20, 30, 40];
        let mut bodies = Vec::new();
        let mut offsets = Vec::new();
        for t in &targets {
            offsets.push((body_start + bodies.len()) as i32 - opcode_pc as i32);
            bodies.push(0x10); // bipush
            bodies.push(*t as u8);
            bodies.push(0xac); // ireturn
        }
        let default_offset = (body_start + bodies.len()) as i32 - opcode_pc as i32;
        bodies.push(0x10);
        bodies.push(99);
        bodies.push(0xac);

        code.extend_from_slice(&default_offset.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes()); // low
        code.extend_from_slice(&3i32.to_be_bytes()); // high
        for off in offsets {
            code.extend_from_slice(&off.to_be_bytes());
        }
        code.extend(bodies);
        code
    }

    let code = build(0x1a); // iload_0
    let compute = code_method("compute", "(I)I", true, code, 1, 1);
    let main = class("Main", pool, object.clone(), Vec::new(), vec![compute]);

    let vm = vm_with(vec![object, main.clone()]);
    let method = main.find_declared_method("compute", "(I)I").unwrap().clone();

    let hit = javacore::interpreter::invoke(&vm, &main, &method, vec![Slot::Int(2)]).unwrap();
    assert_eq!(hit, Some(Slot::Int(30)));

    let default = javacore::interpreter::invoke(&vm, &main, &method, vec![Slot::Int(-1)]).unwrap();
    assert_eq!(default, Some(Slot::Int(99)));
}
