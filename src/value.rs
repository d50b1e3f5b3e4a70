//! The operand-stack / locals / field-slot representation (§3 "Object",
//! "Frame", and the category-2 invariant).
//!
//! A category-1 value occupies one [`Slot`]; a category-2 value (`long`,
//! `double`) occupies two adjacent slots, the first holding the value and
//! the second holding [`Slot::Top`] — the same padding idiom the constant
//! pool uses for the slot following a `Long`/`Double` entry.

use crate::descriptor::{Category, FieldDescriptor};
use crate::heap::ObjectHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Reference(Option<ObjectHandle>),
    /// The second half of a category-2 value. Never read directly.
    Top,
}

impl Slot {
    pub fn category(&self) -> Category {
        match self {
            Slot::Long(_) | Slot::Double(_) => Category::Two,
            _ => Category::One,
        }
    }

    pub fn as_int(&self) -> i32 {
        match self {
            Slot::Int(v) => *v,
            other => panic!("expected an int slot, found {:?}", other),
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            Slot::Float(v) => *v,
            other => panic!("expected a float slot, found {:?}", other),
        }
    }

    pub fn as_long(&self) -> i64 {
        match self {
            Slot::Long(v) => *v,
            other => panic!("expected a long slot, found {:?}", other),
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            Slot::Double(v) => *v,
            other => panic!("expected a double slot, found {:?}", other),
        }
    }

    pub fn as_reference(&self) -> Option<ObjectHandle> {
        match self {
            Slot::Reference(v) => v.clone(),
            other => panic!("expected a reference slot, found {:?}", other),
        }
    }

    /// `true`/`false` read back from a `boolean`-typed slot (stored as an int).
    pub fn as_bool_int(&self) -> i32 {
        self.as_int() & 1
    }
}

impl FieldDescriptor {
    /// The zero value used to initialize a field/array-element/local slot
    /// before any explicit store.
    pub fn default_slot(&self) -> Slot {
        match self {
            FieldDescriptor::Byte
            | FieldDescriptor::Char
            | FieldDescriptor::Short
            | FieldDescriptor::Int
            | FieldDescriptor::Boolean => Slot::Int(0),
            FieldDescriptor::Float => Slot::Float(0.0),
            FieldDescriptor::Long => Slot::Long(0),
            FieldDescriptor::Double => Slot::Double(0.0),
            FieldDescriptor::Object(_) | FieldDescriptor::Array(_) => Slot::Reference(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_two_values_report_width() {
        assert_eq!(Slot::Long(5).category(), Category::Two);
        assert_eq!(Slot::Double(5.0).category(), Category::Two);
        assert_eq!(Slot::Int(5).category(), Category::One);
        assert_eq!(Slot::Top.category(), Category::One);
    }

    #[test]
    fn default_slot_matches_descriptor_kind() {
        assert!(matches!(FieldDescriptor::Int.default_slot(), Slot::Int(0)));
        assert!(matches!(FieldDescriptor::Long.default_slot(), Slot::Long(0)));
        assert!(matches!(
            FieldDescriptor::Object("java/lang/Object".into()).default_slot(),
            Slot::Reference(None)
        ));
    }
}
