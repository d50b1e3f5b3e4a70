//! Constant pool parsing (§3 "Constant pool").
//!
//! The pool is stored on disk as a flat array of variant-tagged entries that
//! reference each other by 1-based index (`ConstantClass` points at a
//! `Utf8`, `ConstantFieldRef` points at a `Class` and a `NameAndType`, and so
//! on). Rather than keep those raw indices around and re-walk them on every
//! lookup, every cross-referencing entry is resolved once, right after the
//! raw array is read, into the owned strings it ultimately names. Index 0 is
//! never valid (the pool is 1-based and long/double entries consume two
//! slots); `get` reflects that by taking a 1-based `u16` index directly.

use std::io::{self, Cursor, Error, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::modified_utf8;
use crate::read::Readable;
use crate::version::ClassVersion;

/// A raw, unresolved pool slot as it appears in the class file. Long and
/// double entries occupy their own index plus a padding slot immediately
/// after (§3 "the next usable index is incremented by two").
#[derive(Debug, Clone)]
enum RawConstant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    /// The padding slot following a Long/Double entry; never directly indexed.
    Padding,
}

/// A fully resolved pool entry: every index it carried at parse time has
/// already been followed to the owned value it ultimately names.
#[derive(Debug, Clone)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(ClassRef),
    String(String),
    FieldRef(MemberRef),
    MethodRef(MemberRef),
    InterfaceMethodRef(MemberRef),
    NameAndType(NameAndTypeRef),
    MethodHandle { reference_kind: u8, target: MemberRef },
    MethodType(String),
    Dynamic { name: String, descriptor: String },
    InvokeDynamic { name: String, descriptor: String },
    Module(String),
    Package(String),
    Padding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAndTypeRef {
    pub name: String,
    pub descriptor: String,
}

impl RawConstant {
    const TAG_UTF8: u8 = 1;
    const TAG_INTEGER: u8 = 3;
    const TAG_FLOAT: u8 = 4;
    const TAG_LONG: u8 = 5;
    const TAG_DOUBLE: u8 = 6;
    const TAG_CLASS: u8 = 7;
    const TAG_STRING: u8 = 8;
    const TAG_FIELD_REF: u8 = 9;
    const TAG_METHOD_REF: u8 = 10;
    const TAG_INTERFACE_METHOD_REF: u8 = 11;
    const TAG_NAME_AND_TYPE: u8 = 12;
    const TAG_METHOD_HANDLE: u8 = 15;
    const TAG_METHOD_TYPE: u8 = 16;
    const TAG_DYNAMIC: u8 = 17;
    const TAG_INVOKE_DYNAMIC: u8 = 18;
    const TAG_MODULE: u8 = 19;
    const TAG_PACKAGE: u8 = 20;

    fn read(version: ClassVersion, buffer: &mut Cursor<Vec<u8>>) -> io::Result<Self> {
        let tag = buffer.read_u8()?;
        Ok(match tag {
            Self::TAG_UTF8 => {
                let len = buffer.read_u16::<BigEndian>()? as usize;
                let mut bytes = vec![0u8; len];
                buffer.read_exact(&mut bytes)?;
                RawConstant::Utf8(modified_utf8::decode(&bytes)?)
            }
            Self::TAG_INTEGER => RawConstant::Integer(i32::read(buffer)?),
            Self::TAG_FLOAT => RawConstant::Float(f32::read(buffer)?),
            Self::TAG_LONG => RawConstant::Long(i64::read(buffer)?),
            Self::TAG_DOUBLE => RawConstant::Double(f64::read(buffer)?),
            Self::TAG_CLASS => RawConstant::Class { name_index: u16::read(buffer)? },
            Self::TAG_STRING => RawConstant::String { string_index: u16::read(buffer)? },
            Self::TAG_FIELD_REF => RawConstant::FieldRef {
                class_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            Self::TAG_METHOD_REF => RawConstant::MethodRef {
                class_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            Self::TAG_INTERFACE_METHOD_REF => RawConstant::InterfaceMethodRef {
                class_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            Self::TAG_NAME_AND_TYPE => RawConstant::NameAndType {
                name_index: u16::read(buffer)?,
                descriptor_index: u16::read(buffer)?,
            },
            Self::TAG_METHOD_HANDLE => RawConstant::MethodHandle {
                reference_kind: buffer.read_u8()?,
                reference_index: u16::read(buffer)?,
            },
            Self::TAG_METHOD_TYPE => {
                RawConstant::MethodType { descriptor_index: u16::read(buffer)? }
            }
            Self::TAG_DYNAMIC => RawConstant::Dynamic {
                bootstrap_method_attr_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            Self::TAG_INVOKE_DYNAMIC => RawConstant::InvokeDynamic {
                bootstrap_method_attr_index: u16::read(buffer)?,
                name_and_type_index: u16::read(buffer)?,
            },
            Self::TAG_MODULE => RawConstant::Module { name_index: u16::read(buffer)? },
            Self::TAG_PACKAGE => RawConstant::Package { name_index: u16::read(buffer)? },
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unknown constant pool tag {} (class version {:?})", other, version),
                ))
            }
        })
    }

    fn width(&self) -> u16 {
        match self {
            RawConstant::Long(_) | RawConstant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub struct ConstantPool {
    /// 1-based: `entries[0]` corresponds to constant pool index 1.
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Builds a pool directly from already-resolved entries, bypassing
    /// `read`'s raw-index resolution. Used for synthesized array/primitive
    /// pseudo-classes, which have no real class file (§4.2).
    pub fn from_entries(entries: Vec<Constant>) -> Self {
        ConstantPool { entries }
    }

    /// A pool with no entries, for classes that never index into their own
    /// constant pool (synthesized test fixtures, pseudo-classes before their
    /// array/primitive entries are populated).
    pub fn empty() -> Self {
        ConstantPool::from_entries(Vec::new())
    }

    pub fn read(version: ClassVersion, buffer: &mut Cursor<Vec<u8>>) -> io::Result<Self> {
        let count = u16::read(buffer)?;
        if count == 0 {
            return Err(Error::new(ErrorKind::InvalidData, "constant pool count must be >= 1"));
        }

        let mut raw: Vec<RawConstant> = Vec::with_capacity(count as usize - 1);
        let mut remaining = count - 1;
        while remaining > 0 {
            let entry = RawConstant::read(version, buffer)?;
            let width = entry.width();
            raw.push(entry);
            if width == 2 {
                raw.push(RawConstant::Padding);
            }
            remaining = remaining.saturating_sub(width);
        }

        let entries = resolve(&raw)?;
        Ok(ConstantPool { entries })
    }

    /// Look up a 1-based constant pool index.
    pub fn get(&self, index: u16) -> io::Result<&Constant> {
        if index == 0 {
            return Err(Error::new(ErrorKind::InvalidData, "constant pool index 0 is never valid"));
        }
        self.entries
            .get(index as usize - 1)
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, format!("constant pool index {} out of range", index)))
    }

    pub fn utf8(&self, index: u16) -> io::Result<&str> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text.as_str()),
            other => Err(mismatch("Utf8", other)),
        }
    }

    pub fn class(&self, index: u16) -> io::Result<&ClassRef> {
        match self.get(index)? {
            Constant::Class(class_ref) => Ok(class_ref),
            other => Err(mismatch("Class", other)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn mismatch(expected: &str, found: &Constant) -> io::Error {
    Error::new(ErrorKind::InvalidData, format!("expected a {} constant, found {:?}", expected, found))
}

fn raw_utf8(raw: &[RawConstant], index: u16) -> io::Result<String> {
    match raw.get(index as usize - 1) {
        Some(RawConstant::Utf8(text)) => Ok(text.clone()),
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("constant pool index {} is not a Utf8 entry (found {:?})", index, other),
        )),
    }
}

fn raw_class_name(raw: &[RawConstant], index: u16) -> io::Result<String> {
    match raw.get(index as usize - 1) {
        Some(RawConstant::Class { name_index }) => raw_utf8(raw, *name_index),
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("constant pool index {} is not a Class entry (found {:?})", index, other),
        )),
    }
}

fn raw_name_and_type(raw: &[RawConstant], index: u16) -> io::Result<NameAndTypeRef> {
    match raw.get(index as usize - 1) {
        Some(RawConstant::NameAndType { name_index, descriptor_index }) => Ok(NameAndTypeRef {
            name: raw_utf8(raw, *name_index)?,
            descriptor: raw_utf8(raw, *descriptor_index)?,
        }),
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("constant pool index {} is not a NameAndType entry (found {:?})", index, other),
        )),
    }
}

fn raw_member_ref(raw: &[RawConstant], class_index: u16, name_and_type_index: u16) -> io::Result<MemberRef> {
    let class = raw_class_name(raw, class_index)?;
    let nat = raw_name_and_type(raw, name_and_type_index)?;
    Ok(MemberRef { class, name: nat.name, descriptor: nat.descriptor })
}

/// Snapshot every cross-reference in the raw pool into owned values so later
/// lookups never need to re-walk an index chain.
fn resolve(raw: &[RawConstant]) -> io::Result<Vec<Constant>> {
    let mut out = Vec::with_capacity(raw.len());

    for entry in raw {
        let resolved = match entry {
            RawConstant::Utf8(text) => Constant::Utf8(text.clone()),
            RawConstant::Integer(v) => Constant::Integer(*v),
            RawConstant::Float(v) => Constant::Float(*v),
            RawConstant::Long(v) => Constant::Long(*v),
            RawConstant::Double(v) => Constant::Double(*v),
            RawConstant::Class { name_index } => {
                Constant::Class(ClassRef { name: raw_utf8(raw, *name_index)? })
            }
            RawConstant::String { string_index } => Constant::String(raw_utf8(raw, *string_index)?),
            RawConstant::FieldRef { class_index, name_and_type_index } => {
                Constant::FieldRef(raw_member_ref(raw, *class_index, *name_and_type_index)?)
            }
            RawConstant::MethodRef { class_index, name_and_type_index } => {
                Constant::MethodRef(raw_member_ref(raw, *class_index, *name_and_type_index)?)
            }
            RawConstant::InterfaceMethodRef { class_index, name_and_type_index } => {
                Constant::InterfaceMethodRef(raw_member_ref(raw, *class_index, *name_and_type_index)?)
            }
            RawConstant::NameAndType { name_index, descriptor_index } => {
                Constant::NameAndType(NameAndTypeRef {
                    name: raw_utf8(raw, *name_index)?,
                    descriptor: raw_utf8(raw, *descriptor_index)?,
                })
            }
            RawConstant::MethodHandle { reference_kind, reference_index } => {
                let target = match raw.get(*reference_index as usize - 1) {
                    Some(RawConstant::FieldRef { class_index, name_and_type_index })
                    | Some(RawConstant::MethodRef { class_index, name_and_type_index })
                    | Some(RawConstant::InterfaceMethodRef { class_index, name_and_type_index }) => {
                        raw_member_ref(raw, *class_index, *name_and_type_index)?
                    }
                    other => {
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("MethodHandle reference_index does not name a ref entry (found {:?})", other),
                        ))
                    }
                };
                Constant::MethodHandle { reference_kind: *reference_kind, target }
            }
            RawConstant::MethodType { descriptor_index } => {
                Constant::MethodType(raw_utf8(raw, *descriptor_index)?)
            }
            RawConstant::Dynamic { name_and_type_index, .. } => {
                let nat = raw_name_and_type(raw, *name_and_type_index)?;
                Constant::Dynamic { name: nat.name, descriptor: nat.descriptor }
            }
            RawConstant::InvokeDynamic { name_and_type_index, .. } => {
                let nat = raw_name_and_type(raw, *name_and_type_index)?;
                Constant::InvokeDynamic { name: nat.name, descriptor: nat.descriptor }
            }
            RawConstant::Module { name_index } => Constant::Module(raw_utf8(raw, *name_index)?),
            RawConstant::Package { name_index } => Constant::Package(raw_utf8(raw, *name_index)?),
            RawConstant::Padding => Constant::Padding,
        };
        out.push(resolved);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8_entry(text: &str) -> Vec<u8> {
        let bytes = modified_utf8::encode(text);
        let mut out = vec![RawConstant::TAG_UTF8];
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&bytes);
        out
    }

    #[test]
    fn resolves_class_entry_to_name() {
        // Pool: #1 Utf8 "Main", #2 Class -> #1
        let mut bytes = vec![0x00, 0x03]; // count = 3 (two real entries)
        bytes.extend(utf8_entry("Main"));
        bytes.push(RawConstant::TAG_CLASS);
        bytes.extend_from_slice(&1u16.to_be_bytes());

        let mut cursor = Cursor::new(bytes);
        let pool = ConstantPool::read(ClassVersion::new(52, 0), &mut cursor).unwrap();

        assert_eq!(pool.utf8(1).unwrap(), "Main");
        assert_eq!(pool.class(2).unwrap().name, "Main");
    }

    #[test]
    fn long_entry_consumes_two_indices() {
        // Pool: #1 Long, #2 padding, #3 Utf8 "after"
        let mut bytes = vec![0x00, 0x04]; // count = 4 (three real slots, long eats two)
        bytes.push(RawConstant::TAG_LONG);
        bytes.extend_from_slice(&42i64.to_be_bytes());
        bytes.extend(utf8_entry("after"));

        let mut cursor = Cursor::new(bytes);
        let pool = ConstantPool::read(ClassVersion::new(52, 0), &mut cursor).unwrap();

        match pool.get(1).unwrap() {
            Constant::Long(v) => assert_eq!(*v, 42),
            other => panic!("expected Long, got {:?}", other),
        }
        assert_eq!(pool.utf8(3).unwrap(), "after");
    }

    #[test]
    fn resolves_field_ref_fully() {
        // #1 Utf8 "Main", #2 Class -> #1, #3 Utf8 "value", #4 Utf8 "I",
        // #5 NameAndType -> (#3, #4), #6 FieldRef -> (#2, #5)
        let mut bytes = vec![0x00, 0x07];
        bytes.extend(utf8_entry("Main"));
        bytes.push(RawConstant::TAG_CLASS);
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend(utf8_entry("value"));
        bytes.extend(utf8_entry("I"));
        bytes.push(RawConstant::TAG_NAME_AND_TYPE);
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.push(RawConstant::TAG_FIELD_REF);
        bytes.extend_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(&5u16.to_be_bytes());

        let mut cursor = Cursor::new(bytes);
        let pool = ConstantPool::read(ClassVersion::new(52, 0), &mut cursor).unwrap();

        match pool.get(6).unwrap() {
            Constant::FieldRef(member) => {
                assert_eq!(member.class, "Main");
                assert_eq!(member.name, "value");
                assert_eq!(member.descriptor, "I");
            }
            other => panic!("expected FieldRef, got {:?}", other),
        }
    }
}
