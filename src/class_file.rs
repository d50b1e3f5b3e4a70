//! The class-file parser (§4.1): turns a big-endian byte stream into a
//! [`ClassFile`], the pre-link representation the loader (§4.2) consumes to
//! build a [`crate::class::Class`] with `Rc`-linked super/interfaces.

use std::io::{self, Cursor};

use crate::attributes::{invalid, Attributes};
use crate::class::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::constant_pool::ConstantPool;
use crate::descriptor::{FieldDescriptor, MethodDescriptor};
use crate::read::Readable;
use crate::version::ClassVersion;

const MAGIC: u32 = 0xCAFE_BABE;

pub struct RawField {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: FieldDescriptor,
    pub attributes: Attributes,
}

pub struct RawMethod {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub attributes: Attributes,
}

pub struct ClassFile {
    pub version: ClassVersion,
    pub access_flags: ClassAccessFlags,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<RawField>,
    pub methods: Vec<RawMethod>,
    pub attributes: Attributes,
    pub constant_pool: ConstantPool,
}

impl ClassFile {
    pub fn parse(bytes: Vec<u8>) -> io::Result<Self> {
        let mut buffer = Cursor::new(bytes);

        let magic = u32::read(&mut buffer)?;
        if magic != MAGIC {
            return Err(invalid(format!(
                "bad magic {:#x}, expected {:#x}",
                magic, MAGIC
            )));
        }

        let version = ClassVersion::read(&mut buffer)?;
        if !version.is_supported() {
            return Err(invalid(format!("unsupported class version {:?}", version)));
        }

        let constant_pool = ConstantPool::read(version, &mut buffer)?;

        let access_flags = ClassAccessFlags::from_bits_truncate(u16::read(&mut buffer)?);

        let this_class_index = u16::read(&mut buffer)?;
        let this_class = constant_pool.class(this_class_index)?.name.clone();

        let super_class_index = u16::read(&mut buffer)?;
        let super_class = if super_class_index == 0 {
            None
        } else {
            Some(constant_pool.class(super_class_index)?.name.clone())
        };

        let interface_count = u16::read(&mut buffer)?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let index = u16::read(&mut buffer)?;
            interfaces.push(constant_pool.class(index)?.name.clone());
        }

        let field_count = u16::read(&mut buffer)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(read_field(&constant_pool, &mut buffer)?);
        }

        let method_count = u16::read(&mut buffer)?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(read_method(&constant_pool, &mut buffer)?);
        }

        let attributes = Attributes::read(&constant_pool, &mut buffer)?;

        Ok(ClassFile {
            version,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
            constant_pool,
        })
    }
}

fn read_field(pool: &ConstantPool, buffer: &mut Cursor<Vec<u8>>) -> io::Result<RawField> {
    let access_flags = FieldAccessFlags::from_bits_truncate(u16::read(buffer)?);
    let name_index = u16::read(buffer)?;
    let descriptor_index = u16::read(buffer)?;
    let name = pool.utf8(name_index)?.to_string();
    let descriptor = FieldDescriptor::parse(pool.utf8(descriptor_index)?)?;
    let attributes = Attributes::read(pool, buffer)?;

    if let Some(constant) = &attributes.constant_value {
        validate_constant_value(constant, &descriptor)?;
    }

    Ok(RawField {
        access_flags,
        name,
        descriptor,
        attributes,
    })
}

fn validate_constant_value(
    constant: &crate::constant_pool::Constant,
    descriptor: &FieldDescriptor,
) -> io::Result<()> {
    use crate::constant_pool::Constant;
    let ok = matches!(
        (constant, descriptor),
        (Constant::Integer(_), FieldDescriptor::Int)
            | (Constant::Integer(_), FieldDescriptor::Short)
            | (Constant::Integer(_), FieldDescriptor::Char)
            | (Constant::Integer(_), FieldDescriptor::Byte)
            | (Constant::Integer(_), FieldDescriptor::Boolean)
            | (Constant::Float(_), FieldDescriptor::Float)
            | (Constant::Long(_), FieldDescriptor::Long)
            | (Constant::Double(_), FieldDescriptor::Double)
            | (Constant::String(_), FieldDescriptor::Object(_))
    );
    if ok {
        Ok(())
    } else {
        Err(invalid(format!(
            "ConstantValue {:?} does not match field descriptor {:?}",
            constant, descriptor
        )))
    }
}

fn read_method(pool: &ConstantPool, buffer: &mut Cursor<Vec<u8>>) -> io::Result<RawMethod> {
    let access_flags = MethodAccessFlags::from_bits_truncate(u16::read(buffer)?);
    let name_index = u16::read(buffer)?;
    let descriptor_index = u16::read(buffer)?;
    let name = pool.utf8(name_index)?.to_string();
    let descriptor = MethodDescriptor::parse(pool.utf8(descriptor_index)?)?;
    let attributes = Attributes::read(pool, buffer)?;

    Ok(RawMethod {
        access_flags,
        name,
        descriptor,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_class_bytes() -> Vec<u8> {
        // A single class: "Main extends java/lang/Object", no fields,
        // methods, or attributes.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes()); // minor
        bytes.extend_from_slice(&52u16.to_be_bytes()); // major

        // constant pool: #1 Utf8 "Main", #2 Class -> #1,
        // #3 Utf8 "java/lang/Object", #4 Class -> #3
        bytes.extend_from_slice(&5u16.to_be_bytes()); // count
        push_utf8(&mut bytes, "Main");
        bytes.push(7);
        bytes.extend_from_slice(&1u16.to_be_bytes());
        push_utf8(&mut bytes, "java/lang/Object");
        bytes.push(7);
        bytes.extend_from_slice(&3u16.to_be_bytes());

        bytes.extend_from_slice(&0x0021u16.to_be_bytes()); // access_flags: PUBLIC|SUPER
        bytes.extend_from_slice(&2u16.to_be_bytes()); // this_class
        bytes.extend_from_slice(&4u16.to_be_bytes()); // super_class
        bytes.extend_from_slice(&0u16.to_be_bytes()); // interfaces
        bytes.extend_from_slice(&0u16.to_be_bytes()); // fields
        bytes.extend_from_slice(&0u16.to_be_bytes()); // methods
        bytes.extend_from_slice(&0u16.to_be_bytes()); // attributes
        bytes
    }

    fn push_utf8(bytes: &mut Vec<u8>, text: &str) {
        bytes.push(1);
        bytes.extend_from_slice(&(text.len() as u16).to_be_bytes());
        bytes.extend_from_slice(text.as_bytes());
    }

    #[test]
    fn parses_minimal_class() {
        let class_file = ClassFile::parse(minimal_class_bytes()).unwrap();
        assert_eq!(class_file.this_class, "Main");
        assert_eq!(class_file.super_class.as_deref(), Some("java/lang/Object"));
        assert!(class_file.fields.is_empty());
        assert!(class_file.methods.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_class_bytes();
        bytes[0] = 0;
        assert!(ClassFile::parse(bytes).is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = minimal_class_bytes();
        // major = 200, way out of the 45..=60 supported range
        bytes[6] = 0;
        bytes[7] = 200;
        assert!(ClassFile::parse(bytes).is_err());
    }
}
