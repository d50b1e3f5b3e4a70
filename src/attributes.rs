//! Attribute parsing (§4.1). Attributes the core materially interprets get
//! their own struct; everything else is consumed by length and dropped,
//! exactly as `StackMapTable` is here.

use std::io::{self, Cursor, Error, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::constant_pool::{Constant, ConstantPool};
use crate::read::Readable;

#[derive(Debug, Clone, Copy)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 means catch-all.
    pub catch_type_index: u16,
}

impl Readable for ExceptionTableEntry {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        Ok(ExceptionTableEntry {
            start_pc: u16::read(buffer)?,
            end_pc: u16::read(buffer)?,
            handler_pc: u16::read(buffer)?,
            catch_type_index: u16::read(buffer)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

impl Readable for LineNumberEntry {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
        Ok(LineNumberEntry {
            start_pc: u16::read(buffer)?,
            line_number: u16::read(buffer)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub line_number_table: Vec<LineNumberEntry>,
}

impl CodeAttribute {
    /// The handler for `pc`, in exception-table order (§4.8 "first matching
    /// entry wins").
    pub fn line_for_pc(&self, pc: usize) -> Option<u16> {
        self.line_number_table
            .iter()
            .filter(|e| e.start_pc as usize <= pc)
            .max_by_key(|e| e.start_pc)
            .map(|e| e.line_number)
    }

    fn read(pool: &ConstantPool, buffer: &mut Cursor<Vec<u8>>) -> io::Result<Self> {
        let max_stack = u16::read(buffer)?;
        let max_locals = u16::read(buffer)?;

        let code_length = u32::read(buffer)?;
        let mut code = vec![0u8; code_length as usize];
        buffer.read_exact(&mut code)?;

        let exception_table: Vec<ExceptionTableEntry> = Vec::read(buffer)?;

        let mut line_number_table = Vec::new();
        let attribute_count = u16::read(buffer)?;
        for _ in 0..attribute_count {
            let name_index = u16::read(buffer)?;
            let name = pool.utf8(name_index)?.to_string();
            let length = u32::read(buffer)?;
            let mut payload = vec![0u8; length as usize];
            buffer.read_exact(&mut payload)?;

            if name == "LineNumberTable" {
                let mut cursor = Cursor::new(payload);
                let entries: Vec<LineNumberEntry> = Vec::read(&mut cursor)?;
                line_number_table.extend(entries);
            }
            // Nested attributes other than LineNumberTable (StackMapTable,
            // LocalVariableTable, ...) are skipped by length.
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            line_number_table,
        })
    }
}

/// A `BootstrapMethods` entry: a method handle plus its static arguments,
/// both as constant-pool indices (invokedynamic is otherwise unused by the
/// interpreter, §1 scope, but the table is still parsed so a `Dynamic`
/// constant can be inspected if ever needed).
#[derive(Debug, Clone)]
pub struct BootstrapMethod {
    pub method_ref_index: u16,
    pub arguments: Vec<u16>,
}

/// The subset of per-class/per-member attributes the parser materially
/// interprets (§4.1). Fields are `None`/empty when the attribute was absent.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    pub constant_value: Option<Constant>,
    pub code: Option<CodeAttribute>,
    pub exceptions: Vec<String>,
    pub source_file: Option<String>,
    pub source_debug_extension: Option<Vec<u8>>,
    pub bootstrap_methods: Vec<BootstrapMethod>,
    pub method_parameters: Vec<String>,
    pub module_main_class: Option<String>,
    pub nest_host: Option<String>,
    pub nest_members: Vec<String>,
    pub signature: Option<String>,
    pub deprecated: bool,
}

impl Attributes {
    pub fn read(pool: &ConstantPool, buffer: &mut Cursor<Vec<u8>>) -> io::Result<Self> {
        let mut out = Attributes::default();
        let count = u16::read(buffer)?;

        for _ in 0..count {
            let name_index = u16::read(buffer)?;
            let name = pool.utf8(name_index)?.to_string();
            let length = u32::read(buffer)?;
            let mut payload = vec![0u8; length as usize];
            buffer.read_exact(&mut payload)?;
            let mut cursor = Cursor::new(payload);

            match name.as_str() {
                "ConstantValue" => {
                    let index = u16::read(&mut cursor)?;
                    out.constant_value = Some(pool.get(index)?.clone());
                }
                "Code" => {
                    out.code = Some(CodeAttribute::read(pool, &mut cursor)?);
                }
                "Exceptions" => {
                    let indices: Vec<u16> = Vec::read(&mut cursor)?;
                    for index in indices {
                        out.exceptions.push(pool.class(index)?.name.clone());
                    }
                }
                "SourceFile" => {
                    let index = u16::read(&mut cursor)?;
                    out.source_file = Some(pool.utf8(index)?.to_string());
                }
                "SourceDebugExtension" => {
                    out.source_debug_extension = Some(cursor.into_inner());
                }
                "BootstrapMethods" => {
                    let count = u16::read(&mut cursor)?;
                    for _ in 0..count {
                        let method_ref_index = u16::read(&mut cursor)?;
                        let arguments: Vec<u16> = Vec::read(&mut cursor)?;
                        out.bootstrap_methods.push(BootstrapMethod {
                            method_ref_index,
                            arguments,
                        });
                    }
                }
                "MethodParameters" => {
                    let count = cursor.read_u8()?;
                    for _ in 0..count {
                        let name_index = u16::read(&mut cursor)?;
                        let _access_flags = u16::read(&mut cursor)?;
                        let name = if name_index == 0 {
                            String::new()
                        } else {
                            pool.utf8(name_index)?.to_string()
                        };
                        out.method_parameters.push(name);
                    }
                }
                "ModuleMainClass" => {
                    let index = u16::read(&mut cursor)?;
                    out.module_main_class = Some(pool.class(index)?.name.clone());
                }
                "NestHost" => {
                    let index = u16::read(&mut cursor)?;
                    out.nest_host = Some(pool.class(index)?.name.clone());
                }
                "NestMembers" => {
                    let indices: Vec<u16> = Vec::read(&mut cursor)?;
                    for index in indices {
                        out.nest_members.push(pool.class(index)?.name.clone());
                    }
                }
                "Signature" => {
                    let index = u16::read(&mut cursor)?;
                    out.signature = Some(pool.utf8(index)?.to_string());
                }
                "Deprecated" => {
                    out.deprecated = true;
                }
                // StackMapTable and any other unrecognized attribute: already
                // consumed by `attribute_length` above, nothing further to do.
                _ => {}
            }
        }

        Ok(out)
    }
}

pub fn invalid(message: impl Into<String>) -> io::Error {
    Error::new(ErrorKind::InvalidData, message.into())
}
