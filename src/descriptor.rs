//! Field and method descriptor parsing (§3 "Field and method descriptors").

use std::io::{self, Cursor, Error, ErrorKind, Read, Seek, SeekFrom};

use byteorder::ReadBytesExt;

/// The operand-slot width of a value: 1 for everything except `long`/`double`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Category {
    One,
    Two,
}

impl Category {
    pub fn width(self) -> usize {
        match self {
            Category::One => 1,
            Category::Two => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldDescriptor {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<FieldDescriptor>),
}

impl FieldDescriptor {
    pub fn category(&self) -> Category {
        match self {
            FieldDescriptor::Long | FieldDescriptor::Double => Category::Two,
            _ => Category::One,
        }
    }

    /// Element width in bytes for an array whose element type is `self`.
    pub fn element_width(&self) -> usize {
        match self {
            FieldDescriptor::Byte | FieldDescriptor::Boolean => 1,
            FieldDescriptor::Char | FieldDescriptor::Short => 2,
            FieldDescriptor::Int | FieldDescriptor::Float => 4,
            FieldDescriptor::Long | FieldDescriptor::Double => 8,
            FieldDescriptor::Object(_) | FieldDescriptor::Array(_) => std::mem::size_of::<usize>(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldDescriptor::Object(_) | FieldDescriptor::Array(_))
    }

    /// Name of the array class one would `load()` for `[descriptor`.
    pub fn array_class_name(&self) -> String {
        format!("[{}", self.internal_tag())
    }

    /// The descriptor's own textual form (`I`, `[I`, `Ljava/lang/String;`,
    /// ...), also the internal class name for array descriptors.
    pub fn internal_tag(&self) -> String {
        match self {
            FieldDescriptor::Byte => "B".to_string(),
            FieldDescriptor::Char => "C".to_string(),
            FieldDescriptor::Double => "D".to_string(),
            FieldDescriptor::Float => "F".to_string(),
            FieldDescriptor::Int => "I".to_string(),
            FieldDescriptor::Long => "J".to_string(),
            FieldDescriptor::Short => "S".to_string(),
            FieldDescriptor::Boolean => "Z".to_string(),
            FieldDescriptor::Object(name) => format!("L{};", name),
            FieldDescriptor::Array(inner) => format!("[{}", inner.internal_tag()),
        }
    }

    pub fn parse(text: &str) -> io::Result<Self> {
        let mut cursor = Cursor::new(text.as_bytes().to_vec());
        Self::read(&mut cursor)
    }

    pub fn read(buffer: &mut Cursor<Vec<u8>>) -> io::Result<Self> {
        Ok(match buffer.read_u8()? {
            b'B' => FieldDescriptor::Byte,
            b'C' => FieldDescriptor::Char,
            b'D' => FieldDescriptor::Double,
            b'F' => FieldDescriptor::Float,
            b'I' => FieldDescriptor::Int,
            b'J' => FieldDescriptor::Long,
            b'S' => FieldDescriptor::Short,
            b'Z' => FieldDescriptor::Boolean,
            b'[' => FieldDescriptor::Array(Box::new(FieldDescriptor::read(buffer)?)),
            b'L' => {
                let mut name = Vec::new();
                loop {
                    match buffer.read_u8()? {
                        b';' => break,
                        x => name.push(x),
                    }
                }
                FieldDescriptor::Object(
                    String::from_utf8(name).map_err(|e| Error::new(ErrorKind::InvalidData, e))?,
                )
            }
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("malformed field descriptor byte {:#x}", other),
                ))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnDescriptor {
    Void,
    Field(FieldDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldDescriptor>,
    pub return_type: ReturnDescriptor,
}

impl MethodDescriptor {
    pub fn parse(text: &str) -> io::Result<Self> {
        let mut buffer = Cursor::new(text.as_bytes().to_vec());

        if buffer.read_u8()? != b'(' {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "method descriptor must start with '('",
            ));
        }

        let mut parameters = Vec::new();
        loop {
            match buffer.read_u8()? {
                b')' => break,
                _ => {
                    buffer.seek(SeekFrom::Current(-1))?;
                    parameters.push(FieldDescriptor::read(&mut buffer)?);
                }
            }
        }

        let return_type = match buffer.read_u8()? {
            b'V' => ReturnDescriptor::Void,
            _ => {
                buffer.seek(SeekFrom::Current(-1))?;
                ReturnDescriptor::Field(FieldDescriptor::read(&mut buffer)?)
            }
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Number of argument slots (category-2 args occupy two), not counting
    /// an implicit receiver.
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(|p| p.category().width()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitive_field() {
        assert_eq!(FieldDescriptor::parse("I").unwrap(), FieldDescriptor::Int);
        assert_eq!(FieldDescriptor::parse("J").unwrap().category(), Category::Two);
    }

    #[test]
    fn parses_object_and_array() {
        assert_eq!(
            FieldDescriptor::parse("Ljava/lang/String;").unwrap(),
            FieldDescriptor::Object("java/lang/String".to_string())
        );
        assert_eq!(
            FieldDescriptor::parse("[[I").unwrap(),
            FieldDescriptor::Array(Box::new(FieldDescriptor::Array(Box::new(FieldDescriptor::Int))))
        );
    }

    #[test]
    fn parses_method_descriptor() {
        let desc = MethodDescriptor::parse("(ILjava/lang/String;[D)V").unwrap();
        assert_eq!(desc.parameters.len(), 3);
        assert_eq!(desc.return_type, ReturnDescriptor::Void);
        assert_eq!(desc.parameter_slots(), 3);
    }

    #[test]
    fn counts_category_two_slots() {
        let desc = MethodDescriptor::parse("(JD)I").unwrap();
        assert_eq!(desc.parameter_slots(), 4);
    }
}
