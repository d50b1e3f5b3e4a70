//! Big-endian primitive extraction from a class-file byte stream.
//!
//! Class files are specified entirely in big-endian order; this trait keeps
//! every parser in the crate from having to spell out `BigEndian` at each
//! call site.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

pub trait Readable: Sized {
    fn read<T: Read>(buffer: &mut T) -> io::Result<Self>;
}

/// Most repeated structures in the class file are a u16 count followed by
/// that many entries. The constant pool is the notable exception and reads
/// its own count (off by one, with padding slots) rather than using this impl.
impl<T: Readable> Readable for Vec<T> {
    fn read<B: Read>(buffer: &mut B) -> io::Result<Self> {
        let count = u16::read(buffer)?;
        let mut vec = Vec::with_capacity(count as usize);
        for _ in 0..count {
            vec.push(T::read(buffer)?);
        }
        Ok(vec)
    }
}

macro_rules! impl_primitive {
    ($type:ty: $($read:tt)+) => {
        impl Readable for $type {
            fn read<T: Read>(buffer: &mut T) -> io::Result<Self> {
                $($read)+(buffer)
            }
        }
    };
}

impl_primitive!(u8: ReadBytesExt::read_u8);
impl_primitive!(u16: ReadBytesExt::read_u16::<BigEndian>);
impl_primitive!(u32: ReadBytesExt::read_u32::<BigEndian>);
impl_primitive!(u64: ReadBytesExt::read_u64::<BigEndian>);
impl_primitive!(i8: ReadBytesExt::read_i8);
impl_primitive!(i16: ReadBytesExt::read_i16::<BigEndian>);
impl_primitive!(i32: ReadBytesExt::read_i32::<BigEndian>);
impl_primitive!(i64: ReadBytesExt::read_i64::<BigEndian>);
impl_primitive!(f32: ReadBytesExt::read_f32::<BigEndian>);
impl_primitive!(f64: ReadBytesExt::read_f64::<BigEndian>);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_big_endian_u16() {
        let mut cur = Cursor::new(vec![0x01, 0x02]);
        assert_eq!(u16::read(&mut cur).unwrap(), 0x0102);
    }

    #[test]
    fn reads_vec_with_u16_count() {
        let mut cur = Cursor::new(vec![0x00, 0x02, 0xAA, 0xBB]);
        let v: Vec<u8> = Vec::read(&mut cur).unwrap();
        assert_eq!(v, vec![0xAA, 0xBB]);
    }
}
