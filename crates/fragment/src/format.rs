use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use schema::CoordType;
use std::io::{Cursor, Result as IoResult, Write};

use crate::FragmentError;

/// "TSF1"
pub const FRAGMENT_MAGIC: u32 = 0x5453_4631;
/// crc32 (u32) + magic (u32)
pub const FOOTER_BYTES: usize = 8;

pub(crate) const COORD_TAG_I32: u8 = 0;
pub(crate) const COORD_TAG_I64: u8 = 1;

pub(crate) fn coord_tag(ty: CoordType) -> u8 {
    match ty {
        CoordType::Int32 => COORD_TAG_I32,
        CoordType::Int64 => COORD_TAG_I64,
    }
}

/// Convenience: write footer (crc32 + magic).
pub(crate) fn write_footer<W: Write>(w: &mut W, crc: u32) -> IoResult<()> {
    w.write_u32::<LittleEndian>(crc)?;
    w.write_u32::<LittleEndian>(FRAGMENT_MAGIC)?;
    Ok(())
}

/// Splits a whole-file byte buffer into its body and verifies the
/// footer: magic first, then the CRC32 of the body.
pub(crate) fn checked_body(bytes: &[u8]) -> Result<&[u8], FragmentError> {
    if bytes.len() < FOOTER_BYTES {
        return Err(FragmentError::Corrupt("file too small".into()));
    }
    let (body, footer) = bytes.split_at(bytes.len() - FOOTER_BYTES);
    let mut footer = Cursor::new(footer);
    let crc = footer.read_u32::<LittleEndian>()?;
    let magic = footer.read_u32::<LittleEndian>()?;
    if magic != FRAGMENT_MAGIC {
        return Err(FragmentError::Corrupt(format!(
            "bad magic {magic:#010x}"
        )));
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let actual = hasher.finalize();
    if actual != crc {
        return Err(FragmentError::Corrupt(format!(
            "crc mismatch: stored {crc:#010x}, computed {actual:#010x}"
        )));
    }
    Ok(body)
}
