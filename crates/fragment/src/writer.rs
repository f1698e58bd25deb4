//! Serializes an in-memory [`Fragment`] to its on-disk snapshot form.

use byteorder::{LittleEndian, WriteBytesExt};
use schema::DenseCoord;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::format::{coord_tag, write_footer};
use crate::{Fragment, FragmentData, FragmentError};

/// Writes `.tsf` fragment snapshot files.
///
/// The file is written to a `.tmp` sibling first and renamed into
/// place, so a crash mid-write never leaves a half-written fragment
/// under the final name.
pub struct FragmentWriter;

impl FragmentWriter {
    /// Serializes `fragment` to `path`.
    pub fn write<T: DenseCoord>(
        path: impl AsRef<Path>,
        fragment: &Fragment<T>,
    ) -> Result<(), FragmentError> {
        let path = path.as_ref();
        let schema = fragment.schema();
        let dim = schema.dim_num();

        let mut body: Vec<u8> = Vec::new();
        body.write_u8(coord_tag(T::COORD_TYPE))?;
        body.write_u8(u8::from(fragment.dense()))?;
        body.write_u16::<LittleEndian>(dim as u16)?;
        body.write_u16::<LittleEndian>(schema.attribute_num() as u16)?;

        let domain: &[(T, T)] = match &fragment.data {
            FragmentData::Dense { domain, .. } => domain,
            FragmentData::Sparse { .. } => schema.domain(),
        };
        for &(lo, hi) in domain {
            body.write_i64::<LittleEndian>(lo.to_i64())?;
            body.write_i64::<LittleEndian>(hi.to_i64())?;
        }
        for attr in schema.attributes() {
            body.write_u32::<LittleEndian>(attr.cell_size() as u32)?;
        }

        match &fragment.data {
            FragmentData::Dense { attrs, .. } => {
                for buf in attrs {
                    body.write_all(buf)?;
                }
            }
            FragmentData::Sparse { coords, attrs } => {
                body.write_u64::<LittleEndian>((coords.len() / dim) as u64)?;
                for &c in coords {
                    body.write_i64::<LittleEndian>(c.to_i64())?;
                }
                for buf in attrs {
                    body.write_all(buf)?;
                }
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let tmp = path.with_extension("tsf.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&body)?;
            write_footer(&mut file, crc)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), bytes = body.len(), "fragment written");
        Ok(())
    }
}
