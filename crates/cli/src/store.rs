//! Array directory layout: `schema.tsa` plus `*.tsf` fragment
//! snapshots.
//!
//! The schema catalog file pins everything a reader needs to interpret
//! the fragments: coordinate type, orders, domain, tiling, and the
//! attribute table including fill values. Fragment files sort
//! lexicographically by name; later names are more recent and win
//! cell-level conflicts (write them as `f00000.tsf`, `f00001.tsf`, …).
//!
//! ```text
//! my_array/
//!   schema.tsa     catalog (crc32 + magic "TSA1", little-endian)
//!   f00000.tsf     oldest fragment
//!   f00001.tsf
//!   ...            newest fragment last
//! ```

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fragment::Fragment;
use schema::{ArraySchema, Attribute, CellOrder, CoordType, DenseCoord};

use query::Array;

/// "TSA1"
pub const SCHEMA_MAGIC: u32 = 0x5453_4131;
/// Catalog file name inside an array directory.
pub const SCHEMA_FILE: &str = "schema.tsa";

/// An opened array, dispatched on the schema's coordinate type.
pub enum ArrayHandle {
    I32(Array<i32>),
    I64(Array<i64>),
}

impl ArrayHandle {
    pub fn coord_type(&self) -> CoordType {
        match self {
            ArrayHandle::I32(_) => CoordType::Int32,
            ArrayHandle::I64(_) => CoordType::Int64,
        }
    }

    pub fn fragment_num(&self) -> usize {
        match self {
            ArrayHandle::I32(a) => a.fragment_num(),
            ArrayHandle::I64(a) => a.fragment_num(),
        }
    }
}

fn order_tag(order: CellOrder) -> u8 {
    match order {
        CellOrder::RowMajor => 0,
        CellOrder::ColumnMajor => 1,
    }
}

fn order_from_tag(tag: u8) -> Result<CellOrder> {
    match tag {
        0 => Ok(CellOrder::RowMajor),
        1 => Ok(CellOrder::ColumnMajor),
        other => bail!("bad cell order tag {other}"),
    }
}

fn coord_tag(ty: CoordType) -> u8 {
    match ty {
        CoordType::Int32 => 0,
        CoordType::Int64 => 1,
    }
}

/// Serializes a schema into `dir/schema.tsa`.
pub fn write_schema<T: DenseCoord>(dir: &Path, schema: &ArraySchema<T>) -> Result<()> {
    let mut body: Vec<u8> = Vec::new();
    body.write_u8(coord_tag(T::COORD_TYPE))?;
    body.write_u8(u8::from(schema.dense()))?;
    body.write_u8(order_tag(schema.cell_order()))?;
    body.write_u8(order_tag(schema.tile_order()))?;
    body.write_u16::<LittleEndian>(schema.dim_num() as u16)?;
    body.write_u16::<LittleEndian>(schema.attribute_num() as u16)?;
    body.write_u16::<LittleEndian>(schema.name().len() as u16)?;
    body.write_all(schema.name().as_bytes())?;
    for (i, &(lo, hi)) in schema.domain().iter().enumerate() {
        body.write_i64::<LittleEndian>(lo.to_i64())?;
        body.write_i64::<LittleEndian>(hi.to_i64())?;
        body.write_i64::<LittleEndian>(schema.tile_extents()[i].to_i64())?;
    }
    for attr in schema.attributes() {
        body.write_u16::<LittleEndian>(attr.name().len() as u16)?;
        body.write_all(attr.name().as_bytes())?;
        body.write_u32::<LittleEndian>(attr.cell_size() as u32)?;
        body.write_u8(u8::from(attr.var_size()))?;
        if !attr.var_size() {
            body.write_all(attr.fill())?;
        }
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let path = dir.join(SCHEMA_FILE);
    let tmp = dir.join(format!("{SCHEMA_FILE}.tmp"));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.write_u32::<LittleEndian>(crc)?;
        file.write_u32::<LittleEndian>(SCHEMA_MAGIC)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Reads the coordinate-type tag of a catalog without parsing the rest.
fn peek_coord_type(bytes: &[u8]) -> Result<CoordType> {
    match bytes.first() {
        Some(0) => Ok(CoordType::Int32),
        Some(1) => Ok(CoordType::Int64),
        Some(other) => bail!("unsupported coordinate type tag {other}"),
        None => bail!("empty schema file"),
    }
}

fn checked_body(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 8 {
        bail!("schema file too small");
    }
    let (body, footer) = bytes.split_at(bytes.len() - 8);
    let mut footer = Cursor::new(footer);
    let crc = footer.read_u32::<LittleEndian>()?;
    let magic = footer.read_u32::<LittleEndian>()?;
    if magic != SCHEMA_MAGIC {
        bail!("bad schema magic {magic:#010x}");
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    if hasher.finalize() != crc {
        bail!("schema file failed crc check");
    }
    Ok(body)
}

fn parse_schema<T: DenseCoord>(body: &[u8]) -> Result<ArraySchema<T>> {
    let mut r = Cursor::new(body);
    let tag = r.read_u8()?;
    if tag != coord_tag(T::COORD_TYPE) {
        bail!("coordinate type tag mismatch");
    }
    let dense = r.read_u8()? == 1;
    let cell_order = order_from_tag(r.read_u8()?)?;
    let tile_order = order_from_tag(r.read_u8()?)?;
    let dim = r.read_u16::<LittleEndian>()? as usize;
    let attr_num = r.read_u16::<LittleEndian>()? as usize;
    let name_len = r.read_u16::<LittleEndian>()? as usize;
    let mut name = vec![0u8; name_len];
    r.read_exact(&mut name)?;
    let name = String::from_utf8(name).context("schema name is not utf-8")?;

    let mut domain = Vec::with_capacity(dim);
    let mut extents = Vec::with_capacity(dim);
    for _ in 0..dim {
        let lo = T::from_i64(r.read_i64::<LittleEndian>()?)
            .context("domain coordinate out of type range")?;
        let hi = T::from_i64(r.read_i64::<LittleEndian>()?)
            .context("domain coordinate out of type range")?;
        let extent = T::from_i64(r.read_i64::<LittleEndian>()?)
            .context("tile extent out of type range")?;
        domain.push((lo, hi));
        extents.push(extent);
    }

    let mut attributes = Vec::with_capacity(attr_num);
    for _ in 0..attr_num {
        let name_len = r.read_u16::<LittleEndian>()? as usize;
        let mut aname = vec![0u8; name_len];
        r.read_exact(&mut aname)?;
        let aname = String::from_utf8(aname).context("attribute name is not utf-8")?;
        let cell_size = r.read_u32::<LittleEndian>()? as usize;
        let var = r.read_u8()? == 1;
        if var {
            attributes.push(Attribute::var(aname));
        } else {
            let mut fill = vec![0u8; cell_size];
            r.read_exact(&mut fill)?;
            attributes.push(Attribute::fixed(aname, cell_size).with_fill(fill));
        }
    }

    let schema = if dense {
        ArraySchema::new(name, domain, extents, cell_order, attributes)?
    } else {
        ArraySchema::new_sparse(name, domain, extents, cell_order, attributes)?
    };
    Ok(schema.with_tile_order(tile_order))
}

fn open_typed<T: DenseCoord>(dir: &Path, body: &[u8]) -> Result<Array<T>> {
    let schema = Arc::new(parse_schema::<T>(body)?);

    // lexicographic name order = recency order, newest last
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "tsf").unwrap_or(false))
        .collect();
    paths.sort();

    let mut fragments = Vec::with_capacity(paths.len());
    for path in &paths {
        let fragment = Fragment::open(path, schema.clone())
            .with_context(|| format!("opening fragment {}", path.display()))?;
        fragments.push(fragment);
    }
    tracing::info!(
        array = schema.name(),
        fragments = fragments.len(),
        "array opened"
    );
    Ok(Array::new(schema, fragments)?)
}

/// Opens an array directory, dispatching on the catalog's coordinate
/// type. Only `int32` and `int64` coordinates are readable.
pub fn open_array(dir: &Path) -> Result<ArrayHandle> {
    let bytes = fs::read(dir.join(SCHEMA_FILE))
        .with_context(|| format!("reading {}/{}", dir.display(), SCHEMA_FILE))?;
    let body = checked_body(&bytes)?;
    match peek_coord_type(body)? {
        CoordType::Int32 => Ok(ArrayHandle::I32(open_typed(dir, body)?)),
        CoordType::Int64 => Ok(ArrayHandle::I64(open_typed(dir, body)?)),
    }
}
