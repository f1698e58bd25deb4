//! # CLI — Tessera interactive shell
//!
//! A REPL for querying Tessera arrays. Reads commands from stdin,
//! executes them against an opened array directory, and prints cells
//! to stdout. Designed for both interactive use and scripted testing
//! (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! OPEN dir            Open an array directory (schema.tsa + *.tsf)
//! QUERY lo:hi,lo:hi   Read a sub-rectangle, one range per dimension
//! SCHEMA              Print the opened array's schema
//! STATS               Print fragment statistics
//! HELP                Show this list
//! EXIT / QUIT         Shut down
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! TESSERA_ARRAY       Array directory to open at startup  (optional)
//! TESSERA_BUFFER_KB   Read buffer per attribute in KiB    (default: 256)
//! TESSERA_LOG         tracing filter for stderr logs      (default: "warn")
//! ```
//!
//! Attribute values print as signed little-endian integers when the
//! cell size is 4 or 8 bytes, as hex otherwise.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use query::{Array, ReadStatus};
use schema::{ArraySchema, DenseCoord};
use tracing_subscriber::EnvFilter;

use cli::store::{open_array, ArrayHandle};

/// Reads a configuration value from the environment, falling back to
/// `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("TESSERA_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let buffer_kb: usize = env_or("TESSERA_BUFFER_KB", "256").parse().unwrap_or(256);
    let mut open: Option<ArrayHandle> = None;
    if let Ok(dir) = std::env::var("TESSERA_ARRAY") {
        let handle = open_array(Path::new(&dir))?;
        println!(
            "opened {} ({} fragments, {} coords)",
            dir,
            handle.fragment_num(),
            handle.coord_type()
        );
        open = Some(handle);
    }
    println!("tessera shell started (buffer={buffer_kb}KiB)");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let arg = parts.next();

        let outcome = match command.to_ascii_uppercase().as_str() {
            "OPEN" => cmd_open(&mut open, arg),
            "QUERY" => cmd_query(open.as_mut(), arg, buffer_kb),
            "SCHEMA" => cmd_schema(open.as_ref()),
            "STATS" => cmd_stats(open.as_ref()),
            "HELP" => {
                println!("OPEN dir | QUERY lo:hi,lo:hi | SCHEMA | STATS | HELP | EXIT");
                Ok(())
            }
            "EXIT" | "QUIT" => {
                println!("bye");
                break;
            }
            other => {
                println!("unknown command: {other} (try HELP)");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("error: {e:#}");
        }
    }
    Ok(())
}

fn cmd_open(open: &mut Option<ArrayHandle>, arg: Option<&str>) -> Result<()> {
    let Some(dir) = arg else {
        bail!("usage: OPEN <dir>");
    };
    let handle = open_array(Path::new(dir))?;
    println!(
        "opened {} ({} fragments, {} coords)",
        dir,
        handle.fragment_num(),
        handle.coord_type()
    );
    *open = Some(handle);
    Ok(())
}

fn cmd_query(open: Option<&mut ArrayHandle>, arg: Option<&str>, buffer_kb: usize) -> Result<()> {
    let Some(handle) = open else {
        bail!("no array open (use OPEN <dir>)");
    };
    let Some(spec) = arg else {
        bail!("usage: QUERY lo:hi[,lo:hi...]");
    };
    match handle {
        ArrayHandle::I32(array) => run_query(array, spec, buffer_kb),
        ArrayHandle::I64(array) => run_query(array, spec, buffer_kb),
    }
}

fn cmd_schema(open: Option<&ArrayHandle>) -> Result<()> {
    let Some(handle) = open else {
        bail!("no array open (use OPEN <dir>)");
    };
    match handle {
        ArrayHandle::I32(array) => print_schema(array.schema()),
        ArrayHandle::I64(array) => print_schema(array.schema()),
    }
    Ok(())
}

fn print_schema<T: DenseCoord>(schema: &ArraySchema<T>) {
    println!(
        "array {:?}: {} array, {} coords, {:?} cell order",
        schema.name(),
        if schema.dense() { "dense" } else { "sparse" },
        T::COORD_TYPE,
        schema.cell_order(),
    );
    for (i, &(lo, hi)) in schema.domain().iter().enumerate() {
        println!(
            "  dim {i}: [{lo}, {hi}] tile extent {}",
            schema.tile_extents()[i]
        );
    }
    for attr in schema.attributes() {
        println!(
            "  attr {:?}: {} ({} B/cell)",
            attr.name(),
            if attr.var_size() { "var" } else { "fixed" },
            attr.cell_size(),
        );
    }
}

fn cmd_stats(open: Option<&ArrayHandle>) -> Result<()> {
    let Some(handle) = open else {
        bail!("no array open (use OPEN <dir>)");
    };
    match handle {
        ArrayHandle::I32(array) => print_stats(array),
        ArrayHandle::I64(array) => print_stats(array),
    }
    Ok(())
}

fn print_stats<T: DenseCoord>(array: &Array<T>) {
    println!("{} fragments", array.fragment_num());
    for (i, f) in array.fragments().iter().enumerate() {
        println!(
            "  fragment {i}: {} ({} cells)",
            if f.dense() { "dense" } else { "sparse" },
            f.cell_count(),
        );
    }
}

/// Parses `lo:hi,lo:hi,...`, one inclusive range per dimension.
fn parse_ranges<T: DenseCoord>(spec: &str, dim_num: usize) -> Result<Vec<(T, T)>> {
    let mut out = Vec::new();
    for part in spec.split(',') {
        let (lo, hi) = part
            .split_once(':')
            .with_context(|| format!("bad range {part:?}, expected lo:hi"))?;
        let lo: i64 = lo.trim().parse().with_context(|| format!("bad bound {lo:?}"))?;
        let hi: i64 = hi.trim().parse().with_context(|| format!("bad bound {hi:?}"))?;
        let lo = T::from_i64(lo).context("bound out of coordinate range")?;
        let hi = T::from_i64(hi).context("bound out of coordinate range")?;
        out.push((lo, hi));
    }
    if out.len() != dim_num {
        bail!("expected {dim_num} ranges, got {}", out.len());
    }
    Ok(out)
}

/// Streams a query and prints one line per cell: coordinates followed
/// by every fixed-size attribute.
fn run_query<T: DenseCoord>(array: &mut Array<T>, spec: &str, buffer_kb: usize) -> Result<()> {
    let schema = array.schema().clone();
    let range = parse_ranges::<T>(spec, schema.dim_num())?;

    let mut ids: Vec<usize> = schema
        .attributes()
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.var_size())
        .map(|(i, _)| i)
        .collect();
    let names: Vec<String> = ids
        .iter()
        .map(|&i| schema.attributes()[i].name().to_string())
        .collect();
    ids.push(schema.coords_attribute_id());

    // size every buffer to the same cell count so all attributes pause
    // on the same cell
    let max_cell = ids
        .iter()
        .map(|&id| schema.cell_size_of(id))
        .max()
        .unwrap_or(1);
    let cells_per_chunk = (buffer_kb * 1024 / max_cell).max(1);
    let mut bufs: Vec<Vec<u8>> = ids
        .iter()
        .map(|&id| vec![0u8; cells_per_chunk * schema.cell_size_of(id)])
        .collect();

    let mut state = array.read_state(&range, &ids)?;
    let coords_size = schema.coords_size();
    let coord_size = std::mem::size_of::<T>();
    let dim = schema.dim_num();
    let mut total = 0u64;
    loop {
        let mut sizes = vec![0usize; ids.len()];
        let mut refs: Vec<&mut [u8]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        let status = state.read(&mut refs, &mut sizes)?;
        drop(refs);

        let cells = sizes[ids.len() - 1] / coords_size;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for k in 0..cells {
            let coord_bytes = &bufs[ids.len() - 1][k * coords_size..(k + 1) * coords_size];
            write!(out, "(")?;
            for d in 0..dim {
                if d > 0 {
                    write!(out, ",")?;
                }
                let c = T::read_le(&coord_bytes[d * coord_size..(d + 1) * coord_size]);
                write!(out, "{c}")?;
            }
            write!(out, ")")?;
            for (slot, name) in names.iter().enumerate() {
                let size = schema.cell_size_of(ids[slot]);
                let bytes = &bufs[slot][k * size..(k + 1) * size];
                write!(out, " {name}={}", format_value(bytes))?;
            }
            writeln!(out)?;
        }
        drop(out);
        total += cells as u64;

        if status == ReadStatus::Done {
            break;
        }
    }
    println!("({total} cells)");
    Ok(())
}

fn format_value(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => i32::from_le_bytes(bytes.try_into().unwrap()).to_string(),
        8 => i64::from_le_bytes(bytes.try_into().unwrap()).to_string(),
        _ => {
            let mut s = String::from("0x");
            for b in bytes {
                s.push_str(&format!("{b:02x}"));
            }
            s
        }
    }
}
