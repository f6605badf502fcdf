//! The legacy TSV gate loader (component H): a fast-path parser for a fixed
//! 11(+1)-column gate text format, per spec.md §4.7. Representative of the
//! I/O patterns (buffered line reads, digit-only integer scanning, reserved
//! vectors) used by every other format loader in this family; writing this
//! format back out is explicitly unsupported.

use crate::error::{GateError, Result};
use crate::gate::{Dimension, Gate, GatingMethod};
use crate::transform::Transform;
use crate::tree::GateTree;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct FileLogEntry {
    pub category: LogCategory,
    pub message: String,
}

/// Every diagnostic produced while loading a file, retained even when the
/// load ultimately fails (spec.md §7: "the file-log retains detail even when
/// an error is thrown").
#[derive(Debug, Clone, Default)]
pub struct FileLog(pub Vec<FileLogEntry>);

impl FileLog {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "legacy TSV loader");
        self.0.push(FileLogEntry {
            category: LogCategory::Warning,
            message,
        });
    }

    fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "legacy TSV loader error");
        self.0.push(FileLogEntry {
            category: LogCategory::Error,
            message,
        });
    }

    pub fn entries(&self) -> &[FileLogEntry] {
        &self.0
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|e| e.category == LogCategory::Error)
    }
}

/// One parsed row of the TSV grammar, before gates are built and connected.
struct RawRow {
    gate_number: u32,
    x_idx: u32,
    y_idx: u32,
    x_min: u32,
    x_max: u32,
    y_min: u32,
    y_max: u32,
    parent: u32,
    gate_type: u32,
    name: Option<String>,
}

/// Digit-only integer scan: no sign, no fraction, no exponent.
fn scan_uint(field: &[u8]) -> Option<u32> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn split_columns(line: &[u8]) -> Vec<&[u8]> {
    line.split(|&b| b == b'\t').collect()
}

fn parse_row(line: &[u8], row_number: usize, log: &mut FileLog) -> Result<RawRow> {
    let columns = split_columns(line);
    if columns.len() != 11 && columns.len() != 12 {
        let message = format!(
            "row {row_number}: expected 11 or 12 tab-separated columns, found {}",
            columns.len()
        );
        log.error(message.clone());
        return Err(GateError::malformed(message));
    }

    let mut ints = [0u32; 11];
    for (i, field) in columns[..11].iter().enumerate() {
        match scan_uint(field) {
            Some(v) => ints[i] = v,
            None => {
                let message = format!("row {row_number}: column {i} is not a non-negative integer");
                log.error(message.clone());
                return Err(GateError::malformed(message));
            }
        }
    }

    let [gate_number, x_idx, y_idx, x_min, x_max, y_min, y_max, parent, gate_type, debug, multipass] =
        ints;

    if gate_number < 1 {
        let message = format!("row {row_number}: gate number must be >= 1");
        log.error(message.clone());
        return Err(GateError::malformed(message));
    }
    if x_idx < 1 || y_idx < 1 {
        let message = format!("row {row_number}: parameter indices are 1-based and must be >= 1");
        log.error(message.clone());
        return Err(GateError::malformed(message));
    }
    if gate_type == 2 {
        let message = format!(
            "The number {gate_number} gate uses a fan-shaped gate type that is not supported."
        );
        log.error(message.clone());
        return Err(GateError::unsupported_feature(message));
    }
    if gate_type != 0 && gate_type != 1 {
        let message = format!("row {row_number}: unknown gate type {gate_type}");
        log.error(message.clone());
        return Err(GateError::malformed(message));
    }
    if debug != 0 {
        log.warn(format!("row {row_number}: debug-enable flag is ignored"));
    }
    if multipass != 0 {
        log.warn(format!("row {row_number}: multipass-enable flag is ignored"));
    }

    let name = columns
        .get(11)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .filter(|s| !s.is_empty());

    Ok(RawRow {
        gate_number,
        x_idx,
        y_idx,
        x_min,
        x_max,
        y_min,
        y_max,
        parent,
        gate_type,
        name,
    })
}

fn dimension_name(idx: u32, parameter_names: Option<&[String]>) -> String {
    match parameter_names {
        Some(names) => names
            .get((idx - 1) as usize)
            .cloned()
            .unwrap_or_else(|| (idx - 1).to_string()),
        None => (idx - 1).to_string(),
    }
}

fn build_gate(row: &RawRow, parameter_names: Option<&[String]>) -> Result<Gate> {
    let transform = Rc::new(Transform::logicle_default());
    let x_dim = Dimension::new(
        dimension_name(row.x_idx, parameter_names),
        Some(transform.clone()),
    );
    let y_dim = Dimension::new(
        dimension_name(row.y_idx, parameter_names),
        Some(transform),
    );
    let gate = Gate::rectangle(
        vec![x_dim, y_dim],
        vec![
            (row.x_min as f64 / 200.0, row.x_max as f64 / 200.0),
            (row.y_min as f64 / 200.0, row.y_max as f64 / 200.0),
        ],
    )?;
    if let Some(name) = &row.name {
        gate.set_name(name.clone());
    }
    gate.set_gating_method(if row.gate_type == 0 {
        GatingMethod::DafiClusterCentroid
    } else {
        GatingMethod::EventValue
    });
    Ok(gate)
}

/// Loads a legacy TSV gate file. Always returns the accumulated [`FileLog`]
/// alongside the result, so diagnostics survive a thrown error.
pub fn load(path: &Path, parameter_names: Option<&[String]>) -> (FileLog, Result<GateTree>) {
    let mut log = FileLog::default();
    let result = load_inner(path, parameter_names, &mut log);
    (log, result)
}

fn load_inner(
    path: &Path,
    parameter_names: Option<&[String]>,
    log: &mut FileLog,
) -> Result<GateTree> {
    let file = File::open(path)
        .map_err(|e| GateError::system_io(format!("failed to open {}", path.display()), e))?;
    let mut reader = BufReader::new(file);

    // Grow-only line buffer: starts at 500 bytes, doubles via `read_until`'s
    // own reallocation on overflow (spec.md §4.7's performance contract).
    let mut buf: Vec<u8> = Vec::with_capacity(500);
    // Hint-sized for 30 rows x 11 columns.
    let mut rows: Vec<RawRow> = Vec::with_capacity(30);

    log.warn(
        "legacy TSV gate format: dimension names are positional parameter indices unless an explicit name list is supplied",
    );
    if parameter_names.is_none() {
        log.warn("no parameter-name list supplied; dimensions will be named by zero-based parameter index");
    }

    let mut row_number = 0usize;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| GateError::system_io(format!("failed to read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        row_number += 1;
        let mut line: &[u8] = &buf[..n];
        if line.last() == Some(&b'\n') {
            line = &line[..line.len() - 1];
        }
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            continue;
        }
        let row = parse_row(line, row_number, log)?;
        rows.push(row);
    }

    if rows.is_empty() {
        log.error("legacy TSV file is empty");
        return Err(GateError::truncated("legacy TSV file contains no gate rows"));
    }

    let mut seen_numbers = std::collections::HashSet::new();
    let mut gates_by_number: HashMap<u32, Gate> = HashMap::with_capacity(rows.len());
    for row in &rows {
        if !seen_numbers.insert(row.gate_number) {
            let message = format!("duplicate gate number {}", row.gate_number);
            log.error(message.clone());
            return Err(GateError::malformed(message));
        }
        let gate = build_gate(row, parameter_names)?;
        gates_by_number.insert(row.gate_number, gate);
    }

    let tree = GateTree::new();
    for row in &rows {
        let gate = gates_by_number.get(&row.gate_number).expect("just inserted").clone();
        if row.parent == 0 {
            tree.append_tree(gate)?;
        } else {
            let Some(parent) = gates_by_number.get(&row.parent).cloned() else {
                let message = format!(
                    "gate {} references parent gate {}, which does not exist",
                    row.gate_number, row.parent
                );
                log.error(message.clone());
                return Err(GateError::malformed(message));
            };
            parent.append_child(gate)?;
        }
    }

    Ok(tree)
}
