//! Statistics tables with an explicit column schema.
//!
//! Each row type declares its ordered, typed columns once. The same schema
//! drives validation on insert and the header of the written file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use itertools::Itertools;

use crate::error::{Result, StatsError};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    IntList,
    FloatList,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    Text(String),
}

impl Cell {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Cell::Int(_) => ColumnKind::Int,
            Cell::Float(_) => ColumnKind::Float,
            Cell::IntList(_) => ColumnKind::IntList,
            Cell::FloatList(_) => ColumnKind::FloatList,
            Cell::Text(_) => ColumnKind::Text,
        }
    }

    fn render(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => format!("{:?}", v),
            Cell::IntList(v) => format!("\"[{}]\"", v.iter().join(", ")),
            Cell::FloatList(v) => format!("\"[{}]\"", v.iter().map(|x| format!("{:?}", x)).join(", ")),
            Cell::Text(v) => {
                if v.contains([',', '"', '\n']) {
                    format!("\"{}\"", v.replace('"', "\"\""))
                } else {
                    v.clone()
                }
            }
        }
    }
}

/// A record that can be stored in a [`StatsTable`].
pub trait TableRow {
    fn columns() -> &'static [Column];
    fn id(&self) -> i64;
    /// One cell per column, in column order.
    fn cells(&self) -> Vec<Cell>;
}

fn check_row(columns: &[Column], cells: &[Cell]) -> Result<()> {
    if columns.len() != cells.len() {
        return Err(StatsError::Schema(format!(
            "expected {} cells, got {}",
            columns.len(),
            cells.len()
        )));
    }
    for (column, cell) in columns.iter().zip(cells) {
        if column.kind != cell.kind() {
            return Err(StatsError::Schema(format!(
                "column {} expects {:?}, got {:?}",
                column.name,
                column.kind,
                cell.kind()
            )));
        }
    }
    Ok(())
}

/// Rows in insertion order, each validated against `R::columns()`.
#[derive(Debug, Clone)]
pub struct StatsTable<R> {
    rows: Vec<R>,
}

impl<R> Default for StatsTable<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R: TableRow> StatsTable<R> {
    pub fn new() -> Result<Self> {
        let columns = R::columns();
        if let Some(dup) = columns.iter().map(|c| c.name).duplicates().next() {
            return Err(StatsError::Schema(format!("duplicate column {}", dup)));
        }
        Ok(Self::default())
    }

    pub fn push(&mut self, row: R) -> Result<()> {
        check_row(R::columns(), &row.cells())?;
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }

    pub fn ids(&self) -> Vec<i64> {
        self.rows.iter().map(TableRow::id).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Comma separated, header first, with a leading unnamed row-index column.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StatsError::io(parent, e))?;
            }
        }
        let file = File::create(path).map_err(|e| StatsError::io(path, e))?;
        let mut writer = BufWriter::new(file);

        let write_all = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
            writeln!(writer, ",{}", R::columns().iter().map(|c| c.name).join(","))?;
            for (i, row) in self.rows.iter().enumerate() {
                writeln!(
                    writer,
                    "{},{}",
                    i,
                    row.cells().iter().map(Cell::render).join(",")
                )?;
            }
            writer.flush()
        };

        write_all(&mut writer).map_err(|e| StatsError::io(path, e))
    }
}

/// `<prefix>_<YYYYmmdd-HHMMSS>.csv`
pub fn timestamped_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, now.format("%Y%m%d-%H%M%S"))
}

pub fn timestamped_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(timestamped_name(prefix, Local::now()))
}

/// Splits one line on commas outside double quotes, unquoting fields.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Looks up the row whose `id` column equals `id` in a written table.
pub fn find_record(path: &Path, id: i64) -> Result<Option<BTreeMap<String, String>>> {
    let file = File::open(path).map_err(|e| StatsError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => split_fields(&line.map_err(|e| StatsError::io(path, e))?),
        None => return Ok(None),
    };
    let id_column = header
        .iter()
        .position(|name| name == "id")
        .ok_or_else(|| StatsError::format(path, "no id column"))?;

    let wanted = id.to_string();
    for line in lines {
        let fields = split_fields(&line.map_err(|e| StatsError::io(path, e))?);
        if fields.get(id_column) == Some(&wanted) {
            let record = header
                .iter()
                .zip(fields)
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, value)| (name.clone(), value))
                .collect();
            return Ok(Some(record));
        }
    }
    Ok(None)
}
