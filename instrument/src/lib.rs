//! Collects simulation data events into column tables for analysis in tests.
//!
//! The economy emits structured events under a handful of tracing targets
//! (see [`tables`]). [`DataFrameSubscriber`] turns each target into a table
//! whose columns appear as fields are first seen; everything else (plain
//! operational logs) is ignored.
//!
//! ```ignore
//! instrument::install_subscriber();
//! city.step();
//! let recorder = instrument::drain();
//! let prices = recorder.table(instrument::tables::TRADE).unwrap().f64s("price");
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

/// Targets the economy emits data events under.
pub mod tables {
    /// One row per completed trade: tick, city, good, price, buyer, seller.
    pub const TRADE: &str = "trade";
    /// One row per merchant crossing a link: tick, city, remote, direction,
    /// good, money, owned.
    pub const MIGRATION: &str = "migration";
    /// One row per taxed arrival: tick, city, amount, share, locals.
    pub const TAX: &str = "tax";
    /// One row per city, tick, and tradable good: belief spread and volume.
    pub const GOOD_STATS: &str = "good_stats";

    pub const ALL: [&str; 4] = [TRADE, MIGRATION, TAX, GOOD_STATS];
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        match self {
            TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }
}

/// Columns built up from events sharing one target. A row missing a field
/// holds the column type's zero value.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: HashMap<String, TypedColumn>,
    pub row_count: usize,
}

impl DynamicTable {
    fn pad_columns(&mut self) {
        for col in self.columns.values_mut() {
            col.pad_to(self.row_count);
        }
    }

    pub fn u64s(&self, name: &str) -> Option<&[u64]> {
        match self.columns.get(name)? {
            TypedColumn::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn f64s(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            TypedColumn::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn strs(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name)? {
            TypedColumn::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Row indices where string column `name` equals `value`.
    pub fn rows_where(&self, name: &str, value: &str) -> Vec<usize> {
        self.strs(name)
            .map(|col| {
                col.iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == value)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut names: Vec<&String> = self.columns.keys().collect();
        names.sort();
        let columns = names
            .into_iter()
            .map(|name| match &self.columns[name] {
                TypedColumn::U64(v) => Column::new(name.into(), v),
                TypedColumn::I64(v) => Column::new(name.into(), v),
                TypedColumn::F64(v) => Column::new(name.into(), v),
                TypedColumn::Bool(v) => Column::new(name.into(), v),
                TypedColumn::Str(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

/// Tables keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

impl Recorder {
    pub fn table(&self, target: &str) -> Option<&DynamicTable> {
        self.tables.get(target)
    }

    /// Rows recorded under `target`, zero if none.
    pub fn rows(&self, target: &str) -> usize {
        self.table(target).map_or(0, |t| t.row_count)
    }

    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

// ============================================================================
// Subscriber
// ============================================================================

struct ColumnVisitor<'a> {
    table: &'a mut DynamicTable,
}

impl ColumnVisitor<'_> {
    fn column(&mut self, field: &Field, empty: impl FnOnce(usize) -> TypedColumn) -> &mut TypedColumn {
        let rows = self.table.row_count;
        self.table
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| empty(rows))
    }
}

impl Visit for ColumnVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if let TypedColumn::U64(v) = self.column(field, |n| TypedColumn::U64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let TypedColumn::I64(v) = self.column(field, |n| TypedColumn::I64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let TypedColumn::F64(v) = self.column(field, |n| TypedColumn::F64(vec![0.0; n])) {
            v.push(value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let TypedColumn::Bool(v) = self.column(field, |n| TypedColumn::Bool(vec![false; n])) {
            v.push(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let TypedColumn::Str(v) =
            self.column(field, |n| TypedColumn::Str(vec![String::new(); n]))
        {
            v.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Records info-level events whose target is one of `targets` into the
/// calling thread's recorder.
pub struct DataFrameSubscriber {
    targets: Vec<&'static str>,
}

impl Default for DataFrameSubscriber {
    fn default() -> Self {
        Self {
            targets: tables::ALL.to_vec(),
        }
    }
}

impl DataFrameSubscriber {
    pub fn with_targets(targets: &[&'static str]) -> Self {
        Self {
            targets: targets.to_vec(),
        }
    }
}

impl Subscriber for DataFrameSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event()
            && *metadata.level() <= tracing::Level::INFO
            && self.targets.iter().any(|t| *t == metadata.target())
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target).or_default();
            event.record(&mut ColumnVisitor { table: &mut *table });
            table.row_count += 1;
            table.pad_columns();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install [`DataFrameSubscriber`] as the global default. Later calls are
/// no-ops.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(DataFrameSubscriber::default());
}

/// Take everything recorded on this thread so far.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

// ============================================================================
// Parquet export
// ============================================================================

/// Write each table to `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    let io = |e: std::io::Error| PolarsError::IO {
        error: e.into(),
        msg: None,
    };
    std::fs::create_dir_all(dir).map_err(io)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Clears the recorder when created and, on drop, writes whatever was
/// recorded to `{parent}/{name}_{unix_seconds}/` as parquet plus a `_ready`
/// marker.
pub struct ScopedRecorder {
    run_dir: PathBuf,
    recorder: Option<Recorder>,
}

impl ScopedRecorder {
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        clear();
        install_subscriber();
        Self {
            run_dir: parent.into().join(format!("{name}_{secs}")),
            recorder: None,
        }
    }

    /// Recorded tables. The first call drains the thread's recorder.
    pub fn get(&mut self) -> &Recorder {
        self.recorder.get_or_insert_with(drain)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let recorder = self.recorder.take().unwrap_or_else(drain);
        let mut dfs = recorder.to_dataframes();
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedRecorder: failed to write {}: {e}", self.run_dir.display());
            return;
        }
        if let Err(e) = std::fs::File::create(self.run_dir.join("_ready")) {
            eprintln!("ScopedRecorder: failed to write _ready marker: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;

    #[test]
    fn records_only_data_targets() {
        clear();
        with_default(DataFrameSubscriber::default(), || {
            tracing::info!(target: "trade", tick = 1u64, good = "wood", price = 5.5f64);
            tracing::info!(target: "trade", tick = 2u64, good = "chair", price = 40.0f64);
            tracing::info!(city = "riverwood", "link established");
            tracing::debug!(target: "trade", tick = 3u64, price = 1.0f64);
        });

        let recorder = drain();
        assert_eq!(recorder.tables.len(), 1);
        assert_eq!(recorder.rows(tables::TRADE), 2);
        let trades = recorder.table(tables::TRADE).unwrap();
        assert_eq!(trades.u64s("tick"), Some(&[1, 2][..]));
        assert_eq!(trades.f64s("price"), Some(&[5.5, 40.0][..]));
        assert_eq!(trades.rows_where("good", "chair"), vec![1]);
    }

    #[test]
    fn missing_fields_are_padded() {
        clear();
        with_default(DataFrameSubscriber::default(), || {
            tracing::info!(target: "migration", tick = 1u64, direction = "departure");
            tracing::info!(target: "migration", tick = 2u64, money = 950.0f64);
        });

        let recorder = drain();
        let table = recorder.table(tables::MIGRATION).unwrap();
        assert_eq!(table.row_count, 2);
        assert_eq!(table.strs("direction").unwrap(), &["departure".to_string(), String::new()]);
        assert_eq!(table.f64s("money"), Some(&[0.0, 950.0][..]));
    }

    #[test]
    fn custom_targets() {
        clear();
        with_default(DataFrameSubscriber::with_targets(&["tax"]), || {
            tracing::info!(target: "tax", amount = 50.0f64);
            tracing::info!(target: "trade", price = 1.0f64);
        });
        let recorder = drain();
        assert_eq!(recorder.rows(tables::TAX), 1);
        assert_eq!(recorder.rows(tables::TRADE), 0);
    }

    #[test]
    fn converts_to_dataframe() {
        let mut table = DynamicTable::default();
        table.columns.insert("tick".into(), TypedColumn::U64(vec![1, 2]));
        table.columns.insert("good".into(), TypedColumn::Str(vec!["wood".into(), "bed".into()]));
        table.row_count = 2;
        let df = table.to_dataframe().unwrap();
        assert_eq!(df.shape(), (2, 2));
    }
}
