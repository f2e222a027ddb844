use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use heapdb::{
    DataType, Database, DbIterator, DbResult, EngineConfig, Record, TableSchema, Value,
};

#[derive(Debug, Parser)]
#[clap(name = "heapdb", about = "Inspect and edit heap-file tables")]
struct CommandLine {
    /// JSON catalog listing the tables; data files live next to it
    #[clap(long, short)]
    catalog: PathBuf,

    /// JSON engine settings (page_size, pool_pages, lock_timeout_ms)
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tables in the catalog
    Tables,
    /// Print the rows of a table
    Scan {
        table: String,
        #[clap(long)]
        alias: Option<String>,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Insert one row and commit; NULL stands for a missing value
    Insert {
        table: String,
        #[clap(required = true)]
        values: Vec<String>,
    },
}

fn parse_value(text: &str, data_type: &DataType) -> Result<Value, String> {
    if text.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    match data_type {
        DataType::Int => text.parse().map(Value::Int).map_err(|e| format!("{}: {}", text, e)),
        DataType::Float => text
            .parse()
            .map(Value::Float)
            .map_err(|e| format!("{}: {}", text, e)),
        DataType::Char(_) => Ok(Value::String(text.to_string())),
    }
}

fn parse_record(schema: &TableSchema, values: &[String]) -> Result<Record, String> {
    if values.len() != schema.column_count() {
        return Err(format!(
            "expected {} values, got {}",
            schema.column_count(),
            values.len()
        ));
    }
    values
        .iter()
        .zip(schema.columns())
        .map(|(text, col)| parse_value(text, &col.data_type))
        .collect::<Result<Vec<_>, _>>()
        .map(Record::new)
}

fn list_tables(db: &Database) -> DbResult<()> {
    let catalog = db.catalog();
    let mut table = Table::new();
    table.add_row(Row::new(
        ["id", "name", "columns", "primary key", "pages"]
            .iter()
            .map(|h| Cell::new(h))
            .collect(),
    ));
    for id in catalog.table_ids() {
        let file = catalog.heap_file(id)?;
        let columns = file
            .schema()
            .columns()
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(Row::new(vec![
            Cell::new(&id.to_string()),
            Cell::new(&catalog.table_name(id)?),
            Cell::new(&columns),
            Cell::new(catalog.primary_key(id)?.as_deref().unwrap_or("")),
            Cell::new(&file.num_pages()?.to_string()),
        ]));
    }
    table.printstd();
    Ok(())
}

fn scan_table(db: &Database, name: &str, alias: Option<&str>, limit: Option<usize>) -> DbResult<()> {
    let tid = db.begin();
    let table_id = db.catalog().table_id(name)?;
    let mut scan = heapdb::SeqScan::new(db.buffer_pool(), tid, table_id, alias)?;

    let mut table = Table::new();
    table.add_row(Row::new(scan.field_names().iter().map(|f| Cell::new(f)).collect()));

    scan.open()?;
    let mut shown = 0;
    while scan.has_next()? && limit.is_none_or(|limit| shown < limit) {
        let record = scan.next()?;
        table.add_row(Row::new(
            record
                .values()
                .iter()
                .map(|v| Cell::new(&v.to_string()))
                .collect(),
        ));
        shown += 1;
    }
    scan.close()?;
    db.commit(tid)?;

    table.printstd();
    println!("{} row(s)", shown);
    Ok(())
}

fn insert_row(db: &Database, name: &str, values: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let table_id = db.catalog().table_id(name)?;
    let schema = db.catalog().schema(table_id)?;
    let mut record = parse_record(&schema, values)?;

    let tid = db.begin();
    match db.insert(tid, name, &mut record) {
        Ok(rid) => {
            db.commit(tid)?;
            println!("inserted at {}", rid);
            Ok(())
        }
        Err(e) => {
            db.abort(tid)?;
            Err(e.into())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = CommandLine::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let db = Database::open_catalog(config, &args.catalog)?;

    match &args.command {
        Command::Tables => list_tables(&db)?,
        Command::Scan {
            table,
            alias,
            limit,
        } => scan_table(&db, table, alias.as_deref(), *limit)?,
        Command::Insert { table, values } => insert_row(&db, table, values)?,
    }

    db.flush()?;
    Ok(())
}
