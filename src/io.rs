//! CSV readers and writers for the dimension table, users, transactions and
//! pipeline outputs.
//!
//! Readers skip malformed rows and report them; a file that cannot be read at
//! all is a systemic [`PipelineError::Source`]. Writers refuse to replace an
//! existing file unless asked to.

use crate::aggregate::CategorySummary;
use crate::error::{PipelineError, RecordKind};
use crate::join::EnrichedRecord;
use crate::model::{columns, parse_flag, AttributeSchema, IntervalRecord, RawTransaction, UserId};
use crate::temporal::format_day;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Rows parsed from one input, plus the rows that were skipped.
#[derive(Debug, Clone, Default)]
pub struct Loaded<T> {
    pub value: T,
    pub failures: Vec<PipelineError>,
}

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All);
    builder
}

fn source_error(err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Source {
        message: err.to_string(),
    }
}

fn line_of(err: &csv::Error) -> String {
    match err.position() {
        Some(position) => format!("line {}", position.line()),
        None => "unknown line".to_string(),
    }
}

/// Classify a csv error: I/O failures are systemic, anything else is one bad row.
fn classify(err: csv::Error, kind: RecordKind) -> PipelineError {
    if err.is_io_error() {
        return source_error(err);
    }
    let line = line_of(&err);
    PipelineError::malformed(kind, line, "row", "", err)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

/// Parse dimension rows from any reader.
pub fn interval_records_from_reader<R: Read>(
    reader: R,
    schema: &AttributeSchema,
) -> Result<Loaded<Vec<IntervalRecord>>, PipelineError> {
    let mut reader = reader_builder().from_reader(reader);
    let headers = reader.headers().map_err(source_error)?.clone();

    let mut loaded: Loaded<Vec<IntervalRecord>> = Loaded::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                let err = classify(err, RecordKind::Interval);
                if err.is_systemic() {
                    return Err(err);
                }
                warn!(error = %err, "Skipping malformed dimension row");
                loaded.failures.push(err);
                continue;
            }
        };
        let fields: HashMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        match IntervalRecord::from_row(&fields, schema) {
            Ok(record) => loaded.value.push(record),
            Err(err) => {
                warn!(error = %err, "Skipping malformed dimension row");
                loaded.failures.push(err);
            }
        }
    }
    debug!(
        records = loaded.value.len(),
        skipped = loaded.failures.len(),
        "Read dimension rows"
    );
    Ok(loaded)
}

/// Read the dimension table from a file.
pub fn read_interval_records(
    path: &Path,
    schema: &AttributeSchema,
) -> Result<Loaded<Vec<IntervalRecord>>> {
    let loaded = interval_records_from_reader(open(path)?, schema)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(loaded)
}

/// Parse `user_id, is_active` rows from any reader.
pub fn users_from_reader<R: Read>(
    reader: R,
) -> Result<Loaded<HashMap<UserId, bool>>, PipelineError> {
    let mut reader = reader_builder().from_reader(reader);
    let headers = reader.headers().map_err(source_error)?.clone();
    let user_col = headers.iter().position(|name| name == "user_id");
    let active_col = headers.iter().position(|name| name == "is_active");
    let (Some(user_col), Some(active_col)) = (user_col, active_col) else {
        return Err(source_error("users file needs `user_id` and `is_active` columns"));
    };

    let mut loaded: Loaded<HashMap<UserId, bool>> = Loaded::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                let err = classify(err, RecordKind::User);
                if err.is_systemic() {
                    return Err(err);
                }
                loaded.failures.push(err);
                continue;
            }
        };
        let user = row.get(user_col).unwrap_or_default();
        let raw_flag = row.get(active_col).unwrap_or_default();
        if user.is_empty() {
            loaded
                .failures
                .push(PipelineError::malformed(RecordKind::User, "", "user_id", "", "empty value"));
            continue;
        }
        match parse_flag(raw_flag) {
            Some(active) => {
                loaded.value.insert(UserId::from(user), active);
            }
            None => {
                let err = PipelineError::malformed(
                    RecordKind::User,
                    user,
                    "is_active",
                    raw_flag,
                    "expected a boolean",
                );
                warn!(error = %err, "Skipping malformed user row");
                loaded.failures.push(err);
            }
        }
    }
    Ok(loaded)
}

/// Read the users table from a file.
pub fn read_active_users(path: &Path) -> Result<Loaded<HashMap<UserId, bool>>> {
    let loaded = users_from_reader(open(path)?)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(loaded)
}

/// Stream raw transactions from any reader.
///
/// Rows that do not fit the transaction layout come out as `MalformedRecord`;
/// I/O failures come out as `Source`.
pub fn transaction_source<R: Read>(
    reader: R,
) -> impl Iterator<Item = Result<RawTransaction, PipelineError>> {
    reader_builder()
        .from_reader(reader)
        .into_deserialize::<RawTransaction>()
        .map(|row| row.map_err(|err| classify(err, RecordKind::Transaction)))
}

/// Open a transactions file as a stream of raw rows.
pub fn open_transactions(
    path: &Path,
) -> Result<impl Iterator<Item = Result<RawTransaction, PipelineError>>> {
    Ok(transaction_source(open(path)?))
}

/// Create an output file, creating parent directories as needed.
///
/// Fails if the file exists and `overwrite` is false.
pub fn create_output(path: &Path, overwrite: bool) -> Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path).with_context(|| {
        if path.exists() && !overwrite {
            format!("{} already exists; pass --overwrite to replace it", path.display())
        } else {
            format!("failed to create {}", path.display())
        }
    })
}

fn flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Write enriched rows. `window_days` adds the rolling-count column.
pub fn write_enriched<W: Write>(
    writer: W,
    rows: &[EnrichedRecord],
    schema: &AttributeSchema,
    window_days: Option<u32>,
) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header: Vec<String> = [
        "transaction_id",
        "date",
        "user_id",
        "is_blocked",
        "transaction_amount",
        "transaction_category_id",
        "is_active",
        columns::SURROGATE_ID,
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();
    header.extend(schema.names().map(str::to_string));
    if let Some(days) = window_days {
        header.push(format!("transactions_last_{days}_days"));
    }
    out.write_record(&header)?;

    for row in rows {
        let tx = &row.transaction;
        let mut record = vec![
            tx.transaction_id.to_string(),
            format_day(tx.occurred_on),
            tx.user_id.to_string(),
            flag(tx.is_blocked).to_string(),
            tx.amount.to_string(),
            tx.category_id.to_string(),
            flag(row.is_active).to_string(),
            row.matched.map(|sk| sk.0.to_string()).unwrap_or_default(),
        ];
        match &row.attributes {
            Some(attributes) => record.extend(attributes.values().iter().map(ToString::to_string)),
            None => record.extend((0..schema.len()).map(|_| String::new())),
        }
        if window_days.is_some() {
            record.push(
                row.transactions_last_window
                    .map(|count| count.to_string())
                    .unwrap_or_default(),
            );
        }
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Write dimension rows in the input layout, with ends in the schema's stored form.
pub fn write_intervals<'a, W, I>(writer: W, records: I, schema: &AttributeSchema) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a IntervalRecord>,
{
    let mut out = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = vec![
        columns::SURROGATE_ID,
        columns::ENTITY_ID,
        columns::VALID_FROM,
        columns::VALID_TO,
        columns::GROUP_KEY,
    ];
    header.extend(schema.names());
    out.write_record(&header)?;

    for record in records {
        let mut row = vec![
            record.surrogate_id.0.to_string(),
            record.entity_id.to_string(),
            format_day(record.validity.from),
            schema.end_dates.to_stored(record.validity.to).to_string(),
            record.group_key.to_string(),
        ];
        row.extend(record.attributes.values().iter().map(ToString::to_string));
        out.write_record(&row)?;
    }
    out.flush()?;
    Ok(())
}

/// Write the per-category summary.
pub fn write_category_summary<W: Write>(writer: W, summary: &[CategorySummary]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["transaction_category_id", "sum_amount", "num_users"])?;
    for row in summary {
        out.write_record([
            row.category_id.to_string(),
            row.total_amount.to_string(),
            row.distinct_users.to_string(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// Write raw transactions in the input layout.
pub fn write_transactions<'a, W, I>(writer: W, transactions: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a RawTransaction>,
{
    let mut out = csv::Writer::from_writer(writer);
    for transaction in transactions {
        out.serialize(transaction)?;
    }
    out.flush()?;
    Ok(())
}

/// Write `user_id, is_active` rows.
pub fn write_users<'a, W, I>(writer: W, users: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a UserId, bool)>,
{
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["user_id", "is_active"])?;
    for (user, active) in users {
        out.write_record([user.as_str(), flag(active)])?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SurrogateId;
    use crate::temporal::{EndDates, ValidTo};
    use crate::test_support::{agreement_101_chain, day, terms};

    const DIMENSION: &str = "\
sk_agrmnt_id,agrmnt_id,actual_from_dt,actual_to_dt,client_id,product_id,interest_rate
1,101,2015-01-01,2015-02-20,20,305,3.5
2,101,2015-02-21,2015-05-17,20,345,4.0
3,101,2015-05-18,2015-07-05,20,345,4.00
x,101,2015-07-06,2015-08-22,20,539,6.0
5,101,2015-08-23,9999-12-31,20,345,4.0
";

    #[test]
    fn test_read_dimension_skips_malformed_rows() {
        let loaded =
            interval_records_from_reader(DIMENSION.as_bytes(), &AttributeSchema::default()).unwrap();
        assert_eq!(loaded.value.len(), 4);
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(loaded.failures[0].subject().as_deref(), Some("x"));
        assert_eq!(loaded.value[2].attributes, terms(345, "4.0"));
        assert_eq!(loaded.value[0].validity.to, ValidTo::Until(day("2015-02-21")));
        assert!(loaded.value[3].validity.is_open());
    }

    #[test]
    fn test_read_users() {
        let input = "user_id,is_active\n20,False\n25,true\n30,1\n31,maybe\n";
        let loaded = users_from_reader(input.as_bytes()).unwrap();
        assert_eq!(loaded.value.len(), 3);
        assert_eq!(loaded.value.get(&UserId::from("20")), Some(&false));
        assert_eq!(loaded.value.get(&UserId::from("30")), Some(&true));
        assert_eq!(loaded.failures.len(), 1);
    }

    #[test]
    fn test_users_missing_column_is_systemic() {
        let err = users_from_reader("user_id,active\n1,true\n".as_bytes()).unwrap_err();
        assert!(err.is_systemic());
    }

    #[test]
    fn test_transaction_source_with_optional_client() {
        let input = "\
transaction_id,date,user_id,is_blocked,transaction_amount,transaction_category_id,client_id
t1,2020-01-05,u1,False,10.50,3,
t2,2020-01-06,u1,True,1.00,3,20
t3,2020-01-07,u1,False,2.00
";
        let rows: Vec<_> = transaction_source(input.as_bytes()).collect();
        assert_eq!(rows.len(), 3);
        let first = rows[0].clone().unwrap();
        assert_eq!(first.client_id, None);
        let second = rows[1].clone().unwrap().parse().unwrap();
        assert_eq!(second.group_key.as_str(), "20");
        let err = rows[2].clone().unwrap_err();
        assert!(!err.is_systemic());
        assert!(matches!(
            err,
            PipelineError::MalformedRecord {
                kind: RecordKind::Transaction,
                ..
            }
        ));
    }

    #[test]
    fn test_create_output_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        create_output(&path, false).unwrap();
        let err = create_output(&path, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(create_output(&path, true).is_ok());
    }

    #[test]
    fn test_write_intervals_restores_sentinel() {
        let mut buffer = Vec::new();
        write_intervals(&mut buffer, &agreement_101_chain(), &AttributeSchema::default()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "sk_agrmnt_id,agrmnt_id,actual_from_dt,actual_to_dt,client_id,product_id,interest_rate"
        );
        assert_eq!(lines[1], "1,101,2015-01-01,2015-02-20,20,305,3.50");
        assert_eq!(lines[5], "5,101,2015-08-23,9999-12-31,20,345,4.00");
    }

    #[test]
    fn test_write_intervals_in_exclusive_form() {
        let mut buffer = Vec::new();
        let schema = AttributeSchema::default().with_end_dates(EndDates::Exclusive);
        write_intervals(&mut buffer, &agreement_101_chain(), &schema).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text.lines().nth(1),
            Some("1,101,2015-01-01,2015-02-21,20,305,3.50")
        );
    }

    #[test]
    fn test_written_dimension_reads_back() {
        let mut buffer = Vec::new();
        let chain = agreement_101_chain();
        write_intervals(&mut buffer, &chain, &AttributeSchema::default()).unwrap();
        let loaded =
            interval_records_from_reader(buffer.as_slice(), &AttributeSchema::default()).unwrap();
        assert_eq!(loaded.value, chain);
        assert_eq!(loaded.value[0].surrogate_id, SurrogateId(1));
    }

    #[test]
    fn test_write_category_summary() {
        let mut buffer = Vec::new();
        let summary = vec![CategorySummary {
            category_id: 4,
            total_amount: 120,
            distinct_users: 3,
        }];
        write_category_summary(&mut buffer, &summary).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "transaction_category_id,sum_amount,num_users\n4,120,3\n"
        );
    }
}
