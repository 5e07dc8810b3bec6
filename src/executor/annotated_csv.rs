//! Annotated CSV decoding
//!
//! The store answers Flux queries with annotated CSV. Each table starts with
//! annotation rows, followed by a header row and the records:
//!
//! ```text
//! #datatype,string,long,dateTime:RFC3339,double
//! #group,false,false,false,false
//! #default,_result,,,
//! ,result,table,_time,_value
//! ,,0,2024-01-15T00:00:00Z,21.5
//! ```
//!
//! The first column only carries annotations and is dropped. Empty cells take
//! the `#default` value if one is given, else `Null`.

use super::error::{ExecuteError, ExecuteResult};
use crate::query::{Table, Value};
use chrono::{DateTime, Utc};

/// Column type from a `#datatype` annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    Str,
    Double,
    Long,
    Unsigned,
    Boolean,
    Time,
}

impl DataType {
    fn parse(annotation: &str) -> Self {
        match annotation {
            "double" => Self::Double,
            "long" => Self::Long,
            "unsigned" => Self::Unsigned,
            "boolean" => Self::Boolean,
            t if t.starts_with("dateTime") => Self::Time,
            _ => Self::Str,
        }
    }

    fn decode(self, cell: &str) -> ExecuteResult<Value> {
        if cell.is_empty() {
            return Ok(Value::Null);
        }
        let invalid = |kind: &str| ExecuteError::Decode(format!("invalid {} cell: '{}'", kind, cell));

        Ok(match self {
            Self::Str => Value::Str(cell.to_string()),
            Self::Double => match cell {
                "+Inf" => Value::Float(f64::INFINITY),
                "-Inf" => Value::Float(f64::NEG_INFINITY),
                _ => Value::Float(cell.parse().map_err(|_| invalid("double"))?),
            },
            Self::Long => Value::Int(cell.parse().map_err(|_| invalid("long"))?),
            Self::Unsigned => {
                let v: u64 = cell.parse().map_err(|_| invalid("unsigned"))?;
                i64::try_from(v).map(Value::Int).unwrap_or(Value::Float(v as f64))
            }
            Self::Boolean => Value::Bool(cell.parse().map_err(|_| invalid("boolean"))?),
            Self::Time => Value::Time(
                DateTime::parse_from_rfc3339(cell)
                    .map_err(|_| invalid("dateTime"))?
                    .with_timezone(&Utc),
            ),
        })
    }
}

#[derive(Default)]
struct Annotations {
    types: Vec<DataType>,
    defaults: Vec<String>,
}

struct TableBuilder {
    annotations: Annotations,
    table: Option<Table>,
}

impl TableBuilder {
    fn push(&mut self, cells: Vec<&str>) -> ExecuteResult<()> {
        let Some(table) = self.table.as_mut() else {
            self.table = Some(Table::new(cells));
            return Ok(());
        };

        let mut row = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            let cell = match *cell {
                "" => self.annotations.defaults.get(i).map(String::as_str).unwrap_or(""),
                other => other,
            };
            let kind = self.annotations.types.get(i).copied().unwrap_or(DataType::Str);
            row.push(kind.decode(cell)?);
        }
        table.rows.push(row);
        Ok(())
    }

    fn finish(self) -> ExecuteResult<Option<Table>> {
        let Some(table) = self.table else {
            return Ok(None);
        };
        if let Some(idx) = table.column_index("error") {
            let message = table
                .rows
                .first()
                .and_then(|row| row.get(idx))
                .and_then(|v| match v {
                    Value::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "unknown store error".to_string());
            return Err(ExecuteError::Store {
                status: 200,
                message,
            });
        }
        Ok(Some(table))
    }
}

/// Decode an annotated CSV body into tables
///
/// Consecutive result tables sharing a header are kept as separate tables
/// when their `table` column differs.
pub fn decode(body: &str) -> ExecuteResult<Vec<Table>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut tables = Vec::new();
    let mut current: Option<TableBuilder> = None;
    let mut annotations = Annotations::default();
    let mut in_annotations = false;

    for record in reader.records() {
        let record = record?;
        let Some(first) = record.get(0) else {
            continue;
        };
        if record.iter().all(str::is_empty) {
            continue;
        }
        let cells: Vec<&str> = record.iter().skip(1).collect();

        if first.starts_with('#') {
            if !in_annotations {
                if let Some(builder) = current.take() {
                    tables.extend(builder.finish()?);
                }
                annotations = Annotations::default();
                in_annotations = true;
            }
            match first {
                "#datatype" => annotations.types = cells.iter().map(|c| DataType::parse(c)).collect(),
                "#default" => annotations.defaults = cells.iter().map(|c| c.to_string()).collect(),
                _ => {}
            }
            continue;
        }

        let builder = current.get_or_insert_with(|| TableBuilder {
            annotations: std::mem::take(&mut annotations),
            table: None,
        });
        in_annotations = false;
        builder.push(cells)?;
    }

    if let Some(builder) = current {
        tables.extend(builder.finish()?);
    }

    Ok(split_tables(tables))
}

/// Split a decoded table on changes of its `table` column
fn split_tables(tables: Vec<Table>) -> Vec<Table> {
    let mut rv = Vec::new();
    for table in tables {
        let Some(idx) = table.column_index("table") else {
            rv.push(table);
            continue;
        };

        let mut part = Table::new(table.columns.clone());
        let mut current: Option<Value> = None;
        for row in table.rows {
            let id = row.get(idx).cloned();
            if current.is_some() && id != current {
                let columns = part.columns.clone();
                rv.push(std::mem::replace(&mut part, Table::new(columns)));
            }
            current = id;
            part.rows.push(row);
        }
        rv.push(part);
    }
    rv
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BODY: &str = "#datatype,string,long,dateTime:RFC3339,double,string\r\n\
#group,false,false,false,false,true\r\n\
#default,_result,,,,\r\n\
,result,table,_time,_value,_measurement\r\n\
,,0,2024-01-15T00:00:00Z,21.5,temperature\r\n\
,,0,2024-01-15T00:15:00Z,,temperature\r\n\
,,1,2024-01-15T00:00:00Z,3,power\r\n\
\r\n\
#datatype,string,long,string\r\n\
#group,false,false,true\r\n\
#default,_result,,\r\n\
,result,table,_value\r\n\
,,0,m1\r\n";

    #[test]
    fn test_decode_tables() {
        let tables = decode(BODY).unwrap();
        assert_eq!(tables.len(), 3);

        let first = &tables[0];
        assert_eq!(
            first.columns,
            vec!["result", "table", "_time", "_value", "_measurement"]
        );
        assert_eq!(first.len(), 2);
        assert_eq!(first.rows[0][0], Value::from("_result"));
        assert_eq!(
            first.rows[0][2],
            Value::Time(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(first.rows[0][3], Value::Float(21.5));
        assert_eq!(first.rows[1][3], Value::Null);

        assert_eq!(tables[1].rows[0][4], Value::from("power"));
        assert_eq!(tables[2].column("_value").unwrap(), vec![Value::from("m1")]);
    }

    #[test]
    fn test_decode_empty_body() {
        assert!(decode("").unwrap().is_empty());
        assert!(decode("\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_error_table() {
        let body = "#datatype,string,string\r\n\
#group,true,true\r\n\
#default,,\r\n\
,error,reference\r\n\
,failed to parse query,\r\n";

        match decode(body) {
            Err(ExecuteError::Store { message, .. }) => assert_eq!(message, "failed to parse query"),
            other => panic!("expected store error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_cell() {
        let body = "#datatype,string,long,double\r\n\
,result,table,_value\r\n\
,,0,warm\r\n";
        assert!(matches!(decode(body), Err(ExecuteError::Decode(_))));
    }

    #[test]
    fn test_data_types() {
        assert_eq!(DataType::parse("dateTime:RFC3339Nano"), DataType::Time);
        assert_eq!(DataType::Unsigned.decode("7").unwrap(), Value::Int(7));
        assert_eq!(DataType::Boolean.decode("true").unwrap(), Value::Bool(true));
        assert_eq!(DataType::Double.decode("+Inf").unwrap(), Value::Float(f64::INFINITY));
    }
}
