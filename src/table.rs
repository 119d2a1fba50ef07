use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ImporterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Long,
    Double,
    Bool,
    String,
}

impl ColumnType {
    /// Type code understood by `omero metadata populate` header lines.
    pub fn header_code(self) -> &'static str {
        match self {
            ColumnType::Long => "l",
            ColumnType::Double => "d",
            ColumnType::Bool => "b",
            ColumnType::String => "s",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl CellValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            CellValue::Long(_) => ColumnType::Long,
            CellValue::Double(_) => ColumnType::Double,
            CellValue::Bool(_) => ColumnType::Bool,
            CellValue::Str(_) => ColumnType::String,
        }
    }

    fn from_json(value: &Value) -> Result<Self, ImporterError> {
        match value {
            Value::Bool(flag) => Ok(CellValue::Bool(*flag)),
            Value::String(text) => Ok(CellValue::Str(text.clone())),
            Value::Number(number) => {
                if let Some(long) = number.as_i64() {
                    Ok(CellValue::Long(long))
                } else if let Some(double) = number.as_f64() {
                    Ok(CellValue::Double(double))
                } else {
                    Err(ImporterError::InvalidTable(format!(
                        "number out of range: {number}"
                    )))
                }
            }
            other => Err(ImporterError::InvalidTable(format!(
                "unsupported cell value: {other}"
            ))),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Long(value) => write!(f, "{value}"),
            CellValue::Double(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            CellValue::Double(value) => write!(f, "{value}"),
            CellValue::Bool(value) => write!(f, "{value}"),
            CellValue::Str(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub values: Vec<CellValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableData {
    pub columns: Vec<TableColumn>,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl TableData {
    /// Builds a table from column-major data. Each column's type is the type of its
    /// first value; later values are kept as given.
    pub fn new(names: Vec<String>, data: Vec<Vec<CellValue>>) -> Result<Self, ImporterError> {
        if names.is_empty() {
            return Err(ImporterError::InvalidTable("no columns".to_string()));
        }
        if names.len() != data.len() {
            return Err(ImporterError::InvalidTable(format!(
                "{} column names for {} columns of data",
                names.len(),
                data.len()
            )));
        }

        let columns = names
            .into_iter()
            .zip(data)
            .map(|(name, values)| {
                let column_type = values
                    .first()
                    .map(CellValue::column_type)
                    .ok_or_else(|| ImporterError::InvalidTable(format!("column {name} is empty")))?;
                Ok(TableColumn {
                    name,
                    column_type,
                    values,
                })
            })
            .collect::<Result<Vec<_>, ImporterError>>()?;

        Ok(Self { columns })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ImporterError> {
        let file: TableFile = serde_json::from_str(content)
            .map_err(|err| ImporterError::InvalidTable(err.to_string()))?;
        let data = file
            .data
            .iter()
            .map(|column| {
                column
                    .iter()
                    .map(CellValue::from_json)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(file.columns, data)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ImporterError> {
        let content = fs::read_to_string(path)
            .map_err(|err| ImporterError::Filesystem(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&content)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// Length of the longest column.
    pub fn row_count(&self) -> usize {
        self.columns
            .iter()
            .map(|column| column.values.len())
            .max()
            .unwrap_or(0)
    }

    /// Columns holding values whose type differs from the inferred column type.
    pub fn heterogeneous_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| {
                column
                    .values
                    .iter()
                    .any(|value| value.column_type() != column.column_type)
            })
            .map(|column| column.name.as_str())
            .collect()
    }

    /// Plain export: cells are written as displayed, without quoting.
    pub fn to_csv(&self) -> String {
        let mut out = self.column_names().join(",");
        out.push('\n');
        self.push_rows(&mut out, false);
        out
    }

    /// CSV with the `# header` type line expected by `omero metadata populate`.
    pub fn to_populate_csv(&self) -> String {
        let codes = self
            .columns
            .iter()
            .map(|column| column.column_type.header_code())
            .collect::<Vec<_>>()
            .join(",");
        let mut out = format!("# header {codes}\n");
        let names = self
            .column_names()
            .into_iter()
            .map(quote_field)
            .collect::<Vec<_>>();
        out.push_str(&names.join(","));
        out.push('\n');
        self.push_rows(&mut out, true);
        out
    }

    fn push_rows(&self, out: &mut String, quoted: bool) {
        for row in 0..self.row_count() {
            let cells = self
                .columns
                .iter()
                .map(|column| {
                    column
                        .values
                        .get(row)
                        .map(|value| {
                            let text = value.to_string();
                            if quoted {
                                quote_field(&text).into_owned()
                            } else {
                                text
                            }
                        })
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
    }
}

/// RFC 4180 quoting for fields holding a separator, a quote or a line break.
fn quote_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn csv_pads_short_columns_with_empty_cells() {
        let table = TableData::new(
            vec!["ID".to_string(), "Name".to_string()],
            vec![
                vec![CellValue::Long(1), CellValue::Long(2)],
                vec![CellValue::Str("one".to_string())],
            ],
        )
        .unwrap();

        assert_eq!(table.to_csv(), "ID,Name\n1,one\n2,\n");
    }

    #[test]
    fn populate_csv_starts_with_the_type_header() {
        let table = TableData::from_json_str(
            r#"{"columns": ["ID", "Area", "Live", "Name"], "data": [[1, 2], [2.5, 3], [true], ["a", "b"]]}"#,
        )
        .unwrap();

        assert_eq!(
            table.to_populate_csv(),
            "# header l,d,b,s\nID,Area,Live,Name\n1,2.5,true,a\n2,3,,b\n"
        );
    }

    #[test]
    fn populate_csv_quotes_fields_that_would_split_a_row() {
        let table = TableData::from_json_str(
            r#"{"columns": ["ID", "Organism"], "data": [[1, 2, 3], ["Homo sapiens, adult", "say \"hi\"", "two\nlines"]]}"#,
        )
        .unwrap();

        assert_eq!(
            table.to_populate_csv(),
            "# header l,s\nID,Organism\n1,\"Homo sapiens, adult\"\n2,\"say \"\"hi\"\"\"\n3,\"two\nlines\"\n"
        );
    }

    #[test]
    fn plain_export_stays_unquoted() {
        let table = TableData::from_json_str(
            r#"{"columns": ["Organism"], "data": [["Homo sapiens, adult"]]}"#,
        )
        .unwrap();

        assert_eq!(table.to_csv(), "Organism\nHomo sapiens, adult\n");
    }

    #[test]
    fn quoting_leaves_plain_fields_borrowed() {
        assert_matches!(quote_field("Mus musculus"), Cow::Borrowed("Mus musculus"));
        assert_eq!(quote_field("a\rb"), "\"a\rb\"");
    }

    #[test]
    fn whole_doubles_keep_a_decimal_point() {
        assert_eq!(CellValue::Double(3.0).to_string(), "3.0");
        assert_eq!(CellValue::Double(2.5).to_string(), "2.5");
    }
}
