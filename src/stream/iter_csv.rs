use csv::{Reader, ReaderBuilder, StringRecord};
use ndarray::Array1;
use thiserror::Error;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

use crate::common::FType;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: cannot parse {value:?} in column {column:?} as a number")]
    Parse {
        line: u64,
        column: String,
        value: String,
    },
}

/// Iterate over the rows of a CSV file with headers, one observation per row.
///
/// Every column whose name is in `skip` (labels, timestamps...) is left out; all other
/// columns must hold numbers.
///
/// # Example
///
/// ```
/// use light_outlier::stream::iter_csv::IterCsv;
/// use std::collections::HashSet;
///
/// let content = "time,cpu,mem\n0,0.5,12.0\n1,0.7,13.5";
/// let skip = HashSet::from(["time".to_string()]);
/// let rows: Vec<_> = IterCsv::<f32, &[u8]>::new(content.as_bytes(), skip)
///     .unwrap()
///     .collect::<Result<_, _>>()
///     .unwrap();
///
/// assert_eq!(rows.len(), 2);
/// assert_eq!(rows[1].to_vec(), vec![0.7, 13.5]);
/// ```
pub struct IterCsv<F: FType + FromStr, R: Read> {
    reader: Reader<R>,
    headers: StringRecord,
    columns: Vec<usize>,
    record: StringRecord,
    _marker: PhantomData<F>,
}

impl<F: FType + FromStr, R: Read> IterCsv<F, R> {
    pub fn new(reader: R, skip: HashSet<String>) -> Result<Self, StreamError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.to_owned();
        let columns = headers
            .iter()
            .enumerate()
            .filter(|(_, name)| !skip.contains(*name))
            .map(|(i, _)| i)
            .collect();
        Ok(Self {
            reader,
            headers,
            columns,
            record: StringRecord::new(),
            _marker: PhantomData,
        })
    }

    /// Names of the columns making up an observation.
    pub fn feature_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|&i| self.headers.get(i))
            .collect()
    }

    fn parse_record(&self) -> Result<Array1<F>, StreamError> {
        let line = self.record.position().map_or(0, |p| p.line());
        self.columns
            .iter()
            .map(|&i| {
                let field = self.record.get(i).unwrap_or("");
                field.parse::<F>().map_err(|_| StreamError::Parse {
                    line,
                    column: self.headers.get(i).unwrap_or("").to_string(),
                    value: field.to_string(),
                })
            })
            .collect()
    }
}

impl<F: FType + FromStr> IterCsv<F, BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P, skip: HashSet<String>) -> Result<Self, StreamError> {
        let file = File::open(path)?;
        IterCsv::new(BufReader::new(file), skip)
    }
}

impl<F: FType + FromStr, R: Read> Iterator for IterCsv<F, R> {
    type Item = Result<Array1<F>, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => Some(self.parse_record()),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}
