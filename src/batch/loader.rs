use std::path::{Path, PathBuf};

use log::{debug, trace};
use ndarray::{stack, Array2, ArrayView2, Axis};

use super::Batch;
use crate::error::{PcaExpError, Result};

/// Which files make up a batch and how to read them.
///
/// Files are named `{directory}{prefix}{N}{extension}` for every `N` in the inclusive
/// range, minus the listed exceptions. Each file holds one measurement as a numeric
/// table with columns x, y and optionally the y-error.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    start: i64,
    stop: i64,
    prefix: String,
    extension: String,
    directory: String,
    exceptions: Vec<i64>,
    name: Option<String>,
    delimiter: Option<u8>,
    skip_rows: usize,
}

impl LoadOptions {
    pub fn new(start: i64, stop: i64) -> Self {
        LoadOptions {
            start,
            stop,
            prefix: String::new(),
            extension: String::new(),
            directory: "./".to_string(),
            exceptions: Vec::new(),
            name: None,
            delimiter: None,
            skip_rows: 0,
        }
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Appended verbatim, so include the dot (`".dat"`).
    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    /// Prepended verbatim, so include the trailing separator (`"./data/"`).
    pub fn directory(mut self, directory: &str) -> Self {
        self.directory = directory.to_string();
        self
    }

    pub fn exceptions(mut self, exceptions: Vec<i64>) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Column delimiter. Without one, columns are split on any run of whitespace.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    pub(crate) fn directory_str(&self) -> &str {
        &self.directory
    }

    pub(crate) fn name_str(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// File numbers in load order.
    pub fn numbers(&self) -> Vec<i64> {
        (self.start..=self.stop)
            .filter(|n| !self.exceptions.contains(n))
            .collect()
    }

    pub fn path_for(&self, number: i64) -> PathBuf {
        PathBuf::from(format!(
            "{}{}{}{}",
            self.directory, self.prefix, number, self.extension
        ))
    }

    pub(crate) fn load(&self) -> Result<Batch> {
        if self.start > self.stop {
            return Err(PcaExpError::InvalidArgument(format!(
                "file range start {} is after stop {}",
                self.start, self.stop
            )));
        }
        let numbers = self.numbers();
        if numbers.is_empty() {
            return Err(PcaExpError::InvalidArgument(format!(
                "every file number in [{}, {}] is excluded",
                self.start, self.stop
            )));
        }

        let mut tables: Vec<Array2<f64>> = Vec::with_capacity(numbers.len());
        for n in numbers {
            let path = self.path_for(n);
            let table = parse_table(&path, self.delimiter, self.skip_rows)?;
            if let Some(first) = tables.first() {
                if first.dim() != table.dim() {
                    return Err(PcaExpError::ShapeMismatch(format!(
                        "{} has shape {:?}, earlier files have {:?}",
                        path.display(),
                        table.dim(),
                        first.dim()
                    )));
                }
            }
            trace!("read {} with shape {:?}", path.display(), table.dim());
            tables.push(table);
        }

        // (measurement, x, channel) stacked along a new axis 1 gives (x, measurement, channel).
        let views: Vec<ArrayView2<f64>> = tables.iter().map(|t| t.view()).collect();
        let data = stack(Axis(1), &views)
            .map_err(|e| PcaExpError::ShapeMismatch(e.to_string()))?;
        debug!("stacked {} tables into batch of shape {:?}", views.len(), data.dim());
        Ok(Batch::new(data))
    }
}

/// Reads one numeric table. Blank lines are ignored; every remaining row must have
/// the same number of columns, and at least two.
pub fn parse_table(path: &Path, delimiter: Option<u8>, skip_rows: usize) -> Result<Array2<f64>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PcaExpError::parse(path, e.to_string()))?;

    let body: Vec<&str> = text
        .lines()
        .skip(skip_rows)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let rows = match delimiter {
        None => body
            .iter()
            .enumerate()
            .map(|(i, line)| {
                line.split_whitespace()
                    .map(|tok| parse_value(path, i + skip_rows, tok))
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<Vec<f64>>>>()?,
        Some(d) => read_delimited(path, &body, d, skip_rows)?,
    };

    let n_rows = rows.len();
    let n_cols = rows.first().map(Vec::len).unwrap_or(0);
    if n_rows == 0 {
        return Err(PcaExpError::parse(path, "no data rows"));
    }
    if n_cols < 2 {
        return Err(PcaExpError::parse(
            path,
            format!("expected at least 2 columns (x, y), found {}", n_cols),
        ));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
        return Err(PcaExpError::parse(
            path,
            format!(
                "data row {} has {} columns, expected {}",
                i + 1,
                row.len(),
                n_cols
            ),
        ));
    }

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat).map_err(|e| PcaExpError::parse(path, e.to_string()))
}

fn read_delimited(path: &Path, body: &[&str], delimiter: u8, skip_rows: usize) -> Result<Vec<Vec<f64>>> {
    let joined = body.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(joined.as_bytes());

    let mut rows = Vec::with_capacity(body.len());
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PcaExpError::parse(path, e.to_string()))?;
        let row = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    Err(PcaExpError::parse(
                        path,
                        format!("empty field on line {}", i + skip_rows + 1),
                    ))
                } else {
                    parse_value(path, i + skip_rows, field)
                }
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

fn parse_value(path: &Path, line: usize, token: &str) -> Result<f64> {
    token.parse::<f64>().map_err(|_| {
        PcaExpError::parse(
            path,
            format!("'{}' on line {} is not a number", token, line + 1),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchStore, Channel};
    use std::fs;
    use tempfile::tempdir;

    fn write_measurement(dir: &Path, name: &str, shift: f64, header: &str, sep: &str) {
        let mut text = header.to_string();
        for i in 0..6 {
            let t = i as f64 * 0.25;
            text.push_str(&format!("{}{}{}{}{}\n", t, sep, t + shift, sep, 0.01));
        }
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_load_whitespace_files_with_exceptions() {
        let dir = tempdir().unwrap();
        for n in 10..=17 {
            write_measurement(dir.path(), &format!("R202{}.DAT", n), n as f64, "", "   ");
        }

        let options = LoadOptions::new(10, 17)
            .prefix("R202")
            .extension(".DAT")
            .directory(&format!("{}/", dir.path().display()))
            .exceptions(vec![12, 15]);

        let mut store = BatchStore::new();
        let idx = store.load_from_files(&options).unwrap();
        let batch = store.get(idx).unwrap();

        assert_eq!(batch.n_measurements(), 17 - 10 + 1 - 2);
        assert_eq!(batch.x_len(), 6);
        assert_eq!(batch.n_channels(), 3);
        assert_eq!(store.name(idx).unwrap(), "0");

        // Measurement 2 is file 13 once 12 is skipped.
        let y = batch.channel(Channel::Y).unwrap();
        assert_eq!(y[[0, 2]], 13.0);
    }

    #[test]
    fn test_load_delimited_with_header() {
        let dir = tempdir().unwrap();
        for n in 56..=58 {
            write_measurement(
                dir.path(),
                &format!("EMU585{}.dat", n),
                0.0,
                "time,asymmetry,error\nus,,\n",
                ",",
            );
        }

        let options = LoadOptions::new(56, 58)
            .prefix("EMU585")
            .extension(".dat")
            .directory(&format!("{}/", dir.path().display()))
            .name("BaFe2Se2O")
            .delimiter(b',')
            .skip_rows(2);

        let mut store = BatchStore::new();
        let idx = store.load_from_files(&options).unwrap();
        assert_eq!(store.name(idx).unwrap(), "BaFe2Se2O");
        let batch = store.get(idx).unwrap();
        assert_eq!(batch.data().dim(), (6, 3, 3));
        assert_eq!(batch.x_axis().unwrap()[1], 0.25);
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let dir = tempdir().unwrap();
        write_measurement(dir.path(), "m1.txt", 0.0, "", " ");

        let options = LoadOptions::new(1, 2)
            .prefix("m")
            .extension(".txt")
            .directory(&format!("{}/", dir.path().display()));

        let mut store = BatchStore::new();
        let err = store.load_from_files(&options).unwrap_err();
        assert!(matches!(err, PcaExpError::Parse { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_tables() {
        let dir = tempdir().unwrap();

        let one_col = dir.path().join("one.txt");
        fs::write(&one_col, "1.0\n2.0\n").unwrap();
        assert!(matches!(
            parse_table(&one_col, None, 0),
            Err(PcaExpError::Parse { .. })
        ));

        let ragged = dir.path().join("ragged.txt");
        fs::write(&ragged, "1.0 2.0 0.1\n2.0 3.0\n").unwrap();
        assert!(parse_table(&ragged, None, 0).is_err());

        let text = dir.path().join("text.txt");
        fs::write(&text, "1.0 abc\n").unwrap();
        let err = parse_table(&text, None, 0).unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_empty_delimited_field_is_parse_error() {
        let dir = tempdir().unwrap();
        let gap = dir.path().join("gap.csv");
        fs::write(&gap, "0.0,,0.1\n1.0,,0.1\n").unwrap();

        let err = parse_table(&gap, Some(b','), 0).unwrap_err();
        assert!(matches!(err, PcaExpError::Parse { .. }));
        assert!(err.to_string().contains("empty field on line 1"));
    }

    #[test]
    fn test_mismatched_lengths_across_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a1"), "0 1\n1 2\n").unwrap();
        fs::write(dir.path().join("a2"), "0 1\n1 2\n2 3\n").unwrap();

        let options = LoadOptions::new(1, 2)
            .prefix("a")
            .directory(&format!("{}/", dir.path().display()));
        let mut store = BatchStore::new();
        assert!(matches!(
            store.load_from_files(&options),
            Err(PcaExpError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_range_validation() {
        let mut store = BatchStore::new();
        let reversed = LoadOptions::new(5, 1);
        assert!(matches!(
            store.load_from_files(&reversed),
            Err(PcaExpError::InvalidArgument(_))
        ));

        let all_excluded = LoadOptions::new(1, 2).exceptions(vec![1, 2]);
        assert!(matches!(
            store.load_from_files(&all_excluded),
            Err(PcaExpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_numbers_ignore_out_of_range_exceptions() {
        let options = LoadOptions::new(3, 6).exceptions(vec![4, 99]);
        assert_eq!(options.numbers(), vec![3, 5, 6]);
        assert_eq!(
            options.prefix("R").extension(".DAT").path_for(5),
            PathBuf::from("./R5.DAT")
        );
    }
}
