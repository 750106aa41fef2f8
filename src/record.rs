/*!
Grade records and the CSV row format they arrive in.
*/
use std::io::Read;

/// One subject-enrollment record for a learner.
///
/// A `student_id` is not unique by itself; the natural key of a record
/// is `(student_id, subject)`, and that uniqueness is enforced by the
/// add and import code paths rather than by a storage constraint.
#[derive(Clone, Debug, PartialEq)]
pub struct GradeRecord {
    /// Storage primary key; 0 until the record has been inserted.
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub subject: String,
    pub grade: String,
    pub remarks: String,
}

/// Positions of the expected columns within a CSV header row.
///
/// `student_id`, `name`, and `subject` are required; `subject` is half
/// the natural key, so a file without it can't be reconciled at all.
struct Columns {
    student_id: usize,
    name: usize,
    subject: usize,
    grade: Option<usize>,
    remarks: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Columns, String> {
        let position = |column: &str| {
            headers.iter().position(|h| h == column)
        };

        let required = |column: &str| {
            position(column).ok_or_else(|| format!(
                "CSV header is missing the required {:?} column.", column
            ))
        };

        Ok(Columns {
            student_id: required("student_id")?,
            name: required("name")?,
            subject: required("subject")?,
            grade: position("grade"),
            remarks: position("remarks"),
        })
    }
}

impl GradeRecord {
    /**
    Grade-record .csv files should look like this:

    ```csv
    student_id,name,subject,grade,remarks
    S001,Alice Tan,Math,A,
    S001,Alice Tan,Science,B+,Strong lab work
    ```

    The `grade` and `remarks` columns may be absent or blank; the first
    three may not.
    */
    fn from_csv_record(
        row: &csv::StringRecord,
        cols: &Columns,
    ) -> Result<GradeRecord, &'static str> {
        log::trace!("GradeRecord::from_csv_record( {:?}, ... ) called.", row);

        let student_id = match row.get(cols.student_id) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => { return Err("no student_id"); },
        };
        let name = match row.get(cols.name) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => { return Err("no name"); },
        };
        let subject = match row.get(cols.subject) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => { return Err("no subject"); },
        };
        let grade = cols.grade
            .and_then(|n| row.get(n))
            .unwrap_or("")
            .to_owned();
        let remarks = cols.remarks
            .and_then(|n| row.get(n))
            .unwrap_or("")
            .to_owned();

        Ok(GradeRecord {
            id: 0,
            student_id,
            name,
            subject,
            grade,
            remarks,
        })
    }

    /**
    Read an entire CSV file's worth of records.

    Any malformed row fails the whole file; the caller is expected to
    make no storage mutations in that case.
    */
    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<GradeRecord>, String> {
        log::trace!("GradeRecord::vec_from_csv_reader(...) called.");

        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .has_headers(true)
            .from_reader(r);

        let headers = csv_reader.headers()
            .map_err(|e| format!("Error reading CSV header row: {}", &e))?
            .clone();
        let cols = Columns::from_headers(&headers)?;

        let mut records: Vec<GradeRecord> = Vec::with_capacity(256);

        for (n, res) in csv_reader.records().enumerate() {
            match res {
                Ok(row) => match GradeRecord::from_csv_record(&row, &cols) {
                    Ok(rec) => { records.push(rec); },
                    Err(e) => {
                        let estr = match row.position() {
                            Some(p) => format!(
                                "Error on line {}: {}", p.line(), &e
                            ),
                            None => format!(
                                "Error in CSV record {}: {}", &n, &e
                            ),
                        };
                        return Err(estr);
                    },
                },
                Err(e) => {
                    let estr = match e.position() {
                        Some(p) => format!(
                            "Error on line {}: {}", p.line(), &e
                        ),
                        None => format!(
                            "Error in CSV record {}: {}", &n, &e
                        ),
                    };
                    return Err(estr);
                },
            }
        }

        records.shrink_to_fit();
        log::trace!(
            "GradeRecord::vec_from_csv_reader() returns {} records.",
            records.len()
        );
        Ok(records)
    }

    /// The natural key of this record.
    pub fn key(&self) -> (String, String) {
        (self.student_id.clone(), self.subject.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    use std::io::Cursor;

    #[test]
    fn records_from_csv_file() {
        ensure_logging();
        let f = std::fs::File::open("test/good_records_0.csv").unwrap();
        let recs = GradeRecord::vec_from_csv_reader(f).unwrap();
        log::trace!("Records:\n{:#?}", &recs);

        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].key(), ("S001".to_owned(), "Math".to_owned()));
        assert_eq!(recs[1].grade, "B+");
        assert_eq!(recs[1].remarks, "Strong lab work");
    }

    #[test]
    fn optional_columns_default_to_blank() {
        let text = "student_id,name,subject\nS009,Dee Park,History\n";
        let recs = GradeRecord::vec_from_csv_reader(Cursor::new(text)).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].grade, "");
        assert_eq!(recs[0].remarks, "");
    }

    #[test]
    fn missing_required_column_fails() {
        let text = "student_id,name,grade\nS009,Dee Park,A\n";
        let err = GradeRecord::vec_from_csv_reader(Cursor::new(text))
            .unwrap_err();
        assert!(err.contains("subject"));
    }

    #[test]
    fn blank_required_field_fails_with_line_number() {
        let text = "\
student_id,name,subject,grade,remarks
S001,Alice Tan,Math,A,
S002,,Science,B,
";
        let err = GradeRecord::vec_from_csv_reader(Cursor::new(text))
            .unwrap_err();
        assert!(err.contains("line 3"));
        assert!(err.contains("no name"));
    }
}
