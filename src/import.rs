/*!
The CSV upload path: request-shape validation, retention of the
uploaded file, parsing, and handoff to the store's reconciliation.

Everything here happens before any storage access except the final
`Store::import_records()` call, so a rejected upload or a malformed
file leaves the database untouched.
*/
use std::io::Cursor;
use std::path::Path;

use crate::record::GradeRecord;
use crate::store::{DbError, Store};

/// What an import did: rows inserted vs. rows skipped as duplicates
/// of an existing `(student_id, subject)` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub skipped: usize,
}

impl std::fmt::Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} skipped duplicates",
            &self.added, &self.skipped
        )
    }
}

#[derive(Debug, PartialEq)]
pub enum ImportError {
    /// No file was supplied, or its name was empty.
    NoFile,
    /// The file's extension isn't `.csv`.
    BadExtension(String),
    /// The uploaded copy couldn't be retained.
    Io(String),
    /// A malformed row or header; the whole batch fails and nothing
    /// is written.
    BadRow(String),
    Db(DbError),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ImportError::NoFile =>
                write!(f, "No file selected."),
            ImportError::BadExtension(name) =>
                write!(f, "Invalid file type {:?}; only CSV allowed.", name),
            ImportError::Io(e) =>
                write!(f, "Error saving uploaded file: {}", e),
            ImportError::BadRow(e) =>
                write!(f, "Bad CSV data; nothing imported: {}", e),
            ImportError::Db(e) =>
                write!(f, "Database error during import: {}", e),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<DbError> for ImportError {
    fn from(e: DbError) -> ImportError { ImportError::Db(e) }
}

/// Is this a filename we accept for upload? Requires an extension of
/// `.csv`, case-insensitively.
pub fn allowed_filename(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext.eq_ignore_ascii_case("csv"),
        None => false,
    }
}

/**
Reduce a client-supplied filename to something safe to join onto the
upload directory: the last path component only, anything outside
`[A-Za-z0-9._-]` replaced with `_`, leading dots stripped.
*/
pub fn sanitize_filename(filename: &str) -> String {
    let last = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let cleaned: String = last.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    cleaned.trim_start_matches('.').to_owned()
}

/**
Run a full CSV import.

In order:
  1. reject empty filenames and non-`.csv` extensions before touching
     anything;
  2. retain a copy of the upload at `upload_dir/<sanitized filename>`
     (last writer wins on a name collision);
  3. parse all rows — any malformed row fails the whole batch with
     zero database mutations;
  4. hand the rows to [`Store::import_records`], which commits them
     (and any provisioned accounts) in a single transaction.
*/
pub async fn import_csv_file<P: AsRef<Path>>(
    store: &Store,
    upload_dir: P,
    filename: &str,
    data: &[u8],
) -> Result<ImportReport, ImportError> {
    log::trace!(
        "import_csv_file( Store, ..., {:?}, [ {} bytes ] ) called.",
        filename, data.len()
    );

    if filename.is_empty() {
        return Err(ImportError::NoFile);
    }
    if !allowed_filename(filename) {
        return Err(ImportError::BadExtension(filename.to_owned()));
    }

    let upload_dir = upload_dir.as_ref();
    std::fs::create_dir_all(upload_dir)
        .map_err(|e| ImportError::Io(format!(
            "Unable to create upload directory {}: {}",
            upload_dir.display(), &e
        )))?;

    let saved_path = upload_dir.join(sanitize_filename(filename));
    std::fs::write(&saved_path, data)
        .map_err(|e| ImportError::Io(format!(
            "Unable to write {}: {}", saved_path.display(), &e
        )))?;
    log::info!("Retained uploaded file at {}.", saved_path.display());

    let records = GradeRecord::vec_from_csv_reader(Cursor::new(data))
        .map_err(ImportError::BadRow)?;

    let report = store.import_records(&records).await?;
    log::info!("Import of {:?}: {}.", filename, &report);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::TEST_CONNECTION;
    use crate::user::Role;

    static FILE_A: &str = "\
student_id,name,subject,grade,remarks
S1,Alice Tan,Math,A,
S2,Ben Ortiz,Sci,B,Good effort
";

    static FILE_B: &str = "\
student_id,name,subject,grade,remarks
S1,Alice Tan,Math,A,
S2,Ben Ortiz,Eng,C+,
";

    fn upload_dir() -> PathBuf {
        std::env::temp_dir().join("gradebook_test_uploads")
    }

    #[test]
    fn filename_allowance() {
        assert!(allowed_filename("grades.csv"));
        assert!(allowed_filename("grades.CSV"));
        assert!(allowed_filename("term 2 grades.Csv"));
        assert!(!allowed_filename("grades.txt"));
        assert!(!allowed_filename("grades"));
        assert!(!allowed_filename(".csv"));
    }

    #[test]
    fn filename_sanitization() {
        assert_eq!(sanitize_filename("grades.csv"), "grades.csv");
        assert_eq!(sanitize_filename("term 2 grades.csv"), "term_2_grades.csv");
        assert_eq!(sanitize_filename("../../etc/passwd.csv"), "passwd.csv");
        assert_eq!(sanitize_filename("..\\evil.csv"), "evil.csv");
        assert_eq!(sanitize_filename(".hidden.csv"), "hidden.csv");
    }

    #[tokio::test]
    #[serial]
    async fn reimport_is_idempotent() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let first = import_csv_file(
            &db, upload_dir(), "grades.csv", FILE_A.as_bytes()
        ).await.unwrap();
        assert_eq!(first, ImportReport { added: 2, skipped: 0 });
        assert!(upload_dir().join("grades.csv").is_file());

        let second = import_csv_file(
            &db, upload_dir(), "grades.csv", FILE_A.as_bytes()
        ).await.unwrap();
        assert_eq!(second, ImportReport { added: 0, skipped: 2 });

        let records = db.get_records().await.unwrap();
        assert_eq!(records.len(), 2);

        // No two rows share a natural key.
        let mut keys: Vec<_> = records.iter().map(|r| r.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), records.len());

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn partial_overlap_and_provisioning() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        import_csv_file(&db, upload_dir(), "a.csv", FILE_A.as_bytes())
            .await.unwrap();
        let report = import_csv_file(
            &db, upload_dir(), "b.csv", FILE_B.as_bytes()
        ).await.unwrap();
        assert_eq!(report, ImportReport { added: 1, skipped: 1 });

        let mut keys: Vec<_> = db.get_records().await.unwrap()
            .iter()
            .map(|r| r.key())
            .collect();
        keys.sort();
        assert_eq!(keys, vec![
            ("S1".to_owned(), "Math".to_owned()),
            ("S2".to_owned(), "Eng".to_owned()),
            ("S2".to_owned(), "Sci".to_owned()),
        ]);

        // Exactly one Student account per distinct student_id, with
        // the identifier as the bootstrap password.
        let accounts = db.get_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        for id in ["S1", "S2"] {
            let a = accounts.get(id).unwrap();
            assert_eq!(a.role, Role::Student);
            assert_eq!(
                db.check_password(id, id).await.unwrap(),
                crate::auth::AuthResult::Ok
            );
        }

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn bad_requests_make_no_mutations() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let err = import_csv_file(
            &db, upload_dir(), "data.txt", FILE_A.as_bytes()
        ).await.unwrap_err();
        assert_eq!(err, ImportError::BadExtension("data.txt".to_owned()));

        let err = import_csv_file(&db, upload_dir(), "", FILE_A.as_bytes())
            .await.unwrap_err();
        assert_eq!(err, ImportError::NoFile);

        assert!(db.get_records().await.unwrap().is_empty());
        assert!(db.get_accounts().await.unwrap().is_empty());

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn malformed_row_fails_the_whole_batch() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        // The first row is fine; the second lacks a name. Nothing from
        // the file may land.
        let bad = "\
student_id,name,subject,grade,remarks
S7,Gia Cruz,Math,B,
S8,,Math,C,
";
        let err = import_csv_file(
            &db, upload_dir(), "bad.csv", bad.as_bytes()
        ).await.unwrap_err();
        assert!(matches!(err, ImportError::BadRow(_)));

        assert!(db.get_records().await.unwrap().is_empty());
        assert!(db.get_accounts().await.unwrap().is_empty());

        db.nuke_database().await.unwrap();
    }
}
