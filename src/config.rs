/*!
Configuration loading.

A TOML config file with every field optional, merged over built-in
defaults. The defaults point at a local test database and are not fit
for production use; neither are the default seed-account passwords,
which exist so a freshly initialized database has someone who can
log in.
*/
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::user::Role;

#[derive(Deserialize)]
struct ConfigFile {
    db_connect_string: Option<String>,
    upload_dir: Option<String>,
    admin_password: Option<String>,
    instructor_password: Option<String>,
    student_password: Option<String>,
}

#[derive(Debug)]
pub struct Cfg {
    pub db_connect_string: String,
    pub upload_dir: PathBuf,
    pub default_admin_password: String,
    pub default_instructor_password: String,
    pub default_student_password: String,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            db_connect_string: "host=localhost user=gradebook_test password='gradebook_test' dbname=gradebook_test".to_owned(),
            upload_dir: PathBuf::from("uploads"),
            default_admin_password: "admin123".to_owned(),
            default_instructor_password: "instr123".to_owned(),
            default_student_password: "stud123".to_owned(),
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file: {}", &e))?;
        let cf: ConfigFile = toml::from_str(&file_contents)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.db_connect_string {
            c.db_connect_string = s;
        }
        if let Some(s) = cf.upload_dir {
            c.upload_dir = PathBuf::from(s);
        }
        if let Some(s) = cf.admin_password {
            c.default_admin_password = s;
        }
        if let Some(s) = cf.instructor_password {
            c.default_instructor_password = s;
        }
        if let Some(s) = cf.student_password {
            c.default_student_password = s;
        }

        Ok(c)
    }

    /// The three accounts seeded into a fresh database.
    pub fn default_accounts(&self) -> [(&str, &str, Role); 3] {
        [
            ("admin", self.default_admin_password.as_str(), Role::Admin),
            ("instructor", self.default_instructor_password.as_str(), Role::Instructor),
            ("student", self.default_student_password.as_str(), Role::Student),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_merges_over_defaults() {
        let text = "db_connect_string = \"host=db.example.com user=gb dbname=gradebook\"\nadmin_password = \"s3cret\"\n";
        let path = std::env::temp_dir().join("gradebook_test_cfg.toml");
        std::fs::write(&path, text).unwrap();

        let cfg = Cfg::from_file(&path).unwrap();
        assert_eq!(
            cfg.db_connect_string,
            "host=db.example.com user=gb dbname=gradebook"
        );
        assert_eq!(cfg.default_admin_password, "s3cret");
        assert_eq!(cfg.default_student_password, "stud123");
        assert_eq!(cfg.upload_dir, PathBuf::from("uploads"));

        std::fs::remove_file(&path).unwrap();
    }
}
