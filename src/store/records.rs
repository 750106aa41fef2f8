/*!
`Store` methods for the grade-records table, including the bulk-import
reconciliation that is the reason this crate exists.

```sql
CREATE TABLE records (
    id         BIGSERIAL PRIMARY KEY,
    student_id TEXT NOT NULL,
    name       TEXT NOT NULL,
    subject    TEXT NOT NULL,
    grade      TEXT NOT NULL,
    remarks    TEXT NOT NULL
);
```

The `(student_id, subject)` natural key is enforced here, not by the
schema. The import path loads every key it might collide with in one
query up front and does its per-row duplicate checks against an
in-memory set, so the only remaining race surface is two whole batches
committing around each other.
*/
use std::collections::HashSet;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_postgres::{Row, types::{ToSql, Type}};

use super::{Store, DbError};
use crate::auth;
use crate::import::ImportReport;
use crate::record::GradeRecord;
use crate::user::Role;

fn record_from_row(row: &Row) -> Result<GradeRecord, DbError> {
    Ok(GradeRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        grade: row.try_get("grade")?,
        remarks: row.try_get("remarks")?,
    })
}

impl Store {
    /**
    Insert a single record (the manual "add student" path).

    A record with the same `(student_id, subject)` key is an error and
    nothing is written. If no account exists for the `student_id`, one
    is provisioned in the same transaction, role Student, with the
    identifier itself (hashed) as the initial password; first login is
    expected to change it.
    */
    pub async fn insert_record(&self, rec: &GradeRecord) -> Result<(), DbError> {
        log::trace!("Store::insert_record( {:?} ) called.", rec);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if t.query_opt(
            "SELECT id FROM records WHERE student_id = $1 AND subject = $2",
            &[&rec.student_id, &rec.subject]
        ).await?.is_some() {
            return Err(DbError(format!(
                "A record for student {:?} in subject {:?} already exists.",
                &rec.student_id, &rec.subject
            )));
        }

        t.execute(
            "INSERT INTO records (student_id, name, subject, grade, remarks)
                VALUES ($1, $2, $3, $4, $5)",
            &[
                &rec.student_id, &rec.name, &rec.subject,
                &rec.grade, &rec.remarks
            ]
        ).await?;

        if t.query_opt(
            "SELECT username FROM accounts WHERE username = $1",
            &[&rec.student_id]
        ).await?.is_none() {
            let phc = auth::hash_password(&rec.student_id)
                .map_err(DbError::from)?;
            t.execute(
                "INSERT INTO accounts (username, password, role)
                    VALUES ($1, $2, $3)",
                &[&rec.student_id, &phc, &Role::Student.to_string()]
            ).await?;
            log::trace!(
                "Provisioned Student account {:?}.", &rec.student_id
            );
        }

        t.commit().await?;
        log::trace!(
            "Inserted record ({}, {}).", &rec.student_id, &rec.subject
        );
        Ok(())
    }

    /**
    Reconcile a batch of CSV rows against the records table.

    Per row: if a record with the same `(student_id, subject)` key
    already exists (in the table, or earlier in this same batch), the
    row is skipped entirely; existing rows are never updated, so
    re-importing a file is idempotent. Otherwise the row is staged for
    insertion. Independently of that outcome, every distinct
    `student_id` without a login account gets one staged, role Student,
    initial password the identifier itself (hashed).

    All staged inserts commit as one transaction; any failure rolls the
    whole batch back.
    */
    pub async fn import_records(
        &self,
        records: &[GradeRecord]
    ) -> Result<ImportReport, DbError> {
        log::trace!(
            "Store::import_records( [ {} records ] ) called.", records.len()
        );

        if records.is_empty() {
            return Ok(ImportReport { added: 0, skipped: 0 });
        }

        let batch_ids: Vec<&str> = records.iter()
            .map(|r| r.student_id.as_str())
            .collect();

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        // One query for every key this batch could collide with, one
        // for every username it might have to provision; after these,
        // the per-row duplicate checks are in-memory set lookups.
        let (kq, aq) = tokio::join!(
            t.prepare_typed(
                "SELECT student_id, subject FROM records
                    WHERE student_id = ANY($1)",
                &[Type::TEXT_ARRAY]
            ),
            t.prepare_typed(
                "SELECT username FROM accounts WHERE username = ANY($1)",
                &[Type::TEXT_ARRAY]
            ),
        );
        let (key_query, account_query) = (kq?, aq?);

        let mut existing_keys: HashSet<(String, String)> = HashSet::new();
        for row in t.query(&key_query, &[&batch_ids]).await?.iter() {
            existing_keys.insert((row.try_get(0)?, row.try_get(1)?));
        }

        let mut existing_usernames: HashSet<String> = HashSet::new();
        for row in t.query(&account_query, &[&batch_ids]).await?.iter() {
            existing_usernames.insert(row.try_get(0)?);
        }

        let mut staged_records: Vec<&GradeRecord> = Vec::new();
        let mut new_accounts: Vec<(String, String)> = Vec::new();
        let mut skipped: usize = 0;

        for rec in records.iter() {
            let key = rec.key();
            if existing_keys.contains(&key) {
                skipped += 1;
            } else {
                existing_keys.insert(key);
                staged_records.push(rec);
            }

            if !existing_usernames.contains(&rec.student_id) {
                let phc = auth::hash_password(&rec.student_id)
                    .map_err(DbError::from)?;
                existing_usernames.insert(rec.student_id.clone());
                new_accounts.push((rec.student_id.clone(), phc));
            }
        }
        let added = staged_records.len();

        let (riq, aiq) = tokio::join!(
            t.prepare_typed(
                "INSERT INTO records (student_id, name, subject, grade, remarks)
                    VALUES ($1, $2, $3, $4, $5)",
                &[Type::TEXT, Type::TEXT, Type::TEXT, Type::TEXT, Type::TEXT]
            ),
            t.prepare_typed(
                "INSERT INTO accounts (username, password, role)
                    VALUES ($1, $2, $3)",
                &[Type::TEXT, Type::TEXT, Type::TEXT]
            ),
        );
        let (record_insert_query, account_insert_query) = (riq?, aiq?);

        /*
        The insert parameters must live in slices of references bound
        outside the futures pushed into `FuturesUnordered`, hence the
        pvec dance in both of these blocks. Each block gets its own
        scope so its futures drop before the commit.
        */
        let mut n_rec_inserted: u64 = 0;
        {
            let pvec: Vec<[&(dyn ToSql + Sync); 5]> = staged_records.iter()
                .map(|r| {
                    let p: [&(dyn ToSql + Sync); 5] = [
                        &r.student_id, &r.name, &r.subject,
                        &r.grade, &r.remarks
                    ];
                    p
                }).collect();

            let mut inserts = FuturesUnordered::new();
            for params in pvec.iter() {
                inserts.push(
                    t.execute(&record_insert_query, params)
                );
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_rec_inserted += 1; },
                    Err(e) => {
                        let estr = format!(
                            "Error inserting record into database: {}", &e
                        );
                        return Err(DbError(estr));
                    },
                }
            }
        }

        let mut n_acct_inserted: u64 = 0;
        {
            let student_role = Role::Student.to_string();
            let pvec: Vec<[&(dyn ToSql + Sync); 3]> = new_accounts.iter()
                .map(|(username, phc)| {
                    let p: [&(dyn ToSql + Sync); 3] =
                        [username, phc, &student_role];
                    p
                }).collect();

            let mut inserts = FuturesUnordered::new();
            for params in pvec.iter() {
                inserts.push(
                    t.execute(&account_insert_query, params)
                );
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_acct_inserted += 1; },
                    Err(e) => {
                        let estr = format!(
                            "Error inserting provisioned account into database: {}",
                            &e
                        );
                        return Err(DbError(estr));
                    },
                }
            }
        }

        t.commit().await?;

        log::trace!(
            "Imported {} records ({} skipped); provisioned {} accounts.",
            &n_rec_inserted, &skipped, &n_acct_inserted
        );
        Ok(ImportReport { added, skipped })
    }

    pub async fn get_records(&self) -> Result<Vec<GradeRecord>, DbError> {
        log::trace!("Store::get_records() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM records ORDER BY id", &[]
        ).await?;

        let mut records: Vec<GradeRecord> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            records.push(record_from_row(row)?);
        }

        Ok(records)
    }

    /// All of one student's records; the "show me my grades" view.
    pub async fn get_records_for_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<GradeRecord>, DbError> {
        log::trace!(
            "Store::get_records_for_student( {:?} ) called.", student_id
        );

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM records WHERE student_id = $1 ORDER BY id",
            &[&student_id]
        ).await?;

        let mut records: Vec<GradeRecord> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            records.push(record_from_row(row)?);
        }

        Ok(records)
    }

    pub async fn update_record(&self, rec: &GradeRecord) -> Result<(), DbError> {
        log::trace!("Store::update_record( {:?} ) called.", rec);

        let client = self.connect().await?;

        let n = client.execute(
            "UPDATE records SET
                student_id = $1, name = $2, subject = $3,
                grade = $4, remarks = $5
            WHERE id = $6",
            &[
                &rec.student_id, &rec.name, &rec.subject,
                &rec.grade, &rec.remarks,
                &rec.id
            ]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no record with id {}.", &rec.id)))
        } else {
            Ok(())
        }
    }

    /// Delete a single record. The matching account, if any, stays.
    pub async fn delete_record(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_record( {} ) called.", &id);

        let client = self.connect().await?;

        let n = client.execute(
            "DELETE FROM records WHERE id = $1", &[&id]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no record with id {}.", &id)))
        } else {
            Ok(())
        }
    }

    /// Bulk delete by id; returns how many rows actually went away.
    /// Ids with no matching row are not an error.
    pub async fn delete_records(&self, ids: &[i64]) -> Result<u64, DbError> {
        log::trace!("Store::delete_records( [ {} ids ] ) called.", ids.len());

        let client = self.connect().await?;

        let delete_stmt = client.prepare_typed(
            "DELETE FROM records WHERE id = ANY($1)",
            &[Type::INT8_ARRAY]
        ).await?;

        let n = client.execute(&delete_stmt, &[&ids]).await?;

        log::trace!("    ...{} records deleted.", &n);
        Ok(n)
    }
}
