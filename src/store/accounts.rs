/*
`Store` methods for the login accounts table.

```sql
CREATE TABLE accounts (
    username TEXT PRIMARY KEY,
    password TEXT NOT NULL,  /* Argon2id PHC string */
    role     TEXT NOT NULL   /* one of { 'Admin', 'Instructor', 'Student' } */
);
```
*/
use std::collections::HashMap;

use tokio_postgres::{Row, Transaction};

use super::{Store, DbError};
use crate::auth::{self, AuthResult};
use crate::user::{Account, Role};

fn account_from_row(row: &Row) -> Result<Account, DbError> {
    log::trace!("account_from_row( {:?} ) called.", row);

    let role_str: &str = row.try_get("role")?;
    let a = Account {
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        role: role_str.parse()?,
    };

    Ok(a)
}

/// Return the role of extant account `username`, if it exists.
///
/// This is used when inserting new accounts, mainly to ensure good
/// error messaging when a username is already taken.
async fn check_existing_account_role(
    t: &Transaction<'_>,
    username: &str,
) -> Result<Option<Role>, DbError> {
    log::trace!("check_existing_account_role( T, {:?} ) called.", username);

    match t.query_opt(
        "SELECT role FROM accounts WHERE username = $1",
        &[&username]
    ).await.map_err(|e|
        DbError(format!("{}", &e))
            .annotate("Error querying for preexisting username")
    )? {
        None => Ok(None),
        Some(row) => {
            let role_str: &str = row.try_get("role")
                .map_err(|e|
                    DbError(format!("{}", &e))
                        .annotate("Error getting role of preexisting username")
                )?;
            let role: Role = role_str.parse()
                .map_err(|e: String|
                    DbError(e)
                        .annotate("Error parsing role of preexisting username")
                )?;
            Ok(Some(role))
        },
    }
}

impl Store {
    /**
    Create a new login account.

    The `password` arrives in plaintext and gets hashed here; what the
    table stores is the PHC string. A username already in use (with any
    role) is an error, and the message says which role holds it.
    */
    pub async fn insert_account(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::insert_account( {:?}, [ password ], {} ) called.",
            username, role
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if let Some(role) = check_existing_account_role(&t, username).await? {
            return Err(DbError(format!(
                "Username {} already exists with role {}.",
                username, &role
            )));
        }

        let phc = auth::hash_password(password).map_err(DbError::from)?;

        t.execute(
            "INSERT INTO accounts (username, password, role)
                VALUES ($1, $2, $3)",
            &[&username, &phc, &role.to_string()]
        ).await?;

        t.commit().await?;
        log::trace!("Inserted {} account {:?}.", role, username);
        Ok(())
    }

    pub async fn get_account(
        &self,
        username: &str,
    ) -> Result<Option<Account>, DbError> {
        log::trace!("Store::get_account( {:?} ) called.", username);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT username, password, role FROM accounts WHERE username = $1",
            &[&username]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(account_from_row(&row)?)),
        }
    }

    pub async fn get_accounts(&self) -> Result<HashMap<String, Account>, DbError> {
        log::trace!("Store::get_accounts() called.");

        let client = self.connect().await?;
        let rows = client.query("SELECT * FROM accounts", &[]).await?;
        let mut map: HashMap<String, Account> = HashMap::with_capacity(rows.len());

        for row in rows.iter() {
            let a = account_from_row(row)?;
            map.insert(a.username.clone(), a);
        }

        Ok(map)
    }

    /// Deletes an account, regardless of role.
    ///
    /// Grade records whose `student_id` matches the username are left
    /// alone; the link between the two is soft in both directions.
    pub async fn delete_account(
        &self,
        username: &str,
    ) -> Result<(), DbError> {
        log::trace!("Store::delete_account( {:?} ) called.", username);

        let client = self.connect().await?;

        let n = client.execute(
            "DELETE FROM accounts WHERE username = $1",
            &[&username]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no account with username {:?}.", username)))
        } else {
            Ok(())
        }
    }

    /// Check a login attempt against the accounts table.
    pub async fn check_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!(
            "Store::check_password( {:?}, [ password ] ) called.", username
        );

        let account = match self.get_account(username).await? {
            None => { return Ok(AuthResult::NoSuchUser); },
            Some(a) => a,
        };

        if auth::verify_password(password, &account.password)
            .map_err(DbError::from)?
        {
            Ok(AuthResult::Ok)
        } else {
            Ok(AuthResult::BadPassword)
        }
    }

    /**
    Change an account's password.

    The current password must verify first; the stored hash is only
    replaced on `AuthResult::Ok`.
    */
    pub async fn change_password(
        &self,
        username: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!(
            "Store::change_password( {:?}, ... ) called.", username
        );

        match self.check_password(username, current_password).await? {
            AuthResult::Ok => {},
            other => { return Ok(other); },
        }

        let phc = auth::hash_password(new_password).map_err(DbError::from)?;

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE accounts SET password = $1 WHERE username = $2",
            &[&phc, &username]
        ).await?;

        if n == 0 {
            // The account vanished between the check and the update.
            Ok(AuthResult::NoSuchUser)
        } else {
            Ok(AuthResult::Ok)
        }
    }

    /**
    Insert any of the given `(username, password, role)` seed accounts
    that don't exist yet.

    Called at first boot so a fresh database has an Admin (and friends)
    who can log in with the configured default passwords.
    */
    pub async fn ensure_default_accounts(
        &self,
        defaults: &[(&str, &str, Role)],
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::ensure_default_accounts( [ {} accounts ] ) called.",
            defaults.len()
        );

        for (username, password, role) in defaults.iter() {
            if self.get_account(username).await?.is_none() {
                log::info!(
                    "Default {} account {:?} doesn't exist; inserting.",
                    role, username
                );
                self.insert_account(username, password, *role).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::tests::ensure_logging;
    use crate::store::tests::TEST_CONNECTION;

    static DEFAULTS: &[(&str, &str, Role)] = &[
        ("admin", "admin123", Role::Admin),
        ("instructor", "instr123", Role::Instructor),
        ("student", "stud123", Role::Student),
    ];

    #[tokio::test]
    #[serial]
    async fn insert_and_get_accounts() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.ensure_default_accounts(DEFAULTS).await.unwrap();
        // A second pass changes nothing.
        db.ensure_default_accounts(DEFAULTS).await.unwrap();

        let mut amap = db.get_accounts().await.unwrap();
        assert_eq!(amap.len(), DEFAULTS.len());

        for (username, _, role) in DEFAULTS.iter() {
            let a = amap.remove(*username).unwrap();
            assert_eq!((*username, *role), (a.username.as_str(), a.role));
            assert!(a.password.starts_with("$argon2id$"));
            db.delete_account(username).await.unwrap();
        }

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn duplicate_username_rejected() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.insert_account("jsmith", "hunter2", Role::Instructor).await.unwrap();
        let err = db.insert_account("jsmith", "other", Role::Student)
            .await.unwrap_err();
        assert!(err.display().contains("Instructor"));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn password_checks() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.insert_account("admin", "admin123", Role::Admin).await.unwrap();

        assert_eq!(
            db.check_password("admin", "admin123").await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.check_password("admin", "nope").await.unwrap(),
            AuthResult::BadPassword
        );
        assert_eq!(
            db.check_password("nobody", "admin123").await.unwrap(),
            AuthResult::NoSuchUser
        );

        assert_eq!(
            db.change_password("admin", "wrong", "newpass").await.unwrap(),
            AuthResult::BadPassword
        );
        assert_eq!(
            db.change_password("admin", "admin123", "newpass").await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.check_password("admin", "newpass").await.unwrap(),
            AuthResult::Ok
        );

        db.nuke_database().await.unwrap();
    }
}
