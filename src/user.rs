/*!
Login accounts and roles.
*/

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin      => "Admin",
            Role::Instructor => "Instructor",
            Role::Student    => "Student",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin"      => Ok(Role::Admin),
            "Instructor" => Ok(Role::Instructor),
            "Student"    => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

/// A login identity. `password` is an Argon2id hash in PHC string
/// format, never the plaintext.
#[derive(Clone, Debug)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub role: Role,
}
