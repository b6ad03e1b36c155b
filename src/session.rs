use crate::model::Student;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// Identity of the caller, issued elsewhere and attached to each request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forbidden(pub String);

impl Session {
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }

    /// The roster entry that belongs to this session: matched by roll number,
    /// then by name ignoring case.
    pub fn find_own_profile<'a>(&self, roster: &'a [Student]) -> Option<&'a Student> {
        let username = self.username.trim();
        if username.is_empty() {
            return None;
        }
        roster
            .iter()
            .find(|s| s.roll_no == username)
            .or_else(|| {
                roster
                    .iter()
                    .find(|s| s.name.to_lowercase() == username.to_lowercase())
            })
    }
}

pub fn require_session(session: Option<&Session>) -> Result<&Session, Forbidden> {
    session.ok_or_else(|| Forbidden("a session is required".to_string()))
}

pub fn require_teacher(session: Option<&Session>) -> Result<&Session, Forbidden> {
    let s = require_session(session)?;
    if !s.is_teacher() {
        return Err(Forbidden("only teachers can do this".to_string()));
    }
    Ok(s)
}
