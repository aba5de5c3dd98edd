// src/models/identity.rs

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::ledger::AuthorizationLevel;

/// Role carried in the identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Hod,
    Dean,
    Admin,
}

impl Role {
    /// The staff rank of this role, `None` for students.
    pub fn staff(self) -> Option<StaffRole> {
        match self {
            Role::Student => None,
            Role::Teacher => Some(StaffRole::Teacher),
            Role::Hod => Some(StaffRole::Hod),
            Role::Dean => Some(StaffRole::Dean),
            Role::Admin => Some(StaffRole::Admin),
        }
    }
}

/// Staff ranks in ascending order of authority.
///
/// The derived `Ord` is the authorization ranking: TEACHER < HOD < DEAN < ADMIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StaffRole {
    Teacher,
    Hod,
    Dean,
    Admin,
}

impl StaffRole {
    /// Whether this rank may clear a lock held at `level`.
    pub fn can_clear(self, level: AuthorizationLevel) -> bool {
        self >= level.required_role()
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StaffRole::Teacher => "TEACHER",
            StaffRole::Hod => "HOD",
            StaffRole::Dean => "DEAN",
            StaffRole::Admin => "ADMIN",
        };
        f.write_str(name)
    }
}

/// An authenticated staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staff {
    pub id: i64,
    pub role: StaffRole,
}

/// The students a staff member has jurisdiction over.
///
/// Enrollments are `(course_id, student_id)` pairs so that a teacher of one
/// course does not see the same student's locks in another course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffScope {
    All,
    Enrollments(HashSet<(i64, i64)>),
}

impl StaffScope {
    pub fn contains(&self, course_id: i64, student_id: i64) -> bool {
        match self {
            StaffScope::All => true,
            StaffScope::Enrollments(pairs) => pairs.contains(&(course_id, student_id)),
        }
    }
}
