//! People on the roster: trainees and supervising faculty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

crate::define_id_type!(i64, PersonId);

/// Role of a person on the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Trainee,
    Faculty,
}

/// A member of the residency program roster.
///
/// Identity is immutable once imported; attribute edits come through
/// administrative writes. Deactivated people are kept (soft delete) so
/// historical assignments stay resolvable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub role: Role,
    /// Post-graduate year for trainees. `None` for faculty.
    pub pgy_level: Option<u8>,
    /// Credential tags such as "BLS", "ACLS", or procedural privileges.
    pub credentials: BTreeSet<String>,
    pub active: bool,
    /// Marked as willing backup coverage for emergency absorption.
    pub backup_pool: bool,
}

impl Person {
    pub fn trainee(id: impl Into<PersonId>, name: impl Into<String>, pgy_level: u8) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Trainee,
            pgy_level: Some(pgy_level),
            credentials: BTreeSet::new(),
            active: true,
            backup_pool: false,
        }
    }

    pub fn faculty(id: impl Into<PersonId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Faculty,
            pgy_level: None,
            credentials: BTreeSet::new(),
            active: true,
            backup_pool: false,
        }
    }

    /// True for interns (PGY-1). Duty-period and rest rules are stricter for them.
    pub fn is_pgy1(&self) -> bool {
        self.role == Role::Trainee && self.pgy_level == Some(1)
    }

    /// True for PGY-2 and above trainees.
    pub fn is_senior_trainee(&self) -> bool {
        self.role == Role::Trainee && self.pgy_level.map_or(false, |p| p >= 2)
    }

    pub fn has_credential(&self, tag: &str) -> bool {
        self.credentials.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgy_classification() {
        let intern = Person::trainee(1, "A", 1);
        let senior = Person::trainee(2, "B", 3);
        let faculty = Person::faculty(3, "C");

        assert!(intern.is_pgy1());
        assert!(!intern.is_senior_trainee());
        assert!(senior.is_senior_trainee());
        assert!(!faculty.is_pgy1());
        assert!(!faculty.is_senior_trainee());
    }

    #[test]
    fn credentials_lookup() {
        let mut p = Person::trainee(1, "A", 2);
        p.credentials.insert("ACLS".to_string());
        assert!(p.has_credential("ACLS"));
        assert!(!p.has_credential("PALS"));
    }
}
