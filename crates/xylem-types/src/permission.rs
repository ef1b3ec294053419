//! Unix-style permission records and principals.
//!
//! A [`Permission`] carries owner, group, a mode word and an optional ACL.
//! Validation order: DBA short-circuits, then the owner bits, then the
//! first matching ACL entry, then the group bits, then the "other" bits.

use serde::{Deserialize, Serialize};

/// Access bit requested against a [`Permission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access(u8);

impl Access {
    pub const READ: Self = Self(0o4);
    pub const WRITE: Self = Self(0o2);
    pub const EXECUTE: Self = Self(0o1);

    /// Combine access bits (`READ | WRITE` style checks).
    #[inline]
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    const fn bits(self) -> u8 {
        self.0
    }
}

/// A security principal as seen by the namespace layer.
///
/// Always passed as an explicit parameter, never read from thread-local
/// state. The broker pool constructs these; this layer only validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub groups: Vec<String>,
    /// Database administrators bypass every permission check.
    pub dba: bool,
}

impl Subject {
    #[must_use]
    pub fn new(name: impl Into<String>, groups: Vec<String>, dba: bool) -> Self {
        Self {
            name: name.into(),
            groups,
            dba,
        }
    }

    /// The system subject used for bootstrap operations.
    #[must_use]
    pub fn system() -> Self {
        Self::new("SYSTEM", vec!["dba".to_string()], true)
    }

    #[must_use]
    pub fn is_in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Target of an ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclTarget {
    User(String),
    Group(String),
}

/// One access-control entry: grant or deny `mode` bits for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub target: AclTarget,
    pub allow: bool,
    pub mode: u8,
}

/// Mode word bit positions.
const SHIFT_OWNER: u16 = 6;
const SHIFT_GROUP: u16 = 3;

/// Setgid bit in the mode word (04000 setuid, 02000 setgid, 01000 sticky).
pub const MODE_SETGID: u16 = 0o2000;

/// Owner, group, mode and ACL for a collection or document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub owner: String,
    pub group: String,
    pub mode: u16,
    #[serde(default)]
    pub acl: Vec<AclEntry>,
}

impl Permission {
    /// Default collection permission for a creating principal (mode 0755).
    #[must_use]
    pub fn collection_default(subject: &Subject) -> Self {
        Self {
            owner: subject.name.clone(),
            group: subject.groups.first().cloned().unwrap_or_else(|| "dba".to_string()),
            mode: 0o755,
            acl: Vec::new(),
        }
    }

    /// Default document permission for a creating principal (mode 0644).
    #[must_use]
    pub fn document_default(subject: &Subject) -> Self {
        Self {
            owner: subject.name.clone(),
            group: subject.groups.first().cloned().unwrap_or_else(|| "dba".to_string()),
            mode: 0o644,
            acl: Vec::new(),
        }
    }

    /// True when the setgid bit is set; children then inherit the group.
    #[inline]
    #[must_use]
    pub fn is_setgid(&self) -> bool {
        self.mode & MODE_SETGID != 0
    }

    /// Validate that `subject` holds every bit in `access`.
    #[must_use]
    pub fn validate(&self, subject: &Subject, access: Access) -> bool {
        if subject.dba {
            return true;
        }
        let wanted = u16::from(access.bits());
        if subject.name == self.owner {
            return (self.mode >> SHIFT_OWNER) & wanted == wanted;
        }
        for entry in &self.acl {
            let matches = match &entry.target {
                AclTarget::User(u) => *u == subject.name,
                AclTarget::Group(g) => subject.is_in_group(g),
            };
            if matches {
                let granted = u16::from(entry.mode);
                return entry.allow && granted & wanted == wanted;
            }
        }
        if subject.is_in_group(&self.group) {
            return (self.mode >> SHIFT_GROUP) & wanted == wanted;
        }
        self.mode & wanted == wanted
    }

    /// Copy mode, ACL, ownership and nothing else from `src` (used by
    /// preserve-mode copies onto freshly created targets).
    pub fn preserve_from(&mut self, src: &Permission) {
        self.owner = src.owner.clone();
        self.group = src.group.clone();
        self.mode = src.mode;
        self.acl = src.acl.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(name: &str, groups: &[&str]) -> Subject {
        Subject::new(name, groups.iter().map(|s| s.to_string()).collect(), false)
    }

    fn perm(owner: &str, group: &str, mode: u16) -> Permission {
        Permission {
            owner: owner.to_string(),
            group: group.to_string(),
            mode,
            acl: Vec::new(),
        }
    }

    #[test]
    fn dba_bypasses_everything() {
        let p = perm("alice", "staff", 0o000);
        assert!(p.validate(&Subject::system(), Access::READ.and(Access::WRITE)));
    }

    #[test]
    fn owner_group_other_rows() {
        let p = perm("alice", "staff", 0o750);
        assert!(p.validate(&subject("alice", &[]), Access::READ.and(Access::WRITE)));
        assert!(p.validate(&subject("bob", &["staff"]), Access::READ.and(Access::EXECUTE)));
        assert!(!p.validate(&subject("bob", &["staff"]), Access::WRITE));
        assert!(!p.validate(&subject("eve", &[]), Access::READ));
    }

    #[test]
    fn owner_row_is_authoritative_even_when_weaker() {
        // Owner with 0o077: the owner row denies even though "other" allows.
        let p = perm("alice", "staff", 0o077);
        assert!(!p.validate(&subject("alice", &[]), Access::READ));
        assert!(p.validate(&subject("eve", &[]), Access::READ));
    }

    #[test]
    fn acl_entry_overrides_group_row() {
        let mut p = perm("alice", "staff", 0o700);
        p.acl.push(AclEntry {
            target: AclTarget::User("bob".to_string()),
            allow: true,
            mode: 0o5,
        });
        assert!(p.validate(&subject("bob", &[]), Access::READ.and(Access::EXECUTE)));
        assert!(!p.validate(&subject("bob", &[]), Access::WRITE));
    }

    #[test]
    fn deny_acl_entry_short_circuits() {
        let mut p = perm("alice", "staff", 0o777);
        p.acl.push(AclEntry {
            target: AclTarget::Group("staff".to_string()),
            allow: false,
            mode: 0o7,
        });
        assert!(!p.validate(&subject("bob", &["staff"]), Access::READ));
    }

    #[test]
    fn setgid_bit() {
        assert!(perm("a", "g", 0o2755).is_setgid());
        assert!(!perm("a", "g", 0o755).is_setgid());
    }
}
