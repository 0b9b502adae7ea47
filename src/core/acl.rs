use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use super::{ObjectError, Result};

pub const PUBLIC_KEY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Access {
    read: Option<bool>,
    write: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessKind {
    Read,
    Write,
}

/// Access control list keyed by subject: `*`, `role:<name>` or a user id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Acl {
    grants: BTreeMap<String, Access>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// ACL granting read and write to a single user.
    pub fn for_user(user_id: &str) -> Result<Self> {
        let mut acl = Self::new();
        acl.set_read_access(user_id, true)?;
        acl.set_write_access(user_id, true)?;
        Ok(acl)
    }

    /// Build from the wire map `{subject: {read?, write?}}`.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let map = match value {
            JsonValue::Object(map) => map,
            // Some backends serialize an empty ACL as an empty array.
            JsonValue::Array(items) if items.is_empty() => return Ok(Self::new()),
            other => {
                return Err(ObjectError::InvalidArgument(format!(
                    "Invalid ACL data: {}",
                    other
                )));
            }
        };

        let mut grants = BTreeMap::new();
        for (subject, attrs) in map {
            let read = attrs.get("read").and_then(JsonValue::as_bool);
            let write = attrs.get("write").and_then(JsonValue::as_bool);
            if read.is_none() && write.is_none() {
                return Err(ObjectError::InvalidArgument(format!(
                    "Invalid ACL access type for '{}'",
                    subject
                )));
            }
            grants.insert(subject.clone(), Access { read, write });
        }
        Ok(Self { grants })
    }

    /// Wire form. Always an object, `{}` when empty.
    pub fn to_json(&self) -> JsonValue {
        let mut out = Map::new();
        for (subject, access) in &self.grants {
            let mut attrs = Map::new();
            if let Some(read) = access.read {
                attrs.insert("read".into(), JsonValue::Bool(read));
            }
            if let Some(write) = access.write {
                attrs.insert("write".into(), JsonValue::Bool(write));
            }
            out.insert(subject.clone(), JsonValue::Object(attrs));
        }
        JsonValue::Object(out)
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.grants.keys().map(String::as_str)
    }

    fn set_access(&mut self, subject: &str, kind: AccessKind, flag: bool) -> Result<()> {
        if subject.is_empty() {
            return Err(ObjectError::InvalidArgument(
                "ACL target cannot be empty".into(),
            ));
        }
        let access = self.grants.entry(subject.to_string()).or_default();
        match kind {
            AccessKind::Read => access.read = Some(flag),
            AccessKind::Write => access.write = Some(flag),
        }
        Ok(())
    }

    fn access(&self, subject: &str, kind: AccessKind) -> bool {
        self.grants
            .get(subject)
            .and_then(|access| match kind {
                AccessKind::Read => access.read,
                AccessKind::Write => access.write,
            })
            .unwrap_or(false)
    }

    pub fn public_read_access(&self) -> bool {
        self.access(PUBLIC_KEY, AccessKind::Read)
    }

    pub fn public_write_access(&self) -> bool {
        self.access(PUBLIC_KEY, AccessKind::Write)
    }

    pub fn set_public_read_access(&mut self, flag: bool) -> &mut Self {
        self.grants.entry(PUBLIC_KEY.to_string()).or_default().read = Some(flag);
        self
    }

    pub fn set_public_write_access(&mut self, flag: bool) -> &mut Self {
        self.grants.entry(PUBLIC_KEY.to_string()).or_default().write = Some(flag);
        self
    }

    pub fn role_read_access(&self, role: &str) -> bool {
        self.access(&format!("role:{}", role), AccessKind::Read)
    }

    pub fn role_write_access(&self, role: &str) -> bool {
        self.access(&format!("role:{}", role), AccessKind::Write)
    }

    pub fn set_role_read_access(&mut self, role: &str, flag: bool) -> Result<&mut Self> {
        if role.is_empty() {
            return Err(ObjectError::InvalidArgument("role name cannot be empty".into()));
        }
        self.set_access(&format!("role:{}", role), AccessKind::Read, flag)?;
        Ok(self)
    }

    pub fn set_role_write_access(&mut self, role: &str, flag: bool) -> Result<&mut Self> {
        if role.is_empty() {
            return Err(ObjectError::InvalidArgument("role name cannot be empty".into()));
        }
        self.set_access(&format!("role:{}", role), AccessKind::Write, flag)?;
        Ok(self)
    }

    pub fn read_access(&self, user_id: &str) -> bool {
        self.access(user_id, AccessKind::Read)
    }

    pub fn write_access(&self, user_id: &str) -> bool {
        self.access(user_id, AccessKind::Write)
    }

    pub fn set_read_access(&mut self, user_id: &str, flag: bool) -> Result<&mut Self> {
        self.set_access(user_id, AccessKind::Read, flag)?;
        Ok(self)
    }

    pub fn set_write_access(&mut self, user_id: &str, flag: bool) -> Result<&mut Self> {
        self.set_access(user_id, AccessKind::Write, flag)?;
        Ok(self)
    }
}
