//! Role-based permission evaluation over a model's permission table.
//!
//! Roles are checked in the order admin > owner > user > all. `owner` is contextual: it only
//! grants access to records whose `_owner_id` matches the acting principal, so an owner-only
//! grant comes back as `owner_scoped` and the caller must enforce it per record.

use crate::config::{Model, PermsConfig};
use crate::extractors::principal::Principal;
use crate::store::{Document, OWNER_FIELD};
use serde::Serialize;
use serde_json::{Map, Value};

/// Model name whose `admin` flag only administrators may set.
pub const USER_MODEL: &str = "user";
pub const ADMIN_FIELD: &str = "admin";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::Update => "update",
            Verb::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Parsed capability string such as `"crud"` or `"r"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

impl Capabilities {
    pub fn allows(self, verb: Verb) -> bool {
        match verb {
            Verb::Create => self.create,
            Verb::Read => self.read,
            Verb::Update => self.update,
            Verb::Delete => self.delete,
        }
    }

    pub fn is_empty(self) -> bool {
        !(self.create || self.read || self.update || self.delete)
    }
}

impl std::str::FromStr for Capabilities {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut caps = Capabilities::default();
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'c' => caps.create = true,
                'r' => caps.read = true,
                'u' => caps.update = true,
                'd' => caps.delete = true,
                _ => return Err(s.to_string()),
            }
        }
        Ok(caps)
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (on, c) in [
            (self.create, 'c'),
            (self.read, 'r'),
            (self.update, 'u'),
            (self.delete, 'd'),
        ] {
            if on {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermissionTable {
    pub admin: Capabilities,
    pub owner: Capabilities,
    pub user: Capabilities,
    pub all: Capabilities,
}

impl PermissionTable {
    /// Error carries the offending role and capability string.
    pub fn from_config(config: &PermsConfig) -> Result<Self, (&'static str, String)> {
        fn parse(role: &'static str, v: &Option<String>) -> Result<Capabilities, (&'static str, String)> {
            match v {
                Some(s) => s.parse().map_err(|bad| (role, bad)),
                None => Ok(Capabilities::default()),
            }
        }
        Ok(PermissionTable {
            admin: parse("admin", &config.admin)?,
            owner: parse("owner", &config.owner)?,
            user: parse("user", &config.user)?,
            all: parse("all", &config.all)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.admin.is_empty() && self.owner.is_empty() && self.user.is_empty() && self.all.is_empty()
    }

    pub fn describe(&self) -> Value {
        let mut out = Map::new();
        for (role, caps) in [
            ("admin", self.admin),
            ("owner", self.owner),
            ("user", self.user),
            ("all", self.all),
        ] {
            if !caps.is_empty() {
                out.insert(role.to_string(), Value::String(caps.to_string()));
            }
        }
        Value::Object(out)
    }

    pub fn evaluate(&self, principal: Option<&Principal>, verb: Verb) -> Access {
        let is_admin = principal.map(|p| p.admin).unwrap_or(false);
        let authenticated = principal.is_some();

        let unscoped = (is_admin && self.admin.allows(verb))
            || (authenticated && self.user.allows(verb))
            || self.all.allows(verb);
        if unscoped {
            return Access::granted();
        }
        if authenticated && self.owner.allows(verb) {
            return Access::owner_scoped();
        }
        Access::denied()
    }
}

/// Outcome of permission evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Access {
    pub allowed: bool,
    /// Access only applies to records owned by the acting principal.
    pub owner_scoped: bool,
}

impl Access {
    pub fn granted() -> Self {
        Access {
            allowed: true,
            owner_scoped: false,
        }
    }

    pub fn owner_scoped() -> Self {
        Access {
            allowed: true,
            owner_scoped: true,
        }
    }

    pub fn denied() -> Self {
        Access {
            allowed: false,
            owner_scoped: false,
        }
    }
}

pub fn can_perform(model: &Model, principal: Option<&Principal>, verb: Verb) -> Access {
    model.perms.evaluate(principal, verb)
}

/// Record-level check for owner-scoped access.
pub fn owns(record: &Document, principal: Option<&Principal>) -> bool {
    match (principal, record.get(OWNER_FIELD)) {
        (Some(p), Some(Value::String(owner))) => *owner == p.id,
        _ => false,
    }
}

/// Drop any attempt by a non-administrator to set the `admin` flag on the user model.
/// Covers bracket-notation keys such as `admin[0]` as well.
pub fn strip_admin_elevation(model_name: &str, principal: Option<&Principal>, body: &mut Map<String, Value>) {
    if model_name != USER_MODEL || principal.map(|p| p.admin).unwrap_or(false) {
        return;
    }
    let keys: Vec<String> = body
        .keys()
        .filter(|k| *k == ADMIN_FIELD || k.starts_with("admin["))
        .cloned()
        .collect();
    for k in keys {
        tracing::warn!(field = %k, "ignoring admin flag from non-administrator");
        body.remove(&k);
    }
}
