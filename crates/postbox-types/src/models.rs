/// An authenticated caller, resolved by the identity gate.
/// Carries no password material and lives only for the request it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub username: String,
}

/// Kinds of entity a reference field can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Message,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Message => "Message",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Validated write payloads --
//
// Built from a payload only after every field check has passed, so the
// strings here are already trimmed and non-empty.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRename {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub from: String,
    pub to: String,
}
