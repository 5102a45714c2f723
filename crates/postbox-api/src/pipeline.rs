//! The validated-write pipeline shared by user creation, user upsert and
//! message creation.
//!
//! A write runs, strictly in order:
//! 1. field checks over the raw JSON object, stopping at the first failure;
//! 2. reference checks against the store, with the caller's identity compared
//!    to the owning reference when a caller is known;
//! 3. exactly one persistence call.
//!
//! Nothing is written unless every check passed.

use anyhow::anyhow;
use serde_json::{Map, Value};

use postbox_types::models::{EntityKind, Identity, NewMessage, NewUser, UserRename};

use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, run_blocking};

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    String,
    Number,
    Boolean,
}

impl ExpectedType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub expected: ExpectedType,
    /// Reject strings that are empty once trimmed, and keep the trimmed form.
    pub trim_empty_check: bool,
}

impl FieldSpec {
    /// A required string that must not be blank.
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            expected: ExpectedType::String,
            trim_empty_check: true,
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }

    pub const fn untrimmed(self) -> Self {
        Self {
            trim_empty_check: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceCheck {
    pub field: &'static str,
    pub kind: EntityKind,
}

/// The checks one endpoint runs before it may write.
#[derive(Debug, Clone, Copy)]
pub struct WriteSpec {
    pub fields: &'static [FieldSpec],
    pub references: &'static [ReferenceCheck],
    /// Reference (to a user) that must resolve to the authenticated caller.
    pub owner: Option<&'static str>,
}

pub const NEW_USER: WriteSpec = WriteSpec {
    fields: &[FieldSpec::text("username"), FieldSpec::text("password")],
    references: &[],
    owner: None,
};

pub const USER_RENAME: WriteSpec = WriteSpec {
    fields: &[FieldSpec::text("username")],
    references: &[],
    owner: None,
};

pub const NEW_MESSAGE: WriteSpec = WriteSpec {
    fields: &[
        FieldSpec::text("text"),
        FieldSpec::text("to"),
        FieldSpec::text("from"),
    ],
    references: &[
        ReferenceCheck { field: "from", kind: EntityKind::User },
        ReferenceCheck { field: "to", kind: EntityKind::User },
    ],
    owner: Some("from"),
};

/// The subset of a payload that passed every field check. Keys not named by
/// a field spec are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validated(Payload);

impl Validated {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    fn take_string(&mut self, name: &str) -> anyhow::Result<String> {
        match self.0.remove(name) {
            Some(Value::String(s)) => Ok(s),
            _ => Err(anyhow!("validated payload has no string field {}", name)),
        }
    }

    pub fn into_new_user(mut self) -> anyhow::Result<NewUser> {
        Ok(NewUser {
            username: self.take_string("username")?,
            password: self.take_string("password")?,
        })
    }

    pub fn into_user_rename(mut self) -> anyhow::Result<UserRename> {
        Ok(UserRename {
            username: self.take_string("username")?,
        })
    }

    pub fn into_new_message(mut self) -> anyhow::Result<NewMessage> {
        Ok(NewMessage {
            text: self.take_string("text")?,
            from: self.take_string("from")?,
            to: self.take_string("to")?,
        })
    }
}

/// Decode a request body into a JSON object.
///
/// A well-formed body that is not an object carries no fields, so it fails
/// on the first required field rather than here.
pub fn parse_payload(body: &[u8]) -> Result<Payload, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::NoBody);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Ok(Payload::new()),
        Err(_) => Err(ApiError::MalformedBody),
    }
}

/// Run the field specs in order and return the first failure.
pub fn validate(payload: &Payload, fields: &[FieldSpec]) -> Result<Validated, ApiError> {
    let mut accepted = Payload::new();

    for spec in fields {
        let Some(value) = payload.get(spec.name) else {
            if spec.required {
                return Err(ApiError::MissingField(spec.name));
            }
            continue;
        };

        if !spec.expected.matches(value) {
            return Err(ApiError::WrongType(spec.name));
        }

        let value = match value {
            Value::String(s) if spec.trim_empty_check => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ApiError::EmptyValue(spec.name));
                }
                Value::String(trimmed.to_string())
            }
            other => other.clone(),
        };

        accepted.insert(spec.name.to_string(), value);
    }

    Ok(Validated(accepted))
}

/// Resolve every reference in order. When `caller` is given, the owner
/// reference must resolve to a user with the caller's username; that
/// comparison happens as soon as the owner resolves.
pub async fn check_references(
    state: &AppState,
    validated: &Validated,
    spec: &WriteSpec,
    caller: Option<&Identity>,
) -> Result<(), ApiError> {
    for check in spec.references {
        // Field specs have already guaranteed a string for every reference.
        let id = validated
            .str(check.field)
            .ok_or(ApiError::MissingField(check.field))?
            .to_string();

        let owner_check = spec.owner == Some(check.field) && check.kind == EntityKind::User;
        match caller {
            Some(caller) if owner_check => {
                let user = run_blocking(state, move |s| s.db.get_user_by_id(&id)).await?;
                let user = user.ok_or(ApiError::UnresolvedReference(check.field))?;
                if user.username != caller.username {
                    return Err(ApiError::IdentityMismatch);
                }
            }
            _ => {
                let kind = check.kind;
                if !run_blocking(state, move |s| s.db.exists(kind, &id)).await? {
                    return Err(ApiError::UnresolvedReference(check.field));
                }
            }
        }
    }

    Ok(())
}

/// Validate `payload` against `spec`, resolve its references, then hand the
/// validated subset to `persist`, which runs once on a blocking thread.
/// A failure inside `persist` is reported as a store error.
pub async fn submit<F, T>(
    state: &AppState,
    payload: &Payload,
    spec: &WriteSpec,
    caller: Option<&Identity>,
    persist: F,
) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner, Validated) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let validated = validate(payload, spec.fields)?;
    check_references(state, &validated, spec, caller).await?;
    run_blocking(state, move |s| persist(s, validated)).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use postbox_db::Database;

    use super::*;
    use crate::state::{AppStateInner, Policy};

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn state_with_users() -> AppState {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u-alice", "alice", "hash-a").unwrap();
        db.create_user("u-bob", "bob", "hash-b").unwrap();
        AppStateInner::new(db, Policy::default())
    }

    fn identity(id: &str, username: &str) -> Identity {
        Identity {
            id: id.into(),
            username: username.into(),
        }
    }

    #[test]
    fn reports_first_missing_field_in_declared_order() {
        let err = validate(&payload(json!({})), NEW_USER.fields).unwrap_err();
        assert!(matches!(err, ApiError::MissingField("username")));

        let err = validate(&payload(json!({ "password": "x" })), NEW_USER.fields).unwrap_err();
        assert!(matches!(err, ApiError::MissingField("username")));

        let err = validate(&payload(json!({ "username": "alice" })), NEW_USER.fields).unwrap_err();
        assert!(matches!(err, ApiError::MissingField("password")));
    }

    #[test]
    fn earlier_failure_hides_later_ones() {
        // username is the wrong type and password is missing; only the first is reported
        let err = validate(&payload(json!({ "username": 7 })), NEW_USER.fields).unwrap_err();
        assert!(matches!(err, ApiError::WrongType("username")));

        let err = validate(&payload(json!({ "text": "  ", "to": 1 })), NEW_MESSAGE.fields)
            .unwrap_err();
        assert!(matches!(err, ApiError::EmptyValue("text")));
    }

    #[test]
    fn null_counts_as_present_but_wrong_type() {
        let err = validate(&payload(json!({ "username": null })), NEW_USER.fields).unwrap_err();
        assert!(matches!(err, ApiError::WrongType("username")));
    }

    #[test]
    fn whitespace_only_string_is_empty() {
        for blank in ["", " ", "   ", "\t\n"] {
            let err = validate(
                &payload(json!({ "username": blank, "password": "secret1" })),
                NEW_USER.fields,
            )
            .unwrap_err();
            assert!(matches!(err, ApiError::EmptyValue("username")), "{blank:?}");
        }
    }

    #[test]
    fn accepted_strings_are_trimmed_and_extras_dropped() {
        let validated = validate(
            &payload(json!({ "username": "  alice ", "password": " secret1", "admin": true })),
            NEW_USER.fields,
        )
        .unwrap();

        assert!(validated.get("admin").is_none());
        let user = validated.into_new_user().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.password, "secret1");
    }

    #[test]
    fn untrimmed_and_optional_specs() {
        const FIELDS: &[FieldSpec] = &[
            FieldSpec::text("note").untrimmed(),
            FieldSpec::text("nick").optional(),
            FieldSpec {
                name: "count",
                required: false,
                expected: ExpectedType::Number,
                trim_empty_check: false,
            },
        ];

        let validated = validate(&payload(json!({ "note": "  " })), FIELDS).unwrap();
        assert_eq!(validated.str("note"), Some("  "));
        assert!(validated.get("nick").is_none());

        let err = validate(&payload(json!({ "note": "a", "count": "3" })), FIELDS).unwrap_err();
        assert!(matches!(err, ApiError::WrongType("count")));

        let validated = validate(&payload(json!({ "note": "a", "count": 3 })), FIELDS).unwrap();
        assert_eq!(validated.get("count"), Some(&json!(3)));
    }

    #[test]
    fn parse_payload_distinguishes_empty_and_malformed() {
        assert!(matches!(parse_payload(b""), Err(ApiError::NoBody)));
        assert!(matches!(parse_payload(b"  \n"), Err(ApiError::NoBody)));
        assert!(matches!(parse_payload(b"{"), Err(ApiError::MalformedBody)));
        assert!(parse_payload(b"[1, 2]").unwrap().is_empty());
        assert_eq!(parse_payload(br#"{"a":1}"#).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unresolved_from_wins_regardless_of_to() {
        let state = state_with_users();
        for to in ["u-bob", "u-nobody"] {
            let body = payload(json!({ "text": "hi", "from": "u-ghost", "to": to }));
            let err = submit(&state, &body, &NEW_MESSAGE, None, |_, _| Ok(()))
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::UnresolvedReference("from")), "to = {to}");
        }
    }

    #[tokio::test]
    async fn unresolved_to_after_from_resolves() {
        let state = state_with_users();
        let body = payload(json!({ "text": "hi", "from": "u-alice", "to": "u-ghost" }));
        let err = submit(&state, &body, &NEW_MESSAGE, None, |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnresolvedReference("to")));
    }

    #[tokio::test]
    async fn identity_check_only_with_a_caller() {
        let state = state_with_users();
        let body = payload(json!({ "text": "hi", "from": "u-alice", "to": "u-bob" }));

        let err = submit(&state, &body, &NEW_MESSAGE, Some(&identity("u-bob", "bob")), |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IdentityMismatch));

        submit(&state, &body, &NEW_MESSAGE, Some(&identity("u-alice", "alice")), |_, _| Ok(()))
            .await
            .unwrap();
        submit(&state, &body, &NEW_MESSAGE, None, |_, _| Ok(())).await.unwrap();
    }

    #[tokio::test]
    async fn identity_mismatch_precedes_unresolved_to() {
        let state = state_with_users();
        let body = payload(json!({ "text": "hi", "from": "u-alice", "to": "u-ghost" }));
        let err = submit(&state, &body, &NEW_MESSAGE, Some(&identity("u-bob", "bob")), |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IdentityMismatch));
    }

    #[tokio::test]
    async fn persist_runs_once_and_only_after_all_checks() {
        let state = state_with_users();
        let calls = Arc::new(AtomicUsize::new(0));

        let rejected = [
            json!({ "from": "u-alice", "to": "u-bob" }),
            json!({ "text": "hi", "from": "u-alice", "to": "u-ghost" }),
        ];
        for body in rejected {
            let counter = calls.clone();
            let result = submit(&state, &payload(body), &NEW_MESSAGE, None, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let counter = calls.clone();
        let body = payload(json!({ "text": " hi ", "from": "u-alice", "to": "u-bob" }));
        let message = submit(&state, &body, &NEW_MESSAGE, None, move |_, v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v.into_new_message()
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(message.text, "hi");
        assert_eq!(message.from, "u-alice");
    }

    #[tokio::test]
    async fn duplicate_key_creation_surfaces_store_error() {
        let state = state_with_users();
        let body = payload(json!({ "username": "carol", "password": "pw" }));

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let outcome = submit(&state, &body, &NEW_USER, None, |s, v| {
                let user = v.into_new_user()?;
                s.db.create_user("u-carol", &user.username, &user.password)
            })
            .await;
            outcomes.push(outcome);
        }

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(ApiError::Store(_))));
        assert_eq!(state.db.list_users().unwrap().len(), 3);
    }
}
