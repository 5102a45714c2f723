use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use postbox_types::models::EntityKind;
use rusqlite::{Connection, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, username, password, created_at";

// Both references are LEFT JOINed so a message survives the deletion of
// either of its users.
const MESSAGE_SELECT: &str = "SELECT m.id, m.text, m.from_id, f.username, m.to_id, t.username, m.created_at
     FROM messages m
     LEFT JOIN users f ON m.from_id = f.id
     LEFT JOIN users t ON m.to_id = t.id";

impl Database {
    // -- Users --

    /// Fails on a duplicate id or username; nothing is overwritten.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, rowid"
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    /// Resolve `key` as an id first, then as a username.
    pub fn find_user(&self, key: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| match query_user(conn, "id", key)? {
            Some(user) => Ok(Some(user)),
            None => query_user(conn, "username", key),
        })
    }

    /// Returns `false` when no user has this id.
    pub fn rename_user(&self, id: &str, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("UPDATE users SET username = ?1 WHERE id = ?2", (username, id))?;
            Ok(changed > 0)
        })
    }

    /// Returns `false` when no user has this id.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, id: &str, text: &str, from_id: &str, to_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, text, from_id, to_id) VALUES (?1, ?2, ?3, ?4)",
                (id, text, from_id, to_id),
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"), [id], message_from_row)
                .optional()?;
            Ok(row)
        })
    }

    /// Messages matching every filter that is set, oldest first.
    pub fn get_messages(&self, from_id: Option<&str>, to_id: Option<&str>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE (?1 IS NULL OR m.from_id = ?1)
                   AND (?2 IS NULL OR m.to_id = ?2)
                 ORDER BY m.created_at, m.rowid"
            ))?;
            let rows = stmt
                .query_map((from_id, to_id), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- References --

    /// Existence lookup by primary key.
    pub fn exists(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let table = match kind {
            EntityKind::User => "users",
            EntityKind::Message => "messages",
        };
        self.with_conn(|conn| {
            let found = conn
                .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?1"), [id], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"
    ))?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        text: row.get(1)?,
        from_id: row.get(2)?,
        from_username: row.get(3)?,
        to_id: row.get(4)?,
        to_username: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u-alice", "alice", "hash-a").unwrap();
        db.create_user("u-bob", "bob", "hash-b").unwrap();
        db
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let db = db_with_users();
        assert!(db.create_user("u-alice", "alice2", "hash").is_err());

        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = db_with_users();
        assert!(db.create_user("u-other", "alice", "hash").is_err());
    }

    #[test]
    fn find_user_falls_back_to_username() {
        let db = db_with_users();
        assert_eq!(db.find_user("u-bob").unwrap().unwrap().username, "bob");
        assert_eq!(db.find_user("bob").unwrap().unwrap().id, "u-bob");
        assert!(db.find_user("carol").unwrap().is_none());
    }

    #[test]
    fn rename_reports_missing_user() {
        let db = db_with_users();
        assert!(db.rename_user("u-alice", "alicia").unwrap());
        assert!(!db.rename_user("u-nobody", "ghost").unwrap());

        let alice = db.get_user_by_id("u-alice").unwrap().unwrap();
        assert_eq!(alice.username, "alicia");
        assert!(db.get_user_by_username("ghost").unwrap().is_none());
    }

    #[test]
    fn delete_user_once() {
        let db = db_with_users();
        assert!(db.delete_user("u-bob").unwrap());
        assert!(!db.delete_user("u-bob").unwrap());
        assert!(!db.exists(EntityKind::User, "u-bob").unwrap());
    }

    #[test]
    fn messages_filter_by_sender_and_recipient() {
        let db = db_with_users();
        db.insert_message("m1", "hi bob", "u-alice", "u-bob").unwrap();
        db.insert_message("m2", "hi alice", "u-bob", "u-alice").unwrap();
        db.insert_message("m3", "again", "u-alice", "u-bob").unwrap();

        assert_eq!(db.get_messages(None, None).unwrap().len(), 3);

        let from_alice = db.get_messages(Some("u-alice"), None).unwrap();
        let ids: Vec<_> = from_alice.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m3"]);

        let to_alice = db.get_messages(None, Some("u-alice")).unwrap();
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0].text, "hi alice");

        assert!(db.get_messages(Some("u-alice"), Some("u-alice")).unwrap().is_empty());
    }

    #[test]
    fn message_references_expand_to_usernames() {
        let db = db_with_users();
        db.insert_message("m1", "hi", "u-alice", "u-bob").unwrap();

        let row = db.get_message("m1").unwrap().unwrap();
        assert_eq!(row.from_username.as_deref(), Some("alice"));
        assert_eq!(row.to_username.as_deref(), Some("bob"));
    }

    #[test]
    fn dangling_reference_expands_to_none() {
        let db = db_with_users();
        db.insert_message("m1", "hi", "u-alice", "u-bob").unwrap();
        db.delete_user("u-bob").unwrap();

        let row = db.get_message("m1").unwrap().unwrap();
        assert_eq!(row.to_id, "u-bob");
        assert!(row.to_username.is_none());
        assert_eq!(row.from_username.as_deref(), Some("alice"));
    }

    #[test]
    fn exists_checks_the_right_table() {
        let db = db_with_users();
        db.insert_message("m1", "hi", "u-alice", "u-bob").unwrap();

        assert!(db.exists(EntityKind::User, "u-alice").unwrap());
        assert!(!db.exists(EntityKind::User, "m1").unwrap());
        assert!(db.exists(EntityKind::Message, "m1").unwrap());
        assert!(db.get_message("missing").unwrap().is_none());
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = db_with_users();
        db.with_conn(|conn| crate::migrations::run(conn)).unwrap();
        assert_eq!(db.list_users().unwrap().len(), 2);
    }
}
