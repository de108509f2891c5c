use crate::Database;
use crate::geo::{self, BoundingBox};
use crate::models::{
    AppendOutcome, CardFilter, CardRow, ChatMessageRow, ChatRow, NewCard, NewUser, UNKNOWN_USERNAME,
    UserRow, UserUpdate, now_timestamp,
};
use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, password, role, phone_number, created_at";

const CARD_SELECT: &str = "SELECT c.id, c.card_type, c.item_name, c.description, c.phone_number,
        c.category, c.image_url, c.longitude, c.latitude, c.address, c.user_id, u.username, c.created_at
     FROM cards c
     LEFT JOIN users u ON c.user_id = u.id";

const CHAT_SELECT: &str = "SELECT ch.id, ch.participant_one, u1.username, ch.participant_two, u2.username,
        ch.card_id, c.item_name, c.image_url, ch.created_at, ch.updated_at
     FROM chats ch
     LEFT JOIN users u1 ON u1.id = ch.participant_one
     LEFT JOIN users u2 ON u2.id = ch.participant_two
     LEFT JOIN cards c ON c.id = ch.card_id";

impl Database {
    // -- Users --

    /// Insert a user and return the stored row.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    created_at
                ],
            )?;
            Ok(())
        })?;

        Ok(UserRow {
            id,
            username: user.username.to_string(),
            email: user.email.to_string(),
            password: user.password_hash.to_string(),
            role: user.role.as_str().to_string(),
            phone_number: None,
            created_at,
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at DESC",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply a partial update. Returns `false` if the user does not exist.
    pub fn update_user(&self, id: &str, update: &UserUpdate) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    username = COALESCE(?1, username),
                    email = COALESCE(?2, email),
                    phone_number = COALESCE(?3, phone_number),
                    password = COALESCE(?4, password)
                 WHERE id = ?5",
                rusqlite::params![
                    update.username,
                    update.email,
                    update.phone_number,
                    update.password_hash,
                    id
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Delete a user. Their cards go with them (ON DELETE CASCADE); chats and
    /// messages stay and render the sender as unknown.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Cards --

    pub fn insert_card(&self, card: &NewCard) -> Result<CardRow> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cards (id, card_type, item_name, description, phone_number, category,
                    image_url, longitude, latitude, address, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    id,
                    card.card_type.as_str(),
                    card.item_name,
                    card.description,
                    card.phone_number,
                    card.category,
                    card.image_url,
                    card.longitude,
                    card.latitude,
                    card.address,
                    card.user_id,
                    created_at
                ],
            )?;
            query_card(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Card vanished after insert: {}", id))
        })
    }

    pub fn get_card(&self, id: &str) -> Result<Option<CardRow>> {
        self.with_conn(|conn| query_card(conn, id))
    }

    /// Newest first. `search` matches item name or description,
    /// case-insensitively.
    pub fn list_cards(&self, filter: &CardFilter) -> Result<Vec<CardRow>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(card_type) = filter.card_type {
            clauses.push("c.card_type = ?");
            values.push(card_type.as_str().to_string());
        }
        if let Some(category) = &filter.category {
            clauses.push("c.category = ?");
            values.push(category.clone());
        }
        if let Some(search) = &filter.search {
            clauses.push("(instr(lower(c.item_name), lower(?)) > 0 OR instr(lower(c.description), lower(?)) > 0)");
            values.push(search.clone());
            values.push(search.clone());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("{}{} ORDER BY c.created_at DESC, c.rowid DESC", CARD_SELECT, where_sql);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values.iter()), map_card)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_cards_by_user(&self, user_id: &str) -> Result<Vec<CardRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE c.user_id = ?1 ORDER BY c.created_at DESC, c.rowid DESC",
                CARD_SELECT
            ))?;
            let rows = stmt
                .query_map([user_id], map_card)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Cards within `radius_m` metres of the point, nearest first, paired
    /// with their distance.
    pub fn cards_within(&self, lng: f64, lat: f64, radius_m: f64) -> Result<Vec<(CardRow, f64)>> {
        let bbox = BoundingBox::around(lng, lat, radius_m);

        let candidates = self.with_conn(|conn| {
            let rows = match bbox.lng_range {
                Some((min_lng, max_lng)) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE c.latitude BETWEEN ?1 AND ?2 AND c.longitude BETWEEN ?3 AND ?4",
                        CARD_SELECT
                    ))?;
                    stmt.query_map(
                        rusqlite::params![bbox.min_lat, bbox.max_lat, min_lng, max_lng],
                        map_card,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE c.latitude BETWEEN ?1 AND ?2",
                        CARD_SELECT
                    ))?;
                    stmt.query_map(rusqlite::params![bbox.min_lat, bbox.max_lat], map_card)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })?;

        let mut nearby: Vec<(CardRow, f64)> = candidates
            .into_iter()
            .map(|card| {
                let d = geo::distance_m(lng, lat, card.longitude, card.latitude);
                (card, d)
            })
            .filter(|(_, d)| *d <= radius_m)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(nearby)
    }

    /// Overwrite the mutable columns of a card with the row's values.
    pub fn update_card(&self, card: &CardRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE cards SET card_type = ?1, item_name = ?2, description = ?3, phone_number = ?4,
                    category = ?5, image_url = ?6, longitude = ?7, latitude = ?8, address = ?9
                 WHERE id = ?10",
                rusqlite::params![
                    card.card_type,
                    card.item_name,
                    card.description,
                    card.phone_number,
                    card.category,
                    card.image_url,
                    card.longitude,
                    card.latitude,
                    card.address,
                    card.id
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete_card(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM cards WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Image URLs of every card owned by the user, for file cleanup.
    pub fn card_images_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT image_url FROM cards WHERE user_id = ?1 AND image_url IS NOT NULL")?;
            let urls = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(urls)
        })
    }

    // -- Chats --

    /// Return the chat between the two users for this card, creating it if
    /// needed. The flag is `true` when a new chat was created. Participant
    /// order is irrelevant for matching; a new chat stores the creator first.
    pub fn find_or_create_chat(
        &self,
        creator_id: &str,
        participant_id: &str,
        card_id: Option<&str>,
    ) -> Result<(ChatRow, bool)> {
        let pair = pair_key(creator_id, participant_id);
        let card_key = card_id.unwrap_or("");

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM chats WHERE pair_key = ?1 AND card_key = ?2",
                    rusqlite::params![pair, card_key],
                    |row| row.get(0),
                )
                .optional()?;

            let (id, created) = match existing {
                Some(id) => (id, false),
                None => {
                    let id = Uuid::new_v4().to_string();
                    let now = now_timestamp();
                    tx.execute(
                        "INSERT INTO chats (id, participant_one, participant_two, pair_key, card_id, card_key,
                            created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                        rusqlite::params![id, creator_id, participant_id, pair, card_id, card_key, now],
                    )?;
                    (id, true)
                }
            };

            let chat = query_chat(&tx, &id)?
                .ok_or_else(|| anyhow::anyhow!("Chat vanished inside transaction: {}", id))?;
            tx.commit()?;
            Ok((chat, created))
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    /// Every chat the user participates in, most recently updated first,
    /// each with its last message.
    pub fn get_chats_for_user(&self, user_id: &str) -> Result<Vec<(ChatRow, Option<ChatMessageRow>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE ch.participant_one = ?1 OR ch.participant_two = ?1
                 ORDER BY ch.updated_at DESC, ch.rowid DESC",
                CHAT_SELECT
            ))?;
            let chats = stmt
                .query_map([user_id], map_chat)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            chats
                .into_iter()
                .map(|chat| {
                    let last = query_last_message(conn, &chat.id)?;
                    Ok::<_, anyhow::Error>((chat, last))
                })
                .collect()
        })
    }

    /// Messages of a chat in append order.
    pub fn get_chat_messages(&self, chat_id: &str) -> Result<Vec<ChatMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.chat_id, m.position, m.sender_id, u.username, m.content, m.created_at
                 FROM chat_messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_id = ?1
                 ORDER BY m.position ASC",
            )?;
            let rows = stmt
                .query_map([chat_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Append a message at the next position and bump the chat's
    /// `updated_at`, in one transaction. The sender must be a participant.
    pub fn append_message(&self, chat_id: &str, sender_id: &str, content: &str) -> Result<AppendOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let participants: Option<(String, String)> = tx
                .query_row(
                    "SELECT participant_one, participant_two FROM chats WHERE id = ?1",
                    [chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((one, two)) = participants else {
                return Ok(AppendOutcome::ChatNotFound);
            };
            if sender_id != one && sender_id != two {
                return Ok(AppendOutcome::NotParticipant);
            }

            let position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM chat_messages WHERE chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )?;
            let now = now_timestamp();

            tx.execute(
                "INSERT INTO chat_messages (chat_id, position, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat_id, position, sender_id, content, now],
            )?;
            tx.execute(
                "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, chat_id],
            )?;

            let sender_username: Option<String> = tx
                .query_row("SELECT username FROM users WHERE id = ?1", [sender_id], |row| row.get(0))
                .optional()?;

            tx.commit()?;

            Ok(AppendOutcome::Appended(ChatMessageRow {
                chat_id: chat_id.to_string(),
                position,
                sender_id: sender_id.to_string(),
                sender_username,
                content: content.to_string(),
                created_at: now,
            }))
        })
    }
}

/// True when the error is a UNIQUE/constraint violation from SQLite.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn pair_key(a: &str, b: &str) -> String {
    if a <= b { format!("{}:{}", a, b) } else { format!("{}:{}", b, a) }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column))?;
    let row = stmt.query_row([value], map_user).optional()?;
    Ok(row)
}

fn query_card(conn: &Connection, id: &str) -> Result<Option<CardRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE c.id = ?1", CARD_SELECT))?;
    let row = stmt.query_row([id], map_card).optional()?;
    Ok(row)
}

fn query_chat(conn: &Connection, id: &str) -> Result<Option<ChatRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE ch.id = ?1", CHAT_SELECT))?;
    let row = stmt.query_row([id], map_chat).optional()?;
    Ok(row)
}

fn query_last_message(conn: &Connection, chat_id: &str) -> Result<Option<ChatMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.chat_id, m.position, m.sender_id, u.username, m.content, m.created_at
         FROM chat_messages m
         LEFT JOIN users u ON u.id = m.sender_id
         WHERE m.chat_id = ?1
         ORDER BY m.position DESC
         LIMIT 1",
    )?;
    let row = stmt.query_row([chat_id], map_message).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        phone_number: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_card(row: &Row<'_>) -> rusqlite::Result<CardRow> {
    Ok(CardRow {
        id: row.get(0)?,
        card_type: row.get(1)?,
        item_name: row.get(2)?,
        description: row.get(3)?,
        phone_number: row.get(4)?,
        category: row.get(5)?,
        image_url: row.get(6)?,
        longitude: row.get(7)?,
        latitude: row.get(8)?,
        address: row.get(9)?,
        user_id: row.get(10)?,
        owner_username: row
            .get::<_, Option<String>>(11)?
            .unwrap_or_else(|| UNKNOWN_USERNAME.to_string()),
        created_at: row.get(12)?,
    })
}

fn map_chat(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        participant_one: row.get(1)?,
        participant_one_username: row.get(2)?,
        participant_two: row.get(3)?,
        participant_two_username: row.get(4)?,
        card_id: row.get(5)?,
        card_item_name: row.get(6)?,
        card_image_url: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<ChatMessageRow> {
    Ok(ChatMessageRow {
        chat_id: row.get(0)?,
        position: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use giveback_types::models::{CardType, Role};

    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn user(db: &Database, name: &str) -> UserRow {
        db.create_user(&NewUser {
            username: name,
            email: &format!("{}@example.com", name),
            password_hash: "hash",
            role: Role::User,
        })
        .unwrap()
    }

    fn card(db: &Database, owner: &UserRow, name: &str, card_type: CardType, lng: f64, lat: f64) -> CardRow {
        db.insert_card(&NewCard {
            card_type,
            item_name: name.to_string(),
            description: format!("{} in good condition", name),
            phone_number: None,
            category: None,
            image_url: Some(format!("/uploads/{}.jpg", name)),
            longitude: lng,
            latitude: lat,
            address: "Tel Aviv".to_string(),
            user_id: owner.id.clone(),
        })
        .unwrap()
    }

    #[test]
    fn users_are_found_by_email_and_username() {
        let db = db();
        let dana = user(&db, "dana");

        assert_eq!(db.get_user_by_email("dana@example.com").unwrap().unwrap().id, dana.id);
        assert_eq!(db.get_user_by_username("dana").unwrap().unwrap().id, dana.id);
        assert!(db.get_user_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_a_constraint_violation() {
        let db = db();
        user(&db, "dana");
        let err = db
            .create_user(&NewUser {
                username: "other",
                email: "dana@example.com",
                password_hash: "hash",
                role: Role::User,
            })
            .unwrap_err();
        assert!(is_constraint_violation(&err));
    }

    #[test]
    fn update_user_keeps_unset_fields() {
        let db = db();
        let dana = user(&db, "dana");
        let updated = db
            .update_user(&dana.id, &UserUpdate {
                phone_number: Some("050-1234567".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(updated);

        let row = db.get_user_by_id(&dana.id).unwrap().unwrap();
        assert_eq!(row.username, "dana");
        assert_eq!(row.phone_number.as_deref(), Some("050-1234567"));
    }

    #[test]
    fn card_filters_and_search() {
        let db = db();
        let owner = user(&db, "owner");
        card(&db, &owner, "Winter Coat", CardType::Donation, 34.78, 32.08);
        card(&db, &owner, "Sleeping bag", CardType::Request, 34.78, 32.08);

        let all = db.list_cards(&CardFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].item_name, "Sleeping bag", "newest first");
        assert_eq!(all[0].owner_username, "owner");

        let donations = db
            .list_cards(&CardFilter { card_type: Some(CardType::Donation), ..Default::default() })
            .unwrap();
        assert_eq!(donations.len(), 1);
        assert_eq!(donations[0].item_name, "Winter Coat");

        let search = db
            .list_cards(&CardFilter { search: Some("COAT".into()), ..Default::default() })
            .unwrap();
        assert_eq!(search.len(), 1);

        let by_description = db
            .list_cards(&CardFilter { search: Some("good condition".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_description.len(), 2);
    }

    #[test]
    fn nearby_cards_are_sorted_by_distance() {
        let db = db();
        let owner = user(&db, "owner");
        card(&db, &owner, "far", CardType::Donation, 34.79, 32.08);
        card(&db, &owner, "here", CardType::Donation, 34.78, 32.08);
        card(&db, &owner, "jerusalem", CardType::Donation, 35.21, 31.77);

        let near = db.cards_within(34.78, 32.08, 2000.0).unwrap();
        let names: Vec<&str> = near.iter().map(|(c, _)| c.item_name.as_str()).collect();
        assert_eq!(names, vec!["here", "far"]);
        assert!(near[0].1 < 1.0);
    }

    #[test]
    fn wide_nearby_search_keeps_cards_at_the_edge() {
        let db = db();
        let owner = user(&db, "owner");
        card(&db, &owner, "edge", CardType::Donation, 18.1, 62.0);
        card(&db, &owner, "beyond", CardType::Donation, 25.0, 62.0);

        let near = db.cards_within(0.0, 60.0, 1_000_000.0).unwrap();
        let names: Vec<&str> = near.iter().map(|(c, _)| c.item_name.as_str()).collect();
        assert_eq!(names, vec!["edge"]);
    }

    #[test]
    fn update_and_delete_card() {
        let db = db();
        let owner = user(&db, "owner");
        let mut row = card(&db, &owner, "Coat", CardType::Donation, 34.78, 32.08);

        row.item_name = "Warm coat".into();
        db.update_card(&row).unwrap();
        assert_eq!(db.get_card(&row.id).unwrap().unwrap().item_name, "Warm coat");

        assert!(db.delete_card(&row.id).unwrap());
        assert!(!db.delete_card(&row.id).unwrap());
        assert!(db.get_card(&row.id).unwrap().is_none());
    }

    #[test]
    fn chat_creation_is_idempotent_per_pair_and_card() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let coat = card(&db, &b, "coat", CardType::Donation, 34.78, 32.08);

        let (first, created) = db.find_or_create_chat(&a.id, &b.id, Some(&coat.id)).unwrap();
        assert!(created);
        let (second, created) = db.find_or_create_chat(&a.id, &b.id, Some(&coat.id)).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        // Reversed pair matches the same chat.
        let (reversed, _) = db.find_or_create_chat(&b.id, &a.id, Some(&coat.id)).unwrap();
        assert_eq!(first.id, reversed.id);

        // A card-less chat between the same pair is a different chat.
        let (plain, created) = db.find_or_create_chat(&a.id, &b.id, None).unwrap();
        assert!(created);
        assert_ne!(plain.id, first.id);

        assert_eq!(first.participant_one, a.id);
        assert_eq!(first.card_ref().unwrap().item_name, "coat");
    }

    #[test]
    fn append_checks_membership() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let c = user(&db, "c");
        let (chat, _) = db.find_or_create_chat(&a.id, &b.id, None).unwrap();

        match db.append_message(&chat.id, &a.id, "hello").unwrap() {
            AppendOutcome::Appended(msg) => {
                assert_eq!(msg.position, 0);
                assert_eq!(msg.sender_username.as_deref(), Some("a"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            db.append_message(&chat.id, &c.id, "intruder").unwrap(),
            AppendOutcome::NotParticipant
        ));
        assert!(matches!(
            db.append_message("missing", &a.id, "hello").unwrap(),
            AppendOutcome::ChatNotFound
        ));

        let messages = db.get_chat_messages(&chat.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
    }

    #[test]
    fn append_bumps_updated_at_and_reorders_chat_list() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let (older, _) = db.find_or_create_chat(&a.id, &b.id, None).unwrap();
        let coat = card(&db, &b, "coat", CardType::Donation, 34.78, 32.08);
        let (newer, _) = db.find_or_create_chat(&a.id, &b.id, Some(&coat.id)).unwrap();

        let chats = db.get_chats_for_user(&a.id).unwrap();
        assert_eq!(chats[0].0.id, newer.id);

        db.append_message(&older.id, &b.id, "still available?").unwrap();
        let chats = db.get_chats_for_user(&a.id).unwrap();
        assert_eq!(chats[0].0.id, older.id);
        assert_eq!(chats[0].1.as_ref().unwrap().content, "still available?");
        assert!(chats[1].1.is_none());
        assert!(chats[0].0.updated_at > older.updated_at);
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let db = Arc::new(db());
        let a = user(&db, "a");
        let b = user(&db, "b");
        let (chat, _) = db.find_or_create_chat(&a.id, &b.id, None).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = db.clone();
                let chat_id = chat.id.clone();
                let sender = if t % 2 == 0 { a.id.clone() } else { b.id.clone() };
                std::thread::spawn(move || {
                    for i in 0..25 {
                        db.append_message(&chat_id, &sender, &format!("{}-{}", t, i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let messages = db.get_chat_messages(&chat.id).unwrap();
        assert_eq!(messages.len(), 200);
        for (i, m) in messages.iter().enumerate() {
            assert_eq!(m.position, i as i64);
        }
    }

    #[test]
    fn deleting_a_card_keeps_its_chats() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let coat = card(&db, &b, "coat", CardType::Donation, 34.78, 32.08);
        let (chat, _) = db.find_or_create_chat(&a.id, &b.id, Some(&coat.id)).unwrap();
        db.append_message(&chat.id, &a.id, "hi").unwrap();

        db.delete_card(&coat.id).unwrap();

        let chat = db.get_chat(&chat.id).unwrap().unwrap();
        assert!(chat.card_ref().is_none());
        assert_eq!(chat.card_id.as_deref(), Some(coat.id.as_str()));
        assert_eq!(db.get_chat_messages(&chat.id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_a_user_cascades_to_cards() {
        let db = db();
        let a = user(&db, "a");
        let b = user(&db, "b");
        card(&db, &b, "coat", CardType::Donation, 34.78, 32.08);
        let (chat, _) = db.find_or_create_chat(&a.id, &b.id, None).unwrap();
        db.append_message(&chat.id, &b.id, "hi").unwrap();

        assert_eq!(db.card_images_for_user(&b.id).unwrap(), vec!["/uploads/coat.jpg".to_string()]);
        assert!(db.delete_user(&b.id).unwrap());

        assert!(db.list_cards_by_user(&b.id).unwrap().is_empty());
        let messages = db.get_chat_messages(&chat.id).unwrap();
        assert_eq!(messages[0].to_message().sender.username, UNKNOWN_USERNAME);
    }
}
