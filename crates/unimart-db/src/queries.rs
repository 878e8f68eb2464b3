use crate::Database;
use crate::models::{
    ChannelRow, ConversationRow, ExchangeThreadRow, MessageRow, PresenceRow, format_timestamp,
    parse_timestamp,
};
use anyhow::Result;
use chrono::{TimeDelta, Utc};
use rusqlite::{Connection, Row};

const CONVERSATION_COLUMNS: &str = "id, participant_a, participant_b, context_type, context_id, \
     last_message, last_message_at, created_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, content, status, read_at, created_at";

impl Database {
    // -- Conversations --

    pub fn create_conversation(
        &self,
        id: &str,
        participant_a: &str,
        participant_b: &str,
        context_type: Option<&str>,
        context_id: Option<&str>,
    ) -> Result<ConversationRow> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, participant_a, participant_b, context_type, context_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, participant_a, participant_b, context_type, context_id, &created_at),
            )?;
            Ok(())
        })?;

        Ok(ConversationRow {
            id: id.to_string(),
            participant_a: participant_a.to_string(),
            participant_b: participant_b.to_string(),
            context_type: context_type.map(str::to_string),
            context_id: context_id.map(str::to_string),
            last_message: None,
            last_message_at: None,
            created_at,
        })
    }

    /// Look up the conversation between two users in a context. The pair is
    /// unordered; a missing context only matches a missing context.
    pub fn find_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        context_type: Option<&str>,
        context_id: Option<&str>,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE ((participant_a = ?1 AND participant_b = ?2) OR (participant_a = ?2 AND participant_b = ?1))
                   AND context_type IS ?3 AND context_id IS ?4
                 ORDER BY created_at
                 LIMIT 1"
            );
            conn.query_row(&sql, (user_a, user_b, context_type, context_id), conversation_from_row)
                .optional()
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
            conn.query_row(&sql, [id], conversation_from_row).optional()
        })
    }

    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY COALESCE(last_message_at, created_at) DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Separate from the message insert: a crash in between leaves a stale
    /// snapshot, and `messages` stays the source of truth.
    pub fn update_conversation_snapshot(&self, id: &str, content: &str, at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message = ?2, last_message_at = ?3
                 WHERE id = ?1 AND (last_message_at IS NULL OR last_message_at <= ?3)",
                (id, content, at),
            )?;
            Ok(())
        })
    }

    /// Participants of a conversation or of a legacy product channel. Both
    /// kinds of thread share the `messages` table.
    pub fn participants(&self, conversation_id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            let direct = conn
                .query_row(
                    "SELECT participant_a, participant_b FROM conversations WHERE id = ?1",
                    [conversation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if direct.is_some() {
                return Ok(direct);
            }

            conn.query_row(
                "SELECT buyer_id, seller_id FROM channels WHERE id = ?1",
                [conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    // -- Messages --

    /// Append a message. `created_at` is strictly greater than every earlier
    /// message in the same conversation, even if the clock stalls.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;

            let mut created_at = Utc::now();
            if let Some(latest) = latest.as_deref() {
                let latest = parse_timestamp(latest)?;
                if created_at <= latest {
                    created_at = latest + TimeDelta::microseconds(1);
                }
            }
            let created_at = format_timestamp(created_at);

            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'sent', ?6)",
                (id, conversation_id, sender_id, receiver_id, content, &created_at),
            )?;

            Ok(MessageRow {
                id: id.to_string(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                content: content.to_string(),
                status: "sent".to_string(),
                read_at: None,
                created_at,
            })
        })
    }

    /// Page of history in ascending creation order. `before` is a cursor: the
    /// `created_at` of the oldest message of the previous page.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND (?3 IS NULL OR created_at < ?3)
                 ORDER BY created_at DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map((conversation_id, limit, before), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn last_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC
                 LIMIT 1"
            );
            conn.query_row(&sql, [conversation_id], message_from_row).optional()
        })
    }

    pub fn count_unread(&self, conversation_id: &str, viewer_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND read_at IS NULL",
                (conversation_id, viewer_id),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Mark every unread message addressed to `viewer_id` as read and
    /// delivered. Rows sent by the viewer are never touched. Returns the ids
    /// that changed.
    pub fn mark_read(&self, conversation_id: &str, viewer_id: &str, read_at: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE conversation_id = ?1 AND receiver_id = ?2 AND read_at IS NULL
                     ORDER BY created_at",
                )?;
                stmt.query_map((conversation_id, viewer_id), |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            tx.execute(
                "UPDATE messages SET read_at = ?3, status = 'delivered'
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND read_at IS NULL",
                (conversation_id, viewer_id, read_at),
            )?;
            tx.commit()?;

            Ok(ids)
        })
    }

    // -- Legacy product channels --

    pub fn create_channel(&self, id: &str, product_id: &str, buyer_id: &str, seller_id: &str) -> Result<()> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, product_id, buyer_id, seller_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, product_id, buyer_id, seller_id, &created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, product_id, buyer_id, seller_id, created_at FROM channels WHERE id = ?1",
                [id],
                channel_from_row,
            )
            .optional()
        })
    }

    pub fn channels_for_user(&self, user_id: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, product_id, buyer_id, seller_id, created_at FROM channels
                 WHERE buyer_id = ?1 OR seller_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Legacy exchange messages --

    pub fn insert_exchange_message(
        &self,
        id: &str,
        exchange_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<String> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO exchange_messages (id, exchange_id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, exchange_id, sender_id, receiver_id, content, &created_at),
            )?;
            Ok(())
        })?;
        Ok(created_at)
    }

    /// One row per (exchange, counterpart) the user has exchanged messages
    /// with, carrying the latest message.
    pub fn exchange_threads_for_user(&self, user_id: &str) -> Result<Vec<ExchangeThreadRow>> {
        self.with_conn(|conn| {
            // SQLite takes bare columns from the row that produced MAX().
            let mut stmt = conn.prepare(
                "SELECT exchange_id,
                        CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS other_id,
                        content,
                        MAX(created_at) AS last_at
                 FROM exchange_messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 GROUP BY exchange_id, other_id
                 ORDER BY last_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ExchangeThreadRow {
                        exchange_id: row.get(0)?,
                        other_id: row.get(1)?,
                        last_message: row.get(2)?,
                        last_message_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread_exchange(&self, exchange_id: &str, sender_id: &str, viewer_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM exchange_messages
                 WHERE exchange_id = ?1 AND sender_id = ?2 AND receiver_id = ?3 AND read_at IS NULL",
                (exchange_id, sender_id, viewer_id),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn has_exchange_thread(&self, exchange_id: &str, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM exchange_messages
                 WHERE exchange_id = ?1
                   AND ((sender_id = ?2 AND receiver_id = ?3) OR (sender_id = ?3 AND receiver_id = ?2)))",
                (exchange_id, a, b),
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    /// Mark what `sender_id` sent the viewer about an exchange as read.
    /// Returns the ids that changed.
    pub fn mark_exchange_read(
        &self,
        exchange_id: &str,
        sender_id: &str,
        viewer_id: &str,
        read_at: &str,
    ) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ids = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM exchange_messages
                     WHERE exchange_id = ?1 AND sender_id = ?2 AND receiver_id = ?3 AND read_at IS NULL
                     ORDER BY created_at",
                )?;
                stmt.query_map((exchange_id, sender_id, viewer_id), |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            tx.execute(
                "UPDATE exchange_messages SET read_at = ?4
                 WHERE exchange_id = ?1 AND sender_id = ?2 AND receiver_id = ?3 AND read_at IS NULL",
                (exchange_id, sender_id, viewer_id, read_at),
            )?;
            tx.commit()?;

            Ok(ids)
        })
    }

    // -- Marketplace rows (read for display titles) --

    pub fn insert_product(&self, id: &str, seller_id: &str, name: &str, price_cents: i64) -> Result<()> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO products (id, seller_id, name, price_cents, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, seller_id, name, price_cents, &created_at),
            )?;
            Ok(())
        })
    }

    pub fn product_name(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT name FROM products WHERE id = ?1", [id], |row| row.get(0))
                .optional()
        })
    }

    pub fn insert_money_exchange(
        &self,
        id: &str,
        owner_id: &str,
        from_currency: &str,
        to_currency: &str,
        amount_cents: i64,
    ) -> Result<()> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO money_exchanges (id, owner_id, from_currency, to_currency, amount_cents, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, owner_id, from_currency, to_currency, amount_cents, &created_at),
            )?;
            Ok(())
        })
    }

    /// `(from_currency, to_currency)` of an exchange listing.
    pub fn exchange_pair(&self, id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT from_currency, to_currency FROM money_exchanges WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    pub fn insert_mission(&self, id: &str, owner_id: &str, title: &str, reward_cents: i64) -> Result<()> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO missions (id, owner_id, title, reward_cents, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, owner_id, title, reward_cents, &created_at),
            )?;
            Ok(())
        })
    }

    pub fn mission_title(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT title FROM missions WHERE id = ?1", [id], |row| row.get(0))
                .optional()
        })
    }

    // -- Presence --

    /// Older updates never overwrite newer ones.
    pub fn upsert_presence(&self, user_id: &str, online: bool, typing_in: Option<&str>) -> Result<()> {
        let updated_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_presence (user_id, online, typing_in, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     online = excluded.online,
                     typing_in = excluded.typing_in,
                     updated_at = excluded.updated_at
                 WHERE excluded.updated_at >= user_presence.updated_at",
                (user_id, online, typing_in, &updated_at),
            )?;
            Ok(())
        })
    }

    pub fn delete_presence(&self, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM user_presence WHERE user_id = ?1", [user_id])?;
            Ok(())
        })
    }

    pub fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRow>> {
        self.with_conn(|conn| query_presence(conn, user_id))
    }
}

fn query_presence(conn: &Connection, user_id: &str) -> Result<Option<PresenceRow>> {
    let mut stmt =
        conn.prepare("SELECT user_id, online, typing_in, updated_at FROM user_presence WHERE user_id = ?1")?;

    let row = stmt
        .query_row([user_id], |row| {
            Ok(PresenceRow {
                user_id: row.get(0)?,
                online: row.get(1)?,
                typing_in: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        context_type: row.get(3)?,
        context_id: row.get(4)?,
        last_message: row.get(5)?,
        last_message_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        status: row.get(5)?,
        read_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        product_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        created_at: row.get(4)?,
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
