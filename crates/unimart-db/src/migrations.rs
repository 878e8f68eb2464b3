use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            id          TEXT PRIMARY KEY,
            seller_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            price_cents INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS money_exchanges (
            id              TEXT PRIMARY KEY,
            owner_id        TEXT NOT NULL,
            from_currency   TEXT NOT NULL,
            to_currency     TEXT NOT NULL,
            amount_cents    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS missions (
            id              TEXT PRIMARY KEY,
            owner_id        TEXT NOT NULL,
            title           TEXT NOT NULL,
            reward_cents    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            participant_a   TEXT NOT NULL,
            participant_b   TEXT NOT NULL,
            context_type    TEXT,
            context_id      TEXT,
            last_message    TEXT,
            last_message_at TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_a ON conversations(participant_a);
        CREATE INDEX IF NOT EXISTS idx_conversations_b ON conversations(participant_b);

        -- Legacy per-product chat channels. Their messages live in `messages`
        -- with conversation_id = channels.id.
        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            product_id  TEXT NOT NULL REFERENCES products(id),
            buyer_id    TEXT NOT NULL,
            seller_id   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(product_id, buyer_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            receiver_id     TEXT NOT NULL,
            content         TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'sent',
            read_at         TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(conversation_id, receiver_id, read_at);

        CREATE TABLE IF NOT EXISTS exchange_messages (
            id          TEXT PRIMARY KEY,
            exchange_id TEXT NOT NULL REFERENCES money_exchanges(id),
            sender_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            content     TEXT NOT NULL,
            read_at     TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_exchange_messages_exchange
            ON exchange_messages(exchange_id, created_at);

        CREATE TABLE IF NOT EXISTS user_presence (
            user_id     TEXT PRIMARY KEY,
            online      INTEGER NOT NULL,
            typing_in   TEXT,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
