use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ChainRepository, ConversationRepository, Second, StoreError, WordRepository,
    check_reply_chance,
};
use crate::types::{
    ChainStats, Conversation, ConversationId, Pair, PairId, Reply, ReplyId, Word, WordId,
};

/// SQLite-backed store. One connection, serialized behind an async mutex.
///
/// NULL sentinels take part in uniqueness through expression indexes over
/// `IFNULL(id, 0)`; row ids start at 1 so 0 never collides with a word.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    default_reply_chance: u8,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Like the `From` conversion, but reports unique-constraint failures as
/// `Conflict` on `entity`.
fn conflict_on(entity: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict { entity }
        }
        _ => StoreError::from(e),
    }
}

fn nullable(word: Option<WordId>) -> Value {
    word.map(Value::Integer).unwrap_or(Value::Null)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path, default_reply_chance: u8) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn, default_reply_chance)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory(default_reply_chance: u8) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, default_reply_chance)
    }

    fn from_connection(conn: Connection, default_reply_chance: u8) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_reply_chance,
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS words (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL COLLATE NOCASE UNIQUE
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY,
                reply_chance INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pairs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                first_word_id INTEGER REFERENCES words(id),
                second_word_id INTEGER REFERENCES words(id)
            );

            CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL REFERENCES pairs(id),
                word_id INTEGER REFERENCES words(id),
                counter INTEGER NOT NULL DEFAULT 1
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_pairs_context
                ON pairs(conversation_id, IFNULL(first_word_id, 0), IFNULL(second_word_id, 0));
            CREATE INDEX IF NOT EXISTS idx_pairs_conversation ON pairs(conversation_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_replies_word
                ON replies(pair_id, IFNULL(word_id, 0));
            "#,
        )
    }

    fn load_replies(conn: &Connection, pair: PairId) -> rusqlite::Result<Vec<Reply>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, pair_id, word_id, counter FROM replies WHERE pair_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![pair], |row| {
            Ok(Reply {
                id: row.get(0)?,
                pair_id: row.get(1)?,
                word: row.get(2)?,
                counter: row.get::<_, i64>(3)? as u64,
            })
        })?;
        rows.collect()
    }

    fn load_pair(conn: &Connection, head: PairHead) -> rusqlite::Result<Pair> {
        Ok(Pair {
            id: head.id,
            conversation_id: head.conversation_id,
            first: head.first,
            second: head.second,
            replies: Self::load_replies(conn, head.id)?,
        })
    }

    fn read_conversation(conn: &Connection, id: ConversationId) -> rusqlite::Result<Conversation> {
        conn.query_row(
            "SELECT id, reply_chance, created_at FROM conversations WHERE id = ?1",
            params![id],
            conversation_from_row,
        )
    }
}

struct PairHead {
    id: PairId,
    conversation_id: ConversationId,
    first: Option<WordId>,
    second: Option<WordId>,
}

fn pair_head_from_row(row: &Row<'_>) -> rusqlite::Result<PairHead> {
    Ok(PairHead {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        first: row.get(2)?,
        second: row.get(3)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get(2)?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?
        .with_timezone(&chrono::Utc);
    Ok(Conversation {
        id: row.get(0)?,
        reply_chance: row.get(1)?,
        created_at,
    })
}

#[async_trait]
impl WordRepository for SqliteStore {
    async fn find_by_text(&self, texts: &[String]) -> Result<Vec<Word>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT id, text FROM words WHERE text IN ({}) ORDER BY id",
            placeholders(texts.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(texts.iter()), |row| {
            Ok(Word {
                id: row.get(0)?,
                text: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn insert(&self, texts: &[String]) -> Result<Vec<Word>, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(texts.len());
        {
            let mut stmt = tx.prepare("INSERT INTO words (text) VALUES (?1)")?;
            for text in texts {
                let text = text.to_lowercase();
                stmt.execute(params![text]).map_err(conflict_on("word"))?;
                created.push(Word {
                    id: tx.last_insert_rowid(),
                    text,
                });
            }
        }
        tx.commit()?;
        debug!(count = created.len(), "inserted words");
        Ok(created)
    }

    async fn find_by_ids(&self, ids: &[WordId]) -> Result<Vec<Word>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT id, text FROM words WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok(Word {
                id: row.get(0)?,
                text: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl ChainRepository for SqliteStore {
    async fn find_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Option<Pair>, StoreError> {
        let conn = self.conn.lock().await;
        let head = conn
            .query_row(
                "SELECT id, conversation_id, first_word_id, second_word_id FROM pairs \
                 WHERE conversation_id = ?1 AND first_word_id IS ?2 AND second_word_id IS ?3",
                params![conversation, first, second],
                pair_head_from_row,
            )
            .optional()?;
        match head {
            Some(head) => Ok(Some(Self::load_pair(&conn, head)?)),
            None => Ok(None),
        }
    }

    async fn insert_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Pair, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pairs (conversation_id, first_word_id, second_word_id) VALUES (?1, ?2, ?3)",
            params![conversation, first, second],
        )
        .map_err(conflict_on("pair"))?;
        Ok(Pair {
            id: conn.last_insert_rowid(),
            conversation_id: conversation,
            first,
            second,
            replies: Vec::new(),
        })
    }

    async fn insert_reply(
        &self,
        pair: PairId,
        word: Option<WordId>,
    ) -> Result<Reply, StoreError> {
        let conn = self.conn.lock().await;
        let exists = conn
            .query_row("SELECT 1 FROM pairs WHERE id = ?1", params![pair], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound {
                entity: "pair",
                id: pair,
            });
        }
        conn.execute(
            "INSERT INTO replies (pair_id, word_id, counter) VALUES (?1, ?2, 1)",
            params![pair, word],
        )
        .map_err(conflict_on("reply"))?;
        Ok(Reply {
            id: conn.last_insert_rowid(),
            pair_id: pair,
            word,
            counter: 1,
        })
    }

    async fn increment_reply(&self, reply: ReplyId) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE replies SET counter = counter + 1 WHERE id = ?1",
            params![reply],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "reply",
                id: reply,
            });
        }
        let counter: i64 = conn.query_row(
            "SELECT counter FROM replies WHERE id = ?1",
            params![reply],
            |row| row.get(0),
        )?;
        Ok(counter as u64)
    }

    async fn top_pairs(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: &Second,
        limit: usize,
    ) -> Result<Vec<Pair>, StoreError> {
        let mut sql = String::from(
            "SELECT p.id, p.conversation_id, p.first_word_id, p.second_word_id \
             FROM pairs p JOIN replies r ON r.pair_id = p.id \
             WHERE p.conversation_id = ? AND p.first_word_id IS ?",
        );
        let mut values = vec![Value::Integer(conversation), nullable(first)];
        match second {
            Second::Exact(word) => {
                sql.push_str(" AND p.second_word_id IS ?");
                values.push(nullable(*word));
            }
            Second::AnyOf(set) => {
                if set.is_empty() {
                    return Ok(Vec::new());
                }
                sql.push_str(&format!(
                    " AND p.second_word_id IN ({})",
                    placeholders(set.len())
                ));
                values.extend(set.iter().map(|id| Value::Integer(*id)));
            }
        }
        sql.push_str(" GROUP BY p.id ORDER BY MAX(r.counter) DESC, p.id ASC LIMIT ?");
        values.push(Value::Integer(limit as i64));

        let conn = self.conn.lock().await;
        let heads = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), pair_head_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut pairs = Vec::with_capacity(heads.len());
        for head in heads {
            pairs.push(Self::load_pair(&conn, head)?);
        }
        Ok(pairs)
    }

    async fn stats(&self, conversation: ConversationId) -> Result<ChainStats, StoreError> {
        let conn = self.conn.lock().await;
        let (pairs, replies, observations): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(DISTINCT p.id), COUNT(r.id), COALESCE(SUM(r.counter), 0) \
             FROM pairs p LEFT JOIN replies r ON r.pair_id = p.id \
             WHERE p.conversation_id = ?1",
            params![conversation],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(ChainStats {
            pairs: pairs as u64,
            replies: replies as u64,
            observations: observations as u64,
        })
    }
}

#[async_trait]
impl ConversationRepository for SqliteStore {
    async fn get_or_create(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, reply_chance, created_at) VALUES (?1, ?2, ?3)",
            params![id, self.default_reply_chance, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(Self::read_conversation(&conn, id)?)
    }

    async fn set_reply_chance(
        &self,
        id: ConversationId,
        reply_chance: u8,
    ) -> Result<Conversation, StoreError> {
        check_reply_chance(reply_chance)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO conversations (id, reply_chance, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET reply_chance = excluded.reply_chance",
            params![id, reply_chance, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(Self::read_conversation(&conn, id)?)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
