use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::{Conversation, ConversationStatus, Message, MessageStatus, NewMessage};

use super::{
    datetime_column, enum_column, format_datetime, ConversationStore, StoreError,
};

const CONVERSATION_COLUMNS: &str = "id, agent_id, lead_email, subject, status, last_outbound_message_id, handover_reason, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, subject, content, status, message_id, in_reply_to, references_header, provider_message_id, error, created_at";

impl ConversationStore {
    /// Returns the single conversation for (agent, lead), creating it on
    /// first contact. Racing creators converge on the same row.
    pub fn get_or_create_conversation(
        &self,
        agent_id: &str,
        lead_email: &str,
        subject: &str,
    ) -> Result<Conversation, StoreError> {
        let conn = self.open()?;
        let now = format_datetime(Utc::now());
        let lead_email = lead_email.trim().to_ascii_lowercase();
        conn.execute(
            "INSERT INTO conversations (id, agent_id, lead_email, subject, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)
             ON CONFLICT(agent_id, lead_email) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                agent_id,
                lead_email.as_str(),
                subject,
                now
            ],
        )?;
        let conversation = conn.query_row(
            &format!(
                "SELECT {} FROM conversations WHERE agent_id = ?1 AND lead_email = ?2",
                CONVERSATION_COLUMNS
            ),
            params![agent_id, lead_email.as_str()],
            conversation_from_row,
        )?;
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let conn = self.open()?;
        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE id = ?1",
                    CONVERSATION_COLUMNS
                ),
                params![id],
                conversation_from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    pub fn find_conversation(
        &self,
        agent_id: &str,
        lead_email: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let conn = self.open()?;
        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE agent_id = ?1 AND lead_email = ?2",
                    CONVERSATION_COLUMNS
                ),
                params![agent_id, lead_email.trim().to_ascii_lowercase()],
                conversation_from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    /// One-way transition to `handed_over`. Returns false when the
    /// conversation was already handed over.
    pub fn mark_handed_over(&self, id: &str, reason: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE conversations
             SET status = ?1, handover_reason = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                ConversationStatus::HandedOver.as_str(),
                reason,
                format_datetime(Utc::now()),
                id,
                ConversationStatus::Active.as_str()
            ],
        )?;
        Ok(updated == 1)
    }

    pub fn set_last_outbound(&self, id: &str, message_id: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE conversations SET last_outbound_message_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![message_id, format_datetime(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn message_exists(&self, message_id: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM messages WHERE message_id = ?1",
                params![message_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Inserts a message unless its Message-Id is already stored. `None`
    /// means another writer got there first.
    pub fn insert_message(&self, message: &NewMessage) -> Result<Option<Message>, StoreError> {
        let conn = self.open()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT INTO messages (id, conversation_id, sender, subject, content, status, message_id, in_reply_to, references_header, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(message_id) DO NOTHING",
            params![
                id.as_str(),
                message.conversation_id.as_str(),
                message.sender.as_str(),
                message.subject.as_str(),
                message.content.as_str(),
                message.status.as_str(),
                message.message_id.as_str(),
                message.in_reply_to.as_deref(),
                message.references.as_deref(),
                format_datetime(now)
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![format_datetime(now), message.conversation_id.as_str()],
        )?;
        Ok(Some(Message {
            id,
            conversation_id: message.conversation_id.clone(),
            sender: message.sender,
            subject: message.subject.clone(),
            content: message.content.clone(),
            status: message.status,
            message_id: message.message_id.clone(),
            in_reply_to: message.in_reply_to.clone(),
            references: message.references.clone(),
            provider_message_id: None,
            error: None,
            created_at: now,
        }))
    }

    /// `pending -> sent`. Returns false if the row had already left `pending`.
    pub fn mark_message_sent(
        &self,
        id: &str,
        provider_message_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE messages
             SET status = ?1, provider_message_id = COALESCE(?2, provider_message_id)
             WHERE id = ?3 AND status = ?4",
            params![
                MessageStatus::Sent.as_str(),
                provider_message_id,
                id,
                MessageStatus::Pending.as_str()
            ],
        )?;
        Ok(updated == 1)
    }

    /// `pending -> failed`. Returns false if the row had already left `pending`.
    pub fn mark_message_failed(&self, id: &str, error: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE messages SET status = ?1, error = ?2 WHERE id = ?3 AND status = ?4",
            params![
                MessageStatus::Failed.as_str(),
                error,
                id,
                MessageStatus::Pending.as_str()
            ],
        )?;
        Ok(updated == 1)
    }

    /// Records the provider id once; later events never overwrite it.
    pub fn set_provider_message_id(
        &self,
        id: &str,
        provider_message_id: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE messages SET provider_message_id = ?1
             WHERE id = ?2 AND provider_message_id IS NULL",
            params![provider_message_id, id],
        )?;
        Ok(updated == 1)
    }

    pub fn get_message_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let conn = self.open()?;
        let message = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE message_id = ?1",
                    MESSAGE_COLUMNS
                ),
                params![message_id],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    /// All messages of a conversation, oldest first.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at, rowid",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![conversation_id], message_from_row)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The newest `limit` messages, returned oldest first. `exclude` drops
    /// one Message-Id, typically the inbound being answered.
    pub fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        exclude: Option<&str>,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE conversation_id = ?1 AND message_id != COALESCE(?2, '')
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![conversation_id, exclude, limit as i64],
            message_from_row,
        )?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Message-Ids of the conversation in send order, for References.
    pub fn thread_message_ids(&self, conversation_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT message_id FROM messages
             WHERE conversation_id = ?1 AND status != 'failed'
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        lead_email: row.get(2)?,
        subject: row.get(3)?,
        status: enum_column(row, 4)?,
        last_outbound_message_id: row.get(5)?,
        handover_reason: row.get(6)?,
        created_at: datetime_column(row, 7)?,
        updated_at: datetime_column(row, 8)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: enum_column(row, 2)?,
        subject: row.get(3)?,
        content: row.get(4)?,
        status: enum_column(row, 5)?,
        message_id: row.get(6)?,
        in_reply_to: row.get(7)?,
        references: row.get(8)?,
        provider_message_id: row.get(9)?,
        error: row.get(10)?,
        created_at: datetime_column(row, 11)?,
    })
}
