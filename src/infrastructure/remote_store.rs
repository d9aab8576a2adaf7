use crate::domain::models::{Session, Space, SpacePatch, TimeEntry, TimeEntryPatch};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_mapper::{
    decode_entry, decode_space, encode_entry, encode_entry_patch, encode_space, encode_space_patch,
    SpaceRow, TimeEntryRow, COLUMN_USER_ID,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

const SPACES_TABLE: &str = "spaces";
const TIME_ENTRIES_TABLE: &str = "time_entries";
const PAGE_SIZE: usize = 1000;

/// Account-scoped CRUD over the remote copy of spaces and time entries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_spaces(&self, session: &Session) -> Result<Vec<Space>, InfraError>;
    async fn create_space(&self, session: &Session, space: &Space) -> Result<(), InfraError>;
    async fn update_space(&self, session: &Session, id: &str, patch: &SpacePatch) -> Result<(), InfraError>;
    async fn delete_space(&self, session: &Session, id: &str) -> Result<(), InfraError>;
    async fn upsert_space(&self, session: &Session, space: &Space) -> Result<(), InfraError>;

    async fn list_entries(&self, session: &Session) -> Result<Vec<TimeEntry>, InfraError>;
    async fn create_entry(&self, session: &Session, entry: &TimeEntry) -> Result<(), InfraError>;
    async fn update_entry(
        &self,
        session: &Session,
        id: &str,
        patch: &TimeEntryPatch,
    ) -> Result<(), InfraError>;
    async fn delete_entry(&self, session: &Session, id: &str) -> Result<(), InfraError>;
    async fn upsert_entry(&self, session: &Session, entry: &TimeEntry) -> Result<(), InfraError>;
}

/// PostgREST-style endpoint under `<base>/rest/v1/`.
#[derive(Debug, Clone)]
pub struct PostgrestRemoteStore {
    client: Client,
    base_url: Url,
    api_key: String,
}

enum WriteMode {
    Insert,
    Upsert,
}

impl PostgrestRemoteStore {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Remote(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn remote_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return InfraError::Unauthenticated;
        }
        let message = if body.trim().is_empty() {
            format!("remote store error: http {}", status.as_u16())
        } else {
            format!("remote store error: http {}; body={body}", status.as_u16())
        };
        InfraError::Remote(message)
    }

    fn table_endpoint(&self, table: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Remote("remote base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push("rest");
            segments.push("v1");
            segments.push(table);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
    }

    async fn execute(request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading response while {action}: {error}")))?;

        if !status.is_success() {
            return Err(Self::remote_http_error(status, &body));
        }
        Ok(body)
    }

    async fn list_rows<T: DeserializeOwned + Send>(&self, session: &Session, table: &str) -> Result<Vec<T>, InfraError> {
        Self::ensure_non_empty(&session.access_token, "access token")?;
        let endpoint = self.table_endpoint(table)?;
        let owner_filter = format!("eq.{}", session.user_id);
        let mut rows = Vec::new();
        let mut offset = 0usize;

        loop {
            let request = self
                .authorized(self.client.get(endpoint.clone()), session)
                .query(&[("select", "*"), ("order", "id.asc"), (COLUMN_USER_ID, owner_filter.as_str())])
                .query(&[("limit", PAGE_SIZE), ("offset", offset)]);
            let body = Self::execute(request, &format!("listing {table}")).await?;

            let page: Vec<T> = serde_json::from_str(&body).map_err(|error| {
                InfraError::Remote(format!("invalid {table} list payload: {error}; body={body}"))
            })?;
            let page_len = page.len();
            rows.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        Ok(rows)
    }

    async fn write_row<T: Serialize + Sync>(
        &self,
        session: &Session,
        table: &str,
        row: &T,
        mode: WriteMode,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(&session.access_token, "access token")?;
        let endpoint = self.table_endpoint(table)?;
        let prefer = match mode {
            WriteMode::Insert => "return=minimal",
            WriteMode::Upsert => "resolution=merge-duplicates,return=minimal",
        };
        let request = self
            .authorized(self.client.post(endpoint), session)
            .header("Prefer", prefer)
            .json(row);
        Self::execute(request, &format!("writing {table}")).await?;
        Ok(())
    }

    async fn patch_row(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        columns: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(&session.access_token, "access token")?;
        Self::ensure_non_empty(id, "record id")?;
        if columns.is_empty() {
            return Ok(());
        }
        let endpoint = self.table_endpoint(table)?;
        let request = self
            .authorized(self.client.patch(endpoint), session)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&columns);
        Self::execute(request, &format!("updating {table}")).await?;
        Ok(())
    }

    async fn delete_row(&self, session: &Session, table: &str, id: &str) -> Result<(), InfraError> {
        Self::ensure_non_empty(&session.access_token, "access token")?;
        Self::ensure_non_empty(id, "record id")?;
        let endpoint = self.table_endpoint(table)?;
        let request = self
            .authorized(self.client.delete(endpoint), session)
            .query(&[("id", format!("eq.{id}"))]);
        Self::execute(request, &format!("deleting from {table}")).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemoteStore {
    async fn list_spaces(&self, session: &Session) -> Result<Vec<Space>, InfraError> {
        self.list_rows::<SpaceRow>(session, SPACES_TABLE)
            .await?
            .into_iter()
            .map(decode_space)
            .collect()
    }

    async fn create_space(&self, session: &Session, space: &Space) -> Result<(), InfraError> {
        let row = encode_space(space, &session.user_id);
        self.write_row(session, SPACES_TABLE, &row, WriteMode::Insert).await
    }

    async fn update_space(&self, session: &Session, id: &str, patch: &SpacePatch) -> Result<(), InfraError> {
        self.patch_row(session, SPACES_TABLE, id, encode_space_patch(patch)).await
    }

    async fn delete_space(&self, session: &Session, id: &str) -> Result<(), InfraError> {
        self.delete_row(session, SPACES_TABLE, id).await
    }

    async fn upsert_space(&self, session: &Session, space: &Space) -> Result<(), InfraError> {
        let row = encode_space(space, &session.user_id);
        self.write_row(session, SPACES_TABLE, &row, WriteMode::Upsert).await
    }

    async fn list_entries(&self, session: &Session) -> Result<Vec<TimeEntry>, InfraError> {
        self.list_rows::<TimeEntryRow>(session, TIME_ENTRIES_TABLE)
            .await?
            .into_iter()
            .map(decode_entry)
            .collect()
    }

    async fn create_entry(&self, session: &Session, entry: &TimeEntry) -> Result<(), InfraError> {
        let row = encode_entry(entry, &session.user_id);
        self.write_row(session, TIME_ENTRIES_TABLE, &row, WriteMode::Insert).await
    }

    async fn update_entry(
        &self,
        session: &Session,
        id: &str,
        patch: &TimeEntryPatch,
    ) -> Result<(), InfraError> {
        self.patch_row(session, TIME_ENTRIES_TABLE, id, encode_entry_patch(patch)).await
    }

    async fn delete_entry(&self, session: &Session, id: &str) -> Result<(), InfraError> {
        self.delete_row(session, TIME_ENTRIES_TABLE, id).await
    }

    async fn upsert_entry(&self, session: &Session, entry: &TimeEntry) -> Result<(), InfraError> {
        let row = encode_entry(entry, &session.user_id);
        self.write_row(session, TIME_ENTRIES_TABLE, &row, WriteMode::Upsert).await
    }
}

#[derive(Debug, Default, Clone)]
struct AccountTables {
    spaces: Vec<Space>,
    entries: Vec<TimeEntry>,
}

/// Remote store kept in memory, one table pair per user id.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    accounts: Mutex<HashMap<String, AccountTables>>,
}

impl InMemoryRemoteStore {
    fn with_account<T>(
        &self,
        user_id: &str,
        apply: impl FnOnce(&mut AccountTables) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|error| InfraError::Remote(format!("in-memory remote lock poisoned: {error}")))?;
        apply(accounts.entry(user_id.to_string()).or_default())
    }

    pub fn spaces_for(&self, user_id: &str) -> Result<Vec<Space>, InfraError> {
        self.with_account(user_id, |tables| Ok(tables.spaces.clone()))
    }

    pub fn entries_for(&self, user_id: &str) -> Result<Vec<TimeEntry>, InfraError> {
        self.with_account(user_id, |tables| Ok(tables.entries.clone()))
    }

    pub fn seed(&self, user_id: &str, spaces: Vec<Space>, entries: Vec<TimeEntry>) -> Result<(), InfraError> {
        self.with_account(user_id, |tables| {
            tables.spaces = spaces;
            tables.entries = entries;
            Ok(())
        })
    }
}

fn insert_unique<T: Clone>(
    rows: &mut Vec<T>,
    record: &T,
    id_of: impl Fn(&T) -> &str,
) -> Result<(), InfraError> {
    let id = id_of(record);
    if rows.iter().any(|existing| id_of(existing) == id) {
        return Err(InfraError::Remote(format!(
            "remote store error: http 409; duplicate key {id}"
        )));
    }
    rows.push(record.clone());
    Ok(())
}

fn upsert<T: Clone>(rows: &mut Vec<T>, record: &T, id_of: impl Fn(&T) -> &str) {
    let id = id_of(record);
    match rows.iter().position(|existing| id_of(existing) == id) {
        Some(index) => rows[index] = record.clone(),
        None => rows.push(record.clone()),
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn list_spaces(&self, session: &Session) -> Result<Vec<Space>, InfraError> {
        self.spaces_for(&session.user_id)
    }

    async fn create_space(&self, session: &Session, space: &Space) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            insert_unique(&mut tables.spaces, space, |row| row.id.as_str())
        })
    }

    async fn update_space(&self, session: &Session, id: &str, patch: &SpacePatch) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            if let Some(space) = tables.spaces.iter_mut().find(|space| space.id == id) {
                space.apply(patch);
            }
            Ok(())
        })
    }

    async fn delete_space(&self, session: &Session, id: &str) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            tables.spaces.retain(|space| space.id != id);
            Ok(())
        })
    }

    async fn upsert_space(&self, session: &Session, space: &Space) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            upsert(&mut tables.spaces, space, |row| row.id.as_str());
            Ok(())
        })
    }

    async fn list_entries(&self, session: &Session) -> Result<Vec<TimeEntry>, InfraError> {
        self.entries_for(&session.user_id)
    }

    async fn create_entry(&self, session: &Session, entry: &TimeEntry) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            insert_unique(&mut tables.entries, entry, |row| row.id.as_str())
        })
    }

    async fn update_entry(
        &self,
        session: &Session,
        id: &str,
        patch: &TimeEntryPatch,
    ) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            if let Some(entry) = tables.entries.iter_mut().find(|entry| entry.id == id) {
                entry.apply(patch);
            }
            Ok(())
        })
    }

    async fn delete_entry(&self, session: &Session, id: &str) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            tables.entries.retain(|entry| entry.id != id);
            Ok(())
        })
    }

    async fn upsert_entry(&self, session: &Session, entry: &TimeEntry) -> Result<(), InfraError> {
        self.with_account(&session.user_id, |tables| {
            upsert(&mut tables.entries, entry, |row| row.id.as_str());
            Ok(())
        })
    }
}
