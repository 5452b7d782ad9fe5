//! Request store over MongoDB: one collection, documents are the
//! `Request` JSON shape with a Mongo-assigned document id. Supports
//! the two filter predicates the cache engine and dispatcher
//! actually need: by status and by username.

use bson::{doc, Document};
use futures::stream::TryStreamExt;
use gk_common::{LifecycleStatus, Request, RequestFilter, RequestUpdate};
use mongodb::{Client, Collection};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("bson serialization error: {0}")]
    Bson(#[from] bson::ser::Error),

    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    #[error("request {0} not found")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct RequestStore {
    collection: Collection<Document>,
}

impl RequestStore {
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client.database(database).collection(collection);
        Ok(Self { collection })
    }

    pub fn with_collection(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    /// Insert a new request. Returns the request's own identifier
    /// (the store does not allocate ids; the caller already did).
    pub async fn create(&self, request: &Request) -> Result<String> {
        let doc = bson::to_document(request)?;
        self.collection.insert_one(doc).await?;
        debug!(id = %request.id, "inserted request");
        Ok(request.id.clone())
    }

    /// List requests matching the given filter.
    pub async fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>> {
        let mut mongo_filter = Document::new();
        if let Some(status) = filter.status {
            mongo_filter.insert("status", status_to_bson(status));
        }
        if let Some(username) = &filter.username {
            mongo_filter.insert("username", username.clone());
        }

        let mut cursor = self.collection.find(mongo_filter).await?;
        let mut requests = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            requests.push(bson::from_document(doc)?);
        }
        Ok(requests)
    }

    /// Apply a partial update to the request with the given id and
    /// return the updated record.
    pub async fn update(&self, id: &str, update: &RequestUpdate) -> Result<Request> {
        let mut set_doc = Document::new();
        if let Some(status) = update.status {
            set_doc.insert("status", status_to_bson(status));
        }
        if let Some(on_server_status) = update.on_server_status {
            set_doc.insert(
                "onServerStatus",
                serde_json::to_value(on_server_status)
                    .expect("enum serialization cannot fail")
                    .as_str()
                    .expect("status serializes to a string")
                    .to_string(),
            );
        }
        if let Some(decision_at) = update.decision_at {
            set_doc.insert("decisionAt", bson::DateTime::from_chrono(decision_at));
        }
        if let Some(last_update_at) = update.last_update_at {
            set_doc.insert("lastUpdateAt", bson::DateTime::from_chrono(last_update_at));
        }
        if let Some(decided_by) = &update.decided_by {
            set_doc.insert("decidedBy", decided_by.clone());
        }
        if let Some(note) = &update.note {
            set_doc.insert("note", note.clone());
        }
        if let Some(assignees) = &update.assignees {
            set_doc.insert("assignees", assignees.clone());
        }

        self.collection
            .update_one(doc! { "id": id }, doc! { "$set": set_doc })
            .await?;

        let doc = self
            .collection
            .find_one(doc! { "id": id })
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(bson::from_document(doc)?)
    }
}

fn status_to_bson(status: LifecycleStatus) -> bson::Bson {
    let value = serde_json::to_value(status).expect("enum serialization cannot fail");
    bson::Bson::String(value.as_str().expect("status serializes to a string").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_bson_as_a_string() {
        let bson = status_to_bson(LifecycleStatus::Approved);
        assert_eq!(bson, bson::Bson::String("Approved".to_string()));
    }
}
