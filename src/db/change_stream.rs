use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::db::models::ChangeEvent;
use crate::error::AppError;

/// A live stream of page changes. An `Err` item means the transport broke
/// and the subscription has to be re-opened.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, AppError>>;

/// Source of live page change notifications.
///
/// A fresh subscription starts "from now"; implementations that can resume
/// continue after the last event they delivered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self) -> Result<ChangeStream, AppError>;
}

/// MongoDB change-stream implementation of the ChangeFeed.
///
/// Requires a replica set or sharded cluster; standalone servers reject
/// `watch`.
#[cfg(feature = "mongo")]
pub struct MongoChangeFeed {
    collection: mongodb::Collection<mongodb::bson::Document>,
    resume_token: std::sync::Arc<std::sync::Mutex<Option<mongodb::change_stream::event::ResumeToken>>>,
}

#[cfg(feature = "mongo")]
impl MongoChangeFeed {
    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            collection: db.collection("pages"),
            resume_token: Default::default(),
        }
    }
}

#[cfg(feature = "mongo")]
enum Decoded {
    Event(ChangeEvent),
    Skip,
    Invalidated,
}

/// Map one raw change-stream event. Page documents are decoded here rather
/// than by the driver, so a malformed page is skipped instead of breaking
/// the stream on the same event after every resume.
#[cfg(feature = "mongo")]
fn decode_change(
    operation: &mongodb::change_stream::event::OperationType,
    full_document: Option<mongodb::bson::Document>,
    document_key: Option<&mongodb::bson::Document>,
) -> Decoded {
    use mongodb::change_stream::event::OperationType;

    let key_id = document_key.and_then(|key| key.get_str("_id").ok());
    match operation {
        OperationType::Insert | OperationType::Update | OperationType::Replace => {
            // The looked-up document is absent when the page was deleted
            // before the lookup ran; its delete follows.
            let Some(document) = full_document else {
                return Decoded::Skip;
            };
            match mongodb::bson::from_document::<crate::db::models::Page>(document) {
                Ok(page) => Decoded::Event(ChangeEvent::Upserted(page)),
                Err(e) => {
                    tracing::warn!(page_id = ?key_id, "Skipping undecodable page change: {e}");
                    Decoded::Skip
                }
            }
        }
        OperationType::Delete => match key_id {
            Some(id) => Decoded::Event(ChangeEvent::Deleted(id.to_string())),
            None => Decoded::Skip,
        },
        OperationType::Invalidate | OperationType::Drop => Decoded::Invalidated,
        _ => Decoded::Skip,
    }
}

#[cfg(feature = "mongo")]
#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn subscribe(&self) -> Result<ChangeStream, AppError> {
        use futures::StreamExt;
        use mongodb::options::{ChangeStreamOptions, FullDocumentType};

        let resume_after = self
            .resume_token
            .lock()
            .map_err(|_| AppError::Internal("resume token mutex poisoned".into()))?
            .clone();

        let had_token = resume_after.is_some();
        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .resume_after(resume_after)
            .build();

        let mut stream = match self.collection.watch().with_options(options).await {
            Ok(stream) => stream,
            Err(e) => {
                // A token that fell off the oplog can never be resumed from.
                if had_token {
                    if let Ok(mut token) = self.resume_token.lock() {
                        *token = None;
                    }
                }
                return Err(AppError::Database(e.to_string()));
            }
        };

        let resume_token = self.resume_token.clone();
        let events = async_stream::stream! {
            while let Some(next) = stream.next().await {
                let event = match next {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(AppError::Database(e.to_string()));
                        break;
                    }
                };

                if let Ok(mut token) = resume_token.lock() {
                    *token = stream.resume_token();
                }

                match decode_change(
                    &event.operation_type,
                    event.full_document,
                    event.document_key.as_ref(),
                ) {
                    Decoded::Event(change) => yield Ok(change),
                    Decoded::Skip => {}
                    Decoded::Invalidated => {
                        if let Ok(mut token) = resume_token.lock() {
                            *token = None;
                        }
                        yield Err(AppError::Database("change stream invalidated".into()));
                        break;
                    }
                }
            }
        };

        Ok(events.boxed())
    }
}

#[cfg(all(test, feature = "mongo"))]
mod tests {
    use super::*;
    use mongodb::bson::{doc, Document};
    use mongodb::change_stream::event::OperationType;

    fn page_document(id: &str) -> Document {
        doc! {
            "_id": id,
            "title": "Narwhal",
            "slug": id,
            "position": 10_000.0,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        }
    }

    fn decoded_events(raw: Vec<(OperationType, Option<Document>, Document)>) -> Vec<ChangeEvent> {
        raw.into_iter()
            .filter_map(|(operation, full_document, key)| {
                match decode_change(&operation, full_document, Some(&key)) {
                    Decoded::Event(event) => Some(event),
                    _ => None,
                }
            })
            .collect()
    }

    #[test]
    fn test_malformed_page_is_skipped_and_later_events_flow() {
        let mut broken = page_document("bad");
        broken.remove("updated_at");

        let events = decoded_events(vec![
            (OperationType::Insert, Some(broken), doc! { "_id": "bad" }),
            (OperationType::Update, Some(page_document("n")), doc! { "_id": "n" }),
            (OperationType::Delete, None, doc! { "_id": "old" }),
        ]);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChangeEvent::Upserted(page) if page.id == "n"));
        assert_eq!(events[1], ChangeEvent::Deleted("old".to_string()));
    }

    #[test]
    fn test_missing_lookup_and_invalidate() {
        assert!(matches!(
            decode_change(&OperationType::Replace, None, Some(&doc! { "_id": "n" })),
            Decoded::Skip
        ));
        assert!(matches!(
            decode_change(&OperationType::Invalidate, None, None),
            Decoded::Invalidated
        ));
    }
}
