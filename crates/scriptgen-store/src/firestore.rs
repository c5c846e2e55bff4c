//! Firestore-backed document store.
//!
//! Layout: `jobs/{jobId}`, `scripts/{scriptId}` and
//! `scripts/{scriptId}/segments/{order}`.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use scriptgen_models::{
    ErrorDetail, FanoutSummary, Job, JobId, JobResult, JobStage, ScriptId, ScriptRecord,
    ScriptStatus, Segment,
};

use crate::client::{FirestoreClient, MAX_COMMIT_WRITES};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_retry, record_segments_replaced};
use crate::retry::{retry_delay, with_retry};
use crate::store::{apply_result, apply_stage, check_segment_order, DocumentStore};
use crate::types::{decode_document, encode_fields, Document, StructuredQuery, ToFirestoreValue, Write};

const JOBS: &str = "jobs";
const SCRIPTS: &str = "scripts";

/// Concurrent writers racing on one job document retry this many times.
const MAX_CONFLICT_RETRIES: u32 = 3;

fn segments_collection(script_id: &ScriptId) -> String {
    format!("{}/{}/segments", SCRIPTS, script_id)
}

/// Firestore implementation of [`DocumentStore`].
#[derive(Clone)]
pub struct FirestoreStore {
    client: FirestoreClient,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn from_env() -> StoreResult<Self> {
        Ok(Self::new(FirestoreClient::from_env().await?))
    }

    async fn read(&self, collection: &str, doc_id: &str) -> StoreResult<Option<Document>> {
        with_retry(self.client.retry_config(), "get_document", || {
            self.client.get_document(collection, doc_id)
        })
        .await
    }

    async fn write<T: serde::Serialize + Sync>(
        &self,
        collection: &str,
        doc_id: &str,
        record: &T,
    ) -> StoreResult<()> {
        let fields = encode_fields(record)?;
        with_retry(self.client.retry_config(), "set_document", || {
            self.client
                .set_document(collection, doc_id, fields.clone(), None)
        })
        .await
        .map(|_| ())
    }

    /// Read-modify-write guarded by the document's update time.
    async fn modify<T, F>(&self, collection: &str, doc_id: &str, mutate: F) -> StoreResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send,
        F: Fn(&mut T) -> StoreResult<()> + Send + Sync,
    {
        let mut conflicts = 0;
        let mut failures = 0;
        loop {
            let doc = self
                .read(collection, doc_id)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", collection, doc_id)))?;
            let mut record: T = decode_document(&doc)?;
            mutate(&mut record)?;

            let fields = encode_fields(&record)?;
            let outcome = self
                .client
                .set_document(collection, doc_id, fields, doc.update_time.as_deref())
                .await;

            match outcome {
                Ok(_) => return Ok(record),
                Err(e) if e.is_precondition_failed() && conflicts < MAX_CONFLICT_RETRIES => {
                    conflicts += 1;
                    debug!(collection, doc_id, conflicts, "Concurrent update, re-reading");
                }
                Err(e) => {
                    let Some(delay) = retry_delay(self.client.retry_config(), failures, &e) else {
                        return Err(e);
                    };
                    warn!(
                        collection,
                        doc_id,
                        delay_ms = delay.as_millis() as u64,
                        "Update failed, re-reading: {}",
                        e
                    );
                    record_retry("modify_document");
                    failures += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn modify_job<F>(&self, job_id: &JobId, mutate: F) -> StoreResult<Job>
    where
        F: Fn(&mut Job) -> StoreResult<()> + Send + Sync,
    {
        self.modify(JOBS, job_id.as_str(), |job: &mut Job| {
            mutate(job)?;
            job.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn modify_script<F>(&self, script_id: &ScriptId, mutate: F) -> StoreResult<ScriptRecord>
    where
        F: Fn(&mut ScriptRecord) + Send + Sync,
    {
        self.modify(SCRIPTS, script_id.as_str(), |script: &mut ScriptRecord| {
            mutate(script);
            script.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn segment_names(&self, script_id: &ScriptId) -> StoreResult<Vec<String>> {
        let collection = segments_collection(script_id);
        let docs = with_retry(self.client.retry_config(), "list_documents", || {
            self.client.list_all_documents(&collection)
        })
        .await?;
        Ok(docs.into_iter().filter_map(|d| d.name).collect())
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn put_job(&self, job: &Job) -> StoreResult<()> {
        self.write(JOBS, job.job_id.as_str(), job).await
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        match self.read(JOBS, job_id.as_str()).await? {
            Some(doc) => Ok(Some(decode_document(&doc)?)),
            None => Ok(None),
        }
    }

    async fn update_stage(
        &self,
        job_id: &JobId,
        stage: JobStage,
        error: Option<ErrorDetail>,
    ) -> StoreResult<Job> {
        self.modify_job(job_id, |job| {
            apply_stage(job, stage)?;
            if error.is_some() {
                job.error = error.clone();
            }
            Ok(())
        })
        .await
    }

    async fn attach_script(&self, job_id: &JobId, script_id: &ScriptId) -> StoreResult<()> {
        self.modify_job(job_id, |job| {
            job.script_id = Some(script_id.clone());
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn attach_fanout(&self, job_id: &JobId, fanout: &FanoutSummary) -> StoreResult<()> {
        self.modify_job(job_id, |job| {
            job.fanout = Some(fanout.clone());
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn save_result(&self, result: &JobResult) -> StoreResult<()> {
        self.modify_job(&result.job_id, |job| apply_result(job, result))
            .await
            .map(|_| ())
    }

    async fn put_script(&self, script: &ScriptRecord) -> StoreResult<()> {
        self.write(SCRIPTS, script.script_id.as_str(), script).await
    }

    async fn get_script(&self, script_id: &ScriptId) -> StoreResult<Option<ScriptRecord>> {
        match self.read(SCRIPTS, script_id.as_str()).await? {
            Some(doc) => Ok(Some(decode_document(&doc)?)),
            None => Ok(None),
        }
    }

    async fn list_scripts_by_user(&self, user_id: &str) -> StoreResult<Vec<ScriptRecord>> {
        let query = StructuredQuery::field_equals(SCRIPTS, "user_id", user_id.to_firestore_value());
        let docs = with_retry(self.client.retry_config(), "run_query", || {
            self.client.run_query(query.clone())
        })
        .await?;

        let mut scripts = docs
            .iter()
            .map(decode_document::<ScriptRecord>)
            .collect::<StoreResult<Vec<_>>>()?;
        scripts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(scripts)
    }

    async fn update_script_status(
        &self,
        script_id: &ScriptId,
        status: ScriptStatus,
    ) -> StoreResult<ScriptRecord> {
        self.modify_script(script_id, |script| script.status = status)
            .await
    }

    async fn update_script_text(
        &self,
        script_id: &ScriptId,
        text: &str,
    ) -> StoreResult<ScriptRecord> {
        self.modify_script(script_id, |script| {
            script.text = text.to_string();
            script.status = ScriptStatus::Generated;
            script.error = None;
        })
        .await
    }

    async fn delete_script(&self, script_id: &ScriptId) -> StoreResult<bool> {
        if self.read(SCRIPTS, script_id.as_str()).await?.is_none() {
            return Ok(false);
        }

        let mut writes: Vec<Write> = self
            .segment_names(script_id)
            .await?
            .into_iter()
            .map(Write::delete)
            .collect();
        writes.push(Write::delete(
            self.client.document_name(SCRIPTS, script_id.as_str()),
        ));
        self.client.commit(writes).await?;
        Ok(true)
    }

    async fn replace_segments(
        &self,
        script_id: &ScriptId,
        segments: &[Segment],
    ) -> StoreResult<()> {
        check_segment_order(script_id, segments)?;

        let collection = segments_collection(script_id);
        let mut writes = Vec::with_capacity(segments.len());
        let mut kept = std::collections::HashSet::new();
        for segment in segments {
            let name = self
                .client
                .document_name(&collection, &segment.order.to_string());
            kept.insert(name.clone());
            writes.push(Write::upsert(Document::named(name, encode_fields(segment)?)));
        }

        // Old segments beyond the new count are deleted in the same commit
        for name in self.segment_names(script_id).await? {
            if !kept.contains(&name) {
                writes.push(Write::delete(name));
            }
        }

        if writes.len() > MAX_COMMIT_WRITES {
            return Err(StoreError::InvalidSegments(format!(
                "{} segments exceed what one atomic commit can hold",
                segments.len()
            )));
        }

        self.client.commit(writes).await?;
        record_segments_replaced("firestore", segments.len());
        debug!(script_id = %script_id, count = segments.len(), "Replaced segments");
        Ok(())
    }

    async fn list_segments(&self, script_id: &ScriptId) -> StoreResult<Vec<Segment>> {
        let collection = segments_collection(script_id);
        let docs = with_retry(self.client.retry_config(), "list_documents", || {
            self.client.list_all_documents(&collection)
        })
        .await?;

        let mut segments = docs
            .iter()
            .map(decode_document::<Segment>)
            .collect::<StoreResult<Vec<_>>>()?;
        segments.sort_by_key(|s| s.order);
        Ok(segments)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.client.get_document(JOBS, "_ping").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_collection_path() {
        assert_eq!(
            segments_collection(&ScriptId::from("abc")),
            "scripts/abc/segments"
        );
    }
}
