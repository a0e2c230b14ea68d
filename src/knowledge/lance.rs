//! LanceDB Vector Index - 디스크 기반 벡터 인덱스
//!
//! 청크 벡터와 메타데이터를 하나의 테이블에 저장합니다.
//! 검색은 코사인 거리를 사용하므로 `_distance`는 0.0 ~ 2.0 범위입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::Table;
use lancedb::DistanceType;

use crate::error::{RagError, Result};

use super::vector::{
    ChunkMetadata, IndexRecord, IndexedChunk, MetadataFilter, RetrievedCandidate, VectorIndex,
};

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

/// 삭제 시 IN 절 하나에 넣는 최대 ID 수
const DELETE_BATCH: usize = 256;

/// 벡터를 제외한 메타데이터 컬럼
const RECORD_COLUMNS: [&str; 9] = [
    "id",
    "session_id",
    "filename",
    "position",
    "length",
    "sentence_count",
    "word_count",
    "uploaded_at",
    "text",
];

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
///
/// 한 번의 `add`는 단일 RecordBatch를 한 번에 커밋하므로
/// 문서 하나의 청크가 전부 보이거나 전혀 보이지 않습니다.
pub struct LanceVectorIndex {
    db: Connection,
    dimension: i32,
}

impl LanceVectorIndex {
    /// LanceDB 인덱스 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        let dimension = i32::try_from(dimension)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| RagError::Config(format!("Invalid embedding dimension: {}", dimension)))?;

        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RagError::index(format!("Failed to create LanceDB directory: {}", e))
                })?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::index("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(index_err("Failed to connect to LanceDB"))?;

        tracing::debug!("LanceDB index opened at {:?} (dimension={})", path, dimension);
        Ok(Self { db, dimension })
    }

    /// 청크 테이블 스키마
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("session_id", DataType::Utf8, false),
            Field::new("filename", DataType::Utf8, false),
            Field::new("position", DataType::Int64, false),
            Field::new("length", DataType::Int64, false),
            Field::new("sentence_count", DataType::Int64, false),
            Field::new("word_count", DataType::Int64, false),
            Field::new("uploaded_at", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 청크들을 Arrow RecordBatch로 변환
    fn chunks_to_batch(&self, chunks: &[IndexedChunk]) -> Result<RecordBatch> {
        if let Some(bad) = chunks
            .iter()
            .find(|c| c.embedding.len() != self.dimension as usize)
        {
            return Err(RagError::InvalidInput(format!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.id,
                self.dimension,
                bad.embedding.len()
            )));
        }

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let sessions: Vec<&str> = chunks.iter().map(|c| c.metadata.session_id.as_str()).collect();
        let filenames: Vec<&str> = chunks.iter().map(|c| c.metadata.filename.as_str()).collect();
        let positions: Vec<i64> = chunks.iter().map(|c| c.metadata.position as i64).collect();
        let lengths: Vec<i64> = chunks.iter().map(|c| c.metadata.length as i64).collect();
        let sentences: Vec<i64> = chunks
            .iter()
            .map(|c| c.metadata.sentence_count as i64)
            .collect();
        let words: Vec<i64> = chunks.iter().map(|c| c.metadata.word_count as i64).collect();
        let uploaded: Vec<String> = chunks
            .iter()
            .map(|c| c.metadata.uploaded_at.to_rfc3339())
            .collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(sessions)),
                Arc::new(StringArray::from(filenames)),
                Arc::new(Int64Array::from(positions)),
                Arc::new(Int64Array::from(lengths)),
                Arc::new(Int64Array::from(sentences)),
                Arc::new(Int64Array::from(words)),
                Arc::new(StringArray::from(uploaded)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(index_err("Failed to list tables"))?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(index_err("Failed to open table"))?;
        Ok(Some(table))
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn add(&self, chunks: &[IndexedChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let batch = self.chunks_to_batch(chunks)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                // 기존 테이블에 추가
                table
                    .add(batches)
                    .execute()
                    .await
                    .map_err(index_err("Failed to add chunks to table"))?;
            }
            None => {
                // 새 테이블 생성
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .map_err(index_err("Failed to create table"))?;
            }
        }

        Ok(chunks.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievedCandidate>> {
        if top_n == 0 {
            return Ok(vec![]);
        }
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let mut query = table
            .vector_search(vector.to_vec())
            .map_err(index_err("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(top_n);
        if let Some(sql) = filter.to_sql() {
            query = query.only_if(sql);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(index_err("Failed to execute vector search"))?
            .try_collect()
            .await
            .map_err(index_err("Failed to read search results"))?;

        let mut candidates = Vec::new();
        for batch in &batches {
            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RagError::index("Missing _distance column"))?;

            for (i, record) in batch_to_records(batch)?.into_iter().enumerate() {
                candidates.push(RetrievedCandidate {
                    id: record.id,
                    text: record.text,
                    metadata: record.metadata,
                    distance: distances.value(i),
                });
            }
        }

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(candidates)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<IndexRecord>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let total = table
            .count_rows(filter.to_sql())
            .await
            .map_err(index_err("Failed to count rows"))?;
        if total == 0 {
            return Ok(vec![]);
        }

        let mut query = table
            .query()
            .select(Select::columns(&RECORD_COLUMNS))
            .limit(total);
        if let Some(sql) = filter.to_sql() {
            query = query.only_if(sql);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(index_err("Failed to execute query"))?
            .try_collect()
            .await
            .map_err(index_err("Failed to read query results"))?;

        let mut records = Vec::with_capacity(total);
        for batch in &batches {
            records.extend(batch_to_records(batch)?);
        }
        Ok(records)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let mut deleted = 0;
        for group in ids.chunks(DELETE_BATCH) {
            let predicate = id_predicate(group);
            let matching = table
                .count_rows(Some(predicate.clone()))
                .await
                .map_err(index_err("Failed to count rows for delete"))?;
            if matching == 0 {
                continue;
            }

            table
                .delete(&predicate)
                .await
                .map_err(index_err("Failed to delete chunks"))?;
            deleted += matching;
        }

        Ok(deleted)
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        table
            .count_rows(filter.to_sql())
            .await
            .map_err(index_err("Failed to count rows"))
    }

    fn name(&self) -> &'static str {
        "lancedb"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// lancedb 에러를 문맥과 함께 IndexUnavailable로 변환
fn index_err(context: &'static str) -> impl Fn(lancedb::Error) -> RagError {
    move |e| RagError::index(format!("{}: {}", context, e))
}

/// `id IN (...)` 조건 생성 (작은따옴표 이스케이프)
fn id_predicate(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect();
    format!("id IN ({})", quoted.join(", "))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::index(format!("Missing {} column", name)))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| RagError::index(format!("Missing {} column", name)))
}

/// RecordBatch의 메타데이터 컬럼을 레코드로 변환
fn batch_to_records(batch: &RecordBatch) -> Result<Vec<IndexRecord>> {
    let ids = string_column(batch, "id")?;
    let sessions = string_column(batch, "session_id")?;
    let filenames = string_column(batch, "filename")?;
    let positions = int_column(batch, "position")?;
    let lengths = int_column(batch, "length")?;
    let sentences = int_column(batch, "sentence_count")?;
    let words = int_column(batch, "word_count")?;
    let uploaded = string_column(batch, "uploaded_at")?;
    let texts = string_column(batch, "text")?;

    (0..batch.num_rows())
        .map(|i| {
            Ok(IndexRecord {
                id: ids.value(i).to_string(),
                text: texts.value(i).to_string(),
                metadata: ChunkMetadata {
                    session_id: sessions.value(i).to_string(),
                    filename: filenames.value(i).to_string(),
                    position: positions.value(i).max(0) as usize,
                    length: lengths.value(i).max(0) as usize,
                    sentence_count: sentences.value(i).max(0) as usize,
                    word_count: words.value(i).max(0) as usize,
                    uploaded_at: parse_datetime(uploaded.value(i))?,
                },
            })
        })
        .collect()
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
///
/// 깨진 타임스탬프는 `DataIntegrityViolation`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            RagError::DataIntegrityViolation(format!("Invalid uploaded_at {:?}: {}", s, e))
        })
}

// ============================================================================
// Tests
// ============================================================================
