//! Session Registry - 인덱스 메타데이터에서 문서 목록 도출
//!
//! 세션은 따로 저장하지 않고, 매번 인덱스 레코드를 session_id로 묶어 계산합니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

use super::vector::{IndexRecord, MetadataFilter, VectorIndex};

/// 업로드된 문서 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub filename: String,
    /// 이 세션의 청크 수
    pub chunk_count: usize,
    /// 가장 이른 업로드 시각
    pub uploaded_at: DateTime<Utc>,
}

/// 세션 목록 조회/삭제
#[derive(Clone)]
pub struct SessionRegistry {
    index: Arc<dyn VectorIndex>,
}

impl SessionRegistry {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    /// 전체 세션 목록 (업로드 시각, session_id 순)
    ///
    /// 같은 세션의 청크가 서로 다른 파일명을 가지면 `DataIntegrityViolation`.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let records = self.index.get(&MetadataFilter::all()).await?;
        let mut sessions = group_sessions(&records)?;
        sessions.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// 단일 세션 조회
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let records = self.index.get(&MetadataFilter::session(session_id)).await?;
        group_sessions(&records)?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::NotFound(format!("session '{}'", session_id)))
    }

    /// 세션 레코드 조회 (position 오름차순)
    pub async fn session_records(&self, session_id: &str) -> Result<Vec<IndexRecord>> {
        let mut records = self.index.get(&MetadataFilter::session(session_id)).await?;
        if records.is_empty() {
            return Err(RagError::NotFound(format!("session '{}'", session_id)));
        }
        records.sort_by_key(|r| r.metadata.position);
        Ok(records)
    }

    /// 세션 존재 여부
    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.index.count(&MetadataFilter::session(session_id)).await? > 0)
    }

    /// 세션의 모든 청크 삭제, 삭제 수 반환
    pub async fn delete_session(&self, session_id: &str) -> Result<usize> {
        let records = self.index.get(&MetadataFilter::session(session_id)).await?;
        if records.is_empty() {
            return Err(RagError::NotFound(format!("session '{}'", session_id)));
        }

        let ids: Vec<String> = records.into_iter().map(|r| r.id).collect();
        let deleted = self.index.delete(&ids).await?;

        tracing::info!("Deleted session {} ({} chunks)", session_id, deleted);
        Ok(deleted)
    }
}

/// 레코드를 session_id로 묶어 Session 생성 (session_id 순)
fn group_sessions(records: &[IndexRecord]) -> Result<Vec<Session>> {
    let mut groups: BTreeMap<&str, Session> = BTreeMap::new();

    for record in records {
        let meta = &record.metadata;
        match groups.get_mut(meta.session_id.as_str()) {
            Some(session) => {
                if session.filename != meta.filename {
                    return Err(RagError::DataIntegrityViolation(format!(
                        "session '{}' has chunks from '{}' and '{}'",
                        meta.session_id, session.filename, meta.filename
                    )));
                }
                session.chunk_count += 1;
                session.uploaded_at = session.uploaded_at.min(meta.uploaded_at);
            }
            None => {
                groups.insert(
                    meta.session_id.as_str(),
                    Session {
                        session_id: meta.session_id.clone(),
                        filename: meta.filename.clone(),
                        chunk_count: 1,
                        uploaded_at: meta.uploaded_at,
                    },
                );
            }
        }
    }

    Ok(groups.into_values().collect())
}

// ============================================================================
// Tests
// ============================================================================
