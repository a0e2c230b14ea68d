//! CLI 모듈
//!
//! palank-docqa CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{AppConfig, ProviderKind};
use crate::embedding::has_api_key;
use crate::error::RagError;
use crate::knowledge::{
    open_index, Answer, AnswerStatus, DocumentQa, MetadataFilter, SessionRegistry,
};

/// 업로드 가능한 텍스트 확장자
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "text"];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-docqa")]
#[command(version, about = "업로드 문서 질의응답 RAG", long_about = None)]
pub struct Cli {
    /// 디스크 인덱스 대신 메모리 인덱스 사용 (프로세스 종료 시 삭제)
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 문서 업로드
    Upload {
        /// 업로드할 파일 경로 (txt, md)
        #[arg(short, long)]
        file: PathBuf,

        /// 표시할 파일명 (기본: 파일 이름)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// 문서에 질문
    Ask {
        /// 질문
        question: String,

        /// 특정 문서(세션)로 범위 제한
        #[arg(short, long)]
        session: Option<String>,

        /// 먼저 업로드한 뒤 그 문서에 질문 (--ephemeral과 함께 사용)
        #[arg(short, long, conflicts_with = "session")]
        file: Option<PathBuf>,

        /// 출처 청크 내용까지 출력
        #[arg(short, long)]
        verbose: bool,
    },

    /// 문서 개요 분석
    Analyze {
        #[arg(short, long)]
        session: String,
    },

    /// 업로드된 문서 목록
    List,

    /// 문서 삭제
    Delete {
        #[arg(short, long)]
        session: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load().context("설정 로드 실패")?;
    let ephemeral = cli.ephemeral;

    match cli.command {
        Commands::Upload { file, name } => cmd_upload(&config, ephemeral, &file, name).await,
        Commands::Ask {
            question,
            session,
            file,
            verbose,
        } => cmd_ask(&config, ephemeral, &question, session, file, verbose).await,
        Commands::Analyze { session } => cmd_analyze(&config, ephemeral, &session).await,
        Commands::List => cmd_list(&config, ephemeral).await,
        Commands::Delete { session } => cmd_delete(&config, ephemeral, &session).await,
        Commands::Status => cmd_status(&config, ephemeral).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 프로바이더까지 포함한 파이프라인 생성
async fn open_pipeline(config: &AppConfig, ephemeral: bool) -> Result<DocumentQa> {
    ensure_api_key(config)?;
    DocumentQa::from_config(config, ephemeral)
        .await
        .context("파이프라인 초기화 실패")
}

/// Gemini 사용 시 API 키 확인
fn ensure_api_key(config: &AppConfig) -> Result<()> {
    let needs_key = config.embedding.provider == ProviderKind::Gemini
        || config.generation.provider == ProviderKind::Gemini;
    if needs_key && !has_api_key() {
        anyhow::bail!(
            "API 키가 설정되지 않았습니다.\n\
             설정: export GEMINI_API_KEY=your-key"
        );
    }
    Ok(())
}

/// 업로드 명령어 (upload)
async fn cmd_upload(
    config: &AppConfig,
    ephemeral: bool,
    file: &Path,
    name: Option<String>,
) -> Result<()> {
    let qa = open_pipeline(config, ephemeral).await?;
    upload_file(&qa, file, name).await?;
    Ok(())
}

/// 파일을 읽어 업로드하고 세션 ID 반환
async fn upload_file(qa: &DocumentQa, file: &Path, name: Option<String>) -> Result<String> {
    let (text, filename) = read_text_file(file, name).await?;

    println!(
        "[*] 업로드 중: {} ({})",
        filename,
        format_bytes(text.len())
    );

    let receipt = qa
        .process_upload(&text, &filename)
        .await
        .with_context(|| format!("업로드 실패: {}", filename))?;

    if receipt.chunk_count == 0 {
        println!("[!] 색인할 내용이 없습니다: {}", filename);
    } else {
        println!("[OK] 문서가 추가되었습니다 ({} 청크)", receipt.chunk_count);
        println!("     세션: {}", receipt.session_id);
    }

    Ok(receipt.session_id)
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: &AppConfig,
    ephemeral: bool,
    question: &str,
    session: Option<String>,
    file: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let qa = open_pipeline(config, ephemeral).await?;

    let scope = match file {
        Some(path) => Some(upload_file(&qa, &path, None).await?),
        None => session,
    };

    println!("[*] 질문: \"{}\"", question);

    let answer = qa
        .answer_question(question, scope.as_deref())
        .await
        .context("답변 생성 실패")?;

    print_answer(&answer, verbose);
    Ok(())
}

fn print_answer(answer: &Answer, verbose: bool) {
    if answer.status == AnswerStatus::InsufficientContext {
        println!("\n[!] {}", answer.answer);
        return;
    }

    println!("\n[OK] 답변:\n");
    println!("{}", answer.answer.trim());

    let info = &answer.retrieval_info;
    println!(
        "\n[*] 검색: {} 후보 -> {} 리랭킹 -> {} 문서",
        info.initial_retrieved, info.after_reranking, info.documents_searched
    );

    println!("\n출처:");
    for source in answer.source_refs() {
        println!(
            "  {}. {} (청크 #{}, 점수: {:.3})",
            source.rank.unwrap_or_default(),
            source.filename,
            source.position.unwrap_or_default(),
            source.score.unwrap_or_default()
        );
        if verbose {
            println!("     {}", truncate_text(&source.excerpt, 200));
        }
    }
}

/// 분석 명령어 (analyze)
async fn cmd_analyze(config: &AppConfig, ephemeral: bool, session: &str) -> Result<()> {
    let qa = open_pipeline(config, ephemeral).await?;

    println!("[*] 문서 분석 중: {}", session);

    let analysis = qa
        .analyze_document(session)
        .await
        .context("문서 분석 실패")?;

    println!(
        "\n[OK] {} ({} 청크 분석)\n",
        analysis.filename, analysis.chunks_analyzed
    );
    println!("{}", analysis.analysis.trim());
    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(config: &AppConfig, ephemeral: bool) -> Result<()> {
    let registry = SessionRegistry::new(open_index(config, ephemeral).await?);
    let sessions = registry.list_sessions().await.context("문서 목록 조회 실패")?;

    if sessions.is_empty() {
        println!("[!] 업로드된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 업로드된 문서 ({} 건):\n", sessions.len());

    for session in sessions {
        println!("  {}", truncate_text(&session.filename, 60));
        println!("        세션: {}", session.session_id);
        println!(
            "        {} | {} 청크",
            session.uploaded_at.format("%Y-%m-%d %H:%M"),
            session.chunk_count
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: &AppConfig, ephemeral: bool, session: &str) -> Result<()> {
    let registry = SessionRegistry::new(open_index(config, ephemeral).await?);

    let deleted = registry
        .delete_session(session)
        .await
        .with_context(|| format!("세션 {} 삭제 실패", session))?;

    println!("[OK] 세션 {} 삭제됨 ({} 청크)", session, deleted);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &AppConfig, ephemeral: bool) -> Result<()> {
    println!("palank-docqa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!(
        "[*] 데이터 디렉토리: {}",
        config.storage.data_dir.display()
    );
    println!(
        "[*] 임베딩: {:?} (차원 {}) / 생성: {:?}",
        config.embedding.provider, config.embedding.dimension, config.generation.provider
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match open_index(config, ephemeral).await {
        Ok(index) => {
            let registry = SessionRegistry::new(index.clone());
            match registry.list_sessions().await {
                Ok(sessions) => println!("[OK] 업로드된 문서: {} 건", sessions.len()),
                Err(e) => println!("[!] 문서 목록 조회 실패: {}", e),
            }
            match index.count(&MetadataFilter::all()).await {
                Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
                Err(e) => tracing::debug!("Index count failed: {}", e),
            }
        }
        Err(e) => {
            println!("[!] 벡터 인덱스 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 파일 읽기 (확장자 확인)
async fn read_text_file(path: &Path, name: Option<String>) -> Result<(String, String)> {
    check_text_extension(path)?;

    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("파일 읽기 실패: {:?}", path))?;

    let filename = name
        .or_else(|| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_string())
        })
        .unwrap_or_else(|| path.display().to_string());

    Ok((text, filename))
}

/// 지원하는 텍스트 형식인지 확인
fn check_text_extension(path: &Path) -> std::result::Result<(), RagError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(RagError::InvalidInput(format!(
            "Unsupported file format: {:?} (supported: {})",
            path,
            TEXT_EXTENSIONS.join(", ")
        )))
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
