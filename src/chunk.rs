//! 페이로드 청크 분할
//!
//! - Chunk: 협상된 MTU 크기의 쓰기 단위
//! - ChunkQueue: 순서대로 한 번씩만 소비되는 FIFO

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{Error, Result};

/// 청크 (쓰기 한 번 단위)
pub type Chunk = Bytes;

/// 전송 대기 청크 큐
#[derive(Debug, Clone)]
pub struct ChunkQueue {
    chunks: VecDeque<Chunk>,

    /// 분할 전 페이로드 전체 크기
    total_bytes: usize,

    /// 청크 크기 (마지막 청크 제외)
    chunk_size: usize,

    /// 분할 직후 청크 수
    total_chunks: usize,
}

impl ChunkQueue {
    /// 페이로드를 `chunk_size` 단위로 분할
    ///
    /// 마지막 청크만 짧을 수 있다. 빈 페이로드는 빈 큐가 된다.
    pub fn split(payload: &Bytes, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be > 0".into()));
        }

        let total_chunks = payload.len().div_ceil(chunk_size);
        let mut chunks = VecDeque::with_capacity(total_chunks);

        let mut offset = 0;
        while offset < payload.len() {
            let end = offset + chunk_size.min(payload.len() - offset);
            // 원본 버퍼 공유 (복사 없음)
            chunks.push_back(payload.slice(offset..end));
            offset = end;
        }

        Ok(Self {
            chunks,
            total_bytes: payload.len(),
            chunk_size,
            total_chunks,
        })
    }

    /// 다음 청크 꺼내기
    pub fn pop(&mut self) -> Option<Chunk> {
        self.chunks.pop_front()
    }

    /// 남은 청크 수
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 처리율 계산용 전체 바이트 수
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Iterator for ChunkQueue {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.pop()
    }
}
