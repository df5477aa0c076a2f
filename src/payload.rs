//! 전송할 페이로드 준비

use std::path::Path;

use bytes::Bytes;
use rand::RngCore;
use tracing::info;

use crate::{Error, Result};

/// 파일 전체를 읽어 페이로드로 사용
pub fn load(path: impl AsRef<Path>) -> Result<Bytes> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    info!("Loaded payload {:?}: {} bytes", path, data.len());
    Ok(Bytes::from(data))
}

/// 무작위 페이로드 (압축/중복 제거 영향 없는 측정용)
pub fn random(size: usize) -> Result<Bytes> {
    if size == 0 {
        return Err(Error::InvalidInput("payload size must be > 0".into()));
    }

    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    Ok(Bytes::from(data))
}
