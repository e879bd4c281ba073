use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as base64_engine;
use base64::Engine;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// 解码后的服务账号凭证文件
///
/// 每次标注流程独立创建一个唯一命名的临时文件（仅当前用户可读写），
/// 路径显式传给客户端构造函数。值被 drop 时文件随之删除，
/// 并发请求之间不会互相覆盖或读到对方的凭证。
#[derive(Debug)]
pub struct CredentialFile {
    file: NamedTempFile,
}

impl CredentialFile {
    /// 解码 base64 凭证并写入新的临时文件
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            anyhow::bail!("GCS_KEY_BASE64 为空");
        }

        let bytes = base64_engine
            .decode(encoded)
            .context("GCS_KEY_BASE64 不是合法的 base64")?;

        let mut file = tempfile::Builder::new()
            .prefix("gcs-key-")
            .suffix(".json")
            .tempfile()
            .context("创建凭证临时文件失败")?;
        file.write_all(&bytes).context("写入凭证文件失败")?;
        file.flush().context("写入凭证文件失败")?;

        tracing::debug!("凭证已写入: {} ({} 字节)", file.path().display(), bytes.len());

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_decoded_bytes() {
        let payload = br#"{"client_email":"svc@example.iam.gserviceaccount.com"}"#;
        let encoded = base64_engine.encode(payload);

        let credential = CredentialFile::from_base64(&format!("  {}\n", encoded)).unwrap();
        let written = std::fs::read(credential.path()).unwrap();
        assert_eq!(written, payload);
    }

    #[test]
    fn each_load_gets_its_own_file() {
        let encoded = base64_engine.encode(b"{}");
        let first = CredentialFile::from_base64(&encoded).unwrap();
        let second = CredentialFile::from_base64(&encoded).unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn file_is_removed_on_drop() {
        let encoded = base64_engine.encode(b"{}");
        let credential = CredentialFile::from_base64(&encoded).unwrap();
        let path = credential.path().to_path_buf();
        assert!(path.exists());

        drop(credential);
        assert!(!path.exists());
    }

    #[test]
    fn rejects_invalid_or_empty_input() {
        assert!(CredentialFile::from_base64("not base64 at all!").is_err());
        assert!(CredentialFile::from_base64("   ").is_err());
    }
}
