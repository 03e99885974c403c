//! Alınan sertifikanın diske kopyalanması.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::acquirer::CredentialBundle;

/// `CERTS_DIR` altına birincil alan adının dosyalarını yazar.
#[derive(Debug, Clone)]
pub struct CertificateArchive {
    dir: PathBuf,
}

impl CertificateArchive {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Yazılan dosyaların yollarını döner. Issuer sertifikası yoksa
    /// `.issuer.crt` boş yazılır. Unix'te dosyalar yalnızca sahibine açıktır
    /// (0600).
    ///
    /// # Errors
    ///
    /// Dizin oluşturulamazsa veya dosyalardan biri yazılamazsa I/O hatası döner.
    pub async fn mirror(&self, bundle: &CredentialBundle) -> std::io::Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let domain = &bundle.domain;
        let issuer = bundle.issuer_certificate_pem.as_deref().unwrap_or_default();
        let files: [(String, &[u8]); 5] = [
            (format!("{domain}.crt"), bundle.certificate_pem.as_bytes()),
            (format!("{domain}.key"), bundle.private_key_pem.as_bytes()),
            (format!("{domain}.pem"), bundle.combined_pem.as_bytes()),
            (format!("{domain}.json"), bundle.metadata_json.as_bytes()),
            (format!("{domain}.issuer.crt"), issuer.as_bytes()),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, contents) in files {
            let path = self.dir.join(name);
            write_private(&path, contents).await?;
            debug!(path = %path.display(), "sertifika dosyası yazıldı");
            written.push(path);
        }
        Ok(written)
    }
}

/// Dosyayı sıfırdan yazar; Unix'te izinler 0600 olur.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use zeroize::Zeroizing;

    fn bundle(issuer: Option<&str>) -> CredentialBundle {
        CredentialBundle {
            domain: "a.test".to_string(),
            domains: vec!["a.test".to_string(), "b.test".to_string()],
            certificate_pem: "CERT\n".to_string(),
            private_key_pem: Zeroizing::new("KEY\n".to_string()),
            issuer_certificate_pem: issuer.map(str::to_string),
            combined_pem: Zeroizing::new("CERT\nKEY\n".to_string()),
            metadata_json: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn mirrors_primary_domain_files() {
        let temp = tempfile::tempdir().expect("geçici dizin");
        let archive = CertificateArchive::new(temp.path().join("certs"));

        let written = archive.mirror(&bundle(Some("ISSUER\n"))).await.expect("yazım");
        assert_eq!(written.len(), 5);
        let combined = std::fs::read_to_string(archive.dir().join("a.test.pem")).expect("pem");
        assert_eq!(combined, "CERT\nKEY\n");
        assert!(archive.dir().join("a.test.issuer.crt").exists());
        assert!(!archive.dir().join("b.test.crt").exists());
    }

    #[tokio::test]
    async fn missing_issuer_is_written_empty() {
        let temp = tempfile::tempdir().expect("geçici dizin");
        let archive = CertificateArchive::new(temp.path());
        let written = archive.mirror(&bundle(None)).await.expect("yazım");
        assert_eq!(written.len(), 5);
        let issuer = std::fs::read(temp.path().join("a.test.issuer.crt")).expect("issuer");
        assert!(issuer.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("geçici dizin");
        let archive = CertificateArchive::new(temp.path());
        let key = temp.path().join("a.test.key");
        for path in archive.mirror(&bundle(Some("ISSUER\n"))).await.expect("yazım") {
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }
        assert_eq!(std::fs::read_to_string(key).expect("anahtar"), "KEY\n");
    }

    #[tokio::test]
    async fn rewrites_existing_files() {
        let temp = tempfile::tempdir().expect("geçici dizin");
        let archive = CertificateArchive::new(temp.path());
        std::fs::write(temp.path().join("a.test.crt"), "ESKİ VE DAHA UZUN İÇERİK\n").expect("eski");
        archive.mirror(&bundle(None)).await.expect("yazım");
        let crt = std::fs::read_to_string(temp.path().join("a.test.crt")).expect("crt");
        assert_eq!(crt, "CERT\n");
    }
}
