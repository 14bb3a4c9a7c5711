//! SSH certificate lifecycle
//!
//! The proxy issues a short-lived certificate together with a fresh key
//! pair. They live next to each other on disk as `<key>`, `<key>.pub` and
//! `<key>-cert.pub`, and the private key is loaded into the SSH agent
//! for exactly as long as the certificate remains valid.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use ap_core::secure_file::{commit, discard, stage_private};
use ap_core::tools::{SshAdd, SshKeygen};
use ap_core::traits::{CertificateInspector, SshAgent};
use ap_core::{ClientConfig, CredentialType, TargetSpec, TokenStore};

use crate::auth::{AuthSession, Authenticator};
use crate::error::{AuthError, CredentialError};
use crate::proxy::ProxyClient;

/// Agent lifetime for certificates without an end date
pub const FOREVER_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// On-disk locations of the key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub certificate: PathBuf,
}

impl From<&ClientConfig> for CredentialPaths {
    fn from(config: &ClientConfig) -> Self {
        Self {
            private_key: config.private_key_path().to_path_buf(),
            public_key: config.public_key_path(),
            certificate: config.certificate_path(),
        }
    }
}

/// Key material issued by the proxy
///
/// Only the decoded private key is wiped on drop; the HTTP response buffer
/// it was parsed from is released without zeroing.
pub struct SshCredential {
    pub private_key: Zeroizing<String>,
    pub public_key: String,
    pub certificate: String,
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredential")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .field("certificate", &self.certificate)
            .finish()
    }
}

/// End of a validity window
enum WindowEnd {
    At(DateTime<Utc>),
    Never,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CredentialError> {
    let invalid = || CredentialError::Validity(raw.to_string());

    // A trailing Z means the tool printed UTC; otherwise it is local time.
    if let Some(utc) = raw.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}

fn parse_end(raw: &str) -> Result<WindowEnd, CredentialError> {
    if raw == "forever" {
        Ok(WindowEnd::Never)
    } else {
        parse_timestamp(raw).map(WindowEnd::At)
    }
}

/// Remaining validity of a certificate window as printed by `ssh-keygen -L`
///
/// Accepts `forever`, `from <ts> to <ts|forever>`, `after <ts>` and
/// `before <ts>`. Returns `Ok(None)` once the window has closed.
pub fn remaining_validity(
    window: &str,
    now: DateTime<Utc>,
) -> Result<Option<Duration>, CredentialError> {
    let window = window.trim();
    let words: Vec<&str> = window.split_whitespace().collect();

    let end = match words.as_slice() {
        ["forever"] => WindowEnd::Never,
        ["from", start, "to", end] => {
            parse_timestamp(start)?;
            parse_end(end)?
        }
        ["after", start] => {
            parse_timestamp(start)?;
            WindowEnd::Never
        }
        ["before", end] => parse_end(end)?,
        _ => return Err(CredentialError::Validity(window.to_string())),
    };

    match end {
        WindowEnd::Never => Ok(Some(FOREVER_LIFETIME)),
        WindowEnd::At(end) => Ok((end - now).to_std().ok().filter(|d| !d.is_zero())),
    }
}

/// Loads, refreshes and installs the SSH credential
pub struct CredentialManager<I, A> {
    paths: CredentialPaths,
    inspector: I,
    agent: A,
}

impl CredentialManager<SshKeygen, SshAdd> {
    /// Manager backed by the OpenSSH command-line tools
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            CredentialPaths::from(config),
            SshKeygen::new(config.ssh_keygen.clone()),
            SshAdd::new(config.ssh_add.clone()),
        )
    }
}

impl<I: CertificateInspector, A: SshAgent> CredentialManager<I, A> {
    pub fn new(paths: CredentialPaths, inspector: I, agent: A) -> Self {
        Self {
            paths,
            inspector,
            agent,
        }
    }

    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    /// Remaining validity of the cached certificate, `None` if it must be renewed
    pub fn credential_still_valid(&self) -> Option<Duration> {
        self.credential_still_valid_at(Utc::now())
    }

    pub fn credential_still_valid_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let window = match self.inspector.validity_window(&self.paths.certificate) {
            Ok(window) => window,
            Err(e) => {
                warn!("Could not inspect certificate: {}", e);
                return None;
            }
        };

        match remaining_validity(&window, now) {
            Ok(Some(remaining)) => {
                debug!(remaining_secs = remaining.as_secs(), "Certificate is valid");
                Some(remaining)
            }
            Ok(None) => {
                error!("SSH certificate has expired, key must be renewed");
                None
            }
            Err(e) => {
                warn!("{}, renewing", e);
                None
            }
        }
    }

    /// Replace the key in the SSH agent, limited to `validity`
    ///
    /// Removing a key that is not loaded fails harmlessly; only the add
    /// step decides the outcome.
    pub fn install_in_agent(&self, validity: Duration) -> bool {
        if let Err(e) = self.agent.remove_identity(&self.paths.private_key) {
            debug!("Removing previous identity failed: {}", e);
        }

        match self.agent.add_identity(&self.paths.private_key, validity) {
            Ok(()) => {
                info!(lifetime_secs = validity.as_secs(), "Loaded SSH key into agent");
                true
            }
            Err(e) => {
                error!("Failed to load SSH key into agent: {}", e);
                false
            }
        }
    }

    /// Whether a currently valid credential is now loaded in the agent
    pub fn load_credentials(&self) -> bool {
        if !self.paths.certificate.exists() {
            debug!(path = %self.paths.certificate.display(), "No cached certificate");
            return false;
        }

        match self.credential_still_valid() {
            Some(validity) => self.install_in_agent(validity),
            None => false,
        }
    }

    /// Write the three key files
    ///
    /// Either all three are replaced or, when a rename fails midway, all
    /// three are removed.
    pub fn persist_credential(&self, credential: &SshCredential) -> Result<(), CredentialError> {
        if credential.private_key.trim().is_empty() {
            return Err(CredentialError::MissingField("private_key"));
        }

        let files: [(&Path, &[u8]); 3] = [
            (&self.paths.private_key, credential.private_key.as_bytes()),
            (&self.paths.public_key, credential.public_key.as_bytes()),
            (&self.paths.certificate, credential.certificate.as_bytes()),
        ];

        let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
        for (path, contents) in files {
            match stage_private(path, contents) {
                Ok(tmp) => staged.push((tmp, path)),
                Err(source) => {
                    for (tmp, _) in &staged {
                        discard(tmp);
                    }
                    return Err(io_error(path, source));
                }
            }
        }

        // The certificate is committed last. If any rename fails the whole
        // set is removed so the next run renews instead of pairing a new key
        // with an old certificate.
        for (i, (tmp, path)) in staged.iter().enumerate() {
            if let Err(source) = commit(tmp, path) {
                for (rest, _) in &staged[i..] {
                    discard(rest);
                }
                for (target, _) in files {
                    discard(target);
                }
                return Err(io_error(path, source));
            }
        }

        debug!(path = %self.paths.private_key.display(), "Stored new SSH credential");
        Ok(())
    }

    /// Ask the proxy to issue a credential for `session`
    pub async fn fetch_credential(
        &self,
        proxy: &ProxyClient,
        session: &AuthSession,
    ) -> Result<SshCredential, CredentialError> {
        let response = proxy
            .fetch_ssh_credential(&session.cli_token, &session.ap_session)
            .await?;

        let private_key = response
            .private_key
            .filter(|key| !key.trim().is_empty())
            .map(Zeroizing::new)
            .ok_or(CredentialError::MissingField("private_key"))?;
        let public_key = response
            .public_key
            .ok_or(CredentialError::MissingField("public_key"))?;
        let certificate = response
            .certificate
            .ok_or(CredentialError::MissingField("certificate"))?;

        Ok(SshCredential {
            private_key,
            public_key,
            certificate,
        })
    }

    /// Authenticate, fetch and persist a new credential
    ///
    /// Issuance problems yield `Ok(false)` so the caller can deny access;
    /// only authentication failures are errors.
    pub async fn request_new_credentials(
        &self,
        auth: &Authenticator,
        store: &mut TokenStore,
        target: &TargetSpec,
        kind: CredentialType,
    ) -> Result<bool, AuthError> {
        let session = auth.authenticate(store, target, kind).await?;

        let credential = match self.fetch_credential(auth.proxy(), &session).await {
            Ok(credential) => credential,
            Err(e) => {
                error!("Failed to obtain SSH credential: {}", e);
                return Ok(false);
            }
        };

        let persisted = self.persist_credential(&credential);
        drop(credential);

        match persisted {
            Ok(()) => {
                info!(destination = %target, "Received new SSH credential");
                Ok(true)
            }
            Err(e) => {
                error!("Failed to store SSH credential: {}", e);
                Ok(false)
            }
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSettings;
    use crate::browser::BrowserLauncher;
    use crate::test_support::spawn_proxy;
    use ap_core::ToolError;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    struct FakeInspector(Option<String>);

    impl CertificateInspector for FakeInspector {
        fn validity_window(&self, _certificate: &Path) -> Result<String, ToolError> {
            self.0.clone().ok_or_else(|| ToolError::Parse {
                program: "ssh-keygen".to_string(),
                reason: "no certificate".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeAgent {
        fail_add: bool,
        fail_remove: bool,
        calls: RefCell<Vec<String>>,
    }

    impl SshAgent for FakeAgent {
        fn remove_identity(&self, _key: &Path) -> Result<(), ToolError> {
            self.calls.borrow_mut().push("remove".to_string());
            if self.fail_remove {
                return Err(ToolError::Parse {
                    program: "ssh-add".to_string(),
                    reason: "not loaded".to_string(),
                });
            }
            Ok(())
        }

        fn add_identity(&self, _key: &Path, lifetime: Duration) -> Result<(), ToolError> {
            self.calls
                .borrow_mut()
                .push(format!("add {}", lifetime.as_secs()));
            if self.fail_add {
                return Err(ToolError::Parse {
                    program: "ssh-add".to_string(),
                    reason: "agent refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn paths(dir: &Path) -> CredentialPaths {
        let config = ClientConfig {
            ssh_key_path: dir.join("apssh_key"),
            ..Default::default()
        };
        CredentialPaths::from(&config)
    }

    fn local(ts: DateTime<Utc>) -> String {
        ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
    }

    fn credential() -> SshCredential {
        SshCredential {
            private_key: Zeroizing::new("PRIVATE".to_string()),
            public_key: "ssh-ed25519 AAAA".to_string(),
            certificate: "ssh-ed25519-cert-v01@openssh.com AAAA".to_string(),
        }
    }

    #[test]
    fn test_paths_are_siblings() {
        let paths = paths(Path::new("/home/alice/.ssh"));
        assert_eq!(paths.private_key, PathBuf::from("/home/alice/.ssh/apssh_key"));
        assert_eq!(paths.public_key, PathBuf::from("/home/alice/.ssh/apssh_key.pub"));
        assert_eq!(
            paths.certificate,
            PathBuf::from("/home/alice/.ssh/apssh_key-cert.pub")
        );
    }

    #[test]
    fn test_remaining_validity_window() {
        let now = Utc::now();
        let window = format!(
            "from {} to {}",
            local(now - chrono::Duration::seconds(60)),
            local(now + chrono::Duration::seconds(900))
        );

        let remaining = remaining_validity(&window, now).unwrap().unwrap();
        assert!(remaining.as_secs() >= 890 && remaining.as_secs() <= 900);
    }

    #[test]
    fn test_remaining_validity_expired() {
        let now = Utc::now();
        let window = format!(
            "from {} to {}",
            local(now - chrono::Duration::seconds(3600)),
            local(now - chrono::Duration::seconds(60))
        );
        assert_eq!(remaining_validity(&window, now).unwrap(), None);
    }

    #[test]
    fn test_remaining_validity_utc_suffix() {
        let now = Utc::now();
        let end = (now + chrono::Duration::seconds(600)).format(TIMESTAMP_FORMAT);
        let window = format!("before {}Z", end);

        let remaining = remaining_validity(&window, now).unwrap().unwrap();
        assert!(remaining.as_secs() >= 590 && remaining.as_secs() <= 600);
    }

    #[test]
    fn test_remaining_validity_forever() {
        let now = Utc::now();
        assert_eq!(
            remaining_validity("forever", now).unwrap(),
            Some(FOREVER_LIFETIME)
        );
        let window = format!("from {} to forever", local(now));
        assert_eq!(
            remaining_validity(&window, now).unwrap(),
            Some(FOREVER_LIFETIME)
        );
        let window = format!("after {}", local(now));
        assert_eq!(
            remaining_validity(&window, now).unwrap(),
            Some(FOREVER_LIFETIME)
        );
    }

    #[test]
    fn test_remaining_validity_garbage() {
        let now = Utc::now();
        assert!(remaining_validity("", now).is_err());
        assert!(remaining_validity("from yesterday to tomorrow", now).is_err());
        assert!(remaining_validity("sometime soon", now).is_err());
    }

    #[test]
    fn test_unparsable_window_is_treated_as_expired() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some("not a window".to_string())),
            FakeAgent::default(),
        );
        assert_eq!(manager.credential_still_valid(), None);
    }

    #[test]
    fn test_load_credentials_without_certificate() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some("forever".to_string())),
            FakeAgent::default(),
        );

        assert!(!manager.load_credentials());
        assert!(manager.agent.calls.borrow().is_empty());
    }

    #[test]
    fn test_load_credentials_installs_valid_key() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some("forever".to_string())),
            FakeAgent {
                fail_remove: true,
                ..Default::default()
            },
        );
        manager.persist_credential(&credential()).unwrap();

        assert!(manager.load_credentials());
        assert_eq!(
            *manager.agent.calls.borrow(),
            vec!["remove".to_string(), format!("add {}", FOREVER_LIFETIME.as_secs())]
        );
    }

    #[test]
    fn test_load_credentials_expired_skips_agent() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let window = format!(
            "from {} to {}",
            local(now - chrono::Duration::seconds(7200)),
            local(now - chrono::Duration::seconds(3600))
        );
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some(window)),
            FakeAgent::default(),
        );
        manager.persist_credential(&credential()).unwrap();

        assert!(!manager.load_credentials());
        assert!(manager.agent.calls.borrow().is_empty());
    }

    #[test]
    fn test_agent_add_failure_is_the_outcome() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some("forever".to_string())),
            FakeAgent {
                fail_add: true,
                ..Default::default()
            },
        );
        assert!(!manager.install_in_agent(Duration::from_secs(60)));
    }

    #[test]
    fn test_persist_writes_owner_only_files() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(None),
            FakeAgent::default(),
        );
        manager.persist_credential(&credential()).unwrap();

        let paths = manager.paths();
        assert_eq!(fs::read_to_string(&paths.private_key).unwrap(), "PRIVATE");
        assert_eq!(
            fs::read_to_string(&paths.public_key).unwrap(),
            "ssh-ed25519 AAAA"
        );
        assert!(fs::read_to_string(&paths.certificate)
            .unwrap()
            .starts_with("ssh-ed25519-cert"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for path in [&paths.private_key, &paths.public_key, &paths.certificate] {
                let mode = fs::metadata(path).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o600);
            }
        }

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_commit_removes_whole_set() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some("forever".to_string())),
            FakeAgent::default(),
        );
        let paths = manager.paths().clone();
        fs::write(&paths.certificate, "OLD CERT").unwrap();
        fs::create_dir(&paths.public_key).unwrap();

        let result = manager.persist_credential(&credential());

        assert!(matches!(result, Err(CredentialError::Io { .. })));
        assert!(!paths.private_key.exists());
        assert!(!paths.certificate.exists());
        assert!(!manager.load_credentials());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_persist_refuses_empty_private_key() {
        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(None),
            FakeAgent::default(),
        );
        let mut credential = credential();
        credential.private_key = Zeroizing::new(String::new());

        assert!(matches!(
            manager.persist_credential(&credential),
            Err(CredentialError::MissingField("private_key"))
        ));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        assert!(!format!("{:?}", credential()).contains("PRIVATE"));
    }

    async fn ping(headers: HeaderMap) -> Response {
        match headers.get("cookie").and_then(|v| v.to_str().ok()) {
            Some("session=live") => Json(json!({ "PONG": true })).into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    async fn issue_full(headers: HeaderMap) -> Response {
        if headers.get("cookie").and_then(|v| v.to_str().ok()) != Some("session=live") {
            return StatusCode::FOUND.into_response();
        }
        Json(json!({
            "private_key": "NEW PRIVATE",
            "public_key": "NEW PUBLIC",
            "certificate": "NEW CERT",
        }))
        .into_response()
    }

    async fn issue_without_private_key() -> Response {
        Json(json!({
            "public_key": "NEW PUBLIC",
            "certificate": "NEW CERT",
        }))
        .into_response()
    }

    fn live_store(dir: &Path) -> TokenStore {
        let mut store = TokenStore::new(dir.join("session.json"));
        store.set_ap_session("live".to_string()).unwrap();
        store
    }

    fn authenticator(base: &str) -> Authenticator {
        let config = ClientConfig {
            proxy_url: base.to_string(),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        Authenticator::new(
            ProxyClient::new(&config).unwrap(),
            AuthSettings {
                poll_interval: Duration::from_millis(20),
                timeout: Duration::from_millis(300),
                token_length: 48,
                token_lifetime: Duration::from_secs(3600),
            },
            BrowserLauncher::new(Some("/nonexistent/apssh-test-browser".to_string())),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_request_new_credentials() {
        let router = Router::new()
            .route("/api/ping", get(ping))
            .route("/api/ssh", get(issue_full));
        let base = spawn_proxy(router).await;

        let dir = tempdir().unwrap();
        let mut store = live_store(dir.path());
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(Some("forever".to_string())),
            FakeAgent::default(),
        );
        let target: TargetSpec = "db.internal:22:alice".parse().unwrap();

        let ok = manager
            .request_new_credentials(&authenticator(&base), &mut store, &target, CredentialType::Ssh)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(
            fs::read_to_string(&manager.paths().private_key).unwrap(),
            "NEW PRIVATE"
        );
        assert!(manager.load_credentials());
    }

    #[tokio::test]
    async fn test_missing_private_key_writes_nothing() {
        let router = Router::new()
            .route("/api/ping", get(ping))
            .route("/api/ssh", get(issue_without_private_key));
        let base = spawn_proxy(router).await;

        let dir = tempdir().unwrap();
        let mut store = live_store(dir.path());
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(None),
            FakeAgent::default(),
        );
        manager.persist_credential(&credential()).unwrap();
        let target: TargetSpec = "db.internal:22:alice".parse().unwrap();

        let ok = manager
            .request_new_credentials(&authenticator(&base), &mut store, &target, CredentialType::Ssh)
            .await
            .unwrap();

        assert!(!ok);
        let paths = manager.paths();
        assert_eq!(fs::read_to_string(&paths.private_key).unwrap(), "PRIVATE");
        assert_eq!(
            fs::read_to_string(&paths.public_key).unwrap(),
            "ssh-ed25519 AAAA"
        );
        assert!(fs::read_to_string(&paths.certificate)
            .unwrap()
            .starts_with("ssh-ed25519-cert"));
    }

    #[tokio::test]
    async fn test_fetch_from_unauthenticated_session_fails() {
        let router = Router::new().route("/api/ssh", get(issue_full));
        let base = spawn_proxy(router).await;

        let dir = tempdir().unwrap();
        let manager = CredentialManager::new(
            paths(dir.path()),
            FakeInspector(None),
            FakeAgent::default(),
        );
        let auth = authenticator(&base);
        let session = AuthSession {
            cli_token: "TOKEN".to_string(),
            ap_session: "stale".to_string(),
        };

        let result = manager.fetch_credential(auth.proxy(), &session).await;
        assert!(matches!(result, Err(CredentialError::Proxy(_))));
    }
}
