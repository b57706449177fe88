use futures_util::FutureExt;
use futures_util::future::BoxFuture;

/// Supplies the bearer credential for each request.
///
/// Called once per request and never cached by the transport, so a provider
/// that refreshes tokens is always asked for the current one. `None` means no
/// credential is available and fails the request as an authentication error.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> BoxFuture<'_, Option<String>>;
}

/// A fixed token, for callers whose credential does not rotate.
#[derive(Clone)]
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticCredential(..)")
    }
}

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> BoxFuture<'_, Option<String>> {
        let token = (!self.0.is_empty()).then(|| self.0.clone());
        async move { token }.boxed()
    }
}

/// Adapts a closure into a provider.
pub struct FnCredential<F>(pub F);

impl<F> CredentialProvider for FnCredential<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn credential(&self) -> BoxFuture<'_, Option<String>> {
        let token = (self.0)();
        async move { token }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn static_credential_returns_token() {
        let cred = StaticCredential::new("abc");
        assert_eq!(cred.credential().await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn empty_static_credential_is_missing() {
        assert_eq!(StaticCredential::new("").credential().await, None);
    }

    #[tokio::test]
    async fn fn_credential_is_asked_every_time() {
        let calls = AtomicU32::new(0);
        let cred = FnCredential(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Some(format!("token-{n}"))
        });
        assert_eq!(cred.credential().await.as_deref(), Some("token-0"));
        assert_eq!(cred.credential().await.as_deref(), Some("token-1"));
    }
}
