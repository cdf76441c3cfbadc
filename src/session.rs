use url::Url;

pub const MSG_MISSING_URL: &str = "请输入基础URL";
pub const MSG_BAD_URL: &str = "URL格式不正确，请输入有效的URL";
pub const MSG_BAD_SCHEME: &str = "URL必须以http://或https://开头";
pub const MSG_MISSING_COOKIE: &str = "请输入Cookie";

/// Dashboard address and credential for one import session. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    base_url: String,
    credential: String,
    validated: bool,
}

impl SessionContext {
    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential: credential.into(),
            validated: false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        if base_url != self.base_url {
            self.base_url = base_url;
            self.validated = false;
        }
    }

    pub fn set_credential(&mut self, credential: impl Into<String>) {
        let credential = credential.into();
        if credential != self.credential {
            self.credential = credential;
            self.validated = false;
        }
    }

    pub(crate) fn mark_validated(&mut self, valid: bool) {
        self.validated = valid;
    }
}

/// Input-completion path: trims and defaults the scheme to `https://`.
pub fn complete_base_url(raw: &str) -> String {
    let url = raw.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Strict check applied before a run. Does not complete a missing scheme.
pub fn check_base_url(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() {
        return Err(MSG_MISSING_URL);
    }
    let url = Url::parse(raw).map_err(|_| MSG_BAD_URL)?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(MSG_BAD_SCHEME),
    }
}
