use serde::{Deserialize, Serialize};

/// How a profile authenticates. Closed set; resolved from whichever
/// credential fields the record carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Token(String),
    UserPassword { user: String, password: String },
    CredentialsFile(String),
    KeyPair(String),
    ClientCertificate {
        cert: String,
        key: String,
        ca: Option<String>,
    },
    None,
}

impl AuthMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::Token(_) => "token",
            AuthMethod::UserPassword { .. } => "user/password",
            AuthMethod::CredentialsFile(_) => "credentials file",
            AuthMethod::KeyPair(_) => "nkey",
            AuthMethod::ClientCertificate { .. } => "client certificate",
            AuthMethod::None => "none",
        }
    }
}

/// One named connection profile, stored as `<name>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Taken from the file name, never serialized.
    #[serde(skip)]
    pub name: String,
    pub description: String,
    pub url: String,
    pub token: String,
    pub user: String,
    pub password: String,
    pub creds: String,
    pub nkey: String,
    pub cert: String,
    pub key: String,
    pub ca: String,
    pub inbox_prefix: String,
}

impl Profile {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            ..Self::default()
        }
    }

    /// Precedence: token, user/password, creds file, nkey, client cert.
    pub fn auth(&self) -> AuthMethod {
        if !self.token.is_empty() {
            AuthMethod::Token(self.token.clone())
        } else if !self.user.is_empty() {
            AuthMethod::UserPassword {
                user: self.user.clone(),
                password: self.password.clone(),
            }
        } else if !self.creds.is_empty() {
            AuthMethod::CredentialsFile(self.creds.clone())
        } else if !self.nkey.is_empty() {
            AuthMethod::KeyPair(self.nkey.clone())
        } else if !self.cert.is_empty() && !self.key.is_empty() {
            AuthMethod::ClientCertificate {
                cert: self.cert.clone(),
                key: self.key.clone(),
                ca: (!self.ca.is_empty()).then(|| self.ca.clone()),
            }
        } else {
            AuthMethod::None
        }
    }
}
