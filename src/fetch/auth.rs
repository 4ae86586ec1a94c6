//! Download authentication: netrc credentials and bearer tokens

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable naming an explicit netrc file
pub const ENV_NETRC: &str = "NETRC";

#[cfg(windows)]
const NETRC_FILE_NAME: &str = "_netrc";
#[cfg(not(windows))]
const NETRC_FILE_NAME: &str = ".netrc";

/// Basic-auth credentials for one host
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub login: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-host credential lookup
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Credentials for `host`, if any
    fn basic_auth(&self, host: &str) -> Option<Credentials>;
}

/// How a fetcher authenticates its requests
#[derive(Clone, Debug, Default)]
pub enum AuthMode {
    /// No credentials
    #[default]
    None,
    /// Basic credentials attached on redirect, with cookies kept between requests
    Netrc(Arc<dyn CredentialStore>),
    /// Bearer token attached to the initial request; TLS only
    Bearer(String),
}

impl AuthMode {
    /// Resolve the configured auth mode, loading a netrc file if needed
    ///
    /// `lookup` reads environment variables (`NETRC`, `HOME`, `USERPROFILE`).
    ///
    /// # Errors
    /// Returns [`Error::Credentials`] when the netrc file cannot be found or parsed.
    pub fn from_config<F>(config: &AuthConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match config {
            AuthConfig::None => Ok(AuthMode::None),
            AuthConfig::Bearer { token } => Ok(AuthMode::Bearer(token.clone())),
            AuthConfig::Netrc { path } => {
                let path = match path {
                    Some(path) => path.clone(),
                    None => Netrc::locate(lookup).ok_or_else(|| Error::Credentials {
                        path: PathBuf::from(NETRC_FILE_NAME),
                        message: "cannot determine home directory".to_string(),
                    })?,
                };
                Ok(AuthMode::Netrc(Arc::new(Netrc::load(&path)?)))
            }
        }
    }
}

/// Parsed netrc file
///
/// Only `machine` entries are used. A `default` entry is accepted but never
/// consulted, so credentials are only sent to hosts the file names.
#[derive(Clone, Debug, Default)]
pub struct Netrc {
    machines: HashMap<String, Credentials>,
}

#[derive(Default)]
struct Entry {
    host: Option<String>,
    login: Option<String>,
    password: Option<String>,
}

impl Netrc {
    /// Default netrc location: `$NETRC`, else the user's home directory
    pub fn locate<F>(lookup: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_NETRC).filter(|s| !s.is_empty()) {
            return Some(PathBuf::from(path));
        }
        lookup("HOME")
            .or_else(|| lookup("USERPROFILE"))
            .filter(|s| !s.is_empty())
            .map(|home| Path::new(&home).join(NETRC_FILE_NAME))
    }

    /// Read and parse a netrc file
    ///
    /// # Errors
    /// Returns [`Error::Credentials`] if the file is missing, unreadable or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Credentials {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text).map_err(|message| Error::Credentials {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse netrc text
    ///
    /// Understands `machine`, `default`, `login`, `password` and `account`.
    /// Values may be double-quoted (with `\` escapes); `#` starts a comment
    /// anywhere a token could start; `macdef` bodies are skipped up to the
    /// next blank line. The first entry for a host wins.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let tokens = tokenize(text)?;

        let mut netrc = Netrc::default();
        let mut current: Option<Entry> = None;
        let mut iter = tokens.iter().map(String::as_str);
        while let Some(token) = iter.next() {
            match token {
                "machine" => {
                    netrc.finish(current.take());
                    let host = iter
                        .next()
                        .ok_or_else(|| "machine without a name".to_string())?;
                    current = Some(Entry {
                        host: Some(host.to_string()),
                        ..Default::default()
                    });
                }
                "default" => {
                    netrc.finish(current.take());
                    current = Some(Entry::default());
                }
                "login" | "password" | "account" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| format!("{} without a value", token))?;
                    if let Some(entry) = current.as_mut() {
                        match token {
                            "login" => entry.login = Some(value.to_string()),
                            "password" => entry.password = Some(value.to_string()),
                            _ => {}
                        }
                    }
                }
                "macdef" => {
                    netrc.finish(current.take());
                    iter.next();
                }
                other => return Err(format!("unexpected token {:?}", other)),
            }
        }
        netrc.finish(current);
        Ok(netrc)
    }

    fn finish(&mut self, entry: Option<Entry>) {
        let Some(Entry {
            host: Some(host),
            login: Some(login),
            password: Some(password),
        }) = entry
        else {
            return;
        };
        self.machines
            .entry(host)
            .or_insert(Credentials { login, password });
    }

    /// Credentials of the `machine` entry for `host`
    pub fn machine(&self, host: &str) -> Option<&Credentials> {
        self.machines.get(host)
    }

    /// Number of usable host entries
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Whether the file had no usable host entries
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl CredentialStore for Netrc {
    fn basic_auth(&self, host: &str) -> Option<Credentials> {
        self.machine(host).cloned()
    }
}

/// Split netrc text into tokens, dropping comments and macro bodies
fn tokenize(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut in_macdef = false;
    let mut macro_name_next = false;

    for (lineno, line) in text.lines().enumerate() {
        if in_macdef {
            in_macdef = !line.trim().is_empty();
            continue;
        }
        let mut chars = line.chars().peekable();
        loop {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            let Some(&first) = chars.peek() else { break };
            if first == '#' {
                break;
            }

            let mut token = String::new();
            if first == '"' {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => token.extend(chars.next()),
                        c => token.push(c),
                    }
                }
                if !closed {
                    return Err(format!("unterminated quote on line {}", lineno + 1));
                }
            } else {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    token.push(c);
                }
            }

            let is_macdef = token == "macdef";
            tokens.push(token);
            if macro_name_next {
                macro_name_next = false;
                in_macdef = true;
                break;
            }
            macro_name_next = is_macdef;
        }
    }
    Ok(tokens)
}
