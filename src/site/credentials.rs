//! Best-effort discovery of a site's database credentials.
//!
//! Sites don't declare their database anywhere in the backup configuration.
//! Instead the application's own configuration file is inspected. Every
//! supported format is parsed by a pure function into a [CredentialsPatch];
//! the patches are applied in a fixed order onto the defaults, so a later
//! format only overwrites the fields it actually defines.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "3306";

/// Connection parameters handed to the dump tool.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub host: String,
    /// Numeric port, kept as text as it is passed verbatim to the dump tool.
    pub port: String,
    pub database: String,
    pub user: String,
    /// May be empty for local or anonymous authentication.
    pub password: String,
}

impl Default for DatabaseCredentials {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

// Keep the password out of debug logs.
impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl DatabaseCredentials {
    /// A dump needs at least a database name and a user.
    pub fn is_usable(&self) -> bool {
        !self.database.is_empty() && !self.user.is_empty()
    }

    /// Overwrite every field the patch defines.
    pub fn apply(&mut self, patch: CredentialsPatch) {
        let CredentialsPatch {
            host,
            port,
            database,
            user,
            password,
        } = patch;

        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(database) = database {
            self.database = database;
        }
        if let Some(user) = user {
            self.user = user;
        }
        if let Some(password) = password {
            self.password = password;
        }
    }
}

/// Fields found in a single configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CredentialsPatch {
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl CredentialsPatch {
    /// Set host and port from a server string that may carry a port.
    fn set_server(&mut self, server: &str) {
        let (host, port) = split_host_port(server);
        if let Some(host) = host {
            self.host = Some(host.to_string());
        }
        if let Some(port) = port {
            self.port = Some(port.to_string());
        }
    }
}

/// Split `host:port` into its parts.
///
/// Only a string with exactly one `:` and no `/` is split, which leaves IPv6
/// addresses and unix socket paths untouched. An empty host part or a
/// non-numeric port part is dropped.
pub fn split_host_port(server: &str) -> (Option<&str>, Option<&str>) {
    if server.matches(':').count() != 1 || server.contains('/') {
        return (Some(server), None);
    }

    let Some((host, port)) = server.rsplit_once(':') else {
        return (Some(server), None);
    };
    let host = Some(host).filter(|h| !h.is_empty());
    let port = Some(port).filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));

    (host, port)
}

struct Source {
    /// Location relative to the site root.
    path: &'static str,
    parse: fn(&str) -> CredentialsPatch,
}

/// Lookup order. Later sources win for the fields they define.
const SOURCES: [Source; 4] = [
    Source {
        path: ".env",
        parse: parse_env,
    },
    Source {
        path: "public/wp-config.php",
        parse: parse_wordpress,
    },
    Source {
        path: "public/LocalSettings.php",
        parse: parse_mediawiki,
    },
    Source {
        path: "public/conf_global.php",
        parse: parse_invision,
    },
];

/// Extract the database credentials of the site rooted at `site_root`.
///
/// Never fails: unreadable files are logged and skipped, and fields no file
/// defines keep their defaults. Check [DatabaseCredentials::is_usable] on the
/// result.
pub fn extract(site_root: &Path) -> DatabaseCredentials {
    let mut credentials = DatabaseCredentials::default();

    for source in &SOURCES {
        let path = site_root.join(source.path);
        if !path.exists() {
            continue;
        }

        log::info!(target: "site::credentials", "Found {}, extracting database config", source.path);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let patch = (source.parse)(&content);
                log::trace!(target: "site::credentials", "{}: {patch:?}", source.path);
                credentials.apply(patch);
            }
            Err(e) => {
                log::warn!(target: "site::credentials", "Error reading {}: {e}", path.display());
            }
        }
    }

    credentials
}

/// Laravel style `.env`: `KEY=VALUE` per line, values optionally quoted.
pub fn parse_env(content: &str) -> CredentialsPatch {
    let mut patch = CredentialsPatch::default();

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();

        match key.trim() {
            "DB_HOST" => patch.host = Some(value),
            "DB_DATABASE" => patch.database = Some(value),
            "DB_USERNAME" => patch.user = Some(value),
            "DB_PASSWORD" => patch.password = Some(value),
            "DB_PORT" => patch.port = Some(value),
            _ => {}
        }
    }

    patch
}

/// Regexes for the fields of a PHP configuration format. Alternatives of a
/// field are tried in order; the first capture group holds the value.
struct PhpPatterns {
    host: Vec<Regex>,
    port: Vec<Regex>,
    database: Vec<Regex>,
    user: Vec<Regex>,
    password: Vec<Regex>,
    /// Whether the host value may carry a `:port` suffix.
    split_host: bool,
}

impl PhpPatterns {
    fn parse(&self, content: &str) -> CredentialsPatch {
        let mut patch = CredentialsPatch::default();

        if let Some(host) = first_capture(&self.host, content) {
            if self.split_host {
                patch.set_server(host.trim());
            } else {
                patch.host = Some(host.to_string());
            }
        }
        patch.database = first_capture(&self.database, content).map(str::to_string);
        patch.user = first_capture(&self.user, content).map(str::to_string);
        patch.password = first_capture(&self.password, content).map(str::to_string);

        // an explicit port beats one embedded in the host
        if let Some(port) = first_capture(&self.port, content) {
            patch.port = Some(port.to_string());
        }

        patch
    }
}

fn first_capture<'t>(patterns: &[Regex], content: &'t str) -> Option<&'t str> {
    patterns
        .iter()
        .find_map(|re| re.captures(content))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("credential pattern should be valid")
}

fn wp_define(key: &str) -> Vec<Regex> {
    vec![regex(&format!(
        r#"define\s*\(\s*['"]{key}['"],\s*['"]([^'"]+)['"]"#
    ))]
}

static WORDPRESS: LazyLock<PhpPatterns> = LazyLock::new(|| PhpPatterns {
    host: wp_define("DB_HOST"),
    port: Vec::new(),
    database: wp_define("DB_NAME"),
    user: wp_define("DB_USER"),
    password: wp_define("DB_PASSWORD"),
    split_host: false,
});

/// WordPress `wp-config.php`: `define('DB_NAME', 'value');`
pub fn parse_wordpress(content: &str) -> CredentialsPatch {
    WORDPRESS.parse(content)
}

fn mw_variable(name: &str, value: &str) -> Vec<Regex> {
    vec![regex(&format!(
        r#"\${name}\s*=\s*['"]({value})['"]"#
    ))]
}

static MEDIAWIKI: LazyLock<PhpPatterns> = LazyLock::new(|| PhpPatterns {
    host: mw_variable("wgDBserver", r#"[^'"]+"#),
    port: Vec::new(),
    database: mw_variable("wgDBname", r#"[^'"]+"#),
    user: mw_variable("wgDBuser", r#"[^'"]+"#),
    password: mw_variable("wgDBpassword", r#"[^'"]*"#),
    split_host: true,
});

/// MediaWiki `LocalSettings.php`: `$wgDBname = "value";`
pub fn parse_mediawiki(content: &str) -> CredentialsPatch {
    MEDIAWIKI.parse(content)
}

/// Both `$INFO['key'] = 'value'` and `'key' => 'value'`, assignment first.
fn ipb_entry(key: &str, value: &str) -> Vec<Regex> {
    vec![
        regex(&format!(
            r#"\$INFO\s*\[\s*['"]{key}['"]\s*\]\s*=\s*['"]({value})['"]"#
        )),
        regex(&format!(r#"['"]{key}['"]\s*=>\s*['"]({value})['"]"#)),
    ]
}

static INVISION: LazyLock<PhpPatterns> = LazyLock::new(|| PhpPatterns {
    host: ipb_entry("sql_host", r#"[^'"]+"#),
    port: ipb_entry("sql_port", r"\d+"),
    database: ipb_entry("sql_database", r#"[^'"]+"#),
    user: ipb_entry("sql_user", r#"[^'"]+"#),
    password: ipb_entry("sql_pass", r#"[^'"]*"#),
    split_host: true,
});

/// Invision Power Board `conf_global.php`.
pub fn parse_invision(content: &str) -> CredentialsPatch {
    INVISION.parse(content)
}
