use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    /// Usernames granted admin rights, comma separated in the environment.
    pub admin_users: Vec<String>,
    /// Usernames pre-approved as developers on startup.
    pub approved_developers: Vec<String>,
    /// External auth service endpoint for token resolution.
    /// When unset, only `dev_tokens` entries authenticate.
    pub auth_url: Option<String>,
    /// Static `token:username` pairs for development and tests.
    pub dev_tokens: Vec<(String, String)>,
    /// Scratch space for build checkouts.
    pub temp_dir: PathBuf,
    /// Registry prefix for built module images.
    pub docker_registry: String,
}

fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_token_pairs(s: &str) -> Vec<(String, String)> {
    parse_csv(s)
        .into_iter()
        .filter_map(|pair| {
            let (token, user) = pair.split_once(':')?;
            if token.is_empty() || user.is_empty() {
                return None;
            }
            Some((token.to_owned(), user.to_owned()))
        })
        .collect()
}

impl Config {
    pub fn load() -> Self {
        Self {
            listen: env::var("CATALOG_LISTEN").unwrap_or_else(|_| "0.0.0.0:5000".into()),
            admin_users: env::var("CATALOG_ADMIN_USERS")
                .ok()
                .map_or_else(Vec::new, |v| parse_csv(&v)),
            approved_developers: env::var("CATALOG_APPROVED_DEVELOPERS")
                .ok()
                .map_or_else(Vec::new, |v| parse_csv(&v)),
            auth_url: env::var("CATALOG_AUTH_URL").ok(),
            dev_tokens: env::var("CATALOG_DEV_TOKENS")
                .ok()
                .map_or_else(Vec::new, |v| parse_token_pairs(&v)),
            temp_dir: env::var("CATALOG_TEMP_DIR")
                .map_or_else(|_| env::temp_dir().join("catalog-builds"), PathBuf::from),
            docker_registry: env::var("CATALOG_DOCKER_REGISTRY")
                .unwrap_or_else(|_| "localhost:5000".into()),
        }
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_users.iter().any(|u| u == username)
    }
}
