//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use adminlink_core::api::{Method, Params, RequestDescriptor};
use adminlink_core::store::{FileBackend, KeyringBackend};
use adminlink_core::{
    AuthTokens, CacheStore, CachedResource, Config, HttpClient, KvStore, RequestOptions,
    SessionSnapshot, TokenManager, Ttl,
};

/// Everything a command needs, built once from the config.
pub struct Context {
    pub tokens: TokenManager,
    pub cache: CacheStore,
    pub client: HttpClient,
}

impl Context {
    pub fn new(config: Config) -> Result<Self> {
        let storage_dir = config.storage_dir().context("No storage directory")?;
        debug!(dir = %storage_dir.display(), "Using storage directory");
        let files = KvStore::new(FileBackend::new(storage_dir));

        let token_store = if config.use_keyring {
            KvStore::new(KeyringBackend::new(config.keyring_service()))
        } else {
            files.clone()
        };

        let tokens = TokenManager::new(token_store, &config.namespace);
        let cache = CacheStore::new(files, &config.namespace)
            .with_default_ttl(Ttl::After(config.default_cache_ttl()));
        let client =
            HttpClient::new(&config, tokens.clone()).context("Failed to build HTTP client")?;

        Ok(Self {
            tokens,
            cache,
            client,
        })
    }
}

pub struct LoginArgs {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub user_id: Option<String>,
    pub roles: Vec<String>,
    pub user_type: Option<String>,
}

pub fn login(ctx: &Context, args: LoginArgs) -> Result<()> {
    let expires_at = args
        .expires_at
        .as_deref()
        .map(parse_expiry)
        .transpose()?;

    ctx.tokens.set_auth_tokens(&AuthTokens {
        access_token: Some(args.access_token),
        refresh_token: args.refresh_token,
        expires_at,
    });
    ctx.tokens.save_session(&SessionSnapshot {
        user_id: args.user_id,
        roles: args.roles,
        role: None,
        user_type: args.user_type,
    });

    println!("Logged in.");
    Ok(())
}

pub fn logout(ctx: &Context) -> Result<()> {
    ctx.tokens.clear_auth_tokens();
    ctx.tokens.clear_session();
    println!("Logged out.");
    Ok(())
}

pub fn whoami(ctx: &Context) -> Result<()> {
    let tokens = ctx.tokens.get_auth_tokens();
    let now = Utc::now();

    if tokens.access_token.is_none() {
        println!("Not logged in.");
    } else {
        match (tokens.expires_at, tokens.minutes_until_expiry(now)) {
            (Some(at), _) if tokens.is_expired(now) => println!("Access token expired at {}", at),
            (Some(at), Some(minutes)) => {
                println!("Access token valid until {} ({} min left)", at, minutes)
            }
            _ => println!("Access token present, no expiry"),
        }
        if tokens.needs_refresh(now) && !tokens.is_expired(now) {
            println!("Access token should be refreshed soon");
        }
        if tokens.refresh_token.is_some() {
            println!("Refresh token present");
        }
    }

    let headers = ctx.tokens.identity_headers();
    if headers.is_empty() {
        println!("No identity headers.");
        return Ok(());
    }
    println!("Identity headers:");
    for (name, value) in headers.iter() {
        let shown = if name == "authorization" {
            "Bearer ***".to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };
        println!("  {}: {}", name, shown);
    }
    Ok(())
}

pub async fn get(
    ctx: &Context,
    path: &str,
    query: &[String],
    ttl_ms: Option<u64>,
    no_cache: bool,
) -> Result<()> {
    let params = parse_query(query)?;
    let key = cache_key(path, &params);
    let ttl = ttl_ms.map(Ttl::millis).unwrap_or_else(|| ctx.cache.default_ttl());

    let client = Arc::new(ctx.client.clone());
    let path = path.to_string();
    let mut resource = CachedResource::new(key.clone(), ctx.cache.clone(), ttl, move |token| {
        let client = Arc::clone(&client);
        let path = path.clone();
        let params = params.clone();
        async move {
            let options = RequestOptions::new().params(params).cancel(token);
            let body = client.get(&path, options).await?;
            Ok::<Value, anyhow::Error>(body.into_json())
        }
    });

    load(&mut resource, no_cache);
    let state = resource.wait_idle().await;

    if let Some(ref error) = state.error {
        if let Some(api) = state.api_error() {
            eprintln!("{} {}", api.status, api.body_preview());
        }
        return Err(anyhow!("GET {} failed: {}", key, error));
    }

    let source = if state.from_cache { "cache" } else { "live" };
    match state.last_updated {
        Some(at) => eprintln!("[{}] {} (updated {})", source, key, at.to_rfc3339()),
        None => eprintln!("[{}] {}", source, key),
    }
    print_json(&state.data.unwrap_or(Value::Null))
}

pub async fn request(
    ctx: &Context,
    method: &str,
    path: &str,
    body: Option<&str>,
    query: &[String],
) -> Result<()> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut options = RequestOptions::new().params(parse_query(query)?);
    if let Some(raw) = body {
        let value: Value = serde_json::from_str(raw).context("Request body is not valid JSON")?;
        options = options.body(value);
    }

    let response = ctx
        .client
        .request(RequestDescriptor::new(method.clone(), path, options))
        .await
        .with_context(|| format!("{} {} failed", method, path))?;

    print_json(&response.into_json())
}

pub fn cache_show(ctx: &Context, key: &str) -> Result<()> {
    match ctx.cache.read_cache(key) {
        Some(hit) => {
            eprintln!("stored {}", hit.age_display(ctx.cache.now()));
            print_json(&hit.data)
        }
        None => {
            println!("No live cache entry for {}", key);
            Ok(())
        }
    }
}

pub fn cache_remove(ctx: &Context, key: &str) -> Result<()> {
    ctx.cache.remove_cache(key);
    println!("Removed {}", key);
    Ok(())
}

/// Start loading `resource`. With `bypass_cache`, a cached copy is shown
/// first and then refreshed live, so a failed refresh still leaves it in place.
fn load(resource: &mut CachedResource<Value>, bypass_cache: bool) {
    resource.sync(&[], true);
    if bypass_cache && resource.state().from_cache {
        resource.refresh();
    }
}

/// Parse repeated `name=value` arguments, keeping their order.
fn parse_query(pairs: &[String]) -> Result<Params> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => Err(anyhow!("Query parameter must look like name=value: {}", pair)),
        })
        .collect()
}

/// Cache key for a GET: the path plus the parameters that reach the URL.
fn cache_key(path: &str, params: &Params) -> String {
    let retained = params.retained();
    if retained.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = retained
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("{}?{}", path, query.join("&"))
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Expiry must be RFC 3339, got {}", raw))
}

fn print_json(value: &Value) -> Result<()> {
    match value {
        Value::String(text) => println!("{}", text),
        Value::Null => {}
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}
