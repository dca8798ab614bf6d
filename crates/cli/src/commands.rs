//! CLI commands

use anyhow::{Context, Result};
use clap::Subcommand;
use std::sync::Arc;
use storefront_core::{SessionConfig, validators};
use storefront_http::{ApiClient, ApiRequest, AuthApi, AuthenticatedClient, HttpTokenRenewer};
use storefront_session::{FileCredentialStore, SessionManager, SessionObserver, SessionView};
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long, env = "STOREFRONT_EMAIL")]
        email: String,

        #[arg(long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show the stored session
    Status,

    /// Print a valid access token, renewing it if needed
    Token,

    /// Authenticated GET against the API
    Get {
        /// Path relative to the API base URL, e.g. /orders
        path: String,

        /// Query parameter as key=value; may be repeated
        #[arg(short, long = "query", value_parser = parse_query)]
        query: Vec<(String, String)>,
    },

    /// Keep the session warm and report changes until interrupted
    Watch,

    /// Sign out and forget the stored session
    Logout,

    /// Print the effective configuration
    Config,
}

impl Commands {
    /// Commands that run until interrupted
    pub fn is_long_running(&self) -> bool {
        matches!(self, Self::Watch)
    }

    pub async fn execute(self, config: SessionConfig) -> Result<()> {
        let session = Session::open(&config)?;
        match self {
            Self::Login { email, password } => {
                validators::validate_email(&email, "email")?;
                validators::validate_not_empty(&password, "password")?;
                session.login(&email, &password).await
            }
            Self::Status => {
                session.status();
                Ok(())
            }
            Self::Token => {
                let token = session.manager.valid_access_token().await?;
                println!("{token}");
                Ok(())
            }
            Self::Get { path, query } => session.get(&path, query).await,
            Self::Watch => session.watch(config.probe_interval()).await,
            Self::Logout => {
                session.auth.logout();
                println!("Logged out");
                Ok(())
            }
            Self::Config => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }
}

/// Everything one command needs, wired against the on-disk store
struct Session {
    manager: SessionManager,
    client: AuthenticatedClient,
    auth: AuthApi,
    credentials: std::path::PathBuf,
}

impl Session {
    fn open(config: &SessionConfig) -> Result<Self> {
        let api = ApiClient::from_config(config).context("building HTTP client")?;
        let credentials = config.credentials_path();
        let store = Arc::new(FileCredentialStore::new(&credentials));
        let renewer = Arc::new(HttpTokenRenewer::from_config(&api, config));
        let manager = SessionManager::builder(store, renewer)
            .config(config)
            .build();

        Ok(Self {
            auth: AuthApi::from_config(&api, config, manager.clone()),
            client: AuthenticatedClient::new(api, manager.clone()),
            manager,
            credentials,
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<()> {
        let identity = self.auth.login(email, password).await?;
        match identity {
            Some(identity) => println!(
                "Logged in as {} ({})",
                identity.name.as_deref().unwrap_or(&identity.subject_id),
                identity.role
            ),
            None => println!("Logged in"),
        }
        Ok(())
    }

    fn status(&self) {
        println!("state:       {}", self.manager.state());
        println!("credentials: {}", self.credentials.display());
        if let Some(identity) = self.manager.identity() {
            println!("subject:     {}", identity.subject_id);
            println!("role:        {}", identity.role);
            if let Some(email) = &identity.email {
                println!("email:       {email}");
            }
        }
        if let Some(expiry) = self.manager.access_token_expiry() {
            println!("expires:     {}", expiry.to_rfc3339());
        }
    }

    async fn get(&self, path: &str, query: Vec<(String, String)>) -> Result<()> {
        let request = query
            .into_iter()
            .fold(ApiRequest::get(path), |request, (key, value)| {
                request.query(key, value)
            });

        let response = self.client.execute(&request).await?;
        let status = response.status();
        let body = response.text().await?;
        info!(status = status.as_u16(), path, "Request completed");

        let rendered = serde_json::from_str::<serde_json::Value>(&body)
            .and_then(|value| serde_json::to_string_pretty(&value))
            .unwrap_or(body);
        println!("{rendered}");

        if !status.is_success() {
            anyhow::bail!("server answered {status}");
        }
        Ok(())
    }

    async fn watch(&self, probe_interval: std::time::Duration) -> Result<()> {
        let observer = SessionObserver::spawn(self.manager.clone(), probe_interval);
        let mut views = observer.subscribe();
        print_view(&views.borrow_and_update());

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
                changed = views.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = views.borrow_and_update().clone();
                    print_view(&view);
                    if view.auth_expired {
                        break;
                    }
                }
            }
        }

        observer.shutdown().await;
        Ok(())
    }
}

fn print_view(view: &SessionView) {
    let who = view
        .identity
        .as_ref()
        .map_or("-", |identity| identity.subject_id.as_str());
    match &view.error {
        Some(error) => println!("{} [{who}] {error}", view.state),
        None => println!("{} [{who}]", view.state),
    }
}

fn parse_query(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}
