//! Command-line front end for the session manager: one command per run,
//! credentials persisted between runs in the file store.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::client::{HttpBackend, IdentityToolkitProvider};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::identity::{
    FederatedPrompt, IdpCredential, ProviderError, ProviderErrorCode, ProviderResult, SessionManager, SessionState,
};
use crate::storage::{CredentialStore, FileCredentialStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String },
    Register { email: String, display_name: String },
    Federated,
    Logout,
    Whoami,
    Status,
    Reissue,
    ChangePassword,
    Help,
}

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &[
    "--api-url",
    "--auth-provider",
    "--idp-url",
    "--idp-token-url",
    "--idp-api-key",
    "--store",
    "--password-min-length",
    "--timeout-secs",
];

pub const USAGE: &str = "podium-auth\n\nUSAGE:\n  podium-auth [OPTIONS] <COMMAND>\n\nCOMMANDS:\n  login <email>                 sign in with password\n  register <email> <name...>    create an account and sign in\n  federated                     sign in with a federated provider (paste IdP id_token)\n  logout                        end the session\n  whoami                        refresh and print the signed-in user\n  status                        print the session state without refreshing\n  reissue                       ask the backend for a new session credential\n  change-password               re-enter the current password and set a new one\n\nOPTIONS:\n  --api-url URL                 backend API base (env: PODIUM_API_URL)\n  --auth-provider PATH          exchange route under /auth (env: PODIUM_AUTH_PROVIDER_PATH)\n  --idp-url URL                 identity provider base (env: PODIUM_IDP_URL)\n  --idp-token-url URL           secure token endpoint base (env: PODIUM_IDP_TOKEN_URL)\n  --idp-api-key KEY             identity provider API key (env: PODIUM_IDP_API_KEY)\n  --store PATH                  credential file (env: PODIUM_STORE_PATH)\n  --[no-]exchange-on-bootstrap  exchange a provider identity at startup (env: PODIUM_EXCHANGE_ON_BOOTSTRAP)\n  --password-min-length N       minimum new password length (env: PODIUM_PASSWORD_MIN_LENGTH)\n  --timeout-secs N              HTTP timeout (env: PODIUM_HTTP_TIMEOUT_SECS)\n  -h, --help                    show this help\n";

/// Positional words after stripping option flags (and their values).
fn positionals(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if VALUE_FLAGS.contains(&a.as_str()) {
            i += 2;
            continue;
        }
        if !a.starts_with('-') {
            out.push(a.clone());
        }
        i += 1;
    }
    out
}

/// Parse the command from process args (program name excluded).
pub fn parse_command(args: &[String]) -> Result<Command> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Ok(Command::Help);
    }
    let words = positionals(args);
    let Some((verb, rest)) = words.split_first() else { return Ok(Command::Help) };
    match verb.as_str() {
        "login" => {
            let email = rest.first().ok_or_else(|| anyhow!("login requires an email"))?;
            Ok(Command::Login { email: email.clone() })
        }
        "register" => {
            if rest.len() < 2 {
                return Err(anyhow!("register requires an email and a display name"));
            }
            Ok(Command::Register { email: rest[0].clone(), display_name: rest[1..].join(" ") })
        }
        "federated" | "google" => Ok(Command::Federated),
        "logout" => Ok(Command::Logout),
        "whoami" | "me" => Ok(Command::Whoami),
        "status" => Ok(Command::Status),
        "reissue" | "refresh" => Ok(Command::Reissue),
        "change-password" => Ok(Command::ChangePassword),
        "help" => Ok(Command::Help),
        other => Err(anyhow!("unknown command '{}'", other)),
    }
}

pub fn render_state(state: &SessionState) -> String {
    match state {
        SessionState::Authenticated(id) => {
            let mut s = format!(
                "signed in as {} <{}>",
                id.display_name.as_deref().unwrap_or("(no name)"),
                id.email.as_deref().unwrap_or("no email")
            );
            if let Some(plan) = id.plan() {
                s.push_str(&format!(", plan: {}", plan));
            }
            if id.is_institution_user {
                s.push_str(", institution user");
            }
            if !id.has_password_provider {
                s.push_str(", federated sign-in only");
            }
            s
        }
        other => format!("not signed in ({})", other.label()),
    }
}

/// User-facing line for a failed command; quiet kinds produce none.
pub fn render_error(err: &SessionError) -> Option<String> {
    if err.is_user_visible() { Some(format!("error: {}", err.message())) } else { None }
}

async fn read_line(prompt: &str) -> Result<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut rl = rustyline::DefaultEditor::new()?;
        Ok(rl.readline(&prompt)?.trim().to_string())
    })
    .await?
}

/// Federated "popup" for a terminal: the user pastes an IdP id_token; an
/// empty line (or Ctrl-C) cancels.
pub struct TerminalPrompt {
    pub provider_id: String,
}

#[async_trait]
impl FederatedPrompt for TerminalPrompt {
    async fn obtain_credential(&self) -> ProviderResult<Option<IdpCredential>> {
        let line = match read_line(&format!("{} id_token (empty to cancel): ", self.provider_id)).await {
            Ok(l) => l,
            Err(e) => {
                debug!(target: "podium_auth", "federated prompt closed: {}", e);
                return Ok(None);
            }
        };
        if line.is_empty() {
            return Ok(None);
        }
        if line.split('.').count() != 3 {
            return Err(ProviderError::new(ProviderErrorCode::InvalidCredential, "That does not look like an id_token"));
        }
        Ok(Some(IdpCredential { provider_id: self.provider_id.clone(), id_token: line }))
    }
}

/// Wire the real adapters together and start listening for provider events.
pub fn build_manager(cfg: &SessionConfig) -> Result<Arc<SessionManager>> {
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::open(&cfg.store_path)?);
    let provider = IdentityToolkitProvider::from_config(cfg)?
        .with_store(Arc::clone(&store))
        .with_prompt(Arc::new(TerminalPrompt { provider_id: "google.com".into() }));
    let backend = HttpBackend::from_config(cfg)?;
    Ok(Arc::new(SessionManager::with_options(
        Arc::new(provider),
        Arc::new(backend),
        store,
        cfg.session_options(),
    )))
}

pub async fn run(cfg: SessionConfig, cmd: Command) -> Result<()> {
    if cmd == Command::Help {
        print!("{}", USAGE);
        return Ok(());
    }
    let manager = build_manager(&cfg)?;
    let listener = manager.start();
    let initial = manager.wait_until_resolved().await;
    debug!(target: "podium_auth", "initial session state: {}", initial.label());

    let outcome: Result<(), SessionError> = match cmd {
        Command::Login { email } => {
            let password = read_line("password: ").await?;
            manager.login_with_password(&email, &password).await.map(|_| ())
        }
        Command::Register { email, display_name } => {
            let password = read_line("choose a password: ").await?;
            manager.register_with_password(&email, &password, &display_name).await.map(|_| ())
        }
        Command::Federated => manager.login_with_federated_provider().await.map(|_| ()),
        Command::Logout => {
            if let Some(remote) = manager.logout() {
                // local state is already final; just let the remote half finish before exit
                let _ = remote.await;
            }
            Ok(())
        }
        Command::Whoami => match manager.refresh_resolved_identity().await {
            Ok(Some(_)) => Ok(()),
            Ok(None) if manager.credential().is_some() => {
                println!("the backend no longer accepts this session; run `podium-auth login`");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        },
        Command::Status => Ok(()),
        Command::Reissue => manager.reissue_credential().await.map(|c| println!("credential reissued ({})", c.redacted())),
        Command::ChangePassword => {
            let current = read_line("current password: ").await?;
            let next = read_line("new password: ").await?;
            let confirm = read_line("confirm new password: ").await?;
            if next != confirm {
                Err(SessionError::InvalidInput("Passwords do not match".into()))
            } else {
                manager.change_password(&current, &next).await.map(|_| println!("password changed"))
            }
        }
        Command::Help => Ok(()),
    };

    println!("{}", render_state(&manager.state()));
    listener.abort();
    match outcome {
        Ok(()) => Ok(()),
        Err(e) => match render_error(&e) {
            Some(line) => Err(anyhow!(line)),
            None => Ok(()),
        },
    }
}
