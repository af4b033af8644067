//! Terminal front-end: a stdin/stdout REPL that drives the orchestrator.
//!
//! Provider flows cannot open a browser popup from a terminal, so the
//! terminal clients print the authorization URL and read the pasted result
//! from the same line reader the REPL uses.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::{GoogleConfig, OutlookConfig};
use crate::connection::EventStream;
use crate::error::Error;
use crate::providers::{
    AccessToken, Account, GoogleTokenClient, GoogleTokenError, MsalError, OutlookAuthClient,
    Prompt, ProviderName, TokenResponse,
};
use crate::session::{Invitee, Orchestrator, SessionEvent};

/// Lines typed on stdin, shared between the REPL and the provider prompts.
pub type LineReader = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

/// Spawn the stdin reader task.
pub fn spawn_stdin_reader() -> LineReader {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line.trim().to_string()).is_err() {
                        break;
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    Arc::new(Mutex::new(rx))
}

async fn read_line(lines: &LineReader) -> Option<String> {
    lines.lock().await.recv().await
}

async fn ask(lines: &LineReader, question: &str) -> Option<String> {
    eprint!("{question} ");
    read_line(lines).await.filter(|answer| !answer.is_empty())
}

/// One REPL command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Signup { email: String },
    Otp { code: String },
    User { first_name: String, last_name: String },
    Workspace {
        name: String,
        role: String,
        description: String,
    },
    Profile,
    Add { peer_id: String, role: String },
    Phone { number: String },
    Link { provider: ProviderName },
    Invite(Invitee),
    Delete,
    SignOut,
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".into());
        };
        let args: Vec<&str> = words.collect();
        let arg = |i: usize, name: &str| {
            args.get(i)
                .map(|s| s.to_string())
                .ok_or_else(|| format!("{verb}: missing <{name}>"))
        };

        let command = match verb.trim_start_matches('/').to_ascii_lowercase().as_str() {
            "signup" => Self::Signup {
                email: arg(0, "email")?,
            },
            "otp" => Self::Otp {
                code: arg(0, "code")?,
            },
            "user" => Self::User {
                first_name: arg(0, "first")?,
                last_name: arg(1, "last")?,
            },
            "workspace" => Self::Workspace {
                name: arg(0, "name")?,
                role: arg(1, "role")?,
                description: args.get(2..).map(|rest| rest.join(" ")).unwrap_or_default(),
            },
            "profile" => Self::Profile,
            "add" => Self::Add {
                peer_id: arg(0, "peer_id")?,
                role: arg(1, "role")?,
            },
            "phone" => Self::Phone {
                number: arg(0, "number")?,
            },
            "link" => Self::Link {
                provider: arg(0, "google|outlook")?
                    .parse()
                    .map_err(|e: crate::error::ProviderError| e.to_string())?,
            },
            "invite" => Self::Invite(Invitee {
                first_name: arg(0, "first")?,
                last_name: arg(1, "last")?,
                email: arg(2, "email")?,
                phone: args.get(3).map(|s| s.to_string()).unwrap_or_default(),
            }),
            "delete" => Self::Delete,
            "signout" | "logout" => Self::SignOut,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(command)
    }
}

const HELP: &str = "\
Commands:
  signup <email>                      request a verification code
  otp <code>                          submit the code
  user <first> <last>                 create your profile
  workspace <name> <role> [desc]      create a workspace
  profile                             fetch your profile
  add <peer_id> <role>                add someone to the workspace
  phone <number>                      phone number sent with contact links
  link google|outlook                 import contacts
  invite <first> <last> <email> [phone]
  delete                              delete the account
  signout | status | help | quit";

/// Interactive driver.
pub struct Repl {
    orchestrator: Arc<Orchestrator>,
    lines: LineReader,
}

impl Repl {
    pub fn new(orchestrator: Arc<Orchestrator>, lines: LineReader) -> Self {
        Self {
            orchestrator,
            lines,
        }
    }

    /// Run until `quit` or end of input.
    pub async fn run(&self) {
        eprint!("> ");
        while let Some(line) = read_line(&self.lines).await {
            if line.is_empty() {
                eprint!("> ");
                continue;
            }
            match Command::parse(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => self.execute(command).await,
                Err(message) => eprintln!("{message}"),
            }
            eprint!("> ");
        }
    }

    async fn execute(&self, command: Command) {
        let o = &self.orchestrator;
        let result = match command {
            Command::Signup { email } => o.request_signup(&email).await.map(|_| {
                println!("Code sent to {email}. Enter it with: otp <code>");
            }),
            Command::Otp { code } => o.submit_otp(&code).await.map(|_| {
                println!("Signed in.");
            }),
            Command::User {
                first_name,
                last_name,
            } => o.create_user(&first_name, &last_name).await.map(|_| {
                println!("Profile created.");
            }),
            Command::Workspace {
                name,
                role,
                description,
            } => o
                .create_workspace(&name, &role, &description)
                .await
                .map(|ws| println!("Workspace {} created ({}).", ws.name, ws.id)),
            Command::Profile => o
                .refresh_profile()
                .await
                .map(|p| println!("{}", pretty(&p.body))),
            Command::Add { peer_id, role } => o
                .add_to_workspace(&peer_id, &role)
                .await
                .map(|_| println!("Added {peer_id} as {role}.")),
            Command::Phone { number } => {
                o.set_phone(&number).await;
                Ok(())
            }
            Command::Link { provider } => o
                .link_provider(provider)
                .await
                .map(|_| println!("Contacts linked from {provider}.")),
            Command::Invite(invitee) => {
                let email = invitee.email.clone();
                o.send_invite(invitee)
                    .await
                    .map(|_| println!("Invitation sent to {email}."))
            }
            Command::Delete => o.delete_account().await.map(|_| {
                println!("Account deleted.");
            }),
            Command::SignOut => {
                o.sign_out().await;
                println!("Signed out.");
                Ok(())
            }
            Command::Status => {
                let view = o.view().await;
                println!("{}", pretty(&serde_json::json!({
                    "session": view,
                    "channel_active": o.channel_active(),
                })));
                Ok(())
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => Ok(()),
        };

        if let Err(e) = result {
            report(&e);
        }
    }
}

fn report(e: &Error) {
    let hint = if e.is_retryable() { " (retry)" } else { "" };
    eprintln!("❌ [{}] {e}{hint}", e.kind());
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Print session events as they happen.
pub fn spawn_session_printer(mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event @ SessionEvent::StageChanged { .. }) => eprintln!("ℹ️  {event}"),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Session event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Print server-pushed events as they arrive.
pub fn spawn_server_printer(mut events: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let kind = event.message_type().unwrap_or("event");
            let body = event
                .message()
                .map(|m| pretty(&m))
                .unwrap_or_else(|| event.payload.to_string());
            println!("\n📨 {kind}: {body}");
        }
    })
}

fn state_param() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Google token client that prints the consent URL and reads the token the
/// user pastes back.
pub struct TerminalGoogle {
    config: GoogleConfig,
    lines: LineReader,
}

impl TerminalGoogle {
    pub fn new(config: GoogleConfig, lines: LineReader) -> Self {
        Self { config, lines }
    }

    fn authorize_url(&self, scopes: &[String], prompt: Prompt) -> Result<Url, GoogleTokenError> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or_else(|| GoogleTokenError::new("unknown", "GOOGLE_CLIENT_ID is not set"))?;
        let mut params = vec![
            ("client_id", client_id.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("response_type", "token".to_string()),
            ("scope", scopes.join(" ")),
            ("state", state_param()),
        ];
        if prompt == Prompt::Consent {
            params.push(("prompt", prompt.as_param().to_string()));
        }
        Url::parse_with_params(&self.config.authorize_url, &params)
            .map_err(|e| GoogleTokenError::new("unknown", e.to_string()))
    }
}

#[async_trait]
impl GoogleTokenClient for TerminalGoogle {
    async fn request_access_token(
        &self,
        scopes: &[String],
        prompt: Prompt,
    ) -> Result<TokenResponse, GoogleTokenError> {
        let url = self.authorize_url(scopes, prompt)?;
        eprintln!("\nOpen this URL to grant contacts access:\n  {url}");
        match ask(
            &self.lines,
            "Paste the access_token from the redirect (or error=<code>, blank to cancel):",
        )
        .await
        {
            None => Err(GoogleTokenError::new("popup_closed", "no token entered")),
            Some(answer) => Ok(match answer.strip_prefix("error=") {
                Some(error) => TokenResponse::failed(error),
                None => TokenResponse::granted(answer, None),
            }),
        }
    }
}

/// Microsoft auth client for the terminal. Tokens obtained through the
/// "popup" are cached per account so later silent requests succeed.
pub struct TerminalOutlook {
    config: OutlookConfig,
    lines: LineReader,
    account: Mutex<Option<String>>,
    cache: Mutex<Option<(String, SecretString)>>,
}

impl TerminalOutlook {
    pub fn new(config: OutlookConfig, lines: LineReader) -> Self {
        Self {
            config,
            lines,
            account: Mutex::new(None),
            cache: Mutex::new(None),
        }
    }

    fn authorize_url(
        &self,
        scopes: &[String],
        response_type: &str,
        prompt: &str,
    ) -> Result<Url, MsalError> {
        let client_id = self.config.client_id.as_deref().ok_or_else(|| {
            MsalError::new("ClientConfigurationError", "no_client_id", "OUTLOOK_CLIENT_ID is not set")
        })?;
        let base = format!(
            "{}/oauth2/v2.0/authorize",
            self.config.authority.trim_end_matches('/')
        );
        let scope = scopes.join(" ");
        let state = state_param();
        Url::parse_with_params(
            &base,
            &[
                ("client_id", client_id),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", response_type),
                ("response_mode", "fragment"),
                ("scope", scope.as_str()),
                ("prompt", prompt),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| MsalError::new("ClientConfigurationError", "url_parse_error", e.to_string()))
    }
}

#[async_trait]
impl OutlookAuthClient for TerminalOutlook {
    async fn login_popup(&self, scopes: &[String]) -> Result<Option<Account>, MsalError> {
        let url = self.authorize_url(scopes, "code", "select_account")?;
        eprintln!("\nSign in to Microsoft:\n  {url}");
        let Some(username) = ask(&self.lines, "Account email (blank to cancel):").await else {
            return Ok(None);
        };
        *self.account.lock().await = Some(username.clone());
        Ok(Some(Account {
            home_account_id: username.to_ascii_lowercase(),
            username,
        }))
    }

    async fn acquire_token_silent(
        &self,
        account: &Account,
        _scopes: &[String],
    ) -> Result<AccessToken, MsalError> {
        match &*self.cache.lock().await {
            Some((owner, token)) if *owner == account.username => {
                Ok(AccessToken::new(token.expose_secret(), None))
            }
            _ => Err(MsalError::interaction_required("no cached token for account")),
        }
    }

    async fn acquire_token_popup(&self, scopes: &[String]) -> Result<AccessToken, MsalError> {
        let url = self.authorize_url(scopes, "token", "consent")?;
        eprintln!("\nGrant contacts access:\n  {url}");
        let Some(token) = ask(&self.lines, "Paste the access_token (blank to cancel):").await else {
            return Err(MsalError::user_cancelled());
        };
        if let Some(owner) = self.account.lock().await.clone() {
            *self.cache.lock().await = Some((owner, SecretString::from(token.clone())));
        }
        Ok(AccessToken::new(token, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ContactTokenProvider, GoogleContacts, OutlookContacts};

    fn scripted(answers: &[&str]) -> LineReader {
        let (tx, rx) = mpsc::unbounded_channel();
        for answer in answers {
            tx.send(answer.to_string()).unwrap();
        }
        Arc::new(Mutex::new(rx))
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::parse("signup a@x.com").unwrap(),
            Command::Signup {
                email: "a@x.com".into()
            }
        );
        assert_eq!(
            Command::parse("workspace Acme owner our main space").unwrap(),
            Command::Workspace {
                name: "Acme".into(),
                role: "owner".into(),
                description: "our main space".into(),
            }
        );
        assert_eq!(
            Command::parse("/link Outlook").unwrap(),
            Command::Link {
                provider: ProviderName::Outlook
            }
        );
        assert_eq!(Command::parse("quit").unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(Command::parse("otp").unwrap_err().contains("missing <code>"));
        assert!(Command::parse("link yahoo").is_err());
        assert!(Command::parse("frobnicate").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn invite_phone_is_optional() {
        match Command::parse("invite Grace Hopper grace@x.com").unwrap() {
            Command::Invite(invitee) => {
                assert_eq!(invitee.email, "grace@x.com");
                assert!(invitee.phone.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn google_config() -> GoogleConfig {
        GoogleConfig {
            client_id: Some("client-1".into()),
            ..GoogleConfig::default()
        }
    }

    fn outlook_config() -> OutlookConfig {
        OutlookConfig {
            client_id: Some("client-2".into()),
            ..OutlookConfig::default()
        }
    }

    #[test]
    fn google_url_asks_for_consent_first() {
        let google = TerminalGoogle::new(google_config(), scripted(&[]));
        let scopes = vec!["contacts.readonly".to_string()];

        let consent = google.authorize_url(&scopes, Prompt::Consent).unwrap();
        let pairs: Vec<(String, String)> = consent.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("prompt".into(), "consent".into())));
        assert!(pairs.contains(&("response_type".into(), "token".into())));

        let silent = google.authorize_url(&scopes, Prompt::Silent).unwrap();
        assert!(!silent.query_pairs().any(|(k, _)| k == "prompt"));
    }

    #[tokio::test]
    async fn google_terminal_flow() {
        let google = GoogleContacts::new(
            TerminalGoogle::new(google_config(), scripted(&["error=access_denied", "tok-1", ""])),
            vec!["contacts.readonly".into()],
        );
        assert!(google.acquire_contact_token().await.is_err());
        let linked = google.acquire_contact_token().await.unwrap();
        assert_eq!(linked.token.expose_secret(), "tok-1");
        // Blank answer cancels.
        assert!(google.acquire_contact_token().await.is_err());
    }

    #[tokio::test]
    async fn outlook_popup_token_is_reused_silently() {
        let config = outlook_config();
        let outlook = OutlookContacts::new(
            TerminalOutlook::new(config.clone(), scripted(&["ada@contoso.com", "tok-1", "ada@contoso.com"])),
            config.login_scopes,
            config.token_scopes,
        );

        // First link: login, silent misses, popup supplies the token.
        let first = outlook.acquire_contact_token().await.unwrap();
        assert_eq!(first.token.expose_secret(), "tok-1");

        // Second link: login again, silent hits the cache; no token prompt.
        let second = outlook.acquire_contact_token().await.unwrap();
        assert_eq!(second.token.expose_secret(), "tok-1");
    }

    #[tokio::test]
    async fn outlook_blank_login_cancels() {
        let config = outlook_config();
        let outlook = OutlookContacts::new(
            TerminalOutlook::new(config.clone(), scripted(&[""])),
            config.login_scopes,
            config.token_scopes,
        );
        let err = outlook.acquire_contact_token().await.unwrap_err();
        assert!(matches!(err, crate::error::ProviderError::Cancelled { .. }));
    }
}
