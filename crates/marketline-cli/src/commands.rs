use std::io::{self, Write};
use std::time::Duration;

use anyhow::{bail, Result};
use marketline_core::models::{RegisterProfile, User, UserType};
use marketline_core::{AuthError, Config, SessionEvent, SessionStore};
use tokio::sync::broadcast::Receiver;
use tracing::warn;

pub const USAGE: &str = "\
Usage: marketline <command>

Commands:
  login [email]             Sign in (prompts for the password)
  register                  Create an account
  logout                    Sign out and forget the stored session
  whoami                    Show the signed-in user (checks with the server)
  status                    Show the stored session without contacting the server
  verify-email <code>       Confirm your email with the 6-digit code
  reset-password <email>    Email a password reset link
  update-password <token>   Set a new password using a reset token
  help                      Show this message";

/// How long `logout` waits for the server to acknowledge.
const LOGOUT_NOTIFY_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Register,
    Logout,
    Whoami,
    Status,
    VerifyEmail { code: String },
    ResetPassword { email: String },
    UpdatePassword { token: String },
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let name = args.first().map(String::as_str).unwrap_or("help");
        let arg = args.get(1).cloned();
        if args.len() > 2 {
            return Err(format!("Too many arguments for '{}'", name));
        }

        let required =
            |what: &str| arg.clone().ok_or_else(|| format!("'{}' needs a {}", name, what));

        match name {
            "login" => Ok(Command::Login { email: arg }),
            "register" => Ok(Command::Register),
            "logout" => Ok(Command::Logout),
            "whoami" => Ok(Command::Whoami),
            "status" => Ok(Command::Status),
            "verify-email" => Ok(Command::VerifyEmail { code: required("code")? }),
            "reset-password" => Ok(Command::ResetPassword { email: required("email address")? }),
            "update-password" => Ok(Command::UpdatePassword { token: required("reset token")? }),
            "help" | "--help" | "-h" => Ok(Command::Help),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }
}

pub async fn run(command: Command, config: &mut Config) -> Result<()> {
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let store = SessionStore::from_config(config)?;
    let mut events = store.subscribe();

    let result = match command {
        Command::Login { email } => login(&store, config, email).await,
        Command::Register => register(&store, config).await,
        Command::Logout => logout(&store).await,
        Command::Whoami => whoami(&store).await,
        Command::Status => status(&store),
        Command::VerifyEmail { code } => {
            store.verify_email(&code).await?;
            println!("Email verified.");
            Ok(())
        }
        Command::ResetPassword { email } => {
            store.request_password_reset(&email).await?;
            println!("If an account exists for {}, a reset link is on its way.", email);
            Ok(())
        }
        Command::UpdatePassword { token } => update_password(&store, &token).await,
        Command::Help => Ok(()),
    };

    if session_expired(&mut events, &result) {
        eprintln!("Your session has expired. Run `marketline login` to sign in again.");
    }
    result
}

/// The session ended underneath us; send the user back to `login`.
/// Drain pending session events. True if the session ended underneath the
/// command, whether announced or only seen as the command's own error.
fn session_expired(events: &mut Receiver<SessionEvent>, result: &Result<()>) -> bool {
    let mut expired = false;
    while let Ok(event) = events.try_recv() {
        expired |= event == SessionEvent::Expired;
    }
    expired
        || result.as_ref().is_err_and(|e| {
            e.downcast_ref::<AuthError>()
                .is_some_and(AuthError::is_session_expired)
        })
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    Ok(rpassword::prompt_password(format!("{}: ", label))?)
}

fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn login(store: &SessionStore, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => match config.last_email.clone() {
            Some(last) => {
                let input = prompt(&format!("Email [{}]", last))?;
                if input.is_empty() {
                    last
                } else {
                    input
                }
            }
            None => prompt("Email")?,
        },
    };
    let password = prompt_password("Password")?;

    println!("\nSigning in...");
    let user = store.login(&email, &password).await?;
    remember_email(config, &email);

    println!("Signed in as {}.", user.display_name());
    if !user.status.email_verified {
        println!("Your email is not verified yet. Run `marketline verify-email <code>`.");
    }
    Ok(())
}

fn parse_user_type(input: &str) -> Result<UserType> {
    match input.trim().to_lowercase().as_str() {
        "" | "c" | "customer" => Ok(UserType::Customer),
        "a" | "agent" => Ok(UserType::Agent),
        other => bail!("Unknown account type '{}'", other),
    }
}

async fn register(store: &SessionStore, config: &mut Config) -> Result<()> {
    let first_name = prompt("First name")?;
    let last_name = prompt("Last name")?;
    let email = prompt("Email")?;
    let phone = prompt("Phone (optional)")?;
    let user_type = parse_user_type(&prompt("Account type [customer/agent]")?)?;
    let password = prompt_password("Password")?;
    if prompt_password("Confirm password")? != password {
        bail!("Passwords do not match");
    }

    let profile = RegisterProfile {
        first_name,
        last_name,
        email,
        password,
        phone: if phone.is_empty() { None } else { Some(phone) },
        user_type,
    };

    println!("\nCreating account...");
    let user = store.register(&profile).await?;
    remember_email(config, &user.email);

    println!("Welcome, {}! Check your inbox for a verification code.", user.display_name());
    Ok(())
}

async fn logout(store: &SessionStore) -> Result<()> {
    if let Err(e) = store.session().load() {
        warn!(error = %e, "Stored session unreadable");
    }

    match store.logout() {
        Some(notification) => {
            let wait = Duration::from_secs(LOGOUT_NOTIFY_TIMEOUT_SECS);
            if tokio::time::timeout(wait, notification).await.is_err() {
                warn!("Server did not acknowledge logout in time");
            }
            println!("Signed out.");
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("Name:      {}", user.display_name());
    println!("Email:     {}", user.email);
    println!("Account:   {:?}", user.status.user_type);
    println!("Verified:  {}", if user.status.email_verified { "yes" } else { "no" });
    println!("Activated: {}", if user.status.activated { "yes" } else { "no" });
}

async fn whoami(store: &SessionStore) -> Result<()> {
    match store.hydrate().await? {
        Some(user) => print_user(&user),
        None => println!("Not signed in."),
    }
    Ok(())
}

fn status(store: &SessionStore) -> Result<()> {
    store.session().load()?;
    let data = store.snapshot();

    match data.user {
        Some(ref user) if data.is_authenticated => print_user(user),
        _ => println!("Not signed in."),
    }
    println!("Access token:  {}", presence(data.access_token.is_some()));
    println!("Refresh token: {}", presence(data.refresh_token.is_some()));
    Ok(())
}

fn presence(stored: bool) -> &'static str {
    if stored {
        "stored"
    } else {
        "none"
    }
}

async fn update_password(store: &SessionStore, token: &str) -> Result<()> {
    let password = prompt_password("New password")?;
    if prompt_password("Confirm new password")? != password {
        bail!("Passwords do not match");
    }
    store.update_password(token, &password).await?;
    println!("Password updated. You can now sign in with the new password.");
    Ok(())
}
