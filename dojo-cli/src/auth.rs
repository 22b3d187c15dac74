use anyhow::{bail, Context, Result};
use std::io::{self, Write};

use dojo_client::SignUpOutcome;

use crate::app::App;

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

fn prompt_secret(label: &str) -> Result<String> {
    // Minimal portable secret prompt: just stdin.
    let secret = prompt(label)?;
    if secret.is_empty() {
        bail!("{label} must not be empty");
    }
    Ok(secret)
}

/// Open `url` with the platform opener if one is installed.
fn open_browser(url: &str) -> bool {
    let Some(opener) = ["xdg-open", "open", "wslview"]
        .into_iter()
        .find(|bin| which::which(bin).is_ok())
    else {
        return false;
    };
    std::process::Command::new(opener)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub async fn register(
    app: &App,
    email: &str,
    username: &str,
    password: Option<String>,
) -> Result<()> {
    if username.trim().is_empty() {
        bail!("username must not be empty");
    }
    let password = match password {
        Some(p) => p,
        None => prompt_secret("Password")?,
    };

    match app.dojo.session().register(email, &password, username).await? {
        SignUpOutcome::SignedIn => {
            println!("Welcome to the dojo, {}.", username.trim());
        }
        SignUpOutcome::ConfirmationRequired => {
            println!("Account created. Confirm your email, then run:");
            println!("  dojo auth login --email {}", email.trim());
        }
    }
    Ok(())
}

pub async fn login(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt_secret("Password")?,
    };
    app.dojo.login(email, &password).await?;
    print_signed_in(app);
    Ok(())
}

pub async fn google(app: &App) -> Result<()> {
    let redirect = app
        .dojo
        .session()
        .login_with_external_provider(app.config.backend.redirect_to.clone())
        .await?;

    println!("Sign in with Google:\n  {}\n", redirect.url);
    if open_browser(&redirect.url) {
        println!("(opened in your browser)");
    }
    let callback = prompt("Paste the URL you were redirected to")?;
    if callback.is_empty() {
        bail!("no callback URL given");
    }
    app.dojo
        .complete_external_login(&callback)
        .await
        .context("completing Google sign-in")?;
    print_signed_in(app);
    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    app.dojo.logout().await?;
    println!("Signed out.");
    Ok(())
}

pub fn status(app: &App) {
    match app.dojo.session().user() {
        Some(user) => {
            let who = user.email.as_deref().unwrap_or(user.id.as_str());
            println!("Signed in as {who}");
            if let Some(profile) = app.dojo.profiles().profile() {
                println!("{} · {} · {} XP", profile.display_name(), profile.rank, profile.xp);
            }
        }
        None => println!("Signed out."),
    }
}

fn print_signed_in(app: &App) {
    match app.dojo.profiles().profile() {
        Some(profile) => println!(
            "Signed in. {} · {} · {} XP",
            profile.display_name(),
            profile.rank,
            profile.xp
        ),
        None => {
            println!("Signed in.");
            if let Some(err) = app.dojo.profiles().error() {
                println!("(profile not loaded: {err})");
            }
        }
    }
}
